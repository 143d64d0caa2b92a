/// Wraps a sensitive configuration value so it cannot leak through `Debug`
/// output (the object-storage secret key, for instance).
///
/// Deref gives transparent read access; `Debug` prints `<redacted>`. The
/// wrapper deliberately implements `Deserialize` but not `Serialize`, so a
/// loaded secret cannot be round-tripped back out by accident.
#[derive(Clone, PartialEq, Eq)]
pub struct Redacted<T>(T);

impl<T> Redacted<T> {
    /// Unwraps the secret for handing to a client constructor.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> From<T> for Redacted<T> {
    fn from(value: T) -> Self {
        Self(value)
    }
}

impl<T> std::ops::Deref for Redacted<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> AsRef<T> for Redacted<T> {
    fn as_ref(&self) -> &T {
        &self.0
    }
}

impl<T> std::fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<redacted>")
    }
}

impl<'de, T> serde::Deserialize<'de> for Redacted<T>
where
    T: serde::Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        T::deserialize(deserializer).map(Redacted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_is_redacted() {
        //* Given
        let secret: Redacted<String> = "hunter2".to_string().into();

        //* When
        let debug = format!("{secret:?}");

        //* Then
        assert_eq!(debug, "<redacted>");
        assert_eq!(*secret, "hunter2");
    }
}
