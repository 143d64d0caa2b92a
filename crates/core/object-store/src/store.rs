use std::sync::Arc;

use bytes::Bytes;
use object_store::{
    path::Path, Attribute, Attributes, ObjectStore, PutOptions, PutPayload,
};
use osmdbt_monitoring::metrics;
use prometheus::{IntCounterVec, Registry};

/// A wrapper around an `ObjectStore` scoped to the replication bucket.
///
/// It adds the things a plain `ObjectStore` does not give us:
/// - content-type inference from the key's trailing extension,
/// - operation and error counters,
/// - string-typed reads for the state file.
#[derive(Clone)]
pub struct Store {
    store: Arc<dyn ObjectStore>,
    metrics: StoreMetrics,
}

impl Store {
    pub fn new(store: Arc<dyn ObjectStore>, metrics: StoreMetrics) -> Self {
        Self { store, metrics }
    }

    /// An in-memory store with its own private metrics registry.
    pub fn in_memory() -> Self {
        let store = Arc::new(object_store::memory::InMemory::new());
        let metrics = StoreMetrics::register(&Registry::new()).expect("fresh registry");
        Self { store, metrics }
    }

    /// Reads the entire contents of an object as a UTF-8 string.
    pub async fn get_string(&self, key: &str) -> Result<String, StoreError> {
        let path = Path::from(key);
        let result = self
            .store
            .get(&path)
            .await
            .map_err(|source| StoreError::Get {
                key: key.to_string(),
                source,
            })
            .inspect_err(|err| self.metrics.record_error(err))?;
        let bytes = result
            .bytes()
            .await
            .map_err(|source| StoreError::Read {
                key: key.to_string(),
                source,
            })
            .inspect_err(|err| self.metrics.record_error(err))?;

        self.metrics.objects_count.with_label_values(&["get"]).inc();
        String::from_utf8(bytes.to_vec()).map_err(|_| StoreError::NotUtf8 {
            key: key.to_string(),
        })
    }

    /// Writes an object, inferring the content type from the key's trailing
    /// extension. Unknown extensions are uploaded without a content type.
    pub async fn put(&self, key: &str, bytes: Bytes) -> Result<(), StoreError> {
        let path = Path::from(key);
        let mut attributes = Attributes::new();
        if let Some(content_type) = content_type_for_key(key) {
            attributes.insert(Attribute::ContentType, content_type.into());
        }
        let options = PutOptions {
            attributes,
            ..Default::default()
        };

        self.store
            .put_opts(&path, PutPayload::from(bytes), options)
            .await
            .map_err(|source| StoreError::Put {
                key: key.to_string(),
                source,
            })
            .inspect_err(|err| self.metrics.record_error(err))?;

        self.metrics.objects_count.with_label_values(&["put"]).inc();
        Ok(())
    }
}

/// Infer a content type from the trailing file extension of an object key.
fn content_type_for_key(key: &str) -> Option<&'static str> {
    let extension = key.rsplit_once('.').map(|(_, ext)| ext)?;
    match extension {
        "txt" => Some("text/plain"),
        "gz" => Some("application/gzip"),
        "json" => Some("application/json"),
        "xml" | "osc" | "osm" => Some("application/xml"),
        "md" => Some("text/markdown"),
        "html" => Some("text/html"),
        _ => None,
    }
}

/// Counters for object-store operations.
#[derive(Clone)]
pub struct StoreMetrics {
    /// `osmdbt_objects_count{kind}` — successful operations by kind.
    objects_count: IntCounterVec,
    /// `osmdbt_s3_error_count{kind}` — failed operations by error kind.
    error_count: IntCounterVec,
}

impl StoreMetrics {
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            objects_count: metrics::counter_vec(
                registry,
                "osmdbt_objects_count",
                "Count of successful object store operations",
                &["kind"],
            )?,
            error_count: metrics::counter_vec(
                registry,
                "osmdbt_s3_error_count",
                "Count of failed object store operations",
                &["kind"],
            )?,
        })
    }

    fn record_error(&self, err: &StoreError) {
        self.error_count.with_label_values(&[err.kind()]).inc();
    }
}

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Error initiating object retrieval.
    #[error("failed to get object {key}: {source}")]
    Get {
        key: String,
        #[source]
        source: object_store::Error,
    },

    /// Error streaming object bytes after successful retrieval.
    #[error("failed to read object {key}: {source}")]
    Read {
        key: String,
        #[source]
        source: object_store::Error,
    },

    /// Object contents are not valid UTF-8 text.
    #[error("object is not an utf8 text file: {key}")]
    NotUtf8 { key: String },

    /// Error writing an object.
    #[error("failed to put object {key}: {source}")]
    Put {
        key: String,
        #[source]
        source: object_store::Error,
    },
}

impl StoreError {
    /// Stable label for the error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Get { .. } => "get",
            StoreError::Read { .. } => "read",
            StoreError::NotUtf8 { .. } => "not_utf8",
            StoreError::Put { .. } => "put",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::Get {
                source: object_store::Error::NotFound { .. },
                ..
            } | StoreError::Read {
                source: object_store::Error::NotFound { .. },
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_is_inferred_from_trailing_extension() {
        assert_eq!(content_type_for_key("state.txt"), Some("text/plain"));
        assert_eq!(
            content_type_for_key("000/000/667.osc.gz"),
            Some("application/gzip"),
        );
        assert_eq!(
            content_type_for_key("000/000/667.state.txt"),
            Some("text/plain"),
        );
        assert_eq!(content_type_for_key("info.json"), Some("application/json"));
        assert_eq!(content_type_for_key("blob.bin"), None);
        assert_eq!(content_type_for_key("no-extension"), None);
    }

    #[tokio::test]
    async fn put_then_get_round_trips_text() {
        //* Given
        let store = Store::in_memory();

        //* When
        store
            .put("state.txt", Bytes::from_static(b"sequenceNumber=667\n"))
            .await
            .expect("put should succeed");
        let contents = store.get_string("state.txt").await.expect("get");

        //* Then
        assert_eq!(contents, "sequenceNumber=667\n");
    }

    #[tokio::test]
    async fn missing_object_reports_not_found() {
        //* Given
        let store = Store::in_memory();

        //* When
        let err = store.get_string("state.txt").await.expect_err("no object");

        //* Then
        assert!(err.is_not_found());
        assert_eq!(err.kind(), "get");
    }
}
