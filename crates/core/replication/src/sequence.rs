//! Sequence numbers, state file parsing, and the hierarchical publish path.

use std::fmt;

/// A replication sequence number.
///
/// Monotonically non-decreasing across successful jobs; strictly increasing
/// on jobs that publish a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sequence(u64);

impl Sequence {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    /// Extracts the sequence number from state file contents.
    ///
    /// The file must contain a `sequenceNumber=<digits>` substring; all other
    /// content is opaque and preserved by the callers that copy the file.
    pub fn parse_state(text: &str) -> Result<Self, InvalidStateError> {
        const MARKER: &str = "sequenceNumber=";

        for (index, _) in text.match_indices(MARKER) {
            let digits: &str = {
                let rest = &text[index + MARKER.len()..];
                let end = rest
                    .char_indices()
                    .find(|(_, c)| !c.is_ascii_digit())
                    .map(|(i, _)| i)
                    .unwrap_or(rest.len());
                &rest[..end]
            };
            if digits.is_empty() {
                continue;
            }
            let value = digits
                .parse()
                .map_err(|_| InvalidStateError::OutOfRange(digits.to_string()))?;
            return Ok(Self(value));
        }

        Err(InvalidStateError::MissingSequenceNumber)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The state file could not be interpreted as a sequence pointer.
#[derive(Debug, thiserror::Error)]
pub enum InvalidStateError {
    /// No `sequenceNumber=<digits>` substring was found.
    #[error("state file does not contain a `sequenceNumber=<digits>` entry")]
    MissingSequenceNumber,

    /// The digits do not fit into a 64-bit sequence number.
    #[error("sequence number out of range: {0}")]
    OutOfRange(String),
}

/// The hierarchical object key derived from a sequence number.
///
/// A sequence N maps to the triple (N / 1_000_000, (N % 1_000_000) / 1_000,
/// N % 1_000), each rendered as a zero-padded 3-digit decimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishPath {
    top: u64,
    mid: u64,
    leaf: u64,
}

impl PublishPath {
    /// Object key of the immutable per-sequence state snapshot.
    pub fn state_key(&self) -> String {
        format!("{self}.state.txt")
    }

    /// Object key of the immutable diff payload.
    pub fn diff_key(&self) -> String {
        format!("{self}.osc.gz")
    }

    /// The three zero-padded path segments, top first.
    pub fn segments(&self) -> [String; 3] {
        [
            format!("{:03}", self.top),
            format!("{:03}", self.mid),
            format!("{:03}", self.leaf),
        ]
    }
}

impl From<Sequence> for PublishPath {
    fn from(sequence: Sequence) -> Self {
        let n = sequence.value();
        Self {
            top: n / 1_000_000,
            mid: (n % 1_000_000) / 1_000,
            leaf: n % 1_000,
        }
    }
}

impl fmt::Display for PublishPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}/{:03}/{:03}", self.top, self.mid, self.leaf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_state_file() {
        let sequence = Sequence::parse_state("sequenceNumber=667\n").expect("valid state");
        assert_eq!(sequence, Sequence::new(667));
    }

    #[test]
    fn parses_sequence_among_opaque_sibling_fields() {
        //* Given
        let text = "#Fri Jul 31 12:00:01 UTC 2026\ntimestamp=2026-07-31T12\\:00\\:01Z\nsequenceNumber=1234567\n";

        //* When
        let sequence = Sequence::parse_state(text).expect("valid state");

        //* Then
        assert_eq!(sequence.value(), 1_234_567);
    }

    #[test]
    fn skips_marker_without_digits() {
        //* Given
        // The first marker has no digits; the regex-equivalent scan must
        // still find the second one.
        let text = "sequenceNumber=\nsequenceNumber=42\n";

        //* When
        let sequence = Sequence::parse_state(text).expect("valid state");

        //* Then
        assert_eq!(sequence.value(), 42);
    }

    #[test]
    fn rejects_garbage() {
        let err = Sequence::parse_state("garbage").expect_err("invalid state");
        assert!(matches!(err, InvalidStateError::MissingSequenceNumber));
    }

    #[test]
    fn rejects_marker_with_no_digits_at_all() {
        let err = Sequence::parse_state("sequenceNumber=x").expect_err("invalid state");
        assert!(matches!(err, InvalidStateError::MissingSequenceNumber));
    }

    #[test]
    fn rejects_overflowing_sequence() {
        let err = Sequence::parse_state("sequenceNumber=99999999999999999999")
            .expect_err("out of range");
        assert!(matches!(err, InvalidStateError::OutOfRange(_)));
    }

    #[test]
    fn zero_maps_to_zero_path() {
        let path = PublishPath::from(Sequence::new(0));
        assert_eq!(path.to_string(), "000/000/000");
    }

    #[test]
    fn small_sequence_stays_in_lowest_directory() {
        let path = PublishPath::from(Sequence::new(667));
        assert_eq!(path.state_key(), "000/000/667.state.txt");
        assert_eq!(path.diff_key(), "000/000/667.osc.gz");
    }

    #[test]
    fn sequence_overflows_into_upper_directories() {
        let path = PublishPath::from(Sequence::new(1_234_568));
        assert_eq!(path.to_string(), "001/234/568");
        assert_eq!(path.segments(), ["001", "234", "568"]);
    }

    #[test]
    fn publish_path_round_trips() {
        // Reassembling the three components must yield the original sequence
        // for the full supported range.
        let samples = (0..1_000_000_000u64)
            .step_by(999_983)
            .chain([0, 1, 999, 1_000, 999_999, 1_000_000, 999_999_999]);

        for n in samples {
            let path = PublishPath::from(Sequence::new(n));
            let [top, mid, leaf] = path.segments();
            let reassembled: u64 = top.parse::<u64>().unwrap() * 1_000_000
                + mid.parse::<u64>().unwrap() * 1_000
                + leaf.parse::<u64>().unwrap();
            assert_eq!(reassembled, n, "path {path} must round-trip");
        }
    }
}
