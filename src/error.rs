//! Error types for store operations

use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Main error type for the entity store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Malformed ingestion input. Aborts the current ingestion call only.
    #[error("Parse error at byte {offset} (line {line}, column {column}): {message}")]
    Parse { offset: u64, line: usize, column: usize, message: String },

    /// A namespace, property or metadata key could not be persisted
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// An internal invariant of the persisted layout is violated.
    /// The store should be considered suspect.
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// Dataset or identifier not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed caller input such as an unparseable continuation token
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Read or batch commit failure reported by RocksDB
    #[error("Backend error: {0}")]
    Backend(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Parse error without a position yet. The ingestion driver fills it in.
    pub(crate) fn parse(message: impl Into<String>) -> Self {
        StoreError::Parse { offset: 0, line: 0, column: 0, message: message.into() }
    }

    /// Attach an input position to a parse error. Other variants are returned unchanged.
    pub(crate) fn at_position(self, offset: u64, line: usize, column: usize) -> Self {
        match self {
            StoreError::Parse { message, .. } => StoreError::Parse { offset, line, column, message },
            other => other,
        }
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::NotFound("dataset 'people'".to_string());
        assert_eq!(err.to_string(), "Not found: dataset 'people'");
    }

    #[test]
    fn test_parse_error_carries_position() {
        let err = StoreError::Parse {
            offset: 42,
            line: 3,
            column: 7,
            message: "expected value".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("byte 42"));
        assert!(msg.contains("line 3"));
        assert!(msg.contains("expected value"));
    }

    #[test]
    fn test_at_position_only_touches_parse_errors() {
        let located = StoreError::parse("entity without @id").at_position(10, 1, 11);
        assert!(matches!(located, StoreError::Parse { offset: 10, line: 1, column: 11, .. }));

        let other = StoreError::Integrity("disk full".to_string()).at_position(10, 1, 11);
        assert!(matches!(other, StoreError::Integrity(_)));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: StoreError = json_err.into();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
