use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("Collection already exists: {0}")]
    AlreadyExists(String),
    #[error("Collection not found: {0}")]
    NotFound(String),
    #[error("Empty input: {0}")]
    EmptyInput(String),
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Consistency fault: {0}")]
    Consistency(String),
    #[error("Generation service unavailable: {0}")]
    CollaboratorUnavailable(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Embedding error: {0}")]
    Embedding(String),
}

impl RagError {
    /// Whether retrying the same request later can succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RagError::CollaboratorUnavailable(_) | RagError::Storage(_))
    }
}

impl serde::Serialize for RagError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<RagError> for String {
    fn from(e: RagError) -> String {
        e.to_string()
    }
}

impl From<std::io::Error> for RagError {
    fn from(e: std::io::Error) -> Self {
        RagError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for RagError {
    fn from(e: serde_json::Error) -> Self {
        RagError::Storage(e.to_string())
    }
}

impl From<reqwest::Error> for RagError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RagError::CollaboratorUnavailable(format!("request timed out: {e}"))
        } else {
            RagError::CollaboratorUnavailable(e.to_string())
        }
    }
}

pub type RagResult<T> = Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(RagError::CollaboratorUnavailable("down".into()).is_retryable());
        assert!(RagError::Storage("disk full".into()).is_retryable());
        assert!(!RagError::DimensionMismatch { expected: 768, actual: 384 }.is_retryable());
        assert!(!RagError::NotFound("notes".into()).is_retryable());
    }

    #[test]
    fn test_serializes_as_message() {
        let err = RagError::NotFound("notes".into());
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"Collection not found: notes\"");
    }

    #[test]
    fn test_io_error_maps_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(RagError::from(io), RagError::Storage(_)));
    }
}
