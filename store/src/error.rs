//! Unified error handling for the store crate.

/// Store error type.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] persist_engine::Error),

    #[error("No storage driver available (tried: {0})")]
    NoDriverAvailable(String),

    #[error("A sync pass is already running for collection {0}")]
    SyncInProgress(String),
}

impl StoreError {
    /// Whether the error is an invalid argument rejected before any storage call.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            StoreError::Engine(persist_engine::Error::InvalidArgument(_))
        )
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StoreError::StorageUnavailable("quota exceeded".into());
        assert_eq!(err.to_string(), "Storage unavailable: quota exceeded");

        let err = StoreError::SyncInProgress("todos".into());
        assert_eq!(
            err.to_string(),
            "A sync pass is already running for collection todos"
        );
    }

    #[test]
    fn invalid_argument_is_recognised() {
        let err: StoreError = persist_engine::Error::InvalidArgument("42".into()).into();
        assert!(err.is_invalid_argument());
        assert!(!StoreError::StorageUnavailable("x".into()).is_invalid_argument());
    }
}
