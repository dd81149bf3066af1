//! Error types for the persist engine.

use crate::DocId;
use thiserror::Error;

/// All possible errors from the persist engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Argument errors
    #[error("invalid id argument: {0}")]
    InvalidArgument(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    #[error("invalid stored value for '{id}': {reason}")]
    InvalidStoredValue { id: DocId, reason: String },

    // Document set errors
    #[error("document not found: {0}")]
    DocumentNotFound(DocId),

    #[error("document already exists: {0}")]
    DocumentAlreadyExists(DocId),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
