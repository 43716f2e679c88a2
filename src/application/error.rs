//! Application-level errors (wraps domain and codec errors)

use std::path::PathBuf;
use thiserror::Error;

use crate::domain::TreeError;
use crate::infrastructure::CodecError;

/// Application errors wrap domain errors and add application-level context.
#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("{0}")]
    Tree(#[from] TreeError),

    #[error("snapshot codec: {0}")]
    Codec(#[from] CodecError),

    #[error("snapshot does not re-encode identically: {path} (first difference at byte {offset})")]
    VerifyMismatch { path: PathBuf, offset: usize },

    #[error("config error: {message}")]
    Config { message: String },

    #[error("operation failed: {context}")]
    OperationFailed {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Result type for application layer operations.
pub type ApplicationResult<T> = Result<T, ApplicationError>;
