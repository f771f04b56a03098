//! Error types and handling for the manuscript review backend
//! Created: 2025-06-03 11:31:05 UTC
//! Author: kartik4905

use std::{error::Error as StdError, io, result::Result as StdResult};

use thiserror::Error;

use crate::types::TrackingCode;

/// Custom result type for review-desk operations
pub type Result<T> = StdResult<T, Error>;

/// Core error type for review-desk operations
#[derive(Error, Debug)]
#[non_exhaustive]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// Token is malformed, truncated or was sealed under another key
    #[error("Decrypt error: {0}")]
    DecryptError(String),

    /// PDF bytes are corrupt or missing; the manuscript is left unchanged
    #[error("Document open error: {0}")]
    DocumentOpenError(String),

    #[error("Document error: {0}")]
    DocumentError(String),

    /// A text match could not be placed on the page. Reported, never raised by the engine.
    /// Display leaves the matched text out so warnings never carry PII.
    #[error("Locator mismatch on page {page}: {} chars have no geometric match", .text.chars().count())]
    LocatorMismatch { page: usize, text: String },

    /// Ledger or pointer commit failed; the current revision was not advanced
    #[error("Persistence conflict: {0}")]
    PersistenceConflict(String),

    #[error("Concurrent mutation conflict for manuscript {0}")]
    ConcurrentMutationConflict(TrackingCode),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    #[error("OCR error: {0}")]
    OcrError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Internal error: {0}")]
    InternalError(#[source] Box<dyn StdError + Send + Sync>),
}

impl Error {
    /// Helper for creating an `InternalError` with a boxed source
    pub fn internal<E: StdError + Send + Sync + 'static>(e: E) -> Self {
        Error::InternalError(Box::new(e))
    }

    /// True for conditions a caller may retry without changing the request
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::TimeoutError(_)
                | Error::ConcurrentMutationConflict(_)
                | Error::PersistenceConflict(_)
        )
    }
}

// Implement conversions
impl From<lopdf::Error> for Error {
    fn from(err: lopdf::Error) -> Self {
        Error::DocumentError(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Error::TimeoutError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::internal(err)
    }
}
