//! Main Library File for the Blind Review Backend
//! Keeps manuscript PII encrypted at rest and produces anonymised PDF
//! revisions that can be reversed one category at a time.

// Configuration and shared types
pub mod config;
pub mod error;
pub mod types;

// Field encryption
pub mod security;

// Document access: parsing, rendering, OCR
pub mod pdf;

// Locate, redact, restore, promote revisions
pub mod redaction;

// Relational and file storage
pub mod storage;

// Submission and review workflow
pub mod workflow;

// Shared Utilities
pub mod utils;

// Re-exports for crate consumers
pub use config::ServiceConfig;
pub use error::{Error, Result};
pub use redaction::{BlurOutcome, RedactionEngine, UnblurOutcome};
pub use security::{CipherSuite, FieldCodec};
pub use types::{Category, EncryptedField, Manuscript, Region, TrackingCode};
pub use utils::init_logging;
pub use workflow::ReviewDesk;
