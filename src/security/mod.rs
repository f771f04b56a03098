//! Security module for PII protection at rest
//! Created: 2025-06-03 15:41:54 UTC
//! Author: kartik4091

// Public module exports
pub mod field_codec;

// Re-exports for convenient access
pub use field_codec::{CipherSuite, FieldCodec};
