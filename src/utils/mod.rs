//! Utility Module Implementation
//! Author: kartik4091
//! Created: 2025-06-03 09:14:13 UTC
//!
//! Logging initialisation and text normalisation shared by the service.

pub mod logger;
pub mod text;

pub use logger::init_logging;
pub use text::{join_lines, normalize};
