// Redaction: locating PII, masking it, restoring it and promoting revisions

pub mod engine;
pub mod locator;
pub mod locks;
pub mod patterns;
pub mod revision;

pub use engine::{matches_filter, BlurOutcome, RedactionEngine, UnblurOutcome};
pub use locator::{locate, LocateReport, LocatedMatch};
pub use locks::{ManuscriptGuard, ManuscriptLocks};
pub use patterns::{author_names, Pattern, PatternSet};
pub use revision::{revision_path, sha256_hex, upload_path, RevisionTracker};
