//! Document revision tracker
//!
//! A manuscript always points at exactly one current revision. New
//! revisions get deterministic, never-reused paths next to the upload:
//! `papers/12345678.pdf`, then `papers/12345678.r2.blurred.pdf`, and so on.
//! Older files stay on disk.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::storage::{FileStore, RevisionStore};
use crate::types::{Manuscript, RevisionEntry, RevisionKind, TrackingCode};

const UPLOAD_DIR: &str = "papers";
const MAX_PATH_ATTEMPTS: usize = 64;

/// Path of the first revision of a manuscript
pub fn upload_path(id: TrackingCode) -> String {
    format!("{}/{}.pdf", UPLOAD_DIR, id)
}

/// Path for the `sequence`-th revision, derived from the current one
pub fn revision_path(current: &str, id: TrackingCode, sequence: usize, kind: RevisionKind) -> String {
    let dir = match current.rfind('/') {
        Some(slash) => &current[..=slash],
        None => "",
    };
    format!("{}{}.r{}.{}.pdf", dir, id, sequence, kind)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[derive(Clone)]
pub struct RevisionTracker {
    store: Arc<dyn RevisionStore>,
    files: Arc<dyn FileStore>,
}

impl RevisionTracker {
    pub fn new(store: Arc<dyn RevisionStore>, files: Arc<dyn FileStore>) -> Self {
        Self { store, files }
    }

    pub async fn current(&self, id: TrackingCode) -> Result<String> {
        Ok(self.store.manuscript(id).await?.pdf_path)
    }

    pub async fn history(&self, id: TrackingCode) -> Result<Vec<RevisionEntry>> {
        self.store.revisions(id).await
    }

    /// Next unused path; skips over orphaned files left by failed commits
    pub async fn next_path(&self, manuscript: &Manuscript, kind: RevisionKind) -> Result<String> {
        let base = self.store.revisions(manuscript.id).await?.len() + 1;
        for sequence in base..base + MAX_PATH_ATTEMPTS {
            let candidate = revision_path(&manuscript.pdf_path, manuscript.id, sequence, kind);
            if !self.files.exists(&candidate).await? {
                return Ok(candidate);
            }
        }
        Err(Error::PersistenceConflict(format!(
            "no free revision path for {}",
            manuscript.id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code() -> TrackingCode {
        TrackingCode::new(12_345_678).unwrap()
    }

    #[test]
    fn test_paths_are_derived_from_the_current_directory() {
        assert_eq!(upload_path(code()), "papers/12345678.pdf");
        assert_eq!(
            revision_path("papers/12345678.pdf", code(), 2, RevisionKind::Blurred),
            "papers/12345678.r2.blurred.pdf"
        );
        assert_eq!(
            revision_path("archive/2025/12345678.r2.blurred.pdf", code(), 3, RevisionKind::Unblurred),
            "archive/2025/12345678.r3.unblurred.pdf"
        );
        assert_eq!(
            revision_path("flat.pdf", code(), 4, RevisionKind::Reviewed),
            "12345678.r4.reviewed.pdf"
        );
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
