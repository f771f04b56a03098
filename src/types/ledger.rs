//! Redaction ledger and revision history rows

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Category, EncryptedField, ManuscriptStatus, Region, TrackingCode};
use crate::error::{Error, Result};

/// One applied redaction. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactionRecord {
    pub id: i64,
    pub manuscript_id: TrackingCode,
    pub category: Category,
    pub page: u32,
    pub region: Region,
    /// Text that was removed, sealed with the field codec
    pub original_text: EncryptedField,
    /// Mask written in its place
    pub replacement_text: String,
    pub created_at: DateTime<Utc>,
}

/// Ledger row before the store assigns an id
#[derive(Debug, Clone, PartialEq)]
pub struct NewRedactionRecord {
    pub category: Category,
    pub page: u32,
    pub region: Region,
    pub original_text: EncryptedField,
    pub replacement_text: String,
}

/// Why a revision was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevisionKind {
    Uploaded,
    Blurred,
    Unblurred,
    Reviewed,
    Revised,
}

impl RevisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevisionKind::Uploaded => "uploaded",
            RevisionKind::Blurred => "blurred",
            RevisionKind::Unblurred => "unblurred",
            RevisionKind::Reviewed => "reviewed",
            RevisionKind::Revised => "revised",
        }
    }
}

impl fmt::Display for RevisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RevisionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "uploaded" => Ok(RevisionKind::Uploaded),
            "blurred" => Ok(RevisionKind::Blurred),
            "unblurred" => Ok(RevisionKind::Unblurred),
            "reviewed" => Ok(RevisionKind::Reviewed),
            "revised" => Ok(RevisionKind::Revised),
            other => Err(Error::ValidationError(format!("unknown revision kind: {:?}", other))),
        }
    }
}

/// A promoted revision. Files of older revisions stay on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionEntry {
    pub manuscript_id: TrackingCode,
    pub path: String,
    pub kind: RevisionKind,
    /// Hex SHA-256 of the revision bytes
    pub sha256: String,
    pub created_at: DateTime<Utc>,
}

/// Review row written together with a `Reviewed` revision
#[derive(Debug, Clone, PartialEq)]
pub struct NewReview {
    pub reviewer_id: i64,
    pub comments: EncryptedField,
}

/// Log row before the store assigns an id
#[derive(Debug, Clone, PartialEq)]
pub struct NewLogEntry {
    pub manuscript_id: Option<TrackingCode>,
    pub reviewer_id: Option<i64>,
    pub event: EncryptedField,
}

/// Everything a pointer swap commits. Applied all-or-nothing.
#[derive(Debug, Clone)]
pub struct RevisionCommit {
    pub manuscript_id: TrackingCode,
    /// Pointer value the revision was derived from
    pub expected_path: String,
    pub new_path: String,
    pub kind: RevisionKind,
    pub sha256: String,
    pub records: Vec<NewRedactionRecord>,
    pub flag: Option<(Category, bool)>,
    pub status: Option<ManuscriptStatus>,
    pub title: Option<EncryptedField>,
    pub review: Option<NewReview>,
    pub log: Option<NewLogEntry>,
}

impl RevisionCommit {
    pub fn new(
        manuscript_id: TrackingCode,
        expected_path: impl Into<String>,
        new_path: impl Into<String>,
        kind: RevisionKind,
        sha256: impl Into<String>,
    ) -> Self {
        Self {
            manuscript_id,
            expected_path: expected_path.into(),
            new_path: new_path.into(),
            kind,
            sha256: sha256.into(),
            records: Vec::new(),
            flag: None,
            status: None,
            title: None,
            review: None,
            log: None,
        }
    }
}
