//! Manuscript model
//! Author: kartik4091
//! Created: 2025-06-05

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Eight-digit public identifier handed to the submitting author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackingCode(u32);

impl TrackingCode {
    pub const MIN: u32 = 10_000_000;
    pub const MAX: u32 = 99_999_999;

    pub fn new(value: u32) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::ValidationError(format!(
                "tracking code must have exactly 8 digits, got {}",
                value
            )))
        }
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TrackingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08}", self.0)
    }
}

impl FromStr for TrackingCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::ValidationError(format!("invalid tracking code: {:?}", s)));
        }
        let value = s
            .parse::<u32>()
            .map_err(|e| Error::ValidationError(e.to_string()))?;
        Self::new(value)
    }
}

impl TryFrom<i64> for TrackingCode {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        let value = u32::try_from(value)
            .map_err(|_| Error::ValidationError(format!("invalid tracking code: {}", value)))?;
        Self::new(value)
    }
}

/// Class of PII subject to independent redaction toggling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Email,
    Authors,
    Institution,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Email, Category::Authors, Category::Institution];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Email => "email",
            Category::Authors => "authors",
            Category::Institution => "institution",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    // Also accepts the anonymity flag names used by the editor front end
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" | "mail" | "is_mail_anonymous" => Ok(Category::Email),
            "authors" | "author" | "is_authors_anonymous" => Ok(Category::Authors),
            "institution" | "is_institution_anonymous" => Ok(Category::Institution),
            other => Err(Error::ValidationError(format!("unknown category: {:?}", other))),
        }
    }
}

/// Lifecycle status stored on the manuscript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManuscriptStatus {
    Pending,
    UnderReview,
    Accepted,
    Rejected,
}

impl ManuscriptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManuscriptStatus::Pending => "pending",
            ManuscriptStatus::UnderReview => "under_review",
            ManuscriptStatus::Accepted => "accepted",
            ManuscriptStatus::Rejected => "rejected",
        }
    }
}

impl Default for ManuscriptStatus {
    fn default() -> Self {
        ManuscriptStatus::Pending
    }
}

impl fmt::Display for ManuscriptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ManuscriptStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "pending" => Ok(ManuscriptStatus::Pending),
            "under_review" | "in_review" => Ok(ManuscriptStatus::UnderReview),
            "accepted" => Ok(ManuscriptStatus::Accepted),
            "rejected" => Ok(ManuscriptStatus::Rejected),
            other => Err(Error::ValidationError(format!("unknown status: {:?}", other))),
        }
    }
}

/// Status shown to authors and editors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayStatus {
    Stored(ManuscriptStatus),
    /// A review exists but some field is still anonymised
    AwaitingApproval,
}

impl fmt::Display for DisplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayStatus::Stored(status) => status.fmt(f),
            DisplayStatus::AwaitingApproval => f.write_str("awaiting_approval"),
        }
    }
}

/// Opaque output of the field codec
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedField(String);

impl EncryptedField {
    /// Wraps a token read back from storage
    pub fn from_stored(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for EncryptedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptedField({} chars)", self.0.len())
    }
}

/// The three independent anonymity flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymityFlags {
    pub authors_anonymous: bool,
    pub mail_anonymous: bool,
    pub institution_anonymous: bool,
}

impl AnonymityFlags {
    pub fn get(&self, category: Category) -> bool {
        match category {
            Category::Email => self.mail_anonymous,
            Category::Authors => self.authors_anonymous,
            Category::Institution => self.institution_anonymous,
        }
    }

    pub fn set(&mut self, category: Category, value: bool) {
        match category {
            Category::Email => self.mail_anonymous = value,
            Category::Authors => self.authors_anonymous = value,
            Category::Institution => self.institution_anonymous = value,
        }
    }

    pub fn any(&self) -> bool {
        self.authors_anonymous || self.mail_anonymous || self.institution_anonymous
    }
}

/// Stored manuscript row. PII fields are always encrypted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manuscript {
    pub id: TrackingCode,
    pub email: EncryptedField,
    pub title: EncryptedField,
    /// Comma-joined author list
    pub authors: EncryptedField,
    pub institution: EncryptedField,
    pub flags: AnonymityFlags,
    pub status: ManuscriptStatus,
    /// Path of the current PDF revision inside the file store
    pub pdf_path: String,
    pub reviewer_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Manuscript {
    /// Encrypted source field for a redaction category
    pub fn field(&self, category: Category) -> &EncryptedField {
        match category {
            Category::Email => &self.email,
            Category::Authors => &self.authors,
            Category::Institution => &self.institution,
        }
    }
}

/// Manuscript row before insertion; the tracking code is chosen by the caller
#[derive(Debug, Clone, PartialEq)]
pub struct NewManuscript {
    pub id: TrackingCode,
    pub email: EncryptedField,
    pub title: EncryptedField,
    pub authors: EncryptedField,
    pub institution: EncryptedField,
    pub pdf_path: String,
    pub sha256: String,
}

/// Field updates that never touch the revision pointer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManuscriptUpdate {
    pub flags: Vec<(Category, bool)>,
    pub reviewer_id: Option<i64>,
    pub status: Option<ManuscriptStatus>,
    pub title: Option<EncryptedField>,
}

impl ManuscriptUpdate {
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
            && self.reviewer_id.is_none()
            && self.status.is_none()
            && self.title.is_none()
    }
}
