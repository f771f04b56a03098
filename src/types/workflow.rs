//! Reviewer, review, message and audit log rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EncryptedField, TrackingCode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reviewer {
    pub id: i64,
    pub name: EncryptedField,
    pub interests: EncryptedField,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: i64,
    pub manuscript_id: TrackingCode,
    pub reviewer_id: i64,
    pub comments: EncryptedField,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub manuscript_id: TrackingCode,
    pub reviewer_id: i64,
    pub sender: EncryptedField,
    pub body: EncryptedField,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub manuscript_id: TrackingCode,
    pub reviewer_id: i64,
    pub sender: EncryptedField,
    pub body: EncryptedField,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub manuscript_id: Option<TrackingCode>,
    pub reviewer_id: Option<i64>,
    pub event: EncryptedField,
    pub timestamp: DateTime<Utc>,
}
