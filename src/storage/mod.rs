//! Relational and file storage collaborators
//! Author: kartik4091
//! Created: 2025-06-04
//!
//! `RevisionStore` is the narrow surface the redaction engine needs.
//! `WorkflowStore` extends it with everything the review desk touches.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    EncryptedField, LogEntry, Manuscript, ManuscriptUpdate, Message, NewLogEntry, NewManuscript, NewMessage,
    RedactionRecord, Review, Reviewer, RevisionCommit, RevisionEntry, TrackingCode,
};

pub mod files;
pub mod memory;
pub mod sqlite;

pub use files::{FileStore, LocalFileStore};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait RevisionStore: Send + Sync {
    /// Fails with `NotFound` for unknown codes
    async fn manuscript(&self, id: TrackingCode) -> Result<Manuscript>;

    /// Every ledger row for the manuscript, oldest first
    async fn redaction_records(&self, id: TrackingCode) -> Result<Vec<RedactionRecord>>;

    /// Promoted revisions, oldest first
    async fn revisions(&self, id: TrackingCode) -> Result<Vec<RevisionEntry>>;

    /// Applies the whole commit or nothing. The pointer only moves when it
    /// still equals `expected_path`, otherwise `PersistenceConflict`.
    async fn commit_revision(&self, commit: RevisionCommit) -> Result<Manuscript>;
}

#[async_trait]
pub trait WorkflowStore: RevisionStore {
    async fn tracking_code_exists(&self, id: TrackingCode) -> Result<bool>;

    /// Inserts the manuscript, its `Uploaded` revision and the log row together
    async fn insert_manuscript(&self, manuscript: NewManuscript, log: NewLogEntry)
        -> Result<Manuscript>;

    /// All manuscripts ordered by tracking code
    async fn list_manuscripts(&self) -> Result<Vec<Manuscript>>;

    async fn update_manuscript(
        &self,
        id: TrackingCode,
        update: ManuscriptUpdate,
        log: Option<NewLogEntry>,
    ) -> Result<Manuscript>;

    async fn insert_reviewer(&self, name: EncryptedField, interests: EncryptedField)
        -> Result<Reviewer>;
    async fn reviewers(&self) -> Result<Vec<Reviewer>>;
    async fn reviewer(&self, id: i64) -> Result<Reviewer>;

    async fn reviews(&self, id: TrackingCode) -> Result<Vec<Review>>;

    async fn insert_message(&self, message: NewMessage) -> Result<Message>;
    async fn messages(&self, id: TrackingCode) -> Result<Vec<Message>>;
    async fn mark_messages_read(&self, ids: &[i64]) -> Result<()>;

    async fn insert_log(&self, entry: NewLogEntry) -> Result<LogEntry>;
    async fn logs(&self) -> Result<Vec<LogEntry>>;

    /// Adds interest labels, ignoring ones already present
    async fn add_keywords(&self, id: TrackingCode, keywords: &[String]) -> Result<()>;
    async fn keywords(&self, id: TrackingCode) -> Result<Vec<String>>;
}
