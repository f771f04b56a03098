//! In-memory store
//! Author: kartik4091
//! Created: 2025-06-04
//!
//! Single `RwLock` over all tables, so every trait call is atomic. Used by
//! tests and by the CLI when the database URL is `memory:`.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use super::{RevisionStore, WorkflowStore};
use crate::error::{Error, Result};
use crate::types::{
    AnonymityFlags, EncryptedField, LogEntry, Manuscript, ManuscriptStatus, ManuscriptUpdate,
    Message, NewLogEntry, NewManuscript, NewMessage, RedactionRecord, Review, Reviewer,
    RevisionCommit, RevisionEntry, RevisionKind, TrackingCode,
};

#[derive(Debug, Default)]
struct Tables {
    manuscripts: BTreeMap<TrackingCode, Manuscript>,
    records: Vec<RedactionRecord>,
    revisions: Vec<RevisionEntry>,
    reviewers: Vec<Reviewer>,
    reviews: Vec<Review>,
    messages: Vec<Message>,
    logs: Vec<LogEntry>,
    keywords: BTreeMap<TrackingCode, Vec<String>>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn push_log(&mut self, entry: NewLogEntry) -> LogEntry {
        let row = LogEntry {
            id: self.next_id(),
            manuscript_id: entry.manuscript_id,
            reviewer_id: entry.reviewer_id,
            event: entry.event,
            timestamp: Utc::now(),
        };
        self.logs.push(row.clone());
        row
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    fail_commits: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `commit_revision` fail until reset
    pub fn set_commit_failure(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

fn not_found(id: TrackingCode) -> Error {
    Error::NotFound(format!("manuscript {}", id))
}

#[async_trait]
impl RevisionStore for MemoryStore {
    async fn manuscript(&self, id: TrackingCode) -> Result<Manuscript> {
        self.tables
            .read()
            .manuscripts
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    async fn redaction_records(&self, id: TrackingCode) -> Result<Vec<RedactionRecord>> {
        let tables = self.tables.read();
        Ok(tables.records.iter().filter(|r| r.manuscript_id == id).cloned().collect())
    }

    async fn revisions(&self, id: TrackingCode) -> Result<Vec<RevisionEntry>> {
        let tables = self.tables.read();
        Ok(tables.revisions.iter().filter(|r| r.manuscript_id == id).cloned().collect())
    }

    async fn commit_revision(&self, commit: RevisionCommit) -> Result<Manuscript> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(Error::IoError(io::Error::new(
                io::ErrorKind::Other,
                "commit rejected by store",
            )));
        }

        let mut tables = self.tables.write();
        let mut manuscript = tables
            .manuscripts
            .get(&commit.manuscript_id)
            .cloned()
            .ok_or_else(|| not_found(commit.manuscript_id))?;

        if manuscript.pdf_path != commit.expected_path {
            return Err(Error::PersistenceConflict(format!(
                "manuscript {} no longer points at {}",
                commit.manuscript_id, commit.expected_path
            )));
        }

        let now = Utc::now();
        for record in commit.records {
            let id = tables.next_id();
            tables.records.push(RedactionRecord {
                id,
                manuscript_id: commit.manuscript_id,
                category: record.category,
                page: record.page,
                region: record.region,
                original_text: record.original_text,
                replacement_text: record.replacement_text,
                created_at: now,
            });
        }

        if let Some(review) = commit.review {
            let id = tables.next_id();
            tables.reviews.push(Review {
                id,
                manuscript_id: commit.manuscript_id,
                reviewer_id: review.reviewer_id,
                comments: review.comments,
                created_at: now,
            });
        }
        if let Some(log) = commit.log {
            tables.push_log(log);
        }

        if let Some((category, value)) = commit.flag {
            manuscript.flags.set(category, value);
        }
        if let Some(status) = commit.status {
            manuscript.status = status;
        }
        if let Some(title) = commit.title {
            manuscript.title = title;
        }
        manuscript.pdf_path = commit.new_path.clone();
        manuscript.updated_at = now;

        tables.revisions.push(RevisionEntry {
            manuscript_id: commit.manuscript_id,
            path: commit.new_path,
            kind: commit.kind,
            sha256: commit.sha256,
            created_at: now,
        });
        tables.manuscripts.insert(manuscript.id, manuscript.clone());
        Ok(manuscript)
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn tracking_code_exists(&self, id: TrackingCode) -> Result<bool> {
        Ok(self.tables.read().manuscripts.contains_key(&id))
    }

    async fn insert_manuscript(
        &self,
        manuscript: NewManuscript,
        log: NewLogEntry,
    ) -> Result<Manuscript> {
        let mut tables = self.tables.write();
        if tables.manuscripts.contains_key(&manuscript.id) {
            return Err(Error::PersistenceConflict(format!(
                "tracking code {} already taken",
                manuscript.id
            )));
        }

        let now = Utc::now();
        let row = Manuscript {
            id: manuscript.id,
            email: manuscript.email,
            title: manuscript.title,
            authors: manuscript.authors,
            institution: manuscript.institution,
            flags: AnonymityFlags::default(),
            status: ManuscriptStatus::Pending,
            pdf_path: manuscript.pdf_path.clone(),
            reviewer_id: None,
            created_at: now,
            updated_at: now,
        };
        tables.revisions.push(RevisionEntry {
            manuscript_id: row.id,
            path: manuscript.pdf_path,
            kind: RevisionKind::Uploaded,
            sha256: manuscript.sha256,
            created_at: now,
        });
        tables.push_log(log);
        tables.manuscripts.insert(row.id, row.clone());
        Ok(row)
    }

    async fn list_manuscripts(&self) -> Result<Vec<Manuscript>> {
        Ok(self.tables.read().manuscripts.values().cloned().collect())
    }

    async fn update_manuscript(
        &self,
        id: TrackingCode,
        update: ManuscriptUpdate,
        log: Option<NewLogEntry>,
    ) -> Result<Manuscript> {
        let mut tables = self.tables.write();
        let mut manuscript = tables.manuscripts.get(&id).cloned().ok_or_else(|| not_found(id))?;

        if let Some(reviewer_id) = update.reviewer_id {
            if !tables.reviewers.iter().any(|r| r.id == reviewer_id) {
                return Err(Error::NotFound(format!("reviewer {}", reviewer_id)));
            }
            manuscript.reviewer_id = Some(reviewer_id);
        }
        for (category, value) in update.flags {
            manuscript.flags.set(category, value);
        }
        if let Some(status) = update.status {
            manuscript.status = status;
        }
        if let Some(title) = update.title {
            manuscript.title = title;
        }
        manuscript.updated_at = Utc::now();

        if let Some(log) = log {
            tables.push_log(log);
        }
        tables.manuscripts.insert(id, manuscript.clone());
        Ok(manuscript)
    }

    async fn insert_reviewer(
        &self,
        name: EncryptedField,
        interests: EncryptedField,
    ) -> Result<Reviewer> {
        let mut tables = self.tables.write();
        let reviewer = Reviewer { id: tables.next_id(), name, interests };
        tables.reviewers.push(reviewer.clone());
        Ok(reviewer)
    }

    async fn reviewers(&self) -> Result<Vec<Reviewer>> {
        Ok(self.tables.read().reviewers.clone())
    }

    async fn reviewer(&self, id: i64) -> Result<Reviewer> {
        self.tables
            .read()
            .reviewers
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("reviewer {}", id)))
    }

    async fn reviews(&self, id: TrackingCode) -> Result<Vec<Review>> {
        let tables = self.tables.read();
        Ok(tables.reviews.iter().filter(|r| r.manuscript_id == id).cloned().collect())
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message> {
        let mut tables = self.tables.write();
        if !tables.manuscripts.contains_key(&message.manuscript_id) {
            return Err(not_found(message.manuscript_id));
        }
        let row = Message {
            id: tables.next_id(),
            manuscript_id: message.manuscript_id,
            reviewer_id: message.reviewer_id,
            sender: message.sender,
            body: message.body,
            created_at: Utc::now(),
            is_read: false,
        };
        tables.messages.push(row.clone());
        Ok(row)
    }

    async fn messages(&self, id: TrackingCode) -> Result<Vec<Message>> {
        let tables = self.tables.read();
        Ok(tables.messages.iter().filter(|m| m.manuscript_id == id).cloned().collect())
    }

    async fn mark_messages_read(&self, ids: &[i64]) -> Result<()> {
        let mut tables = self.tables.write();
        for message in tables.messages.iter_mut().filter(|m| ids.contains(&m.id)) {
            message.is_read = true;
        }
        Ok(())
    }

    async fn insert_log(&self, entry: NewLogEntry) -> Result<LogEntry> {
        Ok(self.tables.write().push_log(entry))
    }

    async fn logs(&self) -> Result<Vec<LogEntry>> {
        Ok(self.tables.read().logs.clone())
    }

    async fn add_keywords(&self, id: TrackingCode, keywords: &[String]) -> Result<()> {
        let mut tables = self.tables.write();
        if !tables.manuscripts.contains_key(&id) {
            return Err(not_found(id));
        }
        let entry = tables.keywords.entry(id).or_default();
        for keyword in keywords {
            if !entry.contains(keyword) {
                entry.push(keyword.clone());
            }
        }
        Ok(())
    }

    async fn keywords(&self, id: TrackingCode) -> Result<Vec<String>> {
        Ok(self.tables.read().keywords.get(&id).cloned().unwrap_or_default())
    }
}
