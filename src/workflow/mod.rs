//! Submission and review workflow
//! Author: kartik4091
//! Created: 2025-06-06
//!
//! `ReviewDesk` is what authors, editors and reviewers talk to. It keeps
//! every stored field encrypted, routes document changes through the
//! redaction engine and queues background analysis for new uploads.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::pdf::{DocumentParser, OcrEngine};
use crate::redaction::{sha256_hex, upload_path, BlurOutcome, RedactionEngine, UnblurOutcome};
use crate::security::FieldCodec;
use crate::storage::{FileStore, WorkflowStore};
use crate::types::{
    AnonymityFlags, Category, DisplayStatus, EncryptedField, Manuscript, ManuscriptStatus,
    ManuscriptUpdate, NewLogEntry, NewManuscript, NewMessage, NewReview, Region, RevisionEntry,
    TrackingCode,
};

pub mod masking;
pub mod tasks;
pub mod tracking;

pub use masking::{mask_authors, mask_email, mask_institution};
pub use tasks::{AnalysisFailure, AnalysisJob, AnalysisQueue, SubmissionAnalyzer};
pub use tracking::generate_unique;

const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

/// Codes drawn for one upload before giving up on finding a free path
const UPLOAD_ATTEMPTS: usize = 8;

/// A new manuscript as sent by its author
#[derive(Debug, Clone)]
pub struct Submission {
    pub email: String,
    pub title: String,
    /// Comma-separated author names
    pub authors: String,
    pub institution: String,
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// What an author sees when checking on a manuscript
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub tracking_code: TrackingCode,
    pub email: String,
    pub title: String,
    pub authors: String,
    pub institution: String,
    pub status: DisplayStatus,
    pub reviewer: Option<String>,
}

/// Editor listing row
#[derive(Debug, Clone, Serialize)]
pub struct ManuscriptSummary {
    pub tracking_code: TrackingCode,
    pub email: String,
    pub title: String,
    pub authors: String,
    pub institution: String,
    pub status: ManuscriptStatus,
    pub flags: AnonymityFlags,
    pub pdf_path: String,
    pub reviewer: Option<String>,
    pub keywords: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewerProfile {
    pub id: i64,
    pub name: String,
    pub interests: String,
}

/// Flags to change; `None` leaves a flag as it is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnonymityUpdate {
    pub authors: Option<bool>,
    pub mail: Option<bool>,
    pub institution: Option<bool>,
}

/// A manuscript as its reviewer sees it, masked where a flag is set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
    pub tracking_code: TrackingCode,
    pub title: String,
    pub authors: String,
    pub email: String,
    pub institution: String,
    pub status: ManuscriptStatus,
    pub pdf_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewView {
    pub reviewer: String,
    pub comments: String,
    pub created_at: DateTime<Utc>,
}

/// Who is reading a manuscript's message thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reader {
    Author,
    Reviewer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageView {
    pub id: i64,
    pub sender: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogView {
    pub id: i64,
    pub manuscript_id: Option<TrackingCode>,
    pub reviewer_id: Option<i64>,
    /// `None` when the event cannot be decrypted with the current key
    pub event: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Ledger row without the removed text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerView {
    pub category: Category,
    pub page: u32,
    pub region: Region,
    pub replacement: String,
    pub created_at: DateTime<Utc>,
}

fn require_pdf(filename: &str) -> Result<()> {
    let is_pdf = filename
        .rsplit_once('.')
        .map_or(false, |(stem, ext)| !stem.is_empty() && ext.eq_ignore_ascii_case("pdf"));
    if is_pdf {
        Ok(())
    } else {
        Err(Error::ValidationError(format!("{:?} is not a .pdf file", filename)))
    }
}

fn require_text<'a>(what: &str, value: &'a str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        Err(Error::ValidationError(format!("{} is required", what)))
    } else {
        Ok(value)
    }
}

fn require_email(email: &str) -> Result<&str> {
    let email = email.trim();
    let pattern = Regex::new(EMAIL_PATTERN)
        .map_err(|e| Error::ValidationError(format!("invalid pattern: {}", e)))?;
    if pattern.is_match(email) {
        Ok(email)
    } else {
        Err(Error::ValidationError("a valid e-mail address is required".into()))
    }
}

#[derive(Clone)]
pub struct ReviewDesk {
    store: Arc<dyn WorkflowStore>,
    files: Arc<dyn FileStore>,
    engine: RedactionEngine,
    analysis: Option<AnalysisQueue>,
}

impl ReviewDesk {
    pub fn new<S>(
        store: Arc<S>,
        files: Arc<dyn FileStore>,
        parser: Arc<dyn DocumentParser>,
        ocr: Arc<dyn OcrEngine>,
        codec: FieldCodec,
        config: &ServiceConfig,
    ) -> Self
    where
        S: WorkflowStore + 'static,
    {
        let engine = RedactionEngine::new(
            store.clone(),
            Arc::clone(&files),
            parser,
            ocr,
            codec,
            &config.redaction,
        );
        Self {
            store,
            files,
            engine,
            analysis: None,
        }
    }

    pub fn with_analysis(mut self, queue: AnalysisQueue) -> Self {
        self.analysis = Some(queue);
        self
    }

    pub fn engine(&self) -> &RedactionEngine {
        &self.engine
    }

    fn codec(&self) -> &FieldCodec {
        self.engine.codec()
    }

    fn seal(&self, plaintext: &str) -> Result<EncryptedField> {
        self.codec().encrypt(plaintext)
    }

    fn open(&self, token: &EncryptedField) -> Result<String> {
        self.codec().decrypt(token)
    }

    fn log(
        &self,
        manuscript_id: Option<TrackingCode>,
        reviewer_id: Option<i64>,
        event: &str,
    ) -> Result<NewLogEntry> {
        Ok(NewLogEntry {
            manuscript_id,
            reviewer_id,
            event: self.seal(event)?,
        })
    }

    async fn reviewer_name(&self, reviewer_id: Option<i64>) -> Result<Option<String>> {
        match reviewer_id {
            Some(id) => {
                let reviewer = self.store.reviewer(id).await?;
                Ok(Some(self.open(&reviewer.name)?))
            }
            None => Ok(None),
        }
    }

    /// Stores a new manuscript and returns its tracking code
    #[instrument(skip(self, submission), fields(file = %submission.filename))]
    pub async fn submit(&self, submission: Submission) -> Result<TrackingCode> {
        let email = require_email(&submission.email)?;
        let title = require_text("title", &submission.title)?;
        require_pdf(&submission.filename)?;
        self.engine.page_count(submission.bytes.clone()).await?;

        let (code, path) = self.place_upload(&submission.bytes).await?;

        let manuscript = NewManuscript {
            id: code,
            email: self.seal(email)?,
            title: self.seal(title)?,
            authors: self.seal(submission.authors.trim())?,
            institution: self.seal(submission.institution.trim())?,
            pdf_path: path.clone(),
            sha256: sha256_hex(&submission.bytes),
        };
        let log = self.log(
            Some(code),
            None,
            &format!(
                "Manuscript {} titled {:?} uploaded. Authors: {}",
                code,
                title,
                submission.authors.trim()
            ),
        )?;

        if let Err(e) = self.store.insert_manuscript(manuscript, log).await {
            if let Err(discard) = self.files.discard(&path).await {
                warn!("Could not discard upload {}: {}", path, discard);
            }
            return Err(e);
        }

        if let Some(queue) = &self.analysis {
            if queue.enqueue(AnalysisJob { tracking_code: code, path }).is_err() {
                warn!("Manuscript {} stored without background analysis", code);
            }
        }
        info!("Manuscript {} uploaded", code);
        Ok(code)
    }

    /// Draws a tracking code and writes the upload at its path. A file left
    /// behind at that path by an earlier failed upload means another draw.
    async fn place_upload(&self, bytes: &[u8]) -> Result<(TrackingCode, String)> {
        for _ in 0..UPLOAD_ATTEMPTS {
            let code = generate_unique(self.store.as_ref()).await?;
            let path = upload_path(code);
            match self.files.write_new(&path, bytes).await {
                Ok(()) => return Ok((code, path)),
                Err(Error::PersistenceConflict(reason)) => {
                    warn!("Skipping tracking code {}: {}", code, reason);
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::PersistenceConflict(format!(
            "no free upload path after {} attempts",
            UPLOAD_ATTEMPTS
        )))
    }

    /// Author status check; the e-mail must match the stored one
    #[instrument(skip(self, email))]
    pub async fn status(&self, code: TrackingCode, email: &str) -> Result<StatusView> {
        let email = require_email(email)?;
        let manuscript = self.store.manuscript(code).await?;
        let stored_email = self.open(&manuscript.email)?;
        if !stored_email.eq_ignore_ascii_case(email) {
            return Err(Error::NotFound(format!("manuscript {}", code)));
        }

        let reviewed = !self.store.reviews(code).await?.is_empty();
        let status = if reviewed && manuscript.flags.any() {
            DisplayStatus::AwaitingApproval
        } else {
            DisplayStatus::Stored(manuscript.status)
        };

        Ok(StatusView {
            tracking_code: code,
            email: stored_email,
            title: self.open(&manuscript.title)?,
            authors: self.open(&manuscript.authors)?,
            institution: self.open(&manuscript.institution)?,
            status,
            reviewer: self.reviewer_name(manuscript.reviewer_id).await?,
        })
    }

    pub async fn manuscripts(&self) -> Result<Vec<ManuscriptSummary>> {
        let mut summaries = Vec::new();
        for manuscript in self.store.list_manuscripts().await? {
            summaries.push(ManuscriptSummary {
                tracking_code: manuscript.id,
                email: self.open(&manuscript.email)?,
                title: self.open(&manuscript.title)?,
                authors: self.open(&manuscript.authors)?,
                institution: self.open(&manuscript.institution)?,
                status: manuscript.status,
                flags: manuscript.flags,
                reviewer: self.reviewer_name(manuscript.reviewer_id).await?,
                keywords: self.store.keywords(manuscript.id).await?,
                pdf_path: manuscript.pdf_path,
                created_at: manuscript.created_at,
            });
        }
        Ok(summaries)
    }

    #[instrument(skip(self, name, interests))]
    pub async fn add_reviewer(&self, name: &str, interests: &str) -> Result<ReviewerProfile> {
        let name = require_text("reviewer name", name)?;
        let reviewer = self
            .store
            .insert_reviewer(self.seal(name)?, self.seal(interests.trim())?)
            .await?;
        self.store
            .insert_log(self.log(None, Some(reviewer.id), &format!("Reviewer {} added", name))?)
            .await?;
        Ok(ReviewerProfile {
            id: reviewer.id,
            name: name.to_string(),
            interests: interests.trim().to_string(),
        })
    }

    pub async fn reviewers(&self) -> Result<Vec<ReviewerProfile>> {
        let mut profiles = Vec::new();
        for reviewer in self.store.reviewers().await? {
            profiles.push(ReviewerProfile {
                id: reviewer.id,
                name: self.open(&reviewer.name)?,
                interests: self.open(&reviewer.interests)?,
            });
        }
        Ok(profiles)
    }

    #[instrument(skip(self))]
    pub async fn assign_reviewer(&self, code: TrackingCode, reviewer_id: i64) -> Result<Manuscript> {
        let update = ManuscriptUpdate {
            reviewer_id: Some(reviewer_id),
            status: Some(ManuscriptStatus::UnderReview),
            ..ManuscriptUpdate::default()
        };
        let log = self.log(
            Some(code),
            Some(reviewer_id),
            &format!("Manuscript {} assigned to reviewer {}", code, reviewer_id),
        )?;
        self.store.update_manuscript(code, update, Some(log)).await
    }

    #[instrument(skip(self))]
    pub async fn update_anonymity(
        &self,
        code: TrackingCode,
        change: AnonymityUpdate,
    ) -> Result<AnonymityFlags> {
        let flags: Vec<(Category, bool)> = [
            (Category::Authors, change.authors),
            (Category::Email, change.mail),
            (Category::Institution, change.institution),
        ]
        .into_iter()
        .filter_map(|(category, value)| value.map(|v| (category, v)))
        .collect();

        let update = ManuscriptUpdate { flags, ..ManuscriptUpdate::default() };
        if update.is_empty() {
            return Err(Error::ValidationError("no anonymity flag given".into()));
        }
        let log = self.log(Some(code), None, &format!("Anonymity of {} updated", code))?;
        Ok(self.store.update_manuscript(code, update, Some(log)).await?.flags)
    }

    /// Manuscripts assigned to the reviewer with the given name
    #[instrument(skip(self, reviewer_name))]
    pub async fn reviewer_assignments(&self, reviewer_name: &str) -> Result<Vec<Assignment>> {
        let wanted = require_text("reviewer name", reviewer_name)?;
        let mut reviewer_id = None;
        for reviewer in self.store.reviewers().await? {
            if self.open(&reviewer.name)? == wanted {
                reviewer_id = Some(reviewer.id);
                break;
            }
        }
        let reviewer_id =
            reviewer_id.ok_or_else(|| Error::NotFound(format!("reviewer {:?}", wanted)))?;

        let mut assignments = Vec::new();
        for manuscript in self.store.list_manuscripts().await? {
            if manuscript.reviewer_id != Some(reviewer_id) {
                continue;
            }
            let flags = manuscript.flags;
            let authors = self.open(&manuscript.authors)?;
            let email = self.open(&manuscript.email)?;
            let institution = self.open(&manuscript.institution)?;
            assignments.push(Assignment {
                tracking_code: manuscript.id,
                title: self.open(&manuscript.title)?,
                authors: if flags.authors_anonymous { mask_authors(&authors) } else { authors },
                email: if flags.mail_anonymous { mask_email(&email) } else { email },
                institution: if flags.institution_anonymous {
                    mask_institution(&institution)
                } else {
                    institution
                },
                status: manuscript.status,
                pdf_path: manuscript.pdf_path,
            });
        }
        Ok(assignments)
    }

    /// Appends the comments to the document and records the decision
    #[instrument(skip(self, comments))]
    pub async fn submit_review(
        &self,
        code: TrackingCode,
        comments: &str,
        status: ManuscriptStatus,
    ) -> Result<String> {
        let comments = require_text("comments", comments)?;
        let manuscript = self.store.manuscript(code).await?;
        let reviewer_id = manuscript
            .reviewer_id
            .ok_or_else(|| Error::NotFound(format!("no reviewer assigned to {}", code)))?;

        let review = NewReview {
            reviewer_id,
            comments: self.seal(comments)?,
        };
        let log = self.log(Some(code), Some(reviewer_id), &format!("Review of {} completed", code))?;
        self.engine
            .append_review(code, comments.to_string(), review, status, log)
            .await
    }

    pub async fn reviews(&self, code: TrackingCode) -> Result<Vec<ReviewView>> {
        let mut views = Vec::new();
        for review in self.store.reviews(code).await? {
            views.push(ReviewView {
                reviewer: self.reviewer_name(Some(review.reviewer_id)).await?.unwrap_or_default(),
                comments: self.open(&review.comments)?,
                created_at: review.created_at,
            });
        }
        Ok(views)
    }

    /// Author revision: a new title, a new file, or both.
    /// Returns the new current path when a file was given.
    #[instrument(skip(self, title, file))]
    pub async fn revise(
        &self,
        code: TrackingCode,
        title: Option<&str>,
        file: Option<(&str, Vec<u8>)>,
    ) -> Result<Option<String>> {
        let title = match title.map(str::trim) {
            Some("") | None => None,
            Some(title) => Some(self.seal(title)?),
        };
        let log = self.log(Some(code), None, &format!("Manuscript {} revised", code))?;

        match file {
            Some((filename, bytes)) => {
                require_pdf(filename)?;
                let path = self.engine.replace_document(code, bytes, title, log).await?;
                Ok(Some(path))
            }
            None if title.is_some() => {
                let update = ManuscriptUpdate {
                    title,
                    status: Some(ManuscriptStatus::UnderReview),
                    ..ManuscriptUpdate::default()
                };
                self.store.update_manuscript(code, update, Some(log)).await?;
                Ok(None)
            }
            None => Err(Error::ValidationError("nothing to revise".into())),
        }
    }

    #[instrument(skip(self, sender, text))]
    pub async fn send_message(&self, code: TrackingCode, sender: &str, text: &str) -> Result<i64> {
        let sender = require_text("sender", sender)?;
        let text = require_text("message", text)?;
        let manuscript = self.store.manuscript(code).await?;
        let reviewer_id = manuscript
            .reviewer_id
            .ok_or_else(|| Error::NotFound(format!("no reviewer assigned to {}", code)))?;

        let message = self
            .store
            .insert_message(NewMessage {
                manuscript_id: code,
                reviewer_id,
                sender: self.seal(sender)?,
                body: self.seal(text)?,
            })
            .await?;
        self.store
            .insert_log(self.log(Some(code), Some(reviewer_id), "Message sent")?)
            .await?;
        Ok(message.id)
    }

    /// The thread, oldest first. Messages from the other party are marked read.
    #[instrument(skip(self))]
    pub async fn messages(&self, code: TrackingCode, reader: Reader) -> Result<Vec<MessageView>> {
        let manuscript = self.store.manuscript(code).await?;
        let counterpart = match reader {
            Reader::Author => self.reviewer_name(manuscript.reviewer_id).await?,
            Reader::Reviewer => Some(self.open(&manuscript.email)?),
        };

        let mut views = Vec::new();
        let mut newly_read = Vec::new();
        for message in self.store.messages(code).await? {
            let sender = self.open(&message.sender)?;
            let from_counterpart = counterpart.as_deref() == Some(sender.as_str());
            if from_counterpart && !message.is_read {
                newly_read.push(message.id);
            }
            views.push(MessageView {
                id: message.id,
                body: self.open(&message.body)?,
                sender,
                created_at: message.created_at,
                is_read: message.is_read || from_counterpart,
            });
        }
        views.sort_by_key(|view| (view.created_at, view.id));

        if !newly_read.is_empty() {
            self.store.mark_messages_read(&newly_read).await?;
        }
        Ok(views)
    }

    pub async fn logs(&self) -> Result<Vec<LogView>> {
        Ok(self
            .store
            .logs()
            .await?
            .into_iter()
            .map(|entry| {
                let event = match self.open(&entry.event) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        warn!("Log entry {} is unreadable: {}", entry.id, e);
                        None
                    }
                };
                LogView {
                    id: entry.id,
                    manuscript_id: entry.manuscript_id,
                    reviewer_id: entry.reviewer_id,
                    event,
                    timestamp: entry.timestamp,
                }
            })
            .collect())
    }

    pub async fn ledger(&self, code: TrackingCode) -> Result<Vec<LedgerView>> {
        Ok(self
            .store
            .redaction_records(code)
            .await?
            .into_iter()
            .map(|record| LedgerView {
                category: record.category,
                page: record.page,
                region: record.region,
                replacement: record.replacement_text,
                created_at: record.created_at,
            })
            .collect())
    }

    pub async fn history(&self, code: TrackingCode) -> Result<Vec<RevisionEntry>> {
        self.engine.tracker().history(code).await
    }

    pub async fn blur(&self, code: TrackingCode, category: Category) -> Result<BlurOutcome> {
        self.engine.blur(code, category).await
    }

    pub async fn unblur(&self, code: TrackingCode, category: Category) -> Result<UnblurOutcome> {
        self.engine.unblur(code, category).await
    }

    pub fn encrypt_field(&self, plaintext: &str) -> Result<EncryptedField> {
        self.engine.encrypt_field(plaintext)
    }

    pub fn decrypt_field(&self, token: &EncryptedField) -> Result<String> {
        self.engine.decrypt_field(token)
    }
}
