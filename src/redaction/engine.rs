//! Redaction engine
//! Author: kartik4091
//! Created: 2025-06-05
//!
//! Every mutation follows the same sequence under the manuscript lock:
//! read the current revision, transform it off the async runtime within the
//! document timeout, write the result to a fresh path, then commit ledger
//! rows together with the pointer swap. A failed commit discards the new
//! file and leaves the manuscript on its prior revision.

use std::sync::Arc;
use std::time::Duration;

use tokio::task;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use super::locator::{locate, LocatedMatch};
use super::locks::ManuscriptLocks;
use super::patterns::{author_names, PatternSet};
use super::revision::{sha256_hex, RevisionTracker};
use crate::config::RedactionConfig;
use crate::error::{Error, Result};
use crate::pdf::{DocumentParser, OcrEngine};
use crate::security::FieldCodec;
use crate::storage::{FileStore, RevisionStore};
use crate::types::{
    Category, EncryptedField, Manuscript, ManuscriptStatus, NewLogEntry, NewRedactionRecord,
    NewReview, Region, RevisionCommit, RevisionKind, TrackingCode,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlurOutcome {
    pub new_path: String,
    pub applied_count: usize,
    /// Occurrences found in the text; above `applied_count` when some could not be placed
    pub expected_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnblurOutcome {
    pub new_path: String,
    pub restored_count: usize,
}

/// Ledger row due for restoration, already decrypted
struct Restoration {
    page: usize,
    region: Region,
    original: String,
}

/// One mask character per character of `text`
fn mask(mask_char: char, text: &str) -> String {
    std::iter::repeat(mask_char).take(text.chars().count()).collect()
}

/// Whether a ledger row's original text belongs to the category's current value
pub fn matches_filter(category: Category, filter: &str, original: &str) -> bool {
    match category {
        Category::Email => !filter.trim().is_empty(),
        Category::Authors => {
            let original = original.to_lowercase();
            author_names(filter).any(|name| {
                let name = name.to_lowercase();
                name == original || name.contains(&original) || original.contains(&name)
            })
        }
        Category::Institution => !original.is_empty() && filter.contains(original),
    }
}

#[derive(Clone)]
pub struct RedactionEngine {
    store: Arc<dyn RevisionStore>,
    files: Arc<dyn FileStore>,
    parser: Arc<dyn DocumentParser>,
    ocr: Arc<dyn OcrEngine>,
    codec: FieldCodec,
    locks: ManuscriptLocks,
    tracker: RevisionTracker,
    document_timeout: Duration,
    mask_char: char,
}

impl RedactionEngine {
    pub fn new(
        store: Arc<dyn RevisionStore>,
        files: Arc<dyn FileStore>,
        parser: Arc<dyn DocumentParser>,
        ocr: Arc<dyn OcrEngine>,
        codec: FieldCodec,
        config: &RedactionConfig,
    ) -> Self {
        let tracker = RevisionTracker::new(Arc::clone(&store), Arc::clone(&files));
        Self {
            store,
            files,
            parser,
            ocr,
            codec,
            locks: ManuscriptLocks::new(config.lock_wait()),
            tracker,
            document_timeout: config.document_timeout(),
            mask_char: config.mask_char,
        }
    }

    pub fn locks(&self) -> &ManuscriptLocks {
        &self.locks
    }

    pub fn tracker(&self) -> &RevisionTracker {
        &self.tracker
    }

    pub fn codec(&self) -> &FieldCodec {
        &self.codec
    }

    /// Runs document work on the blocking pool, bounded by the document timeout
    async fn run_bounded<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let limit = self.document_timeout;
        match timeout(limit, task::spawn_blocking(work)).await {
            Ok(joined) => joined?,
            Err(_) => Err(Error::TimeoutError(format!(
                "document processing exceeded {:?}",
                limit
            ))),
        }
    }

    async fn read_current(&self, manuscript: &Manuscript) -> Result<Vec<u8>> {
        self.files.read(&manuscript.pdf_path).await.map_err(|e| {
            Error::DocumentOpenError(format!("{}: {}", manuscript.pdf_path, e))
        })
    }

    fn log_entry(&self, id: TrackingCode, event: &str) -> Result<NewLogEntry> {
        Ok(NewLogEntry {
            manuscript_id: Some(id),
            reviewer_id: None,
            event: self.codec.encrypt(event)?,
        })
    }

    /// Writes `bytes` as a new revision and commits it with whatever `fill` adds
    async fn promote<F>(
        &self,
        manuscript: &Manuscript,
        kind: RevisionKind,
        bytes: Vec<u8>,
        fill: F,
    ) -> Result<String>
    where
        F: FnOnce(&mut RevisionCommit),
    {
        let new_path = self.tracker.next_path(manuscript, kind).await?;
        self.files.write_new(&new_path, &bytes).await?;

        let mut commit = RevisionCommit::new(
            manuscript.id,
            manuscript.pdf_path.clone(),
            new_path.clone(),
            kind,
            sha256_hex(&bytes),
        );
        fill(&mut commit);

        if let Err(e) = self.store.commit_revision(commit).await {
            if let Err(discard) = self.files.discard(&new_path).await {
                warn!("Could not discard orphaned revision {}: {}", new_path, discard);
            }
            return Err(match e {
                Error::PersistenceConflict(_) => e,
                other => Error::PersistenceConflict(other.to_string()),
            });
        }

        debug!("Promoted {} revision {}", kind, new_path);
        Ok(new_path)
    }

    #[instrument(skip(self), fields(manuscript = %id, category = %category))]
    pub async fn blur(&self, id: TrackingCode, category: Category) -> Result<BlurOutcome> {
        let _guard = self.locks.acquire(id).await?;
        let manuscript = self.store.manuscript(id).await?;
        let plaintext = self.codec.decrypt(manuscript.field(category))?;
        let set = PatternSet::for_category(category, &plaintext)?;
        let bytes = self.read_current(&manuscript).await?;

        let parser = Arc::clone(&self.parser);
        let ocr = Arc::clone(&self.ocr);
        let mask_char = self.mask_char;
        let (edited, applied, expected) = self
            .run_bounded(move || -> Result<(Vec<u8>, Vec<(LocatedMatch, String)>, usize)> {
                let mut doc = parser.open(&bytes)?;
                let report = locate(&*doc, &*ocr, std::slice::from_ref(&set))?;

                let mut applied = Vec::with_capacity(report.matches.len());
                for found in report.matches {
                    let replacement = mask(mask_char, &found.text);
                    if doc.redact_region(found.page, &found.region, &replacement)? == 0 {
                        warn!("Nothing to redact on page {} at {}", found.page, found.region);
                        continue;
                    }
                    applied.push((found, replacement));
                }
                Ok((doc.save()?, applied, report.expected))
            })
            .await?;

        let mut records = Vec::with_capacity(applied.len());
        for (found, replacement) in &applied {
            records.push(NewRedactionRecord {
                category,
                page: u32::try_from(found.page).map_err(|_| {
                    Error::ValidationError(format!("page index {} out of range", found.page))
                })?,
                region: found.region,
                original_text: self.codec.encrypt(&found.text)?,
                replacement_text: replacement.clone(),
            });
        }
        let log = self.log_entry(id, &format!("{} anonymised", category))?;

        let new_path = self
            .promote(&manuscript, RevisionKind::Blurred, edited, |commit| {
                commit.records = records;
                commit.flag = Some((category, true));
                commit.log = Some(log);
            })
            .await?;

        if applied.len() < expected {
            warn!("Applied {} of {} redactions", applied.len(), expected);
        }
        info!("Blurred {} occurrence(s) into {}", applied.len(), new_path);
        Ok(BlurOutcome {
            new_path,
            applied_count: applied.len(),
            expected_count: expected,
        })
    }

    #[instrument(skip(self), fields(manuscript = %id, category = %category))]
    pub async fn unblur(&self, id: TrackingCode, category: Category) -> Result<UnblurOutcome> {
        let _guard = self.locks.acquire(id).await?;
        let manuscript = self.store.manuscript(id).await?;
        let filter = self.codec.decrypt(manuscript.field(category))?;

        // ledger rows written before the latest replacement upload describe another document
        let since = self
            .store
            .revisions(id)
            .await?
            .into_iter()
            .rev()
            .find(|r| matches!(r.kind, RevisionKind::Revised | RevisionKind::Uploaded))
            .map(|r| r.created_at);

        let mut restorations = Vec::new();
        for record in self.store.redaction_records(id).await? {
            if record.category != category || since.map_or(false, |t| record.created_at < t) {
                continue;
            }
            let original = match self.codec.decrypt(&record.original_text) {
                Ok(original) => original,
                Err(e) => {
                    warn!("Skipping ledger row {}: {}", record.id, e);
                    continue;
                }
            };
            if matches_filter(category, &filter, &original) {
                restorations.push(Restoration {
                    page: record.page as usize,
                    region: record.region,
                    original,
                });
            }
        }

        let bytes = self.read_current(&manuscript).await?;
        let parser = Arc::clone(&self.parser);
        let (restored_bytes, restored) = self
            .run_bounded(move || -> Result<(Vec<u8>, usize)> {
                let mut doc = parser.open(&bytes)?;
                let mut restored = 0;
                for item in &restorations {
                    if item.page >= doc.page_count() {
                        warn!("Ledger row points past the last page ({})", item.page);
                        continue;
                    }
                    if doc.redact_region(item.page, &item.region, &item.original)? == 0 {
                        warn!("Nothing to restore on page {} at {}", item.page, item.region);
                        continue;
                    }
                    restored += 1;
                }
                Ok((doc.save()?, restored))
            })
            .await?;

        let log = self.log_entry(id, &format!("{} restored", category))?;
        let new_path = self
            .promote(&manuscript, RevisionKind::Unblurred, restored_bytes, |commit| {
                commit.flag = Some((category, false));
                commit.log = Some(log);
            })
            .await?;

        info!("Restored {} region(s) into {}", restored, new_path);
        Ok(UnblurOutcome {
            new_path,
            restored_count: restored,
        })
    }

    /// Appends a comments page to the current revision and records the review
    #[instrument(skip(self, comments, review, log), fields(manuscript = %id))]
    pub async fn append_review(
        &self,
        id: TrackingCode,
        comments: String,
        review: NewReview,
        status: ManuscriptStatus,
        log: NewLogEntry,
    ) -> Result<String> {
        let _guard = self.locks.acquire(id).await?;
        let manuscript = self.store.manuscript(id).await?;
        let bytes = self.read_current(&manuscript).await?;

        let parser = Arc::clone(&self.parser);
        let reviewed = self
            .run_bounded(move || -> Result<Vec<u8>> {
                let mut doc = parser.open(&bytes)?;
                doc.append_text_page("Reviewer Comments", &comments)?;
                doc.save()
            })
            .await?;

        self.promote(&manuscript, RevisionKind::Reviewed, reviewed, |commit| {
            commit.review = Some(review);
            commit.status = Some(status);
            commit.log = Some(log);
        })
        .await
    }

    /// Replaces the document with an author's revised upload
    #[instrument(skip(self, bytes, title, log), fields(manuscript = %id))]
    pub async fn replace_document(
        &self,
        id: TrackingCode,
        bytes: Vec<u8>,
        title: Option<EncryptedField>,
        log: NewLogEntry,
    ) -> Result<String> {
        let _guard = self.locks.acquire(id).await?;
        let manuscript = self.store.manuscript(id).await?;

        let pages = self.page_count(bytes.clone()).await?;
        debug!("Replacement upload has {} page(s)", pages);

        self.promote(&manuscript, RevisionKind::Revised, bytes, |commit| {
            commit.status = Some(ManuscriptStatus::UnderReview);
            commit.title = title;
            commit.log = Some(log);
        })
        .await
    }

    /// Opens `bytes` to check they are a readable document
    pub async fn page_count(&self, bytes: Vec<u8>) -> Result<usize> {
        let parser = Arc::clone(&self.parser);
        self.run_bounded(move || Ok(parser.open(&bytes)?.page_count()))
            .await
    }

    pub fn encrypt_field(&self, plaintext: &str) -> Result<EncryptedField> {
        self.codec.encrypt(plaintext)
    }

    pub fn decrypt_field(&self, token: &EncryptedField) -> Result<String> {
        self.codec.decrypt(token)
    }
}
