//! SQLite store backed by an `sqlx` pool
//! Author: kartik4091
//! Created: 2025-06-04

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use super::{RevisionStore, WorkflowStore};
use crate::error::{Error, Result};
use crate::types::{
    AnonymityFlags, Category, EncryptedField, LogEntry, Manuscript, ManuscriptStatus,
    ManuscriptUpdate, Message, NewLogEntry, NewManuscript, NewMessage, RedactionRecord, Review,
    Reviewer, RevisionCommit, RevisionEntry, RevisionKind, TrackingCode,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS reviewers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        interests TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS manuscripts (
        id INTEGER PRIMARY KEY,
        email TEXT NOT NULL,
        title TEXT NOT NULL,
        authors TEXT NOT NULL,
        institution TEXT NOT NULL,
        authors_anonymous INTEGER NOT NULL DEFAULT 0,
        mail_anonymous INTEGER NOT NULL DEFAULT 0,
        institution_anonymous INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        pdf_path TEXT NOT NULL,
        reviewer_id INTEGER REFERENCES reviewers(id),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS redaction_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        manuscript_id INTEGER NOT NULL REFERENCES manuscripts(id),
        category TEXT NOT NULL,
        page INTEGER NOT NULL,
        rect TEXT NOT NULL,
        original_text TEXT NOT NULL,
        replacement_text TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS revisions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        manuscript_id INTEGER NOT NULL REFERENCES manuscripts(id),
        path TEXT NOT NULL,
        kind TEXT NOT NULL,
        sha256 TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS reviews (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        manuscript_id INTEGER NOT NULL REFERENCES manuscripts(id),
        reviewer_id INTEGER NOT NULL REFERENCES reviewers(id),
        comments TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        manuscript_id INTEGER NOT NULL REFERENCES manuscripts(id),
        reviewer_id INTEGER NOT NULL REFERENCES reviewers(id),
        sender TEXT NOT NULL,
        body TEXT NOT NULL,
        created_at TEXT NOT NULL,
        is_read INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        manuscript_id INTEGER REFERENCES manuscripts(id),
        reviewer_id INTEGER REFERENCES reviewers(id),
        event TEXT NOT NULL,
        timestamp TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS keywords (
        manuscript_id INTEGER NOT NULL REFERENCES manuscripts(id),
        keyword TEXT NOT NULL,
        PRIMARY KEY (manuscript_id, keyword)
    )",
    "CREATE INDEX IF NOT EXISTS idx_redaction_records_manuscript
        ON redaction_records(manuscript_id)",
];

const MANUSCRIPT_COLUMNS: &str = "id, email, title, authors, institution, authors_anonymous, \
    mail_anonymous, institution_anonymous, status, pdf_path, reviewer_id, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connects and creates the schema if needed
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            // in-memory databases live only as long as their connection
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!("Connected to SQLite store at {}", url);
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Schema ready ({} statements)", SCHEMA.len());
        Ok(())
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn code_param(id: TrackingCode) -> i64 {
    i64::from(id.value())
}

fn timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let raw: String = row.try_get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::DatabaseError(sqlx::Error::Decode(Box::new(e))))
}

fn field(row: &SqliteRow, column: &str) -> Result<EncryptedField> {
    Ok(EncryptedField::from_stored(row.try_get::<String, _>(column)?))
}

fn flag_column(category: Category) -> &'static str {
    match category {
        Category::Email => "mail_anonymous",
        Category::Authors => "authors_anonymous",
        Category::Institution => "institution_anonymous",
    }
}

fn manuscript_from_row(row: &SqliteRow) -> Result<Manuscript> {
    Ok(Manuscript {
        id: TrackingCode::try_from(row.try_get::<i64, _>("id")?)?,
        email: field(row, "email")?,
        title: field(row, "title")?,
        authors: field(row, "authors")?,
        institution: field(row, "institution")?,
        flags: AnonymityFlags {
            authors_anonymous: row.try_get("authors_anonymous")?,
            mail_anonymous: row.try_get("mail_anonymous")?,
            institution_anonymous: row.try_get("institution_anonymous")?,
        },
        status: row.try_get::<String, _>("status")?.parse()?,
        pdf_path: row.try_get("pdf_path")?,
        reviewer_id: row.try_get("reviewer_id")?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

fn record_from_row(row: &SqliteRow) -> Result<RedactionRecord> {
    let page: i64 = row.try_get("page")?;
    Ok(RedactionRecord {
        id: row.try_get("id")?,
        manuscript_id: TrackingCode::try_from(row.try_get::<i64, _>("manuscript_id")?)?,
        category: row.try_get::<String, _>("category")?.parse()?,
        page: u32::try_from(page)
            .map_err(|_| Error::ValidationError(format!("invalid page index {}", page)))?,
        region: row.try_get::<String, _>("rect")?.parse()?,
        original_text: field(row, "original_text")?,
        replacement_text: row.try_get("replacement_text")?,
        created_at: timestamp(row, "created_at")?,
    })
}

fn revision_from_row(row: &SqliteRow) -> Result<RevisionEntry> {
    Ok(RevisionEntry {
        manuscript_id: TrackingCode::try_from(row.try_get::<i64, _>("manuscript_id")?)?,
        path: row.try_get("path")?,
        kind: row.try_get::<String, _>("kind")?.parse()?,
        sha256: row.try_get("sha256")?,
        created_at: timestamp(row, "created_at")?,
    })
}

fn reviewer_from_row(row: &SqliteRow) -> Result<Reviewer> {
    Ok(Reviewer {
        id: row.try_get("id")?,
        name: field(row, "name")?,
        interests: field(row, "interests")?,
    })
}

fn review_from_row(row: &SqliteRow) -> Result<Review> {
    Ok(Review {
        id: row.try_get("id")?,
        manuscript_id: TrackingCode::try_from(row.try_get::<i64, _>("manuscript_id")?)?,
        reviewer_id: row.try_get("reviewer_id")?,
        comments: field(row, "comments")?,
        created_at: timestamp(row, "created_at")?,
    })
}

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    Ok(Message {
        id: row.try_get("id")?,
        manuscript_id: TrackingCode::try_from(row.try_get::<i64, _>("manuscript_id")?)?,
        reviewer_id: row.try_get("reviewer_id")?,
        sender: field(row, "sender")?,
        body: field(row, "body")?,
        created_at: timestamp(row, "created_at")?,
        is_read: row.try_get("is_read")?,
    })
}

fn log_from_row(row: &SqliteRow) -> Result<LogEntry> {
    let manuscript_id = row
        .try_get::<Option<i64>, _>("manuscript_id")?
        .map(TrackingCode::try_from)
        .transpose()?;
    Ok(LogEntry {
        id: row.try_get("id")?,
        manuscript_id,
        reviewer_id: row.try_get("reviewer_id")?,
        event: field(row, "event")?,
        timestamp: timestamp(row, "timestamp")?,
    })
}

async fn insert_log_in<'c, E>(executor: E, entry: &NewLogEntry, at: &str) -> Result<i64>
where
    E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
{
    let result = sqlx::query(
        "INSERT INTO logs (manuscript_id, reviewer_id, event, timestamp) VALUES (?, ?, ?, ?)",
    )
    .bind(entry.manuscript_id.map(code_param))
    .bind(entry.reviewer_id)
    .bind(entry.event.as_str())
    .bind(at)
    .execute(executor)
    .await?;
    Ok(result.last_insert_rowid())
}

#[async_trait]
impl RevisionStore for SqliteStore {
    async fn manuscript(&self, id: TrackingCode) -> Result<Manuscript> {
        let sql = format!("SELECT {} FROM manuscripts WHERE id = ?", MANUSCRIPT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(code_param(id))
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("manuscript {}", id)))?;
        manuscript_from_row(&row)
    }

    async fn redaction_records(&self, id: TrackingCode) -> Result<Vec<RedactionRecord>> {
        let rows = sqlx::query("SELECT * FROM redaction_records WHERE manuscript_id = ? ORDER BY id")
            .bind(code_param(id))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn revisions(&self, id: TrackingCode) -> Result<Vec<RevisionEntry>> {
        let rows = sqlx::query("SELECT * FROM revisions WHERE manuscript_id = ? ORDER BY id")
            .bind(code_param(id))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(revision_from_row).collect()
    }

    async fn commit_revision(&self, commit: RevisionCommit) -> Result<Manuscript> {
        let id = code_param(commit.manuscript_id);
        let at = now();
        let mut tx = self.pool.begin().await?;

        let swapped = sqlx::query(
            "UPDATE manuscripts SET pdf_path = ?, updated_at = ? WHERE id = ? AND pdf_path = ?",
        )
        .bind(&commit.new_path)
        .bind(&at)
        .bind(id)
        .bind(&commit.expected_path)
        .execute(&mut *tx)
        .await?;

        if swapped.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM manuscripts WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            tx.rollback().await?;
            return Err(if exists {
                Error::PersistenceConflict(format!(
                    "manuscript {} no longer points at {}",
                    commit.manuscript_id, commit.expected_path
                ))
            } else {
                Error::NotFound(format!("manuscript {}", commit.manuscript_id))
            });
        }

        if let Some((category, value)) = commit.flag {
            let sql = format!("UPDATE manuscripts SET {} = ? WHERE id = ?", flag_column(category));
            sqlx::query(&sql).bind(value).bind(id).execute(&mut *tx).await?;
        }
        if let Some(status) = commit.status {
            sqlx::query("UPDATE manuscripts SET status = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(title) = &commit.title {
            sqlx::query("UPDATE manuscripts SET title = ? WHERE id = ?")
                .bind(title.as_str())
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        for record in &commit.records {
            sqlx::query(
                "INSERT INTO redaction_records \
                 (manuscript_id, category, page, rect, original_text, replacement_text, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(record.category.as_str())
            .bind(i64::from(record.page))
            .bind(record.region.to_string())
            .bind(record.original_text.as_str())
            .bind(&record.replacement_text)
            .bind(&at)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(review) = &commit.review {
            sqlx::query(
                "INSERT INTO reviews (manuscript_id, reviewer_id, comments, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(id)
            .bind(review.reviewer_id)
            .bind(review.comments.as_str())
            .bind(&at)
            .execute(&mut *tx)
            .await?;
        }
        if let Some(log) = &commit.log {
            insert_log_in(&mut *tx, log, &at).await?;
        }

        sqlx::query(
            "INSERT INTO revisions (manuscript_id, path, kind, sha256, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(&commit.new_path)
        .bind(commit.kind.as_str())
        .bind(&commit.sha256)
        .bind(&at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(
            "Committed {} revision for {} with {} ledger rows",
            commit.kind,
            commit.manuscript_id,
            commit.records.len()
        );
        self.manuscript(commit.manuscript_id).await
    }
}

#[async_trait]
impl WorkflowStore for SqliteStore {
    async fn tracking_code_exists(&self, id: TrackingCode) -> Result<bool> {
        Ok(sqlx::query("SELECT 1 FROM manuscripts WHERE id = ?")
            .bind(code_param(id))
            .fetch_optional(&self.pool)
            .await?
            .is_some())
    }

    async fn insert_manuscript(
        &self,
        manuscript: NewManuscript,
        log: NewLogEntry,
    ) -> Result<Manuscript> {
        let id = code_param(manuscript.id);
        let at = now();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO manuscripts \
             (id, email, title, authors, institution, status, pdf_path, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(manuscript.email.as_str())
        .bind(manuscript.title.as_str())
        .bind(manuscript.authors.as_str())
        .bind(manuscript.institution.as_str())
        .bind(ManuscriptStatus::Pending.as_str())
        .bind(&manuscript.pdf_path)
        .bind(&at)
        .bind(&at)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(Error::PersistenceConflict(format!(
                "tracking code {} already taken",
                manuscript.id
            )));
        }

        sqlx::query(
            "INSERT INTO revisions (manuscript_id, path, kind, sha256, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(&manuscript.pdf_path)
        .bind(RevisionKind::Uploaded.as_str())
        .bind(&manuscript.sha256)
        .bind(&at)
        .execute(&mut *tx)
        .await?;
        insert_log_in(&mut *tx, &log, &at).await?;

        tx.commit().await?;
        self.manuscript(manuscript.id).await
    }

    async fn list_manuscripts(&self) -> Result<Vec<Manuscript>> {
        let sql = format!("SELECT {} FROM manuscripts ORDER BY id", MANUSCRIPT_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(manuscript_from_row).collect()
    }

    async fn update_manuscript(
        &self,
        id: TrackingCode,
        update: ManuscriptUpdate,
        log: Option<NewLogEntry>,
    ) -> Result<Manuscript> {
        let code = code_param(id);
        let at = now();
        let mut tx = self.pool.begin().await?;

        let touched = sqlx::query("UPDATE manuscripts SET updated_at = ? WHERE id = ?")
            .bind(&at)
            .bind(code)
            .execute(&mut *tx)
            .await?;
        if touched.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(Error::NotFound(format!("manuscript {}", id)));
        }

        if let Some(reviewer_id) = update.reviewer_id {
            let known = sqlx::query("SELECT 1 FROM reviewers WHERE id = ?")
                .bind(reviewer_id)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            if !known {
                tx.rollback().await?;
                return Err(Error::NotFound(format!("reviewer {}", reviewer_id)));
            }
            sqlx::query("UPDATE manuscripts SET reviewer_id = ? WHERE id = ?")
                .bind(reviewer_id)
                .bind(code)
                .execute(&mut *tx)
                .await?;
        }
        for (category, value) in &update.flags {
            let sql = format!("UPDATE manuscripts SET {} = ? WHERE id = ?", flag_column(*category));
            sqlx::query(&sql).bind(*value).bind(code).execute(&mut *tx).await?;
        }
        if let Some(status) = update.status {
            sqlx::query("UPDATE manuscripts SET status = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(code)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(title) = &update.title {
            sqlx::query("UPDATE manuscripts SET title = ? WHERE id = ?")
                .bind(title.as_str())
                .bind(code)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(log) = &log {
            insert_log_in(&mut *tx, log, &at).await?;
        }

        tx.commit().await?;
        self.manuscript(id).await
    }

    async fn insert_reviewer(
        &self,
        name: EncryptedField,
        interests: EncryptedField,
    ) -> Result<Reviewer> {
        let result = sqlx::query("INSERT INTO reviewers (name, interests) VALUES (?, ?)")
            .bind(name.as_str())
            .bind(interests.as_str())
            .execute(&self.pool)
            .await?;
        Ok(Reviewer { id: result.last_insert_rowid(), name, interests })
    }

    async fn reviewers(&self) -> Result<Vec<Reviewer>> {
        let rows = sqlx::query("SELECT * FROM reviewers ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(reviewer_from_row).collect()
    }

    async fn reviewer(&self, id: i64) -> Result<Reviewer> {
        let row = sqlx::query("SELECT * FROM reviewers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("reviewer {}", id)))?;
        reviewer_from_row(&row)
    }

    async fn reviews(&self, id: TrackingCode) -> Result<Vec<Review>> {
        let rows = sqlx::query("SELECT * FROM reviews WHERE manuscript_id = ? ORDER BY id")
            .bind(code_param(id))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(review_from_row).collect()
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message> {
        let at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO messages (manuscript_id, reviewer_id, sender, body, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(code_param(message.manuscript_id))
        .bind(message.reviewer_id)
        .bind(message.sender.as_str())
        .bind(message.body.as_str())
        .bind(at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(Message {
            id: result.last_insert_rowid(),
            manuscript_id: message.manuscript_id,
            reviewer_id: message.reviewer_id,
            sender: message.sender,
            body: message.body,
            created_at: at,
            is_read: false,
        })
    }

    async fn messages(&self, id: TrackingCode) -> Result<Vec<Message>> {
        let rows = sqlx::query("SELECT * FROM messages WHERE manuscript_id = ? ORDER BY id")
            .bind(code_param(id))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn mark_messages_read(&self, ids: &[i64]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("UPDATE messages SET is_read = 1 WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_log(&self, entry: NewLogEntry) -> Result<LogEntry> {
        let at = Utc::now();
        let id = insert_log_in(&self.pool, &entry, &at.to_rfc3339()).await?;
        Ok(LogEntry {
            id,
            manuscript_id: entry.manuscript_id,
            reviewer_id: entry.reviewer_id,
            event: entry.event,
            timestamp: at,
        })
    }

    async fn logs(&self) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query("SELECT * FROM logs ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(log_from_row).collect()
    }

    async fn add_keywords(&self, id: TrackingCode, keywords: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for keyword in keywords {
            sqlx::query("INSERT OR IGNORE INTO keywords (manuscript_id, keyword) VALUES (?, ?)")
                .bind(code_param(id))
                .bind(keyword)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn keywords(&self, id: TrackingCode) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT keyword FROM keywords WHERE manuscript_id = ? ORDER BY rowid")
            .bind(code_param(id))
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("keyword").map_err(Error::from))
            .collect()
    }
}
