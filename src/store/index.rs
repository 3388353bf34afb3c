//! libSQL index over stored summaries.
//!
//! The JSON files are the source of truth. The index maps message IDs to
//! file paths and keeps feedback queryable; it can be rebuilt by saving the
//! summaries again.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use tracing::info;

use crate::error::PersistenceError;
use crate::pipeline::types::{Feedback, Rating, StructuredSummary};
use crate::store::migrations;

/// File name of the index database inside the summaries directory.
pub const INDEX_FILE_NAME: &str = "index.db";

/// Feedback counts across all summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedbackStats {
    pub positive: u64,
    pub negative: u64,
}

pub struct SummaryIndex {
    #[allow(dead_code)]
    db: Arc<Database>,
    conn: Connection,
}

impl SummaryIndex {
    /// Open (or create) the index file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| PersistenceError::Index(format!("Failed to open index: {e}")))?;
        let index = Self::from_database(db).await?;
        info!(path = %path.display(), "Summary index opened");
        Ok(index)
    }

    /// In-memory index (for tests).
    pub async fn new_memory() -> Result<Self, PersistenceError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| PersistenceError::Index(format!("Failed to create in-memory index: {e}")))?;
        Self::from_database(db).await
    }

    async fn from_database(db: Database) -> Result<Self, PersistenceError> {
        let conn = db
            .connect()
            .map_err(|e| PersistenceError::Index(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    pub async fn upsert_summary(
        &self,
        summary: &StructuredSummary,
        file_path: &str,
    ) -> Result<(), PersistenceError> {
        self.conn
            .execute(
                "INSERT INTO summaries (message_id, file_path, sender, subject, received_at, model, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (message_id) DO UPDATE SET
                    file_path = ?2, sender = ?3, subject = ?4,
                    received_at = ?5, model = ?6, created_at = ?7",
                params![
                    summary.message_id.as_str(),
                    file_path,
                    summary.sender.as_str(),
                    summary.subject.as_str(),
                    summary.received_at.to_rfc3339(),
                    summary.model.as_str(),
                    summary.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| PersistenceError::Index(format!("Failed to index summary: {e}")))?;
        Ok(())
    }

    /// Indexed file path for a message, if any.
    pub async fn file_path(&self, message_id: &str) -> Result<Option<String>, PersistenceError> {
        let mut rows = self
            .conn
            .query(
                "SELECT file_path FROM summaries WHERE message_id = ?1",
                params![message_id],
            )
            .await
            .map_err(|e| PersistenceError::Index(format!("Failed to look up summary: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| PersistenceError::Index(format!("Failed to read summary row: {e}")))?
        {
            Some(row) => Ok(Some(row.get::<String>(0).map_err(|e| {
                PersistenceError::Index(format!("Failed to parse file path: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    pub async fn upsert_feedback(&self, feedback: &Feedback) -> Result<(), PersistenceError> {
        let comment = match &feedback.comment {
            Some(c) => libsql::Value::Text(c.clone()),
            None => libsql::Value::Null,
        };
        self.conn
            .execute(
                "INSERT INTO feedback (message_id, rating, comment, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (message_id) DO UPDATE SET
                    rating = ?2, comment = ?3, created_at = ?4",
                params![
                    feedback.message_id.as_str(),
                    i64::from(i8::from(feedback.rating)),
                    comment,
                    feedback.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| PersistenceError::Index(format!("Failed to index feedback: {e}")))?;
        Ok(())
    }

    pub async fn feedback(&self, message_id: &str) -> Result<Option<Feedback>, PersistenceError> {
        let mut rows = self
            .conn
            .query(
                "SELECT message_id, rating, comment, created_at FROM feedback WHERE message_id = ?1",
                params![message_id],
            )
            .await
            .map_err(|e| PersistenceError::Index(format!("Failed to look up feedback: {e}")))?;

        let Some(row) = rows
            .next()
            .await
            .map_err(|e| PersistenceError::Index(format!("Failed to read feedback row: {e}")))?
        else {
            return Ok(None);
        };

        row_to_feedback(&row)
            .map(Some)
            .map_err(|e| PersistenceError::Index(format!("Failed to parse feedback: {e}")))
    }

    pub async fn feedback_stats(&self) -> Result<FeedbackStats, PersistenceError> {
        let mut rows = self
            .conn
            .query(
                "SELECT COALESCE(SUM(rating = 1), 0), COALESCE(SUM(rating = -1), 0) FROM feedback",
                (),
            )
            .await
            .map_err(|e| PersistenceError::Index(format!("Failed to count feedback: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| PersistenceError::Index(format!("Failed to read feedback counts: {e}")))?
        {
            Some(row) => {
                let positive: i64 = row.get(0).unwrap_or(0);
                let negative: i64 = row.get(1).unwrap_or(0);
                Ok(FeedbackStats {
                    positive: positive.max(0) as u64,
                    negative: negative.max(0) as u64,
                })
            }
            None => Ok(FeedbackStats::default()),
        }
    }

    pub async fn delete(&self, message_id: &str) -> Result<(), PersistenceError> {
        for sql in [
            "DELETE FROM feedback WHERE message_id = ?1",
            "DELETE FROM summaries WHERE message_id = ?1",
        ] {
            self.conn
                .execute(sql, params![message_id])
                .await
                .map_err(|e| PersistenceError::Index(format!("Failed to delete from index: {e}")))?;
        }
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), PersistenceError> {
        self.conn
            .execute_batch("DELETE FROM feedback; DELETE FROM summaries;")
            .await
            .map_err(|e| PersistenceError::Index(format!("Failed to clear index: {e}")))?;
        Ok(())
    }

    pub async fn count(&self) -> Result<u64, PersistenceError> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM summaries", ())
            .await
            .map_err(|e| PersistenceError::Index(format!("Failed to count summaries: {e}")))?;
        match rows
            .next()
            .await
            .map_err(|e| PersistenceError::Index(format!("Failed to read count: {e}")))?
        {
            Some(row) => Ok(row.get::<i64>(0).unwrap_or(0).max(0) as u64),
            None => Ok(0),
        }
    }
}

fn row_to_feedback(row: &libsql::Row) -> Result<Feedback, String> {
    let message_id: String = row.get(0).map_err(|e| e.to_string())?;
    let rating: i64 = row.get(1).map_err(|e| e.to_string())?;
    let comment: Option<String> = row.get(2).ok();
    let created_str: String = row.get(3).map_err(|e| e.to_string())?;

    let rating = i8::try_from(rating)
        .map_err(|e| e.to_string())
        .and_then(Rating::try_from)?;
    let created_at = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| e.to_string())?;

    Ok(Feedback {
        message_id,
        rating,
        comment,
        created_at,
    })
}
