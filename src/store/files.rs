//! JSON-file summary store.
//!
//! One pretty-printed file per message, named `YYYY-MM-DD_<message_id>.json`
//! after the message's receive date. Writes go to a temp file first and are
//! renamed into place, so readers never see a partial summary. Feedback is
//! embedded in the summary file and mirrored to the optional libSQL index.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::PersistenceError;
use crate::pipeline::types::{Feedback, StructuredSummary, SummaryStore};

use super::index::{INDEX_FILE_NAME, SummaryIndex};

const DATE_PREFIX_LEN: usize = 10;

pub struct FileSummaryStore {
    dir: PathBuf,
    index: Option<SummaryIndex>,
}

impl FileSummaryStore {
    /// Open the store rooted at `dir`, creating it if needed.
    pub async fn open(dir: impl Into<PathBuf>, use_index: bool) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        let index = if use_index {
            Some(SummaryIndex::new_local(&dir.join(INDEX_FILE_NAME)).await?)
        } else {
            None
        };
        info!(dir = %dir.display(), indexed = use_index, "Summary store opened");
        Ok(Self { dir, index })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index(&self) -> Option<&SummaryIndex> {
        self.index.as_ref()
    }

    /// Path a summary is written to.
    pub fn path_for(&self, summary: &StructuredSummary) -> PathBuf {
        self.dir.join(summary.file_name())
    }

    /// Stored summaries, newest receive date first.
    pub async fn list(
        &self,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<StructuredSummary>, PersistenceError> {
        let mut files = self.summary_files().await?;
        files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let selected = files
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX));

        let mut summaries = Vec::new();
        for (_, _, path) in selected {
            match read_summary(&path).await {
                Ok(summary) => summaries.push(summary),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable summary"),
            }
        }
        Ok(summaries)
    }

    /// Delete a message's summary. Returns false if none was stored.
    pub async fn delete(&self, message_id: &str) -> Result<bool, PersistenceError> {
        check_message_id(message_id)?;
        let paths = self.paths_for_id(message_id).await?;
        for path in &paths {
            fs::remove_file(path).await?;
        }
        if let Some(index) = &self.index {
            index.delete(message_id).await?;
        }
        debug!(message_id, removed = paths.len(), "Summary deleted");
        Ok(!paths.is_empty())
    }

    /// Delete every stored summary. Returns how many files were removed.
    pub async fn delete_all(&self) -> Result<usize, PersistenceError> {
        let files = self.summary_files().await?;
        for (_, _, path) in &files {
            fs::remove_file(path).await?;
        }
        if let Some(index) = &self.index {
            index.clear().await?;
        }
        info!(removed = files.len(), "All summaries deleted");
        Ok(files.len())
    }

    /// `(date, message_id, path)` for every summary file in the directory.
    async fn summary_files(&self) -> Result<Vec<(NaiveDate, String, PathBuf)>, PersistenceError> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some((date, id)) = parse_file_name(name) {
                files.push((date, id.to_string(), entry.path()));
            }
        }
        Ok(files)
    }

    async fn paths_for_id(&self, message_id: &str) -> Result<Vec<PathBuf>, PersistenceError> {
        Ok(self
            .summary_files()
            .await?
            .into_iter()
            .filter(|(_, id, _)| id == message_id)
            .map(|(_, _, path)| path)
            .collect())
    }

    /// Feedback already stored for a message. Re-saving a summary keeps it.
    async fn stored_feedback(&self, message_id: &str) -> Result<Option<Feedback>, PersistenceError> {
        let Some(path) = self.find(message_id).await? else {
            return Ok(None);
        };
        match read_summary(&path).await {
            Ok(existing) => Ok(existing.feedback),
            Err(e) => {
                warn!(message_id, path = %path.display(), error = %e, "Existing summary unreadable, not carrying feedback over");
                Ok(None)
            }
        }
    }

    /// Locate a message's summary file, trying the index before scanning.
    async fn find(&self, message_id: &str) -> Result<Option<PathBuf>, PersistenceError> {
        if let Some(index) = &self.index
            && let Some(path) = index.file_path(message_id).await?
        {
            let path = PathBuf::from(path);
            if fs::try_exists(&path).await? {
                return Ok(Some(path));
            }
            warn!(message_id, path = %path.display(), "Indexed summary file missing, rescanning");
        }
        Ok(self.paths_for_id(message_id).await?.into_iter().next())
    }
}

#[async_trait]
impl SummaryStore for FileSummaryStore {
    async fn save(&self, summary: &StructuredSummary) -> Result<(), PersistenceError> {
        check_message_id(&summary.message_id)?;
        let mut record = summary.clone();
        if record.feedback.is_none() {
            record.feedback = self.stored_feedback(&record.message_id).await?;
        }

        let path = self.path_for(&record);
        let json = serde_json::to_vec_pretty(&record)?;
        write_atomic(&path, &json).await?;

        // A re-summarized message whose receive date changed leaves its old
        // file behind under a different name.
        for stale in self.paths_for_id(&record.message_id).await? {
            if stale != path {
                fs::remove_file(&stale).await?;
                debug!(path = %stale.display(), "Removed stale summary file");
            }
        }

        if let Some(index) = &self.index {
            index.upsert_summary(&record, &path.to_string_lossy()).await?;
        }
        debug!(message_id = %record.message_id, path = %path.display(), "Summary saved");
        Ok(())
    }

    async fn get(&self, message_id: &str) -> Result<Option<StructuredSummary>, PersistenceError> {
        check_message_id(message_id)?;
        match self.find(message_id).await? {
            Some(path) => Ok(Some(read_summary(&path).await?)),
            None => Ok(None),
        }
    }

    async fn save_feedback(
        &self,
        message_id: &str,
        feedback: Feedback,
    ) -> Result<(), PersistenceError> {
        let Some(mut summary) = self.get(message_id).await? else {
            return Err(PersistenceError::NotFound {
                message_id: message_id.to_string(),
            });
        };
        let feedback = Feedback {
            message_id: message_id.to_string(),
            ..feedback
        };

        summary.feedback = Some(feedback.clone());
        self.save(&summary).await?;
        if let Some(index) = &self.index {
            index.upsert_feedback(&feedback).await?;
        }
        info!(message_id, "Feedback recorded");
        Ok(())
    }
}

/// Split `YYYY-MM-DD_<id>.json` into its date and message ID.
pub fn parse_file_name(name: &str) -> Option<(NaiveDate, &str)> {
    let stem = name.strip_suffix(".json")?;
    let (date, rest) = stem.split_at_checked(DATE_PREFIX_LEN)?;
    let id = rest.strip_prefix('_')?;
    if id.is_empty() {
        return None;
    }
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    Some((date, id))
}

/// Message IDs become file names, so path syntax is rejected.
fn check_message_id(message_id: &str) -> Result<(), PersistenceError> {
    let bad = message_id.is_empty()
        || message_id == "."
        || message_id == ".."
        || message_id.contains(['/', '\\', '\0']);
    if bad {
        Err(PersistenceError::InvalidMessageId(message_id.to_string()))
    } else {
        Ok(())
    }
}

async fn read_summary(path: &Path) -> Result<StructuredSummary, PersistenceError> {
    let bytes = fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Write to a sibling temp file, then rename over the target.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let tmp = path.with_extension(format!("json.tmp-{}", uuid::Uuid::new_v4().simple()));
    if let Err(e) = fs::write(&tmp, bytes).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
