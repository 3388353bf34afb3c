//! Pipeline orchestrator: fetch, then clean, summarize and persist each
//! message in turn.
//!
//! Item lifecycle:
//! ```text
//! Fetched -> Cleaned -> Summarized -> Persisted
//!    \          \           \
//!     +----------+-----------+--> Failed (recorded, run continues)
//! ```
//! Only a fetch that fails after retries aborts the run. A dry run stops
//! after cleaning (or after summarizing, when previews are enabled) and
//! never touches the store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::cleaner;
use crate::config::AppConfig;
use crate::error::{FetchError, PipelineError, ProcessingError};
use crate::pipeline::outcome::{PreviewItem, ProcessingOutcome};
use crate::pipeline::types::{
    CleanedMessage, FetchRules, MessageSource, RawMessage, StructuredSummary, SummaryStore,
};
use crate::retry::{RetryError, RetryPolicy, with_retry};
use crate::summarizer::Summarizer;

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_input_tokens: usize,
    pub fetch_retry: RetryPolicy,
    pub persist_retry: RetryPolicy,
    pub fetch_timeout: Duration,
    /// Call the summarizer during dry runs and report its output.
    pub preview_summaries: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_input_tokens: 512,
            fetch_retry: RetryPolicy::default(),
            persist_retry: RetryPolicy::default(),
            fetch_timeout: Duration::from_secs(30),
            preview_summaries: false,
        }
    }
}

impl PipelineConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            max_input_tokens: config.summarizer.max_input_tokens,
            fetch_retry: config.retry.policy(),
            persist_retry: config.retry.policy(),
            fetch_timeout: config.fetch.timeout(),
            preview_summaries: config.summarizer.preview_in_dry_run,
        }
    }
}

/// Where an item is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemStage {
    Fetched,
    Cleaned,
    Summarized,
    Persisted,
}

impl ItemStage {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Fetched => "fetched",
            Self::Cleaned => "cleaned",
            Self::Summarized => "summarized",
            Self::Persisted => "persisted",
        }
    }
}

/// How an item left the pipeline when it did not fail.
enum ItemResult {
    Persisted,
    Previewed(PreviewItem),
}

pub struct Pipeline {
    source: Arc<dyn MessageSource>,
    summarizer: Arc<dyn Summarizer>,
    store: Arc<dyn SummaryStore>,
    config: PipelineConfig,
    cancel: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn MessageSource>,
        summarizer: Arc<dyn Summarizer>,
        store: Arc<dyn SummaryStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source,
            summarizer,
            store,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops a run before its next item. Setting it does not
    /// interrupt an item already in flight.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Run once over the messages selected by `rules`.
    ///
    /// Per-item failures are recorded in the outcome; only a failed fetch
    /// returns an error.
    pub async fn run(
        &self,
        rules: &FetchRules,
        dry_run: bool,
    ) -> Result<ProcessingOutcome, PipelineError> {
        let mut outcome = ProcessingOutcome::new(dry_run);
        info!(
            run_id = %outcome.run_id,
            source = self.source.name(),
            mode = rules.mode.as_str(),
            max_messages = rules.max_messages,
            dry_run,
            "Starting email processing run"
        );

        let messages = self.fetch_candidates(rules, dry_run).await?;
        outcome.total_fetched = messages.len();
        info!(run_id = %outcome.run_id, count = messages.len(), "Fetched candidate messages");

        let total = messages.len();
        for (i, raw) in messages.into_iter().enumerate() {
            if self.is_cancelled() {
                let remaining = total - i;
                info!(run_id = %outcome.run_id, remaining, "Run cancelled, stopping before next item");
                outcome.record_cancelled(remaining);
                break;
            }

            let message_id = raw.id.clone();
            match self.process_item(raw, dry_run).await {
                Ok(ItemResult::Persisted) => outcome.record_success(),
                Ok(ItemResult::Previewed(preview)) => outcome.record_preview(preview),
                Err(e) => {
                    error!(
                        run_id = %outcome.run_id,
                        id = %message_id,
                        kind = %e.kind(),
                        error = %e,
                        "Failed to process message"
                    );
                    outcome.record_failure(&message_id, &e);
                }
            }
        }

        outcome.finish();
        info!(
            run_id = %outcome.run_id,
            fetched = outcome.total_fetched,
            processed = outcome.total_processed,
            failed = outcome.total_failed,
            skipped = outcome.total_skipped,
            cancelled = outcome.cancelled,
            "Processing run finished"
        );
        Ok(outcome)
    }

    /// Fetch, summarize and store one message by ID.
    pub async fn run_one(&self, message_id: &str) -> Result<StructuredSummary, ProcessingError> {
        info!(id = %message_id, "Processing single message");
        let source = &self.source;
        let timeout = self.config.fetch_timeout;
        let raw = with_retry(&self.config.fetch_retry, "fetch_one", move || async move {
            bounded(source.name(), timeout, source.fetch_one(message_id)).await
        })
        .await
        .map_err(RetryError::into_inner)?
        .ok_or_else(|| FetchError::NotFound {
            id: message_id.to_string(),
        })?;

        self.log_stage(&raw.id, ItemStage::Fetched);
        let cleaned = self.clean(raw);
        let summary = self.summarize(&cleaned).await?;
        self.persist(summary).await
    }

    async fn fetch_candidates(
        &self,
        rules: &FetchRules,
        dry_run: bool,
    ) -> Result<Vec<RawMessage>, PipelineError> {
        let source = &self.source;
        let timeout = self.config.fetch_timeout;
        with_retry(&self.config.fetch_retry, "fetch", move || async move {
            bounded(source.name(), timeout, source.fetch(rules, dry_run)).await
        })
        .await
        .map_err(|e| match e {
            RetryError::Exhausted { attempts, last } => PipelineError::FetchExhausted {
                attempts,
                source: last,
            },
            RetryError::Aborted(e) => PipelineError::FetchAborted(e),
        })
    }

    async fn process_item(
        &self,
        raw: RawMessage,
        dry_run: bool,
    ) -> Result<ItemResult, ProcessingError> {
        self.log_stage(&raw.id, ItemStage::Fetched);
        let problems = raw.validate();
        if !problems.is_empty() {
            warn!(id = %raw.id, problems = ?problems, "Message violates fetch contract, cleaning anyway");
        }

        let cleaned = self.clean(raw);

        if dry_run && !self.config.preview_summaries {
            return Ok(ItemResult::Previewed(preview(&cleaned, None)));
        }

        let summary = self.summarize(&cleaned).await?;

        if dry_run {
            return Ok(ItemResult::Previewed(preview(&cleaned, Some(summary.summary))));
        }

        self.persist(summary).await?;
        Ok(ItemResult::Persisted)
    }

    fn clean(&self, raw: RawMessage) -> CleanedMessage {
        let cleaned = cleaner::clean(raw);
        self.log_stage(&cleaned.id, ItemStage::Cleaned);
        cleaned
    }

    async fn summarize(&self, cleaned: &CleanedMessage) -> Result<StructuredSummary, ProcessingError> {
        let summary = self
            .summarizer
            .summarize(cleaned, self.config.max_input_tokens)
            .await?;
        self.log_stage(&cleaned.id, ItemStage::Summarized);
        Ok(summary)
    }

    async fn persist(&self, summary: StructuredSummary) -> Result<StructuredSummary, ProcessingError> {
        let store = &self.store;
        let pending = &summary;
        let saved = with_retry(&self.config.persist_retry, "persist", move || {
            store.save(pending)
        })
        .await;

        match saved {
            Ok(()) => {
                self.log_stage(&summary.message_id, ItemStage::Persisted);
                Ok(summary)
            }
            Err(e) => Err(ProcessingError::Persistence {
                source: e.into_inner(),
                summary: Box::new(summary),
            }),
        }
    }

    fn log_stage(&self, message_id: &str, stage: ItemStage) {
        debug!(id = %message_id, stage = stage.as_str(), "Item advanced");
    }
}

fn preview(cleaned: &CleanedMessage, summary: Option<String>) -> PreviewItem {
    PreviewItem {
        message_id: cleaned.id.clone(),
        subject: cleaned.subject.clone(),
        sender: cleaned.sender.clone(),
        cleaned_length: cleaned.cleaned_length,
        body_empty: cleaned.body_empty,
        summary,
    }
}

/// Bound a fetch call by `timeout`.
async fn bounded<T>(
    source_name: &str,
    timeout: Duration,
    fetch: impl Future<Output = Result<T, FetchError>>,
) -> Result<T, FetchError> {
    match tokio::time::timeout(timeout, fetch).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout {
            source_name: source_name.to_string(),
            timeout,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_app_settings() {
        let mut app = AppConfig::default();
        app.summarizer.max_input_tokens = 256;
        app.summarizer.preview_in_dry_run = true;
        app.retry.max_attempts = 5;
        app.fetch.timeout_secs = 9;

        let config = PipelineConfig::from_app(&app);
        assert_eq!(config.max_input_tokens, 256);
        assert!(config.preview_summaries);
        assert_eq!(config.fetch_retry.max_attempts, 5);
        assert_eq!(config.persist_retry.max_attempts, 5);
        assert_eq!(config.fetch_timeout, Duration::from_secs(9));
    }

    #[test]
    fn stage_labels() {
        let stages = [
            ItemStage::Fetched,
            ItemStage::Cleaned,
            ItemStage::Summarized,
            ItemStage::Persisted,
        ];
        let labels: Vec<&str> = stages.iter().map(|s| s.as_str()).collect();
        assert_eq!(labels, vec!["fetched", "cleaned", "summarized", "persisted"]);
    }
}
