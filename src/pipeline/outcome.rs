//! Run reports.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ErrorKind, ProcessingError};
use crate::pipeline::types::StructuredSummary;

/// One item that failed, with a logged detail and a user-facing message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemError {
    pub message_id: String,
    pub kind: ErrorKind,
    pub detail: String,
    pub user_message: String,
    pub timestamp: DateTime<Utc>,
}

impl ItemError {
    pub fn from_error(message_id: &str, error: &ProcessingError) -> Self {
        let kind = error.kind();
        Self {
            message_id: message_id.to_string(),
            kind,
            detail: error.to_string(),
            user_message: kind.user_message().to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// What a dry run would have done with one message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewItem {
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub cleaned_length: usize,
    pub body_empty: bool,
    /// Present only when dry runs are configured to call the summarizer.
    pub summary: Option<String>,
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingOutcome {
    pub run_id: Uuid,
    pub dry_run: bool,
    pub total_fetched: usize,
    pub total_processed: usize,
    pub total_failed: usize,
    /// Items never reached because the run was cancelled.
    pub total_skipped: usize,
    pub cancelled: bool,
    pub per_item_errors: Vec<ItemError>,
    pub previews: Vec<PreviewItem>,
    /// Summaries that were produced but could not be stored, kept so the
    /// caller can retry the save.
    pub unsaved: Vec<StructuredSummary>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ProcessingOutcome {
    pub fn new(dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            dry_run,
            total_fetched: 0,
            total_processed: 0,
            total_failed: 0,
            total_skipped: 0,
            cancelled: false,
            per_item_errors: Vec::new(),
            previews: Vec::new(),
            unsaved: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record_success(&mut self) {
        self.total_processed += 1;
    }

    pub fn record_preview(&mut self, preview: PreviewItem) {
        self.total_processed += 1;
        self.previews.push(preview);
    }

    pub fn record_failure(&mut self, message_id: &str, error: &ProcessingError) {
        self.total_failed += 1;
        self.per_item_errors.push(ItemError::from_error(message_id, error));
        if let Some(summary) = error.unsaved_summary() {
            self.unsaved.push(summary.clone());
        }
    }

    pub fn record_cancelled(&mut self, remaining: usize) {
        self.cancelled = true;
        self.total_skipped += remaining;
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Fraction of fetched items that were processed, 1.0 for an empty run.
    pub fn success_rate(&self) -> f64 {
        if self.total_fetched == 0 {
            1.0
        } else {
            self.total_processed as f64 / self.total_fetched as f64
        }
    }

    /// Every fetched item is accounted for exactly once.
    pub fn is_consistent(&self) -> bool {
        self.total_processed + self.total_failed + self.total_skipped == self.total_fetched
            && self.per_item_errors.len() == self.total_failed
    }

    /// One line per failure, for showing to a person.
    pub fn user_report(&self) -> Vec<String> {
        self.per_item_errors
            .iter()
            .map(|e| format!("{}: {}", e.message_id, e.user_message))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, PersistenceError, SummarizeError};

    #[test]
    fn empty_run_is_consistent() {
        let mut outcome = ProcessingOutcome::new(false);
        outcome.finish();
        assert!(outcome.is_consistent());
        assert_eq!(outcome.success_rate(), 1.0);
        assert!(outcome.finished_at.is_some());
    }

    #[test]
    fn failures_carry_kind_and_user_message() {
        let mut outcome = ProcessingOutcome::new(false);
        outcome.total_fetched = 3;
        outcome.record_success();
        outcome.record_failure(
            "m2",
            &ProcessingError::Summarize(SummarizeError::Format {
                message_id: "m2".into(),
                attempts: 2,
                reason: "bad".into(),
            }),
        );
        outcome.record_failure(
            "m3",
            &ProcessingError::Fetch(FetchError::NotFound { id: "m3".into() }),
        );

        assert!(outcome.is_consistent());
        assert_eq!(outcome.per_item_errors[0].kind, ErrorKind::SummarizationFormatError);
        assert_eq!(outcome.per_item_errors[1].kind, ErrorKind::NotFound);
        assert_eq!(
            outcome.per_item_errors[1].user_message,
            ErrorKind::NotFound.user_message()
        );
        assert!((outcome.success_rate() - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(outcome.user_report().len(), 2);
    }

    #[test]
    fn persistence_failure_keeps_unsaved_summary() {
        let summary = StructuredSummary {
            message_id: "m1".into(),
            sender: "alice@example.com".into(),
            subject: "Report".into(),
            received_at: Utc::now(),
            summary: "Alice wants the report.".into(),
            actions: vec![],
            deadlines: Default::default(),
            created_at: Utc::now(),
            model: "test/model".into(),
            feedback: None,
        };
        let mut outcome = ProcessingOutcome::new(false);
        outcome.total_fetched = 2;
        outcome.record_failure(
            "m1",
            &ProcessingError::Persistence {
                source: PersistenceError::Index("locked".into()),
                summary: Box::new(summary.clone()),
            },
        );
        outcome.record_failure(
            "m2",
            &ProcessingError::Fetch(FetchError::NotFound { id: "m2".into() }),
        );

        assert_eq!(outcome.per_item_errors[0].kind, ErrorKind::PersistenceError);
        assert_eq!(outcome.unsaved, vec![summary]);
    }

    #[test]
    fn cancellation_counts_skipped_items() {
        let mut outcome = ProcessingOutcome::new(false);
        outcome.total_fetched = 4;
        outcome.record_success();
        outcome.record_cancelled(3);
        assert!(outcome.cancelled);
        assert!(outcome.is_consistent());
    }

    #[test]
    fn serializes_kinds_as_snake_case() {
        let mut outcome = ProcessingOutcome::new(true);
        outcome.total_fetched = 1;
        outcome.record_failure(
            "m1",
            &ProcessingError::Fetch(FetchError::NotFound { id: "m1".into() }),
        );
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["per_item_errors"][0]["kind"], "not_found");
        assert_eq!(json["dry_run"], true);
    }
}
