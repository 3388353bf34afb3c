//! Format-repair protocol shared by every summarizer engine.
//!
//! ```text
//! FirstAttempt --valid--> Succeeded
//!      |
//!   invalid
//!      v
//! RepairAttempt --valid--> Succeeded
//!      |
//!   invalid
//!      v
//!   Failed (SummarizeError::Format, attempts = 2)
//! ```
//!
//! Transport errors from either call end the protocol immediately; they
//! are not format problems.

use std::future::Future;

use chrono::Utc;
use tracing::{info, warn};

use crate::error::SummarizeError;
use crate::pipeline::types::{CleanedMessage, StructuredSummary};

use super::client::CompletionRequest;
use super::parse::{SummaryFields, parse_summary_reply};
use super::prompt::SummaryPrompt;

/// Calls made when the first reply is malformed.
pub const MAX_FORMAT_ATTEMPTS: u32 = 2;

enum RepairState {
    FirstAttempt,
    RepairAttempt { previous: String, problem: String },
}

/// Run the prompt through `call`, asking once for a corrected reply if the
/// first one is not valid summary JSON.
pub async fn summarize_with_repair<F, Fut>(
    prompt: &SummaryPrompt,
    message_id: &str,
    mut call: F,
) -> Result<SummaryFields, SummarizeError>
where
    F: FnMut(CompletionRequest) -> Fut,
    Fut: Future<Output = Result<String, SummarizeError>>,
{
    let mut state = RepairState::FirstAttempt;

    loop {
        let request = match &state {
            RepairState::FirstAttempt => prompt.request(),
            RepairState::RepairAttempt { previous, problem } => {
                prompt.repair_request(previous, problem)
            }
        };

        let raw = call(request).await?;

        match (parse_summary_reply(&raw), state) {
            (Ok(fields), RepairState::FirstAttempt) => return Ok(fields),
            (Ok(fields), RepairState::RepairAttempt { .. }) => {
                info!(message_id, "Repair attempt produced valid summary JSON");
                return Ok(fields);
            }
            (Err(problem), RepairState::FirstAttempt) => {
                warn!(message_id, problem = %problem, "Model reply malformed, asking for repair");
                state = RepairState::RepairAttempt {
                    previous: raw,
                    problem,
                };
            }
            (Err(problem), RepairState::RepairAttempt { .. }) => {
                return Err(SummarizeError::Format {
                    message_id: message_id.to_string(),
                    attempts: MAX_FORMAT_ATTEMPTS,
                    reason: problem,
                });
            }
        }
    }
}

/// Combine parsed fields with the message's metadata.
pub fn build_summary(email: &CleanedMessage, fields: SummaryFields, model: &str) -> StructuredSummary {
    StructuredSummary {
        message_id: email.id.clone(),
        sender: email.sender.clone(),
        subject: email.subject.clone(),
        received_at: email.received_at,
        summary: fields.summary,
        actions: fields.actions,
        deadlines: fields.deadlines,
        created_at: Utc::now(),
        model: model.to_string(),
        feedback: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use chrono::TimeZone;

    use crate::error::ModelError;
    use crate::summarizer::prompt::build_prompt;

    const VALID: &str = r#"{"summary":"Alice needs the report.","actions":["Send report"],"deadlines":["2025-12-12"]}"#;

    fn email() -> CleanedMessage {
        CleanedMessage {
            id: "abc123".into(),
            sender: "alice@example.com".into(),
            subject: "Report".into(),
            received_at: Utc.with_ymd_and_hms(2025, 12, 7, 10, 0, 0).unwrap(),
            cleaned_body: "Hi\n\nPlease send the report by 2025-12-12.".into(),
            attachment_names: vec![],
            original_length: 60,
            cleaned_length: 40,
            body_empty: false,
        }
    }

    /// Replays canned replies and records every request it saw.
    struct Script {
        replies: Mutex<VecDeque<Result<String, SummarizeError>>>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl Script {
        fn new(replies: Vec<Result<String, SummarizeError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            }
        }

        async fn call(&self, request: CompletionRequest) -> Result<String, SummarizeError> {
            self.seen.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("unexpected extra call".into()))
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[tokio::test]
    async fn valid_first_reply_needs_one_call() {
        let script = Script::new(vec![Ok(VALID.into())]);
        let prompt = build_prompt(&email(), 512);
        let fields = summarize_with_repair(&prompt, "abc123", |r| script.call(r))
            .await
            .unwrap();
        assert_eq!(fields.summary, "Alice needs the report.");
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test]
    async fn malformed_then_valid_uses_repair() {
        let script = Script::new(vec![Ok("not json at all".into()), Ok(VALID.into())]);
        let prompt = build_prompt(&email(), 512);
        let fields = summarize_with_repair(&prompt, "abc123", |r| script.call(r))
            .await
            .unwrap();
        assert_eq!(fields.actions, vec!["Send report"]);
        assert_eq!(script.calls(), 2);
        let seen = script.seen.lock().unwrap();
        assert!(seen[1].prompt.contains("not json at all"));
    }

    #[tokio::test]
    async fn two_malformed_replies_fail_after_exactly_two_calls() {
        let script = Script::new(vec![
            Ok("nope".into()),
            Ok(r#"{"summary":"x"}"#.into()),
            Ok(VALID.into()),
        ]);
        let prompt = build_prompt(&email(), 512);
        let err = summarize_with_repair(&prompt, "abc123", |r| script.call(r))
            .await
            .unwrap_err();
        match err {
            SummarizeError::Format {
                message_id,
                attempts,
                ..
            } => {
                assert_eq!(message_id, "abc123");
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(script.calls(), 2);
    }

    #[tokio::test]
    async fn transport_error_is_not_repaired() {
        let script = Script::new(vec![Err(SummarizeError::Model(ModelError::AuthFailed {
            provider: "openai".into(),
        }))]);
        let prompt = build_prompt(&email(), 512);
        let err = summarize_with_repair(&prompt, "abc123", |r| script.call(r))
            .await
            .unwrap_err();
        assert!(matches!(err, SummarizeError::Model(ModelError::AuthFailed { .. })));
        assert_eq!(script.calls(), 1);
    }

    #[test]
    fn summary_copies_metadata() {
        let fields = parse_summary_reply(VALID).unwrap();
        let summary = build_summary(&email(), fields, "openai/gpt-4o-mini");
        assert_eq!(summary.message_id, "abc123");
        assert_eq!(summary.file_name(), "2025-12-07_abc123.json");
        assert_eq!(summary.model, "openai/gpt-4o-mini");
        assert!(summary.feedback.is_none());
    }
}
