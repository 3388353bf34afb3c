//! Shared types for the email processing pipeline.

use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FetchError, PersistenceError};

// ── Fetch rules ─────────────────────────────────────────────────────

/// Which messages the fetch collaborator should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// Only messages not yet marked as read.
    #[default]
    Unread,
    /// Messages received within `days_back` days.
    LastNDays,
    /// Everything, newest first, up to the cap.
    All,
}

impl FetchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unread => "unread",
            Self::LastNDays => "last_n_days",
            Self::All => "all",
        }
    }
}

impl std::str::FromStr for FetchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unread" => Ok(Self::Unread),
            "last_n_days" => Ok(Self::LastNDays),
            "all" => Ok(Self::All),
            other => Err(format!("unknown fetch mode: '{other}'")),
        }
    }
}

/// Filters applied by the fetch collaborator. The pipeline passes them
/// through and trusts the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRules {
    pub mode: FetchMode,
    pub max_messages: usize,
    pub days_back: u32,
}

impl Default for FetchRules {
    fn default() -> Self {
        Self {
            mode: FetchMode::Unread,
            max_messages: 20,
            days_back: 7,
        }
    }
}

impl FetchRules {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_messages == 0 {
            errors.push("max_messages must be positive".to_string());
        }
        if self.days_back == 0 {
            errors.push("days_back must be positive".to_string());
        }
        errors
    }
}

// ── Messages ────────────────────────────────────────────────────────

/// A message as delivered by the fetch collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Provider-assigned unique ID.
    pub id: String,
    pub sender: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    /// HTML body, empty when the message has none.
    pub body_html: String,
    pub body_text: Option<String>,
    /// Attachment filenames, in message order.
    pub attachment_names: Vec<String>,
    pub labels: HashSet<String>,
}

impl RawMessage {
    /// Check the fields the fetch contract guarantees.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.id.trim().is_empty() {
            errors.push("id is required".to_string());
        }
        if self.sender.trim().is_empty() {
            errors.push("sender is required".to_string());
        }
        if self.body_html.is_empty() && self.body_text.is_none() {
            errors.push("at least one of body_html or body_text is required".to_string());
        }
        errors
    }
}

/// A message after markup, quote and signature removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedMessage {
    pub id: String,
    pub sender: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    /// Cleaned text, or [`crate::cleaner::EMPTY_BODY_MARKER`].
    pub cleaned_body: String,
    pub attachment_names: Vec<String>,
    /// Length in chars of the body the cleaner started from.
    pub original_length: usize,
    /// Length in chars of the cleaned content (0 when the body was empty).
    pub cleaned_length: usize,
    /// True when nothing readable survived cleaning.
    pub body_empty: bool,
}

// ── Summaries ───────────────────────────────────────────────────────

/// Feedback rating: thumbs up or thumbs down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum Rating {
    Up,
    Down,
}

impl TryFrom<i8> for Rating {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Up),
            -1 => Ok(Self::Down),
            other => Err(format!("rating must be 1 or -1, got {other}")),
        }
    }
}

impl From<Rating> for i8 {
    fn from(rating: Rating) -> Self {
        match rating {
            Rating::Up => 1,
            Rating::Down => -1,
        }
    }
}

/// A person's verdict on one summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub message_id: String,
    pub rating: Rating,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Feedback {
    /// Build feedback from a raw rating value (`1` or `-1`).
    pub fn new(
        message_id: impl Into<String>,
        rating: i8,
        comment: Option<String>,
    ) -> Result<Self, PersistenceError> {
        let rating = Rating::try_from(rating).map_err(PersistenceError::InvalidFeedback)?;
        Ok(Self {
            message_id: message_id.into(),
            rating,
            comment,
            created_at: Utc::now(),
        })
    }
}

/// The structured result of summarizing one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredSummary {
    pub message_id: String,
    pub sender: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    /// One to three sentences.
    pub summary: String,
    /// Short imperative action items, in the order the model gave them.
    pub actions: Vec<String>,
    pub deadlines: BTreeSet<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
}

impl StructuredSummary {
    /// File name the storage collaborator must use: `YYYY-MM-DD_<id>.json`.
    pub fn file_name(&self) -> String {
        summary_file_name(&self.message_id, self.received_at)
    }
}

/// `YYYY-MM-DD_<message_id>.json`, dated by the message's receive time.
pub fn summary_file_name(message_id: &str, received_at: DateTime<Utc>) -> String {
    format!("{}_{}.json", received_at.format("%Y-%m-%d"), message_id)
}

// ── Collaborator traits ─────────────────────────────────────────────

/// Fetch collaborator: pure I/O, no business logic.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Source name for logging (e.g. "maildir").
    fn name(&self) -> &str;

    /// Fetch candidate messages, already filtered and capped by `rules`.
    ///
    /// Must not mutate the mailbox when `dry_run` is set.
    async fn fetch(&self, rules: &FetchRules, dry_run: bool)
    -> Result<Vec<RawMessage>, FetchError>;

    /// Fetch a single message by ID.
    async fn fetch_one(&self, message_id: &str) -> Result<Option<RawMessage>, FetchError>;
}

/// Storage collaborator. `save` is an idempotent upsert keyed by message ID.
#[async_trait]
pub trait SummaryStore: Send + Sync {
    async fn save(&self, summary: &StructuredSummary) -> Result<(), PersistenceError>;

    async fn get(&self, message_id: &str) -> Result<Option<StructuredSummary>, PersistenceError>;

    async fn save_feedback(
        &self,
        message_id: &str,
        feedback: Feedback,
    ) -> Result<(), PersistenceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn summary_file_name_uses_received_date() {
        let received = Utc.with_ymd_and_hms(2025, 12, 7, 23, 59, 0).unwrap();
        assert_eq!(
            summary_file_name("abc123", received),
            "2025-12-07_abc123.json"
        );
    }

    #[test]
    fn fetch_mode_parses() {
        assert_eq!("unread".parse::<FetchMode>().unwrap(), FetchMode::Unread);
        assert_eq!(
            " Last_N_Days ".parse::<FetchMode>().unwrap(),
            FetchMode::LastNDays
        );
        assert_eq!("all".parse::<FetchMode>().unwrap(), FetchMode::All);
        assert!("recent".parse::<FetchMode>().is_err());
    }

    #[test]
    fn fetch_rules_validation() {
        assert!(FetchRules::default().validate().is_empty());
        let rules = FetchRules {
            mode: FetchMode::All,
            max_messages: 0,
            days_back: 0,
        };
        assert_eq!(rules.validate().len(), 2);
    }

    #[test]
    fn rating_accepts_only_plus_minus_one() {
        assert!(Feedback::new("m1", 1, None).is_ok());
        assert!(Feedback::new("m1", -1, Some("meh".into())).is_ok());
        assert!(matches!(
            Feedback::new("m1", 0, None),
            Err(PersistenceError::InvalidFeedback(_))
        ));
    }

    #[test]
    fn rating_serializes_as_integer() {
        let fb = Feedback::new("m1", -1, None).unwrap();
        let json = serde_json::to_value(&fb).unwrap();
        assert_eq!(json["rating"], -1);
        assert!(json.get("comment").is_none());
        let bad: Result<Feedback, _> = serde_json::from_value(serde_json::json!({
            "message_id": "m1",
            "rating": 5,
            "created_at": "2025-12-07T10:00:00Z"
        }));
        assert!(bad.is_err());
    }

    #[test]
    fn raw_message_requires_a_body() {
        let msg = RawMessage {
            id: "m1".into(),
            sender: "alice@example.com".into(),
            subject: "Hi".into(),
            received_at: Utc::now(),
            body_html: String::new(),
            body_text: None,
            attachment_names: vec![],
            labels: HashSet::new(),
        };
        assert_eq!(msg.validate().len(), 1);
    }
}
