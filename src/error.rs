//! Error types for the mail digest pipeline.

use std::time::Duration;

use crate::pipeline::types::StructuredSummary;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid configuration: {}", .0.join(", "))]
    Invalid(Vec<String>),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the fetch collaborator.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Transient fetch failure from {source_name}: {reason}")]
    Transient { source_name: String, reason: String },

    #[error("Fetch from {source_name} failed: {reason}")]
    Permanent { source_name: String, reason: String },

    #[error("Fetch from {source_name} timed out after {timeout:?}")]
    Timeout {
        source_name: String,
        timeout: Duration,
    },

    #[error("Message {id} not found")]
    NotFound { id: String },
}

/// Transport-level errors from a model backend.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} ran out of resources: {reason}")]
    ResourceExhausted { provider: String, reason: String },

    #[error("Provider {provider} temporarily unavailable: {reason}")]
    Unavailable { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Summarization failures surfaced to the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum SummarizeError {
    #[error("Model output for {message_id} was not valid summary JSON after {attempts} attempts: {reason}")]
    Format {
        message_id: String,
        attempts: u32,
        reason: String,
    },

    #[error("Rate limit persisted after {attempts} attempts: {source}")]
    RateLimited {
        attempts: u32,
        #[source]
        source: ModelError,
    },

    #[error("Model {model} unavailable: {reason}")]
    ModelUnavailable { model: String, reason: String },

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Storage collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Summary not found for message {message_id}")]
    NotFound { message_id: String },

    #[error("Invalid feedback: {0}")]
    InvalidFeedback(String),

    #[error("Message ID {0:?} cannot be used as a file name")]
    InvalidMessageId(String),
}

/// Per-item processing failure.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Summarization failed: {0}")]
    Summarize(#[from] SummarizeError),

    /// The summary was produced but could not be stored. It is kept here so
    /// the caller can inspect it or retry the save.
    #[error("Persisting summary for {} failed: {source}", summary.message_id)]
    Persistence {
        #[source]
        source: PersistenceError,
        summary: Box<StructuredSummary>,
    },
}

/// Run-level failures. Only these abort a run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Could not fetch messages after {attempts} attempt(s): {source}")]
    FetchExhausted {
        attempts: u32,
        #[source]
        source: FetchError,
    },

    #[error("Fetch aborted: {0}")]
    FetchAborted(#[source] FetchError),
}

// ── Error kinds ─────────────────────────────────────────────────────

/// Stable tag attached to every per-item error in a run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    FetchError,
    CleaningWarning,
    SummarizationFormatError,
    RateLimited,
    ModelUnavailable,
    PersistenceError,
    NotFound,
}

impl ErrorKind {
    /// Short label for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchError => "fetch_error",
            Self::CleaningWarning => "cleaning_warning",
            Self::SummarizationFormatError => "summarization_format_error",
            Self::RateLimited => "rate_limited",
            Self::ModelUnavailable => "model_unavailable",
            Self::PersistenceError => "persistence_error",
            Self::NotFound => "not_found",
        }
    }

    /// Message shown to a person, separate from the logged detail.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::FetchError => {
                "Unable to reach the mailbox. Please check your connection and try again."
            }
            Self::CleaningWarning => "This email had no readable content.",
            Self::SummarizationFormatError => {
                "The summarizer returned an unreadable answer for this email."
            }
            Self::RateLimited => "Rate limit exceeded. Please wait a moment and try again.",
            Self::ModelUnavailable => {
                "The summarization model is unavailable right now. Please try again later."
            }
            Self::PersistenceError => "The summary could not be saved. Please check disk access.",
            Self::NotFound => "The requested email could not be found.",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SummarizeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Format { .. } => ErrorKind::SummarizationFormatError,
            Self::RateLimited { .. } | Self::Model(ModelError::RateLimited { .. }) => {
                ErrorKind::RateLimited
            }
            Self::ModelUnavailable { .. } | Self::Model(_) => ErrorKind::ModelUnavailable,
        }
    }
}

impl ProcessingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Fetch(FetchError::NotFound { .. }) => ErrorKind::NotFound,
            Self::Fetch(_) => ErrorKind::FetchError,
            Self::Summarize(e) => e.kind(),
            Self::Persistence { .. } => ErrorKind::PersistenceError,
        }
    }

    /// The summary that was produced before persistence failed, if any.
    pub fn unsaved_summary(&self) -> Option<&StructuredSummary> {
        match self {
            Self::Persistence { summary, .. } => Some(summary.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_have_distinct_user_messages() {
        let kinds = [
            ErrorKind::FetchError,
            ErrorKind::CleaningWarning,
            ErrorKind::SummarizationFormatError,
            ErrorKind::RateLimited,
            ErrorKind::ModelUnavailable,
            ErrorKind::PersistenceError,
            ErrorKind::NotFound,
        ];
        for kind in kinds {
            assert_ne!(kind.user_message(), kind.as_str());
        }
        let unique: std::collections::HashSet<_> =
            kinds.iter().map(|k| k.user_message()).collect();
        assert_eq!(unique.len(), kinds.len());
    }

    #[test]
    fn summarize_error_kinds() {
        let format = SummarizeError::Format {
            message_id: "m1".into(),
            attempts: 2,
            reason: "bad".into(),
        };
        assert_eq!(format.kind(), ErrorKind::SummarizationFormatError);

        let limited = SummarizeError::RateLimited {
            attempts: 3,
            source: ModelError::RateLimited {
                provider: "openai".into(),
                retry_after: None,
            },
        };
        assert_eq!(limited.kind(), ErrorKind::RateLimited);

        let unavailable = SummarizeError::ModelUnavailable {
            model: "llama3".into(),
            reason: "oom".into(),
        };
        assert_eq!(unavailable.kind(), ErrorKind::ModelUnavailable);
    }

    #[test]
    fn fetch_not_found_maps_to_not_found_kind() {
        let err = ProcessingError::Fetch(FetchError::NotFound { id: "x".into() });
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.unsaved_summary().is_none());
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::SummarizationFormatError).unwrap();
        assert_eq!(json, "\"summarization_format_error\"");
    }
}
