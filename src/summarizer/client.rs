//! Model client seam.
//!
//! A `ModelClient` sends one prompt to one model and returns its raw text.
//! It knows nothing about summaries, JSON repair or retries; the summarizer
//! engines layer those on top.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};

use crate::error::ModelError;

/// Default sampling temperature for summaries.
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
/// Default cap on generated tokens.
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 512;

/// A single completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Context window to request from backends that size it per call.
    pub context_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            context_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, max_tokens: u32) -> Self {
        self.max_output_tokens = max_tokens;
        self
    }

    pub fn with_context_tokens(mut self, tokens: u32) -> Self {
        self.context_tokens = Some(tokens);
        self
    }
}

/// Transport to a language model.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Backend name used in errors and logs ("openai", "anthropic", "ollama").
    fn provider(&self) -> &str;

    fn model_name(&self) -> &str;

    /// Send the request and return the model's text output.
    async fn complete(&self, request: CompletionRequest) -> Result<String, ModelError>;
}

/// Map a non-success HTTP status to a model error.
pub(crate) fn error_for_status(
    provider: &str,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
) -> ModelError {
    let provider = provider.to_string();
    let reason = format!("HTTP {status}: {}", truncate_for_log(body, 300));

    match status.as_u16() {
        401 | 403 => ModelError::AuthFailed { provider },
        // 529 is Anthropic's "overloaded".
        429 | 529 => ModelError::RateLimited {
            provider,
            retry_after: parse_retry_after(headers),
        },
        408 | 500 | 502 | 503 | 504 => ModelError::Unavailable { provider, reason },
        _ => ModelError::RequestFailed { provider, reason },
    }
}

/// Map a transport failure (no HTTP status) to a model error.
pub(crate) fn error_for_transport(
    provider: &str,
    timeout: Duration,
    err: reqwest::Error,
) -> ModelError {
    let provider = provider.to_string();
    if err.is_timeout() {
        ModelError::Timeout { provider, timeout }
    } else if err.is_connect() || err.is_request() {
        ModelError::Unavailable {
            provider,
            reason: err.to_string(),
        }
    } else {
        ModelError::RequestFailed {
            provider,
            reason: err.to_string(),
        }
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn truncate_for_log(body: &str, max_chars: usize) -> String {
    if body.chars().count() <= max_chars {
        body.to_string()
    } else {
        let cut: String = body.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn request_builder_defaults() {
        let req = CompletionRequest::new("sys", "user")
            .with_temperature(0.0)
            .with_max_output_tokens(64);
        assert_eq!(req.system, "sys");
        assert_eq!(req.prompt, "user");
        assert_eq!(req.temperature, 0.0);
        assert_eq!(req.max_output_tokens, 64);
        assert!(req.context_tokens.is_none());
    }

    #[test]
    fn rate_limit_status_reads_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        let err = error_for_status("openai", StatusCode::TOO_MANY_REQUESTS, &headers, "");
        match err {
            ModelError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(12)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn anthropic_overloaded_is_rate_limited() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        let status = StatusCode::from_u16(529).unwrap();
        match error_for_status("anthropic", status, &headers, "overloaded") {
            ModelError::RateLimited {
                provider,
                retry_after,
            } => {
                assert_eq!(provider, "anthropic");
                assert_eq!(retry_after, Some(Duration::from_secs(3)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn status_classification() {
        let headers = HeaderMap::new();
        assert!(matches!(
            error_for_status("x", StatusCode::UNAUTHORIZED, &headers, ""),
            ModelError::AuthFailed { .. }
        ));
        assert!(matches!(
            error_for_status("x", StatusCode::SERVICE_UNAVAILABLE, &headers, "busy"),
            ModelError::Unavailable { .. }
        ));
        assert!(matches!(
            error_for_status("x", StatusCode::BAD_REQUEST, &headers, "bad"),
            ModelError::RequestFailed { .. }
        ));
    }

    #[test]
    fn retry_after_ignores_dates() {
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2026 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn long_bodies_truncated_in_reason() {
        let body = "x".repeat(1_000);
        let err = error_for_status("x", StatusCode::BAD_REQUEST, &HeaderMap::new(), &body);
        assert!(err.to_string().len() < 400);
    }
}
