//! Remote summarizer: hosted chat-completion APIs over HTTPS.
//!
//! Rate limits and transient outages are retried with exponential backoff;
//! each call is also bounded by a per-request timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{ModelError, SummarizeError};
use crate::pipeline::types::{CleanedMessage, StructuredSummary};
use crate::retry::{RetryError, RetryPolicy, with_retry};

use super::client::{CompletionRequest, ModelClient, error_for_status, error_for_transport};
use super::engine::{build_summary, summarize_with_repair};
use super::prompt::build_prompt;
use super::{Summarizer, SummarizerEngine};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Summarizer backed by a hosted model.
pub struct RemoteSummarizer {
    client: Arc<dyn ModelClient>,
    retry: RetryPolicy,
    timeout: Duration,
    model_id: String,
    temperature: f32,
}

impl RemoteSummarizer {
    pub fn new(client: Arc<dyn ModelClient>, retry: RetryPolicy, timeout: Duration) -> Self {
        let model_id = format!("{}/{}", client.provider(), client.model_name());
        Self {
            client,
            retry,
            timeout,
            model_id,
            temperature: super::client::DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    async fn complete_once(&self, request: CompletionRequest) -> Result<String, ModelError> {
        match tokio::time::timeout(self.timeout, self.client.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(ModelError::Timeout {
                provider: self.client.provider().to_string(),
                timeout: self.timeout,
            }),
        }
    }

    /// One logical model call, retried per the policy.
    async fn call(&self, request: CompletionRequest) -> Result<String, SummarizeError> {
        let request = &request;
        with_retry(&self.retry, "model_call", move || {
            self.complete_once(request.clone())
        })
        .await
        .map_err(|e| match e {
            RetryError::Exhausted {
                attempts,
                last: last @ ModelError::RateLimited { .. },
            } => SummarizeError::RateLimited {
                attempts,
                source: last,
            },
            other => SummarizeError::Model(other.into_inner()),
        })
    }
}

#[async_trait]
impl Summarizer for RemoteSummarizer {
    fn engine(&self) -> SummarizerEngine {
        SummarizerEngine::Remote
    }

    fn model_identifier(&self) -> &str {
        &self.model_id
    }

    async fn summarize(
        &self,
        email: &CleanedMessage,
        max_input_tokens: usize,
    ) -> Result<StructuredSummary, SummarizeError> {
        let prompt = build_prompt(email, max_input_tokens).with_temperature(self.temperature);
        debug!(
            id = %email.id,
            model = %self.model_id,
            body_tokens = prompt.body_tokens,
            truncated = prompt.truncated,
            "Summarizing remotely"
        );
        let fields = summarize_with_repair(&prompt, &email.id, move |r| self.call(r)).await?;
        Ok(build_summary(email, fields, &self.model_id))
    }
}

// ── OpenAI-compatible chat completions ──────────────────────────────

/// Client for `/chat/completions` on OpenAI or any compatible server.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    timeout: Duration,
}

impl OpenAiClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";

    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        Ok(Self {
            http: build_http(timeout, "openai")?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            timeout,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait]
impl ModelClient for OpenAiClient {
    fn provider(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ModelError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.prompt},
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_output_tokens,
            "response_format": {"type": "json_object"},
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| error_for_transport(self.provider(), self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(error_for_status(self.provider(), status, &headers, &text));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| ModelError::InvalidResponse {
            provider: self.provider().to_string(),
            reason: e.to_string(),
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ModelError::InvalidResponse {
                provider: self.provider().to_string(),
                reason: "response had no message content".to_string(),
            })
    }
}

// ── Anthropic messages API ──────────────────────────────────────────

/// Client for Anthropic's `/v1/messages`.
pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    timeout: Duration,
}

impl AnthropicClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";

    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        Ok(Self {
            http: build_http(timeout, "anthropic")?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            timeout,
        })
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl ModelClient for AnthropicClient {
    fn provider(&self) -> &str {
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ModelError> {
        let body = json!({
            "model": self.model,
            "system": request.system,
            "messages": [{"role": "user", "content": request.prompt}],
            "temperature": request.temperature,
            "max_tokens": request.max_output_tokens,
        });

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| error_for_transport(self.provider(), self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(error_for_status(self.provider(), status, &headers, &text));
        }

        let parsed: MessagesResponse =
            response.json().await.map_err(|e| ModelError::InvalidResponse {
                provider: self.provider().to_string(),
                reason: e.to_string(),
            })?;

        let text: String = parsed
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect();

        if text.is_empty() {
            return Err(ModelError::InvalidResponse {
                provider: self.provider().to_string(),
                reason: "response had no text blocks".to_string(),
            });
        }
        Ok(text)
    }
}

pub(crate) fn build_http(timeout: Duration, provider: &str) -> Result<reqwest::Client, ModelError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ModelError::RequestFailed {
            provider: provider.to_string(),
            reason: format!("Failed to build HTTP client: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{TimeZone, Utc};

    const VALID: &str = r#"{"summary":"Alice needs the report.","actions":["Send the report"],"deadlines":["2025-12-12"]}"#;

    struct ScriptedClient {
        replies: Mutex<VecDeque<Result<String, ModelError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Result<String, ModelError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        fn provider(&self) -> &str {
            "scripted"
        }

        fn model_name(&self) -> &str {
            "test-model"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<String, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(VALID.into()))
        }
    }

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

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(2))
    }

    fn rate_limited() -> ModelError {
        ModelError::RateLimited {
            provider: "scripted".into(),
            retry_after: None,
        }
    }

    #[tokio::test]
    async fn summarizes_valid_reply() {
        let client = ScriptedClient::new(vec![Ok(VALID.into())]);
        let summarizer = RemoteSummarizer::new(client.clone(), fast_policy(3), Duration::from_secs(5));
        let summary = summarizer.summarize(&email(), 512).await.unwrap();
        assert_eq!(summary.summary, "Alice needs the report.");
        assert_eq!(summary.model, "scripted/test-model");
        assert_eq!(summarizer.model_identifier(), "scripted/test-model");
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rate_limit_retried_then_succeeds() {
        let client = ScriptedClient::new(vec![Err(rate_limited()), Err(rate_limited()), Ok(VALID.into())]);
        let summarizer = RemoteSummarizer::new(client.clone(), fast_policy(3), Duration::from_secs(5));
        assert!(summarizer.summarize(&email(), 512).await.is_ok());
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn persistent_rate_limit_surfaces_after_budget() {
        let client = ScriptedClient::new((0..5).map(|_| Err(rate_limited())).collect());
        let summarizer = RemoteSummarizer::new(client.clone(), fast_policy(3), Duration::from_secs(5));
        let err = summarizer.summarize(&email(), 512).await.unwrap_err();
        assert!(matches!(err, SummarizeError::RateLimited { attempts: 3, .. }));
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn auth_failure_not_retried() {
        let client = ScriptedClient::new(vec![Err(ModelError::AuthFailed {
            provider: "scripted".into(),
        })]);
        let summarizer = RemoteSummarizer::new(client.clone(), fast_policy(5), Duration::from_secs(5));
        let err = summarizer.summarize(&email(), 512).await.unwrap_err();
        assert!(matches!(err, SummarizeError::Model(ModelError::AuthFailed { .. })));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_reply_repaired_once() {
        let client = ScriptedClient::new(vec![Ok("Sure, here it is".into()), Ok("still not json".into())]);
        let summarizer = RemoteSummarizer::new(client.clone(), fast_policy(3), Duration::from_secs(5));
        let err = summarizer.summarize(&email(), 512).await.unwrap_err();
        assert!(matches!(err, SummarizeError::Format { attempts: 2, .. }));
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    struct SlowClient;

    #[async_trait]
    impl ModelClient for SlowClient {
        fn provider(&self) -> &str {
            "slow"
        }

        fn model_name(&self) -> &str {
            "sleepy"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<String, ModelError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(VALID.into())
        }
    }

    #[tokio::test]
    async fn slow_model_times_out() {
        let summarizer =
            RemoteSummarizer::new(Arc::new(SlowClient), fast_policy(2), Duration::from_millis(20));
        let err = summarizer.summarize(&email(), 512).await.unwrap_err();
        assert!(matches!(err, SummarizeError::Model(ModelError::Timeout { .. })));
    }
}
