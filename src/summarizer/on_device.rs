//! On-device summarizer: a local model server, no network egress.
//!
//! There is no rate limiting to back off from. When the model runs out of
//! memory the input budget is halved once; a second exhaustion, or any other
//! transport failure, reports the model as unavailable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{ModelError, SummarizeError};
use crate::pipeline::types::{CleanedMessage, StructuredSummary};

use super::client::{CompletionRequest, ModelClient, error_for_status, error_for_transport};
use super::engine::{build_summary, summarize_with_repair};
use super::prompt::build_prompt;
use super::remote::build_http;
use super::{Summarizer, SummarizerEngine};

/// Tokens reserved on top of the body budget for the template and reply.
const CONTEXT_OVERHEAD_TOKENS: usize = 768;

/// Summarizer backed by a model running on this machine.
pub struct OnDeviceSummarizer {
    client: Arc<dyn ModelClient>,
    timeout: Duration,
    model_id: String,
}

impl OnDeviceSummarizer {
    pub fn new(client: Arc<dyn ModelClient>, timeout: Duration) -> Self {
        let model_id = format!("local/{}", client.model_name());
        Self {
            client,
            timeout,
            model_id,
        }
    }

    async fn call(&self, request: CompletionRequest) -> Result<String, SummarizeError> {
        match tokio::time::timeout(self.timeout, self.client.complete(request)).await {
            Ok(result) => result.map_err(SummarizeError::Model),
            Err(_) => Err(SummarizeError::Model(ModelError::Timeout {
                provider: self.client.provider().to_string(),
                timeout: self.timeout,
            })),
        }
    }

    fn unavailable(&self, reason: impl Into<String>) -> SummarizeError {
        SummarizeError::ModelUnavailable {
            model: self.model_id.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Summarizer for OnDeviceSummarizer {
    fn engine(&self) -> SummarizerEngine {
        SummarizerEngine::OnDevice
    }

    fn model_identifier(&self) -> &str {
        &self.model_id
    }

    async fn summarize(
        &self,
        email: &CleanedMessage,
        max_input_tokens: usize,
    ) -> Result<StructuredSummary, SummarizeError> {
        let mut budget = max_input_tokens.max(1);
        let mut reduced = false;

        loop {
            let prompt = build_prompt(email, budget);
            let context = u32::try_from(budget + CONTEXT_OVERHEAD_TOKENS).unwrap_or(u32::MAX);
            debug!(
                id = %email.id,
                model = %self.model_id,
                budget,
                truncated = prompt.truncated,
                "Summarizing on device"
            );

            let result = summarize_with_repair(&prompt, &email.id, move |r| {
                self.call(r.with_context_tokens(context))
            })
            .await;

            match result {
                Ok(fields) => return Ok(build_summary(email, fields, &self.model_id)),
                Err(SummarizeError::Model(ModelError::ResourceExhausted { reason, .. })) => {
                    if reduced || budget <= 1 {
                        return Err(self.unavailable(format!(
                            "out of resources even at {budget} input tokens: {reason}"
                        )));
                    }
                    warn!(
                        id = %email.id,
                        budget,
                        reason = %reason,
                        "Local model exhausted resources, halving input budget"
                    );
                    budget /= 2;
                    reduced = true;
                }
                Err(SummarizeError::Model(e)) => return Err(self.unavailable(e.to_string())),
                Err(other) => return Err(other),
            }
        }
    }
}

// ── Ollama ──────────────────────────────────────────────────────────

/// Client for a local Ollama server's `/api/generate`.
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OllamaClient {
    pub const DEFAULT_BASE_URL: &'static str = "http://localhost:11434";

    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        Ok(Self {
            http: build_http(timeout, "ollama")?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout,
        })
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Does an Ollama error message describe memory or context exhaustion?
fn is_resource_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["out of memory", "insufficient memory", "cuda error", "requires more system memory", "context length"]
        .iter()
        .any(|needle| lower.contains(needle))
}

#[async_trait]
impl ModelClient for OllamaClient {
    fn provider(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ModelError> {
        let mut options = json!({
            "temperature": request.temperature,
            "num_predict": request.max_output_tokens,
        });
        if let Some(ctx) = request.context_tokens {
            options["num_ctx"] = json!(ctx);
        }

        let body = json!({
            "model": self.model,
            "system": request.system,
            "prompt": request.prompt,
            "stream": false,
            "format": "json",
            "options": options,
        });

        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| error_for_transport(self.provider(), self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.error)
                .unwrap_or_else(|_| text.clone());
            if is_resource_error(&message) {
                return Err(ModelError::ResourceExhausted {
                    provider: self.provider().to_string(),
                    reason: message,
                });
            }
            return Err(error_for_status(self.provider(), status, &headers, &message));
        }

        let parsed: GenerateResponse =
            response.json().await.map_err(|e| ModelError::InvalidResponse {
                provider: self.provider().to_string(),
                reason: e.to_string(),
            })?;
        Ok(parsed.response)
    }
}
