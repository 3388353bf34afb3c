//! Summarizer port.
//!
//! Turns a cleaned message into a [`StructuredSummary`]. Two engines share
//! the same prompt, parsing and format-repair logic:
//! - **Remote**: hosted OpenAI-compatible or Anthropic APIs, with backoff
//! - **On-device**: a local Ollama server, with one budget-halving retry
//!
//! Engine choice is explicit configuration; nothing falls back from one
//! engine to the other.

pub mod client;
pub mod engine;
pub mod on_device;
pub mod parse;
pub mod prompt;
pub mod remote;

pub use client::{CompletionRequest, ModelClient};
pub use on_device::{OllamaClient, OnDeviceSummarizer};
pub use remote::{AnthropicClient, OpenAiClient, RemoteSummarizer};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::config::SummarizerSettings;
use crate::error::{ConfigError, SummarizeError};
use crate::pipeline::types::{CleanedMessage, StructuredSummary};
use crate::retry::RetryPolicy;

/// Where summarization runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarizerEngine {
    #[serde(alias = "local")]
    OnDevice,
    #[default]
    Remote,
}

impl SummarizerEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnDevice => "on_device",
            Self::Remote => "remote",
        }
    }
}

impl std::str::FromStr for SummarizerEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "on_device" | "local" => Ok(Self::OnDevice),
            "remote" => Ok(Self::Remote),
            other => Err(format!("unknown summarizer engine: '{other}'")),
        }
    }
}

/// Hosted API family for the remote engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteProvider {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
}

impl RemoteProvider {
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o-mini",
            Self::Anthropic => "claude-3-5-haiku-latest",
        }
    }

    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

/// Default model for the on-device engine.
pub const DEFAULT_LOCAL_MODEL: &str = "llama3.2";

/// Summarization backend.
#[async_trait]
pub trait Summarizer: Send + Sync {
    fn engine(&self) -> SummarizerEngine;

    /// Identifier recorded on every summary, e.g. `openai/gpt-4o-mini`.
    fn model_identifier(&self) -> &str;

    /// Summarize one message, truncating its body to `max_input_tokens`.
    async fn summarize(
        &self,
        email: &CleanedMessage,
        max_input_tokens: usize,
    ) -> Result<StructuredSummary, SummarizeError>;
}

/// Create the configured summarizer.
///
/// The remote engine requires explicit consent because message content
/// leaves the machine.
pub fn create_summarizer(
    settings: &SummarizerSettings,
    retry: RetryPolicy,
) -> Result<Arc<dyn Summarizer>, ConfigError> {
    let timeout = Duration::from_secs(settings.timeout_secs);
    match settings.engine {
        SummarizerEngine::Remote => {
            if !settings.remote_consent {
                return Err(ConfigError::InvalidValue {
                    key: "summarizer.remote_consent".to_string(),
                    message: "remote summarization sends email content off this machine; \
                              set remote_consent = true to allow it"
                        .to_string(),
                });
            }
            let env_name = settings
                .api_key_env
                .clone()
                .unwrap_or_else(|| settings.provider.default_api_key_env().to_string());
            let api_key = std::env::var(&env_name)
                .map_err(|_| ConfigError::MissingEnvVar(env_name.clone()))?;
            create_remote(settings, SecretString::from(api_key), retry, timeout)
        }
        SummarizerEngine::OnDevice => {
            let model = settings.model.as_deref().unwrap_or(DEFAULT_LOCAL_MODEL);
            let base_url = settings
                .base_url
                .as_deref()
                .unwrap_or(OllamaClient::DEFAULT_BASE_URL);
            let client = OllamaClient::new(base_url, model, timeout).map_err(client_error)?;
            tracing::info!("Using on-device summarizer (model: {})", model);
            Ok(Arc::new(OnDeviceSummarizer::new(Arc::new(client), timeout)))
        }
    }
}

fn create_remote(
    settings: &SummarizerSettings,
    api_key: SecretString,
    retry: RetryPolicy,
    timeout: Duration,
) -> Result<Arc<dyn Summarizer>, ConfigError> {
    let model = settings
        .model
        .clone()
        .unwrap_or_else(|| settings.provider.default_model().to_string());

    let client: Arc<dyn ModelClient> = match settings.provider {
        RemoteProvider::OpenAi => {
            let base_url = settings
                .base_url
                .as_deref()
                .unwrap_or(OpenAiClient::DEFAULT_BASE_URL);
            Arc::new(OpenAiClient::new(base_url, api_key, &model, timeout).map_err(client_error)?)
        }
        RemoteProvider::Anthropic => {
            let base_url = settings
                .base_url
                .as_deref()
                .unwrap_or(AnthropicClient::DEFAULT_BASE_URL);
            Arc::new(
                AnthropicClient::new(base_url, api_key, &model, timeout).map_err(client_error)?,
            )
        }
    };

    tracing::info!(
        "Using remote summarizer ({} / {})",
        client.provider(),
        model
    );
    Ok(Arc::new(
        RemoteSummarizer::new(client, retry, timeout).with_temperature(settings.temperature),
    ))
}

fn client_error(e: crate::error::ModelError) -> ConfigError {
    ConfigError::InvalidValue {
        key: "summarizer".to_string(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_parses_aliases() {
        assert_eq!("local".parse::<SummarizerEngine>().unwrap(), SummarizerEngine::OnDevice);
        assert_eq!(" Remote ".parse::<SummarizerEngine>().unwrap(), SummarizerEngine::Remote);
        assert!("cloud".parse::<SummarizerEngine>().is_err());
    }

    #[test]
    fn remote_without_consent_is_rejected() {
        let settings = SummarizerSettings {
            engine: SummarizerEngine::Remote,
            remote_consent: false,
            ..Default::default()
        };
        let err = create_summarizer(&settings, RetryPolicy::default()).err().unwrap();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "summarizer.remote_consent"));
    }

    #[test]
    fn remote_without_key_reports_env_var() {
        let settings = SummarizerSettings {
            engine: SummarizerEngine::Remote,
            remote_consent: true,
            api_key_env: Some("MAIL_DIGEST_TEST_KEY_THAT_IS_NEVER_SET".into()),
            ..Default::default()
        };
        let err = create_summarizer(&settings, RetryPolicy::default()).err().unwrap();
        assert!(
            matches!(err, ConfigError::MissingEnvVar(ref name) if name == "MAIL_DIGEST_TEST_KEY_THAT_IS_NEVER_SET")
        );
    }

    #[test]
    fn on_device_builds_without_credentials() {
        let settings = SummarizerSettings {
            engine: SummarizerEngine::OnDevice,
            ..Default::default()
        };
        let summarizer = create_summarizer(&settings, RetryPolicy::default()).unwrap();
        assert_eq!(summarizer.engine(), SummarizerEngine::OnDevice);
        assert_eq!(summarizer.model_identifier(), "local/llama3.2");
    }

    #[test]
    fn provider_serde_names() {
        let json = serde_json::to_string(&RemoteProvider::OpenAi).unwrap();
        assert_eq!(json, "\"openai\"");
        let parsed: RemoteProvider = serde_json::from_str("\"anthropic\"").unwrap();
        assert_eq!(parsed, RemoteProvider::Anthropic);
    }
}
