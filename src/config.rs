//! Configuration types.
//!
//! Loaded from `~/.mail-digest/config.toml` when present, then overridden by
//! `MAIL_DIGEST_*` environment variables, then validated as a whole so every
//! problem is reported at once.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::pipeline::types::{FetchMode, FetchRules};
use crate::retry::RetryPolicy;
use crate::summarizer::{RemoteProvider, SummarizerEngine};

/// Full application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub fetch: FetchSettings,
    pub source: SourceSettings,
    pub summarizer: SummarizerSettings,
    pub retry: RetrySettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

/// Which messages to pull per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub mode: FetchMode,
    pub max_messages: usize,
    pub days_back: u32,
    /// Upper bound on a single fetch call.
    pub timeout_secs: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            mode: FetchMode::Unread,
            max_messages: 20,
            days_back: 7,
            timeout_secs: 30,
        }
    }
}

impl FetchSettings {
    pub fn rules(&self) -> FetchRules {
        FetchRules {
            mode: self.mode,
            max_messages: self.max_messages,
            days_back: self.days_back,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Where messages come from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Maildir root holding `new/` and `cur/`.
    pub maildir: Option<PathBuf>,
}

/// Summarization engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerSettings {
    pub engine: SummarizerEngine,
    pub max_input_tokens: usize,
    /// Remote engine only.
    pub provider: RemoteProvider,
    /// Falls back to the engine's default model.
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// Environment variable holding the API key. Defaults per provider.
    pub api_key_env: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
    /// Run the summarizer during dry runs and report the result.
    pub preview_in_dry_run: bool,
    /// Explicit opt-in to sending message content to a hosted model.
    pub remote_consent: bool,
}

impl Default for SummarizerSettings {
    fn default() -> Self {
        Self {
            engine: SummarizerEngine::Remote,
            max_input_tokens: 512,
            provider: RemoteProvider::OpenAi,
            model: None,
            base_url: None,
            api_key_env: None,
            timeout_secs: 60,
            temperature: crate::summarizer::client::DEFAULT_TEMPERATURE,
            preview_in_dry_run: false,
            remote_consent: false,
        }
    }
}

/// Backoff for network- and disk-bound stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// Summary storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub summaries_dir: PathBuf,
    /// Maintain the libSQL lookup index next to the JSON files.
    pub use_index: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            summaries_dir: app_dir().join("summaries"),
            use_index: true,
        }
    }
}

/// Log output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Directory for rotated log files. Stderr only when unset.
    pub dir: Option<PathBuf>,
    /// Daily log files kept before the oldest is deleted.
    pub retention_days: usize,
    /// Default filter when `RUST_LOG` is not set.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            dir: Some(app_dir().join("logs")),
            retention_days: 7,
            level: "info".to_string(),
        }
    }
}

/// `~/.mail-digest`, or `./.mail-digest` when `HOME` is unset.
pub fn app_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mail-digest")
}

impl AppConfig {
    /// Default config file location.
    pub fn default_path() -> PathBuf {
        app_dir().join("config.toml")
    }

    /// Load, apply environment overrides and validate.
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(contents) => {
                let config = Self::from_toml(&contents)?;
                debug!(path = %path.display(), "Loaded config from file");
                config
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `MAIL_DIGEST_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MAIL_DIGEST_MAX_MESSAGES") {
            self.fetch.max_messages = parse_var("MAIL_DIGEST_MAX_MESSAGES", &v)?;
        }
        if let Some(v) = lookup("MAIL_DIGEST_FETCH_MODE") {
            self.fetch.mode = v.parse().map_err(|message| ConfigError::InvalidValue {
                key: "MAIL_DIGEST_FETCH_MODE".to_string(),
                message,
            })?;
        }
        if let Some(v) = lookup("MAIL_DIGEST_DAYS_BACK") {
            self.fetch.days_back = parse_var("MAIL_DIGEST_DAYS_BACK", &v)?;
        }
        if let Some(v) = lookup("MAIL_DIGEST_ENGINE") {
            self.summarizer.engine = v.parse().map_err(|message| ConfigError::InvalidValue {
                key: "MAIL_DIGEST_ENGINE".to_string(),
                message,
            })?;
        }
        if let Some(v) = lookup("MAIL_DIGEST_MODEL") {
            self.summarizer.model = Some(v);
        }
        if let Some(v) = lookup("MAIL_DIGEST_MAX_INPUT_TOKENS") {
            self.summarizer.max_input_tokens = parse_var("MAIL_DIGEST_MAX_INPUT_TOKENS", &v)?;
        }
        if let Some(v) = lookup("MAIL_DIGEST_REMOTE_CONSENT") {
            self.summarizer.remote_consent = parse_var("MAIL_DIGEST_REMOTE_CONSENT", &v)?;
        }
        if let Some(v) = lookup("MAIL_DIGEST_RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_var("MAIL_DIGEST_RETRY_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("MAIL_DIGEST_RETRY_BASE_DELAY_MS") {
            self.retry.base_delay_ms = parse_var("MAIL_DIGEST_RETRY_BASE_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("MAIL_DIGEST_RETRY_MAX_DELAY_MS") {
            self.retry.max_delay_ms = parse_var("MAIL_DIGEST_RETRY_MAX_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("MAIL_DIGEST_SUMMARIES_DIR") {
            self.storage.summaries_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("MAIL_DIGEST_MAILDIR") {
            self.source.maildir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("MAIL_DIGEST_LOG_DIR") {
            self.logging.dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Check every setting and report all problems together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(
            self.fetch
                .rules()
                .validate()
                .into_iter()
                .map(|e| format!("fetch.{e}")),
        );
        if self.fetch.timeout_secs == 0 {
            errors.push("fetch.timeout_secs must be positive".to_string());
        }

        if self.summarizer.max_input_tokens == 0 {
            errors.push("summarizer.max_input_tokens must be positive".to_string());
        }
        if self.summarizer.timeout_secs == 0 {
            errors.push("summarizer.timeout_secs must be positive".to_string());
        }
        if !(0.0..=2.0).contains(&self.summarizer.temperature) {
            errors.push("summarizer.temperature must be between 0.0 and 2.0".to_string());
        }
        if self.summarizer.model.as_deref().is_some_and(|m| m.trim().is_empty()) {
            errors.push("summarizer.model must not be empty".to_string());
        }
        if self.summarizer.engine == SummarizerEngine::Remote && !self.summarizer.remote_consent {
            errors.push(
                "summarizer.remote_consent must be true to use the remote engine".to_string(),
            );
        }

        if self.retry.max_attempts == 0 {
            errors.push("retry.max_attempts must be positive".to_string());
        }
        if self.retry.base_delay_ms == 0 {
            errors.push("retry.base_delay_ms must be positive".to_string());
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            errors.push("retry.max_delay_ms must be at least retry.base_delay_ms".to_string());
        }

        if self.storage.summaries_dir.as_os_str().is_empty() {
            errors.push("storage.summaries_dir must be set".to_string());
        }
        if self.logging.retention_days == 0 {
            errors.push("logging.retention_days must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{value}': {e}"),
        })
}
