//! 配置模块：提供厂商连接参数、限流参数与全局请求默认值。
//!
//! # Configuration Module
//!
//! Provider configuration is loaded once at process start (YAML, like protocol manifests)
//! and then treated as immutable. The dispatcher only ever sees the derived
//! [`ProviderProfile`]s; the HTTP adapters see the full [`ProviderConfig`].
//!
//! ```yaml
//! max_attempts: 3
//! defaults:
//!   temperature: 0.7
//!   max_tokens: 1024
//!   top_p: 1.0
//! providers:
//!   ollama:
//!     base_url: http://localhost
//!     port: 11434
//!     protocol: ollama
//!     default_model: llama3
//!     requests_per_minute: 120
//!     max_concurrent: 2
//!     retry_delay_ms: 500
//! ```
//!
//! Environment overrides (applied by [`DispatchConfig::with_env_overrides`]):
//! - `PROMPT_DISPATCH_MAX_ATTEMPTS`
//! - `PROMPT_DISPATCH_ATTEMPT_TIMEOUT_MS`

use crate::types::RequestParameters;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_PROGRESS_BUFFER: usize = 64;

/// Wire protocol spoken by a provider endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiStyle {
    #[serde(alias = "openai_compatible")]
    OpenAi,
    Anthropic,
    Gemini,
    Ollama,
}

/// Limits the dispatcher enforces for one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub provider_id: String,
    pub requests_per_minute: u32,
    pub max_concurrent: usize,
    pub retry_delay_ms: u64,
}

impl ProviderProfile {
    pub fn new(
        provider_id: impl Into<String>,
        requests_per_minute: u32,
        max_concurrent: usize,
        retry_delay_ms: u64,
    ) -> Result<Self> {
        let provider_id = provider_id.into();
        if requests_per_minute == 0 {
            return Err(Error::configuration_with_context(
                "requests_per_minute must be greater than zero",
                ErrorContext::new()
                    .with_field_path(format!("providers.{}.requests_per_minute", provider_id))
                    .with_source("provider_profile"),
            ));
        }
        if max_concurrent == 0 {
            return Err(Error::configuration_with_context(
                "max_concurrent must be greater than zero",
                ErrorContext::new()
                    .with_field_path(format!("providers.{}.max_concurrent", provider_id))
                    .with_source("provider_profile"),
            ));
        }
        Ok(Self {
            provider_id,
            requests_per_minute,
            max_concurrent,
            retry_delay_ms,
        })
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Connection and limit settings for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Overrides the port in `base_url` when set (local model servers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub protocol: ApiStyle,
    pub default_model: String,
    pub requests_per_minute: u32,
    pub max_concurrent: usize,
    #[serde(default)]
    pub retry_delay_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl ProviderConfig {
    /// Base URL with the `port` override applied.
    pub fn endpoint(&self, provider_id: &str) -> Result<Url> {
        let ctx = || {
            ErrorContext::new()
                .with_field_path(format!("providers.{}.base_url", provider_id))
                .with_source("config_loader")
        };
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            Error::configuration_with_context(format!("invalid base_url: {}", e), ctx())
        })?;
        if let Some(port) = self.port {
            url.set_port(Some(port)).map_err(|_| {
                Error::configuration_with_context("base_url cannot carry a port", ctx())
            })?;
        }
        Ok(url)
    }

    pub fn profile(&self, provider_id: &str) -> Result<ProviderProfile> {
        ProviderProfile::new(
            provider_id,
            self.requests_per_minute,
            self.max_concurrent,
            self.retry_delay_ms,
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(30))
    }
}

/// Global sampling defaults for requests that omit a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDefaults {
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_top_p() -> f64 {
    1.0
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
        }
    }
}

impl RequestDefaults {
    /// Fill every unset sampling parameter from the defaults.
    pub fn resolve(&self, params: &RequestParameters) -> RequestParameters {
        RequestParameters {
            temperature: Some(params.temperature.unwrap_or(self.temperature)),
            max_tokens: Some(params.max_tokens.unwrap_or(self.max_tokens)),
            top_p: Some(params.top_p.unwrap_or(self.top_p)),
            extra: params.extra.clone(),
        }
    }
}

/// Top-level configuration for the dispatch engine and its provider adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub defaults: RequestDefaults,
    /// Total attempts per request, first try included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_timeout_ms: Option<u64>,
    /// Capacity of the bounded progress channel handed out by `start_batch`.
    #[serde(default = "default_progress_buffer")]
    pub progress_buffer: usize,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_progress_buffer() -> usize {
    DEFAULT_PROGRESS_BUFFER
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            providers: BTreeMap::new(),
            defaults: RequestDefaults::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_timeout_ms: None,
            progress_buffer: DEFAULT_PROGRESS_BUFFER,
        }
    }
}

impl DispatchConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let cfg: DispatchConfig = serde_yaml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::configuration_with_context(
                format!("failed to read config: {}", e),
                ErrorContext::new()
                    .with_details(path.display().to_string())
                    .with_source("config_loader"),
            )
        })?;
        Self::from_yaml_str(&content)
    }

    /// Apply `PROMPT_DISPATCH_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(n) = std::env::var("PROMPT_DISPATCH_MAX_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .filter(|n| *n > 0)
        {
            self.max_attempts = n;
        }
        if let Some(ms) = std::env::var("PROMPT_DISPATCH_ATTEMPT_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            self.attempt_timeout_ms = if ms == 0 { None } else { Some(ms) };
        }
        self
    }

    pub fn with_provider(mut self, id: impl Into<String>, provider: ProviderConfig) -> Self {
        self.providers.insert(id.into(), provider);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::configuration_with_context(
                "max_attempts must be at least 1",
                ErrorContext::new()
                    .with_field_path("max_attempts")
                    .with_source("config_validator"),
            ));
        }
        if self.progress_buffer == 0 {
            return Err(Error::configuration_with_context(
                "progress_buffer must be at least 1",
                ErrorContext::new()
                    .with_field_path("progress_buffer")
                    .with_source("config_validator"),
            ));
        }
        for (id, provider) in &self.providers {
            provider.profile(id)?;
            provider.endpoint(id)?;
        }
        Ok(())
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }

    pub fn profile(&self, provider_id: &str) -> Option<Result<ProviderProfile>> {
        self.providers
            .get(provider_id)
            .map(|p| p.profile(provider_id))
    }
}
