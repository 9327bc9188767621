//! Assembles a [`RequestDispatcher`] from profiles and provider clients.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

use super::{Inner, RequestDispatcher};
use crate::config::{
    DispatchConfig, ProviderProfile, DEFAULT_MAX_ATTEMPTS, DEFAULT_PROGRESS_BUFFER,
};
use crate::provider::{ProviderClient, ProviderRegistry};
use crate::resilience::ProviderLimits;
use crate::{Error, ErrorContext, Result};

/// Builder for [`RequestDispatcher`].
///
/// ```rust,no_run
/// use prompt_dispatch::config::DispatchConfig;
/// use prompt_dispatch::dispatch::DispatcherBuilder;
///
/// # async fn demo() -> prompt_dispatch::Result<()> {
/// let config = DispatchConfig::from_path("dispatch.yaml").await?.with_env_overrides();
/// let dispatcher = DispatcherBuilder::from_config(&config)?.build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DispatcherBuilder {
    providers: ProviderRegistry,
    profiles: HashMap<String, ProviderProfile>,
    max_attempts: u32,
    attempt_timeout: Option<Duration>,
    progress_buffer: usize,
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self {
            providers: ProviderRegistry::new(),
            profiles: HashMap::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_timeout: None,
            progress_buffer: DEFAULT_PROGRESS_BUFFER,
        }
    }
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Profiles, engine knobs and one HTTP client per configured provider.
    pub fn from_config(config: &DispatchConfig) -> Result<Self> {
        let registry = ProviderRegistry::from_config(config)?;
        Ok(Self::limits_from_config(config)?.registry(registry))
    }

    /// Profiles and engine knobs only; clients are registered separately.
    pub fn limits_from_config(config: &DispatchConfig) -> Result<Self> {
        config.validate()?;
        let mut builder = Self::new()
            .max_attempts(config.max_attempts)
            .attempt_timeout(config.attempt_timeout())
            .progress_buffer(config.progress_buffer);
        for (id, provider) in &config.providers {
            builder = builder.profile(provider.profile(id)?);
        }
        Ok(builder)
    }

    /// Register a client together with its limits.
    pub fn provider(mut self, profile: ProviderProfile, client: Arc<dyn ProviderClient>) -> Self {
        self.providers.register_as(profile.provider_id.clone(), client);
        self.profiles.insert(profile.provider_id.clone(), profile);
        self
    }

    pub fn profile(mut self, profile: ProviderProfile) -> Self {
        self.profiles.insert(profile.provider_id.clone(), profile);
        self
    }

    /// Merge every client of `registry`, replacing clients with the same id.
    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        for id in registry.provider_ids() {
            if let Ok(client) = registry.get(id) {
                self.providers.register_as(id, client);
            }
        }
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn progress_buffer(mut self, capacity: usize) -> Self {
        self.progress_buffer = capacity;
        self
    }

    pub fn build(self) -> Result<RequestDispatcher> {
        if self.max_attempts == 0 {
            return Err(Error::configuration_with_context(
                "max_attempts must be at least 1",
                ErrorContext::new()
                    .with_field_path("max_attempts")
                    .with_source("dispatcher_builder"),
            ));
        }
        if self.progress_buffer == 0 {
            return Err(Error::configuration_with_context(
                "progress_buffer must be at least 1",
                ErrorContext::new()
                    .with_field_path("progress_buffer")
                    .with_source("dispatcher_builder"),
            ));
        }

        // A provider needs both a profile and a client; anything else is unknown at dispatch time.
        let limits: HashMap<String, Arc<ProviderLimits>> = self
            .profiles
            .into_values()
            .filter(|p| self.providers.contains(&p.provider_id))
            .map(|p| (p.provider_id.clone(), Arc::new(ProviderLimits::new(p))))
            .collect();

        info!(
            providers = limits.len(),
            max_attempts = self.max_attempts,
            attempt_timeout_ms = self.attempt_timeout.map(|d| d.as_millis() as u64),
            "request dispatcher ready"
        );

        Ok(RequestDispatcher {
            inner: Arc::new(Inner {
                providers: self.providers,
                limits,
                max_attempts: self.max_attempts,
                attempt_timeout: self.attempt_timeout,
                progress_buffer: self.progress_buffer,
                active: Mutex::new(HashMap::new()),
                failed: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        })
    }
}
