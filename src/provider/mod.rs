//! 厂商客户端模块：调度器所消费的统一“提交一个请求，得到一个补全”能力。
//!
//! # Provider Clients
//!
//! The dispatcher never speaks a wire protocol itself. It consumes one
//! [`ProviderClient`] per provider id, looked up through a [`ProviderRegistry`].
//! [`HttpProviderClient`] is the stock implementation (driver + pooled transport);
//! tests and embedders can register any other implementation.

pub mod http;

pub use http::HttpProviderClient;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::DispatchConfig;
use crate::types::{Request, Response};
use crate::{Error, Result};

/// Executes one request against one provider.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn provider_id(&self) -> &str;

    /// Single attempt. Every failure must come back as `Err`, never as a panic.
    async fn complete(&self, request: &Request) -> Result<String>;

    /// Single attempt folded into a [`Response`].
    async fn invoke(&self, request: &Request) -> Response {
        match self.complete(request).await {
            Ok(content) => Response::success(&request.id, content),
            Err(e) => Response::failure(&request.id, e),
        }
    }

    /// Release pooled resources; later calls fail with `Error::Closed`.
    async fn close(&self) {}
}

/// Provider id → client.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    clients: HashMap<String, Arc<dyn ProviderClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One [`HttpProviderClient`] per configured provider.
    pub fn from_config(config: &DispatchConfig) -> Result<Self> {
        let mut registry = Self::new();
        for (id, provider) in &config.providers {
            let client = HttpProviderClient::new(id, provider, config.defaults.clone())?;
            registry.register(Arc::new(client));
        }
        Ok(registry)
    }

    /// Insert or replace the client for `client.provider_id()`.
    pub fn register(&mut self, client: Arc<dyn ProviderClient>) -> &mut Self {
        self.clients.insert(client.provider_id().to_string(), client);
        self
    }

    /// Insert or replace the client under an explicit id.
    pub fn register_as(
        &mut self,
        provider_id: impl Into<String>,
        client: Arc<dyn ProviderClient>,
    ) -> &mut Self {
        self.clients.insert(provider_id.into(), client);
        self
    }

    pub fn get(&self, provider_id: &str) -> Result<Arc<dyn ProviderClient>> {
        self.clients
            .get(provider_id)
            .cloned()
            .ok_or_else(|| Error::unknown_provider(provider_id))
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.clients.contains_key(provider_id)
    }

    pub fn provider_ids(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub async fn close_all(&self) {
        for client in self.clients.values() {
            client.close().await;
        }
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.clients.keys().collect::<Vec<_>>())
            .finish()
    }
}
