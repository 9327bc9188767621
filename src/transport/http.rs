use crate::config::ProviderConfig;
use crate::transport::TransportError;
use crate::{Error, Result};
use keyring::Entry;
use reqwest::Proxy;
use serde_json::Value;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// Longest slice of an error body kept in `Error::Remote`.
const MAX_ERROR_BODY: usize = 2048;

/// Provider-agnostic description of one JSON POST.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    /// Path appended to the provider base URL, model already interpolated.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

/// Pooled HTTP client bound to one provider endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    provider_id: String,
    base_url: String,
    api_key: Option<String>,
    closed: AtomicBool,
}

impl HttpTransport {
    pub fn new(provider_id: &str, config: &ProviderConfig) -> Result<Self> {
        let base_url = config
            .endpoint(provider_id)?
            .as_str()
            .trim_end_matches('/')
            .to_string();
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| Self::get_api_key(provider_id));

        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout())
            .pool_max_idle_per_host(
                env::var("PROMPT_DISPATCH_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(32),
            )
            .pool_idle_timeout(Some(Duration::from_secs(
                env::var("PROMPT_DISPATCH_HTTP_POOL_IDLE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(90),
            )));

        if let Ok(proxy_url) = env::var("PROMPT_DISPATCH_PROXY_URL") {
            if let Ok(proxy) = Proxy::all(&proxy_url) {
                builder = builder.proxy(proxy);
            }
        }

        let client = builder
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self {
            client,
            provider_id: provider_id.to_string(),
            base_url,
            api_key,
            closed: AtomicBool::new(false),
        })
    }

    fn get_api_key(provider_id: &str) -> Option<String> {
        // 1. Try Keyring
        if let Ok(entry) = Entry::new("prompt-dispatch", provider_id) {
            if let Ok(key) = entry.get_password() {
                return Some(key);
            }
        }

        // 2. Try Environment Variable (PROVIDER_API_KEY)
        let env_var = format!("{}_API_KEY", provider_id.to_uppercase().replace('-', "_"));
        env::var(env_var).ok().filter(|k| !k.is_empty())
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Refuse further calls. Idle pooled connections go away with the last client handle.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// POST a JSON body and return the parsed JSON response.
    ///
    /// Non-2xx statuses become `Error::Remote` carrying the (truncated) body.
    pub async fn post_json(&self, request: &OutboundRequest) -> Result<Value> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let url = format!("{}{}", self.base_url, request.path);
        let mut req = self.client.post(&url).json(&request.body);
        if !request.query.is_empty() {
            req = req.query(&request.query);
        }
        for (name, value) in &request.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        let start = std::time::Instant::now();
        let resp = req
            .send()
            .await
            .map_err(|e| Error::Transport(TransportError::Http(e)))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::Transport(TransportError::Http(e)))?;

        debug!(
            provider = self.provider_id.as_str(),
            http_status = status.as_u16(),
            path = request.path.as_str(),
            duration_ms = start.elapsed().as_millis() as u64,
            "provider call returned"
        );

        if !status.is_success() {
            let mut message = text;
            if message.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !message.is_char_boundary(cut) {
                    cut -= 1;
                }
                message.truncate(cut);
            }
            return Err(Error::Remote {
                status: status.as_u16(),
                message,
            });
        }

        Ok(serde_json::from_str(&text)?)
    }
}
