use async_trait::async_trait;
use tracing::debug;

use crate::config::{ProviderConfig, RequestDefaults};
use crate::drivers::{driver_for, ProviderDriver};
use crate::transport::HttpTransport;
use crate::types::Request;
use crate::Result;

use super::ProviderClient;

/// HTTP-backed provider client: a wire driver plus a pooled transport.
pub struct HttpProviderClient {
    provider_id: String,
    default_model: String,
    defaults: RequestDefaults,
    driver: Box<dyn ProviderDriver>,
    transport: HttpTransport,
}

impl HttpProviderClient {
    pub fn new(
        provider_id: &str,
        config: &ProviderConfig,
        defaults: RequestDefaults,
    ) -> Result<Self> {
        Ok(Self {
            provider_id: provider_id.to_string(),
            default_model: config.default_model.clone(),
            defaults,
            driver: driver_for(config.protocol),
            transport: HttpTransport::new(provider_id, config)?,
        })
    }

    pub fn driver(&self) -> &dyn ProviderDriver {
        self.driver.as_ref()
    }

    fn model_for<'a>(&'a self, request: &'a Request) -> &'a str {
        if request.model.is_empty() {
            &self.default_model
        } else {
            &request.model
        }
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn complete(&self, request: &Request) -> Result<String> {
        let model = self.model_for(request);
        let params = self.defaults.resolve(&request.parameters);
        let outbound = self
            .driver
            .build_request(request, model, &params, self.transport.api_key())?;
        debug!(
            provider = self.provider_id.as_str(),
            request_id = request.id.as_str(),
            model,
            "sending completion request"
        );
        let body = self.transport.post_json(&outbound).await?;
        self.driver.parse_response(&body)
    }

    async fn close(&self) {
        self.transport.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiStyle;
    use crate::Error;

    fn config(base_url: &str, protocol: ApiStyle) -> ProviderConfig {
        ProviderConfig {
            base_url: base_url.to_string(),
            api_key: Some("test-key".into()),
            port: None,
            protocol,
            default_model: "default-model".into(),
            requests_per_minute: 60,
            max_concurrent: 2,
            retry_delay_ms: 0,
            timeout_secs: Some(5),
        }
    }

    #[tokio::test]
    async fn test_openai_round_trip_uses_default_model() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "model": "default-model",
                "temperature": 0.7
            })))
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"pong"}}]}"#)
            .create_async()
            .await;

        let cfg = config(&server.url(), ApiStyle::OpenAi);
        let client = HttpProviderClient::new("openai", &cfg, RequestDefaults::default()).unwrap();
        let out = client.complete(&Request::new("r1", "openai", "ping")).await.unwrap();
        assert_eq!(out, "pong");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_ollama_error_status_surfaces() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/generate")
            .with_status(500)
            .with_body("model not loaded")
            .create_async()
            .await;

        let cfg = config(&server.url(), ApiStyle::Ollama);
        let client = HttpProviderClient::new("ollama", &cfg, RequestDefaults::default()).unwrap();
        let resp = client
            .invoke(&Request::new("r2", "ollama", "hi").with_model("llama3"))
            .await;
        assert_eq!(resp.request_id, "r2");
        assert!(resp.error.unwrap().contains("HTTP 500"));
    }

    #[tokio::test]
    async fn test_close_refuses_calls() {
        let client = HttpProviderClient::new(
            "gemini",
            &config("http://127.0.0.1:9", ApiStyle::Gemini),
            RequestDefaults::default(),
        )
        .unwrap();
        client.close().await;
        assert!(matches!(
            client.complete(&Request::new("r3", "gemini", "hi")).await,
            Err(Error::Closed)
        ));
    }
}
