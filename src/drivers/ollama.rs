//! Local model server driver (Ollama `/api/generate`, non-streaming).

use serde_json::Value;

use crate::config::ApiStyle;
use crate::transport::OutboundRequest;
use crate::types::{Request, RequestParameters};
use crate::Result;

use super::{merge_extra, non_empty, ProviderDriver};

#[derive(Debug, Default)]
pub struct OllamaDriver;

impl ProviderDriver for OllamaDriver {
    fn api_style(&self) -> ApiStyle {
        ApiStyle::Ollama
    }

    fn build_request(
        &self,
        request: &Request,
        model: &str,
        params: &RequestParameters,
        _api_key: Option<&str>,
    ) -> Result<OutboundRequest> {
        let mut options = serde_json::json!({});
        if let Some(t) = params.temperature {
            options["temperature"] = serde_json::json!(t);
        }
        if let Some(mt) = params.max_tokens {
            options["num_predict"] = serde_json::json!(mt);
        }
        if let Some(p) = params.top_p {
            options["top_p"] = serde_json::json!(p);
        }
        merge_extra(&mut options, &params.extra);

        Ok(OutboundRequest {
            path: "/api/generate".into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: serde_json::json!({
                "model": model,
                "prompt": request.prompt,
                "stream": false,
                "options": options,
            }),
        })
    }

    fn parse_response(&self, body: &Value) -> Result<String> {
        let content = body
            .get("response")
            .and_then(|v| v.as_str())
            .map(String::from);
        non_empty(content, body)
    }
}
