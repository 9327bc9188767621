//! Google Gemini `generateContent` driver.
//!
//! The model is part of the path and the API key travels as a `key` query parameter.
//! Sampling knobs go under `generationConfig`.

use serde_json::Value;

use crate::config::ApiStyle;
use crate::transport::OutboundRequest;
use crate::types::{Request, RequestParameters};
use crate::Result;

use super::{merge_extra, non_empty, ProviderDriver};

#[derive(Debug, Default)]
pub struct GeminiDriver;

impl ProviderDriver for GeminiDriver {
    fn api_style(&self) -> ApiStyle {
        ApiStyle::Gemini
    }

    fn build_request(
        &self,
        request: &Request,
        model: &str,
        params: &RequestParameters,
        api_key: Option<&str>,
    ) -> Result<OutboundRequest> {
        let mut body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
        });

        let mut gen_config = serde_json::json!({});
        if let Some(t) = params.temperature {
            gen_config["temperature"] = serde_json::json!(t);
        }
        if let Some(mt) = params.max_tokens {
            gen_config["maxOutputTokens"] = serde_json::json!(mt);
        }
        if let Some(p) = params.top_p {
            gen_config["topP"] = serde_json::json!(p);
        }
        merge_extra(&mut gen_config, &params.extra);
        if gen_config != serde_json::json!({}) {
            body["generationConfig"] = gen_config;
        }

        let query = api_key
            .map(|k| vec![("key".to_string(), k.to_string())])
            .unwrap_or_default();

        Ok(OutboundRequest {
            path: format!("/v1beta/models/{}:generateContent", model),
            query,
            headers: Vec::new(),
            body,
        })
    }

    fn parse_response(&self, body: &Value) -> Result<String> {
        // { candidates: [{ content: { parts: [{text: "..."}] }, finishReason }], usageMetadata }
        let content = body
            .pointer("/candidates/0/content/parts")
            .and_then(|p| p.as_array())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                    .collect::<String>()
            });
        non_empty(content, body)
    }
}
