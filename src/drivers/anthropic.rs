//! Anthropic Messages API driver.
//!
//! Differences from OpenAI that matter here:
//! - Auth is `x-api-key` plus a pinned `anthropic-version` header.
//! - `max_tokens` is required, not optional.
//! - Response text lives in typed blocks: `content[*].text`.

use serde_json::Value;

use crate::config::ApiStyle;
use crate::transport::OutboundRequest;
use crate::types::{Request, RequestParameters};
use crate::Result;

use super::{merge_extra, non_empty, ProviderDriver};

const DEFAULT_MAX_TOKENS: u32 = 4096;
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Default)]
pub struct AnthropicDriver;

impl ProviderDriver for AnthropicDriver {
    fn api_style(&self) -> ApiStyle {
        ApiStyle::Anthropic
    }

    fn build_request(
        &self,
        request: &Request,
        model: &str,
        params: &RequestParameters,
        api_key: Option<&str>,
    ) -> Result<OutboundRequest> {
        let mut body = serde_json::json!({
            "model": model,
            "messages": [{
                "role": "user",
                "content": [{ "type": "text", "text": request.prompt }],
            }],
            "max_tokens": params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        if let Some(t) = params.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if let Some(p) = params.top_p {
            body["top_p"] = serde_json::json!(p);
        }
        merge_extra(&mut body, &params.extra);

        let mut headers = vec![("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string())];
        if let Some(key) = api_key {
            headers.push(("x-api-key".to_string(), key.to_string()));
        }

        Ok(OutboundRequest {
            path: "/v1/messages".into(),
            query: Vec::new(),
            headers,
            body,
        })
    }

    fn parse_response(&self, body: &Value) -> Result<String> {
        // { content: [{type: "text", text: "..."}], stop_reason, usage }
        let content = body.get("content").and_then(|c| c.as_array()).map(|blocks| {
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect::<String>()
        });
        non_empty(content, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_max_tokens_and_headers() {
        let req = Request::new("1", "anthropic", "Hi");
        let out = AnthropicDriver
            .build_request(&req, "claude-3-5-haiku", &RequestParameters::default(), Some("k"))
            .unwrap();
        assert_eq!(out.path, "/v1/messages");
        assert_eq!(out.body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(out.body["messages"][0]["content"][0]["text"], "Hi");
        assert!(out.body.get("temperature").is_none());
        assert!(out
            .headers
            .contains(&("x-api-key".to_string(), "k".to_string())));
    }

    #[test]
    fn test_parse_joins_text_blocks() {
        let body = serde_json::json!({
            "content": [
                {"type": "text", "text": "Hello, "},
                {"type": "tool_use", "id": "t"},
                {"type": "text", "text": "world"}
            ]
        });
        assert_eq!(AnthropicDriver.parse_response(&body).unwrap(), "Hello, world");
        assert!(AnthropicDriver
            .parse_response(&serde_json::json!({"content": []}))
            .is_err());
    }
}
