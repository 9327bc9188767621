//! Provider 驱动层 — 把统一的 Request 转换为各厂商的 HTTP 请求体并解析补全结果
//!
//! Provider driver layer. A driver only knows the wire shape of one API style:
//! how to turn a [`Request`] into an [`OutboundRequest`] and how to pull the completion
//! text out of the JSON reply. Networking lives in [`crate::transport`], limits and
//! retries in the dispatcher.

pub mod anthropic;
pub mod gemini;
pub mod ollama;

use serde_json::Value;
use std::collections::BTreeMap;

use crate::config::ApiStyle;
use crate::transport::OutboundRequest;
use crate::types::{Request, RequestParameters};
use crate::{Error, Result};

pub use anthropic::AnthropicDriver;
pub use gemini::GeminiDriver;
pub use ollama::OllamaDriver;

/// Wire-format adapter for one provider API style.
///
/// `params` arrive with defaults already resolved; `model` is never empty.
pub trait ProviderDriver: Send + Sync + std::fmt::Debug {
    fn api_style(&self) -> ApiStyle;

    fn build_request(
        &self,
        request: &Request,
        model: &str,
        params: &RequestParameters,
        api_key: Option<&str>,
    ) -> Result<OutboundRequest>;

    /// Extract the completion text. Empty text is an error.
    fn parse_response(&self, body: &Value) -> Result<String>;
}

/// Select the driver for a configured API style.
pub fn driver_for(style: ApiStyle) -> Box<dyn ProviderDriver> {
    match style {
        ApiStyle::OpenAi => Box::new(OpenAiDriver),
        ApiStyle::Anthropic => Box::new(AnthropicDriver),
        ApiStyle::Gemini => Box::new(GeminiDriver),
        ApiStyle::Ollama => Box::new(OllamaDriver),
    }
}

/// Copy pass-through parameters into a JSON object, never overwriting known keys.
pub(crate) fn merge_extra(target: &mut Value, extra: &BTreeMap<String, Value>) {
    if let Value::Object(map) = target {
        for (k, v) in extra {
            map.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
}

pub(crate) fn non_empty(content: Option<String>, body: &Value) -> Result<String> {
    match content {
        Some(text) if !text.is_empty() => Ok(text),
        _ => Err(Error::Remote {
            status: 200,
            message: format!("empty completion: {}", truncate(body.to_string(), 256)),
        }),
    }
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
    s
}

/// OpenAI-compatible chat completions — works for OpenAI, DeepSeek, vLLM, LM Studio, etc.
#[derive(Debug, Default)]
pub struct OpenAiDriver;

impl ProviderDriver for OpenAiDriver {
    fn api_style(&self) -> ApiStyle {
        ApiStyle::OpenAi
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
            "messages": [{ "role": "user", "content": request.prompt }],
            "stream": false,
        });
        if let Some(t) = params.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if let Some(mt) = params.max_tokens {
            body["max_tokens"] = serde_json::json!(mt);
        }
        if let Some(p) = params.top_p {
            body["top_p"] = serde_json::json!(p);
        }
        merge_extra(&mut body, &params.extra);

        let mut headers = Vec::new();
        if let Some(key) = api_key {
            headers.push(("authorization".to_string(), format!("Bearer {}", key)));
        }

        Ok(OutboundRequest {
            path: "/v1/chat/completions".into(),
            query: Vec::new(),
            headers,
            body,
        })
    }

    fn parse_response(&self, body: &Value) -> Result<String> {
        let content = body
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .map(String::from);
        non_empty(content, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved() -> RequestParameters {
        crate::config::RequestDefaults::default().resolve(&RequestParameters::default())
    }

    #[test]
    fn test_openai_body_shape() {
        let mut req = Request::new("1", "openai", "Hello");
        req.parameters.extra.insert("seed".into(), serde_json::json!(42));
        req.parameters.extra.insert("model".into(), serde_json::json!("ignored"));
        let mut params = resolved();
        params.extra = req.parameters.extra.clone();

        let out = OpenAiDriver
            .build_request(&req, "gpt-4o-mini", &params, Some("sk-test"))
            .unwrap();
        assert_eq!(out.path, "/v1/chat/completions");
        assert_eq!(out.body["model"], "gpt-4o-mini");
        assert_eq!(out.body["messages"][0]["content"], "Hello");
        assert_eq!(out.body["max_tokens"], 1024);
        assert_eq!(out.body["seed"], 42);
        assert!(out
            .headers
            .contains(&("authorization".to_string(), "Bearer sk-test".to_string())));
    }

    #[test]
    fn test_openai_parse() {
        let body = serde_json::json!({"choices": [{"message": {"content": "Hi there"}}]});
        assert_eq!(OpenAiDriver.parse_response(&body).unwrap(), "Hi there");

        let empty = serde_json::json!({"choices": []});
        assert!(OpenAiDriver.parse_response(&empty).is_err());
    }

    #[test]
    fn test_driver_for_matches_style() {
        for style in [
            ApiStyle::OpenAi,
            ApiStyle::Anthropic,
            ApiStyle::Gemini,
            ApiStyle::Ollama,
        ] {
            assert_eq!(driver_for(style).api_style(), style);
        }
    }
}
