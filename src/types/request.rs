//! Prompt request submitted to the dispatcher.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sampling parameters for one request.
///
/// Unset fields fall back to [`crate::config::RequestDefaults`] inside the provider adapter.
/// `extra` is forwarded verbatim into the provider body for knobs not modelled here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// One prompt addressed to one provider. `id` must be unique within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub provider_id: String,
    pub prompt: String,
    /// Empty means "the provider's default model".
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub parameters: RequestParameters,
}

impl Request {
    pub fn new(
        id: impl Into<String>,
        provider_id: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            provider_id: provider_id.into(),
            prompt: prompt.into(),
            model: String::new(),
            parameters: RequestParameters::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.parameters.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.parameters.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.parameters.top_p = Some(top_p);
        self
    }

    pub fn with_parameters(mut self, parameters: RequestParameters) -> Self {
        self.parameters = parameters;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_parameters_flatten() {
        let json = serde_json::json!({
            "id": "a",
            "provider_id": "openai",
            "prompt": "hi",
            "parameters": {"temperature": 0.5, "seed": 7}
        });
        let req: Request = serde_json::from_value(json).unwrap();
        assert_eq!(req.model, "");
        assert_eq!(req.parameters.temperature, Some(0.5));
        assert_eq!(req.parameters.extra.get("seed"), Some(&serde_json::json!(7)));
    }

    #[test]
    fn builder_sets_fields() {
        let req = Request::new("b", "ollama", "hello")
            .with_model("llama3")
            .with_max_tokens(64)
            .with_top_p(0.9);
        assert_eq!(req.model, "llama3");
        assert_eq!(req.parameters.max_tokens, Some(64));
        assert_eq!(req.parameters.top_p, Some(0.9));
        assert!(req.parameters.temperature.is_none());
    }
}
