//! Terminal outcome of a request and the progress triple derived from it.

use serde::{Deserialize, Serialize};

/// Terminal outcome of one request.
///
/// On success `content` is non-empty and `error` is `None`. On failure `error` carries
/// the rendered error; `content` may hold whatever partial text was received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub request_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn success(request_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            content: content.into(),
            error: None,
        }
    }

    pub fn failure(request_id: impl Into<String>, error: impl ToString) -> Self {
        Self {
            request_id: request_id.into(),
            content: String::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// `(request_id, content, error)` reported once per terminal resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub request_id: String,
    pub content: String,
    pub error: Option<String>,
}

impl From<&Response> for ProgressEvent {
    fn from(r: &Response) -> Self {
        Self {
            request_id: r.request_id.clone(),
            content: r.content.clone(),
            error: r.error.clone(),
        }
    }
}

impl From<ProgressEvent> for Response {
    fn from(ev: ProgressEvent) -> Self {
        Self {
            request_id: ev.request_id,
            content: ev.content,
            error: ev.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_renders_error() {
        let r = Response::failure("x", crate::Error::Cancelled);
        assert_eq!(r.error.as_deref(), Some("cancelled"));
        assert!(r.content.is_empty());
        assert!(r.is_error());
    }

    #[test]
    fn success_omits_error_field() {
        let r = Response::success("x", "done");
        let json = serde_json::to_string(&r).unwrap();
        assert!(!json.contains("error"));
        let ev = ProgressEvent::from(&r);
        assert_eq!(ev.content, "done");
        assert!(ev.error.is_none());
    }
}
