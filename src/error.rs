use crate::transport::TransportError;
use thiserror::Error;

/// Sentinel written into `Response.error` for requests resolved by `cancel_requests`.
pub const CANCELLED: &str = "cancelled";

/// Sentinel written into `Response.error` for requests resolved by `close`.
pub const CLOSED: &str = "closed";

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "providers.ollama.base_url")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "config_loader", "dispatcher")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Coarse error taxonomy used by the retry policy and by callers deciding what to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Unknown provider or model, bad config. Never retried.
    Configuration,
    /// Timeout, 5xx, 429, connection reset.
    TransientProvider,
    /// Other 4xx, malformed provider payloads.
    PermanentProvider,
    /// Synthetic: produced by `cancel_requests` or `close`. Never retried.
    Cancellation,
    /// Caller misuse of the engine (duplicate ids, calls after close).
    Misuse,
}

/// Unified error type for the dispatch engine and its provider adapters.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Network transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Remote error: HTTP {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Attempt timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },

    #[error("cancelled")]
    Cancelled,

    #[error("closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Unknown provider id: fatal to the single request that named it.
    pub fn unknown_provider(provider_id: &str) -> Self {
        Error::configuration_with_context(
            format!("unknown provider '{}'", provider_id),
            ErrorContext::new()
                .with_field_path("request.provider_id")
                .with_source("provider_registry"),
        )
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::Validation { context, .. } => {
                Some(context)
            }
            _ => None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Configuration { .. } | Error::Yaml(_) => ErrorCategory::Configuration,
            Error::Validation { .. } => ErrorCategory::Misuse,
            Error::Transport(_) | Error::Timeout { .. } | Error::Io(_) => {
                ErrorCategory::TransientProvider
            }
            Error::Remote { status, .. } => {
                if *status == 429 || *status >= 500 {
                    ErrorCategory::TransientProvider
                } else {
                    ErrorCategory::PermanentProvider
                }
            }
            Error::Serialization(_) => ErrorCategory::PermanentProvider,
            Error::Cancelled | Error::Closed => ErrorCategory::Cancellation,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        self.category() == ErrorCategory::Cancellation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_match_display() {
        assert_eq!(Error::Cancelled.to_string(), CANCELLED);
        assert_eq!(Error::Closed.to_string(), CLOSED);
    }

    #[test]
    fn remote_status_classification() {
        let rate_limited = Error::Remote {
            status: 429,
            message: "slow down".into(),
        };
        let unavailable = Error::Remote {
            status: 503,
            message: "overloaded".into(),
        };
        let unauthorized = Error::Remote {
            status: 401,
            message: "bad key".into(),
        };
        assert_eq!(rate_limited.category(), ErrorCategory::TransientProvider);
        assert_eq!(unavailable.category(), ErrorCategory::TransientProvider);
        assert_eq!(unauthorized.category(), ErrorCategory::PermanentProvider);
    }

    #[test]
    fn context_is_rendered() {
        let err = Error::configuration_with_context(
            "rpm must be positive",
            ErrorContext::new()
                .with_field_path("providers.gemini.requests_per_minute")
                .with_source("config_validator"),
        );
        let text = err.to_string();
        assert!(text.contains("rpm must be positive"));
        assert!(text.contains("field: providers.gemini.requests_per_minute"));
        assert!(text.contains("source: config_validator"));
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn unknown_provider_is_configuration() {
        let err = Error::unknown_provider("mystery");
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(err.to_string().contains("mystery"));
    }
}
