//! Network transport shared by the HTTP provider adapters.

pub mod http;

pub use http::{HttpTransport, OutboundRequest};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}
