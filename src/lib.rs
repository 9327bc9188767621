//! # prompt-dispatch
//!
//! 批量提示词调度引擎：按厂商限流、限并发、有界重试，并支持随时取消。
//!
//! Prompt dispatch engine - fans a batch of prompt requests out to several AI
//! completion providers while honouring each provider's limits.
//!
//! ## Overview
//!
//! A caller hands the engine a batch of [`Request`]s, each addressed to one provider.
//! The engine resolves every request to exactly one [`Response`] and reports each
//! resolution through a [`progress::ProgressSink`] as it happens.
//!
//! ## Key Features
//!
//! - **Per-provider limits**: requests-per-minute sliding window and a concurrency
//!   gate per provider, see [`resilience`]
//! - **Bounded retry**: fixed per-provider delay, attempt ceiling from config
//! - **Cancellation**: [`RequestDispatcher::cancel_requests`] resolves everything still
//!   running to [`CANCELLED`]; [`RequestDispatcher::close`] to [`CLOSED`]
//! - **Failed-request replay**: [`RequestDispatcher::retry_failed_requests`]
//! - **Provider adapters**: OpenAI-compatible, Anthropic, Gemini and Ollama HTTP drivers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use prompt_dispatch::{DispatchConfig, DispatcherBuilder, Request};
//! use prompt_dispatch::progress::LoggingProgressSink;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> prompt_dispatch::Result<()> {
//!     let config = DispatchConfig::from_path("dispatch.yaml").await?.with_env_overrides();
//!     let dispatcher = DispatcherBuilder::from_config(&config)?.build()?;
//!
//!     let batch = vec![
//!         Request::new("fr", "gemini", "Translate 'good morning' to French"),
//!         Request::new("de", "ollama", "Translate 'good morning' to German"),
//!     ];
//!     let responses = dispatcher
//!         .send_requests(batch.clone(), Arc::new(LoggingProgressSink::new("translate")))
//!         .await?;
//!
//!     if !dispatcher.failed_requests().is_empty() {
//!         let responses = dispatcher.retry_failed_requests(batch, &responses).await?;
//!         println!("{} responses after retry", responses.len());
//!     }
//!     dispatcher.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | Requests, responses and progress events |
//! | [`config`] | YAML configuration, provider profiles, request defaults |
//! | [`resilience`] | Rate limiter, concurrency gate, retry policy |
//! | [`dispatch`] | The dispatcher, sessions, batch and cancel handles |
//! | [`provider`] | Provider client trait and registry |
//! | [`drivers`] | Per-API request builders and response parsers |
//! | [`transport`] | Pooled HTTP transport and API-key resolution |
//! | [`progress`] | Progress sinks |
//! | [`storage`] | Persisted generation results |

pub mod config;
pub mod dispatch;
pub mod drivers;
pub mod progress;
pub mod provider;
pub mod resilience;
pub mod storage;
pub mod transport;
pub mod types;

pub mod error;
pub use error::{Error, ErrorCategory, ErrorContext, CANCELLED, CLOSED};

pub use config::{DispatchConfig, ProviderProfile};
pub use dispatch::{BatchHandle, CancelHandle, DispatcherBuilder, RequestDispatcher};
pub use progress::ProgressSink;
pub use provider::{ProviderClient, ProviderRegistry};
pub use types::{ProgressEvent, Request, RequestParameters, Response};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
