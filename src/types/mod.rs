//! 类型模块：批量调度所用的请求、响应与进度事件。
//!
//! # Types Module
//!
//! Plain data carried through the dispatch engine. Everything here is immutable once
//! built and cheap to clone; the engine never mutates a [`Request`] it was handed.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Request`] | One expanded prompt addressed to one provider |
//! | [`RequestParameters`] | Sampling knobs; `None` means "use the configured default" |
//! | [`Response`] | Terminal outcome of one request: content or error |
//! | [`ProgressEvent`] | The `(request_id, content, error)` triple reported per resolution |
//!
//! ## Example
//!
//! ```rust
//! use prompt_dispatch::types::{Request, Response};
//!
//! let req = Request::new("r-1", "gemini", "Summarise: {{text}}")
//!     .with_model("gemini-1.5-flash")
//!     .with_temperature(0.2);
//! assert_eq!(req.provider_id, "gemini");
//!
//! let ok = Response::success(&req.id, "a summary");
//! assert!(ok.is_success());
//! ```

pub mod request;
pub mod response;

pub use request::{Request, RequestParameters};
pub use response::{ProgressEvent, Response};
