//! 进度上报模块：每个请求到达终态时通知观察者一次。
//!
//! # Progress Sinks
//!
//! The dispatcher reports every terminal resolution exactly once through a
//! [`ProgressSink`]. Resolutions arrive in completion order, not submission order.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`NoopProgressSink`] | Discards events |
//! | [`ChannelProgressSink`] | Bounded channel; a full channel blocks the reporting request |
//! | [`InMemoryProgressSink`] | Collects events, mainly for tests |
//! | [`LoggingProgressSink`] | Emits each event as a `tracing` event |
//! | [`FnProgressSink`] | Wraps a plain callback |
//! | [`CompositeProgressSink`] | Fans out to several sinks |
//!
//! Backpressure policy for the channel sink is *block*: a slow consumer slows down
//! completion reporting (and therefore batch completion) but never loses events.

use crate::types::ProgressEvent;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Observer of terminal request resolutions.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, event: ProgressEvent) -> Result<()>;
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgressSink;

#[async_trait]
impl ProgressSink for NoopProgressSink {
    async fn report(&self, _event: ProgressEvent) -> Result<()> {
        Ok(())
    }
}

pub fn noop_sink() -> Arc<dyn ProgressSink> {
    Arc::new(NoopProgressSink)
}

/// Bounded channel sink.
#[derive(Debug, Clone)]
pub struct ChannelProgressSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelProgressSink {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ProgressSink for ChannelProgressSink {
    async fn report(&self, event: ProgressEvent) -> Result<()> {
        // Waits for room; fails only when the receiver is gone.
        self.tx.send(event).await.map_err(|_| Error::Closed)
    }
}

/// In-memory sink for testing.
#[derive(Debug, Default)]
pub struct InMemoryProgressSink {
    events: RwLock<Vec<ProgressEvent>>,
}

impl InMemoryProgressSink {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn get_events(&self) -> Vec<ProgressEvent> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
    pub fn get_event(&self, request_id: &str) -> Option<ProgressEvent> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|e| e.request_id == request_id)
            .cloned()
    }
    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(|e| e.into_inner()).len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ProgressSink for InMemoryProgressSink {
    async fn report(&self, event: ProgressEvent) -> Result<()> {
        self.events
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
        Ok(())
    }
}

/// Tracing sink for debugging and CLIs.
#[derive(Debug, Clone)]
pub struct LoggingProgressSink {
    prefix: String,
}

impl LoggingProgressSink {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for LoggingProgressSink {
    fn default() -> Self {
        Self::new("[progress]")
    }
}

#[async_trait]
impl ProgressSink for LoggingProgressSink {
    async fn report(&self, event: ProgressEvent) -> Result<()> {
        match &event.error {
            None => info!(
                request_id = event.request_id.as_str(),
                chars = event.content.chars().count(),
                "{} resolved",
                self.prefix
            ),
            Some(err) => warn!(
                request_id = event.request_id.as_str(),
                error = err.as_str(),
                "{} failed",
                self.prefix
            ),
        }
        Ok(())
    }
}

/// Callback observer.
pub struct FnProgressSink<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    callback: F,
}

impl<F> FnProgressSink<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> ProgressSink for FnProgressSink<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    async fn report(&self, event: ProgressEvent) -> Result<()> {
        (self.callback)(event);
        Ok(())
    }
}

/// Composite sink for multiple destinations.
#[derive(Default)]
pub struct CompositeProgressSink {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl CompositeProgressSink {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl ProgressSink for CompositeProgressSink {
    async fn report(&self, event: ProgressEvent) -> Result<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.report(event.clone()).await {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(id: &str) -> ProgressEvent {
        ProgressEvent {
            request_id: id.to_string(),
            content: "text".into(),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_channel_sink_blocks_when_full() {
        let (sink, mut rx) = ChannelProgressSink::new(1);
        sink.report(event("a")).await.unwrap();

        let s = sink.clone();
        let pending = tokio::spawn(async move { s.report(event("b")).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        assert_eq!(rx.recv().await.unwrap().request_id, "a");
        pending.await.unwrap().unwrap();
        assert_eq!(rx.recv().await.unwrap().request_id, "b");
    }

    #[tokio::test]
    async fn test_channel_sink_reports_dropped_receiver() {
        let (sink, rx) = ChannelProgressSink::new(4);
        drop(rx);
        assert!(matches!(sink.report(event("a")).await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn test_composite_reaches_every_sink() {
        let memory = Arc::new(InMemoryProgressSink::new());
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let composite = CompositeProgressSink::new()
            .add_sink(memory.clone())
            .add_sink(Arc::new(FnProgressSink::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })))
            .add_sink(Arc::new(LoggingProgressSink::default()));

        composite.report(event("x")).await.unwrap();
        composite.report(event("y")).await.unwrap();

        assert_eq!(memory.len(), 2);
        assert_eq!(memory.get_event("y").unwrap().content, "text");
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
