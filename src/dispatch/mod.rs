//! 调度模块：把一批请求按厂商限流、并发与重试规则分发出去，并支持取消与失败重试。
//!
//! # Dispatch Module
//!
//! [`RequestDispatcher`] fans a batch of [`Request`]s out to their providers and
//! resolves every one of them to exactly one [`Response`].
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`RequestDispatcher`] | Engine: batches, single retries, cancellation, shutdown |
//! | [`DispatcherBuilder`] | Wires provider clients to their limits |
//! | [`DispatchSession`] | Per-batch run state (pending / in flight / completed) |
//! | [`BatchHandle`] | Background batch with a bounded progress channel |
//! | [`CancelHandle`] | Cancels one session from anywhere |
//!
//! ## Request lifecycle
//!
//! ```text
//! Pending ──admit──▶ InFlight ──ok──────────────▶ Completed(content)
//!    ▲                  │ ──fatal / out of tries──▶ Completed(error)
//!    └──retry delay─────┘
//! Pending | InFlight ──cancel / close──▶ Completed("cancelled" | "closed")
//! ```
//!
//! Admission takes the provider's concurrency slot first and then a rate-limit slot.
//! The slot is held for the provider call only and is released before any retry delay.
//! Each resolution is reported to the progress sink once, in completion order.

mod builder;
mod handle;
mod session;

pub use builder::DispatcherBuilder;
pub use handle::{BatchHandle, CancelHandle};
pub use session::{CancelReason, DispatchSession, SessionControl, SessionSnapshot};

use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::progress::{noop_sink, ChannelProgressSink, ProgressSink};
use crate::provider::ProviderClient;
use crate::provider::ProviderRegistry;
use crate::resilience::{Decision, LimitsSnapshot, ProviderLimits, RetryPolicy};
use crate::transport::TransportError;
use crate::types::{ProgressEvent, Request, Response};
use crate::{Error, ErrorContext, Result};

pub(crate) struct Inner {
    providers: ProviderRegistry,
    limits: HashMap<String, Arc<ProviderLimits>>,
    max_attempts: u32,
    attempt_timeout: Option<Duration>,
    progress_buffer: usize,
    active: Mutex<HashMap<Uuid, Arc<SessionControl>>>,
    /// Requests whose latest outcome was an error, keyed by request id.
    failed: Mutex<HashMap<String, Request>>,
    closed: AtomicBool,
}

// Both maps are only touched in short critical sections that cannot leave them torn.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Deregisters a session from the dispatcher when the run ends.
struct SessionGuard {
    inner: Arc<Inner>,
    session: Arc<DispatchSession>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        lock(&self.inner.active).remove(&self.session.id());
    }
}

async fn until_cancelled<F: Future>(token: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        out = fut => Some(out),
    }
}

async fn report(progress: &dyn ProgressSink, response: &Response) {
    if let Err(e) = progress.report(ProgressEvent::from(response)).await {
        debug!(request_id = %response.request_id, error = %e, "progress not delivered");
    }
}

/// Rate-limited, cancellable fan-out of prompt requests. Cheap to clone.
///
/// ```rust,no_run
/// use prompt_dispatch::config::DispatchConfig;
/// use prompt_dispatch::dispatch::DispatcherBuilder;
/// use prompt_dispatch::progress::LoggingProgressSink;
/// use prompt_dispatch::types::Request;
/// use std::sync::Arc;
///
/// # async fn demo() -> prompt_dispatch::Result<()> {
/// let config = DispatchConfig::from_path("dispatch.yaml").await?;
/// let dispatcher = DispatcherBuilder::from_config(&config)?.build()?;
///
/// let requests = vec![
///     Request::new("a", "gemini", "Translate 'hello' to French"),
///     Request::new("b", "ollama", "Translate 'hello' to German"),
/// ];
/// let responses = dispatcher
///     .send_requests(requests, Arc::new(LoggingProgressSink::new("batch")))
///     .await?;
/// for (id, r) in &responses {
///     println!("{}: {:?}", id, r.error.as_deref().unwrap_or(&r.content));
/// }
/// dispatcher.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RequestDispatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("providers", &self.inner.providers)
            .field("max_attempts", &self.inner.max_attempts)
            .field("attempt_timeout", &self.inner.attempt_timeout)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RequestDispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Dispatch a batch and wait until every request is resolved.
    ///
    /// The returned map has exactly one entry per request id. Per-request failures
    /// live in the map; `Err` is returned only for a closed dispatcher or duplicate ids.
    pub async fn send_requests(
        &self,
        requests: Vec<Request>,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<HashMap<String, Response>> {
        let guard = self.open_session(&requests)?;
        let span = info_span!("dispatch_batch", session_id = %guard.session.id());
        let responses = self
            .execute(&guard.session, &requests, progress.as_ref())
            .instrument(span)
            .await;
        self.rebuild_failed_index(&requests, &responses);
        Ok(responses)
    }

    /// Start a batch in the background and hand back its progress channel.
    ///
    /// Must be called inside a tokio runtime. The session is registered before this
    /// returns, so an immediate `cancel_requests` already reaches it.
    pub fn start_batch(&self, requests: Vec<Request>) -> Result<BatchHandle> {
        let guard = self.open_session(&requests)?;
        let (sink, progress) = ChannelProgressSink::new(self.inner.progress_buffer);
        let cancel = CancelHandle::new(guard.session.id(), guard.session.control().clone());
        let span = info_span!("dispatch_batch", session_id = %guard.session.id());
        let this = self.clone();
        let task = tokio::spawn(
            async move {
                let responses = this.execute(&guard.session, &requests, &sink).await;
                this.rebuild_failed_index(&requests, &responses);
                drop(guard);
                responses
            }
            .instrument(span),
        );
        Ok(BatchHandle {
            progress,
            cancel,
            task,
        })
    }

    /// Cancel every session currently running, single retries included.
    ///
    /// Returns immediately. Each affected request resolves to [`crate::CANCELLED`]
    /// unless it was already terminal. Calling it with nothing running is a no-op.
    pub fn cancel_requests(&self) {
        let sessions: Vec<Arc<SessionControl>> =
            lock(&self.inner.active).values().cloned().collect();
        if sessions.is_empty() {
            debug!("cancel requested with no active sessions");
            return;
        }
        for control in &sessions {
            control.cancel(CancelReason::Cancelled);
        }
        warn!(sessions = sessions.len(), "dispatch cancelled");
    }

    /// Re-dispatch one request through the same pipeline, outside any batch.
    pub async fn retry_request(&self, request: Request) -> Result<Response> {
        self.retry_request_with_progress(request, noop_sink()).await
    }

    pub async fn retry_request_with_progress(
        &self,
        request: Request,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Response> {
        let requests = vec![request];
        let guard = self.open_session(&requests)?;
        let span = info_span!("dispatch_retry", session_id = %guard.session.id());
        let mut responses = self
            .execute(&guard.session, &requests, progress.as_ref())
            .instrument(span)
            .await;
        let request = &requests[0];
        let response = responses
            .remove(&request.id)
            .unwrap_or_else(|| Response::failure(&request.id, guard.session.control().error()));

        let mut failed = lock(&self.inner.failed);
        if response.is_error() {
            failed.insert(request.id.clone(), request.clone());
        } else {
            failed.remove(&request.id);
        }
        Ok(response)
    }

    /// Re-dispatch the requests that failed in `existing` and merge the fresh outcomes.
    ///
    /// Requests whose id maps to a success in `existing` are passed through untouched;
    /// ids missing from `existing` are dispatched as well. Afterwards the failed-request
    /// index holds exactly the requests in `requests` that still failed.
    pub async fn retry_failed_requests(
        &self,
        requests: Vec<Request>,
        existing: &HashMap<String, Response>,
    ) -> Result<HashMap<String, Response>> {
        self.retry_failed_requests_with_progress(requests, existing, noop_sink())
            .await
    }

    pub async fn retry_failed_requests_with_progress(
        &self,
        requests: Vec<Request>,
        existing: &HashMap<String, Response>,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<HashMap<String, Response>> {
        let to_retry: Vec<Request> = requests
            .iter()
            .filter(|r| existing.get(&r.id).map_or(true, Response::is_error))
            .cloned()
            .collect();

        let guard = self.open_session(&to_retry)?;
        info!(
            session_id = %guard.session.id(),
            retrying = to_retry.len(),
            passed_through = requests.len() - to_retry.len(),
            "retrying failed requests"
        );
        let span = info_span!("dispatch_retry", session_id = %guard.session.id());
        let fresh = self
            .execute(&guard.session, &to_retry, progress.as_ref())
            .instrument(span)
            .await;

        let mut merged = existing.clone();
        merged.extend(fresh);
        self.rebuild_failed_index(&requests, &merged);
        Ok(merged)
    }

    /// Requests whose most recent outcome was an error, keyed by request id.
    pub fn failed_requests(&self) -> HashMap<String, Request> {
        lock(&self.inner.failed).clone()
    }

    /// Cancel all sessions with [`crate::CLOSED`] and release provider resources.
    ///
    /// Irreversible: later `send_requests` / `retry_*` calls fail with [`Error::Closed`].
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let sessions: Vec<Arc<SessionControl>> =
            lock(&self.inner.active).values().cloned().collect();
        for control in &sessions {
            control.cancel(CancelReason::Closed);
        }
        for limits in self.inner.limits.values() {
            limits.close();
        }
        self.inner.providers.close_all().await;
        info!(interrupted_sessions = sessions.len(), "request dispatcher closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn active_sessions(&self) -> usize {
        lock(&self.inner.active).len()
    }

    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.limits.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn max_attempts(&self) -> u32 {
        self.inner.max_attempts
    }

    pub async fn limits_snapshot(&self, provider_id: &str) -> Option<LimitsSnapshot> {
        match self.inner.limits.get(provider_id) {
            Some(limits) => Some(limits.snapshot().await),
            None => None,
        }
    }

    fn open_session(&self, requests: &[Request]) -> Result<SessionGuard> {
        let mut seen = HashSet::with_capacity(requests.len());
        for (i, r) in requests.iter().enumerate() {
            if !seen.insert(r.id.as_str()) {
                return Err(Error::validation_with_context(
                    format!("duplicate request id '{}'", r.id),
                    ErrorContext::new()
                        .with_field_path(format!("requests[{}].id", i))
                        .with_source("dispatcher"),
                ));
            }
        }

        let control = Arc::new(SessionControl::new());
        let session = Arc::new(DispatchSession::new(
            control.clone(),
            requests.iter().map(|r| r.id.as_str()),
        ));
        // The closed check happens under the same lock `close` takes to sweep sessions.
        let mut active = lock(&self.inner.active);
        if self.is_closed() {
            return Err(Error::Closed);
        }
        active.insert(session.id(), control);
        drop(active);

        Ok(SessionGuard {
            inner: self.inner.clone(),
            session,
        })
    }

    async fn execute(
        &self,
        session: &DispatchSession,
        requests: &[Request],
        progress: &dyn ProgressSink,
    ) -> HashMap<String, Response> {
        let started = Instant::now();
        info!(requests = requests.len(), "dispatching batch");

        // Workers only resolve; this loop is the sole writer to the progress sink,
        // so a full sink never parks a worker the cancel path has stopped polling.
        let token = session.control().token().clone();
        let mut workers: FuturesUnordered<_> = requests
            .iter()
            .map(|request| self.drive(session, request))
            .collect();

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                next = workers.next() => Some(next),
            };
            match next {
                Some(Some(Some(response))) => report(progress, &response).await,
                Some(Some(None)) => {}
                Some(None) => break,
                None => {
                    // Dropping the remaining workers abandons their provider calls.
                    workers.clear();
                    let swept = session.cancel(&session.control().error());
                    for response in &swept {
                        report(progress, response).await;
                    }
                    break;
                }
            }
        }

        let responses = session.take_completed();
        let failed = responses.values().filter(|r| r.is_error()).count();
        info!(
            succeeded = responses.len() - failed,
            failed,
            cancelled = session.control().is_cancelled(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch finished"
        );
        responses
    }

    /// Runs one request to its outcome. Yields the response only if this call
    /// resolved it; a cancel sweep that got there first yields `None`.
    async fn drive(&self, session: &DispatchSession, request: &Request) -> Option<Response> {
        let response = self.run_attempts(session, request).await;
        session.resolve(response.clone()).then_some(response)
    }

    async fn run_attempts(&self, session: &DispatchSession, request: &Request) -> Response {
        let cancelled = || Response::failure(&request.id, session.control().error());

        let (limits, client) = match (
            self.inner.limits.get(&request.provider_id),
            self.inner.providers.get(&request.provider_id),
        ) {
            (Some(limits), Ok(client)) => (limits.clone(), client),
            _ => {
                warn!(
                    request_id = %request.id,
                    provider = %request.provider_id,
                    "unknown provider"
                );
                let err = Error::unknown_provider(&request.provider_id);
                return Response::failure(&request.id, err);
            }
        };
        let policy = RetryPolicy::new(self.inner.max_attempts, limits.profile().retry_delay());
        let token = session.control().token();
        let mut attempt = 0u32;

        loop {
            let admission = match until_cancelled(token, limits.admit()).await {
                None => return cancelled(),
                Some(Err(e)) if e.is_cancellation() => return cancelled(),
                Some(Err(e)) => return Response::failure(&request.id, e),
                Some(Ok(admission)) => admission,
            };
            if !session.start(&request.id) {
                return cancelled();
            }
            attempt += 1;
            debug!(
                request_id = %request.id,
                provider = %request.provider_id,
                attempt,
                "attempt started"
            );

            let outcome = match until_cancelled(token, self.call(client.as_ref(), request)).await {
                None => return cancelled(),
                Some(outcome) => outcome,
            };
            drop(admission);

            let err = match outcome {
                Ok(content) => return Response::success(&request.id, content),
                Err(err) => err,
            };
            match policy.decide(attempt, &err) {
                Decision::GiveUp => {
                    warn!(
                        request_id = %request.id,
                        provider = %request.provider_id,
                        attempt,
                        error = %err,
                        "request failed"
                    );
                    return Response::failure(&request.id, err);
                }
                Decision::Retry { delay } => {
                    debug!(
                        request_id = %request.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying request"
                    );
                    if !session.requeue(&request.id) {
                        return cancelled();
                    }
                    if until_cancelled(token, tokio::time::sleep(delay)).await.is_none() {
                        return cancelled();
                    }
                }
            }
        }
    }

    /// One provider call under the per-attempt timeout.
    async fn call(&self, client: &dyn ProviderClient, request: &Request) -> Result<String> {
        let attempt = AssertUnwindSafe(client.complete(request)).catch_unwind();
        let outcome = match self.inner.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(Error::Timeout {
                        after_ms: limit.as_millis() as u64,
                    })
                }
            },
            None => attempt.await,
        };
        outcome.unwrap_or_else(|_| {
            Err(Error::Transport(TransportError::Other(format!(
                "provider '{}' panicked",
                request.provider_id
            ))))
        })
    }

    fn rebuild_failed_index(&self, requests: &[Request], responses: &HashMap<String, Response>) {
        let failed: HashMap<String, Request> = requests
            .iter()
            .filter(|r| responses.get(&r.id).map_or(false, Response::is_error))
            .map(|r| (r.id.clone(), r.clone()))
            .collect();
        *lock(&self.inner.failed) = failed;
    }
}
