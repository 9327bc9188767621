//! In-process provider stubs shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use prompt_dispatch::{
    DispatcherBuilder, Error, ProviderClient, ProviderProfile, Request, RequestDispatcher, Result,
};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub enum Behavior {
    /// Answer `"<id>:ok"` after `delay`.
    Succeed { delay: Duration },
    /// Fail every attempt with the given HTTP status.
    Fail { status: u16 },
    /// Fail the first `n` attempts with 503, then succeed.
    FailTimes { n: u32 },
    /// Never return.
    Hang,
}

/// Provider stub that records every call it sees.
pub struct StubProvider {
    id: String,
    behavior: Behavior,
    calls: AtomicU32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    intervals: Mutex<Vec<(Instant, Instant)>>,
    starts: Mutex<Vec<Instant>>,
}

impl StubProvider {
    pub fn new(id: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            behavior,
            calls: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            intervals: Mutex::new(Vec::new()),
            starts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// `(start, end)` of every call that returned, sorted by start.
    pub fn intervals(&self) -> Vec<(Instant, Instant)> {
        let mut v = self.intervals.lock().unwrap().clone();
        v.sort();
        v
    }

    pub fn starts(&self) -> Vec<Instant> {
        let mut v = self.starts.lock().unwrap().clone();
        v.sort();
        v
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProviderClient for StubProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn complete(&self, request: &Request) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);
        let start = Instant::now();
        self.starts.lock().unwrap().push(start);

        let outcome = match &self.behavior {
            Behavior::Succeed { delay } => {
                tokio::time::sleep(*delay).await;
                Ok(format!("{}:ok", request.id))
            }
            Behavior::Fail { status } => Err(Error::Remote {
                status: *status,
                message: format!("{} refused", self.id),
            }),
            Behavior::FailTimes { n } if call <= *n => Err(Error::Remote {
                status: 503,
                message: "warming up".into(),
            }),
            Behavior::FailTimes { .. } => Ok(format!("{}:ok", request.id)),
            Behavior::Hang => std::future::pending().await,
        };
        self.intervals.lock().unwrap().push((start, Instant::now()));
        outcome
    }
}

pub fn profile(id: &str, rpm: u32, max_concurrent: usize, retry_delay_ms: u64) -> ProviderProfile {
    ProviderProfile::new(id, rpm, max_concurrent, retry_delay_ms).unwrap()
}

pub fn dispatcher(providers: &[(ProviderProfile, Arc<StubProvider>)]) -> RequestDispatcher {
    let mut builder = DispatcherBuilder::new();
    for (profile, client) in providers {
        builder = builder.provider(profile.clone(), client.clone());
    }
    builder.build().unwrap()
}

pub fn requests(provider: &str, ids: &[&str]) -> Vec<Request> {
    ids.iter()
        .map(|id| Request::new(*id, provider, format!("prompt {}", id)))
        .collect()
}
