//! 弹性模式模块：按厂商限流、并发闸门与重试策略。
//!
//! # Resilience Primitives Module
//!
//! Per-provider admission control for the dispatcher.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`rate_limiter`] | Sliding-window limiter: at most N admissions per rolling minute |
//! | [`concurrency`] | Semaphore gate: at most N calls in flight |
//! | [`retry`] | Bounded retry policy with a fixed per-provider delay |
//! | [`ProviderLimits`] | One limiter + one gate bound to a [`ProviderProfile`] |
//!
//! Limits for different providers share nothing, so a saturated provider never
//! delays requests addressed to another one.
//!
//! ```rust
//! use prompt_dispatch::config::ProviderProfile;
//! use prompt_dispatch::resilience::ProviderLimits;
//!
//! # async fn demo() -> prompt_dispatch::Result<()> {
//! let limits = ProviderLimits::new(ProviderProfile::new("ollama", 60, 2, 0)?);
//! let admission = limits.admit().await?;
//! // ... issue the provider call while `admission` is held ...
//! drop(admission);
//! # Ok(())
//! # }
//! ```

pub mod concurrency;
pub mod rate_limiter;
pub mod retry;

pub use concurrency::{ConcurrencyGate, GatePermit, GateSnapshot};
pub use rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterSnapshot};
pub use retry::{Decision, RetryPolicy};

use crate::config::ProviderProfile;
use crate::Result;

/// Proof that a request was admitted: holds its concurrency slot until dropped.
#[derive(Debug)]
pub struct Admission {
    permit: GatePermit,
}

impl Admission {
    pub fn release(self) {
        self.permit.release();
    }
}

/// Facts about one provider's limits, for UIs and schedulers.
#[derive(Debug, Clone)]
pub struct LimitsSnapshot {
    pub provider_id: String,
    pub rate_limiter: RateLimiterSnapshot,
    pub gate: GateSnapshot,
}

/// Rate limiter and concurrency gate for one provider.
pub struct ProviderLimits {
    profile: ProviderProfile,
    rate_limiter: RateLimiter,
    gate: ConcurrencyGate,
}

impl ProviderLimits {
    pub fn new(profile: ProviderProfile) -> Self {
        let rate_limiter = RateLimiter::new(RateLimiterConfig {
            max_requests: profile.requests_per_minute.max(1),
            window: rate_limiter::DEFAULT_WINDOW,
        });
        let gate = ConcurrencyGate::new(profile.max_concurrent);
        Self {
            profile,
            rate_limiter,
            gate,
        }
    }

    pub fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    /// Take a concurrency slot, then a rate-limit admission.
    ///
    /// The slot comes first so the recorded admission time is the moment the call
    /// actually starts; waiting for a slot never consumes rate budget.
    pub async fn admit(&self) -> Result<Admission> {
        let permit = self.gate.acquire().await?;
        self.rate_limiter.acquire().await;
        Ok(Admission { permit })
    }

    pub fn close(&self) {
        self.gate.close();
    }

    pub async fn snapshot(&self) -> LimitsSnapshot {
        LimitsSnapshot {
            provider_id: self.profile.provider_id.clone(),
            rate_limiter: self.rate_limiter.snapshot().await,
            gate: self.gate.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_admission_holds_slot() {
        let limits = ProviderLimits::new(ProviderProfile::new("p", 100, 1, 0).unwrap());
        let admission = limits.admit().await.unwrap();
        let snap = limits.snapshot().await;
        assert_eq!(snap.gate.in_use, 1);
        assert_eq!(snap.rate_limiter.admitted_in_window, 1);

        admission.release();
        assert_eq!(limits.snapshot().await.gate.in_use, 0);
    }

    #[tokio::test]
    async fn test_closed_limits_refuse_admission() {
        let limits = ProviderLimits::new(ProviderProfile::new("p", 100, 1, 0).unwrap());
        limits.close();
        assert!(matches!(limits.admit().await, Err(crate::Error::Closed)));
    }
}
