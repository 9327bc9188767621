use crate::error::ErrorCategory;
use crate::Error;
use std::time::Duration;
use tracing::debug;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry { delay: Duration },
    GiveUp,
}

/// Bounded, uniform retry policy.
///
/// Every provider failure shares one retry path: rate limiting, auth and network errors
/// are not told apart. Only configuration errors and cancellation skip retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Decide after attempt number `attempt` (1-based) failed with `err`.
    pub fn decide(&self, attempt: u32, err: &Error) -> Decision {
        match err.category() {
            ErrorCategory::Configuration | ErrorCategory::Cancellation | ErrorCategory::Misuse => {
                return Decision::GiveUp;
            }
            ErrorCategory::TransientProvider | ErrorCategory::PermanentProvider => {}
        }
        if attempt >= self.max_attempts {
            debug!(attempt, max_attempts = self.max_attempts, "retry budget exhausted");
            return Decision::GiveUp;
        }
        Decision::Retry { delay: self.delay }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_ATTEMPTS, Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(status: u16) -> Error {
        Error::Remote {
            status,
            message: "boom".into(),
        }
    }

    #[test]
    fn retries_until_ceiling() {
        let policy = RetryPolicy::new(3, Duration::from_millis(200));
        assert_eq!(
            policy.decide(1, &remote(500)),
            Decision::Retry {
                delay: Duration::from_millis(200)
            }
        );
        assert!(matches!(policy.decide(2, &remote(500)), Decision::Retry { .. }));
        assert_eq!(policy.decide(3, &remote(500)), Decision::GiveUp);
    }

    #[test]
    fn permanent_errors_share_the_retry_path() {
        let policy = RetryPolicy::new(2, Duration::ZERO);
        assert!(matches!(policy.decide(1, &remote(401)), Decision::Retry { .. }));
        assert!(matches!(
            policy.decide(1, &Error::Timeout { after_ms: 10 }),
            Decision::Retry { .. }
        ));
    }

    #[test]
    fn never_retries_configuration_or_cancellation() {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        assert_eq!(policy.decide(1, &Error::unknown_provider("x")), Decision::GiveUp);
        assert_eq!(policy.decide(1, &Error::Cancelled), Decision::GiveUp);
        assert_eq!(policy.decide(1, &Error::Closed), Decision::GiveUp);
    }

    #[test]
    fn single_attempt_policy() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.decide(1, &remote(503)), Decision::GiveUp);
    }
}
