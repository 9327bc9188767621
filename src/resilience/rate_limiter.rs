use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RateLimiterSnapshot {
    pub max_requests: u32,
    pub window_ms: u64,
    /// Admissions still counted against the current window.
    pub admitted_in_window: usize,
    /// Estimated wait time until the next admission is possible (ms), if currently full.
    pub estimated_wait_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum admissions in any rolling window.
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimiterConfig {
    pub fn per_minute(rpm: u32) -> Option<Self> {
        if rpm == 0 {
            return None;
        }
        Some(Self {
            max_requests: rpm,
            window: DEFAULT_WINDOW,
        })
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

#[derive(Debug)]
struct State {
    /// Admission timestamps inside the window, oldest first.
    admitted: VecDeque<Instant>,
}

/// Sliding-window request limiter for one provider.
///
/// - Over any rolling `window`, at most `max_requests` callers are admitted
/// - Waiters are admitted in arrival order
/// - Dropping an `acquire` future (e.g. on cancellation) gives up its place
///   without recording anything
pub struct RateLimiter {
    cfg: RateLimiterConfig,
    state: Mutex<State>,
    /// FIFO turnstile: only the head waiter polls the window.
    queue: Mutex<()>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Self {
        let cap = cfg.max_requests as usize;
        Self {
            cfg,
            state: Mutex::new(State {
                admitted: VecDeque::with_capacity(cap.min(1024)),
            }),
            queue: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.cfg
    }

    fn evict_locked(cfg: &RateLimiterConfig, st: &mut State, now: Instant) {
        while let Some(&oldest) = st.admitted.front() {
            if oldest + cfg.window <= now {
                st.admitted.pop_front();
            } else {
                break;
            }
        }
    }

    /// Time until the oldest admission leaves the window, or `None` if there is room now.
    fn wait_locked(cfg: &RateLimiterConfig, st: &State, now: Instant) -> Option<Duration> {
        if st.admitted.len() < cfg.max_requests as usize {
            return None;
        }
        st.admitted
            .front()
            .map(|oldest| (*oldest + cfg.window).saturating_duration_since(now))
    }

    /// Wait for admission and record it (may sleep).
    pub async fn acquire(&self) {
        let _turn = self.queue.lock().await;
        loop {
            let wait_duration = {
                let mut st = self.state.lock().await;
                let now = Instant::now();
                Self::evict_locked(&self.cfg, &mut st, now);
                match Self::wait_locked(&self.cfg, &st, now) {
                    None => {
                        st.admitted.push_back(now);
                        return;
                    }
                    Some(wait) => wait,
                }
            };

            tokio::time::sleep(wait_duration.max(Duration::from_millis(1))).await;
        }
    }

    /// Try to record an admission without waiting, returns true if successful
    pub async fn try_acquire(&self) -> bool {
        // Never jump ahead of queued waiters.
        let Ok(_turn) = self.queue.try_lock() else {
            return false;
        };
        let mut st = self.state.lock().await;
        let now = Instant::now();
        Self::evict_locked(&self.cfg, &mut st, now);
        if Self::wait_locked(&self.cfg, &st, now).is_none() {
            st.admitted.push_back(now);
            true
        } else {
            false
        }
    }

    pub async fn snapshot(&self) -> RateLimiterSnapshot {
        let mut st = self.state.lock().await;
        let now = Instant::now();
        Self::evict_locked(&self.cfg, &mut st, now);
        RateLimiterSnapshot {
            max_requests: self.cfg.max_requests,
            window_ms: self.cfg.window.as_millis() as u64,
            admitted_in_window: st.admitted.len(),
            estimated_wait_ms: Self::wait_locked(&self.cfg, &st, now)
                .map(|d| d.as_millis() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_config_per_minute() {
        let config = RateLimiterConfig::per_minute(30).unwrap();
        assert_eq!(config.max_requests, 30);
        assert_eq!(config.window, DEFAULT_WINDOW);
        assert!(RateLimiterConfig::per_minute(0).is_none());
    }

    #[tokio::test]
    async fn test_try_acquire_exhausts_window() {
        let limiter = RateLimiter::new(RateLimiterConfig::per_minute(3).unwrap());

        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);

        // Fourth should fail (window full)
        assert!(!limiter.try_acquire().await);

        let snapshot = limiter.snapshot().await;
        assert_eq!(snapshot.admitted_in_window, 3);
        assert!(snapshot.estimated_wait_ms.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_oldest_to_expire() {
        let limiter = RateLimiter::new(RateLimiterConfig::per_minute(2).unwrap());
        let start = Instant::now();

        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(10)).await;
        limiter.acquire().await;

        // Third admission must wait until the first leaves the window (t = 60s).
        limiter.acquire().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(60), "admitted after {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_window_exceeds_limit() {
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::per_minute(5).unwrap()));
        let admissions = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for _ in 0..17 {
            let limiter = limiter.clone();
            let admissions = admissions.clone();
            tasks.push(tokio::spawn(async move {
                limiter.acquire().await;
                admissions.lock().unwrap().push(Instant::now());
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        let mut times = admissions.lock().unwrap().clone();
        times.sort();
        assert_eq!(times.len(), 17);
        for (i, t) in times.iter().enumerate() {
            let in_window = times[i..]
                .iter()
                .take_while(|u| **u < *t + DEFAULT_WINDOW)
                .count();
            assert!(in_window <= 5, "{} admissions within one window", in_window);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_window() {
        let cfg = RateLimiterConfig::per_minute(1)
            .unwrap()
            .with_window(Duration::from_millis(100));
        let limiter = RateLimiter::new(cfg);
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(limiter.try_acquire().await);
    }
}
