//! Client-side request throttle for the ledger node.
//!
//! Public RPC nodes enforce tight quotas. Every RPC call the monitor makes waits
//! on this throttle first, and reports back whether it succeeded. A high failure
//! rate shrinks the quota; a quiet window restores it step by step.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const DEFAULT_WINDOW: usize = 50;
const DEFAULT_ERROR_THRESHOLD: f64 = 0.3;
const ADJUSTMENT_INTERVAL: Duration = Duration::from_secs(30);

struct ThrottleState {
    /// Limiter for the current quota; replaced whenever the quota changes
    limiter: Arc<DefaultDirectRateLimiter>,
    /// Configured requests per second; the quota never recovers past it
    base_quota: u32,
    /// Requests per second currently allowed
    current_quota: u32,
    /// Recent request outcomes (true = success), oldest first
    outcomes: VecDeque<bool>,
    /// Number of outcomes kept
    window_size: usize,
    /// Error rate above which the quota is halved
    error_threshold: f64,
    /// When the quota was last re-evaluated
    last_adjustment: Instant,
    /// Minimum time between re-evaluations
    adjustment_interval: Duration,
}

/// Shared, adaptive rate limiter for RPC requests.
pub struct RequestThrottle {
    state: Mutex<ThrottleState>,
}

/// Snapshot of throttle counters.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleStats {
    pub base_quota: u32,
    pub current_quota: u32,
    pub error_rate: f64,
    pub samples: usize,
}

fn direct_limiter(requests_per_second: u32) -> Arc<DefaultDirectRateLimiter> {
    let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_second(per_second)))
}

impl RequestThrottle {
    pub fn new(requests_per_second: u32) -> Self {
        Self::with_window(requests_per_second, DEFAULT_WINDOW, DEFAULT_ERROR_THRESHOLD)
    }

    pub fn with_window(requests_per_second: u32, window_size: usize, error_threshold: f64) -> Self {
        let base_quota = requests_per_second.max(1);
        Self {
            state: Mutex::new(ThrottleState {
                limiter: direct_limiter(base_quota),
                base_quota,
                current_quota: base_quota,
                outcomes: VecDeque::with_capacity(window_size),
                window_size: window_size.max(1),
                error_threshold: error_threshold.clamp(0.0, 1.0),
                last_adjustment: Instant::now(),
                adjustment_interval: ADJUSTMENT_INTERVAL,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ThrottleState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait until a request may be sent.
    pub async fn acquire(&self) {
        let limiter = self.lock().limiter.clone();
        limiter.until_ready().await;
    }

    pub fn record_success(&self) {
        self.record(true);
    }

    pub fn record_failure(&self) {
        self.record(false);
    }

    fn record(&self, success: bool) {
        let mut state = self.lock();
        state.outcomes.push_back(success);
        while state.outcomes.len() > state.window_size {
            state.outcomes.pop_front();
        }

        if state.outcomes.len() >= state.window_size / 2
            && state.last_adjustment.elapsed() >= state.adjustment_interval
        {
            state.adjust();
        }
    }

    pub fn stats(&self) -> ThrottleStats {
        let state = self.lock();
        ThrottleStats {
            base_quota: state.base_quota,
            current_quota: state.current_quota,
            error_rate: state.error_rate(),
            samples: state.outcomes.len(),
        }
    }

    #[cfg(test)]
    fn force_adjust(&self) {
        let mut state = self.lock();
        state.adjust();
    }
}

impl ThrottleState {
    fn error_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let failures = self.outcomes.iter().filter(|ok| !**ok).count();
        failures as f64 / self.outcomes.len() as f64
    }

    fn adjust(&mut self) {
        let error_rate = self.error_rate();
        let old_quota = self.current_quota;

        if error_rate > self.error_threshold {
            self.current_quota = (self.current_quota / 2).max(1);
            warn!(
                error_rate = %format!("{:.0}%", error_rate * 100.0),
                old_quota,
                new_quota = self.current_quota,
                "High RPC error rate, slowing down"
            );
        } else if error_rate < self.error_threshold / 2.0 && self.current_quota < self.base_quota {
            self.current_quota = (self.current_quota + 1).min(self.base_quota);
            debug!(old_quota, new_quota = self.current_quota, "RPC error rate recovered, speeding up");
        }

        if self.current_quota != old_quota {
            self.limiter = direct_limiter(self.current_quota);
            self.outcomes.clear();
        }
        self.last_adjustment = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_within_burst_does_not_block() {
        let throttle = RequestThrottle::new(100);
        let started = Instant::now();
        for _ in 0..10 {
            throttle.acquire().await;
        }
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_error_rate_tracking() {
        let throttle = RequestThrottle::with_window(10, 10, 0.3);
        throttle.record_success();
        throttle.record_failure();
        throttle.record_success();
        throttle.record_failure();

        let stats = throttle.stats();
        assert_eq!(stats.samples, 4);
        assert!((stats.error_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_window_is_bounded() {
        let throttle = RequestThrottle::with_window(10, 4, 0.3);
        for _ in 0..10 {
            throttle.record_success();
        }
        assert_eq!(throttle.stats().samples, 4);
    }

    #[test]
    fn test_high_error_rate_halves_quota_then_recovers() {
        let throttle = RequestThrottle::with_window(8, 10, 0.3);
        for _ in 0..6 {
            throttle.record_failure();
        }
        throttle.force_adjust();
        assert_eq!(throttle.stats().current_quota, 4);

        for _ in 0..10 {
            throttle.record_success();
        }
        throttle.force_adjust();
        assert_eq!(throttle.stats().current_quota, 5);
        assert_eq!(throttle.stats().base_quota, 8);
    }

    #[test]
    fn test_quota_never_drops_below_one() {
        let throttle = RequestThrottle::with_window(1, 4, 0.1);
        for _ in 0..4 {
            throttle.record_failure();
        }
        throttle.force_adjust();
        assert_eq!(throttle.stats().current_quota, 1);
    }
}
