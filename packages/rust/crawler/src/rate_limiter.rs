//! Adaptive request spacing.
//!
//! The limiter enforces a minimum interval between issued requests and tunes
//! that interval from observed outcomes: sustained success speeds it up,
//! throttling and repeated errors slow it down. One instance is shared by
//! async and blocking callers.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use trendscout_shared::RateLimiterConfig;

/// Consecutive successes needed before the interval shrinks.
const SUCCESS_STREAK: u32 = 10;
/// Consecutive generic errors needed before the interval grows.
const ERROR_STREAK: u32 = 3;
const SPEEDUP_FACTOR: f64 = 0.9;
const SLOWDOWN_FACTOR: f64 = 1.5;
const THROTTLE_FACTOR: f64 = 2.0;
/// Rolling outcome window used by [`RateLimiter::stats`].
const HISTORY_WINDOW: usize = 100;

/// Snapshot of limiter state for logging and diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct LimiterStats {
    pub current_interval: Duration,
    /// Requests per second implied by `current_interval`.
    pub current_rate: f64,
    pub recent_successes: usize,
    pub recent_errors: usize,
    /// `None` until at least one outcome has been recorded.
    pub success_ratio: Option<f64>,
}

#[derive(Debug)]
struct LimiterState {
    current_interval: Duration,
    consecutive_successes: u32,
    consecutive_errors: u32,
    /// `true` for success, `false` for error.
    history: VecDeque<bool>,
    /// Time the most recent request slot was handed out.
    last_issue: Option<Instant>,
}

impl LimiterState {
    fn push_outcome(&mut self, ok: bool) {
        if self.history.len() == HISTORY_WINDOW {
            self.history.pop_front();
        }
        self.history.push_back(ok);
    }

    /// Reserve the next request slot and return how long the caller must sleep.
    fn reserve(&mut self, spacing: Duration) -> Duration {
        let now = Instant::now();
        let slot = match self.last_issue {
            Some(last) => (last + spacing).max(now),
            None => now,
        };
        self.last_issue = Some(slot);
        slot.saturating_duration_since(now)
    }
}

/// Adaptive rate limiter shared by every fetch path.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    max_interval: Duration,
    state: parking_lot::Mutex<LimiterState>,
    /// Orders async waiters.
    async_gate: tokio::sync::Mutex<()>,
    /// Orders blocking waiters.
    blocking_gate: parking_lot::Mutex<()>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let min_interval = config.min_interval;
        let max_interval = config.max_interval.max(min_interval);
        let initial = if config.initial_rate > 0.0 && config.initial_rate.is_finite() {
            Duration::from_secs_f64(1.0 / config.initial_rate)
        } else {
            max_interval
        };

        Self {
            min_interval,
            max_interval,
            state: parking_lot::Mutex::new(LimiterState {
                current_interval: initial.clamp(min_interval, max_interval),
                consecutive_successes: 0,
                consecutive_errors: 0,
                history: VecDeque::with_capacity(HISTORY_WINDOW),
                last_issue: None,
            }),
            async_gate: tokio::sync::Mutex::new(()),
            blocking_gate: parking_lot::Mutex::new(()),
        }
    }

    /// Current spacing between requests.
    pub fn current_interval(&self) -> Duration {
        self.state.lock().current_interval
    }

    /// Suspend until the next request may be issued.
    pub async fn wait(&self) {
        self.wait_with_floor(None).await;
    }

    /// Like [`wait`](Self::wait), spacing requests by at least `floor`.
    ///
    /// The effective spacing is `max(floor, current_interval)`.
    pub async fn wait_with_floor(&self, floor: Option<Duration>) {
        let _gate = self.async_gate.lock().await;
        let delay = self.reserve(floor);
        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis() as u64, "rate limiting");
            tokio::time::sleep(delay).await;
        }
    }

    /// Block the current thread until the next request may be issued.
    pub fn wait_blocking(&self) {
        self.wait_blocking_with_floor(None);
    }

    /// Blocking twin of [`wait_with_floor`](Self::wait_with_floor).
    pub fn wait_blocking_with_floor(&self, floor: Option<Duration>) {
        let _gate = self.blocking_gate.lock();
        let delay = self.reserve(floor);
        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis() as u64, "rate limiting");
            std::thread::sleep(delay);
        }
    }

    fn reserve(&self, floor: Option<Duration>) -> Duration {
        let mut state = self.state.lock();
        let spacing = floor.map_or(state.current_interval, |f| f.max(state.current_interval));
        state.reserve(spacing)
    }

    /// Record a successful request. Every tenth consecutive success speeds up.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.consecutive_successes += 1;
        state.push_outcome(true);

        if state.consecutive_successes >= SUCCESS_STREAK {
            state.current_interval = state
                .current_interval
                .mul_f64(SPEEDUP_FACTOR)
                .max(self.min_interval);
            state.consecutive_successes = 0;
            debug!(
                interval_ms = state.current_interval.as_millis() as u64,
                "rate limit interval decreased"
            );
        }
    }

    /// Record a failed request.
    ///
    /// An explicit throttle signal doubles the interval at once; otherwise
    /// every third consecutive error grows it by half.
    pub fn record_error(&self, is_rate_limited: bool) {
        let mut state = self.state.lock();
        state.consecutive_errors += 1;
        state.push_outcome(false);

        if is_rate_limited {
            state.current_interval = state
                .current_interval
                .mul_f64(THROTTLE_FACTOR)
                .min(self.max_interval);
            state.consecutive_errors = 0;
            warn!(
                interval_ms = state.current_interval.as_millis() as u64,
                "throttled by remote, interval increased"
            );
        } else if state.consecutive_errors >= ERROR_STREAK {
            state.current_interval = state
                .current_interval
                .mul_f64(SLOWDOWN_FACTOR)
                .min(self.max_interval);
            state.consecutive_errors = 0;
            warn!(
                interval_ms = state.current_interval.as_millis() as u64,
                "repeated errors, interval increased"
            );
        }
    }

    pub fn stats(&self) -> LimiterStats {
        let state = self.state.lock();
        let recent_successes = state.history.iter().filter(|ok| **ok).count();
        let total = state.history.len();
        let interval = state.current_interval.as_secs_f64();

        LimiterStats {
            current_interval: state.current_interval,
            current_rate: if interval > 0.0 { 1.0 / interval } else { f64::INFINITY },
            recent_successes,
            recent_errors: total - recent_successes,
            success_ratio: (total > 0).then(|| recent_successes as f64 / total as f64),
        }
    }
}
