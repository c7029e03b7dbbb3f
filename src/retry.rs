//! Retry, circuit breaking, and rate limiting for upstream calls.
//!
//! The item fetcher and the completion client each make exactly one attempt
//! per call. Callers wrap those calls in a [`RetryPolicy`], share one
//! [`CircuitBreaker`] per upstream, and pace model calls through a
//! [`RateLimiter`].
//!
//! # Retry Strategy
//!
//! - Transient errors (network, HTTP 429, 5xx) → retry with exponential backoff
//! - Anything else (404, malformed reply) → fail immediately
//! - Backoff: `base`, `2 × base`, `4 × base`, ... capped at `max_delay`

use std::fmt::Display;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::Transient;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
        }
    }

    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or
    /// retries are exhausted.
    ///
    /// If `breaker` is open the call fails fast with `open_err()`. The
    /// breaker only counts transient failures, so a well-formed refusal
    /// from a healthy upstream never trips it.
    pub async fn run<T, E, F, Fut>(
        &self,
        breaker: &CircuitBreaker,
        open_err: impl FnOnce() -> E,
        mut op: F,
    ) -> Result<T, E>
    where
        E: Transient + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !breaker.allow() {
            return Err(open_err());
        }

        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => {
                    breaker.record_success();
                    return Ok(v);
                }
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    debug!(
                        upstream = breaker.name(),
                        attempt,
                        max = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after transient error: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if e.is_transient() {
                        breaker.record_failure();
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Opens after `threshold` consecutive failed calls and rejects calls until
/// `cooldown` has passed. The first call after cooldown is a trial: one more
/// failure reopens it immediately.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, threshold: u32, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            threshold: threshold.max(1),
            cooldown,
            state: Mutex::new(BreakerState::default()),
        }
    }

    pub fn from_config(name: impl Into<String>, config: &RetryConfig) -> Self {
        Self::new(name, config.breaker_threshold, config.breaker_cooldown())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn allow(&self) -> bool {
        let mut state = self.lock();
        match state.opened_at {
            None => true,
            Some(at) if at.elapsed() >= self.cooldown => {
                state.opened_at = None;
                state.consecutive_failures = self.threshold - 1;
                true
            }
            Some(_) => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.lock().opened_at.is_some()
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        state.consecutive_failures = 0;
        state.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut state = self.lock();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.threshold && state.opened_at.is_none() {
            warn!(
                upstream = %self.name,
                failures = state.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs_f64(),
                "circuit opened"
            );
            state.opened_at = Some(Instant::now());
        }
    }
}

/// Spaces calls at least `interval` apart across all holders.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: tokio::sync::Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: tokio::sync::Mutex::new(None),
        }
    }

    /// Wait for the next free slot.
    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }
        let mut next = self.next_slot.lock().await;
        let now = Instant::now();
        let slot = match *next {
            Some(t) if t > now => {
                tokio::time::sleep_until(t).await;
                t
            }
            _ => now,
        };
        *next = Some(slot + self.interval);
    }
}
