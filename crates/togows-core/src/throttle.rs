//! Client-side request pacing.
//!
//! TogoWS publishes no usage limits, so every request made through one client
//! waits on a single governor cell. The quota has a burst of one, which gives
//! strict fixed-interval spacing: no two dispatches are closer together than
//! the configured interval, and nothing queues beyond the callers already
//! waiting.

use std::time::{Duration, Instant};

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use crate::error::TransportError;

/// Type alias for governor's direct rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Three requests per second.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(334);

/// Fixed-interval pacing shared by every request a client makes.
pub struct Throttle {
    /// `None` when the interval is zero (pacing disabled).
    limiter: Option<DirectLimiter>,
    interval: Duration,
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}

impl std::fmt::Debug for Throttle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle")
            .field("interval", &self.interval)
            .finish()
    }
}

impl Throttle {
    /// Create a throttle spacing requests at least `interval` apart.
    pub fn new(interval: Duration) -> Self {
        let limiter = Quota::with_period(interval).map(DirectLimiter::direct);
        Self { limiter, interval }
    }

    /// Create a throttle allowing `n` requests per second.
    pub fn per_second(n: u32) -> Self {
        let ms = 1000u64.div_ceil(n.max(1) as u64);
        Self::new(Duration::from_millis(ms))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until the next dispatch slot is free, then take it.
    ///
    /// The first call on a fresh throttle returns immediately. Concurrent
    /// callers are serialized by governor's atomic state, so the spacing
    /// holds across tasks as well as within one.
    pub async fn await_turn(&self) {
        let Some(limiter) = &self.limiter else {
            return;
        };
        let start = Instant::now();
        limiter.until_ready().await;
        let waited = start.elapsed();
        if !waited.is_zero() {
            tracing::trace!(waited_ms = waited.as_millis() as u64, "throttle wait");
        }
    }
}

/// Check if an HTTP response is a 429 and extract Retry-After if present.
pub fn check_rate_limit_response(resp: &reqwest::Response) -> Result<(), TransportError> {
    if resp.status().as_u16() == 429 {
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        Err(TransportError::RateLimited {
            url: resp.url().to_string(),
            retry_after,
        })
    } else {
        Ok(())
    }
}

/// Parse a Retry-After header value (seconds or HTTP-date).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    // HTTP-date: fall back to a conservative fixed delay
    if value.contains(',') || value.contains("GMT") {
        return Some(Duration::from_secs(5));
    }
    None
}
