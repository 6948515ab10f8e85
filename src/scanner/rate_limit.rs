//! Token bucket throttle shared by every scan
//!
//! All callers queue on one async mutex (FIFO in tokio), so tokens are
//! handed out in arrival order and never observed twice.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::trace;

use crate::config::ScannerConfig;

const MIN_RATE: f64 = 0.001;

#[derive(Debug)]
struct Bucket {
    /// Always within `0..=burst`
    tokens: f64,
    last_update: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant, rate: f64, burst: f64) {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).clamp(0.0, burst);
        self.last_update = now;
    }
}

/// Rate limiter for scan initiation
#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// Tokens refilled per second
    rate: f64,
    /// Bucket capacity
    burst: f64,
    bucket: Arc<Mutex<Bucket>>,
}

impl RateLimiter {
    /// Create a limiter whose burst is twice its rate
    pub fn new(rate: f64) -> Self {
        Self::with_burst(rate, rate * 2.0)
    }

    /// Create a limiter with an explicit bucket capacity
    ///
    /// Non-positive rates are raised to a tiny positive rate and the burst
    /// is never below one token, so `acquire` always terminates.
    pub fn with_burst(rate: f64, burst: f64) -> Self {
        let rate = if rate.is_finite() && rate > 0.0 {
            rate
        } else {
            MIN_RATE
        };
        let burst = if burst.is_finite() { burst.max(1.0) } else { 1.0 };

        Self {
            rate,
            burst,
            bucket: Arc::new(Mutex::new(Bucket {
                tokens: burst,
                last_update: Instant::now(),
            })),
        }
    }

    pub fn from_config(config: &ScannerConfig) -> Self {
        match config.burst {
            Some(burst) => Self::with_burst(config.requests_per_second, burst),
            None => Self::new(config.requests_per_second),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn burst(&self) -> f64 {
        self.burst
    }

    /// Wait for a single token
    pub async fn acquire(&self) {
        self.acquire_n(1).await;
    }

    /// Wait until `tokens` are available, then take them
    ///
    /// Requests larger than the bucket are capped at the bucket size.
    pub async fn acquire_n(&self, tokens: u32) {
        let needed = f64::from(tokens).min(self.burst);
        let mut bucket = self.bucket.lock().await;

        loop {
            bucket.refill(Instant::now(), self.rate, self.burst);
            if bucket.tokens >= needed {
                bucket.tokens -= needed;
                return;
            }

            let deficit = needed - bucket.tokens;
            let wait = Duration::from_secs_f64(deficit / self.rate);
            trace!("Rate limiter waiting {:?} for {} token(s)", wait, tokens);
            sleep(wait).await;
        }
    }

    /// Take one token if it is immediately available
    pub fn try_acquire(&self) -> bool {
        let Ok(mut bucket) = self.bucket.try_lock() else {
            return false;
        };
        bucket.refill(Instant::now(), self.rate, self.burst);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently in the bucket
    pub async fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().await;
        bucket.refill(Instant::now(), self.rate, self.burst);
        bucket.tokens
    }
}
