//! Throughput gate for outbound calls to a single external endpoint class.
//!
//! [`ThroughputLimiter::acquire`] suspends the calling task until permission
//! is granted; it never rejects. Two modes:
//!
//! - interval limiter (burst): a bucket of `events_per_interval` tokens is
//!   refilled in full once per `interval`, so callers may drain the whole
//!   bucket immediately after a refill.
//! - rate limiter (strict): grants are spaced `interval / events_per_interval`
//!   apart, smoothing the request rate with no burst allowance.
//!
//! A limiter's counters are exclusive to that limiter and guarded by its own
//! lock; wrap it in an `Arc` to share one budget across call sites.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

use crate::config::RateLimitConfig;

#[derive(Debug)]
enum State {
    Interval {
        capacity: u32,
        interval: Duration,
        tokens: u32,
        window_start: Option<Instant>,
    },
    Spaced {
        spacing: Duration,
        next_grant: Option<Instant>,
    },
}

/// A reusable throughput gate. See the module docs for the two modes.
#[derive(Debug)]
pub struct ThroughputLimiter {
    state: Mutex<State>,
}

impl ThroughputLimiter {
    /// Burst-mode limiter: `events_per_interval` tokens refilled once per
    /// `interval`.
    pub fn interval_limiter(events_per_interval: u32, interval: Duration) -> Self {
        let capacity = events_per_interval.max(1);
        Self {
            state: Mutex::new(State::Interval {
                capacity,
                interval,
                tokens: capacity,
                window_start: None,
            }),
        }
    }

    /// Strict-mode limiter: grants spaced `interval / events_per_interval`
    /// apart.
    pub fn rate_limiter(events_per_interval: u32, interval: Duration) -> Self {
        let spacing = interval / events_per_interval.max(1);
        Self {
            state: Mutex::new(State::Spaced {
                spacing,
                next_grant: None,
            }),
        }
    }

    /// Build a limiter from config, selecting the mode by `allow_burst`.
    pub fn from_config(config: &RateLimitConfig) -> Self {
        if config.allow_burst {
            Self::interval_limiter(config.events_per_interval, config.interval())
        } else {
            Self::rate_limiter(config.events_per_interval, config.interval())
        }
    }

    /// Suspend until permission to proceed is granted. Never fails.
    ///
    /// Cancellation-safe: limiter state is only mutated at the moment a
    /// grant is taken, so a waiter dropped mid-sleep consumes no budget.
    pub async fn acquire(&self) {
        loop {
            let deadline = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                match &mut *state {
                    State::Interval {
                        capacity,
                        interval,
                        tokens,
                        window_start,
                    } => {
                        let expired = window_start
                            .map_or(true, |start| now.duration_since(start) >= *interval);
                        if expired {
                            *window_start = Some(now);
                            *tokens = *capacity;
                        }
                        if *tokens > 0 {
                            *tokens -= 1;
                            return;
                        }
                        // Bucket exhausted; wait for the next refill.
                        window_start.unwrap_or(now) + *interval
                    }
                    State::Spaced {
                        spacing,
                        next_grant,
                    } => {
                        let grant = next_grant.map_or(now, |g| g.max(now));
                        if grant <= now {
                            *next_grant = Some(grant + *spacing);
                            return;
                        }
                        grant
                    }
                }
            };

            // Re-race after the sleep; concurrent waiters that lose take the
            // next deadline.
            sleep_until(deadline).await;
        }
    }
}
