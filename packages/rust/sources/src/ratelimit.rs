//! Per-source request throttling.
//!
//! External registries and portfolio sites are mostly free-tier endpoints;
//! every source gets a token bucket keyed by its source identifier.
//! [`RateLimiter::acquire`] never fails — callers are simply delayed until
//! their source's bucket has a token. Concurrent callers on the same key are
//! serialized to the configured rate; distinct keys never block each other.
//!
//! The limiter is an explicitly constructed, injected instance (no global
//! state) and runs on the tokio clock, so tests drive it deterministically
//! with a paused runtime.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Throttle settings for one source.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    /// Minimum interval between grants once the burst allowance is spent.
    pub min_interval: Duration,
    /// Number of grants allowed before throttling kicks in.
    pub burst: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(1000),
            burst: 1,
        }
    }
}

#[derive(Debug)]
struct BucketState {
    /// May go negative: each waiter pre-books its token, which serializes
    /// concurrent callers on the same key.
    tokens: f64,
    refreshed_at: Instant,
}

/// Registry of per-source token buckets.
#[derive(Debug, Default)]
pub struct RateLimiter {
    limits: HashMap<String, RateLimit>,
    default_limit: RateLimit,
    states: Mutex<HashMap<String, BucketState>>,
}

impl RateLimiter {
    /// Limiter where every source falls back to [`RateLimit::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Limiter with a different fallback for unregistered sources.
    pub fn with_default(default_limit: RateLimit) -> Self {
        Self {
            default_limit,
            ..Self::default()
        }
    }

    /// Register a per-source limit, replacing any previous one.
    pub fn set_limit(&mut self, source_key: impl Into<String>, limit: RateLimit) {
        self.limits.insert(source_key.into(), limit);
    }

    /// Suspend until the source's bucket has a token.
    ///
    /// Never returns an error: there is no "rate limit exceeded" outcome,
    /// only delay.
    pub async fn acquire(&self, source_key: &str) {
        let wait = {
            let mut states = self.states.lock().await;
            let limit = self
                .limits
                .get(source_key)
                .copied()
                .unwrap_or(self.default_limit);
            let now = Instant::now();
            let state = states
                .entry(source_key.to_string())
                .or_insert_with(|| BucketState {
                    tokens: f64::from(limit.burst),
                    refreshed_at: now,
                });

            if limit.min_interval.is_zero() {
                Duration::ZERO
            } else {
                let elapsed = now.duration_since(state.refreshed_at).as_secs_f64();
                let refilled = elapsed / limit.min_interval.as_secs_f64();
                state.tokens = (state.tokens + refilled).min(f64::from(limit.burst));
                state.refreshed_at = now;

                state.tokens -= 1.0;
                if state.tokens >= 0.0 {
                    Duration::ZERO
                } else {
                    limit.min_interval.mul_f64(-state.tokens)
                }
            }
        };

        if !wait.is_zero() {
            trace!(source = source_key, wait_ms = wait.as_millis() as u64, "throttling");
            tokio::time::sleep(wait).await;
        }
    }
}
