//! Per-source token-bucket admission control.
//!
//! Each [`SourceType`] gets an independent [`TokenBucket`] built lazily from
//! its configured [`RateLimit`]. Buckets refill continuously: every admission
//! attempt credits the tokens accrued since the previous one, capped at the
//! burst size. A caller that finds the bucket empty sleeps exactly long
//! enough for one token to accrue and then re-checks, so concurrent waiters
//! never over- or under-credit the bucket.
//!
//! Locking is two-level. The registry mutex only guards which sources have
//! buckets; each bucket has its own mutex for refill/consume. Neither is held
//! while a caller sleeps.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::context::Context;
use crate::error::Result;
use crate::types::SourceType;

/// Tolerance for float drift when deciding whether a whole token is available.
const TOKEN_EPSILON: f64 = 1e-9;

/// Rate policy for one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimit {
    /// Sustained request rate. `0` means unlimited.
    pub requests_per_minute: u32,
    /// Maximum burst. `0` means one sixth of `requests_per_minute`
    /// (about ten seconds of traffic).
    pub burst_size: u32,
}

impl RateLimit {
    /// A policy that never throttles.
    pub const UNLIMITED: RateLimit = RateLimit {
        requests_per_minute: 0,
        burst_size: 0,
    };

    /// Policy with an explicit rate and burst.
    pub fn new(requests_per_minute: u32, burst_size: u32) -> Self {
        Self {
            requests_per_minute,
            burst_size,
        }
    }

    /// Whether this policy never throttles.
    pub fn is_unlimited(&self) -> bool {
        self.requests_per_minute == 0
    }

    /// Burst size after applying the default.
    pub fn effective_burst(&self) -> u32 {
        if self.burst_size > 0 {
            self.burst_size
        } else {
            (self.requests_per_minute / 6).max(1)
        }
    }
}

/// Mutable state for one bucket.
#[derive(Debug)]
struct BucketState {
    tokens: f64,
    max_tokens: f64,
    /// Tokens added per second.
    refill_rate: f64,
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
    }
}

/// Continuous-refill token bucket.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Build a full bucket for `limit`, or `None` if the policy is unlimited.
    pub fn new(limit: RateLimit) -> Option<Self> {
        if limit.is_unlimited() {
            return None;
        }
        let max_tokens = f64::from(limit.effective_burst());
        Some(Self {
            state: Mutex::new(BucketState {
                tokens: max_tokens,
                max_tokens,
                refill_rate: f64::from(limit.requests_per_minute) / 60.0,
                last_refill: Instant::now(),
            }),
        })
    }

    /// Take a token if one is available.
    ///
    /// On failure returns how long until one token will have accrued.
    pub fn try_take(&self) -> std::result::Result<(), Duration> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.refill(Instant::now());
        if state.tokens + TOKEN_EPSILON >= 1.0 {
            state.tokens = (state.tokens - 1.0).max(0.0);
            Ok(())
        } else {
            Err(Duration::from_secs_f64(
                (1.0 - state.tokens) / state.refill_rate,
            ))
        }
    }

    /// Take a token, sleeping under `ctx` until one is available.
    ///
    /// # Errors
    ///
    /// Returns the context's cancellation error if it ends while waiting.
    pub async fn take(&self, ctx: &Context) -> Result<()> {
        loop {
            match self.try_take() {
                Ok(()) => return Ok(()),
                Err(wait) => ctx.sleep(wait).await?,
            }
        }
    }

    /// Tokens currently available, after refilling.
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.refill(Instant::now());
        state.tokens
    }
}

#[derive(Debug, Default)]
struct Registry {
    policies: HashMap<SourceType, RateLimit>,
    /// `None` marks a source known to be unlimited.
    buckets: HashMap<SourceType, Option<Arc<TokenBucket>>>,
}

/// Registry of per-source buckets.
#[derive(Debug, Default)]
pub struct RateLimiter {
    registry: Mutex<Registry>,
}

impl RateLimiter {
    /// A limiter with the given per-source policies. Unlisted sources are unlimited.
    pub fn new(policies: HashMap<SourceType, RateLimit>) -> Self {
        Self {
            registry: Mutex::new(Registry {
                policies,
                buckets: HashMap::new(),
            }),
        }
    }

    /// Replace the policy for `source`.
    ///
    /// The existing bucket is discarded; the next access builds a fresh one.
    /// Other sources' buckets are untouched.
    pub fn set_limit(&self, source: SourceType, limit: RateLimit) {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry.buckets.remove(&source);
        tracing::info!(
            source = %source,
            requests_per_minute = limit.requests_per_minute,
            burst_size = limit.burst_size,
            "rate limit updated"
        );
        registry.policies.insert(source, limit);
    }

    /// The policy currently configured for `source`.
    pub fn limit(&self, source: &SourceType) -> RateLimit {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry.policies.get(source).copied().unwrap_or_default()
    }

    /// The bucket for `source`, creating it on first use.
    pub fn bucket(&self, source: &SourceType) -> Option<Arc<TokenBucket>> {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(bucket) = registry.buckets.get(source) {
            return bucket.clone();
        }
        let limit = registry.policies.get(source).copied().unwrap_or_default();
        let bucket = TokenBucket::new(limit).map(Arc::new);
        registry.buckets.insert(source.clone(), bucket.clone());
        bucket
    }

    /// Wait for admission to `source` under `ctx`.
    ///
    /// # Errors
    ///
    /// Returns the context's cancellation error if it ends while waiting.
    pub async fn wait(&self, ctx: &Context, source: &SourceType) -> Result<()> {
        match self.bucket(source) {
            Some(bucket) => bucket.take(ctx).await,
            None => Ok(()),
        }
    }

    /// Non-blocking admission check for `source`.
    pub fn try_acquire(&self, source: &SourceType) -> std::result::Result<(), Duration> {
        match self.bucket(source) {
            Some(bucket) => bucket.try_take(),
            None => Ok(()),
        }
    }
}
