//! Per-source circuit breaker.
//!
//! Tracks consecutive hard failures per source and stops calling a source
//! that keeps failing. After a cooldown one probe call is let through and
//! every other call is refused until the probe settles. Its outcome closes
//! or re-opens the circuit. A probe abandoned by cancellation frees the slot;
//! one that never reports back frees it after another cooldown.
//!
//! ```text
//! ┌────────┐  N failures   ┌────────┐  cooldown   ┌──────────┐
//! │ Closed ├──────────────►│  Open  ├────────────►│ HalfOpen │
//! └───▲────┘               └────────┘             └────┬─────┘
//!     │                         ▲                      │
//!     │  success                │  failure             │
//!     └─────────────────────────┴──────────────────────┘
//! ```
//!
//! Failed calls are never re-issued here; an open circuit only makes the
//! federation skip the source until the cooldown ends.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::types::SourceType;

/// Circuit state for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Healthy; calls go through.
    Closed,
    /// Failing; calls are skipped until the cooldown ends.
    Open,
    /// Cooldown over; a single probe call is in flight.
    HalfOpen,
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit. `0` disables the breaker.
    pub failure_threshold: u32,
    /// Seconds an open circuit waits before allowing a probe.
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_secs: 60,
        }
    }
}

#[derive(Debug, Clone)]
struct Health {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    probe_started_at: Option<Instant>,
}

impl Default for Health {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            probe_started_at: None,
        }
    }
}

/// Health tracker shared by every call the federation makes.
#[derive(Debug)]
pub struct SourceHealth {
    failure_threshold: u32,
    cooldown: Duration,
    sources: Mutex<HashMap<SourceType, Health>>,
}

impl SourceHealth {
    /// Create a tracker from `config`.
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            cooldown: Duration::from_secs(config.cooldown_secs),
            sources: Mutex::new(HashMap::new()),
        }
    }

    fn is_disabled(&self) -> bool {
        self.failure_threshold == 0
    }

    /// Whether a call to `source` should be attempted now.
    ///
    /// An open circuit whose cooldown has elapsed moves to half-open and
    /// allows this one call as the probe. While the probe is outstanding
    /// every other call is refused.
    pub fn should_attempt(&self, source: &SourceType) -> bool {
        if self.is_disabled() {
            return true;
        }
        let mut sources = self.sources.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(health) = sources.get_mut(source) else {
            return true;
        };
        match health.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                let probing = health
                    .probe_started_at
                    .is_some_and(|at| at.elapsed() < self.cooldown);
                if !probing {
                    health.probe_started_at = Some(Instant::now());
                    tracing::debug!(source = %source, "circuit half-open, probing again");
                }
                !probing
            }
            CircuitState::Open => {
                let cooled = health
                    .last_failure_at
                    .is_none_or(|at| at.elapsed() >= self.cooldown);
                if cooled {
                    health.state = CircuitState::HalfOpen;
                    health.probe_started_at = Some(Instant::now());
                    tracing::debug!(source = %source, "circuit half-open, probing");
                }
                cooled
            }
        }
    }

    /// Release the probe slot of a call that ended without an outcome,
    /// such as a cancelled call or an abandoned rate-limit wait.
    pub fn record_abandoned(&self, source: &SourceType) {
        let mut sources = self.sources.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(health) = sources.get_mut(source) {
            if health.state == CircuitState::HalfOpen {
                health.probe_started_at = None;
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self, source: &SourceType) {
        if self.is_disabled() {
            return;
        }
        let mut sources = self.sources.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(health) = sources.get_mut(source) {
            if health.state != CircuitState::Closed {
                tracing::info!(source = %source, "circuit closed");
            }
            *health = Health::default();
        }
    }

    /// Record a hard failure.
    pub fn record_failure(&self, source: &SourceType) {
        if self.is_disabled() {
            return;
        }
        let mut sources = self.sources.lock().unwrap_or_else(PoisonError::into_inner);
        let health = sources.entry(source.clone()).or_default();
        health.consecutive_failures += 1;
        health.last_failure_at = Some(Instant::now());
        let reopen = health.state == CircuitState::HalfOpen;
        health.probe_started_at = None;
        if (reopen || health.consecutive_failures >= self.failure_threshold)
            && health.state != CircuitState::Open
        {
            health.state = CircuitState::Open;
            tracing::warn!(
                source = %source,
                failures = health.consecutive_failures,
                "circuit opened"
            );
        }
    }

    /// Current state for `source`.
    pub fn state(&self, source: &SourceType) -> CircuitState {
        let sources = self.sources.lock().unwrap_or_else(PoisonError::into_inner);
        sources
            .get(source)
            .map_or(CircuitState::Closed, |h| h.state)
    }

    /// `(source, state, consecutive_failures)` for every source seen so far.
    pub fn report(&self) -> Vec<(SourceType, CircuitState, u32)> {
        let sources = self.sources.lock().unwrap_or_else(PoisonError::into_inner);
        let mut report: Vec<_> = sources
            .iter()
            .map(|(source, h)| (source.clone(), h.state, h.consecutive_failures))
            .collect();
        report.sort_by(|a, b| a.0.cmp(&b.0));
        report
    }

    /// Forget all recorded failures.
    pub fn reset(&self) {
        self.sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
