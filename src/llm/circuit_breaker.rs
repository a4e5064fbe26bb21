//! Per-model circuit breaker
//!
//! States (derived from the stored entry, never stored explicitly):
//! - Closed: no open deadline, calls pass through
//! - Open: the open deadline is in the future, calls are rejected without I/O
//! - HalfOpen: the deadline has elapsed; the next read resets the entry and lets a probe through

use dashmap::DashMap;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::settings::CircuitBreakerSettings;

/// Health gate keyed by model key
///
/// Implementations must be safe to call concurrently for the same key.
pub trait CircuitBreaker: Send + Sync {
    /// Returns true when calls for `key` must be rejected
    fn is_open(&self, key: &str) -> bool;

    /// Reset the failure count and close the breaker
    fn record_success(&self, key: &str);

    /// Count one transient failure, opening the breaker at the threshold
    fn record_failure(&self, key: &str);

    /// Point-in-time view of every known key
    fn snapshot(&self) -> Vec<BreakerSnapshot>;
}

/// Derived breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Read-only view of one breaker entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub model_key: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    /// Remaining open time in milliseconds, when open
    pub open_for_ms: Option<u64>,
}

#[derive(Debug, Default)]
struct BreakerEntry {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

impl BreakerEntry {
    fn state(&self, now: Instant) -> BreakerState {
        match self.open_until {
            Some(until) if until > now => BreakerState::Open,
            Some(_) => BreakerState::HalfOpen,
            None => BreakerState::Closed,
        }
    }
}

/// In-process breaker table
///
/// One entry per model key, created lazily. Each operation holds the entry's
/// shard lock for its whole read-modify-write, so unrelated keys never contend on a
/// single global lock.
pub struct InMemoryCircuitBreaker {
    entries: DashMap<String, BreakerEntry>,
    failure_threshold: u32,
    break_duration: Duration,
}

impl InMemoryCircuitBreaker {
    pub fn new(settings: CircuitBreakerSettings) -> Self {
        Self {
            entries: DashMap::new(),
            failure_threshold: settings.failure_threshold.max(1),
            break_duration: settings.break_duration(),
        }
    }

    /// State of a single key without triggering the half-open reset
    pub fn state(&self, key: &str) -> BreakerState {
        self.entries
            .get(key)
            .map(|entry| entry.state(Instant::now()))
            .unwrap_or(BreakerState::Closed)
    }

    /// Current consecutive failure count for a key
    pub fn consecutive_failures(&self, key: &str) -> u32 {
        self.entries
            .get(key)
            .map(|entry| entry.consecutive_failures)
            .unwrap_or(0)
    }
}

impl CircuitBreaker for InMemoryCircuitBreaker {
    fn is_open(&self, key: &str) -> bool {
        let mut entry = self.entries.entry(key.to_string()).or_default();
        let now = Instant::now();

        if let Some(open_until) = entry.open_until {
            if open_until > now {
                warn!(
                    model_key = key,
                    remaining_ms = (open_until - now).as_millis() as u64,
                    "Circuit breaker OPEN"
                );
                return true;
            }

            // Cooldown elapsed: the caller holding the entry lock becomes the probe
            entry.open_until = None;
            entry.consecutive_failures = 0;
            info!(model_key = key, "Circuit breaker HALF-OPEN");
        }

        false
    }

    fn record_success(&self, key: &str) {
        let mut entry = self.entries.entry(key.to_string()).or_default();
        if entry.consecutive_failures > 0 || entry.open_until.is_some() {
            info!(model_key = key, "Circuit breaker SUCCESS, resetting state");
        }
        entry.consecutive_failures = 0;
        entry.open_until = None;
    }

    fn record_failure(&self, key: &str) {
        let mut entry = self.entries.entry(key.to_string()).or_default();
        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);

        warn!(
            model_key = key,
            failure_count = entry.consecutive_failures,
            "Circuit breaker failure"
        );

        if entry.consecutive_failures >= self.failure_threshold && entry.open_until.is_none() {
            entry.open_until = Some(Instant::now() + self.break_duration);
            error!(
                model_key = key,
                break_secs = self.break_duration.as_secs(),
                "Circuit breaker OPENED"
            );
        }
    }

    fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let now = Instant::now();
        let mut snapshots: Vec<BreakerSnapshot> = self
            .entries
            .iter()
            .map(|item| {
                let entry = item.value();
                BreakerSnapshot {
                    model_key: item.key().clone(),
                    state: entry.state(now),
                    consecutive_failures: entry.consecutive_failures,
                    open_for_ms: entry
                        .open_until
                        .filter(|until| *until > now)
                        .map(|until| (until - now).as_millis() as u64),
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.model_key.cmp(&b.model_key));
        snapshots
    }
}
