//! Per-queue circuit breaker monitor.
//!
//! A breaker trips when a queue's rolling error rate crosses a high-water
//! mark and closes again once the rate recomputes below a low-water mark
//! after the cooldown. The breaker is advisory in this design: it feeds
//! queue health for upstream load-shedding and never halts the queue
//! processor itself.

use crate::clock::Clock;
use crate::queue::QueueStats;
use crate::{QueueName, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};

// ============================================================================
// Configuration
// ============================================================================

/// Thresholds and timing for breaker evaluation.
///
/// # Default Configuration
///
/// - Trip above 50% rolling error rate
/// - Close below 10% after the cooldown
/// - 60 second cooldown between open and re-evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Error rate above which a closed breaker opens
    pub trip_threshold: f64,

    /// Error rate below which an open breaker closes after cooldown
    pub close_threshold: f64,

    /// Time an open breaker waits before re-evaluating
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            trip_threshold: 0.5,
            close_threshold: 0.1,
            cooldown: Duration::from_secs(60),
        }
    }
}

// ============================================================================
// Breaker State
// ============================================================================

/// Observable breaker state for one queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub is_open: bool,
    pub failure_count: u64,
    pub last_failure_time: Option<Timestamp>,
    pub next_retry_time: Option<Timestamp>,
}

impl CircuitBreakerState {
    fn closed() -> Self {
        Self {
            is_open: false,
            failure_count: 0,
            last_failure_time: None,
            next_retry_time: None,
        }
    }
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self::closed()
    }
}

/// Counter positions at the last evaluation, defining the rolling window
#[derive(Debug, Clone, Copy, Default)]
struct WindowMark {
    enqueued: u64,
    failed: u64,
}

#[derive(Debug, Default)]
struct BreakerEntry {
    state: CircuitBreakerState,
    mark: WindowMark,
}

// ============================================================================
// Monitor
// ============================================================================

/// Tracks one breaker per queue, driven by queue statistics snapshots.
///
/// The rolling error rate is computed from counter deltas between
/// consecutive evaluations, so the window length is the evaluation period.
#[derive(Debug, Default)]
pub struct CircuitBreakerMonitor {
    config: CircuitBreakerConfig,
    entries: Mutex<HashMap<QueueName, BreakerEntry>>,
}

impl CircuitBreakerMonitor {
    /// Create a monitor with the given thresholds
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate every queue's breaker against a statistics snapshot.
    ///
    /// Closed breakers trip when the window error rate exceeds the trip
    /// threshold. Open breakers are only re-examined once the cooldown has
    /// elapsed; they close below the close threshold and otherwise stay
    /// open for another cooldown.
    pub fn evaluate(&self, snapshot: &HashMap<QueueName, QueueStats>, clock: &dyn Clock) {
        let now = clock.now();
        let mut entries = self.entries.lock().unwrap();

        for (queue_name, stats) in snapshot {
            let entry = entries.entry(queue_name.clone()).or_default();

            let window_enqueued = stats.total_enqueued.saturating_sub(entry.mark.enqueued);
            let window_failed = stats.total_failed.saturating_sub(entry.mark.failed);
            let error_rate = if window_enqueued == 0 {
                0.0
            } else {
                window_failed as f64 / window_enqueued as f64
            };

            if entry.state.is_open {
                let due = entry
                    .state
                    .next_retry_time
                    .map(|t| now > t)
                    .unwrap_or(true);
                if due {
                    if error_rate < self.config.close_threshold {
                        info!(
                            queue = queue_name.as_str(),
                            error_rate, "Circuit breaker closed"
                        );
                        entry.state = CircuitBreakerState::closed();
                    } else {
                        entry.state.next_retry_time = Some(now.add_duration(self.config.cooldown));
                    }
                }
            } else if error_rate > self.config.trip_threshold {
                warn!(
                    queue = queue_name.as_str(),
                    error_rate,
                    failures = window_failed,
                    "Circuit breaker opened"
                );
                entry.state.is_open = true;
                entry.state.failure_count = window_failed;
                entry.state.last_failure_time = Some(now);
                entry.state.next_retry_time = Some(now.add_duration(self.config.cooldown));
            }

            entry.mark = WindowMark {
                enqueued: stats.total_enqueued,
                failed: stats.total_failed,
            };
        }
    }

    /// Breaker state for one queue, closed if never evaluated
    pub fn state_of(&self, queue_name: &QueueName) -> CircuitBreakerState {
        self.entries
            .lock()
            .unwrap()
            .get(queue_name)
            .map(|e| e.state.clone())
            .unwrap_or_default()
    }

    /// Check if a queue's breaker is open
    pub fn is_open(&self, queue_name: &QueueName) -> bool {
        self.state_of(queue_name).is_open
    }

    /// Snapshot of every tracked breaker
    pub fn all_states(&self) -> HashMap<QueueName, CircuitBreakerState> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.state.clone()))
            .collect()
    }

    /// Force a breaker back to closed (admin operation)
    pub fn reset(&self, queue_name: &QueueName) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(queue_name) {
            entry.state = CircuitBreakerState::closed();
        }
    }
}

#[cfg(test)]
#[path = "circuit_breaker_tests.rs"]
mod tests;
