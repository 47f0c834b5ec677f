//! Route metrics and health snapshots.
//!
//! Everything in this module is derived from queue statistics and breaker
//! state; snapshots are rebuildable at any time and never authoritative.

use crate::queue::QueueStats;
use crate::{QueueName, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// Route Metrics
// ============================================================================

/// Derived health snapshot for one route (queue).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteMetrics {
    pub queue_name: QueueName,

    /// Average enqueue-to-delivery latency
    pub average_latency: Duration,

    /// Delivered attempts over all resolved attempts (delivered + failed)
    pub success_rate: f64,

    /// Deliveries per minute over the last refresh window
    pub throughput_per_minute: f64,

    /// Failed attempts per enqueued message
    pub error_rate: f64,

    /// Delivered messages over all terminally resolved messages
    /// (delivered + exhausted + expired)
    pub reliability_score: f64,

    /// Average delivery attempts spent per delivered message; a coarse
    /// relative cost estimate, 1.0 is the floor
    pub estimated_cost_per_delivery: f64,

    pub refreshed_at: Timestamp,
}

impl RouteMetrics {
    /// Rebuild metrics from a queue's statistics.
    ///
    /// `throughput_per_minute` needs a window and is left at zero here;
    /// the aggregator fills it in from refresh-to-refresh deltas.
    pub fn from_stats(queue_name: QueueName, stats: &QueueStats, now: Timestamp) -> Self {
        let attempts = stats.total_dequeued + stats.total_failed;
        let success_rate = if attempts == 0 {
            1.0
        } else {
            stats.total_dequeued as f64 / attempts as f64
        };

        let resolved = stats.total_dequeued + stats.total_expired;
        let reliability_score = if resolved == 0 {
            1.0
        } else {
            stats.total_dequeued as f64 / resolved as f64
        };

        let estimated_cost_per_delivery = if stats.total_dequeued == 0 {
            1.0
        } else {
            (attempts as f64 / stats.total_dequeued as f64).max(1.0)
        };

        Self {
            queue_name,
            average_latency: stats.average_wait(),
            success_rate,
            throughput_per_minute: 0.0,
            error_rate: stats.error_rate(),
            reliability_score,
            estimated_cost_per_delivery,
            refreshed_at: now,
        }
    }
}

// ============================================================================
// Queue Health
// ============================================================================

/// Coarse health classification for a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Critical,
}

/// Health report for one queue, used for upstream load-shedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueHealthReport {
    pub health: HealthLevel,

    /// Current size over capacity, 0.0 to 1.0
    pub current_load: f64,

    pub error_rate: f64,

    /// Advisory breaker state for this queue
    pub breaker_open: bool,

    pub recommendations: Vec<String>,
}

impl QueueHealthReport {
    /// Derive a health report from load, statistics, and breaker state
    pub fn derive(current_load: f64, stats: &QueueStats, breaker_open: bool) -> Self {
        let error_rate = stats.error_rate();
        let mut recommendations = Vec::new();

        if breaker_open {
            recommendations.push("circuit breaker open: shed or reroute traffic".to_string());
        }
        if current_load >= 0.8 {
            recommendations.push("queue near capacity: add consumers or raise capacity".to_string());
        }
        if error_rate >= 0.25 {
            recommendations.push("elevated failure rate: check delivery sink health".to_string());
        }

        let health = if breaker_open || current_load >= 0.95 || error_rate >= 0.5 {
            HealthLevel::Critical
        } else if current_load >= 0.8 || error_rate >= 0.25 {
            HealthLevel::Degraded
        } else {
            HealthLevel::Healthy
        };

        Self {
            health,
            current_load,
            error_rate,
            breaker_open,
            recommendations,
        }
    }
}

// ============================================================================
// Analytics Aggregator
// ============================================================================

/// Throughput window position from the previous refresh
#[derive(Debug, Clone, Copy)]
struct RefreshMark {
    dequeued: u64,
    at: Timestamp,
}

#[derive(Debug, Default)]
struct AggregatorInner {
    snapshots: HashMap<QueueName, RouteMetrics>,
    marks: HashMap<QueueName, RefreshMark>,
}

/// Periodically rebuilt per-route metrics.
///
/// Driven by an explicit `refresh` tick; reads between refreshes see the
/// last snapshot. Losing the aggregator loses nothing, every value is
/// recomputable from queue statistics.
#[derive(Debug, Default)]
pub struct AnalyticsAggregator {
    inner: Mutex<AggregatorInner>,
}

impl AnalyticsAggregator {
    /// Create an empty aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild every route snapshot from the given statistics
    pub fn refresh(&self, snapshot: &HashMap<QueueName, QueueStats>, now: Timestamp) {
        let mut inner = self.inner.lock().unwrap();

        for (queue_name, stats) in snapshot {
            let mut metrics = RouteMetrics::from_stats(queue_name.clone(), stats, now);

            if let Some(mark) = inner.marks.get(queue_name) {
                let window = now.duration_since(mark.at);
                let delivered = stats.total_dequeued.saturating_sub(mark.dequeued);
                if !window.is_zero() {
                    metrics.throughput_per_minute =
                        delivered as f64 * 60.0 / window.as_secs_f64();
                }
            }

            inner.marks.insert(
                queue_name.clone(),
                RefreshMark {
                    dequeued: stats.total_dequeued,
                    at: now,
                },
            );
            inner.snapshots.insert(queue_name.clone(), metrics);
        }
    }

    /// Last refreshed metrics for every route
    pub fn metrics(&self) -> HashMap<QueueName, RouteMetrics> {
        self.inner.lock().unwrap().snapshots.clone()
    }

    /// Last refreshed metrics for one route
    pub fn metrics_for(&self, queue_name: &QueueName) -> Option<RouteMetrics> {
        self.inner.lock().unwrap().snapshots.get(queue_name).cloned()
    }
}

// ============================================================================
// Analytics Report
// ============================================================================

/// Aggregate routing report over a caller-chosen timeframe.
///
/// Rebuilt from current queue statistics on every call; the timeframe is
/// informational context for the reader, not a filter over retained
/// history (none is kept).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingAnalyticsReport {
    pub timeframe: Duration,
    pub generated_at: Timestamp,
    pub routes: Vec<RouteMetrics>,
    pub total_enqueued: u64,
    pub total_delivered: u64,
    pub total_failed_attempts: u64,
    pub total_expired: u64,
    pub overall_success_rate: f64,
}

impl RoutingAnalyticsReport {
    /// Build a report from a statistics snapshot
    pub fn build(
        timeframe: Duration,
        snapshot: &HashMap<QueueName, QueueStats>,
        now: Timestamp,
    ) -> Self {
        let mut routes: Vec<RouteMetrics> = snapshot
            .iter()
            .map(|(name, stats)| RouteMetrics::from_stats(name.clone(), stats, now))
            .collect();
        routes.sort_by(|a, b| a.queue_name.as_str().cmp(b.queue_name.as_str()));

        let total_enqueued: u64 = snapshot.values().map(|s| s.total_enqueued).sum();
        let total_delivered: u64 = snapshot.values().map(|s| s.total_dequeued).sum();
        let total_failed_attempts: u64 = snapshot.values().map(|s| s.total_failed).sum();
        let total_expired: u64 = snapshot.values().map(|s| s.total_expired).sum();

        let attempts = total_delivered + total_failed_attempts;
        let overall_success_rate = if attempts == 0 {
            1.0
        } else {
            total_delivered as f64 / attempts as f64
        };

        Self {
            timeframe,
            generated_at: now,
            routes,
            total_enqueued,
            total_delivered,
            total_failed_attempts,
            total_expired,
            overall_success_rate,
        }
    }
}

#[cfg(test)]
#[path = "analytics_tests.rs"]
mod tests;
