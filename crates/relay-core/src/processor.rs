//! Tick-driven delivery processing.
//!
//! A [`QueueProcessor`] drains ready entries from every queue in batches,
//! dispatches them concurrently to a [`DeliverySink`], and applies the
//! outcomes: completion on success, backoff-gated retry on failure, and
//! dead-lettering (or a logged drop) at retry exhaustion. Every tick ends
//! with a TTL sweep across all queues.
//!
//! Ticks never overlap. A tick that fires while the previous one is still
//! running is skipped, not queued.

use crate::clock::Clock;
use crate::message::Message;
use crate::queue::{FailOutcome, QueueSet};
use crate::receipts::ReceiptStore;
use crate::QueueName;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Dead-letter reason recorded when a message exhausts its retries
pub const EXHAUSTED_REASON: &str = "max_retries_exceeded";

// ============================================================================
// Delivery Sink
// ============================================================================

/// Failure surfaced by a delivery sink.
///
/// The processor treats both variants the same way (the attempt failed and
/// the retry path applies); the distinction is for humans reading logs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    /// The sink could not be reached or timed out
    #[error("delivery sink unavailable: {reason}")]
    Unavailable { reason: String },

    /// The sink refused the message
    #[error("message rejected by sink: {reason}")]
    Rejected { reason: String },
}

/// Destination for dequeued messages.
///
/// Implementations hand messages to their recipients (an in-process agent
/// registry, a network transport, a test recorder). Delivery must be
/// idempotent per message ID: a TTL sweep can race an in-flight attempt,
/// and the losing side resolves as a no-op.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, queue_name: &QueueName, message: &Message) -> Result<(), SinkError>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Tuning knobs for the processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Maximum entries dispatched per queue per tick
    pub batch_size: usize,

    /// Period of the driver loop in [`QueueProcessor::run`]
    pub tick_interval: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            tick_interval: Duration::from_millis(100),
        }
    }
}

// ============================================================================
// Tick Summary
// ============================================================================

/// What one tick did, for logs and tests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// The tick found a previous tick still running and did nothing
    pub skipped: bool,
    /// Entries handed to the sink this tick
    pub dispatched: usize,
    /// Entries delivered and completed
    pub delivered: usize,
    /// Entries re-queued with a backoff gate
    pub retried: usize,
    /// Entries that hit the retry cap
    pub exhausted: usize,
    /// Entries removed by the TTL sweep
    pub expired: usize,
}

impl TickSummary {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

// ============================================================================
// Queue Processor
// ============================================================================

/// Drives delivery attempts across a [`QueueSet`].
///
/// Queue locks are taken to select a batch and again to apply outcomes;
/// they are never held across the dispatch await.
pub struct QueueProcessor {
    queues: Arc<QueueSet>,
    receipts: Arc<ReceiptStore>,
    sink: Arc<dyn DeliverySink>,
    clock: Arc<dyn Clock>,
    config: ProcessorConfig,
    ticking: AtomicBool,
}

impl QueueProcessor {
    pub fn new(
        queues: Arc<QueueSet>,
        receipts: Arc<ReceiptStore>,
        sink: Arc<dyn DeliverySink>,
        clock: Arc<dyn Clock>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            queues,
            receipts,
            sink,
            clock,
            config,
            ticking: AtomicBool::new(false),
        }
    }

    /// Run one delivery cycle.
    ///
    /// Skips immediately if a previous tick is still in progress.
    pub async fn tick(&self) -> TickSummary {
        if self
            .ticking
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Previous tick still running, skipping");
            return TickSummary::skipped();
        }

        let summary = self.run_cycle().await;
        self.ticking.store(false, Ordering::Release);

        if summary != TickSummary::default() {
            debug!(
                dispatched = summary.dispatched,
                delivered = summary.delivered,
                retried = summary.retried,
                exhausted = summary.exhausted,
                expired = summary.expired,
                "Tick complete"
            );
        }

        summary
    }

    /// Drive ticks on a fixed period until shutdown is signalled.
    ///
    /// Missed intervals are skipped rather than bursted, matching the
    /// tick-level overlap guard.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_ms = self.config.tick_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Queue processor started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Queue processor stopping");
                        break;
                    }
                }
            }
        }
    }

    async fn run_cycle(&self) -> TickSummary {
        let now = self.clock.now();
        let mut summary = TickSummary::default();
        let queues = self.queues.all();

        for (queue_name, queue) in &queues {
            let batch = {
                let mut queue = queue.lock().unwrap();
                queue.take_batch(self.config.batch_size, now)
            };

            if batch.is_empty() {
                continue;
            }
            summary.dispatched += batch.len();

            // Dispatch the whole batch concurrently, then await everything
            // before touching queue state again
            let mut dispatch = JoinSet::new();
            for entry in batch {
                let sink = Arc::clone(&self.sink);
                let queue_name = queue_name.clone();
                dispatch.spawn(async move {
                    let result = sink.deliver(&queue_name, &entry.message).await;
                    (entry.message.message_id, result)
                });
            }

            let mut outcomes = Vec::new();
            while let Some(joined) = dispatch.join_next().await {
                match joined {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(error) => {
                        warn!(queue = queue_name.as_str(), %error, "Delivery task failed to join");
                    }
                }
            }

            let resolved_at = self.clock.now();
            for (message_id, result) in outcomes {
                match result {
                    Ok(()) => {
                        let completed = {
                            let mut queue = queue.lock().unwrap();
                            queue.complete(&message_id, resolved_at)
                        };
                        // None means the TTL sweep won the race; nothing to do
                        if completed.is_some() {
                            self.receipts.mark_delivered(&message_id, self.clock.as_ref());
                            summary.delivered += 1;
                        }
                    }
                    Err(error) => {
                        warn!(
                            message_id = %message_id,
                            queue = queue_name.as_str(),
                            %error,
                            "Delivery attempt failed"
                        );
                        self.handle_failure(queue_name, queue, &message_id, resolved_at, &mut summary);
                    }
                }
            }
        }

        // TTL sweep runs every tick over every queue, regardless of entry
        // status; in-flight attempts on swept entries resolve as no-ops
        for (queue_name, queue) in &queues {
            let expired = {
                let mut queue = queue.lock().unwrap();
                queue.sweep_expired(now)
            };

            if expired.is_empty() {
                continue;
            }

            debug!(
                queue = queue_name.as_str(),
                count = expired.len(),
                "Expired entries swept"
            );
            for entry in &expired {
                self.receipts.mark_failed(&entry.message.message_id);
            }
            summary.expired += expired.len();
        }

        summary
    }

    fn handle_failure(
        &self,
        queue_name: &QueueName,
        queue: &Arc<std::sync::Mutex<crate::queue::Queue>>,
        message_id: &crate::MessageId,
        now: crate::Timestamp,
        summary: &mut TickSummary,
    ) {
        let (outcome, dead_letter) = {
            let mut queue = queue.lock().unwrap();
            // A rule-stamped retry policy on the message wins over the
            // queue's configured one
            let policy = queue
                .entries()
                .find(|e| &e.message.message_id == message_id)
                .and_then(|e| e.message.metadata.get(crate::queue::RETRY_POLICY_KEY))
                .and_then(|value| serde_json::from_value(value.clone()).ok())
                .unwrap_or_else(|| queue.config().retry_policy.clone());
            let dead_letter = queue.config().dead_letter.clone();
            (queue.fail(message_id, &policy, now), dead_letter)
        };

        match outcome {
            FailOutcome::Retrying { next_attempt_at } => {
                summary.retried += 1;
                debug!(
                    message_id = %message_id,
                    queue = queue_name.as_str(),
                    next_attempt_at = %next_attempt_at,
                    "Entry re-queued for retry"
                );
            }
            FailOutcome::Exhausted(entry) => {
                summary.exhausted += 1;
                self.receipts.mark_failed(message_id);

                match dead_letter {
                    Some(config) => {
                        if let Err(error) = self.queues.dead_letter(
                            queue_name,
                            &config.queue_name,
                            entry.message,
                            EXHAUSTED_REASON,
                            self.clock.as_ref(),
                        ) {
                            warn!(
                                message_id = %message_id,
                                queue = queue_name.as_str(),
                                %error,
                                "Dead-letter move failed, message dropped"
                            );
                        }
                    }
                    None => {
                        info!(
                            message_id = %message_id,
                            queue = queue_name.as_str(),
                            attempts = entry.attempts,
                            "Retries exhausted with no dead-letter target, message dropped"
                        );
                    }
                }
            }
            FailOutcome::AlreadyRemoved => {}
        }
    }
}

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;
