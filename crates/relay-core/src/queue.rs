//! Bounded message queues with fifo/priority disciplines.
//!
//! Each queue wraps messages in [`QueueEntry`] records carrying attempt and
//! status bookkeeping, keeps running [`QueueStats`], and resolves overflow
//! deterministically: either an atomic move to a configured dead-letter
//! queue or an explicit capacity error, never a silent drop.

use crate::clock::Clock;
use crate::message::Message;
use crate::{MessageId, QueueName, RetryPolicy, RouterError, Timestamp, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Metadata key recording why a message was dead-lettered
pub const DEAD_LETTER_REASON_KEY: &str = "reason";

/// Metadata key recording the queue a dead-lettered message came from
pub const DEAD_LETTER_ORIGIN_KEY: &str = "origin_queue";

/// Metadata key carrying a per-message retry policy override.
///
/// Routing rules can stamp a policy here; it takes precedence over the
/// queue's configured policy when a delivery attempt fails.
pub const RETRY_POLICY_KEY: &str = "retry_policy";

/// Capacity used for lazily created dead-letter queues
const DEFAULT_DEAD_LETTER_CAPACITY: usize = 1_000;

/// Default delivery attempts before retry exhaustion
pub const DEFAULT_MAX_RETRIES: u32 = 3;

// ============================================================================
// Configuration Types
// ============================================================================

/// Ordering discipline for a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueDiscipline {
    /// Strict insertion order
    Fifo,
    /// Rank order with insertion-order tie-break
    Priority,
}

/// Dead-letter target and retry cap for a queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterConfig {
    pub queue_name: QueueName,
    pub max_retries: u32,
}

impl DeadLetterConfig {
    /// Create a dead-letter config with the default retry cap
    pub fn new(queue_name: QueueName) -> Self {
        Self {
            queue_name,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Set the retry cap
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Configuration for a single queue.
///
/// Names are unique within a [`QueueSet`]. The persistence flag is carried
/// and reported but has no durable backing in this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub name: QueueName,
    pub discipline: QueueDiscipline,
    pub capacity: usize,
    pub max_age: Option<Duration>,
    pub persistent: bool,
    pub dead_letter: Option<DeadLetterConfig>,
    /// Base per-message processing delay used for delivery estimates and
    /// as the retry backoff seed when no rule overrides it
    pub retry_policy: RetryPolicy,
}

impl QueueConfig {
    /// Create a fifo queue configuration
    pub fn fifo(name: QueueName, capacity: usize) -> Self {
        Self {
            name,
            discipline: QueueDiscipline::Fifo,
            capacity,
            max_age: None,
            persistent: false,
            dead_letter: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Create a priority queue configuration
    pub fn priority(name: QueueName, capacity: usize) -> Self {
        Self {
            discipline: QueueDiscipline::Priority,
            ..Self::fifo(name, capacity)
        }
    }

    /// Set the entry time-to-live
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Set the dead-letter target
    pub fn with_dead_letter(mut self, dead_letter: DeadLetterConfig) -> Self {
        self.dead_letter = Some(dead_letter);
        self
    }

    /// Set the retry backoff policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Mark the queue as persistent
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    /// Retry cap for entries in this queue
    pub fn max_retries(&self) -> u32 {
        self.dead_letter
            .as_ref()
            .map(|dl| dl.max_retries)
            .unwrap_or(DEFAULT_MAX_RETRIES)
    }

    /// Validate structural constraints
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.capacity == 0 {
            return Err(ValidationError::OutOfRange {
                field: "capacity".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if let Some(max_age) = self.max_age {
            if max_age.is_zero() {
                return Err(ValidationError::OutOfRange {
                    field: "max_age".to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Configuration used for lazily created dead-letter queues
    fn dead_letter_default(name: QueueName) -> Self {
        Self::fifo(name, DEFAULT_DEAD_LETTER_CAPACITY)
    }
}

// ============================================================================
// Queue Entries
// ============================================================================

/// Lifecycle status of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Queued,
    Processing,
    Delivered,
    Failed,
    Expired,
}

/// A message held by a queue with delivery bookkeeping.
///
/// `attempts` is monotonically non-decreasing; `not_before` gates retry
/// eligibility after a failed delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub message: Message,
    pub queued_at: Timestamp,
    pub attempts: u32,
    pub last_attempt: Option<Timestamp>,
    pub status: EntryStatus,
    pub not_before: Option<Timestamp>,
}

impl QueueEntry {
    /// Wrap a message for enqueueing at the given instant
    pub fn new(message: Message, queued_at: Timestamp) -> Self {
        Self {
            message,
            queued_at,
            attempts: 0,
            last_attempt: None,
            status: EntryStatus::Queued,
            not_before: None,
        }
    }

    /// Check TTL expiry against the entry's age
    pub fn is_expired(&self, max_age: Duration, now: Timestamp) -> bool {
        now.duration_since(self.queued_at) > max_age
    }

    /// Check if the entry can be picked up for a delivery attempt
    pub fn is_ready(&self, now: Timestamp) -> bool {
        self.status == EntryStatus::Queued
            && self.not_before.map(|nb| now >= nb).unwrap_or(true)
    }
}

/// Running statistics for a queue.
///
/// Counters are cumulative for the queue's lifetime; rolling-window rates
/// are derived by consumers from counter deltas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    pub total_failed: u64,
    pub total_expired: u64,
    pub current_size: usize,
    pub peak_size: usize,
    /// Accumulated queue-to-delivery wait across dequeued entries
    pub total_wait_ms: u64,
}

impl QueueStats {
    /// Average wait from enqueue to successful delivery
    pub fn average_wait(&self) -> Duration {
        if self.total_dequeued == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(self.total_wait_ms / self.total_dequeued)
        }
    }

    /// Lifetime failure attempts per enqueued message, 0.0 when empty
    pub fn error_rate(&self) -> f64 {
        if self.total_enqueued == 0 {
            0.0
        } else {
            self.total_failed as f64 / self.total_enqueued as f64
        }
    }
}

// ============================================================================
// Queue
// ============================================================================

/// Outcome of a failed delivery attempt applied to an entry
#[derive(Debug)]
pub enum FailOutcome {
    /// Entry reverted to queued, eligible again after its backoff
    Retrying { next_attempt_at: Timestamp },
    /// Retry cap reached, entry removed from the queue
    Exhausted(Box<QueueEntry>),
    /// Entry was no longer present (completed or swept concurrently)
    AlreadyRemoved,
}

/// A bounded, ordered collection of queue entries.
///
/// Front of the internal deque is the next dequeue candidate. Priority
/// insertion is a stable partial insert by rank, not a full re-sort.
#[derive(Debug)]
pub struct Queue {
    config: QueueConfig,
    entries: VecDeque<QueueEntry>,
    stats: QueueStats,
}

impl Queue {
    /// Create an empty queue from its configuration
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            entries: VecDeque::new(),
            stats: QueueStats::default(),
        }
    }

    /// Queue configuration
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Snapshot of the running statistics
    pub fn stats(&self) -> QueueStats {
        self.stats.clone()
    }

    /// Current number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the queue holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check if another entry fits
    pub fn has_capacity(&self) -> bool {
        self.entries.len() < self.config.capacity
    }

    /// Entries in dequeue order (for inspection and tests)
    pub fn entries(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }

    /// Insert an entry under the queue's discipline.
    ///
    /// The caller must have checked capacity; this panics in debug builds
    /// if the bound would be exceeded.
    pub(crate) fn push(&mut self, entry: QueueEntry) {
        debug_assert!(self.has_capacity());

        match self.config.discipline {
            QueueDiscipline::Fifo => self.entries.push_back(entry),
            QueueDiscipline::Priority => {
                let rank = entry.message.priority.rank();
                // First position whose entry has a strictly worse rank;
                // equal ranks keep insertion order
                let position = self
                    .entries
                    .iter()
                    .position(|e| e.message.priority.rank() < rank)
                    .unwrap_or(self.entries.len());
                self.entries.insert(position, entry);
            }
        }

        self.stats.total_enqueued += 1;
        self.stats.current_size = self.entries.len();
        self.stats.peak_size = self.stats.peak_size.max(self.stats.current_size);
    }

    /// Select up to `batch_size` ready entries for a delivery attempt.
    ///
    /// Selected entries are marked processing with their attempt counter
    /// incremented; clones are returned for dispatch.
    pub(crate) fn take_batch(&mut self, batch_size: usize, now: Timestamp) -> Vec<QueueEntry> {
        let mut batch = Vec::new();

        for entry in self.entries.iter_mut() {
            if batch.len() >= batch_size {
                break;
            }

            if entry.is_ready(now) {
                entry.status = EntryStatus::Processing;
                entry.attempts += 1;
                entry.last_attempt = Some(now);
                batch.push(entry.clone());
            }
        }

        batch
    }

    /// Remove a delivered entry and record its wait time.
    ///
    /// Returns `None` if the entry is no longer present (swept by TTL in
    /// the meantime); that is a no-op, not an error.
    pub(crate) fn complete(&mut self, message_id: &MessageId, now: Timestamp) -> Option<QueueEntry> {
        let position = self
            .entries
            .iter()
            .position(|e| &e.message.message_id == message_id)?;

        let mut entry = self.entries.remove(position)?;
        entry.status = EntryStatus::Delivered;

        self.stats.total_dequeued += 1;
        self.stats.total_wait_ms += now.duration_since(entry.queued_at).as_millis() as u64;
        self.stats.current_size = self.entries.len();

        Some(entry)
    }

    /// Apply a failed delivery attempt to an entry.
    ///
    /// Below the retry cap the entry reverts to queued with a backoff gate;
    /// at the cap it is removed and handed back for dead-lettering or
    /// dropping by the caller.
    pub(crate) fn fail(
        &mut self,
        message_id: &MessageId,
        policy: &RetryPolicy,
        now: Timestamp,
    ) -> FailOutcome {
        let Some(position) = self
            .entries
            .iter()
            .position(|e| &e.message.message_id == message_id)
        else {
            return FailOutcome::AlreadyRemoved;
        };

        self.stats.total_failed += 1;

        let max_retries = self.config.max_retries();
        let attempts = self.entries[position].attempts;

        if attempts >= max_retries {
            let mut entry = self.entries.remove(position).unwrap();
            entry.status = EntryStatus::Failed;
            self.stats.current_size = self.entries.len();
            FailOutcome::Exhausted(Box::new(entry))
        } else {
            let next_attempt_at = now.add_duration(policy.delay_for_attempt(attempts));
            let entry = &mut self.entries[position];
            entry.status = EntryStatus::Queued;
            entry.not_before = Some(next_attempt_at);
            FailOutcome::Retrying { next_attempt_at }
        }
    }

    /// Remove entries older than the queue's max age, regardless of status.
    ///
    /// An entry mid-delivery is still swept; the in-flight attempt resolves
    /// as a no-op when it lands.
    pub(crate) fn sweep_expired(&mut self, now: Timestamp) -> Vec<QueueEntry> {
        let Some(max_age) = self.config.max_age else {
            return Vec::new();
        };

        let mut expired = Vec::new();
        let mut kept = VecDeque::with_capacity(self.entries.len());

        for mut entry in self.entries.drain(..) {
            if entry.is_expired(max_age, now) {
                entry.status = EntryStatus::Expired;
                expired.push(entry);
            } else {
                kept.push_back(entry);
            }
        }

        self.entries = kept;
        self.stats.total_expired += expired.len() as u64;
        self.stats.current_size = self.entries.len();

        expired
    }
}

// ============================================================================
// Queue Set
// ============================================================================

/// Where an enqueued message actually landed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Accepted by the requested queue
    Enqueued,
    /// Requested queue was full; moved to its dead-letter queue
    DeadLettered { queue_name: QueueName },
}

/// Registry owning every queue in a router instance.
///
/// The map is guarded for concurrent producer-side enqueue and tick-side
/// dequeue; individual queues are guarded separately so one queue's work
/// never blocks another's. Neither lock is held across an await point.
#[derive(Debug, Default)]
pub struct QueueSet {
    queues: RwLock<HashMap<QueueName, Arc<Mutex<Queue>>>>,
}

impl QueueSet {
    /// Create an empty queue set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queue.
    ///
    /// # Errors
    /// - `RouterError::Validation` - zero capacity or zero max age
    /// - `RouterError::DeadLetterCycle` - queue names itself as dead-letter target
    /// - `RouterError::DuplicateQueue` - name already registered
    pub fn create(&self, config: QueueConfig) -> Result<(), RouterError> {
        config.validate()?;

        if let Some(ref dead_letter) = config.dead_letter {
            if dead_letter.queue_name == config.name {
                return Err(RouterError::DeadLetterCycle {
                    queue_name: config.name.as_str().to_string(),
                });
            }
        }

        let mut queues = self.queues.write().unwrap();
        if queues.contains_key(&config.name) {
            return Err(RouterError::DuplicateQueue {
                queue_name: config.name.as_str().to_string(),
            });
        }

        info!(
            queue = config.name.as_str(),
            discipline = ?config.discipline,
            capacity = config.capacity,
            "Queue created"
        );
        queues.insert(config.name.clone(), Arc::new(Mutex::new(Queue::new(config))));

        Ok(())
    }

    /// Look up a queue by name
    pub fn get(&self, name: &QueueName) -> Option<Arc<Mutex<Queue>>> {
        self.queues.read().unwrap().get(name).cloned()
    }

    /// Check if a queue exists
    pub fn contains(&self, name: &QueueName) -> bool {
        self.queues.read().unwrap().contains_key(name)
    }

    /// Names of all registered queues
    pub fn names(&self) -> Vec<QueueName> {
        self.queues.read().unwrap().keys().cloned().collect()
    }

    /// Handles for all registered queues
    pub fn all(&self) -> Vec<(QueueName, Arc<Mutex<Queue>>)> {
        self.queues
            .read()
            .unwrap()
            .iter()
            .map(|(name, queue)| (name.clone(), queue.clone()))
            .collect()
    }

    /// Enqueue a message, resolving overflow deterministically.
    ///
    /// A full queue with a dead-letter target moves the message there with
    /// `reason=queue_full` and the origin queue recorded; without one the
    /// call fails with `CapacityExceeded`. Messages are never silently
    /// dropped.
    pub fn enqueue(
        &self,
        queue_name: &QueueName,
        message: Message,
        clock: &dyn Clock,
    ) -> Result<EnqueueOutcome, RouterError> {
        let queue = self
            .get(queue_name)
            .ok_or_else(|| RouterError::QueueNotFound {
                queue_name: queue_name.as_str().to_string(),
            })?;

        let overflow_target = {
            let mut queue = queue.lock().unwrap();

            if queue.has_capacity() {
                queue.push(QueueEntry::new(message, clock.now()));
                return Ok(EnqueueOutcome::Enqueued);
            }

            match queue.config().dead_letter {
                Some(ref dead_letter) => dead_letter.queue_name.clone(),
                None => {
                    return Err(RouterError::CapacityExceeded {
                        queue_name: queue_name.as_str().to_string(),
                        capacity: queue.config().capacity,
                    })
                }
            }
        };

        self.dead_letter(queue_name, &overflow_target, message, "queue_full", clock)?;
        Ok(EnqueueOutcome::DeadLettered {
            queue_name: overflow_target,
        })
    }

    /// Move a message into a dead-letter queue, creating it lazily.
    ///
    /// The reason and origin queue are recorded in the message metadata.
    pub fn dead_letter(
        &self,
        origin: &QueueName,
        target: &QueueName,
        mut message: Message,
        reason: &str,
        clock: &dyn Clock,
    ) -> Result<(), RouterError> {
        let queue = match self.get(target) {
            Some(queue) => queue,
            None => {
                // Lazy creation keeps routing configs terse; a cycle through
                // a missing queue cannot occur since the new queue has no
                // dead-letter target of its own
                self.create(QueueConfig::dead_letter_default(target.clone()))?;
                self.get(target).ok_or_else(|| RouterError::QueueNotFound {
                    queue_name: target.as_str().to_string(),
                })?
            }
        };

        message
            .metadata
            .insert(DEAD_LETTER_REASON_KEY.to_string(), json!(reason));
        message.metadata.insert(
            DEAD_LETTER_ORIGIN_KEY.to_string(),
            json!(origin.as_str()),
        );

        let mut queue = queue.lock().unwrap();
        if !queue.has_capacity() {
            warn!(
                queue = target.as_str(),
                origin = origin.as_str(),
                "Dead-letter queue is full"
            );
            return Err(RouterError::CapacityExceeded {
                queue_name: target.as_str().to_string(),
                capacity: queue.config().capacity,
            });
        }

        debug!(
            message_id = %message.message_id,
            origin = origin.as_str(),
            target = target.as_str(),
            reason,
            "Message dead-lettered"
        );
        queue.push(QueueEntry::new(message, clock.now()));

        Ok(())
    }

    /// Statistics snapshot for every queue
    pub fn stats_snapshot(&self) -> HashMap<QueueName, QueueStats> {
        self.all()
            .into_iter()
            .map(|(name, queue)| {
                let stats = queue.lock().unwrap().stats();
                (name, stats)
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
