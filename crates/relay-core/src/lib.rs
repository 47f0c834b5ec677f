//! # Relay Core
//!
//! Core routing and delivery-guarantee logic for the agent relay.
//!
//! This crate accepts outbound messages from producers, evaluates an ordered
//! rule set to select target queues, stamps each message with an explicit
//! delivery-guarantee contract, and drives asynchronous delivery with retry,
//! dead-lettering, and per-queue circuit breaking.
//!
//! ## Architecture
//!
//! - All registries (queues, rules, receipts, breakers) are explicit state
//!   owned by one [`router::MessageRouter`] instance - no singletons
//! - Background work is an explicit `tick()` entry point driven by a timer
//!   or a test harness, keeping the core deterministic
//! - The transport that actually moves a message is abstracted behind the
//!   [`processor::DeliverySink`] trait
//!
//! ## Usage
//!
//! ```rust
//! use relay_core::{MessageId, QueueName, MessagePriority};
//!
//! let message_id = MessageId::new();
//! let queue = QueueName::new("high_priority").unwrap();
//! assert!(MessagePriority::Critical.rank() > MessagePriority::Low.rank());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// Re-export commonly used types
pub use ulid::Ulid;
pub use uuid::Uuid;

/// Standard result type for relay operations
pub type RelayResult<T> = Result<T, RouterError>;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Unique identifier for a message.
///
/// Uses ULID for lexicographic sorting and global uniqueness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Ulid);

impl MessageId {
    /// Generate a new unique message ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Get string representation of the message ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = s.parse::<Ulid>().map_err(|_| ParseError::InvalidFormat {
            expected: "ULID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(ulid))
    }
}

/// Opaque identifier for an agent (sender or recipient).
///
/// Only equality and glob matching are assumed; the identity scheme is
/// owned by the surrounding platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(String);

impl AgentId {
    /// Create new agent ID with validation
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();

        if id.is_empty() {
            return Err(ValidationError::Required {
                field: "agent_id".to_string(),
            });
        }

        if id.len() > 128 {
            return Err(ValidationError::TooLong {
                field: "agent_id".to_string(),
                max_length: 128,
            });
        }

        Ok(Self(id))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AgentId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Validated queue name.
///
/// # Validation Rules
/// - Must be 1-128 characters
/// - Must contain only ASCII alphanumeric characters, hyphens, and underscores
/// - Must not start or end with a hyphen
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();

        if name.is_empty() {
            return Err(ValidationError::Required {
                field: "queue_name".to_string(),
            });
        }

        if name.len() > 128 {
            return Err(ValidationError::TooLong {
                field: "queue_name".to_string(),
                max_length: 128,
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidCharacters {
                field: "queue_name".to_string(),
                invalid_chars: "non-alphanumeric except hyphens and underscores".to_string(),
            });
        }

        if name.starts_with('-') || name.ends_with('-') {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "cannot start or end with hyphen".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Identifier for a single routing operation, for tracing a message through
/// rule evaluation, stamping, and enqueue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutingId(Uuid);

impl RoutingId {
    /// Generate new routing ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get string representation
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RoutingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RoutingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Time Types
// ============================================================================

/// UTC timestamp with microsecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Add a duration to the timestamp
    pub fn add_duration(&self, duration: Duration) -> Self {
        let chrono_duration = chrono::Duration::from_std(duration).unwrap_or_default();
        Self(self.0 + chrono_duration)
    }

    /// Subtract a duration from the timestamp
    pub fn subtract_duration(&self, duration: Duration) -> Self {
        let chrono_duration = chrono::Duration::from_std(duration).unwrap_or_default();
        Self(self.0 - chrono_duration)
    }

    /// Get duration since another timestamp, zero if `other` is later
    pub fn duration_since(&self, other: Self) -> Duration {
        let chrono_duration = self.0.signed_duration_since(other.0);
        chrono_duration.to_std().unwrap_or_default()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// ============================================================================
// Priority
// ============================================================================

/// Message priority levels.
///
/// The fixed rank order {critical > urgent > high > normal > low} drives
/// queue placement for `priority`-discipline queues and the delivery-delay
/// multiplier used in delivery estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Critical,
    Urgent,
    High,
    Normal,
    Low,
}

impl MessagePriority {
    /// Numeric rank, higher is more urgent
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 4,
            Self::Urgent => 3,
            Self::High => 2,
            Self::Normal => 1,
            Self::Low => 0,
        }
    }

    /// Delivery-delay multiplier used for estimated-delivery calculations
    pub fn delay_multiplier(&self) -> f64 {
        match self {
            Self::Critical => 0.1,
            Self::Urgent => 0.25,
            Self::High => 0.5,
            Self::Normal => 1.0,
            Self::Low => 2.0,
        }
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Urgent => "urgent",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl Default for MessagePriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for MessagePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MessagePriority {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "urgent" => Ok(Self::Urgent),
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            _ => Err(ParseError::InvalidFormat {
                expected: "critical, urgent, high, normal, or low".to_string(),
                actual: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// Retry Policy
// ============================================================================

/// Backoff strategy for delivery retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Linear,
    Exponential,
}

/// Configuration for retry backoff behavior.
///
/// The delay for attempt `n` is `base_delay * n` (linear) or
/// `base_delay * 2^(n-1)` (exponential), capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub kind: BackoffKind,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Create exponential backoff retry policy
    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            base_delay,
            max_delay,
        }
    }

    /// Create linear backoff retry policy
    pub fn linear(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Linear,
            base_delay,
            max_delay,
        }
    }

    /// Calculate backoff delay after the given attempt number (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as u64;
        let delay_ms = match self.kind {
            BackoffKind::Linear => base_ms.saturating_mul(attempt as u64),
            BackoffKind::Exponential => {
                base_ms.saturating_mul(1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX))
            }
        };

        Duration::from_millis(delay_ms).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(Duration::from_secs(1), Duration::from_secs(30))
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Error type for input validation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    TooLong { field: String, max_length: usize },

    #[error("Field '{field}' contains invalid characters: {invalid_chars}")]
    InvalidCharacters {
        field: String,
        invalid_chars: String,
    },

    #[error("Field '{field}' is out of range: {message}")]
    OutOfRange { field: String, message: String },
}

/// Error type for string parsing failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },
}

/// Stage at which a routing operation failed.
///
/// Lets callers distinguish retryable conditions (capacity) from
/// configuration errors (validation, routing) without destructuring
/// the full error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureStage {
    /// Bad queue config or routing rule; nothing was created
    Validation,
    /// Enqueue beyond a bounded queue with no dead-letter target
    Capacity,
    /// Rule evaluation resolved zero target queues
    Routing,
    /// Unknown message, queue, or rule identifier
    NotFound,
}

/// Top-level error type for routing-time operations.
///
/// Delivery-time failures (sink errors during a tick) are never surfaced
/// through this type; they are recovered locally into retry and
/// dead-letter bookkeeping, visible via queue health and analytics.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RouterError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Queue '{queue_name}' is at capacity ({capacity}) and has no dead-letter queue")]
    CapacityExceeded { queue_name: String, capacity: usize },

    #[error("No target queue resolved for message {message_id}")]
    NoRouteResolved { message_id: MessageId },

    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Queue already exists: {queue_name}")]
    DuplicateQueue { queue_name: String },

    #[error("Routing rule already exists: {rule_id}")]
    DuplicateRule { rule_id: String },

    #[error("Routing rule not found: {rule_id}")]
    RuleNotFound { rule_id: String },

    #[error("Delivery receipt not found for message {message_id}")]
    ReceiptNotFound { message_id: MessageId },

    #[error("Queue '{queue_name}' cannot be its own dead-letter queue")]
    DeadLetterCycle { queue_name: String },
}

impl RouterError {
    /// Stage at which the operation failed
    pub fn stage(&self) -> FailureStage {
        match self {
            Self::Validation(_) => FailureStage::Validation,
            Self::DuplicateQueue { .. } => FailureStage::Validation,
            Self::DuplicateRule { .. } => FailureStage::Validation,
            Self::DeadLetterCycle { .. } => FailureStage::Validation,
            Self::CapacityExceeded { .. } => FailureStage::Capacity,
            Self::NoRouteResolved { .. } => FailureStage::Routing,
            Self::QueueNotFound { .. } => FailureStage::NotFound,
            Self::RuleNotFound { .. } => FailureStage::NotFound,
            Self::ReceiptNotFound { .. } => FailureStage::NotFound,
        }
    }

    /// Check if the condition may clear on its own and a retry is sensible
    pub fn is_retryable(&self) -> bool {
        matches!(self.stage(), FailureStage::Capacity)
    }
}

// ============================================================================
// Module declarations
// ============================================================================

/// Injectable clock for deterministic time in tests
pub mod clock;

/// Message type and metadata handling
pub mod message;

/// Delivery guarantee stamping
pub mod guarantee;

/// Routing rule engine
pub mod rules;

/// Bounded queues with fifo/priority disciplines and dead-lettering
pub mod queue;

/// Tick-driven queue processor and the delivery sink boundary
pub mod processor;

/// Delivery receipt store and acknowledgment lifecycle
pub mod receipts;

/// Per-queue circuit breaker monitor
pub mod circuit_breaker;

/// Route metrics and analytics snapshots
pub mod analytics;

/// Router facade orchestrating the full routing path
pub mod router;

// Re-export key types for convenience
pub use analytics::{
    AnalyticsAggregator, HealthLevel, QueueHealthReport, RouteMetrics, RoutingAnalyticsReport,
};
pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerMonitor, CircuitBreakerState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use guarantee::{DeliveryGuarantee, GuaranteeProcessor, SEQUENCE_NUMBER_KEY};
pub use message::Message;
pub use processor::{DeliverySink, ProcessorConfig, QueueProcessor, SinkError, TickSummary};
pub use queue::{
    DeadLetterConfig, EntryStatus, Queue, QueueConfig, QueueDiscipline, QueueEntry, QueueSet,
    QueueStats, DEAD_LETTER_ORIGIN_KEY, DEAD_LETTER_REASON_KEY, RETRY_POLICY_KEY,
};
pub use receipts::{
    Acknowledgment, AcknowledgmentId, AcknowledgmentType, DeliveryReceipt, DeliveryStatus,
    ReceiptStore,
};
pub use router::{MessageRouter, RouteOptions, RouteReceipt, RouterConfig};
pub use rules::{
    ConditionOperator, CustomCondition, RoutingRule, RuleActions, RuleConditions, RuleEngine,
};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
