//! Delivery guarantee stamping.
//!
//! The guarantee processor attaches the acknowledgment/retry contract for a
//! requested guarantee level to a message. Stamping is the only place the
//! contract is decided; queues and the processor read it, never change it.

use crate::message::Message;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metadata key carrying the per-processor sequence number for ordered
/// guarantees
pub const SEQUENCE_NUMBER_KEY: &str = "sequence_number";

/// The acknowledgment/retry contract attached to a message.
///
/// `Causal` and `TotalOrder` are accepted as requested levels but are
/// normalized to the `Ordered` stamping: exactly-once semantics, ack
/// required, and a strictly increasing sequence number. No vector-clock or
/// causal tracking is performed; callers must not assume full causal
/// consistency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryGuarantee {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
    Ordered,
    Causal,
    TotalOrder,
}

impl DeliveryGuarantee {
    /// Whether this guarantee requires an acknowledgment from the recipient
    pub fn requires_ack(&self) -> bool {
        !matches!(self, Self::AtMostOnce)
    }

    /// Whether this guarantee carries a sequence number
    pub fn is_sequenced(&self) -> bool {
        matches!(self, Self::Ordered | Self::Causal | Self::TotalOrder)
    }

    /// The effective guarantee after normalization
    pub fn normalized(&self) -> Self {
        match self {
            Self::Causal | Self::TotalOrder => Self::Ordered,
            other => *other,
        }
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AtMostOnce => "at_most_once",
            Self::AtLeastOnce => "at_least_once",
            Self::ExactlyOnce => "exactly_once",
            Self::Ordered => "ordered",
            Self::Causal => "causal",
            Self::TotalOrder => "total_order",
        }
    }
}

impl Default for DeliveryGuarantee {
    fn default() -> Self {
        Self::AtLeastOnce
    }
}

impl fmt::Display for DeliveryGuarantee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DeliveryGuarantee {
    type Err = crate::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "at_most_once" => Ok(Self::AtMostOnce),
            "at_least_once" => Ok(Self::AtLeastOnce),
            "exactly_once" => Ok(Self::ExactlyOnce),
            "ordered" => Ok(Self::Ordered),
            "causal" => Ok(Self::Causal),
            "total_order" => Ok(Self::TotalOrder),
            _ => Err(crate::ParseError::InvalidFormat {
                expected: "at_most_once, at_least_once, exactly_once, ordered, causal, or total_order"
                    .to_string(),
                actual: s.to_string(),
            }),
        }
    }
}

/// Stamps messages with delivery-guarantee semantics.
///
/// Owns the strictly increasing sequence counter used for ordered
/// guarantees. One processor per router instance; independent instances
/// have independent sequences.
#[derive(Debug, Default)]
pub struct GuaranteeProcessor {
    sequence: AtomicU64,
}

impl GuaranteeProcessor {
    /// Create a new processor with its sequence at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp a message for the requested guarantee.
    ///
    /// Returns a new message instance; the input is never mutated. Ordered
    /// (and causal/total-order, which normalize to ordered) stamping adds a
    /// strictly increasing sequence number under [`SEQUENCE_NUMBER_KEY`].
    /// Reordering on the consumer side is a downstream responsibility.
    pub fn stamp(&self, message: &Message, guarantee: DeliveryGuarantee) -> Message {
        let effective = guarantee.normalized();
        let mut stamped = message.clone();

        stamped.delivery_guarantee = Some(effective);
        stamped.ack_required = effective.requires_ack();

        if guarantee.is_sequenced() {
            let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            stamped
                .metadata
                .insert(SEQUENCE_NUMBER_KEY.to_string(), json!(sequence));
        }

        stamped
    }

    /// Last sequence number issued, zero if none
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[path = "guarantee_tests.rs"]
mod tests;
