//! Message type for the routing and delivery path.

use crate::guarantee::DeliveryGuarantee;
use crate::{AgentId, MessageId, MessagePriority};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// An outbound message flowing from a producer through the router.
///
/// A message is owned by the producer until it is enqueued, then by the
/// queue holding it. Broadcast to multiple queues creates independent
/// copies with independent lifecycles.
///
/// `delivery_guarantee` and `ack_required` are set once by the guarantee
/// processor at route time; stamping returns a new instance and never
/// mutates its input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub sender: AgentId,
    pub recipient: AgentId,
    pub message_type: String,
    pub priority: MessagePriority,
    pub metadata: HashMap<String, Value>,
    pub delivery_guarantee: Option<DeliveryGuarantee>,
    pub ack_required: bool,
}

impl Message {
    /// Create new message with a fresh ID and normal priority
    pub fn new(sender: AgentId, recipient: AgentId, message_type: impl Into<String>) -> Self {
        Self {
            message_id: MessageId::new(),
            sender,
            recipient,
            message_type: message_type.into(),
            priority: MessagePriority::default(),
            metadata: HashMap::new(),
            delivery_guarantee: None,
            ack_required: false,
        }
    }

    /// Set message priority
    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Look up a metadata value by key
    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Check whether the message has been stamped with a guarantee
    pub fn is_stamped(&self) -> bool {
        self.delivery_guarantee.is_some()
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
