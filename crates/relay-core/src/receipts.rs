//! Delivery receipt store.
//!
//! Receipts are created at route time, mutated by delivery outcomes and
//! acknowledgments, and never removed within the process lifetime;
//! retention is an external concern.

use crate::clock::Clock;
use crate::{AgentId, MessageId, RouterError, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use uuid::Uuid;

// ============================================================================
// Receipt Types
// ============================================================================

/// Unique identifier for an acknowledgment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AcknowledgmentId(Uuid);

impl AcknowledgmentId {
    /// Generate new acknowledgment ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get string representation
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for AcknowledgmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AcknowledgmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of acknowledgment reported by a recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcknowledgmentType {
    /// Transport-level receipt confirmation
    Received,
    /// Recipient has read the message
    Read,
    /// Recipient finished processing the message
    Completed,
    /// Recipient reported a processing failure
    Failed,
}

/// Delivery lifecycle status tracked on a receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Routed, no delivery outcome yet
    Pending,
    Delivered,
    Read,
    Processed,
    Failed,
}

/// A single acknowledgment appended to a receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgment {
    pub id: AcknowledgmentId,
    pub ack_type: AcknowledgmentType,
    pub timestamp: Timestamp,
    pub actor: AgentId,
    pub signature: Option<String>,
}

/// Acknowledgment lifecycle record for one routed message.
///
/// The acknowledgment list is append-only and ordered by arrival.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: MessageId,
    pub recipient: AgentId,
    pub delivery_time: Option<Timestamp>,
    pub status: DeliveryStatus,
    pub acknowledgments: Vec<Acknowledgment>,
}

impl DeliveryReceipt {
    /// Create a pending receipt at route time
    pub fn new(message_id: MessageId, recipient: AgentId) -> Self {
        Self {
            message_id,
            recipient,
            delivery_time: None,
            status: DeliveryStatus::Pending,
            acknowledgments: Vec::new(),
        }
    }
}

// ============================================================================
// Receipt Store
// ============================================================================

/// In-process store tracking the acknowledgment lifecycle per message.
///
/// Entries are never auto-removed.
#[derive(Debug, Default)]
pub struct ReceiptStore {
    receipts: Mutex<HashMap<MessageId, DeliveryReceipt>>,
}

impl ReceiptStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a receipt at route time; replaces nothing if one exists
    pub fn create(&self, message_id: MessageId, recipient: AgentId) {
        let mut receipts = self.receipts.lock().unwrap();
        receipts
            .entry(message_id)
            .or_insert_with(|| DeliveryReceipt::new(message_id, recipient));
    }

    /// Fetch a receipt by message ID
    pub fn get(&self, message_id: &MessageId) -> Result<DeliveryReceipt, RouterError> {
        self.receipts
            .lock()
            .unwrap()
            .get(message_id)
            .cloned()
            .ok_or(RouterError::ReceiptNotFound {
                message_id: *message_id,
            })
    }

    /// Record a successful delivery from the queue processor.
    ///
    /// Sets the delivery time and moves a pending receipt to delivered;
    /// acknowledgment-driven statuses (read, processed) are not reverted.
    pub fn mark_delivered(&self, message_id: &MessageId, clock: &dyn Clock) {
        let mut receipts = self.receipts.lock().unwrap();
        if let Some(receipt) = receipts.get_mut(message_id) {
            receipt.delivery_time = Some(clock.now());
            if matches!(receipt.status, DeliveryStatus::Pending) {
                receipt.status = DeliveryStatus::Delivered;
            }
        }
    }

    /// Record a terminal delivery failure (retry exhaustion or expiry)
    pub fn mark_failed(&self, message_id: &MessageId) {
        let mut receipts = self.receipts.lock().unwrap();
        if let Some(receipt) = receipts.get_mut(message_id) {
            receipt.status = DeliveryStatus::Failed;
        }
    }

    /// Append an acknowledgment and update the delivery status.
    ///
    /// `completed` moves the status to processed and `read` to read; other
    /// acknowledgment types only extend the list. Repeated acknowledgments
    /// of the same type append again without reverting the status.
    pub fn acknowledge(
        &self,
        message_id: &MessageId,
        ack_type: AcknowledgmentType,
        actor: AgentId,
        signature: Option<String>,
        clock: &dyn Clock,
    ) -> Result<AcknowledgmentId, RouterError> {
        let mut receipts = self.receipts.lock().unwrap();
        let receipt = receipts
            .get_mut(message_id)
            .ok_or(RouterError::ReceiptNotFound {
                message_id: *message_id,
            })?;

        let ack = Acknowledgment {
            id: AcknowledgmentId::new(),
            ack_type,
            timestamp: clock.now(),
            actor,
            signature,
        };
        let ack_id = ack.id.clone();
        receipt.acknowledgments.push(ack);

        match ack_type {
            AcknowledgmentType::Completed => receipt.status = DeliveryStatus::Processed,
            AcknowledgmentType::Read => receipt.status = DeliveryStatus::Read,
            AcknowledgmentType::Received | AcknowledgmentType::Failed => {}
        }

        Ok(ack_id)
    }

    /// Number of receipts held
    pub fn len(&self) -> usize {
        self.receipts.lock().unwrap().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.receipts.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
#[path = "receipts_tests.rs"]
mod tests;
