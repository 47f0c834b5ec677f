//! Common test utilities for relay integration tests
//!
//! This module provides:
//! - A recording delivery sink with programmable failures
//! - A harness bundling a router, processor, sink, and manual clock
//! - Shared builders for messages and identifiers

use async_trait::async_trait;
use relay_core::{
    AgentId, Clock, DeliverySink, ManualClock, Message, MessageRouter, ProcessorConfig, QueueName,
    QueueProcessor, RouterConfig, SinkError,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Installs a test subscriber so `RUST_LOG` controls relay tracing output.
///
/// Safe to call from every test; only the first call installs the subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Builders
// ============================================================================

#[allow(dead_code)]
pub fn queue_name(name: &str) -> QueueName {
    QueueName::new(name).unwrap()
}

#[allow(dead_code)]
pub fn agent(name: &str) -> AgentId {
    AgentId::new(name).unwrap()
}

#[allow(dead_code)]
pub fn task_message() -> Message {
    Message::new(agent("agent-alpha"), agent("worker-1"), "task_request")
}

// ============================================================================
// Recording Sink
// ============================================================================

/// Delivery sink that records successful deliveries and fails on demand
pub struct RecordingSink {
    delivered: Mutex<Vec<(QueueName, Message)>>,
    failures_remaining: AtomicU32,
    always_fail: AtomicBool,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            failures_remaining: AtomicU32::new(0),
            always_fail: AtomicBool::new(false),
        }
    }

    /// Fail the next `count` delivery attempts
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Fail every delivery attempt until cleared
    pub fn set_always_fail(&self, fail: bool) {
        self.always_fail.store(fail, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<(QueueName, Message)> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }

    pub fn delivered_to(&self, queue: &QueueName) -> Vec<Message> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == queue)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn deliver(&self, queue_name: &QueueName, message: &Message) -> Result<(), SinkError> {
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable {
                reason: "sink forced down".to_string(),
            });
        }

        // Atomic decrement so concurrent deliveries consume one failure each
        let induced = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if induced {
            return Err(SinkError::Rejected {
                reason: "induced failure".to_string(),
            });
        }

        self.delivered
            .lock()
            .unwrap()
            .push((queue_name.clone(), message.clone()));
        Ok(())
    }
}

// ============================================================================
// Test Harness
// ============================================================================

/// A router and processor wired to a recording sink on a manual clock
pub struct TestHarness {
    pub router: Arc<MessageRouter>,
    pub processor: QueueProcessor,
    pub sink: Arc<RecordingSink>,
    pub clock: Arc<ManualClock>,
}

#[allow(dead_code)]
impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(RouterConfig::new(queue_name("default")))
    }

    pub fn with_config(config: RouterConfig) -> Self {
        init_tracing();

        let clock = Arc::new(ManualClock::starting_now());
        let router = Arc::new(
            MessageRouter::new(config, clock.clone() as Arc<dyn Clock>)
                .expect("router config must be valid"),
        );
        let sink = Arc::new(RecordingSink::new());
        let processor = QueueProcessor::new(
            router.queues(),
            router.receipts(),
            sink.clone() as Arc<dyn DeliverySink>,
            clock.clone() as Arc<dyn Clock>,
            ProcessorConfig::default(),
        );

        Self {
            router,
            processor,
            sink,
            clock,
        }
    }

    /// Current depth of a queue
    pub fn queue_len(&self, name: &QueueName) -> usize {
        self.router
            .queues()
            .get(name)
            .map(|queue| queue.lock().unwrap().len())
            .unwrap_or(0)
    }

    /// Whether a queue exists at all
    pub fn queue_exists(&self, name: &QueueName) -> bool {
        self.router.queues().contains(name)
    }
}
