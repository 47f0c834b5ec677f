//! Message routing façade.
//!
//! [`MessageRouter`] owns the queue registry, rule engine, guarantee
//! stamping, receipts, breaker monitor, and analytics, and exposes the
//! operations callers use: route a message, manage queues and rules,
//! acknowledge deliveries, and read health and analytics.
//!
//! Target selection precedence: an explicit per-call override wins, then
//! the first matching active rule, then the configured default queue.

use crate::analytics::{AnalyticsAggregator, QueueHealthReport, RoutingAnalyticsReport};
use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerMonitor, CircuitBreakerState};
use crate::clock::{Clock, SystemClock};
use crate::guarantee::GuaranteeProcessor;
use crate::message::Message;
use crate::queue::{
    EnqueueOutcome, QueueConfig, QueueSet, QueueStats, RETRY_POLICY_KEY,
};
use crate::receipts::{AcknowledgmentId, AcknowledgmentType, DeliveryReceipt, ReceiptStore};
use crate::rules::{RoutingRule, RuleEngine};
use crate::{
    AgentId, DeliveryGuarantee, MessageId, QueueName, RouterError, RoutingId, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Floor for delivery estimates regardless of queue load
const MIN_DELIVERY_ESTIMATE: Duration = Duration::from_millis(100);

/// Capacity of the auto-created default queue
const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

// ============================================================================
// Configuration
// ============================================================================

/// Router-level settings
#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    /// Fallback queue used when no rule matches and no override is given
    pub default_queue: QueueName,

    /// Capacity of the auto-created default queue
    pub default_queue_capacity: usize,

    /// Guarantee stamped when neither the caller nor a rule sets one
    pub default_guarantee: DeliveryGuarantee,

    pub breaker: CircuitBreakerConfig,
}

impl RouterConfig {
    pub fn new(default_queue: QueueName) -> Self {
        Self {
            default_queue,
            default_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            default_guarantee: DeliveryGuarantee::AtLeastOnce,
            breaker: CircuitBreakerConfig::default(),
        }
    }

    pub fn with_default_guarantee(mut self, guarantee: DeliveryGuarantee) -> Self {
        self.default_guarantee = guarantee;
        self
    }

    pub fn with_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_default_queue_capacity(mut self, capacity: usize) -> Self {
        self.default_queue_capacity = capacity;
        self
    }
}

// ============================================================================
// Routing Options and Receipt
// ============================================================================

/// Per-call routing overrides
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteOptions {
    /// Explicit target queues, bypassing rule evaluation for selection
    pub target_queues: Vec<QueueName>,

    /// Guarantee override, winning over rule and router defaults
    pub guarantee: Option<DeliveryGuarantee>,
}

impl RouteOptions {
    /// Route to a single explicit queue
    pub fn to_queue(queue_name: QueueName) -> Self {
        Self {
            target_queues: vec![queue_name],
            ..Self::default()
        }
    }

    pub fn with_guarantee(mut self, guarantee: DeliveryGuarantee) -> Self {
        self.guarantee = Some(guarantee);
        self
    }
}

/// Result of a successful routing call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteReceipt {
    pub routing_id: RoutingId,
    pub message_id: MessageId,

    /// Queues the message was enqueued into
    pub selected_routes: Vec<QueueName>,

    /// Effective (normalized) guarantee stamped on the message
    pub delivery_guarantee: DeliveryGuarantee,

    /// Load- and priority-weighted delivery estimate
    pub estimated_delivery: Timestamp,

    pub routed_at: Timestamp,
}

// ============================================================================
// Message Router
// ============================================================================

/// Central routing façade for one relay instance.
///
/// All shared state is internally synchronized; the router is used behind
/// an `Arc` from producer tasks and the processor alike.
pub struct MessageRouter {
    config: RouterConfig,
    queues: Arc<QueueSet>,
    rules: RwLock<RuleEngine>,
    guarantees: GuaranteeProcessor,
    receipts: Arc<ReceiptStore>,
    breakers: CircuitBreakerMonitor,
    analytics: AnalyticsAggregator,
    clock: Arc<dyn Clock>,
}

impl MessageRouter {
    /// Create a router with its default queue registered.
    ///
    /// # Errors
    /// - `RouterError::Validation` - default queue capacity is zero
    pub fn new(config: RouterConfig, clock: Arc<dyn Clock>) -> Result<Self, RouterError> {
        let queues = Arc::new(QueueSet::new());
        queues.create(QueueConfig::fifo(
            config.default_queue.clone(),
            config.default_queue_capacity,
        ))?;

        info!(
            default_queue = config.default_queue.as_str(),
            "Message router created"
        );

        Ok(Self {
            breakers: CircuitBreakerMonitor::new(config.breaker.clone()),
            config,
            queues,
            rules: RwLock::new(RuleEngine::new()),
            guarantees: GuaranteeProcessor::new(),
            receipts: Arc::new(ReceiptStore::new()),
            analytics: AnalyticsAggregator::new(),
            clock,
        })
    }

    /// Create a router on the wall clock
    pub fn with_system_clock(config: RouterConfig) -> Result<Self, RouterError> {
        Self::new(config, Arc::new(SystemClock))
    }

    /// Queue registry handle, shared with the processor
    pub fn queues(&self) -> Arc<QueueSet> {
        Arc::clone(&self.queues)
    }

    /// Receipt store handle, shared with the processor
    pub fn receipts(&self) -> Arc<ReceiptStore> {
        Arc::clone(&self.receipts)
    }

    /// Clock handle, shared with the processor
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    // ========================================================================
    // Routing
    // ========================================================================

    /// Route a message to its target queues.
    ///
    /// Selection precedence is explicit override, then first matching rule,
    /// then the default queue. Targets that do not exist, or that are full
    /// with no dead-letter queue, are skipped with a warning; the call
    /// fails only when no target accepted the message. The message is
    /// stamped with its effective guarantee (and a sequence number for
    /// ordered guarantees) before enqueueing, and a delivery receipt is
    /// created for every routed message regardless of guarantee.
    ///
    /// # Errors
    /// - `RouterError::NoRouteResolved` - no selected queue exists
    /// - `RouterError::CapacityExceeded` - every accepting target was full
    ///   with no dead-letter queue
    pub fn route_message(
        &self,
        message: Message,
        options: RouteOptions,
    ) -> Result<RouteReceipt, RouterError> {
        let now = self.clock.now();

        let matched = {
            let rules = self.rules.read().unwrap();
            rules.first_match(&message).cloned()
        };

        let selected = if !options.target_queues.is_empty() {
            options.target_queues.clone()
        } else if let Some(ref rule) = matched {
            rule.actions.target_queues.clone()
        } else {
            vec![self.config.default_queue.clone()]
        };

        let mut resolved = Vec::new();
        for queue_name in selected {
            if self.queues.contains(&queue_name) {
                if self.breakers.is_open(&queue_name) {
                    warn!(
                        message_id = %message.message_id,
                        queue = queue_name.as_str(),
                        "Routing into a queue with an open circuit breaker"
                    );
                }
                resolved.push(queue_name);
            } else {
                warn!(
                    message_id = %message.message_id,
                    queue = queue_name.as_str(),
                    "Route target does not exist, skipping"
                );
            }
        }

        if resolved.is_empty() {
            return Err(RouterError::NoRouteResolved {
                message_id: message.message_id,
            });
        }

        let guarantee = options
            .guarantee
            .or_else(|| matched.as_ref().and_then(|r| r.actions.guarantee))
            .unwrap_or(self.config.default_guarantee);

        let mut stamped = self.guarantees.stamp(&message, guarantee);
        if let Some(ref rule) = matched {
            for (key, value) in &rule.actions.annotations {
                stamped.metadata.insert(key.clone(), value.clone());
            }
            if let Some(ref policy) = rule.actions.retry_policy {
                if let Ok(value) = serde_json::to_value(policy) {
                    stamped.metadata.insert(RETRY_POLICY_KEY.to_string(), value);
                }
            }
        }
        let effective = stamped
            .delivery_guarantee
            .unwrap_or(self.config.default_guarantee);

        let estimated_delivery = self.estimate_delivery(&resolved, &stamped, now);

        // A broadcast is only as fatal as its last hope: full targets
        // without a dead-letter queue are skipped like missing ones, and
        // the call fails only when no target accepted the message
        let mut enqueued_routes = Vec::new();
        let mut last_error = None;
        for queue_name in &resolved {
            match self
                .queues
                .enqueue(queue_name, stamped.clone(), self.clock.as_ref())
            {
                Ok(EnqueueOutcome::Enqueued) => enqueued_routes.push(queue_name.clone()),
                Ok(EnqueueOutcome::DeadLettered { queue_name: target }) => {
                    warn!(
                        message_id = %stamped.message_id,
                        queue = queue_name.as_str(),
                        dead_letter = target.as_str(),
                        "Target queue full, message dead-lettered on enqueue"
                    );
                    enqueued_routes.push(queue_name.clone());
                }
                Err(error) => {
                    warn!(
                        message_id = %stamped.message_id,
                        queue = queue_name.as_str(),
                        %error,
                        "Enqueue failed for route target, skipping"
                    );
                    last_error = Some(error);
                }
            }
        }

        if enqueued_routes.is_empty() {
            return Err(last_error.unwrap_or(RouterError::NoRouteResolved {
                message_id: stamped.message_id,
            }));
        }

        // Every routed message gets a receipt; the guarantee only decides
        // whether an acknowledgment is expected on top of it
        self.receipts
            .create(stamped.message_id, stamped.recipient.clone());

        let receipt = RouteReceipt {
            routing_id: RoutingId::new(),
            message_id: stamped.message_id,
            selected_routes: enqueued_routes,
            delivery_guarantee: effective,
            estimated_delivery,
            routed_at: now,
        };

        debug!(
            message_id = %receipt.message_id,
            routing_id = %receipt.routing_id,
            routes = ?receipt.selected_routes,
            guarantee = ?receipt.delivery_guarantee,
            rule = matched.as_ref().map(|r| r.id.as_str()),
            "Message routed"
        );

        Ok(receipt)
    }

    /// Per-queue base delay scaled by load, weighted by message priority,
    /// summed across targets, with a fixed floor
    fn estimate_delivery(
        &self,
        targets: &[QueueName],
        message: &Message,
        now: Timestamp,
    ) -> Timestamp {
        let mut total = Duration::ZERO;

        for queue_name in targets {
            if let Some(queue) = self.queues.get(queue_name) {
                let queue = queue.lock().unwrap();
                let load = queue.len() as f64 / queue.config().capacity as f64;
                let base = queue.config().retry_policy.base_delay;
                total += base.mul_f64(1.0 + load);
            }
        }

        let weighted = total.mul_f64(message.priority.delay_multiplier());
        now.add_duration(weighted.max(MIN_DELIVERY_ESTIMATE))
    }

    // ========================================================================
    // Queue Administration
    // ========================================================================

    /// Register a queue
    pub fn create_queue(&self, config: QueueConfig) -> Result<(), RouterError> {
        self.queues.create(config)
    }

    /// Names of all registered queues
    pub fn queue_names(&self) -> Vec<QueueName> {
        self.queues.names()
    }

    /// Statistics snapshot for one queue
    pub fn queue_stats(&self, queue_name: &QueueName) -> Result<QueueStats, RouterError> {
        let queue = self
            .queues
            .get(queue_name)
            .ok_or_else(|| RouterError::QueueNotFound {
                queue_name: queue_name.as_str().to_string(),
            })?;
        let stats = queue.lock().unwrap().stats();
        Ok(stats)
    }

    // ========================================================================
    // Rule Administration
    // ========================================================================

    /// Add a routing rule, kept in priority order
    pub fn add_routing_rule(&self, rule: RoutingRule) -> Result<(), RouterError> {
        self.rules.write().unwrap().add_rule(rule)
    }

    /// Remove a routing rule by ID
    pub fn remove_routing_rule(&self, rule_id: &str) -> Result<RoutingRule, RouterError> {
        self.rules.write().unwrap().remove_rule(rule_id)
    }

    /// Enable or disable a rule without removing it
    pub fn set_rule_active(&self, rule_id: &str, active: bool) -> Result<(), RouterError> {
        self.rules.write().unwrap().set_rule_active(rule_id, active)
    }

    /// All rules in evaluation order
    pub fn routing_rules(&self) -> Vec<RoutingRule> {
        self.rules.read().unwrap().rules().to_vec()
    }

    // ========================================================================
    // Receipts and Acknowledgments
    // ========================================================================

    /// Fetch the delivery receipt for a message
    pub fn get_delivery_receipt(
        &self,
        message_id: &MessageId,
    ) -> Result<DeliveryReceipt, RouterError> {
        self.receipts.get(message_id)
    }

    /// Record an acknowledgment against a message's receipt
    pub fn acknowledge_delivery(
        &self,
        message_id: &MessageId,
        ack_type: AcknowledgmentType,
        actor: AgentId,
        signature: Option<String>,
    ) -> Result<AcknowledgmentId, RouterError> {
        self.receipts
            .acknowledge(message_id, ack_type, actor, signature, self.clock.as_ref())
    }

    // ========================================================================
    // Health and Analytics
    // ========================================================================

    /// Re-evaluate breakers and refresh analytics from current statistics.
    ///
    /// Health and analytics reads call this themselves; a periodic driver
    /// may also call it to keep breaker windows aligned with real time.
    pub fn refresh_monitors(&self) {
        let snapshot = self.queues.stats_snapshot();
        let now = self.clock.now();
        self.breakers.evaluate(&snapshot, self.clock.as_ref());
        self.analytics.refresh(&snapshot, now);
    }

    /// Health report for one queue.
    ///
    /// Triggers a breaker evaluation first, so open breakers past their
    /// cooldown get their close check here.
    pub fn get_queue_health(
        &self,
        queue_name: &QueueName,
    ) -> Result<QueueHealthReport, RouterError> {
        self.refresh_monitors();

        let queue = self
            .queues
            .get(queue_name)
            .ok_or_else(|| RouterError::QueueNotFound {
                queue_name: queue_name.as_str().to_string(),
            })?;

        let (stats, capacity) = {
            let queue = queue.lock().unwrap();
            (queue.stats(), queue.config().capacity)
        };
        let load = stats.current_size as f64 / capacity as f64;

        Ok(QueueHealthReport::derive(
            load,
            &stats,
            self.breakers.is_open(queue_name),
        ))
    }

    /// Health reports for every registered queue.
    ///
    /// Same derivation as [`Self::get_queue_health`], keyed by queue name.
    pub fn get_all_queue_health(&self) -> HashMap<QueueName, QueueHealthReport> {
        self.refresh_monitors();

        self.queues
            .all()
            .into_iter()
            .map(|(name, queue)| {
                let (stats, capacity) = {
                    let queue = queue.lock().unwrap();
                    (queue.stats(), queue.config().capacity)
                };
                let load = stats.current_size as f64 / capacity as f64;
                let report =
                    QueueHealthReport::derive(load, &stats, self.breakers.is_open(&name));
                (name, report)
            })
            .collect()
    }

    /// Refresh breakers and analytics on a fixed period until shutdown is
    /// signalled.
    ///
    /// Health reads refresh on their own; this driver keeps breaker
    /// cooldown checks moving even when nobody is reading.
    pub async fn run_monitors(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_ms = interval.as_millis() as u64,
            "Monitor refresh loop started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh_monitors();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Monitor refresh loop stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Aggregate routing analytics over the given timeframe
    pub fn get_routing_analytics(&self, timeframe: Duration) -> RoutingAnalyticsReport {
        self.refresh_monitors();
        RoutingAnalyticsReport::build(timeframe, &self.queues.stats_snapshot(), self.clock.now())
    }

    /// Breaker state for one queue
    pub fn breaker_state(&self, queue_name: &QueueName) -> CircuitBreakerState {
        self.breakers.state_of(queue_name)
    }

    /// Breaker state for every tracked queue
    pub fn breaker_states(&self) -> HashMap<QueueName, CircuitBreakerState> {
        self.breakers.all_states()
    }

    /// Force a queue's breaker closed
    pub fn reset_breaker(&self, queue_name: &QueueName) {
        self.breakers.reset(queue_name);
    }

    /// Highest sequence number stamped so far
    pub fn current_sequence(&self) -> u64 {
        self.guarantees.current_sequence()
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
