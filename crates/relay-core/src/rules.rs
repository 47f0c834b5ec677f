//! Routing rule engine.
//!
//! An ordered rule set matched against message attributes to select
//! candidate target queues and delivery options. Rules are kept sorted by
//! ascending priority at insertion, so evaluation order is deterministic
//! for a fixed rule set; matching is a pure function over the current
//! rules with no side effects.

use crate::guarantee::DeliveryGuarantee;
use crate::message::Message;
use crate::{MessagePriority, QueueName, RetryPolicy, RouterError, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ============================================================================
// Rule Types
// ============================================================================

/// A prioritized predicate-to-action mapping.
///
/// Lower `priority` values are evaluated first. Inactive rules are skipped
/// entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    /// Unique rule identifier
    pub id: String,

    /// Human-readable rule name for logging and debugging
    pub name: String,

    /// Evaluation order, lower first
    pub priority: i32,

    /// Whether the rule participates in matching
    pub active: bool,

    /// Conditions that must all hold for the rule to match
    pub conditions: RuleConditions,

    /// Actions applied when the rule is selected
    pub actions: RuleActions,
}

impl RoutingRule {
    /// Create a new active rule with empty conditions and actions
    pub fn new(id: impl Into<String>, name: impl Into<String>, priority: i32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            priority,
            active: true,
            conditions: RuleConditions::default(),
            actions: RuleActions::default(),
        }
    }

    /// Set rule conditions
    pub fn with_conditions(mut self, conditions: RuleConditions) -> Self {
        self.conditions = conditions;
        self
    }

    /// Set rule actions
    pub fn with_actions(mut self, actions: RuleActions) -> Self {
        self.actions = actions;
        self
    }

    /// Mark the rule inactive
    pub fn disabled(mut self) -> Self {
        self.active = false;
        self
    }

    /// Check if this rule matches the given message
    pub fn matches(&self, message: &Message) -> bool {
        self.active && self.conditions.matches(message)
    }

    /// Validate id, name, and priority constraints
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::Required {
                field: "rule_id".to_string(),
            });
        }

        if self.name.is_empty() {
            return Err(ValidationError::Required {
                field: "rule_name".to_string(),
            });
        }

        if self.priority < 0 {
            return Err(ValidationError::OutOfRange {
                field: "rule_priority".to_string(),
                message: "must be non-negative".to_string(),
            });
        }

        Ok(())
    }
}

/// Match conditions for a routing rule.
///
/// Empty sets match any value; pattern lists and custom conditions must
/// all hold.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RuleConditions {
    /// Message types to match, empty matches any
    pub message_types: Vec<String>,

    /// Priorities to match, empty matches any
    pub priorities: Vec<MessagePriority>,

    /// Glob patterns the sender must satisfy (all of them)
    pub sender_patterns: Vec<String>,

    /// Glob patterns the recipient must satisfy (all of them)
    pub recipient_patterns: Vec<String>,

    /// Custom typed conditions over message fields and metadata
    pub custom: Vec<CustomCondition>,
}

impl RuleConditions {
    /// Match only the given message types
    pub fn for_message_types(types: Vec<String>) -> Self {
        Self {
            message_types: types,
            ..Self::default()
        }
    }

    /// Match only the given priorities
    pub fn for_priorities(priorities: Vec<MessagePriority>) -> Self {
        Self {
            priorities,
            ..Self::default()
        }
    }

    /// Add a sender glob pattern
    pub fn with_sender_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.sender_patterns.push(pattern.into());
        self
    }

    /// Add a recipient glob pattern
    pub fn with_recipient_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.recipient_patterns.push(pattern.into());
        self
    }

    /// Add a custom condition
    pub fn with_custom(mut self, condition: CustomCondition) -> Self {
        self.custom.push(condition);
        self
    }

    /// Check if every condition holds for the given message
    pub fn matches(&self, message: &Message) -> bool {
        if !self.message_types.is_empty()
            && !self.message_types.contains(&message.message_type)
        {
            return false;
        }

        if !self.priorities.is_empty() && !self.priorities.contains(&message.priority) {
            return false;
        }

        if !self
            .sender_patterns
            .iter()
            .all(|p| glob_match(p, message.sender.as_str()))
        {
            return false;
        }

        if !self
            .recipient_patterns
            .iter()
            .all(|p| glob_match(p, message.recipient.as_str()))
        {
            return false;
        }

        self.custom.iter().all(|c| c.matches(message))
    }
}

/// Actions applied when a rule is selected for a message
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RuleActions {
    /// Queues the message is routed to
    pub target_queues: Vec<QueueName>,

    /// Delivery guarantee to stamp, overriding the router default
    pub guarantee: Option<DeliveryGuarantee>,

    /// Retry policy override for delivery attempts from the target queues
    pub retry_policy: Option<RetryPolicy>,

    /// Metadata entries merged into the message before enqueue
    pub annotations: HashMap<String, Value>,
}

impl RuleActions {
    /// Route to the given queues with default delivery options
    pub fn to_queues(target_queues: Vec<QueueName>) -> Self {
        Self {
            target_queues,
            ..Self::default()
        }
    }

    /// Set the delivery guarantee
    pub fn with_guarantee(mut self, guarantee: DeliveryGuarantee) -> Self {
        self.guarantee = Some(guarantee);
        self
    }

    /// Set the retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Add a metadata annotation
    pub fn with_annotation(mut self, key: impl Into<String>, value: Value) -> Self {
        self.annotations.insert(key.into(), value);
        self
    }
}

// ============================================================================
// Custom Conditions
// ============================================================================

/// Comparison operator for custom conditions.
///
/// A closed set over typed fields; `greater_than`/`less_than` coerce both
/// sides to numbers and fail the condition when coercion is impossible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    Contains,
    Matches,
    GreaterThan,
    LessThan,
}

/// A typed predicate over a message field or metadata entry.
///
/// `field` addresses the built-in fields `sender`, `recipient`,
/// `message_type`, and `priority`; any other name (optionally prefixed
/// with `metadata.`) is looked up in the metadata map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomCondition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: Value,
}

impl CustomCondition {
    /// Create a new custom condition
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Evaluate the condition against a message
    pub fn matches(&self, message: &Message) -> bool {
        let Some(actual) = resolve_field(message, &self.field) else {
            return false;
        };

        match self.operator {
            ConditionOperator::Equals => actual == self.value,
            ConditionOperator::Contains => match (as_text(&actual), as_text(&self.value)) {
                (Some(haystack), Some(needle)) => haystack.contains(&needle),
                _ => false,
            },
            ConditionOperator::Matches => match (as_text(&actual), as_text(&self.value)) {
                (Some(text), Some(pattern)) => regex::Regex::new(&pattern)
                    .map(|re| re.is_match(&text))
                    .unwrap_or(false),
                _ => false,
            },
            ConditionOperator::GreaterThan => match (as_number(&actual), as_number(&self.value)) {
                (Some(a), Some(b)) => a > b,
                _ => false,
            },
            ConditionOperator::LessThan => match (as_number(&actual), as_number(&self.value)) {
                (Some(a), Some(b)) => a < b,
                _ => false,
            },
        }
    }
}

/// Resolve a condition field to a JSON value
fn resolve_field(message: &Message, field: &str) -> Option<Value> {
    match field {
        "sender" => Some(Value::String(message.sender.as_str().to_string())),
        "recipient" => Some(Value::String(message.recipient.as_str().to_string())),
        "message_type" => Some(Value::String(message.message_type.clone())),
        "priority" => Some(Value::String(message.priority.as_str().to_string())),
        other => {
            let key = other.strip_prefix("metadata.").unwrap_or(other);
            message.metadata.get(key).cloned()
        }
    }
}

/// String form of a JSON value for contains/matches operators
fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Numeric coercion for greater_than/less_than operators
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

// ============================================================================
// Glob Matching
// ============================================================================

/// Anchored glob match where `*` matches any run of characters and `?`
/// matches exactly one character.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            // Remember the star position; try the shortest match first
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = backtrack {
            // Extend the last star by one character and retry
            p = star_p + 1;
            t = star_t + 1;
            backtrack = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }

    p == pattern.len()
}

// ============================================================================
// Rule Engine
// ============================================================================

/// Ordered rule set with deterministic evaluation.
///
/// Rules are kept sorted by ascending priority at insertion; ties preserve
/// insertion order.
#[derive(Debug, Default)]
pub struct RuleEngine {
    rules: Vec<RoutingRule>,
}

impl RuleEngine {
    /// Create an empty rule engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a rule at its priority position.
    ///
    /// # Errors
    /// - `RouterError::Validation` - empty id/name or negative priority
    /// - `RouterError::DuplicateRule` - a rule with the same id exists
    pub fn add_rule(&mut self, rule: RoutingRule) -> Result<(), RouterError> {
        rule.validate()?;

        if self.rules.iter().any(|r| r.id == rule.id) {
            return Err(RouterError::DuplicateRule {
                rule_id: rule.id.clone(),
            });
        }

        // Stable insert: after all rules with priority <= the new one
        let position = self
            .rules
            .iter()
            .position(|r| r.priority > rule.priority)
            .unwrap_or(self.rules.len());
        self.rules.insert(position, rule);

        Ok(())
    }

    /// Remove a rule by id
    pub fn remove_rule(&mut self, rule_id: &str) -> Result<RoutingRule, RouterError> {
        let position = self
            .rules
            .iter()
            .position(|r| r.id == rule_id)
            .ok_or_else(|| RouterError::RuleNotFound {
                rule_id: rule_id.to_string(),
            })?;
        Ok(self.rules.remove(position))
    }

    /// Activate or deactivate a rule without removing it
    pub fn set_rule_active(&mut self, rule_id: &str, active: bool) -> Result<(), RouterError> {
        let rule = self
            .rules
            .iter_mut()
            .find(|r| r.id == rule_id)
            .ok_or_else(|| RouterError::RuleNotFound {
                rule_id: rule_id.to_string(),
            })?;
        rule.active = active;
        Ok(())
    }

    /// All active rules matching the message, in ascending priority order.
    ///
    /// Pure over the current rule set; no side effects.
    pub fn matching_rules(&self, message: &Message) -> Vec<&RoutingRule> {
        self.rules.iter().filter(|r| r.matches(message)).collect()
    }

    /// First (lowest-priority-value) active rule matching the message
    pub fn first_match(&self, message: &Message) -> Option<&RoutingRule> {
        self.rules.iter().find(|r| r.matches(message))
    }

    /// All rules in evaluation order
    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Check if the engine has no rules
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
#[path = "rules_tests.rs"]
mod tests;
