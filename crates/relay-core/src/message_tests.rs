use super::*;
use serde_json::json;

fn agent(name: &str) -> AgentId {
    AgentId::new(name).unwrap()
}

#[test]
fn test_new_message_defaults() {
    let message = Message::new(agent("sender"), agent("recipient"), "task_request");

    assert_eq!(message.message_type, "task_request");
    assert_eq!(message.priority, MessagePriority::Normal);
    assert!(message.metadata.is_empty());
    assert!(!message.is_stamped());
    assert!(!message.ack_required);
}

#[test]
fn test_with_priority_and_metadata() {
    let message = Message::new(agent("sender"), agent("recipient"), "task_request")
        .with_priority(MessagePriority::Urgent)
        .with_metadata("trace_id", json!("abc-123"))
        .with_metadata("attempt", json!(1));

    assert_eq!(message.priority, MessagePriority::Urgent);
    assert_eq!(message.metadata_value("trace_id"), Some(&json!("abc-123")));
    assert_eq!(message.metadata_value("attempt"), Some(&json!(1)));
    assert_eq!(message.metadata_value("absent"), None);
}

#[test]
fn test_each_message_gets_fresh_id() {
    let a = Message::new(agent("s"), agent("r"), "t");
    let b = Message::new(agent("s"), agent("r"), "t");

    assert_ne!(a.message_id, b.message_id);
}

#[test]
fn test_message_serde_round_trip() {
    let message = Message::new(agent("sender"), agent("recipient"), "task_request")
        .with_metadata("key", json!({"nested": true}));

    let encoded = serde_json::to_string(&message).unwrap();
    let decoded: Message = serde_json::from_str(&encoded).unwrap();

    assert_eq!(message, decoded);
}
