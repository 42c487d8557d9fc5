use super::{DELIVERY_MODE_PERSISTENT, DELIVERY_MODE_TRANSIENT, MessageEnvelope, MessageProperties};
use serde_json::json;

#[test]
fn test_envelope_defaults() {
    let envelope = MessageEnvelope::new("orders.created", "hello");
    assert!(!envelope.id().is_empty());
    assert_eq!(envelope.routing_key(), "orders.created");
    assert_eq!(envelope.payload().as_ref(), b"hello");
    assert!(envelope.is_persistent());
}

#[test]
fn test_envelope_ids_are_unique() {
    let a = MessageEnvelope::new("x", "1");
    let b = MessageEnvelope::new("x", "1");
    assert_ne!(a.id(), b.id());
}

#[test]
fn test_json_envelope() {
    let envelope = MessageEnvelope::json("x", &json!({"type": "greeting"}))
        .unwrap()
        .with_id("1");
    assert_eq!(envelope.id(), "1");
    let decoded: serde_json::Value = serde_json::from_slice(envelope.payload()).unwrap();
    assert_eq!(decoded["type"], "greeting");
}

#[test]
fn test_properties_encode_delivery_mode_and_seconds() {
    let envelope = MessageEnvelope::new("x", "body").with_id("msg-7");
    let props = envelope.properties();
    assert_eq!(props.message_id, "msg-7");
    assert_eq!(props.delivery_mode, DELIVERY_MODE_PERSISTENT);
    assert_eq!(props.timestamp, envelope.created_at().timestamp());

    let transient = envelope.transient().properties();
    assert_eq!(transient.delivery_mode, DELIVERY_MODE_TRANSIENT);
    assert!(!transient.is_persistent());
}

#[test]
fn test_from_wire_restores_envelope() {
    let original = MessageEnvelope::new("user.create.account", "{}").with_id("evt-1");
    let restored = MessageEnvelope::from_wire(
        original.routing_key(),
        original.payload().clone(),
        &original.properties(),
    );
    assert_eq!(restored, original);
}

#[test]
fn test_from_wire_with_transient_mode() {
    let props = MessageProperties {
        message_id: "m".to_string(),
        timestamp: 1_725_000_000,
        delivery_mode: DELIVERY_MODE_TRANSIENT,
    };
    let envelope = MessageEnvelope::from_wire("k", "p", &props);
    assert!(!envelope.is_persistent());
    assert_eq!(envelope.created_at().timestamp(), 1_725_000_000);
}
