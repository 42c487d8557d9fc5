//! Sample traffic used by the `courier` binary: the basic task messages, the
//! analytics/notification/event messages for the topic exchange, and a task
//! handler that simulates work per message type.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::message::MessageEnvelope;
use crate::utils::error::ProcessingError;

/// Topic patterns the sample topic traffic is meant to be consumed with.
pub const TOPIC_PATTERNS: [&str; 6] = [
    "analytics.#",
    "notification.*.*",
    "*.error.*",
    "user.*.*",
    "product.#",
    "#.cancel",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

fn now() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// The five messages a basic producer sends to the basic queue.
pub fn basic_messages() -> Vec<Value> {
    vec![
        json!({
            "id": 1,
            "type": "greeting",
            "message": "Hello RabbitMQ from courier!",
            "timestamp": now(),
        }),
        json!({
            "id": 2,
            "type": "task",
            "message": "Process user registration",
            "user_id": 12345,
            "priority": "high",
        }),
        json!({
            "id": 3,
            "type": "notification",
            "message": "Send welcome email",
            "recipient": "user@example.com",
        }),
        json!({
            "id": 4,
            "type": "data",
            "message": "Update user statistics",
            "metrics": {"logins": 15, "page_views": 42, "purchases": 3},
        }),
        json!({
            "id": 5,
            "type": "system",
            "message": "Run daily backup",
            "backup_type": "full",
            "target": "/var/data",
        }),
    ]
}

/// `basic_messages` as envelopes for `queue`, with ids `batch-1..`.
pub fn basic_envelopes(
    queue: &str,
    persistent: bool,
) -> Result<Vec<MessageEnvelope>, serde_json::Error> {
    basic_messages()
        .iter()
        .enumerate()
        .map(|(i, message)| {
            Ok(MessageEnvelope::json(queue, message)?
                .with_id(format!("batch-{}", i + 1))
                .with_persistent(persistent))
        })
        .collect()
}

fn analytics(category: &str, action: &str, label: &str, value: Value) -> (String, String, Value) {
    (
        format!("analytics.{category}.{action}"),
        format!("analytics-{category}-{action}"),
        json!({
            "category": category,
            "action": action,
            "label": label,
            "value": value,
            "timestamp": now(),
        }),
    )
}

fn notification(
    user_id: u64,
    kind: &str,
    priority: &str,
    content: Value,
) -> (String, String, Value) {
    (
        format!("notification.{priority}.{kind}"),
        format!("notification-{kind}-{priority}"),
        json!({
            "user_id": user_id,
            "type": kind,
            "priority": priority,
            "content": content,
            "timestamp": now(),
        }),
    )
}

fn event(resource: &str, action: &str, event_type: &str, data: Value) -> (String, String, Value) {
    (
        format!("{resource}.{action}.{event_type}"),
        format!("event-{resource}-{action}"),
        json!({
            "resource": resource,
            "action": action,
            "event_type": event_type,
            "data": data,
            "timestamp": now(),
        }),
    )
}

/// Analytics, notification and event messages keyed
/// `analytics.<category>.<action>`, `notification.<priority>.<type>` and
/// `<resource>.<action>.<event>`.
pub fn topic_envelopes(persistent: bool) -> Result<Vec<MessageEnvelope>, serde_json::Error> {
    let messages = [
        analytics("user", "login", "web", json!(1)),
        analytics("user", "purchase", "mobile", json!(99.99)),
        analytics("page", "view", "homepage", json!(1500)),
        analytics("error", "javascript", "timeout", Value::Null),
        notification(
            123,
            "email",
            "high",
            json!({
                "subject": "Account Security Alert",
                "body": "Your account has been accessed from a new device.",
            }),
        ),
        notification(456, "sms", "medium", json!({"message": "Your order has been shipped!"})),
        notification(
            789,
            "push",
            "low",
            json!({"title": "New feature available", "body": "Check out our latest updates!"}),
        ),
        event(
            "user",
            "create",
            "account",
            json!({"user_id": 12345, "email": "newuser@example.com", "source": "web"}),
        ),
        event(
            "product",
            "update",
            "price",
            json!({"product_id": 67890, "old_price": 19.99, "new_price": 14.99, "discount": 25}),
        ),
        event(
            "order",
            "delete",
            "cancel",
            json!({"order_id": 11111, "reason": "customer_request", "refund_amount": 49.99}),
        ),
    ];

    messages
        .into_iter()
        .map(|(routing_key, id, body)| {
            Ok(MessageEnvelope::json(routing_key, &body)?
                .with_id(id)
                .with_persistent(persistent))
        })
        .collect()
}

/// How long a task of `kind` pretends to work.
pub fn processing_time(kind: &str) -> Duration {
    let millis = match kind {
        "greeting" => 500,
        "task" => 1000,
        "notification" => 300,
        "data" => 1500,
        "system" => 2000,
        _ => 1000,
    };
    Duration::from_millis(millis)
}

/// Simulates processing `task`, its work time scaled by `scale`.
pub async fn process_task(task: TaskMessage, scale: f64) -> Result<(), ProcessingError> {
    info!(id = task.id, text = %task.message, "Processing {} message", task.kind);
    tokio::time::sleep(processing_time(&task.kind).mul_f64(scale.max(0.0))).await;
    info!(id = task.id, result = "success", "{} processed", task.kind);
    Ok(())
}

#[cfg(test)]
mod tests;
