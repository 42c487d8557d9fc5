use std::time::Duration;

use super::{
    TOPIC_PATTERNS, TaskMessage, basic_envelopes, basic_messages, process_task, processing_time,
    topic_envelopes,
};
use crate::routing::RoutingKeyMatcher;

#[test]
fn test_basic_messages_decode_as_tasks() {
    let kinds: Vec<String> = basic_messages()
        .into_iter()
        .map(|m| serde_json::from_value::<TaskMessage>(m).unwrap().kind)
        .collect();
    assert_eq!(kinds, ["greeting", "task", "notification", "data", "system"]);
}

#[test]
fn test_basic_envelopes_target_queue() {
    let envelopes = basic_envelopes("jobs", false).unwrap();
    assert_eq!(envelopes.len(), 5);
    assert!(envelopes.iter().all(|e| e.routing_key() == "jobs"));
    assert!(envelopes.iter().all(|e| !e.is_persistent()));
    assert_eq!(envelopes[0].id(), "batch-1");
    assert_eq!(envelopes[4].id(), "batch-5");
}

#[test]
fn test_topic_envelopes_are_all_routable() {
    let envelopes = topic_envelopes(true).unwrap();
    assert_eq!(envelopes.len(), 10);

    let matcher = RoutingKeyMatcher::from_keys(TOPIC_PATTERNS).unwrap();
    for envelope in &envelopes {
        assert!(
            matcher.matches_any(envelope.routing_key()),
            "{} should be routable",
            envelope.routing_key()
        );
    }
    assert_eq!(envelopes[3].routing_key(), "analytics.error.javascript");
    assert_eq!(
        matcher.first_match("order.delete.cancel").map(|p| p.to_string()),
        Some("#.cancel".to_string())
    );
}

#[test]
fn test_processing_time_by_kind() {
    assert_eq!(processing_time("notification"), Duration::from_millis(300));
    assert_eq!(processing_time("system"), Duration::from_secs(2));
    assert_eq!(processing_time("unknown"), Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_process_task_simulates_work() {
    let task = TaskMessage {
        id: 4,
        kind: "data".to_string(),
        message: "Update user statistics".to_string(),
    };
    let started = tokio::time::Instant::now();
    process_task(task, 1.0).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(1500));
}
