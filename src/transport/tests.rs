use std::time::Duration;

use futures_util::StreamExt;

use super::{
    BindingSpec, BrokerChannel, ConnectionParams, Connector, Credentials, DELIVERY_LOG_CAPACITY,
    DeliveryStream, ExchangeKind, ExchangeSpec, MemoryBroker, MemoryChannel, QueueSpec, Topology,
};
use crate::delivery::{Delivery, DeliveryTag};
use crate::message::MessageEnvelope;
use crate::utils::error::{ConnectionError, PublishError, TransportError};

async fn channel(broker: &MemoryBroker) -> MemoryChannel {
    broker.connect(&ConnectionParams::default()).await.unwrap()
}

async fn publish(
    channel: &MemoryChannel,
    exchange: &str,
    envelope: &MessageEnvelope,
) -> Result<(), PublishError> {
    channel
        .publish(
            exchange,
            envelope.routing_key(),
            envelope.payload().clone(),
            &envelope.properties(),
        )
        .await
}

async fn next(stream: &mut DeliveryStream) -> Delivery {
    tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("timed out waiting for a delivery")
        .expect("stream ended")
        .expect("transport error")
}

async fn nothing_pending(stream: &mut DeliveryStream) -> bool {
    tokio::time::timeout(Duration::from_millis(50), stream.next())
        .await
        .is_err()
}

#[tokio::test]
async fn test_connect_checks_credentials_and_vhost() {
    let broker = MemoryBroker::new().with_user("app", "secret");

    let params = ConnectionParams {
        credentials: Credentials::new("app", "wrong"),
        ..ConnectionParams::default()
    };
    assert!(matches!(
        broker.connect(&params).await,
        Err(ConnectionError::AuthenticationFailed { username }) if username == "app"
    ));

    let params = ConnectionParams {
        credentials: Credentials::new("app", "secret"),
        vhost: "/staging".to_string(),
        ..ConnectionParams::default()
    };
    assert!(matches!(
        broker.connect(&params).await,
        Err(ConnectionError::VhostNotFound(v)) if v == "/staging"
    ));

    let broker = broker.with_vhost("/staging");
    assert!(broker.connect(&params).await.is_ok());
}

#[tokio::test]
async fn test_connect_to_unavailable_broker() {
    let broker = MemoryBroker::new();
    broker.set_available(false);
    let err = broker.connect(&ConnectionParams::default()).await.unwrap_err();
    assert!(matches!(err, ConnectionError::Unreachable { port: 5672, .. }));
}

#[tokio::test]
async fn test_default_exchange_routes_by_queue_name() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker).await;
    ch.declare_queue(&QueueSpec::durable("basic")).await.unwrap();

    let envelope = MessageEnvelope::new("basic", "hello").with_id("1");
    publish(&ch, "", &envelope).await.unwrap();
    assert_eq!(broker.queue_depth("basic"), Some(1));

    let mut stream = ch.consume("basic").await.unwrap();
    let delivery = next(&mut stream).await;
    assert_eq!(delivery.envelope, envelope);
    assert!(!delivery.attempt.redelivered);
    assert_eq!(delivery.attempt.envelope_id, "1");
    assert_eq!(broker.unacked_count(), 1);

    ch.ack(delivery.tag()).await.unwrap();
    assert_eq!(broker.unacked_count(), 0);
    assert_eq!(broker.queue_depth("basic"), Some(0));
}

#[tokio::test]
async fn test_topic_exchange_routes_through_patterns() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker).await;
    Topology::new()
        .exchange(ExchangeSpec::new("events", ExchangeKind::Topic))
        .queue(QueueSpec::durable("errors"))
        .queue(QueueSpec::durable("users"))
        .bind(BindingSpec::new("errors", "events", "*.error.*"))
        .bind(BindingSpec::new("users", "events", "user.#"))
        .declare(&ch)
        .await
        .unwrap();

    for key in ["analytics.error.javascript", "user.create.account", "order.delete.cancel"] {
        publish(&ch, "events", &MessageEnvelope::new(key, "{}")).await.unwrap();
    }
    assert_eq!(broker.queue_depth("errors"), Some(1));
    assert_eq!(broker.queue_depth("users"), Some(1));
}

#[tokio::test]
async fn test_direct_and_fanout_exchanges() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker).await;
    Topology::new()
        .exchange(ExchangeSpec::new("direct", ExchangeKind::Direct))
        .exchange(ExchangeSpec::new("fanout", ExchangeKind::Fanout))
        .queue(QueueSpec::durable("a"))
        .queue(QueueSpec::durable("b"))
        .bind(BindingSpec::new("a", "direct", "high"))
        .bind(BindingSpec::new("a", "fanout", ""))
        .bind(BindingSpec::new("b", "fanout", ""))
        .declare(&ch)
        .await
        .unwrap();

    publish(&ch, "direct", &MessageEnvelope::new("high", "1")).await.unwrap();
    publish(&ch, "direct", &MessageEnvelope::new("low", "2")).await.unwrap();
    publish(&ch, "fanout", &MessageEnvelope::new("anything", "3")).await.unwrap();
    assert_eq!(broker.queue_depth("a"), Some(2));
    assert_eq!(broker.queue_depth("b"), Some(1));
}

#[tokio::test]
async fn test_publish_to_missing_exchange_is_rejected() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker).await;
    let err = publish(&ch, "nope", &MessageEnvelope::new("x", "1")).await.unwrap_err();
    assert!(matches!(err, PublishError::Rejected(_)));
}

#[tokio::test]
async fn test_publish_when_unreachable() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker).await;
    broker.set_available(false);
    let err = publish(&ch, "", &MessageEnvelope::new("x", "1")).await.unwrap_err();
    assert!(matches!(err, PublishError::Unreachable(_)));

    broker.set_available(true);
    ch.close().await.unwrap();
    let err = publish(&ch, "", &MessageEnvelope::new("x", "1")).await.unwrap_err();
    assert!(matches!(err, PublishError::Unreachable(_)));
}

#[tokio::test]
async fn test_unroutable_message_is_dropped() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker).await;
    ch.declare_exchange("events", ExchangeKind::Topic, true).await.unwrap();
    publish(&ch, "events", &MessageEnvelope::new("nobody.listens", "1")).await.unwrap();
    assert!(broker.delivery_log().is_empty());
}

#[tokio::test]
async fn test_prefetch_limits_outstanding_deliveries() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker).await;
    ch.declare_queue(&QueueSpec::durable("q")).await.unwrap();
    ch.set_prefetch(1).await.unwrap();
    for i in 0..3 {
        publish(&ch, "", &MessageEnvelope::new("q", "x").with_id(i.to_string())).await.unwrap();
    }

    let mut stream = ch.consume("q").await.unwrap();
    let first = next(&mut stream).await;
    assert_eq!(first.envelope.id(), "0");
    assert!(nothing_pending(&mut stream).await);
    assert_eq!(broker.queue_depth("q"), Some(2));

    ch.ack(first.tag()).await.unwrap();
    let second = next(&mut stream).await;
    assert_eq!(second.envelope.id(), "1");
}

#[tokio::test]
async fn test_nack_requeue_redelivers_with_flag() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker).await;
    ch.declare_queue(&QueueSpec::durable("q")).await.unwrap();
    ch.set_prefetch(1).await.unwrap();
    publish(&ch, "", &MessageEnvelope::new("q", "a").with_id("a")).await.unwrap();
    publish(&ch, "", &MessageEnvelope::new("q", "b").with_id("b")).await.unwrap();

    let mut stream = ch.consume("q").await.unwrap();
    let first = next(&mut stream).await;
    ch.nack(first.tag(), true).await.unwrap();

    let again = next(&mut stream).await;
    assert_eq!(again.envelope.id(), "a");
    assert!(again.attempt.redelivered);
    assert_ne!(again.tag(), first.tag());

    ch.nack(again.tag(), false).await.unwrap();
    let other = next(&mut stream).await;
    assert_eq!(other.envelope.id(), "b");
    assert!(!other.attempt.redelivered);
    assert_eq!(broker.deliveries_of("a").len(), 2);
}

#[tokio::test]
async fn test_stale_and_foreign_tags_are_errors() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker).await;
    let other = channel(&broker).await;
    ch.declare_queue(&QueueSpec::durable("q")).await.unwrap();
    publish(&ch, "", &MessageEnvelope::new("q", "a")).await.unwrap();

    let mut stream = ch.consume("q").await.unwrap();
    let delivery = next(&mut stream).await;

    assert!(matches!(
        other.ack(delivery.tag()).await,
        Err(TransportError::UnknownDeliveryTag(_))
    ));
    ch.ack(delivery.tag()).await.unwrap();
    assert!(matches!(
        ch.ack(delivery.tag()).await,
        Err(TransportError::UnknownDeliveryTag(_))
    ));
    assert!(matches!(
        ch.nack(DeliveryTag(999), true).await,
        Err(TransportError::UnknownDeliveryTag(DeliveryTag(999)))
    ));
}

#[tokio::test]
async fn test_closing_channel_requeues_unacked() {
    let broker = MemoryBroker::new();
    let consumer = channel(&broker).await;
    consumer.declare_queue(&QueueSpec::durable("q")).await.unwrap();
    publish(&consumer, "", &MessageEnvelope::new("q", "a").with_id("a")).await.unwrap();

    let mut stream = consumer.consume("q").await.unwrap();
    let _delivery = next(&mut stream).await;
    consumer.close().await.unwrap();
    consumer.close().await.unwrap();

    assert!(stream.next().await.is_none());
    assert_eq!(broker.unacked_count(), 0);
    assert_eq!(broker.queue_depth("q"), Some(1));

    let replacement = channel(&broker).await;
    let mut stream = replacement.consume("q").await.unwrap();
    let delivery = next(&mut stream).await;
    assert_eq!(delivery.envelope.id(), "a");
    assert!(delivery.attempt.redelivered);
}

#[tokio::test]
async fn test_closed_channel_rejects_operations() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker).await;
    ch.close().await.unwrap();
    assert!(matches!(
        ch.declare_queue(&QueueSpec::durable("q")).await,
        Err(TransportError::ChannelClosed)
    ));
}

#[tokio::test]
async fn test_redeclare_with_different_properties_fails() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker).await;
    ch.declare_queue(&QueueSpec::durable("q")).await.unwrap();
    ch.declare_queue(&QueueSpec::durable("q")).await.unwrap();
    assert!(matches!(
        ch.declare_queue(&QueueSpec::transient("q")).await,
        Err(TransportError::PreconditionFailed(_))
    ));

    ch.declare_exchange("x", ExchangeKind::Topic, true).await.unwrap();
    assert!(matches!(
        ch.declare_exchange("x", ExchangeKind::Fanout, true).await,
        Err(TransportError::PreconditionFailed(_))
    ));
}

#[tokio::test]
async fn test_bind_errors() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker).await;
    ch.declare_exchange("events", ExchangeKind::Topic, true).await.unwrap();
    assert!(matches!(
        ch.bind_queue("missing", "events", "#").await,
        Err(TransportError::NotFound { kind: "queue", .. })
    ));
    ch.declare_queue(&QueueSpec::durable("q")).await.unwrap();
    assert!(matches!(
        ch.bind_queue("q", "missing", "#").await,
        Err(TransportError::NotFound { kind: "exchange", .. })
    ));
    assert!(matches!(
        ch.bind_queue("q", "events", "user.log*").await,
        Err(TransportError::InvalidPattern(_))
    ));
}

#[tokio::test]
async fn test_consumers_share_queue_round_robin() {
    let broker = MemoryBroker::new();
    let a = channel(&broker).await;
    let b = channel(&broker).await;
    a.declare_queue(&QueueSpec::durable("q")).await.unwrap();
    let mut stream_a = a.consume("q").await.unwrap();
    let mut stream_b = b.consume("q").await.unwrap();

    for i in 0..4 {
        publish(&a, "", &MessageEnvelope::new("q", "x").with_id(i.to_string())).await.unwrap();
    }
    assert_eq!(next(&mut stream_a).await.envelope.id(), "0");
    assert_eq!(next(&mut stream_b).await.envelope.id(), "1");
    assert_eq!(next(&mut stream_a).await.envelope.id(), "2");
    assert_eq!(next(&mut stream_b).await.envelope.id(), "3");
}

#[tokio::test]
async fn test_auto_delete_queue_goes_with_last_consumer() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker).await;
    ch.declare_queue(&QueueSpec::transient("rpc")).await.unwrap();
    let _stream = ch.consume("rpc").await.unwrap();
    assert_eq!(broker.consumer_count("rpc"), 1);
    ch.close().await.unwrap();
    assert!(!broker.has_queue("rpc"));
}

#[tokio::test]
async fn test_dropping_channel_closes_it() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker).await;
    ch.declare_queue(&QueueSpec::durable("q")).await.unwrap();
    publish(&ch, "", &MessageEnvelope::new("q", "a")).await.unwrap();
    let mut stream = ch.consume("q").await.unwrap();
    let _ = next(&mut stream).await;
    drop(ch);
    assert_eq!(broker.unacked_count(), 0);
    assert_eq!(broker.queue_depth("q"), Some(1));
}

#[tokio::test]
async fn test_restart_keeps_only_durable_state() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker).await;
    Topology::new()
        .exchange(ExchangeSpec::new("durable_x", ExchangeKind::Topic))
        .exchange(ExchangeSpec {
            durable: false,
            ..ExchangeSpec::new("temp_x", ExchangeKind::Topic)
        })
        .queue(QueueSpec::durable("keep"))
        .queue(QueueSpec {
            auto_delete: false,
            ..QueueSpec::transient("lose")
        })
        .declare(&ch)
        .await
        .unwrap();

    publish(&ch, "", &MessageEnvelope::new("keep", "p").with_id("persistent")).await.unwrap();
    publish(&ch, "", &MessageEnvelope::new("keep", "t").with_id("transient").transient())
        .await
        .unwrap();

    broker.restart();
    assert!(broker.has_exchange("durable_x"));
    assert!(!broker.has_exchange("temp_x"));
    assert!(!broker.has_queue("lose"));
    assert_eq!(broker.queue_depth("keep"), Some(1));
    assert!(matches!(
        ch.declare_queue(&QueueSpec::durable("keep")).await,
        Err(TransportError::ChannelClosed)
    ));

    let fresh = channel(&broker).await;
    let mut stream = fresh.consume("keep").await.unwrap();
    assert_eq!(next(&mut stream).await.envelope.id(), "persistent");
}

#[tokio::test]
async fn test_priority_queue_arguments_are_kept() {
    let spec = QueueSpec::priority("priority");
    assert!(spec.durable);
    assert_eq!(spec.arguments["x-max-priority"], serde_json::json!(10));

    let broker = MemoryBroker::new();
    let ch = channel(&broker).await;
    ch.declare_queue(&spec).await.unwrap();
    assert!(broker.has_queue("priority"));
}

#[tokio::test]
async fn test_topology_presets() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker).await;
    Topology::basic("basic").declare(&ch).await.unwrap();
    Topology::topic("events").declare(&ch).await.unwrap();
    assert!(broker.has_queue("basic"));
    assert!(broker.has_exchange("events"));

    // redeclaring the same presets is a no-op
    Topology::basic("basic").declare(&ch).await.unwrap();
    Topology::topic("events").declare(&ch).await.unwrap();
}

#[tokio::test]
async fn test_delivery_log_is_bounded_but_count_keeps_going() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker).await;
    ch.declare_queue(&QueueSpec::transient("bulk")).await.unwrap();
    let mut stream = ch.consume("bulk").await.unwrap();

    let total = DELIVERY_LOG_CAPACITY + 5;
    for i in 0..total {
        let envelope = MessageEnvelope::new("bulk", "x").with_id(i.to_string());
        publish(&ch, "", &envelope).await.unwrap();
        let delivery = next(&mut stream).await;
        ch.ack(delivery.tag()).await.unwrap();
    }

    assert_eq!(broker.delivered_count(), total as u64);
    let log = broker.delivery_log();
    assert_eq!(log.len(), DELIVERY_LOG_CAPACITY);
    assert_eq!(log[0].envelope_id, "5");
    assert!(broker.deliveries_of("0").is_empty());
    assert_eq!(broker.deliveries_of(&(total - 1).to_string()).len(), 1);
}
