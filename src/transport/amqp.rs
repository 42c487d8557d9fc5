//! AMQP 0-9-1 adapter over `lapin`, enabled with the `amqp` feature.
//!
//! Properties go over the wire unchanged: `message_id`, `timestamp` in whole
//! seconds and `delivery_mode` 2/1. The channel runs in confirm mode so a
//! broker-side nack surfaces as `PublishError::Rejected`.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::uri::{AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tracing::{info, warn};

use crate::delivery::{Delivery, DeliveryAttempt, DeliveryTag};
use crate::message::{DELIVERY_MODE_TRANSIENT, MessageEnvelope, MessageProperties};
use crate::transport::connection::{BrokerChannel, ConnectionParams, Connector, DeliveryStream};
use crate::transport::topology::{ExchangeKind, QueueSpec};
use crate::utils::error::{ConnectionError, PublishError, TransportError};

const REPLY_SUCCESS: u16 = 200;

#[derive(Debug, Clone, Copy, Default)]
pub struct AmqpConnector;

#[async_trait]
impl Connector for AmqpConnector {
    type Channel = AmqpChannel;

    async fn connect(&self, params: &ConnectionParams) -> Result<AmqpChannel, ConnectionError> {
        let connection = Connection::connect_uri(amqp_uri(params), ConnectionProperties::default())
            .await
            .map_err(|err| connection_error(params, err))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|err| connection_error(params, err))?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|err| connection_error(params, err))?;
        info!(host = %params.host, port = params.port, "Connected to RabbitMQ");
        Ok(AmqpChannel {
            connection,
            channel,
            closed: AtomicBool::new(false),
        })
    }
}

pub struct AmqpChannel {
    connection: Connection,
    channel: Channel,
    closed: AtomicBool,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), TransportError> {
        let options = QueueDeclareOptions {
            durable: spec.durable,
            auto_delete: spec.auto_delete,
            exclusive: spec.exclusive,
            ..QueueDeclareOptions::default()
        };
        self.channel
            .queue_declare(&spec.name, options, field_table(&spec.arguments))
            .await
            .map_err(transport_error)?;
        Ok(())
    }

    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), TransportError> {
        let kind = match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
        };
        let options = ExchangeDeclareOptions {
            durable,
            ..ExchangeDeclareOptions::default()
        };
        self.channel
            .exchange_declare(name, kind, options, FieldTable::default())
            .await
            .map_err(transport_error)
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key_pattern: &str,
    ) -> Result<(), TransportError> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key_pattern,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(transport_error)
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), TransportError> {
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(transport_error)
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
        properties: &MessageProperties,
    ) -> Result<(), PublishError> {
        let basic = BasicProperties::default()
            .with_message_id(ShortString::from(properties.message_id.clone()))
            .with_timestamp(u64::try_from(properties.timestamp).unwrap_or_default())
            .with_delivery_mode(properties.delivery_mode);
        let confirmation = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                basic,
            )
            .await
            .map_err(publish_error)?
            .await
            .map_err(publish_error)?;
        if confirmation.is_nack() {
            return Err(PublishError::Rejected(
                "broker did not confirm the message".to_string(),
            ));
        }
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, TransportError> {
        let consumer_tag = format!("courier-{}", uuid::Uuid::new_v4());
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(transport_error)?;
        let stream = consumer.map(|item| item.map(into_delivery).map_err(transport_error));
        Ok(stream.boxed())
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), TransportError> {
        self.channel
            .basic_ack(tag.value(), BasicAckOptions::default())
            .await
            .map_err(transport_error)
    }

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), TransportError> {
        let options = BasicNackOptions {
            multiple: false,
            requeue,
        };
        self.channel
            .basic_nack(tag.value(), options)
            .await
            .map_err(transport_error)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(err) = self.channel.close(REPLY_SUCCESS, "OK").await {
            warn!(error = %err, "Failed to close channel cleanly");
        }
        self.connection
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(transport_error)?;
        info!("Connection closed successfully");
        Ok(())
    }
}

/// Credentials and vhost are carried as structured fields, so reserved
/// characters in them never reach a URI parser.
fn amqp_uri(params: &ConnectionParams) -> AMQPUri {
    AMQPUri {
        scheme: AMQPScheme::AMQP,
        authority: AMQPAuthority {
            userinfo: AMQPUserInfo {
                username: params.credentials.username.clone(),
                password: params.credentials.password.clone(),
            },
            host: params.host.clone(),
            port: params.port,
        },
        vhost: params.vhost.clone(),
        query: AMQPQueryString {
            heartbeat: Some(u16::try_from(params.heartbeat.as_secs()).unwrap_or(u16::MAX)),
            ..AMQPQueryString::default()
        },
    }
}

fn into_delivery(delivery: lapin::message::Delivery) -> Delivery {
    let tag = DeliveryTag(delivery.delivery_tag);
    let props = &delivery.properties;
    let properties = MessageProperties {
        message_id: props
            .message_id()
            .as_ref()
            .map(|id| id.as_str().to_string())
            .unwrap_or_else(|| format!("unknown-{tag}")),
        timestamp: (*props.timestamp())
            .and_then(|ts| i64::try_from(ts).ok())
            .unwrap_or_else(|| chrono::Utc::now().timestamp()),
        delivery_mode: (*props.delivery_mode()).unwrap_or(DELIVERY_MODE_TRANSIENT),
    };
    let envelope =
        MessageEnvelope::from_wire(delivery.routing_key.as_str(), delivery.data, &properties);
    let attempt = DeliveryAttempt::new(envelope.id(), tag, delivery.redelivered);
    Delivery { envelope, attempt }
}

fn field_table(arguments: &std::collections::BTreeMap<String, serde_json::Value>) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in arguments {
        let value = match value {
            serde_json::Value::Bool(b) => AMQPValue::Boolean(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => AMQPValue::LongLongInt(i),
                None => AMQPValue::Double(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => AMQPValue::LongString(LongString::from(s.clone())),
            other => AMQPValue::LongString(LongString::from(other.to_string())),
        };
        table.insert(ShortString::from(key.clone()), value);
    }
    table
}

fn connection_error(params: &ConnectionParams, err: lapin::Error) -> ConnectionError {
    let reason = err.to_string();
    if reason.contains("ACCESS_REFUSED") {
        ConnectionError::AuthenticationFailed {
            username: params.credentials.username.clone(),
        }
    } else if reason.contains("NOT_ALLOWED") {
        ConnectionError::VhostNotFound(params.vhost.clone())
    } else {
        ConnectionError::Unreachable {
            host: params.host.clone(),
            port: params.port,
            reason,
        }
    }
}

fn transport_error(err: lapin::Error) -> TransportError {
    match err {
        lapin::Error::InvalidChannelState(_) => TransportError::ChannelClosed,
        lapin::Error::IOError(io) => TransportError::Unreachable(io.to_string()),
        other => TransportError::Protocol(other.to_string()),
    }
}

fn publish_error(err: lapin::Error) -> PublishError {
    match err {
        lapin::Error::ProtocolError(amqp) => PublishError::Rejected(amqp.to_string()),
        other => PublishError::Unreachable(other.to_string()),
    }
}
