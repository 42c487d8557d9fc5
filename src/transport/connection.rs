//! Broker connection abstraction
//!
//! `courier` does not speak the wire protocol itself. It drives a broker
//! through these two traits: a `Connector` opens a channel, and a
//! `BrokerChannel` carries the declare/publish/consume/ack operations.
//!
//! Implementations must serialize operations on one channel: only one
//! publish, ack, nack or declare may be in flight on it at a time. The
//! in-memory broker does this with a lock around its state; the AMQP adapter
//! relies on the client library's channel ordering.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::delivery::{Delivery, DeliveryTag};
use crate::message::MessageProperties;
use crate::transport::topology::{ExchangeKind, QueueSpec};
use crate::utils::error::{ConnectionError, PublishError, TransportError};

/// Lazy, infinite sequence of deliveries for one queue. Ends only when the
/// channel closes and cannot be restarted afterwards.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, TransportError>>;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
    pub vhost: String,
    pub heartbeat: Duration,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            credentials: Credentials::new("guest", "guest"),
            vhost: "/".to_string(),
            heartbeat: Duration::from_secs(60),
        }
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    type Channel: BrokerChannel;

    async fn connect(&self, params: &ConnectionParams) -> Result<Self::Channel, ConnectionError>;
}

#[async_trait]
pub trait BrokerChannel: Send + Sync + 'static {
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), TransportError>;

    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), TransportError>;

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key_pattern: &str,
    ) -> Result<(), TransportError>;

    /// Caps unacknowledged deliveries outstanding on this channel.
    /// Zero means unlimited.
    async fn set_prefetch(&self, count: u16) -> Result<(), TransportError>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
        properties: &MessageProperties,
    ) -> Result<(), PublishError>;

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, TransportError>;

    async fn ack(&self, tag: DeliveryTag) -> Result<(), TransportError>;

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), TransportError>;

    /// Closes the channel. Calling it again is a no-op.
    async fn close(&self) -> Result<(), TransportError>;
}
