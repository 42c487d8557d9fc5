//! Exchanges, queues and the bindings between them.
//!
//! `Topology::declare` sets them up on a channel in dependency order:
//! exchanges, then queues, then bindings.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::transport::connection::BrokerChannel;
use crate::utils::error::TransportError;

/// Name of the broker's default exchange, which routes by queue name.
pub const DEFAULT_EXCHANGE: &str = "";

/// Highest priority a priority queue accepts.
pub const DEFAULT_MAX_PRIORITY: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Direct,
    Topic,
    Fanout,
    Headers,
}

impl ExchangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Headers => "headers",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(ExchangeKind::Direct),
            "topic" => Ok(ExchangeKind::Topic),
            "fanout" => Ok(ExchangeKind::Fanout),
            "headers" => Ok(ExchangeKind::Headers),
            other => Err(format!("unknown exchange kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
}

impl ExchangeSpec {
    pub fn new(name: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            durable: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
    /// Broker-specific `x-` arguments such as `x-max-priority`.
    #[serde(default)]
    pub arguments: BTreeMap<String, serde_json::Value>,
}

impl QueueSpec {
    /// A durable, shared queue that outlives its consumers.
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            auto_delete: false,
            exclusive: false,
            arguments: BTreeMap::new(),
        }
    }

    /// A non-durable queue deleted once its last consumer goes away.
    pub fn transient(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: false,
            auto_delete: true,
            exclusive: false,
            arguments: BTreeMap::new(),
        }
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.arguments.insert(key.into(), value);
        self
    }

    pub fn with_max_priority(self, priority: u8) -> Self {
        self.with_argument("x-max-priority", serde_json::Value::from(priority))
    }

    /// A durable queue supporting priorities `0..=DEFAULT_MAX_PRIORITY`.
    pub fn priority(name: impl Into<String>) -> Self {
        Self::durable(name).with_max_priority(DEFAULT_MAX_PRIORITY)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingSpec {
    pub queue: String,
    pub exchange: String,
    pub pattern: String,
}

impl BindingSpec {
    pub fn new(
        queue: impl Into<String>,
        exchange: impl Into<String>,
        pattern: impl Into<String>,
    ) -> Self {
        Self {
            queue: queue.into(),
            exchange: exchange.into(),
            pattern: pattern.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Topology {
    pub exchanges: Vec<ExchangeSpec>,
    pub queues: Vec<QueueSpec>,
    pub bindings: Vec<BindingSpec>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// One durable queue, published to through the default exchange.
    pub fn basic(queue: impl Into<String>) -> Self {
        Self::new().queue(QueueSpec::durable(queue))
    }

    /// One durable topic exchange; queues are bound to it separately.
    pub fn topic(exchange: impl Into<String>) -> Self {
        Self::new().exchange(ExchangeSpec::new(exchange, ExchangeKind::Topic))
    }

    pub fn exchange(mut self, spec: ExchangeSpec) -> Self {
        self.exchanges.push(spec);
        self
    }

    pub fn queue(mut self, spec: QueueSpec) -> Self {
        self.queues.push(spec);
        self
    }

    pub fn bind(mut self, spec: BindingSpec) -> Self {
        self.bindings.push(spec);
        self
    }

    pub async fn declare<C: BrokerChannel + ?Sized>(
        &self,
        channel: &C,
    ) -> Result<(), TransportError> {
        for exchange in &self.exchanges {
            channel
                .declare_exchange(&exchange.name, exchange.kind, exchange.durable)
                .await?;
            info!(exchange = %exchange.name, kind = %exchange.kind, "Exchange declared");
        }
        for queue in &self.queues {
            channel.declare_queue(queue).await?;
            info!(queue = %queue.name, durable = queue.durable, "Queue declared");
        }
        for binding in &self.bindings {
            channel
                .bind_queue(&binding.queue, &binding.exchange, &binding.pattern)
                .await?;
            info!(
                queue = %binding.queue,
                exchange = %binding.exchange,
                routing_key = %binding.pattern,
                "Queue bound"
            );
        }
        Ok(())
    }
}
