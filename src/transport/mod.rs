//! The `transport` module is the boundary to the message broker.
//!
//! It defines the connection abstraction the publisher and consumer are
//! written against, the topology (exchanges, queues, bindings) they declare,
//! and two implementations: an in-memory broker, and an AMQP adapter behind
//! the `amqp` feature.

pub mod connection;
pub mod memory;
pub mod topology;

#[cfg(feature = "amqp")]
pub mod amqp;

pub use connection::{BrokerChannel, ConnectionParams, Connector, Credentials, DeliveryStream};
pub use memory::{DELIVERY_LOG_CAPACITY, DeliveryRecord, MemoryBroker, MemoryChannel};
pub use topology::{
    BindingSpec, DEFAULT_EXCHANGE, DEFAULT_MAX_PRIORITY, ExchangeKind, ExchangeSpec, QueueSpec,
    Topology,
};

#[cfg(test)]
mod tests;
