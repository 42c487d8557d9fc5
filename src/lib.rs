//! # Courier
//!
//! `courier` is a reliable message-delivery client for AMQP-style brokers.
//! Messages are published with durable routing, consumed with explicit
//! acknowledgment, retried once on failure and routed by topic pattern.
//!
//! ## Core Modules
//!
//! The library is structured into several modules, each with a distinct responsibility:
//!
//! - `routing`: Topic patterns (`*`, `#`) and the `RoutingKeyMatcher`.
//! - `message`: The `MessageEnvelope` and its wire properties.
//! - `delivery`: Delivery attempts, acknowledgment outcomes and the `DeliveryTracker`.
//! - `transport`: The broker connection abstraction, topology declarations, an in-memory
//!   broker and (with the `amqp` feature) a RabbitMQ adapter.
//! - `publisher`: Hands envelopes to the broker.
//! - `consumer`: The consume loop and its acknowledgment/retry policy.
//! - `config`: Handles loading and managing client configuration.
//! - `samples`: Sample traffic and a simulated task handler for the binary.
//! - `utils`: Contains shared utilities, such as error handling and logging.

pub mod config;
pub mod consumer;
pub mod delivery;
pub mod message;
pub mod publisher;
pub mod routing;
pub mod samples;
pub mod transport;
pub mod utils;
