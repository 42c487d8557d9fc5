//! The `message` module defines what travels through the broker: the
//! immutable `MessageEnvelope` and the basic properties it maps to on the
//! wire.

pub mod envelope;
pub mod properties;

pub use envelope::MessageEnvelope;
pub use properties::{DELIVERY_MODE_PERSISTENT, DELIVERY_MODE_TRANSIENT, MessageProperties};

#[cfg(test)]
mod tests;
