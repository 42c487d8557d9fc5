//! Message envelopes
//!
//! `MessageEnvelope` is the unit handed from a publisher to the broker and
//! from the broker to a consumer. It is immutable once built: every field is
//! private and exposed through accessors, and publishing takes the envelope
//! by value so only one owner holds it at a time.
//!
//! Notes on fields:
//! - `id`: unique per logical message; generated as a UUID when the caller
//!   does not supply one
//! - `payload`: opaque bytes, the application picks the encoding (JSON in the
//!   bundled helpers)
//! - `routing_key`: dot-delimited segments used for exchange routing
//! - `persistent`: a durability request to the broker, not a guarantee
//! - `created_at`: second precision, so it survives the wire timestamp intact

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::message::properties::{MessageProperties, delivery_mode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    id: String,
    payload: Bytes,
    routing_key: String,
    persistent: bool,
    created_at: DateTime<Utc>,
}

impl MessageEnvelope {
    /// Creates a persistent envelope with a fresh id, stamped now.
    pub fn new(routing_key: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            payload: payload.into(),
            routing_key: routing_key.into(),
            persistent: true,
            created_at: now_seconds(),
        }
    }

    /// Encodes `value` as JSON and wraps it in a new envelope.
    pub fn json<T: Serialize>(
        routing_key: impl Into<String>,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(routing_key, body))
    }

    /// Rebuilds an envelope from what the broker delivered.
    ///
    /// A missing or out-of-range timestamp falls back to the receive time.
    pub fn from_wire(
        routing_key: impl Into<String>,
        payload: impl Into<Bytes>,
        properties: &MessageProperties,
    ) -> Self {
        let created_at = Utc
            .timestamp_opt(properties.timestamp, 0)
            .single()
            .unwrap_or_else(now_seconds);
        Self {
            id: properties.message_id.clone(),
            payload: payload.into(),
            routing_key: routing_key.into(),
            persistent: properties.is_persistent(),
            created_at,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Marks the envelope transient (delivery mode 1).
    pub fn transient(mut self) -> Self {
        self.persistent = false;
        self
    }

    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn properties(&self) -> MessageProperties {
        MessageProperties {
            message_id: self.id.clone(),
            timestamp: self.created_at.timestamp(),
            delivery_mode: delivery_mode(self.persistent),
        }
    }
}

fn now_seconds() -> DateTime<Utc> {
    let now = Utc::now();
    Utc.timestamp_opt(now.timestamp(), 0).single().unwrap_or(now)
}
