use std::fmt;

use chrono::{DateTime, Utc};

use crate::message::MessageEnvelope;

/// Broker-assigned identifier of one delivery. Acks and nacks must quote
/// the exact tag the envelope arrived with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeliveryTag(pub u64);

impl DeliveryTag {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One instance of the broker handing an envelope to a consumer.
///
/// `redelivered` is set by the transport on the second and later deliveries
/// of the same message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAttempt {
    pub envelope_id: String,
    pub delivery_tag: DeliveryTag,
    pub redelivered: bool,
    pub received_at: DateTime<Utc>,
}

impl DeliveryAttempt {
    pub fn new(
        envelope_id: impl Into<String>,
        delivery_tag: DeliveryTag,
        redelivered: bool,
    ) -> Self {
        Self {
            envelope_id: envelope_id.into(),
            delivery_tag,
            redelivered,
            received_at: Utc::now(),
        }
    }
}

/// An envelope together with the attempt that carried it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: MessageEnvelope,
    pub attempt: DeliveryAttempt,
}

impl Delivery {
    pub fn tag(&self) -> DeliveryTag {
        self.attempt.delivery_tag
    }
}

/// Terminal acknowledgment decision for a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckOutcome {
    Ack,
    NackRequeue,
    NackDiscard,
}

impl AckOutcome {
    /// The state a delivery ends in once this outcome is applied.
    pub fn terminal_state(self) -> DeliveryState {
        match self {
            AckOutcome::Ack => DeliveryState::Acked,
            AckOutcome::NackRequeue => DeliveryState::Requeued,
            AckOutcome::NackDiscard => DeliveryState::Discarded,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AckOutcome::Ack => "ack",
            AckOutcome::NackRequeue => "nack_requeue",
            AckOutcome::NackDiscard => "nack_discard",
        }
    }
}

impl fmt::Display for AckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of an in-flight delivery:
/// `Received -> Processing -> {Acked, Requeued, Discarded}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryState {
    Received,
    Processing,
    Acked,
    Requeued,
    Discarded,
}

impl DeliveryState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeliveryState::Acked | DeliveryState::Requeued | DeliveryState::Discarded
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryState::Received => "received",
            DeliveryState::Processing => "processing",
            DeliveryState::Acked => "acked",
            DeliveryState::Requeued => "requeued",
            DeliveryState::Discarded => "discarded",
        }
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
