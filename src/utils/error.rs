//! The `error` module defines the error taxonomy used across `courier`.
//!
//! Every failure path ends either in one of these errors being returned to
//! the caller or in a terminal acknowledgment outcome decided by the
//! consumer. Nothing is swallowed.

use thiserror::Error;

use crate::delivery::DeliveryTag;

/// Failure to open a connection to the broker. Fatal to startup.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("broker at {host}:{port} is unreachable: {reason}")]
    Unreachable {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("authentication failed for user '{username}'")]
    AuthenticationFailed { username: String },

    #[error("virtual host '{0}' does not exist")]
    VhostNotFound(String),
}

/// Failure to hand an envelope to the broker. Surfaced per call, never
/// retried by the publisher.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("broker unreachable: {0}")]
    Unreachable(String),

    #[error("publish rejected: {0}")]
    Rejected(String),
}

/// Channel-level failures reported by a broker connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("channel is closed")]
    ChannelClosed,

    #[error("broker unreachable: {0}")]
    Unreachable(String),

    #[error("unknown delivery tag {0}")]
    UnknownDeliveryTag(DeliveryTag),

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error(transparent)]
    InvalidPattern(#[from] PatternError),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Rejected topic pattern syntax.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("segment '{0}' mixes wildcards with other characters")]
    MixedWildcard(String),
}

/// The payload could not be decoded into the handler's message type.
///
/// Decode failures are poison messages: the consumer discards them without
/// requeueing.
#[derive(Debug, Clone, Error)]
#[error("malformed payload: {reason}")]
pub struct DecodeError {
    reason: String,
}

impl DecodeError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<std::str::Utf8Error> for DecodeError {
    fn from(err: std::str::Utf8Error) -> Self {
        Self::new(err.to_string())
    }
}

/// A failure reported by a message handler.
#[derive(Debug, Clone, Error)]
#[error("{reason}")]
pub struct ProcessingError {
    reason: String,
}

impl ProcessingError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Wraps any error, keeping only its message.
    pub fn from_error<E: std::error::Error>(err: E) -> Self {
        Self::new(err.to_string())
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Bookkeeping violations detected by the delivery tracker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("delivery tag {0} is not in flight")]
    UnknownTag(DeliveryTag),

    #[error("delivery tag {0} is already in flight")]
    DuplicateTag(DeliveryTag),

    #[error("delivery tag {tag} cannot move from {from} to {to}")]
    InvalidTransition {
        tag: DeliveryTag,
        from: &'static str,
        to: &'static str,
    },
}

/// Errors that end a consume loop.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("consumer task failed: {0}")]
    Task(String),
}
