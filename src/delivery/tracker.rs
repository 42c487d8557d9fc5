//! Delivery tracking
//!
//! `DeliveryTracker` keeps one record per in-flight delivery tag, created when
//! the consumer receives an attempt and dropped when the attempt is resolved.
//! It enforces the state machine: an attempt is received once, enters
//! processing once and is resolved exactly once. Resolving a tag that is not
//! in flight (never seen, or already resolved) is an error, which is what
//! stops a delivery from being acked twice.
//!
//! Concurrency note: the tracker is owned by the consume loop and is not
//! shared with handler tasks.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::delivery::attempt::{AckOutcome, DeliveryAttempt, DeliveryState, DeliveryTag};
use crate::utils::error::TrackerError;

#[derive(Debug, Clone)]
pub struct TrackedDelivery {
    pub envelope_id: String,
    pub redelivered: bool,
    pub received_at: DateTime<Utc>,
    pub state: DeliveryState,
}

#[derive(Debug, Default)]
pub struct DeliveryTracker {
    in_flight: HashMap<DeliveryTag, TrackedDelivery>,
}

impl DeliveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new attempt in the `Received` state.
    pub fn receive(&mut self, attempt: &DeliveryAttempt) -> Result<(), TrackerError> {
        if self.in_flight.contains_key(&attempt.delivery_tag) {
            return Err(TrackerError::DuplicateTag(attempt.delivery_tag));
        }
        self.in_flight.insert(
            attempt.delivery_tag,
            TrackedDelivery {
                envelope_id: attempt.envelope_id.clone(),
                redelivered: attempt.redelivered,
                received_at: attempt.received_at,
                state: DeliveryState::Received,
            },
        );
        Ok(())
    }

    pub fn begin_processing(&mut self, tag: DeliveryTag) -> Result<(), TrackerError> {
        let tracked = self
            .in_flight
            .get_mut(&tag)
            .ok_or(TrackerError::UnknownTag(tag))?;
        if tracked.state != DeliveryState::Received {
            return Err(TrackerError::InvalidTransition {
                tag,
                from: tracked.state.as_str(),
                to: DeliveryState::Processing.as_str(),
            });
        }
        tracked.state = DeliveryState::Processing;
        Ok(())
    }

    /// Closes out an attempt. The record is removed and returned with its
    /// terminal state.
    pub fn resolve(
        &mut self,
        tag: DeliveryTag,
        outcome: AckOutcome,
    ) -> Result<TrackedDelivery, TrackerError> {
        let terminal = outcome.terminal_state();
        match self.in_flight.get(&tag) {
            None => return Err(TrackerError::UnknownTag(tag)),
            Some(tracked) if tracked.state != DeliveryState::Processing => {
                return Err(TrackerError::InvalidTransition {
                    tag,
                    from: tracked.state.as_str(),
                    to: terminal.as_str(),
                });
            }
            Some(_) => {}
        }
        let mut tracked = self
            .in_flight
            .remove(&tag)
            .ok_or(TrackerError::UnknownTag(tag))?;
        tracked.state = terminal;
        Ok(tracked)
    }

    pub fn is_redelivered(&self, tag: DeliveryTag) -> Result<bool, TrackerError> {
        self.in_flight
            .get(&tag)
            .map(|t| t.redelivered)
            .ok_or(TrackerError::UnknownTag(tag))
    }

    pub fn get(&self, tag: DeliveryTag) -> Option<&TrackedDelivery> {
        self.in_flight.get(&tag)
    }

    pub fn state(&self, tag: DeliveryTag) -> Option<DeliveryState> {
        self.in_flight.get(&tag).map(|t| t.state)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}
