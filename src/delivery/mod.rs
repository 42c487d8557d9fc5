//! The `delivery` module models what happens to an envelope once the broker
//! hands it to a consumer: the `DeliveryAttempt` that carried it, the
//! `AckOutcome` that closes it out, and the `DeliveryTracker` holding the
//! per-attempt state in between.

pub mod attempt;
pub mod tracker;

pub use attempt::{AckOutcome, Delivery, DeliveryAttempt, DeliveryState, DeliveryTag};
pub use tracker::{DeliveryTracker, TrackedDelivery};

#[cfg(test)]
mod tests;
