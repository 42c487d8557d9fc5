//! The `consumer` module receives deliveries from a queue, runs them through
//! a `MessageHandler` and settles each one exactly once.
//!
//! The acknowledgment policy lives in [`decide`]: success acks, a decode
//! failure or unroutable key discards, a processing failure requeues on the
//! first delivery and discards on a redelivery.

pub mod engine;
pub mod handler;

pub use engine::{
    Consumer, ConsumerHandle, ConsumerOptions, ConsumerStats, DEFAULT_PREFETCH, HandlerResult,
    decide,
};
pub use handler::{JsonHandler, MessageHandler, RawHandler, json_handler, raw_handler};
