//! Handler contract
//!
//! A `MessageHandler` turns payload bytes into its message type and
//! processes it. It reports success or failure only; acknowledgment is
//! decided by the consumer from that result and the redelivery flag.
//!
//! Handlers may run concurrently (up to the consumer's prefetch), so any
//! state they share has to be safe to use from several tasks at once.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::utils::error::{DecodeError, ProcessingError};

#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    type Payload: Send + 'static;

    /// A decode error marks the message as poison; it is discarded, never
    /// requeued.
    fn decode(&self, payload: &Bytes) -> Result<Self::Payload, DecodeError>;

    async fn process(&self, payload: Self::Payload) -> Result<(), ProcessingError>;
}

#[async_trait]
impl<H: MessageHandler> MessageHandler for Arc<H> {
    type Payload = H::Payload;

    fn decode(&self, payload: &Bytes) -> Result<Self::Payload, DecodeError> {
        (**self).decode(payload)
    }

    async fn process(&self, payload: Self::Payload) -> Result<(), ProcessingError> {
        (**self).process(payload).await
    }
}

/// Decodes JSON into `T` and hands it to an async function.
pub struct JsonHandler<T, F> {
    process: F,
    _payload: PhantomData<fn() -> T>,
}

pub fn json_handler<T, F, Fut>(process: F) -> JsonHandler<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ProcessingError>> + Send + 'static,
{
    JsonHandler {
        process,
        _payload: PhantomData,
    }
}

#[async_trait]
impl<T, F, Fut> MessageHandler for JsonHandler<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ProcessingError>> + Send + 'static,
{
    type Payload = T;

    fn decode(&self, payload: &Bytes) -> Result<T, DecodeError> {
        Ok(serde_json::from_slice(payload)?)
    }

    async fn process(&self, payload: T) -> Result<(), ProcessingError> {
        (self.process)(payload).await
    }
}

/// Passes the raw bytes through; decoding never fails.
pub struct RawHandler<F> {
    process: F,
}

pub fn raw_handler<F, Fut>(process: F) -> RawHandler<F>
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ProcessingError>> + Send + 'static,
{
    RawHandler { process }
}

#[async_trait]
impl<F, Fut> MessageHandler for RawHandler<F>
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ProcessingError>> + Send + 'static,
{
    type Payload = Bytes;

    fn decode(&self, payload: &Bytes) -> Result<Bytes, DecodeError> {
        Ok(payload.clone())
    }

    async fn process(&self, payload: Bytes) -> Result<(), ProcessingError> {
        (self.process)(payload).await
    }
}
