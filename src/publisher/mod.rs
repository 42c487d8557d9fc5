//! The `publisher` module hands envelopes to the broker.
//!
//! `Publisher` is bound to one exchange (the empty name selects the default
//! exchange, which routes straight to the queue named by the routing key).
//! Each call either hands the envelope over or returns the broker's
//! `PublishError`; the publisher never retries or drops silently, retry
//! policy belongs to the caller.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::message::MessageEnvelope;
use crate::transport::BrokerChannel;
use crate::utils::error::PublishError;

pub struct Publisher<C: BrokerChannel> {
    channel: Arc<C>,
    exchange: String,
}

impl<C: BrokerChannel> Publisher<C> {
    pub fn new(channel: Arc<C>, exchange: impl Into<String>) -> Self {
        Self {
            channel,
            exchange: exchange.into(),
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Publishes one envelope. `persistent` on the envelope is passed to the
    /// broker as a durability request.
    pub async fn publish(&self, envelope: MessageEnvelope) -> Result<(), PublishError> {
        if envelope.routing_key().is_empty() {
            return Err(PublishError::Rejected(
                "routing key must not be empty".to_string(),
            ));
        }

        let properties = envelope.properties();
        let size = envelope.payload().len();
        match self
            .channel
            .publish(
                &self.exchange,
                envelope.routing_key(),
                envelope.payload().clone(),
                &properties,
            )
            .await
        {
            Ok(()) => {
                info!(
                    exchange = %self.exchange,
                    routing_key = %envelope.routing_key(),
                    message_id = %properties.message_id,
                    size,
                    persistent = envelope.is_persistent(),
                    "Message sent"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    routing_key = %envelope.routing_key(),
                    message_id = %properties.message_id,
                    "Failed to send message: {e}"
                );
                Err(e)
            }
        }
    }

    /// Publishes envelopes in order, sleeping `pause` between them. Stops at
    /// the first failure; earlier envelopes stay published.
    pub async fn publish_all<I>(&self, envelopes: I, pause: Duration) -> Result<usize, PublishError>
    where
        I: IntoIterator<Item = MessageEnvelope>,
    {
        let mut sent = 0;
        for envelope in envelopes {
            if sent > 0 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            self.publish(envelope).await?;
            sent += 1;
        }
        Ok(sent)
    }
}

impl<C: BrokerChannel> Clone for Publisher<C> {
    fn clone(&self) -> Self {
        Self {
            channel: Arc::clone(&self.channel),
            exchange: self.exchange.clone(),
        }
    }
}
