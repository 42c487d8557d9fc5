//! Consumer engine
//!
//! This module drives deliveries through
//! `Received -> Processing -> {Acked, Requeued, Discarded}`:
//! - a delivery is recorded in the tracker and moved to processing at once
//! - a payload the handler cannot decode is poison and discarded
//! - otherwise the handler runs to completion; success acks, failure
//!   requeues the first delivery and discards a redelivered one, so each
//!   envelope is retried at most once
//!
//! Routing is the broker's job. A topic-bound consumer declares its bindings
//! before consuming but processes whatever the queue holds, including
//! messages that arrived through the default exchange or older bindings.
//!
//! Concurrency and usage notes:
//! - Handlers run as tasks, at most `prefetch` at a time. Their results come
//!   back to the consume loop, which is the only place acks and nacks are
//!   issued, so channel operations never overlap.
//! - Shutdown is observed between delivery attempts. Once requested no new
//!   delivery is taken, in-flight attempts are allowed to finish and settle,
//!   and the channel is closed whatever way the loop ended.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures_util::StreamExt;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::consumer::handler::MessageHandler;
use crate::delivery::{AckOutcome, Delivery, DeliveryTag, DeliveryTracker};
use crate::routing::{RoutingKeyMatcher, TopicPattern};
use crate::transport::BrokerChannel;
use crate::utils::error::{ConsumerError, DecodeError, ProcessingError};

/// One unacknowledged delivery at a time.
pub const DEFAULT_PREFETCH: u16 = 1;

#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    pub queue: String,
    pub prefetch: u16,
    /// `(exchange, pattern)` pairs the queue is bound with before consuming.
    pub bindings: Vec<(String, TopicPattern)>,
}

impl ConsumerOptions {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            prefetch: DEFAULT_PREFETCH,
            bindings: Vec::new(),
        }
    }

    /// Values below one are raised to one.
    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    pub fn bind(mut self, exchange: impl Into<String>, pattern: TopicPattern) -> Self {
        self.bindings.push((exchange.into(), pattern));
        self
    }

    pub fn is_topic_bound(&self) -> bool {
        !self.bindings.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    pub acked: u64,
    pub requeued: u64,
    pub discarded: u64,
}

impl ConsumerStats {
    fn record(&mut self, outcome: AckOutcome) {
        match outcome {
            AckOutcome::Ack => self.acked += 1,
            AckOutcome::NackRequeue => self.requeued += 1,
            AckOutcome::NackDiscard => self.discarded += 1,
        }
    }

    pub fn settled(&self) -> u64 {
        self.acked + self.requeued + self.discarded
    }
}

/// What processing one delivery attempt produced.
#[derive(Debug)]
pub enum HandlerResult {
    Succeeded,
    Failed(ProcessingError),
    Undecodable(DecodeError),
}

/// Terminal outcome for one attempt.
pub fn decide(result: &HandlerResult, redelivered: bool) -> AckOutcome {
    match result {
        HandlerResult::Succeeded => AckOutcome::Ack,
        HandlerResult::Undecodable(_) => AckOutcome::NackDiscard,
        HandlerResult::Failed(_) if redelivered => AckOutcome::NackDiscard,
        HandlerResult::Failed(_) => AckOutcome::NackRequeue,
    }
}

struct Completed {
    tag: DeliveryTag,
    message_id: String,
    result: HandlerResult,
    elapsed: Duration,
}

pub struct Consumer<C: BrokerChannel, H: MessageHandler> {
    channel: Arc<C>,
    handler: Arc<H>,
    options: ConsumerOptions,
    matcher: Option<RoutingKeyMatcher>,
    tracker: DeliveryTracker,
    stats: ConsumerStats,
}

impl<C: BrokerChannel, H: MessageHandler> Consumer<C, H> {
    pub fn new(channel: Arc<C>, handler: H, options: ConsumerOptions) -> Self {
        let matcher = options.is_topic_bound().then(|| {
            RoutingKeyMatcher::new(options.bindings.iter().map(|(_, p)| p.clone()).collect())
        });
        Self {
            channel,
            handler: Arc::new(handler),
            options,
            matcher,
            tracker: DeliveryTracker::new(),
            stats: ConsumerStats::default(),
        }
    }

    pub fn options(&self) -> &ConsumerOptions {
        &self.options
    }

    /// Runs the consume loop until `shutdown` is cancelled, the delivery
    /// stream ends or the channel fails. The channel is closed before this
    /// returns.
    pub async fn run(
        mut self,
        shutdown: CancellationToken,
    ) -> Result<ConsumerStats, ConsumerError> {
        let result = self.consume_until(&shutdown).await;

        if let Err(e) = self.channel.close().await {
            warn!(error = %e, "Error closing channel");
        }
        info!(
            queue = %self.options.queue,
            received = self.stats.received,
            acked = self.stats.acked,
            requeued = self.stats.requeued,
            discarded = self.stats.discarded,
            "Consumer stopped"
        );
        result.map(|()| self.stats)
    }

    /// Runs the consumer on its own task.
    pub fn spawn(self) -> ConsumerHandle {
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(self.run(shutdown.clone()));
        ConsumerHandle { shutdown, task }
    }

    async fn consume_until(&mut self, shutdown: &CancellationToken) -> Result<(), ConsumerError> {
        self.channel.set_prefetch(self.options.prefetch).await?;
        for (exchange, pattern) in &self.options.bindings {
            self.channel
                .bind_queue(&self.options.queue, exchange, &pattern.to_string())
                .await?;
            info!(
                queue = %self.options.queue,
                exchange = %exchange,
                routing_key = %pattern,
                "Queue bound"
            );
        }
        let mut deliveries = self.channel.consume(&self.options.queue).await?;
        info!(
            queue = %self.options.queue,
            prefetch = self.options.prefetch,
            "Starting to consume messages"
        );

        let limit = usize::from(self.options.prefetch.max(1));
        let mut in_flight: JoinSet<Completed> = JoinSet::new();
        let outcome = loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!(
                        in_flight = in_flight.len(),
                        "Shutdown requested, no longer accepting deliveries"
                    );
                    break Ok(());
                }

                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = self.complete(joined).await {
                        break Err(e);
                    }
                }

                next = deliveries.next(), if in_flight.len() < limit => match next {
                    Some(Ok(delivery)) => {
                        if let Err(e) = self.accept(delivery, &mut in_flight).await {
                            break Err(e);
                        }
                    }
                    Some(Err(e)) => break Err(e.into()),
                    None => {
                        info!(queue = %self.options.queue, "Delivery stream closed");
                        break Ok(());
                    }
                },
            }
        };

        // Every attempt already handed to a handler still gets its outcome.
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = self.complete(joined).await {
                error!(error = %e, "Failed to settle in-flight delivery");
            }
        }
        outcome
    }

    async fn accept(
        &mut self,
        delivery: Delivery,
        in_flight: &mut JoinSet<Completed>,
    ) -> Result<(), ConsumerError> {
        let Delivery { envelope, attempt } = delivery;
        let tag = attempt.delivery_tag;
        self.tracker.receive(&attempt)?;
        self.stats.received += 1;
        info!(
            queue = %self.options.queue,
            message_id = %envelope.id(),
            delivery_tag = tag.value(),
            redelivered = attempt.redelivered,
            "Message received"
        );
        self.tracker.begin_processing(tag)?;

        let unbound = self
            .matcher
            .as_ref()
            .is_some_and(|m| !m.matches_any(envelope.routing_key()));
        if unbound {
            debug!(
                message_id = %envelope.id(),
                routing_key = %envelope.routing_key(),
                "Routing key matches none of this consumer's bindings"
            );
        }

        let payload = match self.handler.decode(envelope.payload()) {
            Ok(payload) => payload,
            Err(e) => {
                error!(message_id = %envelope.id(), "Failed to parse message: {e}");
                return self
                    .settle(tag, envelope.id(), HandlerResult::Undecodable(e))
                    .await;
            }
        };

        let handler = Arc::clone(&self.handler);
        let message_id = envelope.id().to_string();
        in_flight.spawn(async move {
            let started = Instant::now();
            let result = match AssertUnwindSafe(handler.process(payload))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => HandlerResult::Succeeded,
                Ok(Err(e)) => HandlerResult::Failed(e),
                Err(panic) => HandlerResult::Failed(ProcessingError::new(format!(
                    "handler panicked: {}",
                    panic_message(panic.as_ref())
                ))),
            };
            Completed {
                tag,
                message_id,
                result,
                elapsed: started.elapsed(),
            }
        });
        Ok(())
    }

    async fn complete(
        &mut self,
        joined: Result<Completed, JoinError>,
    ) -> Result<(), ConsumerError> {
        let completed = joined.map_err(|e| ConsumerError::Task(e.to_string()))?;
        match &completed.result {
            HandlerResult::Succeeded => info!(
                message_id = %completed.message_id,
                processing_ms = completed.elapsed.as_millis() as u64,
                "Message processed successfully"
            ),
            HandlerResult::Failed(e) => error!(
                message_id = %completed.message_id,
                "Failed to process message: {e}"
            ),
            HandlerResult::Undecodable(_) => {}
        }
        self.settle(completed.tag, &completed.message_id, completed.result)
            .await
    }

    /// Decides and applies the single outcome of an attempt. The tracker is
    /// resolved first so a tag can never be acked or nacked twice.
    async fn settle(
        &mut self,
        tag: DeliveryTag,
        message_id: &str,
        result: HandlerResult,
    ) -> Result<(), ConsumerError> {
        let redelivered = self.tracker.is_redelivered(tag)?;
        let outcome = decide(&result, redelivered);
        self.tracker.resolve(tag, outcome)?;

        match outcome {
            AckOutcome::Ack => self.channel.ack(tag).await?,
            AckOutcome::NackRequeue => self.channel.nack(tag, true).await?,
            AckOutcome::NackDiscard => self.channel.nack(tag, false).await?,
        }
        self.stats.record(outcome);

        if redelivered && matches!(result, HandlerResult::Failed(_)) {
            warn!(message_id, "Message redelivered, rejecting without requeue");
        }
        info!(message_id, delivery_tag = tag.value(), outcome = %outcome, "Delivery settled");
        Ok(())
    }
}

/// A consumer running on its own task.
pub struct ConsumerHandle {
    shutdown: CancellationToken,
    task: JoinHandle<Result<ConsumerStats, ConsumerError>>,
}

impl ConsumerHandle {
    /// Token that stops the consumer when cancelled, e.g. from a signal
    /// handler.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops taking deliveries, waits for in-flight ones to settle and for
    /// the channel to close, then returns the final stats.
    pub async fn stop(self) -> Result<ConsumerStats, ConsumerError> {
        self.shutdown.cancel();
        self.join().await
    }

    /// Waits for the consumer to end on its own.
    pub async fn join(self) -> Result<ConsumerStats, ConsumerError> {
        self.task
            .await
            .map_err(|e| ConsumerError::Task(e.to_string()))?
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
