//! In-memory broker
//!
//! `MemoryBroker` is a complete, process-local implementation of the
//! connection abstraction. Tests and the demo binary run against it; it
//! follows the AMQP 0-9-1 behavior the client depends on:
//! - the default exchange routes to the queue named by the routing key;
//!   direct, topic and fanout exchanges route through their bindings
//! - publishing to an exchange that does not exist is rejected, while a
//!   message no binding accepts is dropped
//! - each channel's prefetch caps its unacknowledged deliveries and the
//!   consumers of a queue are served round-robin
//! - requeued messages go back to the head of their queue flagged as
//!   redelivered, and so do the unacked messages of a channel that closes
//!
//! Concurrency and usage notes:
//! - All state sits behind one lock, so every channel operation is
//!   serialized. No lock is held across an `.await`.
//! - `MemoryBroker` is a cheap handle; clones share the same broker.
//! - The delivery log keeps the most recent `DELIVERY_LOG_CAPACITY` records;
//!   `delivered_count` keeps counting past that.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::delivery::{Delivery, DeliveryAttempt, DeliveryTag};
use crate::message::{MessageEnvelope, MessageProperties};
use crate::routing::TopicPattern;
use crate::transport::connection::{BrokerChannel, ConnectionParams, Connector, DeliveryStream};
use crate::transport::topology::{DEFAULT_EXCHANGE, ExchangeKind, QueueSpec};
use crate::utils::error::{ConnectionError, PublishError, TransportError};

type ChannelId = u64;

/// Records kept by `delivery_log`; older ones are dropped first.
pub const DELIVERY_LOG_CAPACITY: usize = 10_000;

/// One delivery handed out by the broker, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub envelope_id: String,
    pub queue: String,
    pub delivery_tag: DeliveryTag,
    pub redelivered: bool,
}

#[derive(Debug, Default)]
struct DeliveryLog {
    records: VecDeque<DeliveryRecord>,
    total: u64,
}

impl DeliveryLog {
    fn push(&mut self, record: DeliveryRecord) {
        if self.records.len() == DELIVERY_LOG_CAPACITY {
            self.records.pop_front();
        }
        self.records.push_back(record);
        self.total += 1;
    }
}

#[derive(Debug, Clone)]
struct QueuedMessage {
    envelope: MessageEnvelope,
    redelivered: bool,
}

#[derive(Debug)]
struct ConsumerSlot {
    channel: ChannelId,
    sender: mpsc::UnboundedSender<Delivery>,
}

#[derive(Debug)]
struct Queue {
    spec: QueueSpec,
    owner: Option<ChannelId>,
    ready: VecDeque<QueuedMessage>,
    consumers: VecDeque<ConsumerSlot>,
    had_consumers: bool,
}

impl Queue {
    fn new(spec: QueueSpec, owner: Option<ChannelId>) -> Self {
        Self {
            spec,
            owner,
            ready: VecDeque::new(),
            consumers: VecDeque::new(),
            had_consumers: false,
        }
    }

    fn requeue(&mut self, message: QueuedMessage) {
        self.ready.push_front(QueuedMessage {
            redelivered: true,
            ..message
        });
    }

    fn is_abandoned(&self) -> bool {
        self.spec.auto_delete && self.had_consumers && self.consumers.is_empty()
    }
}

#[derive(Debug)]
struct Binding {
    queue: String,
    key: String,
    pattern: Option<TopicPattern>,
}

#[derive(Debug)]
struct Exchange {
    kind: ExchangeKind,
    durable: bool,
    bindings: Vec<Binding>,
}

impl Exchange {
    fn accepts(&self, binding: &Binding, routing_key: &str) -> bool {
        match self.kind {
            ExchangeKind::Direct => binding.key == routing_key,
            ExchangeKind::Topic => binding
                .pattern
                .as_ref()
                .is_some_and(|p| p.matches(routing_key)),
            ExchangeKind::Fanout => true,
            // Envelopes carry no headers, so nothing can match.
            ExchangeKind::Headers => false,
        }
    }
}

#[derive(Debug)]
struct Unacked {
    channel: ChannelId,
    queue: String,
    message: QueuedMessage,
}

#[derive(Debug, Default)]
struct ChannelState {
    prefetch: u16,
    outstanding: usize,
}

impl ChannelState {
    fn has_capacity(&self) -> bool {
        self.prefetch == 0 || self.outstanding < usize::from(self.prefetch)
    }
}

enum Settlement {
    Ack,
    Requeue,
    Drop,
}

#[derive(Debug)]
struct BrokerState {
    available: bool,
    users: HashMap<String, String>,
    vhosts: HashSet<String>,
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
    channels: HashMap<ChannelId, ChannelState>,
    unacked: HashMap<DeliveryTag, Unacked>,
    next_tag: u64,
    next_channel: ChannelId,
    log: DeliveryLog,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self {
            available: true,
            users: HashMap::from([("guest".to_string(), "guest".to_string())]),
            vhosts: HashSet::from(["/".to_string()]),
            exchanges: HashMap::new(),
            queues: HashMap::new(),
            channels: HashMap::new(),
            unacked: HashMap::new(),
            next_tag: 0,
            next_channel: 0,
            log: DeliveryLog::default(),
        }
    }
}

impl BrokerState {
    fn ensure_open(&self, channel: ChannelId) -> Result<(), TransportError> {
        if !self.available {
            return Err(TransportError::Unreachable(
                "broker is not available".to_string(),
            ));
        }
        if !self.channels.contains_key(&channel) {
            return Err(TransportError::ChannelClosed);
        }
        Ok(())
    }

    fn open_channel(&mut self) -> ChannelId {
        self.next_channel += 1;
        self.channels
            .insert(self.next_channel, ChannelState::default());
        self.next_channel
    }

    fn declare_queue(
        &mut self,
        channel: ChannelId,
        spec: &QueueSpec,
    ) -> Result<(), TransportError> {
        if spec.name.is_empty() {
            return Err(TransportError::PreconditionFailed(
                "queue name must not be empty".to_string(),
            ));
        }
        match self.queues.get(&spec.name) {
            Some(existing) => {
                if existing.spec.durable != spec.durable
                    || existing.spec.auto_delete != spec.auto_delete
                    || existing.spec.exclusive != spec.exclusive
                {
                    return Err(TransportError::PreconditionFailed(format!(
                        "queue '{}' already declared with different properties",
                        spec.name
                    )));
                }
                if existing.owner.is_some_and(|owner| owner != channel) {
                    return Err(TransportError::PreconditionFailed(format!(
                        "queue '{}' is exclusive to another channel",
                        spec.name
                    )));
                }
            }
            None => {
                let owner = spec.exclusive.then_some(channel);
                self.queues
                    .insert(spec.name.clone(), Queue::new(spec.clone(), owner));
            }
        }
        Ok(())
    }

    fn declare_exchange(
        &mut self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), TransportError> {
        if name == DEFAULT_EXCHANGE {
            return Err(TransportError::PreconditionFailed(
                "the default exchange cannot be declared".to_string(),
            ));
        }
        match self.exchanges.get(name) {
            Some(existing) if existing.kind != kind || existing.durable != durable => {
                Err(TransportError::PreconditionFailed(format!(
                    "exchange '{name}' already declared as {} (durable: {})",
                    existing.kind, existing.durable
                )))
            }
            Some(_) => Ok(()),
            None => {
                self.exchanges.insert(
                    name.to_string(),
                    Exchange {
                        kind,
                        durable,
                        bindings: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    fn bind(&mut self, queue: &str, exchange: &str, key: &str) -> Result<(), TransportError> {
        if exchange == DEFAULT_EXCHANGE {
            return Err(TransportError::PreconditionFailed(
                "queues cannot be bound to the default exchange".to_string(),
            ));
        }
        if !self.queues.contains_key(queue) {
            return Err(TransportError::NotFound {
                kind: "queue",
                name: queue.to_string(),
            });
        }
        let target = self
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| TransportError::NotFound {
                kind: "exchange",
                name: exchange.to_string(),
            })?;
        if target
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.key == key)
        {
            return Ok(());
        }
        let pattern = match target.kind {
            ExchangeKind::Topic => Some(TopicPattern::parse(key)?),
            _ => None,
        };
        target.bindings.push(Binding {
            queue: queue.to_string(),
            key: key.to_string(),
            pattern,
        });
        Ok(())
    }

    fn route(&self, exchange: &str, routing_key: &str) -> Result<Vec<String>, PublishError> {
        if exchange == DEFAULT_EXCHANGE {
            return Ok(self
                .queues
                .contains_key(routing_key)
                .then(|| vec![routing_key.to_string()])
                .unwrap_or_default());
        }
        let target = self
            .exchanges
            .get(exchange)
            .ok_or_else(|| PublishError::Rejected(format!("no exchange '{exchange}'")))?;
        let mut queues: Vec<String> = Vec::new();
        for binding in &target.bindings {
            if target.accepts(binding, routing_key) && !queues.contains(&binding.queue) {
                queues.push(binding.queue.clone());
            }
        }
        Ok(queues)
    }

    fn enqueue(&mut self, queues: &[String], envelope: &MessageEnvelope) {
        for name in queues {
            if let Some(queue) = self.queues.get_mut(name) {
                queue.ready.push_back(QueuedMessage {
                    envelope: envelope.clone(),
                    redelivered: false,
                });
            }
        }
    }

    /// Hands ready messages to consumers that still have prefetch room.
    fn dispatch(&mut self) {
        let BrokerState {
            queues,
            channels,
            unacked,
            next_tag,
            log,
            ..
        } = self;

        for (name, queue) in queues.iter_mut() {
            queue.consumers.retain(|slot| !slot.sender.is_closed());

            while let Some(message) = queue.ready.pop_front() {
                let position = queue.consumers.iter().position(|slot| {
                    channels
                        .get(&slot.channel)
                        .is_some_and(ChannelState::has_capacity)
                });
                let Some(slot) = position.and_then(|p| queue.consumers.remove(p)) else {
                    queue.ready.push_front(message);
                    break;
                };

                *next_tag += 1;
                let tag = DeliveryTag(*next_tag);
                let delivery = Delivery {
                    envelope: message.envelope.clone(),
                    attempt: DeliveryAttempt::new(message.envelope.id(), tag, message.redelivered),
                };
                if slot.sender.send(delivery).is_err() {
                    // receiver went away; drop the slot and try the next one
                    queue.ready.push_front(message);
                    continue;
                }

                log.push(DeliveryRecord {
                    envelope_id: message.envelope.id().to_string(),
                    queue: name.clone(),
                    delivery_tag: tag,
                    redelivered: message.redelivered,
                });
                if let Some(state) = channels.get_mut(&slot.channel) {
                    state.outstanding += 1;
                }
                unacked.insert(
                    tag,
                    Unacked {
                        channel: slot.channel,
                        queue: name.clone(),
                        message,
                    },
                );
                queue.consumers.push_back(slot);
            }
        }
    }

    fn settle(
        &mut self,
        channel: ChannelId,
        tag: DeliveryTag,
        settlement: Settlement,
    ) -> Result<(), TransportError> {
        match self.unacked.get(&tag) {
            Some(entry) if entry.channel == channel => {}
            _ => return Err(TransportError::UnknownDeliveryTag(tag)),
        }
        let entry = self
            .unacked
            .remove(&tag)
            .ok_or(TransportError::UnknownDeliveryTag(tag))?;
        if let Some(state) = self.channels.get_mut(&channel) {
            state.outstanding = state.outstanding.saturating_sub(1);
        }
        match settlement {
            Settlement::Ack => {}
            Settlement::Requeue => {
                if let Some(queue) = self.queues.get_mut(&entry.queue) {
                    queue.requeue(entry.message);
                }
            }
            Settlement::Drop => {
                debug!(message_id = %entry.message.envelope.id(), "Message dropped by nack");
            }
        }
        self.dispatch();
        Ok(())
    }

    /// Returns unacked messages of `channel` (or of every channel) to the
    /// head of their queues, oldest first.
    fn requeue_unacked(&mut self, channel: Option<ChannelId>) {
        let mut tags: Vec<DeliveryTag> = self
            .unacked
            .iter()
            .filter(|(_, entry)| channel.is_none_or(|id| entry.channel == id))
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort();
        for tag in tags.into_iter().rev() {
            if let Some(entry) = self.unacked.remove(&tag) {
                if let Some(queue) = self.queues.get_mut(&entry.queue) {
                    queue.requeue(entry.message);
                }
            }
        }
    }

    fn prune_bindings(&mut self) {
        let queues = &self.queues;
        for exchange in self.exchanges.values_mut() {
            exchange.bindings.retain(|b| queues.contains_key(&b.queue));
        }
    }

    fn close_channel(&mut self, id: ChannelId) {
        if self.channels.remove(&id).is_none() {
            return;
        }
        self.requeue_unacked(Some(id));
        for queue in self.queues.values_mut() {
            queue.consumers.retain(|slot| slot.channel != id);
        }
        self.queues
            .retain(|_, queue| queue.owner != Some(id) && !queue.is_abandoned());
        self.prune_bindings();
        self.dispatch();
    }

    fn restart(&mut self) {
        self.channels.clear();
        for queue in self.queues.values_mut() {
            queue.consumers.clear();
        }
        self.requeue_unacked(None);
        self.queues
            .retain(|_, queue| queue.spec.durable && !queue.spec.exclusive);
        for queue in self.queues.values_mut() {
            queue.ready.retain(|m| m.envelope.is_persistent());
            queue.had_consumers = false;
        }
        self.exchanges.retain(|_, exchange| exchange.durable);
        self.prune_bindings();
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    /// A running broker with user `guest`/`guest` and vhost `/`.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_user(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.lock().users.insert(username.into(), password.into());
        self
    }

    pub fn with_vhost(self, vhost: impl Into<String>) -> Self {
        self.lock().vhosts.insert(vhost.into());
        self
    }

    /// Simulates the broker going down or coming back. While unavailable,
    /// connects and channel operations fail as unreachable.
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Simulates a broker restart: every channel is dropped, non-durable
    /// queues and exchanges disappear and durable queues keep only their
    /// persistent messages.
    pub fn restart(&self) {
        self.lock().restart();
        info!("In-memory broker restarted");
    }

    /// Messages waiting in `queue`, not counting unacknowledged ones.
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.lock().queues.get(queue).map(|q| q.ready.len())
    }

    pub fn unacked_count(&self) -> usize {
        self.lock().unacked.len()
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        self.lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.consumers.len())
    }

    pub fn has_queue(&self, queue: &str) -> bool {
        self.lock().queues.contains_key(queue)
    }

    pub fn has_exchange(&self, exchange: &str) -> bool {
        self.lock().exchanges.contains_key(exchange)
    }

    /// The most recent deliveries, oldest first.
    pub fn delivery_log(&self) -> Vec<DeliveryRecord> {
        self.lock().log.records.iter().cloned().collect()
    }

    /// Deliveries handed out since the broker was created, redeliveries
    /// included.
    pub fn delivered_count(&self) -> u64 {
        self.lock().log.total
    }

    /// Deliveries of one envelope, in order.
    pub fn deliveries_of(&self, envelope_id: &str) -> Vec<DeliveryRecord> {
        self.lock()
            .log
            .records
            .iter()
            .filter(|r| r.envelope_id == envelope_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    type Channel = MemoryChannel;

    async fn connect(&self, params: &ConnectionParams) -> Result<MemoryChannel, ConnectionError> {
        let mut state = self.lock();
        if !state.available {
            return Err(ConnectionError::Unreachable {
                host: params.host.clone(),
                port: params.port,
                reason: "broker is not available".to_string(),
            });
        }
        let username = &params.credentials.username;
        if state.users.get(username) != Some(&params.credentials.password) {
            return Err(ConnectionError::AuthenticationFailed {
                username: username.clone(),
            });
        }
        if !state.vhosts.contains(&params.vhost) {
            return Err(ConnectionError::VhostNotFound(params.vhost.clone()));
        }
        let id = state.open_channel();
        debug!(channel = id, vhost = %params.vhost, "In-memory channel opened");
        Ok(MemoryChannel {
            id,
            broker: self.clone(),
        })
    }
}

/// A channel on a `MemoryBroker`. Dropping it closes it.
#[derive(Debug)]
pub struct MemoryChannel {
    id: ChannelId,
    broker: MemoryBroker,
}

impl MemoryChannel {
    fn with_open<R>(
        &self,
        op: impl FnOnce(&mut BrokerState) -> Result<R, TransportError>,
    ) -> Result<R, TransportError> {
        let mut state = self.broker.lock();
        state.ensure_open(self.id)?;
        op(&mut state)
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), TransportError> {
        let id = self.id;
        self.with_open(|state| state.declare_queue(id, spec))
    }

    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), TransportError> {
        self.with_open(|state| state.declare_exchange(name, kind, durable))
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key_pattern: &str,
    ) -> Result<(), TransportError> {
        self.with_open(|state| state.bind(queue, exchange, routing_key_pattern))
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), TransportError> {
        let id = self.id;
        self.with_open(|state| {
            if let Some(channel) = state.channels.get_mut(&id) {
                channel.prefetch = count;
            }
            state.dispatch();
            Ok(())
        })
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
        properties: &MessageProperties,
    ) -> Result<(), PublishError> {
        let mut state = self.broker.lock();
        state.ensure_open(self.id).map_err(|err| match err {
            TransportError::ChannelClosed => {
                PublishError::Unreachable("channel is closed".to_string())
            }
            other => PublishError::Unreachable(other.to_string()),
        })?;
        let queues = state.route(exchange, routing_key)?;
        if queues.is_empty() {
            warn!(
                exchange,
                routing_key,
                message_id = %properties.message_id,
                "Message unroutable, dropped"
            );
            return Ok(());
        }
        let envelope = MessageEnvelope::from_wire(routing_key, payload, properties);
        state.enqueue(&queues, &envelope);
        state.dispatch();
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, TransportError> {
        let id = self.id;
        let receiver = self.with_open(|state| {
            let target = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| TransportError::NotFound {
                    kind: "queue",
                    name: queue.to_string(),
                })?;
            let (sender, receiver) = mpsc::unbounded_channel();
            target.consumers.push_back(ConsumerSlot {
                channel: id,
                sender,
            });
            target.had_consumers = true;
            state.dispatch();
            Ok(receiver)
        })?;

        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            receiver
                .recv()
                .await
                .map(|delivery| (Ok(delivery), receiver))
        });
        Ok(stream.boxed())
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), TransportError> {
        let id = self.id;
        self.with_open(|state| state.settle(id, tag, Settlement::Ack))
    }

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), TransportError> {
        let id = self.id;
        let settlement = if requeue {
            Settlement::Requeue
        } else {
            Settlement::Drop
        };
        self.with_open(|state| state.settle(id, tag, settlement))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.broker.lock().close_channel(self.id);
        Ok(())
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.broker.lock().close_channel(self.id);
    }
}
