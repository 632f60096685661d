//! # In-Memory Broker
//!
//! A process-local broker implementing the [`BrokerClient`] interface.
//! Suitable for tests and single-process deployments; networked deployments
//! plug in a client for a real broker instead.
//!
//! Besides routing, the broker offers two testing aids:
//!
//! - **Fault injection**: [`InMemoryBroker::fail_on`] makes every call of an
//!   [`Operation`] fail with [`BrokerError::Injected`] until cleared.
//! - **Journal**: every attempted operation is recorded in call order, see
//!   [`InMemoryBroker::journal`].

use crate::client::{
    BrokerClient, BrokerConnection, BrokerSession, Delivery, DeliveryStream, ExchangeOptions,
    PublishConfirm, Publishing, QueueHandle, QueueOptions,
};
use crate::error::{BrokerError, Operation, Result};
use crate::routing::ExchangeKind;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Name of the default exchange, which routes by queue name.
pub const DEFAULT_EXCHANGE: &str = "";

/// One recorded broker call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// Operation attempted.
    pub operation: Operation,
    /// Connection the call was made on (0 for `connect` and broker-level publishes).
    pub connection: u64,
    /// Primary argument (URI, exchange, queue or consumer tag).
    pub target: String,
}

type ConsumerKey = (u64, String);

struct ExchangeState {
    kind: ExchangeKind,
    options: ExchangeOptions,
}

struct QueueState {
    options: QueueOptions,
    owner: Option<u64>,
    ready: VecDeque<QueuedMessage>,
    consumers: Vec<ConsumerKey>,
    next_consumer: usize,
}

struct ConsumerState {
    queue: String,
    sender: mpsc::UnboundedSender<Delivery>,
}

#[derive(Clone)]
struct Binding {
    exchange: String,
    queue: String,
    routing_key: String,
}

#[derive(Clone)]
struct QueuedMessage {
    exchange: String,
    routing_key: String,
    publishing: Publishing,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeState>,
    queues: HashMap<String, QueueState>,
    bindings: Vec<Binding>,
    consumers: HashMap<ConsumerKey, ConsumerState>,
    open_connections: HashSet<u64>,
    next_connection_id: u64,
    next_delivery_tag: u64,
    journal: Vec<JournalEntry>,
}

impl BrokerState {
    fn ensure_open(&self, connection: u64) -> Result<()> {
        if self.open_connections.contains(&connection) {
            Ok(())
        } else {
            Err(BrokerError::ConnectionClosed)
        }
    }

    fn declare_exchange(
        &mut self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeOptions,
    ) -> Result<()> {
        if name == DEFAULT_EXCHANGE {
            return Err(BrokerError::PreconditionFailed(
                "the default exchange cannot be redeclared".to_string(),
            ));
        }

        if let Some(existing) = self.exchanges.get(name) {
            if existing.kind != kind || existing.options != options {
                return Err(BrokerError::PreconditionFailed(format!(
                    "inequivalent arguments for exchange '{name}'"
                )));
            }
            return Ok(());
        }

        self.exchanges
            .insert(name.to_string(), ExchangeState { kind, options });
        Ok(())
    }

    fn declare_queue(
        &mut self,
        connection: u64,
        name: &str,
        options: QueueOptions,
    ) -> Result<QueueHandle> {
        let name = if name.is_empty() {
            format!("amq.gen-{}", Uuid::new_v4().simple())
        } else {
            name.to_string()
        };

        if let Some(existing) = self.queues.get(&name) {
            if existing.options != options {
                return Err(BrokerError::PreconditionFailed(format!(
                    "inequivalent arguments for queue '{name}'"
                )));
            }
            check_owner(&name, existing, connection)?;
            return Ok(QueueHandle {
                messages: existing.ready.len(),
                consumers: existing.consumers.len(),
                name,
            });
        }

        self.queues.insert(
            name.clone(),
            QueueState {
                options,
                owner: options.exclusive.then_some(connection),
                ready: VecDeque::new(),
                consumers: Vec::new(),
                next_consumer: 0,
            },
        );

        Ok(QueueHandle {
            name,
            messages: 0,
            consumers: 0,
        })
    }

    fn bind_queue(&mut self, queue: &str, routing_key: &str, exchange: &str) -> Result<()> {
        if !self.queues.contains_key(queue) {
            return Err(not_found("queue", queue));
        }
        if exchange == DEFAULT_EXCHANGE {
            return Err(BrokerError::PreconditionFailed(
                "queues cannot be bound to the default exchange".to_string(),
            ));
        }
        if !self.exchanges.contains_key(exchange) {
            return Err(not_found("exchange", exchange));
        }

        let exists = self.bindings.iter().any(|b| {
            b.queue == queue && b.exchange == exchange && b.routing_key == routing_key
        });
        if !exists {
            self.bindings.push(Binding {
                exchange: exchange.to_string(),
                queue: queue.to_string(),
                routing_key: routing_key.to_string(),
            });
        }
        Ok(())
    }

    fn consume(&mut self, connection: u64, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        let state = self
            .queues
            .get(queue)
            .ok_or_else(|| not_found("queue", queue))?;
        check_owner(queue, state, connection)?;

        let tag = if consumer_tag.is_empty() {
            format!("amq.ctag-{}", Uuid::new_v4().simple())
        } else {
            consumer_tag.to_string()
        };

        let key = (connection, tag.clone());
        if self.consumers.contains_key(&key) {
            return Err(BrokerError::ConsumerTagInUse(tag));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        self.consumers.insert(
            key.clone(),
            ConsumerState {
                queue: queue.to_string(),
                sender,
            },
        );

        let backlog: Vec<QueuedMessage> = match self.queues.get_mut(queue) {
            Some(state) => {
                state.consumers.push(key);
                state.ready.drain(..).collect()
            }
            None => Vec::new(),
        };
        for message in backlog {
            self.dispatch(queue, message);
        }

        Ok(DeliveryStream::from_receiver(tag, receiver))
    }

    fn cancel(&mut self, connection: u64, consumer_tag: &str) -> Result<()> {
        let key = (connection, consumer_tag.to_string());
        if self.remove_consumer(&key) {
            Ok(())
        } else {
            Err(BrokerError::UnknownConsumer(consumer_tag.to_string()))
        }
    }

    fn close_connection(&mut self, connection: u64) -> Result<()> {
        if !self.open_connections.remove(&connection) {
            return Err(BrokerError::ConnectionClosed);
        }

        let owned: Vec<ConsumerKey> = self
            .consumers
            .keys()
            .filter(|(conn, _)| *conn == connection)
            .cloned()
            .collect();
        for key in owned {
            self.remove_consumer(&key);
        }

        let exclusive: Vec<String> = self
            .queues
            .iter()
            .filter(|(_, q)| q.owner == Some(connection))
            .map(|(name, _)| name.clone())
            .collect();
        for name in exclusive {
            self.delete_queue(&name);
        }

        Ok(())
    }

    /// Route a message and return the number of queues it reached.
    fn publish(&mut self, exchange: &str, routing_key: &str, publishing: Publishing) -> Result<usize> {
        let targets: Vec<String> = if exchange == DEFAULT_EXCHANGE {
            if self.queues.contains_key(routing_key) {
                vec![routing_key.to_string()]
            } else {
                Vec::new()
            }
        } else {
            let state = self
                .exchanges
                .get(exchange)
                .ok_or_else(|| not_found("exchange", exchange))?;
            if state.options.internal {
                return Err(BrokerError::PreconditionFailed(format!(
                    "exchange '{exchange}' is internal"
                )));
            }

            let mut targets: Vec<String> = Vec::new();
            for binding in self.bindings.iter().filter(|b| b.exchange == exchange) {
                if state.kind.matches(&binding.routing_key, routing_key)
                    && !targets.contains(&binding.queue)
                {
                    targets.push(binding.queue.clone());
                }
            }
            targets
        };

        let message = QueuedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            publishing,
        };
        for queue in &targets {
            self.dispatch(queue, message.clone());
        }

        Ok(targets.len())
    }

    /// Hand a message to the next live consumer of `queue`, round-robin, or
    /// keep it on the queue when nobody can take it.
    fn dispatch(&mut self, queue: &str, message: QueuedMessage) {
        let Some(state) = self.queues.get_mut(queue) else {
            return;
        };

        for _ in 0..state.consumers.len() {
            let index = state.next_consumer % state.consumers.len();
            state.next_consumer = index + 1;

            let key = &state.consumers[index];
            let Some(consumer) = self.consumers.get(key) else {
                continue;
            };
            // Registered but no longer reading
            if consumer.sender.is_closed() {
                continue;
            }

            self.next_delivery_tag += 1;
            let delivery = Delivery {
                delivery_tag: self.next_delivery_tag,
                consumer_tag: key.1.clone(),
                exchange: message.exchange.clone(),
                routing_key: message.routing_key.clone(),
                redelivered: false,
                content_type: message.publishing.content_type.clone(),
                body: message.publishing.body.clone(),
            };
            if consumer.sender.send(delivery).is_ok() {
                return;
            }
        }

        state.ready.push_back(message);
    }

    fn remove_consumer(&mut self, key: &ConsumerKey) -> bool {
        let Some(consumer) = self.consumers.remove(key) else {
            return false;
        };

        let mut delete = false;
        if let Some(queue) = self.queues.get_mut(&consumer.queue) {
            queue.consumers.retain(|k| k != key);
            delete = queue.options.auto_delete && queue.consumers.is_empty();
        }
        if delete {
            debug!(queue = %consumer.queue, "Auto-deleting queue after last consumer");
            self.delete_queue(&consumer.queue);
        }
        true
    }

    fn delete_queue(&mut self, name: &str) {
        self.queues.remove(name);

        let mut touched: Vec<String> = Vec::new();
        self.bindings.retain(|b| {
            if b.queue == name {
                touched.push(b.exchange.clone());
                false
            } else {
                true
            }
        });

        for exchange in touched {
            let unbound = !self.bindings.iter().any(|b| b.exchange == exchange);
            let auto_delete = self
                .exchanges
                .get(&exchange)
                .is_some_and(|e| e.options.auto_delete);
            if unbound && auto_delete {
                debug!(exchange = %exchange, "Auto-deleting exchange after last binding");
                self.exchanges.remove(&exchange);
            }
        }
    }
}

fn check_owner(name: &str, queue: &QueueState, connection: u64) -> Result<()> {
    match queue.owner {
        Some(owner) if owner != connection => Err(BrokerError::PreconditionFailed(format!(
            "queue '{name}' is exclusive to another connection"
        ))),
        _ => Ok(()),
    }
}

fn not_found(kind: &'static str, name: &str) -> BrokerError {
    BrokerError::NotFound {
        kind,
        name: name.to_string(),
    }
}

fn validate_uri(uri: &str) -> Result<()> {
    let Some((scheme, _)) = uri.split_once("://") else {
        return Err(BrokerError::InvalidUri(uri.to_string()));
    };
    let valid_scheme = !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if valid_scheme {
        Ok(())
    } else {
        Err(BrokerError::InvalidUri(uri.to_string()))
    }
}

struct Shared {
    state: Mutex<BrokerState>,
    faults: Mutex<HashSet<Operation>>,
}

impl Shared {
    /// Journal the call, then fail it if a fault is armed.
    fn enter(&self, operation: Operation, connection: u64, target: &str) -> Result<()> {
        self.state.lock().journal.push(JournalEntry {
            operation,
            connection,
            target: target.to_string(),
        });

        if self.faults.lock().contains(&operation) {
            warn!(operation = %operation, target = target, "Injected broker fault");
            return Err(BrokerError::Injected(operation));
        }
        Ok(())
    }
}

/// Process-local broker.
///
/// Cloning yields another handle to the same broker.
///
/// Deliveries are settled once they are handed to a consumer's stream; there
/// is no acknowledgement tracking. Deliveries a consumer has not yet read
/// when it is cancelled, or when its stream is dropped, are not requeued.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                faults: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Make every subsequent call of `operation` fail.
    pub fn fail_on(&self, operation: Operation) {
        self.shared.faults.lock().insert(operation);
    }

    /// Disarm a fault set with [`fail_on`](Self::fail_on).
    pub fn clear_fault(&self, operation: Operation) {
        self.shared.faults.lock().remove(&operation);
    }

    /// Disarm every fault.
    pub fn clear_faults(&self) {
        self.shared.faults.lock().clear();
    }

    /// All calls attempted so far, in order.
    #[must_use]
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.shared.state.lock().journal.clone()
    }

    /// Operations attempted so far, in order.
    #[must_use]
    pub fn operations(&self) -> Vec<Operation> {
        self.shared
            .state
            .lock()
            .journal
            .iter()
            .map(|entry| entry.operation)
            .collect()
    }

    /// Publish without a connection. Returns the number of queues reached.
    pub fn publish(&self, exchange: &str, routing_key: &str, publishing: Publishing) -> Result<usize> {
        self.shared.enter(Operation::Publish, 0, exchange)?;
        self.shared
            .state
            .lock()
            .publish(exchange, routing_key, publishing)
    }

    /// Snapshot of a queue, if it exists.
    #[must_use]
    pub fn queue(&self, name: &str) -> Option<QueueHandle> {
        self.shared.state.lock().queues.get(name).map(|q| QueueHandle {
            name: name.to_string(),
            messages: q.ready.len(),
            consumers: q.consumers.len(),
        })
    }

    /// Kind and flags of an exchange, if it exists.
    #[must_use]
    pub fn exchange(&self, name: &str) -> Option<(ExchangeKind, ExchangeOptions)> {
        self.shared
            .state
            .lock()
            .exchanges
            .get(name)
            .map(|e| (e.kind, e.options))
    }

    /// `(exchange, routing_key)` pairs bound to `queue`.
    #[must_use]
    pub fn bindings(&self, queue: &str) -> Vec<(String, String)> {
        self.shared
            .state
            .lock()
            .bindings
            .iter()
            .filter(|b| b.queue == queue)
            .map(|b| (b.exchange.clone(), b.routing_key.clone()))
            .collect()
    }

    /// Tags of the consumers registered on `queue`.
    #[must_use]
    pub fn consumer_tags(&self, queue: &str) -> Vec<String> {
        self.shared
            .state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.consumers.iter().map(|(_, tag)| tag.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of open connections.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.shared.state.lock().open_connections.len()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
    async fn connect(&self, uri: &str) -> Result<Box<dyn BrokerConnection>> {
        self.shared.enter(Operation::Connect, 0, uri)?;
        validate_uri(uri)?;

        let id = {
            let mut state = self.shared.state.lock();
            state.next_connection_id += 1;
            let id = state.next_connection_id;
            state.open_connections.insert(id);
            id
        };

        debug!(connection = id, uri = uri, "Connection opened");

        Ok(Box::new(MemoryConnection {
            shared: self.shared.clone(),
            id,
        }))
    }
}

/// Connection to an [`InMemoryBroker`].
struct MemoryConnection {
    shared: Arc<Shared>,
    id: u64,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn open_session(&self) -> Result<Box<dyn BrokerSession>> {
        self.shared.enter(Operation::OpenSession, self.id, "")?;
        self.shared.state.lock().ensure_open(self.id)?;

        Ok(Box::new(MemorySession {
            shared: self.shared.clone(),
            connection: self.id,
            confirm_mode: AtomicBool::new(false),
            publish_seq: AtomicU64::new(0),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.shared.enter(Operation::CloseConnection, self.id, "")?;
        self.shared.state.lock().close_connection(self.id)?;
        debug!(connection = self.id, "Connection closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.shared.state.lock().open_connections.contains(&self.id)
    }
}

/// Session on a [`MemoryConnection`].
struct MemorySession {
    shared: Arc<Shared>,
    connection: u64,
    confirm_mode: AtomicBool,
    publish_seq: AtomicU64,
}

#[async_trait]
impl BrokerSession for MemorySession {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeOptions,
    ) -> Result<()> {
        self.shared
            .enter(Operation::DeclareExchange, self.connection, name)?;
        let mut state = self.shared.state.lock();
        state.ensure_open(self.connection)?;
        state.declare_exchange(name, kind, options)?;
        debug!(exchange = name, kind = %kind, "Exchange declared");
        Ok(())
    }

    async fn declare_queue(&self, name: &str, options: QueueOptions) -> Result<QueueHandle> {
        self.shared
            .enter(Operation::DeclareQueue, self.connection, name)?;
        let mut state = self.shared.state.lock();
        state.ensure_open(self.connection)?;
        let handle = state.declare_queue(self.connection, name, options)?;
        debug!(queue = %handle.name, "Queue declared");
        Ok(handle)
    }

    async fn bind_queue(&self, queue: &str, routing_key: &str, exchange: &str) -> Result<()> {
        self.shared
            .enter(Operation::BindQueue, self.connection, queue)?;
        let mut state = self.shared.state.lock();
        state.ensure_open(self.connection)?;
        state.bind_queue(queue, routing_key, exchange)?;
        debug!(queue = queue, exchange = exchange, routing_key = routing_key, "Queue bound");
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        self.shared
            .enter(Operation::Consume, self.connection, consumer_tag)?;
        let mut state = self.shared.state.lock();
        state.ensure_open(self.connection)?;
        let stream = state.consume(self.connection, queue, consumer_tag)?;
        debug!(queue = queue, consumer_tag = stream.consumer_tag(), "Consumer registered");
        Ok(stream)
    }

    async fn cancel(&self, consumer_tag: &str, _confirm: bool) -> Result<()> {
        // Cancellation is applied synchronously, so confirmation is implicit.
        self.shared
            .enter(Operation::Cancel, self.connection, consumer_tag)?;
        let mut state = self.shared.state.lock();
        state.ensure_open(self.connection)?;
        state.cancel(self.connection, consumer_tag)?;
        debug!(consumer_tag = consumer_tag, "Consumer cancelled");
        Ok(())
    }

    async fn confirm_select(&self) -> Result<()> {
        self.shared
            .enter(Operation::ConfirmSelect, self.connection, "")?;
        self.shared.state.lock().ensure_open(self.connection)?;
        self.confirm_mode.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        publishing: Publishing,
    ) -> Result<PublishConfirm> {
        self.shared
            .enter(Operation::Publish, self.connection, exchange)?;
        let result = {
            let mut state = self.shared.state.lock();
            state.ensure_open(self.connection)?;
            state.publish(exchange, routing_key, publishing)
        };

        if !self.confirm_mode.load(Ordering::SeqCst) {
            return result.map(|_| PublishConfirm::NotRequested);
        }

        let sequence = self.publish_seq.fetch_add(1, Ordering::SeqCst) + 1;
        match result {
            Ok(_) => Ok(PublishConfirm::Ack { sequence }),
            Err(BrokerError::NotFound { .. }) => Ok(PublishConfirm::Nack { sequence }),
            Err(e) => Err(e),
        }
    }
}
