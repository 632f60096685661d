//! # Broker Client Interface
//!
//! The narrow surface the feed bridge needs from a message broker: dial,
//! provision topology, consume, cancel and tear down. Implementations own the
//! wire protocol; callers only ever see these traits.
//!
//! ```text
//! BrokerClient ──connect──▶ BrokerConnection ──open_session──▶ BrokerSession
//!                                 │                              │
//!                               close                 declare / bind / consume
//!                                                     cancel / publish
//! ```

use crate::error::Result;
use crate::routing::ExchangeKind;
use async_trait::async_trait;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};

/// Content type used for JSON encoded event bodies.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Entry point of a broker implementation.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Dial the broker at `uri`.
    async fn connect(&self, uri: &str) -> Result<Box<dyn BrokerConnection>>;
}

/// An open network connection to the broker.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Open a logical session (channel) on this connection.
    async fn open_session(&self) -> Result<Box<dyn BrokerSession>>;

    /// Close the connection. Consumers registered through it are cancelled
    /// and their delivery streams end.
    async fn close(&self) -> Result<()>;

    /// Whether the connection is still usable.
    fn is_open(&self) -> bool;
}

/// A logical session used to provision topology and consume.
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Declare an exchange, creating it if missing.
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeOptions,
    ) -> Result<()>;

    /// Declare a queue, creating it if missing. An empty name asks the broker
    /// to generate one; the returned handle carries the effective name.
    async fn declare_queue(&self, name: &str, options: QueueOptions) -> Result<QueueHandle>;

    /// Bind `queue` to `exchange` under `routing_key`.
    async fn bind_queue(&self, queue: &str, routing_key: &str, exchange: &str) -> Result<()>;

    /// Register a consumer on `queue` and return its delivery stream.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream>;

    /// Withdraw a consumer. With `confirm` set the call returns only after
    /// the broker acknowledged the cancellation.
    async fn cancel(&self, consumer_tag: &str, confirm: bool) -> Result<()>;

    /// Put the session into publisher-confirm mode.
    async fn confirm_select(&self) -> Result<()>;

    /// Publish a message to `exchange` under `routing_key`.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        publishing: Publishing,
    ) -> Result<PublishConfirm>;
}

/// Flags for exchange declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExchangeOptions {
    /// Survive broker restarts.
    pub durable: bool,
    /// Delete once the last queue is unbound.
    pub auto_delete: bool,
    /// Reject direct publishes from clients.
    pub internal: bool,
}

/// Flags for queue declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueOptions {
    /// Survive broker restarts.
    pub durable: bool,
    /// Delete once the last consumer is cancelled.
    pub auto_delete: bool,
    /// Usable only by the declaring connection.
    pub exclusive: bool,
}

/// Result of a queue declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueHandle {
    /// Effective queue name.
    pub name: String,
    /// Messages ready for delivery.
    pub messages: usize,
    /// Active consumers.
    pub consumers: usize,
}

/// A raw message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Per-broker delivery sequence number.
    pub delivery_tag: u64,
    /// Consumer this delivery was routed to.
    pub consumer_tag: String,
    /// Exchange the message was published to.
    pub exchange: String,
    /// Routing key used at publish time.
    pub routing_key: String,
    /// Whether the message was delivered before.
    pub redelivered: bool,
    /// MIME content type, if the publisher set one.
    pub content_type: Option<String>,
    /// Opaque payload.
    pub body: Vec<u8>,
}

/// A message to publish.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Publishing {
    pub content_type: Option<String>,
    pub persistent: bool,
    pub body: Vec<u8>,
}

impl Publishing {
    /// A transient JSON message.
    pub fn json(body: Vec<u8>) -> Self {
        Self {
            content_type: Some(JSON_CONTENT_TYPE.to_string()),
            persistent: false,
            body,
        }
    }
}

/// Outcome of a publish as reported by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishConfirm {
    /// The session is not in confirm mode.
    NotRequested,
    /// The broker took responsibility for the message.
    Ack { sequence: u64 },
    /// The broker refused the message.
    Nack { sequence: u64 },
}

/// Stream of deliveries for one consumer.
///
/// Ends once the consumer is cancelled (or its connection closed) and all
/// deliveries buffered before that point have been yielded.
pub struct DeliveryStream {
    consumer_tag: String,
    inner: Pin<Box<dyn Stream<Item = Delivery> + Send>>,
}

impl DeliveryStream {
    /// Wrap any stream of deliveries.
    pub fn new<S>(consumer_tag: impl Into<String>, stream: S) -> Self
    where
        S: Stream<Item = Delivery> + Send + 'static,
    {
        Self {
            consumer_tag: consumer_tag.into(),
            inner: Box::pin(stream),
        }
    }

    /// Build a stream fed by an unbounded channel.
    pub fn from_receiver(
        consumer_tag: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<Delivery>,
    ) -> Self {
        Self::new(consumer_tag, UnboundedReceiverStream::new(receiver))
    }

    /// Receive the next delivery.
    ///
    /// # Returns
    ///
    /// - `Some(delivery)` - The next delivery in broker order
    /// - `None` - The consumer was cancelled and the stream drained
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.inner.next().await
    }

    /// Consumer tag this stream belongs to.
    #[must_use]
    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }
}

impl Stream for DeliveryStream {
    type Item = Delivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for DeliveryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryStream")
            .field("consumer_tag", &self.consumer_tag)
            .finish_non_exhaustive()
    }
}
