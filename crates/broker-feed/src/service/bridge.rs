//! # Subscription Bridge
//!
//! Turns a broker subscription into a stream of typed [`Event`]s.
//!
//! ```text
//! DeliveryStream ──▶ Translator task ──decode──▶ mpsc(1) ──▶ EventUpdates
//!                          │
//!                          └──outcome──▶ oneshot ──▶ close()
//! ```
//!
//! The translator is the only reader of the delivery stream and the only
//! writer of the output channel. The channel holds at most one decoded event,
//! so a slow reader stalls the translator instead of growing a buffer.
//!
//! ## Lifecycle
//!
//! 1. [`SubscriptionBridge::connect`] provisions the topology and spawns the
//!    translator.
//! 2. The caller drains [`SubscriptionBridge::updates`].
//! 3. [`SubscriptionBridge::close`] cancels the consumer, closes the
//!    connection, joins the translator and returns its outcome.
//!
//! A decode failure stops the translator: the output ends after the events
//! already forwarded and `close` reports the failure.

use crate::adapters::JsonEventCodec;
use crate::config::FeedConfig;
use crate::error::{FeedError, Result, SetupStep};
use crate::ports::{BrokerClient, BrokerConnection, BrokerSession, EventCodec};
use feed_telemetry::{
    time_histogram, ACTIVE_SUBSCRIPTIONS, DECODE_FAILURES, DELIVERIES_RECEIVED, EVENTS_FORWARDED,
};
use shared_bus::DeliveryStream;
use shared_types::Event;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tracing::{debug, error, info, warn};

/// Decoded events waiting for the reader.
const HANDOFF_CAPACITY: usize = 1;

/// A running subscription.
///
/// Owns the broker connection, the session and the translator task. Dropping
/// the bridge without calling [`close`](Self::close) aborts the translator
/// but leaves the broker side untouched.
pub struct SubscriptionBridge {
    connection: Box<dyn BrokerConnection>,
    session: Box<dyn BrokerSession>,
    consumer_tag: String,
    queue: String,
    updates: EventUpdates,
    done: oneshot::Receiver<Result<()>>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionBridge {
    /// Provision the subscription and start translating JSON events.
    pub async fn connect(client: &dyn BrokerClient, config: &FeedConfig) -> Result<Self> {
        Self::connect_with_codec(client, config, Arc::new(JsonEventCodec)).await
    }

    /// Provision the subscription and start translating with `codec`.
    ///
    /// # Errors
    ///
    /// - [`FeedError::InvalidConfig`] before anything is dialed
    /// - [`FeedError::Provisioning`] naming the setup step that failed
    pub async fn connect_with_codec(
        client: &dyn BrokerClient,
        config: &FeedConfig,
        codec: Arc<dyn EventCodec>,
    ) -> Result<Self> {
        config.validate()?;

        let connection = client
            .connect(&config.uri)
            .await
            .map_err(FeedError::at(SetupStep::Connect))?;

        match provision(connection.as_ref(), config).await {
            Ok((session, queue, deliveries)) => {
                Ok(Self::start(connection, session, queue, deliveries, codec))
            }
            Err(e) => {
                warn!(
                    exchange = %config.exchange,
                    consumer_tag = %config.consumer_tag,
                    error = %e,
                    "Subscription setup failed"
                );
                if let Err(close_err) = connection.close().await {
                    warn!(error = %close_err, "Failed to close connection after setup failure");
                }
                Err(e)
            }
        }
    }

    fn start(
        connection: Box<dyn BrokerConnection>,
        session: Box<dyn BrokerSession>,
        queue: String,
        deliveries: DeliveryStream,
        codec: Arc<dyn EventCodec>,
    ) -> Self {
        let consumer_tag = deliveries.consumer_tag().to_string();
        let (output, receiver) = mpsc::channel(HANDOFF_CAPACITY);
        let (done_tx, done) = oneshot::channel();

        let translator = Translator {
            consumer_tag: consumer_tag.clone(),
            deliveries,
            output,
            codec,
        };

        let task = tokio::spawn(translator.run(done_tx));

        info!(queue = %queue, consumer_tag = %consumer_tag, "Subscription started");

        Self {
            connection,
            session,
            consumer_tag,
            queue,
            updates: EventUpdates { receiver },
            done,
            task: Some(task),
        }
    }

    /// The decoded event stream. Borrowing mutably keeps a single reader.
    pub fn updates(&mut self) -> &mut EventUpdates {
        &mut self.updates
    }

    /// Consumer tag the subscription was registered under.
    #[must_use]
    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Effective name of the consumed queue.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Whether the translator is still consuming.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the subscription and return the translator's outcome.
    ///
    /// Cancels the consumer (waiting for the broker to confirm), closes the
    /// connection, releases the event stream and joins the translator.
    ///
    /// # Errors
    ///
    /// - [`FeedError::Cancellation`] or [`FeedError::Teardown`] as soon as
    ///   that step fails; the translator is then aborted on drop
    /// - [`FeedError::Decode`] if the translator stopped on a bad payload
    /// - [`FeedError::LoopAborted`] if the translator panicked
    pub async fn close(mut self) -> Result<()> {
        info!(consumer_tag = %self.consumer_tag, "Closing subscription");

        self.session
            .cancel(&self.consumer_tag, true)
            .await
            .map_err(|source| FeedError::Cancellation {
                consumer_tag: self.consumer_tag.clone(),
                source,
            })?;

        self.connection.close().await.map_err(FeedError::Teardown)?;

        // Unblocks a translator waiting on a reader that is not coming.
        self.updates.release();

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(consumer_tag = %self.consumer_tag, error = %e, "Translator task failed");
                return Err(FeedError::LoopAborted(e.to_string()));
            }
        }

        let outcome = (&mut self.done)
            .await
            .unwrap_or_else(|_| Err(FeedError::LoopAborted("no outcome reported".to_string())));

        match &outcome {
            Ok(()) => info!(consumer_tag = %self.consumer_tag, "Subscription closed"),
            Err(e) => warn!(consumer_tag = %self.consumer_tag, error = %e, "Subscription closed with error"),
        }
        outcome
    }
}

impl Drop for SubscriptionBridge {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                warn!(
                    consumer_tag = %self.consumer_tag,
                    "Subscription dropped without close, aborting translator"
                );
            }
            task.abort();
        }
    }
}

impl std::fmt::Debug for SubscriptionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionBridge")
            .field("consumer_tag", &self.consumer_tag)
            .field("queue", &self.queue)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Run setup steps (b) through (f) on an open connection.
async fn provision(
    connection: &dyn BrokerConnection,
    config: &FeedConfig,
) -> Result<(Box<dyn BrokerSession>, String, DeliveryStream)> {
    let session = connection
        .open_session()
        .await
        .map_err(FeedError::at(SetupStep::OpenSession))?;

    session
        .declare_exchange(&config.exchange, config.exchange_kind, config.exchange_options())
        .await
        .map_err(FeedError::at(SetupStep::DeclareExchange))?;

    let queue = session
        .declare_queue(&config.queue, config.queue_options())
        .await
        .map_err(FeedError::at(SetupStep::DeclareQueue))?;

    debug!(
        queue = %queue.name,
        messages = queue.messages,
        consumers = queue.consumers,
        "Queue declared"
    );

    session
        .bind_queue(&queue.name, &config.binding_key, &config.exchange)
        .await
        .map_err(FeedError::at(SetupStep::BindQueue))?;

    let deliveries = session
        .consume(&queue.name, &config.consumer_tag)
        .await
        .map_err(FeedError::at(SetupStep::Consume))?;

    Ok((session, queue.name, deliveries))
}

/// The background loop: deliveries in, events out.
struct Translator {
    consumer_tag: String,
    deliveries: DeliveryStream,
    output: mpsc::Sender<Event>,
    codec: Arc<dyn EventCodec>,
}

impl Translator {
    async fn run(self, done: oneshot::Sender<Result<()>>) {
        let _active = ActiveSubscription::enter();
        let consumer_tag = self.consumer_tag.clone();

        // `translate` owns the sender, so the output is closed before the
        // outcome becomes visible.
        let outcome = self.translate().await;

        debug!(consumer_tag = %consumer_tag, ok = outcome.is_ok(), "Translator stopped");

        if done.send(outcome).is_err() {
            debug!(consumer_tag = %consumer_tag, "Outcome dropped, bridge already gone");
        }
    }

    async fn translate(mut self) -> Result<()> {
        let tag = [self.consumer_tag.as_str()];

        while let Some(delivery) = self.deliveries.recv().await {
            DELIVERIES_RECEIVED.with_label_values(&tag).inc();
            debug!(
                consumer_tag = %self.consumer_tag,
                delivery_tag = delivery.delivery_tag,
                routing_key = %delivery.routing_key,
                "Delivery received"
            );

            let decoded = {
                let _timer = time_histogram!(feed_telemetry::DECODE_DURATION);
                self.codec.decode(&delivery.body)
            };

            let event = match decoded {
                Ok(event) => event,
                Err(source) => {
                    DECODE_FAILURES.with_label_values(&tag).inc();
                    warn!(
                        consumer_tag = %self.consumer_tag,
                        delivery_tag = delivery.delivery_tag,
                        error = %source,
                        "Failed to decode delivery, stopping"
                    );
                    return Err(FeedError::Decode {
                        delivery_tag: delivery.delivery_tag,
                        source,
                    });
                }
            };

            if self.output.send(event).await.is_err() {
                debug!(consumer_tag = %self.consumer_tag, "Reader released, stopping");
                return Ok(());
            }
            EVENTS_FORWARDED.with_label_values(&tag).inc();
        }

        debug!(consumer_tag = %self.consumer_tag, "Delivery stream ended");
        Ok(())
    }
}

/// Keeps the active subscription gauge up while the translator runs,
/// including when the task is aborted.
struct ActiveSubscription;

impl ActiveSubscription {
    fn enter() -> Self {
        ACTIVE_SUBSCRIPTIONS.inc();
        Self
    }
}

impl Drop for ActiveSubscription {
    fn drop(&mut self) {
        ACTIVE_SUBSCRIPTIONS.dec();
    }
}

/// Returned by [`EventUpdates::try_recv`] once no more events will arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UpdatesError {
    #[error("event stream exhausted")]
    Exhausted,
}

/// Read side of a subscription.
///
/// Yields events in delivery order and ends (`None`) once the translator has
/// stopped and everything it forwarded was read.
#[derive(Debug)]
pub struct EventUpdates {
    receiver: mpsc::Receiver<Event>,
}

impl EventUpdates {
    /// Wait for the next event.
    ///
    /// # Returns
    ///
    /// - `Some(event)` - The next decoded event
    /// - `None` - The subscription ended
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Take an event if one is ready.
    ///
    /// `Ok(None)` means nothing is ready yet.
    pub fn try_recv(&mut self) -> std::result::Result<Option<Event>, UpdatesError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(UpdatesError::Exhausted),
        }
    }

    fn release(&mut self) {
        self.receiver.close();
    }
}

impl Stream for EventUpdates {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
