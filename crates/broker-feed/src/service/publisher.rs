//! Event publisher for the feed exchange.
//!
//! Declares the exchange with the same flags the subscription uses and
//! publishes encoded events to it, optionally waiting for publisher confirms.

use crate::adapters::JsonEventCodec;
use crate::config::FeedConfig;
use crate::error::{FeedError, Result, SetupStep};
use crate::ports::{BrokerClient, BrokerConnection, BrokerSession, EventCodec};
use feed_telemetry::EVENTS_PUBLISHED;
use shared_bus::{PublishConfirm, Publishing};
use shared_types::Event;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Publishes events to one exchange.
pub struct FeedPublisher {
    connection: Box<dyn BrokerConnection>,
    session: Box<dyn BrokerSession>,
    exchange: String,
    reliable: bool,
    persistent: bool,
    codec: Arc<dyn EventCodec>,
}

impl FeedPublisher {
    /// Connect and declare the exchange, publishing JSON events.
    pub async fn connect(client: &dyn BrokerClient, config: &FeedConfig) -> Result<Self> {
        Self::connect_with_codec(client, config, Arc::new(JsonEventCodec)).await
    }

    /// Connect and declare the exchange, publishing with `codec`.
    ///
    /// With `config.reliable` set the session is put in confirm mode.
    pub async fn connect_with_codec(
        client: &dyn BrokerClient,
        config: &FeedConfig,
        codec: Arc<dyn EventCodec>,
    ) -> Result<Self> {
        config.validate_endpoint()?;

        let connection = client
            .connect(&config.uri)
            .await
            .map_err(FeedError::at(SetupStep::Connect))?;

        let session = match open(connection.as_ref(), config).await {
            Ok(session) => session,
            Err(e) => {
                if let Err(close_err) = connection.close().await {
                    warn!(error = %close_err, "Failed to close connection after setup failure");
                }
                return Err(e);
            }
        };

        info!(
            exchange = %config.exchange,
            kind = %config.exchange_kind,
            reliable = config.reliable,
            "Publisher connected"
        );

        Ok(Self {
            connection,
            session,
            exchange: config.exchange.clone(),
            reliable: config.reliable,
            persistent: config.durable,
            codec,
        })
    }

    /// Publish `event` under `routing_key`.
    ///
    /// # Returns
    ///
    /// - `PublishConfirm::Ack` - Confirmed by the broker (reliable mode)
    /// - `PublishConfirm::NotRequested` - Sent without confirmation
    ///
    /// # Errors
    ///
    /// - [`FeedError::Encode`] if the event cannot be encoded
    /// - [`FeedError::Publish`] if the broker refused the call
    /// - [`FeedError::PublishRejected`] if the broker nacked the message
    pub async fn publish(&self, event: &Event, routing_key: &str) -> Result<PublishConfirm> {
        let body = self.codec.encode(event).map_err(FeedError::Encode)?;
        let publishing = Publishing {
            content_type: Some(self.codec.content_type().to_string()),
            persistent: self.persistent,
            body,
        };

        let confirm = self
            .session
            .publish(&self.exchange, routing_key, publishing)
            .await
            .map_err(FeedError::Publish)?;

        match confirm {
            PublishConfirm::NotRequested => {
                self.count("unconfirmed");
                debug!(
                    exchange = %self.exchange,
                    routing_key = routing_key,
                    key = %event.key,
                    "Event published"
                );
            }
            PublishConfirm::Ack { sequence } => {
                self.count("ack");
                debug!(
                    exchange = %self.exchange,
                    routing_key = routing_key,
                    sequence = sequence,
                    "Publish confirmed"
                );
            }
            PublishConfirm::Nack { sequence } => {
                self.count("nack");
                warn!(
                    exchange = %self.exchange,
                    routing_key = routing_key,
                    sequence = sequence,
                    "Publish rejected by broker"
                );
                return Err(FeedError::PublishRejected {
                    exchange: self.exchange.clone(),
                    sequence,
                });
            }
        }

        Ok(confirm)
    }

    /// Whether publishes wait for broker confirmation.
    #[must_use]
    pub fn is_reliable(&self) -> bool {
        self.reliable
    }

    /// Close the connection.
    pub async fn close(self) -> Result<()> {
        self.connection.close().await.map_err(FeedError::Teardown)?;
        info!(exchange = %self.exchange, "Publisher closed");
        Ok(())
    }

    fn count(&self, outcome: &str) {
        EVENTS_PUBLISHED
            .with_label_values(&[self.exchange.as_str(), outcome])
            .inc();
    }
}

impl std::fmt::Debug for FeedPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedPublisher")
            .field("exchange", &self.exchange)
            .field("reliable", &self.reliable)
            .finish_non_exhaustive()
    }
}

async fn open(
    connection: &dyn BrokerConnection,
    config: &FeedConfig,
) -> Result<Box<dyn BrokerSession>> {
    let session = connection
        .open_session()
        .await
        .map_err(FeedError::at(SetupStep::OpenSession))?;

    session
        .declare_exchange(&config.exchange, config.exchange_kind, config.exchange_options())
        .await
        .map_err(FeedError::at(SetupStep::DeclareExchange))?;

    if config.reliable {
        session
            .confirm_select()
            .await
            .map_err(FeedError::at(SetupStep::ConfirmSelect))?;
    }

    Ok(session)
}
