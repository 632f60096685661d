//! Error types for the broker feed

use crate::ports::CodecError;
use shared_bus::BrokerError;
use std::fmt;
use thiserror::Error;

/// Result type alias for feed operations
pub type Result<T> = std::result::Result<T, FeedError>;

/// Setup step that failed while building a bridge or publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    Connect,
    OpenSession,
    DeclareExchange,
    DeclareQueue,
    BindQueue,
    Consume,
    ConfirmSelect,
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::OpenSession => "open session",
            Self::DeclareExchange => "declare exchange",
            Self::DeclareQueue => "declare queue",
            Self::BindQueue => "bind queue",
            Self::Consume => "consume",
            Self::ConfirmSelect => "confirm select",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while running a feed
#[derive(Debug, Error)]
pub enum FeedError {
    /// Configuration rejected before dialing
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A setup step failed; no bridge was started
    #[error("Provisioning failed at {step}: {source}")]
    Provisioning {
        /// Step that failed
        step: SetupStep,
        /// Broker failure
        #[source]
        source: BrokerError,
    },

    /// A delivery payload could not be decoded; terminal for the loop
    #[error("Failed to decode delivery {delivery_tag}: {source}")]
    Decode {
        /// Broker delivery tag of the offending message
        delivery_tag: u64,
        /// Codec failure
        #[source]
        source: CodecError,
    },

    /// The broker did not withdraw the consumer
    #[error("Failed to cancel consumer {consumer_tag}: {source}")]
    Cancellation {
        /// Consumer that could not be cancelled
        consumer_tag: String,
        /// Broker failure
        #[source]
        source: BrokerError,
    },

    /// The broker connection could not be closed
    #[error("Failed to close broker connection: {0}")]
    Teardown(#[source] BrokerError),

    /// The translation loop ended without reporting an outcome
    #[error("Translation loop aborted: {0}")]
    LoopAborted(String),

    /// An event could not be encoded for publishing
    #[error("Failed to encode event: {0}")]
    Encode(#[source] CodecError),

    /// The broker refused the publish call
    #[error("Publish failed: {0}")]
    Publish(#[source] BrokerError),

    /// The broker negatively acknowledged a confirmed publish
    #[error("Broker rejected publish {sequence} to exchange '{exchange}'")]
    PublishRejected {
        /// Exchange published to
        exchange: String,
        /// Publisher confirm sequence number
        sequence: u64,
    },
}

impl FeedError {
    /// Wrap a broker error raised during `step`.
    pub(crate) fn at(step: SetupStep) -> impl FnOnce(BrokerError) -> Self {
        move |source| Self::Provisioning { step, source }
    }

    /// Whether this error was raised by a decode failure.
    #[must_use]
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }
}
