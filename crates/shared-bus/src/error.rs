//! # Broker Errors
//!
//! Failures reported by a broker client implementation.

use std::fmt;
use thiserror::Error;

/// Result type alias for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Broker operations, used for fault injection and the call journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    OpenSession,
    DeclareExchange,
    DeclareQueue,
    BindQueue,
    Consume,
    Cancel,
    ConfirmSelect,
    Publish,
    CloseConnection,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::OpenSession => "open_session",
            Self::DeclareExchange => "declare_exchange",
            Self::DeclareQueue => "declare_queue",
            Self::BindQueue => "bind_queue",
            Self::Consume => "consume",
            Self::Cancel => "cancel",
            Self::ConfirmSelect => "confirm_select",
            Self::Publish => "publish",
            Self::CloseConnection => "close_connection",
        };
        f.write_str(name)
    }
}

/// Errors from broker client operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker URI could not be parsed.
    #[error("Invalid broker URI: {0}")]
    InvalidUri(String),

    /// The connection (and every session on it) is closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A named exchange, queue or binding does not exist.
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// Redeclaration with incompatible arguments.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// Exchange kind not supported by this broker.
    #[error("Unsupported exchange kind: {0}")]
    UnsupportedExchangeKind(String),

    /// Consumer tag already registered on this connection.
    #[error("Consumer tag already in use: {0}")]
    ConsumerTagInUse(String),

    /// Consumer tag not registered on this connection.
    #[error("Unknown consumer tag: {0}")]
    UnknownConsumer(String),

    /// A fault was injected for this operation.
    #[error("Injected fault at {0}")]
    Injected(Operation),
}
