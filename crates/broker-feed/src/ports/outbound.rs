//! Outbound ports (driven side - SPI)
//!
//! The broker client port lives in `shared-bus` because both the bridge and
//! broker implementations depend on it; it is re-exported here so that every
//! collaborator of the bridge can be found in one place.

use shared_types::Event;
use thiserror::Error;

pub use shared_bus::{BrokerClient, BrokerConnection, BrokerSession};

/// Errors from encoding or decoding event payloads
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The payload is not a valid event
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// The event could not be serialized
    #[error("Serialization failed: {0}")]
    Serialize(String),
}

/// Port: Translate raw payloads to and from domain events
pub trait EventCodec: Send + Sync {
    /// Decode a raw payload into an event
    fn decode(&self, payload: &[u8]) -> Result<Event, CodecError>;

    /// Encode an event into a payload
    fn encode(&self, event: &Event) -> Result<Vec<u8>, CodecError>;

    /// MIME content type of encoded payloads
    fn content_type(&self) -> &'static str;
}
