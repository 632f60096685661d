//! Ports layer - trait definitions for the bridge's collaborators

pub mod outbound;

pub use outbound::{BrokerClient, BrokerConnection, BrokerSession, CodecError, EventCodec};
