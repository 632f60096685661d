//! # Shared Bus - Broker Client Interface
//!
//! Defines the narrow interface through which the feed bridge talks to a
//! message broker, plus an in-process broker that implements it.
//!
//! ## Topology
//!
//! ```text
//! ┌──────────────┐  publish(exchange, key)   ┌──────────────┐
//! │  Publisher   │ ────────────────────────▶ │   Exchange   │
//! └──────────────┘                           └──────┬───────┘
//!                                                   │ binding (routing key)
//!                                                   ▼
//! ┌──────────────┐   DeliveryStream          ┌──────────────┐
//! │   Consumer   │ ◀──────────────────────── │    Queue     │
//! └──────────────┘   consume(queue, tag)     └──────────────┘
//! ```
//!
//! ## Delivery Contract
//!
//! - Deliveries reach a consumer in the order the queue received them.
//! - Cancelling a consumer ends its stream once deliveries already handed
//!   to it have been yielded.
//! - Closing a connection cancels every consumer registered through it.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod client;
pub mod error;
pub mod memory;
pub mod routing;

// Re-export main types
pub use client::{
    BrokerClient, BrokerConnection, BrokerSession, Delivery, DeliveryStream, ExchangeOptions,
    PublishConfirm, Publishing, QueueHandle, QueueOptions, JSON_CONTENT_TYPE,
};
pub use error::{BrokerError, Operation};
pub use memory::{InMemoryBroker, JournalEntry, DEFAULT_EXCHANGE};
pub use routing::ExchangeKind;
