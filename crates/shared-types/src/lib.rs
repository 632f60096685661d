//! # Shared Types Crate
//!
//! This crate contains the domain event record that the broker feed
//! decodes and hands to its consumers.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: the event schema is defined here and nowhere else.
//! - **Opaque to the bridge**: the subscription bridge never inspects event
//!   fields; only the codec and downstream consumers do.

pub mod entities;

pub use entities::*;
