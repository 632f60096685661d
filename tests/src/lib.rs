//! # Broker Feed Test Suite
//!
//! End-to-end scenarios that drive the subscription bridge and publisher
//! against the in-process broker.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── harness.rs        # Shared fixtures (logging, configs, payloads)
//! └── integration/
//!     ├── flows.rs      # Publish → subscribe → close scenarios
//!     └── topology.rs   # Exchange kinds, shared queues, fan-out
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p feed-tests
//!
//! # By category
//! cargo test -p feed-tests integration::flows
//! cargo test -p feed-tests integration::topology
//! ```

#![allow(dead_code)]

pub mod harness;
pub mod integration;
