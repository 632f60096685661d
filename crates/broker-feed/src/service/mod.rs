//! Service layer - the subscription bridge and its publishing counterpart

pub mod bridge;
pub mod publisher;

pub use bridge::{EventUpdates, SubscriptionBridge, UpdatesError};
pub use publisher::FeedPublisher;
