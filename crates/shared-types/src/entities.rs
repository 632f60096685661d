//! # Domain Event
//!
//! The structured record that flows from a broker subscription to feed
//! consumers. Every field falls back to its default when absent, so any JSON
//! object decodes and terse producers interoperate.
//!
//! Two legacy spellings are accepted when decoding: `name` for `key` and
//! `message` for `description`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A domain event as published by upstream systems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Storage identifier assigned by the event store, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    /// Dotted event key, e.g. `foo.bar`.
    #[serde(default, alias = "name")]
    pub key: String,

    /// Parameters used to render the key.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub key_params: Map<String, Value>,

    /// When the event was first created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    /// When the event was last updated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,

    /// Free-form payload.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,

    /// Human readable description.
    #[serde(default, alias = "message")]
    pub description: String,

    /// Importance, higher is more important.
    #[serde(default)]
    pub importance: i32,

    /// Originating system.
    #[serde(default)]
    pub origin: String,

    /// Entities the event is about (e.g. `ns/foo`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<String>,

    /// Other references related to the event.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub other_references: Vec<String>,

    /// Actors that caused the event.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actors: Vec<String>,

    /// Tags for filtering.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(key: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            created: Some(now),
            updated: Some(now),
            ..Self::bare(key, description)
        }
    }

    /// Create an event without timestamps.
    pub fn bare(key: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: None,
            key: key.into(),
            key_params: Map::new(),
            created: None,
            updated: None,
            payload: Value::Null,
            description: description.into(),
            importance: 0,
            origin: String::new(),
            entities: Vec::new(),
            other_references: Vec::new(),
            actors: Vec::new(),
            tags: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_importance(mut self, importance: i32) -> Self {
        self.importance = importance;
        self
    }

    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn with_key_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.key_params.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn with_entities<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entities = entities.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_actors<I, S>(mut self, actors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actors = actors.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}
