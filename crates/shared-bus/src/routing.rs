//! # Exchange Routing
//!
//! Exchange kinds and the rules that match a publish routing key against a
//! queue binding key.

use crate::error::BrokerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Routing strategy of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Exact routing key match.
    #[default]
    Direct,
    /// Every bound queue, routing key ignored.
    Fanout,
    /// Dot-separated words; `*` matches one word, `#` zero or more.
    Topic,
}

impl ExchangeKind {
    /// Name as used on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Fanout => "fanout",
            Self::Topic => "topic",
        }
    }

    /// Check whether a message with `routing_key` reaches a queue bound
    /// with `binding_key`.
    #[must_use]
    pub fn matches(&self, binding_key: &str, routing_key: &str) -> bool {
        match self {
            Self::Direct => binding_key == routing_key,
            Self::Fanout => true,
            Self::Topic => {
                let pattern: Vec<&str> = binding_key.split('.').collect();
                let words: Vec<&str> = routing_key.split('.').collect();
                topic_matches(&pattern, &words)
            }
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "fanout" => Ok(Self::Fanout),
            "topic" => Ok(Self::Topic),
            other => Err(BrokerError::UnsupportedExchangeKind(other.to_string())),
        }
    }
}

fn topic_matches(pattern: &[&str], words: &[&str]) -> bool {
    match pattern.split_first() {
        None => words.is_empty(),
        Some((&"#", rest)) => {
            // `#` absorbs zero or more words
            (0..=words.len()).any(|skip| topic_matches(rest, &words[skip..]))
        }
        Some((&head, rest)) => match words.split_first() {
            Some((&word, remaining)) if head == "*" || head == word => {
                topic_matches(rest, remaining)
            }
            _ => false,
        },
    }
}
