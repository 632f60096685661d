//! Cross-crate scenarios.

mod flows;
mod topology;
