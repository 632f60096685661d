//! Adapters layer - concrete implementations of the outbound ports

pub mod json_codec;

pub use json_codec::JsonEventCodec;
