//! JSON event codec.

use crate::ports::{CodecError, EventCodec};
use shared_bus::JSON_CONTENT_TYPE;
use shared_types::Event;

/// Encodes events as JSON objects, one per payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEventCodec;

impl EventCodec for JsonEventCodec {
    fn decode(&self, payload: &[u8]) -> Result<Event, CodecError> {
        serde_json::from_slice(payload).map_err(|e| CodecError::Malformed(e.to_string()))
    }

    fn encode(&self, event: &Event) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(event).map_err(|e| CodecError::Serialize(e.to_string()))
    }

    fn content_type(&self) -> &'static str {
        JSON_CONTENT_TYPE
    }
}
