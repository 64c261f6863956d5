use bytes::Bytes;
use std::borrow::Cow;

/// A message as delivered by the transport, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Payload as text for log records; invalid UTF-8 is replaced.
    pub fn payload_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}
