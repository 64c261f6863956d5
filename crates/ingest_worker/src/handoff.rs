//! Conduit between the MQTT delivery path and the reading processor.
//!
//! The channel has no buffer: a send completes only once the processor has
//! taken the message, so a slow consumer slows down delivery instead of
//! growing a queue, and nothing sits in the channel when the processor stops.

use common::domain::RawMessage;

pub const HANDOFF_CAPACITY: usize = 0;

pub type HandoffSender = flume::Sender<RawMessage>;
pub type HandoffReceiver = flume::Receiver<RawMessage>;

/// Creates the single-producer/single-consumer rendezvous channel.
pub fn handoff_channel() -> (HandoffSender, HandoffReceiver) {
    flume::bounded(HANDOFF_CAPACITY)
}
