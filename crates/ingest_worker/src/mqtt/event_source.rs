use async_trait::async_trait;
use rumqttc::{ConnectionError, Event, EventLoop};

/// Source of transport events.
///
/// Implemented by rumqttc's `EventLoop`; tests substitute a scripted source.
#[async_trait]
pub(crate) trait EventSource: Send {
    async fn poll(&mut self) -> Result<Event, ConnectionError>;
}

#[async_trait]
impl EventSource for EventLoop {
    async fn poll(&mut self) -> Result<Event, ConnectionError> {
        EventLoop::poll(self).await
    }
}
