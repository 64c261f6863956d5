use crate::handoff::HandoffReceiver;
use common::domain::{PersistedRecord, RawMessage, ReadingSink, SensorReading};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// What happened to a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Persisted,
    DecodeFailed,
    InsertFailed,
}

/// Sole consumer of the handoff channel.
///
/// Flow per message:
/// 1. Decode the JSON payload into a `SensorReading`
/// 2. Derive the `PersistedRecord`, stamped with the insertion time
/// 3. Insert it through the sink
///
/// Failures at any step are logged and the message is dropped; the loop
/// keeps going. Messages are handled one at a time in delivery order.
pub struct ReadingProcessor {
    sink: Arc<dyn ReadingSink>,
}

impl ReadingProcessor {
    pub fn new(sink: Arc<dyn ReadingSink>) -> Self {
        Self { sink }
    }

    /// Consume messages until `ctx` is cancelled or the channel closes.
    ///
    /// Cancellation is checked before every receive. While waiting, a
    /// message and the cancellation may become ready together and either
    /// can win.
    pub async fn run(self, ctx: CancellationToken, receiver: HandoffReceiver) -> anyhow::Result<()> {
        info!("starting reading processor");

        loop {
            if ctx.is_cancelled() {
                break;
            }

            tokio::select! {
                _ = ctx.cancelled() => break,
                received = receiver.recv_async() => match received {
                    Ok(raw) => {
                        self.process(raw).await;
                    }
                    Err(_) => {
                        warn!("handoff channel closed, stopping reading processor");
                        break;
                    }
                },
            }
        }

        info!("reading processor stopped");
        Ok(())
    }

    /// Decode and persist one message.
    ///
    /// Creates a new independent trace for each message.
    pub async fn process(&self, raw: RawMessage) -> ProcessOutcome {
        let span = info_span!(
            parent: Span::none(),
            "sensor_message",
            topic = %raw.topic,
            payload_size = raw.payload.len(),
            device_id = tracing::field::Empty,
        );

        async {
            info!(topic = %raw.topic, payload = %raw.payload_text(), "received sensor data");

            let reading = match SensorReading::decode(&raw.payload) {
                Ok(reading) => reading,
                Err(e) => {
                    error!(
                        topic = %raw.topic,
                        payload = %raw.payload_text(),
                        error = %e,
                        "failed to decode sensor payload"
                    );
                    return ProcessOutcome::DecodeFailed;
                }
            };

            Span::current().record("device_id", reading.device_id.as_str());
            debug!(reading = ?reading, "decoded sensor payload");

            let record = match PersistedRecord::from_reading(&reading, chrono::Utc::now()) {
                Ok(record) => record,
                Err(e) => {
                    error!(
                        topic = %raw.topic,
                        payload = %raw.payload_text(),
                        error = %e,
                        "invalid sensor reading"
                    );
                    return ProcessOutcome::DecodeFailed;
                }
            };

            if let Err(e) = self.sink.insert(&record).await {
                error!(reading = ?reading, error = %e, "failed to insert reading");
                return ProcessOutcome::InsertFailed;
            }

            debug!(
                device_id = %record.device_id,
                sequence_index = reading.sequence_index,
                temp_delta = record.temp_delta,
                "persisted reading"
            );
            ProcessOutcome::Persisted
        }
        .instrument(span)
        .await
    }
}
