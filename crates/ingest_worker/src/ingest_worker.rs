use crate::domain::ReadingProcessor;
use crate::handoff::{handoff_channel, HandoffReceiver};
use crate::mqtt::{MqttConfig, MqttIntake};
use common::domain::ReadingSink;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub type RunnerProcess = Box<
    dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send,
>;

/// The ingestion pipeline: MQTT intake, handoff channel and reading processor.
pub struct IngestWorker {
    intake: MqttIntake,
    processor: ReadingProcessor,
    receiver: HandoffReceiver,
}

impl IngestWorker {
    /// Subscribe to the sensor topic and prepare the processor.
    ///
    /// Messages start flowing into the handoff channel right away; delivery
    /// waits until the runner starts the processing loop.
    pub async fn new(sink: Arc<dyn ReadingSink>, config: &MqttConfig) -> anyhow::Result<Self> {
        info!("Initializing ingest worker");

        let (sender, receiver) = handoff_channel();
        let intake = MqttIntake::start(config, sender).await?;
        let processor = ReadingProcessor::new(sink);

        info!("Ingest worker initialized");

        Ok(Self {
            intake,
            processor,
            receiver,
        })
    }

    /// Split into the processing loop for the runner and the intake, which
    /// the caller disconnects during shutdown.
    pub fn into_runner_parts(self) -> (RunnerProcess, MqttIntake) {
        let IngestWorker {
            intake,
            processor,
            receiver,
        } = self;

        let process: RunnerProcess =
            Box::new(move |ctx| Box::pin(async move { processor.run(ctx, receiver).await }));

        (process, intake)
    }
}
