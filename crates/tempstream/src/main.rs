mod config;

use common::postgres::{PostgresClient, PostgresReadingRepository};
use common::telemetry::init_telemetry;
use config::ServiceConfig;
use ingest_worker::IngestWorker;
use std::sync::Arc;
use tempstream_runner::Runner;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry = match init_telemetry(&config.telemetry_config()) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = telemetry.otel_enabled(),
        broker = %config.mqtt_broker_url,
        topic = %config.mqtt_topic,
        "Starting tempstream service"
    );
    debug!("Configuration: {:?}", config);

    let postgres_client = match create_postgres_client(&config).await {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to initialize PostgreSQL: {}", e);
            telemetry.shutdown();
            std::process::exit(1);
        }
    };
    let sink = Arc::new(PostgresReadingRepository::new(postgres_client.clone()));

    let ingest_worker = match IngestWorker::new(sink, &config.mqtt_config()).await {
        Ok(worker) => worker,
        Err(e) => {
            error!("Failed to initialize ingest worker: {}", e);
            telemetry.shutdown();
            std::process::exit(1);
        }
    };
    let (processor, intake) = ingest_worker.into_runner_parts();

    let disconnect_timeout = config.mqtt_disconnect_timeout();

    // Transport first so nothing new arrives, then the sink, then telemetry
    // so the shutdown logs of the first two are still exported.
    let runner = Runner::new()
        .with_named_process("reading_processor", processor)
        .with_closer("mqtt_disconnect", move || async move {
            intake.disconnect(disconnect_timeout).await;
            Ok(())
        })
        .with_closer("postgres_pool", move || async move {
            postgres_client.close().await;
            Ok(())
        })
        .with_closer("telemetry", move || async move {
            info!("Cleanup complete");
            telemetry.shutdown();
            Ok(())
        })
        .with_closer_timeout(config.closer_timeout());

    runner.run().await;
}

async fn create_postgres_client(config: &ServiceConfig) -> anyhow::Result<PostgresClient> {
    info!("Initializing PostgreSQL...");
    let client = PostgresClient::from_config(&config.postgres_config())?;
    client.ping().await?;
    Ok(client)
}
