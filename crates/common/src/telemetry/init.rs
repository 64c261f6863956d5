use anyhow::Result;
use opentelemetry::{trace::TracerProvider, KeyValue};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, WithExportConfig};
use opentelemetry_sdk::{
    logs::LoggerProvider,
    propagation::TraceContextPropagator,
    runtime,
    trace::{RandomIdGenerator, Sampler, TracerProvider as SdkTracerProvider},
    Resource,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::TelemetryConfig;

struct OtelProviders {
    tracer_provider: SdkTracerProvider,
    logger_provider: LoggerProvider,
}

/// Process-wide observability handle.
///
/// Created once at start-up by [`init_telemetry`] and consumed by
/// [`TelemetryHandle::shutdown`], which flushes pending traces and logs.
pub struct TelemetryHandle {
    providers: Option<OtelProviders>,
}

impl TelemetryHandle {
    pub fn otel_enabled(&self) -> bool {
        self.providers.is_some()
    }

    /// Shutdown telemetry and flush any pending traces and logs
    pub fn shutdown(self) {
        if let Some(providers) = self.providers {
            if let Err(e) = providers.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer provider: {:?}", e);
            }
            if let Err(e) = providers.logger_provider.shutdown() {
                eprintln!("Error shutting down logger provider: {:?}", e);
            }
        }
    }
}

/// Initialize telemetry with optional OpenTelemetry export
///
/// Always installs a JSON fmt layer on stdout filtered by `RUST_LOG`, or by
/// `log_level` when `RUST_LOG` is unset.
///
/// When OTEL is enabled:
/// - Sets up OTLP exporters for traces and logs
/// - Bridges tracing spans and events to OpenTelemetry
/// - Configures W3C Trace Context propagation
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryHandle> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if !config.otel_enabled {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_span_list(true)
                    .with_current_span(true),
            )
            .try_init()?;

        return Ok(TelemetryHandle { providers: None });
    }

    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    let resource = Resource::new(vec![KeyValue::new(
        opentelemetry_semantic_conventions::resource::SERVICE_NAME,
        config.service_name.clone(),
    )]);

    let trace_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otel_endpoint)
        .build()?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(trace_exporter, runtime::Tokio)
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource.clone())
        .build();

    let log_exporter = LogExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otel_endpoint)
        .build()?;

    let logger_provider = LoggerProvider::builder()
        .with_batch_exporter(log_exporter, runtime::Tokio)
        .with_resource(resource)
        .build();

    let tracer = tracer_provider.tracer("tempstream");
    let otel_trace_layer = tracing_opentelemetry::layer().with_tracer(tracer);
    let otel_log_layer = OpenTelemetryTracingBridge::new(&logger_provider);

    // Trace layer before the log bridge so log records see the active span.
    tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_trace_layer)
        .with(otel_log_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_span_list(true)
                .with_current_span(true),
        )
        .try_init()?;

    Ok(TelemetryHandle {
        providers: Some(OtelProviders {
            tracer_provider,
            logger_provider,
        }),
    })
}
