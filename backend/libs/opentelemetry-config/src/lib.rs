//! OpenTelemetry Configuration Library
//!
//! Centralizes logging and distributed tracing setup for the sp-stats services:
//! a JSON `tracing` subscriber filtered by `LOG_LEVEL`, and an OTLP/HTTP span
//! exporter bridged through `tracing-opentelemetry`.

use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    runtime,
    trace::{RandomIdGenerator, Sampler, Tracer},
    Resource,
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod config;
pub mod propagation;

pub use config::{TelemetryConfig, DEFAULT_OTLP_ENDPOINT};
pub use propagation::link_remote_parent;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("failed to install OTLP tracer: {0}")]
    Exporter(#[from] opentelemetry::trace::TraceError),

    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Flushes and shuts down the global tracer provider when dropped
#[must_use = "dropping the guard shuts telemetry down"]
pub struct TelemetryGuard {
    exporting: bool,
}

impl TelemetryGuard {
    /// Whether spans are being exported to a collector
    pub fn is_exporting(&self) -> bool {
        self.exporting
    }

    /// Export pending spans and release the exporter
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if self.exporting {
            self.exporting = false;
            shutdown_tracing();
            tracing::info!("otel shutdown complete");
        }
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

/// Initialize logging and OpenTelemetry tracing for a service
///
/// Must be called from within a tokio runtime. If the exporter cannot be
/// built, logging is still installed and the service runs without span export.
///
/// # Example
/// ```no_run
/// use opentelemetry_config::{init_telemetry, TelemetryConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let _telemetry = init_telemetry("clickhouse-consumer", TelemetryConfig::from_env())
///         .expect("Failed to initialize telemetry");
/// }
/// ```
pub fn init_telemetry(
    service_name: &str,
    config: TelemetryConfig,
) -> Result<TelemetryGuard, TelemetryError> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let (tracer, exporter_error) = if config.enabled {
        let resource = Resource::new(vec![
            KeyValue::new("service.name", service_name.to_string()),
            KeyValue::new("service.version", config.service_version.clone()),
        ]);
        match init_otlp_tracer(&config, resource) {
            Ok(tracer) => (Some(tracer), None),
            Err(e) => (None, Some(e)),
        }
    } else {
        (None, None)
    };

    let exporting = tracer.is_some();
    let telemetry_layer = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    tracing_subscriber::registry()
        .with(env_filter(&config.log_level))
        .with(
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true),
        )
        .with(telemetry_layer)
        .try_init()?;

    if let Some(e) = exporter_error {
        tracing::warn!(error = %e, "otel exporter unavailable, spans will not be exported");
    }

    tracing::info!(
        service = service_name,
        otel_endpoint = %config.otlp_endpoint,
        exporting,
        sample_rate = config.sample_rate,
        "otel initialized"
    );

    Ok(TelemetryGuard { exporting })
}

/// `RUST_LOG` takes precedence over the configured level when set
fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the OTLP/HTTP exporter pipeline
fn init_otlp_tracer(config: &TelemetryConfig, resource: Resource) -> Result<Tracer, TelemetryError> {
    let exporter = opentelemetry_otlp::new_exporter()
        .http()
        .with_endpoint(config.collector_base_url());

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            opentelemetry_sdk::trace::config()
                .with_sampler(Sampler::TraceIdRatioBased(config.sample_rate))
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource),
        )
        .install_batch(runtime::Tokio)?;

    Ok(tracer)
}

/// Shutdown tracing gracefully
///
/// Call this before shutting down the service to ensure all spans are exported
pub fn shutdown_tracing() {
    global::shutdown_tracer_provider();
}
