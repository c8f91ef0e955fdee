//! Logging and tracing setup.
//!
//! Log lines go to stderr, leaving stdout for command output. When an OTLP
//! endpoint is configured, spans are also exported through
//! `tracing-opentelemetry`; without one, no collector is needed.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{Tracer, TracerProvider};
use opentelemetry_sdk::Resource;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::{LogFormat, TelemetryConfig};

/// Holds the tracer provider so pending spans can be flushed on exit.
pub struct TelemetryGuard {
    tracer_provider: Option<TracerProvider>,
}

impl TelemetryGuard {
    pub fn shutdown(self) {
        if let Some(provider) = self.tracer_provider {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = %e, "Failed to shut down tracer provider");
            }
        }
    }
}

/// Installs the global subscriber.
pub fn init(config: &TelemetryConfig) -> anyhow::Result<TelemetryGuard> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.filter))?;
    let (tracer_provider, otel_layer) = match otlp_layer(config) {
        Some((provider, layer)) => (Some(provider), Some(layer)),
        None => (None, None),
    };

    let (json, pretty) = match config.format {
        LogFormat::Json => (
            Some(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .flatten_event(true),
            ),
            None,
        ),
        LogFormat::Pretty => (
            None,
            Some(fmt::layer().with_writer(std::io::stderr).with_target(false)),
        ),
    };

    // The OTel layer is typed against the bare Registry, so it goes first.
    tracing_subscriber::registry()
        .with(otel_layer)
        .with(json)
        .with(pretty)
        .with(filter)
        .try_init()?;

    if let Some(endpoint) = &config.otlp_endpoint {
        if tracer_provider.is_some() {
            tracing::info!(endpoint = %endpoint, service_name = %config.service_name, "OpenTelemetry export enabled");
        }
    }
    Ok(TelemetryGuard { tracer_provider })
}

fn otlp_layer(
    config: &TelemetryConfig,
) -> Option<(TracerProvider, OpenTelemetryLayer<Registry, Tracer>)> {
    let endpoint = config.otlp_endpoint.as_deref()?;

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            // The subscriber is not installed yet.
            eprintln!("warning: failed to create OTLP span exporter, export disabled: {e}");
            return None;
        }
    };

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            config.service_name.clone(),
        )]))
        .build();
    let tracer = provider.tracer("grievance");
    Some((provider, OpenTelemetryLayer::new(tracer)))
}
