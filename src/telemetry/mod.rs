//! Logging and optional OpenTelemetry tracing.
//!
//! Console logs always go through `tracing-subscriber` with an `EnvFilter`
//! (`RUST_LOG`, default `info`). When `otel.enabled` is set, spans are also
//! exported over OTLP/gRPC.

use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    runtime,
    trace::{RandomIdGenerator, Sampler, TracerProvider as SdkTracerProvider},
    Resource,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, OtelConfig};

const TRACER_NAME: &str = "meridian-notification-client";

pub type TelemetryResult<T> = Result<T, TelemetryError>;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Failed to build OTLP exporter: {0}")]
    ExporterBuild(String),
    #[error("Failed to install tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Keeps the tracer provider alive; flushes pending spans on drop
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            tracing::info!("Shutting down OpenTelemetry tracer provider");
            if let Err(e) = provider.shutdown() {
                eprintln!("Failed to shut down tracer provider: {e}");
            }
        }
    }
}

/// Install the global subscriber.
///
/// The returned guard must be held for the lifetime of the process.
pub fn init_telemetry(config: &OtelConfig, format: LogFormat) -> TelemetryResult<TelemetryGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = format == LogFormat::Json;
    let text_layer = (!json).then(|| tracing_subscriber::fmt::layer());
    let json_layer = json.then(|| tracing_subscriber::fmt::layer().json());

    let provider = if config.enabled {
        Some(init_otel_tracer(config)?)
    } else {
        None
    };
    let otel_layer = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(TRACER_NAME))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(text_layer)
        .with(json_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;

    if config.enabled {
        tracing::info!(
            endpoint = %config.endpoint,
            service_name = %config.service_name,
            sampling_ratio = %config.sampling_ratio,
            "OpenTelemetry tracing initialized"
        );
    } else {
        tracing::info!("Tracing initialized (OpenTelemetry disabled)");
    }

    Ok(TelemetryGuard { provider })
}

fn sampler_for(ratio: f64) -> Sampler {
    if ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(ratio)
    }
}

fn init_otel_tracer(config: &OtelConfig) -> TelemetryResult<SdkTracerProvider> {
    use opentelemetry::KeyValue;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.endpoint)
        .build()
        .map_err(|e| TelemetryError::ExporterBuild(e.to_string()))?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_sampler(sampler_for(config.sampling_ratio))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(Resource::new(vec![
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                config.service_name.clone(),
            ),
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            ),
        ]))
        .build();

    Ok(provider)
}

/// Span attributes shared by the connection and delivery paths
pub mod attributes {
    use opentelemetry::KeyValue;

    pub fn connection_id(id: uuid::Uuid) -> KeyValue {
        KeyValue::new("connection.id", id.to_string())
    }

    pub fn reconnect_attempt(attempt: u32) -> KeyValue {
        KeyValue::new("connection.reconnect_attempt", attempt as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OtelConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.endpoint, "http://localhost:4317");
        assert_eq!(config.service_name, "meridian-notification-client");
        assert_eq!(config.sampling_ratio, 1.0);
    }

    #[test]
    fn test_sampler_bounds() {
        assert!(matches!(sampler_for(1.5), Sampler::AlwaysOn));
        assert!(matches!(sampler_for(0.0), Sampler::AlwaysOff));
        assert!(matches!(sampler_for(0.25), Sampler::TraceIdRatioBased(r) if r == 0.25));
    }

    #[test]
    fn test_attributes() {
        let conn = attributes::connection_id(uuid::Uuid::nil());
        assert_eq!(conn.key.as_str(), "connection.id");
        assert_eq!(attributes::reconnect_attempt(3).key.as_str(), "connection.reconnect_attempt");
    }

    #[test]
    fn test_telemetry_guard_without_provider() {
        let guard = TelemetryGuard { provider: None };
        drop(guard);
    }
}
