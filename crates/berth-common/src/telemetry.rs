use opentelemetry::trace::TracerProvider as TracerProviderTrait;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Where, if anywhere, spans are exported besides stdout.
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    pub service_name: String,
    /// OTLP/HTTP base URL; the exporter appends `/v1/traces`.
    pub otlp_endpoint: Option<String>,
    pub otlp_token: Option<String>,
}

/// Install the global subscriber: env-filtered fmt output, plus an OTLP span
/// exporter when `otlp_endpoint` is set.
///
/// The returned provider must be kept alive and shut down before exit so the
/// batch exporter flushes.
pub fn init_tracing(config: &TelemetryConfig) -> Option<TracerProvider> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer();

    let Some(endpoint) = config.otlp_endpoint.as_deref() else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
        return None;
    };

    let provider = match build_provider(&config.service_name, endpoint, config.otlp_token.as_deref()) {
        Ok(p) => p,
        Err(err) => {
            eprintln!("failed to create OTLP exporter: {err}, logging to stdout only");
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();
            return None;
        }
    };

    let otel_layer =
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    tracing::info!(endpoint, service_name=%config.service_name, "OTLP tracing enabled");
    Some(provider)
}

fn build_provider(
    service_name: &str,
    endpoint: &str,
    token: Option<&str>,
) -> Result<TracerProvider, opentelemetry::trace::TraceError> {
    let mut headers = std::collections::HashMap::new();
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        headers.insert("Authorization".to_string(), format!("Bearer {token}"));
    }

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .with_headers(headers)
        .build()?;

    Ok(TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_resource(Resource::new([KeyValue::new(
            "service.name",
            service_name.to_string(),
        )]))
        .build())
}
