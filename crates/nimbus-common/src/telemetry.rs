use std::collections::HashMap;

use opentelemetry::trace::{TraceError, TracerProvider as TracerProviderTrait};
use opentelemetry::KeyValue;
use opentelemetry_otlp::{WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Used when `RUST_LOG` is unset. Cluster client internals log every request
/// at debug and every connection at info, which drowns the deploy phases.
pub const DEFAULT_FILTER: &str =
    "info,kube=warn,kube_client=warn,hyper=warn,hyper_util=warn,reqwest=warn,tower=warn";

/// Where spans go besides stderr.
#[derive(Debug, Clone, Default)]
pub struct OtlpExport {
    /// OTLP/HTTP base URL; the exporter appends `/v1/traces`.
    pub endpoint: String,
    pub token: Option<String>,
}

/// Install the global subscriber for one CLI invocation.
///
/// Logs go to stderr so the summary line on stdout stays machine-readable.
/// `command` is recorded on every exported span so deploy and teardown runs
/// can be told apart. When an exporter is built, the returned provider must
/// be shut down before exit to flush pending spans.
pub fn init_tracing(
    service_name: &str,
    command: &str,
    otlp: Option<&OtlpExport>,
) -> Option<TracerProvider> {
    let provider = otlp.and_then(|export| match otlp_provider(service_name, command, export) {
        Ok(p) => Some(p),
        Err(err) => {
            eprintln!("failed to create OTLP exporter: {err}, logging to stderr only");
            None
        }
    });

    let otel_layer = provider.as_ref().map(|p| {
        tracing_opentelemetry::layer().with_tracer(p.tracer(service_name.to_string()))
    });

    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(otel_layer)
        .init();

    if let Some(export) = otlp.filter(|_| provider.is_some()) {
        tracing::info!(endpoint = %export.endpoint, command, "OTLP tracing enabled");
    }
    provider
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

pub fn resource(service_name: &str, command: &str) -> Resource {
    Resource::new([
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        KeyValue::new("nimbus.command", command.to_string()),
    ])
}

fn otlp_provider(
    service_name: &str,
    command: &str,
    export: &OtlpExport,
) -> Result<TracerProvider, TraceError> {
    let mut headers = HashMap::new();
    if let Some(token) = export.token.as_deref().filter(|t| !t.is_empty()) {
        headers.insert("Authorization".to_string(), format!("Bearer {token}"));
    }

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(export.endpoint.as_str())
        .with_headers(headers)
        .build()?;

    Ok(TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_resource(resource(service_name, command))
        .build())
}
