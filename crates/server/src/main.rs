use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use ie_domain::config::{Config, ObservabilityConfig};
use ie_server::{api, bootstrap};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("CONFIG_PATH").ok().map(std::path::PathBuf::from);
    let config = Arc::new(Config::load(config_path.as_deref()).context("loading configuration")?);

    init_tracing(&config.observability);
    tracing::info!("issue execution engine starting");

    let state = bootstrap::build_app_state(config.clone())?;
    bootstrap::spawn_background_tasks(&state);

    let cors_layer = build_cors_layer(&config.server.cors);
    let app = api::router(state.clone()).layer(cors_layer);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "issue execution engine listening");

    let shutdown_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received, cancelling all active executions");
            shutdown_state.orchestrator.cancel_all().await;
        })
        .await
        .context("axum server error")?;

    Ok(())
}

/// Initialize structured JSON tracing, `LOG_LEVEL`-driven, matching the
/// teacher's `init_tracing`. When `observability.otlp_endpoint` is set, every
/// span is additionally exported over OTLP/gRPC; otherwise the server
/// behaves exactly as if the OTel dependencies weren't linked in at all.
fn init_tracing(observability: &ObservabilityConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},ie_server=debug", observability.log_level)));
    let fmt_layer = tracing_subscriber::fmt::layer().json();

    match build_otel_layer(observability) {
        Some(otel_layer) => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .init(),
        None => tracing_subscriber::registry().with(env_filter).with(fmt_layer).init(),
    }
}

/// Builds the `tracing_opentelemetry` layer when an OTLP collector is
/// configured. Export failures during exporter construction just disable
/// tracing export for this run rather than aborting startup.
fn build_otel_layer(
    observability: &ObservabilityConfig,
) -> Option<tracing_opentelemetry::OpenTelemetryLayer<tracing_subscriber::Registry, opentelemetry_sdk::trace::Tracer>> {
    let endpoint = observability.otlp_endpoint.as_ref()?;

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            eprintln!("failed to build OTLP span exporter for {endpoint}: {e}");
            return None;
        }
    };

    let resource = Resource::builder().with_service_name(observability.service_name.clone()).build();

    let provider = SdkTracerProvider::builder()
        .with_sampler(Sampler::TraceIdRatioBased(observability.sample_rate))
        .with_resource(resource)
        .with_batch_exporter(exporter)
        .build();

    let tracer = provider.tracer(observability.service_name.clone());
    opentelemetry::global::set_tracer_provider(provider);

    Some(tracing_opentelemetry::layer().with_tracer(tracer))
}

/// Build a [`CorsLayer`] from the configured allowed origins. Origins may
/// carry a trailing `:*` wildcard for the port segment; a literal `"*"`
/// allows everything (not recommended for production).
fn build_cors_layer(cors: &ie_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if let Some(prefix) = origin.strip_suffix('*') {
            wildcard_prefixes.push(prefix.to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
