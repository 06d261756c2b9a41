use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use job_relay::app_state::AppState;
use job_relay::config::AppConfig;
use job_relay::models::job::JobKind;
use job_relay::routes;
use job_relay::services::{
    backend::{BackendSet, ComfyUiBackend, JobBackend, WebhookBackend},
    coordinator::JobCoordinator,
    media::{HttpMediaSource, MediaFetcher},
    results::ResultStore,
};

const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");
    let endpoints = config.endpoints().expect("Invalid backend endpoint configuration");
    let engine_config = config.engine_config().expect("Invalid engine configuration");

    tracing::info!("Initializing job relay");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    let http = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()
        .expect("Failed to build HTTP client");

    tracing::info!(url = %endpoints.comfyui, "Using ComfyUI backend for generation jobs");
    let comfyui: Arc<dyn JobBackend> = Arc::new(
        ComfyUiBackend::new(http.clone(), endpoints.comfyui.clone())
            .expect("Failed to initialize ComfyUI backend"),
    );

    tracing::info!(url = %endpoints.analysis_submit, "Using webhook backend for prompt analysis");
    let analysis: Arc<dyn JobBackend> = Arc::new(WebhookBackend::new(
        http.clone(),
        endpoints.analysis_submit.clone(),
        endpoints.analysis_poll.clone(),
    ));

    let backends = BackendSet::new()
        .with(JobKind::ImageGeneration, comfyui.clone())
        .with(JobKind::VideoGeneration, comfyui)
        .with(JobKind::PromptAnalysis, analysis);

    let results = Arc::new(ResultStore::new(config.result_retention));
    let engine = JobCoordinator::new(backends, engine_config).with_result_sink(results.clone());
    let media = MediaFetcher::new(Arc::new(HttpMediaSource::new(http)), config.retry_policy());
    let state = AppState::new(engine, results, media);
    let engine = state.engine.clone();

    let app = routes::api_router(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(RequestBodyLimitLayer::new(MAX_UPLOAD_BYTES));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Job relay listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    let stopped = engine.shutdown();
    tracing::info!(stopped, "Job relay stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
