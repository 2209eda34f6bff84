//! HTTP server implementation using Axum.

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    routing::get,
};
use capsule_core::config::GatewayConfig;
use capsule_scheduler::CapsuleService;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub service: CapsuleService,
    pub gateway_config: GatewayConfig,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(service: CapsuleService, gateway_config: GatewayConfig) -> Self {
        Self {
            service,
            gateway_config,
            start_time: std::time::Instant::now(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    let shared = Arc::new(state);

    Router::new()
        .route("/health", get(super::routes::health_check))
        .route(
            "/api/capsules",
            get(super::routes::list_capsules).post(super::routes::create_capsule),
        )
        .route(
            "/api/capsules/{id}",
            get(super::routes::get_capsule).delete(super::routes::delete_capsule),
        )
        .route(
            "/api/capsules/{id}/attachment",
            get(super::routes::download_attachment),
        )
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer({
            let cors = CorsLayer::new()
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(Any)
                .max_age(std::time::Duration::from_secs(3600));

            // Example: CAPSULE_CORS_ORIGINS=https://capsule.example.com
            if let Ok(origins_str) = std::env::var("CAPSULE_CORS_ORIGINS") {
                let origins: Vec<_> = origins_str
                    .split(',')
                    .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
                    .collect();
                cors.allow_origin(origins)
            } else {
                cors.allow_origin(Any)
            }
        })
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Start the HTTP server and run until `shutdown` resolves.
pub async fn serve<F>(state: AppState, max_upload_bytes: usize, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", state.gateway_config.host, state.gateway_config.port);
    let router = build_router(state, max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Capsule API listening on http://{addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
