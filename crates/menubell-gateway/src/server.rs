//! HTTP server implementation using Axum.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use menubell_core::config::MenubellConfig;
use menubell_core::{MenubellError, MessageSender, Result};
use menubell_store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub config: MenubellConfig,
    pub store: Arc<Store>,
    pub sender: Arc<dyn MessageSender>,
    pub shutdown: Arc<AtomicBool>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        config: MenubellConfig,
        store: Arc<Store>,
        sender: Arc<dyn MessageSender>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            store,
            sender,
            shutdown,
            start_time: std::time::Instant::now(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let shared = Arc::new(state);

    Router::new()
        .route("/api/v1/health", get(super::routes::health_check))
        .route("/api/v1/whatsapp/webhook", get(super::routes::webhook_verify))
        .route("/api/v1/whatsapp/webhook", post(super::routes::webhook_receive))
        .route("/api/v1/triggers/{id}/run", post(super::routes::run_trigger))
        .route(
            "/api/v1/reminders/check-pending",
            post(super::routes::check_pending),
        )
        .route(
            "/api/v1/conversations/{phone}/window",
            get(super::routes::conversation_window),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: AppState) -> Result<()> {
    let addr = format!("{}:{}", state.config.gateway.host, state.config.gateway.port);
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| MenubellError::Config(format!("Gateway bind {addr}: {e}")))?;
    tracing::info!("🌐 Gateway listening on http://{addr}");

    axum::serve(listener, router)
        .await
        .map_err(|e| MenubellError::Config(format!("Gateway serve: {e}")))?;
    Ok(())
}
