//! Router setup and server startup.
//!
//! Assembles the axum Router with tracing and body limits. The server
//! binds loopback-only unless the configuration explicitly overrides the
//! bind address, in which case it logs the override loudly.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use vigil_core::config::VigilConfig;
use vigil_core::error::VigilError;

use crate::handlers;
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/snapshot", get(handlers::snapshot))
        .route("/stream", get(handlers::stream))
        .route("/events", get(handlers::events))
        .route("/intents", get(handlers::list_intents))
        .route("/intent/{name}", post(handlers::post_intent))
        .route("/gates", get(handlers::list_gates))
        .route("/gates/approve_all", post(handlers::approve_all_gates))
        .route("/gates/{id}/approve", post(handlers::approve_gate))
        .route("/gates/{id}/deny", post(handlers::deny_gate))
        .route("/kill", get(handlers::kill_state))
        .route("/kill/trigger", post(handlers::kill_trigger))
        .route("/kill/reset", post(handlers::kill_reset))
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP control server on the configured address.
pub async fn start_server(config: &VigilConfig, state: AppState) -> Result<(), VigilError> {
    let addr = format!("{}:{}", config.server.bind, config.server.port);

    if !config.server.is_loopback() {
        warn!(
            bind = %config.server.bind,
            "Binding to a NON-LOOPBACK address: the control surface will be reachable from the network"
        );
    }

    let router = create_router(state);

    info!("Control server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| VigilError::Api(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, router)
        .await
        .map_err(|e| VigilError::Api(format!("Server error: {}", e)))?;

    Ok(())
}
