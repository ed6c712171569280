//! txfeed server.
//!
//! This crate serves the relay over HTTP:
//! - `/ws` streams every newly created transaction as a JSON message
//! - `/health` reports connection and relay counters
//! - `/metrics` exports the counters in Prometheus format

pub mod config;
pub mod error;
pub mod routes;
pub mod server;
pub mod state;
pub mod ws;

pub use config::{Args, ServerConfig};
pub use error::ServerError;
pub use server::{run, run_until_shutdown, shutdown_signal};

use axum::{http::HeaderValue, routing::get, Router};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::error::Result;
use crate::state::AppState;

/// Build the CORS layer. An empty allow-list permits any origin.
pub fn cors_layer(origins: &[String]) -> Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return Ok(layer.allow_origin(Any));
    }

    let origins = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin)
                .map_err(|_| ServerError::Config(format!("invalid CORS origin: {origin}")))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(layer.allow_origin(AllowOrigin::list(origins)))
}

/// Create the Axum router with all routes
pub fn create_router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        // Health check and metrics
        .merge(routes::health::routes())
        .merge(routes::metrics::routes())
        // WebSocket change feed
        .route("/ws", get(ws::ws_feed))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
