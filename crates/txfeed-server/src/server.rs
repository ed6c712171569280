//! Server startup and lifecycle.

use std::future::{Future, IntoFuture};
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use txfeed_relay::{install_triggers, ConnectionRegistry, Relay};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::state::AppState;
use crate::{cors_layer, create_router};

/// Run the server until Ctrl+C.
pub async fn run(config: ServerConfig) -> Result<()> {
    run_until_shutdown(config, shutdown_signal()).await
}

/// Run the server until `shutdown` completes.
///
/// Returns [`ServerError::ListenerStopped`] if the notification listener
/// exits while the server is still serving.
pub async fn run_until_shutdown<F>(config: ServerConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    // Reject bad settings before touching the network
    config.relay.validate()?;
    let cors = cors_layer(&config.cors_origins)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listen_addr,
        channels = ?config.relay.channels(),
        "starting txfeed server"
    );

    // Connect to PostgreSQL
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;
    tracing::info!(max_connections = config.max_connections, "connected to database");

    if config.install_trigger {
        install_triggers(&pool, &config.relay.bindings).await?;
    }

    // Start the relay
    let registry = Arc::new(ConnectionRegistry::new());
    let mut relay = Relay::start_postgres(&config.relay, registry.clone(), pool).await?;
    let listener_task = relay.take_listener();
    let listener_abort = listener_task.as_ref().map(JoinHandle::abort_handle);

    // Create router
    let state = AppState::new(registry, relay.metrics.clone(), config.relay.client_buffer);
    let app = create_router(state, cors);

    // Bind to address
    let listener = TcpListener::bind(&config.listen_addr).await?;
    tracing::info!("txfeed server listening on {}", config.listen_addr);
    tracing::info!("WebSocket feed at ws://{}/ws", config.listen_addr);

    let serve = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .into_future();

    tokio::select! {
        result = serve => result?,
        _ = listener_exit(listener_task) => {
            tracing::error!("notification listener stopped, shutting down");
            return Err(ServerError::ListenerStopped);
        }
    }

    // The listener holds a dispatcher sender; stop it so the drain completes
    if let Some(listener) = listener_abort {
        listener.abort();
    }
    relay.shutdown().await;
    tracing::info!("server shutdown complete");
    Ok(())
}

async fn listener_exit(task: Option<JoinHandle<()>>) {
    match task {
        Some(task) => {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "notification listener task failed");
            }
        }
        None => std::future::pending().await,
    }
}

/// Resolve on Ctrl+C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl+c");
        std::future::pending::<()>().await;
    }
    tracing::info!("received shutdown signal");
}

#[cfg(test)]
mod tests {
    use super::*;
    use txfeed_relay::{ChannelBinding, RelayConfig};

    // Nothing listens on this address; startup must fail before using it.
    const UNREACHABLE_DB: &str = "postgres://127.0.0.1:1/txfeed";

    #[tokio::test]
    async fn test_invalid_binding_fails_before_connecting() {
        let relay = RelayConfig::new().with_binding(ChannelBinding::new("tx'; --", "txs", "hash"));
        let config = ServerConfig::new(UNREACHABLE_DB).with_relay(relay);

        let err = run_until_shutdown(config, async {}).await.unwrap_err();
        assert!(matches!(err, ServerError::Relay(txfeed_relay::Error::Config(_))));
    }

    #[tokio::test]
    async fn test_invalid_cors_origin_fails_before_connecting() {
        let config = ServerConfig::new(UNREACHABLE_DB).with_cors_origin("bad\norigin");

        let err = run_until_shutdown(config, async {}).await.unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }
}
