//! txfeed relay.
//!
//! This crate relays PostgreSQL change notifications to live streaming
//! clients: a listener owns the `LISTEN` session, a dispatcher resolves each
//! notification to its full row, and a broadcaster fans the row out to every
//! connection in the registry.

pub mod bootstrap;
pub mod broadcaster;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod listener;
pub mod metrics;
pub mod registry;
pub mod resolver;

pub use bootstrap::install_triggers;
pub use broadcaster::{BroadcastReport, Broadcaster, OutboundMessage};
pub use config::{ChannelBinding, RelayConfig};
pub use dispatcher::{
    start_dispatcher, DispatchOutcome, DispatcherHandle, DispatcherState, NotificationDispatcher,
};
pub use error::{Error, Result, SendError};
pub use event::{ChangeEvent, RawNotification, TX_CREATED_CHANNEL};
pub use listener::NotificationListener;
pub use metrics::{new_shared_metrics, MetricsSnapshot, RelayMetrics, SharedRelayMetrics};
pub use registry::{
    ChannelConnection, ConnectionHandle, ConnectionId, ConnectionRegistry, Frame,
    SharedConnectionRegistry,
};
pub use resolver::{PgRecordResolver, Record, RecordResolver, Resolution};

use std::sync::Arc;

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// A wired relay: registry, metrics and the running dispatcher.
pub struct Relay {
    /// Registry connections are added to.
    pub registry: SharedConnectionRegistry,
    /// Relay counters.
    pub metrics: SharedRelayMetrics,
    /// Handle to the dispatcher task.
    pub dispatcher: DispatcherHandle,
    listener: Option<JoinHandle<()>>,
}

impl Relay {
    /// Start a relay around an existing resolver, without a listener.
    pub fn start(
        config: &RelayConfig,
        registry: SharedConnectionRegistry,
        resolver: Arc<dyn RecordResolver>,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = new_shared_metrics();
        let broadcaster = Broadcaster::new(registry.clone(), metrics.clone())
            .with_prune_closed(config.prune_closed);
        let dispatcher = NotificationDispatcher::new(resolver, broadcaster, metrics.clone());
        let dispatcher = start_dispatcher(dispatcher, config.notification_buffer);

        Ok(Self {
            registry,
            metrics,
            dispatcher,
            listener: None,
        })
    }

    /// Start a relay backed by PostgreSQL and spawn its listener.
    pub async fn start_postgres(
        config: &RelayConfig,
        registry: SharedConnectionRegistry,
        pool: PgPool,
    ) -> Result<Self> {
        config.validate()?;

        let resolver = Arc::new(PgRecordResolver::new(pool.clone(), &config.bindings)?);
        let listener = NotificationListener::connect(
            &pool,
            &config.channels(),
            config.listener_retry_backoff,
        )
        .await?;

        let mut relay = Self::start(config, registry, resolver)?;
        let tx = relay.dispatcher.sender();
        relay.listener = Some(tokio::spawn(async move {
            listener.run(tx).await;
            warn!("notification listener stopped");
        }));

        Ok(relay)
    }

    /// Take the listener task, if this relay spawned one.
    ///
    /// The task only finishes once the dispatcher is gone, so callers can
    /// select on it to notice the relay stopping.
    pub fn take_listener(&mut self) -> Option<JoinHandle<()>> {
        self.listener.take()
    }

    /// Stop the listener and drain the dispatcher.
    pub async fn shutdown(mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
            if let Err(e) = listener.await {
                if e.is_panic() {
                    error!(error = %e, "notification listener panicked");
                }
            }
        }
        self.dispatcher.shutdown().await;
    }
}
