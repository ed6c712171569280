//! PostgreSQL `LISTEN` session feeding the dispatcher.

use std::time::Duration;

use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::dispatcher::NotificationSender;
use crate::error::Result;
use crate::event::RawNotification;

/// Owns the single subscription to the store's notification stream.
pub struct NotificationListener {
    listener: PgListener,
    channels: Vec<String>,
    retry_backoff: Duration,
}

impl NotificationListener {
    /// Open a dedicated connection and `LISTEN` on every channel.
    pub async fn connect(
        pool: &PgPool,
        channels: &[String],
        retry_backoff: Duration,
    ) -> Result<Self> {
        let mut listener = PgListener::connect_with(pool).await?;
        listener
            .listen_all(channels.iter().map(String::as_str))
            .await?;

        info!(channels = ?channels, "listening for notifications");

        Ok(Self {
            listener,
            channels: channels.to_vec(),
            retry_backoff,
        })
    }

    /// Channels this listener is subscribed to.
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Forward notifications to `tx` until the dispatcher goes away.
    ///
    /// The underlying listener reconnects and re-subscribes on its own after
    /// a dropped connection; notifications sent while disconnected are lost.
    pub async fn run(mut self, tx: NotificationSender) {
        loop {
            match self.listener.recv().await {
                Ok(notification) => {
                    let raw = RawNotification::from(&notification);
                    debug!(channel = %raw.channel, payload = %raw.payload, "notification received");

                    if tx.send(raw).await.is_err() {
                        info!("dispatcher closed, stopping notification listener");
                        return;
                    }
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_in_ms = self.retry_backoff.as_millis() as u64,
                        "notification listener error"
                    );
                    if tx.is_closed() {
                        return;
                    }
                    tokio::time::sleep(self.retry_backoff).await;
                }
            }
        }
    }
}
