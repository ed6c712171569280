//! Server configuration.

use std::time::Duration;

use clap::Parser;
use txfeed_relay::config::{
    DEFAULT_CLIENT_BUFFER, DEFAULT_KEY_COLUMN, DEFAULT_LISTENER_RETRY_BACKOFF_MS,
    DEFAULT_NOTIFICATION_BUFFER, DEFAULT_TABLE,
};
use txfeed_relay::{ChannelBinding, RelayConfig, TX_CREATED_CHANNEL};

/// Default HTTP listen address.
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:8080";

/// Default database pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// txfeed server command line arguments.
#[derive(Debug, Parser)]
#[command(name = "txfeed-server")]
#[command(
    version,
    about = "Streams newly created transactions to WebSocket clients",
    long_about = None
)]
pub struct Args {
    /// Address to listen on for HTTP and WebSocket connections.
    #[arg(short, long, env = "TXFEED_LISTEN", default_value = DEFAULT_LISTEN_ADDRESS)]
    pub listen: String,

    /// PostgreSQL connection URL.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Maximum number of pooled database connections.
    #[arg(long, env = "TXFEED_MAX_CONNECTIONS", default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: u32,

    /// Notification channel to listen on.
    #[arg(long, env = "TXFEED_CHANNEL", default_value = TX_CREATED_CHANNEL)]
    pub channel: String,

    /// Table holding the records announced on the channel.
    #[arg(long, env = "TXFEED_TABLE", default_value = DEFAULT_TABLE)]
    pub table: String,

    /// Column matched against the notification payload.
    #[arg(long, env = "TXFEED_KEY_COLUMN", default_value = DEFAULT_KEY_COLUMN)]
    pub key_column: String,

    /// Messages queued per client before further messages are dropped.
    #[arg(long, env = "TXFEED_CLIENT_BUFFER", default_value_t = DEFAULT_CLIENT_BUFFER)]
    pub client_buffer: usize,

    /// Notifications buffered between the listener and the dispatcher.
    #[arg(long, env = "TXFEED_NOTIFICATION_BUFFER", default_value_t = DEFAULT_NOTIFICATION_BUFFER)]
    pub notification_buffer: usize,

    /// Delay (ms) before the listener retries after an error.
    #[arg(
        long,
        env = "TXFEED_RETRY_BACKOFF_MS",
        default_value_t = DEFAULT_LISTENER_RETRY_BACKOFF_MS
    )]
    pub retry_backoff_ms: u64,

    /// Drop and recreate the notification trigger at startup.
    #[arg(long, env = "TXFEED_INSTALL_TRIGGER")]
    pub install_trigger: bool,

    /// Allowed CORS origin (repeatable). Any origin is allowed when unset.
    #[arg(long = "cors-origin", env = "TXFEED_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "TXFEED_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on.
    pub listen_addr: String,
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Maximum number of pooled database connections.
    pub max_connections: u32,
    /// Install the notification trigger at startup.
    pub install_trigger: bool,
    /// Allowed CORS origins; empty allows any.
    pub cors_origins: Vec<String>,
    /// Relay settings.
    pub relay: RelayConfig,
}

impl ServerConfig {
    /// Create a configuration with default relay settings.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDRESS.to_string(),
            database_url: database_url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            install_trigger: false,
            cors_origins: Vec::new(),
            relay: RelayConfig::default(),
        }
    }

    /// Set the listen address.
    pub fn with_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    /// Allow a CORS origin.
    pub fn with_cors_origin(mut self, origin: impl Into<String>) -> Self {
        self.cors_origins.push(origin.into());
        self
    }

    /// Replace the relay settings.
    pub fn with_relay(mut self, relay: RelayConfig) -> Self {
        self.relay = relay;
        self
    }

    /// Whether CORS is limited to an allow-list.
    pub fn has_cors_allow_list(&self) -> bool {
        !self.cors_origins.is_empty()
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        let relay = RelayConfig::new()
            .with_binding(ChannelBinding::new(args.channel, args.table, args.key_column))
            .with_client_buffer(args.client_buffer)
            .with_notification_buffer(args.notification_buffer)
            .with_listener_retry_backoff(Duration::from_millis(args.retry_backoff_ms));

        Self {
            listen_addr: args.listen,
            database_url: args.database_url,
            max_connections: args.max_connections.max(1),
            install_trigger: args.install_trigger,
            cors_origins: args.cors_origins,
            relay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from([
            "txfeed-server",
            "--database-url",
            "postgres://localhost/txfeed",
        ])
        .unwrap();
        let config = ServerConfig::from(args);

        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDRESS);
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert!(!config.install_trigger);
        assert!(!config.has_cors_allow_list());
        assert_eq!(config.relay.bindings, vec![ChannelBinding::default()]);
        assert!(config.relay.validate().is_ok());
    }

    #[test]
    fn test_args_overrides() {
        let args = Args::try_parse_from([
            "txfeed-server",
            "--database-url",
            "postgres://localhost/txfeed",
            "--listen",
            "127.0.0.1:9090",
            "--channel",
            "blockCreated",
            "--table",
            "blocks",
            "--client-buffer",
            "32",
            "--retry-backoff-ms",
            "250",
            "--install-trigger",
            "--cors-origin",
            "https://a.example,https://b.example",
        ])
        .unwrap();
        let config = ServerConfig::from(args);

        assert_eq!(config.listen_addr, "127.0.0.1:9090");
        assert!(config.install_trigger);
        assert_eq!(config.cors_origins.len(), 2);
        assert_eq!(
            config.relay.bindings,
            vec![ChannelBinding::new("blockCreated", "blocks", "hash")]
        );
        assert_eq!(config.relay.client_buffer, 32);
        assert_eq!(config.relay.listener_retry_backoff, Duration::from_millis(250));
    }

    #[test]
    fn test_config_builder() {
        let config = ServerConfig::new("postgres://localhost/txfeed")
            .with_listen_addr("127.0.0.1:0")
            .with_cors_origin("https://wallet.example")
            .with_relay(RelayConfig::default().with_client_buffer(4));

        assert_eq!(config.listen_addr, "127.0.0.1:0");
        assert!(config.has_cors_allow_list());
        assert_eq!(config.relay.client_buffer, 4);
    }
}
