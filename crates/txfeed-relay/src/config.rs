//! Relay configuration.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::event::TX_CREATED_CHANNEL;

/// Default table holding transactions.
pub const DEFAULT_TABLE: &str = "txs";

/// Default key column carried in the notification payload.
pub const DEFAULT_KEY_COLUMN: &str = "hash";

/// Default number of frames queued per client before frames are dropped.
pub const DEFAULT_CLIENT_BUFFER: usize = 256;

/// Default number of notifications buffered between listener and dispatcher.
pub const DEFAULT_NOTIFICATION_BUFFER: usize = 1024;

/// Default delay before the listener retries after a receive error.
pub const DEFAULT_LISTENER_RETRY_BACKOFF_MS: u64 = 1000;

/// Maps a notification channel to the row its payload identifies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBinding {
    /// Notification channel name.
    pub channel: String,
    /// Table the record lives in.
    pub table: String,
    /// Column the payload is matched against.
    pub key_column: String,
}

impl ChannelBinding {
    /// Create a binding.
    pub fn new(
        channel: impl Into<String>,
        table: impl Into<String>,
        key_column: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            table: table.into(),
            key_column: key_column.into(),
        }
    }

    /// Reject names that cannot be safely embedded as quoted identifiers.
    pub fn validate(&self) -> Result<()> {
        for (what, name) in [
            ("channel", &self.channel),
            ("table", &self.table),
            ("key column", &self.key_column),
        ] {
            if !is_identifier(name) {
                return Err(Error::Config(format!("invalid {what} name: {name:?}")));
            }
        }
        Ok(())
    }
}

impl Default for ChannelBinding {
    fn default() -> Self {
        Self::new(TX_CREATED_CHANNEL, DEFAULT_TABLE, DEFAULT_KEY_COLUMN)
    }
}

/// Letters, digits and underscores, not starting with a digit, at most 63 bytes.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Channels to listen on and how to resolve their payloads.
    pub bindings: Vec<ChannelBinding>,

    /// Frames queued per client before further frames are dropped.
    pub client_buffer: usize,

    /// Notifications buffered between the listener and the dispatcher.
    pub notification_buffer: usize,

    /// Delay before the listener retries after a receive error.
    pub listener_retry_backoff: Duration,

    /// Remove connections found closed during a broadcast pass.
    pub prune_closed: bool,
}

impl RelayConfig {
    /// Create a configuration with no bindings.
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            client_buffer: DEFAULT_CLIENT_BUFFER,
            notification_buffer: DEFAULT_NOTIFICATION_BUFFER,
            listener_retry_backoff: Duration::from_millis(DEFAULT_LISTENER_RETRY_BACKOFF_MS),
            prune_closed: true,
        }
    }

    /// Add a channel binding.
    pub fn with_binding(mut self, binding: ChannelBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Set the per-client queue size.
    pub fn with_client_buffer(mut self, size: usize) -> Self {
        self.client_buffer = size;
        self
    }

    /// Set the listener-to-dispatcher buffer size.
    pub fn with_notification_buffer(mut self, size: usize) -> Self {
        self.notification_buffer = size;
        self
    }

    /// Set the listener retry backoff.
    pub fn with_listener_retry_backoff(mut self, backoff: Duration) -> Self {
        self.listener_retry_backoff = backoff;
        self
    }

    /// Keep closed connections in the registry after broadcast passes.
    pub fn without_pruning(mut self) -> Self {
        self.prune_closed = false;
        self
    }

    /// Channel names of every binding.
    pub fn channels(&self) -> Vec<String> {
        self.bindings.iter().map(|b| b.channel.clone()).collect()
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.bindings.is_empty() {
            return Err(Error::Config("at least one channel binding is required".into()));
        }
        if self.client_buffer == 0 {
            return Err(Error::Config("client buffer must be non-zero".into()));
        }
        if self.notification_buffer == 0 {
            return Err(Error::Config("notification buffer must be non-zero".into()));
        }
        for binding in &self.bindings {
            binding.validate()?;
        }
        Ok(())
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::new().with_binding(ChannelBinding::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.bindings, vec![ChannelBinding::new("txCreated", "txs", "hash")]);
        assert_eq!(config.client_buffer, DEFAULT_CLIENT_BUFFER);
        assert!(config.prune_closed);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = RelayConfig::new()
            .with_binding(ChannelBinding::new("blockCreated", "blocks", "hash"))
            .with_client_buffer(8)
            .with_notification_buffer(16)
            .with_listener_retry_backoff(Duration::from_millis(50))
            .without_pruning();

        assert_eq!(config.channels(), vec!["blockCreated".to_string()]);
        assert_eq!(config.client_buffer, 8);
        assert_eq!(config.notification_buffer, 16);
        assert_eq!(config.listener_retry_backoff, Duration::from_millis(50));
        assert!(!config.prune_closed);
    }

    #[test]
    fn test_validate_rejects_empty_bindings() {
        assert!(RelayConfig::new().validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_buffers() {
        assert!(RelayConfig::default().with_client_buffer(0).validate().is_err());
        assert!(RelayConfig::default().with_notification_buffer(0).validate().is_err());
    }

    #[test]
    fn test_binding_identifiers() {
        assert!(ChannelBinding::new("txCreated", "txs", "hash").validate().is_ok());
        assert!(ChannelBinding::new("_tx2", "tx_log", "id").validate().is_ok());
        assert!(ChannelBinding::new("tx\"; DROP", "txs", "hash").validate().is_err());
        assert!(ChannelBinding::new("txCreated", "1txs", "hash").validate().is_err());
        assert!(ChannelBinding::new("txCreated", "txs", "").validate().is_err());
    }
}
