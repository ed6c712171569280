//! Server error types.

use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Relay error.
    #[error("relay error: {0}")]
    Relay(#[from] txfeed_relay::Error),

    /// Database connection error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The notification listener exited while the server was running.
    #[error("notification listener stopped")]
    ListenerStopped,
}

pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn fail_io() -> Result<()> {
        Err(std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"))?;
        Ok(())
    }

    fn fail_db() -> Result<()> {
        Err(sqlx::Error::PoolTimedOut)?;
        Ok(())
    }

    #[test]
    fn test_startup_errors_convert() {
        assert!(matches!(fail_io(), Err(ServerError::Io(_))));
        assert!(matches!(fail_db(), Err(ServerError::Database(_))));
        assert_eq!(
            ServerError::ListenerStopped.to_string(),
            "notification listener stopped"
        );
    }
}
