use txfeed_relay::{SharedConnectionRegistry, SharedRelayMetrics};

/// Application state shared across all routes
#[derive(Clone)]
pub struct AppState {
    pub registry: SharedConnectionRegistry,
    pub metrics: SharedRelayMetrics,
    /// Frames queued per client before further frames are dropped
    pub client_buffer: usize,
}

impl AppState {
    pub fn new(
        registry: SharedConnectionRegistry,
        metrics: SharedRelayMetrics,
        client_buffer: usize,
    ) -> Self {
        Self {
            registry,
            metrics,
            client_buffer,
        }
    }
}
