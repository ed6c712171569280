//! Fan-out of resolved records to every registered connection.

use serde::Serialize;

use crate::error::Result;
use crate::metrics::SharedRelayMetrics;
use crate::registry::{ConnectionId, Frame, SharedConnectionRegistry};
use crate::resolver::Record;

/// The message delivered to clients, one per resolved event.
#[derive(Debug, Serialize)]
pub struct OutboundMessage<'a> {
    /// Channel the event arrived on.
    pub channel: &'a str,
    /// The full record.
    pub data: &'a Record,
}

impl OutboundMessage<'_> {
    /// Serialize to the wire format.
    pub fn to_frame(&self) -> Result<Frame> {
        Ok(Frame::from(serde_json::to_string(self)?))
    }
}

/// Result of one broadcast pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the frame was queued to.
    pub delivered: usize,
    /// Connections skipped because they were closed.
    pub skipped: usize,
    /// Open connections that refused the frame.
    pub failed: usize,
}

/// Pushes one serialized message to every open connection.
pub struct Broadcaster {
    registry: SharedConnectionRegistry,
    metrics: SharedRelayMetrics,
    prune_closed: bool,
}

impl Broadcaster {
    /// Create a broadcaster over `registry`.
    pub fn new(registry: SharedConnectionRegistry, metrics: SharedRelayMetrics) -> Self {
        Self {
            registry,
            metrics,
            prune_closed: true,
        }
    }

    /// Choose whether connections found closed are removed after a pass.
    pub fn with_prune_closed(mut self, prune: bool) -> Self {
        self.prune_closed = prune;
        self
    }

    /// The registry this broadcaster delivers to.
    pub fn registry(&self) -> &SharedConnectionRegistry {
        &self.registry
    }

    /// Deliver `record` on `channel` to every open connection.
    ///
    /// Only serialization can fail. Per-connection failures are counted in
    /// the report and never stop the pass.
    pub fn broadcast(&self, channel: &str, record: &Record) -> Result<BroadcastReport> {
        let frame = OutboundMessage {
            channel,
            data: record,
        }
        .to_frame()?;

        let mut report = BroadcastReport::default();
        let mut closed: Vec<ConnectionId> = Vec::new();

        self.registry.for_each(|connection| {
            if !connection.handle.is_open() {
                report.skipped += 1;
                closed.push(connection.id);
                return;
            }

            match connection.handle.send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::debug!(
                        connection_id = %connection.id,
                        error = %e,
                        "dropping frame for connection"
                    );
                }
            }
        });

        if self.prune_closed && !closed.is_empty() {
            let removed = self.registry.remove_all(&closed);
            self.metrics.record_pruned(removed as u64);
            tracing::debug!(removed, "pruned closed connections");
        }

        self.metrics.record_broadcast(
            report.delivered as u64,
            report.skipped as u64,
            report.failed as u64,
        );

        Ok(report)
    }
}
