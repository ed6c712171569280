//! Registry of live streaming connections.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::error::SendError;

/// A serialized outbound message, shared by every recipient of a broadcast.
pub type Frame = Arc<str>;

/// A single client's streaming connection.
///
/// `send` must not block: implementations queue the frame and return.
pub trait ConnectionHandle: Send + Sync {
    /// Whether the connection can still accept frames.
    fn is_open(&self) -> bool;

    /// Queue a frame for delivery.
    fn send(&self, frame: Frame) -> Result<(), SendError>;
}

/// Identifier assigned to a connection on registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Raw numeric value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered connection.
#[derive(Clone)]
pub struct RegisteredConnection {
    /// Registry-assigned identifier.
    pub id: ConnectionId,
    /// The connection handle.
    pub handle: Arc<dyn ConnectionHandle>,
}

/// Holds every live connection in insertion order.
///
/// Membership only grows through [`register`](Self::register). Broadcast
/// passes iterate over a snapshot, so no lock is held while frames are
/// queued and concurrent registration is never blocked by a broadcast.
pub struct ConnectionRegistry {
    connections: RwLock<Vec<RegisteredConnection>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a newly accepted connection.
    pub fn register(&self, handle: Arc<dyn ConnectionHandle>) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.connections
            .write()
            .push(RegisteredConnection { id, handle });

        tracing::debug!(connection_id = %id, "connection registered");
        id
    }

    /// Snapshot of the current membership.
    pub fn snapshot(&self) -> Vec<RegisteredConnection> {
        self.connections.read().clone()
    }

    /// Visit every registered connection, in insertion order.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&RegisteredConnection),
    {
        for connection in self.snapshot().iter() {
            visit(connection);
        }
    }

    /// Remove a connection. Returns whether it was present.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.write();
        let before = connections.len();
        connections.retain(|c| c.id != id);
        before != connections.len()
    }

    /// Remove every connection in `ids`. Returns how many were present.
    pub fn remove_all(&self, ids: &[ConnectionId]) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let mut connections = self.connections.write();
        let before = connections.len();
        connections.retain(|c| !ids.contains(&c.id));
        before - connections.len()
    }

    /// Drop every connection that reports itself closed.
    pub fn prune_closed(&self) -> usize {
        let mut connections = self.connections.write();
        let before = connections.len();
        connections.retain(|c| c.handle.is_open());
        before - connections.len()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared registry handle, passed to both the accept path and the relay.
pub type SharedConnectionRegistry = Arc<ConnectionRegistry>;

/// A connection handle backed by a bounded channel.
///
/// The receiving half belongs to whatever task writes to the client socket.
/// Once that task drops the receiver the handle reports itself closed.
#[derive(Clone)]
pub struct ChannelConnection {
    tx: mpsc::Sender<Frame>,
}

impl ChannelConnection {
    /// Create a handle with room for `buffer` queued frames.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

impl ConnectionHandle for ChannelConnection {
    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    fn send(&self, frame: Frame) -> Result<(), SendError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }
}
