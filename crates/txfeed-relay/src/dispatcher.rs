//! Notification dispatch.
//!
//! The dispatcher consumes raw notifications one at a time, resolves each to
//! a record and hands found records to the broadcaster. Every failure is
//! absorbed here; nothing an event does can stop the loop.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

use crate::broadcaster::{BroadcastReport, Broadcaster};
use crate::event::{ChangeEvent, RawNotification};
use crate::metrics::SharedRelayMetrics;
use crate::resolver::{RecordResolver, Resolution};

/// Dispatcher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// No event in flight.
    Idle,
    /// One event being resolved or broadcast.
    Processing,
}

/// What became of a single notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The record was broadcast.
    Delivered(BroadcastReport),
    /// No row matched the payload.
    NoRecord,
    /// The channel is not handled; no lookup was made.
    Ignored,
    /// Resolution or serialization failed; the event was dropped.
    Failed(String),
}

const IDLE: u8 = 0;
const PROCESSING: u8 = 1;

/// Bridges the store's notification stream to the broadcaster.
pub struct NotificationDispatcher {
    resolver: Arc<dyn RecordResolver>,
    broadcaster: Broadcaster,
    metrics: SharedRelayMetrics,
    state: AtomicU8,
}

impl NotificationDispatcher {
    /// Create a new dispatcher.
    pub fn new(
        resolver: Arc<dyn RecordResolver>,
        broadcaster: Broadcaster,
        metrics: SharedRelayMetrics,
    ) -> Self {
        Self {
            resolver,
            broadcaster,
            metrics,
            state: AtomicU8::new(IDLE),
        }
    }

    /// Current state.
    pub fn state(&self) -> DispatcherState {
        match self.state.load(Ordering::SeqCst) {
            PROCESSING => DispatcherState::Processing,
            _ => DispatcherState::Idle,
        }
    }

    /// Relay counters this dispatcher updates.
    pub fn metrics(&self) -> &SharedRelayMetrics {
        &self.metrics
    }

    /// Run until the notification channel is closed.
    ///
    /// A panic while handling one notification drops that notification and
    /// the loop carries on with the next.
    pub async fn run(self: Arc<Self>, mut rx: NotificationReceiver) {
        info!("notification dispatcher started");

        while let Some(notification) = rx.recv().await {
            let channel = notification.channel.clone();
            let payload = notification.payload.clone();

            if let Err(panic) = AssertUnwindSafe(self.dispatch(notification))
                .catch_unwind()
                .await
            {
                error!(
                    channel = %channel,
                    payload = %payload,
                    panic = panic_message(panic.as_ref()),
                    "notification handler panicked"
                );
                self.state.store(IDLE, Ordering::SeqCst);
                self.metrics.record_failure();
            }
        }

        info!("notification dispatcher stopped (channel closed)");
    }

    /// Handle a single notification.
    pub async fn dispatch(&self, notification: RawNotification) -> DispatchOutcome {
        self.state.store(PROCESSING, Ordering::SeqCst);
        self.metrics.record_notification();

        let outcome = self.process(ChangeEvent::decode(notification)).await;

        self.state.store(IDLE, Ordering::SeqCst);
        outcome
    }

    async fn process(&self, event: ChangeEvent) -> DispatchOutcome {
        if !self.resolver.handles(event.channel()) {
            trace!(channel = event.channel(), "ignoring notification on unhandled channel");
            self.metrics.record_ignored();
            return DispatchOutcome::Ignored;
        }

        let record = match self.resolver.resolve(&event).await {
            Resolution::Found(record) => record,
            Resolution::NotFound => {
                debug!(
                    channel = event.channel(),
                    payload = event.payload(),
                    "no record for notification"
                );
                self.metrics.record_miss();
                return DispatchOutcome::NoRecord;
            }
            Resolution::Failed(e) => {
                error!(
                    channel = event.channel(),
                    payload = event.payload(),
                    error = %e,
                    "failed to resolve notification"
                );
                self.metrics.record_failure();
                return DispatchOutcome::Failed(e.to_string());
            }
        };

        match self.broadcaster.broadcast(event.channel(), &record) {
            Ok(report) => {
                debug!(
                    channel = event.channel(),
                    payload = event.payload(),
                    delivered = report.delivered,
                    skipped = report.skipped,
                    failed = report.failed,
                    "broadcast record"
                );
                DispatchOutcome::Delivered(report)
            }
            Err(e) => {
                error!(channel = event.channel(), error = %e, "failed to broadcast record");
                self.metrics.record_failure();
                DispatchOutcome::Failed(e.to_string())
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Sender side of the dispatcher's notification channel.
pub type NotificationSender = mpsc::Sender<RawNotification>;

/// Receiver side of the dispatcher's notification channel.
pub type NotificationReceiver = mpsc::Receiver<RawNotification>;

/// Create a notification channel with the given buffer size.
pub fn channel(buffer_size: usize) -> (NotificationSender, NotificationReceiver) {
    mpsc::channel(buffer_size)
}

/// Handle for a running dispatcher task.
pub struct DispatcherHandle {
    tx: NotificationSender,
    dispatcher: Arc<NotificationDispatcher>,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// State of the running dispatcher.
    pub fn state(&self) -> DispatcherState {
        self.dispatcher.state()
    }

    /// Whether the dispatcher task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Clone the sender for a notification source.
    pub fn sender(&self) -> NotificationSender {
        self.tx.clone()
    }

    /// Submit a notification, waiting if the channel is full.
    pub async fn send(
        &self,
        notification: RawNotification,
    ) -> Result<(), mpsc::error::SendError<RawNotification>> {
        self.tx.send(notification).await
    }

    /// Close the channel and wait for queued notifications to drain.
    ///
    /// Other senders obtained through [`sender`](Self::sender) keep the
    /// dispatcher running until they are dropped too.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            error!(error = %e, "notification dispatcher task failed");
        }
    }
}

/// Spawn a dispatcher and return a handle for feeding it.
pub fn start_dispatcher(
    dispatcher: NotificationDispatcher,
    buffer_size: usize,
) -> DispatcherHandle {
    let (tx, rx) = channel(buffer_size);
    let dispatcher = Arc::new(dispatcher);
    let task = tokio::spawn(dispatcher.clone().run(rx));
    DispatcherHandle {
        tx,
        dispatcher,
        task,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::error::Error;
    use crate::metrics::new_shared_metrics;
    use crate::registry::{ChannelConnection, ConnectionRegistry};
    use crate::resolver::Record;

    /// Resolves `txCreated` with a canned result and counts lookups.
    struct StubResolver {
        result: fn() -> Resolution,
        calls: AtomicUsize,
    }

    impl StubResolver {
        fn new(result: fn() -> Resolution) -> Arc<Self> {
            Arc::new(Self {
                result,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RecordResolver for StubResolver {
        fn handles(&self, channel: &str) -> bool {
            channel == "txCreated"
        }

        async fn resolve(&self, _event: &ChangeEvent) -> Resolution {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    fn found() -> Resolution {
        let record: Record = match json!({"hash": "abc123"}) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        Resolution::Found(record)
    }

    fn failed() -> Resolution {
        Resolution::Failed(Error::RecordShape {
            channel: "txCreated".into(),
        })
    }

    fn dispatcher(
        resolver: Arc<dyn RecordResolver>,
    ) -> (NotificationDispatcher, Arc<ConnectionRegistry>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let metrics = new_shared_metrics();
        let broadcaster = Broadcaster::new(registry.clone(), metrics.clone());
        (NotificationDispatcher::new(resolver, broadcaster, metrics), registry)
    }

    #[tokio::test]
    async fn test_dispatch_found() {
        let resolver = StubResolver::new(found);
        let (dispatcher, registry) = dispatcher(resolver.clone());
        let (conn, mut rx) = ChannelConnection::new(4);
        registry.register(Arc::new(conn));

        let outcome = dispatcher
            .dispatch(RawNotification::new("txCreated", "abc123"))
            .await;

        assert!(matches!(outcome, DispatchOutcome::Delivered(r) if r.delivered == 1));
        assert!(rx.try_recv().is_ok());
        assert_eq!(dispatcher.state(), DispatcherState::Idle);
    }

    #[tokio::test]
    async fn test_dispatch_unhandled_channel_skips_lookup() {
        let resolver = StubResolver::new(found);
        let (dispatcher, _registry) = dispatcher(resolver.clone());

        let outcome = dispatcher
            .dispatch(RawNotification::new("other", "abc123"))
            .await;

        assert_eq!(outcome, DispatchOutcome::Ignored);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dispatch_failure_returns_to_idle() {
        let (dispatcher, _registry) = dispatcher(StubResolver::new(failed));

        let outcome = dispatcher
            .dispatch(RawNotification::new("txCreated", "abc123"))
            .await;

        assert!(matches!(outcome, DispatchOutcome::Failed(_)));
        assert_eq!(dispatcher.state(), DispatcherState::Idle);
        assert_eq!(dispatcher.metrics().snapshot().failures, 1);
    }

    #[tokio::test]
    async fn test_started_dispatcher_drains_on_shutdown() {
        let resolver = StubResolver::new(|| Resolution::NotFound);
        let (dispatcher, _registry) = dispatcher(resolver.clone());
        let handle = start_dispatcher(dispatcher, 8);

        handle
            .send(RawNotification::new("txCreated", "a"))
            .await
            .unwrap();
        handle
            .send(RawNotification::new("txCreated", "b"))
            .await
            .unwrap();
        handle.shutdown().await;

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    }

    /// Panics on payload `boom`, finds nothing otherwise.
    struct PanickingResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RecordResolver for PanickingResolver {
        fn handles(&self, _channel: &str) -> bool {
            true
        }

        async fn resolve(&self, event: &ChangeEvent) -> Resolution {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if event.payload() == "boom" {
                panic!("resolver blew up");
            }
            Resolution::NotFound
        }
    }

    #[tokio::test]
    async fn test_panicking_resolver_does_not_stop_loop() {
        let resolver = Arc::new(PanickingResolver {
            calls: AtomicUsize::new(0),
        });
        let (dispatcher, _registry) = dispatcher(resolver.clone());
        let metrics = dispatcher.metrics().clone();
        let handle = start_dispatcher(dispatcher, 8);

        handle
            .send(RawNotification::new("txCreated", "boom"))
            .await
            .unwrap();
        handle
            .send(RawNotification::new("txCreated", "after"))
            .await
            .unwrap();
        handle.shutdown().await;

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.notifications, 2);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.misses, 1);
    }

    #[tokio::test]
    async fn test_handle_reports_state() {
        let resolver = StubResolver::new(found);
        let (dispatcher, registry) = dispatcher(resolver.clone());
        let (conn, mut rx) = ChannelConnection::new(4);
        registry.register(Arc::new(conn));
        let handle = start_dispatcher(dispatcher, 8);

        handle
            .send(RawNotification::new("txCreated", "abc123"))
            .await
            .unwrap();
        let frame = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .unwrap();

        assert!(frame.is_some());
        assert_eq!(handle.state(), DispatcherState::Idle);
        assert!(!handle.is_finished());
        handle.shutdown().await;
    }
}
