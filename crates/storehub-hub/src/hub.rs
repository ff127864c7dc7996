use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use storehub_core::{ConnId, HubConfig};
use storehub_protocol::EventFrame;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::connection::{FrameSink, Payload, PendingConnection, WriteLoop, WriteOutcome};
use crate::error::{HubError, Result};
use crate::registry::Registry;

struct RegisterRequest {
    pending: PendingConnection,
    reply: oneshot::Sender<ConnId>,
}

struct UnregisterRequest {
    id: ConnId,
    reply: oneshot::Sender<bool>,
}

/// What the accept path keeps after a successful [`Hub::connect`].
#[derive(Debug, Clone)]
pub struct Session {
    pub id: ConnId,
    /// Cancelled when the hub drops the connection or its write loop fails;
    /// the read half should stop and call [`Hub::unregister`].
    pub transport: CancellationToken,
}

/// Cloneable handle to the hub, shared by the upgrade endpoint and every
/// request handler that publishes events.
#[derive(Clone)]
pub struct Hub {
    registry: Arc<Mutex<Registry>>,
    register_tx: mpsc::Sender<RegisterRequest>,
    unregister_tx: mpsc::Sender<UnregisterRequest>,
    writers: TaskTracker,
    queue_capacity: usize,
}

/// The event loop half. Owns the register/unregister receivers and is the
/// only place the registry's structure changes.
pub struct HubEngine {
    registry: Arc<Mutex<Registry>>,
    register_rx: mpsc::Receiver<RegisterRequest>,
    unregister_rx: mpsc::Receiver<UnregisterRequest>,
    writers: TaskTracker,
    next_id: u64,
    shutdown_grace: Duration,
}

impl Hub {
    /// Build a hub and its engine. Spawn [`HubEngine::run`] before the
    /// listener starts accepting traffic.
    pub fn new(config: &HubConfig) -> (Self, HubEngine) {
        let registry = Arc::new(Mutex::new(Registry::new()));
        let control = config.control_capacity.max(1);
        let (register_tx, register_rx) = mpsc::channel(control);
        let (unregister_tx, unregister_rx) = mpsc::channel(control);
        let writers = TaskTracker::new();

        let hub = Self {
            registry: registry.clone(),
            register_tx,
            unregister_tx,
            writers: writers.clone(),
            queue_capacity: config.queue_capacity.max(1),
        };
        let engine = HubEngine {
            registry,
            register_rx,
            unregister_rx,
            writers,
            next_id: 0,
            shutdown_grace: Duration::from_millis(config.shutdown_grace_ms),
        };
        (hub, engine)
    }

    /// Hand a connection to the event loop and wait for its identity.
    ///
    /// Suspends while the register channel is full.
    pub async fn register(&self, pending: PendingConnection) -> Result<ConnId> {
        let (reply, rx) = oneshot::channel();
        self.register_tx
            .send(RegisterRequest { pending, reply })
            .await
            .map_err(|_| HubError::Stopped)?;
        rx.await.map_err(|_| HubError::Stopped)
    }

    /// Ask the event loop to drop a connection. Returns whether it was still
    /// registered; unregistering twice is harmless.
    pub async fn unregister(&self, id: ConnId) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.unregister_tx
            .send(UnregisterRequest { id, reply })
            .await
            .map_err(|_| HubError::Stopped)?;
        rx.await.map_err(|_| HubError::Stopped)
    }

    /// Register a just-upgraded transport and start its write loop.
    ///
    /// Nothing is spawned if registration fails; dropping `sink` closes the
    /// write half.
    pub async fn connect<S: FrameSink>(&self, remote: impl Into<String>, sink: S) -> Result<Session> {
        let (pending, outbound) = PendingConnection::new(remote, self.queue_capacity);
        let transport = pending.transport();
        let id = self.register(pending).await?;

        let writer = WriteLoop::new(id, sink, outbound, transport.clone());
        let hub = self.clone();
        self.writers.spawn(async move {
            if writer.run().await == WriteOutcome::Failed {
                // a stopped hub has already drained the registry
                if let Err(e) = hub.unregister(id).await {
                    debug!(conn_id = %id, error = %e, "unregister after failed write skipped");
                }
            }
        });
        Ok(Session { id, transport })
    }

    /// Serialize `message` once and enqueue it for every registered
    /// connection except `exclude`. Returns how many queues received it.
    ///
    /// Never fails: a message that cannot be serialized is logged and
    /// dropped. Clients whose queue is full or closed are disconnected.
    pub async fn broadcast<T>(&self, message: &T, exclude: Option<ConnId>) -> usize
    where
        T: Serialize + Sync + ?Sized,
    {
        let payload: Payload = match serde_json::to_string(message) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(error = %e, "broadcast dropped: message not serializable");
                return 0;
            }
        };
        self.broadcast_payload(payload, exclude).await
    }

    /// Wrap `payload` in an [`EventFrame`] of the given kind and broadcast it.
    pub async fn publish(
        &self,
        kind: &str,
        payload: impl Serialize + Send,
        exclude: Option<ConnId>,
    ) -> usize {
        match EventFrame::try_new(kind, payload) {
            Ok(frame) => self.broadcast(&frame, exclude).await,
            Err(e) => {
                warn!(kind, error = %e, "publish dropped: payload not serializable");
                0
            }
        }
    }

    async fn broadcast_payload(&self, payload: Payload, exclude: Option<ConnId>) -> usize {
        let mut delivered = 0;
        let mut evicted = Vec::new();
        {
            let registry = self.registry.lock().unwrap();
            for conn in registry.iter() {
                if Some(conn.id()) == exclude {
                    continue;
                }
                match conn.enqueue(payload.clone()) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        warn!(
                            conn_id = %conn.id(),
                            remote = conn.remote(),
                            error = %e,
                            "disconnecting client that cannot keep up"
                        );
                        evicted.push(conn.id());
                    }
                }
            }
        }

        for id in evicted {
            if let Err(e) = self.unregister(id).await {
                debug!(conn_id = %id, error = %e, "eviction skipped");
            }
        }
        delivered
    }

    /// Number of registered connections.
    pub fn client_count(&self) -> usize {
        self.registry.lock().unwrap().len()
    }

    /// Snapshot of registered identities, in registration order.
    pub fn members(&self) -> Vec<ConnId> {
        self.registry.lock().unwrap().ids()
    }
}

impl HubEngine {
    /// Main event loop. Serializes every register/unregister until
    /// `shutdown` broadcasts `true` (or its sender is dropped), then drains.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("hub event loop started");

        if !*shutdown.borrow() {
            loop {
                tokio::select! {
                    Some(req) = self.register_rx.recv() => self.on_register(req),
                    Some(req) = self.unregister_rx.recv() => self.on_unregister(req),
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }

        self.drain().await;
    }

    fn on_register(&mut self, req: RegisterRequest) {
        let RegisterRequest { pending, reply } = req;
        if reply.is_closed() {
            // caller went away; dropping `pending` closes its queue
            debug!(remote = pending.remote(), "registration abandoned");
            return;
        }

        self.next_id += 1;
        let id = ConnId(self.next_id);
        let conn = pending.into_connection(id);
        let remote = conn.remote().to_string();

        let clients = {
            let mut registry = self.registry.lock().unwrap();
            let added = registry.add(conn);
            debug_assert!(added, "connection ids are never reused");
            registry.len()
        };
        info!(conn_id = %id, remote = %remote, clients, "client connected");

        if reply.send(id).is_err() {
            self.remove(id);
        }
    }

    fn on_unregister(&mut self, req: UnregisterRequest) {
        let found = self.remove(req.id);
        let _ = req.reply.send(found);
    }

    fn remove(&self, id: ConnId) -> bool {
        let (removed, clients) = {
            let mut registry = self.registry.lock().unwrap();
            let removed = registry.remove(id).map(|conn| {
                let remote = conn.remote().to_string();
                conn.close();
                remote
            });
            (removed, registry.len())
        };

        match removed {
            Some(remote) => {
                info!(conn_id = %id, remote = %remote, clients, "client disconnected");
                true
            }
            None => {
                debug!(conn_id = %id, "unregister for unknown connection ignored");
                false
            }
        }
    }

    /// Stop taking signals, close every connection and give write loops the
    /// grace period to flush and send their close frame.
    async fn drain(mut self) {
        self.register_rx.close();
        self.unregister_rx.close();
        // buffered registrations are dropped unanswered: callers see Stopped
        while self.register_rx.try_recv().is_ok() {}
        while let Ok(req) = self.unregister_rx.try_recv() {
            let _ = req.reply.send(false);
        }

        let connections = self.registry.lock().unwrap().drain();
        let count = connections.len();
        for conn in connections {
            conn.close();
        }
        info!(clients = count, "hub shutting down, flushing write loops");

        self.writers.close();
        if tokio::time::timeout(self.shutdown_grace, self.writers.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = self.writers.len(),
                "write loops still running after shutdown grace period"
            );
        }
        info!("hub event loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        failing_sink, frames_until_closed, next_frame, recording_sink, stays_silent, Frame,
        StalledSink,
    };
    use std::collections::HashSet;
    use tokio::task::JoinHandle;

    fn start(config: HubConfig) -> (Hub, watch::Sender<bool>, JoinHandle<()>) {
        let (hub, engine) = Hub::new(&config);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(engine.run(shutdown_rx));
        (hub, shutdown_tx, handle)
    }

    fn default_hub() -> (Hub, watch::Sender<bool>, JoinHandle<()>) {
        start(HubConfig::default())
    }

    fn text(s: &str) -> Frame {
        Frame::Text(s.to_string())
    }

    #[tokio::test]
    async fn broadcast_skips_excluded_sender() {
        let (hub, _shutdown, _engine) = default_hub();
        let (sink_a, mut rx_a) = recording_sink();
        let (sink_b, mut rx_b) = recording_sink();
        let (sink_c, mut rx_c) = recording_sink();
        let a = hub.connect("10.0.0.1:1000", sink_a).await.unwrap();
        let b = hub.connect("10.0.0.2:1000", sink_b).await.unwrap();
        let c = hub.connect("10.0.0.3:1000", sink_c).await.unwrap();
        assert_eq!(
            [a.id, b.id, c.id].iter().collect::<HashSet<_>>().len(),
            3
        );

        let sent = hub.broadcast(&EventFrame::new("x", 1), Some(b.id)).await;
        assert_eq!(sent, 2);

        let expected = r#"{"type":"x","payload":1}"#;
        assert_eq!(next_frame(&mut rx_a).await, Some(text(expected)));
        assert_eq!(next_frame(&mut rx_c).await, Some(text(expected)));
        assert!(stays_silent(&mut rx_b).await);
    }

    #[tokio::test]
    async fn unregistered_client_no_longer_receives() {
        let (hub, _shutdown, _engine) = default_hub();
        let (sink_a, mut rx_a) = recording_sink();
        let (sink_b, mut rx_b) = recording_sink();
        let (sink_c, mut rx_c) = recording_sink();
        let _a = hub.connect("10.0.0.1:1000", sink_a).await.unwrap();
        let b = hub.connect("10.0.0.2:1000", sink_b).await.unwrap();
        let _c = hub.connect("10.0.0.3:1000", sink_c).await.unwrap();

        assert!(hub.unregister(b.id).await.unwrap());
        assert!(b.transport.is_cancelled());

        let sent = hub.broadcast(&EventFrame::new("x", 1), None).await;
        assert_eq!(sent, 2);
        assert_eq!(next_frame(&mut rx_a).await, Some(text(r#"{"type":"x","payload":1}"#)));
        assert_eq!(next_frame(&mut rx_c).await, Some(text(r#"{"type":"x","payload":1}"#)));

        // B saw only the close frame, exactly once
        assert_eq!(frames_until_closed(&mut rx_b).await, vec![Frame::Close]);

        // second unregister is a quiet no-op
        assert!(!hub.unregister(b.id).await.unwrap());
        assert_eq!(hub.client_count(), 2);
    }

    #[tokio::test]
    async fn every_member_gets_identical_payload() {
        let (hub, _shutdown, _engine) = default_hub();
        let mut receivers = Vec::new();
        for i in 0..5 {
            let (sink, rx) = recording_sink();
            hub.connect(format!("10.0.0.{i}:2000"), sink).await.unwrap();
            receivers.push(rx);
        }

        let message = serde_json::json!({"type": "Product created", "payload": {"id": "p-1"}});
        assert_eq!(hub.broadcast(&message, None).await, 5);

        let mut payloads = Vec::new();
        for rx in receivers.iter_mut() {
            match next_frame(rx).await {
                Some(Frame::Text(s)) => payloads.push(s),
                other => panic!("expected text frame, got {other:?}"),
            }
        }
        assert_eq!(payloads.len(), 5);
        assert!(payloads.iter().all(|p| p == &payloads[0]));
        for rx in receivers.iter_mut() {
            assert!(stays_silent(rx).await, "exactly one enqueue per connection");
        }
    }

    #[tokio::test]
    async fn per_connection_order_is_fifo() {
        let (hub, _shutdown, _engine) = default_hub();
        let (sink, mut rx) = recording_sink();
        hub.connect("10.0.0.1:1000", sink).await.unwrap();

        for n in 0..20 {
            hub.broadcast(&n, None).await;
        }
        for n in 0..20 {
            assert_eq!(next_frame(&mut rx).await, Some(text(&n.to_string())));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registrations_are_not_lost() {
        let (hub, _shutdown, _engine) = default_hub();

        let mut tasks = Vec::new();
        for _ in 0..1000 {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                let (sink, rx) = recording_sink();
                // every peer behind the same NAT'd address
                let session = hub.connect("203.0.113.9:443", sink).await.unwrap();
                (session.id, rx)
            }));
        }

        let mut ids = HashSet::new();
        let mut receivers = Vec::new();
        for task in tasks {
            let (id, rx) = task.await.unwrap();
            ids.insert(id);
            receivers.push(rx);
        }

        assert_eq!(ids.len(), 1000);
        assert_eq!(hub.client_count(), 1000);
        let members: HashSet<_> = hub.members().into_iter().collect();
        assert_eq!(members, ids);
    }

    #[tokio::test]
    async fn registry_invariants_hold_across_churn() {
        let (hub, _shutdown, _engine) = default_hub();
        let mut live = Vec::new();
        let mut receivers = Vec::new();

        for i in 0..20 {
            let (sink, rx) = recording_sink();
            live.push(hub.connect(format!("10.1.0.{i}:80"), sink).await.unwrap().id);
            receivers.push(rx);
        }
        for id in live.iter().step_by(2) {
            assert!(hub.unregister(*id).await.unwrap());
        }
        for id in live.iter().step_by(4) {
            assert!(!hub.unregister(*id).await.unwrap());
        }
        for i in 0..5 {
            let (sink, rx) = recording_sink();
            hub.connect(format!("10.2.0.{i}:80"), sink).await.unwrap();
            receivers.push(rx);
        }

        let registry = hub.registry.lock().unwrap();
        let ids = registry.ids();
        assert_eq!(ids.len(), 15);
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), ids.len());
        assert!(registry.iter().all(|conn| conn.is_open()));
        assert!(ids.iter().all(|id| !live.iter().step_by(2).any(|gone| gone == id)));
    }

    #[tokio::test]
    async fn full_queue_disconnects_slow_client() {
        let (hub, _shutdown, _engine) = start(HubConfig {
            queue_capacity: 1,
            shutdown_grace_ms: 50,
            ..HubConfig::default()
        });
        let slow = hub.connect("10.0.0.9:9", StalledSink).await.unwrap();
        let (sink, mut rx) = recording_sink();
        let fast = hub.connect("10.0.0.1:1", sink).await.unwrap();

        for n in 0..3 {
            hub.broadcast(&n, None).await;
            // let the healthy writer keep its queue empty
            assert_eq!(next_frame(&mut rx).await, Some(text(&n.to_string())));
        }

        assert_eq!(hub.members(), vec![fast.id]);
        assert!(slow.transport.is_cancelled());
    }

    #[tokio::test]
    async fn failed_write_unregisters_without_another_broadcast() {
        let (hub, _shutdown, _engine) = default_hub();
        let (sink, closes) = failing_sink();
        let session = hub.connect("10.0.0.1:1", sink).await.unwrap();
        let (healthy, mut rx) = recording_sink();
        let other = hub.connect("10.0.0.2:1", healthy).await.unwrap();

        assert_eq!(hub.broadcast(&"first", None).await, 2);
        tokio::time::timeout(Duration::from_secs(1), session.transport.cancelled())
            .await
            .expect("write failure cancels the transport");

        tokio::time::timeout(Duration::from_secs(1), async {
            while hub.client_count() != 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("failed connection leaves the registry");

        assert_eq!(hub.members(), vec![other.id]);
        assert!(hub.registry.lock().unwrap().iter().all(|conn| conn.is_open()));
        assert_eq!(next_frame(&mut rx).await, Some(text(r#""first""#)));
        // the read half's own unregister arrives late and is a no-op
        assert!(!hub.unregister(session.id).await.unwrap());
        assert_eq!(closes.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _s: S) -> std::result::Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("nope"))
        }
    }

    #[tokio::test]
    async fn serialization_failure_is_swallowed() {
        let (hub, _shutdown, _engine) = default_hub();
        let (sink, mut rx) = recording_sink();
        hub.connect("10.0.0.1:1", sink).await.unwrap();

        assert_eq!(hub.broadcast(&Unserializable, None).await, 0);
        assert_eq!(hub.publish("broken", Unserializable, None).await, 0);
        assert!(stays_silent(&mut rx).await);
        assert_eq!(hub.client_count(), 1);
    }

    #[tokio::test]
    async fn publish_wraps_in_event_frame() {
        let (hub, _shutdown, _engine) = default_hub();
        let (sink, mut rx) = recording_sink();
        hub.connect("10.0.0.1:1", sink).await.unwrap();

        let sent = hub
            .publish("Product updated", serde_json::json!({"id": "p-9"}), None)
            .await;
        assert_eq!(sent, 1);
        assert_eq!(
            next_frame(&mut rx).await,
            Some(text(r#"{"type":"Product updated","payload":{"id":"p-9"}}"#))
        );
    }

    #[tokio::test]
    async fn shutdown_flushes_then_closes_everyone() {
        let (hub, shutdown, engine) = default_hub();
        let (sink_a, mut rx_a) = recording_sink();
        let (sink_b, mut rx_b) = recording_sink();
        let a = hub.connect("10.0.0.1:1", sink_a).await.unwrap();
        hub.connect("10.0.0.2:1", sink_b).await.unwrap();

        assert_eq!(hub.broadcast(&"bye", None).await, 2);
        shutdown.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), engine)
            .await
            .expect("engine stops")
            .unwrap();

        let bye = text(r#""bye""#);
        assert_eq!(frames_until_closed(&mut rx_a).await, vec![bye.clone(), Frame::Close]);
        assert_eq!(frames_until_closed(&mut rx_b).await, vec![bye, Frame::Close]);
        assert!(a.transport.is_cancelled());
        assert_eq!(hub.client_count(), 0);

        let (sink, _rx) = recording_sink();
        assert!(matches!(
            hub.connect("10.0.0.3:1", sink).await,
            Err(HubError::Stopped)
        ));
        assert!(matches!(hub.unregister(a.id).await, Err(HubError::Stopped)));
        assert_eq!(hub.broadcast(&"late", None).await, 0);
    }

    #[tokio::test]
    async fn dropping_shutdown_sender_stops_engine() {
        let (hub, shutdown, engine) = default_hub();
        drop(shutdown);
        tokio::time::timeout(Duration::from_secs(2), engine)
            .await
            .expect("engine stops")
            .unwrap();

        let (sink, _rx) = recording_sink();
        assert!(hub.connect("10.0.0.1:1", sink).await.is_err());
    }
}
