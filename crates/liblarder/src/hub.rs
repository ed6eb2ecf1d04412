use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use larder_protocol::ChangeEvent;
use larder_protocol::frame;

use crate::registry::{Connection, ConnectionId, ConnectionRegistry};

/// Tuning for the broadcast hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Max concurrent streams per identity key; the oldest beyond the limit
    /// are evicted when a new stream for that identity arrives.
    pub identity_stream_limit: usize,
    pub heartbeat_interval: Duration,
    /// Outbound frame channel capacity per connection.
    pub channel_capacity: usize,
    /// How long a frame enqueue may wait on a full channel before the
    /// connection is treated as dead.
    pub write_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            identity_stream_limit: 1,
            heartbeat_interval: Duration::from_secs(30),
            channel_capacity: 64,
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// Fans change events out to every registered stream.
///
/// Writes are dispatched one task per connection so a slow or blocked
/// consumer can never delay delivery to the others. A write failure
/// removes only the failing connection and never surfaces to the caller;
/// the mutation that triggered the broadcast has already succeeded.
pub struct SyncHub {
    registry: Arc<ConnectionRegistry>,
    config: HubConfig,
}

impl SyncHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Register a new stream and apply the per-identity dedup policy: if
    /// more than the configured limit now share this identity key, the
    /// oldest are closed and removed. The newest connection always wins.
    pub fn on_connect(&self, conn: Arc<Connection>) -> ConnectionId {
        let id = self.registry.add(Arc::clone(&conn));

        let matches = self.registry.find_by_identity_key(&conn.identity_key);
        let limit = self.config.identity_stream_limit.max(1);
        if matches.len() > limit {
            for stale in &matches[..matches.len() - limit] {
                debug!(
                    connection = %stale.id,
                    identity = %stale.identity_key,
                    "evicting duplicate stream"
                );
                // Close the transport and drop the registry entry. Both,
                // always: removal without closing leaks the socket, closing
                // without removal leaks the slot.
                stale.close();
                self.registry.remove(&stale.id);
            }
        }
        id
    }

    /// Fan an event out to every live stream. Serializes once, returns
    /// without waiting for any delivery.
    pub fn broadcast(self: &Arc<Self>, event: &ChangeEvent) {
        let frame = match frame::encode_event(event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping unencodable change event");
                return;
            }
        };
        self.fan_out(frame);
    }

    fn fan_out(self: &Arc<Self>, frame: Bytes) {
        for conn in self.registry.list_all() {
            let hub = Arc::clone(self);
            let frame = frame.clone();
            tokio::spawn(async move {
                if let Err(e) = conn.write(frame, hub.config.write_timeout).await {
                    debug!(connection = %conn.id, error = %e, "pruning dead stream");
                    conn.close();
                    hub.registry.remove(&conn.id);
                }
            });
        }
    }

    /// Periodic keepalive to every connection, with the same
    /// independent-failure semantics as `broadcast`. This is how dead
    /// sockets are discovered in the absence of application traffic, and it
    /// keeps idle-timeout proxies from cutting the stream.
    pub fn spawn_heartbeat(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(hub.config.heartbeat_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // interval fires immediately; the first heartbeat should wait a
            // full period.
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => hub.fan_out(frame::heartbeat_frame()),
                }
            }
        })
    }

    /// Process shutdown: close every stream. No drain protocol; delivery is
    /// already best-effort.
    pub fn shutdown(&self) {
        self.registry.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use larder_protocol::{ChangeEvent, ChangeKind};
    use tokio::sync::mpsc;
    use tokio::time::{Instant, sleep};

    fn hub_with(config: HubConfig) -> Arc<SyncHub> {
        Arc::new(SyncHub::new(config))
    }

    fn test_event() -> ChangeEvent {
        ChangeEvent::for_item(
            ChangeKind::ItemUpdated,
            "list-1",
            serde_json::json!({"itemId": "item-1"}),
        )
    }

    async fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        cond()
    }

    #[tokio::test]
    async fn dedup_keeps_only_newest_for_identity() {
        let hub = hub_with(HubConfig::default());
        let (first, _rx1) = Connection::new("same-key".to_string(), 4);
        let (second, _rx2) = Connection::new("same-key".to_string(), 4);

        hub.on_connect(Arc::clone(&first));
        hub.on_connect(Arc::clone(&second));

        assert_eq!(hub.registry().list_all().len(), 1);
        assert_eq!(hub.registry().list_all()[0].id, second.id);
        assert!(first.is_closed());
        assert!(!second.is_closed());
    }

    #[tokio::test]
    async fn dedup_leaves_other_identities_alone() {
        let hub = hub_with(HubConfig::default());
        let (a, _rx_a) = Connection::new("key-a".to_string(), 4);
        let (b, _rx_b) = Connection::new("key-b".to_string(), 4);
        let (a2, _rx_a2) = Connection::new("key-a".to_string(), 4);

        hub.on_connect(Arc::clone(&a));
        hub.on_connect(Arc::clone(&b));
        hub.on_connect(a2);

        assert_eq!(hub.connection_count(), 2);
        assert!(a.is_closed());
        assert!(!b.is_closed());
    }

    #[tokio::test]
    async fn dedup_respects_configured_limit() {
        let hub = hub_with(HubConfig {
            identity_stream_limit: 2,
            ..HubConfig::default()
        });
        let (a, _rx_a) = Connection::new("key".to_string(), 4);
        let (b, _rx_b) = Connection::new("key".to_string(), 4);
        let (c, _rx_c) = Connection::new("key".to_string(), 4);

        hub.on_connect(Arc::clone(&a));
        hub.on_connect(Arc::clone(&b));
        hub.on_connect(Arc::clone(&c));

        assert_eq!(hub.connection_count(), 2);
        assert!(a.is_closed());
        assert!(!b.is_closed());
        assert!(!c.is_closed());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_connection() {
        let hub = hub_with(HubConfig::default());
        let mut receivers = Vec::new();
        for i in 0..5 {
            let (conn, rx) = Connection::new(format!("key-{i}"), 4);
            hub.on_connect(conn);
            receivers.push(rx);
        }

        hub.broadcast(&test_event());

        for rx in &mut receivers {
            let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("frame within deadline")
                .expect("channel open");
            assert!(frame.starts_with(b"data: "));
        }
    }

    #[tokio::test]
    async fn one_failing_connection_does_not_block_the_rest() {
        let hub = hub_with(HubConfig {
            write_timeout: Duration::from_millis(100),
            ..HubConfig::default()
        });

        let mut receivers: Vec<mpsc::Receiver<Bytes>> = Vec::new();
        for i in 0..100 {
            let (conn, rx) = Connection::new(format!("key-{i}"), 4);
            hub.on_connect(conn);
            if i == 42 {
                // Deterministic failure: the remote side of this one is gone.
                drop(rx);
            } else {
                receivers.push(rx);
            }
        }

        hub.broadcast(&test_event());

        for rx in &mut receivers {
            let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("frame within deadline")
                .expect("channel open");
            assert!(frame.starts_with(b"data: "));
        }

        let registry = Arc::clone(hub.registry());
        assert!(
            wait_for(move || registry.len() == 99, Duration::from_secs(1)).await,
            "failing connection should be pruned"
        );
    }

    #[tokio::test]
    async fn heartbeat_prunes_exactly_the_failing_connection() {
        let hub = hub_with(HubConfig {
            heartbeat_interval: Duration::from_millis(20),
            write_timeout: Duration::from_millis(100),
            ..HubConfig::default()
        });

        let (healthy, mut healthy_rx) = Connection::new("key-a".to_string(), 16);
        let (dead, dead_rx) = Connection::new("key-b".to_string(), 16);
        hub.on_connect(Arc::clone(&healthy));
        hub.on_connect(Arc::clone(&dead));
        drop(dead_rx);

        let before = healthy.last_write_at_epoch_ms();
        let cancel = CancellationToken::new();
        let ticker = hub.spawn_heartbeat(cancel.clone());

        let frame = tokio::time::timeout(Duration::from_secs(1), healthy_rx.recv())
            .await
            .expect("heartbeat within deadline")
            .expect("channel open");
        assert!(frame.starts_with(b":"));

        let registry = Arc::clone(hub.registry());
        assert!(
            wait_for(move || registry.len() == 1, Duration::from_secs(1)).await,
            "dead connection should be pruned by the heartbeat"
        );
        assert_eq!(hub.registry().list_all()[0].id, healthy.id);
        assert!(healthy.last_write_at_epoch_ms() >= before);

        cancel.cancel();
        let _ = ticker.await;
    }

    #[tokio::test]
    async fn slow_consumer_does_not_delay_others() {
        let hub = hub_with(HubConfig {
            channel_capacity: 1,
            write_timeout: Duration::from_secs(2),
            ..HubConfig::default()
        });

        // Fill the slow consumer's channel so the next write must wait.
        let (slow, _slow_rx) = Connection::new("slow".to_string(), 1);
        slow.write(Bytes::from_static(b"stuffed"), Duration::from_millis(50))
            .await
            .unwrap();
        hub.on_connect(slow);

        let (fast, mut fast_rx) = Connection::new("fast".to_string(), 1);
        hub.on_connect(fast);

        let started = Instant::now();
        hub.broadcast(&test_event());

        let frame = tokio::time::timeout(Duration::from_secs(1), fast_rx.recv())
            .await
            .expect("fast consumer served promptly")
            .expect("channel open");
        assert!(frame.starts_with(b"data: "));
        // Well under the slow consumer's write timeout.
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn shutdown_closes_all_streams() {
        let hub = hub_with(HubConfig::default());
        let (a, _rx_a) = Connection::new("k1".to_string(), 4);
        let (b, _rx_b) = Connection::new("k2".to_string(), 4);
        hub.on_connect(Arc::clone(&a));
        hub.on_connect(Arc::clone(&b));

        hub.shutdown();
        assert_eq!(hub.connection_count(), 0);
        assert!(a.is_closed());
        assert!(b.is_closed());
    }
}
