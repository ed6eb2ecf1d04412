use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::epoch_ms;
use crate::identity::IdentityKey;

pub type ConnectionId = String;

/// Monotonic connect order, so same-millisecond connects still have a
/// well-defined oldest/newest for the dedup policy.
static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("connection closed")]
    Closed,

    #[error("outbound channel stayed full past the write timeout")]
    Timeout,
}

/// One live event stream to a household client.
///
/// Owned by the registry from creation to removal. Frames go out through a
/// bounded channel; the HTTP body task on the other side drains it into the
/// socket, so a stalled remote shows up here as a full channel.
pub struct Connection {
    pub id: ConnectionId,
    pub identity_key: IdentityKey,
    pub connected_at_epoch_ms: u64,
    seq: u64,
    last_write_at_epoch_ms: AtomicU64,
    sender: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
}

impl Connection {
    /// Create a connection and the receiving end of its frame channel.
    pub fn new(identity_key: IdentityKey, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let now = epoch_ms();
        let conn = Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            identity_key,
            connected_at_epoch_ms: now,
            seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
            last_write_at_epoch_ms: AtomicU64::new(now),
            sender,
            cancel: CancellationToken::new(),
        });
        (conn, receiver)
    }

    /// Enqueue one frame for the transport task.
    ///
    /// Fails when the remote side is gone or the channel stayed full past
    /// `timeout`; the caller is expected to close and remove this connection.
    pub async fn write(&self, frame: Bytes, timeout: Duration) -> Result<(), WriteError> {
        match tokio::time::timeout(timeout, self.sender.send(frame)).await {
            Ok(Ok(())) => {
                self.last_write_at_epoch_ms.store(epoch_ms(), Ordering::Relaxed);
                Ok(())
            }
            Ok(Err(_)) => Err(WriteError::Closed),
            Err(_) => Err(WriteError::Timeout),
        }
    }

    /// Close the transport. Idempotent; closing an already-dead transport
    /// is treated as already done.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.sender.is_closed()
    }

    /// Staleness diagnostic: when the hub last managed to hand this
    /// connection a frame.
    pub fn last_write_at_epoch_ms(&self) -> u64 {
        self.last_write_at_epoch_ms.load(Ordering::Relaxed)
    }
}

/// In-memory set of active streams, the only shared mutable structure on
/// the server side. Capacity limits are the dedup policy's concern, not
/// the registry's.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, conn: Arc<Connection>) -> ConnectionId {
        let id = conn.id.clone();
        self.connections.insert(id.clone(), conn);
        id
    }

    /// Idempotent: removing an id that is not present is a no-op.
    pub fn remove(&self, id: &str) {
        self.connections.remove(id);
    }

    /// Snapshot copy; a broadcast iterating over it is unaffected by
    /// concurrent add/remove.
    pub fn list_all(&self) -> Vec<Arc<Connection>> {
        self.connections.iter().map(|e| e.value().clone()).collect()
    }

    /// All connections sharing `key`, ordered oldest-first.
    pub fn find_by_identity_key(&self, key: &str) -> Vec<Arc<Connection>> {
        let mut matches: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .filter(|e| e.value().identity_key == key)
            .map(|e| e.value().clone())
            .collect();
        matches.sort_by_key(|c| c.seq);
        matches
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Process shutdown: close every stream and drop the entries. Delivery
    /// is best-effort, so there is no drain step.
    pub fn close_all(&self) {
        for conn in self.list_all() {
            conn.close();
        }
        self.connections.clear();
    }
}
