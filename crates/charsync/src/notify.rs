//! Server-initiated pushes to locally connected clients.
//!
//! Each live session on this node registers an outbound queue in
//! [`LocalChannels`]. Anything that wants to reach a user (the
//! file-distribution tier, the pairing cache) pushes a [`ServerMessage`]
//! into that queue and the connection's handler writes it out.
//!
//! When a newer connection for the same uid registers, the old queue's
//! sender is dropped. The old handler sees its queue close and ends.

use std::collections::HashMap;
use std::sync::Arc;

use charsync_protocol::{ServerMessage, Uid};
use charsync_transport::ConnectionId;
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

/// Capacity of each connection's outbound queue.
const OUTBOX_CAPACITY: usize = 64;

struct Outbox {
    conn: ConnectionId,
    tx: mpsc::Sender<ServerMessage>,
}

/// Outbound queues of the sessions connected to this node, by uid.
#[derive(Default)]
pub struct LocalChannels {
    outboxes: Mutex<HashMap<Uid, Outbox>>,
}

impl LocalChannels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `conn` as `uid`'s live connection and returns the
    /// receiving end of its queue. Supersedes any earlier registration.
    pub async fn register(&self, uid: &Uid, conn: ConnectionId) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        let previous = self
            .outboxes
            .lock()
            .await
            .insert(uid.clone(), Outbox { conn, tx });
        if let Some(previous) = previous {
            tracing::debug!(%uid, old = %previous.conn, new = %conn, "outbound queue superseded");
        }
        rx
    }

    /// Removes `uid`'s queue if it still belongs to `conn`.
    pub async fn unregister(&self, uid: &Uid, conn: ConnectionId) -> bool {
        let mut outboxes = self.outboxes.lock().await;
        match outboxes.get(uid) {
            Some(outbox) if outbox.conn == conn => {
                outboxes.remove(uid);
                true
            }
            _ => false,
        }
    }

    /// Queues `msg` for `uid`. Returns `false` if the uid isn't connected
    /// here or its queue is gone or full.
    pub async fn push(&self, uid: &Uid, msg: ServerMessage) -> bool {
        let tx = match self.outboxes.lock().await.get(uid) {
            Some(outbox) => outbox.tx.clone(),
            None => return false,
        };
        match tx.try_send(msg) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(%uid, error = %e, "dropping push");
                false
            }
        }
    }

    /// Number of uids with a live queue on this node.
    pub async fn len(&self) -> usize {
        self.outboxes.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.outboxes.lock().await.is_empty()
    }
}

/// The call the file-distribution tier makes when an artifact a user
/// asked for is ready.
#[derive(Clone)]
pub struct ArtifactNotifier {
    channels: Arc<LocalChannels>,
}

impl ArtifactNotifier {
    pub fn new(channels: Arc<LocalChannels>) -> Self {
        Self { channels }
    }

    /// Tells `uid` that request `request_id` can be downloaded.
    ///
    /// Returns `false` if `uid` has no live session on this node; the
    /// caller should try the node that holds it.
    pub async fn download_ready(&self, uid: &Uid, request_id: Uuid) -> bool {
        let delivered = self
            .channels
            .push(uid, ServerMessage::DownloadReady { request_id })
            .await;
        tracing::debug!(%uid, %request_id, delivered, "download ready");
        delivered
    }
}
