//! Message delivery between replicas.
//!
//! The diff engine never touches sockets. A daemon pulls inbound messages
//! off a [`Transport`], hands them to the engine, and pushes replies back to
//! the sender. Framing and peer discovery belong to the implementation.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::messages::{NodeId, SyncMessage};

/// Addressed, peer-keyed message delivery.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `message` to `peer`. Fails if the peer is unknown or gone.
    async fn send(&self, peer: &NodeId, message: SyncMessage) -> Result<()>;

    /// Wait for the next inbound message and its sender.
    ///
    /// An error here means the transport is closed for good.
    async fn recv(&self) -> Result<(NodeId, SyncMessage)>;

    /// Like [`recv`](Transport::recv), but gives up after `timeout` with
    /// `Ok(None)`.
    async fn recv_timeout(&self, timeout: Duration) -> Result<Option<(NodeId, SyncMessage)>>;

    /// Identity this transport sends as.
    fn local_node_id(&self) -> NodeId;

    /// Peers reachable right now, sorted, never including ourselves.
    async fn connected_peers(&self) -> Result<Vec<NodeId>>;
}

/// Single-process network over tokio channels.
///
/// Frames carry encoded CBOR, so every hop runs the real codec and a
/// malformed payload surfaces on `recv` exactly as it would off a socket.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::{mpsc, Mutex, RwLock};

    use crate::error::SyncError;

    /// Frames a mailbox holds before senders wait.
    const MAILBOX_CAPACITY: usize = 1024;

    #[derive(Debug)]
    struct Frame {
        from: NodeId,
        payload: Vec<u8>,
    }

    /// Registry of node mailboxes.
    #[derive(Default)]
    pub struct MemoryNetwork {
        mailboxes: RwLock<HashMap<NodeId, mpsc::Sender<Frame>>>,
    }

    impl MemoryNetwork {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Register `node_id` and return its endpoint. Re-registering an id
        /// replaces the old mailbox.
        pub async fn create_transport(self: &Arc<Self>, node_id: NodeId) -> MemoryTransport {
            let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
            self.mailboxes.write().await.insert(node_id, tx);

            MemoryTransport {
                node_id,
                network: Arc::clone(self),
                inbox: Mutex::new(rx),
            }
        }

        /// Drop a node's mailbox. Its pending `recv` then fails and sends to
        /// it are rejected.
        pub async fn disconnect(&self, node_id: &NodeId) {
            self.mailboxes.write().await.remove(node_id);
        }

        async fn mailbox(&self, peer: &NodeId) -> Result<mpsc::Sender<Frame>> {
            self.mailboxes
                .read()
                .await
                .get(peer)
                .cloned()
                .ok_or_else(|| SyncError::Transport(format!("peer {} not found", peer)))
        }
    }

    /// One node's endpoint on a [`MemoryNetwork`].
    pub struct MemoryTransport {
        node_id: NodeId,
        network: Arc<MemoryNetwork>,
        inbox: Mutex<mpsc::Receiver<Frame>>,
    }

    fn open(frame: Option<Frame>) -> Result<(NodeId, SyncMessage)> {
        let frame = frame.ok_or_else(|| SyncError::Transport("mailbox closed".into()))?;
        Ok((frame.from, SyncMessage::decode(&frame.payload)?))
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, peer: &NodeId, message: SyncMessage) -> Result<()> {
            let frame = Frame {
                from: self.node_id,
                payload: message.encode()?,
            };
            self.network
                .mailbox(peer)
                .await?
                .send(frame)
                .await
                .map_err(|_| SyncError::Transport(format!("peer {} disconnected", peer)))
        }

        async fn recv(&self) -> Result<(NodeId, SyncMessage)> {
            let frame = self.inbox.lock().await.recv().await;
            open(frame)
        }

        async fn recv_timeout(&self, timeout: Duration) -> Result<Option<(NodeId, SyncMessage)>> {
            let mut inbox = self.inbox.lock().await;
            match tokio::time::timeout(timeout, inbox.recv()).await {
                Ok(frame) => open(frame).map(Some),
                Err(_) => Ok(None),
            }
        }

        fn local_node_id(&self) -> NodeId {
            self.node_id
        }

        async fn connected_peers(&self) -> Result<Vec<NodeId>> {
            let mut peers: Vec<NodeId> = self
                .network
                .mailboxes
                .read()
                .await
                .keys()
                .filter(|id| **id != self.node_id)
                .copied()
                .collect();
            peers.sort();
            Ok(peers)
        }
    }
}
