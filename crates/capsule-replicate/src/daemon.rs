//! The replication daemon.
//!
//! A [`Replicator`] owns one replica's diff engine and drives it from two
//! sides: a serve loop answering whatever arrives on the transport, and a
//! heartbeat that periodically opens conversations with selected peers.

use std::sync::Arc;

use capsule_core::{Keypair, Record, RecordBuilder};
use capsule_store::LogStore;
use capsule_sync::{AnyPolicy, NodeId, Policy, Step, SyncError, SyncMessage, Transport};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;

use crate::config::DaemonConfig;
use crate::error::{ReplicateError, Result};
use crate::heartbeat::{initial_jitter, PeerSelector};

/// One replica of a capsule, wired to a transport.
pub struct Replicator<S, T>
where
    S: LogStore + ?Sized + 'static,
    T: Transport + 'static,
{
    policy: AnyPolicy<S>,
    transport: Arc<T>,
    selector: PeerSelector,
    config: DaemonConfig,
    /// Signing key; `None` makes the replica read-only.
    keypair: Option<Keypair>,
    /// Serializes appends so two never claim the same head.
    append_lock: Mutex<()>,
}

impl<S, T> Replicator<S, T>
where
    S: LogStore + ?Sized + 'static,
    T: Transport + 'static,
{
    /// Build a replica over `store`, loading the configured backend.
    pub async fn new(
        config: DaemonConfig,
        store: Arc<S>,
        transport: Arc<T>,
        keypair: Option<Keypair>,
    ) -> Result<Self> {
        config.validate()?;
        if let (Some(keypair), Some(writer)) = (&keypair, config.writer_key()?) {
            if keypair.public_key() != writer {
                return Err(ReplicateError::Config(
                    "keypair does not match writer_key".into(),
                ));
            }
        }

        let policy = AnyPolicy::new(config.policy, store, config.sync_config()?).await?;
        tracing::debug!(
            node = %transport.local_node_id(),
            policy = ?config.policy,
            heartbeat = ?config.heartbeat,
            "replica ready"
        );

        Ok(Self {
            policy,
            transport,
            selector: PeerSelector::new(config.heartbeat),
            config,
            keypair,
            append_lock: Mutex::new(()),
        })
    }

    /// This replica's identity on the transport.
    pub fn node_id(&self) -> NodeId {
        self.transport.local_node_id()
    }

    /// The diff engine.
    pub fn policy(&self) -> &AnyPolicy<S> {
        &self.policy
    }

    /// The daemon configuration.
    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Append `value` on top of the current local head and sign it.
    ///
    /// The head is the logical end with the highest record number; an empty
    /// replica starts the chain.
    pub async fn append(&self, value: Vec<u8>) -> Result<Record> {
        let keypair = self.keypair.as_ref().ok_or(ReplicateError::ReadOnly)?;
        let _guard = self.append_lock.lock().await;

        let backend = self.policy.backend();
        let ends = backend.logical_ends().await?;
        let head = backend
            .read_records(&ends)
            .await?
            .into_iter()
            .max_by_key(|r| (r.header.rec_no, r.hash));

        let builder = match &head {
            Some(head) => RecordBuilder::new(head.hash, head.header.rec_no + 1),
            None => RecordBuilder::genesis(),
        };
        let record = builder.timestamp(now_millis()).value(value).sign(keypair);

        backend.write_records(std::slice::from_ref(&record)).await?;
        tracing::debug!(
            hash = %record.hash,
            rec_no = record.header.rec_no,
            "appended record"
        );
        Ok(record)
    }

    /// Open conversations with the peers this tick selects.
    ///
    /// Returns how many first messages went out. Peers already in a
    /// conversation are skipped.
    pub async fn heartbeat_once(&self) -> Result<usize> {
        let peers = self.transport.connected_peers().await?;
        let mut started = 0;

        for peer in self.selector.select(&peers)? {
            let Some(message) = self.policy.generate_message(&peer).await? else {
                continue;
            };
            // An unsent first message leaves the peer busy until the
            // conversation timeout resets it.
            match self.transport.send(&peer, message).await {
                Ok(()) => started += 1,
                Err(e) => tracing::warn!(%peer, error = %e, "heartbeat send failed"),
            }
        }

        Ok(started)
    }

    /// Feed one inbound message to the engine and send any reply back.
    pub async fn handle(&self, from: NodeId, message: SyncMessage) -> Result<()> {
        match self.policy.process_message(&from, message).await? {
            Step::Reply(reply) => self.transport.send(&from, reply).await?,
            Step::Finished => tracing::debug!(peer = %from, "conversation finished"),
        }
        Ok(())
    }

    /// Answer inbound messages until the transport closes.
    ///
    /// Each message is handled on its own task; one peer's messages stay
    /// ordered because the protocol never has two in flight per peer.
    pub async fn serve(self: Arc<Self>) -> Result<()> {
        loop {
            let (from, message) = match self.transport.recv().await {
                Ok(inbound) => inbound,
                Err(SyncError::MalformedMessage(reason)) => {
                    tracing::warn!(%reason, "dropping undecodable message");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let this = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = this.handle(from, message).await {
                    tracing::warn!(peer = %from, error = %e, "inbound message failed");
                }
            });
        }
    }

    /// Serve and heartbeat until the transport closes.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut serve = tokio::spawn(Arc::clone(&self).serve());

        let interval = self.config.heartbeat_interval();
        tokio::select! {
            served = &mut serve => return served?,
            _ = tokio::time::sleep(initial_jitter(interval)) => {}
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                served = &mut serve => return served?,
                _ = ticker.tick() => {
                    if let Err(e) = self.heartbeat_once().await {
                        tracing::warn!(node = %self.node_id(), error = %e, "heartbeat failed");
                    }
                }
            }
        }
    }
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
