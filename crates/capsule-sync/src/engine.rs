//! The diff engine: per-peer state machine for the four-message exchange.
//!
//! ```text
//! Initiator (A)                               Receiver (B)
//!   Resting                                     Resting
//!   |--- 1: A begins/ends ---------------------->|  snapshot, walk A's
//!   FirstMsgSent                                 |  unmatched frontier
//!   |<-- 2: records for A, B begins/ends --------|
//!   | register + write, 4-way diff               FirstMsgRecved
//!   |--- 3: wanted hashes, records for B ------->|
//!   ThirdMsgSent                                 |  register + write,
//!   |<-- 4: components of wanted hashes ---------|  expand wanted
//!   | write                                      ThirdMsgRecved (idle)
//!   Resting (Finished)
//! ```
//!
//! Outgoing records and wanted hashes are capped per message
//! ([`SyncConfig::max_records_per_message`], [`SyncConfig::max_hashes_wanted`])
//! and walks stop at [`SyncConfig::traversal_limit`]. Whatever a cut leaves
//! behind is still a gap between the two frontiers afterwards, so the next
//! exchange picks it up.
//!
//! One snapshot is taken per conversation: by the initiator when it
//! generates phase 1, by the receiver when phase 1 arrives. Records received
//! during the exchange are registered into that snapshot and written to the
//! backend right away; writes are idempotent, so a conversation abandoned
//! halfway leaves only records a later exchange would have sent anyway.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use capsule_core::{validate_record, Ed25519PublicKey, Record, RecordHash};
use capsule_store::LogStore;

use crate::backend::{GraphBackend, MirrorBackend, StoreBackend};
use crate::error::{Result, SyncError};
use crate::messages::{limits, NodeId, Phase, SyncMessage};
use crate::snapshot::Snapshot;

/// Configuration for diff conversations.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// A conversation not finished within this long is reset on the next
    /// call touching that peer.
    pub conversation_timeout: Duration,
    /// Max nodes a single traversal may visit.
    pub traversal_limit: usize,
    /// Records per outgoing message. Clamped to
    /// [`limits::MAX_RECORDS_PER_MESSAGE`].
    pub max_records_per_message: usize,
    /// Wanted hashes per phase 3 message. Clamped to
    /// [`limits::MAX_HASHES_WANTED`].
    pub max_hashes_wanted: usize,
    /// Whether to check hashes (and signatures, with `writer_key`) of
    /// received records before accepting them.
    pub verify_records: bool,
    /// Writer whose signature every record must carry.
    pub writer_key: Option<Ed25519PublicKey>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            conversation_timeout: Duration::from_secs(30),
            traversal_limit: 1_000_000,
            max_records_per_message: limits::MAX_RECORDS_PER_MESSAGE,
            max_hashes_wanted: limits::MAX_HASHES_WANTED,
            verify_records: true,
            writer_key: None,
        }
    }
}

/// Where a conversation with one peer stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// No conversation in flight.
    Resting,
    /// Initiator, phase 1 sent.
    FirstMsgSent,
    /// Initiator, phase 3 sent.
    ThirdMsgSent,
    /// Receiver, phase 2 sent.
    FirstMsgRecved,
    /// Receiver, phase 4 sent. Idle: behaves like `Resting`.
    ThirdMsgRecved,
}

impl PeerState {
    /// True if a new conversation may start from this state.
    pub fn is_idle(&self) -> bool {
        matches!(self, PeerState::Resting | PeerState::ThirdMsgRecved)
    }
}

/// Outcome of processing one message.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Send this back to the peer.
    Reply(SyncMessage),
    /// The exchange completed; nothing to send.
    Finished,
}

/// The two operations a transport drives.
#[async_trait]
pub trait Policy: Send + Sync {
    /// Start a conversation with `peer`.
    ///
    /// Returns `None` while a conversation with that peer is in flight.
    async fn generate_message(&self, peer: &NodeId) -> Result<Option<SyncMessage>>;

    /// Advance the conversation with `peer` by one message.
    async fn process_message(&self, peer: &NodeId, message: SyncMessage) -> Result<Step>;
}

/// Per-peer conversation state.
#[derive(Debug)]
struct Conversation {
    state: PeerState,
    snapshot: Option<Snapshot>,
    started_at: Option<Instant>,
    /// Hashes the peer sent during this conversation; never echoed back.
    received: HashSet<RecordHash>,
}

impl Conversation {
    fn new() -> Self {
        Self {
            state: PeerState::Resting,
            snapshot: None,
            started_at: None,
            received: HashSet::new(),
        }
    }

    /// Back to `Resting`, releasing the snapshot.
    fn reset(&mut self) {
        self.state = PeerState::Resting;
        self.snapshot = None;
        self.started_at = None;
        self.received.clear();
    }

    fn begin(&mut self, state: PeerState, snapshot: Snapshot) {
        self.state = state;
        self.snapshot = Some(snapshot);
        self.started_at = Some(Instant::now());
        self.received.clear();
    }

    fn is_expired(&self, timeout: Duration) -> bool {
        !self.state.is_idle()
            && self
                .started_at
                .map(|started| started.elapsed() > timeout)
                .unwrap_or(false)
    }

    fn snapshot_mut(&mut self, phase: Phase) -> Result<&mut Snapshot> {
        let state = self.state;
        self.snapshot
            .as_mut()
            .ok_or(SyncError::ProtocolState { state, phase })
    }
}

/// Ordered, deduplicated hash list.
#[derive(Default)]
struct HashList {
    seen: HashSet<RecordHash>,
    items: Vec<RecordHash>,
}

impl HashList {
    fn push(&mut self, hash: RecordHash) {
        if self.seen.insert(hash) {
            self.items.push(hash);
        }
    }

    fn extend<'a>(&mut self, hashes: impl IntoIterator<Item = &'a RecordHash>) {
        for hash in hashes {
            self.push(*hash);
        }
    }
}

/// What the local side can offer against a peer's frontier.
#[derive(Default)]
struct Offer {
    /// Records the peer lacks, between matching frontier points.
    send: HashList,
    /// Everything the walks touched, including local ends reached.
    covered: HashSet<RecordHash>,
    /// Unmatched peer frontier hashes not visible locally.
    missing: HashList,
}

/// Keep the first `budget` hashes. The rest wait for a later exchange.
fn capped(
    peer: &NodeId,
    what: &'static str,
    mut hashes: Vec<RecordHash>,
    budget: usize,
) -> Vec<RecordHash> {
    if hashes.len() > budget {
        tracing::debug!(%peer, what, deferred = hashes.len() - budget, "message budget reached");
        hashes.truncate(budget);
    }
    hashes
}

/// `set` without `hash`; a walk never stops at its own start.
fn excluding<'a>(set: &'a HashSet<RecordHash>, hash: &RecordHash) -> Cow<'a, HashSet<RecordHash>> {
    if set.contains(hash) {
        let mut owned = set.clone();
        owned.remove(hash);
        Cow::Owned(owned)
    } else {
        Cow::Borrowed(set)
    }
}

/// Diff-based anti-entropy over a [`GraphBackend`].
pub struct DiffEngine<B: GraphBackend> {
    backend: Arc<B>,
    config: SyncConfig,
    peers: RwLock<HashMap<NodeId, Arc<Mutex<Conversation>>>>,
}

impl<B: GraphBackend> DiffEngine<B> {
    /// Create an engine over `backend`.
    pub fn new(backend: Arc<B>, config: SyncConfig) -> Self {
        Self {
            backend,
            config,
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// The backend this engine reads and writes through.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// The engine's configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Current state of the conversation with `peer`.
    pub async fn peer_state(&self, peer: &NodeId) -> PeerState {
        let conversation = self.peers.read().await.get(peer).cloned();
        match conversation {
            Some(conversation) => conversation.lock().await.state,
            None => PeerState::Resting,
        }
    }

    /// The conversation slot for `peer`, created on first contact.
    async fn conversation(&self, peer: &NodeId) -> Arc<Mutex<Conversation>> {
        if let Some(conversation) = self.peers.read().await.get(peer) {
            return conversation.clone();
        }
        self.peers
            .write()
            .await
            .entry(*peer)
            .or_insert_with(|| Arc::new(Mutex::new(Conversation::new())))
            .clone()
    }

    fn record_budget(&self) -> usize {
        self.config
            .max_records_per_message
            .clamp(1, limits::MAX_RECORDS_PER_MESSAGE)
    }

    fn wanted_budget(&self) -> usize {
        self.config.max_hashes_wanted.clamp(1, limits::MAX_HASHES_WANTED)
    }

    fn expire(&self, peer: &NodeId, conversation: &mut Conversation) {
        if conversation.is_expired(self.config.conversation_timeout) {
            tracing::warn!(%peer, state = ?conversation.state, "conversation expired, resetting");
            conversation.reset();
        }
    }

    async fn advance(
        &self,
        peer: &NodeId,
        conversation: &mut Conversation,
        message: SyncMessage,
    ) -> Result<Step> {
        message.validate()?;

        match (conversation.state, message.phase) {
            (state, Phase::First) if state.is_idle() => self.on_first(peer, conversation, message).await,
            (PeerState::FirstMsgSent, Phase::Second) => {
                self.on_second(peer, conversation, message).await
            }
            (PeerState::FirstMsgRecved, Phase::Third) => {
                self.on_third(peer, conversation, message).await
            }
            (PeerState::ThirdMsgSent, Phase::Fourth) => {
                self.on_fourth(peer, conversation, message).await
            }
            (state, phase) => Err(SyncError::ProtocolState { state, phase }),
        }
    }

    /// Receiver: answer the initiator's frontier.
    async fn on_first(
        &self,
        peer: &NodeId,
        conversation: &mut Conversation,
        message: SyncMessage,
    ) -> Result<Step> {
        conversation.reset();
        let snapshot = self.backend.snapshot().await?;

        let offer = self
            .offer(&snapshot, &message.logical_begins, &message.logical_ends)
            .await?;
        let hashes = capped(peer, "records", offer.send.items, self.record_budget());
        let records = self.backend.read_records(&hashes).await?;
        let reply = SyncMessage::second(snapshot.logical_begins(), snapshot.logical_ends(), records);

        tracing::debug!(
            %peer,
            phase = 1,
            records = reply.records_not_in_rx.len(),
            "answered frontier"
        );
        conversation.begin(PeerState::FirstMsgRecved, snapshot);
        Ok(Step::Reply(reply))
    }

    /// Initiator: take the receiver's records, diff frontiers, ask and offer.
    async fn on_second(
        &self,
        peer: &NodeId,
        conversation: &mut Conversation,
        message: SyncMessage,
    ) -> Result<Step> {
        let accepted = self
            .accept(conversation.snapshot_mut(Phase::Second)?, &message.records_not_in_rx)
            .await?;
        conversation.received.extend(accepted);

        let Conversation {
            snapshot, received, ..
        } = &*conversation;
        let snapshot = snapshot.as_ref().ok_or(SyncError::ProtocolState {
            state: PeerState::FirstMsgSent,
            phase: Phase::Second,
        })?;

        let offer = self
            .offer(snapshot, &message.logical_begins, &message.logical_ends)
            .await?;

        // Our own unmatched frontier the walks did not reach: the peer has
        // no way to ask for it, so send whole components.
        let peer_frontier: HashSet<RecordHash> = message
            .logical_begins
            .iter()
            .chain(&message.logical_ends)
            .copied()
            .collect();
        let own: Vec<RecordHash> = snapshot
            .logical_begins()
            .into_iter()
            .chain(snapshot.logical_ends())
            .filter(|h| !peer_frontier.contains(h) && !offer.covered.contains(h))
            .collect();
        let component = snapshot
            .connected_component(&own, self.config.traversal_limit)
            .await?;

        let mut send = offer.send;
        send.extend(&component);
        let hashes: Vec<RecordHash> = send
            .items
            .into_iter()
            .filter(|h| !received.contains(h))
            .collect();
        let hashes = capped(peer, "records", hashes, self.record_budget());
        let records = self.backend.read_records(&hashes).await?;
        let wanted = capped(peer, "wanted", offer.missing.items, self.wanted_budget());

        tracing::debug!(
            %peer,
            phase = 2,
            received = received.len(),
            records = records.len(),
            wanted = wanted.len(),
            "diffed frontiers"
        );
        conversation.state = PeerState::ThirdMsgSent;
        Ok(Step::Reply(SyncMessage::third(wanted, records)))
    }

    /// Receiver: take the initiator's records and fulfil its requests.
    async fn on_third(
        &self,
        peer: &NodeId,
        conversation: &mut Conversation,
        message: SyncMessage,
    ) -> Result<Step> {
        let snapshot = conversation.snapshot_mut(Phase::Third)?;
        let accepted = self.accept(snapshot, &message.records_not_in_rx).await?;
        let received: HashSet<RecordHash> = accepted.into_iter().collect();

        let wanted: Vec<RecordHash> = message
            .hashes_wanted
            .iter()
            .filter(|h| !received.contains(*h))
            .copied()
            .collect();
        let component = snapshot
            .connected_component(&wanted, self.config.traversal_limit)
            .await?;
        let hashes: Vec<RecordHash> = component
            .into_iter()
            .filter(|h| !received.contains(h))
            .collect();
        let hashes = capped(peer, "records", hashes, self.record_budget());
        let records = self.backend.read_records(&hashes).await?;

        tracing::debug!(
            %peer,
            phase = 3,
            received = received.len(),
            wanted = message.hashes_wanted.len(),
            records = records.len(),
            "fulfilled requests"
        );

        conversation.reset();
        conversation.state = PeerState::ThirdMsgRecved;
        Ok(Step::Reply(SyncMessage::fourth(records)))
    }

    /// Initiator: take the requested components and finish.
    async fn on_fourth(
        &self,
        peer: &NodeId,
        conversation: &mut Conversation,
        message: SyncMessage,
    ) -> Result<Step> {
        let records = &message.records_not_in_rx;
        self.verify(records)?;
        let summary = if records.is_empty() {
            Default::default()
        } else {
            self.backend.write_records(records).await?
        };

        tracing::info!(
            %peer,
            received = conversation.received.len() + records.len(),
            inserted = summary.inserted,
            "conversation finished"
        );
        conversation.reset();
        Ok(Step::Finished)
    }

    /// Walk from every unmatched peer frontier hash we hold toward the
    /// peer's frontier, collecting what lies between.
    async fn offer(
        &self,
        snapshot: &Snapshot,
        peer_begins: &[RecordHash],
        peer_ends: &[RecordHash],
    ) -> Result<Offer> {
        let limit = self.config.traversal_limit;
        let my_begins: HashSet<RecordHash> = snapshot.logical_begins().into_iter().collect();
        let my_ends: HashSet<RecordHash> = snapshot.logical_ends().into_iter().collect();
        let begin_set: HashSet<RecordHash> = peer_begins.iter().copied().collect();
        let end_set: HashSet<RecordHash> = peer_ends.iter().copied().collect();

        let mut offer = Offer::default();

        for begin in peer_begins.iter().filter(|h| !my_begins.contains(*h)) {
            if !snapshot.exist_record(begin).await? {
                offer.missing.push(*begin);
                continue;
            }
            let terminals = excluding(&end_set, begin);
            let walk = snapshot.search_ahead(*begin, &terminals, limit).await?;
            offer.send.extend(&walk.visited);
            offer.send.extend(
                walk.local_ends
                    .iter()
                    .filter(|h| *h != begin && !terminals.contains(*h)),
            );
            offer.covered.extend(walk.visited.iter().chain(&walk.local_ends));
        }

        for end in peer_ends.iter().filter(|h| !my_ends.contains(*h)) {
            if !snapshot.exist_record(end).await? {
                offer.missing.push(*end);
                continue;
            }
            let terminals = excluding(&begin_set, end);
            let walk = snapshot.search_after(*end, &terminals, limit).await?;
            offer.send.extend(&walk.visited);
            offer.covered.extend(walk.visited.iter().chain(&walk.local_ends));
        }

        Ok(offer)
    }

    fn verify(&self, records: &[Record]) -> Result<()> {
        if !self.config.verify_records {
            return Ok(());
        }
        for record in records {
            validate_record(record, self.config.writer_key.as_ref())?;
        }
        Ok(())
    }

    /// Validate, register and write received records. Returns their hashes.
    async fn accept(&self, snapshot: &mut Snapshot, records: &[Record]) -> Result<Vec<RecordHash>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        self.verify(records)?;

        for record in records {
            snapshot
                .register_new_record(record.hash, record.prev_hash())
                .await?;
        }
        let summary = self.backend.write_records(records).await?;
        tracing::debug!(
            records = records.len(),
            inserted = summary.inserted,
            "accepted records"
        );

        Ok(records.iter().map(|r| r.hash).collect())
    }
}

#[async_trait]
impl<B: GraphBackend> Policy for DiffEngine<B> {
    async fn generate_message(&self, peer: &NodeId) -> Result<Option<SyncMessage>> {
        let conversation = self.conversation(peer).await;
        let mut conversation = conversation.lock().await;
        self.expire(peer, &mut conversation);

        if !conversation.state.is_idle() {
            tracing::debug!(%peer, state = ?conversation.state, "conversation in flight");
            return Ok(None);
        }

        conversation.reset();
        let snapshot = self.backend.snapshot().await?;
        let message = SyncMessage::first(snapshot.logical_begins(), snapshot.logical_ends());

        tracing::debug!(
            %peer,
            begins = message.logical_begins.len(),
            ends = message.logical_ends.len(),
            "starting conversation"
        );
        conversation.begin(PeerState::FirstMsgSent, snapshot);
        Ok(Some(message))
    }

    async fn process_message(&self, peer: &NodeId, message: SyncMessage) -> Result<Step> {
        let conversation = self.conversation(peer).await;
        let mut conversation = conversation.lock().await;
        self.expire(peer, &mut conversation);

        let result = self.advance(peer, &mut conversation, message).await;
        if let Err(e) = &result {
            tracing::warn!(%peer, error = %e, "conversation abandoned");
            conversation.reset();
        }
        result
    }
}

/// Which backend a replica's engine runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// Full in-memory mirror of the graph.
    #[default]
    Mirror,
    /// Store queries against snapshot cutoffs.
    Store,
}

/// A diff engine on either backend, chosen at construction.
pub enum AnyPolicy<S: LogStore + ?Sized + 'static> {
    Mirror(DiffEngine<MirrorBackend<S>>),
    Store(DiffEngine<StoreBackend<S>>),
}

impl<S: LogStore + ?Sized + 'static> AnyPolicy<S> {
    /// Build an engine of the given kind over `store`.
    pub async fn new(kind: PolicyKind, store: Arc<S>, config: SyncConfig) -> Result<Self> {
        Ok(match kind {
            PolicyKind::Mirror => {
                let backend = MirrorBackend::load(store).await?;
                AnyPolicy::Mirror(DiffEngine::new(Arc::new(backend), config))
            }
            PolicyKind::Store => {
                AnyPolicy::Store(DiffEngine::new(Arc::new(StoreBackend::new(store)), config))
            }
        })
    }

    /// Which backend this is.
    pub fn kind(&self) -> PolicyKind {
        match self {
            AnyPolicy::Mirror(_) => PolicyKind::Mirror,
            AnyPolicy::Store(_) => PolicyKind::Store,
        }
    }

    /// The engine's backend.
    pub fn backend(&self) -> &dyn GraphBackend {
        match self {
            AnyPolicy::Mirror(engine) => engine.backend().as_ref(),
            AnyPolicy::Store(engine) => engine.backend().as_ref(),
        }
    }

    /// Current state of the conversation with `peer`.
    pub async fn peer_state(&self, peer: &NodeId) -> PeerState {
        match self {
            AnyPolicy::Mirror(engine) => engine.peer_state(peer).await,
            AnyPolicy::Store(engine) => engine.peer_state(peer).await,
        }
    }
}

#[async_trait]
impl<S: LogStore + ?Sized + 'static> Policy for AnyPolicy<S> {
    async fn generate_message(&self, peer: &NodeId) -> Result<Option<SyncMessage>> {
        match self {
            AnyPolicy::Mirror(engine) => engine.generate_message(peer).await,
            AnyPolicy::Store(engine) => engine.generate_message(peer).await,
        }
    }

    async fn process_message(&self, peer: &NodeId, message: SyncMessage) -> Result<Step> {
        match self {
            AnyPolicy::Mirror(engine) => engine.process_message(peer, message).await,
            AnyPolicy::Store(engine) => engine.process_message(peer, message).await,
        }
    }
}
