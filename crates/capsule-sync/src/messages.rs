//! Diff protocol message types.
//!
//! One message shape serves all four phases; which fields may be populated
//! depends on the phase:
//!
//! | Phase | begins/ends | records_not_in_rx | hashes_wanted |
//! |-------|-------------|-------------------|---------------|
//! | 1     | yes         | -                 | -             |
//! | 2     | yes         | yes               | -             |
//! | 3     | -           | yes               | yes           |
//! | 4     | -           | yes               | -             |

use std::fmt;

use serde::{Deserialize, Serialize};

use capsule_core::{Record, RecordHash};

use crate::error::{Result, SyncError};

/// Unique identifier for a node in the replication network.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a random node ID.
    pub fn random() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self)
    }
}

/// Message size limits.
///
/// These bound what a receiver accepts. The engine never sends more: a diff
/// larger than a message is cut and the remainder goes out in later
/// exchanges. Frontiers are not capped, since a replica cannot shrink its own
/// begins and ends and the peer needs all of them to diff correctly.
pub mod limits {
    /// Max hashes in hashes_wanted.
    pub const MAX_HASHES_WANTED: usize = 10_000;
    /// Max records in records_not_in_rx.
    pub const MAX_RECORDS_PER_MESSAGE: usize = 100_000;
}

/// Position of a message in the four-message exchange.
///
/// Encoded on the wire as the integers 1 through 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Phase {
    /// Initiator advertises its frontier.
    First = 1,
    /// Receiver answers with records and its own frontier.
    Second = 2,
    /// Initiator sends records and requests components.
    Third = 3,
    /// Receiver fulfils the requests.
    Fourth = 4,
}

impl TryFrom<u8> for Phase {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Phase::First),
            2 => Ok(Phase::Second),
            3 => Ok(Phase::Third),
            4 => Ok(Phase::Fourth),
            other => Err(format!("unknown phase {}", other)),
        }
    }
}

impl From<Phase> for u8 {
    fn from(phase: Phase) -> u8 {
        phase as u8
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// A diff protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    /// Which step of the exchange this is.
    pub phase: Phase,

    /// Sender's logical begins (phases 1 and 2).
    #[serde(default)]
    pub logical_begins: Vec<RecordHash>,

    /// Sender's logical ends (phases 1 and 2).
    #[serde(default)]
    pub logical_ends: Vec<RecordHash>,

    /// Records the sender believes the receiver lacks (phases 2 to 4).
    #[serde(default)]
    pub records_not_in_rx: Vec<Record>,

    /// Hashes whose connected components the sender requests (phase 3).
    #[serde(default)]
    pub hashes_wanted: Vec<RecordHash>,
}

impl SyncMessage {
    fn empty(phase: Phase) -> Self {
        Self {
            phase,
            logical_begins: Vec::new(),
            logical_ends: Vec::new(),
            records_not_in_rx: Vec::new(),
            hashes_wanted: Vec::new(),
        }
    }

    /// Phase 1: the initiator's frontier.
    pub fn first(logical_begins: Vec<RecordHash>, logical_ends: Vec<RecordHash>) -> Self {
        Self {
            logical_begins,
            logical_ends,
            ..Self::empty(Phase::First)
        }
    }

    /// Phase 2: records for the initiator plus the receiver's frontier.
    pub fn second(
        logical_begins: Vec<RecordHash>,
        logical_ends: Vec<RecordHash>,
        records: Vec<Record>,
    ) -> Self {
        Self {
            logical_begins,
            logical_ends,
            records_not_in_rx: records,
            ..Self::empty(Phase::Second)
        }
    }

    /// Phase 3: requests plus records for the receiver.
    pub fn third(hashes_wanted: Vec<RecordHash>, records: Vec<Record>) -> Self {
        Self {
            hashes_wanted,
            records_not_in_rx: records,
            ..Self::empty(Phase::Third)
        }
    }

    /// Phase 4: the requested components.
    pub fn fourth(records: Vec<Record>) -> Self {
        Self {
            records_not_in_rx: records,
            ..Self::empty(Phase::Fourth)
        }
    }

    /// Check that only the fields allowed for this phase are populated and
    /// that the record and wanted lists respect their [`limits`].
    pub fn validate(&self) -> Result<()> {
        let has_frontier = !self.logical_begins.is_empty() || !self.logical_ends.is_empty();
        let has_records = !self.records_not_in_rx.is_empty();
        let has_wanted = !self.hashes_wanted.is_empty();

        let (frontier_ok, records_ok, wanted_ok) = match self.phase {
            Phase::First => (true, false, false),
            Phase::Second => (true, true, false),
            Phase::Third => (false, true, true),
            Phase::Fourth => (false, true, false),
        };

        if has_frontier && !frontier_ok {
            return Err(self.malformed("frontier"));
        }
        if has_records && !records_ok {
            return Err(self.malformed("records"));
        }
        if has_wanted && !wanted_ok {
            return Err(self.malformed("wanted hashes"));
        }

        if self.hashes_wanted.len() > limits::MAX_HASHES_WANTED {
            return Err(SyncError::MalformedMessage("too many wanted hashes".into()));
        }
        if self.records_not_in_rx.len() > limits::MAX_RECORDS_PER_MESSAGE {
            return Err(SyncError::MalformedMessage("too many records".into()));
        }

        Ok(())
    }

    fn malformed(&self, field: &str) -> SyncError {
        SyncError::MalformedMessage(format!("phase {} message carries {}", self.phase, field))
    }

    /// Encode as CBOR.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| SyncError::MalformedMessage(format!("encode: {}", e)))?;
        Ok(buf)
    }

    /// Decode from CBOR.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| SyncError::MalformedMessage(format!("decode: {}", e)))
    }
}
