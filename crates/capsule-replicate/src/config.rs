//! Daemon configuration.
//!
//! Loaded from JSON; every field has a default so a config file only names
//! what it changes:
//!
//! ```json
//! {
//!   "policy": "store",
//!   "heartbeat_interval_ms": 500,
//!   "heartbeat": { "fanout": 2 },
//!   "writer_key": "9c1f..."
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use capsule_core::Ed25519PublicKey;
use capsule_sync::{limits, PolicyKind, SyncConfig};
use serde::{Deserialize, Serialize};

use crate::error::{ReplicateError, Result};

/// How each heartbeat picks the peers it starts conversations with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatMode {
    /// Walk the sorted peer list one peer per tick.
    #[default]
    Cycle,
    /// One uniformly random peer per tick.
    Random,
    /// `n` distinct random peers per tick.
    Fanout(usize),
}

/// Configuration for a [`Replicator`](crate::Replicator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Backend the diff engine runs on.
    pub policy: PolicyKind,
    /// Milliseconds between heartbeats.
    pub heartbeat_interval_ms: u64,
    /// Peer selection per heartbeat.
    pub heartbeat: HeartbeatMode,
    /// Milliseconds before an unfinished conversation is reset.
    pub conversation_timeout_ms: u64,
    /// Max nodes a single traversal may visit.
    pub traversal_limit: usize,
    /// Records per outgoing message; larger diffs span several exchanges.
    pub max_records_per_message: usize,
    /// Wanted hashes per request message.
    pub max_hashes_wanted: usize,
    /// Check hashes (and signatures, with `writer_key`) of received records.
    pub verify_records: bool,
    /// Hex-encoded Ed25519 key of the capsule's writer.
    pub writer_key: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let sync = SyncConfig::default();
        Self {
            policy: PolicyKind::default(),
            heartbeat_interval_ms: 1_000,
            heartbeat: HeartbeatMode::default(),
            conversation_timeout_ms: sync.conversation_timeout.as_millis() as u64,
            traversal_limit: sync.traversal_limit,
            max_records_per_message: sync.max_records_per_message,
            max_hashes_wanted: sync.max_hashes_wanted,
            verify_records: sync.verify_records,
            writer_key: None,
        }
    }
}

impl DaemonConfig {
    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Reject values the daemon cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_ms == 0 {
            return Err(ReplicateError::Config(
                "heartbeat_interval_ms must be positive".into(),
            ));
        }
        if self.heartbeat == HeartbeatMode::Fanout(0) {
            return Err(ReplicateError::Config("fanout degree must be positive".into()));
        }
        if self.traversal_limit == 0 {
            return Err(ReplicateError::Config("traversal_limit must be positive".into()));
        }
        if !(1..=limits::MAX_RECORDS_PER_MESSAGE).contains(&self.max_records_per_message) {
            return Err(ReplicateError::Config(format!(
                "max_records_per_message must be in 1..={}",
                limits::MAX_RECORDS_PER_MESSAGE
            )));
        }
        if !(1..=limits::MAX_HASHES_WANTED).contains(&self.max_hashes_wanted) {
            return Err(ReplicateError::Config(format!(
                "max_hashes_wanted must be in 1..={}",
                limits::MAX_HASHES_WANTED
            )));
        }
        self.writer_key()?;
        Ok(())
    }

    /// Interval between heartbeats.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Decoded writer key, if one is configured.
    pub fn writer_key(&self) -> Result<Option<Ed25519PublicKey>> {
        self.writer_key
            .as_deref()
            .map(|hex| {
                Ed25519PublicKey::from_hex(hex)
                    .map_err(|e| ReplicateError::Config(format!("writer_key: {}", e)))
            })
            .transpose()
    }

    /// Engine settings derived from this config.
    pub fn sync_config(&self) -> Result<SyncConfig> {
        Ok(SyncConfig {
            conversation_timeout: Duration::from_millis(self.conversation_timeout_ms),
            traversal_limit: self.traversal_limit,
            max_records_per_message: self.max_records_per_message,
            max_hashes_wanted: self.max_hashes_wanted,
            verify_records: self.verify_records,
            writer_key: self.writer_key()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_core::Keypair;

    #[test]
    fn test_empty_json_is_default() {
        let config = DaemonConfig::from_json("{}").unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.sync_config().unwrap(), SyncConfig::default());
    }

    #[test]
    fn test_parse_full_config() {
        let key = Keypair::from_seed(&[7; 32]).public_key();
        let json = format!(
            r#"{{
                "policy": "store",
                "heartbeat_interval_ms": 250,
                "heartbeat": {{ "fanout": 3 }},
                "conversation_timeout_ms": 5000,
                "traversal_limit": 64,
                "max_records_per_message": 500,
                "verify_records": false,
                "writer_key": "{}"
            }}"#,
            key.to_hex()
        );

        let config = DaemonConfig::from_json(&json).unwrap();
        assert_eq!(config.policy, PolicyKind::Store);
        assert_eq!(config.heartbeat, HeartbeatMode::Fanout(3));
        assert_eq!(config.heartbeat_interval(), Duration::from_millis(250));

        let sync = config.sync_config().unwrap();
        assert_eq!(sync.conversation_timeout, Duration::from_secs(5));
        assert_eq!(sync.traversal_limit, 64);
        assert_eq!(sync.max_records_per_message, 500);
        assert_eq!(sync.max_hashes_wanted, limits::MAX_HASHES_WANTED);
        assert!(!sync.verify_records);
        assert_eq!(sync.writer_key, Some(key));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            DaemonConfig::from_json(r#"{"heartbeat_interval_ms": 0}"#),
            Err(ReplicateError::Config(_))
        ));
        assert!(matches!(
            DaemonConfig::from_json(r#"{"heartbeat": {"fanout": 0}}"#),
            Err(ReplicateError::Config(_))
        ));
        assert!(matches!(
            DaemonConfig::from_json(r#"{"max_records_per_message": 0}"#),
            Err(ReplicateError::Config(_))
        ));
        assert!(matches!(
            DaemonConfig::from_json(r#"{"max_hashes_wanted": 10001}"#),
            Err(ReplicateError::Config(_))
        ));
        assert!(matches!(
            DaemonConfig::from_json(r#"{"writer_key": "abcd"}"#),
            Err(ReplicateError::Config(_))
        ));
        assert!(matches!(
            DaemonConfig::from_json(r#"{"policy": "naive"}"#),
            Err(ReplicateError::Json(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica.json");
        std::fs::write(&path, r#"{"heartbeat": "random"}"#).unwrap();

        let config = DaemonConfig::from_file(&path).unwrap();
        assert_eq!(config.heartbeat, HeartbeatMode::Random);

        assert!(matches!(
            DaemonConfig::from_file(dir.path().join("missing.json")),
            Err(ReplicateError::Io(_))
        ));
    }
}
