// src/types.rs

//! Shared data types for the backup coordinator: the backup identifier, the
//! cluster topology snapshot, lock targets, and per-host snapshot state.

use chrono::Local;
use std::fmt;

/// A timestamp-based identifier for one backup invocation, unique within a
/// single host's local clock resolution (one-second granularity).
///
/// Format: `YYYYMMDD-HHMMSS`. Used both as the LVM snapshot name and as the
/// subdirectory name for the config-server dump.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackupId(String);

impl BackupId {
    /// Generates a new id from the current local time.
    pub fn generate() -> Self {
        Self(Local::now().format("%Y%m%d-%H%M%S").to_string())
    }

    /// Parses and validates an externally-provided id against
    /// `^\d{8}-\d{6}$`. Exposed for tests that need a fixed id.
    pub fn parse(s: impl Into<String>) -> Option<Self> {
        let s = s.into();
        let bytes = s.as_bytes();
        let valid = bytes.len() == 15
            && bytes[..8].iter().all(u8::is_ascii_digit)
            && bytes[8] == b'-'
            && bytes[9..].iter().all(u8::is_ascii_digit);
        valid.then_some(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The role of one member within a replica-set shard, as reported by
/// `replSetGetStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    Primary,
    Secondary,
    Other,
}

/// The health of a replica-set member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberHealth {
    Up,
    Down,
}

/// One member of a replica-set shard as reported by the router.
#[derive(Debug, Clone)]
pub struct ReplicaSetMember {
    pub host: String,
    pub role: MemberRole,
    pub health: MemberHealth,
    /// The timestamp of the latest applied write (used as a lag proxy).
    pub optime: u64,
}

/// One shard's topology, discovered at job start.
#[derive(Debug, Clone)]
pub enum ShardTopology {
    /// A single, non-replicated shard member, identified by `host:port`.
    Standalone { host: String },
    /// A replica-set shard.
    ReplicaSet {
        name: String,
        members: Vec<ReplicaSetMember>,
    },
}

impl ShardTopology {
    pub fn display_name(&self) -> String {
        match self {
            ShardTopology::Standalone { host } => host.clone(),
            ShardTopology::ReplicaSet { name, .. } => name.clone(),
        }
    }
}

/// The member chosen to be locked for one shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockTarget {
    pub endpoint: String,
}

/// Per-host forward progress through the snapshot lifecycle. Transitions are
/// forward-only within a job; rollback drives a host back toward `Absent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostSnapshotState {
    Absent,
    Created { snapshot_path: String },
    Mounted,
    Archived,
    Unmounted,
    Removed,
}

/// The Coordinator's linear state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackupPhase {
    Init,
    BalancerStopped,
    Quiesced,
    ConfigStopped,
    ConfigDumped,
    ShardsLocked,
    SnapshotsCreated,
    ShardsUnlocked,
    ConfigStarted,
    BalancerStarted,
    SnapshotsMounted,
    ArchivesWritten,
    SnapshotsUnmounted,
    SnapshotsRemoved,
    Done,
    Aborted,
}
