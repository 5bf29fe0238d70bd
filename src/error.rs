// src/error.rs

//! The error taxonomy for the backup coordinator.

use crate::types::{BackupPhase, HostSnapshotState};
use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All failure kinds the coordinator can produce.
///
/// `BackupAborted` is the terminal error: it is only ever raised by the
/// Coordinator's retry driver once a phase has exhausted its attempt budget
/// and the rollback log has been drained.
#[derive(Error, Debug)]
pub enum Error {
    /// The remote-shell transport itself failed (connection, auth, timeout
    /// at the transport level) as distinct from the remote command merely
    /// exiting non-zero.
    #[error("transport error on host {host}: {message}")]
    Transport { host: String, message: String },

    /// A remote command completed but returned a non-zero exit code.
    #[error("command failed on {host} (exit {exit_code}): {command}")]
    Command {
        host: String,
        command: String,
        exit_code: i32,
    },

    /// Writing or reading back the balancer `stopped` flag did not settle.
    #[error("balancer error: {0}")]
    Balancer(String),

    /// A shard member did not report `is_locked = true` after `fsync(lock=true)`.
    #[error("could not lock shard {0}")]
    Lock(String),

    /// A shard member did not report `is_locked = false` after unlock.
    #[error("could not unlock shard {0}")]
    Unlock(String),

    /// A snapshot-lifecycle operation was attempted while the host's
    /// per-host state machine (spec §3) was not in the state that operation
    /// requires — e.g. `tar_backup` before `mount_snapshot` reported
    /// success, or `mount_snapshot` before `create_snapshot` ever ran.
    #[error("host {host}: {operation} requires state {expected}, found {found:?}")]
    SnapshotMissing {
        host: String,
        operation: &'static str,
        expected: &'static str,
        found: HostSnapshotState,
    },

    /// `wait_for_locks` reached its attempt budget with locks still held.
    #[error("cluster is still locked after the maximum wait; aborting backup")]
    ClusterLocked,

    /// A replica-set shard had neither a healthy secondary nor a primary.
    #[error("no lock target available for shard {0}")]
    NoLockTarget(String),

    /// The terminal error: a phase's retries were exhausted and rollback has
    /// already run. Carries the phase at which the job aborted and the
    /// underlying cause.
    #[error("backup aborted at phase {phase:?}: {source}")]
    BackupAborted {
        phase: BackupPhase,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wraps `self` as the terminal `BackupAborted` error for the given phase.
    pub fn into_aborted(self, phase: BackupPhase) -> Error {
        Error::BackupAborted {
            phase,
            source: Box::new(self),
        }
    }
}
