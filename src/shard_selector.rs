// src/shard_selector.rs

//! ShardSelector: given a shard's topology, picks the member to lock
//! (spec §4.3, §4.7's "LockTarget" rule). Pure logic, no I/O — the
//! topology itself is gathered by RouterEndpoint.

use crate::error::{Error, Result};
use crate::types::{LockTarget, MemberHealth, MemberRole, ShardTopology};

/// Chooses the lock target for one shard:
/// 1. Candidates = secondaries that are healthy.
/// 2. If any, pick the one with the largest optime (least replication lag).
/// 3. Otherwise fall back to the primary.
/// 4. If neither exists, fail with `NoLockTargetError`.
///
/// A standalone shard's host is always its own lock target.
pub fn select_lock_target(topology: &ShardTopology) -> Result<LockTarget> {
    match topology {
        ShardTopology::Standalone { host } => Ok(LockTarget {
            endpoint: host.clone(),
        }),
        ShardTopology::ReplicaSet { name, members } => {
            let best_secondary = members
                .iter()
                .filter(|m| m.role == MemberRole::Secondary && m.health == MemberHealth::Up)
                .max_by_key(|m| m.optime);

            if let Some(member) = best_secondary {
                return Ok(LockTarget {
                    endpoint: member.host.clone(),
                });
            }

            let primary = members
                .iter()
                .find(|m| m.role == MemberRole::Primary && m.health == MemberHealth::Up);

            match primary {
                Some(member) => Ok(LockTarget {
                    endpoint: member.host.clone(),
                }),
                None => Err(Error::NoLockTarget(name.clone())),
            }
        }
    }
}
