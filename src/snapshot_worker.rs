// src/snapshot_worker.rs

//! SnapshotWorker: per-host LVM snapshot lifecycle (spec §4.5) —
//! create_snapshot -> mount_snapshot -> tar_backup -> unmount_snapshot ->
//! remove_snapshot.

use crate::error::{Error, Result};
use crate::host_agent::HostAgent;
use crate::types::{BackupId, HostSnapshotState};
use std::sync::Mutex;
use tracing::info;

pub struct SnapshotWorker {
    host: HostAgent,
    logical_volume: String,
    mount_point: String,
    archive_dir: String,
    state: Mutex<HostSnapshotState>,
}

impl SnapshotWorker {
    /// Construction-time check (spec §4.5, supplemented per SPEC_FULL §11):
    /// the configured logical volume must exist on the host
    /// (`lvdisplay <lvol>` returns 0), otherwise this raises before the
    /// Coordinator has pushed any rollback entry for this host.
    pub async fn new(
        host: HostAgent,
        logical_volume: impl Into<String>,
        mount_point: impl Into<String>,
        archive_dir: impl Into<String>,
    ) -> Result<Self> {
        let logical_volume = logical_volume.into();
        let out = host
            .run(&format!("lvdisplay {logical_volume}"), None, false)
            .await?;
        if !out.success() {
            return Err(Error::Command {
                host: host.host().to_string(),
                command: format!("lvdisplay {logical_volume}"),
                exit_code: out.exit_code,
            });
        }
        Ok(Self {
            host,
            logical_volume,
            mount_point: mount_point.into(),
            archive_dir: archive_dir.into(),
            state: Mutex::new(HostSnapshotState::Absent),
        })
    }

    pub fn host(&self) -> &str {
        self.host.host()
    }

    /// Returns the current per-host lifecycle state (spec §3). Exposed for
    /// the Coordinator's diagnostics and for tests.
    pub fn state(&self) -> HostSnapshotState {
        self.state.lock().unwrap().clone()
    }

    fn invalid_state(&self, operation: &'static str, expected: &'static str) -> Error {
        Error::SnapshotMissing {
            host: self.host().to_string(),
            operation,
            expected,
            found: self.state(),
        }
    }

    /// Creates an LVM snapshot of the configured logical volume, named
    /// `id`, sized `100%free` of the containing volume group. Records the
    /// snapshot's device path by listing LVM volumes and matching by name,
    /// and advances the per-host state from `Absent` to `Created`.
    pub async fn create_snapshot(&self, id: &BackupId) -> Result<()> {
        if self.state() != HostSnapshotState::Absent {
            return Err(self.invalid_state("create_snapshot", "Absent"));
        }

        let create_cmd = format!(
            "lvcreate --snapshot {} --name {} --extents '100%free'",
            self.logical_volume, id
        );
        let out = self.host.run(&create_cmd, None, false).await?;
        if !out.success() {
            return Err(Error::Command {
                host: self.host().to_string(),
                command: create_cmd,
                exit_code: out.exit_code,
            });
        }

        let discover_cmd = format!(
            "lvdisplay | grep 'LV Path' | grep {id} | awk '{{print $NF}}'"
        );
        let out = self.host.run(&discover_cmd, None, true).await?;
        let path = out.stdout.unwrap_or_default().trim().to_string();
        if path.is_empty() {
            return Err(self.invalid_state("create_snapshot", "a discoverable LV path"));
        }
        *self.state.lock().unwrap() = HostSnapshotState::Created {
            snapshot_path: path.clone(),
        };
        info!(host = self.host(), %path, "snapshot created");
        Ok(())
    }

    /// Mounts the recorded snapshot path at the configured mount point.
    /// Precondition: state `Created`; advances to `Mounted` on success.
    ///
    /// Path discovery uses a structured `lvs` query rather than the
    /// `lvdisplay | grep | awk` pipeline `create_snapshot` uses, per the
    /// spec's explicit recommendation (spec §9) — it re-resolves the path
    /// defensively in case `create_snapshot`'s recorded value is stale.
    pub async fn mount_snapshot(&self, id: &BackupId) -> Result<()> {
        let recorded = match self.state() {
            HostSnapshotState::Created { snapshot_path } => snapshot_path,
            _ => return Err(self.invalid_state("mount_snapshot", "Created")),
        };

        let query = format!("lvs --noheadings -o lv_path --select 'lv_name={id}'");
        let out = self.host.run(&query, None, true).await?;
        let path = out
            .stdout
            .unwrap_or_default()
            .trim()
            .to_string();
        let path = if path.is_empty() { recorded } else { path };

        let mount_cmd = format!("mount {path} {}", self.mount_point);
        let out = self.host.run(&mount_cmd, None, false).await?;
        if out.success() {
            *self.state.lock().unwrap() = HostSnapshotState::Mounted;
            info!(host = self.host(), "snapshot mounted");
            Ok(())
        } else {
            Err(Error::Command {
                host: self.host().to_string(),
                command: mount_cmd,
                exit_code: out.exit_code,
            })
        }
    }

    /// Writes `<archive_dir>/<id>.tar` containing the mount point.
    /// Precondition: state `Mounted`; advances to `Archived` on success.
    /// The long-running step; the caller is expected to pass a
    /// tar-specific timeout rather than the default per-command timeout.
    pub async fn tar_backup(&self, id: &BackupId, timeout: std::time::Duration) -> Result<()> {
        if self.state() != HostSnapshotState::Mounted {
            return Err(self.invalid_state("tar_backup", "Mounted"));
        }

        let archive_path = format!("{}/{id}.tar", self.archive_dir);
        let cmd = format!("tar -cvf {archive_path} {}", self.mount_point);
        let out = self.host.run(&cmd, Some(timeout), false).await?;
        if out.success() {
            *self.state.lock().unwrap() = HostSnapshotState::Archived;
            info!(host = self.host(), %archive_path, "archive written");
            Ok(())
        } else {
            Err(Error::Command {
                host: self.host().to_string(),
                command: cmd,
                exit_code: out.exit_code,
            })
        }
    }

    /// Precondition: state `Mounted` or `Archived` — a mount survives
    /// whether or not `tar_backup` on this host ever succeeded (the
    /// rollback path after a sibling host's `tar_backup` fails still needs
    /// this host's mount torn down even though it was never archived).
    /// Advances to `Unmounted` on success.
    pub async fn unmount_snapshot(&self) -> Result<()> {
        if !matches!(
            self.state(),
            HostSnapshotState::Mounted | HostSnapshotState::Archived
        ) {
            return Err(self.invalid_state("unmount_snapshot", "Mounted or Archived"));
        }

        let cmd = format!("umount -f {}", self.mount_point);
        let out = self.host.run(&cmd, None, false).await?;
        if out.success() {
            *self.state.lock().unwrap() = HostSnapshotState::Unmounted;
            info!(host = self.host(), "snapshot unmounted");
            Ok(())
        } else {
            Err(Error::Command {
                host: self.host().to_string(),
                command: cmd,
                exit_code: out.exit_code,
            })
        }
    }

    /// Runs `lvremove -f <id>` — the LV name, not the recorded device path,
    /// exactly as the source does (spec §9). This is functional only when
    /// names are unique across volume groups on the host.
    ///
    /// Precondition: state `Created` or `Unmounted` (spec §3) — a snapshot
    /// that was created but never mounted (the rollback path after a
    /// sibling host's `create_snapshot` fails) is just as removable as one
    /// that ran the full archive-and-unmount cycle. Advances to `Removed`.
    pub async fn remove_snapshot(&self, id: &BackupId) -> Result<()> {
        if !matches!(
            self.state(),
            HostSnapshotState::Created { .. } | HostSnapshotState::Unmounted
        ) {
            return Err(self.invalid_state("remove_snapshot", "Created or Unmounted"));
        }

        let cmd = format!("lvremove -f {id}");
        let out = self.host.run(&cmd, None, false).await?;
        if out.success() {
            *self.state.lock().unwrap() = HostSnapshotState::Removed;
            info!(host = self.host(), "snapshot removed");
            Ok(())
        } else {
            Err(Error::Command {
                host: self.host().to_string(),
                command: cmd,
                exit_code: out.exit_code,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_agent::testing::MockShell;
    use crate::host_agent::CommandOutput;
    use std::sync::Arc;
    use std::time::Duration;

    fn ok(stdout: Option<&str>) -> Result<CommandOutput> {
        Ok(CommandOutput {
            exit_code: 0,
            stdout: stdout.map(str::to_string),
        })
    }

    fn fail() -> Result<CommandOutput> {
        Ok(CommandOutput {
            exit_code: 1,
            stdout: None,
        })
    }

    async fn worker(responses: Vec<Result<CommandOutput>>) -> SnapshotWorker {
        let shell = Arc::new(MockShell::new(responses));
        let host = HostAgent::new("host1", shell, Duration::from_secs(30));
        SnapshotWorker::new(host, "/dev/vg0/mongo", "/mnt/snap", "/backup")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn new_fails_if_logical_volume_missing() {
        let shell = Arc::new(MockShell::new(vec![fail()]));
        let host = HostAgent::new("host1", shell, Duration::from_secs(30));
        let result = SnapshotWorker::new(host, "/dev/vg0/missing", "/mnt/snap", "/backup").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn create_snapshot_records_discovered_path() {
        // new(): lvdisplay ok; create_snapshot: lvcreate ok, discover path.
        let w = worker(vec![
            ok(None),
            ok(None),
            ok(Some("/dev/vg0/20250101-000000")),
        ])
        .await;
        let id = BackupId::parse("20250101-000000").unwrap();
        w.create_snapshot(&id).await.unwrap();
        assert_eq!(
            w.state(),
            HostSnapshotState::Created {
                snapshot_path: "/dev/vg0/20250101-000000".to_string()
            }
        );
    }

    #[tokio::test]
    async fn mount_before_create_reports_invalid_state() {
        let w = worker(vec![ok(None)]).await;
        let id = BackupId::parse("20250101-000000").unwrap();
        let err = w.mount_snapshot(&id).await.unwrap_err();
        assert!(matches!(err, Error::SnapshotMissing { expected: "Created", .. }));
    }

    #[tokio::test]
    async fn remove_snapshot_uses_lv_name() {
        // new(): lvdisplay ok; create_snapshot: lvcreate ok, discover path ok;
        // remove_snapshot: lvremove ok.
        let w = worker(vec![
            ok(None),
            ok(None),
            ok(Some("/dev/vg0/20250101-000000")),
            ok(None),
        ])
        .await;
        let id = BackupId::parse("20250101-000000").unwrap();
        w.create_snapshot(&id).await.unwrap();
        w.remove_snapshot(&id).await.unwrap();
        assert_eq!(w.state(), HostSnapshotState::Removed);
    }

    #[tokio::test]
    async fn remove_before_create_reports_invalid_state() {
        let w = worker(vec![ok(None)]).await;
        let id = BackupId::parse("20250101-000000").unwrap();
        let err = w.remove_snapshot(&id).await.unwrap_err();
        assert!(matches!(
            err,
            Error::SnapshotMissing { expected: "Created or Unmounted", .. }
        ));
    }
}
