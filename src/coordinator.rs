// src/coordinator.rs

//! Coordinator: the top-level state machine driving the backup protocol
//! (spec §4.7). Owns the RollbackLog and the BackupPhase exclusively;
//! fan-out phases delegate to ParallelRunner.

use crate::config::BackupConfig;
use crate::config_server_agent::ConfigServerAgent;
use crate::error::{Error, Result};
use crate::host_agent::{HostAgent, RemoteShell};
use crate::parallel_runner::run_all;
use crate::router_endpoint::{RouterDriver, RouterEndpoint};
use crate::rollback_log::{Compensator, RollbackLog};
use crate::shard_endpoint::{ShardDriver, ShardEndpoint};
use crate::snapshot_worker::SnapshotWorker;
use crate::types::{BackupId, BackupPhase};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

const RETRY_BACKOFF: Duration = Duration::from_secs(2);
const LOCK_POLL_INTERVAL: Duration = Duration::from_secs(5);
const LOCK_POLL_MAX_ATTEMPTS: u32 = 360;

/// A compensator built from a boxed async closure, for the ad hoc
/// compensating actions the Coordinator itself assembles (start the
/// balancer again, restart the config server, unlock every shard, ...).
struct ClosureCompensator<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> Compensator for ClosureCompensator<F>
where
    F: Fn() -> BoxFuture<'static, Result<()>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) {
        if let Err(e) = (self.f)().await {
            warn!(name = %self.name, error = %e, "compensator failed; swallowing");
        }
    }
}

fn compensator<F>(name: &str, f: F) -> Box<dyn Compensator>
where
    F: Fn() -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
{
    Box::new(ClosureCompensator {
        name: name.to_string(),
        f,
    })
}

async fn wait_for_locks(router: &RouterEndpoint, interval: Duration, max_attempts: u32) -> Result<()> {
    for attempt in 1..=max_attempts {
        let locks = router.get_locks().await?;
        if locks.is_empty() {
            return Ok(());
        }
        info!(attempt, held = locks.len(), "waiting for distributed locks to clear");
        if attempt < max_attempts {
            sleep(interval).await;
        }
    }
    Err(Error::ClusterLocked)
}

async fn lock_shards(shards: Vec<Arc<ShardEndpoint>>) -> Result<()> {
    run_all(shards, |ep| Box::pin(async move { ep.lock().await })).await
}

/// Sequential, not parallel: attempts every shard's unlock, accumulating
/// one message per failure, and only raises afterwards (spec §4.7
/// rationale — the cluster must be unlocked even if some unlocks fail).
async fn unlock_shards(shards: &[Arc<ShardEndpoint>]) -> Result<()> {
    let mut errors = Vec::new();
    for ep in shards {
        if let Err(e) = ep.unlock().await {
            errors.push(e.to_string());
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Unlock(errors.join(", ")))
    }
}

async fn create_snapshots(workers: Vec<Arc<SnapshotWorker>>, id: BackupId) -> Result<()> {
    run_all(workers, move |w| {
        let id = id.clone();
        Box::pin(async move { w.create_snapshot(&id).await })
    })
    .await
}

async fn mount_snapshots(workers: Vec<Arc<SnapshotWorker>>, id: BackupId) -> Result<()> {
    run_all(workers, move |w| {
        let id = id.clone();
        Box::pin(async move { w.mount_snapshot(&id).await })
    })
    .await
}

async fn tar_backups(workers: Vec<Arc<SnapshotWorker>>, id: BackupId, timeout: Duration) -> Result<()> {
    run_all(workers, move |w| {
        let id = id.clone();
        Box::pin(async move { w.tar_backup(&id, timeout).await })
    })
    .await
}

async fn unmount_snapshots(workers: Vec<Arc<SnapshotWorker>>) -> Result<()> {
    run_all(workers, |w| Box::pin(async move { w.unmount_snapshot().await })).await
}

async fn remove_snapshots(workers: Vec<Arc<SnapshotWorker>>, id: BackupId) -> Result<()> {
    run_all(workers, move |w| {
        let id = id.clone();
        Box::pin(async move { w.remove_snapshot(&id).await })
    })
    .await
}

pub struct Coordinator {
    router: Arc<RouterEndpoint>,
    config_server: Arc<ConfigServerAgent>,
    shards: Vec<Arc<ShardEndpoint>>,
    workers: Vec<Arc<SnapshotWorker>>,
    rollback: RollbackLog,
    phase: BackupPhase,
    tar_timeout: Duration,
    lock_poll_interval: Duration,
    lock_poll_max_attempts: u32,
}

impl Coordinator {
    /// Discovers shard topology and config servers, builds every
    /// ShardEndpoint and SnapshotWorker, and runs their construction-time
    /// sanity checks (spec §4.4/§4.5, SPEC_FULL §11) — all before any
    /// rollback entry exists.
    pub async fn new(
        config: &BackupConfig,
        shell: Arc<dyn RemoteShell>,
        router_driver: Arc<dyn RouterDriver>,
        shard_driver: Arc<dyn ShardDriver>,
    ) -> Result<Self> {
        let router = Arc::new(RouterEndpoint::new(router_driver));

        let targets = router.get_shards().await?;
        let shards = targets
            .into_iter()
            .map(|(_, target)| Arc::new(ShardEndpoint::new(target.endpoint, shard_driver.clone())))
            .collect();

        let config_server_host = router.pick_config_server().await?;
        let config_server_agent = HostAgent::new(
            config_server_host,
            shell.clone(),
            config.ssh.command_timeout,
        );
        let config_server = Arc::new(
            ConfigServerAgent::new(config_server_agent, config.config_backup_basedir.clone())
                .await?,
        );

        let mut workers = Vec::with_capacity(config.hosts.len());
        for (host, host_cfg) in &config.hosts {
            let agent = HostAgent::new(host.clone(), shell.clone(), config.ssh.command_timeout);
            let worker = SnapshotWorker::new(
                agent,
                host_cfg.logical_volume.clone(),
                host_cfg.mount_point.clone(),
                host_cfg.archive_dir.clone(),
            )
            .await?;
            workers.push(Arc::new(worker));
        }

        Ok(Self {
            router,
            config_server,
            shards,
            workers,
            rollback: RollbackLog::new(),
            phase: BackupPhase::Init,
            tar_timeout: config.ssh.tar_timeout,
            lock_poll_interval: LOCK_POLL_INTERVAL,
            lock_poll_max_attempts: LOCK_POLL_MAX_ATTEMPTS,
        })
    }

    pub fn phase(&self) -> BackupPhase {
        self.phase
    }

    /// Overrides the `wait_for_locks` poll interval and attempt budget.
    /// Production callers never need this — the spec fixes it at 5s x 360
    /// (~30 min) — but tests exercising the boundary behavior around the
    /// attempt limit would otherwise take half an hour to run.
    #[cfg(any(test, feature = "testing"))]
    pub fn with_lock_poll(mut self, interval: Duration, max_attempts: u32) -> Self {
        self.lock_poll_interval = interval;
        self.lock_poll_max_attempts = max_attempts;
        self
    }

    /// Runs `step` under the phase's fixed attempt budget, sleeping
    /// `RETRY_BACKOFF` between attempts. On success, advances `self.phase`.
    /// On exhaustion, drains the rollback log, sets phase to `Aborted`, and
    /// returns the terminal `BackupAborted` error.
    async fn run_phase<F, Fut>(&mut self, phase: BackupPhase, attempts: u32, mut step: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let mut last_err = None;
        for attempt in 1..=attempts {
            match step().await {
                Ok(()) => {
                    self.phase = phase;
                    return Ok(());
                }
                Err(e) => {
                    warn!(?phase, attempt, attempts, error = %e, "phase attempt failed");
                    last_err = Some(e);
                    if attempt < attempts {
                        sleep(RETRY_BACKOFF).await;
                    }
                }
            }
        }
        let err = last_err.expect("attempts >= 1");
        self.rollback.drain_lifo().await;
        self.phase = BackupPhase::Aborted;
        Err(err.into_aborted(phase))
    }

    /// Runs the full, fixed linear protocol of spec §4.7. Returns the
    /// `BackupId` of the completed job, or the terminal `BackupAborted`
    /// error (rollback has already drained by the time this returns an
    /// error).
    pub async fn backup(&mut self) -> Result<BackupId> {
        let id = BackupId::generate();
        info!(%id, "starting backup");

        // 1. stop_balancer — push start_balancer before.
        let router = self.router.clone();
        self.rollback.push(compensator("start_balancer", move || {
            let router = router.clone();
            Box::pin(async move { router.start_balancer().await })
        }));
        let router = self.router.clone();
        self.run_phase(BackupPhase::BalancerStopped, 2, move || {
            let router = router.clone();
            async move { router.stop_balancer().await }
        })
        .await?;

        // 2. wait_for_locks — no rollback mutation.
        let router = self.router.clone();
        let (interval, max_attempts) = (self.lock_poll_interval, self.lock_poll_max_attempts);
        self.run_phase(BackupPhase::Quiesced, 1, move || {
            let router = router.clone();
            async move { wait_for_locks(&router, interval, max_attempts).await }
        })
        .await?;

        // 3. config_server.stop — push config_server.start before.
        let config_server = self.config_server.clone();
        self.rollback
            .push(compensator("config_server.start", move || {
                let config_server = config_server.clone();
                Box::pin(async move { config_server.start().await })
            }));
        let config_server = self.config_server.clone();
        self.run_phase(BackupPhase::ConfigStopped, 1, move || {
            let config_server = config_server.clone();
            async move { config_server.stop().await }
        })
        .await?;

        // 4. config_server.mongodump — no rollback mutation.
        let config_server = self.config_server.clone();
        let dump_id = id.clone();
        self.run_phase(BackupPhase::ConfigDumped, 3, move || {
            let config_server = config_server.clone();
            let id = dump_id.clone();
            async move { config_server.mongodump(&id).await }
        })
        .await?;

        // 5. lock_shards (parallel) — push unlock_shards before.
        let shards_for_unlock = self.shards.clone();
        self.rollback.push(compensator("unlock_shards", move || {
            let shards = shards_for_unlock.clone();
            Box::pin(async move { unlock_shards(&shards).await })
        }));
        let shards = self.shards.clone();
        self.run_phase(BackupPhase::ShardsLocked, 1, move || {
            let shards = shards.clone();
            async move { lock_shards(shards).await }
        })
        .await?;

        // 6. create_snapshots (parallel) — push remove_snapshots before.
        let workers_for_remove = self.workers.clone();
        let id_for_remove = id.clone();
        self.rollback
            .push(compensator("remove_snapshots", move || {
                let workers = workers_for_remove.clone();
                let id = id_for_remove.clone();
                Box::pin(async move { remove_snapshots(workers, id).await })
            }));
        let workers = self.workers.clone();
        let snapshot_id = id.clone();
        self.run_phase(BackupPhase::SnapshotsCreated, 1, move || {
            let workers = workers.clone();
            let id = snapshot_id.clone();
            async move { create_snapshots(workers, id).await }
        })
        .await?;

        // 7. unlock_shards — remove the compensator before running.
        self.rollback.remove("unlock_shards");
        let shards = self.shards.clone();
        self.run_phase(BackupPhase::ShardsUnlocked, 2, move || {
            let shards = shards.clone();
            async move { unlock_shards(&shards).await }
        })
        .await?;

        // 8. config_server.start — remove the compensator before running.
        self.rollback.remove("config_server.start");
        let config_server = self.config_server.clone();
        self.run_phase(BackupPhase::ConfigStarted, 2, move || {
            let config_server = config_server.clone();
            async move { config_server.start().await }
        })
        .await?;

        // 9. start_balancer — remove the compensator before running.
        self.rollback.remove("start_balancer");
        let router = self.router.clone();
        self.run_phase(BackupPhase::BalancerStarted, 4, move || {
            let router = router.clone();
            async move { router.start_balancer().await }
        })
        .await?;

        // 10. mount_snapshots (parallel) — push unmount_snapshots before.
        let workers_for_unmount = self.workers.clone();
        self.rollback
            .push(compensator("unmount_snapshots", move || {
                let workers = workers_for_unmount.clone();
                Box::pin(async move { unmount_snapshots(workers).await })
            }));
        let workers = self.workers.clone();
        let mount_id = id.clone();
        self.run_phase(BackupPhase::SnapshotsMounted, 1, move || {
            let workers = workers.clone();
            let id = mount_id.clone();
            async move { mount_snapshots(workers, id).await }
        })
        .await?;

        // 11. tar_backups (parallel) — no rollback mutation.
        let workers = self.workers.clone();
        let tar_id = id.clone();
        let tar_timeout = self.tar_timeout;
        self.run_phase(BackupPhase::ArchivesWritten, 1, move || {
            let workers = workers.clone();
            let id = tar_id.clone();
            async move { tar_backups(workers, id, tar_timeout).await }
        })
        .await?;

        // 12. unmount_snapshots (parallel) — remove the compensator before running.
        self.rollback.remove("unmount_snapshots");
        let workers = self.workers.clone();
        self.run_phase(BackupPhase::SnapshotsUnmounted, 1, move || {
            let workers = workers.clone();
            async move { unmount_snapshots(workers).await }
        })
        .await?;

        // 13. remove_snapshots (parallel) — remove the compensator before running.
        self.rollback.remove("remove_snapshots");
        let workers = self.workers.clone();
        let remove_id = id.clone();
        self.run_phase(BackupPhase::SnapshotsRemoved, 1, move || {
            let workers = workers.clone();
            let id = remove_id.clone();
            async move { remove_snapshots(workers, id).await }
        })
        .await?;

        self.phase = BackupPhase::Done;
        info!(%id, "backup complete");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackupConfig, HostConfig, SshConfig};
    use crate::host_agent::testing::MockShell;
    use crate::router_endpoint::testing::MockRouterDriver;
    use crate::shard_endpoint::testing::MockShardDriver;
    use crate::types::{MemberHealth, MemberRole, ReplicaSetMember, ShardTopology};
    use std::collections::HashMap;

    fn test_config() -> BackupConfig {
        let mut hosts = HashMap::new();
        hosts.insert(
            "host1".to_string(),
            HostConfig {
                logical_volume: "/dev/vg0/mongo".to_string(),
                mount_point: "/mnt/snap".to_string(),
                archive_dir: "/backup".to_string(),
            },
        );
        BackupConfig {
            router_addr: "127.0.0.1:27017".to_string(),
            hosts,
            config_backup_basedir: "/backup/config".to_string(),
            ssh: SshConfig {
                connect_timeout: Duration::from_secs(5),
                command_timeout: Duration::from_secs(5),
                tar_timeout: Duration::from_secs(5),
                keepalive_interval: Duration::from_secs(5),
            },
        }
    }

    fn router_driver_with_one_standalone_shard() -> MockRouterDriver {
        let mut driver = MockRouterDriver::new();
        driver.shards = vec!["shard1:27018".to_string()];
        driver
    }

    #[tokio::test]
    async fn happy_path_completes_and_drains_no_rollback() {
        let router_driver = Arc::new(router_driver_with_one_standalone_shard());
        let shard_driver = Arc::new(MockShardDriver::new());
        let shell = Arc::new(MockShell::always_ok());
        let config = test_config();

        let mut coordinator = Coordinator::new(&config, shell, router_driver, shard_driver)
            .await
            .unwrap();
        let result = coordinator.backup().await;
        assert!(result.is_ok());
        assert_eq!(coordinator.phase(), BackupPhase::Done);
        assert!(coordinator.rollback.is_empty());
    }

    #[tokio::test]
    async fn no_healthy_secondary_or_primary_aborts_before_any_mutation() {
        let mut router_driver = MockRouterDriver::new();
        router_driver.shards = vec!["rs1/a1,a2".to_string()];
        router_driver.repl_sets.insert(
            "rs1".to_string(),
            ShardTopology::ReplicaSet {
                name: "rs1".to_string(),
                members: vec![ReplicaSetMember {
                    host: "a1:27018".to_string(),
                    role: MemberRole::Other,
                    health: MemberHealth::Down,
                    optime: 0,
                }],
            },
        );
        let shard_driver = Arc::new(MockShardDriver::new());
        let shell = Arc::new(MockShell::always_ok());
        let config = test_config();

        let result = Coordinator::new(&config, shell, Arc::new(router_driver), shard_driver).await;
        assert!(result.is_err());
    }
}
