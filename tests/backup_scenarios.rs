// tests/backup_scenarios.rs
//
// End-to-end protocol scenarios. Requires the `testing` feature
// (`cargo test --features testing`) to access the mock collaborators.

#![cfg(feature = "testing")]

use shardvault::config::{BackupConfig, HostConfig, SshConfig};
use shardvault::coordinator::Coordinator;
use shardvault::host_agent::testing::ScriptedShell;
use shardvault::host_agent::CommandOutput;
use shardvault::router_endpoint::testing::MockRouterDriver;
use shardvault::router_endpoint::RouterDriver;
use shardvault::shard_endpoint::testing::MockShardDriver;
use shardvault::shard_endpoint::ShardDriver;
use shardvault::types::BackupPhase;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn ok(stdout: &str) -> shardvault::Result<CommandOutput> {
    Ok(CommandOutput {
        exit_code: 0,
        stdout: Some(stdout.to_string()),
    })
}

fn fail() -> shardvault::Result<CommandOutput> {
    Ok(CommandOutput {
        exit_code: 1,
        stdout: None,
    })
}

fn two_host_config() -> BackupConfig {
    let mut hosts = HashMap::new();
    for host in ["host1", "host2"] {
        hosts.insert(
            host.to_string(),
            HostConfig {
                logical_volume: "/dev/vg0/mongo".to_string(),
                mount_point: "/mnt/snap".to_string(),
                archive_dir: "/backup".to_string(),
            },
        );
    }
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

fn router_with_two_standalone_shards() -> MockRouterDriver {
    let mut driver = MockRouterDriver::new();
    driver.shards = vec!["shard1:27018".to_string(), "shard2:27018".to_string()];
    driver.config_servers = vec!["cfg1".to_string()];
    driver
}

/// Scenario 2: snapshot creation fails on host2 at step 6. Expected: no
/// tar files; `unlock_shards` and `remove_snapshots` both invoked —
/// `remove_snapshots` actually removes host1's snapshot (its
/// `create_snapshot` succeeded, leaving it in state `Created`) but is a
/// guarded no-op on host2 (whose state never left `Absent`, so there is
/// nothing on disk to remove); `config_server.start` invoked;
/// `start_balancer` invoked; final phase = aborted.
#[tokio::test]
async fn scenario_2_snapshot_failure_on_one_host_rolls_back_everything() {
    let router_driver = Arc::new(router_with_two_standalone_shards());
    let shard_driver = Arc::new(MockShardDriver::new());
    let config = two_host_config();

    let shell = Arc::new(ScriptedShell::new(|host, cmd| {
        if host == "host2" && cmd.starts_with("lvcreate") {
            return fail();
        }
        if cmd.contains("grep 'LV Path'") || cmd.starts_with("lvs --noheadings") {
            return ok("/dev/mock/snap");
        }
        ok("")
    }));

    let mut coordinator = Coordinator::new(&config, shell.clone(), router_driver.clone(), shard_driver.clone())
        .await
        .unwrap();

    let result = coordinator.backup().await;
    assert!(result.is_err());
    assert_eq!(coordinator.phase(), BackupPhase::Aborted);

    assert!(!shell.called_with("tar -cvf"));
    assert!(shell.calls_for_host("host1").iter().any(|c| c.starts_with("lvremove -f")));
    assert!(!shell.calls_for_host("host2").iter().any(|c| c.starts_with("lvremove -f")));
    assert!(shell.called_with("/etc/init.d/mongodb start"));
    assert!(!router_driver.balancer_stopped().await.unwrap());

    for endpoint in ["shard1:27018", "shard2:27018"] {
        assert!(!shard_driver.is_locked(endpoint).await.unwrap());
    }
}

/// Scenario 3: tar fails on host1 at step 11. Expected: shards already
/// unlocked and balancer restarted at steps 7-9; `unmount_snapshots` and
/// `remove_snapshots` compensators fire; the cluster is fully
/// operational; phase = aborted.
#[tokio::test]
async fn scenario_3_tar_failure_after_unlock_still_cleans_up_snapshots() {
    let router_driver = Arc::new(router_with_two_standalone_shards());
    let shard_driver = Arc::new(MockShardDriver::new());
    let config = two_host_config();

    let shell = Arc::new(ScriptedShell::new(|host, cmd| {
        if host == "host1" && cmd.starts_with("tar -cvf") {
            return fail();
        }
        if cmd.contains("grep 'LV Path'") || cmd.starts_with("lvs --noheadings") {
            return ok("/dev/mock/snap");
        }
        ok("")
    }));

    let mut coordinator = Coordinator::new(&config, shell.clone(), router_driver.clone(), shard_driver.clone())
        .await
        .unwrap();

    let result = coordinator.backup().await;
    assert!(result.is_err());
    assert_eq!(coordinator.phase(), BackupPhase::Aborted);

    // The cluster is fully operational: unlocked and balancer running.
    for endpoint in ["shard1:27018", "shard2:27018"] {
        assert!(!shard_driver.is_locked(endpoint).await.unwrap());
    }
    assert!(!router_driver.balancer_stopped().await.unwrap());

    assert!(shell.calls_for_host("host1").iter().any(|c| c.starts_with("umount -f")));
    assert!(shell.calls_for_host("host2").iter().any(|c| c.starts_with("umount -f")));
    assert!(shell.calls_for_host("host1").iter().any(|c| c.starts_with("lvremove -f")));
    assert!(shell.calls_for_host("host2").iter().any(|c| c.starts_with("lvremove -f")));
}

/// Scenario 4: `wait_for_locks` never clears. Expected: rollback drains
/// `start_balancer` (the only pushed compensator); no config server was
/// stopped; phase = aborted. Uses a shrunk poll interval/attempt budget
/// so the test doesn't take ~30 minutes.
#[tokio::test]
async fn scenario_4_locks_never_clear_aborts_before_touching_config_server() {
    let mut router_driver = router_with_two_standalone_shards();
    router_driver.locks = std::sync::Mutex::new(vec!["chunk-migration".to_string()]);
    let router_driver = Arc::new(router_driver);
    let shard_driver = Arc::new(MockShardDriver::new());
    let config = two_host_config();
    let shell = Arc::new(ScriptedShell::new(|_host, _cmd| ok("")));

    let mut coordinator = Coordinator::new(&config, shell.clone(), router_driver.clone(), shard_driver)
        .await
        .unwrap()
        .with_lock_poll(Duration::from_millis(1), 3);

    let result = coordinator.backup().await;
    assert!(result.is_err());
    assert_eq!(coordinator.phase(), BackupPhase::Aborted);

    assert!(!shell.called_with("/etc/init.d/mongodb stop"));
    assert!(!router_driver.balancer_stopped().await.unwrap());
}

/// Scenario 5: `stop_balancer` raises on attempt 1, succeeds on attempt
/// 2. Expected: overall success.
#[tokio::test]
async fn scenario_5_stop_balancer_succeeds_on_second_attempt() {
    let router_driver = Arc::new(router_with_two_standalone_shards());
    let shard_driver = Arc::new(MockShardDriver::new());
    let config = two_host_config();
    let shell = Arc::new(ScriptedShell::new(|_host, cmd| {
        if cmd.contains("grep 'LV Path'") || cmd.starts_with("lvs --noheadings") {
            return ok("/dev/mock/snap");
        }
        ok("")
    }));

    let mut coordinator = Coordinator::new(&config, shell, router_driver.clone(), shard_driver)
        .await
        .unwrap();

    // `stop_balancer` has a 2-attempt budget; fail the write exactly once
    // so the first attempt raises and the second succeeds.
    *router_driver.fail_next_balancer_writes.lock().unwrap() = 1;

    assert!(coordinator.backup().await.is_ok());
    assert_eq!(coordinator.phase(), BackupPhase::Done);
}
