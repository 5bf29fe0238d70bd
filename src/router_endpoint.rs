// src/router_endpoint.rs

//! RouterEndpoint: a client to the cluster router (spec §4.3). Reads shard
//! topology, reads/stops/starts the balancer flag, enumerates config
//! servers, and polls distributed-lock state.

use crate::error::{Error, Result};
use crate::shard_selector::select_lock_target;
use crate::types::{LockTarget, ShardTopology};
use async_trait::async_trait;
use tracing::info;

/// The raw `config` database reads/writes RouterEndpoint needs. A real
/// implementation wraps a database driver; out of scope per spec.md §1.
#[async_trait]
pub trait RouterDriver: Send + Sync {
    /// Raw shard host strings as stored in `config.shards`: either
    /// `host:port` (standalone) or `name/member,member,...` (replica-set).
    async fn shard_hosts(&self) -> Result<Vec<String>>;

    /// `replSetGetStatus` against one replica-set, given its member list.
    async fn repl_set_status(
        &self,
        set_name: &str,
        members: &[String],
    ) -> Result<ShardTopology>;

    /// Distributed-lock documents whose `state == 2` (held).
    async fn held_locks(&self) -> Result<Vec<String>>;

    async fn balancer_stopped(&self) -> Result<bool>;

    /// Writes the balancer `stopped` flag and reads it back.
    async fn set_balancer_stopped(&self, stopped: bool) -> Result<bool>;

    /// The router's config-db host list, in the driver's own (possibly
    /// randomized) order — see spec §4.3/§9 on `get_config_servers`.
    async fn config_server_hosts(&self) -> Result<Vec<String>>;
}

pub struct RouterEndpoint {
    driver: std::sync::Arc<dyn RouterDriver>,
}

impl RouterEndpoint {
    pub fn new(driver: std::sync::Arc<dyn RouterDriver>) -> Self {
        Self { driver }
    }

    /// Discovers every shard's topology and selected lock target. For a
    /// replica-set host string (`name/m1,m2,m3`), queries `replSetGetStatus`
    /// and runs `ShardSelector`; for a standalone (`host:port`, no `/`),
    /// returns the host verbatim as its own lock target.
    pub async fn get_shards(&self) -> Result<Vec<(ShardTopology, LockTarget)>> {
        let raw = self.driver.shard_hosts().await?;
        let mut out = Vec::with_capacity(raw.len());
        for entry in raw {
            let topology = match entry.split_once('/') {
                Some((name, members)) => {
                    let member_hosts: Vec<String> =
                        members.split(',').map(str::to_string).collect();
                    self.driver.repl_set_status(name, &member_hosts).await?
                }
                None => ShardTopology::Standalone { host: entry },
            };
            let target = select_lock_target(&topology)?;
            out.push((topology, target));
        }
        Ok(out)
    }

    pub async fn get_locks(&self) -> Result<Vec<String>> {
        self.driver.held_locks().await
    }

    pub async fn balancer_stopped(&self) -> Result<bool> {
        self.driver.balancer_stopped().await
    }

    /// Sets the balancer `stopped` flag to `true` and reads it back;
    /// `Error::Balancer` on mismatch.
    pub async fn stop_balancer(&self) -> Result<()> {
        let settled = self.driver.set_balancer_stopped(true).await?;
        if settled {
            info!("balancer stopped");
            Ok(())
        } else {
            Err(Error::Balancer(
                "balancer did not report stopped after write".to_string(),
            ))
        }
    }

    /// Sets the balancer `stopped` flag to `false` and reads it back.
    pub async fn start_balancer(&self) -> Result<()> {
        let settled = self.driver.set_balancer_stopped(false).await?;
        if !settled {
            info!("balancer started");
            Ok(())
        } else {
            Err(Error::Balancer(
                "balancer did not report started after write".to_string(),
            ))
        }
    }

    /// The first element of the **sorted** config-server host list. The
    /// driver's own randomization of its returned list is kept as inert
    /// historical behavior (spec §9); the coordinator's choice is always
    /// deterministic because it sorts before picking.
    pub async fn pick_config_server(&self) -> Result<String> {
        let mut hosts = self.driver.config_server_hosts().await?;
        hosts.sort();
        hosts
            .into_iter()
            .next()
            .ok_or_else(|| Error::Balancer("no config servers reported".to_string()))
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    pub struct MockRouterDriver {
        pub shards: Vec<String>,
        pub repl_sets: std::collections::HashMap<String, ShardTopology>,
        pub locks: Mutex<Vec<String>>,
        pub balancer_stopped: Mutex<bool>,
        pub config_servers: Vec<String>,
        /// Number of remaining `set_balancer_stopped` calls that should
        /// report a transport failure before the write starts succeeding,
        /// for exercising the Coordinator's retry driver.
        pub fail_next_balancer_writes: Mutex<u32>,
    }

    impl MockRouterDriver {
        pub fn new() -> Self {
            Self {
                shards: Vec::new(),
                repl_sets: std::collections::HashMap::new(),
                locks: Mutex::new(Vec::new()),
                balancer_stopped: Mutex::new(false),
                config_servers: vec!["c1".into(), "c2".into(), "c3".into()],
                fail_next_balancer_writes: Mutex::new(0),
            }
        }
    }

    impl Default for MockRouterDriver {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl RouterDriver for MockRouterDriver {
        async fn shard_hosts(&self) -> Result<Vec<String>> {
            Ok(self.shards.clone())
        }

        async fn repl_set_status(
            &self,
            set_name: &str,
            _members: &[String],
        ) -> Result<ShardTopology> {
            self.repl_sets
                .get(set_name)
                .cloned()
                .ok_or_else(|| Error::NoLockTarget(set_name.to_string()))
        }

        async fn held_locks(&self) -> Result<Vec<String>> {
            Ok(self.locks.lock().unwrap().clone())
        }

        async fn balancer_stopped(&self) -> Result<bool> {
            Ok(*self.balancer_stopped.lock().unwrap())
        }

        async fn set_balancer_stopped(&self, stopped: bool) -> Result<bool> {
            let mut remaining = self.fail_next_balancer_writes.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Balancer("transient write failure".to_string()));
            }
            drop(remaining);
            *self.balancer_stopped.lock().unwrap() = stopped;
            Ok(stopped)
        }

        async fn config_server_hosts(&self) -> Result<Vec<String>> {
            Ok(self.config_servers.clone())
        }
    }
}
