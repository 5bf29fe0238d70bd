// src/config_server_agent.rs

//! ConfigServerAgent: a HostAgent plus the logical dump of the `config`
//! database (spec §4.4).

use crate::error::{Error, Result};
use crate::host_agent::HostAgent;
use crate::types::BackupId;
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

const SETTLE_DELAY: Duration = Duration::from_secs(3);

pub struct ConfigServerAgent {
    host: HostAgent,
    backup_basedir: String,
}

impl ConfigServerAgent {
    /// Construction-time check (spec §4.4, supplemented per SPEC_FULL §11):
    /// the config-server mongod must already be running, otherwise this
    /// raises before the Coordinator has pushed any rollback entry.
    pub async fn new(host: HostAgent, backup_basedir: impl Into<String>) -> Result<Self> {
        let agent = Self {
            host,
            backup_basedir: backup_basedir.into(),
        };
        if agent.is_running().await? {
            Ok(agent)
        } else {
            Err(Error::Command {
                host: agent.host.host().to_string(),
                command: "/etc/init.d/mongodb status".to_string(),
                exit_code: 1,
            })
        }
    }

    pub fn host(&self) -> &str {
        self.host.host()
    }

    pub async fn is_running(&self) -> Result<bool> {
        let out = self
            .host
            .run("/etc/init.d/mongodb status", None, false)
            .await?;
        Ok(out.success())
    }

    /// Stops the config-server mongod, waits a settling delay, then
    /// re-queries; raises `Error::Command` on mismatch.
    pub async fn stop(&self) -> Result<()> {
        self.host
            .run("/etc/init.d/mongodb stop", None, false)
            .await?;
        sleep(SETTLE_DELAY).await;
        if self.is_running().await? {
            Err(Error::Command {
                host: self.host().to_string(),
                command: "/etc/init.d/mongodb stop".to_string(),
                exit_code: 1,
            })
        } else {
            info!(host = self.host(), "config server stopped");
            Ok(())
        }
    }

    /// Starts the config-server mongod, waits a settling delay, then
    /// re-queries; raises on mismatch.
    pub async fn start(&self) -> Result<()> {
        self.host
            .run("/etc/init.d/mongodb start", None, false)
            .await?;
        sleep(SETTLE_DELAY).await;
        if self.is_running().await? {
            info!(host = self.host(), "config server started");
            Ok(())
        } else {
            Err(Error::Command {
                host: self.host().to_string(),
                command: "/etc/init.d/mongodb start".to_string(),
                exit_code: 1,
            })
        }
    }

    /// Creates `<base>/<BackupId>` and runs `mongodump -d config` into it.
    pub async fn mongodump(&self, id: &BackupId) -> Result<()> {
        let path = format!("{}/{}", self.backup_basedir, id);
        let mkdir = self.host.run(&format!("mkdir -p {path}"), None, false).await?;
        if !mkdir.success() {
            return Err(Error::Command {
                host: self.host().to_string(),
                command: format!("mkdir -p {path}"),
                exit_code: mkdir.exit_code,
            });
        }
        let dump = self
            .host
            .run(&format!("mongodump -d config -o {path}"), None, false)
            .await?;
        if dump.success() {
            info!(host = self.host(), %path, "config database dumped");
            Ok(())
        } else {
            Err(Error::Command {
                host: self.host().to_string(),
                command: format!("mongodump -d config -o {path}"),
                exit_code: dump.exit_code,
            })
        }
    }
}
