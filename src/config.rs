// src/config.rs

//! Loading and validation of the backup job's configuration file.

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Per-host settings: which logical volume to snapshot, where to mount the
/// snapshot, and where to write the resulting tar archive.
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    pub logical_volume: String,
    pub mount_point: String,
    pub archive_dir: String,
}

/// Timeouts and connection parameters for the remote-shell transport. These
/// map directly onto spec §4.1's HostAgent contract instead of being
/// hardcoded the way the original script hardcodes them.
#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_command_timeout")]
    pub command_timeout: Duration,
    /// `tar` is the long-running step and is deliberately not bounded by the
    /// same tight timeout as every other remote command (spec §4.5/§9).
    #[serde(with = "humantime_serde", default = "default_tar_timeout")]
    pub tar_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_keepalive_interval")]
    pub keepalive_interval: Duration,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_command_timeout() -> Duration {
    Duration::from_secs(120)
}
fn default_tar_timeout() -> Duration {
    Duration::from_secs(6 * 3600)
}
fn default_keepalive_interval() -> Duration {
    Duration::from_secs(20)
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            command_timeout: default_command_timeout(),
            tar_timeout: default_tar_timeout(),
            keepalive_interval: default_keepalive_interval(),
        }
    }
}

/// A raw representation of the config file before validation.
#[derive(Deserialize)]
struct RawConfig {
    router_addr: String,
    hosts: HashMap<String, HostConfig>,
    config_backup_basedir: String,
    #[serde(default)]
    ssh: SshConfig,
}

/// The validated, resolved configuration for one backup invocation.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub router_addr: String,
    pub hosts: HashMap<String, HostConfig>,
    pub config_backup_basedir: String,
    pub ssh: SshConfig,
}

impl BackupConfig {
    /// Reads and parses the TOML configuration at `path`, then validates it.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at '{path}'"))?;
        let raw: RawConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse TOML from '{path}'"))?;

        let config = BackupConfig {
            router_addr: raw.router_addr,
            hosts: raw.hosts,
            config_backup_basedir: raw.config_backup_basedir,
            ssh: raw.ssh,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.router_addr.trim().is_empty() {
            return Err(anyhow!("router_addr cannot be empty"));
        }
        if self.hosts.is_empty() {
            return Err(anyhow!("hosts table cannot be empty"));
        }
        if self.config_backup_basedir.trim().is_empty() {
            return Err(anyhow!("config_backup_basedir cannot be empty"));
        }
        for (host, cfg) in &self.hosts {
            if cfg.logical_volume.trim().is_empty() {
                return Err(anyhow!("host '{host}': logical_volume cannot be empty"));
            }
            if cfg.mount_point.trim().is_empty() {
                return Err(anyhow!("host '{host}': mount_point cannot be empty"));
            }
            if cfg.archive_dir.trim().is_empty() {
                return Err(anyhow!("host '{host}': archive_dir cannot be empty"));
            }
        }
        if self.ssh.connect_timeout.is_zero() {
            return Err(anyhow!("ssh.connect_timeout cannot be 0"));
        }
        if self.ssh.command_timeout.is_zero() {
            return Err(anyhow!("ssh.command_timeout cannot be 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_minimal_valid_config() {
        let f = write_temp(
            r#"
            router_addr = "127.0.0.1:27017"
            config_backup_basedir = "/usr/local/backup/mongo-config"

            [hosts.host1]
            logical_volume = "/dev/vg0/mongo"
            mount_point = "/mongodbdata_snapshot"
            archive_dir = "/backup"
            "#,
        );
        let cfg = BackupConfig::from_file(f.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.router_addr, "127.0.0.1:27017");
        assert_eq!(cfg.hosts.len(), 1);
        assert_eq!(cfg.ssh.command_timeout, Duration::from_secs(120));
    }

    #[test]
    fn rejects_empty_host_table() {
        let f = write_temp(
            r#"
            router_addr = "127.0.0.1:27017"
            config_backup_basedir = "/backup/config"
            hosts = {}
            "#,
        );
        assert!(BackupConfig::from_file(f.path().to_str().unwrap()).is_err());
    }
}
