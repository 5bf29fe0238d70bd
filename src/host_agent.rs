// src/host_agent.rs

//! HostAgent: executes shell commands on one physical host via a remote
//! shell. The transport itself is a trait seam (`RemoteShell`) since it is
//! an out-of-scope external collaborator (spec §1); `SshShell` is the real
//! `ssh`-backed implementation.

use crate::config::SshConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// The outcome of a single remote command: an exit code and, if requested,
/// the captured stdout.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: Option<String>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// The remote-shell transport contract (spec §4.1): authenticated command
/// execution with exit codes and captured stdout, bounded by a wall-clock
/// timeout. Transport-level failures (connection refused, auth failure,
/// timeout) are distinct from the remote command merely exiting non-zero.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn exec(
        &self,
        host: &str,
        command: &str,
        timeout: Duration,
        capture_output: bool,
    ) -> Result<CommandOutput>;
}

/// A `RemoteShell` backed by the system `ssh` binary: host-key prompts
/// disabled, a bounded connect timeout, and a keepalive interval so a
/// silently dropped connection is detected within that interval (spec
/// §4.1).
pub struct SshShell {
    connect_timeout: Duration,
    keepalive_interval: Duration,
}

impl SshShell {
    pub fn new(ssh: &SshConfig) -> Self {
        Self {
            connect_timeout: ssh.connect_timeout,
            keepalive_interval: ssh.keepalive_interval,
        }
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn exec(
        &self,
        host: &str,
        command: &str,
        command_timeout: Duration,
        capture_output: bool,
    ) -> Result<CommandOutput> {
        info!(host, command, "> {command}");

        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!(
                "ConnectTimeout={}",
                self.connect_timeout.as_secs()
            ))
            .arg("-o")
            .arg(format!(
                "ServerAliveInterval={}",
                self.keepalive_interval.as_secs()
            ))
            .arg(format!("root@{host}"))
            .arg(format!("timeout {} {}", command_timeout.as_secs(), command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = cmd.spawn().map_err(|e| Error::Transport {
            host: host.to_string(),
            message: format!("failed to spawn ssh: {e}"),
        })?;

        // `wait_with_output` drains stdout and stderr concurrently with
        // waiting on the child. `tar -cvf`'s file listing and mongodump's
        // progress output can exceed a single pipe buffer; waiting on the
        // child first (as `child.wait()` did) before ever reading a pipe
        // deadlocks once that buffer fills, regardless of `capture_output`.
        let wait = async {
            let output = child.wait_with_output().await.map_err(|e| Error::Transport {
                host: host.to_string(),
                message: format!("failed to wait on ssh: {e}"),
            })?;

            let stdout = if capture_output {
                Some(String::from_utf8_lossy(&output.stdout).into_owned())
            } else {
                None
            };
            Ok::<_, Error>((output.status, stdout, output.stderr))
        };

        let (status, stdout, stderr) = match timeout(command_timeout + self.connect_timeout, wait).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::Transport {
                    host: host.to_string(),
                    message: format!("command timed out after {command_timeout:?}"),
                });
            }
        };

        let exit_code = status.code().unwrap_or(-1);
        if exit_code == 0 {
            debug!(host, exit_code, "command completed");
        } else {
            let stderr = String::from_utf8_lossy(&stderr);
            warn!(host, exit_code, command, %stderr, "command exited non-zero");
        }

        Ok(CommandOutput { exit_code, stdout })
    }
}

/// One data-bearing or config-server host, wrapping a `RemoteShell`.
pub struct HostAgent {
    host: String,
    shell: std::sync::Arc<dyn RemoteShell>,
    command_timeout: Duration,
}

impl HostAgent {
    pub fn new(host: impl Into<String>, shell: std::sync::Arc<dyn RemoteShell>, command_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            shell,
            command_timeout,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Runs `command` on this host, bounded by `timeout` (or the agent's
    /// configured default command timeout if `None`).
    pub async fn run(
        &self,
        command: &str,
        timeout_override: Option<Duration>,
        capture_output: bool,
    ) -> Result<CommandOutput> {
        let timeout = timeout_override.unwrap_or(self.command_timeout);
        self.shell
            .exec(&self.host, command, timeout, capture_output)
            .await
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every invocation and returns canned responses in order, in
    /// the style of the teacher's `tests/integration/fixtures.rs` mocks.
    pub struct MockShell {
        pub calls: Mutex<Vec<(String, String)>>,
        pub responses: Mutex<Vec<Result<CommandOutput>>>,
    }

    impl MockShell {
        pub fn new(responses: Vec<Result<CommandOutput>>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                responses: Mutex::new(responses),
            }
        }

        pub fn always_ok() -> Self {
            Self::new(vec![])
        }
    }

    #[async_trait]
    impl RemoteShell for MockShell {
        async fn exec(
            &self,
            host: &str,
            command: &str,
            _timeout: Duration,
            _capture_output: bool,
        ) -> Result<CommandOutput> {
            self.calls
                .lock()
                .unwrap()
                .push((host.to_string(), command.to_string()));
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                // A non-empty placeholder so LVM path-discovery commands
                // (which treat an empty result as "snapshot missing") see
                // something plausible when a test doesn't care about the
                // exact path.
                Ok(CommandOutput {
                    exit_code: 0,
                    stdout: Some("/dev/mock/snapshot".to_string()),
                })
            } else {
                responses.remove(0)
            }
        }
    }

    /// A `RemoteShell` whose response depends on the host and command
    /// rather than call order, for tests that need deterministic per-host
    /// behavior under concurrent fan-out (spec §5 notes that ordering
    /// between hosts in a parallel phase is otherwise unspecified).
    pub struct ScriptedShell<F> {
        pub f: F,
        pub calls: Mutex<Vec<(String, String)>>,
    }

    impl<F> ScriptedShell<F>
    where
        F: Fn(&str, &str) -> Result<CommandOutput> + Send + Sync,
    {
        pub fn new(f: F) -> Self {
            Self {
                f,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls_for_host(&self, host: &str) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(h, _)| h == host)
                .map(|(_, c)| c.clone())
                .collect()
        }

        pub fn called_with(&self, needle: &str) -> bool {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .any(|(_, c)| c.contains(needle))
        }
    }

    #[async_trait]
    impl<F> RemoteShell for ScriptedShell<F>
    where
        F: Fn(&str, &str) -> Result<CommandOutput> + Send + Sync,
    {
        async fn exec(
            &self,
            host: &str,
            command: &str,
            _timeout: Duration,
            _capture_output: bool,
        ) -> Result<CommandOutput> {
            self.calls
                .lock()
                .unwrap()
                .push((host.to_string(), command.to_string()));
            (self.f)(host, command)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockShell;
    use super::*;

    #[tokio::test]
    async fn run_records_the_command_and_returns_canned_output() {
        let mock = std::sync::Arc::new(MockShell::new(vec![Ok(CommandOutput {
            exit_code: 0,
            stdout: Some("ok".into()),
        })]));
        let agent = HostAgent::new("host1", mock.clone(), Duration::from_secs(30));
        let out = agent.run("echo hi", None, true).await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.as_deref(), Some("ok"));
        assert_eq!(mock.calls.lock().unwrap()[0].0, "host1");
    }

    #[tokio::test]
    async fn propagates_non_zero_exit() {
        let mock = std::sync::Arc::new(MockShell::new(vec![Ok(CommandOutput {
            exit_code: 1,
            stdout: None,
        })]));
        let agent = HostAgent::new("host1", mock, Duration::from_secs(30));
        let out = agent.run("false", None, false).await.unwrap();
        assert!(!out.success());
    }
}
