// src/main.rs

//! Composition root: loads a single TOML configuration file, wires up the
//! real collaborators (SSH transport, MongoDB router/shard drivers), and
//! runs one backup to completion. Plays the role `run.py` played against
//! the original `mongoclusterbackup.py` (SPEC_FULL §11).

use anyhow::{Context, Result};
use shardvault::config::BackupConfig;
use shardvault::coordinator::Coordinator;
use shardvault::host_agent::SshShell;
use shardvault::mongo_driver::{MongoRouterDriver, MongoShardDriver};
use shardvault::types::BackupPhase;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .compact()
        .init();
}

fn print_usage(program: &str) {
    eprintln!("usage: {program} --config <path.toml>");
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_logging();

    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "shardvault".to_string());
    let mut config_path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config_path = args.next();
            }
            "--version" => {
                println!("shardvault {}", env!("CARGO_PKG_VERSION"));
                return Ok(ExitCode::SUCCESS);
            }
            other => {
                eprintln!("unrecognized argument: {other}");
                print_usage(&program);
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    let Some(config_path) = config_path else {
        print_usage(&program);
        return Ok(ExitCode::FAILURE);
    };

    let config = BackupConfig::from_file(&config_path)
        .with_context(|| format!("failed to load configuration from '{config_path}'"))?;

    let shell = Arc::new(SshShell::new(&config.ssh));
    let router_driver = Arc::new(
        MongoRouterDriver::connect(&config.router_addr)
            .await
            .context("failed to connect to router")?,
    );
    let shard_driver = Arc::new(MongoShardDriver::new());

    let mut coordinator = Coordinator::new(&config, shell, router_driver, shard_driver)
        .await
        .context("failed to initialize coordinator")?;

    match coordinator.backup().await {
        Ok(id) => {
            tracing::info!(%id, "backup finished successfully");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            tracing::error!(error = %err, phase = ?coordinator.phase(), "backup aborted");
            debug_assert_eq!(coordinator.phase(), BackupPhase::Aborted);
            Ok(ExitCode::FAILURE)
        }
    }
}
