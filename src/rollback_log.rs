// src/rollback_log.rs

//! RollbackLog: ordered compensating-action stack (spec §3, §9). Entries
//! are pushed strictly before the forward step whose effect they
//! compensate; on abort they run LIFO, and a compensator's own failure is
//! logged and swallowed so it cannot block later compensators.

use async_trait::async_trait;
use tracing::{info, warn};

/// A single compensating action, identified by name for the `remove`
/// operation used by the "remove-before-run" pattern on steps whose effect
/// becomes permanent after success (spec §4.7).
#[async_trait]
pub trait Compensator: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self);
}

pub struct RollbackLog {
    stack: Vec<Box<dyn Compensator>>,
}

impl RollbackLog {
    pub fn new() -> Self {
        Self { stack: Vec::new() }
    }

    pub fn push(&mut self, compensator: Box<dyn Compensator>) {
        info!(name = compensator.name(), "rollback log: push");
        self.stack.push(compensator);
    }

    /// Removes the most recently pushed compensator with the given name,
    /// marking its forward step's effect as permanent. No-op if absent.
    pub fn remove(&mut self, name: &str) {
        if let Some(pos) = self.stack.iter().rposition(|c| c.name() == name) {
            self.stack.remove(pos);
            info!(name, "rollback log: remove");
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Drains every compensator LIFO. Each runs inside a blanket swallow:
    /// a compensator's own failure is logged and never propagated, and
    /// never prevents later (earlier-pushed) compensators from running.
    pub async fn drain_lifo(&mut self) {
        while let Some(compensator) = self.stack.pop() {
            let name = compensator.name().to_string();
            info!(name, "rollback: running compensator");
            compensator.run().await;
        }
    }
}

impl Default for RollbackLog {
    fn default() -> Self {
        Self::new()
    }
}
