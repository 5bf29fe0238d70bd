// src/shard_endpoint.rs

//! ShardEndpoint: bound to one replica-set member or standalone shard host;
//! issues fsync-with-lock / unlock / is-locked against it (spec §4.2).

use crate::error::{Error, Result};
use async_trait::async_trait;
use tracing::info;

/// The database-driver operations ShardEndpoint needs against one member.
/// A real implementation wraps a MongoDB-style driver; out of scope per
/// spec.md §1 "external collaborators".
#[async_trait]
pub trait ShardDriver: Send + Sync {
    async fn fsync_lock(&self, endpoint: &str) -> Result<()>;
    async fn fsync_unlock(&self, endpoint: &str) -> Result<()>;
    async fn is_locked(&self, endpoint: &str) -> Result<bool>;
}

pub struct ShardEndpoint {
    endpoint: String,
    driver: std::sync::Arc<dyn ShardDriver>,
}

impl ShardEndpoint {
    pub fn new(endpoint: impl Into<String>, driver: std::sync::Arc<dyn ShardDriver>) -> Self {
        Self {
            endpoint: endpoint.into(),
            driver,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Issues fsync-with-lock, then re-queries lock state. Reports
    /// `Error::Lock` if the re-query does not confirm the lock — the
    /// canonical `is_locked()` check is always a method call, never a field
    /// read (spec §9).
    pub async fn lock(&self) -> Result<()> {
        self.driver.fsync_lock(&self.endpoint).await?;
        if self.driver.is_locked(&self.endpoint).await? {
            info!(endpoint = %self.endpoint, "shard locked");
            Ok(())
        } else {
            Err(Error::Lock(self.endpoint.clone()))
        }
    }

    /// Releases the lock, then re-queries; reports `Error::Unlock` if still
    /// locked.
    pub async fn unlock(&self) -> Result<()> {
        self.driver.fsync_unlock(&self.endpoint).await?;
        if self.driver.is_locked(&self.endpoint).await? {
            Err(Error::Unlock(self.endpoint.clone()))
        } else {
            info!(endpoint = %self.endpoint, "shard unlocked");
            Ok(())
        }
    }

    pub async fn is_locked(&self) -> Result<bool> {
        self.driver.is_locked(&self.endpoint).await
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// An in-memory lock table keyed by endpoint, for tests.
    pub struct MockShardDriver {
        locked: Mutex<HashMap<String, bool>>,
        /// Endpoints for which `is_locked` should report a stuck value
        /// regardless of the most recent lock/unlock call.
        pub stuck_locked: Mutex<HashMap<String, bool>>,
    }

    impl MockShardDriver {
        pub fn new() -> Self {
            Self {
                locked: Mutex::new(HashMap::new()),
                stuck_locked: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl ShardDriver for MockShardDriver {
        async fn fsync_lock(&self, endpoint: &str) -> Result<()> {
            self.locked.lock().unwrap().insert(endpoint.to_string(), true);
            Ok(())
        }

        async fn fsync_unlock(&self, endpoint: &str) -> Result<()> {
            self.locked
                .lock()
                .unwrap()
                .insert(endpoint.to_string(), false);
            Ok(())
        }

        async fn is_locked(&self, endpoint: &str) -> Result<bool> {
            if let Some(stuck) = self.stuck_locked.lock().unwrap().get(endpoint) {
                return Ok(*stuck);
            }
            Ok(*self.locked.lock().unwrap().get(endpoint).unwrap_or(&false))
        }
    }

    impl Default for MockShardDriver {
        fn default() -> Self {
            Self::new()
        }
    }
}
