// src/mongo_driver.rs

//! Real implementations of `RouterDriver` and `ShardDriver` against a
//! MongoDB-style cluster, using the official `mongodb` driver. Both are
//! out-of-scope "external collaborator" concerns per spec.md §1 — this
//! module exists so the binary is runnable end-to-end (SPEC_FULL §11),
//! the way `run.py` was runnable end-to-end against the original's
//! pymongo-backed classes.

use crate::error::{Error, Result};
use crate::router_endpoint::RouterDriver;
use crate::shard_endpoint::ShardDriver;
use crate::types::{MemberHealth, MemberRole, ReplicaSetMember, ShardTopology};
use async_trait::async_trait;
use mongodb::bson::{Document, doc};
use mongodb::Client;
use rand::seq::SliceRandom;
use rand::thread_rng;

fn driver_err(context: &str, e: mongodb::error::Error) -> Error {
    Error::Transport {
        host: context.to_string(),
        message: e.to_string(),
    }
}

pub struct MongoRouterDriver {
    client: Client,
}

impl MongoRouterDriver {
    pub async fn connect(router_addr: &str) -> Result<Self> {
        let uri = format!("mongodb://{router_addr}/?directConnection=true");
        let client = Client::with_uri_str(&uri)
            .await
            .map_err(|e| driver_err(router_addr, e))?;
        Ok(Self { client })
    }

    async fn run_admin_command(&self, command: Document) -> Result<Document> {
        self.client
            .database("admin")
            .run_command(command)
            .await
            .map_err(|e| driver_err("admin", e))
    }
}

#[async_trait]
impl RouterDriver for MongoRouterDriver {
    async fn shard_hosts(&self) -> Result<Vec<String>> {
        let config = self.client.database("config");
        let mut cursor = config
            .collection::<Document>("shards")
            .find(doc! {})
            .await
            .map_err(|e| driver_err("config.shards", e))?;
        let mut hosts = Vec::new();
        while cursor.advance().await.map_err(|e| driver_err("config.shards", e))? {
            let doc = cursor.deserialize_current().map_err(|e| driver_err("config.shards", e))?;
            if let Ok(host) = doc.get_str("host") {
                hosts.push(host.to_string());
            }
        }
        Ok(hosts)
    }

    async fn repl_set_status(
        &self,
        set_name: &str,
        members: &[String],
    ) -> Result<ShardTopology> {
        let seed_list = members.join(",");
        let uri = format!("mongodb://{seed_list}/?replicaSet={set_name}");
        let client = Client::with_uri_str(&uri)
            .await
            .map_err(|e| driver_err(set_name, e))?;
        let status = client
            .database("admin")
            .run_command(doc! { "replSetGetStatus": 1 })
            .await
            .map_err(|e| driver_err(set_name, e))?;

        let mut resolved = Vec::new();
        if let Ok(raw_members) = status.get_array("members") {
            for m in raw_members {
                let Some(m) = m.as_document() else { continue };
                let host = m.get_str("name").unwrap_or_default().to_string();
                let state = m.get_str("stateStr").unwrap_or_default();
                let role = match state {
                    "PRIMARY" => MemberRole::Primary,
                    "SECONDARY" => MemberRole::Secondary,
                    _ => MemberRole::Other,
                };
                let health = if m.get_f64("health").unwrap_or(0.0) >= 1.0 {
                    MemberHealth::Up
                } else {
                    MemberHealth::Down
                };
                let optime = m
                    .get_document("optime")
                    .ok()
                    .and_then(|o| o.get_i64("t").ok())
                    .unwrap_or(0) as u64;
                resolved.push(ReplicaSetMember {
                    host,
                    role,
                    health,
                    optime,
                });
            }
        }

        Ok(ShardTopology::ReplicaSet {
            name: set_name.to_string(),
            members: resolved,
        })
    }

    async fn held_locks(&self) -> Result<Vec<String>> {
        let config = self.client.database("config");
        let mut cursor = config
            .collection::<Document>("locks")
            .find(doc! { "state": 2 })
            .await
            .map_err(|e| driver_err("config.locks", e))?;
        let mut ids = Vec::new();
        while cursor.advance().await.map_err(|e| driver_err("config.locks", e))? {
            let doc = cursor.deserialize_current().map_err(|e| driver_err("config.locks", e))?;
            if let Ok(id) = doc.get_str("_id") {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }

    async fn balancer_stopped(&self) -> Result<bool> {
        let settings = self
            .client
            .database("config")
            .collection::<Document>("settings")
            .find_one(doc! { "_id": "balancer" })
            .await
            .map_err(|e| driver_err("config.settings", e))?;
        Ok(settings
            .and_then(|d| d.get_bool("stopped").ok())
            .unwrap_or(false))
    }

    async fn set_balancer_stopped(&self, stopped: bool) -> Result<bool> {
        self.client
            .database("config")
            .collection::<Document>("settings")
            .update_one(
                doc! { "_id": "balancer" },
                doc! { "$set": { "stopped": stopped } },
            )
            .upsert(true)
            .await
            .map_err(|e| driver_err("config.settings", e))?;
        self.balancer_stopped().await
    }

    async fn config_server_hosts(&self) -> Result<Vec<String>> {
        let opts = self.run_admin_command(doc! { "getCmdLineOpts": 1 }).await?;
        let config_db = opts
            .get_document("parsed")
            .ok()
            .and_then(|p| p.get_document("sharding").ok())
            .and_then(|s| s.get_str("configDB").ok())
            .unwrap_or_default()
            .to_string();

        let member_list = config_db.split_once('/').map(|(_, m)| m).unwrap_or(&config_db);
        let mut hosts: Vec<String> = member_list.split(',').map(str::to_string).collect();
        hosts.shuffle(&mut thread_rng());
        Ok(hosts)
    }
}

pub struct MongoShardDriver;

impl MongoShardDriver {
    pub fn new() -> Self {
        Self
    }

    async fn connect(&self, endpoint: &str) -> Result<Client> {
        let uri = format!("mongodb://{endpoint}/?directConnection=true");
        Client::with_uri_str(&uri)
            .await
            .map_err(|e| driver_err(endpoint, e))
    }
}

impl Default for MongoShardDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShardDriver for MongoShardDriver {
    async fn fsync_lock(&self, endpoint: &str) -> Result<()> {
        let client = self.connect(endpoint).await?;
        client
            .database("admin")
            .run_command(doc! { "fsync": 1, "lock": true })
            .await
            .map_err(|e| driver_err(endpoint, e))?;
        Ok(())
    }

    async fn fsync_unlock(&self, endpoint: &str) -> Result<()> {
        let client = self.connect(endpoint).await?;
        client
            .database("admin")
            .run_command(doc! { "fsyncUnlock": 1 })
            .await
            .map_err(|e| driver_err(endpoint, e))?;
        Ok(())
    }

    async fn is_locked(&self, endpoint: &str) -> Result<bool> {
        let client = self.connect(endpoint).await?;
        let status = client
            .database("admin")
            .run_command(doc! { "currentOp": 1 })
            .await
            .map_err(|e| driver_err(endpoint, e))?;
        Ok(status.get_bool("fsyncLock").unwrap_or(false))
    }
}
