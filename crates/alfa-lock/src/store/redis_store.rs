//! Redis lock store
//!
//! `SET key token NX PX ttl` for acquisition and Lua scripts for the
//! compare-and-delete / compare-and-pexpire operations, so every call is atomic
//! on the node. One store talks to exactly one Redis node.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use alfa_common::{DEFAULT_LOCKS_DB, DEFAULT_REDIS_PORT, redact_url};

use super::LockStoreClient;
use crate::error::{LockError, Result};
use crate::model::{LockKey, LockToken};

const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

const EXTEND_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("pexpire", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Connection settings for one Redis node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisStoreConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Logical database holding lock keys
    #[serde(default = "default_db")]
    pub db: u8,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_REDIS_PORT
}

fn default_db() -> u8 {
    DEFAULT_LOCKS_DB
}

impl RedisStoreConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            db: DEFAULT_LOCKS_DB,
            password: None,
        }
    }

    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

/// Lock store over a single Redis node
///
/// The connection is opened on first use and reconnects on its own after
/// failures, so a node that is down at startup only counts as unreachable.
pub struct RedisLockStore {
    id: String,
    client: Client,
    connection: OnceCell<ConnectionManager>,
    release_script: Script,
    extend_script: Script,
}

impl RedisLockStore {
    pub fn new(config: &RedisStoreConfig) -> Result<Self> {
        Self::from_url(&config.url())
    }

    pub fn from_url(url: &str) -> Result<Self> {
        let id = redact_url(url);
        let client = Client::open(url)
            .map_err(|e| LockError::InvalidConfig(format!("invalid redis url '{}': {}", id, e)))?;
        info!(backend = %id, "Redis lock store configured");
        Ok(Self {
            id,
            client,
            connection: OnceCell::new(),
            release_script: Script::new(RELEASE_SCRIPT),
            extend_script: Script::new(EXTEND_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                debug!(backend = %self.id, "Connecting to redis");
                ConnectionManager::new(self.client.clone()).await
            })
            .await
            .map_err(|e| self.unreachable(e))?;
        Ok(manager.clone())
    }

    fn unreachable(&self, err: redis::RedisError) -> LockError {
        LockError::unreachable(&self.id, err)
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl LockStoreClient for RedisLockStore {
    fn id(&self) -> &str {
        &self.id
    }

    async fn try_set(&self, key: &LockKey, token: &LockToken, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key.as_str())
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| self.unreachable(e))?;
        Ok(reply.is_some())
    }

    async fn try_extend(&self, key: &LockKey, token: &LockToken, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection().await?;
        let extended: i64 = self
            .extend_script
            .key(key.as_str())
            .arg(token.as_str())
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| self.unreachable(e))?;
        Ok(extended == 1)
    }

    async fn try_release(&self, key: &LockKey, token: &LockToken) -> Result<bool> {
        let mut conn = self.connection().await?;
        let deleted: i64 = self
            .release_script
            .key(key.as_str())
            .arg(token.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| self.unreachable(e))?;
        Ok(deleted == 1)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| self.unreachable(e))?;
        Ok(())
    }
}
