//! Redis-backed task store.
//!
//! Each record is one JSON string at `{prefix}{task_id}`. Inserts use
//! `SET NX`; transitions are compare-and-set through a Lua script so two
//! writers can never interleave on one record.

use async_trait::async_trait;
use parklens_models::{Task, TaskId, TaskState};
use redis::AsyncCommands;
use tracing::{debug, warn};

use crate::error::{TaskStoreError, TaskStoreResult};
use crate::store::TaskStore;

/// Attempts before a contended transition gives up.
const MAX_CAS_ATTEMPTS: usize = 5;

const CAS_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2])
  return 1
end
return 0
"#;

/// Redis store configuration.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    pub redis_url: String,
    /// Key prefix for task records
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "parklens:task:".to_string(),
        }
    }
}

impl RedisStoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            key_prefix: std::env::var("REDIS_TASK_PREFIX").unwrap_or(defaults.key_prefix),
        }
    }
}

/// Task records persisted in Redis.
pub struct RedisTaskStore {
    client: redis::Client,
    key_prefix: String,
    cas: redis::Script,
}

impl RedisTaskStore {
    pub fn new(config: RedisStoreConfig) -> TaskStoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            key_prefix: config.key_prefix,
            cas: redis::Script::new(CAS_SCRIPT),
        })
    }

    pub fn from_env() -> TaskStoreResult<Self> {
        Self::new(RedisStoreConfig::from_env())
    }

    fn key(&self, id: &TaskId) -> String {
        format!("{}{}", self.key_prefix, id)
    }

    async fn connection(&self) -> TaskStoreResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| TaskStoreError::connection_failed(e.to_string()))
    }
}

#[async_trait]
impl TaskStore for RedisTaskStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn insert(&self, task: Task) -> TaskStoreResult<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(&task)?;

        let created: Option<String> = redis::cmd("SET")
            .arg(self.key(&task.id))
            .arg(payload)
            .arg("NX")
            .query_async(&mut conn)
            .await?;

        match created {
            Some(_) => {
                debug!(task_id = %task.id, "Inserted task record");
                Ok(())
            }
            None => Err(TaskStoreError::Duplicate(task.id)),
        }
    }

    async fn get(&self, id: &TaskId) -> TaskStoreResult<Option<Task>> {
        let mut conn = self.connection().await?;
        let payload: Option<String> = conn.get(self.key(id)).await?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(TaskStoreError::from))
            .transpose()
    }

    async fn transition(&self, id: &TaskId, next: TaskState) -> TaskStoreResult<Task> {
        let mut conn = self.connection().await?;
        let key = self.key(id);

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current: Option<String> = conn.get(&key).await?;
            let current = current.ok_or_else(|| TaskStoreError::NotFound(id.clone()))?;

            let mut task: Task = serde_json::from_str(&current)?;
            task.transition(next.clone())?;
            let updated = serde_json::to_string(&task)?;

            let swapped: i32 = self
                .cas
                .key(&key)
                .arg(&current)
                .arg(&updated)
                .invoke_async(&mut conn)
                .await?;

            if swapped == 1 {
                return Ok(task);
            }
            warn!(task_id = %id, attempt, "Task record changed during transition, retrying");
        }

        Err(TaskStoreError::Conflict(id.clone()))
    }

    async fn remove(&self, id: &TaskId) -> TaskStoreResult<bool> {
        let mut conn = self.connection().await?;
        let removed: u32 = conn.del(self.key(id)).await?;
        Ok(removed > 0)
    }

    async fn list(&self) -> TaskStoreResult<Vec<Task>> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", self.key_prefix);

        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        let mut tasks = Vec::with_capacity(keys.len());
        for key in keys {
            // Records may be removed between SCAN and GET
            let payload: Option<String> = conn.get(&key).await?;
            if let Some(payload) = payload {
                match serde_json::from_str(&payload) {
                    Ok(task) => tasks.push(task),
                    Err(e) => warn!(key = %key, "Skipping undecodable task record: {}", e),
                }
            }
        }
        Ok(tasks)
    }

    async fn check_connectivity(&self) -> TaskStoreResult<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
