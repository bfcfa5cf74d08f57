//! Job record store.
//!
//! One flat JSON record per job, addressed by job id. The orchestrator is the
//! only writer; `set` replaces the whole record.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::AsyncCommands;
use spin_models::{JobId, JobRecord};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{QueueError, QueueResult};

/// Redis key of a job record.
pub fn record_key(job_id: &JobId) -> String {
    format!("task:{}", job_id)
}

#[async_trait]
pub trait JobRecordStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, job_id: &JobId) -> QueueResult<Option<JobRecord>>;

    async fn set(&self, record: &JobRecord) -> QueueResult<()>;

    async fn delete(&self, job_id: &JobId) -> QueueResult<()>;
}

/// Records kept as JSON strings in Redis.
pub struct RedisRecordStore {
    client: redis::Client,
    /// Expiry applied on every write, if any
    ttl_secs: Option<u64>,
}

impl RedisRecordStore {
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client, ttl_secs: None })
    }

    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = Some(ttl_secs);
        self
    }
}

#[async_trait]
impl JobRecordStore for RedisRecordStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, job_id: &JobId) -> QueueResult<Option<JobRecord>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.get(record_key(job_id)).await?;
        raw.map(|s| serde_json::from_str(&s).map_err(QueueError::from))
            .transpose()
    }

    async fn set(&self, record: &JobRecord) -> QueueResult<()> {
        let payload = serde_json::to_string(record)?;
        let key = record_key(&record.job_id);
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::record_write_failed(e.to_string()))?;

        let result = match self.ttl_secs {
            Some(ttl) => conn.set_ex::<_, _, ()>(&key, payload, ttl).await,
            None => conn.set::<_, _, ()>(&key, payload).await,
        };
        result.map_err(|e| QueueError::record_write_failed(format!("{}: {}", key, e)))?;

        debug!(job_id = %record.job_id, step = %record.step, progress = record.progress, "Stored job record");
        Ok(())
    }

    async fn delete(&self, job_id: &JobId) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(record_key(job_id)).await?;
        Ok(())
    }
}

/// In-process record store for tests and single-node runs.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<JobId, JobRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl JobRecordStore for MemoryRecordStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, job_id: &JobId) -> QueueResult<Option<JobRecord>> {
        Ok(self.records.read().await.get(job_id).cloned())
    }

    async fn set(&self, record: &JobRecord) -> QueueResult<()> {
        self.records
            .write()
            .await
            .insert(record.job_id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, job_id: &JobId) -> QueueResult<()> {
        self.records.write().await.remove(job_id);
        Ok(())
    }
}
