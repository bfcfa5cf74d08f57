//! Job queue using Redis Streams.

use std::time::Duration;

use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::job::{DeleteSpinJob, ProcessSpinJob, QueueJob};

/// Dedup keys live this long after a submit.
const DEDUP_TTL_SECS: u64 = 3600;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Pending messages idle this long are reclaimed from crashed workers
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "spin:jobs".to_string(),
            consumer_group: "spin:workers".to_string(),
            dlq_stream_name: "spin:dlq".to_string(),
            visibility_timeout: Duration::from_secs(1200),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            visibility_timeout: std::env::var("QUEUE_VISIBILITY_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.visibility_timeout),
        }
    }
}

/// Job queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Round-trip a PING.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    pub async fn enqueue_process(&self, job: ProcessSpinJob) -> QueueResult<String> {
        self.submit(QueueJob::ProcessSpin(job)).await
    }

    pub async fn enqueue_delete(&self, job: DeleteSpinJob) -> QueueResult<String> {
        self.submit(QueueJob::DeleteSpin(job)).await
    }

    /// Append a job to the stream. Fire-and-forget: delivery is the
    /// consumer group's business.
    pub async fn submit(&self, job: QueueJob) -> QueueResult<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let payload = serde_json::to_string(&job)?;
        let idempotency_key = job.idempotency_key();

        let dedup_key = format!("spin:dedup:{}", idempotency_key);
        let exists: bool = conn.exists(&dedup_key).await?;
        if exists {
            warn!("Duplicate job rejected: {}", idempotency_key);
            return Err(QueueError::enqueue_failed("Duplicate job"));
        }

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("key")
            .arg(&idempotency_key)
            .query_async(&mut conn)
            .await?;

        conn.set_ex::<_, _, ()>(&dedup_key, "1", DEDUP_TTL_SECS).await?;

        info!(job_id = %job.job_id(), kind = job.kind(), %message_id, "Enqueued job");
        Ok(message_id)
    }

    /// Acknowledge a job and drop it from the stream.
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged job: {}", message_id);
        Ok(())
    }

    /// Copy a failed job to the dead letter stream, then ack the original.
    pub async fn dlq(&self, message_id: &str, job: &QueueJob, error: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let payload = serde_json::to_string(job)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(message_id).await?;

        warn!(job_id = %job.job_id(), error, "Moved job to DLQ");
        Ok(())
    }

    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    /// Read up to `count` new jobs for this consumer, blocking for `block_ms`.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueJob)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::new();
        for stream_key in result.keys {
            for entry in stream_key.ids {
                if let Some(job) = self.parse_entry(&entry.id, &entry.map).await {
                    debug!(job_id = %job.job_id(), "Consumed job from stream");
                    jobs.push((entry.id, job));
                }
            }
        }

        Ok(jobs)
    }

    /// Claim pending jobs idle for longer than the visibility timeout.
    pub async fn claim_pending(&self, consumer_name: &str, count: usize) -> QueueResult<Vec<(String, QueueJob)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let idle_ms = self.config.visibility_timeout.as_millis() as u64;
        let pending: redis::streams::StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(idle_ms);
        for entry in &pending.ids {
            cmd.arg(&entry.id);
        }
        let result: redis::streams::StreamClaimReply = cmd.query_async(&mut conn).await?;

        let mut jobs = Vec::new();
        for entry in result.ids {
            if let Some(job) = self.parse_entry(&entry.id, &entry.map).await {
                info!(job_id = %job.job_id(), "Claimed pending job");
                jobs.push((entry.id, job));
            }
        }

        Ok(jobs)
    }

    /// Decode the `job` field; malformed payloads are acked so they are not redelivered.
    async fn parse_entry(
        &self,
        message_id: &str,
        map: &std::collections::HashMap<String, redis::Value>,
    ) -> Option<QueueJob> {
        let Some(redis::Value::BulkString(payload)) = map.get("job") else {
            return None;
        };
        match serde_json::from_slice::<QueueJob>(payload) {
            Ok(job) => Some(job),
            Err(e) => {
                warn!("Failed to parse job payload {}: {}", message_id, e);
                self.ack(message_id).await.ok();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spin_models::{FrameCount, JobId};

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.stream_name, "spin:jobs");
        assert_eq!(config.dlq_stream_name, "spin:dlq");
        assert_eq!(config.visibility_timeout, Duration::from_secs(1200));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let config = QueueConfig {
            redis_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(JobQueue::new(config).is_err());
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_submit_consume_ack() {
        let config = QueueConfig {
            stream_name: format!("spin:test:{}", JobId::new()),
            ..QueueConfig::from_env()
        };
        let queue = JobQueue::new(config).unwrap();
        queue.init().await.unwrap();

        let job = ProcessSpinJob::new(JobId::new(), FrameCount::default());
        queue.enqueue_process(job.clone()).await.unwrap();
        assert!(queue.enqueue_process(job.clone()).await.is_err());

        let consumed = queue.consume("test-consumer", 100, 10).await.unwrap();
        assert_eq!(consumed.len(), 1);
        assert_eq!(consumed[0].1.job_id(), &job.job_id);

        queue.ack(&consumed[0].0).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_failed_delete_is_dead_lettered() {
        let suffix = JobId::new();
        let config = QueueConfig {
            stream_name: format!("spin:test:{}", suffix),
            dlq_stream_name: format!("spin:test:{}:dlq", suffix),
            ..QueueConfig::from_env()
        };
        let queue = JobQueue::new(config).unwrap();
        queue.init().await.unwrap();

        let job = DeleteSpinJob::new(JobId::new());
        queue.enqueue_delete(job.clone()).await.unwrap();

        let consumed = queue.consume("test-consumer", 100, 10).await.unwrap();
        assert_eq!(consumed.len(), 1);
        let (message_id, queued) = &consumed[0];
        assert_eq!(queued.kind(), "delete_spin");

        queue.dlq(message_id, queued, "bucket unavailable").await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 0);
        assert_eq!(queue.dlq_len().await.unwrap(), 1);
    }
}
