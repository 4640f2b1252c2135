use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const QUEUE_KEY: &str = "npc_forge:generation_jobs";
const PROCESSING_KEY: &str = "npc_forge:generation_processing";

/// "Job queued" message serialized into Redis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationJobMessage {
    pub entity_id: Uuid,
    pub job_id: Uuid,
    /// Client-supplied copy of the current document, passed through as a prompt hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_document: Option<String>,
}

/// Publishes queued jobs to whatever drives the worker.
#[async_trait]
pub trait JobPublisher: Send + Sync {
    async fn publish(&self, message: &GenerationJobMessage) -> Result<(), QueueError>;
}

/// Redis-backed job queue with a processing list for at-least-once delivery.
pub struct JobQueue {
    client: redis::Client,
}

impl JobQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    /// Enqueue a generation job.
    pub async fn enqueue(&self, job: &GenerationJobMessage) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let payload = serde_json::to_string(job).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Pop the oldest job and move it onto the processing list.
    ///
    /// Returns the raw payload alongside the message so `complete` can remove
    /// exactly what was popped.
    pub async fn dequeue(&self) -> Result<Option<(GenerationJobMessage, String)>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let result: Option<String> = conn
            .rpoplpush(QUEUE_KEY, PROCESSING_KEY)
            .await
            .map_err(QueueError::Redis)?;

        match result {
            Some(payload) => match serde_json::from_str(&payload) {
                Ok(job) => Ok(Some((job, payload))),
                Err(e) => {
                    // Poison message: drop it from the processing list so it is not redelivered.
                    tracing::error!(error = %e, "Discarding undecodable queue payload");
                    conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload)
                        .await
                        .map_err(QueueError::Redis)?;
                    Err(QueueError::Serialize(e))
                }
            },
            None => Ok(None),
        }
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Get the current queue depth (pending jobs).
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let depth: u64 = conn.llen(QUEUE_KEY).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    /// Mark a job as handled (remove its payload from the processing list).
    pub async fn complete(&self, payload: &str) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Push payloads left on the processing list by a crashed worker back onto the queue.
    pub async fn requeue_orphaned(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let mut moved = 0;
        loop {
            let payload: Option<String> = conn
                .rpoplpush(PROCESSING_KEY, QUEUE_KEY)
                .await
                .map_err(QueueError::Redis)?;
            if payload.is_none() {
                break;
            }
            moved += 1;
        }
        Ok(moved)
    }
}

#[async_trait]
impl JobPublisher for JobQueue {
    async fn publish(&self, message: &GenerationJobMessage) -> Result<(), QueueError> {
        self.enqueue(message).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
