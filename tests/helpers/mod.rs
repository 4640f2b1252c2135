//! In-memory stand-ins for the pipeline's external dependencies.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use npc_forge::app_state::AppState;
use npc_forge::db::store::{JobStore, QueueOutcome, StoreError};
use npc_forge::models::generation::{JobStatusView, TriggerRequest, TriggerResponse};
use npc_forge::models::job::{JobError, JobRecord, JobStatus};
use npc_forge::models::npc::NpcEntity;
use npc_forge::services::completion::{
    CompletionClient, CompletionConfig, CompletionTransport, TransportError, TransportRequest,
    TransportResponse,
};
use npc_forge::services::initiator::{self, InitiateError};
use npc_forge::services::queue::{GenerationJobMessage, JobPublisher, JobQueue, QueueError};
use npc_forge::services::status::{self, StatusError};
use npc_forge::services::storage::{DocumentStore, StorageError};
use npc_forge::services::worker::{GenerationWorker, JobOutcome};

/// [`JobStore`] over a map, applying the same transition guards as the SQL.
#[derive(Default)]
pub struct MemoryJobStore {
    npcs: Mutex<HashMap<Uuid, NpcEntity>>,
}

impl MemoryJobStore {
    pub fn insert(&self, npc: NpcEntity) -> Uuid {
        let id = npc.id;
        self.npcs.lock().unwrap().insert(id, npc);
        id
    }

    pub fn job(&self, entity_id: Uuid) -> JobRecord {
        self.npcs.lock().unwrap()[&entity_id].job.clone()
    }

    pub fn update(&self, entity_id: Uuid, f: impl FnOnce(&mut NpcEntity)) {
        let mut npcs = self.npcs.lock().unwrap();
        f(npcs.get_mut(&entity_id).expect("unknown npc"));
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn find_entity(&self, entity_id: Uuid) -> Result<Option<NpcEntity>, StoreError> {
        Ok(self.npcs.lock().unwrap().get(&entity_id).cloned())
    }

    async fn try_queue_job(
        &self,
        entity_id: Uuid,
        owner_id: &str,
        regenerate: bool,
        job_id: Uuid,
    ) -> Result<QueueOutcome, StoreError> {
        let mut npcs = self.npcs.lock().unwrap();
        let Some(npc) = npcs
            .get_mut(&entity_id)
            .filter(|npc| npc.is_visible_to(owner_id))
        else {
            return Ok(QueueOutcome::NotFound);
        };

        let allowed = match npc.job.status {
            None => true,
            Some(status) => regenerate && status.is_terminal(),
        };
        if !allowed {
            return Ok(QueueOutcome::refused(npc.job.status));
        }

        let now = Utc::now();
        npc.job = JobRecord {
            job_id: Some(job_id),
            status: Some(JobStatus::Queued),
            started_at: None,
            error: None,
        };
        npc.updated_at = now;
        Ok(QueueOutcome::Queued {
            job_id,
            submitted_at: now,
        })
    }

    async fn mark_processing(&self, entity_id: Uuid, job_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.transition(entity_id, job_id, &[JobStatus::Queued], |job| {
            job.status = Some(JobStatus::Processing);
            job.started_at = Some(Utc::now());
            job.error = None;
        }))
    }

    async fn mark_succeeded(&self, entity_id: Uuid, job_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.transition(entity_id, job_id, &[JobStatus::Processing], |job| {
            job.status = Some(JobStatus::Succeeded);
            job.error = None;
        }))
    }

    async fn mark_failed(
        &self,
        entity_id: Uuid,
        job_id: Uuid,
        error: &JobError,
    ) -> Result<bool, StoreError> {
        Ok(self.transition(
            entity_id,
            job_id,
            &[JobStatus::Queued, JobStatus::Processing],
            |job| {
                job.status = Some(JobStatus::Failed);
                job.error = Some(error.clone());
            },
        ))
    }

    async fn find_stalled(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<(Uuid, Uuid)>, StoreError> {
        Ok(self
            .npcs
            .lock()
            .unwrap()
            .values()
            .filter(|npc| npc.job.status == Some(JobStatus::Processing))
            .filter(|npc| npc.job.started_at.is_some_and(|at| at < started_before))
            .filter_map(|npc| npc.job.job_id.map(|job_id| (npc.id, job_id)))
            .collect())
    }
}

impl MemoryJobStore {
    fn transition(
        &self,
        entity_id: Uuid,
        job_id: Uuid,
        from: &[JobStatus],
        apply: impl FnOnce(&mut JobRecord),
    ) -> bool {
        let mut npcs = self.npcs.lock().unwrap();
        let Some(npc) = npcs.get_mut(&entity_id) else {
            return false;
        };
        let current = npc.job.status;
        if npc.job.job_id != Some(job_id) || !current.is_some_and(|s| from.contains(&s)) {
            return false;
        }
        apply(&mut npc.job);
        npc.updated_at = Utc::now();
        true
    }
}

/// [`DocumentStore`] over a map, counting writes.
#[derive(Default)]
pub struct MemoryDocuments {
    docs: Mutex<HashMap<Uuid, String>>,
    writes: AtomicUsize,
}

impl MemoryDocuments {
    pub fn get(&self, entity_id: Uuid) -> Option<String> {
        self.docs.lock().unwrap().get(&entity_id).cloned()
    }

    pub fn remove(&self, entity_id: Uuid) {
        self.docs.lock().unwrap().remove(&entity_id);
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocuments {
    async fn put_document(&self, entity_id: Uuid, document: &str) -> Result<(), StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.docs
            .lock()
            .unwrap()
            .insert(entity_id, document.to_string());
        Ok(())
    }

    async fn get_document(&self, entity_id: Uuid) -> Result<Option<String>, StorageError> {
        Ok(self.get(entity_id))
    }
}

/// [`JobPublisher`] that records messages; can be switched to fail.
#[derive(Default)]
pub struct MemoryPublisher {
    messages: Mutex<VecDeque<GenerationJobMessage>>,
    failing: AtomicBool,
}

impl MemoryPublisher {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn pop(&self) -> Option<GenerationJobMessage> {
        self.messages.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

#[async_trait]
impl JobPublisher for MemoryPublisher {
    async fn publish(&self, message: &GenerationJobMessage) -> Result<(), QueueError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(QueueError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection refused",
            ))));
        }
        self.messages.lock().unwrap().push_back(message.clone());
        Ok(())
    }
}

/// Replays scripted provider responses, then a fallback; can hang instead.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    fallback: Option<TransportResponse>,
    hang: bool,
    requests: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<TransportResponse, TransportError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    pub fn always(response: TransportResponse) -> Self {
        Self {
            fallback: Some(response),
            ..Default::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }

    pub fn attempts(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionTransport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        if self.hang {
            std::future::pending::<()>().await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => Ok(self
                .fallback
                .clone()
                .expect("scripted transport ran out of responses")),
        }
    }
}

pub fn completion_config() -> CompletionConfig {
    let mut config = CompletionConfig::new("https://ai.test/v1/chat/completions", "sk-test", "test-model");
    config.backoff_base = Duration::from_millis(1);
    config.timeout = Duration::from_secs(5);
    config
}

/// Initiator, worker and status endpoint wired to in-memory dependencies.
pub struct Pipeline {
    pub store: Arc<MemoryJobStore>,
    pub documents: Arc<MemoryDocuments>,
    pub publisher: Arc<MemoryPublisher>,
    pub transport: Arc<ScriptedTransport>,
    pub worker: GenerationWorker,
}

impl Pipeline {
    pub fn new(transport: ScriptedTransport) -> Self {
        Self::with_config(transport, completion_config())
    }

    pub fn with_config(transport: ScriptedTransport, config: CompletionConfig) -> Self {
        let store = Arc::new(MemoryJobStore::default());
        let documents = Arc::new(MemoryDocuments::default());
        let publisher = Arc::new(MemoryPublisher::default());
        let transport = Arc::new(transport);
        let completion = CompletionClient::new(config, transport.clone()).expect("valid completion config");
        let worker = GenerationWorker::new(store.clone(), documents.clone(), Arc::new(completion));
        Self {
            store,
            documents,
            publisher,
            transport,
            worker,
        }
    }

    pub async fn trigger(
        &self,
        caller: &str,
        entity_id: Uuid,
        regenerate: bool,
    ) -> Result<TriggerResponse, InitiateError> {
        let request = TriggerRequest {
            regenerate,
            current_document: None,
        };
        initiator::start_generation(
            self.store.as_ref(),
            self.publisher.as_ref(),
            caller,
            entity_id,
            request,
        )
        .await
    }

    pub async fn status(
        &self,
        caller: &str,
        entity_id: Uuid,
        job_id: Uuid,
    ) -> Result<JobStatusView, StatusError> {
        status::job_status(
            self.store.as_ref(),
            self.documents.as_ref(),
            caller,
            entity_id,
            job_id,
        )
        .await
    }

    /// Deliver the oldest published message to the worker.
    pub async fn run_next(&self) -> JobOutcome {
        let message = self.publisher.pop().expect("no published message");
        self.worker
            .process(&message)
            .await
            .expect("worker failed to claim job")
    }

    /// Router state over the same fakes. Postgres and Redis handles are lazy
    /// and never touched outside `/health`.
    pub fn app_state(&self, webhook_secret: Option<&str>) -> AppState {
        let db = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/npc_forge_unused")
            .expect("lazy pool");
        let queue = Arc::new(JobQueue::new("redis://127.0.0.1/").expect("redis client"));
        AppState::new(
            db,
            queue,
            self.store.clone(),
            self.documents.clone(),
            self.publisher.clone(),
        )
        .with_webhook_secret(webhook_secret)
    }
}
