use sqlx::PgPool;
use std::sync::Arc;

use crate::db::store::JobStore;
use crate::services::{
    queue::{JobPublisher, JobQueue},
    storage::DocumentStore,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    /// Pool behind `jobs`, kept for health checks.
    pub db: PgPool,
    pub queue: Arc<JobQueue>,
    pub jobs: Arc<dyn JobStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub publisher: Arc<dyn JobPublisher>,
    pub webhook_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        db: PgPool,
        queue: Arc<JobQueue>,
        jobs: Arc<dyn JobStore>,
        documents: Arc<dyn DocumentStore>,
        publisher: Arc<dyn JobPublisher>,
    ) -> Self {
        Self {
            db,
            queue,
            jobs,
            documents,
            publisher,
            webhook_secret: None,
        }
    }

    pub fn with_webhook_secret(mut self, secret: Option<&str>) -> Self {
        self.webhook_secret = secret.map(Arc::from);
        self
    }
}
