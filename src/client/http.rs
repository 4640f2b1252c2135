use async_trait::async_trait;
use reqwest::Client;
use uuid::Uuid;

use crate::client::poller::{PollError, StatusSource};
use crate::models::generation::JobStatusView;
use crate::routes::auth::CALLER_HEADER;
use crate::routes::error::ErrorBody;

/// [`StatusSource`] that calls the status endpoint of a running API server.
pub struct HttpStatusSource {
    http: Client,
    base_url: String,
    user_id: String,
}

impl HttpStatusSource {
    pub fn new(base_url: &str, user_id: &str) -> Self {
        Self::with_client(Client::new(), base_url, user_id)
    }

    pub fn with_client(http: Client, base_url: &str, user_id: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            user_id: user_id.to_string(),
        }
    }

    fn status_url(&self, entity_id: Uuid, job_id: Uuid) -> String {
        format!(
            "{}/api/v1/npcs/{entity_id}/generation/{job_id}",
            self.base_url
        )
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn fetch(&self, entity_id: Uuid, job_id: Uuid) -> Result<JobStatusView, PollError> {
        let response = self
            .http
            .get(self.status_url(entity_id, job_id))
            .header(CALLER_HEADER, &self.user_id)
            .send()
            .await
            .map_err(|e| PollError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|err| err.message)
                .unwrap_or(body);
            return Err(PollError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<JobStatusView>()
            .await
            .map_err(|e| PollError::Decode(e.to_string()))
    }
}
