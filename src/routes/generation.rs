use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::change_event::ChangeEvent;
use crate::models::generation::{JobStatusView, TriggerRequest, TriggerResponse};
use crate::routes::auth::{caller_id, verify_webhook_secret};
use crate::routes::error::ApiError;
use crate::services::{initiator, status};

/// POST /api/v1/npcs/{entity_id}/generation — queue a generation job.
pub async fn trigger_generation(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    headers: HeaderMap,
    body: Result<Json<TriggerRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TriggerResponse>), ApiError> {
    let caller = caller_id(&headers)?;
    let Path(entity_id) = path?;
    let Json(request) = body?;

    let response = initiator::start_generation(
        state.jobs.as_ref(),
        state.publisher.as_ref(),
        caller,
        entity_id,
        request,
    )
    .await?;

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// GET /api/v1/npcs/{entity_id}/generation/{job_id} — job status and document.
pub async fn get_generation_status(
    State(state): State<AppState>,
    path: Result<Path<(Uuid, Uuid)>, PathRejection>,
    headers: HeaderMap,
) -> Result<Json<JobStatusView>, ApiError> {
    let caller = caller_id(&headers)?;
    let Path((entity_id, job_id)) = path?;

    let view = status::job_status(
        state.jobs.as_ref(),
        state.documents.as_ref(),
        caller,
        entity_id,
        job_id,
    )
    .await?;

    Ok(Json(view))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HookResponse {
    pub enqueued: bool,
}

/// POST /api/v1/hooks/npc-change — legacy row-change notifications.
pub async fn npc_change_hook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ChangeEvent>, JsonRejection>,
) -> Result<(StatusCode, Json<HookResponse>), ApiError> {
    verify_webhook_secret(&headers, state.webhook_secret.as_deref())?;
    let Json(event) = body?;

    let Some(message) = event.to_message() else {
        tracing::debug!(table = %event.table, "Change event does not start a job");
        return Ok((StatusCode::ACCEPTED, Json(HookResponse { enqueued: false })));
    };

    state.publisher.publish(&message).await?;
    tracing::info!(entity_id = %message.entity_id, job_id = %message.job_id, "Change event enqueued job");

    Ok((StatusCode::ACCEPTED, Json(HookResponse { enqueued: true })))
}
