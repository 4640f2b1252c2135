use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::store::ConflictReason;
use crate::services::initiator::InitiateError;
use crate::services::queue::QueueError;
use crate::services::status::StatusError;

/// Body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: code.to_string(),
            message: message.into(),
        }),
    )
        .into_response()
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Missing or empty caller identity")]
    Unauthorized,

    #[error("Not found")]
    NotFound,

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error(transparent)]
    Initiate(#[from] InitiateError),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidBody(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(_: PathRejection) -> Self {
        ApiError::NotFound
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => {
                json_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Missing or invalid credentials")
            }
            ApiError::NotFound
            | ApiError::Initiate(InitiateError::NotFound)
            | ApiError::Status(StatusError::NotFound) => {
                json_error(StatusCode::NOT_FOUND, "NOT_FOUND", "NPC or generation job not found")
            }
            ApiError::InvalidBody(message) => {
                json_error(StatusCode::UNPROCESSABLE_ENTITY, "INVALID_REQUEST", message)
            }
            ApiError::Initiate(InitiateError::Invalid(report)) => json_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_REQUEST",
                report.to_string(),
            ),
            ApiError::Initiate(InitiateError::Conflict(ConflictReason::JobActive)) => json_error(
                StatusCode::CONFLICT,
                "JOB_ACTIVE",
                "A generation job is already queued or processing for this NPC",
            ),
            ApiError::Initiate(InitiateError::Conflict(ConflictReason::AlreadyGenerated)) => {
                json_error(
                    StatusCode::CONFLICT,
                    "ALREADY_GENERATED",
                    "A document was already generated; set regenerate to run again",
                )
            }
            ApiError::Initiate(InitiateError::Queue(e)) | ApiError::Queue(e) => {
                tracing::error!(error = %e, "Job queue unavailable");
                json_error(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "QUEUE_UNAVAILABLE",
                    "Generation queue is unavailable, try again later",
                )
            }
            ApiError::Initiate(InitiateError::Store(e)) => internal_error(&e),
            ApiError::Status(StatusError::Store(e)) => internal_error(&e),
            ApiError::Status(StatusError::Storage(e)) => internal_error(&e),
        }
    }
}

fn internal_error(err: &dyn std::error::Error) -> Response {
    tracing::error!(error = %err, "Request failed");
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "Internal server error",
    )
}
