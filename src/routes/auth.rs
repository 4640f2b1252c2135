use axum::http::HeaderMap;

use crate::routes::error::ApiError;

/// Header carrying the authenticated user id, set by the auth gateway.
pub const CALLER_HEADER: &str = "x-user-id";

/// Header the change-event source signs its calls with.
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

pub fn caller_id(headers: &HeaderMap) -> Result<&str, ApiError> {
    let caller = headers
        .get(CALLER_HEADER)
        .ok_or(ApiError::Unauthorized)?
        .to_str()
        .map_err(|_| ApiError::Unauthorized)?
        .trim();

    if caller.is_empty() {
        return Err(ApiError::Unauthorized);
    }
    Ok(caller)
}

pub fn verify_webhook_secret(headers: &HeaderMap, expected: Option<&str>) -> Result<(), ApiError> {
    let expected = expected.ok_or(ApiError::Unauthorized)?;
    let presented = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    if presented != expected {
        return Err(ApiError::Unauthorized);
    }
    Ok(())
}
