//! API key management HTTP handlers.
//!
//! This module implements the key management endpoints for signed-in users:
//! - POST /api/keys - Issue a new key (plaintext returned once)
//! - GET /api/keys - List the caller's keys
//! - DELETE /api/keys/{id} - Revoke one of the caller's keys

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::api_key::CreateApiKeyRequest,
    services::api_key_service::{create_api_key, list_api_keys, revoke_api_key},
    state::AppState,
};

/// Issue a new API key.
///
/// # Endpoint
///
/// `POST /api/keys`
///
/// # Authentication
///
/// Requires a session token (Bearer header or `session` cookie).
///
/// # Request Body (optional)
///
/// ```json
/// { "name": "notebook" }
/// ```
///
/// # Response
///
/// - **Success (201 Created)**: `{ "success": true, "apiKey": { ..., "key": "dsk_..." } }`
/// - **Error (400)**: Name longer than 100 characters
/// - **Error (401)**: No valid session
pub async fn create_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    body: Option<Json<CreateApiKeyRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    tracing::debug!(user_id = %auth.user_id, email = ?auth.email, "Issuing API key");
    let key = create_api_key(state.api_keys.as_ref(), auth.user_id, request.name).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "apiKey": key,
        })),
    ))
}

/// List the caller's API keys, newest first. Plaintext keys are never included.
///
/// `GET /api/keys`
pub async fn list_keys(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, AppError> {
    let keys = list_api_keys(state.api_keys.as_ref(), auth.user_id).await?;

    Ok(Json(json!({
        "success": true,
        "count": keys.len(),
        "apiKeys": keys,
    })))
}

/// Revoke an API key.
///
/// # Endpoint
///
/// `DELETE /api/keys/{id}`
///
/// Revocation is a soft delete: the key stays listed with `isActive: false` and
/// stops validating immediately.
///
/// # Response
///
/// - **Success (200 OK)**: `{ "success": true }`
/// - **Error (404)**: Unknown key, someone else's key, or already revoked
pub async fn revoke_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(key_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if !revoke_api_key(state.api_keys.as_ref(), key_id, auth.user_id).await? {
        return Err(AppError::NotFound("API key not found".to_string()));
    }

    Ok(Json(json!({ "success": true })))
}
