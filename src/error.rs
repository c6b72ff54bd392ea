//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::services::rate_limiter::RateLimitDecision;

/// Application-wide error type.
///
/// Each variant maps to a specific HTTP status code and error message.
///
/// # Error Categories
///
/// - **Upstream Errors**: sqlx errors from the service database or the warehouse, xlsx rendering failures
/// - **Authentication Errors**: missing or invalid API keys, missing session
/// - **Resource Errors**: unknown datasets or API keys
/// - **Validation Errors**: bad identifiers, limits, formats, tables
/// - **Rate Limiting**: a tier budget is exhausted
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed (connection error, query error, timeout).
    ///
    /// Returns HTTP 500 with the underlying message in `details`.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Spreadsheet rendering failed.
    #[error("Export error: {0}")]
    Export(#[from] rust_xlsxwriter::XlsxError),

    /// The endpoint requires an API key and none was supplied.
    #[error("API key required. Provide it via the Authorization header (Bearer token), the X-API-Key header or the api_key query parameter")]
    MissingApiKey,

    /// An API key was supplied but is malformed, unknown or revoked.
    #[error("Invalid or inactive API key")]
    InvalidApiKey,

    /// No valid session token on a key management route.
    #[error("Authentication required")]
    Unauthenticated,

    /// Unknown dataset or resource. Returns HTTP 404.
    #[error("{0}")]
    NotFound(String),

    /// Request body or parameters are invalid. Returns HTTP 400.
    #[error("{0}")]
    Validation(String),

    /// Requested table is not one of the dataset's related tables.
    #[error("Table '{table}' is not part of this dataset")]
    UnknownTable {
        table: String,
        available: Vec<&'static str>,
    },

    /// A rate-limit tier rejected the request. Returns HTTP 429.
    #[error("Rate limit exceeded")]
    RateLimited(RateLimitDecision),
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// All errors return JSON in this format, with extra context fields per variant:
/// ```json
/// {
///   "success": false,
///   "error": "Human-readable error message"
/// }
/// ```
///
/// # Status Code Mapping
///
/// - `Validation`, `UnknownTable` → 400 Bad Request
/// - `MissingApiKey`, `InvalidApiKey`, `Unauthenticated` → 401 Unauthorized
/// - `NotFound` → 404 Not Found
/// - `RateLimited` → 429 Too Many Requests (plus `limits` and `Retry-After`)
/// - `Database`, `Export` → 500 Internal Server Error
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = self.to_string();

        match self {
            AppError::Database(ref e) => {
                tracing::error!(error = %e, "Database operation failed");
                let body = Json(json!({
                    "success": false,
                    "error": "Database query failed",
                    "details": e.to_string(),
                }));
                (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
            }
            AppError::Export(ref e) => {
                tracing::error!(error = %e, "Export rendering failed");
                let body = Json(json!({
                    "success": false,
                    "error": "Export failed",
                    "details": e.to_string(),
                }));
                (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
            }
            AppError::MissingApiKey | AppError::InvalidApiKey | AppError::Unauthenticated => {
                let body = Json(json!({ "success": false, "error": message }));
                (StatusCode::UNAUTHORIZED, body).into_response()
            }
            AppError::NotFound(_) => {
                let body = Json(json!({ "success": false, "error": message }));
                (StatusCode::NOT_FOUND, body).into_response()
            }
            AppError::Validation(_) => {
                let body = Json(json!({ "success": false, "error": message }));
                (StatusCode::BAD_REQUEST, body).into_response()
            }
            AppError::UnknownTable { available, .. } => {
                let body = Json(json!({
                    "success": false,
                    "error": message,
                    "availableTables": available,
                }));
                (StatusCode::BAD_REQUEST, body).into_response()
            }
            AppError::RateLimited(decision) => {
                let body = Json(json!({
                    "success": false,
                    "error": message,
                    "message": "Too many requests. Please retry after the specified time.",
                    "limits": decision.limits_json(),
                }));
                let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
                decision.apply_headers(response.headers_mut());
                response
            }
        }
    }
}
