//! Request types for the query and download endpoints.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AppError;

/// Largest row count either endpoint will return in one call.
pub const MAX_ROW_LIMIT: u32 = 10_000;

/// Row limit of `POST /api/datasets/{id}/query` when the body omits `limit`.
pub const DEFAULT_QUERY_LIMIT: u32 = 100;

/// Row limit of `GET /api/datasets/{id}/download` when `limit` is omitted.
pub const DEFAULT_DOWNLOAD_LIMIT: u32 = 1_000;

/// Body of `POST /api/datasets/{id}/query`.
///
/// # JSON Example
///
/// ```json
/// {
///   "table": "ecom_customers",
///   "filters": { "city": "New York", "segment": ["gold", "silver"] },
///   "orderBy": "signup_date DESC",
///   "limit": 50,
///   "offset": 100
/// }
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QueryRequest {
    #[serde(default)]
    pub table: Option<String>,

    /// Column name to value; see the query builder for accepted value shapes
    #[serde(default)]
    pub filters: Map<String, Value>,

    #[serde(default)]
    pub group_by: Option<String>,

    /// `"column"` or `"column ASC|DESC"`
    #[serde(default)]
    pub order_by: Option<String>,

    #[serde(default)]
    pub limit: Option<u32>,

    #[serde(default)]
    pub offset: u32,
}

/// Query string of `GET /api/datasets/{id}/download`.
///
/// `limit` is kept as text so a malformed value produces the JSON error envelope
/// rather than a bare extractor rejection.
#[derive(Debug, Default, Deserialize)]
pub struct DownloadParams {
    #[serde(default)]
    pub format: Option<String>,

    #[serde(default)]
    pub limit: Option<String>,

    #[serde(default)]
    pub table: Option<String>,
}

/// Output format of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadFormat {
    Json,
    Csv,
    Xlsx,
}

impl DownloadFormat {
    /// Parse the `format` query parameter; absent means JSON.
    pub fn parse(raw: Option<&str>) -> Result<Self, AppError> {
        match raw.map(|f| f.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("json") => Ok(DownloadFormat::Json),
            Some("csv") => Ok(DownloadFormat::Csv),
            Some("xlsx") => Ok(DownloadFormat::Xlsx),
            Some(other) => Err(AppError::Validation(format!(
                "Unsupported format '{other}'. Use csv, json or xlsx"
            ))),
        }
    }
}

/// Check a requested row limit against `1..=MAX_ROW_LIMIT`, applying `default` when absent.
pub fn resolve_limit(requested: Option<u32>, default: u32) -> Result<u32, AppError> {
    let limit = requested.unwrap_or(default);
    if limit == 0 || limit > MAX_ROW_LIMIT {
        return Err(AppError::Validation(format!(
            "limit must be between 1 and {MAX_ROW_LIMIT}"
        )));
    }
    Ok(limit)
}

/// Parse the textual `limit` query parameter of the download endpoint.
pub fn parse_limit_param(raw: Option<&str>, default: u32) -> Result<u32, AppError> {
    let requested = match raw.map(str::trim) {
        None | Some("") => None,
        Some(text) => Some(text.parse::<u32>().map_err(|_| {
            AppError::Validation(format!("limit must be a positive integer, got '{text}'"))
        })?),
    };
    resolve_limit(requested, default)
}
