//! Dataset access HTTP handlers.
//!
//! This module implements the dataset API endpoints:
//! - GET /api/datasets - List the catalog with row counts
//! - GET /api/datasets/{id} - Dataset metadata with live per-table statistics
//! - GET /api/datasets/{id}/download - Export rows as JSON, CSV or XLSX
//! - POST /api/datasets/{id}/query - Filtered, sorted, paginated rows
//!
//! Every request follows the same sequence: identify the caller, charge the
//! matching rate-limit tier, resolve the dataset and table through the catalog,
//! build a guarded query, execute it, format the result and attach the
//! `X-RateLimit-*` headers.

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{info, warn};

use crate::{
    error::AppError,
    middleware::auth::RequestContext,
    models::{
        api_key::ApiKeyData,
        dataset::{DatasetSummary, Row},
        query::{
            DEFAULT_DOWNLOAD_LIMIT, DEFAULT_QUERY_LIMIT, DownloadFormat, DownloadParams,
            QueryRequest, parse_limit_param, resolve_limit,
        },
    },
    services::{
        api_key_service::validate_api_key,
        catalog,
        export::{rows_to_csv, rows_to_xlsx},
        query_builder::{QueryOptions, build_query},
        rate_limiter::{FixedWindowLimiter, RateLimitDecision, RateLimiters},
    },
    state::AppState,
};

const XLSX_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Rate-limit identity of an API key.
fn key_identity(key: &ApiKeyData) -> String {
    format!("key:{}", key.id)
}

/// Validate the presented key, if any. An invalid key is `None`, not an error.
async fn presented_key(
    state: &AppState,
    ctx: &RequestContext,
) -> Result<Option<ApiKeyData>, AppError> {
    match ctx.api_key.as_deref() {
        Some(key) => validate_api_key(state.api_keys.as_ref(), key).await,
        None => Ok(None),
    }
}

/// Require a valid API key and charge `limiter` for it.
async fn require_api_key(
    state: &AppState,
    ctx: &RequestContext,
    limiter: &FixedWindowLimiter,
) -> Result<(ApiKeyData, RateLimitDecision), AppError> {
    if ctx.api_key.is_none() {
        return Err(AppError::MissingApiKey);
    }
    let key = presented_key(state, ctx)
        .await?
        .ok_or(AppError::InvalidApiKey)?;
    let decision = RateLimiters::enforce(limiter, &key_identity(&key))?;
    Ok((key, decision))
}

/// Catalog routes are free for the website and metered on `api_general` for everyone else.
async fn catalog_access(
    state: &AppState,
    ctx: &RequestContext,
) -> Result<Option<RateLimitDecision>, AppError> {
    if ctx.internal {
        return Ok(None);
    }
    let (_, decision) = require_api_key(state, ctx, &state.limiters.api_general).await?;
    Ok(Some(decision))
}

fn with_rate_limit(decision: Option<&RateLimitDecision>, response: impl IntoResponse) -> Response {
    let mut response = response.into_response();
    if let Some(decision) = decision {
        decision.apply_headers(response.headers_mut());
    }
    response
}

/// List all datasets.
///
/// # Endpoint
///
/// `GET /api/datasets`
///
/// # Authentication
///
/// Requests from the website itself need nothing. Other callers need an API key
/// and are charged on the `api_general` tier.
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "success": true,
///   "count": 5,
///   "datasets": [
///     {
///       "id": "ecom-datamart",
///       "type": "datamart",
///       "mainTable": "ecom_customers",
///       "relatedTables": ["ecom_customers", "ecom_orders"],
///       "name": "E-commerce Datamart",
///       "tableCount": 2,
///       "rowCount": 1200,
///       "columnCount": 9
///     }
///   ]
/// }
/// ```
///
/// # Degradation
///
/// If the warehouse cannot describe a dataset's main table, that dataset is
/// still listed with zero counts.
pub async fn list_datasets(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Response, AppError> {
    let decision = catalog_access(&state, &ctx).await?;

    let mut datasets = Vec::with_capacity(catalog::all().len());
    for dataset in catalog::all() {
        let (row_count, column_count) = match state.warehouse.table_stats(dataset.main_table).await
        {
            Ok(stats) => (stats.row_count, stats.column_count),
            Err(e) => {
                warn!(dataset = dataset.id, error = %e, "Could not load dataset statistics");
                (0, 0)
            }
        };

        datasets.push(DatasetSummary {
            descriptor: dataset.clone(),
            table_count: dataset.related_tables.len(),
            row_count,
            column_count,
        });
    }

    let body = Json(json!({
        "success": true,
        "count": datasets.len(),
        "datasets": datasets,
    }));

    Ok(with_rate_limit(decision.as_ref(), body))
}

/// Dataset metadata with live statistics for every related table.
///
/// # Endpoint
///
/// `GET /api/datasets/{id}`
///
/// Same access rules as the list endpoint. Row counts come from `COUNT(*)`, columns
/// from `information_schema.columns`. Any warehouse failure fails the request.
///
/// # Response
///
/// - **Success (200 OK)**: dataset descriptor, `tables` statistics, `totalRows`
/// - **Error (404)**: Unknown dataset
/// - **Error (500)**: Warehouse error
pub async fn get_dataset(
    State(state): State<AppState>,
    Path(dataset_id): Path<String>,
    ctx: RequestContext,
) -> Result<Response, AppError> {
    let decision = catalog_access(&state, &ctx).await?;
    let dataset = catalog::require(&dataset_id)?;

    let mut tables = Vec::with_capacity(dataset.related_tables.len());
    for table in dataset.related_tables {
        tables.push(state.warehouse.table_stats(table).await?);
    }
    let total_rows: i64 = tables.iter().map(|t| t.row_count).sum();

    let body = Json(json!({
        "success": true,
        "dataset": dataset,
        "type": dataset.dataset_type,
        "tableCount": tables.len(),
        "totalRows": total_rows,
        "tables": tables,
    }));

    Ok(with_rate_limit(decision.as_ref(), body))
}

/// Export a dataset.
///
/// # Endpoint
///
/// `GET /api/datasets/{id}/download?format={csv|json|xlsx}&limit=&table=`
///
/// # Access Modes
///
/// - **API mode** (valid API key): `api_general` tier
/// - **Direct mode** (no or invalid key): per-IP `download_burst` (3 / 15 min) and
///   `download_hourly` (10 / hour), checked in that order
///
/// # Formats
///
/// - `json` (default): envelope with the rows of one table
/// - `csv`: attachment with the rows of one table
/// - `xlsx`: datamarts only, one worksheet per related table; 400 for table datasets
///
/// # Parameters
///
/// - `limit`: rows per table, default 1000, at most 10000
/// - `table`: one of the dataset's related tables, defaults to the main table
pub async fn download_dataset(
    State(state): State<AppState>,
    Path(dataset_id): Path<String>,
    ctx: RequestContext,
    Query(params): Query<DownloadParams>,
) -> Result<Response, AppError> {
    let key = presented_key(&state, &ctx).await?;

    let (decision, access) = match &key {
        Some(key) => (
            RateLimiters::enforce(&state.limiters.api_general, &key_identity(key))?,
            "api",
        ),
        None => {
            if ctx.api_key.is_some() {
                warn!(client_ip = %ctx.client_ip, "Invalid API key on download, applying anonymous limits");
            }
            (
                state
                    .limiters
                    .enforce_download(&format!("ip:{}", ctx.client_ip))?,
                "direct",
            )
        }
    };

    let dataset = catalog::require(&dataset_id)?;
    let format = DownloadFormat::parse(params.format.as_deref())?;
    let limit = parse_limit_param(params.limit.as_deref(), DEFAULT_DOWNLOAD_LIMIT)?;
    let table = catalog::table_for(dataset, params.table.as_deref())?;

    let options = QueryOptions {
        limit,
        ..Default::default()
    };

    match format {
        DownloadFormat::Xlsx => {
            if !dataset.is_datamart() {
                return Err(AppError::Validation(format!(
                    "XLSX export is only available for datamart datasets; '{}' is a single table, use csv or json",
                    dataset.id
                )));
            }

            let mut sheets: Vec<(String, Vec<Row>)> = Vec::with_capacity(dataset.related_tables.len());
            for related in dataset.related_tables {
                let query = build_query(related, &options)?;
                let rows = state.warehouse.fetch_rows(&query).await?;
                sheets.push((related.to_string(), rows));
            }
            let total: usize = sheets.iter().map(|(_, rows)| rows.len()).sum();
            let bytes = rows_to_xlsx(&sheets)?;

            info!(dataset = dataset.id, format = "xlsx", sheets = sheets.len(), rows = total, access, "Dataset downloaded");

            let response = (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, HeaderValue::from_static(XLSX_CONTENT_TYPE)),
                    (header::CONTENT_DISPOSITION, attachment(&format!("{}.xlsx", dataset.id))?),
                ],
                bytes,
            );
            Ok(with_rate_limit(Some(&decision), response))
        }
        DownloadFormat::Csv => {
            let query = build_query(table, &options)?;
            let rows = state.warehouse.fetch_rows(&query).await?;

            info!(dataset = dataset.id, table, format = "csv", rows = rows.len(), access, "Dataset downloaded");

            let response = (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, HeaderValue::from_static("text/csv; charset=utf-8")),
                    (header::CONTENT_DISPOSITION, attachment(&format!("{}-{table}.csv", dataset.id))?),
                ],
                rows_to_csv(&rows),
            );
            Ok(with_rate_limit(Some(&decision), response))
        }
        DownloadFormat::Json => {
            let query = build_query(table, &options)?;
            let rows = state.warehouse.fetch_rows(&query).await?;

            info!(dataset = dataset.id, table, format = "json", rows = rows.len(), access, "Dataset downloaded");

            let body = Json(json!({
                "success": true,
                "dataset": dataset.id,
                "datasetName": dataset.display.name,
                "type": dataset.dataset_type,
                "tableName": table,
                "access": access,
                "count": rows.len(),
                "data": rows,
            }));
            Ok(with_rate_limit(Some(&decision), body))
        }
    }
}

fn attachment(filename: &str) -> Result<HeaderValue, AppError> {
    HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
        .map_err(|_| AppError::Validation(format!("Invalid file name '{filename}'")))
}

/// Query a dataset table.
///
/// # Endpoint
///
/// `POST /api/datasets/{id}/query`
///
/// # Authentication
///
/// Always requires an API key; charged on the `api_query` tier.
///
/// # Request Body
///
/// ```json
/// {
///   "table": "ecom_customers",
///   "filters": { "city": "New York" },
///   "orderBy": "signup_date DESC",
///   "groupBy": null,
///   "limit": 5,
///   "offset": 0
/// }
/// ```
///
/// # Response
///
/// - **Success (200 OK)**: `{ success, dataset, type, tableName, count, data, query }`
/// - **Error (400)**: Bad body, identifier, limit or table
/// - **Error (401)**: Missing or invalid API key
/// - **Error (404)**: Unknown dataset
/// - **Error (429)**: `api_query` budget exhausted
/// - **Error (500)**: Warehouse error
pub async fn query_dataset(
    State(state): State<AppState>,
    Path(dataset_id): Path<String>,
    ctx: RequestContext,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let (key, decision) = require_api_key(&state, &ctx, &state.limiters.api_query).await?;
    let dataset = catalog::require(&dataset_id)?;

    let Json(request) = body.map_err(|rejection| {
        AppError::Validation(format!("Invalid request body: {}", rejection.body_text()))
    })?;

    let table = catalog::table_for(dataset, request.table.as_deref())?;
    let limit = resolve_limit(request.limit, DEFAULT_QUERY_LIMIT)?;
    let filter_count = request.filters.len();

    let query = build_query(
        table,
        &QueryOptions {
            filters: request.filters,
            group_by: request.group_by,
            order_by: request.order_by,
            limit,
            offset: request.offset,
        },
    )?;

    let rows = state.warehouse.fetch_rows(&query).await?;

    info!(
        dataset = dataset.id,
        table,
        key_id = %key.id,
        rows = rows.len(),
        filters = filter_count,
        "Dataset queried"
    );

    let body = Json(json!({
        "success": true,
        "dataset": dataset.id,
        "type": dataset.dataset_type,
        "tableName": table,
        "count": rows.len(),
        "data": rows,
        "query": {
            "limit": query.limit,
            "offset": query.offset,
            "filters": filter_count,
        },
    }));

    Ok(with_rate_limit(Some(&decision), body))
}
