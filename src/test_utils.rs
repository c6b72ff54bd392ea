//! Shared fixtures for unit and router tests: configuration, in-memory stores
//! and helpers to drive the router without a socket.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    extract::ConnectInfo,
    http::{HeaderMap, Request, StatusCode},
};
use chrono::Utc;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use crate::{
    build_router,
    config::Config,
    error::AppError,
    models::{
        api_key::{ApiKey, NewApiKey},
        dataset::{ColumnInfo, Row, TableStats},
    },
    services::{
        api_key_service::{ApiKeyStore, create_api_key},
        query_builder::BuiltQuery,
        session::issue_session_token,
        warehouse::Warehouse,
    },
    state::AppState,
};

pub const TEST_SECRET: &str = "test-secret";

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://localhost/service_test".to_string(),
        warehouse_url: "postgres://localhost/warehouse_test".to_string(),
        jwt_secret: TEST_SECRET.to_string(),
        server_port: 3000,
        site_url: Some("https://sqlpractice.example".to_string()),
        trusted_proxies: Vec::new(),
        download_burst_limit: 3,
        download_hourly_limit: 10,
        api_general_limit: 1000,
        api_query_limit: 500,
        warehouse_timeout_secs: 30,
        warehouse_max_connections: 10,
    }
}

/// Key store that mirrors the `api_keys` table semantics in memory.
#[derive(Default)]
pub struct InMemoryApiKeyStore {
    keys: Mutex<Vec<(String, ApiKey)>>,
}

#[async_trait]
impl ApiKeyStore for InMemoryApiKeyStore {
    async fn insert(&self, new_key: NewApiKey) -> Result<ApiKey, AppError> {
        let record = ApiKey {
            id: Uuid::new_v4(),
            user_id: new_key.user_id,
            name: new_key.name,
            key_hint: new_key.key_hint,
            created_at: Utc::now(),
            last_used_at: None,
            is_active: true,
            usage_count: 0,
        };
        self.keys
            .lock()
            .unwrap()
            .push((new_key.key_hash, record.clone()));
        Ok(record)
    }

    async fn record_use(&self, key_hash: &str) -> Result<Option<ApiKey>, AppError> {
        let mut keys = self.keys.lock().unwrap();
        Ok(keys
            .iter_mut()
            .find(|(hash, key)| hash == key_hash && key.is_active)
            .map(|(_, key)| {
                key.usage_count += 1;
                key.last_used_at = Some(Utc::now());
                key.clone()
            }))
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>, AppError> {
        let keys = self.keys.lock().unwrap();
        Ok(keys
            .iter()
            .rev()
            .filter(|(_, key)| key.user_id == user_id)
            .map(|(_, key)| key.clone())
            .collect())
    }

    async fn deactivate(&self, key_id: Uuid, user_id: Uuid) -> Result<bool, AppError> {
        let mut keys = self.keys.lock().unwrap();
        match keys
            .iter_mut()
            .find(|(_, key)| key.id == key_id && key.user_id == user_id && key.is_active)
        {
            Some((_, key)) => {
                key.is_active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Warehouse serving fixed rows per table and recording every executed query.
///
/// Filters, grouping and ordering are not evaluated; `limit` is.
#[derive(Default)]
pub struct FakeWarehouse {
    tables: HashMap<String, Vec<Row>>,
    executed: Mutex<Vec<BuiltQuery>>,
    failing: bool,
}

impl FakeWarehouse {
    pub fn with_table(mut self, table: &str, rows: Vec<Row>) -> Self {
        self.tables.insert(table.to_string(), rows);
        self
    }

    /// A warehouse whose every call fails like an unreachable server.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn executed(&self) -> Vec<BuiltQuery> {
        self.executed.lock().unwrap().clone()
    }

    fn check_available(&self) -> Result<(), AppError> {
        if self.failing {
            Err(AppError::Database(sqlx::Error::PoolTimedOut))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Warehouse for FakeWarehouse {
    async fn fetch_rows(&self, query: &BuiltQuery) -> Result<Vec<Row>, AppError> {
        self.check_available()?;
        self.executed.lock().unwrap().push(query.clone());

        Ok(self
            .tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .skip(query.offset as usize)
                    .take(query.limit as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn table_stats(&self, table: &str) -> Result<TableStats, AppError> {
        self.check_available()?;

        let rows = self.tables.get(table).map(Vec::as_slice).unwrap_or_default();
        let columns = rows
            .first()
            .map(|row| {
                row.iter()
                    .map(|(name, value)| ColumnInfo {
                        name: name.clone(),
                        data_type: match value {
                            Value::Number(n) if n.is_i64() => "integer",
                            Value::Number(_) => "numeric",
                            Value::Bool(_) => "boolean",
                            _ => "text",
                        }
                        .to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(TableStats::new(table, rows.len() as i64, columns))
    }

    async fn ping(&self) -> Result<(), AppError> {
        self.check_available()
    }
}

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

pub fn customer_rows() -> Vec<Row> {
    vec![
        row(json!({"id": 1, "name": "Ada", "city": "New York"})),
        row(json!({"id": 2, "name": "Grace", "city": "New York"})),
        row(json!({"id": 3, "name": "Linus", "city": "Helsinki"})),
        row(json!({"id": 4, "name": "Barbara", "city": "Boston"})),
        row(json!({"id": 5, "name": "Ken", "city": "New York"})),
        row(json!({"id": 6, "name": "Margaret, H.", "city": "Boston"})),
        row(json!({"id": 7, "name": "Dennis", "city": null})),
    ]
}

pub fn order_rows() -> Vec<Row> {
    vec![
        row(json!({"order_id": 10, "customer_id": 1, "total": 19.99})),
        row(json!({"order_id": 11, "customer_id": 2, "total": 5})),
    ]
}

/// Router over in-memory stores, with handles to inspect them.
pub struct TestApp {
    pub router: Router,
    pub api_keys: Arc<InMemoryApiKeyStore>,
    pub warehouse: Arc<FakeWarehouse>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_warehouse(
            FakeWarehouse::default()
                .with_table("ecom_customers", customer_rows())
                .with_table("ecom_orders", order_rows()),
        )
        .await
    }

    pub async fn with_warehouse(warehouse: FakeWarehouse) -> Self {
        Self::build(test_config(), warehouse)
    }

    /// Default tables with a custom configuration.
    pub async fn with_config(config: Config) -> Self {
        Self::build(
            config,
            FakeWarehouse::default()
                .with_table("ecom_customers", customer_rows())
                .with_table("ecom_orders", order_rows()),
        )
    }

    fn build(config: Config, warehouse: FakeWarehouse) -> Self {
        let api_keys = Arc::new(InMemoryApiKeyStore::default());
        let warehouse = Arc::new(warehouse);
        let state = AppState::new(config, api_keys.clone(), warehouse.clone());

        Self {
            router: build_router(state),
            api_keys,
            warehouse,
        }
    }

    /// Create a key for a fresh user and return its plaintext.
    pub async fn issue_key(&self) -> String {
        create_api_key(self.api_keys.as_ref(), Uuid::new_v4(), None)
            .await
            .unwrap()
            .key
            .unwrap()
    }

    pub fn session_token(&self, user_id: Uuid) -> String {
        issue_session_token(user_id, None, TEST_SECRET, chrono::Duration::hours(1)).unwrap()
    }

    /// GET request that arrived over a socket from `ip`.
    pub fn from_ip(&self, uri: &str, ip: &str) -> Request<Body> {
        let mut request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let addr: SocketAddr = format!("{ip}:51000").parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }
}

pub async fn send_raw(router: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let (status, headers, body) = send_raw(router, request).await;
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, headers, json)
}
