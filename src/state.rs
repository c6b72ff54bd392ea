use std::sync::Arc;

use crate::{
    config::Config,
    services::{api_key_service::ApiKeyStore, rate_limiter::RateLimiters, warehouse::Warehouse},
};

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// API key persistence (service database in production).
    pub api_keys: Arc<dyn ApiKeyStore>,
    /// External dataset warehouse.
    pub warehouse: Arc<dyn Warehouse>,
    /// In-memory counters; process-local.
    pub limiters: RateLimiters,
}

impl AppState {
    pub fn new(
        config: Config,
        api_keys: Arc<dyn ApiKeyStore>,
        warehouse: Arc<dyn Warehouse>,
    ) -> Self {
        let limiters = RateLimiters::from_config(&config);
        Self {
            config: Arc::new(config),
            api_keys,
            warehouse,
            limiters,
        }
    }
}
