//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment variables into a type-safe struct.

use serde::Deserialize;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string for the service database (API keys)
/// - `WAREHOUSE_URL` (required): PostgreSQL connection string for the dataset warehouse
/// - `JWT_SECRET` (required): HMAC secret used to sign and verify session tokens
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `SITE_URL` (optional): public origin of the website, used to recognise internal requests
/// - `TRUSTED_PROXIES` (optional): comma-separated peer IPs whose forwarding headers are honored (`*` for any)
/// - `DOWNLOAD_BURST_LIMIT`, `DOWNLOAD_HOURLY_LIMIT`, `API_GENERAL_LIMIT`, `API_QUERY_LIMIT` (optional):
///   request budgets for each rate-limit tier
/// - `WAREHOUSE_TIMEOUT_SECS` (optional): connect and statement timeout, defaults to 30
/// - `WAREHOUSE_MAX_CONNECTIONS` (optional): warehouse pool size, defaults to 10
///
/// There are deliberately no defaults for connection strings or secrets.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    pub warehouse_url: String,

    pub jwt_secret: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default)]
    pub site_url: Option<String>,

    #[serde(default)]
    pub trusted_proxies: Vec<String>,

    #[serde(default = "default_download_burst_limit")]
    pub download_burst_limit: u32,

    #[serde(default = "default_download_hourly_limit")]
    pub download_hourly_limit: u32,

    #[serde(default = "default_api_general_limit")]
    pub api_general_limit: u32,

    #[serde(default = "default_api_query_limit")]
    pub api_query_limit: u32,

    #[serde(default = "default_warehouse_timeout_secs")]
    pub warehouse_timeout_secs: u64,

    #[serde(default = "default_warehouse_max_connections")]
    pub warehouse_max_connections: u32,
}

/// Default port if SERVER_PORT environment variable is not set.
fn default_port() -> u16 {
    3000
}

fn default_download_burst_limit() -> u32 {
    3
}

fn default_download_hourly_limit() -> u32 {
    10
}

fn default_api_general_limit() -> u32 {
    1000
}

fn default_api_query_limit() -> u32 {
    500
}

fn default_warehouse_timeout_secs() -> u64 {
    30
}

fn default_warehouse_max_connections() -> u32 {
    10
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing (e.g., DATABASE_URL, WAREHOUSE_URL)
    /// - Environment variable values cannot be parsed into expected types
    pub fn from_env() -> Result<Self, envy::Error> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        // Field names are automatically converted: warehouse_url -> WAREHOUSE_URL
        envy::from_env::<Config>()
    }

    /// Whether a peer address may set the client IP through forwarding headers.
    pub fn is_trusted_proxy(&self, peer_ip: &str) -> bool {
        self.trusted_proxies
            .iter()
            .any(|proxy| proxy == "*" || proxy == peer_ip)
    }
}
