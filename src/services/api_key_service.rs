//! API key issuance, validation and revocation.
//!
//! Keys look like `dsk_<64 hex chars>`. Only the SHA-256 digest is stored, so a
//! database leak does not leak usable keys. Validation and usage accounting happen
//! in one `UPDATE … RETURNING` statement, which keeps `usage_count` exact under
//! concurrent requests.

use async_trait::async_trait;
use axum::http::{HeaderMap, header::AUTHORIZATION};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::api_key::{ApiKey, ApiKeyData, NewApiKey},
};

/// Every issued key starts with this prefix.
pub const API_KEY_PREFIX: &str = "dsk_";

/// Random bytes per key (hex-encoded to 64 characters).
const API_KEY_BYTES: usize = 32;

const DEFAULT_KEY_NAME: &str = "Default API Key";
const MAX_KEY_NAME_LEN: usize = 100;

/// Persistence for API keys.
///
/// Implemented by [`PgApiKeyStore`]; tests use an in-memory implementation.
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    /// Insert a new active key with zero usage.
    async fn insert(&self, new_key: NewApiKey) -> Result<ApiKey, AppError>;

    /// Atomically bump usage of the active key with this hash and return it.
    async fn record_use(&self, key_hash: &str) -> Result<Option<ApiKey>, AppError>;

    /// All keys owned by a user, newest first.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>, AppError>;

    /// Deactivate a key if it is active and owned by `user_id`.
    async fn deactivate(&self, key_id: Uuid, user_id: Uuid) -> Result<bool, AppError>;

    /// Connectivity check for `/health`.
    async fn ping(&self) -> Result<(), AppError>;
}

/// `api_keys` table in the service database.
#[derive(Clone)]
pub struct PgApiKeyStore {
    pool: DbPool,
}

impl PgApiKeyStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApiKeyStore for PgApiKeyStore {
    async fn insert(&self, new_key: NewApiKey) -> Result<ApiKey, AppError> {
        let record = sqlx::query_as::<_, ApiKey>(
            r#"
            INSERT INTO api_keys (user_id, name, key_hash, key_hint)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, name, key_hint, created_at, last_used_at, is_active, usage_count
            "#,
        )
        .bind(new_key.user_id)
        .bind(&new_key.name)
        .bind(&new_key.key_hash)
        .bind(&new_key.key_hint)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn record_use(&self, key_hash: &str) -> Result<Option<ApiKey>, AppError> {
        let record = sqlx::query_as::<_, ApiKey>(
            r#"
            UPDATE api_keys
            SET usage_count = usage_count + 1,
                last_used_at = NOW()
            WHERE key_hash = $1 AND is_active = true
            RETURNING id, user_id, name, key_hint, created_at, last_used_at, is_active, usage_count
            "#,
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>, AppError> {
        let records = sqlx::query_as::<_, ApiKey>(
            r#"
            SELECT id, user_id, name, key_hint, created_at, last_used_at, is_active, usage_count
            FROM api_keys
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn deactivate(&self, key_id: Uuid, user_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE api_keys SET is_active = false WHERE id = $1 AND user_id = $2 AND is_active = true",
        )
        .bind(key_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Find an API key in the request.
///
/// Checked in order, first match wins:
/// 1. `Authorization: Bearer <key>`
/// 2. `X-API-Key: <key>`
/// 3. `?api_key=<key>`
pub fn extract_api_key(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    let from_bearer = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|k| !k.is_empty());
    if let Some(key) = from_bearer {
        return Some(key.to_string());
    }

    let from_header = headers
        .get("x-api-key")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty());
    if let Some(key) = from_header {
        return Some(key.to_string());
    }

    query.and_then(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .find(|(name, value)| name == "api_key" && !value.trim().is_empty())
            .map(|(_, value)| value.trim().to_string())
    })
}

/// Whether `key` has the shape of an issued key.
pub fn is_well_formed(key: &str) -> bool {
    key.strip_prefix(API_KEY_PREFIX).is_some_and(|random| {
        random.len() == API_KEY_BYTES * 2 && random.chars().all(|c| c.is_ascii_hexdigit())
    })
}

/// SHA-256 hex digest stored in place of the key.
pub fn hash_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate fresh key material.
pub fn generate_api_key() -> String {
    let bytes: [u8; API_KEY_BYTES] = rand::random();
    format!("{API_KEY_PREFIX}{}", hex::encode(bytes))
}

fn key_hint(key: &str) -> String {
    let tail = &key[key.len().saturating_sub(4)..];
    let head = &key[..key.len().min(API_KEY_PREFIX.len() + 4)];
    format!("{head}...{tail}")
}

/// Validate a presented key and count the use.
///
/// Malformed, unknown and revoked keys all yield `Ok(None)`; callers decide
/// how to report that. Storage failures are returned as errors.
pub async fn validate_api_key(
    store: &dyn ApiKeyStore,
    key: &str,
) -> Result<Option<ApiKeyData>, AppError> {
    if !is_well_formed(key) {
        tracing::debug!("Rejected malformed API key");
        return Ok(None);
    }

    let record = store.record_use(&hash_api_key(key)).await?;
    match &record {
        Some(record) => tracing::debug!(key_id = %record.id, usage_count = record.usage_count, "API key validated"),
        None => tracing::debug!("Unknown or revoked API key"),
    }

    Ok(record.map(ApiKeyData::from))
}

/// Issue a new key for `user_id`.
///
/// The returned data is the only place the plaintext key ever appears.
pub async fn create_api_key(
    store: &dyn ApiKeyStore,
    user_id: Uuid,
    name: Option<String>,
) -> Result<ApiKeyData, AppError> {
    let name = name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| DEFAULT_KEY_NAME.to_string());

    if name.chars().count() > MAX_KEY_NAME_LEN {
        return Err(AppError::Validation(format!(
            "API key name must be at most {MAX_KEY_NAME_LEN} characters"
        )));
    }

    let key = generate_api_key();
    let record = store
        .insert(NewApiKey {
            user_id,
            name,
            key_hash: hash_api_key(&key),
            key_hint: key_hint(&key),
        })
        .await?;

    tracing::info!(key_id = %record.id, user_id = %user_id, "API key created");

    Ok(ApiKeyData::from(record).with_key(key))
}

/// Revoke a key owned by `user_id`.
///
/// Returns `false` without error when the key does not exist, belongs to someone
/// else, or is already revoked.
pub async fn revoke_api_key(
    store: &dyn ApiKeyStore,
    key_id: Uuid,
    user_id: Uuid,
) -> Result<bool, AppError> {
    let revoked = store.deactivate(key_id, user_id).await?;
    if revoked {
        tracing::info!(key_id = %key_id, user_id = %user_id, "API key revoked");
    }
    Ok(revoked)
}

/// Keys owned by `user_id`, without plaintext.
pub async fn list_api_keys(
    store: &dyn ApiKeyStore,
    user_id: Uuid,
) -> Result<Vec<ApiKeyData>, AppError> {
    let records = store.list_for_user(user_id).await?;
    Ok(records.into_iter().map(ApiKeyData::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::InMemoryApiKeyStore;
    use axum::http::HeaderValue;

    #[test]
    fn test_generated_keys_are_well_formed_and_unique() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert!(a.starts_with(API_KEY_PREFIX));
        assert_eq!(a.len(), API_KEY_PREFIX.len() + 64);
        assert!(is_well_formed(&a));
        assert_ne!(a, b);
        assert_ne!(hash_api_key(&a), hash_api_key(&b));
    }

    #[test]
    fn test_malformed_keys() {
        assert!(!is_well_formed("sk_live_123"));
        assert!(!is_well_formed("dsk_short"));
        assert!(!is_well_formed(&format!("dsk_{}", "z".repeat(64))));
    }

    #[test]
    fn test_extraction_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("from-header"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-bearer"));

        assert_eq!(
            extract_api_key(&headers, Some("api_key=from-query")).as_deref(),
            Some("from-bearer")
        );

        headers.remove(AUTHORIZATION);
        assert_eq!(
            extract_api_key(&headers, Some("api_key=from-query")).as_deref(),
            Some("from-header")
        );

        headers.remove("x-api-key");
        assert_eq!(
            extract_api_key(&headers, Some("format=csv&api_key=from-query")).as_deref(),
            Some("from-query")
        );
        assert_eq!(extract_api_key(&headers, Some("format=csv")), None);
        assert_eq!(extract_api_key(&headers, None), None);
    }

    #[test]
    fn test_non_bearer_authorization_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(extract_api_key(&headers, None), None);
    }

    #[tokio::test]
    async fn test_key_lifecycle() {
        let store = InMemoryApiKeyStore::default();
        let user = Uuid::new_v4();

        let created = create_api_key(&store, user, Some("  notebook ".to_string()))
            .await
            .unwrap();
        let key = created.key.clone().unwrap();
        assert_eq!(created.name, "notebook");
        assert_eq!(created.usage_count, 0);
        assert!(created.key_hint.starts_with("dsk_"));
        assert!(!created.key_hint.contains(&key[8..60]));

        for expected in 1..=3 {
            let validated = validate_api_key(&store, &key).await.unwrap().unwrap();
            assert_eq!(validated.usage_count, expected);
            assert!(validated.last_used.is_some());
            assert!(validated.key.is_none());
        }

        assert!(revoke_api_key(&store, created.id, user).await.unwrap());
        assert!(validate_api_key(&store, &key).await.unwrap().is_none());
        assert!(validate_api_key(&store, &key).await.unwrap().is_none());
        assert!(!revoke_api_key(&store, created.id, user).await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_is_scoped_to_owner() {
        let store = InMemoryApiKeyStore::default();
        let owner = Uuid::new_v4();
        let intruder = Uuid::new_v4();

        let created = create_api_key(&store, owner, None).await.unwrap();
        assert_eq!(created.name, "Default API Key");

        assert!(!revoke_api_key(&store, created.id, intruder).await.unwrap());
        let key = created.key.unwrap();
        assert!(validate_api_key(&store, &key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unknown_key_is_none() {
        let store = InMemoryApiKeyStore::default();
        assert!(validate_api_key(&store, &generate_api_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_long_names_are_rejected() {
        let store = InMemoryApiKeyStore::default();
        let result = create_api_key(&store, Uuid::new_v4(), Some("x".repeat(101))).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_list_hides_plaintext() {
        let store = InMemoryApiKeyStore::default();
        let user = Uuid::new_v4();
        create_api_key(&store, user, Some("one".to_string())).await.unwrap();
        create_api_key(&store, user, Some("two".to_string())).await.unwrap();
        create_api_key(&store, Uuid::new_v4(), None).await.unwrap();

        let keys = list_api_keys(&store, user).await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().all(|k| k.key.is_none()));
    }
}
