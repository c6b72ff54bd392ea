//! API Key model for dataset API authentication.
//!
//! API keys are opaque bearer tokens owned by a user. They are stored in the database
//! as SHA-256 hashes; the plaintext is only ever returned once, when the key is created.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Represents an API key record from the database.
///
/// # Database Table
///
/// Maps to the `api_keys` table with columns:
/// - `id`: Unique identifier (UUID)
/// - `user_id`: Owner of the key
/// - `name`: Human-readable label chosen by the owner
/// - `key_hash`: SHA-256 hash of the actual API key (not selected back out)
/// - `key_hint`: Prefix and last four characters, safe to display
/// - `created_at`, `last_used_at`: Lifecycle timestamps
/// - `is_active`: Soft-delete flag
/// - `usage_count`: Number of successful validations
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiKey {
    /// Unique identifier for this API key
    pub id: Uuid,

    /// User that owns this key
    pub user_id: Uuid,

    /// Label shown in the key management UI
    pub name: String,

    /// Display form of the key, e.g. `dsk_3f9a…b21c`
    pub key_hint: String,

    /// Timestamp when this API key was created
    pub created_at: DateTime<Utc>,

    /// Last successful validation, if any
    pub last_used_at: Option<DateTime<Utc>>,

    /// Whether this API key is currently active
    ///
    /// Revoked keys are never deleted, only deactivated.
    pub is_active: bool,

    /// Successful validations so far. Never decreases.
    pub usage_count: i64,
}

/// Values needed to insert a freshly generated key.
#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub user_id: Uuid,
    pub name: String,
    pub key_hash: String,
    pub key_hint: String,
}

/// Request body for creating a new API key.
///
/// # JSON Example
///
/// ```json
/// {
///   "name": "Analytics notebook"
/// }
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct CreateApiKeyRequest {
    /// Optional label, defaults to "Default API Key"
    #[serde(default)]
    pub name: Option<String>,
}

/// API key as returned to clients.
///
/// `key` is only populated in the response to `POST /api/keys`.
///
/// # JSON Example
///
/// ```json
/// {
///   "id": "550e8400-e29b-41d4-a716-446655440000",
///   "name": "Analytics notebook",
///   "keyHint": "dsk_3f9a...b21c",
///   "userId": "7d444840-9dc0-11d1-b245-5ffdce74fad2",
///   "createdAt": "2025-12-20T10:00:00Z",
///   "lastUsed": null,
///   "isActive": true,
///   "usageCount": 0
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyData {
    pub id: Uuid,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    pub key_hint: String,

    pub user_id: Uuid,

    pub created_at: DateTime<Utc>,

    pub last_used: Option<DateTime<Utc>>,

    pub is_active: bool,

    pub usage_count: i64,
}

impl From<ApiKey> for ApiKeyData {
    fn from(record: ApiKey) -> Self {
        Self {
            id: record.id,
            name: record.name,
            key: None, // Never include the plaintext by default
            key_hint: record.key_hint,
            user_id: record.user_id,
            created_at: record.created_at,
            last_used: record.last_used_at,
            is_active: record.is_active,
            usage_count: record.usage_count,
        }
    }
}

impl ApiKeyData {
    /// Attach the plaintext key (only for creation responses).
    pub fn with_key(mut self, key: String) -> Self {
        self.key = Some(key);
        self
    }
}
