//! Session tokens for the key management routes.
//!
//! Sessions are HS256 JWTs signed with `JWT_SECRET`. The website issues them at
//! login; this service only needs to verify them and know the user id.

#[cfg(test)]
use chrono::{Duration, Utc};
#[cfg(test)]
use jsonwebtoken::{EncodingKey, Header, encode};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User id
    pub sub: Uuid,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    pub iat: i64,

    pub exp: i64,
}

/// Sign a session token for `user_id` valid for `ttl`.
///
/// Production tokens are issued by the website at login.
#[cfg(test)]
pub fn issue_session_token(
    user_id: Uuid,
    email: Option<String>,
    secret: &str,
    ttl: Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let claims = SessionClaims {
        sub: user_id,
        email,
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Verify signature and expiry; `None` for anything that does not check out.
pub fn verify_session_token(token: &str, secret: &str) -> Option<SessionClaims> {
    match decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    ) {
        Ok(data) => Some(data.claims),
        Err(e) => {
            tracing::debug!(error = %e, "Rejected session token");
            None
        }
    }
}
