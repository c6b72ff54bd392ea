//! Caller identification for the dataset and key management routes.
//!
//! Two mechanisms live here:
//! 1. [`RequestContext`], an extractor that gathers everything the dataset handlers
//!    need to pick a rate-limit tier: the presented API key (if any), the client IP
//!    and whether the request came from the website itself.
//! 2. [`session_middleware`], which guards key management routes with a session
//!    token and injects an [`AuthContext`].

use std::{convert::Infallible, net::SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::{
    config::Config,
    error::AppError,
    services::{api_key_service::extract_api_key, session::verify_session_token},
    state::AppState,
};

/// Name of the cookie that may carry the session token.
pub const SESSION_COOKIE: &str = "session";

/// Authentication context attached to session-authenticated requests.
///
/// Inserted into the request's extension map by [`session_middleware`] and
/// extracted by handlers with `Extension<AuthContext>`.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Signed-in user
    pub user_id: Uuid,

    pub email: Option<String>,
}

/// Who is calling a dataset endpoint.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Key found in the Authorization header, X-API-Key header or `api_key` query parameter
    pub api_key: Option<String>,

    /// Client address used as the anonymous rate-limit identity
    pub client_ip: String,

    /// Same-origin request from the website
    pub internal: bool,
}

impl FromRequestParts<AppState> for RequestContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());

        Ok(Self {
            api_key: extract_api_key(&parts.headers, parts.uri.query()),
            client_ip: client_ip(&parts.headers, peer.as_deref(), &state.config),
            internal: is_internal_request(&parts.headers, state.config.site_url.as_deref()),
        })
    }
}

/// Resolve the client IP.
///
/// Forwarding headers (`X-Forwarded-For` first hop, then `X-Real-IP`) are only
/// honored when the peer is a trusted proxy. Without a peer address the client
/// is `unknown`.
pub fn client_ip(headers: &HeaderMap, peer: Option<&str>, config: &Config) -> String {
    let Some(peer) = peer else {
        return "unknown".to_string();
    };

    if config.is_trusted_proxy(peer) {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty());
        if let Some(ip) = forwarded {
            debug!(client_ip = %ip, peer_ip = %peer, "Using X-Forwarded-For");
            return ip.to_string();
        }

        let real_ip = headers
            .get("x-real-ip")
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|ip| !ip.is_empty());
        if let Some(ip) = real_ip {
            debug!(client_ip = %ip, peer_ip = %peer, "Using X-Real-IP");
            return ip.to_string();
        }
    }

    peer.to_string()
}

/// Whether the request was made by the website's own pages.
///
/// True for `Sec-Fetch-Site: same-origin`, or when `Origin` (falling back to
/// `Referer`) has the same origin as `site_url`. These headers are
/// browser-provided and only gate read-only catalog metadata.
pub fn is_internal_request(headers: &HeaderMap, site_url: Option<&str>) -> bool {
    let same_origin_fetch = headers
        .get("sec-fetch-site")
        .and_then(|h| h.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("same-origin"));
    if same_origin_fetch {
        return true;
    }

    let Some(site) = site_url.and_then(|s| Url::parse(s).ok()) else {
        return false;
    };

    headers
        .get(header::ORIGIN)
        .or_else(|| headers.get(header::REFERER))
        .and_then(|h| h.to_str().ok())
        .and_then(|v| Url::parse(v).ok())
        .is_some_and(|caller| caller.origin() == site.origin())
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// Session authentication middleware function.
///
/// # Flow
///
/// 1. Read the token from `Authorization: Bearer <jwt>` or the `session` cookie
/// 2. Verify signature and expiry with `JWT_SECRET`
/// 3. If valid: inject `AuthContext` into the request, call next handler
/// 4. Otherwise: return 401 Unauthorized
pub async fn session_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = session_token(request.headers()).ok_or(AppError::Unauthenticated)?;

    let claims = verify_session_token(&token, &state.config.jwt_secret)
        .ok_or(AppError::Unauthenticated)?;

    request.extensions_mut().insert(AuthContext {
        user_id: claims.sub,
        email: claims.email,
    });

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_config;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_ip_ignores_forwarding_from_untrusted_peer() {
        let config = test_config();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.1.1.1"));

        assert_eq!(client_ip(&headers, Some("203.0.113.9"), &config), "203.0.113.9");
        assert_eq!(client_ip(&headers, None, &config), "unknown");
    }

    #[test]
    fn test_client_ip_uses_first_forwarded_hop_from_trusted_proxy() {
        let mut config = test_config();
        config.trusted_proxies = vec!["10.0.0.1".to_string()];

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("198.51.100.7, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, Some("10.0.0.1"), &config), "198.51.100.7");

        headers.remove("x-forwarded-for");
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.8"));
        assert_eq!(client_ip(&headers, Some("10.0.0.1"), &config), "198.51.100.8");
    }

    #[test]
    fn test_internal_request_detection() {
        let mut headers = HeaderMap::new();
        assert!(!is_internal_request(&headers, Some("https://sqlpractice.example")));

        headers.insert("sec-fetch-site", HeaderValue::from_static("same-origin"));
        assert!(is_internal_request(&headers, None));

        let mut headers = HeaderMap::new();
        headers.insert(
            header::REFERER,
            HeaderValue::from_static("https://sqlpractice.example/datasets?page=2"),
        );
        assert!(is_internal_request(&headers, Some("https://sqlpractice.example")));
        assert!(!is_internal_request(&headers, Some("https://other.example")));
        assert!(!is_internal_request(&headers, None));

        let mut headers = HeaderMap::new();
        headers.insert(
            header::ORIGIN,
            HeaderValue::from_static("https://sqlpractice.example.evil.test"),
        );
        assert!(!is_internal_request(&headers, Some("https://sqlpractice.example")));
    }

    #[test]
    fn test_session_token_sources() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; session=abc.def.ghi"));
        assert_eq!(session_token(&headers).as_deref(), Some("abc.def.ghi"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer jwt-token"));
        assert_eq!(session_token(&headers).as_deref(), Some("jwt-token"));

        assert_eq!(session_token(&HeaderMap::new()), None);
    }
}
