//! HTTP middleware components.
//!
//! Middleware and extractors that run before route handlers:
//! - Identify the caller (API key, client IP, same-origin requests)
//! - Authenticate key management requests with a session token
//! - Short-circuit requests (reject unauthorized)

/// Caller identification and session authentication
pub mod auth;
