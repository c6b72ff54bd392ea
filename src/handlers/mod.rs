//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, caller context)
//! 2. Performs business logic (rate limiting, catalog lookup, warehouse queries)
//! 3. Returns HTTP response (JSON or file, status code, rate-limit headers)

/// API key management endpoints
pub mod api_keys;

/// Dataset list, metadata, download and query endpoints
pub mod datasets;

/// Health check endpoint
pub mod health;
