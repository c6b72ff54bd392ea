//! Business logic services.
//!
//! Services contain the logic behind the HTTP handlers: key lifecycle, rate limiting,
//! the dataset catalog, query construction, warehouse access and export rendering.

pub mod api_key_service;
pub mod catalog;
pub mod export;
pub mod query_builder;
pub mod rate_limiter;
pub mod session;
pub mod warehouse;
