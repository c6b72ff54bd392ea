//! Data models representing database entities and API payloads.

/// API key authentication model
pub mod api_key;
/// Dataset catalog and metadata types
pub mod dataset;
/// Query and download request types
pub mod query;
