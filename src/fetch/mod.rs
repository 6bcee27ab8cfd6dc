//! Network access for the cache engine.
//!
//! Provides `NetClient` for fetching assets and room data over HTTP,
//! and the `FetchError` taxonomy the gateway's fallback tiers key off.

pub mod client;
pub mod error;

pub use client::{content_type_for_path, FetchedBody, NetClient};
pub use error::FetchError;
