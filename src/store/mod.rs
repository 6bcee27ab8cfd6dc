//! On-disk cache storage.
//!
//! This module provides the four named cache partitions (assets, data,
//! static, pages) keyed by exact request URL, and the `MetadataStore`
//! that durably tracks which locales are fully cached across worker
//! restarts.

pub mod metadata;
pub mod partition;

pub use metadata::MetadataStore;
pub use partition::{CachePartition, CachedBody, PartitionCounts, PartitionKind, Partitions};
