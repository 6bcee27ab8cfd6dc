//! Offline-first asset cache engine for a multilingual museum audio guide.
//!
//! Visitors walk a gallery with spotty WiFi; the guide's audio, images,
//! and room data must keep working regardless. This crate implements the
//! caching core behind that experience:
//!
//! - [`store`]: four on-disk cache partitions keyed by exact URL, plus the
//!   durable record of which locales are fully cached
//! - [`manifest`]: deterministic enumeration of every asset a locale needs
//! - [`scheduler`]: position-biased download ordering - current room
//!   first, narration before images - with an awaited high-priority batch
//!   and a deferred background tail
//! - [`gateway`]: the request interceptor that serves cache-first with
//!   per-class fallback chains, down to a silence track, a placeholder
//!   image, or a generated offline page
//! - [`worker`]: the JSON message protocol clients drive all of this with

pub mod config;
pub mod fetch;
pub mod gateway;
pub mod manifest;
pub mod models;
pub mod rooms;
pub mod scheduler;
pub mod store;
pub mod worker;
