//! Request interceptor for the guide's content traffic.
//!
//! Every outgoing request the client would make is classified into exactly
//! one class - asset, static framework file, navigable page, or other -
//! and dispatched to that class's handler. Each handler is an explicit
//! fallback ladder; responses carry the tier that resolved them so the
//! ladders can be tested independently.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::fetch::{content_type_for_path, NetClient};
use crate::models::{Locale, Position};
use crate::scheduler::Scheduler;
use crate::store::{CachedBody, MetadataStore, Partitions};

// ============================================================================
// Constants
// ============================================================================

/// Timeout for page-class network fetches. Pages are cache-first for
/// perceived speed, so a slow network must not stall navigation either.
const PAGE_FETCH_TIMEOUT_SECS: u64 = 3;

/// Silence track served for unmatched audio requests while offline.
const SILENCE_AUDIO_PATH: &str = "/audio/silence.mp3";

/// Placeholder image served for unmatched image requests while offline.
const FALLBACK_IMAGE_PATH: &str = "/images/fallback.png";

/// Which class a request resolves into. Every request gets exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Content media and data under /audio/, /images/, /data/
    Asset,
    /// Immutable build output under /static/
    Static,
    /// Extension-less navigation paths
    Page,
    /// Everything else (API calls, unknown files)
    Other,
}

/// Classify a request path.
///
/// Asset and static prefixes win first; `/api/` is explicitly other;
/// remaining extension-less paths are navigations.
pub fn classify(path: &str) -> RequestClass {
    let path = path.split(['?', '#']).next().unwrap_or(path);

    if path.starts_with("/audio/") || path.starts_with("/images/") || path.starts_with("/data/") {
        return RequestClass::Asset;
    }
    if path.starts_with("/static/") {
        return RequestClass::Static;
    }
    if path.starts_with("/api/") {
        return RequestClass::Other;
    }

    let last_segment = path.rsplit('/').next().unwrap_or("");
    if last_segment.contains('.') {
        RequestClass::Other
    } else {
        RequestClass::Page
    }
}

/// Which tier of a handler's ladder produced the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    CacheHit,
    Network,
    Fallback,
    Generated,
}

#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
    pub source: ResponseSource,
}

impl GatewayResponse {
    fn from_cached(body: CachedBody, source: ResponseSource) -> Self {
        Self {
            status: 200,
            content_type: body.content_type,
            body: body.bytes,
            source,
        }
    }

    fn generated(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: content_type.to_string(),
            body: body.into(),
            source: ResponseSource::Generated,
        }
    }
}

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Terminal failure of the asset class: offline, no exact match, and
    /// no cached fallback. The only path allowed to fail a request.
    #[error("Asset unavailable: {0}")]
    AssetUnavailable(String),
}

/// The request interceptor.
///
/// Cheap to clone: all state is shared behind `Arc`.
#[derive(Clone)]
pub struct Gateway {
    base_url: String,
    client: NetClient,
    partitions: Arc<Partitions>,
    metadata: Arc<MetadataStore>,
    scheduler: Scheduler,
    position: Arc<Mutex<Option<Position>>>,
    online: bool,
}

impl Gateway {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        base_url: String,
        client: NetClient,
        partitions: Arc<Partitions>,
        metadata: Arc<MetadataStore>,
        scheduler: Scheduler,
        position: Arc<Mutex<Option<Position>>>,
        online: bool,
    ) -> Self {
        Self {
            base_url,
            client,
            partitions,
            metadata,
            scheduler,
            position,
            online,
        }
    }

    fn absolute(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn current_position(&self) -> Option<Position> {
        self.position
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolve one intercepted request.
    pub async fn handle(&self, path: &str) -> Result<GatewayResponse, GatewayError> {
        match classify(path) {
            RequestClass::Asset => self.handle_asset(path).await,
            RequestClass::Static => Ok(self.handle_static(path).await),
            RequestClass::Page => Ok(self.handle_page(path).await),
            RequestClass::Other => Ok(self.handle_other(path).await),
        }
    }

    // ===== Asset class =====
    //
    // assets exact -> data exact -> network (store by content type) ->
    // cached silence/placeholder -> hard failure.

    async fn handle_asset(&self, path: &str) -> Result<GatewayResponse, GatewayError> {
        let url = self.absolute(path);

        if let Ok(Some(body)) = self.partitions.assets.lookup(&url) {
            return Ok(GatewayResponse::from_cached(body, ResponseSource::CacheHit));
        }
        if let Ok(Some(body)) = self.partitions.data.lookup(&url) {
            return Ok(GatewayResponse::from_cached(body, ResponseSource::CacheHit));
        }

        if self.online {
            match self.client.get_bytes(&url).await {
                Ok(fetched) => {
                    // JSON content belongs to the data partition, media to
                    // assets, so later exact-match lookups find it where
                    // the rest of the engine expects it
                    let partition = if fetched.is_json() {
                        &self.partitions.data
                    } else {
                        &self.partitions.assets
                    };
                    if let Err(e) = partition.store(&url, &fetched.content_type, &fetched.bytes) {
                        warn!(url = %url, error = %e, "Failed to write asset through to cache");
                    }
                    return Ok(GatewayResponse {
                        status: 200,
                        content_type: fetched.content_type,
                        body: fetched.bytes,
                        source: ResponseSource::Network,
                    });
                }
                Err(e) => debug!(url = %url, error = %e, "Asset fetch failed, trying fallback"),
            }
        }

        let content_type = content_type_for_path(path);
        let fallback_path = if content_type.starts_with("audio/") {
            Some(SILENCE_AUDIO_PATH)
        } else if content_type.starts_with("image/") {
            Some(FALLBACK_IMAGE_PATH)
        } else {
            None
        };

        if let Some(fallback_path) = fallback_path {
            if let Ok(Some(body)) = self.partitions.assets.lookup(&self.absolute(fallback_path)) {
                return Ok(GatewayResponse::from_cached(body, ResponseSource::Fallback));
            }
        }

        Err(GatewayError::AssetUnavailable(url))
    }

    // ===== Static framework asset class =====
    //
    // Cache-first always; build output is immutable, so a hit never
    // revalidates. Offline misses get an empty well-typed placeholder for
    // script/style types so page evaluation keeps working.

    async fn handle_static(&self, path: &str) -> GatewayResponse {
        let url = self.absolute(path);

        if let Ok(Some(body)) = self.partitions.statics.lookup(&url) {
            return GatewayResponse::from_cached(body, ResponseSource::CacheHit);
        }

        if self.online {
            match self.client.get_bytes(&url).await {
                Ok(fetched) => {
                    if let Err(e) =
                        self.partitions.statics.store(&url, &fetched.content_type, &fetched.bytes)
                    {
                        warn!(url = %url, error = %e, "Failed to write static file through to cache");
                    }
                    return GatewayResponse {
                        status: 200,
                        content_type: fetched.content_type,
                        body: fetched.bytes,
                        source: ResponseSource::Network,
                    };
                }
                Err(e) => debug!(url = %url, error = %e, "Static fetch failed"),
            }
        }

        let content_type = content_type_for_path(path);
        match content_type {
            "application/javascript" | "text/css" => {
                GatewayResponse::generated(200, content_type, Vec::new())
            }
            _ => GatewayResponse::generated(404, "text/plain", "Not found"),
        }
    }

    // ===== Navigable page class =====
    //
    // Exact-URL cache-first even online for instant perceived navigation;
    // network fetches are bounded by a short timeout; offline misses walk
    // the locale fallback chain down to a generated notice page.

    async fn handle_page(&self, path: &str) -> GatewayResponse {
        let url = self.absolute(path);
        let path_locale = locale_from_path(path);

        // A locale change in the URL is the implicit trigger connecting
        // navigation to the scheduler; the run is spawned, never awaited
        if let Some(ref locale) = path_locale {
            let current = self.current_position();
            let changed = current.as_ref().map(|p| &p.locale != locale).unwrap_or(true);
            if changed && !self.metadata.is_fully_cached(locale) {
                debug!(locale = %locale, "Locale change detected, scheduling in background");
                let scheduler = self.scheduler.clone();
                let locale = locale.clone();
                let online = self.online;
                tokio::spawn(async move {
                    scheduler.schedule(&locale, current.as_ref(), online, None).await;
                });
            }
        }

        if let Ok(Some(body)) = self.partitions.pages.lookup(&url) {
            return GatewayResponse::from_cached(body, ResponseSource::CacheHit);
        }

        if self.online {
            let fetch = self.client.get_bytes(&url);
            match tokio::time::timeout(Duration::from_secs(PAGE_FETCH_TIMEOUT_SECS), fetch).await {
                Ok(Ok(fetched)) => {
                    if let Err(e) =
                        self.partitions.pages.store(&url, &fetched.content_type, &fetched.bytes)
                    {
                        warn!(url = %url, error = %e, "Failed to write page through to cache");
                    }
                    return GatewayResponse {
                        status: 200,
                        content_type: fetched.content_type,
                        body: fetched.bytes,
                        source: ResponseSource::Network,
                    };
                }
                Ok(Err(e)) => debug!(url = %url, error = %e, "Page fetch failed, walking fallbacks"),
                Err(_) => debug!(url = %url, "Page fetch timed out, walking fallbacks"),
            }
        }

        let locale = path_locale.unwrap_or_else(Locale::default_locale);
        let candidates = [
            format!("/{}/rooms/1", locale),
            format!("/{}", locale),
            format!("/{}", Locale::default_locale()),
        ];
        for candidate in &candidates {
            if let Ok(Some(body)) = self.partitions.pages.lookup(&self.absolute(candidate)) {
                return GatewayResponse::from_cached(body, ResponseSource::Fallback);
            }
        }

        GatewayResponse::generated(200, "text/html", offline_page(&locale))
    }

    // ===== Other/default class =====
    //
    // Network-first, opportunistic cache match on failure, generic
    // failure response last. No write-through.

    async fn handle_other(&self, path: &str) -> GatewayResponse {
        let url = self.absolute(path);

        if self.online {
            match self.client.get_bytes(&url).await {
                Ok(fetched) => {
                    return GatewayResponse {
                        status: 200,
                        content_type: fetched.content_type,
                        body: fetched.bytes,
                        source: ResponseSource::Network,
                    };
                }
                Err(e) => debug!(url = %url, error = %e, "Request failed, trying caches"),
            }
        }

        let partitions = [
            &self.partitions.pages,
            &self.partitions.assets,
            &self.partitions.data,
            &self.partitions.statics,
        ];
        for partition in partitions {
            if let Ok(Some(body)) = partition.lookup(&url) {
                return GatewayResponse::from_cached(body, ResponseSource::CacheHit);
            }
        }

        GatewayResponse::generated(502, "text/plain", "Request failed and no cached copy exists")
    }
}

/// Locale from the first path segment, if it names a supported locale.
fn locale_from_path(path: &str) -> Option<Locale> {
    let first = path.trim_start_matches('/').split('/').next()?;
    Locale::parse(first).ok()
}

/// Minimal notice page served when navigation cannot be satisfied at all.
fn offline_page(locale: &Locale) -> String {
    format!(
        "<!doctype html><html lang=\"{}\"><head><meta charset=\"utf-8\">\
         <title>Offline</title></head><body>\
         <h1>You are offline</h1>\
         <p>This page is not available offline yet. Reconnect to download the guide.</p>\
         </body></html>",
        locale
    )
}

// ============================================================================
// Tests
// ============================================================================
