//! Room-data source for the cache engine.
//!
//! Each locale's rooms live in a single JSON file on the asset host
//! (`{base}/data/{locale}_rooms.json`). `RoomStore` resolves that file
//! network-first when online (writing through to the data partition) and
//! cache-first otherwise, and keeps the parsed result in memory for the
//! life of the process - room data is immutable within a session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::{debug, warn};

use crate::fetch::NetClient;
use crate::models::{parse_rooms, Locale, Room};
use crate::store::CachePartition;

#[derive(Error, Debug)]
pub enum RoomsError {
    /// Offline and the locale's data file has never been cached.
    /// Callers treat this as "nothing to schedule", not a crash.
    #[error("Room data for {0} is unavailable (offline and not cached)")]
    Unavailable(Locale),

    #[error("Failed to parse room data for {locale}: {source}")]
    Parse {
        locale: Locale,
        source: serde_json::Error,
    },
}

pub struct RoomStore {
    base_url: String,
    client: NetClient,
    data: Arc<CachePartition>,
    loaded: Mutex<HashMap<Locale, Arc<Vec<Room>>>>,
}

impl RoomStore {
    pub fn new(base_url: String, client: NetClient, data: Arc<CachePartition>) -> Self {
        Self {
            base_url,
            client,
            data,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// URL of the locale's data file on the asset host.
    pub fn rooms_url(&self, locale: &Locale) -> String {
        format!("{}/data/{}_rooms.json", self.base_url, locale)
    }

    /// Whether the locale's data file is present in the data partition.
    pub fn is_cached(&self, locale: &Locale) -> bool {
        self.data.contains(&self.rooms_url(locale))
    }

    /// Resolve the locale's room list.
    ///
    /// Network first when `online`, falling back to the data partition on
    /// any transport failure; cache only otherwise. A successful network
    /// fetch writes through so the file survives a restart.
    pub async fn load(&self, locale: &Locale, online: bool) -> Result<Arc<Vec<Room>>, RoomsError> {
        if let Some(rooms) = self.cached_in_memory(locale) {
            return Ok(rooms);
        }

        if online {
            let url = self.rooms_url(locale);
            match self.client.get_text(&url).await {
                Ok(text) => {
                    let rooms = parse_rooms(&text).map_err(|source| RoomsError::Parse {
                        locale: locale.clone(),
                        source,
                    })?;
                    if let Err(e) = self.data.store(&url, "application/json", text.as_bytes()) {
                        warn!(locale = %locale, error = %e, "Failed to write room data through to cache");
                    }
                    debug!(locale = %locale, rooms = rooms.len(), "Loaded room data from network");
                    return Ok(self.remember(locale, rooms));
                }
                Err(e) => {
                    warn!(locale = %locale, error = %e, "Room data fetch failed, trying cache");
                }
            }
        }

        self.load_from_cache(locale)
    }

    fn load_from_cache(&self, locale: &Locale) -> Result<Arc<Vec<Room>>, RoomsError> {
        let url = self.rooms_url(locale);
        let body = match self.data.lookup(&url) {
            Ok(Some(body)) => body,
            Ok(None) => return Err(RoomsError::Unavailable(locale.clone())),
            Err(e) => {
                warn!(locale = %locale, error = %e, "Failed to read cached room data");
                return Err(RoomsError::Unavailable(locale.clone()));
            }
        };

        let text = String::from_utf8_lossy(&body.bytes);
        let rooms = parse_rooms(&text).map_err(|source| RoomsError::Parse {
            locale: locale.clone(),
            source,
        })?;
        debug!(locale = %locale, rooms = rooms.len(), "Loaded room data from cache");
        Ok(self.remember(locale, rooms))
    }

    fn cached_in_memory(&self, locale: &Locale) -> Option<Arc<Vec<Room>>> {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(locale)
            .cloned()
    }

    fn remember(&self, locale: &Locale, rooms: Vec<Room>) -> Arc<Vec<Room>> {
        let rooms = Arc::new(rooms);
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(locale.clone(), rooms.clone());
        rooms
    }

    /// Drop the in-memory map (cache purge). The next load re-resolves
    /// from network or disk.
    pub fn invalidate(&self) {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
