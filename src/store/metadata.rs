use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::Locale;

use super::CachePartition;

/// Synthetic cache key the metadata record lives under inside the data
/// partition. Never fetched from the network.
const METADATA_KEY: &str = "gallerycache://metadata/fully-cached";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetadataRecord {
    #[serde(rename = "fullyCachedLocales")]
    fully_cached_locales: Vec<String>,
    #[serde(rename = "lastUpdated")]
    last_updated: DateTime<Utc>,
}

/// Durable record of which locales need no further caching work.
///
/// The worker may be killed and restarted without notice, so the set is
/// loaded once at construction and written back to the data partition on
/// every mutation. Reads never fail the caller: a broken record degrades
/// to "assume nothing cached", which is always a valid cold start.
pub struct MetadataStore {
    data: Arc<CachePartition>,
    fully_cached: Mutex<BTreeSet<Locale>>,
    last_updated: Mutex<Option<DateTime<Utc>>>,
}

impl MetadataStore {
    /// Load the persisted record, or start empty when it is absent or
    /// unreadable.
    pub fn load(data: Arc<CachePartition>) -> Self {
        let (set, last_updated) = match data.lookup(METADATA_KEY) {
            Ok(Some(body)) => match serde_json::from_slice::<MetadataRecord>(&body.bytes) {
                Ok(record) => {
                    let set: BTreeSet<Locale> = record
                        .fully_cached_locales
                        .iter()
                        .filter_map(|s| match Locale::parse(s) {
                            Ok(locale) => Some(locale),
                            Err(e) => {
                                warn!(locale = %s, error = %e, "Dropping unknown locale from metadata");
                                None
                            }
                        })
                        .collect();
                    (set, Some(record.last_updated))
                }
                Err(e) => {
                    warn!(error = %e, "Failed to parse cache metadata, starting empty");
                    (BTreeSet::new(), None)
                }
            },
            Ok(None) => {
                debug!("No cache metadata record, starting empty");
                (BTreeSet::new(), None)
            }
            Err(e) => {
                warn!(error = %e, "Failed to read cache metadata, starting empty");
                (BTreeSet::new(), None)
            }
        };

        Self {
            data,
            fully_cached: Mutex::new(set),
            last_updated: Mutex::new(last_updated),
        }
    }

    fn set(&self) -> MutexGuard<'_, BTreeSet<Locale>> {
        self.fully_cached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_fully_cached(&self, locale: &Locale) -> bool {
        self.set().contains(locale)
    }

    pub fn fully_cached_locales(&self) -> Vec<Locale> {
        self.set().iter().cloned().collect()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        *self
            .last_updated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Record that every asset in the locale's manifest is present.
    /// Persists immediately; mutations are rare relative to reads.
    pub fn mark_fully_cached(&self, locale: &Locale) -> Result<()> {
        let snapshot: Vec<String> = {
            let mut set = self.set();
            set.insert(locale.clone());
            set.iter().map(|l| l.as_str().to_string()).collect()
        };
        self.persist(snapshot)
    }

    /// Empty the set and persist the empty state (cache purge).
    pub fn clear(&self) -> Result<()> {
        self.set().clear();
        self.persist(Vec::new())
    }

    fn persist(&self, locales: Vec<String>) -> Result<()> {
        let record = MetadataRecord {
            fully_cached_locales: locales,
            last_updated: Utc::now(),
        };
        let contents = serde_json::to_vec(&record)?;
        self.data.store(METADATA_KEY, "application/json", &contents)?;
        *self
            .last_updated
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(record.last_updated);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PartitionKind;
    use tempfile::TempDir;

    fn data_partition() -> (TempDir, Arc<CachePartition>) {
        let dir = TempDir::new().unwrap();
        let partition = Arc::new(CachePartition::new(dir.path(), PartitionKind::Data).unwrap());
        (dir, partition)
    }

    #[test]
    fn test_load_missing_starts_empty() {
        let (_dir, data) = data_partition();
        let store = MetadataStore::load(data);
        assert!(store.fully_cached_locales().is_empty());
        assert!(store.last_updated().is_none());
    }

    #[test]
    fn test_mark_persists_across_reload() {
        let (_dir, data) = data_partition();
        let locale = Locale::parse("zh-TW").unwrap();

        let store = MetadataStore::load(data.clone());
        store.mark_fully_cached(&locale).unwrap();
        assert!(store.is_fully_cached(&locale));

        // Simulate a worker restart
        let reloaded = MetadataStore::load(data);
        assert!(reloaded.is_fully_cached(&locale));
        assert!(reloaded.last_updated().is_some());
    }

    #[test]
    fn test_clear_persists_empty_state() {
        let (_dir, data) = data_partition();
        let locale = Locale::parse("fr").unwrap();

        let store = MetadataStore::load(data.clone());
        store.mark_fully_cached(&locale).unwrap();
        store.clear().unwrap();
        assert!(store.fully_cached_locales().is_empty());

        let reloaded = MetadataStore::load(data);
        assert!(reloaded.fully_cached_locales().is_empty());
    }

    #[test]
    fn test_corrupt_record_degrades_to_empty() {
        let (_dir, data) = data_partition();
        data.store(METADATA_KEY, "application/json", b"{not json").unwrap();

        let store = MetadataStore::load(data);
        assert!(store.fully_cached_locales().is_empty());
    }

    #[test]
    fn test_mark_is_idempotent() {
        let (_dir, data) = data_partition();
        let locale = Locale::parse("de").unwrap();

        let store = MetadataStore::load(data);
        store.mark_fully_cached(&locale).unwrap();
        store.mark_fully_cached(&locale).unwrap();
        assert_eq!(store.fully_cached_locales().len(), 1);
    }
}
