use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

/// The four independently addressable cache buckets.
///
/// An entry written to one partition is addressed by its exact request URL;
/// lookups are exact-match, never fuzzy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionKind {
    /// Binary media and JSON content assets (audio, images)
    Assets,
    /// Locale data files and the persisted metadata record
    Data,
    /// Immutable framework/build output (scripts, styles, fonts)
    Static,
    /// Rendered navigation views
    Pages,
}

impl PartitionKind {
    fn dir_name(&self) -> &'static str {
        match self {
            PartitionKind::Assets => "assets",
            PartitionKind::Data => "data",
            PartitionKind::Static => "static",
            PartitionKind::Pages => "pages",
        }
    }
}

/// Sidecar record stored next to each entry's body file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryMeta {
    url: String,
    content_type: String,
    cached_at: DateTime<Utc>,
    size: u64,
}

/// A cache entry read back out of a partition.
#[derive(Debug, Clone)]
pub struct CachedBody {
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub cached_at: DateTime<Utc>,
}

/// One on-disk cache bucket.
///
/// Entries are two files named by the SHA-256 of the URL: `<hash>.bin`
/// holds the body, `<hash>.json` the sidecar. The body is written first so
/// a crash between the two writes leaves the entry invisible rather than
/// truncated.
pub struct CachePartition {
    kind: PartitionKind,
    dir: PathBuf,
}

impl CachePartition {
    pub fn new(root: &Path, kind: PartitionKind) -> Result<Self> {
        let dir = root.join(kind.dir_name());
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache partition dir: {}", dir.display()))?;
        Ok(Self { kind, dir })
    }

    fn entry_stem(url: &str) -> String {
        hex::encode(Sha256::digest(url.as_bytes()))
    }

    fn body_path(&self, url: &str) -> PathBuf {
        self.dir.join(format!("{}.bin", Self::entry_stem(url)))
    }

    fn meta_path(&self, url: &str) -> PathBuf {
        self.dir.join(format!("{}.json", Self::entry_stem(url)))
    }

    /// Store a complete response under its exact URL, replacing any
    /// previous entry for the same key.
    pub fn store(&self, url: &str, content_type: &str, bytes: &[u8]) -> Result<()> {
        let meta = EntryMeta {
            url: url.to_string(),
            content_type: content_type.to_string(),
            cached_at: Utc::now(),
            size: bytes.len() as u64,
        };

        std::fs::write(self.body_path(url), bytes)
            .with_context(|| format!("Failed to write cache body for {}", url))?;
        let contents = serde_json::to_string_pretty(&meta)?;
        std::fs::write(self.meta_path(url), contents)
            .with_context(|| format!("Failed to write cache sidecar for {}", url))?;

        debug!(partition = self.kind.dir_name(), url, size = bytes.len(), "Stored cache entry");
        Ok(())
    }

    /// Exact-match lookup by URL.
    pub fn lookup(&self, url: &str) -> Result<Option<CachedBody>> {
        let meta_path = self.meta_path(url);
        if !meta_path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&meta_path)
            .with_context(|| format!("Failed to read cache sidecar for {}", url))?;
        let meta: EntryMeta = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse cache sidecar for {}", url))?;

        let bytes = std::fs::read(self.body_path(url))
            .with_context(|| format!("Failed to read cache body for {}", url))?;

        Ok(Some(CachedBody {
            content_type: meta.content_type,
            bytes,
            cached_at: meta.cached_at,
        }))
    }

    /// Whether an entry for this URL is present. Read errors count as
    /// absent so callers degrade to their next tier instead of failing.
    pub fn contains(&self, url: &str) -> bool {
        let meta = self.meta_path(url);
        meta.exists() && self.body_path(url).exists()
    }

    pub fn remove(&self, url: &str) -> Result<()> {
        for path in [self.body_path(url), self.meta_path(url)] {
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
        }
        Ok(())
    }

    /// Delete every entry in this partition.
    pub fn clear(&self) -> Result<()> {
        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list partition dir {}", self.dir.display()))?
        {
            let path = entry?.path();
            if path.is_file() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
        }
        Ok(())
    }

    /// Number of entries currently stored. Errors log and report zero.
    pub fn entry_count(&self) -> usize {
        match self.read_metas() {
            Ok(metas) => metas.len(),
            Err(e) => {
                debug!(partition = self.kind.dir_name(), error = %e, "Failed to count cache entries");
                0
            }
        }
    }

    /// All URLs currently stored, in unspecified order.
    pub fn urls(&self) -> Vec<String> {
        match self.read_metas() {
            Ok(metas) => metas.into_iter().map(|m| m.url).collect(),
            Err(e) => {
                debug!(partition = self.kind.dir_name(), error = %e, "Failed to list cache entries");
                Vec::new()
            }
        }
    }

    fn read_metas(&self) -> Result<Vec<EntryMeta>> {
        let mut metas = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                let contents = std::fs::read_to_string(&path)?;
                // Skip sidecars that fail to parse rather than poisoning
                // the whole listing
                match serde_json::from_str::<EntryMeta>(&contents) {
                    Ok(meta) => metas.push(meta),
                    Err(e) => debug!(path = %path.display(), error = %e, "Skipping unreadable sidecar"),
                }
            }
        }
        Ok(metas)
    }
}

/// Entry counts per partition, as reported by CHECK_CACHE_STATUS.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionCounts {
    pub assets: usize,
    pub data: usize,
    #[serde(rename = "static")]
    pub statics: usize,
    pub pages: usize,
}

impl PartitionCounts {
    pub fn total(&self) -> usize {
        self.assets + self.data + self.statics + self.pages
    }
}

/// The four partitions of one cache root. Partitions are shared across
/// the scheduler, gateway, and worker, so each is behind an `Arc`.
pub struct Partitions {
    pub assets: Arc<CachePartition>,
    pub data: Arc<CachePartition>,
    pub statics: Arc<CachePartition>,
    pub pages: Arc<CachePartition>,
}

impl Partitions {
    pub fn open(root: &Path) -> Result<Self> {
        Ok(Self {
            assets: Arc::new(CachePartition::new(root, PartitionKind::Assets)?),
            data: Arc::new(CachePartition::new(root, PartitionKind::Data)?),
            statics: Arc::new(CachePartition::new(root, PartitionKind::Static)?),
            pages: Arc::new(CachePartition::new(root, PartitionKind::Pages)?),
        })
    }

    pub fn clear_all(&self) -> Result<()> {
        self.assets.clear()?;
        self.data.clear()?;
        self.statics.clear()?;
        self.pages.clear()?;
        Ok(())
    }

    pub fn counts(&self) -> PartitionCounts {
        PartitionCounts {
            assets: self.assets.entry_count(),
            data: self.data.entry_count(),
            statics: self.statics.entry_count(),
            pages: self.pages.entry_count(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn partition(kind: PartitionKind) -> (TempDir, CachePartition) {
        let dir = TempDir::new().unwrap();
        let partition = CachePartition::new(dir.path(), kind).unwrap();
        (dir, partition)
    }

    #[test]
    fn test_store_and_lookup_round_trip() {
        let (_dir, p) = partition(PartitionKind::Assets);
        let url = "https://guide.example/audio/fr.room1.mp3";

        p.store(url, "audio/mpeg", b"ID3audio").unwrap();

        let body = p.lookup(url).unwrap().expect("entry should exist");
        assert_eq!(body.content_type, "audio/mpeg");
        assert_eq!(body.bytes, b"ID3audio");
        assert!(p.contains(url));
    }

    #[test]
    fn test_lookup_is_exact_match() {
        let (_dir, p) = partition(PartitionKind::Assets);
        p.store("https://guide.example/a", "text/plain", b"a").unwrap();

        assert!(p.lookup("https://guide.example/a/").unwrap().is_none());
        assert!(p.lookup("https://guide.example/A").unwrap().is_none());
    }

    #[test]
    fn test_store_replaces_by_key() {
        let (_dir, p) = partition(PartitionKind::Data);
        let url = "https://guide.example/data/fr_rooms.json";

        p.store(url, "application/json", b"[1]").unwrap();
        p.store(url, "application/json", b"[1,2]").unwrap();

        assert_eq!(p.entry_count(), 1);
        assert_eq!(p.lookup(url).unwrap().unwrap().bytes, b"[1,2]");
    }

    #[test]
    fn test_remove_and_clear() {
        let (_dir, p) = partition(PartitionKind::Pages);
        p.store("u1", "text/html", b"one").unwrap();
        p.store("u2", "text/html", b"two").unwrap();
        assert_eq!(p.entry_count(), 2);

        p.remove("u1").unwrap();
        assert!(!p.contains("u1"));
        assert_eq!(p.entry_count(), 1);

        p.clear().unwrap();
        assert_eq!(p.entry_count(), 0);
        assert!(p.urls().is_empty());
    }

    #[test]
    fn test_partitions_are_independent() {
        let dir = TempDir::new().unwrap();
        let partitions = Partitions::open(dir.path()).unwrap();
        let url = "https://guide.example/thing";

        partitions.assets.store(url, "audio/mpeg", b"x").unwrap();

        assert!(partitions.assets.contains(url));
        assert!(!partitions.data.contains(url));
        assert!(!partitions.pages.contains(url));

        let counts = partitions.counts();
        assert_eq!(counts.assets, 1);
        assert_eq!(counts.total(), 1);
    }
}
