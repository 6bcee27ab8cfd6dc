//! Priority scheduler for asset downloads.
//!
//! Decides fetch order for assets not yet present in the assets partition,
//! biased toward what the visitor is most likely to need next: the current
//! room first, then nearby rooms, narration before images. Each run fetches
//! a bounded high-priority head immediately and defers the remainder to a
//! chunked background task, which re-checks real cache coverage before
//! marking the locale fully cached.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::fetch::{FetchError, NetClient};
use crate::manifest::{build_manifest, AssetKind, ManifestEntry};
use crate::models::{Locale, Position, Room};
use crate::rooms::RoomStore;
use crate::store::{CachePartition, MetadataStore};

// ============================================================================
// Constants
// ============================================================================

/// Flat weight every uncached asset starts from.
const BASE_SCORE: i32 = 10;

/// Bonus for assets in the visitor's current room.
const ROOM_MATCH_BONUS: i32 = 250;

/// Extra bonus when the asset belongs to the exact painting being viewed.
const PAINTING_MATCH_BONUS: i32 = 40;

/// Graduated bonuses by room-index distance from the current room.
/// Adjacent rooms outrank rooms two away, which outrank rooms three away.
/// Every gap between tiers (and below the last tier) exceeds the largest
/// kind adjustment, so room distance always dominates asset kind.
const DISTANCE_BONUS: [i32; 3] = [150, 100, 50];

/// Room narration is assumed higher-value than individual painting tracks.
const ROOM_AUDIO_BONUS: i32 = 25;

/// Images are assumed less essential to the guide than audio.
const IMAGE_PENALTY: i32 = 20;

/// Size of the awaited high-priority head of each run.
const HIGH_PRIORITY_BATCH: usize = 6;

/// Chunk size for the deferred background tail.
const BACKGROUND_CHUNK: usize = 4;

/// Delay before the background tail starts, so it never competes with the
/// head batch for the connection pool.
const BACKGROUND_START_DELAY_MS: u64 = 250;

// ============================================================================
// Run results
// ============================================================================

/// Outcome of one asset fetch within a run.
#[derive(Debug, Clone, Serialize)]
pub struct AssetResult {
    pub url: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AssetResult {
    fn ok(url: String) -> Self {
        Self { url, ok: true, error: None }
    }

    fn failed(url: String, error: String) -> Self {
        Self { url, ok: false, error: Some(error) }
    }
}

/// Final accounting for one scheduling run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Assets that were missing from cache when the run started.
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub details: Vec<AssetResult>,
    /// Whether the coverage re-check confirmed the locale fully cached.
    #[serde(rename = "fullyCached")]
    pub fully_cached: bool,
}

impl RunSummary {
    fn from_results(details: Vec<AssetResult>, fully_cached: bool) -> Self {
        let succeeded = details.iter().filter(|r| r.ok).count();
        Self {
            total: details.len(),
            succeeded,
            failed: details.len() - succeeded,
            details,
            fully_cached,
        }
    }
}

/// How a scheduling request resolved.
pub enum ScheduleOutcome {
    /// A run for this locale is already active; this request was dropped.
    AlreadyRunning,
    /// Room data could not be obtained - nothing to schedule.
    Unavailable,
    /// Every asset was already cached; coverage was confirmed inline.
    Completed(RunSummary),
    /// Head batch done; the background tail finishes the rest.
    Started {
        head: Vec<AssetResult>,
        tail: JoinHandle<RunSummary>,
    },
}

// ============================================================================
// Scoring
// ============================================================================

/// Compute the priority score for one uncached asset.
pub fn priority_score(
    entry: &ManifestEntry,
    position: Option<&Position>,
    position_room_index: Option<usize>,
) -> i32 {
    let mut score = BASE_SCORE;

    if let Some(pos) = position {
        if entry.room_id == pos.room_id {
            score += ROOM_MATCH_BONUS;
            if entry.painting_id.is_some() && entry.painting_id == pos.painting_id {
                score += PAINTING_MATCH_BONUS;
            }
        } else if let Some(pos_index) = position_room_index {
            let distance = entry.room_index.abs_diff(pos_index);
            if (1..=DISTANCE_BONUS.len()).contains(&distance) {
                score += DISTANCE_BONUS[distance - 1];
            }
        }
    }

    if entry.kind == AssetKind::RoomAudio {
        score += ROOM_AUDIO_BONUS;
    }
    if entry.kind.is_image() {
        score -= IMAGE_PENALTY;
    }

    score
}

/// Order entries by descending priority. The sort is stable, so ties keep
/// manifest order.
pub fn prioritize(
    mut entries: Vec<ManifestEntry>,
    position: Option<&Position>,
    rooms: &[Room],
) -> Vec<ManifestEntry> {
    let position_room_index =
        position.and_then(|pos| rooms.iter().position(|r| r.id == pos.room_id));

    entries.sort_by_key(|entry| {
        std::cmp::Reverse(priority_score(entry, position, position_room_index))
    });
    entries
}

// ============================================================================
// Scheduler
// ============================================================================

/// Priority-driven fetch coordinator, one run per locale at a time.
///
/// Cheap to clone: all state is shared behind `Arc`.
#[derive(Clone)]
pub struct Scheduler {
    base_url: String,
    client: NetClient,
    assets: Arc<CachePartition>,
    metadata: Arc<MetadataStore>,
    rooms: Arc<RoomStore>,
    in_progress: Arc<Mutex<HashSet<Locale>>>,
}

impl Scheduler {
    pub fn new(
        base_url: String,
        client: NetClient,
        assets: Arc<CachePartition>,
        metadata: Arc<MetadataStore>,
        rooms: Arc<RoomStore>,
    ) -> Self {
        Self {
            base_url,
            client,
            assets,
            metadata,
            rooms,
            in_progress: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Admit a run for the locale. The insert under a single lock is the
    /// compare-and-set: exactly one caller sees `true` until `end_run`.
    fn try_begin(&self, locale: &Locale) -> bool {
        self.in_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(locale.clone())
    }

    fn end_run(&self, locale: &Locale) {
        self.in_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(locale);
    }

    /// Run one scheduling pass for a locale.
    ///
    /// Re-invocation is idempotent: the uncached set is recomputed from
    /// actual cache state, so already-stored assets are never re-fetched.
    /// A concurrent request for a locale with an active run is dropped.
    pub async fn schedule(
        &self,
        locale: &Locale,
        position: Option<&Position>,
        online: bool,
        progress: Option<mpsc::Sender<AssetResult>>,
    ) -> ScheduleOutcome {
        if !self.try_begin(locale) {
            debug!(locale = %locale, "Scheduling run already active, dropping request");
            return ScheduleOutcome::AlreadyRunning;
        }

        let rooms = match self.rooms.load(locale, online).await {
            Ok(rooms) => rooms,
            Err(e) => {
                warn!(locale = %locale, error = %e, "Room data unavailable, nothing to schedule");
                self.end_run(locale);
                return ScheduleOutcome::Unavailable;
            }
        };

        let manifest = build_manifest(&self.base_url, locale, &rooms);
        let uncached: Vec<ManifestEntry> = manifest
            .iter()
            .filter(|e| !self.assets.contains(&e.url))
            .cloned()
            .collect();

        if uncached.is_empty() {
            let fully_cached = self.confirm_coverage(locale, &manifest);
            info!(locale = %locale, fully_cached, "Nothing to fetch");
            self.end_run(locale);
            return ScheduleOutcome::Completed(RunSummary::from_results(Vec::new(), fully_cached));
        }

        let ordered = prioritize(uncached, position, &rooms);
        let split = ordered.len().min(HIGH_PRIORITY_BATCH);
        let (head, tail) = ordered.split_at(split);
        debug!(locale = %locale, head = head.len(), tail = tail.len(), "Starting scheduling run");

        // High-priority head: dispatched concurrently and awaited, so the
        // assets the visitor needs now are cached before this returns.
        let head_results =
            join_all(head.iter().map(|e| self.fetch_and_store(e.url.clone(), online))).await;
        for result in &head_results {
            Self::send_progress(&progress, result).await;
        }

        let tail_entries: Vec<ManifestEntry> = tail.to_vec();
        let manifest_urls: Vec<String> = manifest.iter().map(|e| e.url.clone()).collect();
        let scheduler = self.clone();
        let run_locale = locale.clone();
        let head_for_summary = head_results.clone();

        // Background tail: deferred, chunked, and unordered relative to
        // later requests. It owns the re-entrancy guard until it finishes
        // and is the only place the locale can be marked fully cached.
        let tail_handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(BACKGROUND_START_DELAY_MS)).await;

            let mut results = head_for_summary;
            for chunk in tail_entries.chunks(BACKGROUND_CHUNK) {
                let chunk_results = join_all(
                    chunk.iter().map(|e| scheduler.fetch_and_store(e.url.clone(), online)),
                )
                .await;
                for result in &chunk_results {
                    Self::send_progress(&progress, result).await;
                }
                results.extend(chunk_results);
            }

            let fully_cached = scheduler.confirm_coverage_urls(&run_locale, &manifest_urls);
            let summary = RunSummary::from_results(results, fully_cached);
            info!(
                locale = %run_locale,
                succeeded = summary.succeeded,
                failed = summary.failed,
                fully_cached,
                "Scheduling run finished"
            );
            scheduler.end_run(&run_locale);
            summary
        });

        ScheduleOutcome::Started {
            head: head_results,
            tail: tail_handle,
        }
    }

    async fn fetch_and_store(&self, url: String, online: bool) -> AssetResult {
        if !online {
            return AssetResult::failed(url, FetchError::Offline.to_string());
        }

        match self.client.get_bytes(&url).await {
            Ok(body) => match self.assets.store(&url, &body.content_type, &body.bytes) {
                Ok(()) => AssetResult::ok(url),
                Err(e) => {
                    warn!(url = %url, error = %e, "Failed to store fetched asset");
                    AssetResult::failed(url, e.to_string())
                }
            },
            Err(e) => {
                debug!(url = %url, error = %e, "Asset fetch failed");
                AssetResult::failed(url, e.to_string())
            }
        }
    }

    async fn send_progress(tx: &Option<mpsc::Sender<AssetResult>>, result: &AssetResult) {
        if let Some(tx) = tx {
            if tx.send(result.clone()).await.is_err() {
                debug!("Progress receiver dropped");
            }
        }
    }

    fn confirm_coverage(&self, locale: &Locale, manifest: &[ManifestEntry]) -> bool {
        let urls: Vec<String> = manifest.iter().map(|e| e.url.clone()).collect();
        self.confirm_coverage_urls(locale, &urls)
    }

    /// Re-check actual cache state against the full manifest; only mark
    /// the locale fully cached when every asset and the locale's data file
    /// are confirmed present.
    fn confirm_coverage_urls(&self, locale: &Locale, manifest_urls: &[String]) -> bool {
        let covered = manifest_urls.iter().all(|url| self.assets.contains(url))
            && self.rooms.is_cached(locale);
        if covered {
            if let Err(e) = self.metadata.mark_fully_cached(locale) {
                warn!(locale = %locale, error = %e, "Failed to persist fully-cached metadata");
            }
        }
        covered
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Painting;
    use crate::store::PartitionKind;
    use tempfile::TempDir;

    const BASE: &str = "https://guide.example";

    fn room(id: &str, sequence: u32, paintings: u32) -> Room {
        Room {
            id: id.to_string(),
            sequence,
            title: None,
            intro_text: String::new(),
            image: Some(format!("{}.jpg", id)),
            paintings: (1..=paintings)
                .map(|n| Painting {
                    number: n,
                    title: format!("p{}", n),
                    text: String::new(),
                    image: Some(format!("{}-{}.jpg", id, n)),
                })
                .collect(),
        }
    }

    fn five_rooms() -> Vec<Room> {
        (1..=5).map(|n| room(&format!("room-{}", n), n, 1)).collect()
    }

    fn position(room_id: &str) -> Position {
        Position::new(room_id, None, Locale::parse("en-GB").unwrap())
    }

    struct Fixture {
        _dir: TempDir,
        scheduler: Scheduler,
        assets: Arc<CachePartition>,
        data: Arc<CachePartition>,
        metadata: Arc<MetadataStore>,
        rooms: Arc<RoomStore>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let assets = Arc::new(CachePartition::new(dir.path(), PartitionKind::Assets).unwrap());
        let data = Arc::new(CachePartition::new(dir.path(), PartitionKind::Data).unwrap());
        let metadata = Arc::new(MetadataStore::load(data.clone()));
        let client = NetClient::new().unwrap();
        let rooms = Arc::new(RoomStore::new(BASE.to_string(), client.clone(), data.clone()));
        let scheduler = Scheduler::new(
            BASE.to_string(),
            client,
            assets.clone(),
            metadata.clone(),
            rooms.clone(),
        );
        Fixture { _dir: dir, scheduler, assets, data, metadata, rooms }
    }

    fn seed_rooms(fixture: &Fixture, locale: &Locale, rooms: &[Room]) {
        let json = serde_json::to_string(rooms).unwrap();
        fixture
            .data
            .store(&fixture.rooms.rooms_url(locale), "application/json", json.as_bytes())
            .unwrap();
    }

    fn seed_all_assets(fixture: &Fixture, locale: &Locale, rooms: &[Room]) {
        for entry in build_manifest(BASE, locale, rooms) {
            fixture
                .assets
                .store(&entry.url, "application/octet-stream", b"cached")
                .unwrap();
        }
    }

    #[test]
    fn test_current_room_outranks_distant_room() {
        let rooms = five_rooms();
        let locale = Locale::parse("en-GB").unwrap();
        let manifest = build_manifest(BASE, &locale, &rooms);
        let pos = position("room-2");
        let pos_index = rooms.iter().position(|r| r.id == pos.room_id);

        let current = manifest
            .iter()
            .find(|e| e.room_id == "room-2" && e.kind == AssetKind::PaintingAudio)
            .unwrap();
        let distant = manifest
            .iter()
            .find(|e| e.room_id == "room-5" && e.kind == AssetKind::PaintingAudio)
            .unwrap();

        assert!(
            priority_score(current, Some(&pos), pos_index)
                > priority_score(distant, Some(&pos), pos_index)
        );
    }

    #[test]
    fn test_room_audio_outranks_painting_audio_and_images() {
        let rooms = five_rooms();
        let locale = Locale::parse("en-GB").unwrap();
        let manifest = build_manifest(BASE, &locale, &rooms);

        let room_audio = manifest.iter().find(|e| e.kind == AssetKind::RoomAudio).unwrap();
        let painting_audio = manifest.iter().find(|e| e.kind == AssetKind::PaintingAudio).unwrap();
        let image = manifest.iter().find(|e| e.kind == AssetKind::RoomImage).unwrap();

        assert!(priority_score(room_audio, None, None) > priority_score(painting_audio, None, None));
        assert!(priority_score(painting_audio, None, None) > priority_score(image, None, None));
    }

    #[test]
    fn test_exact_painting_match_gets_extra_bonus() {
        let rooms = five_rooms();
        let locale = Locale::parse("en-GB").unwrap();
        let manifest = build_manifest(BASE, &locale, &rooms);
        let pos = Position::new("room-3", Some("3-1".to_string()), locale);
        let pos_index = rooms.iter().position(|r| r.id == pos.room_id);

        let viewed = manifest
            .iter()
            .find(|e| e.painting_id.as_deref() == Some("3-1") && e.kind == AssetKind::PaintingAudio)
            .unwrap();
        let same_room = manifest
            .iter()
            .find(|e| e.room_id == "room-3" && e.kind == AssetKind::RoomImage)
            .unwrap();

        assert!(
            priority_score(viewed, Some(&pos), pos_index)
                > priority_score(same_room, Some(&pos), pos_index)
        );
    }

    #[test]
    fn test_prioritize_orders_by_room_distance() {
        // Visitor in room 2 of 5: room-2 assets first, then rooms 1 and 3,
        // then room 4, then room 5
        let rooms = five_rooms();
        let locale = Locale::parse("en-GB").unwrap();
        let manifest = build_manifest(BASE, &locale, &rooms);
        let pos = position("room-2");

        let ordered = prioritize(manifest, Some(&pos), &rooms);

        let first_of = |room_id: &str| ordered.iter().position(|e| e.room_id == room_id).unwrap();
        let last_of = |room_id: &str| {
            ordered.len() - 1 - ordered.iter().rev().position(|e| e.room_id == room_id).unwrap()
        };

        // All room-2 assets precede everything else
        assert!(last_of("room-2") < first_of("room-1"));
        assert!(last_of("room-2") < first_of("room-3"));
        // Distance-1 rooms precede distance-2 and distance-3 rooms
        assert!(last_of("room-1") < first_of("room-4"));
        assert!(last_of("room-3") < first_of("room-4"));
        assert!(last_of("room-4") < first_of("room-5"));
    }

    #[test]
    fn test_prioritize_is_stable_and_deterministic() {
        let rooms = five_rooms();
        let locale = Locale::parse("en-GB").unwrap();
        let pos = position("room-2");

        let a: Vec<String> = prioritize(build_manifest(BASE, &locale, &rooms), Some(&pos), &rooms)
            .into_iter()
            .map(|e| e.url)
            .collect();
        let b: Vec<String> = prioritize(build_manifest(BASE, &locale, &rooms), Some(&pos), &rooms)
            .into_iter()
            .map(|e| e.url)
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_position_room_degrades_gracefully() {
        let rooms = five_rooms();
        let locale = Locale::parse("en-GB").unwrap();
        let manifest = build_manifest(BASE, &locale, &rooms);
        let pos = position("demolished-wing");

        // No positional bias, but ordering still works on kind alone
        let ordered = prioritize(manifest, Some(&pos), &rooms);
        assert_eq!(ordered[0].kind, AssetKind::RoomAudio);
    }

    #[tokio::test]
    async fn test_fully_cached_locale_completes_with_zero_fetches() {
        let f = fixture();
        let locale = Locale::parse("zh-TW").unwrap();
        let rooms = five_rooms();
        seed_rooms(&f, &locale, &rooms);
        seed_all_assets(&f, &locale, &rooms);

        // Offline: any attempted fetch would fail, proving none happen
        match f.scheduler.schedule(&locale, None, false, None).await {
            ScheduleOutcome::Completed(summary) => {
                assert_eq!(summary.total, 0);
                assert!(summary.fully_cached);
            }
            _ => panic!("expected Completed"),
        }
        assert!(f.metadata.is_fully_cached(&locale));
    }

    #[tokio::test]
    async fn test_partial_coverage_is_not_marked_fully_cached() {
        let f = fixture();
        let locale = Locale::parse("fr").unwrap();
        let rooms = five_rooms();
        seed_rooms(&f, &locale, &rooms);
        // Cache everything except one asset
        let manifest = build_manifest(BASE, &locale, &rooms);
        for entry in manifest.iter().skip(1) {
            f.assets.store(&entry.url, "application/octet-stream", b"cached").unwrap();
        }

        match f.scheduler.schedule(&locale, None, false, None).await {
            ScheduleOutcome::Started { head, tail } => {
                assert_eq!(head.len(), 1);
                assert!(!head[0].ok);
                let summary = tail.await.unwrap();
                assert_eq!(summary.total, 1);
                assert_eq!(summary.failed, 1);
                assert!(!summary.fully_cached);
            }
            _ => panic!("expected Started"),
        }
        assert!(!f.metadata.is_fully_cached(&locale));
    }

    #[tokio::test]
    async fn test_rescheduling_retries_only_missing_subset() {
        let f = fixture();
        let locale = Locale::parse("fr").unwrap();
        let rooms = five_rooms();
        seed_rooms(&f, &locale, &rooms);
        let manifest = build_manifest(BASE, &locale, &rooms);
        for entry in manifest.iter().skip(2) {
            f.assets.store(&entry.url, "application/octet-stream", b"cached").unwrap();
        }

        // First run attempts exactly the 2 missing assets
        match f.scheduler.schedule(&locale, None, false, None).await {
            ScheduleOutcome::Started { tail, .. } => {
                let summary = tail.await.unwrap();
                assert_eq!(summary.total, 2);
            }
            _ => panic!("expected Started"),
        }

        // Fill one of the gaps by hand; the next run only sees the other
        f.assets.store(&manifest[0].url, "application/octet-stream", b"cached").unwrap();
        match f.scheduler.schedule(&locale, None, false, None).await {
            ScheduleOutcome::Started { tail, .. } => {
                let summary = tail.await.unwrap();
                assert_eq!(summary.total, 1);
                assert_eq!(summary.details[0].url, manifest[1].url);
            }
            _ => panic!("expected Started"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_run_for_same_locale_is_dropped() {
        let f = fixture();
        let locale = Locale::parse("de").unwrap();
        seed_rooms(&f, &locale, &five_rooms());

        assert!(f.scheduler.try_begin(&locale));
        match f.scheduler.schedule(&locale, None, false, None).await {
            ScheduleOutcome::AlreadyRunning => {}
            _ => panic!("expected AlreadyRunning"),
        }

        // Other locales are unaffected
        let other = Locale::parse("es").unwrap();
        seed_rooms(&f, &other, &five_rooms());
        seed_all_assets(&f, &other, &five_rooms());
        match f.scheduler.schedule(&other, None, false, None).await {
            ScheduleOutcome::Completed(_) => {}
            _ => panic!("expected Completed for other locale"),
        }

        // Releasing the guard re-admits the locale
        f.scheduler.end_run(&locale);
        match f.scheduler.schedule(&locale, None, false, None).await {
            ScheduleOutcome::AlreadyRunning => panic!("guard should have been released"),
            _ => {}
        }
    }

    #[tokio::test]
    async fn test_unavailable_rooms_release_the_guard() {
        let f = fixture();
        let locale = Locale::parse("es").unwrap();

        match f.scheduler.schedule(&locale, None, false, None).await {
            ScheduleOutcome::Unavailable => {}
            _ => panic!("expected Unavailable"),
        }
        // Guard was released on the error path
        assert!(f.scheduler.try_begin(&locale));
        f.scheduler.end_run(&locale);
    }

    #[tokio::test]
    async fn test_progress_events_are_streamed() {
        let f = fixture();
        let locale = Locale::parse("fr").unwrap();
        let rooms = five_rooms();
        seed_rooms(&f, &locale, &rooms);
        let manifest = build_manifest(BASE, &locale, &rooms);
        for entry in manifest.iter().skip(3) {
            f.assets.store(&entry.url, "application/octet-stream", b"cached").unwrap();
        }

        let (tx, mut rx) = mpsc::channel(64);
        match f.scheduler.schedule(&locale, None, false, Some(tx)).await {
            ScheduleOutcome::Started { tail, .. } => {
                let summary = tail.await.unwrap();
                assert_eq!(summary.total, 3);
            }
            _ => panic!("expected Started"),
        }

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 3);
    }
}
