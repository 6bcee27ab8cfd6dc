//! The cache worker's client message protocol.
//!
//! Clients (the guide UI) talk to the worker with tagged JSON messages:
//! position updates, explicit locale downloads, cached-data reads, purge,
//! and status checks. Protocol errors - unknown operations, unsupported
//! locales - are reported back on the response channel, never thrown.
//!
//! The worker owns the process-wide mutable state: partitions, the
//! persisted metadata (loaded once at activation), the room store, and
//! the current position. Nothing here survives a restart except what the
//! stores persist.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::fetch::NetClient;
use crate::gateway::Gateway;
use crate::models::{Locale, Position, Room};
use crate::rooms::RoomStore;
use crate::scheduler::{AssetResult, RunSummary, ScheduleOutcome, Scheduler};
use crate::store::{MetadataStore, PartitionCounts, Partitions};

/// Buffer size for the worker's event/progress channel.
pub const CHANNEL_BUFFER_SIZE: usize = 64;

// ============================================================================
// Protocol messages
// ============================================================================

/// Messages a client can send to the worker.
///
/// Locales arrive as plain strings so an unsupported value becomes a
/// protocol error response instead of a parse failure.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    UpdatePosition {
        room_id: String,
        #[serde(default)]
        painting_id: Option<String>,
        locale: String,
    },
    GetCachedData {
        locale: String,
    },
    CacheAssets {
        locale: String,
    },
    PurgeCache,
    CheckCacheStatus,
}

/// Responses and streamed events the worker emits.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerResponse {
    PositionAck {
        success: bool,
    },
    #[serde(rename_all = "camelCase")]
    CachedData {
        success: bool,
        room_data: Vec<Room>,
    },
    CacheProgress {
        url: String,
        ok: bool,
    },
    CacheSummary {
        success: bool,
        summary: RunSummary,
    },
    PurgeResult {
        success: bool,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    CacheStatus {
        partitions: PartitionCounts,
        position: Option<Position>,
        fully_cached_locales: Vec<String>,
        last_updated: Option<DateTime<Utc>>,
    },
    Error {
        success: bool,
        message: String,
    },
}

impl WorkerResponse {
    fn error(message: impl Into<String>) -> Self {
        WorkerResponse::Error {
            success: false,
            message: message.into(),
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

pub struct Worker {
    config: Config,
    partitions: Arc<Partitions>,
    metadata: Arc<MetadataStore>,
    rooms: Arc<RoomStore>,
    scheduler: Scheduler,
    gateway: Gateway,
    position: Arc<Mutex<Option<Position>>>,
    events_tx: mpsc::Sender<WorkerResponse>,
}

impl Worker {
    /// Activate the worker: open the cache partitions and load the
    /// persisted metadata before anything else runs. Returns the worker
    /// and the receiving end of its event/progress channel.
    pub fn new(config: Config) -> Result<(Self, mpsc::Receiver<WorkerResponse>)> {
        let cache_root = config.cache_root()?;
        let partitions = Arc::new(Partitions::open(&cache_root)?);
        let metadata = Arc::new(MetadataStore::load(partitions.data.clone()));

        let client = NetClient::new()?;
        let rooms = Arc::new(RoomStore::new(
            config.base_url.clone(),
            client.clone(),
            partitions.data.clone(),
        ));
        let scheduler = Scheduler::new(
            config.base_url.clone(),
            client.clone(),
            partitions.assets.clone(),
            metadata.clone(),
            rooms.clone(),
        );
        let position = Arc::new(Mutex::new(None));
        let gateway = Gateway::new(
            config.base_url.clone(),
            client,
            partitions.clone(),
            metadata.clone(),
            scheduler.clone(),
            position.clone(),
            !config.offline,
        );

        let (events_tx, events_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);

        info!(
            cache_root = %cache_root.display(),
            offline = config.offline,
            fully_cached = metadata.fully_cached_locales().len(),
            "Cache worker activated"
        );

        Ok((
            Self {
                config,
                partitions,
                metadata,
                rooms,
                scheduler,
                gateway,
                position,
                events_tx,
            },
            events_rx,
        ))
    }

    fn online(&self) -> bool {
        !self.config.offline
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    fn current_position(&self) -> Option<Position> {
        self.position
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Handle one raw message line. Malformed input becomes an error
    /// response, never a panic.
    pub async fn handle_raw(&self, line: &str) -> WorkerResponse {
        match serde_json::from_str::<ClientMessage>(line) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => {
                debug!(error = %e, "Rejecting malformed client message");
                WorkerResponse::error(format!("Invalid message: {}", e))
            }
        }
    }

    pub async fn handle_message(&self, message: ClientMessage) -> WorkerResponse {
        match message {
            ClientMessage::UpdatePosition {
                room_id,
                painting_id,
                locale,
            } => self.update_position(room_id, painting_id, &locale),
            ClientMessage::GetCachedData { locale } => self.get_cached_data(&locale).await,
            ClientMessage::CacheAssets { locale } => self.cache_assets(&locale).await,
            ClientMessage::PurgeCache => self.purge(),
            ClientMessage::CheckCacheStatus => self.status(),
        }
    }

    fn update_position(
        &self,
        room_id: String,
        painting_id: Option<String>,
        locale: &str,
    ) -> WorkerResponse {
        let locale = match Locale::parse(locale) {
            Ok(locale) => locale,
            Err(e) => return WorkerResponse::error(e.to_string()),
        };

        let position = Position::new(room_id, painting_id, locale.clone());
        *self
            .position
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(position.clone());
        debug!(room = %position.room_id, locale = %locale, "Position updated");

        // Position updates trigger background scheduling; a duplicate
        // trigger for an active locale is dropped by the scheduler
        if !self.metadata.is_fully_cached(&locale) {
            let scheduler = self.scheduler.clone();
            let online = self.online();
            tokio::spawn(async move {
                scheduler
                    .schedule(&locale, Some(&position), online, None)
                    .await;
            });
        }

        WorkerResponse::PositionAck { success: true }
    }

    /// Serve a locale's room data from cache only. Reporting on cache
    /// state must not mask a cold cache by fetching.
    async fn get_cached_data(&self, locale: &str) -> WorkerResponse {
        let locale = match Locale::parse(locale) {
            Ok(locale) => locale,
            Err(e) => return WorkerResponse::error(e.to_string()),
        };

        match self.rooms.load(&locale, false).await {
            Ok(rooms) => WorkerResponse::CachedData {
                success: true,
                room_data: rooms.as_ref().clone(),
            },
            Err(e) => WorkerResponse::error(e.to_string()),
        }
    }

    /// Run an explicit full caching pass for a locale, streaming progress
    /// events and waiting for the background tail so the final summary
    /// covers the whole run.
    async fn cache_assets(&self, locale: &str) -> WorkerResponse {
        let locale = match Locale::parse(locale) {
            Ok(locale) => locale,
            Err(e) => return WorkerResponse::error(e.to_string()),
        };

        let (tx, mut rx) = mpsc::channel::<AssetResult>(CHANNEL_BUFFER_SIZE);
        let events = self.events_tx.clone();
        let forward = tokio::spawn(async move {
            while let Some(result) = rx.recv().await {
                let event = WorkerResponse::CacheProgress {
                    url: result.url,
                    ok: result.ok,
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
        });

        let position = self.current_position();
        let outcome = self
            .scheduler
            .schedule(&locale, position.as_ref(), self.online(), Some(tx))
            .await;

        let response = match outcome {
            ScheduleOutcome::Completed(summary) => WorkerResponse::CacheSummary {
                success: true,
                summary,
            },
            ScheduleOutcome::Started { tail, .. } => match tail.await {
                Ok(summary) => WorkerResponse::CacheSummary {
                    success: summary.failed == 0,
                    summary,
                },
                Err(e) => {
                    warn!(locale = %locale, error = %e, "Background caching task failed");
                    WorkerResponse::error("Caching run was aborted")
                }
            },
            ScheduleOutcome::AlreadyRunning => {
                WorkerResponse::error(format!("Caching already in progress for {}", locale))
            }
            ScheduleOutcome::Unavailable => {
                WorkerResponse::error(format!("Room data unavailable for {}", locale))
            }
        };

        // All progress senders are gone once the run is over
        let _ = forward.await;
        response
    }

    /// Clear every partition and the metadata. The metadata's empty state
    /// is persisted first so the partition wipe also removes the record
    /// file, leaving truly zero entries behind.
    fn purge(&self) -> WorkerResponse {
        let result = self
            .metadata
            .clear()
            .and_then(|_| self.partitions.clear_all());

        match result {
            Ok(()) => {
                self.rooms.invalidate();
                info!("Cache purged");
                WorkerResponse::PurgeResult {
                    success: true,
                    message: "All cache partitions and metadata cleared".to_string(),
                }
            }
            Err(e) => {
                warn!(error = %e, "Cache purge failed");
                WorkerResponse::error(format!("Purge failed: {}", e))
            }
        }
    }

    pub fn status(&self) -> WorkerResponse {
        WorkerResponse::CacheStatus {
            partitions: self.partitions.counts(),
            position: self.current_position(),
            fully_cached_locales: self
                .metadata
                .fully_cached_locales()
                .into_iter()
                .map(|l| l.as_str().to_string())
                .collect(),
            last_updated: self.metadata.last_updated(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
