use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, info, warn};

use super::bounded::{BoundedCache, BoundedCacheConfig, CacheMetrics, Persistence};
use crate::clock::Clock;
use crate::error::UpstreamError;
use crate::storage::{KeyValueStore, ITEM_CACHE_KEY};

/// The two independently aged parts of an [`ItemRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facet {
    Metadata,
    Status,
}

/// Track metadata as returned by the upstream API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub id: String,
    pub name: String,
    pub artist: Option<String>,
    /// Album (or playlist) the item belongs to
    pub collection: Option<String>,
    pub duration_ms: Option<u64>,
    pub external_uri: Option<String>,
    pub artwork_url: Option<String>,
}

/// Cached state for one item: durable metadata plus a short-lived derived
/// status flag (e.g. "saved in the user's library").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub metadata: Option<ItemMetadata>,
    pub metadata_fetched_at: Option<DateTime<Utc>>,
    pub status: Option<bool>,
    pub status_checked_at: Option<DateTime<Utc>>,
}

impl ItemRecord {
    fn is_empty(&self) -> bool {
        self.metadata.is_none() && self.status.is_none()
    }
}

/// Settings for [`ItemCache`].
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub max_size: usize,
    pub metadata_ttl: Duration,
    pub status_ttl: Duration,
    pub persistence: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_size: 500,
            metadata_ttl: Duration::from_secs(10 * 60),
            status_ttl: Duration::from_secs(5 * 60),
            persistence: true,
        }
    }
}

/// Dual-TTL item cache in front of the rate-limited metadata API.
pub struct ItemCache {
    inner: BoundedCache<ItemRecord, Facet>,
    /// Outstanding status changes per item, oldest first
    pending: Mutex<HashMap<String, Vec<PendingSlot>>>,
    next_token: AtomicU64,
}

impl ItemCache {
    pub fn new(
        settings: &CacheSettings,
        store: Option<Arc<dyn KeyValueStore>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = BoundedCacheConfig {
            max_size: settings.max_size,
            ttls: vec![
                (Facet::Metadata, settings.metadata_ttl),
                (Facet::Status, settings.status_ttl),
            ],
            default_ttl: settings.status_ttl,
        };
        let persistence = store
            .filter(|_| settings.persistence)
            .map(|store| Persistence::new(store, ITEM_CACHE_KEY));

        let inner = BoundedCache::new(config, persistence, clock);
        info!(
            "🗄️ Caché de items iniciado: {} entradas, máximo {}",
            inner.size(),
            settings.max_size
        );
        Self {
            inner,
            pending: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(0),
        }
    }

    /// Caches metadata under `item.id`. A cached status survives only while
    /// its own clock is still running.
    pub fn set_metadata(&self, item: ItemMetadata) {
        let id = item.id.clone();
        self.inner.set_with(&id, Facet::Metadata, |existing, now| {
            let mut record = ItemRecord::default();
            if let Some(entry) = existing {
                if entry.is_facet_live(Facet::Status, now) {
                    record.status = entry.value.status;
                    record.status_checked_at = entry.value.status_checked_at;
                }
            }
            record.metadata = Some(item);
            record.metadata_fetched_at = Some(now);
            record
        });
    }

    pub fn get_metadata(&self, id: &str) -> Option<ItemMetadata> {
        self.inner
            .get(id, Some(Facet::Metadata))
            .and_then(|record| record.metadata)
    }

    /// Sets the derived status, creating a bare record if needed.
    pub fn set_status(&self, id: &str, status: bool) {
        self.inner.set_with(id, Facet::Status, |existing, now| {
            let mut record = existing.map(|e| e.value.clone()).unwrap_or_default();
            record.status = Some(status);
            record.status_checked_at = Some(now);
            record
        });
    }

    pub fn get_status(&self, id: &str) -> Option<bool> {
        self.inner
            .get(id, Some(Facet::Status))
            .and_then(|record| record.status)
    }

    /// Last known metadata, expired or not.
    pub fn stale_metadata(&self, id: &str) -> Option<ItemMetadata> {
        self.inner.peek(id).and_then(|record| record.metadata)
    }

    /// Last known status, expired or not.
    pub fn stale_status(&self, id: &str) -> Option<bool> {
        self.inner.peek(id).and_then(|record| record.status)
    }

    /// Serves fresh metadata from cache, otherwise awaits `fetch` and caches
    /// the result. If the upstream call fails, any stale copy is returned
    /// instead; the error only surfaces when nothing was ever cached.
    pub async fn metadata_or_fetch<F, Fut>(
        &self,
        id: &str,
        fetch: F,
    ) -> Result<ItemMetadata, UpstreamError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ItemMetadata, UpstreamError>>,
    {
        // Capturar antes del get: un get expirado puede borrar la entrada
        let stale = self.stale_metadata(id);
        if let Some(fresh) = self.get_metadata(id) {
            return Ok(fresh);
        }

        match fetch().await {
            Ok(metadata) => {
                self.set_metadata(metadata.clone());
                Ok(metadata)
            }
            Err(e) => match stale {
                Some(stale) => {
                    warn!(
                        "⚠️ Fallo upstream ({}) para {}, usando metadata en caché: {}",
                        e.kind(),
                        id,
                        e
                    );
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    /// Status counterpart of [`metadata_or_fetch`](Self::metadata_or_fetch).
    pub async fn status_or_fetch<F, Fut>(&self, id: &str, fetch: F) -> Result<bool, UpstreamError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<bool, UpstreamError>>,
    {
        let stale = self.stale_status(id);
        if let Some(fresh) = self.get_status(id) {
            return Ok(fresh);
        }

        match fetch().await {
            Ok(status) => {
                self.set_status(id, status);
                Ok(status)
            }
            Err(e) => match stale {
                Some(stale) => {
                    warn!(
                        "⚠️ Fallo upstream ({}) para {}, usando estado en caché: {}",
                        e.kind(),
                        id,
                        e
                    );
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    /// First phase of an optimistic status change: the new status is visible
    /// immediately and the prior state is kept for a rollback.
    pub fn begin_status_change(&self, id: &str, status: bool) -> PendingStatusChange {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        {
            let mut pending = self.pending.lock();
            let previous = self.inner.entry(id).map(|entry| PreviousStatus {
                status: entry.value.status,
                checked_at: entry.value.status_checked_at,
                expires_at: entry.facet_expiry(Facet::Status),
            });
            self.set_status(id, status);
            pending
                .entry(id.to_string())
                .or_default()
                .push(PendingSlot { token, previous });
        }

        PendingStatusChange {
            id: id.to_string(),
            status,
            token,
        }
    }

    /// Runs both phases around `mutation`: apply locally, await the upstream
    /// write, then commit or roll back.
    pub async fn apply_status_change<Fut>(
        &self,
        id: &str,
        status: bool,
        mutation: Fut,
    ) -> Result<bool, UpstreamError>
    where
        Fut: Future<Output = Result<(), UpstreamError>>,
    {
        let pending = self.begin_status_change(id, status);
        match mutation.await {
            Ok(()) => {
                pending.commit(self);
                Ok(status)
            }
            Err(e) => {
                warn!("⚠️ Cambio de estado para {} revertido: {}", id, e);
                pending.rollback(self);
                Err(e)
            }
        }
    }

    pub fn invalidate(&self, id: &str) -> bool {
        self.inner.delete(id)
    }

    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Removes records whose metadata and status have both expired.
    pub fn cleanup(&self) -> usize {
        self.inner.cleanup()
    }

    pub fn size(&self) -> usize {
        self.inner.size()
    }

    pub fn expires_at(&self, id: &str, facet: Facet) -> Option<DateTime<Utc>> {
        self.inner.expires_at(id, facet)
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.inner.metrics()
    }
}

#[derive(Debug, Clone)]
struct PreviousStatus {
    status: Option<bool>,
    checked_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct PendingSlot {
    token: u64,
    previous: Option<PreviousStatus>,
}

/// A tentatively applied status change awaiting the upstream result.
#[must_use = "a pending status change must be committed or rolled back"]
#[derive(Debug)]
pub struct PendingStatusChange {
    id: String,
    status: bool,
    token: u64,
}

impl PendingStatusChange {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> bool {
        self.status
    }

    /// Upstream accepted the change; the tentative value stays.
    pub fn commit(self, cache: &ItemCache) {
        let mut pending = cache.pending.lock();
        Self::take_slot(&mut pending, &self.id, self.token);
        debug!("Cambio de estado confirmado: {} = {}", self.id, self.status);
    }

    /// Upstream rejected the change; restore the prior status and its clock.
    ///
    /// When a newer change for the same item is still outstanding, nothing
    /// is restored now: that change inherits this one's prior state as its
    /// own rollback target.
    pub fn rollback(self, cache: &ItemCache) {
        let mut pending = cache.pending.lock();
        let Some((slot, newer)) = Self::take_slot(&mut pending, &self.id, self.token) else {
            return;
        };

        if let Some(newer) = newer {
            debug!("Rollback de {} diferido al cambio más reciente", self.id);
            if let Some(next) = pending
                .get_mut(&self.id)
                .and_then(|slots| slots.iter_mut().find(|s| s.token == newer))
            {
                next.previous = slot.previous;
            }
            return;
        }

        let (status, checked_at, expires_at) = match slot.previous {
            Some(previous) => (previous.status, previous.checked_at, previous.expires_at),
            None => (None, None, None),
        };
        cache
            .inner
            .restore_facet(&self.id, Facet::Status, expires_at, |record| {
                record.status = status;
                record.status_checked_at = checked_at;
            });

        // Registro que solo existía por el cambio tentativo
        if cache.inner.peek(&self.id).is_some_and(|r| r.is_empty()) {
            cache.inner.delete(&self.id);
        }
    }

    /// Removes this change's slot. Returns it together with the token of the
    /// next newer outstanding change, if any.
    fn take_slot(
        pending: &mut HashMap<String, Vec<PendingSlot>>,
        id: &str,
        token: u64,
    ) -> Option<(PendingSlot, Option<u64>)> {
        let slots = pending.get_mut(id)?;
        let pos = slots.iter().position(|s| s.token == token)?;
        let slot = slots.remove(pos);
        let newer = slots.get(pos).map(|s| s.token);
        if slots.is_empty() {
            pending.remove(id);
        }
        Some((slot, newer))
    }
}
