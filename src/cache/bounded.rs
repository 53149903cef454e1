use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt::Debug,
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, warn};

use crate::clock::{expiry_after, Clock};
use crate::error::Error;
use crate::storage::KeyValueStore;

/// Key type naming an independently-aged part of a cached value.
pub trait FacetKind:
    Copy + Eq + Ord + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> FacetKind for T where
    T: Copy + Eq + Ord + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// A cached value with one expiry clock per written facet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V, F> {
    pub value: V,
    pub created_at: DateTime<Utc>,
    pub expires_at: Vec<(F, DateTime<Utc>)>,
    pub last_accessed_at: DateTime<Utc>,
    /// Tie-breaker for entries touched within the same instant.
    #[serde(default)]
    access_seq: u64,
}

impl<V, F: FacetKind> CacheEntry<V, F> {
    pub fn facet_expiry(&self, facet: F) -> Option<DateTime<Utc>> {
        self.expires_at
            .iter()
            .find(|(f, _)| *f == facet)
            .map(|(_, at)| *at)
    }

    /// A facet never written counts as expired.
    pub fn is_facet_live(&self, facet: F, now: DateTime<Utc>) -> bool {
        self.facet_expiry(facet).is_some_and(|at| now <= at)
    }

    /// Expired only once every facet is.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.iter().all(|(_, at)| now > *at)
    }

    fn set_expiry(&mut self, facet: F, at: Option<DateTime<Utc>>) {
        self.expires_at.retain(|(f, _)| *f != facet);
        if let Some(at) = at {
            self.expires_at.push((facet, at));
            self.expires_at.sort_by_key(|(f, _)| *f);
        }
    }

    fn lru_key(&self) -> (DateTime<Utc>, u64) {
        (self.last_accessed_at, self.access_seq)
    }
}

/// Size bound and TTLs of a [`BoundedCache`].
#[derive(Debug, Clone)]
pub struct BoundedCacheConfig<F> {
    pub max_size: usize,
    pub ttls: Vec<(F, Duration)>,
    /// Used for facets missing from `ttls`.
    pub default_ttl: Duration,
}

impl<F: FacetKind> BoundedCacheConfig<F> {
    pub fn ttl_for(&self, facet: F) -> Duration {
        self.ttls
            .iter()
            .find(|(f, _)| *f == facet)
            .map(|(_, ttl)| *ttl)
            .unwrap_or(self.default_ttl)
    }
}

/// Where a cache writes its snapshot.
#[derive(Clone)]
pub struct Persistence {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl Persistence {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }
}

/// Métricas básicas del cache
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired_removals: u64,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }

    pub fn miss_rate(&self) -> f64 {
        1.0 - self.hit_rate()
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expired_removals: AtomicU64,
}

/// Size-bounded, LRU-evicting store with independent TTL clocks per facet.
///
/// Keys are item identities. Empty keys are ignored by every mutator and
/// yield `None`/`false` from every accessor. Values handed out are clones,
/// so cached state can only change through the cache itself.
pub struct BoundedCache<V, F> {
    entries: Mutex<HashMap<String, CacheEntry<V, F>>>,
    config: BoundedCacheConfig<F>,
    persistence: Option<Persistence>,
    clock: Arc<dyn Clock>,
    seq: AtomicU64,
    counters: Counters,
}

impl<V, F> BoundedCache<V, F>
where
    V: Clone + Serialize + DeserializeOwned,
    F: FacetKind,
{
    /// Builds the cache, loading any stored snapshot when persistence is on.
    pub fn new(
        config: BoundedCacheConfig<F>,
        persistence: Option<Persistence>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let entries = persistence
            .as_ref()
            .map(Self::load_snapshot)
            .unwrap_or_default();
        let next_seq = entries.values().map(|e| e.access_seq).max().unwrap_or(0) + 1;

        let cache = Self {
            entries: Mutex::new(entries),
            config,
            persistence,
            clock,
            seq: AtomicU64::new(next_seq),
            counters: Counters::default(),
        };

        // El snapshot puede venir de una configuración con más capacidad
        let trimmed = {
            let mut entries = cache.entries.lock();
            cache.enforce_bound(&mut entries)
        };
        if trimmed > 0 {
            debug!("Snapshot recortado: {} entradas desalojadas", trimmed);
        }

        cache
    }

    /// Returns the value if the requested facet (or, without a facet, any
    /// facet) is still live. A fully expired entry is removed on the way.
    pub fn get(&self, key: &str, facet: Option<F>) -> Option<V> {
        if key.is_empty() {
            return None;
        }
        let now = self.clock.now();

        let (value, removed) = {
            let mut entries = self.entries.lock();
            match entries.get_mut(key) {
                None => (None, false),
                Some(entry) => {
                    let live = match facet {
                        Some(f) => entry.is_facet_live(f, now),
                        None => !entry.is_expired(now),
                    };
                    if live {
                        entry.last_accessed_at = now;
                        entry.access_seq = self.seq.fetch_add(1, Ordering::Relaxed);
                        (Some(entry.value.clone()), false)
                    } else if entry.is_expired(now) {
                        entries.remove(key);
                        (None, true)
                    } else {
                        (None, false)
                    }
                }
            }
        };

        if value.is_some() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!("✅ Cache hit: {} ({:?})", key, facet);
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            debug!("❌ Cache miss: {} ({:?})", key, facet);
        }
        if removed {
            self.counters.expired_removals.fetch_add(1, Ordering::Relaxed);
            self.persist();
        }
        value
    }

    /// Returns the value regardless of expiry, without touching LRU order.
    pub fn peek(&self, key: &str) -> Option<V> {
        if key.is_empty() {
            return None;
        }
        self.entries.lock().get(key).map(|e| e.value.clone())
    }

    /// Clone of the full entry, clocks included.
    pub fn entry(&self, key: &str) -> Option<CacheEntry<V, F>> {
        if key.is_empty() {
            return None;
        }
        self.entries.lock().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: V, facet: F) {
        self.set_with(key, facet, |_, _| value);
    }

    /// Writes the value built from the current entry (if any) and refreshes
    /// only `facet`'s clock. Runs under a single lock.
    pub fn set_with(
        &self,
        key: &str,
        facet: F,
        build: impl FnOnce(Option<&CacheEntry<V, F>>, DateTime<Utc>) -> V,
    ) {
        if key.is_empty() {
            return;
        }
        let now = self.clock.now();
        let expires = expiry_after(now, self.config.ttl_for(facet));
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);

        let evicted = {
            let mut entries = self.entries.lock();
            let value = build(entries.get(key), now);
            match entries.get_mut(key) {
                Some(entry) => {
                    entry.value = value;
                    entry.set_expiry(facet, Some(expires));
                    entry.last_accessed_at = now;
                    entry.access_seq = seq;
                }
                None => {
                    entries.insert(
                        key.to_string(),
                        CacheEntry {
                            value,
                            created_at: now,
                            expires_at: vec![(facet, expires)],
                            last_accessed_at: now,
                            access_seq: seq,
                        },
                    );
                }
            }
            self.enforce_bound(&mut entries)
        };

        if evicted > 0 {
            debug!("🗑️ {} entradas desalojadas por LRU", evicted);
        }
        self.persist();
    }

    /// Mutates an existing value in place. With a facet, that facet's clock
    /// is refreshed. Returns `false` when the key is absent.
    pub fn update(&self, key: &str, facet: Option<F>, mutate: impl FnOnce(&mut V)) -> bool {
        let expires = facet.map(|f| expiry_after(self.clock.now(), self.config.ttl_for(f)));
        match facet {
            Some(f) => self.write_existing(key, |entry| {
                mutate(&mut entry.value);
                entry.set_expiry(f, expires);
            }),
            None => self.write_existing(key, |entry| mutate(&mut entry.value)),
        }
    }

    /// Mutates an existing value and sets `facet`'s clock to exactly
    /// `expires_at` (`None` drops the clock). Used to undo tentative writes.
    pub fn restore_facet(
        &self,
        key: &str,
        facet: F,
        expires_at: Option<DateTime<Utc>>,
        mutate: impl FnOnce(&mut V),
    ) -> bool {
        self.write_existing(key, |entry| {
            mutate(&mut entry.value);
            entry.set_expiry(facet, expires_at);
        })
    }

    pub fn delete(&self, key: &str) -> bool {
        if key.is_empty() {
            return false;
        }
        let removed = self.entries.lock().remove(key).is_some();
        if removed {
            self.persist();
        }
        removed
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.store.remove(&persistence.key) {
                warn!("⚠️ {}", Error::PersistenceWriteFailure(e));
            }
        }
    }

    /// Removes entries whose facets are all expired. Returns how many.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let removed = {
            let mut entries = self.entries.lock();
            let keys: Vec<String> = entries.keys().cloned().collect();
            let mut removed = 0;
            for key in keys {
                if entries.get(&key).is_some_and(|e| e.is_expired(now)) {
                    entries.remove(&key);
                    removed += 1;
                }
            }
            removed
        };

        if removed > 0 {
            self.counters
                .expired_removals
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!("Limpiadas {} entradas expiradas del cache", removed);
            self.persist();
        }
        removed
    }

    /// Whether the facet (or the whole entry) is expired. A missing entry is
    /// expired; an empty key is not.
    pub fn is_expired(&self, key: &str, facet: Option<F>) -> bool {
        if key.is_empty() {
            return false;
        }
        let now = self.clock.now();
        match self.entries.lock().get(key) {
            None => true,
            Some(entry) => match facet {
                Some(f) => !entry.is_facet_live(f, now),
                None => entry.is_expired(now),
            },
        }
    }

    pub fn expires_at(&self, key: &str, facet: F) -> Option<DateTime<Utc>> {
        self.entries.lock().get(key).and_then(|e| e.facet_expiry(facet))
    }

    pub fn size(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn max_size(&self) -> usize {
        self.config.max_size
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expired_removals: self.counters.expired_removals.load(Ordering::Relaxed),
        }
    }

    // Métodos privados

    fn write_existing(&self, key: &str, write: impl FnOnce(&mut CacheEntry<V, F>)) -> bool {
        if key.is_empty() {
            return false;
        }
        let now = self.clock.now();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);

        let found = {
            let mut entries = self.entries.lock();
            match entries.get_mut(key) {
                Some(entry) => {
                    write(entry);
                    entry.last_accessed_at = now;
                    entry.access_seq = seq;
                    true
                }
                None => false,
            }
        };

        if found {
            self.persist();
        }
        found
    }

    /// Evicts least recently accessed entries until within `max_size`,
    /// regardless of remaining TTL.
    fn enforce_bound(&self, entries: &mut HashMap<String, CacheEntry<V, F>>) -> usize {
        let excess = entries.len().saturating_sub(self.config.max_size);
        if excess == 0 {
            return 0;
        }

        let mut by_age: Vec<(String, (DateTime<Utc>, u64))> = entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.lru_key()))
            .collect();
        by_age.sort_by_key(|(_, lru)| *lru);

        for (key, _) in by_age.into_iter().take(excess) {
            entries.remove(&key);
            debug!("LRU desaloja: {}", key);
        }
        self.counters
            .evictions
            .fetch_add(excess as u64, Ordering::Relaxed);
        excess
    }

    fn persist(&self) {
        let Some(persistence) = &self.persistence else {
            return;
        };

        let json = {
            let entries = self.entries.lock();
            let pairs: Vec<(&String, &CacheEntry<V, F>)> = entries.iter().collect();
            serde_json::to_string(&pairs)
        };

        let result = match json {
            Ok(json) => persistence
                .store
                .set(&persistence.key, &json)
                .map_err(Error::PersistenceWriteFailure),
            Err(e) => Err(Error::Serialization(e)),
        };
        if let Err(e) = result {
            // El estado en memoria sigue siendo el válido
            warn!("⚠️ No se pudo persistir {}: {}", persistence.key, e);
        }
    }

    fn load_snapshot(persistence: &Persistence) -> HashMap<String, CacheEntry<V, F>> {
        let raw = match persistence.store.get(&persistence.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return HashMap::new(),
            Err(e) => {
                warn!("⚠️ No se pudo leer {}: {}", persistence.key, e);
                return HashMap::new();
            }
        };

        match serde_json::from_str::<Vec<(String, CacheEntry<V, F>)>>(&raw) {
            Ok(pairs) => {
                let entries: HashMap<_, _> = pairs
                    .into_iter()
                    .filter(|(key, _)| !key.is_empty())
                    .collect();
                debug!("📂 {} entradas cargadas de {}", entries.len(), persistence.key);
                entries
            }
            Err(e) => {
                let err = Error::CacheCorruption(e.to_string());
                warn!("⚠️ Snapshot {} descartado: {}", persistence.key, err);
                if let Err(e) = persistence.store.remove(&persistence.key) {
                    warn!("⚠️ {}", Error::PersistenceWriteFailure(e));
                }
                HashMap::new()
            }
        }
    }
}
