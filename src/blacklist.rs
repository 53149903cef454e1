//! Persistent set of video ids that failed playback and must never be
//! offered again.
//!
//! Entries are only added by an explicit caller action and only removed by
//! [`ExclusionSet::remove`] or [`ExclusionSet::clear`]. There is no TTL and no
//! capacity bound.

use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::Error;
use crate::storage::{KeyValueStore, BLACKLIST_KEY};

pub struct ExclusionSet {
    ids: RwLock<BTreeSet<String>>,
    store: Arc<dyn KeyValueStore>,
}

impl ExclusionSet {
    /// Loads the stored set. A corrupt snapshot is discarded.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let ids = match store.get(BLACKLIST_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(ids) => ids.into_iter().filter(|id| !id.is_empty()).collect(),
                Err(e) => {
                    warn!("⚠️ Blacklist descartada: {}", Error::CacheCorruption(e.to_string()));
                    BTreeSet::new()
                }
            },
            Ok(None) => BTreeSet::new(),
            Err(e) => {
                warn!("⚠️ No se pudo leer la blacklist: {}", e);
                BTreeSet::new()
            }
        };

        if !ids.is_empty() {
            info!("🚫 Blacklist cargada: {} videos", ids.len());
        }

        Self {
            ids: RwLock::new(ids),
            store,
        }
    }

    /// Adds `id` and persists. Returns `false` if it was already present.
    pub fn add(&self, id: &str) -> bool {
        if id.is_empty() {
            return false;
        }
        let inserted = self.ids.write().insert(id.to_string());
        if inserted {
            info!("🚫 Video {} agregado a la blacklist", id);
            self.persist();
        }
        inserted
    }

    pub fn has(&self, id: &str) -> bool {
        self.ids.read().contains(id)
    }

    pub fn remove(&self, id: &str) -> bool {
        let removed = self.ids.write().remove(id);
        if removed {
            info!("Video {} quitado de la blacklist", id);
            self.persist();
        }
        removed
    }

    pub fn all(&self) -> BTreeSet<String> {
        self.ids.read().clone()
    }

    pub fn len(&self) -> usize {
        self.ids.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.read().is_empty()
    }

    /// Administrative reset.
    pub fn clear(&self) {
        let count = {
            let mut ids = self.ids.write();
            let count = ids.len();
            ids.clear();
            count
        };
        info!("🗑️ Blacklist limpiada ({} videos)", count);
        self.persist();
    }

    fn persist(&self) {
        let json = {
            let ids = self.ids.read();
            serde_json::to_string(&*ids)
        };
        let result = match json {
            Ok(json) => self
                .store
                .set(BLACKLIST_KEY, &json)
                .map_err(Error::PersistenceWriteFailure),
            Err(e) => Err(Error::Serialization(e)),
        };
        if let Err(e) = result {
            warn!("⚠️ No se pudo persistir la blacklist: {}", e);
        }
    }
}
