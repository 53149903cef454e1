use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::Error;
use crate::filter::Candidate;
use crate::storage::{KeyValueStore, PINS_KEY};

/// A user-chosen video for an item; bypasses search entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationRecord {
    pub item_id: String,
    pub candidate: Candidate,
    pub pinned_at: DateTime<Utc>,
}

/// Lookup of pinned associations by item identity.
pub trait PinnedAssociationLookup: Send + Sync {
    fn get(&self, item_id: &str) -> Option<AssociationRecord>;
}

/// Persistent pin table over a [`KeyValueStore`].
pub struct PinStore {
    pins: RwLock<HashMap<String, AssociationRecord>>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl PinStore {
    pub fn load(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        let pins = match store.get(PINS_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<AssociationRecord>>(&raw) {
                Ok(records) => records
                    .into_iter()
                    .map(|record| (record.item_id.clone(), record))
                    .collect(),
                Err(e) => {
                    warn!("⚠️ Pins descartados: {}", Error::CacheCorruption(e.to_string()));
                    HashMap::new()
                }
            },
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!("⚠️ No se pudieron leer los pins: {}", e);
                HashMap::new()
            }
        };

        Self {
            pins: RwLock::new(pins),
            store,
            clock,
        }
    }

    /// Pins `candidate` to `item_id`, replacing any previous pin.
    pub fn pin(&self, item_id: &str, candidate: Candidate) {
        if item_id.is_empty() {
            return;
        }
        let record = AssociationRecord {
            item_id: item_id.to_string(),
            candidate,
            pinned_at: self.clock.now(),
        };
        info!("📌 {} fijado a video {}", item_id, record.candidate.id);
        self.pins.write().insert(item_id.to_string(), record);
        self.persist();
    }

    pub fn unpin(&self, item_id: &str) -> bool {
        let removed = self.pins.write().remove(item_id).is_some();
        if removed {
            self.persist();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.pins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.read().is_empty()
    }

    fn persist(&self) {
        let json = {
            let pins = self.pins.read();
            let mut records: Vec<&AssociationRecord> = pins.values().collect();
            records.sort_by(|a, b| a.item_id.cmp(&b.item_id));
            serde_json::to_string(&records)
        };
        let result = match json {
            Ok(json) => self
                .store
                .set(PINS_KEY, &json)
                .map_err(Error::PersistenceWriteFailure),
            Err(e) => Err(Error::Serialization(e)),
        };
        if let Err(e) = result {
            warn!("⚠️ No se pudieron persistir los pins: {}", e);
        }
    }
}

impl PinnedAssociationLookup for PinStore {
    fn get(&self, item_id: &str) -> Option<AssociationRecord> {
        self.pins.read().get(item_id).cloned()
    }
}
