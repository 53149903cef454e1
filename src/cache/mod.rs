//! # Cache Module
//!
//! Caching layer in front of the rate-limited track metadata API.
//!
//! ## Features
//!
//! - **LRU Eviction**: the least recently accessed entry goes first once the
//!   size bound is exceeded, whatever its remaining TTL
//! - **Dual TTL**: each entry carries one expiry clock per facet, so the
//!   short-lived status flag ages independently of the metadata
//! - **Stale Fallback**: expired values remain readable for upstream outages
//! - **Write-through Persistence**: every mutation snapshots the cache into a
//!   [`KeyValueStore`](crate::storage::KeyValueStore)
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use open_music_core::cache::{CacheSettings, ItemCache, ItemMetadata};
//! use open_music_core::clock::SystemClock;
//! use std::sync::Arc;
//!
//! let cache = ItemCache::new(&CacheSettings::default(), None, Arc::new(SystemClock));
//!
//! cache.set_metadata(ItemMetadata {
//!     id: "4uLU6hMCjMI75M1A2tKUQC".to_string(),
//!     name: "Never Gonna Give You Up".to_string(),
//!     artist: Some("Rick Astley".to_string()),
//!     collection: Some("Whenever You Need Somebody".to_string()),
//!     duration_ms: Some(213_573),
//!     external_uri: None,
//!     artwork_url: None,
//! });
//! cache.set_status("4uLU6hMCjMI75M1A2tKUQC", true);
//!
//! if let Some(track) = cache.get_metadata("4uLU6hMCjMI75M1A2tKUQC") {
//!     println!("Found cached track: {}", track.name);
//! }
//! ```

pub mod bounded;
pub mod item_cache;

pub use bounded::{BoundedCache, BoundedCacheConfig, CacheEntry, CacheMetrics, FacetKind, Persistence};
pub use item_cache::{CacheSettings, Facet, ItemCache, ItemMetadata, ItemRecord, PendingStatusChange};

use serde::{de::DeserializeOwned, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::interval_at};
use tracing::info;

/// Anything with a dual-expiry sweep.
pub trait Cleanup: Send + Sync {
    /// Removes fully expired entries and returns how many went.
    fn cleanup(&self) -> usize;
}

impl Cleanup for ItemCache {
    fn cleanup(&self) -> usize {
        ItemCache::cleanup(self)
    }
}

impl<V, F> Cleanup for BoundedCache<V, F>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync,
    F: FacetKind,
{
    fn cleanup(&self) -> usize {
        BoundedCache::cleanup(self)
    }
}

/// Starts the periodic sweep on its own timer. The first run happens one
/// `every` after the call. Abort the handle to stop it.
pub fn spawn_cleanup_task<C>(cache: Arc<C>, every: Duration) -> JoinHandle<()>
where
    C: Cleanup + ?Sized + 'static,
{
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + every;
        let mut ticker = interval_at(start, every);

        loop {
            ticker.tick().await;

            let removed = cache.cleanup();
            if removed > 0 {
                info!("🧹 Cache cleanup: removed {} expired entries", removed);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSweep {
        runs: AtomicUsize,
    }

    impl Cleanup for CountingSweep {
        fn cleanup(&self) -> usize {
            self.runs.fetch_add(1, Ordering::SeqCst);
            0
        }
    }

    #[tokio::test]
    async fn test_cleanup_task_runs_periodically() {
        let sweep = Arc::new(CountingSweep::default());
        let handle = spawn_cleanup_task(sweep.clone(), Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(sweep.runs.load(Ordering::SeqCst) >= 2);
    }
}
