//! Composition root.
//!
//! One [`ItemCache`], one [`ExclusionSet`] and one [`PinStore`] per process,
//! created here and shared through `Arc`s. Hosts build a
//! [`DiscoveryOrchestrator`] per search backend with [`CoreServices::discovery`].

use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::blacklist::ExclusionSet;
use crate::cache::{spawn_cleanup_task, ItemCache};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::discovery::{DiscoveryOrchestrator, SearchProvider};
use crate::pins::PinStore;
use crate::storage::{JsonFileStore, KeyValueStore};

pub struct CoreServices {
    config: Config,
    item_cache: Arc<ItemCache>,
    blacklist: Arc<ExclusionSet>,
    pins: Arc<PinStore>,
}

impl CoreServices {
    pub fn new(config: Config, store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        let item_cache = Arc::new(ItemCache::new(
            &config.cache_settings(),
            Some(store.clone()),
            clock.clone(),
        ));
        let blacklist = Arc::new(ExclusionSet::load(store.clone()));
        let pins = Arc::new(PinStore::load(store, clock));

        info!(
            "🎵 Core listo: {} items en caché, {} videos en blacklist, {} pins",
            item_cache.size(),
            blacklist.len(),
            pins.len()
        );

        Self {
            config,
            item_cache,
            blacklist,
            pins,
        }
    }

    /// File-backed services under `config.data_dir` on the system clock.
    pub fn open(config: Config) -> Result<Self> {
        info!("{}", config.summary());
        let store = Arc::new(JsonFileStore::new(&config.data_dir)?);
        Ok(Self::new(config, store, Arc::new(SystemClock)))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn item_cache(&self) -> Arc<ItemCache> {
        self.item_cache.clone()
    }

    pub fn blacklist(&self) -> Arc<ExclusionSet> {
        self.blacklist.clone()
    }

    pub fn pins(&self) -> Arc<PinStore> {
        self.pins.clone()
    }

    pub fn discovery(&self, provider: Arc<dyn SearchProvider>) -> DiscoveryOrchestrator {
        DiscoveryOrchestrator::new(
            provider,
            self.blacklist.clone(),
            self.pins.clone(),
            self.config.filter_criteria(),
            self.config.discovery_options(),
        )
    }

    /// Starts the periodic expired-entry sweep. Must be called inside a
    /// tokio runtime.
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        spawn_cleanup_task(self.item_cache.clone(), self.config.cache_cleanup_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ItemMetadata;
    use crate::clock::ManualClock;
    use crate::discovery::{DiscoveryRequest, MockSearchProvider};
    use crate::filter::RawCandidate;
    use crate::storage::MemoryStore;
    use std::time::Duration;

    fn metadata(id: &str) -> ItemMetadata {
        ItemMetadata {
            id: id.to_string(),
            name: "Don't Stop Me Now".to_string(),
            artist: Some("Queen".to_string()),
            collection: Some("Jazz".to_string()),
            duration_ms: Some(209_000),
            external_uri: None,
            artwork_url: None,
        }
    }

    #[test]
    fn test_services_share_one_store() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());

        let core = CoreServices::new(Config::default(), store.clone(), clock.clone());
        core.item_cache().set_metadata(metadata("track-1"));
        core.blacklist().add("dQw4w9WgXcQ");

        let reopened = CoreServices::new(Config::default(), store, clock);
        assert!(reopened.item_cache().get_metadata("track-1").is_some());
        assert!(reopened.blacklist().has("dQw4w9WgXcQ"));
    }

    #[test]
    fn test_open_uses_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().join("state"),
            ..Config::default()
        };

        let core = CoreServices::open(config).unwrap();
        core.blacklist().add("abc123");

        assert!(dir.path().join("state").join("open_music.video_blacklist.json").exists());
    }

    #[tokio::test]
    async fn test_discovery_uses_shared_blacklist() {
        let core = CoreServices::new(
            Config::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::default()),
        );
        core.blacklist().add("X");

        let mut provider = MockSearchProvider::new();
        provider.expect_search().returning(|_, _| {
            Ok(["X", "Y"]
                .iter()
                .map(|id| RawCandidate {
                    id: id.to_string(),
                    title: "Queen - Don't Stop Me Now".to_string(),
                    channel: Some("Queen Official".to_string()),
                    thumbnail_height: Some(720),
                    duration_sec: Some(210),
                    ..Default::default()
                })
                .collect())
        });

        let orchestrator = core.discovery(Arc::new(provider));
        let request = DiscoveryRequest::from_metadata(&metadata("track-1"));
        let resolution = orchestrator.discover(&request).await.unwrap();

        assert_eq!(resolution.candidate().map(|c| c.id.as_str()), Some("Y"));
    }

    #[tokio::test]
    async fn test_maintenance_task_can_be_aborted() {
        let config = Config {
            cache_cleanup_interval: Duration::from_millis(5),
            ..Config::default()
        };
        let core = CoreServices::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::default()),
        );

        let handle = core.spawn_maintenance();
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.abort();

        assert!(handle.await.unwrap_err().is_cancelled());
    }
}
