//! # Open Music Core
//!
//! Track-to-video resolution core: a dual-TTL item cache in front of a
//! rate-limited metadata API, a persistent blacklist of videos that failed
//! playback, a content filter that ranks search results, and the discovery
//! orchestrator that ties them together.
//!
//! ```rust,no_run
//! use open_music_core::{Config, CoreServices};
//!
//! # async fn run() -> anyhow::Result<()> {
//! open_music_core::logging::init_tracing();
//!
//! let core = CoreServices::open(Config::load()?)?;
//! let _sweeper = core.spawn_maintenance();
//! # Ok(())
//! # }
//! ```

pub mod blacklist;
pub mod cache;
pub mod clock;
pub mod config;
pub mod discovery;
pub mod error;
pub mod filter;
pub mod logging;
pub mod pins;
pub mod services;
pub mod storage;

pub use crate::blacklist::ExclusionSet;
pub use crate::cache::{CacheSettings, ItemCache, ItemMetadata, ItemRecord, PendingStatusChange};
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::Config;
pub use crate::discovery::{
    DiscoveryOptions, DiscoveryOrchestrator, DiscoveryRequest, DiscoveryState, EmbedStatus,
    Resolution, ResolutionSource, SearchProvider,
};
pub use crate::error::{Error, Result, StorageError, UpstreamError};
pub use crate::filter::{filter_candidates, Candidate, FilterCriteria, FilterOutcome, RawCandidate};
pub use crate::pins::{AssociationRecord, PinStore, PinnedAssociationLookup};
pub use crate::services::CoreServices;
pub use crate::storage::{JsonFileStore, KeyValueStore, MemoryStore};
