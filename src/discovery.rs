//! # Discovery
//!
//! Finds an embeddable video for an item.
//!
//! ```text
//! Idle ─► CheckingPinned ─┬─► Resolved                (pin hit)
//!                         └─► Searching ─► Filtering ─┬─► Resolved
//!                                                     ├─► NoneEmbeddable
//!                                                     └─► NoneFound
//! any step ─► Failed (timeout, rate limit, network)
//! Idle | NoneEmbeddable | NoneFound | Resolved | Failed ─► Searching (exclude and retry)
//! ```
//!
//! Only the most recent request (by item identity and generation) is
//! allowed to publish state or return a result. A superseded request
//! resolves to `None`. Nothing here retries on its own.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::blacklist::ExclusionSet;
use crate::cache::ItemMetadata;
use crate::error::UpstreamError;
use crate::filter::{filter_candidates, Candidate, FilterCriteria, FilterOutcome, RawCandidate};
use crate::pins::PinnedAssociationLookup;

/// Answer to an embeddability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedStatus {
    Embeddable,
    NotEmbeddable { reason: Option<String> },
}

/// Video search backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Searches for `query`. `exclude_ids` is a hint; results are filtered
    /// again locally.
    async fn search(&self, query: &str, exclude_ids: &[String]) -> Result<Vec<RawCandidate>, UpstreamError>;

    async fn check_embeddable(&self, id: &str) -> Result<EmbedStatus, UpstreamError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Idle,
    CheckingPinned,
    Searching,
    Filtering,
    Resolved,
    NoneEmbeddable,
    NoneFound,
    Failed,
}

impl DiscoveryState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Resolved | Self::NoneEmbeddable | Self::NoneFound | Self::Failed
        )
    }

    pub fn can_transition_to(self, next: DiscoveryState) -> bool {
        use DiscoveryState::*;

        match (self, next) {
            // A new request always starts over
            (_, Idle) => true,
            (_, Failed) => !self.is_terminal() && self != Idle,
            (Idle, CheckingPinned) => true,
            (CheckingPinned, Resolved | Searching) => true,
            (Searching, Filtering) => true,
            (Filtering, Resolved | NoneEmbeddable | NoneFound) => true,
            // Exclude-and-retry enters here, also on a fresh focus
            (Idle, Searching) => true,
            (from, Searching) => from.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Pinned,
    Search,
}

/// Outcome of one discovery run.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved {
        candidate: Candidate,
        source: ResolutionSource,
    },
    /// Candidates exist but none of them can be embedded
    NoneEmbeddable,
    NoneFound,
    Failed(UpstreamError),
}

impl Resolution {
    pub fn state(&self) -> DiscoveryState {
        match self {
            Self::Resolved { .. } => DiscoveryState::Resolved,
            Self::NoneEmbeddable => DiscoveryState::NoneEmbeddable,
            Self::NoneFound => DiscoveryState::NoneFound,
            Self::Failed(_) => DiscoveryState::Failed,
        }
    }

    pub fn candidate(&self) -> Option<&Candidate> {
        match self {
            Self::Resolved { candidate, .. } => Some(candidate),
            _ => None,
        }
    }

    /// Only transport failures are worth trying again. An empty or
    /// non-embeddable result will not change by asking twice.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Failed(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// What to look for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRequest {
    pub item_id: String,
    pub query: String,
    pub artist: Option<String>,
    pub duration_sec: Option<u32>,
}

impl DiscoveryRequest {
    pub fn new(item_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            query: query.into(),
            artist: None,
            duration_sec: None,
        }
    }

    /// Builds an "artist name" query from cached metadata.
    pub fn from_metadata(metadata: &ItemMetadata) -> Self {
        let query = match metadata.artist.as_deref() {
            Some(artist) if !artist.trim().is_empty() => format!("{} {}", artist.trim(), metadata.name),
            _ => metadata.name.clone(),
        };

        Self {
            item_id: metadata.id.clone(),
            query,
            artist: metadata.artist.clone(),
            duration_sec: metadata.duration_ms.and_then(|ms| u32::try_from(ms / 1000).ok()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// Check each best candidate before accepting it
    pub verify_embeddable: bool,
    /// Bound on every provider call
    pub search_timeout: Duration,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            verify_embeddable: false,
            search_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Ticket {
    item_id: String,
    generation: u64,
}

pub struct DiscoveryOrchestrator {
    provider: Arc<dyn SearchProvider>,
    blacklist: Arc<ExclusionSet>,
    pins: Arc<dyn PinnedAssociationLookup>,
    criteria: FilterCriteria,
    options: DiscoveryOptions,
    generation: AtomicU64,
    current: Mutex<Option<Ticket>>,
    state_tx: watch::Sender<DiscoveryState>,
}

impl DiscoveryOrchestrator {
    pub fn new(
        provider: Arc<dyn SearchProvider>,
        blacklist: Arc<ExclusionSet>,
        pins: Arc<dyn PinnedAssociationLookup>,
        criteria: FilterCriteria,
        options: DiscoveryOptions,
    ) -> Self {
        let (state_tx, _) = watch::channel(DiscoveryState::Idle);

        Self {
            provider,
            blacklist,
            pins,
            criteria,
            options,
            generation: AtomicU64::new(0),
            current: Mutex::new(None),
            state_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<DiscoveryState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> DiscoveryState {
        *self.state_tx.borrow()
    }

    /// Id of the item the orchestrator is currently working for.
    pub fn current_item(&self) -> Option<String> {
        self.current.lock().as_ref().map(|t| t.item_id.clone())
    }

    /// Makes `item_id` the current item. Any run still in flight for a
    /// previous focus is discarded when it completes.
    pub fn focus(&self, item_id: &str) {
        self.take_ticket(item_id);
        self.publish(DiscoveryState::Idle);
    }

    /// Runs discovery for `request`.
    ///
    /// Returns `None` when a newer request took over before this one
    /// finished.
    pub async fn discover(&self, request: &DiscoveryRequest) -> Option<Resolution> {
        let ticket = self.take_ticket(&request.item_id);
        self.publish_for(&ticket, DiscoveryState::Idle);
        info!("🔍 Buscando video para {}: '{}'", request.item_id, request.query);

        let resolution = self.run(&ticket, request, true).await;
        self.finish(&ticket, resolution)
    }

    /// Excludes `failed_id` permanently and searches again, skipping the pin.
    pub async fn exclude_and_retry(
        &self,
        request: &DiscoveryRequest,
        failed_id: &str,
    ) -> Option<Resolution> {
        self.blacklist.add(failed_id);
        let ticket = self.take_ticket(&request.item_id);
        info!(
            "🔁 Reintentando {} sin el video {}",
            request.item_id, failed_id
        );

        let resolution = self.run(&ticket, request, false).await;
        self.finish(&ticket, resolution)
    }

    async fn run(&self, ticket: &Ticket, request: &DiscoveryRequest, check_pins: bool) -> Resolution {
        if check_pins {
            self.publish_for(ticket, DiscoveryState::CheckingPinned);

            if let Some(record) = self.pins.get(&request.item_id) {
                if self.blacklist.has(&record.candidate.id) {
                    warn!(
                        "📌 Pin de {} ignorado: {} está en la blacklist",
                        request.item_id, record.candidate.id
                    );
                } else {
                    debug!("📌 Usando pin {} para {}", record.candidate.id, request.item_id);
                    return Resolution::Resolved {
                        candidate: record.candidate,
                        source: ResolutionSource::Pinned,
                    };
                }
            }
        }

        self.publish_for(ticket, DiscoveryState::Searching);
        let excluded = self.blacklist.all();
        let exclude_ids: Vec<String> = excluded.iter().cloned().collect();

        let raw = match self
            .bounded(self.provider.search(&request.query, &exclude_ids))
            .await
        {
            Ok(raw) => raw,
            Err(e) => return Resolution::Failed(e),
        };

        self.publish_for(ticket, DiscoveryState::Filtering);
        let candidates = admissible(raw, &excluded);
        debug!("{} candidatos tras excluir blacklist", candidates.len());

        let criteria = self.criteria.clone().for_item(
            &request.query,
            request.artist.as_deref(),
            request.duration_sec,
        );
        let mut outcome = filter_candidates(candidates, &criteria);

        if self.options.verify_embeddable {
            if let Err(e) = self.verify(&mut outcome).await {
                return Resolution::Failed(e);
            }
        }

        match outcome.best() {
            Some(best) => Resolution::Resolved {
                candidate: best.candidate.clone(),
                source: ResolutionSource::Search,
            },
            None if outcome.all_rejected_for_embedding => Resolution::NoneEmbeddable,
            None => Resolution::NoneFound,
        }
    }

    /// Checks the best candidate until one is embeddable or none is left.
    async fn verify(&self, outcome: &mut FilterOutcome) -> Result<(), UpstreamError> {
        while let Some(best) = outcome.best() {
            let id = best.candidate.id.clone();

            match self.bounded(self.provider.check_embeddable(&id)).await? {
                EmbedStatus::Embeddable => return Ok(()),
                EmbedStatus::NotEmbeddable { reason } => {
                    debug!("🚫 {} no embebible: {:?}", id, reason);
                    outcome.reject_for_embedding(&id, reason);
                }
            }
        }
        Ok(())
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, UpstreamError>>,
    ) -> Result<T, UpstreamError> {
        match timeout(self.options.search_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout),
        }
    }

    fn finish(&self, ticket: &Ticket, resolution: Resolution) -> Option<Resolution> {
        if !self.is_current(ticket) {
            debug!(
                "Resultado descartado para {} (generación {})",
                ticket.item_id, ticket.generation
            );
            return None;
        }

        match &resolution {
            Resolution::Resolved { candidate, source } => {
                info!("✅ {} → {} ({:?})", ticket.item_id, candidate.id, source)
            }
            Resolution::NoneEmbeddable => info!("⚠️ {}: ningún video embebible", ticket.item_id),
            Resolution::NoneFound => info!("⚠️ {}: sin resultados", ticket.item_id),
            Resolution::Failed(e) => {
                error!("❌ Discovery fallido para {} ({}): {}", ticket.item_id, e.kind(), e)
            }
        }

        self.publish_for(ticket, resolution.state());
        Some(resolution)
    }

    fn take_ticket(&self, item_id: &str) -> Ticket {
        let ticket = Ticket {
            item_id: item_id.to_string(),
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
        };
        *self.current.lock() = Some(ticket.clone());
        ticket
    }

    fn is_current(&self, ticket: &Ticket) -> bool {
        self.current.lock().as_ref() == Some(ticket)
    }

    fn publish_for(&self, ticket: &Ticket, next: DiscoveryState) {
        if self.is_current(ticket) {
            self.publish(next);
        }
    }

    fn publish(&self, next: DiscoveryState) {
        self.state_tx.send_modify(|state| {
            if !state.can_transition_to(next) {
                warn!("Transición inesperada {:?} → {:?}", state, next);
            }
            *state = next;
        });
    }
}

/// Drops excluded, anonymous and repeated ids, keeping provider order.
fn admissible(raw: Vec<RawCandidate>, excluded: &BTreeSet<String>) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .map(Candidate::from)
        .filter(|c| !c.id.is_empty() && !excluded.contains(&c.id))
        .filter(|c| seen.insert(c.id.clone()))
        .collect()
}
