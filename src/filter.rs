//! Candidate filtering and ranking.
//!
//! [`filter_candidates`] is pure: same input, same output. Every rejected
//! candidate keeps the full list of reasons it failed so the caller can tell
//! "nothing exists" apart from "things exist but can't be embedded".

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use url::Url;

/// Anuncios, promos y material que no es la canción
const DEFAULT_PROMO_PATTERN: &str = r"(?i)(#ad\b|\bsponsored\b|\badvert(isement)?\b|\bpromo(tion|tional)?\b|\bdiscount\b|\bcoupon\b|\bgiveaway\b|\bfree download\b|\bcommercial\b|\btrailer\b|\bteaser\b|\bunboxing\b)";

static DEFAULT_PROMO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DEFAULT_PROMO_PATTERN).expect("default promo pattern is valid"));

const SPAM_CHANNEL_MARKERS: &[&str] = &[
    "free download",
    "mp3",
    "ringtone",
    "nightcore",
    "8d audio",
    "bass boosted",
    "slowed",
];

// Pesos del score
const W_QUALITY: f64 = 0.35;
const W_CHANNEL: f64 = 0.25;
const W_RANK: f64 = 0.25;
const W_TITLE: f64 = 0.15;
const W_DURATION: f64 = 0.20;

/// A video proposed as the media for an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub title: String,
    pub channel: String,
    pub thumbnail_url: Option<String>,
    pub duration_sec: Option<u32>,
    /// 0.0 ..= 1.0, derived from the best available resolution signal
    pub quality_score: f32,
    pub embeddable: bool,
    pub restriction_reason: Option<String>,
    #[serde(default)]
    pub is_live: bool,
}

impl Candidate {
    pub fn watch_url(&self) -> Option<Url> {
        let mut url = Url::parse("https://www.youtube.com/watch").ok()?;
        url.query_pairs_mut().append_pair("v", &self.id);
        Some(url)
    }

    pub fn embed_url(&self) -> Option<Url> {
        Url::parse("https://www.youtube-nocookie.com/embed/")
            .ok()?
            .join(&self.id)
            .ok()
    }
}

/// Candidate as a search provider reports it; anything may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCandidate {
    pub id: String,
    pub title: String,
    pub channel: Option<String>,
    pub thumbnail_url: Option<String>,
    pub thumbnail_height: Option<u32>,
    pub duration_sec: Option<u32>,
    pub quality_score: Option<f32>,
    pub embeddable: Option<bool>,
    pub restriction_reason: Option<String>,
    #[serde(default)]
    pub is_live: bool,
}

impl From<RawCandidate> for Candidate {
    fn from(raw: RawCandidate) -> Self {
        let quality_score = raw
            .quality_score
            .filter(|q| q.is_finite())
            .map(|q| q.clamp(0.0, 1.0))
            .unwrap_or_else(|| quality_from_thumbnail(raw.thumbnail_height, raw.thumbnail_url.as_deref()));

        Self {
            id: raw.id,
            title: raw.title,
            channel: raw.channel.unwrap_or_default(),
            thumbnail_url: raw.thumbnail_url,
            duration_sec: raw.duration_sec,
            quality_score,
            // Sin dato asumimos embebible; la verificación es opcional
            embeddable: raw.embeddable.unwrap_or(true),
            restriction_reason: raw.restriction_reason,
            is_live: raw.is_live,
        }
    }
}

/// Maps the thumbnail resolution (or its well-known file name) to a score.
pub fn quality_from_thumbnail(height: Option<u32>, url: Option<&str>) -> f32 {
    if let Some(height) = height {
        return match height {
            h if h >= 720 => 1.0,
            h if h >= 480 => 0.8,
            h if h >= 360 => 0.6,
            h if h >= 180 => 0.4,
            _ => 0.2,
        };
    }

    match url {
        Some(u) if u.contains("maxresdefault") => 1.0,
        Some(u) if u.contains("sddefault") => 0.8,
        Some(u) if u.contains("hqdefault") => 0.6,
        Some(u) if u.contains("mqdefault") => 0.4,
        Some(u) if u.contains("default") => 0.2,
        _ => 0.5,
    }
}

/// Heuristic channel trust in `0.0 ..= 1.0`.
pub fn channel_score(channel: &str, artist: Option<&str>) -> f32 {
    let channel = channel.trim().to_lowercase();
    if channel.is_empty() {
        return 0.0;
    }
    if SPAM_CHANNEL_MARKERS.iter().any(|m| channel.contains(m)) {
        return 0.1;
    }
    // Canales auto-generados y oficiales
    if channel.ends_with(" - topic") || channel.contains("vevo") {
        return 1.0;
    }
    if let Some(artist) = artist {
        let artist = artist.trim().to_lowercase();
        if !artist.is_empty() && channel.contains(&artist) {
            return 0.9;
        }
    }
    if channel.contains("official") || channel.contains("records") {
        return 0.8;
    }
    0.5
}

/// Thresholds plus the per-request context used for relevance.
#[derive(Debug, Clone)]
pub struct FilterCriteria {
    pub promo_pattern: Regex,
    pub min_channel_score: f32,
    pub min_quality_score: f32,
    pub min_duration_sec: u32,
    pub max_duration_sec: u32,
    pub allow_live: bool,
    /// Lower-cased words expected in a good title
    pub query_terms: Vec<String>,
    pub artist: Option<String>,
    pub target_duration_sec: Option<u32>,
}

impl Default for FilterCriteria {
    fn default() -> Self {
        Self {
            promo_pattern: DEFAULT_PROMO.clone(),
            min_channel_score: 0.2,
            min_quality_score: 0.3,
            min_duration_sec: 60,
            max_duration_sec: 10 * 60 * 60,
            allow_live: false,
            query_terms: Vec::new(),
            artist: None,
            target_duration_sec: None,
        }
    }
}

impl FilterCriteria {
    /// Replaces the promotional-content pattern.
    pub fn with_promo_pattern(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.promo_pattern = Regex::new(pattern)?;
        Ok(self)
    }

    /// Sets the relevance context for one item.
    pub fn for_item(
        mut self,
        query: &str,
        artist: Option<&str>,
        target_duration_sec: Option<u32>,
    ) -> Self {
        self.query_terms = tokenize(query);
        self.artist = artist.map(str::to_string);
        self.target_duration_sec = target_duration_sec;
        self
    }
}

/// Why a candidate was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    Promotional,
    LowChannelQuality,
    LowQuality,
    BadDuration,
    LiveStream,
    NotEmbeddable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    /// Position in the provider's result list, 0 = first
    pub rank: usize,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub candidate: Candidate,
    pub rank: usize,
    pub reasons: Vec<RejectReason>,
}

impl Rejection {
    fn only_embedding(&self) -> bool {
        self.reasons == [RejectReason::NotEmbeddable]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    /// Best first
    pub accepted: Vec<ScoredCandidate>,
    pub rejected: Vec<Rejection>,
    /// True only if something was rejected and every rejection was caused
    /// by embeddability alone.
    pub all_rejected_for_embedding: bool,
}

impl FilterOutcome {
    pub fn best(&self) -> Option<&ScoredCandidate> {
        self.accepted.first()
    }

    /// Moves an accepted candidate to the rejected list after a failed
    /// embeddability check.
    pub fn reject_for_embedding(&mut self, id: &str, reason: Option<String>) -> bool {
        let Some(pos) = self.accepted.iter().position(|s| s.candidate.id == id) else {
            return false;
        };
        let scored = self.accepted.remove(pos);
        let mut candidate = scored.candidate;
        candidate.embeddable = false;
        candidate.restriction_reason = reason.or(candidate.restriction_reason);

        self.rejected.push(Rejection {
            candidate,
            rank: scored.rank,
            reasons: vec![RejectReason::NotEmbeddable],
        });
        self.all_rejected_for_embedding = all_only_embedding(&self.rejected);
        true
    }
}

/// Filters and ranks `candidates` (in provider order) against `criteria`.
pub fn filter_candidates(candidates: Vec<Candidate>, criteria: &FilterCriteria) -> FilterOutcome {
    let total = candidates.len();
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();

    for (rank, candidate) in candidates.into_iter().enumerate() {
        let channel = channel_score(&candidate.channel, criteria.artist.as_deref());
        let reasons = rejection_reasons(&candidate, channel, criteria);

        if reasons.is_empty() {
            let score = score(&candidate, channel, rank, total, criteria);
            accepted.push(ScoredCandidate {
                candidate,
                rank,
                score,
            });
        } else {
            rejected.push(Rejection {
                candidate,
                rank,
                reasons,
            });
        }
    }

    accepted.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.rank.cmp(&b.rank)));
    let all_rejected_for_embedding = all_only_embedding(&rejected);

    FilterOutcome {
        accepted,
        rejected,
        all_rejected_for_embedding,
    }
}

fn all_only_embedding(rejected: &[Rejection]) -> bool {
    !rejected.is_empty() && rejected.iter().all(Rejection::only_embedding)
}

fn rejection_reasons(candidate: &Candidate, channel: f32, criteria: &FilterCriteria) -> Vec<RejectReason> {
    let mut reasons = Vec::new();

    if criteria.promo_pattern.is_match(&candidate.title) {
        reasons.push(RejectReason::Promotional);
    }
    if channel < criteria.min_channel_score {
        reasons.push(RejectReason::LowChannelQuality);
    }
    if candidate.quality_score.is_nan() || candidate.quality_score < criteria.min_quality_score {
        reasons.push(RejectReason::LowQuality);
    }
    if candidate.is_live && !criteria.allow_live {
        reasons.push(RejectReason::LiveStream);
    }
    if let Some(duration) = candidate.duration_sec {
        if duration < criteria.min_duration_sec || duration > criteria.max_duration_sec {
            reasons.push(RejectReason::BadDuration);
        }
    }
    if !candidate.embeddable {
        reasons.push(RejectReason::NotEmbeddable);
    }

    reasons
}

fn score(candidate: &Candidate, channel: f32, rank: usize, total: usize, criteria: &FilterCriteria) -> f64 {
    // Relevancia por posición: el primero vale 1.0
    let rank_relevance = if total > 0 {
        1.0 - rank as f64 / total as f64
    } else {
        0.0
    };

    let mut score = W_QUALITY * f64::from(candidate.quality_score)
        + W_CHANNEL * f64::from(channel)
        + W_RANK * rank_relevance;

    if !criteria.query_terms.is_empty() {
        score += W_TITLE * title_match(&candidate.title, &criteria.query_terms);
    }
    if let (Some(target), Some(actual)) = (criteria.target_duration_sec, candidate.duration_sec) {
        score += W_DURATION * duration_match(target, actual);
    }

    score
}

/// Share of query terms present in the title.
fn title_match(title: &str, terms: &[String]) -> f64 {
    let title_terms = tokenize(title);
    let hits = terms.iter().filter(|t| title_terms.contains(t)).count();
    hits as f64 / terms.len() as f64
}

/// 1.0 within 5% of the expected length, falling to 0.0 at 50% off.
fn duration_match(target: u32, actual: u32) -> f64 {
    if target == 0 {
        return 0.0;
    }
    let diff = (f64::from(actual) - f64::from(target)).abs() / f64::from(target);
    if diff <= 0.05 {
        1.0
    } else if diff >= 0.5 {
        0.0
    } else {
        1.0 - (diff - 0.05) / 0.45
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn candidate(id: &str) -> Candidate {
        Candidate {
            id: id.to_string(),
            title: "Queen - Bohemian Rhapsody (Official Video)".to_string(),
            channel: "Queen Official".to_string(),
            thumbnail_url: Some(format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", id)),
            duration_sec: Some(359),
            quality_score: 0.8,
            embeddable: true,
            restriction_reason: None,
            is_live: false,
        }
    }

    fn not_embeddable(id: &str) -> Candidate {
        Candidate {
            embeddable: false,
            restriction_reason: Some("Embedding disabled by owner".to_string()),
            ..candidate(id)
        }
    }

    fn ids(outcome: &FilterOutcome) -> Vec<&str> {
        outcome.accepted.iter().map(|s| s.candidate.id.as_str()).collect()
    }

    #[test]
    fn test_all_non_embeddable_sets_flag() {
        let outcome = filter_candidates(
            vec![not_embeddable("a"), not_embeddable("b"), not_embeddable("c")],
            &FilterCriteria::default(),
        );

        assert!(outcome.accepted.is_empty());
        assert!(outcome.all_rejected_for_embedding);
    }

    #[test]
    fn test_mixed_rejections_clear_flag() {
        let promo = Candidate {
            title: "Bohemian Rhapsody trailer".to_string(),
            ..candidate("p")
        };
        let outcome = filter_candidates(vec![not_embeddable("a"), promo], &FilterCriteria::default());

        assert!(outcome.accepted.is_empty());
        assert!(!outcome.all_rejected_for_embedding);
    }

    #[test]
    fn test_embedding_plus_other_cause_is_not_embedding_only() {
        let bad = Candidate {
            quality_score: 0.1,
            ..not_embeddable("a")
        };
        let outcome = filter_candidates(vec![bad], &FilterCriteria::default());

        assert_eq!(
            outcome.rejected[0].reasons,
            vec![RejectReason::LowQuality, RejectReason::NotEmbeddable]
        );
        assert!(!outcome.all_rejected_for_embedding);
    }

    #[test]
    fn test_empty_input() {
        let outcome = filter_candidates(Vec::new(), &FilterCriteria::default());
        assert!(outcome.accepted.is_empty());
        assert!(!outcome.all_rejected_for_embedding);
    }

    #[test]
    fn test_promotional_titles_rejected() {
        let criteria = FilterCriteria::default();
        for title in ["Get 50% discount now", "Album TEASER", "#ad new single", "Sponsored: music"] {
            let c = Candidate {
                title: title.to_string(),
                ..candidate("x")
            };
            let outcome = filter_candidates(vec![c], &criteria);
            assert_eq!(outcome.rejected[0].reasons, vec![RejectReason::Promotional], "{}", title);
        }
    }

    #[test]
    fn test_custom_promo_pattern() {
        let criteria = FilterCriteria::default()
            .with_promo_pattern(r"(?i)\breaction\b")
            .unwrap();
        let c = Candidate {
            title: "First time REACTION".to_string(),
            ..candidate("x")
        };
        assert!(filter_candidates(vec![c], &criteria).accepted.is_empty());
        assert!(FilterCriteria::default().with_promo_pattern("(").is_err());
    }

    #[test]
    fn test_earlier_rank_wins_when_otherwise_equal() {
        let outcome = filter_candidates(
            vec![candidate("first"), candidate("second")],
            &FilterCriteria::default(),
        );
        assert_eq!(ids(&outcome), vec!["first", "second"]);
    }

    #[test]
    fn test_quality_outweighs_small_rank_gap() {
        let low = Candidate {
            quality_score: 0.4,
            ..candidate("low")
        };
        let high = Candidate {
            quality_score: 1.0,
            ..candidate("high")
        };
        let outcome = filter_candidates(vec![low, high], &FilterCriteria::default());
        assert_eq!(ids(&outcome), vec!["high", "low"]);
    }

    #[test]
    fn test_duration_match_boosts_candidate() {
        let criteria = FilterCriteria::default().for_item("queen bohemian rhapsody", Some("Queen"), Some(355));
        let long = Candidate {
            duration_sec: Some(600),
            ..candidate("extended")
        };
        let exact = candidate("exact");

        let outcome = filter_candidates(vec![long, exact], &criteria);
        assert_eq!(ids(&outcome), vec!["exact", "extended"]);
    }

    #[test]
    fn test_live_and_duration_limits() {
        let live = Candidate {
            is_live: true,
            duration_sec: None,
            ..candidate("live")
        };
        let short = Candidate {
            duration_sec: Some(15),
            ..candidate("short")
        };
        let outcome = filter_candidates(vec![live, short], &FilterCriteria::default());

        assert_eq!(outcome.rejected[0].reasons, vec![RejectReason::LiveStream]);
        assert_eq!(outcome.rejected[1].reasons, vec![RejectReason::BadDuration]);
    }

    #[test]
    fn test_channel_scores() {
        assert_eq!(channel_score("Queen - Topic", None), 1.0);
        assert_eq!(channel_score("QueenVEVO", None), 1.0);
        assert_eq!(channel_score("Queen", Some("queen")), 0.9);
        assert_eq!(channel_score("Free Download MP3s", None), 0.1);
        assert_eq!(channel_score("", None), 0.0);
        assert_eq!(channel_score("random uploader", None), 0.5);
    }

    #[test]
    fn test_low_channel_rejected() {
        let c = Candidate {
            channel: String::new(),
            ..candidate("anon")
        };
        let outcome = filter_candidates(vec![c], &FilterCriteria::default());
        assert_eq!(outcome.rejected[0].reasons, vec![RejectReason::LowChannelQuality]);
    }

    #[test]
    fn test_reject_for_embedding_updates_flag() {
        let mut outcome = filter_candidates(vec![candidate("a")], &FilterCriteria::default());
        assert!(!outcome.all_rejected_for_embedding);

        assert!(outcome.reject_for_embedding("a", Some("blocked".into())));
        assert!(outcome.accepted.is_empty());
        assert!(outcome.all_rejected_for_embedding);
        assert_eq!(outcome.rejected[0].candidate.restriction_reason.as_deref(), Some("blocked"));
        assert!(!outcome.reject_for_embedding("a", None));
    }

    #[test]
    fn test_raw_candidate_normalization() {
        let raw = RawCandidate {
            id: "abc".into(),
            title: "Song".into(),
            thumbnail_height: Some(480),
            ..Default::default()
        };
        let c = Candidate::from(raw);
        assert_eq!(c.quality_score, 0.8);
        assert!(c.embeddable);
        assert_eq!(c.channel, "");

        assert_eq!(quality_from_thumbnail(None, Some("https://i.ytimg.com/vi/x/maxresdefault.jpg")), 1.0);
        assert_eq!(quality_from_thumbnail(None, None), 0.5);
    }

    #[test]
    fn test_non_finite_provider_quality_falls_back_to_thumbnail() {
        let raw = RawCandidate {
            id: "nan".into(),
            title: "Song".into(),
            channel: Some("random".into()),
            thumbnail_height: Some(180),
            quality_score: Some(f32::NAN),
            ..Default::default()
        };
        assert_eq!(Candidate::from(raw).quality_score, 0.4);

        let raw = RawCandidate {
            id: "inf".into(),
            quality_score: Some(f32::INFINITY),
            ..Default::default()
        };
        assert_eq!(Candidate::from(raw).quality_score, 0.5);
    }

    #[test]
    fn test_nan_quality_is_rejected_and_never_ranks_first() {
        let good = Candidate {
            channel: "Queen - Topic".to_string(),
            quality_score: 1.0,
            ..candidate("good")
        };
        let junk = Candidate {
            channel: "random".to_string(),
            quality_score: f32::NAN,
            ..candidate("nan")
        };

        let outcome = filter_candidates(vec![good, junk], &FilterCriteria::default());

        assert_eq!(ids(&outcome), vec!["good"]);
        assert_eq!(outcome.rejected[0].candidate.id, "nan");
        assert_eq!(outcome.rejected[0].reasons, vec![RejectReason::LowQuality]);
        assert!(outcome.accepted.iter().all(|s| s.score.is_finite()));
    }

    #[test]
    fn test_candidate_urls() {
        let c = candidate("dQw4w9WgXcQ");
        assert_eq!(
            c.watch_url().unwrap().as_str(),
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        );
        assert_eq!(
            c.embed_url().unwrap().as_str(),
            "https://www.youtube-nocookie.com/embed/dQw4w9WgXcQ"
        );
    }
}
