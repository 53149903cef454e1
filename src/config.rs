use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::CacheSettings;
use crate::discovery::DiscoveryOptions;
use crate::filter::FilterCriteria;

/// Upper bound for any cache TTL
const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Cache
    pub metadata_ttl: Duration,
    pub status_ttl: Duration,
    pub cache_cleanup_interval: Duration,
    pub cache_max_size: usize,
    pub cache_persistence: bool,

    // Paths
    pub data_dir: PathBuf,

    // Discovery
    pub search_timeout: Duration,
    pub verify_embeddable: bool,

    // Filtro
    pub min_quality_score: f32,
    pub min_channel_score: f32,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| -> String {
            match lookup(key) {
                Some(val) if !val.trim().is_empty() => val.trim().to_string(),
                _ => default.to_string(),
            }
        };
        let duration = |key: &str, default: &str| -> Result<Duration> {
            humantime::parse_duration(&var(key, default))
                .with_context(|| format!("{} is not a valid duration", key))
        };

        let config = Self {
            // Cache
            metadata_ttl: duration("METADATA_TTL", "10m")?,
            status_ttl: duration("STATUS_TTL", "5m")?,
            cache_cleanup_interval: duration("CACHE_CLEANUP_INTERVAL", "1m")?,
            cache_max_size: var("CACHE_MAX_SIZE", "500")
                .parse()
                .context("CACHE_MAX_SIZE")?,
            cache_persistence: var("CACHE_PERSISTENCE", "true")
                .parse()
                .context("CACHE_PERSISTENCE")?,

            // Paths
            data_dir: var("DATA_DIR", "./data").into(),

            // Discovery
            search_timeout: duration("SEARCH_TIMEOUT", "10s")?,
            verify_embeddable: var("VERIFY_EMBEDDABLE", "false")
                .parse()
                .context("VERIFY_EMBEDDABLE")?,

            // Filtro
            min_quality_score: var("MIN_QUALITY_SCORE", "0.3")
                .parse()
                .context("MIN_QUALITY_SCORE")?,
            min_channel_score: var("MIN_CHANNEL_SCORE", "0.2")
                .parse()
                .context("MIN_CHANNEL_SCORE")?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Cache size and every TTL/interval must be greater than zero
    /// - No TTL may exceed one year
    /// - The status TTL may not outlive the metadata TTL
    /// - Filter thresholds must be within `0.0..=1.0`
    pub fn validate(&self) -> Result<()> {
        if self.cache_max_size == 0 {
            anyhow::bail!("Cache max size must be greater than 0");
        }

        if self.metadata_ttl.is_zero() || self.status_ttl.is_zero() {
            anyhow::bail!("Cache TTLs must be greater than 0");
        }

        if self.metadata_ttl > MAX_TTL {
            anyhow::bail!(
                "Metadata TTL cannot exceed {}, got: {}",
                humantime::format_duration(MAX_TTL),
                humantime::format_duration(self.metadata_ttl)
            );
        }

        if self.status_ttl > self.metadata_ttl {
            anyhow::bail!(
                "Status TTL ({}) cannot exceed metadata TTL ({})",
                humantime::format_duration(self.status_ttl),
                humantime::format_duration(self.metadata_ttl)
            );
        }

        if self.cache_cleanup_interval.is_zero() {
            anyhow::bail!("Cache cleanup interval must be greater than 0");
        }

        if self.search_timeout.is_zero() {
            anyhow::bail!("Search timeout must be greater than 0");
        }

        for (name, value) in [
            ("Min quality score", self.min_quality_score),
            ("Min channel score", self.min_channel_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{} must be between 0.0 and 1.0, got: {}", name, value);
            }
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Cache: {} entries, metadata TTL {}, status TTL {}, sweep every {}, persistence={}\n  \
            Data dir: {}\n  \
            Discovery: timeout {}, verify embeddable={}\n  \
            Filter: min quality {:.2}, min channel {:.2}",
            self.cache_max_size,
            humantime::format_duration(self.metadata_ttl),
            humantime::format_duration(self.status_ttl),
            humantime::format_duration(self.cache_cleanup_interval),
            self.cache_persistence,
            self.data_dir.display(),
            humantime::format_duration(self.search_timeout),
            self.verify_embeddable,
            self.min_quality_score,
            self.min_channel_score,
        )
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            max_size: self.cache_max_size,
            metadata_ttl: self.metadata_ttl,
            status_ttl: self.status_ttl,
            persistence: self.cache_persistence,
        }
    }

    pub fn filter_criteria(&self) -> FilterCriteria {
        FilterCriteria {
            min_quality_score: self.min_quality_score,
            min_channel_score: self.min_channel_score,
            ..FilterCriteria::default()
        }
    }

    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            verify_embeddable: self.verify_embeddable,
            search_timeout: self.search_timeout,
        }
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Cache defaults
            metadata_ttl: Duration::from_secs(10 * 60),
            status_ttl: Duration::from_secs(5 * 60),
            cache_cleanup_interval: Duration::from_secs(60),
            cache_max_size: 500,
            cache_persistence: true,

            // Path defaults
            data_dir: "./data".into(),

            // Discovery defaults
            search_timeout: Duration::from_secs(10),
            verify_embeddable: false,

            // Filter defaults
            min_quality_score: 0.3,
            min_channel_score: 0.2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_default_impl() {
        let loaded = Config::from_lookup(lookup(&[])).unwrap();
        let default = Config::default();

        assert_eq!(loaded.metadata_ttl, default.metadata_ttl);
        assert_eq!(loaded.status_ttl, default.status_ttl);
        assert_eq!(loaded.cache_max_size, 500);
        assert_eq!(loaded.search_timeout, Duration::from_secs(10));
        assert!(loaded.cache_persistence);
        assert!(!loaded.verify_embeddable);
        assert_eq!(loaded.data_dir, PathBuf::from("./data"));
    }

    #[test]
    fn test_humantime_durations() {
        let config = Config::from_lookup(lookup(&[
            ("METADATA_TTL", "1h 30m"),
            ("STATUS_TTL", "90s"),
            ("SEARCH_TIMEOUT", "2500ms"),
        ]))
        .unwrap();

        assert_eq!(config.metadata_ttl, Duration::from_secs(90 * 60));
        assert_eq!(config.status_ttl, Duration::from_secs(90));
        assert_eq!(config.search_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = Config::from_lookup(lookup(&[("CACHE_MAX_SIZE", "  ")])).unwrap();
        assert_eq!(config.cache_max_size, 500);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(Config::from_lookup(lookup(&[("METADATA_TTL", "soon")])).is_err());
        assert!(Config::from_lookup(lookup(&[("CACHE_MAX_SIZE", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("MIN_QUALITY_SCORE", "1.5")])).is_err());
        assert!(Config::from_lookup(lookup(&[("STATUS_TTL", "20m")])).is_err());
        assert!(Config::from_lookup(lookup(&[("VERIFY_EMBEDDABLE", "maybe")])).is_err());
    }

    #[test]
    fn test_ttl_above_one_year_is_rejected() {
        assert!(Config::from_lookup(lookup(&[("METADATA_TTL", "290000years")])).is_err());
        assert!(Config::from_lookup(lookup(&[("METADATA_TTL", "366days")])).is_err());
        assert!(Config::from_lookup(lookup(&[("METADATA_TTL", "365days")])).is_ok());
    }

    #[test]
    fn test_derived_settings() {
        let config = Config {
            cache_max_size: 42,
            verify_embeddable: true,
            min_quality_score: 0.5,
            ..Config::default()
        };

        let cache = config.cache_settings();
        assert_eq!(cache.max_size, 42);
        assert_eq!(cache.status_ttl, Duration::from_secs(300));

        let criteria = config.filter_criteria();
        assert_eq!(criteria.min_quality_score, 0.5);
        assert_eq!(criteria.min_channel_score, 0.2);

        assert!(config.discovery_options().verify_embeddable);
    }

    #[test]
    fn test_summary_mentions_ttls() {
        let summary = Config::default().summary();
        assert!(summary.contains("metadata TTL 10m"));
        assert!(summary.contains("status TTL 5m"));
    }
}
