//! Run configuration: a TOML file, then `FOLIO_*` environment overrides.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Days, NaiveDate, Utc};
use folio_fetch::{CircuitConfig, DownloadOptions, RetryPolicy, SourceName, floor_for};
use folio_verify::{FileKind, IntegrityPolicy};
use serde::Deserialize;
use thiserror::Error;

use crate::logging::LogFormat;
use crate::source::Query;

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {var}")]
    Env { var: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryConfig {
    pub categories:  Vec<String>,
    pub keywords:    Vec<String>,
    /// `YYYY-MM-DD`, inclusive.
    pub date_from:   Option<String>,
    /// `YYYY-MM-DD`, inclusive.
    pub date_to:     Option<String>,
    /// Window start relative to today (UTC) when `date_from` is unset.
    pub days_back:   Option<u32>,
    pub max_results: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            categories:  vec!["cs.AI".to_string()],
            keywords:    Vec::new(),
            date_from:   None,
            date_to:     None,
            days_back:   None,
            max_results: 100,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub base_path:   PathBuf,
    pub max_bytes:   u64,
    /// Defaults to `<base_path>/.staging`.
    pub staging_dir: Option<PathBuf>,
    pub records_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path:   PathBuf::from("data/papers"),
            max_bytes:   300 * GIB,
            staging_dir: None,
            records_dir: PathBuf::from("data/records"),
        }
    }
}

impl StorageConfig {
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| self.base_path.join(".staging"))
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownloadConfig {
    pub max_concurrent:         usize,
    pub request_timeout_secs:   u64,
    pub max_retries:            u32,
    pub retry_base_ms:          u64,
    pub retry_max_ms:           u64,
    pub jitter_percent:         u32,
    pub default_estimate_bytes: u64,
    pub min_file_bytes:         u64,
    pub user_agent:             String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent:         5,
            request_timeout_secs:   30,
            max_retries:            3,
            retry_base_ms:          1_000,
            retry_max_ms:           60_000,
            jitter_percent:         10,
            default_estimate_bytes: 10 * 1024 * 1024,
            min_file_bytes:         1,
            user_agent:             "folio/0.1 (academic research)".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckpointConfig {
    pub dir:        PathBuf,
    /// Committed items between checkpoint writes.
    pub batch_size: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir:        PathBuf::from("data/checkpoints"),
            batch_size: 100,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Bound of the discovery-to-download queue.
    pub queue_capacity:    usize,
    pub max_circuit_waits: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity:    64,
            max_circuit_waits: 3,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level:  String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level:  "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Per-source overrides. Unset fields fall back to the source's floor and
/// the circuit defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    pub rate_interval_ms:  Option<u64>,
    pub failure_threshold: Option<u32>,
    pub cooldown_secs:     Option<u64>,
    pub max_cooldown_secs: Option<u64>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    pub query:      QueryConfig,
    pub storage:    StorageConfig,
    pub download:   DownloadConfig,
    pub checkpoint: CheckpointConfig,
    pub pipeline:   PipelineConfig,
    pub logging:    LoggingConfig,
    pub sources:    BTreeMap<String, SourceConfig>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let at = |ms| SourceConfig {
            rate_interval_ms: Some(ms),
            ..SourceConfig::default()
        };
        Self {
            query:      QueryConfig::default(),
            storage:    StorageConfig::default(),
            download:   DownloadConfig::default(),
            checkpoint: CheckpointConfig::default(),
            pipeline:   PipelineConfig::default(),
            logging:    LoggingConfig::default(),
            sources:    BTreeMap::from([
                ("arxiv".to_string(), at(3_000)),
                ("arxiv-pdf".to_string(), at(1_000)),
            ]),
        }
    }
}

fn parse_date(field: &str, text: &str) -> Result<NaiveDate, ConfigError> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
        .map_err(|e| ConfigError::Invalid(format!("query.{field} {text:?}: {e}")))
}

fn env_number<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { var, value })
}

impl IngestConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> { Ok(toml::from_str(text)?) }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Applies overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|var| std::env::var(var).ok())
    }

    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("FOLIO_STORAGE_BASE_PATH") {
            self.storage.base_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("FOLIO_MAX_STORAGE_BYTES") {
            self.storage.max_bytes = env_number("FOLIO_MAX_STORAGE_BYTES", v)?;
        }
        if let Some(v) = lookup("FOLIO_MAX_CONCURRENT_DOWNLOADS") {
            self.download.max_concurrent = env_number("FOLIO_MAX_CONCURRENT_DOWNLOADS", v)?;
        }
        if let Some(v) = lookup("FOLIO_CHECKPOINT_BATCH_SIZE") {
            self.checkpoint.batch_size = env_number("FOLIO_CHECKPOINT_BATCH_SIZE", v)?;
        }
        if let Some(v) = lookup("FOLIO_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("FOLIO_USER_AGENT") {
            self.download.user_agent = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.download.max_concurrent == 0 {
            return invalid("download.max_concurrent must be at least 1");
        }
        if self.checkpoint.batch_size == 0 {
            return invalid("checkpoint.batch_size must be at least 1");
        }
        if self.pipeline.queue_capacity == 0 {
            return invalid("pipeline.queue_capacity must be at least 1");
        }
        if self.query.max_results == 0 {
            return invalid("query.max_results must be at least 1");
        }
        if self.storage.max_bytes == 0 {
            return invalid("storage.max_bytes must be positive");
        }
        if self.query.categories.is_empty() && self.query.keywords.is_empty() {
            return invalid("query needs at least one category or keyword");
        }
        if self.download.retry_base_ms > self.download.retry_max_ms {
            return invalid("download.retry_base_ms exceeds download.retry_max_ms");
        }

        let from = self
            .query
            .date_from
            .as_deref()
            .map(|d| parse_date("date_from", d))
            .transpose()?;
        let to = self
            .query
            .date_to
            .as_deref()
            .map(|d| parse_date("date_to", d))
            .transpose()?;
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return invalid("query.date_from is after query.date_to");
            }
        }
        Ok(())
    }

    /// Resolves the query window against `now`. A `days_back` window starts
    /// at UTC midnight, so the query (and its fingerprint) is stable for the
    /// whole day.
    pub fn query(&self, now: DateTime<Utc>) -> Result<Query, ConfigError> {
        let q = &self.query;
        let mut query = Query::new(q.categories.iter().cloned())
            .keywords(q.keywords.iter().cloned())
            .max_results(q.max_results);

        query.date_from = match (&q.date_from, q.days_back) {
            (Some(d), _) => parse_date("date_from", d)?
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc()),
            (None, Some(days)) => now
                .date_naive()
                .checked_sub_days(Days::new(u64::from(days)))
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc()),
            (None, None) => None,
        };
        query.date_to = match &q.date_to {
            Some(d) => parse_date("date_to", d)?
                .and_hms_opt(23, 59, 59)
                .map(|dt| dt.and_utc()),
            None => None,
        };
        Ok(query)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries:    self.download.max_retries,
            base_delay:     Duration::from_millis(self.download.retry_base_ms),
            max_delay:      Duration::from_millis(self.download.retry_max_ms),
            jitter_percent: self.download.jitter_percent,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.download.request_timeout_secs)
    }

    pub fn download_options(&self) -> DownloadOptions {
        DownloadOptions {
            concurrency:            self.download.max_concurrent,
            default_estimate_bytes: self.download.default_estimate_bytes,
            integrity:              IntegrityPolicy::new(FileKind::Pdf)
                .min_bytes(self.download.min_file_bytes),
            staging_dir:            self.storage.staging_dir(),
            request_timeout:        self.request_timeout(),
            retry:                  self.retry_policy(),
            max_circuit_waits:      self.pipeline.max_circuit_waits,
        }
    }

    /// Configured interval, or the source's floor when none is set.
    pub fn rate_interval(&self, source: &SourceName) -> Duration {
        self.sources
            .get(source.as_str())
            .and_then(|s| s.rate_interval_ms)
            .map(Duration::from_millis)
            .unwrap_or_else(|| floor_for(source))
    }

    pub fn circuit_config(&self, source: &SourceName) -> CircuitConfig {
        let mut config = CircuitConfig::default();
        if let Some(s) = self.sources.get(source.as_str()) {
            if let Some(threshold) = s.failure_threshold {
                config.failure_threshold = threshold;
            }
            if let Some(secs) = s.cooldown_secs {
                config.cooldown = Duration::from_secs(secs);
            }
            if let Some(secs) = s.max_cooldown_secs {
                config.max_cooldown = Duration::from_secs(secs);
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_documented_settings() {
        let config = IngestConfig::default();
        assert_eq!(config.download.max_concurrent, 5);
        assert_eq!(config.storage.max_bytes, 300 * GIB);
        assert_eq!(config.checkpoint.batch_size, 100);
        assert_eq!(config.rate_interval(&"arxiv".into()), Duration::from_secs(3));
        assert_eq!(config.rate_interval(&"arxiv-pdf".into()), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_config_parses() {
        let text = include_str!("../../../config/folio.example.toml");
        let config = IngestConfig::from_toml_str(text).unwrap();
        config.validate().unwrap();
        assert_eq!(config.query.categories, vec!["cs.AI", "cs.LG"]);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.circuit_config(&"arxiv".into()).failure_threshold, 3);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = IngestConfig::from_toml_str("[download]\nmax_concurrent = 2\n").unwrap();
        assert_eq!(config.download.max_concurrent, 2);
        assert_eq!(config.download.max_retries, 3);
        assert_eq!(config.pipeline.queue_capacity, 64);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(matches!(
            IngestConfig::from_toml_str("[download]\nmax_concurent = 2\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env = HashMap::from([
            ("FOLIO_MAX_STORAGE_BYTES", "2048"),
            ("FOLIO_MAX_CONCURRENT_DOWNLOADS", "8"),
            ("FOLIO_STORAGE_BASE_PATH", "/srv/papers"),
        ]);
        let mut config = IngestConfig::default();
        config
            .apply_env_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.storage.max_bytes, 2048);
        assert_eq!(config.download.max_concurrent, 8);
        assert_eq!(config.storage.staging_dir(), PathBuf::from("/srv/papers/.staging"));

        let err = config
            .apply_env_from(|k| (k == "FOLIO_CHECKPOINT_BATCH_SIZE").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: "FOLIO_CHECKPOINT_BATCH_SIZE", .. }));
    }

    #[test]
    fn test_validate_rejects_misconfiguration() {
        let mut config = IngestConfig::default();
        config.download.max_concurrent = 0;
        assert!(config.validate().is_err());

        let mut config = IngestConfig::default();
        config.query.date_from = Some("2025-08-06".into());
        config.query.date_to = Some("2025-08-01".into());
        assert!(config.validate().is_err());

        let mut config = IngestConfig::default();
        config.query.date_from = Some("last tuesday".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_days_back_is_stable_within_a_day() {
        let mut config = IngestConfig::default();
        config.query.days_back = Some(2);
        let morning = config
            .query(Utc.with_ymd_and_hms(2025, 8, 6, 1, 0, 0).unwrap())
            .unwrap();
        let evening = config
            .query(Utc.with_ymd_and_hms(2025, 8, 6, 23, 0, 0).unwrap())
            .unwrap();
        assert_eq!(morning.fingerprint(), evening.fingerprint());
        assert_eq!(
            morning.date_from,
            Some(Utc.with_ymd_and_hms(2025, 8, 4, 0, 0, 0).unwrap())
        );
        assert_eq!(morning.date_to, None);
    }
}
