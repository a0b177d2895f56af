//! Unified configuration for alertdash.
//!
//! Configuration is loaded with precedence: CLI args > Env vars > Config file > Defaults
//!
//! # Example config file (alertdash.toml)
//! ```toml
//! [storage]
//! data_dir = "/var/lib/alertdash"
//!
//! [buckets]
//! bucket_size = 5000
//! priorities = ["High", "Critical"]
//!
//! [generator]
//! count = 1000000
//! seed = 42
//! ```

mod defaults;

pub use defaults::*;

use crate::model::Priority;
use crate::pipeline::AlertFilter;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU64;
use std::path::PathBuf;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DashConfig {
    /// Persistent store location and tuning
    pub storage: StorageConfig,
    /// Priority bucket view
    pub buckets: BucketConfig,
    /// Single-document priority summary view
    pub summary: SummaryConfig,
    /// Most-recent-alerts view
    pub recent: RecentConfig,
    /// Synthetic alert generation
    pub generator: GeneratorConfig,
}

impl DashConfig {
    /// Load configuration with precedence: CLI args > Env > File > Defaults
    ///
    /// # Arguments
    /// * `config_path` - Optional path to TOML config file
    /// * `overrides` - CLI overrides to apply on top
    pub fn load(
        config_path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(DashConfig::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Nested keys are split on `__` so field names keep their underscores,
        // e.g. ALERTDASH_BUCKETS__BUCKET_SIZE
        figment = figment.merge(Env::prefixed("ALERTDASH_").split("__"));

        figment = figment.merge(Serialized::defaults(overrides));

        let config: DashConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment and optional config file only (no CLI overrides)
    pub fn from_env(config_path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.buckets.bucket_size()?;
        if self.buckets.id_prefix.is_empty() {
            return Err(ConfigError::new("buckets.id_prefix must not be empty"));
        }
        if self.buckets.priorities.is_empty() {
            return Err(ConfigError::new("buckets.priorities must not be empty"));
        }
        if self.recent.limit == 0 {
            return Err(ConfigError::new("recent.limit must be at least 1"));
        }
        if self.summary.id.starts_with(&self.buckets.id_prefix)
            || self.recent.id.starts_with(&self.buckets.id_prefix)
        {
            return Err(ConfigError::new(
                "summary and recent ids must not share the bucket id prefix",
            ));
        }
        self.generator.validate()
    }
}

/// Persistent store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,
    /// Dashboard document read cache capacity
    pub cache_capacity: usize,
    /// Run repair on startup
    pub repair: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            repair: false,
        }
    }
}

/// Priority bucket view configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    /// Alerts per bucket (must be non-zero)
    pub bucket_size: u64,
    /// Bucket document id prefix
    pub id_prefix: String,
    /// Priorities included in the view
    pub priorities: Vec<Priority>,
    /// Delete bucket documents the latest run did not produce
    pub prune_stale: bool,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            bucket_size: DEFAULT_BUCKET_SIZE,
            id_prefix: DEFAULT_BUCKET_PREFIX.to_string(),
            priorities: default_priorities(),
            prune_stale: true,
        }
    }
}

impl BucketConfig {
    pub fn bucket_size(&self) -> Result<NonZeroU64, ConfigError> {
        NonZeroU64::new(self.bucket_size)
            .ok_or_else(|| ConfigError::new("buckets.bucket_size must be at least 1"))
    }

    /// Uncleared alerts with one of the configured priorities.
    pub fn filter(&self) -> AlertFilter {
        AlertFilter::open_with_priorities(self.priorities.clone())
    }
}

/// Priority summary view configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub id: String,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            id: DEFAULT_SUMMARY_ID.to_string(),
        }
    }
}

/// Most-recent-alerts view configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecentConfig {
    pub id: String,
    pub limit: usize,
}

impl Default for RecentConfig {
    fn default() -> Self {
        Self {
            id: DEFAULT_RECENT_ID.to_string(),
            limit: DEFAULT_RECENT_LIMIT,
        }
    }
}

/// Synthetic alert generation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub count: u64,
    pub batch_size: usize,
    pub window_days: u32,
    pub cleared_probability: f64,
    pub weights: PriorityWeights,
    /// Fixed RNG seed; unset means seeded from the OS
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            count: DEFAULT_GENERATOR_COUNT,
            batch_size: DEFAULT_GENERATOR_BATCH_SIZE,
            window_days: DEFAULT_WINDOW_DAYS,
            cleared_probability: DEFAULT_CLEARED_PROBABILITY,
            weights: PriorityWeights::default(),
            seed: None,
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::new("generator.batch_size must be at least 1"));
        }
        if self.window_days > MAX_WINDOW_DAYS {
            return Err(ConfigError::new(format!(
                "generator.window_days must be at most {MAX_WINDOW_DAYS}"
            )));
        }
        if !(0.0..=1.0).contains(&self.cleared_probability) {
            return Err(ConfigError::new(
                "generator.cleared_probability must be within [0, 1]",
            ));
        }
        self.weights.validate()
    }
}

/// Relative weights of each priority in generated data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityWeights {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            low: DEFAULT_WEIGHT_LOW,
            medium: DEFAULT_WEIGHT_MEDIUM,
            high: DEFAULT_WEIGHT_HIGH,
            critical: DEFAULT_WEIGHT_CRITICAL,
        }
    }
}

impl PriorityWeights {
    pub fn total(&self) -> f64 {
        self.low + self.medium + self.high + self.critical
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let weights = [self.low, self.medium, self.high, self.critical];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::new(
                "generator.weights must be finite and non-negative",
            ));
        }
        if self.total() <= 0.0 {
            return Err(ConfigError::new("generator.weights must not all be zero"));
        }
        Ok(())
    }

    /// Map a uniform sample in `[0, 1)` onto a priority using cumulative
    /// thresholds in Low, Medium, High, Critical order.
    pub fn pick(&self, sample: f64) -> Priority {
        let point = sample * self.total();
        let mut threshold = self.low;
        if point < threshold {
            return Priority::Low;
        }
        threshold += self.medium;
        if point < threshold {
            return Priority::Medium;
        }
        threshold += self.high;
        if point < threshold {
            return Priority::High;
        }
        Priority::Critical
    }
}

/// CLI overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buckets: Option<BucketOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator: Option<GeneratorOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_size: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}
