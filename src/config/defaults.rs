//! Default constants for alertdash configuration.
//!
//! All magic numbers are centralized here with documentation.

use crate::model::Priority;

// =============================================================================
// Storage Defaults (RocksDB)
// =============================================================================

/// Default data directory for the persistent store
pub const DEFAULT_DATA_DIR: &str = "./alertdash_data";

/// Default number of dashboard documents kept in the read cache
pub const DEFAULT_CACHE_CAPACITY: usize = crate::persistence::DEFAULT_CACHE_CAPACITY;

// =============================================================================
// Priority Bucket Defaults
// =============================================================================

/// Number of alerts per priority bucket.
/// One bucket is what the dashboard loads per page.
pub const DEFAULT_BUCKET_SIZE: u64 = 5000;

/// Id prefix of priority bucket documents; the bucket number follows it.
pub const DEFAULT_BUCKET_PREFIX: &str = "priority_bucket_";

/// Priorities that qualify an uncleared alert for the priority views
pub fn default_priorities() -> Vec<Priority> {
    vec![Priority::High, Priority::Critical]
}

// =============================================================================
// Summary View Defaults
// =============================================================================

/// Id of the single document holding every open high-priority alert
pub const DEFAULT_SUMMARY_ID: &str = "priority";

/// Id of the most-recent-alerts document
pub const DEFAULT_RECENT_ID: &str = "top25";

/// Number of alerts kept in the most-recent-alerts document
pub const DEFAULT_RECENT_LIMIT: usize = 25;

// =============================================================================
// Generator Defaults
// =============================================================================

/// Number of alerts produced by a seeding run
pub const DEFAULT_GENERATOR_COUNT: u64 = 5_000_000;

/// Alerts written per insert batch
pub const DEFAULT_GENERATOR_BATCH_SIZE: usize = 50_000;

/// `createdAt` is drawn uniformly from this many days before now
pub const DEFAULT_WINDOW_DAYS: u32 = 365;

/// Largest accepted window. Keeps `now - window` inside the year range
/// `time` can represent (about 9999 years back from the present).
pub const MAX_WINDOW_DAYS: u32 = 3_000_000;

/// Probability that a generated alert is already cleared
pub const DEFAULT_CLEARED_PROBABILITY: f64 = 0.8;

/// Relative priority weights (Low, Medium, High, Critical), in percent
pub const DEFAULT_WEIGHT_LOW: f64 = 70.0;
pub const DEFAULT_WEIGHT_MEDIUM: f64 = 20.0;
pub const DEFAULT_WEIGHT_HIGH: f64 = 9.9;
pub const DEFAULT_WEIGHT_CRITICAL: f64 = 0.1;
