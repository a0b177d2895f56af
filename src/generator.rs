//! # Generator Module
//!
//! Synthetic alerts for exercising the dashboard views. Time and randomness
//! are injected so seeded runs are reproducible.

use crate::config::{
    ConfigError, GeneratorConfig, PriorityWeights, DEFAULT_CLEARED_PROBABILITY,
    DEFAULT_WINDOW_DAYS,
};
use crate::model::Alert;
use crate::store::{AlertStore, DashboardStore};
use anyhow::Result;
use rand::Rng;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

/// Source of "now" for generated timestamps.
pub trait Clock {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub OffsetDateTime);

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.0
    }
}

/// Draws alerts from the configured distributions.
#[derive(Debug, Clone)]
pub struct AlertGenerator {
    weights: PriorityWeights,
    cleared_probability: f64,
    window: Duration,
}

impl Default for AlertGenerator {
    fn default() -> Self {
        Self {
            weights: PriorityWeights::default(),
            cleared_probability: DEFAULT_CLEARED_PROBABILITY,
            window: Duration::days(i64::from(DEFAULT_WINDOW_DAYS)),
        }
    }
}

impl AlertGenerator {
    /// Generator for a validated copy of `config`.
    pub fn from_config(config: &GeneratorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            weights: config.weights,
            cleared_probability: config.cleared_probability,
            window: Duration::days(i64::from(config.window_days)),
        })
    }

    /// Uniform instant in `[now - window, now]`.
    pub fn created_at<R: Rng + ?Sized>(&self, rng: &mut R, now: OffsetDateTime) -> OffsetDateTime {
        let past = now - self.window;
        let fraction: f64 = rng.random();
        past + self.window * fraction
    }

    /// One alert named `Alert {number}`.
    pub fn alert<R: Rng + ?Sized>(&self, rng: &mut R, now: OffsetDateTime, number: u64) -> Alert {
        let priority = self.weights.pick(rng.random());
        let created_at = self.created_at(rng, now);
        let cleared = rng.random_bool(self.cleared_probability);
        Alert::new(format!("Alert {number}"), priority, created_at, cleared)
    }

    /// `count` alerts numbered from `first_number`.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        clock: &dyn Clock,
        first_number: u64,
        count: usize,
    ) -> Vec<Alert> {
        let now = clock.now();
        (0..count as u64)
            .map(|offset| self.alert(rng, now, first_number + offset))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub inserted: u64,
    pub batches: usize,
}

/// Generate `config.count` alerts and write them in batches of
/// `config.batch_size`. Names continue from the alerts already in the store,
/// so seeding an empty store starts at `Alert 1`.
///
/// All alerts of one run share the same "now".
pub fn seed_alerts<R: Rng + ?Sized>(
    store: &mut dyn AlertStore,
    config: &GeneratorConfig,
    rng: &mut R,
    clock: &dyn Clock,
) -> Result<SeedReport> {
    let generator = AlertGenerator::from_config(config)?;
    let now = clock.now();
    let batch_size = config.batch_size as u64;

    let mut report = SeedReport::default();
    let mut next = store.alert_count() as u64 + 1;
    while report.inserted < config.count {
        let remaining = config.count - report.inserted;
        let count = batch_size.min(remaining);
        let batch: Vec<Alert> = (next..next + count)
            .map(|number| generator.alert(rng, now, number))
            .collect();
        store.insert_alerts(&batch)?;
        report.inserted += count;
        report.batches += 1;
        debug!(batch = report.batches, inserted = report.inserted, "inserted alert batch");
        next += count;
    }

    info!(inserted = report.inserted, batches = report.batches, "seeded alerts collection");
    Ok(report)
}

/// Drop and recreate the alerts collection.
pub fn reset_alerts(store: &mut dyn AlertStore) -> Result<()> {
    store.clear_alerts()?;
    info!("alerts collection reset");
    Ok(())
}

/// Remove every dashboard document.
pub fn teardown_dashboard(store: &mut dyn DashboardStore) -> Result<()> {
    store.clear_documents()?;
    info!("dashboard collection cleared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Priority;
    use crate::store::Store;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2025-06-30 12:00 UTC);

    fn config(count: u64, batch_size: usize) -> GeneratorConfig {
        GeneratorConfig {
            count,
            batch_size,
            ..GeneratorConfig::default()
        }
    }

    #[test]
    fn created_at_stays_within_window() {
        let generator = AlertGenerator::default();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..1000 {
            let at = generator.created_at(&mut rng, NOW);
            assert!(at <= NOW);
            assert!(at >= NOW - Duration::days(365));
        }
    }

    #[test]
    fn same_seed_same_alerts() {
        let generator = AlertGenerator::default();
        let clock = FixedClock(NOW);
        let first = generator.generate(&mut StdRng::seed_from_u64(11), &clock, 1, 50);
        let second = generator.generate(&mut StdRng::seed_from_u64(11), &clock, 1, 50);
        assert_eq!(first, second);
        assert_eq!(first[0].name, "Alert 1");
        assert_eq!(first[49].name, "Alert 50");
    }

    #[test]
    fn distribution_is_roughly_as_configured() {
        let generator = AlertGenerator::default();
        let mut rng = StdRng::seed_from_u64(99);
        let alerts = generator.generate(&mut rng, &FixedClock(NOW), 1, 20_000);

        let share = |priority: Priority| {
            alerts.iter().filter(|a| a.priority == priority).count() as f64 / alerts.len() as f64
        };
        assert!((share(Priority::Low) - 0.70).abs() < 0.02);
        assert!((share(Priority::Medium) - 0.20).abs() < 0.02);
        assert!((share(Priority::High) - 0.099).abs() < 0.015);
        assert!(share(Priority::Critical) < 0.01);

        let cleared = alerts.iter().filter(|a| a.cleared).count() as f64 / alerts.len() as f64;
        assert!((cleared - 0.8).abs() < 0.02);
    }

    #[test]
    fn seed_alerts_writes_in_batches_with_continuous_names() {
        let mut store = Store::new();
        let mut rng = StdRng::seed_from_u64(5);
        let report = seed_alerts(&mut store, &config(25, 10), &mut rng, &FixedClock(NOW)).unwrap();
        assert_eq!(report, SeedReport { inserted: 25, batches: 3 });
        assert_eq!(store.alert_count(), 25);

        let mut names = Vec::new();
        store
            .for_each_document(&mut |_, doc| names.push(doc["name"].as_str().unwrap().to_string()))
            .unwrap();
        assert_eq!(names.first().map(String::as_str), Some("Alert 1"));
        assert_eq!(names.last().map(String::as_str), Some("Alert 25"));
    }

    #[test]
    fn seeding_a_non_empty_store_continues_the_names() {
        let mut store = Store::new();
        let mut rng = StdRng::seed_from_u64(8);
        seed_alerts(&mut store, &config(25, 10), &mut rng, &FixedClock(NOW)).unwrap();
        seed_alerts(&mut store, &config(5, 10), &mut rng, &FixedClock(NOW)).unwrap();

        let mut names = Vec::new();
        store
            .for_each_document(&mut |_, doc| names.push(doc["name"].as_str().unwrap().to_string()))
            .unwrap();
        assert_eq!(names.len(), 30);
        assert_eq!(names[25], "Alert 26");
        assert_eq!(names[29], "Alert 30");
        let unique: std::collections::HashSet<&String> = names.iter().collect();
        assert_eq!(unique.len(), 30);
    }

    #[test]
    fn from_config_rejects_invalid_settings() {
        let mut bad = GeneratorConfig::default();
        bad.cleared_probability = f64::NAN;
        assert!(AlertGenerator::from_config(&bad).is_err());

        let mut bad = GeneratorConfig::default();
        bad.window_days = 5_000_000;
        assert!(AlertGenerator::from_config(&bad).is_err());
        let mut store = Store::new();
        let mut rng = StdRng::seed_from_u64(2);
        assert!(seed_alerts(&mut store, &bad, &mut rng, &FixedClock(NOW)).is_err());
        assert_eq!(store.alert_count(), 0);

        let generator = AlertGenerator::from_config(&GeneratorConfig::default()).unwrap();
        let at = generator.created_at(&mut rng, NOW);
        assert!(at >= NOW - Duration::days(365));
    }

    #[test]
    fn seed_alerts_with_zero_count_writes_nothing() {
        let mut store = Store::new();
        let mut rng = StdRng::seed_from_u64(5);
        let report = seed_alerts(&mut store, &config(0, 10), &mut rng, &FixedClock(NOW)).unwrap();
        assert_eq!(report.batches, 0);
        assert_eq!(store.alert_count(), 0);
    }

    #[test]
    fn reset_and_teardown_empty_the_collections() {
        let mut store = Store::new();
        let mut rng = StdRng::seed_from_u64(1);
        seed_alerts(&mut store, &config(5, 5), &mut rng, &FixedClock(NOW)).unwrap();
        store
            .upsert(crate::model::Bucket::new("top25", Vec::new()))
            .unwrap();

        reset_alerts(&mut store).unwrap();
        teardown_dashboard(&mut store).unwrap();
        assert_eq!(store.alert_count(), 0);
        assert_eq!(store.document_count(), 0);
    }
}
