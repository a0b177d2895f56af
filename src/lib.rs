//! # alertdash
//!
//! Materialized dashboards over an alerts collection.
//!
//! The priority view partitions every open High/Critical alert, oldest first,
//! into fixed-size buckets keyed `priority_bucket_<n>` so a dashboard can page
//! through them one document at a time. Two single-document views sit next to
//! it: the full priority summary and the most recent open alerts. A generator
//! fills the alerts collection with synthetic data.

pub mod config;
pub mod generator;
pub mod model;
pub mod persistence;
pub mod pipeline;
pub mod store;
pub mod test_support;

pub use config::{ConfigError, ConfigOverrides, DashConfig};
pub use generator::{AlertGenerator, Clock, FixedClock, SystemClock};
pub use model::{Alert, AlertId, Bucket, Priority, StoredAlert};
pub use persistence::{PersistentOpenOptions, PersistentStore};
pub use pipeline::{AlertFilter, BucketPlan, RunReport, ScanStats, SortOrder, ViewPlan, WriteReport};
pub use store::{AlertStore, DashboardStore, Store, WriteOutcome};

use serde::Serialize;
use std::time::{Duration, Instant};

/// Which dashboard views to refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Buckets,
    Summary,
    Recent,
}

impl View {
    pub const ALL: [View; 3] = [View::Buckets, View::Summary, View::Recent];
}

/// Data for the dashboard landing page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardPage {
    pub recent_alerts: Vec<Alert>,
    /// Latest priority bucket, newest alert first
    pub priority_alerts: Vec<Alert>,
    pub priority_count: u64,
    pub priority_bucket_count: usize,
    pub page_load_time: String,
    pub recent_query_time: String,
    pub priority_query_time: String,
}

/// One bucket as served to an incremental loader.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketPage {
    pub alerts: Vec<Alert>,
    pub count: u64,
    pub query_time: String,
}

/// Main API: a store holding both collections plus the view settings.
pub struct Dashboard<S> {
    store: S,
    config: DashConfig,
}

impl Dashboard<Store> {
    /// Dashboard over a fresh in-memory store with default settings.
    pub fn in_memory() -> Self {
        Self {
            store: Store::new(),
            config: DashConfig::default(),
        }
    }
}

impl Dashboard<PersistentStore> {
    /// Open the persistent store named by `config.storage`.
    pub fn open(config: DashConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let store = PersistentStore::open_with_options(
            &config.storage.data_dir,
            PersistentOpenOptions {
                repair: config.storage.repair,
                cache_capacity: config.storage.cache_capacity,
            },
        )?;
        Ok(Self { store, config })
    }
}

impl<S> Dashboard<S>
where
    S: AlertStore + DashboardStore,
{
    pub fn with_store(store: S, config: DashConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &DashConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Insert alerts into the source collection.
    pub fn ingest(&mut self, alerts: &[Alert]) -> anyhow::Result<Vec<AlertId>> {
        self.store.insert_alerts(alerts)
    }

    pub fn bucket_plan(&self) -> anyhow::Result<BucketPlan> {
        let buckets = &self.config.buckets;
        Ok(BucketPlan {
            filter: buckets.filter(),
            bucket_size: buckets.bucket_size()?,
            id_prefix: buckets.id_prefix.clone(),
            prune_stale: buckets.prune_stale,
        })
    }

    pub fn summary_plan(&self) -> ViewPlan {
        ViewPlan::priority_summary(
            self.config.summary.id.clone(),
            self.config.buckets.priorities.clone(),
        )
    }

    pub fn recent_plan(&self) -> ViewPlan {
        ViewPlan::recent(self.config.recent.id.clone(), self.config.recent.limit)
    }

    pub fn refresh_priority_buckets(&mut self) -> anyhow::Result<RunReport> {
        let plan = self.bucket_plan()?;
        let build = pipeline::compute_buckets(&self.store, &plan)?;
        pipeline::write_buckets(&mut self.store, &plan, build)
    }

    pub fn refresh_priority_summary(&mut self) -> anyhow::Result<RunReport> {
        let plan = self.summary_plan();
        let build = pipeline::compute_view(&self.store, &plan)?;
        pipeline::write_view(&mut self.store, &plan, build)
    }

    pub fn refresh_recent(&mut self) -> anyhow::Result<RunReport> {
        let plan = self.recent_plan();
        let build = pipeline::compute_view(&self.store, &plan)?;
        pipeline::write_view(&mut self.store, &plan, build)
    }

    pub fn refresh(&mut self, view: View) -> anyhow::Result<RunReport> {
        match view {
            View::Buckets => self.refresh_priority_buckets(),
            View::Summary => self.refresh_priority_summary(),
            View::Recent => self.refresh_recent(),
        }
    }

    pub fn refresh_all(&mut self) -> anyhow::Result<Vec<(View, RunReport)>> {
        let mut reports = Vec::with_capacity(View::ALL.len());
        for view in View::ALL {
            reports.push((view, self.refresh(view)?));
        }
        Ok(reports)
    }

    /// Bucket `index`, or `None` once past the last one.
    pub fn priority_bucket(&self, index: u64) -> anyhow::Result<Option<Bucket>> {
        let id = model::bucket_id(&self.config.buckets.id_prefix, index);
        self.store.get(&id)
    }

    /// Number of bucket documents. Ids that merely share the prefix text
    /// (`priority_bucket_notes`) are not buckets and are not counted.
    pub fn priority_bucket_count(&self) -> anyhow::Result<usize> {
        let prefix = &self.config.buckets.id_prefix;
        Ok(self
            .store
            .ids_with_prefix(prefix)?
            .iter()
            .filter(|id| model::parse_bucket_number(prefix, id).is_some())
            .count())
    }

    pub fn priority_summary(&self) -> anyhow::Result<Option<Bucket>> {
        self.store.get(&self.config.summary.id)
    }

    /// Most recent open alerts, newest first. Empty until the view is built.
    pub fn recent_alerts(&self) -> anyhow::Result<Vec<Alert>> {
        Ok(self
            .store
            .get(&self.config.recent.id)?
            .map(Bucket::into_values)
            .unwrap_or_default())
    }

    /// Assemble the landing page: recent alerts plus the newest priority
    /// bucket, reversed so its newest alert comes first.
    pub fn page(&self) -> anyhow::Result<DashboardPage> {
        let start = Instant::now();

        let (recent_alerts, recent_time) = timed(|| self.recent_alerts())?;
        let (bucket_count, count_time) = timed(|| self.priority_bucket_count())?;
        let (latest, bucket_time) = timed(|| match bucket_count.checked_sub(1) {
            Some(index) => self.priority_bucket(index as u64),
            None => Ok(None),
        })?;

        let (mut priority_alerts, priority_count) = latest
            .map(|bucket| {
                let count = bucket.count();
                (bucket.into_values(), count)
            })
            .unwrap_or_default();
        priority_alerts.reverse();

        Ok(DashboardPage {
            recent_alerts,
            priority_alerts,
            priority_count,
            priority_bucket_count: bucket_count,
            page_load_time: format_duration(start.elapsed()),
            recent_query_time: format_duration(recent_time),
            priority_query_time: format_duration(bucket_time + count_time),
        })
    }

    /// Bucket `index` for incremental loading; empty past the last bucket.
    pub fn load_more(&self, index: u64) -> anyhow::Result<BucketPage> {
        let (bucket, query_time) = timed(|| self.priority_bucket(index))?;
        let (alerts, count) = bucket
            .map(|bucket| {
                let count = bucket.count();
                (bucket.into_values(), count)
            })
            .unwrap_or_default();
        Ok(BucketPage {
            alerts,
            count,
            query_time: format_duration(query_time),
        })
    }
}

fn timed<T>(f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<(T, Duration)> {
    let start = Instant::now();
    let value = f()?;
    Ok((value, start.elapsed()))
}

/// Render a duration as milliseconds with one decimal, e.g. `"1.2 ms"`.
pub fn format_duration(duration: Duration) -> String {
    let ms = duration.as_micros() as f64 / 1000.0;
    format!("{ms:.1} ms")
}
