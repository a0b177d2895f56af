//! # Pipeline Module
//!
//! The dashboard transforms as explicit stages over in-memory sequences:
//!
//! ```text
//! select (scan + decode + filter) -> order -> rank -> bucket -> group -> write
//! ```
//!
//! Every stage except the final write is a pure function. Ties on
//! `createdAt` are broken by ascending [`AlertId`], which is insertion order,
//! so the output never depends on the order a store happens to scan in.

use crate::model::{bucket_id, parse_bucket_number, Alert, AlertId, Bucket, Priority, StoredAlert};
use crate::store::{AlertStore, DashboardStore, WriteOutcome};
use anyhow::Result;
use std::cmp::Reverse;
use std::collections::HashSet;
use std::num::NonZeroU64;
use tracing::{debug, info, instrument, warn};

/// Predicate over alerts. `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertFilter {
    pub cleared: Option<bool>,
    pub priorities: Option<Vec<Priority>>,
}

impl AlertFilter {
    /// Uncleared alerts of any priority.
    pub fn open() -> Self {
        Self {
            cleared: Some(false),
            priorities: None,
        }
    }

    /// Uncleared alerts whose priority is one of `priorities`.
    pub fn open_with_priorities(priorities: Vec<Priority>) -> Self {
        Self {
            cleared: Some(false),
            priorities: Some(priorities),
        }
    }

    /// Uncleared High and Critical alerts.
    pub fn open_priority() -> Self {
        Self::open_with_priorities(vec![Priority::High, Priority::Critical])
    }

    pub fn matches(&self, alert: &Alert) -> bool {
        if let Some(cleared) = self.cleared {
            if alert.cleared != cleared {
                return false;
            }
        }
        match &self.priorities {
            Some(priorities) => priorities.contains(&alert.priority),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Counters from one scan of the source store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub scanned: usize,
    pub malformed: usize,
    pub matched: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub alerts: Vec<StoredAlert>,
    pub stats: ScanStats,
}

/// An alert with its 1-based position in the sorted selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ranked {
    pub rank: u64,
    pub alert: Alert,
}

/// Scan every document, decode it and keep those matching `filter`.
///
/// Documents that fail to decode are skipped and counted.
pub fn select(source: &dyn AlertStore, filter: &AlertFilter) -> Result<Selection> {
    let mut selection = Selection::default();
    source.for_each_document(&mut |id, document| {
        selection.stats.scanned += 1;
        match Alert::from_document(document) {
            Ok(alert) => {
                if filter.matches(&alert) {
                    selection.alerts.push(StoredAlert { id, alert });
                }
            }
            Err(err) => {
                selection.stats.malformed += 1;
                warn!(alert_id = %id, error = %err, "skipping malformed alert document");
            }
        }
    })?;
    selection.stats.matched = selection.alerts.len();
    Ok(selection)
}

/// Sort by `createdAt`, ties by ascending id in both directions.
pub fn order(alerts: &mut [StoredAlert], direction: SortOrder) {
    match direction {
        SortOrder::Ascending => alerts.sort_by_key(|stored| (stored.alert.created_at, stored.id)),
        SortOrder::Descending => {
            alerts.sort_by_key(|stored| (Reverse(stored.alert.created_at), stored.id))
        }
    }
}

/// Number sorted alerts 1, 2, 3, ... dropping the storage id.
pub fn rank(sorted: Vec<StoredAlert>) -> Vec<Ranked> {
    sorted
        .into_iter()
        .zip(1u64..)
        .map(|(stored, rank)| Ranked {
            rank,
            alert: stored.alert,
        })
        .collect()
}

/// Bucket holding a 1-based `rank`: `floor((rank - 1) / bucket_size)`.
pub fn bucket_number(rank: u64, bucket_size: NonZeroU64) -> u64 {
    debug_assert!(rank >= 1, "ranks are 1-based");
    rank.saturating_sub(1) / bucket_size.get()
}

/// Group ranked alerts into numbered buckets, keeping rank order inside each.
///
/// Input must be in rank order, which is what [`rank`] produces; bucket
/// numbers then come out contiguous from 0.
pub fn group(ranked: Vec<Ranked>, bucket_size: NonZeroU64, id_prefix: &str) -> Vec<Bucket> {
    let mut buckets = Vec::new();
    let mut current: Option<(u64, Vec<Alert>)> = None;

    for Ranked { rank, alert } in ranked {
        let number = bucket_number(rank, bucket_size);
        if let Some((open, values)) = current.as_mut() {
            if *open == number {
                values.push(alert);
                continue;
            }
        }
        if let Some((closed, values)) = current.replace((number, vec![alert])) {
            buckets.push(Bucket::new(bucket_id(id_prefix, closed), values));
        }
    }
    if let Some((number, values)) = current {
        buckets.push(Bucket::new(bucket_id(id_prefix, number), values));
    }
    buckets
}

/// Pure part of the bucketing transform: filter, order, rank and group.
pub fn build_buckets(
    alerts: Vec<StoredAlert>,
    filter: &AlertFilter,
    bucket_size: NonZeroU64,
    id_prefix: &str,
) -> Vec<Bucket> {
    let mut matching: Vec<StoredAlert> = alerts
        .into_iter()
        .filter(|stored| filter.matches(&stored.alert))
        .collect();
    order(&mut matching, SortOrder::Ascending);
    group(rank(matching), bucket_size, id_prefix)
}

/// Outcome of writing a view to the dashboard store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub inserted: usize,
    pub replaced: usize,
    pub pruned: usize,
    pub ids: Vec<String>,
}

impl WriteReport {
    pub fn written(&self) -> usize {
        self.inserted + self.replaced
    }
}

/// Upsert every document. The first failed write aborts with an error.
pub fn upsert_documents(
    target: &mut dyn DashboardStore,
    documents: Vec<Bucket>,
) -> Result<WriteReport> {
    let ids: Vec<String> = documents.iter().map(|doc| doc.id().to_string()).collect();
    let outcomes = target.upsert_all(documents)?;
    let mut report = WriteReport {
        ids,
        ..WriteReport::default()
    };
    for outcome in outcomes {
        match outcome {
            WriteOutcome::Inserted => report.inserted += 1,
            WriteOutcome::Replaced => report.replaced += 1,
        }
    }
    Ok(report)
}

/// Delete documents under `id_prefix` that are not in `keep`.
///
/// Only ids that parse as `prefix + number` are considered, so unrelated
/// documents sharing a textual prefix are left alone.
pub fn prune_stale(
    target: &mut dyn DashboardStore,
    id_prefix: &str,
    keep: &[String],
) -> Result<usize> {
    let keep: HashSet<&str> = keep.iter().map(String::as_str).collect();
    let mut pruned = 0;
    for id in target.ids_with_prefix(id_prefix)? {
        if keep.contains(id.as_str()) || parse_bucket_number(id_prefix, &id).is_none() {
            continue;
        }
        if target.delete(&id)? {
            debug!(bucket = %id, "pruned stale bucket");
            pruned += 1;
        }
    }
    Ok(pruned)
}

/// Settings for one bucketing run.
#[derive(Debug, Clone)]
pub struct BucketPlan {
    pub filter: AlertFilter,
    pub bucket_size: NonZeroU64,
    pub id_prefix: String,
    pub prune_stale: bool,
}

impl Default for BucketPlan {
    fn default() -> Self {
        Self {
            filter: AlertFilter::open_priority(),
            bucket_size: NonZeroU64::new(crate::config::DEFAULT_BUCKET_SIZE)
                .unwrap_or(NonZeroU64::MIN),
            id_prefix: crate::config::DEFAULT_BUCKET_PREFIX.to_string(),
            prune_stale: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub scan: ScanStats,
    pub write: WriteReport,
}

/// Buckets computed from one scan, not yet written.
#[derive(Debug, Clone, Default)]
pub struct BucketBuild {
    pub scan: ScanStats,
    pub buckets: Vec<Bucket>,
}

/// Read phase of a bucketing run: scan the source and compute every bucket
/// in memory.
#[instrument(skip_all, fields(bucket_size = plan.bucket_size.get(), prefix = %plan.id_prefix))]
pub fn compute_buckets(source: &dyn AlertStore, plan: &BucketPlan) -> Result<BucketBuild> {
    let selection = select(source, &plan.filter)?;
    let buckets = build_buckets(
        selection.alerts,
        &plan.filter,
        plan.bucket_size,
        &plan.id_prefix,
    );
    for bucket in &buckets {
        debug!(bucket = %bucket.id(), count = bucket.count(), "built bucket");
    }
    Ok(BucketBuild {
        scan: selection.stats,
        buckets,
    })
}

/// Write phase of a bucketing run: upsert the buckets, then prune stale ones
/// when the plan asks for it.
#[instrument(skip_all, fields(prefix = %plan.id_prefix))]
pub fn write_buckets(
    target: &mut dyn DashboardStore,
    plan: &BucketPlan,
    build: BucketBuild,
) -> Result<RunReport> {
    let scan = build.scan;
    let mut write = upsert_documents(target, build.buckets)?;
    if plan.prune_stale {
        write.pruned = prune_stale(target, &plan.id_prefix, &write.ids)?;
    }

    info!(
        scanned = scan.scanned,
        matched = scan.matched,
        malformed = scan.malformed,
        buckets = write.ids.len(),
        inserted = write.inserted,
        replaced = write.replaced,
        pruned = write.pruned,
        "priority buckets refreshed"
    );
    Ok(RunReport { scan, write })
}

/// Full bucketing run from `source` into `target`.
pub fn run_bucketing(
    source: &dyn AlertStore,
    target: &mut dyn DashboardStore,
    plan: &BucketPlan,
) -> Result<RunReport> {
    let build = compute_buckets(source, plan)?;
    write_buckets(target, plan, build)
}

/// Settings for a single-document view.
#[derive(Debug, Clone)]
pub struct ViewPlan {
    pub id: String,
    pub filter: AlertFilter,
    pub order: SortOrder,
    pub limit: Option<usize>,
}

impl ViewPlan {
    /// Every uncleared High/Critical alert, newest first.
    pub fn priority_summary(id: impl Into<String>, priorities: Vec<Priority>) -> Self {
        Self {
            id: id.into(),
            filter: AlertFilter::open_with_priorities(priorities),
            order: SortOrder::Descending,
            limit: None,
        }
    }

    /// The `limit` most recent uncleared alerts, newest first.
    pub fn recent(id: impl Into<String>, limit: usize) -> Self {
        Self {
            id: id.into(),
            filter: AlertFilter::open(),
            order: SortOrder::Descending,
            limit: Some(limit),
        }
    }
}

/// Pure part of a single-document view. `None` when nothing matches.
pub fn build_view(alerts: Vec<StoredAlert>, plan: &ViewPlan) -> Option<Bucket> {
    let mut matching: Vec<StoredAlert> = alerts
        .into_iter()
        .filter(|stored| plan.filter.matches(&stored.alert))
        .collect();
    order(&mut matching, plan.order);
    if let Some(limit) = plan.limit {
        matching.truncate(limit);
    }
    if matching.is_empty() {
        return None;
    }
    let values = matching.into_iter().map(|stored| stored.alert).collect();
    Some(Bucket::new(plan.id.clone(), values))
}

/// A single-document view computed from one scan, not yet written.
#[derive(Debug, Clone, Default)]
pub struct ViewBuild {
    pub scan: ScanStats,
    pub document: Option<Bucket>,
}

#[instrument(skip_all, fields(view = %plan.id))]
pub fn compute_view(source: &dyn AlertStore, plan: &ViewPlan) -> Result<ViewBuild> {
    let selection = select(source, &plan.filter)?;
    Ok(ViewBuild {
        scan: selection.stats,
        document: build_view(selection.alerts, plan),
    })
}

/// Write a computed view. An empty selection removes the document so the
/// view always reflects the current alerts.
#[instrument(skip_all, fields(view = %plan.id))]
pub fn write_view(
    target: &mut dyn DashboardStore,
    plan: &ViewPlan,
    build: ViewBuild,
) -> Result<RunReport> {
    let scan = build.scan;
    let write = match build.document {
        Some(document) => upsert_documents(target, vec![document])?,
        None => WriteReport {
            pruned: usize::from(target.delete(&plan.id)?),
            ..WriteReport::default()
        },
    };
    info!(
        scanned = scan.scanned,
        matched = scan.matched,
        malformed = scan.malformed,
        written = write.written(),
        removed = write.pruned,
        "dashboard view refreshed"
    );
    Ok(RunReport { scan, write })
}

/// Full single-document view run from `source` into `target`.
pub fn run_view(
    source: &dyn AlertStore,
    target: &mut dyn DashboardStore,
    plan: &ViewPlan,
) -> Result<RunReport> {
    let build = compute_view(source, plan)?;
    write_view(target, plan, build)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use serde_json::json;
    use time::macros::datetime;
    use time::{Duration, OffsetDateTime};

    const EPOCH: OffsetDateTime = datetime!(2024-01-01 0:00 UTC);

    fn stored(id: u64, name: &str, priority: Priority, minutes: i64, cleared: bool) -> StoredAlert {
        StoredAlert {
            id: AlertId(id),
            alert: Alert::new(name, priority, EPOCH + Duration::minutes(minutes), cleared),
        }
    }

    fn size(n: u64) -> NonZeroU64 {
        NonZeroU64::new(n).unwrap()
    }

    #[test]
    fn filter_keeps_open_high_and_critical() {
        let filter = AlertFilter::open_priority();
        let at = EPOCH;
        assert!(filter.matches(&Alert::new("a", Priority::High, at, false)));
        assert!(filter.matches(&Alert::new("b", Priority::Critical, at, false)));
        assert!(!filter.matches(&Alert::new("c", Priority::Critical, at, true)));
        assert!(!filter.matches(&Alert::new("d", Priority::Medium, at, false)));
        assert!(!filter.matches(&Alert::new("e", Priority::Low, at, false)));
        assert!(AlertFilter::default().matches(&Alert::new("f", Priority::Low, at, true)));
    }

    #[test]
    fn bucket_number_boundaries() {
        let b = size(5000);
        assert_eq!(bucket_number(1, b), 0);
        assert_eq!(bucket_number(4999, b), 0);
        assert_eq!(bucket_number(5000, b), 0);
        assert_eq!(bucket_number(5001, b), 1);
        assert_eq!(bucket_number(10_000, b), 1);
        assert_eq!(bucket_number(10_001, b), 2);
        assert_eq!(bucket_number(7, size(1)), 6);
    }

    #[test]
    fn three_records_share_first_bucket_in_time_order() {
        let alerts = vec![
            stored(0, "t3", Priority::High, 30, false),
            stored(1, "t1", Priority::Critical, 10, false),
            stored(2, "t2", Priority::High, 20, false),
        ];
        let buckets = build_buckets(
            alerts,
            &AlertFilter::open_priority(),
            size(5000),
            "priority_bucket_",
        );
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].id(), "priority_bucket_0");
        assert_eq!(buckets[0].count(), 3);
        let names: Vec<&str> = buckets[0].values().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn equal_timestamps_keep_insertion_order() {
        let mut alerts = vec![
            stored(5, "late-id", Priority::High, 0, false),
            stored(2, "early-id", Priority::High, 0, false),
            stored(9, "last-id", Priority::High, 0, false),
        ];
        order(&mut alerts, SortOrder::Ascending);
        let ids: Vec<u64> = alerts.iter().map(|s| s.id.0).collect();
        assert_eq!(ids, vec![2, 5, 9]);

        order(&mut alerts, SortOrder::Descending);
        let ids: Vec<u64> = alerts.iter().map(|s| s.id.0).collect();
        assert_eq!(ids, vec![2, 5, 9]);
    }

    #[test]
    fn descending_order_puts_newest_first() {
        let mut alerts = vec![
            stored(0, "old", Priority::High, 1, false),
            stored(1, "new", Priority::High, 3, false),
            stored(2, "mid", Priority::High, 2, false),
        ];
        order(&mut alerts, SortOrder::Descending);
        let names: Vec<&str> = alerts.iter().map(|s| s.alert.name.as_str()).collect();
        assert_eq!(names, vec!["new", "mid", "old"]);
    }

    #[test]
    fn rank_is_one_based_and_contiguous() {
        let ranked = rank(vec![
            stored(0, "a", Priority::High, 0, false),
            stored(1, "b", Priority::High, 1, false),
        ]);
        assert_eq!(ranked.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2]);
        assert!(rank(Vec::new()).is_empty());
    }

    #[test]
    fn group_splits_at_bucket_size() {
        let alerts: Vec<StoredAlert> = (0..7)
            .map(|i| stored(i, &format!("a{i}"), Priority::High, i as i64, false))
            .collect();
        let buckets = group(rank(alerts), size(3), "b_");
        let ids: Vec<&str> = buckets.iter().map(|b| b.id()).collect();
        assert_eq!(ids, vec!["b_0", "b_1", "b_2"]);
        let counts: Vec<u64> = buckets.iter().map(|b| b.count()).collect();
        assert_eq!(counts, vec![3, 3, 1]);
        assert_eq!(buckets[1].values()[0].name, "a3");
    }

    #[test]
    fn empty_input_builds_nothing() {
        let buckets = build_buckets(
            Vec::new(),
            &AlertFilter::open_priority(),
            size(5000),
            "priority_bucket_",
        );
        assert!(buckets.is_empty());
    }

    #[test]
    fn select_skips_malformed_documents() {
        let mut store = Store::new();
        store
            .insert_documents(vec![
                json!({"name": "ok", "priority": "High", "createdAt": "2024-01-01T00:00:00Z", "cleared": false}),
                json!({"name": "no-date", "priority": "High", "cleared": false}),
                json!({"name": "bad", "priority": "Severe", "createdAt": "2024-01-01T00:00:00Z", "cleared": false}),
                json!("not an object"),
                json!({"name": "closed", "priority": "High", "createdAt": "2024-01-01T00:00:00Z", "cleared": true}),
            ])
            .unwrap();
        let selection = select(&store, &AlertFilter::open_priority()).unwrap();
        assert_eq!(
            selection.stats,
            ScanStats {
                scanned: 5,
                malformed: 3,
                matched: 1
            }
        );
        assert_eq!(selection.alerts[0].alert.name, "ok");
        assert_eq!(selection.alerts[0].id, AlertId(0));
    }

    #[test]
    fn run_bucketing_prunes_buckets_the_run_did_not_produce() {
        let mut store = Store::new();
        let alerts: Vec<Alert> = (0..5)
            .map(|i| Alert::new(format!("a{i}"), Priority::High, EPOCH + Duration::hours(i), false))
            .collect();
        store.insert_alerts(&alerts).unwrap();

        let mut target = Store::new();
        target.upsert(Bucket::new("priority_bucket_9", Vec::new())).unwrap();
        target.upsert(Bucket::new("priority_bucket_notes", Vec::new())).unwrap();

        let plan = BucketPlan {
            bucket_size: size(2),
            ..BucketPlan::default()
        };
        let report = run_bucketing(&store, &mut target, &plan).unwrap();
        assert_eq!(report.write.inserted, 3);
        assert_eq!(report.write.pruned, 1);
        assert_eq!(
            target.ids_with_prefix("priority_bucket_").unwrap(),
            vec![
                "priority_bucket_0",
                "priority_bucket_1",
                "priority_bucket_2",
                "priority_bucket_notes"
            ]
        );
    }

    /// Dashboard store whose writes always fail; reads report one stale
    /// bucket so a prune would be visible.
    #[derive(Default)]
    struct FailingStore {
        deletes: usize,
    }

    impl DashboardStore for FailingStore {
        fn upsert(&mut self, _document: Bucket) -> Result<WriteOutcome> {
            Err(anyhow::anyhow!("disk full"))
        }
        fn get(&self, _id: &str) -> Result<Option<Bucket>> {
            Ok(None)
        }
        fn delete(&mut self, _id: &str) -> Result<bool> {
            self.deletes += 1;
            Ok(true)
        }
        fn ids_with_prefix(&self, _prefix: &str) -> Result<Vec<String>> {
            Ok(vec!["priority_bucket_7".to_string()])
        }
        fn document_count(&self) -> usize {
            1
        }
        fn clear_documents(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_write_aborts_the_run_before_pruning() {
        let mut store = Store::new();
        store
            .insert_alerts(&[Alert::new("a", Priority::High, EPOCH, false)])
            .unwrap();

        let mut target = FailingStore::default();
        let err = run_bucketing(&store, &mut target, &BucketPlan::default()).unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert_eq!(target.deletes, 0);

        let err = run_view(&store, &mut target, &ViewPlan::recent("top25", 25)).unwrap_err();
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn run_view_limits_and_removes_when_empty() {
        let mut store = Store::new();
        let alerts: Vec<Alert> = (0..4)
            .map(|i| Alert::new(format!("a{i}"), Priority::Low, EPOCH + Duration::hours(i), false))
            .collect();
        store.insert_alerts(&alerts).unwrap();

        let mut target = Store::new();
        let plan = ViewPlan::recent("top25", 2);
        run_view(&store, &mut target, &plan).unwrap();
        let doc = target.get("top25").unwrap().unwrap();
        let names: Vec<&str> = doc.values().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["a3", "a2"]);

        store.clear_alerts().unwrap();
        let report = run_view(&store, &mut target, &plan).unwrap();
        assert_eq!(report.write.pruned, 1);
        assert!(target.get("top25").unwrap().is_none());
    }
}
