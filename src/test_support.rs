use rand::rngs::StdRng;
use rand::SeedableRng;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

use crate::generator::{AlertGenerator, FixedClock};
use crate::model::{Alert, Priority};
use crate::pipeline::AlertFilter;

/// Fixed "now" for generated datasets.
pub const BASE_TIME: OffsetDateTime = datetime!(2025-01-01 0:00 UTC);

/// Alert created `seconds` after [`BASE_TIME`].
pub fn alert_at(name: &str, priority: Priority, seconds: i64, cleared: bool) -> Alert {
    Alert::new(name, priority, BASE_TIME + Duration::seconds(seconds), cleared)
}

/// `count` open High/Critical alerts one second apart, oldest first.
pub fn open_priority_alerts(count: usize) -> Vec<Alert> {
    (0..count)
        .map(|i| {
            let priority = if i % 10 == 0 {
                Priority::Critical
            } else {
                Priority::High
            };
            alert_at(&format!("Alert {}", i + 1), priority, i as i64, false)
        })
        .collect()
}

/// Seeded synthetic alerts with the default distributions.
pub fn generate_alerts(count: usize, seed: u64) -> Vec<Alert> {
    let mut rng = StdRng::seed_from_u64(seed);
    AlertGenerator::default().generate(&mut rng, &FixedClock(BASE_TIME), 1, count)
}

/// Alerts from [`generate_alerts`] that the priority views keep, oldest
/// first, ties in input order.
pub fn expected_priority_order(alerts: &[Alert]) -> Vec<Alert> {
    let filter = AlertFilter::open_priority();
    let mut matching: Vec<(usize, &Alert)> = alerts
        .iter()
        .enumerate()
        .filter(|(_, alert)| filter.matches(alert))
        .collect();
    matching.sort_by_key(|(index, alert)| (alert.created_at, *index));
    matching.into_iter().map(|(_, alert)| alert.clone()).collect()
}
