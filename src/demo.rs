//! Canned demo platform for manual soak-testing (spec §0.5): reports a
//! synthetic sensor's mean/min/max and a synthetic meter's running sum so
//! `statsrec run` has something to compile without a real integration
//! attached.
//!
//! Grounded in the teacher's `demo.rs` (generates realistic mock input so
//! the rest of the pipeline can be exercised standalone), narrowed here to
//! the one capability this engine's platforms expose: `compile_statistics`.

use statsrec::model::{StatisticMetaData, UnitClass};
use statsrec::platform::{PlatformStatistic, StatisticsPlatform};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// Reports a sine-wave temperature sensor and a monotonically increasing
/// energy meter, one sample per compile window.
pub struct DemoPlatform {
    ticks: AtomicU64,
}

impl DemoPlatform {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
        }
    }
}

impl Default for DemoPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl StatisticsPlatform for DemoPlatform {
    fn domain(&self) -> &str {
        "demo"
    }

    fn compile_statistics(
        &self,
        start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Option<Vec<PlatformStatistic>> {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) as f64;
        let temp = 20.0 + 5.0 * (tick / 12.0).sin();
        let energy_delta = 0.1 + (tick % 3.0) * 0.05;

        Some(vec![
            PlatformStatistic {
                meta: StatisticMetaData {
                    id: 0,
                    statistic_id: "demo:temperature".into(),
                    source: "demo".into(),
                    unit_of_measurement: Some(unit_label(UnitClass::Temperature)),
                    has_mean: true,
                    has_sum: false,
                    name: Some("Demo temperature sensor".into()),
                },
                start,
                state: Some(temp),
                mean: Some(temp),
                min: Some(temp - 0.3),
                max: Some(temp + 0.3),
                sum: None,
                last_reset: None,
            },
            PlatformStatistic {
                meta: StatisticMetaData {
                    id: 0,
                    statistic_id: "demo:energy".into(),
                    source: "demo".into(),
                    unit_of_measurement: Some("kWh".into()),
                    has_mean: false,
                    has_sum: true,
                    name: Some("Demo energy meter".into()),
                },
                start,
                state: Some(energy_delta),
                mean: None,
                min: None,
                max: None,
                sum: Some(energy_delta),
                last_reset: None,
            },
        ])
    }
}

fn unit_label(class: UnitClass) -> String {
    match class {
        UnitClass::Temperature => "°C".into(),
        _ => String::new(),
    }
}
