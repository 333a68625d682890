//! Short-term compaction and long-term rollup (spec §4.2–§4.4).
//!
//! Two aggregation steps happen here:
//! 1. **Compile**: raw samples collected over a 5-minute bucket are reduced
//!    to one `statistics_short_term` row (time-weighted mean, min, max,
//!    last state, running sum).
//! 2. **Adjust**: completed hours of `statistics_short_term` rows are
//!    reduced to one `statistics` (long-term) row per hour.
//!
//! Both steps are idempotent: compiling or rolling up the same period twice
//! produces the same row, and [`crate::storage::insert_rows`] silently skips
//! a conflicting `(metadata_id, start_ts)` insert rather than erroring.

use crate::error::Result;
use crate::metadata::MetadataManager;
use crate::model::StatisticRow;
use crate::platform::PlatformRegistry;
use crate::storage;
use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use rusqlite::Connection;
use std::collections::HashSet;

/// Width of a short-term bucket (spec §1).
pub const SHORT_TERM_PERIOD: Duration = Duration::minutes(5);

/// Align `ts` down to the start of its containing 5-minute bucket.
pub fn short_term_bucket_start(ts: DateTime<Utc>) -> DateTime<Utc> {
    let minute = ts.minute() - (ts.minute() % 5);
    ts.with_minute(minute)
        .unwrap()
        .with_second(0)
        .unwrap()
        .with_nanosecond(0)
        .unwrap()
}

/// Align `ts` down to the start of its containing hour.
pub fn hour_bucket_start(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_minute(0).unwrap().with_second(0).unwrap().with_nanosecond(0).unwrap()
}

/// One raw sample feeding a short-term compaction: a state value with the
/// timestamp it was observed at.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub at: DateTime<Utc>,
    pub value: f64,
}

/// Reduce raw samples within `[period_start, period_start + 5m)` to one
/// short-term row. `running_sum`, if the statistic `has_sum`, carries the
/// monotonic total forward from the previous bucket — each sample's delta
/// (clamped to zero on a detected meter reset, i.e. a decrease) is added to
/// it (spec §4.2 "change" semantics, grounded in the original's
/// `_timestamp_to_data_series` sum tracking).
pub fn compile_short_term(
    metadata_id: i64,
    period_start: DateTime<Utc>,
    samples: &[Sample],
    running_sum: Option<f64>,
    has_mean: bool,
    has_sum: bool,
) -> Option<StatisticRow> {
    if samples.is_empty() {
        return None;
    }
    let period_end = period_start + SHORT_TERM_PERIOD;
    let created = Utc::now();

    let mean = if has_mean {
        Some(time_weighted_mean(samples, period_start, period_end))
    } else {
        None
    };
    let min = if has_mean {
        samples
            .iter()
            .map(|s| s.value)
            .fold(None, |acc: Option<f64>, v| {
                Some(acc.map_or(v, |a| a.min(v)))
            })
    } else {
        None
    };
    let max = if has_mean {
        samples
            .iter()
            .map(|s| s.value)
            .fold(None, |acc: Option<f64>, v| {
                Some(acc.map_or(v, |a| a.max(v)))
            })
    } else {
        None
    };

    let sum = if has_sum {
        let mut total = running_sum.unwrap_or(0.0);
        let mut prev = samples[0].value;
        for s in &samples[1..] {
            let delta = s.value - prev;
            if delta > 0.0 {
                total += delta;
            }
            prev = s.value;
        }
        if running_sum.is_none() {
            // First bucket ever compiled for this statistic: seed the
            // running total with the first observed value rather than 0,
            // matching a meter that already had a nonzero reading.
            total += samples[0].value;
        }
        Some(total)
    } else {
        None
    };

    Some(StatisticRow {
        metadata_id,
        start: period_start,
        created,
        state: Some(samples.last().unwrap().value),
        mean,
        min,
        max,
        sum,
        last_reset: None,
    })
}

/// Time-weighted mean: each sample's value is weighted by how long it held
/// (until the next sample or the period end), not by sample count. Grounded
/// in the original's `_get_max_mean_min_statistic` `mean_acc`/`duration`
/// accumulation.
fn time_weighted_mean(
    samples: &[Sample],
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> f64 {
    if samples.len() == 1 {
        return samples[0].value;
    }
    let mut weighted = 0.0f64;
    let mut total_duration = 0.0f64;
    for (i, sample) in samples.iter().enumerate() {
        let start = if i == 0 { period_start } else { sample.at };
        let end = if i + 1 < samples.len() {
            samples[i + 1].at
        } else {
            period_end
        };
        let duration = (end - start).num_milliseconds().max(0) as f64;
        weighted += sample.value * duration;
        total_duration += duration;
    }
    if total_duration == 0.0 {
        samples.iter().map(|s| s.value).sum::<f64>() / samples.len() as f64
    } else {
        weighted / total_duration
    }
}

/// Roll up one hour's worth of short-term rows into a single long-term row
/// (spec §4.3). `short_term_rows` must already be the rows for exactly
/// `[hour_start, hour_start + 1h)`, ordered by `start`.
pub fn rollup_hour(
    metadata_id: i64,
    hour_start: DateTime<Utc>,
    short_term_rows: &[StatisticRow],
    has_mean: bool,
    has_sum: bool,
) -> Option<StatisticRow> {
    if short_term_rows.is_empty() {
        return None;
    }
    let created = Utc::now();

    let mean = if has_mean {
        let total_weight: f64 = short_term_rows.len() as f64;
        let weighted: f64 = short_term_rows.iter().filter_map(|r| r.mean).sum();
        Some(weighted / total_weight)
    } else {
        None
    };
    let min = if has_mean {
        short_term_rows.iter().filter_map(|r| r.min).fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.min(v)))
        })
    } else {
        None
    };
    let max = if has_mean {
        short_term_rows.iter().filter_map(|r| r.max).fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.max(v)))
        })
    } else {
        None
    };
    let sum = if has_sum {
        short_term_rows.last().and_then(|r| r.sum)
    } else {
        None
    };
    let state = short_term_rows.last().and_then(|r| r.state);

    Some(StatisticRow {
        metadata_id,
        start: hour_start,
        created,
        state,
        mean,
        min,
        max,
        sum,
        last_reset: None,
    })
}

/// Run one 5-minute compaction cycle for `period_start` (spec §4.2): poll
/// every registered platform, upsert metadata, write short-term rows,
/// optionally roll the completed hour at :55, and record a run marker so a
/// retry of the same `period_start` is a no-op. `period_start` must already
/// be 5-minute aligned; callers (the task queue worker) are responsible for
/// that, matching the original's assumption that its caller only ever
/// schedules on exact boundaries.
///
/// Returns the statistic_ids whose descriptor changed this cycle, so the
/// caller can refresh dependent caches in a fresh transaction (spec §4.2
/// step 6).
pub fn run_five_minute_compaction(
    conn: &Connection,
    metadata: &MetadataManager,
    platforms: &PlatformRegistry,
    period_start: DateTime<Utc>,
) -> Result<HashSet<String>> {
    if storage::run_exists(conn, period_start)? {
        return Ok(HashSet::new());
    }

    let period_end = period_start + SHORT_TERM_PERIOD;
    let platform_results = platforms.compile_statistics(period_start, period_end);

    let mut changed = HashSet::new();
    let mut rows: Vec<StatisticRow> = Vec::with_capacity(platform_results.len());
    for result in platform_results {
        let (modified, metadata_id) = metadata.update_or_add(conn, &result.meta)?;
        if let Some(id) = modified {
            changed.insert(id);
        }
        rows.push(StatisticRow {
            metadata_id,
            start: result.start,
            created: Utc::now(),
            state: result.state,
            mean: result.mean,
            min: result.min,
            max: result.max,
            sum: result.sum,
            last_reset: result.last_reset,
        });
    }
    storage::insert_rows(conn, true, &rows)?;

    if period_start.minute() == 55 {
        let hour_start = hour_bucket_start(period_start);
        roll_hour(conn, metadata, hour_start)?;
    }

    storage::record_run(conn, period_start, Utc::now())?;
    Ok(changed)
}

/// Roll up every metadata_id's short-term rows for `hour_start` into one
/// long-term row each (spec §4.3), skipping ids with no rows in that hour.
pub fn roll_hour(
    conn: &Connection,
    metadata: &MetadataManager,
    hour_start: DateTime<Utc>,
) -> Result<()> {
    for meta in metadata.list_all() {
        let short_term_rows = storage::fetch_rows(
            conn,
            true,
            meta.id,
            hour_start,
            hour_start + Duration::hours(1),
        )?;
        if let Some(row) =
            rollup_hour(meta.id, hour_start, &short_term_rows, meta.has_mean, meta.has_sum)
        {
            storage::insert_rows(conn, false, std::slice::from_ref(&row))?;
        }
    }
    Ok(())
}

/// List the hour-aligned period starts in `[since, until)` that have no
/// recorded run marker at or after them, used by the `CatchUpMissing` task
/// (spec §4.4) to recompute gaps left by downtime.
pub fn missing_periods(
    last_run: Option<DateTime<Utc>>,
    until: DateTime<Utc>,
    period: Duration,
) -> Vec<DateTime<Utc>> {
    let Some(last_run) = last_run else {
        return Vec::new();
    };
    let mut out = Vec::new();
    let mut cursor = last_run + period;
    while cursor < until {
        out.push(cursor);
        cursor += period;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn bucket_alignment_rounds_down() {
        let start = short_term_bucket_start(ts(0) + Duration::minutes(7));
        assert_eq!(start.minute() % 5, 0);
    }

    #[test]
    fn time_weighted_mean_favors_longer_hold() {
        let period_start = ts(0);
        let samples = vec![
            Sample { at: period_start, value: 0.0 },
            Sample { at: period_start + Duration::seconds(270), value: 100.0 },
        ];
        let mean = time_weighted_mean(&samples, period_start, period_start + SHORT_TERM_PERIOD);
        // 270s at 0.0, 30s at 100.0 out of 300s total
        assert!((mean - 10.0).abs() < 1e-6);
    }

    #[test]
    fn sum_ignores_negative_deltas() {
        let period_start = ts(0);
        let samples = vec![
            Sample { at: period_start, value: 10.0 },
            Sample { at: period_start + Duration::minutes(1), value: 15.0 },
            // meter reset
            Sample { at: period_start + Duration::minutes(2), value: 2.0 },
            Sample { at: period_start + Duration::minutes(3), value: 6.0 },
        ];
        let row = compile_short_term(1, period_start, &samples, Some(0.0), false, true).unwrap();
        // deltas: +5, reset (skip), +4 => 9, running_sum seeded at 0 since Some(0.0) passed
        assert_eq!(row.sum, Some(9.0));
    }

    #[test]
    fn rollup_carries_last_sum_forward() {
        let hour_start = ts(0);
        let rows = vec![
            StatisticRow {
                metadata_id: 1,
                start: hour_start,
                created: hour_start,
                state: Some(1.0),
                mean: None,
                min: None,
                max: None,
                sum: Some(5.0),
                last_reset: None,
            },
            StatisticRow {
                metadata_id: 1,
                start: hour_start + SHORT_TERM_PERIOD,
                created: hour_start,
                state: Some(2.0),
                mean: None,
                min: None,
                max: None,
                sum: Some(9.0),
                last_reset: None,
            },
        ];
        let rolled = rollup_hour(1, hour_start, &rows, false, true).unwrap();
        assert_eq!(rolled.sum, Some(9.0));
        assert_eq!(rolled.state, Some(2.0));
    }

    #[test]
    fn missing_periods_empty_without_prior_run() {
        assert!(missing_periods(None, Utc::now(), SHORT_TERM_PERIOD).is_empty());
    }
}
