//! Query engine (spec §5, C5): pooled read-only access to the statistics
//! tables, period reduction, and unit conversion on read.
//!
//! Grounded in the teacher's `pipeline/lifestats_query.rs` r2d2 connection
//! pool (`SqliteConnectionManager::file` + `Pool::builder().max_size(N)`),
//! generalized from a single FTS5 query surface to the statistics engine's
//! period-reduction/unit-conversion read path.

use crate::error::{RecorderError, Result};
use crate::metadata::MetadataManager;
use crate::model::{Period, PeriodSummary, StatisticResult};
use crate::platform::{LiveEntityState, NoLiveEntityState};
use crate::units;
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::sync::Arc;

/// Pooled reader over the statistics database. Up to 4 concurrent readers,
/// matching the teacher's `LifestatsQuery` sizing — WAL mode lets these
/// proceed concurrently with the single writer thread.
pub struct QueryEngine {
    pool: Pool<SqliteConnectionManager>,
    metadata: Arc<MetadataManager>,
    live_entity: Arc<dyn LiveEntityState>,
}

impl QueryEngine {
    pub fn new(db_path: impl AsRef<Path>, metadata: Arc<MetadataManager>) -> Result<Self> {
        Self::with_live_entity(db_path, metadata, Arc::new(NoLiveEntityState))
    }

    /// Like [`QueryEngine::new`], but with a host-supplied live-entity-state
    /// lookup consulted for display-unit inference (spec §4.1) when a
    /// caller doesn't pass an explicit `display_unit`.
    pub fn with_live_entity(
        db_path: impl AsRef<Path>,
        metadata: Arc<MetadataManager>,
        live_entity: Arc<dyn LiveEntityState>,
    ) -> Result<Self> {
        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch("PRAGMA query_only = ON; PRAGMA busy_timeout=5000;")
        });
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| RecorderError::Internal(format!("failed to build read pool: {e}")))?;
        Ok(Self {
            pool,
            metadata,
            live_entity,
        })
    }

    /// Fetch rows for `statistic_id` in `[start, end)` at the requested
    /// period, stitching short-term (head/tail) and long-term (main) tables
    /// the way the original does for periods finer than an hour (spec §5
    /// `statistics_during_period`).
    pub fn statistics_during_period(
        &self,
        statistic_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: Period,
        display_unit: Option<&str>,
        tz: Tz,
    ) -> Result<Vec<StatisticResult>> {
        let Some(meta) = self.metadata.get(statistic_id) else {
            return Ok(Vec::new());
        };
        let conn = self
            .pool
            .get()
            .map_err(|e| RecorderError::Internal(format!("pool exhausted: {e}")))?;

        let short_term = matches!(period, Period::FiveMinute);
        let mut rows = crate::storage::fetch_rows(&conn, short_term, meta.id, start, end)?;

        // Continuity lookup (spec §4.5): if nothing covers `start` exactly,
        // fetch the most recent row before it and prepend it so the client
        // doesn't see a gap at the start of the requested range.
        let covers_start = rows.first().is_some_and(|r| r.start == start);
        if !covers_start {
            if let Some(prior) =
                crate::storage::fetch_row_before(&conn, short_term, meta.id, start)?
            {
                rows.insert(0, prior);
            }
        }

        let mut results: Vec<StatisticResult> = rows
            .into_iter()
            .map(|r| StatisticResult {
                start: r.start,
                end: r.start
                    + match period {
                        Period::FiveMinute => crate::compaction::SHORT_TERM_PERIOD,
                        _ => Duration::hours(1),
                    },
                mean: r.mean,
                min: r.min,
                max: r.max,
                last_reset: r.last_reset,
                state: r.state,
                sum: r.sum,
            })
            .collect();

        if matches!(period, Period::Day | Period::Week | Period::Month) {
            results = reduce(&results, period, tz);
        }

        // Display-unit resolution (spec §4.1): an explicit override wins;
        // otherwise fall back to the live entity's current attribute unit if
        // it's a valid member of the stored unit's class; otherwise leave
        // values in the stored unit.
        let resolved_unit = display_unit.map(str::to_string).or_else(|| {
            let stored = meta.unit_of_measurement.as_deref()?;
            let live = self.live_entity.current_unit_of_measurement(statistic_id)?;
            (units::unit_class(&live) == units::unit_class(stored)).then_some(live)
        });

        if let Some(to_unit) = resolved_unit {
            if let Some(from_unit) = meta.unit_of_measurement.as_deref() {
                if from_unit != to_unit {
                    convert_series(&mut results, from_unit, &to_unit)?;
                }
            }
        }

        Ok(results)
    }

    /// Single aggregate summary over `[start, end)` (spec §5
    /// `statistic_during_period`): stitches the short-term table for any
    /// partial hour at the head/tail of the range with the long-term table
    /// for whole hours in between, the way the original's `_statistic_by_id`
    /// bridges the two tables instead of forcing callers onto hour-aligned
    /// ranges.
    ///
    /// `mean`/`min`/`max` are duration-weighted across every bucket touched
    /// (5-minute short-term buckets weigh 5 minutes, hourly long-term
    /// buckets weigh an hour); `change` is the newest known `sum` at or
    /// before `end` minus the true opening balance of the range — the
    /// first non-null `sum` in the bucket that covers `start` itself, not a
    /// bucket strictly before it, falling back further into the past only
    /// when no row covers `start` (spec §5 "change" backward scan; the
    /// original's `_get_oldest_sum_statistic` scans its opening bucket
    /// inclusively the same way).
    pub fn statistic_during_period(
        &self,
        statistic_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PeriodSummary> {
        let Some(meta) = self.metadata.get(statistic_id) else {
            return Ok(PeriodSummary::default());
        };
        let conn = self
            .pool
            .get()
            .map_err(|e| RecorderError::Internal(format!("pool exhausted: {e}")))?;

        if end <= start {
            return Ok(PeriodSummary::default());
        }

        let first_full_hour = next_hour_boundary(start);
        let last_full_hour_end = crate::compaction::hour_bucket_start(end);

        let mut buckets: Vec<(Duration, Option<f64>, Option<f64>, Option<f64>)> = Vec::new();

        if first_full_hour < last_full_hour_end {
            let head_end = first_full_hour;
            if head_end > start {
                for r in crate::storage::fetch_rows(&conn, true, meta.id, start, head_end)? {
                    buckets.push((crate::compaction::SHORT_TERM_PERIOD, r.mean, r.min, r.max));
                }
            }
            for r in crate::storage::fetch_rows(&conn, false, meta.id, first_full_hour, last_full_hour_end)? {
                buckets.push((Duration::hours(1), r.mean, r.min, r.max));
            }
            if end > last_full_hour_end {
                for r in crate::storage::fetch_rows(&conn, true, meta.id, last_full_hour_end, end)? {
                    buckets.push((crate::compaction::SHORT_TERM_PERIOD, r.mean, r.min, r.max));
                }
            }
        } else {
            // Range doesn't span a full hour: short-term rows cover it end to end.
            for r in crate::storage::fetch_rows(&conn, true, meta.id, start, end)? {
                buckets.push((crate::compaction::SHORT_TERM_PERIOD, r.mean, r.min, r.max));
            }
        }

        let total_weight: f64 = buckets
            .iter()
            .filter(|(_, mean, _, _)| mean.is_some())
            .map(|(d, _, _, _)| d.num_seconds() as f64)
            .sum();
        let mean = if total_weight > 0.0 {
            let weighted: f64 = buckets
                .iter()
                .filter_map(|(d, mean, _, _)| mean.map(|m| m * d.num_seconds() as f64))
                .sum();
            Some(weighted / total_weight)
        } else {
            None
        };
        let min = buckets
            .iter()
            .filter_map(|(_, _, min, _)| *min)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.min(v))));
        let max = buckets
            .iter()
            .filter_map(|(_, _, _, max)| *max)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));

        let change = if meta.has_sum {
            let newest = crate::storage::sum_at_or_before(
                &conn,
                meta.id,
                end - Duration::nanoseconds(1),
            )?;
            // Anchored at `start` itself (inclusive), not `start - epsilon`:
            // the opening bucket is the one covering `start`, so a row
            // whose `start_ts` equals `start` exactly is the true opening
            // balance, not the previous bucket's closing one.
            let oldest = crate::storage::sum_at_or_before(&conn, meta.id, start)?;
            match (newest, oldest) {
                (Some(n), Some(o)) => Some(n - o),
                (Some(n), None) => Some(n),
                _ => None,
            }
        } else {
            None
        };

        Ok(PeriodSummary { mean, min, max, change })
    }

    /// Most recent row per `statistic_id` from the long-term table (spec §5
    /// `get_last_statistics`).
    pub fn last_statistics(
        &self,
        statistic_id: &str,
        number_of_stats: usize,
    ) -> Result<Vec<StatisticResult>> {
        let Some(meta) = self.metadata.get(statistic_id) else {
            return Ok(Vec::new());
        };
        let conn = self
            .pool
            .get()
            .map_err(|e| RecorderError::Internal(format!("pool exhausted: {e}")))?;
        let far_past = Utc.timestamp_opt(0, 0).unwrap();
        let mut rows = crate::storage::fetch_rows(&conn, false, meta.id, far_past, Utc::now())?;
        rows.reverse();
        rows.truncate(number_of_stats);
        Ok(rows
            .into_iter()
            .map(|r| StatisticResult {
                start: r.start,
                end: r.start + Duration::hours(1),
                mean: r.mean,
                min: r.min,
                max: r.max,
                last_reset: r.last_reset,
                state: r.state,
                sum: r.sum,
            })
            .collect())
    }

    /// Most recent row per `statistic_id` from the short-term table (spec
    /// §5 `get_latest_short_term_statistics`).
    pub fn latest_short_term_statistics(
        &self,
        statistic_id: &str,
    ) -> Result<Option<StatisticResult>> {
        let Some(meta) = self.metadata.get(statistic_id) else {
            return Ok(None);
        };
        let conn = self
            .pool
            .get()
            .map_err(|e| RecorderError::Internal(format!("pool exhausted: {e}")))?;
        let far_past = Utc.timestamp_opt(0, 0).unwrap();
        let mut rows = crate::storage::fetch_rows(&conn, true, meta.id, far_past, Utc::now())?;
        Ok(rows.pop().map(|r| StatisticResult {
            start: r.start,
            end: r.start + crate::compaction::SHORT_TERM_PERIOD,
            mean: r.mean,
            min: r.min,
            max: r.max,
            last_reset: r.last_reset,
            state: r.state,
            sum: r.sum,
        }))
    }
}

/// Convert every numeric field in `results` from `from_unit` to `to_unit`
/// in place. Validation happens once up front so a mid-series failure isn't
/// possible (spec §5 unit conversion on read).
fn convert_series(results: &mut [StatisticResult], from_unit: &str, to_unit: &str) -> Result<()> {
    if !units::can_convert(Some(from_unit), Some(to_unit)) {
        return Err(RecorderError::Validation(format!(
            "cannot convert {from_unit} to {to_unit}"
        )));
    }
    for r in results.iter_mut() {
        r.mean = r.mean.and_then(|v| units::convert(v, from_unit, to_unit));
        r.min = r.min.and_then(|v| units::convert(v, from_unit, to_unit));
        r.max = r.max.and_then(|v| units::convert(v, from_unit, to_unit));
        r.state = r.state.and_then(|v| units::convert(v, from_unit, to_unit));
        r.sum = r.sum.and_then(|v| units::convert(v, from_unit, to_unit));
    }
    Ok(())
}

/// Reduce a sequence of hourly rows to day/week/month buckets in timezone
/// `tz`, time-weighting the mean across hours the way the hourly rollup
/// time-weights 5-minute buckets. Grounded in the original's
/// `reduce_day_ts_factory`/`_reduce_statistics` boundary-closure pattern;
/// here the boundary function is computed directly per call rather than
/// memoized, since a query's bucket count is small and bounded.
fn reduce(rows: &[StatisticResult], period: Period, tz: Tz) -> Vec<StatisticResult> {
    if rows.is_empty() {
        return Vec::new();
    }
    let bucket_start = |dt: DateTime<Utc>| -> DateTime<Utc> { period_boundary(dt, period, tz) };

    let mut buckets: Vec<(DateTime<Utc>, Vec<&StatisticResult>)> = Vec::new();
    for row in rows {
        let bucket = bucket_start(row.start);
        match buckets.last_mut() {
            Some((b, members)) if *b == bucket => members.push(row),
            _ => buckets.push((bucket, vec![row])),
        }
    }

    buckets
        .into_iter()
        .map(|(bucket, members)| {
            let count = members.len() as f64;
            let mean = {
                let sum: f64 = members.iter().filter_map(|r| r.mean).sum();
                if members.iter().any(|r| r.mean.is_some()) {
                    Some(sum / count)
                } else {
                    None
                }
            };
            let min = members
                .iter()
                .filter_map(|r| r.min)
                .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.min(v))));
            let max = members
                .iter()
                .filter_map(|r| r.max)
                .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));
            let last = members.last().unwrap();
            let end = next_period_boundary(bucket, period, tz);
            StatisticResult {
                start: bucket,
                end,
                mean,
                min,
                max,
                last_reset: last.last_reset,
                state: last.state,
                sum: last.sum,
            }
        })
        .collect()
}

/// The next hour boundary at or after `dt`; `dt` itself if already aligned.
fn next_hour_boundary(dt: DateTime<Utc>) -> DateTime<Utc> {
    let floor = crate::compaction::hour_bucket_start(dt);
    if floor == dt {
        floor
    } else {
        floor + Duration::hours(1)
    }
}

fn period_boundary(dt: DateTime<Utc>, period: Period, tz: Tz) -> DateTime<Utc> {
    let local = dt.with_timezone(&tz);
    let boundary_local = match period {
        Period::Day => local.date_naive().and_hms_opt(0, 0, 0).unwrap(),
        Period::Week => {
            let days_since_monday = local.weekday().num_days_from_monday();
            (local.date_naive() - Duration::days(days_since_monday as i64))
                .and_hms_opt(0, 0, 0)
                .unwrap()
        }
        Period::Month => local
            .date_naive()
            .with_day(1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap(),
        Period::FiveMinute | Period::Hour => local.naive_local(),
    };
    tz.from_local_datetime(&boundary_local)
        .single()
        .unwrap_or(local)
        .with_timezone(&Utc)
}

fn next_period_boundary(start: DateTime<Utc>, period: Period, tz: Tz) -> DateTime<Utc> {
    let local = start.with_timezone(&tz);
    let next_local = match period {
        Period::Day => local.date_naive() + Duration::days(1),
        Period::Week => local.date_naive() + Duration::days(7),
        Period::Month => {
            let (y, m) = if local.month() == 12 {
                (local.year() + 1, 1)
            } else {
                (local.year(), local.month() + 1)
            };
            chrono::NaiveDate::from_ymd_opt(y, m, 1).unwrap()
        }
        Period::FiveMinute | Period::Hour => return start,
    };
    tz.from_local_datetime(&next_local.and_hms_opt(0, 0, 0).unwrap())
        .single()
        .unwrap_or(local)
        .with_timezone(&Utc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk(hour: i64, mean: f64) -> StatisticResult {
        StatisticResult {
            start: Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::hours(hour),
            end: Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::hours(hour + 1),
            mean: Some(mean),
            min: Some(mean - 1.0),
            max: Some(mean + 1.0),
            last_reset: None,
            state: Some(mean),
            sum: Some(mean),
        }
    }

    fn engine_with_data() -> (tempfile::TempDir, QueryEngine, DateTime<Utc>) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("stats.db");
        let hour0 = Utc.timestamp_opt(1_699_999_200, 0).unwrap();

        let metadata = Arc::new({
            let conn = rusqlite::Connection::open(&db_path).unwrap();
            crate::storage::apply_pragmas(&conn).unwrap();
            crate::storage::init_schema(&conn).unwrap();
            let mgr = MetadataManager::load(&conn).unwrap();
            let meta = mgr
                .get_or_create(&conn, "sensor:energy", "sensor", Some("kWh"), true, true)
                .unwrap();

            let head: Vec<_> = (0..10)
                .map(|i| crate::model::StatisticRow {
                    metadata_id: meta.id,
                    start: hour0 + Duration::minutes(10 + i * 5),
                    created: hour0,
                    state: None,
                    mean: Some(10.0),
                    min: Some(9.0),
                    max: Some(11.0),
                    sum: Some(100.0 + i as f64),
                    last_reset: None,
                })
                .collect();
            crate::storage::insert_rows(&conn, true, &head).unwrap();

            crate::storage::insert_rows(
                &conn,
                false,
                &[crate::model::StatisticRow {
                    metadata_id: meta.id,
                    start: hour0 + Duration::hours(1),
                    created: hour0,
                    state: None,
                    mean: Some(20.0),
                    min: Some(15.0),
                    max: Some(25.0),
                    sum: Some(200.0),
                    last_reset: None,
                }],
            )
            .unwrap();

            let tail: Vec<_> = (0..4)
                .map(|i| crate::model::StatisticRow {
                    metadata_id: meta.id,
                    start: hour0 + Duration::hours(2) + Duration::minutes(i * 5),
                    created: hour0,
                    state: None,
                    mean: Some(30.0),
                    min: Some(29.0),
                    max: Some(31.0),
                    sum: Some(300.0 + i as f64),
                    last_reset: None,
                })
                .collect();
            crate::storage::insert_rows(&conn, true, &tail).unwrap();

            mgr
        });

        let engine = QueryEngine::new(&db_path, metadata).unwrap();
        (dir, engine, hour0)
    }

    #[test]
    fn statistic_during_period_stitches_head_main_tail() {
        let (_dir, engine, hour0) = engine_with_data();
        let start = hour0 + Duration::minutes(10);
        let end = hour0 + Duration::hours(2) + Duration::minutes(20);

        let summary = engine
            .statistic_during_period("sensor:energy", start, end)
            .unwrap();

        assert!((summary.mean.unwrap() - 17.692_307_692_307_693).abs() < 1e-6);
        assert_eq!(summary.min, Some(9.0));
        assert_eq!(summary.max, Some(31.0));
        // Opening bucket (start == head row 0's start_ts) carries sum 100;
        // newest sum at or before `end` is tail row sum 303. change = 203.
        assert_eq!(summary.change, Some(203.0));
    }

    #[test]
    fn statistic_during_period_empty_range_is_default() {
        let (_dir, engine, hour0) = engine_with_data();
        let summary = engine
            .statistic_during_period("sensor:energy", hour0, hour0)
            .unwrap();
        assert_eq!(summary, PeriodSummary::default());
    }

    #[test]
    fn change_uses_opening_bucket_not_prior_bucket() {
        // Spec §8 E2E #2/#3: three hourly rows sum=[100,150,200] at H,
        // H+1, H+2; change over [H, H+2h30m) is 100 before any adjustment,
        // 105 after a +5 adjustment applied from H+1 onward.
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("stats.db");
        let h = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        let metadata = Arc::new({
            let conn = rusqlite::Connection::open(&db_path).unwrap();
            crate::storage::apply_pragmas(&conn).unwrap();
            crate::storage::init_schema(&conn).unwrap();
            let mgr = MetadataManager::load(&conn).unwrap();
            let meta = mgr
                .get_or_create(&conn, "grid:energy", "grid", Some("kWh"), false, true)
                .unwrap();

            let rows: Vec<_> = [100.0, 150.0, 200.0]
                .iter()
                .enumerate()
                .map(|(i, &sum)| crate::model::StatisticRow {
                    metadata_id: meta.id,
                    start: h + Duration::hours(i as i64),
                    created: h,
                    state: None,
                    mean: None,
                    min: None,
                    max: None,
                    sum: Some(sum),
                    last_reset: None,
                })
                .collect();
            crate::storage::insert_rows(&conn, false, &rows).unwrap();
            mgr
        });

        let engine = QueryEngine::new(&db_path, metadata).unwrap();
        let summary = engine
            .statistic_during_period(
                "grid:energy",
                h,
                h + Duration::hours(2) + Duration::minutes(30),
            )
            .unwrap();
        assert_eq!(summary.change, Some(100.0));

        let metadata_id = metadata.get("grid:energy").unwrap().id;
        {
            let conn = rusqlite::Connection::open(&db_path).unwrap();
            crate::storage::adjust_sum_from(&conn, metadata_id, h + Duration::hours(1), 5.0)
                .unwrap();
        }

        let summary = engine
            .statistic_during_period(
                "grid:energy",
                h,
                h + Duration::hours(2) + Duration::minutes(30),
            )
            .unwrap();
        assert_eq!(summary.change, Some(105.0));
    }

    struct FixedLiveEntity(&'static str);

    impl LiveEntityState for FixedLiveEntity {
        fn current_unit_of_measurement(&self, _entity_id: &str) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    #[test]
    fn display_unit_falls_back_to_live_entity_unit() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("stats.db");
        let hour0 = Utc.timestamp_opt(1_699_999_200, 0).unwrap();

        let metadata = Arc::new({
            let conn = rusqlite::Connection::open(&db_path).unwrap();
            crate::storage::apply_pragmas(&conn).unwrap();
            crate::storage::init_schema(&conn).unwrap();
            let mgr = MetadataManager::load(&conn).unwrap();
            let meta = mgr
                .get_or_create(&conn, "sensor:temp", "sensor", Some("°C"), true, false)
                .unwrap();
            crate::storage::insert_rows(
                &conn,
                false,
                &[crate::model::StatisticRow {
                    metadata_id: meta.id,
                    start: hour0,
                    created: hour0,
                    state: None,
                    mean: Some(20.0),
                    min: Some(20.0),
                    max: Some(20.0),
                    sum: None,
                    last_reset: None,
                }],
            )
            .unwrap();
            mgr
        });

        let engine = QueryEngine::with_live_entity(
            &db_path,
            metadata,
            Arc::new(FixedLiveEntity("°F")),
        )
        .unwrap();

        let results = engine
            .statistics_during_period(
                "sensor:temp",
                hour0,
                hour0 + Duration::hours(1),
                Period::Hour,
                None,
                Tz::UTC,
            )
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!((results[0].mean.unwrap() - 68.0).abs() < 1e-9);
    }

    #[test]
    fn statistics_during_period_prepends_continuity_row() {
        // hour0+1h is the only long-term row; requesting a window that
        // starts after it (but before any later row exists) should still
        // surface it so the caller can see the last known value.
        let (_dir, engine, hour0) = engine_with_data();
        let results = engine
            .statistics_during_period(
                "sensor:energy",
                hour0 + Duration::hours(1) + Duration::minutes(30),
                hour0 + Duration::hours(3),
                Period::Hour,
                None,
                Tz::UTC,
            )
            .unwrap();
        assert_eq!(results[0].start, hour0 + Duration::hours(1));
        assert!((results[0].mean.unwrap() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn reduce_to_day_averages_hours() {
        let rows = vec![mk(0, 10.0), mk(1, 20.0), mk(2, 30.0)];
        let reduced = reduce(&rows, Period::Day, Tz::UTC);
        assert_eq!(reduced.len(), 1);
        assert!((reduced[0].mean.unwrap() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn reduce_to_day_splits_across_boundary() {
        // 24 hourly rows starting at hour 0 plus one more in the next day
        let mut rows: Vec<StatisticResult> = (0..24).map(|h| mk(h, 1.0)).collect();
        rows.push(mk(24, 5.0));
        let reduced = reduce(&rows, Period::Day, Tz::UTC);
        assert_eq!(reduced.len(), 2);
    }
}
