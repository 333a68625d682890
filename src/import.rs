//! Import, adjustment, and unit-change operations (spec §4.6), plus the
//! duplicate-repair sweep (SPEC_FULL §9.3).
//!
//! Grounded in the original's `_import_statistics_with_session`,
//! `adjust_statistics`, and `change_statistics_unit` — reworked here as
//! plain functions over [`crate::storage`] and [`crate::metadata`] rather
//! than ORM session methods, called from the task queue worker (spec §4.8)
//! with its single writer connection.

use crate::error::{RecorderError, Result};
use crate::metadata::{self, MetadataManager};
use crate::model::{ImportRequest, ImportTimestamp, StatisticRow};
use crate::storage;
use crate::units;
use chrono::{DateTime, Timelike, Utc};
use rusqlite::Connection;

/// Outcome of an import: how many rows were written (spec §4.6 row
/// semantics — an existing `(metadata_id, start)` is overwritten in place,
/// not skipped, so "duplicate" isn't a distinct outcome here).
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOutcome {
    pub rows_written: usize,
}

/// Reject a naive timestamp (spec §4.6: "Validates that `start` and
/// `last_reset` are timezone-aware") and normalize an aware one to UTC.
pub fn require_aware(ts: ImportTimestamp) -> Result<DateTime<Utc>> {
    match ts {
        ImportTimestamp::Naive(naive) => Err(RecorderError::Validation(format!(
            "timestamp {naive} is not timezone-aware"
        ))),
        ImportTimestamp::Aware(dt) => Ok(dt.with_timezone(&Utc)),
    }
}

/// Full validation pass for an import request (spec §4.6): timestamp
/// awareness/alignment and statistic_id/source shape. Nothing is written
/// until every row passes; a single invalid row fails the whole request
/// (spec §7a: "nothing is written" on a validation error).
pub fn validate_import(request: &ImportRequest) -> Result<Vec<StatisticRow>> {
    if request.internal {
        if request.statistic_id.split('.').count() != 2
            || request.statistic_id.starts_with('.')
            || request.statistic_id.ends_with('.')
        {
            return Err(RecorderError::Validation(format!(
                "{} is not a valid entity id (internal import requires <domain>.<object>)",
                request.statistic_id
            )));
        }
        if request.source != "recorder" {
            return Err(RecorderError::Validation(format!(
                "internal import source must be \"recorder\", got {:?}",
                request.source
            )));
        }
    } else {
        if !metadata::valid_statistic_id(&request.statistic_id) {
            return Err(RecorderError::Validation(format!(
                "{} is not a valid external statistic_id",
                request.statistic_id
            )));
        }
        let (prefix, _) = metadata::split_statistic_id(&request.statistic_id).unwrap();
        if request.source != prefix {
            return Err(RecorderError::Validation(format!(
                "external import source {:?} must equal the statistic_id prefix {:?}",
                request.source, prefix
            )));
        }
    }

    let mut rows = Vec::with_capacity(request.rows.len());
    for row in &request.rows {
        let start = require_aware(row.start)?;
        if start.minute() != 0 || start.second() != 0 || start.nanosecond() != 0 {
            return Err(RecorderError::Validation(format!(
                "import start {start} is not hour-aligned"
            )));
        }
        let last_reset = row.last_reset.map(require_aware).transpose()?;
        rows.push(StatisticRow {
            metadata_id: 0, // resolved by import_statistics once metadata exists
            start,
            created: Utc::now(),
            state: row.state,
            mean: row.mean,
            min: row.min,
            max: row.max,
            sum: row.sum,
            last_reset,
        });
    }
    Ok(rows)
}

/// Import externally- or internally-sourced rows for a statistic,
/// validating the request first (spec §4.6), creating its metadata row if
/// this is the first time the engine has seen it, and writing each row in
/// place (insert if new, overwrite if `(metadata_id, start)` already
/// exists).
pub fn import_statistics(
    conn: &Connection,
    metadata: &MetadataManager,
    request: &ImportRequest,
) -> Result<ImportOutcome> {
    let mut rows = validate_import(request)?;

    let meta = metadata.get_or_create(
        conn,
        &request.statistic_id,
        &request.source,
        request.unit_of_measurement.as_deref(),
        request.has_mean,
        request.has_sum,
    )?;
    for row in rows.iter_mut() {
        row.metadata_id = meta.id;
    }

    // Import rows are always hour-aligned (validated above), so they always
    // land in the long-term table, never the 5-minute short-term one.
    storage::upsert_rows(conn, false, &rows)?;

    Ok(ImportOutcome {
        rows_written: rows.len(),
    })
}

/// Shift every sum-bearing long-term and short-term row at or after
/// `start` by `adjustment` (spec §4.6 `adjust_statistics`, used to correct
/// a meter rollover or manual correction).
pub fn adjust_statistics(
    conn: &Connection,
    metadata: &MetadataManager,
    statistic_id: &str,
    start: DateTime<Utc>,
    adjustment: f64,
) -> Result<usize> {
    let Some(meta) = metadata.get(statistic_id) else {
        return Err(RecorderError::Validation(format!(
            "unknown statistic_id: {statistic_id}"
        )));
    };
    if !meta.has_sum {
        return Err(RecorderError::Validation(format!(
            "{statistic_id} has no sum to adjust"
        )));
    }
    storage::adjust_sum_from(conn, meta.id, start, adjustment)
}

/// Rescale every historical row for `statistic_id` from `from_unit` to
/// `to_unit` and update its metadata (spec §4.6 `change_statistics_unit`).
///
/// Only linear (non-[`crate::model::UnitClass::Temperature`]) unit classes
/// are supported: a linear class converts by a single multiplicative
/// factor applied in bulk by the database, while temperature's affine
/// offset would require rewriting every row value individually. No
/// platform registered with this engine emits temperature statistics with
/// a mutable unit of measurement, so the affine case is rejected rather
/// than implemented (see DESIGN.md Open Questions).
pub fn change_statistics_unit(
    conn: &Connection,
    metadata: &MetadataManager,
    statistic_id: &str,
    from_unit: Option<&str>,
    to_unit: Option<&str>,
) -> Result<()> {
    let Some(meta) = metadata.get(statistic_id) else {
        return Err(RecorderError::Validation(format!(
            "unknown statistic_id: {statistic_id}"
        )));
    };

    let (from, to) = match (from_unit, to_unit) {
        (Some(f), Some(t)) => (f, t),
        _ => {
            metadata.update_unit_of_measurement(conn, statistic_id, to_unit)?;
            return Ok(());
        }
    };

    if !units::can_convert(Some(from), Some(to)) {
        return Err(RecorderError::Validation(format!(
            "cannot convert {from} to {to} for {statistic_id}"
        )));
    }
    if units::unit_class(from) == Some(crate::model::UnitClass::Temperature) {
        return Err(RecorderError::Validation(
            "bulk unit change is not supported for temperature (affine) units".to_string(),
        ));
    }

    let factor = units::convert(1.0, from, to).ok_or_else(|| {
        RecorderError::Internal(format!("conversion factor missing for {from}->{to}"))
    })?;
    storage::rescale_statistic(conn, meta.id, factor)?;
    metadata.update_unit_of_measurement(conn, statistic_id, Some(to))?;
    Ok(())
}

/// Remove all rows and metadata for a set of statistic_ids (spec §4.7
/// `clear_statistics`).
pub fn clear_statistics(
    conn: &Connection,
    metadata: &MetadataManager,
    statistic_ids: &[String],
) -> Result<()> {
    let ids: Vec<i64> = statistic_ids
        .iter()
        .filter_map(|id| metadata.get(id).map(|m| m.id))
        .collect();
    storage::delete_all_for_metadata_ids(conn, &ids)?;
    for statistic_id in statistic_ids {
        metadata.delete(conn, statistic_id)?;
    }
    Ok(())
}

/// SQLite's bind-variable limit is 999; chunk deletes one below it so a
/// large duplicate sweep never hits `SQLITE_MAX_VARIABLE_NUMBER` (spec
/// §4.6 duplicate repair).
const DELETE_CHUNK_SIZE: usize = 998;

/// Full duplicate-repair sweep: row-level duplicates in both statistics
/// tables, then metadata-level duplicates (SPEC_FULL §9.3). Any duplicate
/// row whose scalar fields differ from the row being kept is written to a
/// JSON backup file under `backup_dir` before deletion (spec §4.6 "write a
/// JSON backup of any non-identical duplicates"); identical duplicates are
/// dropped silently since nothing of value would be lost.
pub fn repair_duplicates(
    conn: &Connection,
    metadata: &MetadataManager,
    backup_dir: &std::path::Path,
) -> Result<usize> {
    let mut total = 0usize;
    let mut backup: Vec<&crate::model::StatisticRow> = Vec::new();

    for short_term in [true, false] {
        let groups = storage::find_duplicate_groups(conn, short_term)?;
        let mut ids: Vec<i64> = Vec::new();
        for group in &groups {
            for (id, row) in &group.removed {
                if !rows_identical(&group.kept, row) {
                    backup.push(row);
                }
                ids.push(*id);
            }
        }
        if !backup.is_empty() {
            write_duplicate_backup(backup_dir, short_term, &backup)?;
        }
        backup.clear();
        for chunk in ids.chunks(DELETE_CHUNK_SIZE) {
            total += storage::delete_rows_by_id(conn, short_term, chunk)?;
        }
    }
    total += metadata.repair_duplicates(conn)?;
    Ok(total)
}

/// Two rows are "identical" for backup purposes if every scalar aggregate
/// field matches (ignoring `created`, which is expected to differ between
/// a duplicate insert and the original).
fn rows_identical(a: &crate::model::StatisticRow, b: &crate::model::StatisticRow) -> bool {
    a.state == b.state
        && a.mean == b.mean
        && a.min == b.min
        && a.max == b.max
        && a.sum == b.sum
        && a.last_reset == b.last_reset
}

fn write_duplicate_backup(
    backup_dir: &std::path::Path,
    short_term: bool,
    rows: &[&crate::model::StatisticRow],
) -> Result<()> {
    let table = if short_term {
        "statistics_short_term"
    } else {
        "statistics"
    };
    let path = backup_dir.join(format!(
        "{table}.duplicates.{}.json",
        Utc::now().timestamp()
    ));
    let json = serde_json::to_string_pretty(rows)
        .map_err(|e| RecorderError::Internal(format!("failed to serialize duplicate backup: {e}")))?;
    std::fs::write(&path, json)
        .map_err(|e| RecorderError::Internal(format!("failed to write duplicate backup {path:?}: {e}")))?;
    tracing::warn!(path = %path.display(), rows = rows.len(), "wrote duplicate-row backup before deletion");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        storage::apply_pragmas(&conn).unwrap();
        storage::init_schema(&conn).unwrap();
        conn
    }

    fn hour_aligned_request(statistic_id: &str, mean: f64) -> ImportRequest {
        let start = Utc.timestamp_opt(1_699_999_200, 0).unwrap(); // :00 on the hour
        ImportRequest {
            statistic_id: statistic_id.into(),
            source: statistic_id.split(':').next().unwrap().into(),
            unit_of_measurement: Some("W".into()),
            has_mean: true,
            has_sum: false,
            name: None,
            internal: false,
            rows: vec![crate::model::ImportRow {
                start: ImportTimestamp::Aware(start.fixed_offset()),
                last_reset: None,
                state: None,
                mean: Some(mean),
                min: Some(mean - 1.0),
                max: Some(mean + 1.0),
                sum: None,
            }],
        }
    }

    #[test]
    fn reimport_overwrites_existing_row() {
        let conn = open();
        let metadata = MetadataManager::load(&conn).unwrap();

        let first = import_statistics(&conn, &metadata, &hour_aligned_request("recorder:power", 10.0))
            .unwrap();
        assert_eq!(first.rows_written, 1);

        let second = import_statistics(&conn, &metadata, &hour_aligned_request("recorder:power", 20.0))
            .unwrap();
        assert_eq!(second.rows_written, 1);

        let meta = metadata.get("recorder:power").unwrap();
        let start = Utc.timestamp_opt(1_699_999_200, 0).unwrap();
        let rows = storage::fetch_rows(&conn, false, meta.id, start, start + chrono::Duration::seconds(1))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].mean, Some(20.0));
    }

    #[test]
    fn import_rejects_naive_timestamp() {
        let conn = open();
        let metadata = MetadataManager::load(&conn).unwrap();
        let mut request = hour_aligned_request("recorder:power", 10.0);
        request.rows[0].start = ImportTimestamp::Naive(
            Utc.timestamp_opt(1_699_999_200, 0).unwrap().naive_utc(),
        );
        assert!(import_statistics(&conn, &metadata, &request).is_err());
    }

    #[test]
    fn import_rejects_unaligned_timestamp() {
        let conn = open();
        let metadata = MetadataManager::load(&conn).unwrap();
        let mut request = hour_aligned_request("recorder:power", 10.0);
        let misaligned = Utc.timestamp_opt(1_699_999_201, 0).unwrap();
        request.rows[0].start = ImportTimestamp::Aware(misaligned.fixed_offset());
        assert!(import_statistics(&conn, &metadata, &request).is_err());
    }

    #[test]
    fn import_rejects_external_source_mismatch() {
        let conn = open();
        let metadata = MetadataManager::load(&conn).unwrap();
        let mut request = hour_aligned_request("recorder:power", 10.0);
        request.source = "other".into();
        assert!(import_statistics(&conn, &metadata, &request).is_err());
    }

    #[test]
    fn change_unit_rejects_incompatible_class() {
        let conn = open();
        let metadata = MetadataManager::load(&conn).unwrap();
        metadata
            .get_or_create(&conn, "sensor.dist", "recorder", Some("km"), true, false)
            .unwrap();
        let err = change_statistics_unit(&conn, &metadata, "sensor.dist", Some("km"), Some("kg"));
        assert!(err.is_err());
    }

    #[test]
    fn change_unit_rescales_rows() {
        let conn = open();
        let metadata = MetadataManager::load(&conn).unwrap();
        let meta = metadata
            .get_or_create(&conn, "sensor.dist", "recorder", Some("km"), true, false)
            .unwrap();
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        storage::insert_rows(
            &conn,
            false,
            &[StatisticRow {
                metadata_id: meta.id,
                start,
                created: start,
                state: None,
                mean: Some(2.0),
                min: Some(1.0),
                max: Some(3.0),
                sum: None,
                last_reset: None,
            }],
        )
        .unwrap();

        change_statistics_unit(&conn, &metadata, "sensor.dist", Some("km"), Some("m")).unwrap();

        let rows = storage::fetch_rows(&conn, false, meta.id, start, start + chrono::Duration::seconds(1))
            .unwrap();
        assert_eq!(rows[0].mean, Some(2000.0));
        assert_eq!(
            metadata.get("sensor.dist").unwrap().unit_of_measurement,
            Some("m".to_string())
        );
    }

    #[test]
    fn repair_duplicates_keeps_one_row_and_backs_up_divergent_payloads() {
        // Legacy pre-unique-index duplicate: two rows for the same
        // (metadata_id, start_ts) with differing `sum` values, inserted
        // directly since the current schema's UNIQUE constraint would
        // otherwise reject the second insert.
        let conn = open();
        let metadata = MetadataManager::load(&conn).unwrap();
        let meta = metadata
            .get_or_create(&conn, "recorder.energy", "recorder", Some("kWh"), false, true)
            .unwrap();
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let start_ts = start.timestamp() as f64;
        conn.execute(
            "INSERT INTO statistics (metadata_id, start_ts, created_ts, sum) VALUES (?1, ?2, ?2, 100.0)",
            rusqlite::params![meta.id, start_ts],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO statistics (metadata_id, start_ts, created_ts, sum) VALUES (?1, ?2, ?3, 150.0)",
            rusqlite::params![meta.id, start_ts, start_ts + 1.0],
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let removed = repair_duplicates(&conn, &metadata, dir.path()).unwrap();
        assert_eq!(removed, 1);

        let rows =
            storage::fetch_rows(&conn, false, meta.id, start, start + chrono::Duration::seconds(1))
                .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sum, Some(100.0));

        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(backups.len(), 1);
        let contents = std::fs::read_to_string(backups[0].path()).unwrap();
        assert!(contents.contains("150.0"));
    }
}
