//! SQLite storage layer (spec §3, §6): schema, migrations, and CRUD
//! primitives over the four statistics tables.
//!
//! Grounded in the teacher's `pipeline/lifestats.rs` schema-init/migration
//! pattern (`init_schema` + idempotent `migrate_vN_to_vN+1` steps gated by a
//! `schema_version` row), generalized from one events table to the four
//! tables the statistics engine needs.

use crate::error::{RecorderError, Result};
use crate::model::{RunMarker, StatisticMetaData, StatisticRow};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Current schema version. Bump and add a `migrate_vN_to_vN+1` step when
/// the table layout changes.
const SCHEMA_VERSION: i64 = 2;

/// Apply performance pragmas appropriate for a single-writer/many-reader
/// SQLite database (spec §6): WAL journaling, NORMAL synchronous, and a
/// generous busy timeout so the task queue worker and query pool don't
/// trip `SQLITE_BUSY` under ordinary contention.
pub fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA busy_timeout=5000;
        PRAGMA foreign_keys=ON;
        "#,
    )?;
    Ok(())
}

/// Create the schema if absent, then run any pending migrations.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS statistics_meta (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            statistic_id TEXT NOT NULL UNIQUE,
            source TEXT NOT NULL,
            unit_of_measurement TEXT,
            has_mean INTEGER NOT NULL,
            has_sum INTEGER NOT NULL,
            name TEXT
        );

        CREATE TABLE IF NOT EXISTS statistics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            metadata_id INTEGER NOT NULL REFERENCES statistics_meta(id),
            start_ts REAL NOT NULL,
            created_ts REAL NOT NULL,
            state REAL,
            mean REAL,
            min REAL,
            max REAL,
            sum REAL,
            last_reset_ts REAL,
            UNIQUE(metadata_id, start_ts)
        );
        CREATE INDEX IF NOT EXISTS ix_statistics_start
            ON statistics (metadata_id, start_ts);

        CREATE TABLE IF NOT EXISTS statistics_short_term (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            metadata_id INTEGER NOT NULL REFERENCES statistics_meta(id),
            start_ts REAL NOT NULL,
            created_ts REAL NOT NULL,
            state REAL,
            mean REAL,
            min REAL,
            max REAL,
            sum REAL,
            last_reset_ts REAL,
            UNIQUE(metadata_id, start_ts)
        );
        CREATE INDEX IF NOT EXISTS ix_statistics_short_term_start
            ON statistics_short_term (metadata_id, start_ts);

        CREATE TABLE IF NOT EXISTS statistics_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            start_ts REAL NOT NULL UNIQUE,
            created_ts REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS recorder_metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )?;

    let version = get_schema_version(conn)?;
    if version == 0 {
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if version < 2 {
        migrate_v1_to_v2(conn)?;
        set_schema_version(conn, 2)?;
    }

    Ok(())
}

/// Legacy databases created before this crate stored `created_ts` as whole
/// seconds sometimes picked up sub-second jitter from the original
/// text-timestamp import path. One unconditional `UPDATE` per table rounds
/// every existing `created_ts` down to whole seconds; new rows are already
/// written this way by [`insert_rows`]/[`upsert_rows`], so this only ever
/// touches rows written under schema version 1.
fn migrate_v1_to_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "UPDATE statistics SET created_ts = CAST(created_ts AS INTEGER);
         UPDATE statistics_short_term SET created_ts = CAST(created_ts AS INTEGER);",
    )?;
    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i64> {
    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM recorder_metadata WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version.and_then(|v| v.parse().ok()).unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO recorder_metadata (key, value) VALUES ('schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![version.to_string()],
    )?;
    Ok(())
}

fn to_epoch(dt: DateTime<Utc>) -> f64 {
    dt.timestamp() as f64 + dt.timestamp_subsec_nanos() as f64 / 1_000_000_000.0
}

fn from_epoch(secs: f64) -> Result<DateTime<Utc>> {
    let whole = secs.trunc() as i64;
    let nanos = ((secs.fract()) * 1_000_000_000.0).round() as u32;
    Utc.timestamp_opt(whole, nanos)
        .single()
        .ok_or_else(|| RecorderError::Internal(format!("invalid timestamp: {secs}")))
}

fn table_name(short_term: bool) -> &'static str {
    if short_term {
        "statistics_short_term"
    } else {
        "statistics"
    }
}

fn row_from_sql(row: &Row<'_>) -> rusqlite::Result<(i64, StatisticRow)> {
    let metadata_id: i64 = row.get("metadata_id")?;
    let start: f64 = row.get("start_ts")?;
    let created: f64 = row.get("created_ts")?;
    let last_reset: Option<f64> = row.get("last_reset_ts")?;
    Ok((
        metadata_id,
        StatisticRow {
            metadata_id,
            start: from_epoch(start).unwrap_or_else(|_| Utc.timestamp_opt(0, 0).unwrap()),
            created: from_epoch(created).unwrap_or_else(|_| Utc.timestamp_opt(0, 0).unwrap()),
            state: row.get("state")?,
            mean: row.get("mean")?,
            min: row.get("min")?,
            max: row.get("max")?,
            sum: row.get("sum")?,
            last_reset: last_reset.and_then(|v| from_epoch(v).ok()),
        },
    ))
}

/// Insert or replace a batch of rows into either the short-term or
/// long-term table, inside a caller-managed transaction. Conflicting
/// (metadata_id, start_ts) pairs are treated as duplicates and skipped
/// (spec §4.2 idempotent compaction): a retry of an already-compacted
/// bucket must not error.
pub fn insert_rows(
    conn: &Connection,
    short_term: bool,
    rows: &[StatisticRow],
) -> Result<usize> {
    let table = table_name(short_term);
    let sql = format!(
        "INSERT INTO {table}
            (metadata_id, start_ts, created_ts, state, mean, min, max, sum, last_reset_ts)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(metadata_id, start_ts) DO NOTHING"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let mut inserted = 0usize;
    for row in rows {
        let changed = stmt.execute(params![
            row.metadata_id,
            to_epoch(row.start),
            to_epoch(row.created),
            row.state,
            row.mean,
            row.min,
            row.max,
            row.sum,
            row.last_reset.map(to_epoch),
        ])?;
        inserted += changed;
    }
    Ok(inserted)
}

/// Import row semantics (spec §4.6): if `(metadata_id, start_ts)` already
/// exists, overwrite every scalar field in place (including nulls); else
/// insert. Unlike [`insert_rows`], a conflict here is the expected
/// "re-import an overlapping window" case, not a duplicate to skip.
pub fn upsert_rows(conn: &Connection, short_term: bool, rows: &[StatisticRow]) -> Result<()> {
    let table = table_name(short_term);
    let sql = format!(
        "INSERT INTO {table}
            (metadata_id, start_ts, created_ts, state, mean, min, max, sum, last_reset_ts)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(metadata_id, start_ts) DO UPDATE SET
            created_ts = excluded.created_ts,
            state = excluded.state,
            mean = excluded.mean,
            min = excluded.min,
            max = excluded.max,
            sum = excluded.sum,
            last_reset_ts = excluded.last_reset_ts"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    for row in rows {
        stmt.execute(params![
            row.metadata_id,
            to_epoch(row.start),
            to_epoch(row.created),
            row.state,
            row.mean,
            row.min,
            row.max,
            row.sum,
            row.last_reset.map(to_epoch),
        ])?;
    }
    Ok(())
}

/// Fetch rows for `metadata_id` in `[start, end)`, ordered by `start_ts`.
pub fn fetch_rows(
    conn: &Connection,
    short_term: bool,
    metadata_id: i64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<StatisticRow>> {
    let table = table_name(short_term);
    let sql = format!(
        "SELECT metadata_id, start_ts, created_ts, state, mean, min, max, sum, last_reset_ts
         FROM {table}
         WHERE metadata_id = ?1 AND start_ts >= ?2 AND start_ts < ?3
         ORDER BY start_ts ASC"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(
            params![metadata_id, to_epoch(start), to_epoch(end)],
            |row| row_from_sql(row),
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows.into_iter().map(|(_, r)| r).collect())
}

/// Most recent row strictly before `before` (spec §5 continuity lookup: when
/// a requested range's first bucket is missing, the caller prepends this row
/// so the client observes an unbroken series instead of a gap at `start`).
pub fn fetch_row_before(
    conn: &Connection,
    short_term: bool,
    metadata_id: i64,
    before: DateTime<Utc>,
) -> Result<Option<StatisticRow>> {
    let table = table_name(short_term);
    let sql = format!(
        "SELECT metadata_id, start_ts, created_ts, state, mean, min, max, sum, last_reset_ts
         FROM {table}
         WHERE metadata_id = ?1 AND start_ts < ?2
         ORDER BY start_ts DESC LIMIT 1"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let row = stmt
        .query_row(params![metadata_id, to_epoch(before)], |row| {
            row_from_sql(row)
        })
        .optional()?;
    Ok(row.map(|(_, r)| r))
}

/// Delete short-term rows older than `cutoff` (spec §4.4 retention).
pub fn prune_short_term_before(conn: &Connection, cutoff: DateTime<Utc>) -> Result<usize> {
    let changed = conn.execute(
        "DELETE FROM statistics_short_term WHERE start_ts < ?1",
        params![to_epoch(cutoff)],
    )?;
    Ok(changed)
}

/// Find (metadata_id, start_ts) pairs with more than one row in `table`,
/// returning the row ids of all but the earliest-created duplicate
/// (SPEC_FULL §9.3 duplicate repair).
pub fn find_duplicate_row_ids(conn: &Connection, short_term: bool) -> Result<Vec<i64>> {
    let table = table_name(short_term);
    let sql = format!(
        "SELECT id FROM {table} t
         WHERE EXISTS (
             SELECT 1 FROM {table} t2
             WHERE t2.metadata_id = t.metadata_id
               AND t2.start_ts = t.start_ts
               AND (t2.created_ts < t.created_ts
                    OR (t2.created_ts = t.created_ts AND t2.id < t.id))
         )"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let ids = stmt
        .query_map([], |row| row.get::<_, i64>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// One duplicate group sharing `(metadata_id, start_ts)`: the row kept
/// (lowest id) and every row about to be deleted, in ascending id order
/// (SPEC_FULL §9.3 — callers diff `kept` against each of `removed` to
/// decide whether a JSON backup is warranted before deleting).
pub struct DuplicateGroup {
    pub kept: StatisticRow,
    pub removed: Vec<(i64, StatisticRow)>,
}

/// Group every `(metadata_id, start_ts)` pair with more than one row in
/// `table`, keeping the earliest-created row as `kept` the same way
/// [`find_duplicate_row_ids`] picks the survivor.
pub fn find_duplicate_groups(conn: &Connection, short_term: bool) -> Result<Vec<DuplicateGroup>> {
    let table = table_name(short_term);
    let sql = format!(
        "SELECT id, metadata_id, start_ts, created_ts, state, mean, min, max, sum, last_reset_ts
         FROM {table} t
         WHERE EXISTS (
             SELECT 1 FROM {table} t2
             WHERE t2.metadata_id = t.metadata_id AND t2.start_ts = t.start_ts AND t2.id != t.id
         )
         ORDER BY metadata_id, start_ts, created_ts, id"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            let id: i64 = row.get("id")?;
            let (_, stat_row) = row_from_sql(row)?;
            Ok((id, stat_row))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut groups: Vec<DuplicateGroup> = Vec::new();
    for (id, row) in rows {
        match groups.last_mut() {
            Some(g)
                if g.kept.metadata_id == row.metadata_id && g.kept.start == row.start =>
            {
                g.removed.push((id, row));
            }
            _ => groups.push(DuplicateGroup {
                kept: row,
                removed: Vec::new(),
            }),
        }
    }
    Ok(groups)
}

/// Delete rows by id from `table`, used by duplicate repair and
/// `ClearStatistics`.
pub fn delete_rows_by_id(conn: &Connection, short_term: bool, ids: &[i64]) -> Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    let table = table_name(short_term);
    let mut deleted = 0usize;
    let mut stmt = conn.prepare_cached(&format!("DELETE FROM {table} WHERE id = ?1"))?;
    for id in ids {
        deleted += stmt.execute(params![id])?;
    }
    Ok(deleted)
}

/// Delete every row for a set of metadata_ids from both tables (used by
/// `ClearStatistics`).
pub fn delete_all_for_metadata_ids(conn: &Connection, metadata_ids: &[i64]) -> Result<()> {
    for &id in metadata_ids {
        conn.execute(
            "DELETE FROM statistics WHERE metadata_id = ?1",
            params![id],
        )?;
        conn.execute(
            "DELETE FROM statistics_short_term WHERE metadata_id = ?1",
            params![id],
        )?;
    }
    Ok(())
}

/// Shift the `sum` column for every long-term row at or after `start` by
/// `adjustment` (used by the `AdjustSum` task for meter-reset correction).
/// The long-term table's boundary is `start` truncated to the hour (spec
/// §4.6): an hourly row's bucket can begin before a non-hour-aligned
/// `start`, yet still needs the adjustment since it covers that instant.
/// Short-term buckets are 5 minutes wide so `start` itself is the right
/// boundary there.
pub fn adjust_sum_from(
    conn: &Connection,
    metadata_id: i64,
    start: DateTime<Utc>,
    adjustment: f64,
) -> Result<usize> {
    let long_term_start = crate::compaction::hour_bucket_start(start);
    let changed = conn.execute(
        "UPDATE statistics SET sum = sum + ?1
         WHERE metadata_id = ?2 AND start_ts >= ?3 AND sum IS NOT NULL",
        params![adjustment, metadata_id, to_epoch(long_term_start)],
    )?;
    let changed_st = conn.execute(
        "UPDATE statistics_short_term SET sum = sum + ?1
         WHERE metadata_id = ?2 AND start_ts >= ?3 AND sum IS NOT NULL",
        params![adjustment, metadata_id, to_epoch(start)],
    )?;
    Ok(changed + changed_st)
}

/// Rescale every state/mean/min/max/sum value for `metadata_id` by
/// `factor` in both tables (spec §4.6 `change_statistics_unit`).
pub fn rescale_statistic(conn: &Connection, metadata_id: i64, factor: f64) -> Result<()> {
    for table in ["statistics", "statistics_short_term"] {
        conn.execute(
            &format!(
                "UPDATE {table} SET
                    state = state * ?1,
                    mean = mean * ?1,
                    min = min * ?1,
                    max = max * ?1,
                    sum = sum * ?1
                 WHERE metadata_id = ?2"
            ),
            params![factor, metadata_id],
        )?;
    }
    Ok(())
}

/// Most recent `sum` at or before `ts` across both tables, used to
/// establish the opening/closing balance for a `statistic_during_period`
/// "change" aggregate when the query range doesn't start or end exactly on
/// a stored row (spec §4.5 backward scan). Both tables can hold rows for
/// the same moment until short-term rows age out, so this picks whichever
/// candidate has the later `start_ts`, not whichever table happens to match
/// first.
pub fn sum_at_or_before(
    conn: &Connection,
    metadata_id: i64,
    ts: DateTime<Utc>,
) -> Result<Option<f64>> {
    let long_term: Option<(f64, f64)> = conn
        .query_row(
            "SELECT start_ts, sum FROM statistics
             WHERE metadata_id = ?1 AND start_ts <= ?2 AND sum IS NOT NULL
             ORDER BY start_ts DESC LIMIT 1",
            params![metadata_id, to_epoch(ts)],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let short_term: Option<(f64, f64)> = conn
        .query_row(
            "SELECT start_ts, sum FROM statistics_short_term
             WHERE metadata_id = ?1 AND start_ts <= ?2 AND sum IS NOT NULL
             ORDER BY start_ts DESC LIMIT 1",
            params![metadata_id, to_epoch(ts)],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    Ok(match (long_term, short_term) {
        (Some((lt_ts, lt_sum)), Some((st_ts, st_sum))) => {
            Some(if st_ts > lt_ts { st_sum } else { lt_sum })
        }
        (Some((_, sum)), None) | (None, Some((_, sum))) => Some(sum),
        (None, None) => None,
    })
}

// -- statistics_meta -------------------------------------------------------

fn meta_from_sql(row: &Row<'_>) -> rusqlite::Result<StatisticMetaData> {
    Ok(StatisticMetaData {
        id: row.get("id")?,
        statistic_id: row.get("statistic_id")?,
        source: row.get("source")?,
        unit_of_measurement: row.get("unit_of_measurement")?,
        has_mean: row.get::<_, i64>("has_mean")? != 0,
        has_sum: row.get::<_, i64>("has_sum")? != 0,
        name: row.get("name")?,
    })
}

pub fn get_metadata_by_statistic_id(
    conn: &Connection,
    statistic_id: &str,
) -> Result<Option<StatisticMetaData>> {
    conn.query_row(
        "SELECT id, statistic_id, source, unit_of_measurement, has_mean, has_sum, name
         FROM statistics_meta WHERE statistic_id = ?1",
        params![statistic_id],
        meta_from_sql,
    )
    .optional()
    .map_err(RecorderError::from)
}

pub fn get_metadata_by_id(conn: &Connection, id: i64) -> Result<Option<StatisticMetaData>> {
    conn.query_row(
        "SELECT id, statistic_id, source, unit_of_measurement, has_mean, has_sum, name
         FROM statistics_meta WHERE id = ?1",
        params![id],
        meta_from_sql,
    )
    .optional()
    .map_err(RecorderError::from)
}

pub fn list_metadata(conn: &Connection) -> Result<Vec<StatisticMetaData>> {
    let mut stmt = conn.prepare(
        "SELECT id, statistic_id, source, unit_of_measurement, has_mean, has_sum, name
         FROM statistics_meta ORDER BY statistic_id",
    )?;
    let rows = stmt
        .query_map([], meta_from_sql)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Insert a new metadata row, returning its assigned id. Fails with
/// [`RecorderError::Duplicate`] if `statistic_id` already exists — callers
/// should check with [`get_metadata_by_statistic_id`] first when
/// "get or create" semantics are wanted.
pub fn insert_metadata(conn: &Connection, meta: &StatisticMetaData) -> Result<i64> {
    conn.execute(
        "INSERT INTO statistics_meta
            (statistic_id, source, unit_of_measurement, has_mean, has_sum, name)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            meta.statistic_id,
            meta.source,
            meta.unit_of_measurement,
            meta.has_mean as i64,
            meta.has_sum as i64,
            meta.name,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_unit_of_measurement(
    conn: &Connection,
    metadata_id: i64,
    unit: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE statistics_meta SET unit_of_measurement = ?1 WHERE id = ?2",
        params![unit, metadata_id],
    )?;
    Ok(())
}

/// Overwrite every scalar field of a metadata row except `unit_of_measurement`
/// (handled separately by [`update_unit_of_measurement`] so unit-change
/// invalidation stays a single, easily-logged code path) and `statistic_id`
/// (handled separately by [`update_statistic_id`] since it's also a cache
/// key, not just a stored column). Used by
/// [`crate::metadata::MetadataManager::update_or_add`] when a rediscovered
/// descriptor differs from the stored one.
pub fn replace_metadata_fields(conn: &Connection, meta: &StatisticMetaData) -> Result<()> {
    conn.execute(
        "UPDATE statistics_meta SET source = ?1, has_mean = ?2, has_sum = ?3, name = ?4
         WHERE id = ?5",
        params![meta.source, meta.has_mean as i64, meta.has_sum as i64, meta.name, meta.id],
    )?;
    Ok(())
}

/// Rename a metadata row's `statistic_id` in place (spec §4.2
/// `update_statistic_id`, spec §6 `update_statistics_metadata`'s `new_id`
/// arm). The `(metadata_id, start_ts)` rows in both statistics tables key
/// off `metadata_id`, not `statistic_id`, so no row data needs touching.
pub fn update_statistic_id(conn: &Connection, metadata_id: i64, new_statistic_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE statistics_meta SET statistic_id = ?1 WHERE id = ?2",
        params![new_statistic_id, metadata_id],
    )?;
    Ok(())
}

pub fn delete_metadata(conn: &Connection, metadata_id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM statistics_meta WHERE id = ?1",
        params![metadata_id],
    )?;
    Ok(())
}

/// Duplicate `statistic_id` rows in `statistics_meta` (can arise from a
/// race between two `get_or_create` calls before a unique index existed in
/// an older schema version). Returns ids of all but the lowest-id row per
/// `statistic_id` (SPEC_FULL §9.3).
pub fn find_duplicate_metadata_ids(conn: &Connection) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM statistics_meta t
         WHERE EXISTS (
             SELECT 1 FROM statistics_meta t2
             WHERE t2.statistic_id = t.statistic_id AND t2.id < t.id
         )",
    )?;
    let ids = stmt
        .query_map([], |row| row.get::<_, i64>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

// -- statistics_runs --------------------------------------------------------

pub fn record_run(conn: &Connection, start: DateTime<Utc>, created: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO statistics_runs (start_ts, created_ts) VALUES (?1, ?2)
         ON CONFLICT(start_ts) DO NOTHING",
        params![to_epoch(start), to_epoch(created)],
    )?;
    Ok(())
}

/// Whether a run marker already exists for exactly `start` (spec §4.2 step
/// 1 idempotency guard).
pub fn run_exists(conn: &Connection, start: DateTime<Utc>) -> Result<bool> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM statistics_runs WHERE start_ts = ?1",
            params![to_epoch(start)],
            |row| row.get(0),
        )
        .optional()?;
    Ok(exists.is_some())
}

pub fn latest_run(conn: &Connection) -> Result<Option<RunMarker>> {
    conn.query_row(
        "SELECT start_ts, created_ts FROM statistics_runs ORDER BY start_ts DESC LIMIT 1",
        [],
        |row| {
            let start: f64 = row.get(0)?;
            let created: f64 = row.get(1)?;
            Ok((start, created))
        },
    )
    .optional()?
    .map(|(start, created)| {
        Ok(RunMarker {
            start: from_epoch(start)?,
            created: from_epoch(created)?,
        })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        apply_pragmas(&conn).unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn schema_init_is_idempotent() {
        let conn = open();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
    }

    #[test]
    fn insert_and_fetch_roundtrip() {
        let conn = open();
        let id = insert_metadata(
            &conn,
            &StatisticMetaData {
                id: 0,
                statistic_id: "sensor.temp".into(),
                source: "recorder".into(),
                unit_of_measurement: Some("°C".into()),
                has_mean: true,
                has_sum: false,
                name: None,
            },
        )
        .unwrap();

        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let row = StatisticRow {
            metadata_id: id,
            start,
            created: start,
            state: None,
            mean: Some(21.5),
            min: Some(20.0),
            max: Some(23.0),
            sum: None,
            last_reset: None,
        };
        insert_rows(&conn, true, std::slice::from_ref(&row)).unwrap();

        let fetched = fetch_rows(
            &conn,
            true,
            id,
            start,
            start + chrono::Duration::seconds(1),
        )
        .unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].mean, Some(21.5));
    }

    #[test]
    fn conflicting_insert_is_noop_not_error() {
        let conn = open();
        let id = insert_metadata(
            &conn,
            &StatisticMetaData {
                id: 0,
                statistic_id: "sensor.energy".into(),
                source: "recorder".into(),
                unit_of_measurement: Some("kWh".into()),
                has_mean: false,
                has_sum: true,
                name: None,
            },
        )
        .unwrap();
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let row = StatisticRow {
            metadata_id: id,
            start,
            created: start,
            state: None,
            mean: None,
            min: None,
            max: None,
            sum: Some(10.0),
            last_reset: None,
        };
        let n1 = insert_rows(&conn, false, std::slice::from_ref(&row)).unwrap();
        let n2 = insert_rows(&conn, false, std::slice::from_ref(&row)).unwrap();
        assert_eq!(n1, 1);
        assert_eq!(n2, 0);
    }

    #[test]
    fn schema_version_1_migrates_forward() {
        let dir = tempdir().unwrap();
        let conn = Connection::open(dir.path().join("legacy.db")).unwrap();
        apply_pragmas(&conn).unwrap();
        init_schema(&conn).unwrap();
        set_schema_version(&conn, 1).unwrap();

        init_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 2);
    }

    #[test]
    fn sum_at_or_before_checks_both_tables() {
        let conn = open();
        let id = insert_metadata(
            &conn,
            &StatisticMetaData {
                id: 0,
                statistic_id: "sensor.energy".into(),
                source: "recorder".into(),
                unit_of_measurement: Some("kWh".into()),
                has_mean: false,
                has_sum: true,
                name: None,
            },
        )
        .unwrap();
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        insert_rows(
            &conn,
            true,
            &[StatisticRow {
                metadata_id: id,
                start,
                created: start,
                state: None,
                mean: None,
                min: None,
                max: None,
                sum: Some(42.0),
                last_reset: None,
            }],
        )
        .unwrap();

        let found = sum_at_or_before(&conn, id, start + chrono::Duration::minutes(5))
            .unwrap();
        assert_eq!(found, Some(42.0));
        assert_eq!(sum_at_or_before(&conn, id, start - chrono::Duration::seconds(1)).unwrap(), None);
    }

    #[test]
    fn duplicate_metadata_detection() {
        let dir = tempdir().unwrap();
        let conn = Connection::open(dir.path().join("test.db")).unwrap();
        apply_pragmas(&conn).unwrap();
        conn.execute_batch(
            "CREATE TABLE statistics_meta (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                statistic_id TEXT NOT NULL,
                source TEXT NOT NULL,
                unit_of_measurement TEXT,
                has_mean INTEGER NOT NULL,
                has_sum INTEGER NOT NULL,
                name TEXT
            );",
        )
        .unwrap();
        conn.execute(
            "INSERT INTO statistics_meta (statistic_id, source, has_mean, has_sum)
             VALUES ('sensor.x', 'recorder', 0, 1)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO statistics_meta (statistic_id, source, has_mean, has_sum)
             VALUES ('sensor.x', 'recorder', 0, 1)",
            [],
        )
        .unwrap();
        let dupes = find_duplicate_metadata_ids(&conn).unwrap();
        assert_eq!(dupes.len(), 1);
    }
}
