//! Schema/runtime validator (spec §6, C7): probes the live database for
//! precision and column problems that would silently corrupt statistics,
//! rather than trusting `CREATE TABLE IF NOT EXISTS` to have been
//! sufficient (e.g. an externally created file, or a SQLite build compiled
//! without enough floating point precision).
//!
//! Grounded in the original's `_validate_db_schema`: a `precise_number`
//! round-trip probe and a future-dated sub-second timestamp probe, run
//! once at startup. SQLite's dynamic typing means the per-dialect column
//! checks (`check_columns` in the original) reduce to a single concrete
//! path here; the validator is still structured with the probe/issue
//! separation so a second backend could plug in its own `check_columns`.

use crate::error::Result;
use rusqlite::Connection;

/// A value chosen so float64 round-tripping is lossy if and only if the
/// underlying SQLite storage silently truncates precision (e.g. REAL
/// columns stored as single precision by a misconfigured build).
const PRECISE_NUMBER: f64 = 1.000_000_000_000_001;

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaIssue {
    /// REAL columns round-trip float64 with fewer than 15 significant
    /// digits of precision.
    InsufficientFloatPrecision,
    /// Timestamps stored as REAL lose sub-second precision.
    InsufficientTimestampPrecision,
    /// A required table or column is missing.
    MissingColumn { table: String, column: String },
}

/// Run every validator probe against `conn`. An empty result means the
/// schema is sound; a non-empty result should be logged as a warning at
/// startup — none of these are auto-correctable on SQLite (no `ALTER
/// COLUMN`), so the engine degrades rather than refusing to start.
pub fn validate(conn: &Connection) -> Result<Vec<SchemaIssue>> {
    let mut issues = Vec::new();

    if !probe_float_precision(conn)? {
        issues.push(SchemaIssue::InsufficientFloatPrecision);
    }
    if !probe_timestamp_precision(conn)? {
        issues.push(SchemaIssue::InsufficientTimestampPrecision);
    }
    issues.extend(check_columns(conn)?);

    Ok(issues)
}

fn probe_float_precision(conn: &Connection) -> Result<bool> {
    conn.execute_batch(
        "CREATE TEMP TABLE IF NOT EXISTS _precision_probe (value REAL);",
    )?;
    conn.execute("DELETE FROM _precision_probe", [])?;
    conn.execute(
        "INSERT INTO _precision_probe (value) VALUES (?1)",
        [PRECISE_NUMBER],
    )?;
    let round_tripped: f64 =
        conn.query_row("SELECT value FROM _precision_probe", [], |row| row.get(0))?;
    conn.execute("DROP TABLE _precision_probe", [])?;
    Ok(round_tripped == PRECISE_NUMBER)
}

fn probe_timestamp_precision(conn: &Connection) -> Result<bool> {
    // A timestamp far enough in the future that an integer-seconds-only
    // column would still parse, but whose microsecond component is
    // nonzero so truncation is detectable.
    let probe_ts: f64 = 4_102_444_800.123_456; // 2100-01-01T00:00:00.123456Z
    conn.execute_batch("CREATE TEMP TABLE IF NOT EXISTS _ts_probe (ts REAL);")?;
    conn.execute("DELETE FROM _ts_probe", [])?;
    conn.execute("INSERT INTO _ts_probe (ts) VALUES (?1)", [probe_ts])?;
    let round_tripped: f64 = conn.query_row("SELECT ts FROM _ts_probe", [], |row| row.get(0))?;
    conn.execute("DROP TABLE _ts_probe", [])?;
    Ok((round_tripped - probe_ts).abs() < 1e-6)
}

fn check_columns(conn: &Connection) -> Result<Vec<SchemaIssue>> {
    let required: &[(&str, &[&str])] = &[
        (
            "statistics",
            &[
                "metadata_id",
                "start_ts",
                "created_ts",
                "state",
                "mean",
                "min",
                "max",
                "sum",
                "last_reset_ts",
            ],
        ),
        (
            "statistics_short_term",
            &[
                "metadata_id",
                "start_ts",
                "created_ts",
                "state",
                "mean",
                "min",
                "max",
                "sum",
                "last_reset_ts",
            ],
        ),
        (
            "statistics_meta",
            &[
                "statistic_id",
                "source",
                "unit_of_measurement",
                "has_mean",
                "has_sum",
            ],
        ),
        ("statistics_runs", &["start_ts", "created_ts"]),
    ];

    let mut issues = Vec::new();
    for (table, columns) in required {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let existing: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<_, _>>()?;
        for column in *columns {
            if !existing.iter().any(|c| c == column) {
                issues.push(SchemaIssue::MissingColumn {
                    table: table.to_string(),
                    column: column.to_string(),
                });
            }
        }
    }
    Ok(issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage;

    #[test]
    fn clean_schema_has_no_issues() {
        let conn = Connection::open_in_memory().unwrap();
        storage::apply_pragmas(&conn).unwrap();
        storage::init_schema(&conn).unwrap();
        let issues = validate(&conn).unwrap();
        assert!(issues.is_empty(), "{issues:?}");
    }

    #[test]
    fn missing_table_is_reported() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE statistics_runs (start_ts REAL, created_ts REAL);")
            .unwrap();
        let issues = check_columns(&conn).unwrap();
        assert!(issues
            .iter()
            .any(|i| matches!(i, SchemaIssue::MissingColumn { table, .. } if table == "statistics")));
    }
}
