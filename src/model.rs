//! Core domain types shared across the engine (metadata rows, statistic
//! rows, run markers, the task catalog).

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate unit class a statistic belongs to (spec §2, supplemented in
/// SPEC_FULL §9.1). `Unitless` covers ratios/percentages/counters that have
/// no convertible unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitClass {
    DataRate,
    Distance,
    ElectricCurrent,
    ElectricPotential,
    Energy,
    Information,
    Mass,
    Power,
    Pressure,
    Speed,
    Temperature,
    Volume,
    Unitless,
}

/// Which statistics a platform/integration supports computing for an
/// entity (spec §2 `has_mean` / `has_sum`). Mirrors the original's
/// `StatisticMeanType`/per-row booleans, modeled as an enum since the two
/// flags are not independent in practice (sum-only and mean-only sources
/// never do both at once in this codebase's supported platforms).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatisticKind {
    /// Time-weighted mean/min/max tracked (e.g. temperature sensors).
    Mean,
    /// Monotonic or resettable running total tracked (e.g. energy meters).
    Sum,
    /// Neither aggregate is meaningful; only `state` passthrough.
    None,
}

/// Metadata describing one tracked statistic_id (spec §2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticMetaData {
    pub id: i64,
    pub statistic_id: String,
    pub source: String,
    pub unit_of_measurement: Option<String>,
    pub has_mean: bool,
    pub has_sum: bool,
    /// Set once a statistic is retired but its rows are kept for history.
    pub name: Option<String>,
}

/// One short-term (5-minute) or long-term (hourly) aggregate row (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticRow {
    pub metadata_id: i64,
    pub start: DateTime<Utc>,
    pub created: DateTime<Utc>,
    pub state: Option<f64>,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub sum: Option<f64>,
    /// Present only in hourly (long-term) rows; tracks the bucket-ending
    /// second precision used by the legacy-timestamp migration check.
    pub last_reset: Option<DateTime<Utc>>,
}

impl StatisticRow {
    pub fn is_empty_aggregate(&self) -> bool {
        self.state.is_none()
            && self.mean.is_none()
            && self.min.is_none()
            && self.max.is_none()
            && self.sum.is_none()
    }
}

/// A timestamp as handed to the import API (spec §4.6: "Validates that
/// `start` and `last_reset` are timezone-aware (rejects naive)"). Rust's
/// `DateTime<Utc>` is always aware, so the naive/aware distinction the
/// original makes on Python's `datetime` has to be modeled explicitly at
/// the API boundary rather than in the type the rest of the engine uses
/// internally.
#[derive(Debug, Clone, Copy)]
pub enum ImportTimestamp {
    /// No UTC offset attached — rejected by [`crate::import::require_aware`].
    Naive(NaiveDateTime),
    Aware(DateTime<FixedOffset>),
}

/// One row as submitted to the import API, before tz-aware validation and
/// UTC normalization (spec §4.6 `async_import_statistics`).
#[derive(Debug, Clone)]
pub struct ImportRow {
    pub start: ImportTimestamp,
    pub last_reset: Option<ImportTimestamp>,
    pub state: Option<f64>,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub sum: Option<f64>,
}

/// A full import request: the descriptor plus the rows to write, and
/// whether `statistic_id` is expected in internal (`domain.object`) or
/// external (`domain:object`) form (spec §4.6).
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub statistic_id: String,
    pub source: String,
    pub unit_of_measurement: Option<String>,
    pub has_mean: bool,
    pub has_sum: bool,
    pub name: Option<String>,
    pub internal: bool,
    pub rows: Vec<ImportRow>,
}

/// Marks the most recent run boundary, used to detect gaps caused by
/// downtime (spec §4.4 missing-statistics catch-up).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMarker {
    pub start: DateTime<Utc>,
    pub created: DateTime<Utc>,
}

/// Aggregation period requested by a query (spec §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Period {
    FiveMinute,
    Hour,
    Day,
    Week,
    Month,
}

/// One point of an assembled statistics series, after optional head/tail
/// reduction and unit conversion (spec §5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticResult {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub last_reset: Option<DateTime<Utc>>,
    pub state: Option<f64>,
    pub sum: Option<f64>,
}

/// Single aggregate summary over an arbitrary `[start, end)` range (spec §5
/// `statistic_during_period`). Unlike [`StatisticResult`], which is one row
/// per bucket, this is one number per field for the whole range — the
/// head/main/tail bucket stitching happens inside the query engine and only
/// the reduced result crosses this boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PeriodSummary {
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Newest known `sum` at or before the end of the range minus the
    /// oldest known `sum` at or before its start (spec §5 "change").
    pub change: Option<f64>,
}

/// Background work items processed one at a time by the task queue worker
/// (spec §4, SPEC_FULL §9.5). Grounded in the per-task-kind dataclasses of
/// the original's task catalog and in this crate's single
/// `WriterCommand`-style enum pattern.
#[derive(Debug, Clone)]
pub enum Task {
    /// Roll the prior 5-minute bucket of short-term rows into statistics.
    Compile { period_start: DateTime<Utc> },
    /// Roll completed hourly buckets of short-term rows into long-term
    /// statistics and prune short-term rows outside the retention window.
    Adjust,
    /// Catch up on any periods missed since the last recorded run marker.
    CatchUpMissing,
    /// Rewrite historical rows for `statistic_id` from `from_unit` to
    /// `to_unit`, scaling by the unit converter (spec §4.6).
    ChangeStatisticsUnit {
        statistic_id: String,
        from_unit: Option<String>,
        to_unit: Option<String>,
    },
    /// Shift every sum-bearing row for `statistic_id` by a fixed delta,
    /// used to correct a meter reset/rollover.
    AdjustSum {
        statistic_id: String,
        start: DateTime<Utc>,
        adjustment: f64,
    },
    /// Delete all rows and metadata for the given statistic_ids.
    ClearStatistics { statistic_ids: Vec<String> },
    /// Update a metadata row in place: unit of measurement and/or a rename
    /// of the statistic_id itself (spec §4.2 `update_statistic_id`, spec §6
    /// `update_statistics_metadata(id, new_id?, new_unit?)`).
    UpdateStatisticsMetadata {
        statistic_id: String,
        unit_of_measurement: Option<Option<String>>,
        new_statistic_id: Option<String>,
    },
    /// Import externally- or internally-sourced rows (spec §4.6
    /// `async_import_statistics`), validated against [`crate::import`]
    /// before the row writes are attempted.
    Import { request: ImportRequest },
    /// Repair duplicate (metadata_id, start) rows found by the schema
    /// validator or an import collision (SPEC_FULL §9.3).
    RepairDuplicates,
}
