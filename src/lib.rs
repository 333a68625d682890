//! Long-term statistics engine: a single-writer, SQLite-backed recorder for
//! periodic aggregates (mean/min/max/sum) over time, with unit-aware
//! queries and an import/adjustment API for backfilling external data.
//!
//! [`Engine`] is the public entry point: it owns the metadata cache, the
//! background task queue (the only thing that ever writes), and the
//! read-only query pool, and wires them together the way the teacher's
//! `main.rs` wires its channels and background tasks — except here the
//! wiring lives in the library so both the bundled binary and embedders get
//! the same assembly.

pub mod compaction;
pub mod config;
pub mod error;
pub mod import;
pub mod logging;
pub mod metadata;
pub mod model;
pub mod platform;
pub mod query;
pub mod storage;
pub mod task_queue;
pub mod units;
pub mod validator;

use chrono::{DateTime, Timelike, Utc};
use config::RecorderConfig;
use error::{RecorderError, Result};
use metadata::MetadataManager;
use model::{ImportRequest, Period, PeriodSummary, StatisticResult, Task};
use platform::{LiveEntityState, NoLiveEntityState, PlatformRegistry};
use query::QueryEngine;
use rusqlite::Connection;
use std::sync::Arc;
use task_queue::{TaskQueue, TaskQueueMetrics};

/// The assembled engine: metadata cache, single writer thread, read pool.
/// Cheap to clone-share via `Arc` since every field already is.
pub struct Engine {
    config: RecorderConfig,
    metadata: Arc<MetadataManager>,
    queue: TaskQueue,
    query: QueryEngine,
}

impl Engine {
    /// Open (or create) the database at `config.db_path`, validate its
    /// schema, load the metadata cache, and start the writer thread and
    /// read pool (spec §6 startup sequence). `platforms` is consulted by
    /// every 5-minute compaction cycle for statistics to compile (spec
    /// §4.2 step 2); pass [`PlatformRegistry::new`] if nothing is
    /// registered yet.
    pub fn start(config: RecorderConfig, platforms: PlatformRegistry) -> Result<Self> {
        Self::start_with_live_entity(config, platforms, Arc::new(NoLiveEntityState))
    }

    /// Like [`Engine::start`], but with a host-supplied live-entity-state
    /// lookup consulted by display-unit resolution (spec §4.1) whenever a
    /// query call doesn't pass an explicit `display_unit`.
    pub fn start_with_live_entity(
        config: RecorderConfig,
        platforms: PlatformRegistry,
        live_entity: Arc<dyn LiveEntityState>,
    ) -> Result<Self> {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RecorderError::Internal(format!("cannot create db directory: {e}")))?;
        }

        let conn = Connection::open(&config.db_path)?;
        storage::apply_pragmas(&conn)?;
        storage::init_schema(&conn)?;

        for issue in validator::validate(&conn)? {
            tracing::warn!(?issue, "schema validation issue detected at startup");
        }

        let metadata = Arc::new(MetadataManager::load(&conn)?);
        drop(conn);

        let query = QueryEngine::with_live_entity(&config.db_path, metadata.clone(), live_entity)?;
        let queue = TaskQueue::start(config.clone(), metadata.clone(), platforms)?;

        // Pick up any 5-minute periods missed while the engine was down
        // (spec §4.4): submitted once at startup, ahead of the recurring
        // scheduler's first tick.
        queue.submit(Task::CatchUpMissing)?;

        Ok(Self {
            config,
            metadata,
            queue,
            query,
        })
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn metadata(&self) -> &MetadataManager {
        &self.metadata
    }

    pub fn metrics(&self) -> &TaskQueueMetrics {
        self.queue.metrics()
    }

    /// Compile the 5-minute period starting at `period_start` (spec §4.2).
    /// Fire-and-forget: the task queue worker does the actual compilation
    /// and hourly rollup/catch-up.
    pub fn compile(&self, period_start: DateTime<Utc>) -> Result<()> {
        self.queue.submit(Task::Compile { period_start })
    }

    /// Force an hourly-rollup/retention pass outside the normal 5-minute
    /// cadence (spec §4.3/§4.4 `Adjust` task — used by the CLI's `compact`
    /// subcommand and by tests).
    pub fn adjust(&self) -> Result<()> {
        self.queue.submit(Task::Adjust)
    }

    /// Validate and queue an import request (spec §4.6
    /// `async_import_statistics`). Validation (timestamp awareness,
    /// hour-alignment, statistic_id/source shape) runs synchronously here,
    /// before the request ever reaches the writer thread, so a caller gets
    /// an immediate rejection rather than a silently dropped task (spec
    /// §7a: validation errors are reported synchronously and nothing is
    /// written).
    pub fn import_statistics(&self, request: ImportRequest) -> Result<()> {
        import::validate_import(&request)?;
        self.queue.submit(Task::Import { request })
    }

    /// Validate and queue a sum adjustment (spec §4.6 `adjust_statistics`).
    pub fn adjust_sum(
        &self,
        statistic_id: &str,
        start: DateTime<Utc>,
        adjustment: f64,
    ) -> Result<()> {
        let meta = self.metadata.get(statistic_id).ok_or_else(|| {
            RecorderError::Validation(format!("unknown statistic_id: {statistic_id}"))
        })?;
        if !meta.has_sum {
            return Err(RecorderError::Validation(format!(
                "{statistic_id} has no sum to adjust"
            )));
        }
        self.queue.submit(Task::AdjustSum {
            statistic_id: statistic_id.to_string(),
            start,
            adjustment,
        })
    }

    /// Validate and queue a unit change (spec §4.6 `change_statistics_unit`).
    pub fn change_statistics_unit(
        &self,
        statistic_id: &str,
        from_unit: Option<String>,
        to_unit: Option<String>,
    ) -> Result<()> {
        self.metadata.get(statistic_id).ok_or_else(|| {
            RecorderError::Validation(format!("unknown statistic_id: {statistic_id}"))
        })?;
        if let (Some(from), Some(to)) = (from_unit.as_deref(), to_unit.as_deref()) {
            if !units::can_convert(Some(from), Some(to)) {
                return Err(RecorderError::Validation(format!(
                    "cannot convert {from} to {to} for {statistic_id}"
                )));
            }
        }
        self.queue.submit(Task::ChangeStatisticsUnit {
            statistic_id: statistic_id.to_string(),
            from_unit,
            to_unit,
        })
    }

    /// Queue removal of one or more statistics (spec §4.7
    /// `clear_statistics`).
    pub fn clear_statistics(&self, statistic_ids: Vec<String>) -> Result<()> {
        self.queue.submit(Task::ClearStatistics { statistic_ids })
    }

    /// Queue a metadata field update — unit of measurement and/or a rename
    /// of the statistic_id itself (spec §6
    /// `update_statistics_metadata(id, new_id?, new_unit?)`).
    pub fn update_statistics_metadata(
        &self,
        statistic_id: &str,
        new_statistic_id: Option<String>,
        unit_of_measurement: Option<Option<String>>,
    ) -> Result<()> {
        self.queue.submit(Task::UpdateStatisticsMetadata {
            statistic_id: statistic_id.to_string(),
            unit_of_measurement,
            new_statistic_id,
        })
    }

    /// Queue a duplicate-repair sweep (SPEC_FULL §9.3).
    pub fn repair_duplicates(&self) -> Result<()> {
        self.queue.submit(Task::RepairDuplicates)
    }

    /// Series query across `[start, end)` at the given period, with
    /// optional day/week/month reduction in `tz` and unit conversion on
    /// read (spec §5 `statistics_during_period`).
    pub fn statistics_during_period(
        &self,
        statistic_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: Period,
        display_unit: Option<&str>,
        tz: chrono_tz::Tz,
    ) -> Result<Vec<StatisticResult>> {
        self.query
            .statistics_during_period(statistic_id, start, end, period, display_unit, tz)
    }

    /// Single aggregate summary over `[start, end)` (spec §5
    /// `statistic_during_period`).
    pub fn statistic_during_period(
        &self,
        statistic_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PeriodSummary> {
        self.query.statistic_during_period(statistic_id, start, end)
    }

    /// Most recent long-term rows per statistic (spec §5
    /// `get_last_statistics`).
    pub fn last_statistics(
        &self,
        statistic_id: &str,
        number_of_stats: usize,
    ) -> Result<Vec<StatisticResult>> {
        self.query.last_statistics(statistic_id, number_of_stats)
    }

    /// Most recent short-term row for a statistic (spec §5
    /// `get_latest_short_term_statistics`).
    pub fn latest_short_term_statistics(
        &self,
        statistic_id: &str,
    ) -> Result<Option<StatisticResult>> {
        self.query.latest_short_term_statistics(statistic_id)
    }

    /// Run the periodic compaction scheduler until `shutdown` resolves
    /// (spec §4.2/§4.3): one `Compile` task every 5-minute wall-clock
    /// boundary, with the hourly rollup folded into the `:55` tick by
    /// [`compaction::run_five_minute_compaction`] itself. Grounded in the
    /// teacher's `tokio::time::interval` heartbeat pattern from
    /// `pipeline/lifestats.rs`'s flush loop, generalized from a fixed
    /// flush interval to wall-clock-aligned 5-minute boundaries.
    pub async fn run_scheduler(&self, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        loop {
            let now = Utc::now();
            let next = next_five_minute_boundary(now);
            let wait = (next - now)
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(1));

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    if let Err(e) = self.compile(next) {
                        tracing::warn!("failed to submit compile task: {e}");
                    }
                    if next.minute() == 0 {
                        if let Err(e) = self.adjust() {
                            tracing::warn!("failed to submit adjust task: {e}");
                        }
                    }
                }
                _ = &mut shutdown => {
                    tracing::debug!("scheduler received shutdown signal");
                    return;
                }
            }
        }
    }
}

/// The next 5-minute wall-clock boundary strictly after `now`.
fn next_five_minute_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    compaction::short_term_bucket_start(now) + compaction::SHORT_TERM_PERIOD
}
