//! Single-writer task queue (spec §4.8, C8): every mutation to the
//! statistics database goes through one dedicated OS thread, serializing
//! writes the way SQLite's single-writer model wants them serialized.
//!
//! Grounded directly in the teacher's `pipeline/lifestats.rs` writer
//! thread: a bounded `mpsc::sync_channel` of commands, `recv_timeout` for
//! periodic housekeeping between messages, and a `Shutdown` command that
//! flushes/joins cleanly. Generalized here from "batch insert events" to
//! "process one `Task` at a time with retry", since statistics tasks (spec
//! §4.5, `tasks.py` in the original) are heterogeneous operations rather
//! than homogeneous batched inserts.

use crate::config::RecorderConfig;
use crate::error::{RecorderError, Result};
use crate::metadata::MetadataManager;
use crate::model::Task;
use crate::platform::PlatformRegistry;
use crate::{compaction, import, storage};
use chrono::Utc;
use rusqlite::Connection;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

enum Command {
    Submit(Task),
    Shutdown,
}

/// Counters for worker activity, exposed for the `statsrec status` CLI
/// subcommand and for tests.
#[derive(Debug, Default)]
pub struct TaskQueueMetrics {
    pub tasks_processed: AtomicU64,
    pub tasks_failed: AtomicU64,
    pub tasks_dropped: AtomicU64,
}

/// Handle to the background writer thread. Dropping it sends `Shutdown`
/// and joins, so a clean process exit never loses a submitted task that
/// was already accepted onto the channel.
pub struct TaskQueue {
    tx: SyncSender<Command>,
    handle: Option<JoinHandle<()>>,
    metrics: Arc<TaskQueueMetrics>,
}

impl TaskQueue {
    pub fn start(
        config: RecorderConfig,
        metadata: Arc<MetadataManager>,
        platforms: PlatformRegistry,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel::<Command>(config.channel_buffer);
        let metrics = Arc::new(TaskQueueMetrics::default());
        let worker_metrics = metrics.clone();

        let handle = thread::Builder::new()
            .name("statsrec-writer".into())
            .spawn(move || {
                if let Err(e) = worker_loop(config, metadata, platforms, rx, worker_metrics) {
                    tracing::error!("task queue worker exited with error: {e}");
                }
            })
            .map_err(|e| RecorderError::Internal(format!("failed to spawn writer thread: {e}")))?;

        Ok(Self {
            tx,
            handle: Some(handle),
            metrics,
        })
    }

    /// Submit a task without blocking for completion (fire-and-forget, the
    /// way the original dispatches `RecorderTask`s onto its queue).
    /// Returns an error only if the channel is full (backpressure) or the
    /// worker thread has already exited.
    pub fn submit(&self, task: Task) -> Result<()> {
        self.tx.try_send(Command::Submit(task)).map_err(|e| {
            self.metrics.tasks_dropped.fetch_add(1, Ordering::Relaxed);
            RecorderError::Internal(format!("task queue full or closed: {e}"))
        })
    }

    pub fn metrics(&self) -> &TaskQueueMetrics {
        &self.metrics
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    config: RecorderConfig,
    metadata: Arc<MetadataManager>,
    platforms: PlatformRegistry,
    rx: mpsc::Receiver<Command>,
    metrics: Arc<TaskQueueMetrics>,
) -> Result<()> {
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| RecorderError::Internal(format!("cannot create db directory: {e}")))?;
    }
    let conn = Connection::open(&config.db_path)?;
    storage::apply_pragmas(&conn)?;
    storage::init_schema(&conn)?;

    loop {
        match rx.recv_timeout(config.commit_interval) {
            Ok(Command::Submit(task)) => {
                run_with_retry(&conn, &metadata, &platforms, &config, task, &metrics);
            }
            Ok(Command::Shutdown) => {
                tracing::debug!("task queue worker shutting down");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                // No task arrived within commit_interval; nothing to flush
                // since every task commits its own transaction, unlike the
                // teacher's batched event inserts.
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    Ok(())
}

fn run_with_retry(
    conn: &Connection,
    metadata: &MetadataManager,
    platforms: &PlatformRegistry,
    config: &RecorderConfig,
    task: Task,
    metrics: &TaskQueueMetrics,
) {
    let mut attempt = 0u32;
    loop {
        match execute_task(conn, metadata, platforms, config, &task) {
            Ok(()) => {
                metrics.tasks_processed.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(RecorderError::Transient(e)) if attempt < config.max_retries => {
                attempt += 1;
                let backoff = config.retry_backoff_base * attempt;
                tracing::warn!(
                    "transient error on task (attempt {attempt}/{}): {e}; retrying in {backoff:?}",
                    config.max_retries
                );
                thread::sleep(backoff);
            }
            Err(e) => {
                metrics.tasks_failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!("task failed: {e}");
                return;
            }
        }
    }
}

fn execute_task(
    conn: &Connection,
    metadata: &MetadataManager,
    platforms: &PlatformRegistry,
    config: &RecorderConfig,
    task: &Task,
) -> Result<()> {
    match task {
        Task::Compile { period_start } => {
            let changed = compaction::run_five_minute_compaction(conn, metadata, platforms, *period_start)?;
            if !changed.is_empty() {
                tracing::debug!(?changed, "metadata changed during compaction, reloading cache");
                metadata.reload(conn)?;
            }
            tracing::info!(period_start = %period_start, "5min-stats-generated");
            if period_start.minute() == 55 {
                tracing::info!(period_start = %period_start, "hourly-stats-generated");
            }
            Ok(())
        }
        Task::Adjust => {
            let now = Utc::now();
            let current_hour = compaction::hour_bucket_start(now);
            roll_hour_if_complete(conn, metadata, current_hour - chrono::Duration::hours(1))?;

            let cutoff = now - chrono::Duration::days(config.keep_days_short_term as i64);
            let pruned = storage::prune_short_term_before(conn, cutoff)?;
            if pruned > 0 {
                tracing::debug!(pruned, %cutoff, "pruned short-term rows past retention window");
            }
            Ok(())
        }
        Task::CatchUpMissing => {
            let last_run = storage::latest_run(conn)?.map(|r| r.start);
            let now = Utc::now();
            let mut period_start = match last_run {
                Some(last) => last + compaction::SHORT_TERM_PERIOD,
                None => return Ok(()),
            };
            let mut since_commit = chrono::Duration::zero();
            while period_start < compaction::short_term_bucket_start(now) {
                let changed =
                    compaction::run_five_minute_compaction(conn, metadata, platforms, period_start)?;
                if !changed.is_empty() {
                    metadata.reload(conn)?;
                }
                period_start += compaction::SHORT_TERM_PERIOD;
                since_commit += compaction::SHORT_TERM_PERIOD;
                if since_commit >= chrono::Duration::hours(12) {
                    // Matches the original's "commit every 12h of simulated
                    // time" catch-up pacing (spec §4.4): nothing to flush
                    // explicitly here since each compaction call already
                    // commits its own work, but logging the checkpoint
                    // keeps long catch-up runs observable.
                    tracing::info!(period_start = %period_start, "catch-up checkpoint");
                    since_commit = chrono::Duration::zero();
                }
            }
            Ok(())
        }
        Task::ChangeStatisticsUnit {
            statistic_id,
            from_unit,
            to_unit,
        } => import::change_statistics_unit(
            conn,
            metadata,
            statistic_id,
            from_unit.as_deref(),
            to_unit.as_deref(),
        ),
        Task::AdjustSum {
            statistic_id,
            start,
            adjustment,
        } => import::adjust_statistics(conn, metadata, statistic_id, *start, *adjustment)
            .map(|_| ()),
        Task::ClearStatistics { statistic_ids } => {
            import::clear_statistics(conn, metadata, statistic_ids)
        }
        Task::UpdateStatisticsMetadata {
            statistic_id,
            unit_of_measurement,
            new_statistic_id,
        } => {
            if let Some(new_id) = new_statistic_id {
                // Caller already identified the statistic by id, so the
                // domain check in `update_statistic_id` is satisfied against
                // its own current source rather than requiring a separate
                // domain argument at this surface (spec §6
                // `update_statistics_metadata(id, new_id?, new_unit?)` has
                // no domain parameter; spec §4.2's `update_statistic_id`
                // C2 primitive does, for platform-initiated renames).
                let domain = metadata.get(statistic_id).map(|m| m.source);
                if let Some(domain) = domain {
                    metadata.update_statistic_id(conn, &domain, statistic_id, new_id)?;
                }
            }
            let id_for_unit = new_statistic_id.as_deref().unwrap_or(statistic_id);
            if let Some(unit) = unit_of_measurement {
                metadata.update_unit_of_measurement(conn, id_for_unit, unit.as_deref())?;
            }
            Ok(())
        }
        Task::Import { request } => import::import_statistics(conn, metadata, request).map(|_| ()),
        Task::RepairDuplicates => {
            let backup_dir = config.db_path.parent().unwrap_or_else(|| std::path::Path::new("."));
            import::repair_duplicates(conn, metadata, backup_dir).map(|_| ())
        }
    }
}

/// Roll up `hour_start` if it has already fully elapsed (never roll up the
/// in-progress hour).
fn roll_hour_if_complete(
    conn: &Connection,
    metadata: &MetadataManager,
    hour_start: chrono::DateTime<Utc>,
) -> Result<()> {
    if hour_start + chrono::Duration::hours(1) > Utc::now() {
        return Ok(());
    }
    compaction::roll_hour(conn, metadata, hour_start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ImportRequest, ImportRow, ImportTimestamp};
    use crate::platform::PlatformRegistry;
    use chrono::Duration;

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        storage::apply_pragmas(&conn).unwrap();
        storage::init_schema(&conn).unwrap();
        conn
    }

    fn seed_metadata(conn: &Connection, statistic_id: &str, has_mean: bool, has_sum: bool) -> i64 {
        storage::insert_metadata(
            conn,
            &crate::model::StatisticMetaData {
                id: 0,
                statistic_id: statistic_id.into(),
                source: "recorder".into(),
                unit_of_measurement: None,
                has_mean,
                has_sum,
                name: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn adjust_prunes_short_term_rows_past_retention() {
        let conn = open();
        let metadata = MetadataManager::load(&conn).unwrap();
        let id = seed_metadata(&conn, "sensor.old", true, false);
        metadata.reload(&conn).unwrap();

        let config = RecorderConfig {
            keep_days_short_term: 1,
            ..RecorderConfig::default()
        };

        let stale_start = Utc::now() - Duration::days(5);
        storage::upsert_rows(
            &conn,
            true,
            std::slice::from_ref(&crate::model::StatisticRow {
                metadata_id: id,
                start: stale_start,
                created: stale_start,
                state: None,
                mean: Some(1.0),
                min: Some(1.0),
                max: Some(1.0),
                sum: None,
                last_reset: None,
            }),
        )
        .unwrap();

        let platforms = PlatformRegistry::new();
        execute_task(&conn, &metadata, &platforms, &config, &Task::Adjust).unwrap();

        let remaining = storage::fetch_rows(
            &conn,
            true,
            id,
            stale_start - Duration::minutes(1),
            stale_start + Duration::minutes(1),
        )
        .unwrap();
        assert!(remaining.is_empty());
    }

    #[test]
    fn import_task_writes_upserted_row() {
        let conn = open();
        let metadata = MetadataManager::load(&conn).unwrap();
        let config = RecorderConfig::default();
        let platforms = PlatformRegistry::new();

        let hour_start = crate::compaction::hour_bucket_start(Utc::now() - Duration::hours(2));
        let request = ImportRequest {
            statistic_id: "external:total_energy".into(),
            source: "external".into(),
            unit_of_measurement: Some("kWh".into()),
            has_mean: false,
            has_sum: true,
            name: None,
            internal: false,
            rows: vec![ImportRow {
                start: ImportTimestamp::Aware(hour_start.fixed_offset()),
                last_reset: None,
                state: None,
                mean: None,
                min: None,
                max: None,
                sum: Some(42.0),
            }],
        };

        execute_task(
            &conn,
            &metadata,
            &platforms,
            &config,
            &Task::Import { request },
        )
        .unwrap();

        let meta = storage::get_metadata_by_statistic_id(&conn, "external:total_energy")
            .unwrap()
            .expect("metadata row created by import");
        let rows = storage::fetch_rows(
            &conn,
            false,
            meta.id,
            hour_start,
            hour_start + Duration::hours(1),
        )
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sum, Some(42.0));
    }
}
