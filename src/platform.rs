//! Platform capability registry (spec §6 "Platform capability", §9 "Dynamic
//! platform collaborators"): the statistics engine never hardcodes which
//! integrations feed it, so it asks a registry of capability objects for the
//! optional operations it needs and treats a missing capability as a no-op.
//!
//! Grounded in the teacher's `pipeline::EventProcessor` trait: optional
//! trait methods with default no-op bodies, collected into a registry that
//! is consulted in registration order. Here the methods are independent
//! capability probes (`compile_statistics`, `list_statistic_ids`,
//! `validate_statistics`, `exclude_attributes`) rather than a single
//! chained `process` call, since platforms don't transform each other's
//! output the way event processors do.

use crate::model::StatisticMetaData;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

/// One sample a platform reports for a statistic within a compile window,
/// before metadata resolution has assigned it a `metadata_id` (spec §4.2
/// step 2: `{meta, stat}` results plus a `current_metadata` snapshot).
#[derive(Debug, Clone)]
pub struct PlatformStatistic {
    pub meta: StatisticMetaData,
    pub start: DateTime<Utc>,
    pub state: Option<f64>,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub sum: Option<f64>,
    pub last_reset: Option<DateTime<Utc>>,
}

/// A schema/config issue a platform's own validation surfaced for one of
/// its entities (spec §6 `validate_statistics`).
#[derive(Debug, Clone)]
pub struct StatisticIssue {
    pub statistic_id: String,
    pub description: String,
}

/// Optional capability set a collaborator (integration/platform) may
/// implement (spec §6). Every method defaults to reporting "not
/// supported"; the registry treats that as a no-op rather than an error,
/// matching "treat missing capabilities as no-op rather than error"
/// (spec §9 Design Notes).
pub trait StatisticsPlatform: Send + Sync {
    /// Domain name this platform answers for (e.g. `"sensor"`), used only
    /// for logging.
    fn domain(&self) -> &str;

    /// Compute statistics for every entity this platform owns within
    /// `[start, end)` (spec §4.2 step 2). Returning `None` means this
    /// platform has no `compile_statistics` capability at all; returning
    /// `Some(vec![])` means it has the capability but nothing to report
    /// for this window.
    fn compile_statistics(
        &self,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Option<Vec<PlatformStatistic>> {
        None
    }

    /// Descriptors for statistic_ids this platform currently exposes,
    /// optionally filtered to `ids` (spec §6 `list_statistic_ids`).
    fn list_statistic_ids(&self, _ids: Option<&HashSet<String>>) -> Option<Vec<StatisticMetaData>> {
        None
    }

    /// Self-reported validation issues (spec §6 `validate_statistics`).
    fn validate_statistics(&self) -> Option<Vec<StatisticIssue>> {
        None
    }

    /// Entity attributes this platform asks the recorder not to persist
    /// alongside state history (spec §6 `exclude_attributes`). Irrelevant
    /// to the statistics engine itself (attributes live in the separate
    /// state-history recorder, which is out of scope per spec §1), kept
    /// only so a platform object can be shared unmodified with that
    /// collaborator.
    fn exclude_attributes(&self) -> HashSet<String> {
        HashSet::new()
    }
}

/// Process-wide collection of registered platforms (spec §9 "Global
/// mutable state... inject them through an engine handle" — this registry
/// is owned by [`crate::Engine`] rather than a global, but the aggregation
/// logic over "all registered platforms" lives here).
#[derive(Default, Clone)]
pub struct PlatformRegistry {
    platforms: Vec<Arc<dyn StatisticsPlatform>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, platform: Arc<dyn StatisticsPlatform>) {
        self.platforms.push(platform);
    }

    /// Invoke `compile_statistics` on every registered platform that
    /// supports it, flattening and logging which ones answered (spec
    /// §4.2 step 2).
    pub fn compile_statistics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<PlatformStatistic> {
        let mut out = Vec::new();
        for platform in &self.platforms {
            if let Some(mut results) = platform.compile_statistics(start, end) {
                tracing::debug!(
                    domain = platform.domain(),
                    count = results.len(),
                    "platform reported statistics"
                );
                out.append(&mut results);
            }
        }
        out
    }

    pub fn validate_statistics(&self) -> Vec<StatisticIssue> {
        self.platforms
            .iter()
            .filter_map(|p| p.validate_statistics())
            .flatten()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }
}

/// Read-only lookup of a live entity's current display unit (spec §4.1
/// display-unit selection: "else the engine uses the live entity's current
/// attribute unit"). Racy-by-design per spec §5 Shared-resource policy — a
/// stale read only affects display formatting, never stored values, so
/// this is modeled as a plain synchronous trait rather than anything
/// transactional.
pub trait LiveEntityState: Send + Sync {
    fn current_unit_of_measurement(&self, entity_id: &str) -> Option<String>;
}

/// A [`LiveEntityState`] that never has an opinion, used when the engine
/// runs without a host entity registry attached (e.g. external-source-only
/// statistics).
#[derive(Default)]
pub struct NoLiveEntityState;

impl LiveEntityState for NoLiveEntityState {
    fn current_unit_of_measurement(&self, _entity_id: &str) -> Option<String> {
        None
    }
}
