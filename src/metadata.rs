//! Metadata manager (spec §2, C2): an in-memory cache over
//! `statistics_meta`, kept coherent with the table by routing every
//! mutation through [`MetadataManager`] rather than touching
//! [`crate::storage`]'s metadata functions directly.
//!
//! Grounded in the teacher's `LifestatsMetrics`-style shared-state pattern
//! (atomics/locks wrapped in an `Arc`, shared between the writer thread and
//! read-side callers) from `pipeline/lifestats.rs`.

use crate::error::Result;
use crate::model::{StatisticKind, StatisticMetaData};
use crate::storage;
use regex::Regex;
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::{LazyLock, RwLock};

/// `^(?!.+__)(?!_)[\da-z_]+(?<!_):(?!_)[\da-z_]+(?<!_)$` (spec §4.6,
/// SPEC_FULL §9.2), carried over verbatim from the original's
/// `VALID_STATISTIC_ID`. Rust's `regex` crate has no lookaround, so the
/// no-double-underscore/no-leading-or-trailing-underscore constraints are
/// checked by [`valid_statistic_id`] as plain string scans instead of in
/// the pattern itself.
static STATISTIC_ID_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\da-z_]+:[\da-z_]+$").unwrap());

/// Validate an **external** statistic_id: `<source>:<object>`, lowercase
/// alphanumerics/underscores on each side, no leading/trailing underscore,
/// no `__` anywhere (spec §4.6).
pub fn valid_statistic_id(statistic_id: &str) -> bool {
    if !STATISTIC_ID_SHAPE.is_match(statistic_id) {
        return false;
    }
    if statistic_id.contains("__") {
        return false;
    }
    let Some((source, object)) = statistic_id.split_once(':') else {
        return false;
    };
    !source.starts_with('_')
        && !source.ends_with('_')
        && !object.starts_with('_')
        && !object.ends_with('_')
}

/// Split an external statistic_id into `(source, object)` on the first
/// `:` (spec §4.6 `split_statistic_id`). Callers should validate with
/// [`valid_statistic_id`] first.
pub fn split_statistic_id(statistic_id: &str) -> Option<(&str, &str)> {
    statistic_id.split_once(':')
}

/// Classify a metadata row's aggregate kind from its `has_mean`/`has_sum`
/// flags, for [`MetadataManager::get_many`]'s `type_filter`.
fn statistic_kind(meta: &StatisticMetaData) -> StatisticKind {
    match (meta.has_mean, meta.has_sum) {
        (true, _) => StatisticKind::Mean,
        (false, true) => StatisticKind::Sum,
        (false, false) => StatisticKind::None,
    }
}

#[derive(Default)]
struct Cache {
    by_statistic_id: HashMap<String, StatisticMetaData>,
    by_id: HashMap<i64, String>,
}

/// Coherency layer over `statistics_meta`. Cheap to clone-share via `Arc`;
/// internally synchronized with an `RwLock` since reads (query engine) vastly
/// outnumber writes (task queue worker, new statistic_id discovery).
pub struct MetadataManager {
    cache: RwLock<Cache>,
}

impl MetadataManager {
    /// Build an empty manager and populate it from `conn` (spec §2 initial
    /// load at startup).
    pub fn load(conn: &Connection) -> Result<Self> {
        let rows = storage::list_metadata(conn)?;
        let mut cache = Cache::default();
        for meta in rows {
            cache.by_id.insert(meta.id, meta.statistic_id.clone());
            cache.by_statistic_id.insert(meta.statistic_id.clone(), meta);
        }
        Ok(Self {
            cache: RwLock::new(cache),
        })
    }

    pub fn get(&self, statistic_id: &str) -> Option<StatisticMetaData> {
        self.cache
            .read()
            .unwrap()
            .by_statistic_id
            .get(statistic_id)
            .cloned()
    }

    pub fn get_by_id(&self, metadata_id: i64) -> Option<StatisticMetaData> {
        let cache = self.cache.read().unwrap();
        let statistic_id = cache.by_id.get(&metadata_id)?;
        cache.by_statistic_id.get(statistic_id).cloned()
    }

    /// Bulk lookup with optional narrowing (spec §4.2
    /// `get_many(statistic_ids?, type_filter?, source_filter?)`). `None`
    /// for `statistic_ids` means "all known statistics"; `type_filter`
    /// narrows by [`StatisticKind`] (derived from `has_mean`/`has_sum`);
    /// `source_filter` narrows by the integration/domain that owns the
    /// row.
    pub fn get_many(
        &self,
        statistic_ids: Option<&[String]>,
        type_filter: Option<StatisticKind>,
        source_filter: Option<&str>,
    ) -> Vec<StatisticMetaData> {
        let cache = self.cache.read().unwrap();
        let candidates: Vec<StatisticMetaData> = match statistic_ids {
            Some(ids) => ids
                .iter()
                .filter_map(|id| cache.by_statistic_id.get(id).cloned())
                .collect(),
            None => cache.by_statistic_id.values().cloned().collect(),
        };
        candidates
            .into_iter()
            .filter(|meta| match type_filter {
                Some(kind) => statistic_kind(meta) == kind,
                None => true,
            })
            .filter(|meta| match source_filter {
                Some(source) => meta.source == source,
                None => true,
            })
            .collect()
    }

    pub fn list_all(&self) -> Vec<StatisticMetaData> {
        self.cache
            .read()
            .unwrap()
            .by_statistic_id
            .values()
            .cloned()
            .collect()
    }

    /// Get the existing metadata row for `statistic_id`, or create one
    /// from `source`/`unit`/`has_mean`/`has_sum` if absent (spec §2
    /// `async_add_external_statistics` / platform-driven discovery).
    pub fn get_or_create(
        &self,
        conn: &Connection,
        statistic_id: &str,
        source: &str,
        unit_of_measurement: Option<&str>,
        has_mean: bool,
        has_sum: bool,
    ) -> Result<StatisticMetaData> {
        if let Some(existing) = self.get(statistic_id) {
            return Ok(existing);
        }

        let meta = StatisticMetaData {
            id: 0,
            statistic_id: statistic_id.to_string(),
            source: source.to_string(),
            unit_of_measurement: unit_of_measurement.map(String::from),
            has_mean,
            has_sum,
            name: None,
        };
        let id = storage::insert_metadata(conn, &meta)?;
        let meta = StatisticMetaData { id, ..meta };

        let mut cache = self.cache.write().unwrap();
        cache.by_id.insert(id, meta.statistic_id.clone());
        cache
            .by_statistic_id
            .insert(meta.statistic_id.clone(), meta.clone());
        Ok(meta)
    }

    /// Insert `incoming` if its statistic_id is unseen, or compare it
    /// against the stored descriptor and replace in place if any field
    /// differs (spec §2 `update_or_add`). Returns `(modified, metadata_id)`
    /// where `modified` is `Some(statistic_id)` only when the unit of
    /// measurement changed, so callers know to invalidate dependent caches
    /// (spec §2: "returns the statistic_id as modified when the unit
    /// changed").
    pub fn update_or_add(
        &self,
        conn: &Connection,
        incoming: &StatisticMetaData,
    ) -> Result<(Option<String>, i64)> {
        let Some(existing) = self.get(&incoming.statistic_id) else {
            let id = storage::insert_metadata(conn, incoming)?;
            let meta = StatisticMetaData { id, ..incoming.clone() };
            let mut cache = self.cache.write().unwrap();
            cache.by_id.insert(id, meta.statistic_id.clone());
            cache.by_statistic_id.insert(meta.statistic_id.clone(), meta);
            return Ok((None, id));
        };

        let unit_changed = existing.unit_of_measurement != incoming.unit_of_measurement;
        let differs = unit_changed
            || existing.source != incoming.source
            || existing.has_mean != incoming.has_mean
            || existing.has_sum != incoming.has_sum
            || existing.name != incoming.name;

        if !differs {
            return Ok((None, existing.id));
        }

        let merged = StatisticMetaData {
            id: existing.id,
            statistic_id: existing.statistic_id.clone(),
            ..incoming.clone()
        };
        storage::update_unit_of_measurement(conn, existing.id, merged.unit_of_measurement.as_deref())?;
        storage::replace_metadata_fields(conn, &merged)?;
        self.cache
            .write()
            .unwrap()
            .by_statistic_id
            .insert(merged.statistic_id.clone(), merged.clone());

        let modified = unit_changed.then(|| incoming.statistic_id.clone());
        Ok((modified, merged.id))
    }

    /// Update the unit of measurement in storage and cache (spec §4.6
    /// `update_statistics_metadata`).
    pub fn update_unit_of_measurement(
        &self,
        conn: &Connection,
        statistic_id: &str,
        unit: Option<&str>,
    ) -> Result<()> {
        let Some(mut meta) = self.get(statistic_id) else {
            return Ok(());
        };
        storage::update_unit_of_measurement(conn, meta.id, unit)?;
        meta.unit_of_measurement = unit.map(String::from);
        self.cache
            .write()
            .unwrap()
            .by_statistic_id
            .insert(statistic_id.to_string(), meta);
        Ok(())
    }

    /// Rename `old_id` to `new_id` in storage and in both cache maps (spec
    /// §4.2 `update_statistic_id`). `old_id`'s domain must match `domain`
    /// the same way the original's `update_statistics_metadata` only lets a
    /// platform rename its own entities, not cross domains; callers that
    /// don't need that check (e.g. an external-source rename) should pass
    /// the statistic_id's own prefix as `domain`. Fails if `new_id` is
    /// already in use or `old_id` is unknown.
    pub fn update_statistic_id(
        &self,
        conn: &Connection,
        domain: &str,
        old_id: &str,
        new_id: &str,
    ) -> Result<()> {
        let Some(meta) = self.get(old_id) else {
            return Err(crate::error::RecorderError::Validation(format!(
                "unknown statistic_id: {old_id}"
            )));
        };
        if meta.source != domain {
            return Err(crate::error::RecorderError::Validation(format!(
                "{old_id} belongs to domain {}, not {domain}",
                meta.source
            )));
        }
        if self.get(new_id).is_some() {
            return Err(crate::error::RecorderError::Validation(format!(
                "statistic_id already in use: {new_id}"
            )));
        }

        storage::update_statistic_id(conn, meta.id, new_id)?;

        let renamed = StatisticMetaData {
            statistic_id: new_id.to_string(),
            ..meta
        };
        let mut cache = self.cache.write().unwrap();
        cache.by_statistic_id.remove(old_id);
        cache.by_id.insert(renamed.id, renamed.statistic_id.clone());
        cache
            .by_statistic_id
            .insert(renamed.statistic_id.clone(), renamed);
        Ok(())
    }

    /// Remove a statistic_id's metadata row (spec §4.7 `clear_statistics`).
    /// Does not delete the statistic rows themselves; callers are
    /// responsible for that via [`crate::storage::delete_all_for_metadata_ids`].
    pub fn delete(&self, conn: &Connection, statistic_id: &str) -> Result<()> {
        let Some(meta) = self.get(statistic_id) else {
            return Ok(());
        };
        storage::delete_metadata(conn, meta.id)?;
        let mut cache = self.cache.write().unwrap();
        cache.by_id.remove(&meta.id);
        cache.by_statistic_id.remove(statistic_id);
        Ok(())
    }

    /// Detect and remove duplicate metadata rows for the same
    /// `statistic_id` (SPEC_FULL §9.3), reloading the cache afterward since
    /// row ids shift.
    pub fn repair_duplicates(&self, conn: &Connection) -> Result<usize> {
        let dupes = storage::find_duplicate_metadata_ids(conn)?;
        for id in &dupes {
            storage::delete_metadata(conn, *id)?;
        }
        if !dupes.is_empty() {
            self.reload(conn)?;
        }
        Ok(dupes.len())
    }

    /// Rebuild the cache from storage from scratch.
    pub fn reload(&self, conn: &Connection) -> Result<()> {
        let rows = storage::list_metadata(conn)?;
        let mut cache = self.cache.write().unwrap();
        cache.by_id.clear();
        cache.by_statistic_id.clear();
        for meta in rows {
            cache.by_id.insert(meta.id, meta.statistic_id.clone());
            cache.by_statistic_id.insert(meta.statistic_id.clone(), meta);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        storage::apply_pragmas(&conn).unwrap();
        storage::init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let conn = open();
        let mgr = MetadataManager::load(&conn).unwrap();
        let a = mgr
            .get_or_create(&conn, "sensor.x", "recorder", Some("W"), true, false)
            .unwrap();
        let b = mgr
            .get_or_create(&conn, "sensor.x", "recorder", Some("W"), true, false)
            .unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn get_many_filters_by_type_and_source() {
        let conn = open();
        let mgr = MetadataManager::load(&conn).unwrap();
        mgr.get_or_create(&conn, "sensor.temp", "recorder", Some("°C"), true, false)
            .unwrap();
        mgr.get_or_create(&conn, "sensor.energy", "recorder", Some("kWh"), false, true)
            .unwrap();
        mgr.get_or_create(&conn, "grid.energy", "grid", Some("kWh"), false, true)
            .unwrap();

        let all = mgr.get_many(None, None, None);
        assert_eq!(all.len(), 3);

        let means = mgr.get_many(None, Some(StatisticKind::Mean), None);
        assert_eq!(means.len(), 1);
        assert_eq!(means[0].statistic_id, "sensor.temp");

        let recorder_only = mgr.get_many(None, None, Some("recorder"));
        assert_eq!(recorder_only.len(), 2);

        let ids = vec!["sensor.temp".to_string(), "grid.energy".to_string()];
        let narrowed = mgr.get_many(Some(&ids), Some(StatisticKind::Sum), None);
        assert_eq!(narrowed.len(), 1);
        assert_eq!(narrowed[0].statistic_id, "grid.energy");
    }

    #[test]
    fn update_statistic_id_renames_in_storage_and_cache() {
        let conn = open();
        let mgr = MetadataManager::load(&conn).unwrap();
        mgr.get_or_create(&conn, "sensor.old_name", "recorder", Some("W"), true, false)
            .unwrap();

        mgr.update_statistic_id(&conn, "recorder", "sensor.old_name", "sensor.new_name")
            .unwrap();

        assert!(mgr.get("sensor.old_name").is_none());
        assert_eq!(
            mgr.get("sensor.new_name").unwrap().statistic_id,
            "sensor.new_name"
        );
        assert_eq!(
            storage::get_metadata_by_statistic_id(&conn, "sensor.new_name")
                .unwrap()
                .unwrap()
                .statistic_id,
            "sensor.new_name"
        );
    }

    #[test]
    fn update_statistic_id_rejects_domain_mismatch() {
        let conn = open();
        let mgr = MetadataManager::load(&conn).unwrap();
        mgr.get_or_create(&conn, "sensor.x", "recorder", Some("W"), true, false)
            .unwrap();
        assert!(mgr
            .update_statistic_id(&conn, "other_domain", "sensor.x", "sensor.renamed")
            .is_err());
    }

    #[test]
    fn update_statistic_id_rejects_collision() {
        let conn = open();
        let mgr = MetadataManager::load(&conn).unwrap();
        mgr.get_or_create(&conn, "sensor.a", "recorder", Some("W"), true, false)
            .unwrap();
        mgr.get_or_create(&conn, "sensor.b", "recorder", Some("W"), true, false)
            .unwrap();
        assert!(mgr
            .update_statistic_id(&conn, "recorder", "sensor.a", "sensor.b")
            .is_err());
    }

    #[test]
    fn update_unit_reflects_in_cache() {
        let conn = open();
        let mgr = MetadataManager::load(&conn).unwrap();
        mgr.get_or_create(&conn, "sensor.y", "recorder", Some("W"), true, false)
            .unwrap();
        mgr.update_unit_of_measurement(&conn, "sensor.y", Some("kW"))
            .unwrap();
        assert_eq!(
            mgr.get("sensor.y").unwrap().unit_of_measurement,
            Some("kW".to_string())
        );
    }
}
