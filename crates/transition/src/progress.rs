//! Durable per-player transition progress.
//!
//! Layout inside the record store:
//! ```text
//! progress_states.json             - platform id -> ArenaRecord
//! archived_binds.json              - platform id -> display name before entry
//! player_zones.json                - platform id -> zone name
//! progress/<platform id>/<category>.json  - archived captured state
//! ```
//! A player with no record is in [`ProgressState::NoState`]. Binds, zones and
//! archives only exist next to a record; anything else is pruned on load.

use arena_common::{CharacterId, PlatformId, SnapshotId};
use arena_persist::{CapturedState, DurableRecordStore, Loaded, PersistenceGuard};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

pub const STATES_KEY: &str = "progress_states";
pub const BINDS_KEY: &str = "archived_binds";
pub const ZONES_KEY: &str = "player_zones";
pub const ARCHIVE_DIR: &str = "progress";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProgressState {
    NoState,
    PendingArenaKick,
    PendingArenaSpawn,
    InArena,
    PendingRestoreKick,
}

impl fmt::Display for ProgressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a player moves in and out of the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionMode {
    /// Capture and spawn within one call; `NoState <-> InArena`.
    #[default]
    Synchronous,
    /// Kick, wait for the reconnect, then spawn; the full five-state path.
    Reconnect,
}

impl fmt::Display for TransitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Synchronous => "synchronous",
            Self::Reconnect => "reconnect",
        })
    }
}

impl FromStr for TransitionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "synchronous" | "sync" => Ok(Self::Synchronous),
            "reconnect" => Ok(Self::Reconnect),
            other => Err(format!(
                "unknown transition mode '{other}' (expected synchronous or reconnect)"
            )),
        }
    }
}

/// A player's transition record. Present only while not in `NoState`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArenaRecord {
    pub state: ProgressState,
    pub mode: TransitionMode,
    /// Character handle seen at entry, replaced after a reconnect spawn.
    pub character: CharacterId,
    /// The arena-entry snapshot; the one restored on exit.
    pub snapshot: SnapshotId,
    pub entered_at: DateTime<Utc>,
}

impl ArenaRecord {
    pub fn new(
        state: ProgressState,
        mode: TransitionMode,
        character: CharacterId,
        snapshot: SnapshotId,
    ) -> Self {
        Self {
            state,
            mode,
            character,
            snapshot,
            entered_at: Utc::now(),
        }
    }
}

/// In-memory tables. Mutated by the state machine through
/// [`ProgressTables::update`].
#[derive(Debug, Default)]
pub struct TableSet {
    pub(crate) states: BTreeMap<PlatformId, ArenaRecord>,
    pub(crate) binds: BTreeMap<PlatformId, String>,
    pub(crate) zones: BTreeMap<PlatformId, String>,
    archives: BTreeMap<PlatformId, CapturedState>,
    archives_written: BTreeSet<PlatformId>,
    archives_removed: BTreeSet<PlatformId>,
    dirty: bool,
}

impl TableSet {
    pub(crate) fn state(&self, platform_id: PlatformId) -> ProgressState {
        self.states
            .get(&platform_id)
            .map_or(ProgressState::NoState, |r| r.state)
    }

    pub(crate) fn set_archive(&mut self, platform_id: PlatformId, state: CapturedState) {
        self.archives_removed.remove(&platform_id);
        self.archives_written.insert(platform_id);
        self.archives.insert(platform_id, state);
    }

    pub(crate) fn archive(&self, platform_id: PlatformId) -> Option<&CapturedState> {
        self.archives.get(&platform_id)
    }

    pub(crate) fn take_archive(&mut self, platform_id: PlatformId) -> Option<CapturedState> {
        self.archives_written.remove(&platform_id);
        self.archives_removed.insert(platform_id);
        self.archives.remove(&platform_id)
    }

    /// Drop entries that have no live record. Returns how many went.
    fn prune_orphans(&mut self) -> usize {
        let before = self.states.len();
        self.states.retain(|_, r| r.state != ProgressState::NoState);
        let mut pruned = before - self.states.len();

        let live = &self.states;
        let binds = self.binds.len();
        self.binds.retain(|id, _| live.contains_key(id));
        pruned += binds - self.binds.len();
        let zones = self.zones.len();
        self.zones.retain(|id, _| live.contains_key(id));
        pruned += zones - self.zones.len();

        let orphaned: Vec<PlatformId> = self
            .archives
            .keys()
            .filter(|id| !self.states.contains_key(*id))
            .copied()
            .collect();
        pruned += orphaned.len();
        for id in orphaned {
            self.take_archive(id);
        }
        pruned
    }
}

/// The durable progress tables plus the per-category progress archive.
pub struct ProgressTables {
    records: DurableRecordStore,
    guard: Arc<PersistenceGuard>,
    tables: Mutex<TableSet>,
}

impl ProgressTables {
    pub fn new(records: DurableRecordStore, guard: Arc<PersistenceGuard>) -> Self {
        Self {
            records,
            guard,
            tables: Mutex::new(TableSet::default()),
        }
    }

    pub fn guard(&self) -> &Arc<PersistenceGuard> {
        &self.guard
    }

    /// Replace the in-memory tables with what is on disk, pruning orphans.
    /// Pruned or recovered tables are written back. Returns the number of
    /// pruned entries.
    pub fn load(&self) -> usize {
        let states: Loaded<BTreeMap<PlatformId, ArenaRecord>> = self.records.load(STATES_KEY);
        let binds: Loaded<BTreeMap<PlatformId, String>> = self.records.load(BINDS_KEY);
        let zones: Loaded<BTreeMap<PlatformId, String>> = self.records.load(ZONES_KEY);

        let mut archives = BTreeMap::new();
        for dir in self.records.list_dirs(ARCHIVE_DIR) {
            let Ok(raw) = dir.parse::<u64>() else {
                warn!(dir, "ignoring unexpected progress archive directory");
                continue;
            };
            let platform_id = PlatformId(raw);
            let state: CapturedState = self
                .records
                .list(&archive_dir(platform_id))
                .into_iter()
                .filter_map(|key| {
                    let category = key.rsplit('/').next()?.to_string();
                    let value = self.records.load_optional::<Value>(&key)?;
                    Some((category, value))
                })
                .collect();
            archives.insert(platform_id, state);
        }

        let mut tables = TableSet {
            dirty: states.dirty || binds.dirty || zones.dirty,
            states: states.value,
            binds: binds.value,
            zones: zones.value,
            archives,
            ..TableSet::default()
        };
        let pruned = tables.prune_orphans();
        if pruned > 0 {
            info!(pruned, "orphaned progress entries pruned");
            tables.dirty = true;
        }
        let dirty = tables.dirty;
        info!(players = tables.states.len(), "progress tables loaded");
        *self.lock() = tables;

        if dirty {
            self.save();
        }
        pruned
    }

    /// Write every table and pending archive change. While persistence is
    /// suppressed this only marks the tables dirty.
    pub fn save(&self) -> bool {
        let mut guard = self.lock();
        let tables = &mut *guard;
        if self.guard.is_suppressed() {
            tables.dirty = true;
            debug!("persistence suppressed, progress save deferred");
            return false;
        }

        let mut ok = true;
        for platform_id in std::mem::take(&mut tables.archives_removed) {
            if !self.records.clear_dir(&archive_dir(platform_id)) {
                tables.archives_removed.insert(platform_id);
                ok = false;
            }
        }
        for platform_id in std::mem::take(&mut tables.archives_written) {
            let saved = tables.archives.get(&platform_id).is_none_or(|state| {
                self.records.clear_dir(&archive_dir(platform_id))
                    && state
                        .iter()
                        .all(|(category, value)| {
                            self.records
                                .save(&archive_key(platform_id, category), value)
                        })
            });
            if !saved {
                tables.archives_written.insert(platform_id);
                ok = false;
            }
        }
        ok &= self.records.save(STATES_KEY, &tables.states);
        ok &= self.records.save(BINDS_KEY, &tables.binds);
        ok &= self.records.save(ZONES_KEY, &tables.zones);

        tables.dirty = !ok;
        ok
    }

    /// Autosave entry point: write if anything changed and saves are allowed.
    pub fn flush(&self) -> bool {
        if !self.is_dirty() || self.guard.is_suppressed() {
            return false;
        }
        self.save()
    }

    pub fn is_dirty(&self) -> bool {
        let tables = self.lock();
        tables.dirty || !tables.archives_written.is_empty() || !tables.archives_removed.is_empty()
    }

    pub fn state(&self, platform_id: PlatformId) -> ProgressState {
        self.lock().state(platform_id)
    }

    pub fn record(&self, platform_id: PlatformId) -> Option<ArenaRecord> {
        self.lock().states.get(&platform_id).cloned()
    }

    pub fn records(&self) -> Vec<(PlatformId, ArenaRecord)> {
        self.lock()
            .states
            .iter()
            .map(|(id, r)| (*id, r.clone()))
            .collect()
    }

    pub fn bind(&self, platform_id: PlatformId) -> Option<String> {
        self.lock().binds.get(&platform_id).cloned()
    }

    pub fn zone(&self, platform_id: PlatformId) -> Option<String> {
        self.lock().zones.get(&platform_id).cloned()
    }

    pub fn archive(&self, platform_id: PlatformId) -> Option<CapturedState> {
        self.lock().archives.get(&platform_id).cloned()
    }

    /// Run `f` against the tables under the table lock. Nothing is written;
    /// callers follow up with [`ProgressTables::save`].
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut TableSet) -> R) -> R {
        f(&mut self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, TableSet> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn archive_dir(platform_id: PlatformId) -> String {
    format!("{ARCHIVE_DIR}/{platform_id}")
}

fn archive_key(platform_id: PlatformId, category: &str) -> String {
    format!("{ARCHIVE_DIR}/{platform_id}/{category}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_common::category;
    use serde_json::json;

    fn tables_at(root: &std::path::Path) -> ProgressTables {
        ProgressTables::new(
            DurableRecordStore::open(root),
            Arc::new(PersistenceGuard::new()),
        )
    }

    fn record(state: ProgressState) -> ArenaRecord {
        ArenaRecord::new(
            state,
            TransitionMode::Reconnect,
            CharacterId::new(),
            SnapshotId::from("20261018120000000-1001"),
        )
    }

    #[test]
    fn load_prunes_orphans_and_writes_back() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DurableRecordStore::open(tmp.path());
        let states: BTreeMap<PlatformId, ArenaRecord> =
            [(PlatformId(1), record(ProgressState::InArena))].into();
        let binds: BTreeMap<PlatformId, String> = [
            (PlatformId(1), "Live".to_string()),
            (PlatformId(2), "Orphan".to_string()),
        ]
        .into();
        let zones: BTreeMap<PlatformId, String> = [(PlatformId(3), "pit".to_string())].into();
        store.save(STATES_KEY, &states);
        store.save(BINDS_KEY, &binds);
        store.save(ZONES_KEY, &zones);
        store.save("progress/4/experience", &json!(10.0));

        let tables = tables_at(tmp.path());
        assert_eq!(tables.load(), 3);
        assert_eq!(tables.bind(PlatformId(1)).as_deref(), Some("Live"));
        assert!(tables.bind(PlatformId(2)).is_none());
        assert!(tables.zone(PlatformId(3)).is_none());
        assert!(!tmp.path().join("progress/4").exists());

        let on_disk: BTreeMap<PlatformId, String> = store.load(BINDS_KEY).value;
        assert_eq!(on_disk.len(), 1);
        assert!(!tables.is_dirty());
    }

    #[test]
    fn archive_round_trips_per_category() {
        let tmp = tempfile::tempdir().unwrap();
        let tables = tables_at(tmp.path());
        let mut archive = CapturedState::new();
        archive.insert(category::EXPERIENCE, json!(1200.0));
        archive.insert(category::NAME, json!("OldName"));

        tables.update(|t| {
            t.states
                .insert(PlatformId(1001), record(ProgressState::PendingArenaKick));
            t.set_archive(PlatformId(1001), archive.clone());
        });
        assert!(tables.save());
        assert!(tmp.path().join("progress/1001/experience.json").exists());
        assert!(tmp.path().join("progress/1001/name.json").exists());

        let reloaded = tables_at(tmp.path());
        assert_eq!(reloaded.load(), 0);
        assert_eq!(reloaded.archive(PlatformId(1001)), Some(archive));
        assert_eq!(
            reloaded.state(PlatformId(1001)),
            ProgressState::PendingArenaKick
        );
    }

    #[test]
    fn taken_archive_is_removed_on_save() {
        let tmp = tempfile::tempdir().unwrap();
        let tables = tables_at(tmp.path());
        tables.update(|t| {
            t.states.insert(PlatformId(5), record(ProgressState::InArena));
            t.set_archive(PlatformId(5), CapturedState::new());
        });
        let mut archive = CapturedState::new();
        archive.insert(category::SPELLS, json!([1, 2]));
        tables.update(|t| t.set_archive(PlatformId(5), archive));
        tables.save();
        assert!(tmp.path().join("progress/5/spells.json").exists());

        tables.update(|t| {
            t.states.remove(&PlatformId(5));
            t.take_archive(PlatformId(5));
        });
        tables.save();
        assert!(!tmp.path().join("progress/5").exists());
    }

    #[test]
    fn suppressed_save_marks_dirty_until_flush() {
        let tmp = tempfile::tempdir().unwrap();
        let tables = tables_at(tmp.path());
        tables.update(|t| {
            t.states.insert(PlatformId(9), record(ProgressState::InArena));
        });
        {
            let _scope = tables.guard().acquire();
            assert!(!tables.save());
            assert!(!tables.flush());
            assert!(!tmp.path().join("progress_states.json").exists());
        }
        assert!(tables.is_dirty());
        assert!(tables.flush());
        assert!(tmp.path().join("progress_states.json").exists());
        assert!(!tables.flush());
    }

    #[test]
    fn mode_parses_from_config_text() {
        assert_eq!(
            "Reconnect".parse::<TransitionMode>(),
            Ok(TransitionMode::Reconnect)
        );
        assert!("teleport".parse::<TransitionMode>().is_err());
        let yaml_like: TransitionMode = serde_json::from_str("\"synchronous\"").unwrap();
        assert_eq!(yaml_like, TransitionMode::Synchronous);
    }
}
