//! Snapshot lifecycle: capture, durable storage, restore, listing, deletion.
//!
//! Layout inside the record store:
//! ```text
//! snapshots/
//!   <platform id>/
//!     <snapshot id>.json       - one document per snapshot
//!     <snapshot id>.json.bak
//! ```
//! The in-memory index is authoritative for snapshots created by this
//! process; documents left on disk by earlier processes are merged in on read.

use crate::category::{CategoryError, CategoryRegistry};
use crate::guard::PersistenceGuard;
use crate::record_store::DurableRecordStore;
use crate::snapshot::{CapturedState, PlayerSnapshot};
use arena_common::{PlatformId, Player, SnapshotId};
use arena_kernel::SaveHook;
use chrono::{DateTime, Timelike, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

pub const SNAPSHOT_DIR: &str = "snapshots";

/// `yyyyMMddHHmmssSSS`, fixed width so ids sort by time.
const ID_TIME_FORMAT: &str = "%Y%m%d%H%M%S%3f";

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("capturing {category} for player {player} failed: {source}")]
    Capture {
        player: PlatformId,
        category: String,
        #[source]
        source: CategoryError,
    },
    #[error("snapshot {id} for player {player} not found")]
    NotFound { player: PlatformId, id: SnapshotId },
    #[error("snapshot {id} for player {player} could not be written")]
    Persist { player: PlatformId, id: SnapshotId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryFailure {
    pub category: String,
    pub reason: String,
}

/// Outcome of a best-effort restore.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Categories written back, in apply order.
    pub applied: Vec<String>,
    /// Categories present in the record but unknown to this registry.
    pub skipped: Vec<String>,
    /// Categories whose setter failed. Not retried.
    pub failed: Vec<CategoryFailure>,
}

impl RestoreReport {
    /// Every recorded category was applied.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

type PlayerIndex = BTreeMap<SnapshotId, PlayerSnapshot>;

/// Owns every snapshot record: in memory and on disk.
pub struct SnapshotStore {
    records: DurableRecordStore,
    guard: Arc<PersistenceGuard>,
    categories: CategoryRegistry,
    save_hook: Arc<dyn SaveHook>,
    index: RwLock<HashMap<PlatformId, PlayerIndex>>,
    deferred: Mutex<BTreeSet<(PlatformId, SnapshotId)>>,
    last_issued: Mutex<Option<DateTime<Utc>>>,
}

impl SnapshotStore {
    pub fn new(
        records: DurableRecordStore,
        guard: Arc<PersistenceGuard>,
        categories: CategoryRegistry,
        save_hook: Arc<dyn SaveHook>,
    ) -> Self {
        Self {
            records,
            guard,
            categories,
            save_hook,
            index: RwLock::new(HashMap::new()),
            deferred: Mutex::new(BTreeSet::new()),
            last_issued: Mutex::new(None),
        }
    }

    pub fn guard(&self) -> &Arc<PersistenceGuard> {
        &self.guard
    }

    pub fn categories(&self) -> &CategoryRegistry {
        &self.categories
    }

    /// Read every registered category. The first getter error aborts the
    /// whole capture.
    pub fn capture_state(&self, player: &Player) -> Result<CapturedState, SnapshotError> {
        let mut state = CapturedState::new();
        for category in self.categories.iter() {
            match category.capture(player) {
                Ok(value) => state.insert(category.name(), value),
                Err(source) => {
                    error!(
                        player = %player.platform_id,
                        category = category.name(),
                        error = %source,
                        "state capture aborted"
                    );
                    return Err(SnapshotError::Capture {
                        player: player.platform_id,
                        category: category.name().to_string(),
                        source,
                    });
                }
            }
        }
        Ok(state)
    }

    /// Write `state` back onto the player, best effort.
    ///
    /// All setters run inside one suppression scope, then the host is asked
    /// for a single save. Categories absent from `state` are left alone.
    pub fn apply_state(&self, player: &Player, state: &CapturedState) -> RestoreReport {
        let mut report = RestoreReport::default();
        {
            let _scope = self.guard.acquire();
            for category in self.categories.iter() {
                let Some(value) = state.get(category.name()) else {
                    continue;
                };
                match category.apply(player, value) {
                    Ok(()) => report.applied.push(category.name().to_string()),
                    Err(e) => {
                        error!(
                            player = %player.platform_id,
                            category = category.name(),
                            error = %e,
                            "category restore failed, continuing"
                        );
                        report.failed.push(CategoryFailure {
                            category: category.name().to_string(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }
        for name in state.categories() {
            if self.categories.get(name).is_none() {
                warn!(player = %player.platform_id, category = name, "no handler for recorded category");
                report.skipped.push(name.to_string());
            }
        }
        self.save_hook.request_save(player);
        report
    }

    /// Capture the player into a new snapshot.
    pub fn create_snapshot(
        &self,
        player: &Player,
        description: Option<&str>,
        is_arena: bool,
    ) -> Result<SnapshotId, SnapshotError> {
        let platform_id = player.platform_id;
        let state = self.capture_state(player)?;
        let (id, created_at) = self.next_id(platform_id);
        let snapshot = PlayerSnapshot::new(
            platform_id,
            id.clone(),
            created_at,
            is_arena,
            description.map(str::to_string),
            state,
        );
        let categories = snapshot.state.len();

        self.index_write()
            .entry(platform_id)
            .or_default()
            .insert(id.clone(), snapshot.clone());
        if !self.persist(&snapshot) {
            self.remove_from_index(platform_id, &id);
            return Err(SnapshotError::Persist {
                player: platform_id,
                id,
            });
        }

        info!(player = %platform_id, snapshot = %id, is_arena, categories, "snapshot created");
        Ok(id)
    }

    /// Apply a stored snapshot to the player. A missing snapshot fails the
    /// call; failing categories are reported in the [`RestoreReport`].
    pub fn restore_snapshot(
        &self,
        player: &Player,
        id: &SnapshotId,
    ) -> Result<RestoreReport, SnapshotError> {
        let Some(snapshot) = self.snapshot(player.platform_id, id) else {
            warn!(player = %player.platform_id, snapshot = %id, "restore failed: snapshot not found");
            return Err(SnapshotError::NotFound {
                player: player.platform_id,
                id: id.clone(),
            });
        };
        let report = self.apply_state(player, &snapshot.state);
        info!(
            player = %player.platform_id,
            snapshot = %id,
            applied = report.applied.len(),
            failed = report.failed.len(),
            "snapshot restored"
        );
        Ok(report)
    }

    /// Look a snapshot up in memory, then on disk.
    pub fn snapshot(&self, platform_id: PlatformId, id: &SnapshotId) -> Option<PlayerSnapshot> {
        if let Some(found) = self
            .index_read()
            .get(&platform_id)
            .and_then(|snaps| snaps.get(id))
        {
            return Some(found.clone());
        }
        let snapshot = self.load_from_disk(&snapshot_key(platform_id, id))?;
        self.index_write()
            .entry(platform_id)
            .or_default()
            .insert(id.clone(), snapshot.clone());
        Some(snapshot)
    }

    /// All snapshots of a player, newest first.
    pub fn snapshots(&self, platform_id: PlatformId) -> Vec<PlayerSnapshot> {
        let mut merged: PlayerIndex = self
            .index_read()
            .get(&platform_id)
            .cloned()
            .unwrap_or_default();
        for key in self.records.list(&player_dir(platform_id)) {
            let id = SnapshotId(key.rsplit('/').next().unwrap_or_default().to_string());
            if merged.contains_key(&id) {
                continue;
            }
            if let Some(snapshot) = self.load_from_disk(&key) {
                merged.insert(id, snapshot);
            }
        }
        let mut snapshots: Vec<PlayerSnapshot> = merged.into_values().collect();
        snapshots.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        snapshots
    }

    pub fn latest_snapshot(&self, platform_id: PlatformId) -> Option<PlayerSnapshot> {
        self.snapshots(platform_id).into_iter().next()
    }

    /// Players with at least one snapshot in memory or on disk.
    pub fn players(&self) -> Vec<PlatformId> {
        let mut players: BTreeSet<PlatformId> = self.index_read().keys().copied().collect();
        players.extend(
            self.records
                .list_dirs(SNAPSHOT_DIR)
                .iter()
                .filter_map(|dir| dir.parse().ok())
                .map(PlatformId),
        );
        players.into_iter().collect()
    }

    /// Remove a snapshot from memory and disk. Returns whether anything was
    /// removed; deleting an absent snapshot is not an error.
    pub fn delete_snapshot(&self, platform_id: PlatformId, id: &SnapshotId) -> bool {
        let in_memory = self.remove_from_index(platform_id, id);
        self.deferred_lock().remove(&(platform_id, id.clone()));
        let on_disk = self.records.delete(&snapshot_key(platform_id, id));
        if in_memory || on_disk {
            info!(player = %platform_id, snapshot = %id, "snapshot deleted");
        } else {
            debug!(player = %platform_id, snapshot = %id, "snapshot already gone");
        }
        in_memory || on_disk
    }

    /// Drop every snapshot of every player, in memory and on disk.
    pub fn clear_all(&self) -> bool {
        let players = {
            let mut index = self.index_write();
            let players = index.len();
            index.clear();
            players
        };
        self.deferred_lock().clear();
        let cleared = self.records.clear_dir(SNAPSHOT_DIR);
        warn!(players, cleared, "all snapshots cleared");
        cleared
    }

    /// Write snapshots whose save was skipped while persistence was
    /// suppressed. Returns how many were written.
    pub fn flush_pending(&self) -> usize {
        if self.guard.is_suppressed() {
            return 0;
        }
        let pending = std::mem::take(&mut *self.deferred_lock());
        let mut written = 0;
        for (platform_id, id) in pending {
            let snapshot = self
                .index_read()
                .get(&platform_id)
                .and_then(|snaps| snaps.get(&id))
                .cloned();
            let Some(snapshot) = snapshot else {
                continue;
            };
            if self.records.save(&snapshot_key(platform_id, &id), &snapshot) {
                written += 1;
            } else {
                self.deferred_lock().insert((platform_id, id));
            }
        }
        if written > 0 {
            debug!(written, "deferred snapshots flushed");
        }
        written
    }

    /// Number of snapshot writes waiting for suppression to end.
    pub fn pending_writes(&self) -> usize {
        self.deferred_lock().len()
    }

    fn persist(&self, snapshot: &PlayerSnapshot) -> bool {
        if self.guard.is_suppressed() {
            debug!(snapshot = %snapshot.id, "persistence suppressed, snapshot write deferred");
            self.deferred_lock()
                .insert((snapshot.platform_id, snapshot.id.clone()));
            return true;
        }
        self.records
            .save(&snapshot_key(snapshot.platform_id, &snapshot.id), snapshot)
    }

    fn load_from_disk(&self, key: &str) -> Option<PlayerSnapshot> {
        self.records
            .load_validated(key, |snapshot: &PlayerSnapshot| {
                if snapshot.verify() {
                    Ok(())
                } else {
                    Err("checksum mismatch".into())
                }
            })
            .map(|loaded| loaded.value)
    }

    fn remove_from_index(&self, platform_id: PlatformId, id: &SnapshotId) -> bool {
        let mut index = self.index_write();
        let Some(snaps) = index.get_mut(&platform_id) else {
            return false;
        };
        let removed = snaps.remove(id).is_some();
        if snaps.is_empty() {
            index.remove(&platform_id);
        }
        removed
    }

    /// Time-ordered id, strictly increasing within this store even when two
    /// captures land in the same millisecond.
    fn next_id(&self, platform_id: PlatformId) -> (SnapshotId, DateTime<Utc>) {
        let mut last = self
            .last_issued
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now();
        let mut created_at = now
            .with_nanosecond(now.nanosecond() / 1_000_000 * 1_000_000)
            .unwrap_or(now);
        if let Some(previous) = *last {
            if created_at <= previous {
                created_at = previous + chrono::Duration::milliseconds(1);
            }
        }
        *last = Some(created_at);
        let id = SnapshotId(format!(
            "{}-{}",
            created_at.format(ID_TIME_FORMAT),
            platform_id
        ));
        (id, created_at)
    }

    fn index_read(&self) -> RwLockReadGuard<'_, HashMap<PlatformId, PlayerIndex>> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn index_write(&self) -> RwLockWriteGuard<'_, HashMap<PlatformId, PlayerIndex>> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn deferred_lock(&self) -> MutexGuard<'_, BTreeSet<(PlatformId, SnapshotId)>> {
        self.deferred.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn player_dir(platform_id: PlatformId) -> String {
    format!("{SNAPSHOT_DIR}/{platform_id}")
}

fn snapshot_key(platform_id: PlatformId, id: &SnapshotId) -> String {
    format!("{SNAPSHOT_DIR}/{platform_id}/{id}")
}
