//! Per-player transition state machine.
//!
//! ```text
//! NoState -> PendingArenaKick -> PendingArenaSpawn -> InArena -> PendingRestoreKick -> NoState
//! NoState <-> InArena                                   (synchronous flavor)
//! ```
//! Each step checks the current state, mutates every affected table inside
//! one suppression scope, then saves once. A refused step changes nothing.

use crate::error::TransitionError;
use crate::progress::{ArenaRecord, ProgressState, ProgressTables, TableSet, TransitionMode};
use arena_common::{CharacterId, PlatformId, Player, SnapshotId};
use arena_persist::CapturedState;
use std::sync::Arc;
use tracing::{info, warn};

/// What a finished reconnect-mode exit hands back for re-application.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoredProgress {
    /// Display name archived at entry.
    pub identity: Option<String>,
    pub zone: Option<String>,
    pub snapshot: SnapshotId,
    pub archive: CapturedState,
}

pub struct TransitionStateMachine {
    tables: Arc<ProgressTables>,
}

impl TransitionStateMachine {
    pub fn new(tables: Arc<ProgressTables>) -> Self {
        Self { tables }
    }

    pub fn tables(&self) -> &Arc<ProgressTables> {
        &self.tables
    }

    pub fn state(&self, platform_id: PlatformId) -> ProgressState {
        self.tables.state(platform_id)
    }

    pub fn is_in_arena(&self, platform_id: PlatformId) -> bool {
        self.state(platform_id) == ProgressState::InArena
    }

    pub fn record(&self, platform_id: PlatformId) -> Option<ArenaRecord> {
        self.tables.record(platform_id)
    }

    pub fn records(&self) -> Vec<(PlatformId, ArenaRecord)> {
        self.tables.records()
    }

    /// `NoState -> PendingArenaKick`: archive the display name, the zone and
    /// the captured progress.
    pub fn archive_and_begin_reset(
        &self,
        player: &Player,
        identity: &str,
        zone: Option<&str>,
        snapshot: SnapshotId,
        archive: CapturedState,
    ) -> Result<(), TransitionError> {
        let platform_id = player.platform_id;
        self.guarded(|t| {
            require(t, platform_id, ProgressState::NoState)?;
            t.binds.insert(platform_id, identity.to_string());
            if let Some(zone) = zone {
                t.zones.insert(platform_id, zone.to_string());
            }
            t.set_archive(platform_id, archive);
            t.states.insert(
                platform_id,
                ArenaRecord::new(
                    ProgressState::PendingArenaKick,
                    TransitionMode::Reconnect,
                    player.character,
                    snapshot,
                ),
            );
            Ok(())
        })?;
        info!(player = %platform_id, identity, zone, "progress archived, awaiting arena kick");
        Ok(())
    }

    /// `PendingArenaKick -> PendingArenaSpawn`, on an observed disconnect.
    pub fn mark_disconnected(&self, platform_id: PlatformId) -> Result<(), TransitionError> {
        self.advance(
            platform_id,
            ProgressState::PendingArenaKick,
            ProgressState::PendingArenaSpawn,
            None,
        )
    }

    /// `PendingArenaSpawn -> InArena`, once the reconnected character has
    /// been given its arena spawn.
    pub fn mark_spawned(
        &self,
        platform_id: PlatformId,
        character: CharacterId,
    ) -> Result<(), TransitionError> {
        self.advance(
            platform_id,
            ProgressState::PendingArenaSpawn,
            ProgressState::InArena,
            Some(character),
        )
    }

    /// `InArena -> PendingRestoreKick`. Anything else is a logged no-op.
    pub fn begin_restore_process(&self, platform_id: PlatformId) -> bool {
        self.advance(
            platform_id,
            ProgressState::InArena,
            ProgressState::PendingRestoreKick,
            None,
        )
        .is_ok()
    }

    /// Read what a `PendingRestoreKick` record archived, without advancing.
    ///
    /// The exit applies this first and only then calls
    /// [`Self::restore_player_progress`], so the archive stays durable until
    /// the player has it back.
    pub fn archived_progress(
        &self,
        platform_id: PlatformId,
    ) -> Result<RestoredProgress, TransitionError> {
        self.tables.update(|t| {
            require(t, platform_id, ProgressState::PendingRestoreKick)?;
            let snapshot = t
                .states
                .get(&platform_id)
                .map(|r| r.snapshot.clone())
                .ok_or(TransitionError::StateViolation {
                    player: platform_id,
                    expected: ProgressState::PendingRestoreKick,
                    actual: ProgressState::NoState,
                })?;
            Ok(RestoredProgress {
                identity: t.binds.get(&platform_id).cloned(),
                zone: t.zones.get(&platform_id).cloned(),
                snapshot,
                archive: t.archive(platform_id).cloned().unwrap_or_default(),
            })
        })
    }

    /// `PendingRestoreKick -> NoState`. Removes the record, bind, zone and
    /// archive and hands them back.
    pub fn restore_player_progress(
        &self,
        platform_id: PlatformId,
    ) -> Result<RestoredProgress, TransitionError> {
        let restored = self.guarded(|t| {
            require(t, platform_id, ProgressState::PendingRestoreKick)?;
            let record = t
                .states
                .remove(&platform_id)
                .ok_or(TransitionError::StateViolation {
                    player: platform_id,
                    expected: ProgressState::PendingRestoreKick,
                    actual: ProgressState::NoState,
                })?;
            Ok(RestoredProgress {
                identity: t.binds.remove(&platform_id),
                zone: t.zones.remove(&platform_id),
                snapshot: record.snapshot,
                archive: t.take_archive(platform_id).unwrap_or_default(),
            })
        })?;
        if restored.archive.is_empty() {
            warn!(player = %platform_id, "progress restored without an archive");
        }
        info!(player = %platform_id, identity = restored.identity.as_deref(), "progress restored");
        Ok(restored)
    }

    /// `NoState -> InArena` in one step.
    pub fn enter_synchronously(
        &self,
        player: &Player,
        zone: Option<&str>,
        snapshot: SnapshotId,
    ) -> Result<(), TransitionError> {
        let platform_id = player.platform_id;
        self.guarded(|t| {
            require(t, platform_id, ProgressState::NoState)?;
            if let Some(zone) = zone {
                t.zones.insert(platform_id, zone.to_string());
            }
            t.states.insert(
                platform_id,
                ArenaRecord::new(
                    ProgressState::InArena,
                    TransitionMode::Synchronous,
                    player.character,
                    snapshot,
                ),
            );
            Ok(())
        })?;
        info!(player = %platform_id, zone, "entered arena");
        Ok(())
    }

    /// `InArena -> NoState` in one step. Returns the removed record.
    pub fn leave_synchronously(
        &self,
        platform_id: PlatformId,
    ) -> Result<ArenaRecord, TransitionError> {
        let record = self.guarded(|t| {
            require(t, platform_id, ProgressState::InArena)?;
            t.zones.remove(&platform_id);
            t.binds.remove(&platform_id);
            t.take_archive(platform_id);
            t.states
                .remove(&platform_id)
                .ok_or(TransitionError::StateViolation {
                    player: platform_id,
                    expected: ProgressState::InArena,
                    actual: ProgressState::NoState,
                })
        })?;
        info!(player = %platform_id, "left arena");
        Ok(record)
    }

    fn advance(
        &self,
        platform_id: PlatformId,
        from: ProgressState,
        to: ProgressState,
        character: Option<CharacterId>,
    ) -> Result<(), TransitionError> {
        self.guarded(|t| {
            require(t, platform_id, from)?;
            if let Some(record) = t.states.get_mut(&platform_id) {
                record.state = to;
                if let Some(character) = character {
                    record.character = character;
                }
            }
            Ok(())
        })?;
        info!(player = %platform_id, %from, %to, "progress advanced");
        Ok(())
    }

    /// Mutate under one suppression scope, then save once if `f` succeeded.
    fn guarded<R>(
        &self,
        f: impl FnOnce(&mut TableSet) -> Result<R, TransitionError>,
    ) -> Result<R, TransitionError> {
        let result = {
            let _scope = self.tables.guard().acquire();
            self.tables.update(f)
        };
        if result.is_ok() {
            self.tables.save();
        }
        result
    }
}

fn require(
    tables: &TableSet,
    platform_id: PlatformId,
    expected: ProgressState,
) -> Result<(), TransitionError> {
    let actual = tables.state(platform_id);
    if actual == expected {
        return Ok(());
    }
    warn!(player = %platform_id, %expected, %actual, "transition refused");
    Err(TransitionError::StateViolation {
        player: platform_id,
        expected,
        actual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_common::category;
    use arena_persist::{DurableRecordStore, PersistenceGuard};
    use serde_json::json;
    use std::path::Path;

    const OLD_NAME: &str = "OldName";

    fn machine_at(root: &Path) -> TransitionStateMachine {
        let tables = ProgressTables::new(
            DurableRecordStore::open(root),
            Arc::new(PersistenceGuard::new()),
        );
        tables.load();
        TransitionStateMachine::new(Arc::new(tables))
    }

    fn player(id: u64) -> Player {
        Player::new(PlatformId(id), CharacterId::new())
    }

    fn snapshot_id(id: u64) -> SnapshotId {
        SnapshotId(format!("20261018120000000-{id}"))
    }

    fn archive() -> CapturedState {
        let mut state = CapturedState::new();
        state.insert(category::NAME, json!(OLD_NAME));
        state.insert(category::EXPERIENCE, json!(1200.0));
        state
    }

    fn begin(machine: &TransitionStateMachine, p: &Player) {
        machine
            .archive_and_begin_reset(p, OLD_NAME, Some("pit"), snapshot_id(p.platform_id.0), archive())
            .unwrap();
    }

    #[test]
    fn full_reconnect_cycle_for_player_1001() {
        let tmp = tempfile::tempdir().unwrap();
        let machine = machine_at(tmp.path());
        let p = player(1001);
        let id = PlatformId(1001);

        begin(&machine, &p);
        assert_eq!(machine.state(id), ProgressState::PendingArenaKick);
        assert_eq!(machine.tables().bind(id).as_deref(), Some(OLD_NAME));
        assert_eq!(machine.tables().zone(id).as_deref(), Some("pit"));

        machine.mark_disconnected(id).unwrap();
        let relogged = CharacterId::new();
        machine.mark_spawned(id, relogged).unwrap();
        assert!(machine.is_in_arena(id));
        assert_eq!(machine.record(id).unwrap().character, relogged);

        assert!(machine.begin_restore_process(id));
        assert_eq!(machine.state(id), ProgressState::PendingRestoreKick);

        let restored = machine.restore_player_progress(id).unwrap();
        assert_eq!(restored.identity.as_deref(), Some(OLD_NAME));
        assert_eq!(restored.zone.as_deref(), Some("pit"));
        assert_eq!(restored.snapshot, snapshot_id(1001));
        assert_eq!(restored.archive, archive());

        assert_eq!(machine.state(id), ProgressState::NoState);
        assert!(machine.tables().bind(id).is_none());
        assert!(machine.tables().zone(id).is_none());
        assert!(machine.tables().archive(id).is_none());
        assert!(!tmp.path().join("progress/1001").exists());
    }

    #[test]
    fn archived_progress_reads_without_advancing() {
        let tmp = tempfile::tempdir().unwrap();
        let machine = machine_at(tmp.path());
        let p = player(1001);
        let id = p.platform_id;
        begin(&machine, &p);
        assert!(machine.archived_progress(id).unwrap_err().is_state_violation());

        machine.mark_disconnected(id).unwrap();
        machine.mark_spawned(id, CharacterId::new()).unwrap();
        assert!(machine.begin_restore_process(id));

        let read = machine.archived_progress(id).unwrap();
        assert_eq!(read.identity.as_deref(), Some(OLD_NAME));
        assert_eq!(read.archive, archive());
        assert_eq!(machine.state(id), ProgressState::PendingRestoreKick);
        assert!(tmp.path().join("progress/1001").exists());

        let reopened = machine_at(tmp.path());
        assert_eq!(reopened.archived_progress(id).unwrap(), read);
        assert_eq!(reopened.restore_player_progress(id).unwrap(), read);
    }

    #[test]
    fn begin_restore_outside_arena_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let machine = machine_at(tmp.path());
        let p = player(7);

        assert!(!machine.begin_restore_process(p.platform_id));
        assert_eq!(machine.state(p.platform_id), ProgressState::NoState);

        begin(&machine, &p);
        assert!(!machine.begin_restore_process(p.platform_id));
        assert_eq!(machine.state(p.platform_id), ProgressState::PendingArenaKick);
    }

    #[test]
    fn restore_progress_in_wrong_state_mutates_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let machine = machine_at(tmp.path());
        let p = player(7);
        begin(&machine, &p);
        machine.mark_disconnected(p.platform_id).unwrap();
        let before = machine.record(p.platform_id).unwrap();

        let err = machine.restore_player_progress(p.platform_id).unwrap_err();
        assert!(matches!(
            err,
            TransitionError::StateViolation {
                expected: ProgressState::PendingRestoreKick,
                actual: ProgressState::PendingArenaSpawn,
                ..
            }
        ));
        assert_eq!(machine.record(p.platform_id), Some(before));
        assert_eq!(machine.tables().bind(p.platform_id).as_deref(), Some(OLD_NAME));
        assert_eq!(machine.tables().archive(p.platform_id), Some(archive()));
    }

    #[test]
    fn second_archive_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let machine = machine_at(tmp.path());
        let p = player(3);
        begin(&machine, &p);
        let err = machine
            .archive_and_begin_reset(&p, "Renamed", None, snapshot_id(3), CapturedState::new())
            .unwrap_err();
        assert!(err.is_state_violation());
        assert_eq!(machine.tables().bind(p.platform_id).as_deref(), Some(OLD_NAME));
    }

    #[test]
    fn steps_cannot_be_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let machine = machine_at(tmp.path());
        let p = player(4);
        assert!(machine.mark_disconnected(p.platform_id).is_err());
        begin(&machine, &p);
        assert!(machine.mark_spawned(p.platform_id, CharacterId::new()).is_err());
        assert!(machine.leave_synchronously(p.platform_id).is_err());
        assert_eq!(machine.state(p.platform_id), ProgressState::PendingArenaKick);
    }

    #[test]
    fn progress_resumes_after_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let p = player(1001);
        {
            let machine = machine_at(tmp.path());
            begin(&machine, &p);
            machine.mark_disconnected(p.platform_id).unwrap();
        }

        let machine = machine_at(tmp.path());
        assert_eq!(machine.state(p.platform_id), ProgressState::PendingArenaSpawn);
        assert_eq!(machine.tables().bind(p.platform_id).as_deref(), Some(OLD_NAME));
        assert_eq!(machine.tables().archive(p.platform_id), Some(archive()));
    }

    #[test]
    fn synchronous_flavor_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let machine = machine_at(tmp.path());
        let p = player(42);

        machine
            .enter_synchronously(&p, Some("pit"), snapshot_id(42))
            .unwrap();
        assert!(machine.is_in_arena(p.platform_id));
        assert_eq!(
            machine.record(p.platform_id).unwrap().mode,
            TransitionMode::Synchronous
        );
        assert!(
            machine
                .enter_synchronously(&p, None, snapshot_id(42))
                .unwrap_err()
                .is_state_violation()
        );

        let record = machine.leave_synchronously(p.platform_id).unwrap();
        assert_eq!(record.snapshot, snapshot_id(42));
        assert!(!machine.is_in_arena(p.platform_id));
        assert!(machine.tables().zone(p.platform_id).is_none());
        assert!(machine.leave_synchronously(p.platform_id).is_err());
    }

    #[test]
    fn in_arena_iff_record_says_so() {
        let tmp = tempfile::tempdir().unwrap();
        let machine = machine_at(tmp.path());
        let players: Vec<Player> = (1..=4).map(player).collect();
        begin(&machine, &players[0]);
        begin(&machine, &players[1]);
        machine.mark_disconnected(players[1].platform_id).unwrap();
        machine
            .mark_spawned(players[1].platform_id, CharacterId::new())
            .unwrap();
        machine
            .enter_synchronously(&players[2], None, snapshot_id(3))
            .unwrap();

        for p in &players {
            let expected = machine
                .records()
                .iter()
                .any(|(id, r)| *id == p.platform_id && r.state == ProgressState::InArena);
            assert_eq!(machine.is_in_arena(p.platform_id), expected);
        }
        assert!(machine.is_in_arena(players[1].platform_id));
        assert!(machine.is_in_arena(players[2].platform_id));
        assert!(!machine.is_in_arena(players[0].platform_id));
        assert!(!machine.is_in_arena(players[3].platform_id));
    }

    #[test]
    fn outer_scope_defers_the_save() {
        let tmp = tempfile::tempdir().unwrap();
        let machine = machine_at(tmp.path());
        let p = player(8);
        {
            let _outer = machine.tables().guard().acquire();
            begin(&machine, &p);
            assert!(!tmp.path().join("progress/8").exists());
        }
        assert!(machine.tables().flush());
        assert!(tmp.path().join("progress/8/name.json").exists());
    }
}
