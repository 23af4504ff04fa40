//! One entry point for arena transitions, whichever strategy is configured.
//!
//! Both strategies take the same arena-entry snapshot and restore through the
//! same captured-state format; they only differ in whether the spawn and the
//! restore happen inline or after a forced relog.

use crate::error::{TransitionError, host};
use crate::machine::TransitionStateMachine;
use crate::progress::{ArenaRecord, ProgressState, ProgressTables, TransitionMode};
use crate::settings::ArenaSettings;
use arena_common::{PlatformId, Player, Position, SnapshotId};
use arena_kernel::Providers;
use arena_persist::{RestoreReport, SnapshotError, SnapshotStore};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const ENTRY_DESCRIPTION: &str = "arena entry";

pub struct ArenaService {
    settings: ArenaSettings,
    providers: Providers,
    snapshots: Arc<SnapshotStore>,
    machine: TransitionStateMachine,
}

impl ArenaService {
    pub fn new(
        settings: ArenaSettings,
        providers: Providers,
        snapshots: Arc<SnapshotStore>,
        tables: Arc<ProgressTables>,
    ) -> Self {
        Self {
            settings,
            providers,
            snapshots,
            machine: TransitionStateMachine::new(tables),
        }
    }

    pub fn settings(&self) -> &ArenaSettings {
        &self.settings
    }

    pub fn mode(&self) -> TransitionMode {
        self.settings.mode
    }

    pub fn providers(&self) -> &Providers {
        &self.providers
    }

    pub fn snapshots(&self) -> &Arc<SnapshotStore> {
        &self.snapshots
    }

    pub fn machine(&self) -> &TransitionStateMachine {
        &self.machine
    }

    pub fn is_in_arena(&self, platform_id: PlatformId) -> bool {
        self.machine.is_in_arena(platform_id)
    }

    pub fn state(&self, platform_id: PlatformId) -> ProgressState {
        self.machine.state(platform_id)
    }

    pub fn zone_at(&self, position: Position) -> Option<&str> {
        self.settings.zone_at(position)
    }

    /// Snapshot the player and move them into the arena.
    ///
    /// Synchronous mode spawns them immediately. Reconnect mode archives
    /// their progress, renames them and kicks them; the spawn happens in
    /// [`ArenaService::on_reconnected`].
    pub fn enter_arena(&self, player: &Player, zone: Option<&str>) -> Result<(), TransitionError> {
        let platform_id = player.platform_id;
        let current = self.machine.state(platform_id);
        if current != ProgressState::NoState {
            warn!(player = %platform_id, state = %current, "enter refused");
            return Err(TransitionError::StateViolation {
                player: platform_id,
                expected: ProgressState::NoState,
                actual: current,
            });
        }
        if let Some(zone) = zone.filter(|z| !self.settings.zones.contains_key(*z)) {
            warn!(player = %platform_id, zone, "enter refused: unknown zone");
            return Err(TransitionError::UnknownZone(zone.to_string()));
        }

        let snapshot = self
            .snapshots
            .create_snapshot(player, Some(ENTRY_DESCRIPTION), true)?;
        let entered = match self.settings.mode {
            TransitionMode::Synchronous => self
                .machine
                .enter_synchronously(player, zone, snapshot.clone())
                .and_then(|()| self.apply_spawn(player, zone)),
            TransitionMode::Reconnect => self.begin_reconnect_entry(player, zone, &snapshot),
        };
        if let Err(e) = &entered {
            // A refused step means another entry won the race; this snapshot is ours alone.
            if e.is_state_violation() || self.machine.state(platform_id) == ProgressState::NoState {
                self.snapshots.delete_snapshot(platform_id, &snapshot);
            }
        }
        entered
    }

    /// Take the player out of the arena.
    ///
    /// Synchronous records are restored inline. Reconnect records move to
    /// `PendingRestoreKick` and the player is kicked; the returned report is
    /// empty and the real one comes from [`ArenaService::on_reconnected`].
    pub fn leave_arena(&self, player: &Player) -> Result<RestoreReport, TransitionError> {
        let platform_id = player.platform_id;
        let record = match self.machine.record(platform_id) {
            Some(record) if record.state == ProgressState::InArena => record,
            other => {
                let actual = other.map_or(ProgressState::NoState, |r| r.state);
                warn!(player = %platform_id, state = %actual, "leave refused");
                return Err(TransitionError::StateViolation {
                    player: platform_id,
                    expected: ProgressState::InArena,
                    actual,
                });
            }
        };

        match record.mode {
            TransitionMode::Synchronous => self.leave_synchronously(player, &record),
            TransitionMode::Reconnect => {
                if !self.machine.begin_restore_process(platform_id) {
                    return Err(TransitionError::StateViolation {
                        player: platform_id,
                        expected: ProgressState::InArena,
                        actual: self.machine.state(platform_id),
                    });
                }
                self.kick(platform_id);
                Ok(RestoreReport::default())
            }
        }
    }

    /// Host connection event. Returns whether a transition advanced.
    pub fn on_disconnected(&self, platform_id: PlatformId) -> bool {
        match self.machine.state(platform_id) {
            ProgressState::PendingArenaKick => self.machine.mark_disconnected(platform_id).is_ok(),
            state => {
                debug!(player = %platform_id, %state, "disconnect needs no transition");
                false
            }
        }
    }

    /// Host connection event for a freshly logged-in character. Returns the
    /// restore report when this reconnect completed an exit.
    pub fn on_reconnected(&self, player: &Player) -> Result<Option<RestoreReport>, TransitionError> {
        let platform_id = player.platform_id;
        match self.machine.state(platform_id) {
            ProgressState::PendingArenaKick => {
                debug!(player = %platform_id, "reconnect arrived before the disconnect event");
                self.machine.mark_disconnected(platform_id)?;
                self.spawn_after_reconnect(player)?;
                Ok(None)
            }
            ProgressState::PendingArenaSpawn => {
                self.spawn_after_reconnect(player)?;
                Ok(None)
            }
            ProgressState::PendingRestoreKick => self.finish_reconnect_exit(player).map(Some),
            ProgressState::NoState | ProgressState::InArena => Ok(None),
        }
    }

    fn begin_reconnect_entry(
        &self,
        player: &Player,
        zone: Option<&str>,
        snapshot: &SnapshotId,
    ) -> Result<(), TransitionError> {
        let platform_id = player.platform_id;
        let identity = self
            .providers
            .identity
            .name(player)
            .map_err(host(platform_id, "read display name"))?;
        let archive = match self.snapshots.snapshot(platform_id, snapshot) {
            Some(snapshot) => snapshot.state,
            None => self.snapshots.capture_state(player)?,
        };
        self.machine
            .archive_and_begin_reset(player, &identity, zone, snapshot.clone(), archive)?;

        let arena_name = format!("{}{}", self.settings.name_prefix, identity);
        if let Err(e) = self.providers.identity.set_name(player, &arena_name) {
            warn!(player = %platform_id, error = %e, "arena rename failed");
        }
        self.kick(platform_id);
        Ok(())
    }

    fn spawn_after_reconnect(&self, player: &Player) -> Result<(), TransitionError> {
        let platform_id = player.platform_id;
        let zone = self.machine.tables().zone(platform_id);
        self.apply_spawn(player, zone.as_deref())?;
        self.machine.mark_spawned(platform_id, player.character)?;
        info!(player = %platform_id, zone = zone.as_deref(), "arena spawn applied after reconnect");
        Ok(())
    }

    fn leave_synchronously(
        &self,
        player: &Player,
        record: &ArenaRecord,
    ) -> Result<RestoreReport, TransitionError> {
        let platform_id = player.platform_id;
        self.lock_arena_achievements(player);
        let report = match self.snapshots.restore_snapshot(player, &record.snapshot) {
            Ok(report) => report,
            Err(SnapshotError::NotFound { .. }) => {
                error!(
                    player = %platform_id,
                    snapshot = %record.snapshot,
                    "arena snapshot is gone, clearing the record as already restored"
                );
                RestoreReport::default()
            }
            Err(e) => return Err(e.into()),
        };
        self.machine.leave_synchronously(platform_id)?;
        self.snapshots.delete_snapshot(platform_id, &record.snapshot);
        Ok(report)
    }

    fn finish_reconnect_exit(&self, player: &Player) -> Result<RestoreReport, TransitionError> {
        let platform_id = player.platform_id;
        let restored = self.machine.archived_progress(platform_id)?;
        self.lock_arena_achievements(player);

        // Apply while the record is still PendingRestoreKick; a crash here
        // re-runs the whole exit on the next reconnect.
        if let Some(identity) = &restored.identity {
            let _scope = self.snapshots.guard().acquire();
            if let Err(e) = self.providers.identity.set_name(player, identity) {
                warn!(player = %platform_id, error = %e, "re-binding archived name failed");
            }
        }
        let applied = if restored.archive.is_empty() {
            self.snapshots.restore_snapshot(player, &restored.snapshot)
        } else {
            Ok(self.snapshots.apply_state(player, &restored.archive))
        };
        self.machine.restore_player_progress(platform_id)?;
        let report = applied?;
        self.snapshots.delete_snapshot(platform_id, &restored.snapshot);
        info!(
            player = %platform_id,
            applied = report.applied.len(),
            failed = report.failed.len(),
            "arena exit completed after reconnect"
        );
        Ok(report)
    }

    /// Clear the bag, hand out the loadout, grant unlocks and achievements,
    /// teleport to the zone. One suppression scope, one save.
    fn apply_spawn(&self, player: &Player, zone: Option<&str>) -> Result<(), TransitionError> {
        let platform_id = player.platform_id;
        let loadout = &self.settings.loadout;
        {
            let _scope = self.snapshots.guard().acquire();
            let inventory = &self.providers.inventory;
            inventory
                .clear(player)
                .map_err(host(platform_id, "clear inventory"))?;
            for stack in &loadout.items {
                inventory
                    .give(player, stack.item, stack.amount)
                    .map_err(host(platform_id, "give loadout item"))?;
            }
            if let Some(blood) = loadout.blood {
                self.providers
                    .blood
                    .set_blood(player, blood.blood_type, blood.quality)
                    .map_err(host(platform_id, "set blood"))?;
            }
            if !loadout.unlocks.is_empty() {
                self.providers
                    .unlocks
                    .bulk_unlock(player, &loadout.unlocks)
                    .map_err(host(platform_id, "unlock arena content"))?;
            }
            for id in &loadout.achievements {
                self.providers
                    .achievements
                    .unlock_achievement(player, *id)
                    .map_err(host(platform_id, "unlock achievement"))?;
            }
            if let Some(zone) = zone.and_then(|name| self.settings.zones.get(name)) {
                self.providers
                    .position
                    .set_position(player, zone.spawn)
                    .map_err(host(platform_id, "teleport to arena"))?;
            }
        }
        self.providers.save_hook.request_save(player);
        debug!(player = %platform_id, zone, items = loadout.items.len(), "arena spawn applied");
        Ok(())
    }

    fn lock_arena_achievements(&self, player: &Player) {
        for id in &self.settings.loadout.achievements {
            if let Err(e) = self.providers.achievements.lock_achievement(player, *id) {
                warn!(player = %player.platform_id, achievement = id, error = %e, "achievement lock failed");
            }
        }
    }

    fn kick(&self, platform_id: PlatformId) {
        if let Err(e) = self.providers.connection.disconnect(platform_id) {
            error!(
                player = %platform_id,
                error = %e,
                "disconnect failed, transition waits for the next natural logout"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{Loadout, Zone};
    use arena_common::{
        BloodState, BloodTypeId, EquippedItem, ItemId, ItemStack, UnlockId, category,
    };
    use arena_kernel::{IdentityProvider, MemoryWorld, ProviderResult, WorldEvent};
    use arena_persist::{CapturedState, CategoryRegistry, DurableRecordStore, PersistenceGuard};
    use glam::Vec3;
    use std::sync::OnceLock;

    const PLAYER: PlatformId = PlatformId(1001);

    struct Harness {
        tmp: tempfile::TempDir,
        world: Arc<MemoryWorld>,
        service: ArenaService,
    }

    fn settings(mode: TransitionMode) -> ArenaSettings {
        let mut settings = ArenaSettings {
            mode,
            loadout: Loadout {
                items: vec![ItemStack {
                    item: ItemId(500),
                    amount: 1,
                }],
                blood: Some(BloodState {
                    blood_type: BloodTypeId(9),
                    quality: 100.0,
                }),
                unlocks: vec![UnlockId(70), UnlockId(71)],
                achievements: vec![3],
            },
            ..ArenaSettings::default()
        };
        settings.zones.insert(
            "pit".into(),
            Zone {
                spawn: Vec3::new(300.0, 0.0, 300.0),
                radius: 20.0,
            },
        );
        settings
    }

    fn service_at(
        root: &std::path::Path,
        world: &Arc<MemoryWorld>,
        mode: TransitionMode,
    ) -> ArenaService {
        let guard = Arc::new(PersistenceGuard::new());
        world.set_save_gate(guard.clone());
        let providers = Providers::uniform(world.clone()).with_achievements(world.clone());
        let records = DurableRecordStore::open(root);
        let snapshots = Arc::new(SnapshotStore::new(
            records.clone(),
            guard.clone(),
            CategoryRegistry::standard(&providers),
            providers.save_hook.clone(),
        ));
        let tables = Arc::new(ProgressTables::new(records, guard));
        tables.load();
        ArenaService::new(settings(mode), providers, snapshots, tables)
    }

    fn harness(mode: TransitionMode) -> (Harness, Player) {
        let tmp = tempfile::tempdir().unwrap();
        let world = Arc::new(MemoryWorld::new());
        let player = world.connect(PLAYER, "OldName");
        world.edit(PLAYER, |s| {
            s.experience = 840.0;
            s.spells = vec![11, 12];
            s.unlocks.insert(UnlockId(1));
            s.inventory = vec![ItemStack {
                item: ItemId(10),
                amount: 20,
            }];
            s.equipment = vec![EquippedItem {
                slot: "chest".into(),
                item: ItemId(44),
            }];
            s.blood = BloodState {
                blood_type: BloodTypeId(2),
                quality: 55.0,
            };
            s.position = Vec3::new(-20.0, 5.0, 12.0);
        });
        let service = service_at(tmp.path(), &world, mode);
        (
            Harness {
                tmp,
                world,
                service,
            },
            player,
        )
    }

    #[test]
    fn synchronous_enter_applies_loadout_and_leave_restores() {
        let (h, player) = harness(TransitionMode::Synchronous);
        let before = h.world.state(PLAYER).unwrap().progression();

        h.service.enter_arena(&player, Some("pit")).unwrap();
        assert!(h.service.is_in_arena(PLAYER));
        let arena = h.world.state(PLAYER).unwrap();
        assert_eq!(
            arena.inventory,
            vec![ItemStack {
                item: ItemId(500),
                amount: 1
            }]
        );
        assert_eq!(arena.blood.blood_type, BloodTypeId(9));
        assert!(arena.unlocks.contains(&UnlockId(70)));
        assert!(arena.achievements.contains(&3));
        assert_eq!(arena.position, Vec3::new(300.0, 0.0, 300.0));
        assert_eq!(arena.name, "OldName");

        let report = h.service.leave_arena(&player).unwrap();
        assert!(report.is_complete());
        assert!(!h.service.is_in_arena(PLAYER));
        assert_eq!(h.world.state(PLAYER).unwrap().progression(), before);
        assert!(h.service.snapshots().snapshots(PLAYER).is_empty());
    }

    #[test]
    fn reconnect_cycle_restores_original_identity() {
        let (h, player) = harness(TransitionMode::Reconnect);
        let before = h.world.state(PLAYER).unwrap().progression();

        h.service.enter_arena(&player, Some("pit")).unwrap();
        assert_eq!(h.service.state(PLAYER), ProgressState::PendingArenaKick);
        assert!(!h.world.is_connected(PLAYER));
        assert_eq!(h.world.state(PLAYER).unwrap().name, "[Arena] OldName");
        assert_eq!(
            h.service.machine().tables().bind(PLAYER).as_deref(),
            Some("OldName")
        );

        assert!(h.service.on_disconnected(PLAYER));
        let relogged = h.world.connect(PLAYER, "ignored");
        assert_eq!(h.service.on_reconnected(&relogged).unwrap(), None);
        assert!(h.service.is_in_arena(PLAYER));
        assert_eq!(
            h.world.state(PLAYER).unwrap().position,
            Vec3::new(300.0, 0.0, 300.0)
        );

        assert!(h.service.leave_arena(&relogged).unwrap().applied.is_empty());
        assert_eq!(h.service.state(PLAYER), ProgressState::PendingRestoreKick);
        assert!(!h.world.is_connected(PLAYER));
        assert!(!h.service.on_disconnected(PLAYER));

        let back = h.world.connect(PLAYER, "ignored");
        let report = h.service.on_reconnected(&back).unwrap().unwrap();
        assert!(report.is_complete());
        assert_eq!(h.service.state(PLAYER), ProgressState::NoState);
        assert_eq!(h.world.state(PLAYER).unwrap().progression(), before);
        assert!(h.service.machine().tables().bind(PLAYER).is_none());
        assert!(h.service.snapshots().snapshots(PLAYER).is_empty());
    }

    #[test]
    fn reconnect_before_disconnect_event_still_spawns() {
        let (h, player) = harness(TransitionMode::Reconnect);
        h.service.enter_arena(&player, None).unwrap();
        let relogged = h.world.connect(PLAYER, "ignored");
        h.service.on_reconnected(&relogged).unwrap();
        assert!(h.service.is_in_arena(PLAYER));
    }

    #[test]
    fn both_strategies_archive_the_same_format() {
        let (sync, sync_player) = harness(TransitionMode::Synchronous);
        let (reconnect, reconnect_player) = harness(TransitionMode::Reconnect);
        sync.service.enter_arena(&sync_player, None).unwrap();
        reconnect.service.enter_arena(&reconnect_player, None).unwrap();

        let sync_state = sync.service.snapshots().latest_snapshot(PLAYER).unwrap().state;
        let reconnect_snapshot = reconnect
            .service
            .snapshots()
            .latest_snapshot(PLAYER)
            .unwrap();
        let archive = reconnect.service.machine().tables().archive(PLAYER).unwrap();

        assert_eq!(archive, reconnect_snapshot.state);
        assert_eq!(
            archive.categories().collect::<Vec<_>>(),
            sync_state.categories().collect::<Vec<_>>()
        );
        assert_eq!(archive, sync_state);
    }

    #[test]
    fn entering_twice_is_refused() {
        let (h, player) = harness(TransitionMode::Synchronous);
        h.service.enter_arena(&player, None).unwrap();
        let err = h.service.enter_arena(&player, None).unwrap_err();
        assert!(err.is_state_violation());
        assert_eq!(h.service.snapshots().snapshots(PLAYER).len(), 1);
    }

    #[test]
    fn leaving_outside_arena_is_refused() {
        let (h, player) = harness(TransitionMode::Synchronous);
        let err = h.service.leave_arena(&player).unwrap_err();
        assert!(matches!(
            err,
            TransitionError::StateViolation {
                actual: ProgressState::NoState,
                ..
            }
        ));
    }

    #[test]
    fn unknown_zone_takes_no_snapshot() {
        let (h, player) = harness(TransitionMode::Synchronous);
        let err = h.service.enter_arena(&player, Some("moon")).unwrap_err();
        assert!(matches!(err, TransitionError::UnknownZone(ref z) if z == "moon"));
        assert!(h.service.snapshots().snapshots(PLAYER).is_empty());
        assert!(!h.service.is_in_arena(PLAYER));
    }

    #[test]
    fn capture_failure_aborts_entry() {
        let (h, player) = harness(TransitionMode::Reconnect);
        h.world.fail_operation("weapon_stats");
        let err = h.service.enter_arena(&player, Some("pit")).unwrap_err();
        assert!(matches!(err, TransitionError::Snapshot(_)));
        assert_eq!(h.service.state(PLAYER), ProgressState::NoState);
        assert!(h.world.is_connected(PLAYER));
        assert_eq!(h.world.state(PLAYER).unwrap().name, "OldName");
    }

    #[test]
    fn spawn_is_one_host_save() {
        let (h, player) = harness(TransitionMode::Synchronous);
        let before = h.world.autosave_count();
        h.service.enter_arena(&player, Some("pit")).unwrap();
        assert_eq!(h.world.autosave_count(), before + 1);
        let saves: usize = h
            .world
            .events()
            .iter()
            .filter(|e| matches!(e, WorldEvent::SaveRequested { .. }))
            .count();
        assert_eq!(saves, 1);
    }

    #[test]
    fn synchronous_exit_resumes_after_crash_before_clearing() {
        let (h, player) = harness(TransitionMode::Synchronous);
        let before = h.world.state(PLAYER).unwrap().progression();
        h.service.enter_arena(&player, Some("pit")).unwrap();
        let snapshot = h.service.machine().record(PLAYER).unwrap().snapshot;
        h.service.snapshots().restore_snapshot(&player, &snapshot).unwrap();

        let restarted = service_at(h.tmp.path(), &h.world, TransitionMode::Synchronous);
        assert!(restarted.is_in_arena(PLAYER));
        assert!(restarted.leave_arena(&player).unwrap().is_complete());
        assert_eq!(restarted.state(PLAYER), ProgressState::NoState);
        assert_eq!(h.world.state(PLAYER).unwrap().progression(), before);
        assert!(restarted.snapshots().snapshots(PLAYER).is_empty());
    }

    #[test]
    fn synchronous_exit_crash_after_clearing_leaves_only_a_stale_snapshot() {
        let (h, player) = harness(TransitionMode::Synchronous);
        h.service.enter_arena(&player, None).unwrap();
        let snapshot = h.service.machine().record(PLAYER).unwrap().snapshot;
        h.service.snapshots().restore_snapshot(&player, &snapshot).unwrap();
        h.service.machine().leave_synchronously(PLAYER).unwrap();

        let restarted = service_at(h.tmp.path(), &h.world, TransitionMode::Synchronous);
        assert_eq!(restarted.state(PLAYER), ProgressState::NoState);
        assert_eq!(restarted.snapshots().snapshots(PLAYER).len(), 1);
        restarted.enter_arena(&player, None).unwrap();
        assert!(restarted.is_in_arena(PLAYER));
    }

    #[test]
    fn synchronous_exit_with_deleted_snapshot_clears_the_record() {
        let (h, player) = harness(TransitionMode::Synchronous);
        let before = h.world.state(PLAYER).unwrap().progression();
        h.service.enter_arena(&player, None).unwrap();
        let snapshot = h.service.machine().record(PLAYER).unwrap().snapshot;
        h.service.snapshots().restore_snapshot(&player, &snapshot).unwrap();
        assert!(h.service.snapshots().delete_snapshot(PLAYER, &snapshot));

        let restarted = service_at(h.tmp.path(), &h.world, TransitionMode::Synchronous);
        assert!(restarted.is_in_arena(PLAYER));
        let report = restarted.leave_arena(&player).unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(restarted.state(PLAYER), ProgressState::NoState);
        assert_eq!(h.world.state(PLAYER).unwrap().progression(), before);
        restarted.enter_arena(&player, None).unwrap();
    }

    #[test]
    fn reconnect_exit_reapplies_after_crash_mid_restore() {
        let (h, player) = harness(TransitionMode::Reconnect);
        let before = h.world.state(PLAYER).unwrap().progression();
        h.service.enter_arena(&player, Some("pit")).unwrap();
        h.service.on_disconnected(PLAYER);
        let relogged = h.world.connect(PLAYER, "ignored");
        h.service.on_reconnected(&relogged).unwrap();
        h.service.leave_arena(&relogged).unwrap();

        // Exit interrupted after the name and one category went back.
        let back = h.world.connect(PLAYER, "ignored");
        let progress = h.service.machine().archived_progress(PLAYER).unwrap();
        h.world.edit(PLAYER, |s| s.name = "OldName".into());
        let mut partial = CapturedState::new();
        let experience = progress.archive.get(category::EXPERIENCE).unwrap().clone();
        partial.insert(category::EXPERIENCE, experience);
        h.service.snapshots().apply_state(&back, &partial);

        let restarted = service_at(h.tmp.path(), &h.world, TransitionMode::Reconnect);
        assert_eq!(restarted.state(PLAYER), ProgressState::PendingRestoreKick);
        let again = h.world.connect(PLAYER, "ignored");
        let report = restarted.on_reconnected(&again).unwrap().unwrap();
        assert!(report.is_complete());
        assert_eq!(restarted.state(PLAYER), ProgressState::NoState);
        assert_eq!(h.world.state(PLAYER).unwrap().progression(), before);
        assert!(restarted.machine().tables().archive(PLAYER).is_none());
        assert!(restarted.snapshots().snapshots(PLAYER).is_empty());
    }

    /// Identity seam that lets a competing entry land while the first one is
    /// still between its snapshot and its state step.
    struct RacingIdentity {
        world: Arc<MemoryWorld>,
        rival: OnceLock<TransitionStateMachine>,
    }

    impl IdentityProvider for RacingIdentity {
        fn name(&self, player: &Player) -> ProviderResult<String> {
            if let Some(machine) = self.rival.get() {
                let _ = machine.enter_synchronously(player, None, SnapshotId::from("rival"));
            }
            self.world.name(player)
        }

        fn set_name(&self, player: &Player, name: &str) -> ProviderResult<()> {
            self.world.set_name(player, name)
        }
    }

    #[test]
    fn losing_a_concurrent_entry_discards_its_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let world = Arc::new(MemoryWorld::new());
        let player = world.connect(PLAYER, "OldName");
        let identity = Arc::new(RacingIdentity {
            world: world.clone(),
            rival: OnceLock::new(),
        });
        let mut providers = Providers::uniform(world.clone());
        providers.identity = identity.clone();
        let guard = Arc::new(PersistenceGuard::new());
        let records = DurableRecordStore::open(tmp.path());
        let snapshots = Arc::new(SnapshotStore::new(
            records.clone(),
            guard.clone(),
            CategoryRegistry::standard(&providers),
            providers.save_hook.clone(),
        ));
        let tables = Arc::new(ProgressTables::new(records, guard));
        let service = ArenaService::new(
            settings(TransitionMode::Reconnect),
            providers,
            snapshots,
            tables.clone(),
        );
        assert!(identity.rival.set(TransitionStateMachine::new(tables)).is_ok());

        let err = service.enter_arena(&player, None).unwrap_err();
        assert!(err.is_state_violation());
        assert_eq!(service.state(PLAYER), ProgressState::InArena);
        assert!(service.snapshots().snapshots(PLAYER).is_empty());
        assert!(world.is_connected(PLAYER));
    }

    #[test]
    fn reconnect_exit_survives_restart() {
        let (h, player) = harness(TransitionMode::Reconnect);
        let before = h.world.state(PLAYER).unwrap().progression();
        h.service.enter_arena(&player, None).unwrap();
        h.service.on_disconnected(PLAYER);
        let relogged = h.world.connect(PLAYER, "ignored");
        h.service.on_reconnected(&relogged).unwrap();
        h.service.leave_arena(&relogged).unwrap();

        let restarted = service_at(h.tmp.path(), &h.world, TransitionMode::Reconnect);
        assert_eq!(restarted.state(PLAYER), ProgressState::PendingRestoreKick);
        let back = h.world.connect(PLAYER, "ignored");
        restarted.on_reconnected(&back).unwrap();
        assert_eq!(h.world.state(PLAYER).unwrap().progression(), before);
        assert!(restarted.snapshots().snapshots(PLAYER).is_empty());
    }

    #[test]
    fn archive_holds_every_category() {
        let (h, player) = harness(TransitionMode::Reconnect);
        h.service.enter_arena(&player, None).unwrap();
        let archive = h.service.machine().tables().archive(PLAYER).unwrap();
        for name in category::ALL {
            assert!(archive.contains(name), "missing {name}");
        }
    }
}
