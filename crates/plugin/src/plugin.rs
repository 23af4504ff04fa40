//! The arena plugin: owns every service and exposes the host-facing hooks.

use crate::config::ArenaConfig;
use crate::lifecycle::{HookResult, LifecycleError, LifecycleHooks, LifecycleManager};
use arena_common::{PlatformId, Player};
use arena_kernel::Providers;
use arena_persist::{CategoryRegistry, DurableRecordStore, PersistenceGuard, SnapshotStore};
use arena_transition::{ArenaService, ProgressTables, ProximityTrigger, TriggerOutcome};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("services are not initialized")]
    NotInitialized,
    #[error("persistence is still suppressed, {0} could not be flushed")]
    StillSuppressed(&'static str),
}

/// Everything built in Initialize and dropped in Unload.
struct Services {
    guard: Arc<PersistenceGuard>,
    snapshots: Arc<SnapshotStore>,
    tables: Arc<ProgressTables>,
    arena: Arc<ArenaService>,
}

pub struct ArenaPlugin {
    config: ArenaConfig,
    providers: Providers,
    services: Option<Services>,
    trigger: ProximityTrigger,
}

impl ArenaPlugin {
    pub fn new(config: ArenaConfig, providers: Providers) -> Self {
        Self {
            config,
            providers,
            services: None,
            trigger: ProximityTrigger::new(false),
        }
    }

    /// Build a plugin and run it up to Ready.
    pub fn start(
        config: ArenaConfig,
        providers: Providers,
    ) -> Result<LifecycleManager<ArenaPlugin>, LifecycleError> {
        let mut manager = LifecycleManager::new(Self::new(config, providers));
        manager.start()?;
        Ok(manager)
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    /// Shared suppression guard, for the host's own autosave path.
    pub fn guard(&self) -> Option<Arc<PersistenceGuard>> {
        self.services.as_ref().map(|s| s.guard.clone())
    }

    pub fn arena(&self) -> Option<&Arc<ArenaService>> {
        self.services.as_ref().map(|s| &s.arena)
    }

    pub fn snapshots(&self) -> Option<&Arc<SnapshotStore>> {
        self.services.as_ref().map(|s| &s.snapshots)
    }

    pub fn trigger(&self) -> &ProximityTrigger {
        &self.trigger
    }

    /// Host autosave tick: flush what suppression held back, then poll the
    /// proximity trigger over `online`.
    pub fn tick(&self, online: &[Player]) -> TriggerOutcome {
        let Some(services) = &self.services else {
            return TriggerOutcome::default();
        };
        if !services.guard.is_suppressed() {
            services.tables.flush();
            services.snapshots.flush_pending();
        }
        self.trigger.poll(&services.arena, online)
    }

    pub fn on_player_disconnected(&self, platform_id: PlatformId) {
        if let Some(arena) = self.arena() {
            arena.on_disconnected(platform_id);
        }
    }

    pub fn on_player_connected(&self, player: &Player) {
        let Some(arena) = self.arena() else {
            return;
        };
        match arena.on_reconnected(player) {
            Ok(Some(report)) if !report.is_complete() => warn!(
                player = %player.platform_id,
                failed = report.failed.len(),
                skipped = report.skipped.len(),
                "arena exit finished with an incomplete restore"
            ),
            Ok(_) => {}
            Err(e) => warn!(player = %player.platform_id, error = %e, "reconnect transition failed"),
        }
    }

    fn services(&self) -> Result<&Services, PluginError> {
        self.services.as_ref().ok_or(PluginError::NotInitialized)
    }
}

impl LifecycleHooks for ArenaPlugin {
    fn on_initialize(&mut self) -> HookResult {
        let root = &self.config.storage.root;
        let guard = Arc::new(PersistenceGuard::new());
        let records = DurableRecordStore::open(root);
        let snapshots = Arc::new(SnapshotStore::new(
            records.clone(),
            guard.clone(),
            CategoryRegistry::standard(&self.providers),
            self.providers.save_hook.clone(),
        ));
        let tables = Arc::new(ProgressTables::new(records, guard.clone()));
        let arena = Arc::new(ArenaService::new(
            self.config.settings(),
            self.providers.clone(),
            snapshots.clone(),
            tables.clone(),
        ));
        self.services = Some(Services {
            guard,
            snapshots,
            tables,
            arena,
        });
        info!(
            root = %root.display(),
            mode = %self.config.transition.mode,
            zones = self.config.zones.len(),
            "arena services initialized"
        );
        Ok(())
    }

    fn on_load(&mut self) -> HookResult {
        let services = self.services()?;
        let pruned = services.tables.load();
        let in_progress = services.tables.records().len();
        info!(in_progress, pruned, "arena progress loaded");
        Ok(())
    }

    fn on_ready(&mut self) -> HookResult {
        self.services()?;
        self.trigger.set_enabled(self.config.triggers.auto_enter);
        debug!(auto_enter = self.config.triggers.auto_enter, "arena ready");
        Ok(())
    }

    fn on_terminate(&mut self) -> HookResult {
        self.trigger.set_enabled(false);
        let services = self.services()?;
        if services.guard.is_suppressed() {
            return Err(PluginError::StillSuppressed("progress tables").into());
        }
        services.tables.save();
        let flushed = services.snapshots.flush_pending();
        info!(flushed, "arena state flushed");
        Ok(())
    }

    fn on_unload(&mut self) -> HookResult {
        if self.services.take().is_some() {
            info!("arena services dropped");
        }
        Ok(())
    }
}
