//! Proximity trigger: walk into a zone to enter the arena, walk out to leave.

use crate::progress::ProgressState;
use crate::service::ArenaService;
use arena_common::{PlatformId, Player};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerOutcome {
    pub entered: Vec<PlatformId>,
    pub left: Vec<PlatformId>,
}

impl TriggerOutcome {
    pub fn is_empty(&self) -> bool {
        self.entered.is_empty() && self.left.is_empty()
    }
}

/// Polled from the host tick.
///
/// A player who left through the trigger is restored to where they entered,
/// which is inside a zone. They are not re-entered until they have been seen
/// outside every zone.
#[derive(Debug, Default)]
pub struct ProximityTrigger {
    enabled: AtomicBool,
    disarmed: Mutex<BTreeSet<PlatformId>>,
}

impl ProximityTrigger {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            disarmed: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn poll(&self, service: &ArenaService, players: &[Player]) -> TriggerOutcome {
        let mut outcome = TriggerOutcome::default();
        if !self.is_enabled() {
            return outcome;
        }
        let mut disarmed = self.disarmed.lock().unwrap_or_else(PoisonError::into_inner);

        for player in players {
            let platform_id = player.platform_id;
            let position = match service.providers().position.position(player) {
                Ok(position) => position,
                Err(e) => {
                    debug!(player = %platform_id, error = %e, "position unavailable, skipping");
                    continue;
                }
            };
            let zone = service.zone_at(position);
            if zone.is_none() {
                disarmed.remove(&platform_id);
            }

            match (service.state(platform_id), zone) {
                (ProgressState::NoState, Some(zone)) if !disarmed.contains(&platform_id) => {
                    match service.enter_arena(player, Some(zone)) {
                        Ok(()) => outcome.entered.push(platform_id),
                        Err(e) => warn!(player = %platform_id, zone, error = %e, "auto-enter failed"),
                    }
                }
                (ProgressState::InArena, None) => match service.leave_arena(player) {
                    Ok(_) => {
                        disarmed.insert(platform_id);
                        outcome.left.push(platform_id);
                    }
                    Err(e) => warn!(player = %platform_id, error = %e, "auto-leave failed"),
                },
                _ => {}
            }
        }
        outcome
    }
}
