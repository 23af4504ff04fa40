//! What the arena hands out and where it lives.

use crate::progress::TransitionMode;
use arena_common::{BloodState, ItemStack, Position, UnlockId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Granted on every arena spawn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Loadout {
    pub items: Vec<ItemStack>,
    pub blood: Option<BloodState>,
    pub unlocks: Vec<UnlockId>,
    /// Unlocked on spawn, locked again on exit.
    pub achievements: Vec<u32>,
}

/// A circular arena area. `spawn` doubles as its center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub spawn: Position,
    pub radius: f32,
}

impl Zone {
    pub fn contains(&self, position: Position) -> bool {
        self.spawn.distance(position) <= self.radius
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArenaSettings {
    pub mode: TransitionMode,
    /// Prepended to the display name while a reconnect-mode player is in
    /// the arena.
    pub name_prefix: String,
    pub loadout: Loadout,
    pub zones: BTreeMap<String, Zone>,
}

impl Default for ArenaSettings {
    fn default() -> Self {
        Self {
            mode: TransitionMode::default(),
            name_prefix: "[Arena] ".into(),
            loadout: Loadout::default(),
            zones: BTreeMap::new(),
        }
    }
}

impl ArenaSettings {
    /// First zone, by name, whose area contains `position`.
    pub fn zone_at(&self, position: Position) -> Option<&str> {
        self.zones
            .iter()
            .find(|(_, zone)| zone.contains(position))
            .map(|(name, _)| name.as_str())
    }
}
