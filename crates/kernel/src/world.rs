use crate::providers::{
    BloodProvider, ConnectionProvider, IdentityProvider, InventoryProvider, PositionProvider,
    ProgressionProvider, ProviderError, ProviderResult, SaveHook, UnlockProvider,
};
use arena_common::{
    BloodState, BloodTypeId, CharacterId, EquippedItem, ItemId, ItemStack, PlatformId, Player,
    Position, SaveGate, UnlockId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// An event record produced by every mutation to the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorldEvent {
    Connected { player: PlatformId, character: CharacterId },
    Disconnected { player: PlatformId },
    Renamed { player: PlatformId, old: String, new: String },
    Teleported { player: PlatformId, to: Position },
    InventoryCleared { player: PlatformId },
    ItemGiven { player: PlatformId, item: ItemId, amount: u32 },
    AchievementUnlocked { player: PlatformId, id: u32 },
    AchievementLocked { player: PlatformId, id: u32 },
    SaveRequested { player: PlatformId },
}

/// Everything the host knows about one player's character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterState {
    pub character: CharacterId,
    pub connected: bool,
    pub name: String,
    pub position: Position,
    pub blood: BloodState,
    pub experience: f32,
    pub weapon_stats: BTreeMap<String, f32>,
    pub spells: Vec<u32>,
    pub quests: BTreeMap<String, u32>,
    pub unlocks: BTreeSet<UnlockId>,
    pub inventory: Vec<ItemStack>,
    pub equipment: Vec<EquippedItem>,
    pub achievements: BTreeSet<u32>,
}

impl CharacterState {
    fn fresh(name: &str) -> Self {
        Self {
            character: CharacterId::new(),
            connected: true,
            name: name.to_string(),
            position: Position::ZERO,
            blood: BloodState::default(),
            experience: 0.0,
            weapon_stats: BTreeMap::new(),
            spells: Vec::new(),
            quests: BTreeMap::new(),
            unlocks: BTreeSet::new(),
            inventory: Vec::new(),
            equipment: Vec::new(),
            achievements: BTreeSet::new(),
        }
    }

    /// Copy of the state with the per-login fields blanked, for comparing a
    /// character across relogs.
    pub fn progression(&self) -> Self {
        Self {
            character: CharacterId(uuid::Uuid::nil()),
            connected: false,
            ..self.clone()
        }
    }
}

#[derive(Debug, Default)]
struct WorldInner {
    players: BTreeMap<PlatformId, CharacterState>,
    failing: BTreeSet<String>,
    autosaves: u64,
    event_log: Vec<WorldEvent>,
}

/// Deterministic in-memory host game.
///
/// Implements every provider trait. Each mutation runs the host's automatic
/// save unless the attached [`SaveGate`] is suppressing saves, which lets
/// tests observe write amplification.
#[derive(Default)]
pub struct MemoryWorld {
    inner: Mutex<WorldInner>,
    gate: Mutex<Option<Arc<dyn SaveGate>>>,
}

impl MemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the gate consulted before each automatic save.
    pub fn set_save_gate(&self, gate: Arc<dyn SaveGate>) {
        *self.gate.lock().unwrap_or_else(PoisonError::into_inner) = Some(gate);
    }

    /// Log in a player. Known players get a fresh character handle and keep
    /// their state; unknown players start fresh with `name`.
    pub fn connect(&self, platform_id: PlatformId, name: &str) -> Player {
        let mut inner = self.lock();
        let state = inner
            .players
            .entry(platform_id)
            .or_insert_with(|| CharacterState::fresh(name));
        state.character = CharacterId::new();
        state.connected = true;
        let character = state.character;
        inner.event_log.push(WorldEvent::Connected {
            player: platform_id,
            character,
        });
        Player::new(platform_id, character)
    }

    pub fn is_connected(&self, platform_id: PlatformId) -> bool {
        self.lock()
            .players
            .get(&platform_id)
            .is_some_and(|s| s.connected)
    }

    /// Read-only copy of a player's state.
    pub fn state(&self, platform_id: PlatformId) -> Option<CharacterState> {
        self.lock().players.get(&platform_id).cloned()
    }

    /// Online players and their current character handles.
    pub fn online_players(&self) -> Vec<Player> {
        self.lock()
            .players
            .iter()
            .filter(|(_, s)| s.connected)
            .map(|(id, s)| Player::new(*id, s.character))
            .collect()
    }

    /// Mutate a player's state directly, bypassing providers and autosave.
    pub fn edit(&self, platform_id: PlatformId, f: impl FnOnce(&mut CharacterState)) -> bool {
        match self.lock().players.get_mut(&platform_id) {
            Some(state) => {
                f(state);
                true
            }
            None => false,
        }
    }

    /// Make every provider call named `operation` fail until cleared.
    pub fn fail_operation(&self, operation: &str) {
        self.lock().failing.insert(operation.to_string());
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    /// Number of automatic saves that actually ran.
    pub fn autosave_count(&self) -> u64 {
        self.lock().autosaves
    }

    /// Drain and return the event log.
    pub fn drain_events(&self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.lock().event_log)
    }

    /// Copy of the event log.
    pub fn events(&self) -> Vec<WorldEvent> {
        self.lock().event_log.clone()
    }

    fn lock(&self) -> MutexGuard<'_, WorldInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn suppressed(&self) -> bool {
        self.gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|g| g.is_suppressed())
    }

    fn read<T>(
        &self,
        player: &Player,
        operation: &str,
        f: impl FnOnce(&CharacterState) -> T,
    ) -> ProviderResult<T> {
        let inner = self.lock();
        check_failure(&inner, operation)?;
        let state = resolve(&inner.players, player)?;
        Ok(f(state))
    }

    fn write(
        &self,
        player: &Player,
        operation: &str,
        f: impl FnOnce(&mut CharacterState) -> Option<WorldEvent>,
    ) -> ProviderResult<()> {
        let suppressed = self.suppressed();
        let mut inner = self.lock();
        check_failure(&inner, operation)?;
        resolve(&inner.players, player)?;
        let event = inner.players.get_mut(&player.platform_id).and_then(f);
        if let Some(event) = event {
            inner.event_log.push(event);
        }
        if !suppressed {
            inner.autosaves += 1;
        }
        Ok(())
    }
}

fn check_failure(inner: &WorldInner, operation: &str) -> ProviderResult<()> {
    if inner.failing.contains(operation) {
        debug!(operation, "injected provider failure");
        return Err(ProviderError::Failed {
            operation: operation.to_string(),
            reason: "injected failure".into(),
        });
    }
    Ok(())
}

fn resolve<'a>(
    players: &'a BTreeMap<PlatformId, CharacterState>,
    player: &Player,
) -> ProviderResult<&'a CharacterState> {
    let state = players
        .get(&player.platform_id)
        .ok_or(ProviderError::UnknownPlayer(player.platform_id))?;
    if state.character != player.character {
        return Err(ProviderError::StaleCharacter(player.platform_id));
    }
    Ok(state)
}

impl InventoryProvider for MemoryWorld {
    fn items(&self, player: &Player) -> ProviderResult<Vec<ItemStack>> {
        self.read(player, "items", |s| s.inventory.clone())
    }

    fn equipment(&self, player: &Player) -> ProviderResult<Vec<EquippedItem>> {
        self.read(player, "equipment", |s| s.equipment.clone())
    }

    fn clear(&self, player: &Player) -> ProviderResult<()> {
        self.write(player, "clear", |s| {
            s.inventory.clear();
            Some(WorldEvent::InventoryCleared {
                player: player.platform_id,
            })
        })
    }

    fn give(&self, player: &Player, item: ItemId, amount: u32) -> ProviderResult<()> {
        self.write(player, "give", |s| {
            s.inventory.push(ItemStack { item, amount });
            Some(WorldEvent::ItemGiven {
                player: player.platform_id,
                item,
                amount,
            })
        })
    }

    fn unequip_all(&self, player: &Player) -> ProviderResult<()> {
        self.write(player, "unequip_all", |s| {
            s.equipment.clear();
            None
        })
    }

    fn equip(&self, player: &Player, item: &EquippedItem) -> ProviderResult<()> {
        self.write(player, "equip", |s| {
            s.equipment.retain(|e| e.slot != item.slot);
            s.equipment.push(item.clone());
            None
        })
    }
}

impl BloodProvider for MemoryWorld {
    fn blood(&self, player: &Player) -> ProviderResult<BloodState> {
        self.read(player, "blood", |s| s.blood)
    }

    fn set_blood(
        &self,
        player: &Player,
        blood_type: BloodTypeId,
        quality: f32,
    ) -> ProviderResult<()> {
        self.write(player, "set_blood", |s| {
            s.blood = BloodState {
                blood_type,
                quality,
            };
            None
        })
    }
}

impl IdentityProvider for MemoryWorld {
    fn name(&self, player: &Player) -> ProviderResult<String> {
        self.read(player, "name", |s| s.name.clone())
    }

    fn set_name(&self, player: &Player, name: &str) -> ProviderResult<()> {
        self.write(player, "set_name", |s| {
            let old = std::mem::replace(&mut s.name, name.to_string());
            Some(WorldEvent::Renamed {
                player: player.platform_id,
                old,
                new: name.to_string(),
            })
        })
    }
}

impl PositionProvider for MemoryWorld {
    fn position(&self, player: &Player) -> ProviderResult<Position> {
        self.read(player, "position", |s| s.position)
    }

    fn set_position(&self, player: &Player, position: Position) -> ProviderResult<()> {
        self.write(player, "set_position", |s| {
            s.position = position;
            Some(WorldEvent::Teleported {
                player: player.platform_id,
                to: position,
            })
        })
    }
}

impl UnlockProvider for MemoryWorld {
    fn unlocked(&self, player: &Player) -> ProviderResult<Vec<UnlockId>> {
        self.read(player, "unlocked", |s| s.unlocks.iter().copied().collect())
    }

    fn bulk_unlock(&self, player: &Player, ids: &[UnlockId]) -> ProviderResult<()> {
        self.write(player, "bulk_unlock", |s| {
            s.unlocks.extend(ids.iter().copied());
            None
        })
    }

    fn bulk_lock(&self, player: &Player, ids: &[UnlockId]) -> ProviderResult<()> {
        self.write(player, "bulk_lock", |s| {
            for id in ids {
                s.unlocks.remove(id);
            }
            None
        })
    }
}

impl ProgressionProvider for MemoryWorld {
    fn experience(&self, player: &Player) -> ProviderResult<f32> {
        self.read(player, "experience", |s| s.experience)
    }

    fn set_experience(&self, player: &Player, experience: f32) -> ProviderResult<()> {
        self.write(player, "set_experience", |s| {
            s.experience = experience;
            None
        })
    }

    fn weapon_stats(&self, player: &Player) -> ProviderResult<BTreeMap<String, f32>> {
        self.read(player, "weapon_stats", |s| s.weapon_stats.clone())
    }

    fn set_weapon_stats(
        &self,
        player: &Player,
        stats: &BTreeMap<String, f32>,
    ) -> ProviderResult<()> {
        self.write(player, "set_weapon_stats", |s| {
            s.weapon_stats = stats.clone();
            None
        })
    }

    fn spells(&self, player: &Player) -> ProviderResult<Vec<u32>> {
        self.read(player, "spells", |s| s.spells.clone())
    }

    fn set_spells(&self, player: &Player, spells: &[u32]) -> ProviderResult<()> {
        self.write(player, "set_spells", |s| {
            s.spells = spells.to_vec();
            None
        })
    }

    fn quests(&self, player: &Player) -> ProviderResult<BTreeMap<String, u32>> {
        self.read(player, "quests", |s| s.quests.clone())
    }

    fn set_quests(&self, player: &Player, quests: &BTreeMap<String, u32>) -> ProviderResult<()> {
        self.write(player, "set_quests", |s| {
            s.quests = quests.clone();
            None
        })
    }
}

impl crate::providers::AchievementProvider for MemoryWorld {
    fn unlock_achievement(&self, player: &Player, id: u32) -> ProviderResult<()> {
        self.write(player, "unlock_achievement", |s| {
            s.achievements.insert(id);
            Some(WorldEvent::AchievementUnlocked {
                player: player.platform_id,
                id,
            })
        })
    }

    fn lock_achievement(&self, player: &Player, id: u32) -> ProviderResult<()> {
        self.write(player, "lock_achievement", |s| {
            s.achievements.remove(&id);
            Some(WorldEvent::AchievementLocked {
                player: player.platform_id,
                id,
            })
        })
    }
}

impl ConnectionProvider for MemoryWorld {
    fn disconnect(&self, platform_id: PlatformId) -> ProviderResult<()> {
        let mut inner = self.lock();
        check_failure(&inner, "disconnect")?;
        let state = inner
            .players
            .get_mut(&platform_id)
            .ok_or(ProviderError::UnknownPlayer(platform_id))?;
        state.connected = false;
        inner.event_log.push(WorldEvent::Disconnected {
            player: platform_id,
        });
        Ok(())
    }
}

impl SaveHook for MemoryWorld {
    fn request_save(&self, player: &Player) {
        let mut inner = self.lock();
        inner.autosaves += 1;
        inner.event_log.push(WorldEvent::SaveRequested {
            player: player.platform_id,
        });
    }
}
