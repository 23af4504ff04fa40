use arena_common::{
    BloodState, BloodTypeId, EquippedItem, ItemId, ItemStack, PlatformId, Player, Position,
    UnlockId,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Errors reported by host-game collaborators.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("player {0} is unknown to the host")]
    UnknownPlayer(PlatformId),
    #[error("character handle for player {0} is stale")]
    StaleCharacter(PlatformId),
    #[error("{operation} failed: {reason}")]
    Failed { operation: String, reason: String },
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Inventory and equipment read/write.
pub trait InventoryProvider: Send + Sync {
    fn items(&self, player: &Player) -> ProviderResult<Vec<ItemStack>>;
    fn equipment(&self, player: &Player) -> ProviderResult<Vec<EquippedItem>>;
    /// Empty the inventory bag. Equipment is untouched.
    fn clear(&self, player: &Player) -> ProviderResult<()>;
    fn give(&self, player: &Player, item: ItemId, amount: u32) -> ProviderResult<()>;
    fn unequip_all(&self, player: &Player) -> ProviderResult<()>;
    fn equip(&self, player: &Player, item: &EquippedItem) -> ProviderResult<()>;
}

pub trait BloodProvider: Send + Sync {
    fn blood(&self, player: &Player) -> ProviderResult<BloodState>;
    fn set_blood(&self, player: &Player, blood_type: BloodTypeId, quality: f32)
    -> ProviderResult<()>;
}

/// Display name binding.
pub trait IdentityProvider: Send + Sync {
    fn name(&self, player: &Player) -> ProviderResult<String>;
    fn set_name(&self, player: &Player, name: &str) -> ProviderResult<()>;
}

pub trait PositionProvider: Send + Sync {
    fn position(&self, player: &Player) -> ProviderResult<Position>;
    fn set_position(&self, player: &Player, position: Position) -> ProviderResult<()>;
}

/// Unlock flags (bosses, recipes, map areas...).
pub trait UnlockProvider: Send + Sync {
    fn unlocked(&self, player: &Player) -> ProviderResult<Vec<UnlockId>>;
    fn bulk_unlock(&self, player: &Player, ids: &[UnlockId]) -> ProviderResult<()>;
    fn bulk_lock(&self, player: &Player, ids: &[UnlockId]) -> ProviderResult<()>;
}

/// Experience, weapon mastery, learned spells and quest progress.
pub trait ProgressionProvider: Send + Sync {
    fn experience(&self, player: &Player) -> ProviderResult<f32>;
    fn set_experience(&self, player: &Player, experience: f32) -> ProviderResult<()>;
    fn weapon_stats(&self, player: &Player) -> ProviderResult<BTreeMap<String, f32>>;
    fn set_weapon_stats(
        &self,
        player: &Player,
        stats: &BTreeMap<String, f32>,
    ) -> ProviderResult<()>;
    fn spells(&self, player: &Player) -> ProviderResult<Vec<u32>>;
    fn set_spells(&self, player: &Player, spells: &[u32]) -> ProviderResult<()>;
    fn quests(&self, player: &Player) -> ProviderResult<BTreeMap<String, u32>>;
    fn set_quests(&self, player: &Player, quests: &BTreeMap<String, u32>) -> ProviderResult<()>;
}

/// Platform achievements. Hosts without an achievement API use
/// [`NoopAchievements`].
pub trait AchievementProvider: Send + Sync {
    fn unlock_achievement(&self, player: &Player, id: u32) -> ProviderResult<()>;
    fn lock_achievement(&self, player: &Player, id: u32) -> ProviderResult<()>;
}

/// Connection control used by transitions that need a relog.
pub trait ConnectionProvider: Send + Sync {
    fn disconnect(&self, platform_id: PlatformId) -> ProviderResult<()>;
}

/// The host's own player-save path.
pub trait SaveHook: Send + Sync {
    fn request_save(&self, player: &Player);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAchievements;

impl AchievementProvider for NoopAchievements {
    fn unlock_achievement(&self, _player: &Player, _id: u32) -> ProviderResult<()> {
        Ok(())
    }

    fn lock_achievement(&self, _player: &Player, _id: u32) -> ProviderResult<()> {
        Ok(())
    }
}

/// Bundle of every collaborator the engine consumes.
#[derive(Clone)]
pub struct Providers {
    pub inventory: Arc<dyn InventoryProvider>,
    pub blood: Arc<dyn BloodProvider>,
    pub identity: Arc<dyn IdentityProvider>,
    pub position: Arc<dyn PositionProvider>,
    pub unlocks: Arc<dyn UnlockProvider>,
    pub progression: Arc<dyn ProgressionProvider>,
    pub achievements: Arc<dyn AchievementProvider>,
    pub connection: Arc<dyn ConnectionProvider>,
    pub save_hook: Arc<dyn SaveHook>,
}

impl Providers {
    /// Use one host object for every seam, with no-op achievements.
    pub fn uniform<W>(host: Arc<W>) -> Self
    where
        W: InventoryProvider
            + BloodProvider
            + IdentityProvider
            + PositionProvider
            + UnlockProvider
            + ProgressionProvider
            + ConnectionProvider
            + SaveHook
            + 'static,
    {
        Self {
            inventory: host.clone(),
            blood: host.clone(),
            identity: host.clone(),
            position: host.clone(),
            unlocks: host.clone(),
            progression: host.clone(),
            achievements: Arc::new(NoopAchievements),
            connection: host.clone(),
            save_hook: host,
        }
    }

    /// Replace the achievement seam.
    pub fn with_achievements(mut self, achievements: Arc<dyn AchievementProvider>) -> Self {
        self.achievements = achievements;
        self
    }
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers").finish_non_exhaustive()
    }
}
