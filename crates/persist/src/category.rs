//! State categories: named slices of a player's mutable state, each with a
//! getter and a setter over the host collaborators.

use arena_common::{BloodState, EquippedItem, ItemStack, Player, Position, UnlockId, category};
use arena_kernel::{ProviderError, ProviderResult, Providers};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum CategoryError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("category value does not decode: {0}")]
    Codec(#[from] serde_json::Error),
}

/// One capturable slice of player state.
pub trait StateCategory: Send + Sync {
    fn name(&self) -> &'static str;
    fn capture(&self, player: &Player) -> Result<Value, CategoryError>;
    /// Overwrite the live state with `value`. Applying the same value twice
    /// leaves the player as after the first application.
    fn apply(&self, player: &Player, value: &Value) -> Result<(), CategoryError>;
}

type Getter<P, T> = fn(&P, &Player) -> ProviderResult<T>;
type Setter<P, T> = fn(&P, &Player, T) -> ProviderResult<()>;

/// A category over a single provider with a typed record.
struct Typed<P: ?Sized, T> {
    name: &'static str,
    source: Arc<P>,
    get: Getter<P, T>,
    set: Setter<P, T>,
    _record: PhantomData<fn() -> T>,
}

impl<P, T> StateCategory for Typed<P, T>
where
    P: ?Sized + Send + Sync,
    T: Serialize + DeserializeOwned,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn capture(&self, player: &Player) -> Result<Value, CategoryError> {
        let record = (self.get)(&*self.source, player)?;
        Ok(serde_json::to_value(record)?)
    }

    fn apply(&self, player: &Player, value: &Value) -> Result<(), CategoryError> {
        let record: T = serde_json::from_value(value.clone())?;
        (self.set)(&*self.source, player, record)?;
        Ok(())
    }
}

fn typed<P, T>(
    name: &'static str,
    source: Arc<P>,
    get: Getter<P, T>,
    set: Setter<P, T>,
) -> Box<dyn StateCategory>
where
    P: ?Sized + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + 'static,
{
    Box::new(Typed {
        name,
        source,
        get,
        set,
        _record: PhantomData,
    })
}

/// Ordered set of categories. Capture and apply both walk registration
/// order.
#[derive(Default)]
pub struct CategoryRegistry {
    categories: Vec<Box<dyn StateCategory>>,
}

impl CategoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `category`, replacing any category with the same name in
    /// place.
    pub fn register(&mut self, category: Box<dyn StateCategory>) {
        match self
            .categories
            .iter()
            .position(|c| c.name() == category.name())
        {
            Some(i) => self.categories[i] = category,
            None => self.categories.push(category),
        }
    }

    pub fn get(&self, name: &str) -> Option<&dyn StateCategory> {
        self.categories
            .iter()
            .find(|c| c.name() == name)
            .map(Box::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn StateCategory> {
        self.categories.iter().map(Box::as_ref)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.categories.iter().map(|c| c.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// All standard categories over `providers`, in [`category::ALL`] order.
    pub fn standard(providers: &Providers) -> Self {
        let mut registry = Self::new();
        let progression = &providers.progression;

        registry.register(typed::<_, f32>(
            category::EXPERIENCE,
            progression.clone(),
            |p, player| p.experience(player),
            |p, player, xp| p.set_experience(player, xp),
        ));
        registry.register(typed::<_, BTreeMap<String, f32>>(
            category::WEAPON_STATS,
            progression.clone(),
            |p, player| p.weapon_stats(player),
            |p, player, stats| p.set_weapon_stats(player, &stats),
        ));
        registry.register(typed::<_, Vec<u32>>(
            category::SPELLS,
            progression.clone(),
            |p, player| p.spells(player),
            |p, player, spells| p.set_spells(player, &spells),
        ));
        registry.register(typed::<_, BTreeMap<String, u32>>(
            category::QUESTS,
            progression.clone(),
            |p, player| p.quests(player),
            |p, player, quests| p.set_quests(player, &quests),
        ));
        registry.register(typed::<_, Vec<UnlockId>>(
            category::UNLOCKS,
            providers.unlocks.clone(),
            |p, player| p.unlocked(player),
            |p, player, wanted| {
                let wanted_set: BTreeSet<UnlockId> = wanted.iter().copied().collect();
                let extra: Vec<UnlockId> = p
                    .unlocked(player)?
                    .into_iter()
                    .filter(|id| !wanted_set.contains(id))
                    .collect();
                if !extra.is_empty() {
                    p.bulk_lock(player, &extra)?;
                }
                p.bulk_unlock(player, &wanted)
            },
        ));
        registry.register(typed::<_, Vec<ItemStack>>(
            category::INVENTORY,
            providers.inventory.clone(),
            |p, player| p.items(player),
            |p, player, items| {
                p.clear(player)?;
                for stack in &items {
                    p.give(player, stack.item, stack.amount)?;
                }
                Ok(())
            },
        ));
        registry.register(typed::<_, Vec<EquippedItem>>(
            category::EQUIPMENT,
            providers.inventory.clone(),
            |p, player| p.equipment(player),
            |p, player, equipped| {
                p.unequip_all(player)?;
                for item in &equipped {
                    p.equip(player, item)?;
                }
                Ok(())
            },
        ));
        registry.register(typed::<_, BloodState>(
            category::BLOOD,
            providers.blood.clone(),
            |p, player| p.blood(player),
            |p, player, blood| p.set_blood(player, blood.blood_type, blood.quality),
        ));
        registry.register(typed::<_, String>(
            category::NAME,
            providers.identity.clone(),
            |p, player| p.name(player),
            |p, player, name| p.set_name(player, &name),
        ));
        registry.register(typed::<_, Position>(
            category::POSITION,
            providers.position.clone(),
            |p, player| p.position(player),
            |p, player, pos| p.set_position(player, pos),
        ));

        registry
    }
}
