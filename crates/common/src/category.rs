//! Names of the captured state categories.
//!
//! These strings are the keys of a snapshot's captured-state map and the file
//! names of the per-category archive documents, so they are part of the
//! on-disk format.

pub const EXPERIENCE: &str = "experience";
pub const WEAPON_STATS: &str = "weapon_stats";
pub const SPELLS: &str = "spells";
pub const QUESTS: &str = "quests";
pub const UNLOCKS: &str = "unlocks";
pub const INVENTORY: &str = "inventory";
pub const EQUIPMENT: &str = "equipment";
pub const BLOOD: &str = "blood";
pub const NAME: &str = "name";
/// Applied last so the player is moved only after everything else is back.
pub const POSITION: &str = "position";

/// All standard categories in apply order.
pub const ALL: [&str; 10] = [
    EXPERIENCE,
    WEAPON_STATS,
    SPELLS,
    QUESTS,
    UNLOCKS,
    INVENTORY,
    EQUIPMENT,
    BLOOD,
    NAME,
    POSITION,
];
