//! Shared ids and value types for the arena transition engine.
//!
//! Every other crate in the workspace speaks in these types; nothing here
//! touches the filesystem or the host game.

pub mod category;
mod types;

pub use types::{
    BloodState, BloodTypeId, CharacterId, EquippedItem, ItemId, ItemStack, PlatformId, Player,
    Position, SaveGate, SnapshotId, UnlockId,
};
