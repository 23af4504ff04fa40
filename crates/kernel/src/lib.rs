//! Kernel: the narrow seams between the transition engine and the host game.
//!
//! The engine never touches game entities directly. Everything it reads or
//! writes on a character goes through the provider traits in [`providers`].
//! [`MemoryWorld`] implements all of them in memory for tests and the CLI.
//!
//! # Invariants
//! - Provider calls never panic; failures come back as [`ProviderError`].
//! - A stale [`arena_common::CharacterId`] is rejected, not silently redirected.

pub mod providers;
pub mod world;

pub use providers::{
    AchievementProvider, BloodProvider, ConnectionProvider, IdentityProvider, InventoryProvider,
    NoopAchievements, PositionProvider, ProgressionProvider, ProviderError, ProviderResult,
    Providers, SaveHook, UnlockProvider,
};
pub use world::{CharacterState, MemoryWorld, WorldEvent};
