//! Plugin shell around the arena engine: configuration, lifecycle phases and
//! the host-facing hooks.
//!
//! Services are built in Initialize and dropped in Unload; nothing is global.

pub mod config;
pub mod lifecycle;
pub mod plugin;

pub use config::{ArenaConfig, ConfigError, StorageConfig, TransitionConfig, TriggerConfig};
pub use lifecycle::{
    HookError, HookResult, LifecycleError, LifecycleHooks, LifecycleManager, Phase, PhaseFlags,
};
pub use plugin::{ArenaPlugin, PluginError};
