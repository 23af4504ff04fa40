//! Arena transitions: durable progress tables, the per-player state machine,
//! and [`ArenaService`] on top of both.
//!
//! # Invariants
//! - A player is in the arena iff their record says `InArena`.
//! - Binds, zone assignments and progress archives only exist beside a
//!   record.
//! - A refused transition leaves every table untouched.
//! - Both transition modes capture and restore the same
//!   [`arena_persist::CapturedState`] format.

mod error;
pub mod machine;
pub mod progress;
pub mod service;
pub mod settings;
pub mod triggers;

pub use error::TransitionError;
pub use machine::{RestoredProgress, TransitionStateMachine};
pub use progress::{ArenaRecord, ProgressState, ProgressTables, TransitionMode};
pub use service::ArenaService;
pub use settings::{ArenaSettings, Loadout, Zone};
pub use triggers::{ProximityTrigger, TriggerOutcome};
