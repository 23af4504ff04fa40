//! Persistence: durable keyed JSON records, persistence suppression, player
//! snapshots.
//!
//! # Invariants
//! - A record is written only after its previous version was copied to `.bak`.
//! - A good copy is lost only if primary and backup are corrupt at once.
//! - While a [`PersistenceGuard`] is held, automatic saves no-op. Snapshot
//!   writes are queued and only land on [`SnapshotStore::flush_pending`].
//! - I/O and serde failures are logged and converted to defaults or `false`;
//!   they never escape as panics.

mod atomic_io;
pub mod category;
pub mod guard;
pub mod record_store;
pub mod snapshot;
pub mod store;

pub use category::{CategoryError, CategoryRegistry, StateCategory};
pub use guard::{PersistenceGuard, SuppressionScope};
pub use record_store::{DurableRecordStore, LoadSource, Loaded, StoreError};
pub use snapshot::{CapturedState, PlayerSnapshot};
pub use store::{CategoryFailure, RestoreReport, SNAPSHOT_DIR, SnapshotError, SnapshotStore};
