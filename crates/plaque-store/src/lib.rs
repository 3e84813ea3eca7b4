//! # plaque-store
//!
//! **Token/Unit Store**: the persistent side of the registry.
//!
//! ## Architecture
//!
//! 1. **MemoryStore**: shared tables (tokens, units, scans) behind one short
//!    critical section, plus one async row lock per token
//! 2. **StoreTx**: staged read-modify-write transaction; commits all or
//!    nothing and reports the state transitions it made as [`StoreEvent`]s
//! 3. **ScanLog**: append-only presentation history
//! 4. **Allocator**: gap-filling sequential ids and random wide-keyspace ids
//!    with collision retry
//! 5. **Sweep**: repairs dangling and duplicate token→unit references
//!
//! ## Locking
//!
//! ```text
//! StoreTx::lock_token ──▶ token row lock (held to commit / drop)
//!                          │
//! StoreTx::commit ───────▶ tables mutex (never held across .await)
//! ```
//!
//! Only token rows are locked. Units are read unlocked; a commit-time check
//! turns a lost race (owner changed, or unit deleted) into a retryable
//! [`PlaqueError::StaleRead`].
//!
//! [`PlaqueError::StaleRead`]: plaque_types::PlaqueError::StaleRead

pub mod allocator;
pub mod scan_log;
pub mod store;
pub mod sweep;
pub mod tx;

#[cfg(any(test, feature = "test-helpers"))]
pub use allocator::ScriptedIdSource;
pub use allocator::{
    EntityKind, IdSource, RandomIdSource, SharedIdSource, allocate_random_with_retry,
    smallest_unused,
};
pub use scan_log::ScanLog;
pub use store::MemoryStore;
pub use tx::{CommitOutcome, StoreEvent, StoreTx};
