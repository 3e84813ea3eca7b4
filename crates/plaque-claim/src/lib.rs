//! # plaque-claim
//!
//! **Claim plane**: turns a presented token into an owned unit and keeps a
//! reserve of claimable units topped up.
//!
//! ## Architecture
//!
//! The [`TokenRegistry`] owns a [`MemoryStore`](plaque_store::MemoryStore)
//! and drives two components over it:
//! 1. [`ClaimCoordinator`] validates the request, then runs up to
//!    `max_claim_attempts` row-locked transactions until one commits or a
//!    terminal conflict is hit
//! 2. [`ReserveMaintainer`] consumes the commit's events *after* the commit:
//!    issues tokens for new reserve units and creates reserve units when
//!    ownership is acquired or a token is retired
//!
//! External systems (holder identities, the location hierarchy, post-claim
//! notification) are reached through the traits in [`collab`].
//!
//! ## Claim flow
//!
//! ```text
//! claim_token ─▶ preconditions ─▶ sweep ─▶ attempt × N ─▶ commit
//!                                                          │
//!                          maintainer ◀── commit events ◀──┘
//!                          profile update, notifier (logged on failure)
//! ```

pub mod collab;
pub mod coordinator;
pub mod registry;
pub mod reserve;

pub use collab::{
    ClaimNotifier, Collaborators, HolderDirectory, InMemoryHolders, LocationDirectory,
    LocationTree, LogNotifier,
};
pub use coordinator::{ClaimCoordinator, ClaimOutcome, ClaimRequest};
pub use registry::TokenRegistry;
pub use reserve::ReserveMaintainer;
