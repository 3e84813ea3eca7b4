//! # plaque-types
//!
//! Shared types, errors, and configuration for the **Plaque** registry.
//!
//! This crate is the leaf dependency of the workspace: every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`TokenCode`], [`UnitId`], [`HolderId`], [`LocationId`], [`ScanId`]
//! - **Token model**: [`Token`]
//! - **Unit model**: [`Unit`], [`UnitDetails`], [`HolderProfile`]
//! - **Scan model**: [`ScanRecord`]
//! - **Views**: [`TokenView`], [`BindingState`], [`ClaimReceipt`], [`SweepReport`],
//!   [`ReplenishReport`]
//! - **Configuration**: [`RegistryConfig`], [`IdSpace`]
//! - **Errors**: [`PlaqueError`] with `PQ_ERR_` prefix codes
//! - **Constants**: defaults and limits

pub mod config;
pub mod constants;
pub mod error;
pub mod ids;
pub mod scan;
pub mod token;
pub mod unit;
pub mod view;

// Re-export all primary types at crate root for ergonomic imports:
//   use plaque_types::{Token, Unit, TokenCode, PlaqueError, ...};

pub use config::*;
pub use error::*;
pub use ids::*;
pub use scan::*;
pub use token::*;
pub use unit::*;
pub use view::*;

// Constants are accessed via `plaque_types::constants::FOO`
// (not re-exported to avoid name collisions).
