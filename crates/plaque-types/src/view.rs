//! Read models and reports returned by registry operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{HolderId, ScanId, TokenCode, Unit};

/// Ownership state of a token as seen by a presenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingState {
    /// No unit (or the referenced unit no longer exists).
    Unbound,
    /// Bound to an unowned, claimable unit.
    Reserve,
    /// Bound to a unit owned by this holder.
    Owned(HolderId),
}

impl std::fmt::Display for BindingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unbound => write!(f, "UNBOUND"),
            Self::Reserve => write!(f, "RESERVE"),
            Self::Owned(_) => write!(f, "OWNED"),
        }
    }
}

impl BindingState {
    /// Derive the state from the unit a token resolves to.
    #[must_use]
    pub fn of(unit: Option<&Unit>) -> Self {
        match unit {
            None => Self::Unbound,
            Some(u) => u.owner.map_or(Self::Reserve, Self::Owned),
        }
    }
}

/// What a presenter learns from scanning a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenView {
    pub code: TokenCode,
    pub unit: Option<Unit>,
    pub state: BindingState,
    /// This presentation is the first ever for the token.
    pub first_presentation: bool,
    /// The presenting holder had never scanned this token before.
    /// Always `true` for anonymous presentations.
    pub novel_to_holder: bool,
    /// Presentations recorded so far, including this one.
    pub scan_count: usize,
    pub retired: bool,
}

/// Proof of a committed claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimReceipt {
    pub token: TokenCode,
    pub unit: Unit,
    pub holder: HolderId,
    /// `true` when the claim created the unit (the token was unbound).
    pub created_unit: bool,
    /// Transactions it took, including the successful one.
    pub attempts: u32,
    pub scan: ScanId,
    pub claimed_at: DateTime<Utc>,
}

/// Outcome of an orphan sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// References to units that no longer exist, now cleared.
    pub dangling_cleared: usize,
    /// Extra references to an already-referenced unit, now cleared.
    pub duplicates_cleared: usize,
    /// Tokens left alone because a claim held their row lock.
    pub skipped_locked: usize,
}

impl SweepReport {
    #[must_use]
    pub fn cleared_references(&self) -> usize {
        self.dangling_cleared + self.duplicates_cleared
    }
}

/// What one round of reserve maintenance did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplenishReport {
    pub units_created: usize,
    pub tokens_issued: usize,
    /// Failures that were logged and swallowed.
    pub failures: usize,
}

impl ReplenishReport {
    pub fn absorb(&mut self, other: Self) {
        self.units_created += other.units_created;
        self.tokens_issued += other.tokens_issued;
        self.failures += other.failures;
    }
}
