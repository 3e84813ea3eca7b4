//! Claim coordination.
//!
//! A claim binds a holder as owner of the unit behind a token. Each attempt
//! is one transaction:
//! 1. Lock the token row
//! 2. Read its unit (unlocked)
//! 3. Owned → terminal conflict; unowned → adopt in place; absent → create
//!    a unit under a random wide-keyspace id and bind the token to it
//! 4. Record the scan, mark the token presented, commit
//!
//! Transient failures (id collision, stale read, lock wait, attempt
//! timeout) drop the transaction and start over. Conflicts abort at once.
//! First committer wins: later attempts see the committed owner.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use plaque_store::{CommitOutcome, MemoryStore, SharedIdSource};
use plaque_types::{
    ClaimReceipt, HolderId, HolderProfile, LocationId, PlaqueError, RegistryConfig, Result,
    TokenCode, Unit, UnitDetails,
};
use tracing::{debug, info, warn};

use crate::collab::{HolderDirectory, LocationDirectory};

/// A holder's request to claim a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRequest {
    pub token: TokenCode,
    pub holder: HolderId,
    pub details: UnitDetails,
    /// If set, `details.location` must lie within this location.
    pub within: Option<LocationId>,
    /// Profile fields forwarded to the holder directory after commit.
    pub profile: Option<HolderProfile>,
    /// Network origin recorded on the scan.
    pub origin: Option<String>,
}

impl ClaimRequest {
    #[must_use]
    pub fn new(token: TokenCode, holder: HolderId, details: UnitDetails) -> Self {
        Self {
            token,
            holder,
            details,
            within: None,
            profile: None,
            origin: None,
        }
    }

    #[must_use]
    pub fn within(mut self, ancestor: LocationId) -> Self {
        self.within = Some(ancestor);
        self
    }

    #[must_use]
    pub fn with_profile(mut self, profile: HolderProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

/// A committed claim and the events its commit produced.
#[derive(Debug, Clone)]
pub struct ClaimOutcome {
    pub receipt: ClaimReceipt,
    pub commit: CommitOutcome,
}

/// Runs claims against a shared store.
#[derive(Clone)]
pub struct ClaimCoordinator {
    store: MemoryStore,
    ids: SharedIdSource,
    holders: Arc<dyn HolderDirectory>,
    locations: Arc<dyn LocationDirectory>,
    max_attempts: u32,
    attempt_timeout: Option<Duration>,
    sweep_before_claim: bool,
}

impl ClaimCoordinator {
    #[must_use]
    pub fn new(
        config: &RegistryConfig,
        store: MemoryStore,
        ids: SharedIdSource,
        holders: Arc<dyn HolderDirectory>,
        locations: Arc<dyn LocationDirectory>,
    ) -> Self {
        Self {
            store,
            ids,
            holders,
            locations,
            max_attempts: config.max_claim_attempts,
            attempt_timeout: config.attempt_timeout(),
            sweep_before_claim: config.sweep_before_claim,
        }
    }

    /// Validate the request without touching the store.
    ///
    /// # Errors
    /// `UnknownHolder`, `UnknownLocation`, `LocationMismatch` or
    /// `InvalidUnitDetails`, checked in that order.
    pub fn check_preconditions(&self, request: &ClaimRequest) -> Result<()> {
        if !self.holders.is_known(request.holder) {
            return Err(PlaqueError::UnknownHolder(request.holder));
        }
        let location = request.details.location;
        if !self.locations.exists(location) {
            return Err(PlaqueError::UnknownLocation(location));
        }
        if let Some(within) = request.within {
            if !self.locations.belongs_to(location, within) {
                return Err(PlaqueError::LocationMismatch { location, within });
            }
        }
        request.details.validate_for_claim()
    }

    /// Claim a token for a holder.
    ///
    /// # Errors
    /// - precondition failures from [`ClaimCoordinator::check_preconditions`]
    /// - `TokenNotFound`
    /// - `AlreadyClaimedBySelf` / `AlreadyClaimedByOther`
    /// - `ClaimExhausted` once every attempt failed transiently
    /// - any non-transient storage error, unchanged
    pub async fn claim(&self, request: &ClaimRequest) -> Result<ClaimOutcome> {
        self.check_preconditions(request)?;

        if self.sweep_before_claim {
            let swept = self.store.sweep_orphans();
            if swept.cleared_references() > 0 {
                debug!(
                    token = %request.token,
                    cleared = swept.cleared_references(),
                    "pre-claim sweep repaired references"
                );
            }
        }

        for attempt in 1..=self.max_attempts {
            let pending = self.attempt(request, attempt);
            let result = match self.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, pending).await {
                    Ok(result) => result,
                    Err(_) => {
                        debug!(token = %request.token, attempt, "claim attempt timed out");
                        continue;
                    }
                },
                None => pending.await,
            };

            match result {
                Ok(outcome) => {
                    info!(
                        token = %request.token,
                        unit = %outcome.receipt.unit.id,
                        holder = %request.holder,
                        created_unit = outcome.receipt.created_unit,
                        attempts = attempt,
                        "token claimed"
                    );
                    self.update_profile(request);
                    return Ok(outcome);
                }
                Err(err) if err.is_retryable() => {
                    debug!(
                        token = %request.token,
                        attempt,
                        error = %err,
                        "claim attempt failed, retrying"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        warn!(token = %request.token, attempts = self.max_attempts, "claim attempts exhausted");
        Err(PlaqueError::ClaimExhausted {
            token: request.token.clone(),
            attempts: self.max_attempts,
        })
    }

    /// One transaction. Dropping the future releases the row lock and
    /// discards the staged writes.
    async fn attempt(&self, request: &ClaimRequest, attempt: u32) -> Result<ClaimOutcome> {
        let mut tx = self.store.begin();
        let token = tx
            .lock_token(&request.token)
            .await?
            .ok_or_else(|| PlaqueError::TokenNotFound(request.token.clone()))?;

        let (unit_id, created_unit) = match token.unit.and_then(|id| tx.unit(id)) {
            Some(unit) => match unit.owner {
                Some(owner) if owner == request.holder => {
                    return Err(PlaqueError::AlreadyClaimedBySelf {
                        token: request.token.clone(),
                        unit: unit.id,
                    });
                }
                Some(_) => {
                    return Err(PlaqueError::AlreadyClaimedByOther {
                        token: request.token.clone(),
                        unit: unit.id,
                    });
                }
                None => {
                    tx.update_unit_details(unit.id, &request.details)?;
                    // Staging re-reads the row; an owner committed since the
                    // unlocked read must not be overwritten.
                    if tx.unit(unit.id).is_some_and(|staged| staged.owner.is_some()) {
                        return Err(PlaqueError::StaleRead { unit: unit.id });
                    }
                    tx.set_owner(unit.id, request.holder)?;
                    (unit.id, false)
                }
            },
            None => {
                let id = self.ids.lock().next_unit_id();
                tx.insert_unit(Unit::new(id, request.details.clone(), Some(request.holder)))?;
                tx.bind(&request.token, id)?;
                (id, true)
            }
        };

        tx.record_scan(&request.token, Some(request.holder), request.origin.clone())?;
        tx.mark_presented(&request.token)?;
        let unit = tx.unit(unit_id).ok_or(PlaqueError::UnitNotFound(unit_id))?;
        let commit = tx.commit()?;
        let scan = commit
            .scans
            .first()
            .copied()
            .ok_or_else(|| PlaqueError::Internal("claim commit recorded no scan".into()))?;

        Ok(ClaimOutcome {
            receipt: ClaimReceipt {
                token: request.token.clone(),
                unit,
                holder: request.holder,
                created_unit,
                attempts: attempt,
                scan,
                claimed_at: Utc::now(),
            },
            commit,
        })
    }

    fn update_profile(&self, request: &ClaimRequest) {
        let Some(profile) = &request.profile else {
            return;
        };
        if let Err(err) = self.holders.update_profile(request.holder, profile) {
            warn!(holder = %request.holder, error = %err, "profile update failed after claim");
        }
    }
}
