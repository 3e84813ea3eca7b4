//! The registry facade.
//!
//! Every write path follows the same shape: commit first, then hand the
//! commit's events to the [`ReserveMaintainer`], then run best-effort hooks.
//! Nothing that happens after a commit can undo it.

use std::sync::Arc;

use plaque_store::allocator::shared;
use plaque_store::{
    IdSource, MemoryStore, RandomIdSource, SharedIdSource, allocate_random_with_retry,
};
use plaque_types::{
    BindingState, ClaimReceipt, HolderId, LocationId, PlaqueError, RegistryConfig,
    ReplenishReport, Result, SweepReport, Token, TokenCode, TokenView, UniqueKey, Unit,
    UnitDetails, UnitId,
};
use tracing::{debug, info, warn};

use crate::collab::{ClaimNotifier, Collaborators, HolderDirectory, LocationDirectory};
use crate::coordinator::{ClaimCoordinator, ClaimOutcome, ClaimRequest};
use crate::reserve::ReserveMaintainer;

/// Token claim and reserve registry. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TokenRegistry {
    config: Arc<RegistryConfig>,
    store: MemoryStore,
    ids: SharedIdSource,
    coordinator: ClaimCoordinator,
    maintainer: ReserveMaintainer,
    holders: Arc<dyn HolderDirectory>,
    locations: Arc<dyn LocationDirectory>,
    notifier: Arc<dyn ClaimNotifier>,
}

impl TokenRegistry {
    /// A registry over a fresh store with entropy-seeded id generation.
    ///
    /// # Errors
    /// `Configuration` if the config fails validation.
    pub fn new(config: RegistryConfig, collaborators: Collaborators) -> Result<Self> {
        let ids = RandomIdSource::from_config(&config);
        Self::with_parts(config, collaborators, MemoryStore::new(), ids)
    }

    /// A registry over an existing store and a specific id source.
    ///
    /// # Errors
    /// `Configuration` if the config fails validation.
    pub fn with_parts(
        config: RegistryConfig,
        collaborators: Collaborators,
        store: MemoryStore,
        ids: impl IdSource + 'static,
    ) -> Result<Self> {
        config.validate()?;
        let ids = shared(ids);
        let Collaborators {
            holders,
            locations,
            notifier,
        } = collaborators;
        let coordinator = ClaimCoordinator::new(
            &config,
            store.clone(),
            Arc::clone(&ids),
            Arc::clone(&holders),
            Arc::clone(&locations),
        );
        let maintainer = ReserveMaintainer::new(
            &config,
            store.clone(),
            Arc::clone(&ids),
            Arc::clone(&locations),
        );
        info!(
            reserve_min = config.reserve_min,
            max_claim_attempts = config.max_claim_attempts,
            "registry initialised"
        );
        Ok(Self {
            config: Arc::new(config),
            store,
            ids,
            coordinator,
            maintainer,
            holders,
            locations,
            notifier,
        })
    }

    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    // -----------------------------------------------------------------
    // Presentation and claim
    // -----------------------------------------------------------------

    /// Record a presentation of a token and report what it resolves to.
    ///
    /// Never changes ownership.
    ///
    /// # Errors
    /// `TokenNotFound`, or a storage error.
    pub async fn present_token(
        &self,
        code: &TokenCode,
        holder: Option<HolderId>,
        origin: Option<String>,
    ) -> Result<TokenView> {
        let mut tx = self.store.begin();
        let token = tx
            .lock_token(code)
            .await?
            .ok_or_else(|| PlaqueError::TokenNotFound(code.clone()))?;

        let novel_to_holder = holder.is_none_or(|h| !tx.has_scanned(code, h));
        tx.record_scan(code, holder, origin)?;
        let first_presentation = tx.mark_presented(code)?;
        let scan_count = tx.scan_count(code);
        let unit = token.unit.and_then(|id| tx.unit(id));
        tx.commit()?;

        let state = BindingState::of(unit.as_ref());
        debug!(token = %code, %state, first_presentation, novel_to_holder, "token presented");
        Ok(TokenView {
            code: code.clone(),
            unit,
            state,
            first_presentation,
            novel_to_holder,
            scan_count,
            retired: token.is_retired(),
        })
    }

    /// Claim a token. The reserve is replenished after the claim commits.
    ///
    /// # Errors
    /// See [`ClaimCoordinator::claim`]. Maintainer and notifier failures are
    /// logged, never returned.
    pub async fn claim_token(&self, request: ClaimRequest) -> Result<ClaimReceipt> {
        let ClaimOutcome { receipt, commit } = self.coordinator.claim(&request).await?;

        self.maintainer.handle(commit.events);
        if let Err(err) = self.notifier.claimed(&receipt) {
            warn!(token = %receipt.token, error = %err, "claim notification failed");
        }
        Ok(receipt)
    }

    /// Repair dangling and duplicate token references.
    pub fn sweep_orphans(&self) -> SweepReport {
        self.store.sweep_orphans()
    }

    /// Current view of a token without recording a presentation.
    ///
    /// # Errors
    /// `TokenNotFound`.
    pub fn token_view(&self, code: &TokenCode) -> Result<TokenView> {
        let token = self
            .store
            .token(code)
            .ok_or_else(|| PlaqueError::TokenNotFound(code.clone()))?;
        let unit = token.unit.and_then(|id| self.store.unit(id));
        Ok(TokenView {
            code: token.code.clone(),
            state: BindingState::of(unit.as_ref()),
            unit,
            first_presentation: false,
            novel_to_holder: false,
            scan_count: self.store.scans_for(code).len(),
            retired: token.is_retired(),
        })
    }

    #[must_use]
    pub fn reserve_count(&self) -> usize {
        self.store.reserve_count()
    }

    // -----------------------------------------------------------------
    // Administration
    // -----------------------------------------------------------------

    /// Create a standalone unbound token, generating a code if none is given.
    ///
    /// # Errors
    /// `UniqueViolation` for a taken explicit code, `AllocationExhausted`
    /// if generated codes kept colliding.
    pub fn provision_token(&self, code: Option<TokenCode>) -> Result<TokenCode> {
        let code = match code {
            Some(code) => {
                self.store.insert_token(Token::unbound(code.clone()))?;
                code
            }
            None => allocate_random_with_retry(
                UniqueKey::TokenCode,
                self.config.max_token_code_attempts,
                || self.ids.lock().next_token_code(),
                |code: TokenCode| {
                    self.store.insert_token(Token::unbound(code.clone()))?;
                    Ok(code)
                },
            )?,
        };
        info!(token = %code, "token provisioned");
        Ok(code)
    }

    /// Record the physical delivery of a token. A replacement reserve unit
    /// is created afterwards.
    ///
    /// # Errors
    /// `TokenNotFound`, `TokenAlreadyRetired`.
    pub async fn retire_token(&self, code: &TokenCode) -> Result<ReplenishReport> {
        let mut tx = self.store.begin();
        tx.lock_token(code)
            .await?
            .ok_or_else(|| PlaqueError::TokenNotFound(code.clone()))?;
        tx.retire(code)?;
        let commit = tx.commit()?;
        info!(token = %code, "token retired");
        Ok(self.maintainer.handle(commit.events))
    }

    /// Create a unit with a sequential id. No token is issued for it.
    ///
    /// # Errors
    /// `UnknownLocation`.
    pub fn admin_create_unit(&self, details: UnitDetails, owner: Option<HolderId>) -> Result<Unit> {
        if !self.locations.exists(details.location) {
            return Err(PlaqueError::UnknownLocation(details.location));
        }
        let (unit, commit) = self.store.create_unit_sequential(details, owner, true);
        info!(unit = %unit.id, owner = ?owner, "unit created by administrator");
        self.maintainer.handle(commit.events);
        Ok(unit)
    }

    /// Override a unit's owner. Unowned to owned replenishes the reserve.
    ///
    /// # Errors
    /// `UnitNotFound`, `UnknownHolder`.
    pub fn admin_set_owner(
        &self,
        unit: UnitId,
        owner: Option<HolderId>,
    ) -> Result<ReplenishReport> {
        if let Some(holder) = owner {
            if !self.holders.is_known(holder) {
                return Err(PlaqueError::UnknownHolder(holder));
            }
        }
        let commit = self.store.set_owner_override(unit, owner)?;
        Ok(self.maintainer.handle(commit.events))
    }

    /// Delete a unit without touching tokens that reference it.
    ///
    /// # Errors
    /// `UnitNotFound`.
    pub fn admin_delete_unit(&self, unit: UnitId) -> Result<Unit> {
        self.store.delete_unit(unit)
    }

    /// Top the reserve up to its floor in `location`.
    ///
    /// # Errors
    /// `UnknownLocation`.
    pub fn ensure_reserve(&self, location: LocationId) -> Result<ReplenishReport> {
        if !self.locations.exists(location) {
            return Err(PlaqueError::UnknownLocation(location));
        }
        Ok(self.maintainer.ensure_reserve(location))
    }
}
