//! In-memory token/unit store.
//!
//! All tables live behind one `parking_lot` mutex that is held only for
//! short synchronous sections. Exclusion between claims comes from the
//! per-token row locks handed out to [`StoreTx`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use plaque_types::{
    HolderId, PlaqueError, Result, ScanRecord, Token, TokenCode, UniqueKey, Unit, UnitDetails,
    UnitId,
};
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use tracing::{debug, info};

use crate::allocator::{EntityKind, smallest_unused};
use crate::scan_log::ScanLog;
use crate::tx::{CommitOutcome, StoreEvent, StoreTx};

/// The committed state.
#[derive(Debug, Default)]
pub(crate) struct Tables {
    pub(crate) units: BTreeMap<UnitId, Unit>,
    pub(crate) tokens: BTreeMap<TokenCode, Token>,
    pub(crate) scans: ScanLog,
}

#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) tables: Mutex<Tables>,
    /// One row lock per token, created on first use.
    row_locks: Mutex<HashMap<TokenCode, Arc<RowLock<()>>>>,
    /// How long `lock_token` waits before giving up. `None` waits forever.
    pub(crate) lock_wait: Option<Duration>,
    #[cfg(any(test, feature = "test-helpers"))]
    pub(crate) commit_hook: CommitHook,
}

/// Runs once at the start of the next commit, before any check. An error
/// fails that commit without applying anything.
#[cfg(any(test, feature = "test-helpers"))]
#[derive(Default)]
pub(crate) struct CommitHook(Mutex<Option<Box<dyn FnOnce() -> Result<()> + Send>>>);

#[cfg(any(test, feature = "test-helpers"))]
impl CommitHook {
    pub(crate) fn run(&self) -> Result<()> {
        let hook = self.0.lock().take();
        hook.map_or(Ok(()), |hook| hook())
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl std::fmt::Debug for CommitHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CommitHook")
    }
}

impl Shared {
    pub(crate) fn row_lock(&self, code: &TokenCode) -> Arc<RowLock<()>> {
        Arc::clone(self.row_locks.lock().entry(code.clone()).or_default())
    }

    /// Take a token's row lock without waiting. `None` if someone holds it.
    pub(crate) fn try_row_lock(&self, code: &TokenCode) -> Option<OwnedMutexGuard<()>> {
        self.row_lock(code).try_lock_owned().ok()
    }
}

/// Cloneable handle to a shared in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub(crate) shared: Arc<Shared>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose row locks give up after `wait` with
    /// [`PlaqueError::LockTimeout`].
    #[must_use]
    pub fn with_lock_wait(wait: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                lock_wait: Some(wait),
                ..Shared::default()
            }),
        }
    }

    /// Run `hook` at the start of the next commit on this store, between
    /// the transaction's staging and its commit-time checks. If the hook
    /// fails, that commit fails with its error.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn before_next_commit(&self, hook: impl FnOnce() -> Result<()> + Send + 'static) {
        *self.shared.commit_hook.0.lock() = Some(Box::new(hook));
    }

    /// Start a transaction.
    #[must_use]
    pub fn begin(&self) -> StoreTx {
        StoreTx::new(Arc::clone(&self.shared))
    }

    // -----------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------

    #[must_use]
    pub fn token(&self, code: &TokenCode) -> Option<Token> {
        self.shared.tables.lock().tokens.get(code).cloned()
    }

    #[must_use]
    pub fn unit(&self, id: UnitId) -> Option<Unit> {
        self.shared.tables.lock().units.get(&id).cloned()
    }

    /// All tokens, ordered by code.
    #[must_use]
    pub fn tokens(&self) -> Vec<Token> {
        self.shared.tables.lock().tokens.values().cloned().collect()
    }

    /// All units, ordered by id.
    #[must_use]
    pub fn units(&self) -> Vec<Unit> {
        self.shared.tables.lock().units.values().cloned().collect()
    }

    /// Number of unowned units.
    #[must_use]
    pub fn reserve_count(&self) -> usize {
        self.shared
            .tables
            .lock()
            .units
            .values()
            .filter(|u| u.is_reserve())
            .count()
    }

    /// Codes of every token referencing `unit`. More than one entry means
    /// the binding invariant is broken and the sweep has work to do.
    #[must_use]
    pub fn tokens_for_unit(&self, unit: UnitId) -> Vec<TokenCode> {
        self.shared
            .tables
            .lock()
            .tokens
            .values()
            .filter(|t| t.unit == Some(unit))
            .map(|t| t.code.clone())
            .collect()
    }

    #[must_use]
    pub fn scans_for(&self, code: &TokenCode) -> Vec<ScanRecord> {
        self.shared
            .tables
            .lock()
            .scans
            .for_token(code)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn scan_count(&self) -> usize {
        self.shared.tables.lock().scans.len()
    }

    // -----------------------------------------------------------------
    // Sequential allocation and administrative writes
    // -----------------------------------------------------------------

    /// The next gap-filled id for `kind`.
    ///
    /// Only a snapshot: another writer may take the id before the caller
    /// inserts. Creation paths use [`MemoryStore::create_unit_sequential`],
    /// which allocates and inserts under the same lock.
    #[must_use]
    pub fn allocate_sequential(&self, kind: EntityKind) -> u64 {
        let tables = self.shared.tables.lock();
        match kind {
            EntityKind::Unit => smallest_unused(tables.units.keys().map(|id| id.0)),
            EntityKind::Scan => tables.scans.next_id().0,
        }
    }

    /// Allocate a gap-filled id and insert a unit with it, atomically.
    pub fn create_unit_sequential(
        &self,
        details: UnitDetails,
        owner: Option<HolderId>,
        admin_created: bool,
    ) -> (Unit, CommitOutcome) {
        let mut tables = self.shared.tables.lock();
        let id = UnitId(smallest_unused(tables.units.keys().map(|id| id.0)));
        let unit = Unit::new(id, details, owner);
        let unit = if admin_created { unit.admin() } else { unit };
        tables.units.insert(id, unit.clone());
        drop(tables);

        debug!(unit = %id, location = %unit.location, admin_created, "unit created");
        let outcome = CommitOutcome {
            events: vec![StoreEvent::UnitCreated(unit.clone())],
            scans: Vec::new(),
        };
        (unit, outcome)
    }

    /// Insert a standalone token row.
    ///
    /// # Errors
    /// - `UniqueViolation { key: TokenCode }` if the code is taken
    /// - `UnitNotFound` if the token is bound to a unit that doesn't exist
    pub fn insert_token(&self, token: Token) -> Result<()> {
        let mut tables = self.shared.tables.lock();
        if tables.tokens.contains_key(&token.code) {
            return Err(PlaqueError::UniqueViolation {
                key: UniqueKey::TokenCode,
                value: token.code.to_string(),
            });
        }
        if let Some(unit) = token.unit {
            if !tables.units.contains_key(&unit) {
                return Err(PlaqueError::UnitNotFound(unit));
            }
        }
        debug!(token = %token.code, unit = ?token.unit, "token inserted");
        tables.tokens.insert(token.code.clone(), token);
        Ok(())
    }

    /// Delete a unit without touching the tokens that reference it.
    ///
    /// This is the out-of-band path that leaves dangling references for
    /// [`MemoryStore::sweep_orphans`] to clean up.
    pub fn delete_unit(&self, id: UnitId) -> Result<Unit> {
        let removed = self.shared.tables.lock().units.remove(&id);
        let unit = removed.ok_or(PlaqueError::UnitNotFound(id))?;
        info!(unit = %id, "unit deleted out of band");
        Ok(unit)
    }

    /// Administrative owner override. Bypasses the claim path.
    ///
    /// Reports `OwnershipAcquired` when the unit goes from unowned to owned.
    pub fn set_owner_override(&self, id: UnitId, owner: Option<HolderId>) -> Result<CommitOutcome> {
        let mut tables = self.shared.tables.lock();
        let unit = tables
            .units
            .get_mut(&id)
            .ok_or(PlaqueError::UnitNotFound(id))?;
        let was_reserve = unit.is_reserve();
        unit.owner = owner;
        let snapshot = unit.clone();
        drop(tables);

        info!(unit = %id, owner = ?owner, "owner overridden");
        let mut outcome = CommitOutcome::default();
        if was_reserve && owner.is_some() {
            outcome.events.push(StoreEvent::OwnershipAcquired(snapshot));
        }
        Ok(outcome)
    }
}
