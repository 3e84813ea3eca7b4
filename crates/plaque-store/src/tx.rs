//! Staged read-modify-write transactions.
//!
//! A [`StoreTx`] buffers its writes and applies them in [`StoreTx::commit`]
//! under the tables mutex, all or nothing. Dropping a transaction without
//! committing discards the writes and releases its row locks.
//!
//! Commit-time checks mirror what a relational backend would report:
//!
//! | staged write            | committed state          | error          |
//! |-------------------------|--------------------------|----------------|
//! | insert unit `id`        | `id` exists              | `UniqueViolation { UnitId }` |
//! | insert token `code`     | `code` exists            | `UniqueViolation { TokenCode }` |
//! | update unit             | owner changed or row gone | `StaleRead`   |
//! | update token            | row gone                 | `RowVanished`  |

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use plaque_types::{
    HolderId, LocationId, PendingScan, PlaqueError, Result, ScanId, Token, TokenCode, UniqueKey,
    Unit, UnitDetails, UnitId,
};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::store::Shared;

/// A committed state transition, reported to whoever reacts to writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A unit row was inserted.
    UnitCreated(Unit),
    /// A unit went from unowned to owned (or was inserted owned by a claim).
    OwnershipAcquired(Unit),
    /// A token reached its terminal handoff. `location` is where its unit
    /// was, if it still had one.
    TokenRetired {
        token: Token,
        location: Option<LocationId>,
    },
}

/// What a commit did.
#[derive(Debug, Clone, Default)]
pub struct CommitOutcome {
    pub events: Vec<StoreEvent>,
    /// Ids assigned to the scans recorded in the transaction, in order.
    pub scans: Vec<ScanId>,
}

impl CommitOutcome {
    /// Units inserted by the commit.
    pub fn created_units(&self) -> impl Iterator<Item = &Unit> {
        self.events.iter().filter_map(|e| match e {
            StoreEvent::UnitCreated(u) => Some(u),
            _ => None,
        })
    }
}

/// A row as read (`base`, `None` for inserts) and as it will be written.
#[derive(Debug)]
struct Staged<T> {
    base: Option<T>,
    row: T,
}

/// An open transaction.
pub struct StoreTx {
    shared: Arc<Shared>,
    locks: HashMap<TokenCode, OwnedMutexGuard<()>>,
    units: BTreeMap<UnitId, Staged<Unit>>,
    tokens: BTreeMap<TokenCode, Staged<Token>>,
    scans: Vec<PendingScan>,
}

impl StoreTx {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            locks: HashMap::new(),
            units: BTreeMap::new(),
            tokens: BTreeMap::new(),
            scans: Vec::new(),
        }
    }

    // -----------------------------------------------------------------
    // Locking and reads
    // -----------------------------------------------------------------

    /// Take the exclusive row lock on a token and read it.
    ///
    /// Only the token row is locked, never the unit it references. The lock
    /// is held until the transaction commits or is dropped. Returns `None`
    /// (without locking) if the token does not exist.
    ///
    /// # Errors
    /// Returns [`PlaqueError::LockTimeout`] if the store has a lock-wait
    /// limit and it elapses.
    pub async fn lock_token(&mut self, code: &TokenCode) -> Result<Option<Token>> {
        if !self.holds_lock(code) {
            let exists = self.shared.tables.lock().tokens.contains_key(code);
            if !exists && !self.tokens.contains_key(code) {
                return Ok(None);
            }
            let row = self.shared.row_lock(code);
            let guard = match self.shared.lock_wait {
                Some(wait) => tokio::time::timeout(wait, row.lock_owned())
                    .await
                    .map_err(|_| PlaqueError::LockTimeout {
                        token: code.clone(),
                    })?,
                None => row.lock_owned().await,
            };
            self.locks.insert(code.clone(), guard);
        }
        Ok(self.token(code))
    }

    /// Whether this transaction holds the row lock on `code`.
    #[must_use]
    pub fn holds_lock(&self, code: &TokenCode) -> bool {
        self.locks.contains_key(code)
    }

    /// Read a token, seeing this transaction's own writes.
    #[must_use]
    pub fn token(&self, code: &TokenCode) -> Option<Token> {
        match self.tokens.get(code) {
            Some(staged) => Some(staged.row.clone()),
            None => self.shared.tables.lock().tokens.get(code).cloned(),
        }
    }

    /// Unlocked read of a unit, seeing this transaction's own writes.
    /// A dangling reference simply reads as `None`.
    #[must_use]
    pub fn unit(&self, id: UnitId) -> Option<Unit> {
        match self.units.get(&id) {
            Some(staged) => Some(staged.row.clone()),
            None => self.shared.tables.lock().units.get(&id).cloned(),
        }
    }

    /// Whether `holder` has a committed or staged scan of `code`.
    #[must_use]
    pub fn has_scanned(&self, code: &TokenCode, holder: HolderId) -> bool {
        let staged = self
            .scans
            .iter()
            .any(|s| &s.token == code && s.holder == Some(holder));
        staged || self.shared.tables.lock().scans.has_scanned(code, holder)
    }

    /// Committed plus staged scans of `code`.
    #[must_use]
    pub fn scan_count(&self, code: &TokenCode) -> usize {
        let staged = self.scans.iter().filter(|s| &s.token == code).count();
        staged + self.shared.tables.lock().scans.count_for(code)
    }

    // -----------------------------------------------------------------
    // Unit writes
    // -----------------------------------------------------------------

    /// Speculatively insert a unit.
    ///
    /// # Errors
    /// Returns `UniqueViolation { key: UnitId }` if the id is already used.
    /// The same check runs again at commit.
    pub fn insert_unit(&mut self, unit: Unit) -> Result<()> {
        let taken = self.units.contains_key(&unit.id)
            || self.shared.tables.lock().units.contains_key(&unit.id);
        if taken {
            return Err(PlaqueError::UniqueViolation {
                key: UniqueKey::UnitId,
                value: unit.id.0.to_string(),
            });
        }
        self.units.insert(unit.id, Staged {
            base: None,
            row: unit,
        });
        Ok(())
    }

    fn stage_unit(&mut self, id: UnitId, apply: impl FnOnce(&mut Unit)) -> Result<()> {
        if !self.units.contains_key(&id) {
            let current = self
                .shared
                .tables
                .lock()
                .units
                .get(&id)
                .cloned()
                .ok_or(PlaqueError::UnitNotFound(id))?;
            self.units.insert(id, Staged {
                base: Some(current.clone()),
                row: current,
            });
        }
        if let Some(staged) = self.units.get_mut(&id) {
            apply(&mut staged.row);
        }
        Ok(())
    }

    /// Overwrite address, sub-identifier and location.
    pub fn update_unit_details(&mut self, id: UnitId, details: &UnitDetails) -> Result<()> {
        self.stage_unit(id, |unit| unit.apply_details(details))
    }

    /// Set the owner of a unit.
    pub fn set_owner(&mut self, id: UnitId, owner: HolderId) -> Result<()> {
        self.stage_unit(id, |unit| unit.owner = Some(owner))
    }

    // -----------------------------------------------------------------
    // Token writes (row lock required)
    // -----------------------------------------------------------------

    fn stage_token(&mut self, code: &TokenCode, apply: impl FnOnce(&mut Token)) -> Result<()> {
        if !self.holds_lock(code) {
            return Err(PlaqueError::Internal(format!(
                "token {code} written without its row lock"
            )));
        }
        if !self.tokens.contains_key(code) {
            let current = self
                .shared
                .tables
                .lock()
                .tokens
                .get(code)
                .cloned()
                .ok_or_else(|| PlaqueError::TokenNotFound(code.clone()))?;
            self.tokens.insert(code.clone(), Staged {
                base: Some(current.clone()),
                row: current,
            });
        }
        if let Some(staged) = self.tokens.get_mut(code) {
            apply(&mut staged.row);
        }
        Ok(())
    }

    /// Point a locked token at `unit`, replacing any previous reference.
    ///
    /// # Errors
    /// `UnitNotFound` if the unit is neither committed nor staged here.
    pub fn bind(&mut self, code: &TokenCode, unit: UnitId) -> Result<()> {
        if self.unit(unit).is_none() {
            return Err(PlaqueError::UnitNotFound(unit));
        }
        self.stage_token(code, |token| token.unit = Some(unit))
    }

    /// Set the first-presentation flag. Returns `true` if this is the first
    /// presentation.
    pub fn mark_presented(&mut self, code: &TokenCode) -> Result<bool> {
        let mut first = false;
        self.stage_token(code, |token| {
            first = !token.presented;
            token.presented = true;
        })?;
        Ok(first)
    }

    /// Record the terminal handoff of a locked token.
    ///
    /// # Errors
    /// `TokenAlreadyRetired` if it was retired before.
    pub fn retire(&mut self, code: &TokenCode) -> Result<()> {
        if self.token(code).is_some_and(|t| t.is_retired()) {
            return Err(PlaqueError::TokenAlreadyRetired(code.clone()));
        }
        self.stage_token(code, |token| token.retired_at = Some(Utc::now()))
    }

    // -----------------------------------------------------------------
    // Scans
    // -----------------------------------------------------------------

    /// Stage a scan record. It receives its id at commit.
    pub fn record_scan(
        &mut self,
        code: &TokenCode,
        holder: Option<HolderId>,
        origin: Option<String>,
    ) -> Result<()> {
        if self.token(code).is_none() {
            return Err(PlaqueError::TokenNotFound(code.clone()));
        }
        self.scans.push(PendingScan {
            token: code.clone(),
            holder,
            origin,
        });
        Ok(())
    }

    // -----------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------

    /// Apply every staged write atomically, then release the row locks.
    pub fn commit(self) -> Result<CommitOutcome> {
        let Self {
            shared,
            locks,
            units,
            tokens,
            scans,
        } = self;
        #[cfg(any(test, feature = "test-helpers"))]
        shared.commit_hook.run()?;
        let mut guard = shared.tables.lock();
        let tables = &mut *guard;

        for (id, staged) in &units {
            match (&staged.base, tables.units.get(id)) {
                (None, Some(_)) => {
                    return Err(PlaqueError::UniqueViolation {
                        key: UniqueKey::UnitId,
                        value: id.0.to_string(),
                    });
                }
                (Some(base), current) if current.is_none_or(|c| c.owner != base.owner) => {
                    return Err(PlaqueError::StaleRead { unit: *id });
                }
                _ => {}
            }
        }
        for (code, staged) in &tokens {
            match (&staged.base, tables.tokens.contains_key(code)) {
                (None, true) => {
                    return Err(PlaqueError::UniqueViolation {
                        key: UniqueKey::TokenCode,
                        value: code.to_string(),
                    });
                }
                (Some(_), false) => {
                    return Err(PlaqueError::RowVanished {
                        row: format!("token:{code}"),
                    });
                }
                _ => {}
            }
        }

        let mut outcome = CommitOutcome::default();
        for (id, Staged { base, row }) in units {
            match base {
                None => {
                    outcome.events.push(StoreEvent::UnitCreated(row.clone()));
                    if row.owner.is_some() {
                        outcome.events.push(StoreEvent::OwnershipAcquired(row.clone()));
                    }
                }
                Some(base) if base.owner.is_none() && row.owner.is_some() => {
                    outcome.events.push(StoreEvent::OwnershipAcquired(row.clone()));
                }
                Some(_) => {}
            }
            tables.units.insert(id, row);
        }
        for (code, Staged { base, row }) in tokens {
            let newly_retired = row.is_retired() && base.as_ref().is_none_or(|b| !b.is_retired());
            if newly_retired {
                let location = row
                    .unit
                    .and_then(|u| tables.units.get(&u))
                    .map(|u| u.location);
                outcome.events.push(StoreEvent::TokenRetired {
                    token: row.clone(),
                    location,
                });
            }
            tables.tokens.insert(code, row);
        }
        for scan in scans {
            let id = tables.scans.next_id();
            outcome.scans.push(tables.scans.append(scan.into_record(id)));
        }
        drop(guard);
        drop(locks);

        debug!(
            events = outcome.events.len(),
            scans = outcome.scans.len(),
            "transaction committed"
        );
        Ok(outcome)
    }

    /// Discard every staged write and release the row locks.
    pub fn rollback(self) {
        debug!(
            staged_units = self.units.len(),
            staged_tokens = self.tokens.len(),
            "transaction rolled back"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::MemoryStore;

    fn code(s: &str) -> TokenCode {
        TokenCode::parse(s).unwrap()
    }

    fn store_with_reserve_token() -> (MemoryStore, TokenCode, UnitId) {
        let store = MemoryStore::new();
        let (unit, _) =
            store.create_unit_sequential(UnitDetails::reserve(LocationId(1)), None, false);
        let c = code("abc123");
        store.insert_token(Token::bound(c.clone(), unit.id)).unwrap();
        (store, c, unit.id)
    }

    #[tokio::test]
    async fn lock_missing_token_returns_none() {
        let store = MemoryStore::new();
        let mut tx = store.begin();
        assert!(tx.lock_token(&code("nope00")).await.unwrap().is_none());
        assert!(!tx.holds_lock(&code("nope00")));
    }

    #[tokio::test]
    async fn commit_applies_all_writes() {
        let (store, c, unit) = store_with_reserve_token();
        let holder = HolderId::new();

        let mut tx = store.begin();
        tx.lock_token(&c).await.unwrap().unwrap();
        tx.update_unit_details(unit, &UnitDetails::new("Main 5", "1", LocationId(2)))
            .unwrap();
        tx.set_owner(unit, holder).unwrap();
        tx.record_scan(&c, Some(holder), None).unwrap();
        assert!(tx.mark_presented(&c).unwrap());
        let outcome = tx.commit().unwrap();

        assert_eq!(outcome.scans, vec![ScanId(1)]);
        assert!(matches!(
            outcome.events.as_slice(),
            [StoreEvent::OwnershipAcquired(u)] if u.id == unit
        ));
        let stored = store.unit(unit).unwrap();
        assert_eq!(stored.owner, Some(holder));
        assert_eq!(stored.address, "Main 5");
        assert!(store.token(&c).unwrap().presented);
    }

    #[tokio::test]
    async fn dropped_tx_leaves_no_trace_and_frees_lock() {
        let (store, c, unit) = store_with_reserve_token();
        {
            let mut tx = store.begin();
            tx.lock_token(&c).await.unwrap();
            tx.set_owner(unit, HolderId::new()).unwrap();
            tx.record_scan(&c, None, None).unwrap();
        }
        assert!(store.unit(unit).unwrap().is_reserve());
        assert_eq!(store.scan_count(), 0);

        let mut again = store.begin();
        assert!(again.lock_token(&c).await.unwrap().is_some());
        again.rollback();
    }

    #[tokio::test]
    async fn insert_collision_detected_immediately_and_at_commit() {
        let (store, _, existing) = store_with_reserve_token();
        let mut tx = store.begin();
        let err = tx
            .insert_unit(Unit::new(existing, UnitDetails::reserve(LocationId(1)), None))
            .unwrap_err();
        assert!(err.is_retryable());

        // Staged first, committed by someone else before we commit.
        let mut tx = store.begin();
        tx.insert_unit(Unit::new(UnitId(50), UnitDetails::reserve(LocationId(1)), None))
            .unwrap();
        let mut other = store.begin();
        other
            .insert_unit(Unit::new(UnitId(50), UnitDetails::reserve(LocationId(1)), None))
            .unwrap();
        other.commit().unwrap();
        let err = tx.commit().unwrap_err();
        assert!(matches!(
            err,
            PlaqueError::UniqueViolation {
                key: UniqueKey::UnitId,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn owner_change_after_read_is_stale() {
        let (store, c, unit) = store_with_reserve_token();
        let mut tx = store.begin();
        tx.lock_token(&c).await.unwrap();
        tx.set_owner(unit, HolderId::new()).unwrap();

        store.set_owner_override(unit, Some(HolderId::new())).unwrap();
        let err = tx.commit().unwrap_err();
        assert!(matches!(err, PlaqueError::StaleRead { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn deleted_unit_after_read_is_stale() {
        let (store, c, unit) = store_with_reserve_token();
        let mut tx = store.begin();
        tx.lock_token(&c).await.unwrap();
        tx.update_unit_details(unit, &UnitDetails::new("Main 5", "", LocationId(1)))
            .unwrap();
        store.delete_unit(unit).unwrap();
        let err = tx.commit().unwrap_err();
        assert!(matches!(err, PlaqueError::StaleRead { unit: u } if u == unit));
        assert!(err.is_retryable());
        assert!(store.unit(unit).is_none());
    }

    #[tokio::test]
    async fn failing_commit_hook_applies_nothing() {
        let (store, c, unit) = store_with_reserve_token();
        store.before_next_commit(|| Err(PlaqueError::Storage("disk full".into())));

        let mut tx = store.begin();
        tx.lock_token(&c).await.unwrap();
        tx.set_owner(unit, HolderId::new()).unwrap();
        tx.record_scan(&c, None, None).unwrap();
        let err = tx.commit().unwrap_err();
        assert!(matches!(err, PlaqueError::Storage(_)));
        assert!(store.unit(unit).unwrap().is_reserve());
        assert_eq!(store.scan_count(), 0);

        // One-shot, and the row lock was released.
        let mut tx = store.begin();
        tx.lock_token(&c).await.unwrap();
        tx.record_scan(&c, None, None).unwrap();
        tx.commit().unwrap();
        assert_eq!(store.scan_count(), 1);
    }

    #[tokio::test]
    async fn token_write_requires_lock() {
        let (store, c, _) = store_with_reserve_token();
        let mut tx = store.begin();
        let err = tx.mark_presented(&c).unwrap_err();
        assert!(matches!(err, PlaqueError::Internal(_)));
    }

    #[tokio::test]
    async fn retire_reports_location_and_is_terminal() {
        let (store, c, _) = store_with_reserve_token();
        let mut tx = store.begin();
        tx.lock_token(&c).await.unwrap();
        tx.retire(&c).unwrap();
        let outcome = tx.commit().unwrap();
        assert!(matches!(
            outcome.events.as_slice(),
            [StoreEvent::TokenRetired { location: Some(LocationId(1)), .. }]
        ));

        let mut tx = store.begin();
        tx.lock_token(&c).await.unwrap();
        assert!(matches!(
            tx.retire(&c).unwrap_err(),
            PlaqueError::TokenAlreadyRetired(_)
        ));
    }

    #[tokio::test]
    async fn lock_wait_limit_times_out() {
        let store = MemoryStore::with_lock_wait(Duration::from_millis(20));
        let c = code("abc123");
        store.insert_token(Token::unbound(c.clone())).unwrap();

        let mut holder = store.begin();
        holder.lock_token(&c).await.unwrap();

        let mut waiter = store.begin();
        let err = waiter.lock_token(&c).await.unwrap_err();
        assert!(matches!(err, PlaqueError::LockTimeout { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn claim_insert_reports_creation_and_ownership() {
        let store = MemoryStore::new();
        let c = code("abc123");
        store.insert_token(Token::unbound(c.clone())).unwrap();
        let holder = HolderId::new();

        let mut tx = store.begin();
        tx.lock_token(&c).await.unwrap();
        let unit = Unit::new(
            UnitId(1_234_567_890),
            UnitDetails::new("Main 5", "", LocationId(1)),
            Some(holder),
        );
        tx.insert_unit(unit).unwrap();
        tx.bind(&c, UnitId(1_234_567_890)).unwrap();
        let outcome = tx.commit().unwrap();

        assert_eq!(outcome.created_units().count(), 1);
        assert!(
            outcome
                .events
                .iter()
                .any(|e| matches!(e, StoreEvent::OwnershipAcquired(u) if u.owner == Some(holder)))
        );
        assert_eq!(store.token(&c).unwrap().unit, Some(UnitId(1_234_567_890)));
    }

    #[tokio::test]
    async fn has_scanned_sees_staged_and_committed() {
        let (store, c, _) = store_with_reserve_token();
        let holder = HolderId::new();

        let mut tx = store.begin();
        tx.lock_token(&c).await.unwrap();
        assert!(!tx.has_scanned(&c, holder));
        tx.record_scan(&c, Some(holder), None).unwrap();
        assert!(tx.has_scanned(&c, holder));
        tx.commit().unwrap();

        let tx = store.begin();
        assert!(tx.has_scanned(&c, holder));
        assert_eq!(tx.scan_count(&c), 1);
    }
}
