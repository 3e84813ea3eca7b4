//! Reserve maintenance.
//!
//! Reacts to committed state transitions, always after the triggering
//! commit and never inside it:
//!
//! | event                       | reaction                                   |
//! |-----------------------------|--------------------------------------------|
//! | `UnitCreated` (reserve)     | issue one fresh token bound to the unit    |
//! | `OwnershipAcquired`         | create units until the reserve floor holds |
//! | `TokenRetired`              | create one replacement unit                |
//!
//! Units created here emit their own `UnitCreated`, which goes back on the
//! work queue so every new reserve unit gets a token. Failures are logged
//! and counted. They never reach the caller and never undo the trigger.

use std::collections::VecDeque;
use std::sync::Arc;

use plaque_store::{MemoryStore, SharedIdSource, StoreEvent, allocate_random_with_retry};
use plaque_types::{
    LocationId, PlaqueError, RegistryConfig, ReplenishReport, Result, Token, TokenCode, UniqueKey,
    Unit, UnitDetails, UnitId,
};
use tracing::{debug, info, warn};

use crate::collab::LocationDirectory;

/// Keeps at least `reserve_min` unowned units available.
#[derive(Clone)]
pub struct ReserveMaintainer {
    store: MemoryStore,
    ids: SharedIdSource,
    locations: Arc<dyn LocationDirectory>,
    reserve_min: usize,
    max_token_code_attempts: u32,
    default_location: Option<LocationId>,
}

impl ReserveMaintainer {
    #[must_use]
    pub fn new(
        config: &RegistryConfig,
        store: MemoryStore,
        ids: SharedIdSource,
        locations: Arc<dyn LocationDirectory>,
    ) -> Self {
        Self {
            store,
            ids,
            locations,
            reserve_min: config.reserve_min,
            max_token_code_attempts: config.max_token_code_attempts,
            default_location: config.default_location,
        }
    }

    /// Process the events of one commit, and everything they cause.
    pub fn handle(&self, events: Vec<StoreEvent>) -> ReplenishReport {
        let mut queue = VecDeque::from(events);
        let mut report = ReplenishReport::default();

        while let Some(event) = queue.pop_front() {
            match event {
                StoreEvent::UnitCreated(unit) => {
                    if unit.is_reserve() && !unit.admin_created {
                        self.issue_for(&unit, &mut report);
                    }
                }
                StoreEvent::OwnershipAcquired(unit) => {
                    self.top_up(unit.location, &mut queue, &mut report);
                }
                StoreEvent::TokenRetired { token, location } => {
                    match self.placement(location) {
                        Some(location) => {
                            self.create_into(location, &mut queue);
                            report.units_created += 1;
                        }
                        None => {
                            warn!(
                                token = %token.code,
                                "retired token has no usable location for a replacement unit"
                            );
                            report.failures += 1;
                        }
                    }
                }
            }
        }

        if report != ReplenishReport::default() {
            info!(
                units_created = report.units_created,
                tokens_issued = report.tokens_issued,
                failures = report.failures,
                reserve = self.store.reserve_count(),
                "reserve maintained"
            );
        }
        report
    }

    /// Administrative top-up: create reserve units at `location` until the
    /// floor holds, issuing their tokens.
    pub fn ensure_reserve(&self, location: LocationId) -> ReplenishReport {
        let mut queue = VecDeque::new();
        let mut report = ReplenishReport::default();
        self.top_up(location, &mut queue, &mut report);
        let mut issued = self.handle(queue.into());
        issued.absorb(report);
        issued
    }

    /// Where new reserve units go: `wanted` if the directory knows it,
    /// otherwise the configured default if that one exists.
    fn placement(&self, wanted: Option<LocationId>) -> Option<LocationId> {
        wanted
            .into_iter()
            .chain(self.default_location)
            .find(|&location| self.locations.exists(location))
    }

    /// The floor check is advisory: concurrent top-ups may overshoot.
    fn top_up(
        &self,
        wanted: LocationId,
        queue: &mut VecDeque<StoreEvent>,
        report: &mut ReplenishReport,
    ) {
        let deficit = self.reserve_min.saturating_sub(self.store.reserve_count());
        if deficit == 0 {
            return;
        }
        let Some(location) = self.placement(Some(wanted)) else {
            warn!(%wanted, deficit, "no usable location for reserve units");
            report.failures += 1;
            return;
        };
        debug!(%location, deficit, "reserve below floor");
        for _ in 0..deficit {
            self.create_into(location, queue);
        }
        report.units_created += deficit;
    }

    /// Create one reserve unit in a location the directory knows.
    fn create_into(&self, location: LocationId, queue: &mut VecDeque<StoreEvent>) {
        let (unit, outcome) =
            self.store
                .create_unit_sequential(UnitDetails::reserve(location), None, false);
        debug!(unit = %unit.id, %location, "reserve unit created");
        queue.extend(outcome.events);
    }

    fn issue_for(&self, unit: &Unit, report: &mut ReplenishReport) {
        match self.issue_token(unit.id) {
            Ok(code) => {
                debug!(token = %code, unit = %unit.id, "token issued for reserve unit");
                report.tokens_issued += 1;
            }
            Err(err) => {
                warn!(unit = %unit.id, error = %err, "token issuance failed");
                report.failures += 1;
            }
        }
    }

    /// Generate a fresh code and bind it to `unit`.
    ///
    /// # Errors
    /// `AllocationExhausted` if every generated code collided, or any
    /// other store error.
    pub fn issue_token(&self, unit: UnitId) -> Result<TokenCode> {
        if !self.store.tokens_for_unit(unit).is_empty() {
            return Err(PlaqueError::Internal(format!("{unit} already has a token")));
        }
        allocate_random_with_retry(
            UniqueKey::TokenCode,
            self.max_token_code_attempts,
            || self.ids.lock().next_token_code(),
            |code: TokenCode| {
                self.store.insert_token(Token::bound(code.clone(), unit))?;
                Ok(code)
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use plaque_store::ScriptedIdSource;
    use plaque_store::allocator::shared;
    use plaque_types::HolderId;

    use super::*;
    use crate::collab::LocationTree;

    fn maintainer(
        config: &RegistryConfig,
        source: ScriptedIdSource,
    ) -> (MemoryStore, ReserveMaintainer) {
        let store = MemoryStore::new();
        let tree = Arc::new(LocationTree::new());
        tree.add_root(LocationId(1));
        tree.add_root(LocationId(2));
        let m = ReserveMaintainer::new(config, store.clone(), shared(source), tree);
        (store, m)
    }

    fn config(reserve_min: usize) -> RegistryConfig {
        RegistryConfig {
            reserve_min,
            ..RegistryConfig::default()
        }
    }

    #[test]
    fn ensure_reserve_fills_floor_with_tokens() {
        let cfg = config(3);
        let (store, m) = maintainer(&cfg, ScriptedIdSource::new(&cfg));

        let report = m.ensure_reserve(LocationId(1));
        assert_eq!(report.units_created, 3);
        assert_eq!(report.tokens_issued, 3);
        assert_eq!(report.failures, 0);
        assert_eq!(store.reserve_count(), 3);
        for unit in store.units() {
            assert_eq!(store.tokens_for_unit(unit.id).len(), 1);
        }

        assert_eq!(m.ensure_reserve(LocationId(1)), ReplenishReport::default());
    }

    #[test]
    fn ownership_tops_up_in_unit_location() {
        let cfg = config(2);
        let (store, m) = maintainer(&cfg, ScriptedIdSource::new(&cfg));
        let (unit, _) =
            store.create_unit_sequential(UnitDetails::reserve(LocationId(2)), None, true);
        let outcome = store
            .set_owner_override(unit.id, Some(HolderId::new()))
            .unwrap();

        let report = m.handle(outcome.events);
        assert_eq!(report.units_created, 2);
        assert_eq!(report.tokens_issued, 2);
        assert_eq!(store.reserve_count(), 2);
        assert!(
            store
                .units()
                .iter()
                .filter(|u| u.is_reserve())
                .all(|u| u.location == LocationId(2))
        );
    }

    #[test]
    fn admin_and_owned_units_get_no_token() {
        let cfg = config(0);
        let (store, m) = maintainer(&cfg, ScriptedIdSource::new(&cfg));
        let (admin, admin_events) =
            store.create_unit_sequential(UnitDetails::reserve(LocationId(1)), None, true);
        let (owned, owned_events) = store.create_unit_sequential(
            UnitDetails::reserve(LocationId(1)),
            Some(HolderId::new()),
            false,
        );

        let mut events = admin_events.events;
        events.extend(owned_events.events);
        let report = m.handle(events);
        assert_eq!(report.tokens_issued, 0);
        assert!(store.tokens_for_unit(admin.id).is_empty());
        assert!(store.tokens_for_unit(owned.id).is_empty());
    }

    #[test]
    fn token_code_collisions_are_redrawn() {
        let cfg = config(0);
        let (store, m) = maintainer(
            &cfg,
            ScriptedIdSource::new(&cfg).with_codes(["taken1", "taken1", "fresh1"]),
        );
        store
            .insert_token(Token::unbound(TokenCode::parse("taken1").unwrap()))
            .unwrap();
        let (unit, _) =
            store.create_unit_sequential(UnitDetails::reserve(LocationId(1)), None, false);

        let code = m.issue_token(unit.id).unwrap();
        assert_eq!(code.as_str(), "fresh1");
    }

    #[test]
    fn exhausted_code_allocation_is_counted_not_raised() {
        let cfg = RegistryConfig {
            reserve_min: 1,
            max_token_code_attempts: 2,
            ..RegistryConfig::default()
        };
        let (store, m) = maintainer(
            &cfg,
            ScriptedIdSource::new(&cfg).with_codes(["taken1", "taken1"]),
        );
        store
            .insert_token(Token::unbound(TokenCode::parse("taken1").unwrap()))
            .unwrap();

        let report = m.ensure_reserve(LocationId(1));
        assert_eq!(report.units_created, 1);
        assert_eq!(report.tokens_issued, 0);
        assert_eq!(report.failures, 1);
        assert_eq!(store.reserve_count(), 1);
    }

    #[test]
    fn retirement_replaces_at_location_or_default() {
        let cfg = RegistryConfig {
            reserve_min: 0,
            default_location: Some(LocationId(2)),
            ..RegistryConfig::default()
        };
        let (store, m) = maintainer(&cfg, ScriptedIdSource::new(&cfg));
        let token = Token::unbound(TokenCode::parse("abc123").unwrap());

        let report = m.handle(vec![
            StoreEvent::TokenRetired {
                token: token.clone(),
                location: Some(LocationId(1)),
            },
            StoreEvent::TokenRetired {
                token,
                location: None,
            },
        ]);
        assert_eq!(report.units_created, 2);
        assert_eq!(report.tokens_issued, 2);
        let mut locations: Vec<LocationId> = store.units().iter().map(|u| u.location).collect();
        locations.sort();
        assert_eq!(locations, vec![LocationId(1), LocationId(2)]);
    }

    #[test]
    fn unknown_trigger_location_falls_back_to_default() {
        let cfg = RegistryConfig {
            reserve_min: 3,
            default_location: Some(LocationId(1)),
            ..RegistryConfig::default()
        };
        let (store, m) = maintainer(&cfg, ScriptedIdSource::new(&cfg));
        let (unit, _) =
            store.create_unit_sequential(UnitDetails::reserve(LocationId(5)), None, true);
        let mut events = store
            .set_owner_override(unit.id, Some(HolderId::new()))
            .unwrap()
            .events;
        events.push(StoreEvent::TokenRetired {
            token: Token::unbound(TokenCode::parse("abc123").unwrap()),
            location: Some(LocationId(5)),
        });

        let report = m.handle(events);
        assert_eq!(report.units_created, 4);
        assert_eq!(report.tokens_issued, 4);
        assert_eq!(report.failures, 0);
        assert_eq!(store.reserve_count(), 4);
        assert!(
            store
                .units()
                .iter()
                .filter(|u| u.is_reserve())
                .all(|u| u.location == LocationId(1))
        );
    }

    #[test]
    fn unknown_default_location_is_a_failure() {
        let cfg = RegistryConfig {
            reserve_min: 2,
            default_location: Some(LocationId(7)),
            ..RegistryConfig::default()
        };
        let (store, m) = maintainer(&cfg, ScriptedIdSource::new(&cfg));
        let report = m.ensure_reserve(LocationId(42));
        assert_eq!(report.units_created, 0);
        assert_eq!(report.failures, 1);
        assert_eq!(store.reserve_count(), 0);
    }

    #[test]
    fn retirement_without_location_is_a_failure() {
        let cfg = config(0);
        let (store, m) = maintainer(&cfg, ScriptedIdSource::new(&cfg));
        let report = m.handle(vec![StoreEvent::TokenRetired {
            token: Token::unbound(TokenCode::parse("abc123").unwrap()),
            location: None,
        }]);
        assert_eq!(report.failures, 1);
        assert!(store.units().is_empty());
    }

    #[test]
    fn unknown_location_is_a_failure() {
        let cfg = config(2);
        let (store, m) = maintainer(&cfg, ScriptedIdSource::new(&cfg));
        let report = m.ensure_reserve(LocationId(42));
        assert_eq!(report.units_created, 0);
        assert_eq!(report.failures, 1);
        assert_eq!(store.reserve_count(), 0);
    }
}
