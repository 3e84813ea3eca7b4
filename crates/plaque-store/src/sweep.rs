//! Orphan sweep: repair token→unit references that break the one-to-one
//! binding.
//!
//! Two kinds of damage are repaired, in this order:
//!
//! 1. **Dangling**: the referenced unit no longer exists. The reference is
//!    cleared so the next claim creates a fresh unit.
//! 2. **Duplicate**: several tokens reference the same unit. The oldest token
//!    (by `created_at`, then code) keeps the reference; the rest are cleared.
//!
//! The sweep runs under the tables mutex and only *tries* each row lock.
//! A token whose lock is held belongs to an in-flight claim and is left
//! alone; the claim's own commit checks cover it.

use std::collections::BTreeMap;

use plaque_types::{SweepReport, TokenCode, UnitId};
use tracing::{info, warn};

use crate::store::MemoryStore;

impl MemoryStore {
    /// Clear dangling and duplicate token references.
    ///
    /// Idempotent: a second sweep over an unchanged store clears nothing.
    pub fn sweep_orphans(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let mut tables = self.shared.tables.lock();

        let dangling: Vec<TokenCode> = tables
            .tokens
            .values()
            .filter(|t| t.unit.is_some_and(|u| !tables.units.contains_key(&u)))
            .map(|t| t.code.clone())
            .collect();

        for code in dangling {
            let Some(_guard) = self.shared.try_row_lock(&code) else {
                report.skipped_locked += 1;
                continue;
            };
            if let Some(token) = tables.tokens.get_mut(&code) {
                warn!(token = %code, unit = ?token.unit, "clearing dangling unit reference");
                token.unit = None;
                report.dangling_cleared += 1;
            }
        }

        let mut by_unit: BTreeMap<UnitId, Vec<(chrono::DateTime<chrono::Utc>, TokenCode)>> =
            BTreeMap::new();
        for token in tables.tokens.values() {
            if let Some(unit) = token.unit {
                by_unit
                    .entry(unit)
                    .or_default()
                    .push((token.created_at, token.code.clone()));
            }
        }

        for (unit, mut refs) in by_unit {
            if refs.len() < 2 {
                continue;
            }
            refs.sort();
            for (_, code) in refs.into_iter().skip(1) {
                let Some(_guard) = self.shared.try_row_lock(&code) else {
                    report.skipped_locked += 1;
                    continue;
                };
                if let Some(token) = tables.tokens.get_mut(&code) {
                    warn!(token = %code, %unit, "clearing duplicate unit reference");
                    token.unit = None;
                    report.duplicates_cleared += 1;
                }
            }
        }
        drop(tables);

        if report.cleared_references() > 0 || report.skipped_locked > 0 {
            info!(
                dangling = report.dangling_cleared,
                duplicates = report.duplicates_cleared,
                skipped = report.skipped_locked,
                "orphan sweep finished"
            );
        }
        report
    }
}
