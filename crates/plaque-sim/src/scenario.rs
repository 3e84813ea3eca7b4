//! The simulated workload.
//!
//! Seeds a small location tree, a reserve and some unbound tokens, then lets
//! every holder race claims against randomly chosen tokens. Claimed tokens
//! are partly retired afterwards and the store is swept and audited.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use plaque_claim::{
    ClaimRequest, Collaborators, InMemoryHolders, LocationTree, LogNotifier, TokenRegistry,
};
use plaque_store::{MemoryStore, RandomIdSource};
use plaque_types::{
    ClaimReceipt, LocationId, PlaqueError, RegistryConfig, ReplenishReport, Result, SweepReport,
    TokenCode, UnitDetails,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::info;

use crate::options::SimOptions;

const CITY: LocationId = LocationId(1);
const DISTRICTS: [LocationId; 3] = [LocationId(2), LocationId(3), LocationId(4)];

/// Summary printed at the end of a run.
#[derive(Debug, Default, Serialize)]
pub struct SimReport {
    pub claims_attempted: usize,
    pub claims_succeeded: usize,
    pub units_created_by_claims: usize,
    /// Failed claims grouped by error class.
    pub failures_by_class: BTreeMap<String, usize>,
    pub retirements: usize,
    pub replenished_after_retirement: ReplenishReport,
    pub sweep: SweepReport,
    pub final_reserve: usize,
    pub total_units: usize,
    pub total_tokens: usize,
    pub total_scans: usize,
    /// No unit is referenced by two tokens.
    pub bindings_injective: bool,
}

fn location_tree() -> Result<LocationTree> {
    let tree = LocationTree::new();
    tree.add_root(CITY);
    for district in DISTRICTS {
        tree.add_child(district, CITY)?;
    }
    Ok(tree)
}

/// Run one simulation.
///
/// # Errors
/// Setup failures only. Individual claim failures are tallied in the report.
pub async fn run(opts: &SimOptions, config: RegistryConfig) -> Result<SimReport> {
    let holders = Arc::new(InMemoryHolders::new());
    let ids = RandomIdSource::seeded(&config, opts.seed);
    let registry = TokenRegistry::with_parts(
        config,
        Collaborators::new(
            holders.clone(),
            Arc::new(location_tree()?),
            Arc::new(LogNotifier),
        ),
        MemoryStore::new(),
        ids,
    )?;

    let seeded = registry.ensure_reserve(DISTRICTS[0])?;
    for _ in 0..opts.unbound_tokens {
        registry.provision_token(None)?;
    }
    let codes: Vec<TokenCode> = registry
        .store()
        .tokens()
        .into_iter()
        .map(|t| t.code)
        .collect();
    info!(
        reserve = seeded.units_created,
        unbound = opts.unbound_tokens,
        holders = opts.holders,
        "simulation seeded"
    );

    let mut report = SimReport::default();
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut claims = JoinSet::new();
    if !codes.is_empty() {
        for n in 0..opts.holders {
            let holder = holders.register_new();
            for _ in 0..opts.claims_per_holder {
                let code = codes[rng.gen_range(0..codes.len())].clone();
                let district = DISTRICTS[rng.gen_range(0..DISTRICTS.len())];
                let request = ClaimRequest::new(
                    code,
                    holder,
                    UnitDetails::new(format!("{n} Sim Street"), "", district),
                )
                .within(CITY)
                .with_origin(format!("10.0.0.{}", n % 250 + 1));
                let registry = registry.clone();
                claims.spawn(async move { registry.claim_token(request).await });
                report.claims_attempted += 1;
            }
        }
    }

    let mut receipts: Vec<ClaimReceipt> = Vec::new();
    while let Some(joined) = claims.join_next().await {
        let outcome = joined.map_err(|e| PlaqueError::Internal(format!("claim task: {e}")))?;
        match outcome {
            Ok(receipt) => receipts.push(receipt),
            Err(err) => {
                *report
                    .failures_by_class
                    .entry(err.class().to_string())
                    .or_default() += 1;
            }
        }
    }
    report.claims_succeeded = receipts.len();
    report.units_created_by_claims = receipts.iter().filter(|r| r.created_unit).count();

    for receipt in receipts.iter().take(opts.retirements) {
        let replenished = registry.retire_token(&receipt.token).await?;
        report.replenished_after_retirement.absorb(replenished);
        report.retirements += 1;
    }

    report.sweep = registry.sweep_orphans();

    let store = registry.store();
    let tokens = store.tokens();
    let mut referenced = HashSet::new();
    report.bindings_injective = tokens
        .iter()
        .filter_map(|t| t.unit)
        .all(|unit| referenced.insert(unit));
    report.final_reserve = store.reserve_count();
    report.total_units = store.units().len();
    report.total_tokens = tokens.len();
    report.total_scans = store.scan_count();

    info!(
        succeeded = report.claims_succeeded,
        attempted = report.claims_attempted,
        reserve = report.final_reserve,
        "simulation finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn small_run_keeps_invariants() {
        let opts = SimOptions {
            holders: 6,
            unbound_tokens: 3,
            claims_per_holder: 2,
            retirements: 2,
            ..SimOptions::default()
        };
        let config = RegistryConfig {
            reserve_min: 3,
            ..RegistryConfig::default()
        };

        let report = run(&opts, config).await.unwrap();
        assert_eq!(report.claims_attempted, 12);
        assert!(report.claims_succeeded >= 1);
        assert_eq!(
            report.claims_succeeded + report.failures_by_class.values().sum::<usize>(),
            12
        );
        assert!(report.bindings_injective);
        assert!(report.final_reserve >= 3);
        assert_eq!(report.sweep.cleared_references(), 0);
        assert!(!report.failures_by_class.contains_key("EXHAUSTED"));
    }
}
