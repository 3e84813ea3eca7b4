//! Identifier allocation.
//!
//! Two policies, picked by creation context:
//!
//! - **Gap-filling** ([`smallest_unused`]): the smallest positive integer not
//!   in use. O(n) in existing rows. The store only runs it inside its write
//!   critical section, so two callers can never compute the same value.
//! - **Random wide-keyspace** ([`IdSource`] + [`allocate_random_with_retry`]):
//!   draw from a 10-digit range, insert speculatively, redraw on a unique
//!   violation. Used on the claim path so concurrent claimants never queue
//!   on a shared "next id".
//!
//! Token codes use the random policy as well.

use std::collections::HashSet;
use std::fmt::Display;
use std::sync::Arc;

use parking_lot::Mutex;
use plaque_types::{IdSpace, PlaqueError, RegistryConfig, Result, TokenCode, UniqueKey, UnitId};
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Entity tables that use gap-filling allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Unit,
    Scan,
}

/// Smallest positive integer not present in `ids`.
pub fn smallest_unused(ids: impl IntoIterator<Item = u64>) -> u64 {
    let used: HashSet<u64> = ids.into_iter().filter(|&id| id > 0).collect();
    let mut candidate = 1;
    while used.contains(&candidate) {
        candidate += 1;
    }
    candidate
}

// ---------------------------------------------------------------------------
// Random sources
// ---------------------------------------------------------------------------

/// Source of random identifiers.
pub trait IdSource: Send {
    /// A candidate unit id from the wide keyspace.
    fn next_unit_id(&mut self) -> UnitId;

    /// A candidate token code.
    fn next_token_code(&mut self) -> Result<TokenCode>;
}

/// An [`IdSource`] shared between the claim coordinator and the reserve
/// maintainer. Draws hold the mutex only for the draw itself.
pub type SharedIdSource = Arc<Mutex<Box<dyn IdSource>>>;

/// Wrap a source for sharing.
pub fn shared(source: impl IdSource + 'static) -> SharedIdSource {
    Arc::new(Mutex::new(Box::new(source)))
}

/// Uniform draws from a [`StdRng`].
pub struct RandomIdSource {
    rng: StdRng,
    space: IdSpace,
    code_len: usize,
}

impl RandomIdSource {
    /// Entropy-seeded source using the configured keyspace and code length.
    #[must_use]
    pub fn from_config(config: &RegistryConfig) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            space: config.unit_id_space,
            code_len: config.token_code_len,
        }
    }

    /// Deterministic source for simulations and tests.
    #[must_use]
    pub fn seeded(config: &RegistryConfig, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            space: config.unit_id_space,
            code_len: config.token_code_len,
        }
    }
}

impl IdSource for RandomIdSource {
    fn next_unit_id(&mut self) -> UnitId {
        UnitId(self.rng.gen_range(self.space.min..=self.space.max))
    }

    fn next_token_code(&mut self) -> Result<TokenCode> {
        let code: String = (&mut self.rng)
            .sample_iter(&Alphanumeric)
            .take(self.code_len)
            .map(char::from)
            .collect();
        TokenCode::parse(code)
    }
}

/// Replays scripted ids before falling back to a seeded random source.
/// Lets tests force collisions deterministically.
#[cfg(any(test, feature = "test-helpers"))]
pub struct ScriptedIdSource {
    units: std::collections::VecDeque<UnitId>,
    codes: std::collections::VecDeque<TokenCode>,
    fallback: RandomIdSource,
}

#[cfg(any(test, feature = "test-helpers"))]
impl ScriptedIdSource {
    #[must_use]
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            units: std::collections::VecDeque::new(),
            codes: std::collections::VecDeque::new(),
            fallback: RandomIdSource::seeded(config, 7),
        }
    }

    #[must_use]
    pub fn with_units(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.units.extend(ids.into_iter().map(UnitId));
        self
    }

    #[must_use]
    pub fn with_codes<'a>(mut self, codes: impl IntoIterator<Item = &'a str>) -> Self {
        self.codes.extend(
            codes
                .into_iter()
                .map(|c| TokenCode::parse(c).expect("scripted codes must be valid")),
        );
        self
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl IdSource for ScriptedIdSource {
    fn next_unit_id(&mut self) -> UnitId {
        self.units
            .pop_front()
            .unwrap_or_else(|| self.fallback.next_unit_id())
    }

    fn next_token_code(&mut self) -> Result<TokenCode> {
        match self.codes.pop_front() {
            Some(code) => Ok(code),
            None => self.fallback.next_token_code(),
        }
    }
}

// ---------------------------------------------------------------------------
// Retry driver
// ---------------------------------------------------------------------------

/// Draw a candidate, insert it speculatively, and redraw on a collision.
///
/// A collision is a [`PlaqueError::UniqueViolation`] on `key`. Any other
/// error aborts immediately. After `max_attempts` consecutive collisions the
/// result is [`PlaqueError::AllocationExhausted`]; the caller decides whether
/// to widen the keyspace or give up.
pub fn allocate_random_with_retry<I, T>(
    key: UniqueKey,
    max_attempts: u32,
    mut draw: impl FnMut() -> Result<I>,
    mut insert: impl FnMut(I) -> Result<T>,
) -> Result<T>
where
    I: Display,
{
    for attempt in 1..=max_attempts {
        let candidate = draw()?;
        let shown = candidate.to_string();
        match insert(candidate) {
            Ok(value) => return Ok(value),
            Err(PlaqueError::UniqueViolation { key: hit, .. }) if hit == key => {
                debug!(%key, candidate = %shown, attempt, "id collision, redrawing");
            }
            Err(err) => return Err(err),
        }
    }
    Err(PlaqueError::AllocationExhausted {
        key,
        attempts: max_attempts,
    })
}
