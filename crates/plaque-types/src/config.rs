//! Configuration for a Plaque registry.
//!
//! Reserve size and retry budgets are construction-time settings handed to
//! the claim coordinator and reserve maintainer, never module globals.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{LocationId, PlaqueError, Result, UnitId, constants};

/// Inclusive range random unit ids are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdSpace {
    pub min: u64,
    pub max: u64,
}

impl IdSpace {
    #[must_use]
    pub fn contains(&self, id: UnitId) -> bool {
        (self.min..=self.max).contains(&id.0)
    }
}

impl Default for IdSpace {
    fn default() -> Self {
        Self {
            min: constants::DEFAULT_UNIT_ID_MIN,
            max: constants::DEFAULT_UNIT_ID_MAX,
        }
    }
}

/// Configuration for a registry instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Minimum number of unowned units kept claimable.
    pub reserve_min: usize,
    /// Claim transactions attempted before reporting exhaustion.
    pub max_claim_attempts: u32,
    /// Wall-clock cap per claim attempt. `None` disables the cap.
    pub attempt_timeout_ms: Option<u64>,
    /// Keyspace for units created during a claim.
    pub unit_id_space: IdSpace,
    /// Length of generated token codes.
    pub token_code_len: usize,
    /// Collisions tolerated when generating a token code.
    pub max_token_code_attempts: u32,
    /// Where replacement units go when the retired token had no unit.
    pub default_location: Option<LocationId>,
    /// Run the orphan sweep once before each claim's retry loop.
    pub sweep_before_claim: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            reserve_min: constants::DEFAULT_RESERVE_MIN,
            max_claim_attempts: constants::DEFAULT_MAX_CLAIM_ATTEMPTS,
            attempt_timeout_ms: Some(constants::DEFAULT_ATTEMPT_TIMEOUT_MS),
            unit_id_space: IdSpace::default(),
            token_code_len: constants::DEFAULT_TOKEN_CODE_LEN,
            max_token_code_attempts: constants::DEFAULT_MAX_TOKEN_CODE_ATTEMPTS,
            default_location: None,
            sweep_before_claim: true,
        }
    }
}

impl RegistryConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns `Serialization` for malformed JSON and `Configuration` for
    /// values that fail [`RegistryConfig::validate`].
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the registry cannot operate with.
    ///
    /// # Errors
    /// Returns [`PlaqueError::Configuration`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.max_claim_attempts == 0 {
            return Err(PlaqueError::Configuration(
                "max_claim_attempts must be > 0".into(),
            ));
        }
        if self.max_token_code_attempts == 0 {
            return Err(PlaqueError::Configuration(
                "max_token_code_attempts must be > 0".into(),
            ));
        }
        if self.unit_id_space.min == 0 || self.unit_id_space.min > self.unit_id_space.max {
            return Err(PlaqueError::Configuration(format!(
                "unit_id_space {}..={} must be non-empty and start above 0",
                self.unit_id_space.min, self.unit_id_space.max
            )));
        }
        if !(constants::MIN_TOKEN_CODE_LEN..=constants::MAX_TOKEN_CODE_LEN)
            .contains(&self.token_code_len)
        {
            return Err(PlaqueError::Configuration(format!(
                "token_code_len must be within {}..={}",
                constants::MIN_TOKEN_CODE_LEN,
                constants::MAX_TOKEN_CODE_LEN
            )));
        }
        if self.attempt_timeout_ms == Some(0) {
            return Err(PlaqueError::Configuration(
                "attempt_timeout_ms must be > 0 (use null to disable)".into(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }
}
