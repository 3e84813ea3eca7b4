//! Command-line options.

use std::path::PathBuf;

use plaque_types::{PlaqueError, RegistryConfig, Result};

/// Simulation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimOptions {
    /// JSON registry config. Defaults apply when absent.
    pub config: Option<PathBuf>,
    /// Emit logs as JSON lines instead of human-readable text.
    pub json_logs: bool,
    pub holders: usize,
    /// Unbound tokens provisioned before the run.
    pub unbound_tokens: usize,
    /// Claims attempted per holder.
    pub claims_per_holder: usize,
    /// Claimed tokens retired after the claim phase.
    pub retirements: usize,
    pub seed: u64,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            config: None,
            json_logs: false,
            holders: 16,
            unbound_tokens: 8,
            claims_per_holder: 2,
            retirements: 4,
            seed: 7,
        }
    }
}

const USAGE: &str = "usage: plaque-sim [--config PATH] [--json-logs] [--holders N] \
                     [--unbound-tokens N] [--claims-per-holder N] [--retirements N] [--seed N]";

impl SimOptions {
    /// Parse arguments (without the program name).
    ///
    /// # Errors
    /// `Configuration` for unknown flags, missing values, or bad numbers.
    pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut opts = Self::default();
        let mut args = args.into_iter();
        while let Some(flag) = args.next() {
            match flag.as_str() {
                "--json-logs" => opts.json_logs = true,
                "--config" => opts.config = Some(PathBuf::from(value(&flag, args.next())?)),
                "--holders" => opts.holders = number(&flag, args.next())?,
                "--unbound-tokens" => opts.unbound_tokens = number(&flag, args.next())?,
                "--claims-per-holder" => opts.claims_per_holder = number(&flag, args.next())?,
                "--retirements" => opts.retirements = number(&flag, args.next())?,
                "--seed" => opts.seed = number(&flag, args.next())?,
                other => {
                    return Err(PlaqueError::Configuration(format!(
                        "unknown argument {other:?}\n{USAGE}"
                    )));
                }
            }
        }
        Ok(opts)
    }

    /// Load the registry config named by `--config`, or the defaults.
    ///
    /// # Errors
    /// `Io` if the file can't be read, `Serialization` / `Configuration` if
    /// it doesn't parse or validate.
    pub fn registry_config(&self) -> Result<RegistryConfig> {
        match &self.config {
            Some(path) => RegistryConfig::from_json_str(&std::fs::read_to_string(path)?),
            None => Ok(RegistryConfig::default()),
        }
    }
}

fn value(flag: &str, next: Option<String>) -> Result<String> {
    next.ok_or_else(|| PlaqueError::Configuration(format!("{flag} needs a value\n{USAGE}")))
}

fn number<T: std::str::FromStr>(flag: &str, next: Option<String>) -> Result<T> {
    let raw = value(flag, next)?;
    raw.parse()
        .map_err(|_| PlaqueError::Configuration(format!("{flag}: {raw:?} is not a number")))
}
