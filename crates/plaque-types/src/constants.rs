//! System-wide constants for the Plaque registry.

/// Minimum number of unowned units kept in reserve (default).
pub const DEFAULT_RESERVE_MIN: usize = 10;

/// Maximum claim transactions attempted before giving up (default).
pub const DEFAULT_MAX_CLAIM_ATTEMPTS: u32 = 50;

/// Wall-clock cap for a single claim attempt in milliseconds (default).
pub const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 5_000;

/// Lower bound of the random unit-id keyspace (10 digits).
pub const DEFAULT_UNIT_ID_MIN: u64 = 1_000_000_000;

/// Upper bound (inclusive) of the random unit-id keyspace.
pub const DEFAULT_UNIT_ID_MAX: u64 = 9_999_999_999;

/// Length of generated token codes.
pub const DEFAULT_TOKEN_CODE_LEN: usize = 12;

/// Shortest token code length accepted by configuration.
pub const MIN_TOKEN_CODE_LEN: usize = 6;

/// Longest token code accepted anywhere (generated or provisioned).
pub const MAX_TOKEN_CODE_LEN: usize = 64;

/// Collisions tolerated when generating a fresh token code.
pub const DEFAULT_MAX_TOKEN_CODE_ATTEMPTS: u32 = 16;

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Registry name.
pub const REGISTRY_NAME: &str = "Plaque";
