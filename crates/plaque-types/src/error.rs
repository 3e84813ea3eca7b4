//! Error types for the Plaque registry.
//!
//! All errors use the `PQ_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Token / claim errors
//! - 2xx: Allocation errors
//! - 3xx: Storage errors
//! - 4xx: Request validation errors
//! - 5xx: External collaborator errors
//! - 9xx: General / internal errors
//!
//! [`PlaqueError::class`] folds the codes into the coarse taxonomy callers
//! act on (conflict vs. not-found vs. transient vs. server-side failure).

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{HolderId, LocationId, TokenCode, UnitId};

/// Which uniqueness constraint a write ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UniqueKey {
    /// Primary key of the unit table.
    UnitId,
    /// Primary key of the token table.
    TokenCode,
}

impl fmt::Display for UniqueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnitId => write!(f, "unit.id"),
            Self::TokenCode => write!(f, "token.code"),
        }
    }
}

/// Coarse classification of an error, used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Expected semantic conflict (already claimed). Never retried.
    Conflict,
    /// Unknown token or unit.
    NotFound,
    /// Malformed or inconsistent request.
    Invalid,
    /// Identifier collision or contention. Retried internally.
    TransientCollision,
    /// Retry budget spent: systemic contention, not a double-claim.
    Exhausted,
    /// Anything else from the persistence layer. Aborted immediately.
    StorageFailure,
    /// An external collaborator misbehaved.
    Collaborator,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict => write!(f, "CONFLICT"),
            Self::NotFound => write!(f, "NOT_FOUND"),
            Self::Invalid => write!(f, "INVALID"),
            Self::TransientCollision => write!(f, "TRANSIENT_COLLISION"),
            Self::Exhausted => write!(f, "EXHAUSTED"),
            Self::StorageFailure => write!(f, "STORAGE_FAILURE"),
            Self::Collaborator => write!(f, "COLLABORATOR"),
        }
    }
}

/// Central error enum for all Plaque operations.
#[derive(Debug, Error)]
pub enum PlaqueError {
    // =================================================================
    // Token / Claim Errors (1xx)
    // =================================================================
    /// No token with this code exists.
    #[error("PQ_ERR_100: Token not found: {0}")]
    TokenNotFound(TokenCode),

    /// The presenting holder already owns the token's unit.
    #[error("PQ_ERR_101: Token {token} already claimed by this holder ({unit})")]
    AlreadyClaimedBySelf { token: TokenCode, unit: UnitId },

    /// Another holder owns the token's unit.
    #[error("PQ_ERR_102: Token {token} already claimed by another holder ({unit})")]
    AlreadyClaimedByOther { token: TokenCode, unit: UnitId },

    /// The token has been delivered / retired.
    #[error("PQ_ERR_103: Token already retired: {0}")]
    TokenAlreadyRetired(TokenCode),

    /// No unit with this id exists.
    #[error("PQ_ERR_104: Unit not found: {0}")]
    UnitNotFound(UnitId),

    /// The token code is not a compact URL-safe string.
    #[error("PQ_ERR_105: Invalid token code {code:?}: {reason}")]
    InvalidTokenCode { code: String, reason: String },

    // =================================================================
    // Allocation Errors (2xx)
    // =================================================================
    /// Random allocation collided on every attempt.
    #[error("PQ_ERR_200: Allocation exhausted for {key} after {attempts} attempts")]
    AllocationExhausted { key: UniqueKey, attempts: u32 },

    /// The claim coordinator spent its whole attempt budget.
    #[error("PQ_ERR_201: Claim on {token} exhausted after {attempts} attempts")]
    ClaimExhausted { token: TokenCode, attempts: u32 },

    // =================================================================
    // Storage Errors (3xx)
    // =================================================================
    /// A write violated a uniqueness constraint.
    #[error("PQ_ERR_300: Unique violation on {key}: {value}")]
    UniqueViolation { key: UniqueKey, value: String },

    /// A unit changed owner, or was deleted, between the unlocked read and
    /// the commit.
    #[error("PQ_ERR_301: Stale read of {unit}: changed or deleted before commit")]
    StaleRead { unit: UnitId },

    /// A token row updated by the transaction no longer exists.
    #[error("PQ_ERR_302: Row vanished before commit: {row}")]
    RowVanished { row: String },

    /// Waiting for a token row lock took too long.
    #[error("PQ_ERR_303: Lock wait timed out on token {token}")]
    LockTimeout { token: TokenCode },

    /// Unclassified storage failure.
    #[error("PQ_ERR_304: Storage failure: {0}")]
    Storage(String),

    // =================================================================
    // Validation Errors (4xx)
    // =================================================================
    /// The holder identity is not known to the holder directory.
    #[error("PQ_ERR_400: Unknown holder: {0}")]
    UnknownHolder(HolderId),

    /// The location does not exist in the hierarchy.
    #[error("PQ_ERR_401: Unknown location: {0}")]
    UnknownLocation(LocationId),

    /// The location exists but is not inside the expected ancestor.
    #[error("PQ_ERR_402: Location {location} is not within {within}")]
    LocationMismatch {
        location: LocationId,
        within: LocationId,
    },

    /// Unit details failed validation.
    #[error("PQ_ERR_403: Invalid unit details: {reason}")]
    InvalidUnitDetails { reason: String },

    // =================================================================
    // Collaborator Errors (5xx)
    // =================================================================
    /// The post-claim notification hook failed.
    #[error("PQ_ERR_500: Notification failed: {reason}")]
    Notification { reason: String },

    /// The holder directory rejected a profile update.
    #[error("PQ_ERR_501: Holder directory failure: {reason}")]
    HolderDirectory { reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("PQ_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("PQ_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, bad values, etc.).
    #[error("PQ_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// I/O error.
    #[error("PQ_ERR_903: I/O error: {0}")]
    Io(String),
}

impl PlaqueError {
    /// Map this error onto the coarse taxonomy.
    ///
    /// Only a unique violation on the unit id is a transient collision: that
    /// is the random allocator losing a race. The same violation on any
    /// other key means the write itself is wrong.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::AlreadyClaimedBySelf { .. }
            | Self::AlreadyClaimedByOther { .. }
            | Self::TokenAlreadyRetired(_) => ErrorClass::Conflict,
            Self::TokenNotFound(_) | Self::UnitNotFound(_) => ErrorClass::NotFound,
            Self::InvalidTokenCode { .. }
            | Self::UnknownHolder(_)
            | Self::UnknownLocation(_)
            | Self::LocationMismatch { .. }
            | Self::InvalidUnitDetails { .. } => ErrorClass::Invalid,
            Self::UniqueViolation {
                key: UniqueKey::UnitId,
                ..
            }
            | Self::StaleRead { .. }
            | Self::LockTimeout { .. } => ErrorClass::TransientCollision,
            Self::AllocationExhausted { .. } | Self::ClaimExhausted { .. } => {
                ErrorClass::Exhausted
            }
            Self::Notification { .. } | Self::HolderDirectory { .. } => ErrorClass::Collaborator,
            Self::UniqueViolation { .. }
            | Self::RowVanished { .. }
            | Self::Storage(_)
            | Self::Internal(_)
            | Self::Serialization(_)
            | Self::Configuration(_)
            | Self::Io(_) => ErrorClass::StorageFailure,
        }
    }

    /// Whether a fresh attempt may succeed where this one failed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::TransientCollision
    }

    /// Whether this error is the caller's problem (4xx-equivalent).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Conflict | ErrorClass::NotFound | ErrorClass::Invalid
        )
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, PlaqueError>;

impl From<std::io::Error> for PlaqueError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PlaqueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code() -> TokenCode {
        TokenCode::parse("abc123").unwrap()
    }

    #[test]
    fn error_display_contains_prefix() {
        let err = PlaqueError::TokenNotFound(code());
        let msg = format!("{err}");
        assert!(msg.starts_with("PQ_ERR_100"), "Got: {msg}");
        assert!(msg.contains("abc123"));
    }

    #[test]
    fn conflicts_are_client_errors_and_not_retried() {
        let by_other = PlaqueError::AlreadyClaimedByOther {
            token: code(),
            unit: UnitId(1),
        };
        let by_self = PlaqueError::AlreadyClaimedBySelf {
            token: code(),
            unit: UnitId(1),
        };
        for err in [by_other, by_self] {
            assert_eq!(err.class(), ErrorClass::Conflict);
            assert!(err.is_client_error());
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn only_unit_id_collisions_are_transient() {
        let unit = PlaqueError::UniqueViolation {
            key: UniqueKey::UnitId,
            value: "1234567890".into(),
        };
        assert!(unit.is_retryable());

        let token = PlaqueError::UniqueViolation {
            key: UniqueKey::TokenCode,
            value: "abc123".into(),
        };
        assert!(!token.is_retryable());
        assert_eq!(token.class(), ErrorClass::StorageFailure);
    }

    #[test]
    fn exhaustion_is_server_side() {
        let err = PlaqueError::ClaimExhausted {
            token: code(),
            attempts: 50,
        };
        assert_eq!(err.class(), ErrorClass::Exhausted);
        assert!(!err.is_client_error());
        assert!(!err.is_retryable());
        assert!(format!("{err}").contains("50"));
    }

    #[test]
    fn all_errors_have_pq_err_prefix() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(PlaqueError::UnitNotFound(UnitId(3))),
            Box::new(PlaqueError::StaleRead { unit: UnitId(3) }),
            Box::new(PlaqueError::UnknownLocation(LocationId(9))),
            Box::new(PlaqueError::Internal("test".into())),
            Box::new(PlaqueError::AllocationExhausted {
                key: UniqueKey::TokenCode,
                attempts: 4,
            }),
        ];
        for err in errors {
            let msg = format!("{err}");
            assert!(
                msg.starts_with("PQ_ERR_"),
                "Error missing PQ_ERR_ prefix: {msg}"
            );
        }
    }
}
