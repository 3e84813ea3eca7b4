//! Identifiers used throughout Plaque.
//!
//! Token codes are short printable strings; unit, location and scan ids are
//! plain integers; holders are external identities keyed by UUIDv7.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{PlaqueError, constants};

// ---------------------------------------------------------------------------
// TokenCode
// ---------------------------------------------------------------------------

/// The printed, scannable code of a token.
///
/// Compact and URL-safe: 1..=64 characters drawn from `[A-Za-z0-9_-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TokenCode(String);

impl TokenCode {
    /// Validate and wrap a code.
    ///
    /// # Errors
    /// Returns [`PlaqueError::InvalidTokenCode`] if the code is empty, too
    /// long, or contains characters outside the URL-safe alphabet.
    pub fn parse(code: impl Into<String>) -> crate::Result<Self> {
        let code = code.into();
        if code.is_empty() || code.len() > constants::MAX_TOKEN_CODE_LEN {
            return Err(PlaqueError::InvalidTokenCode {
                code,
                reason: format!("length must be 1..={}", constants::MAX_TOKEN_CODE_LEN),
            });
        }
        let bad = code
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'));
        if let Some(bad) = bad {
            return Err(PlaqueError::InvalidTokenCode {
                reason: format!("character {bad:?} is not URL-safe"),
                code,
            });
        }
        Ok(Self(code))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TokenCode {
    type Error = PlaqueError;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(value)
    }
}

impl From<TokenCode> for String {
    fn from(code: TokenCode) -> Self {
        code.0
    }
}

impl fmt::Display for TokenCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// UnitId
// ---------------------------------------------------------------------------

/// Identifier of a unit (an addressable record, e.g. a house).
///
/// Administrative units get small gap-filled ids starting at 1; units
/// created during a claim get random ids from a wide keyspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct UnitId(pub u64);

impl UnitId {
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// HolderId
// ---------------------------------------------------------------------------

/// External identity of a holder. Uses UUIDv7 for time-ordered sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct HolderId(pub Uuid);

impl HolderId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for HolderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// LocationId
// ---------------------------------------------------------------------------

/// Node of the external location hierarchy (region / district / neighborhood).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct LocationId(pub u64);

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loc:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ScanId
// ---------------------------------------------------------------------------

/// Sequential identifier of a scan record, assigned at commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ScanId(pub u64);

impl ScanId {
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scan:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_code_accepts_url_safe() {
        let code = TokenCode::parse("abc123").unwrap();
        assert_eq!(code.as_str(), "abc123");
        assert!(TokenCode::parse("A-b_9").is_ok());
    }

    #[test]
    fn token_code_rejects_bad_input() {
        assert!(TokenCode::parse("").is_err());
        assert!(TokenCode::parse("has space").is_err());
        assert!(TokenCode::parse("slash/y").is_err());
        assert!(TokenCode::parse("x".repeat(65)).is_err());
    }

    #[test]
    fn token_code_deserialize_validates() {
        let ok: TokenCode = serde_json::from_str("\"abc123\"").unwrap();
        assert_eq!(ok.to_string(), "abc123");
        assert!(serde_json::from_str::<TokenCode>("\"no way\"").is_err());
    }

    #[test]
    fn holder_id_uniqueness_and_ordering() {
        let a = HolderId::new();
        let b = HolderId::new();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn scan_id_next() {
        assert_eq!(ScanId(5).next(), ScanId(6));
    }

    #[test]
    fn display_prefixes() {
        assert_eq!(UnitId(7).to_string(), "unit:7");
        assert_eq!(LocationId(3).to_string(), "loc:3");
        assert_eq!(ScanId(1).to_string(), "scan:1");
    }
}
