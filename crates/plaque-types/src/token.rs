//! # Token: the printed code a holder presents
//!
//! ## Lifecycle
//!
//! ```text
//!   provisioned (unbound) ──claim──▶ bound ──deliver──▶ retired
//!   issued for a reserve unit ─────▶ bound ──deliver──▶ retired
//! ```
//!
//! A token references at most one unit and a unit is referenced by at most
//! one token. Retirement is terminal and never clears the binding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{TokenCode, UnitId};

/// A scannable token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// The printed code.
    pub code: TokenCode,
    /// The unit this token is bound to, if any. May dangle after an
    /// out-of-band unit deletion until the orphan sweep clears it.
    pub unit: Option<UnitId>,
    /// Set on the first presentation.
    pub presented: bool,
    /// When the token was physically delivered (terminal handoff).
    pub retired_at: Option<DateTime<Utc>>,
    /// When the token was created.
    pub created_at: DateTime<Utc>,
}

impl Token {
    /// A pre-provisioned token with no unit.
    #[must_use]
    pub fn unbound(code: TokenCode) -> Self {
        Self {
            code,
            unit: None,
            presented: false,
            retired_at: None,
            created_at: Utc::now(),
        }
    }

    /// A token bound to `unit` at birth.
    #[must_use]
    pub fn bound(code: TokenCode, unit: UnitId) -> Self {
        Self {
            unit: Some(unit),
            ..Self::unbound(code)
        }
    }

    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.retired_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbound_token_defaults() {
        let t = Token::unbound(TokenCode::parse("abc123").unwrap());
        assert_eq!(t.unit, None);
        assert!(!t.presented);
        assert!(!t.is_retired());
    }

    #[test]
    fn bound_token_references_unit() {
        let t = Token::bound(TokenCode::parse("abc123").unwrap(), UnitId(4));
        assert_eq!(t.unit, Some(UnitId(4)));
    }
}
