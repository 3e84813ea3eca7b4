//! Scan records: the append-only audit trail of token presentations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{HolderId, ScanId, TokenCode};

/// One presentation of a token. Never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub id: ScanId,
    pub token: TokenCode,
    /// `None` for anonymous presentations.
    pub holder: Option<HolderId>,
    /// Network origin of the presentation (e.g. client IP).
    pub origin: Option<String>,
    pub scanned_at: DateTime<Utc>,
}

/// A scan staged inside a transaction; it gets its id at commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingScan {
    pub token: TokenCode,
    pub holder: Option<HolderId>,
    pub origin: Option<String>,
}

impl PendingScan {
    /// Stamp the pending scan with its final id.
    #[must_use]
    pub fn into_record(self, id: ScanId) -> ScanRecord {
        ScanRecord {
            id,
            token: self.token,
            holder: self.holder,
            origin: self.origin,
            scanned_at: Utc::now(),
        }
    }
}
