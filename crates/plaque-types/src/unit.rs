//! Units: the addressable records a token can be claimed against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{HolderId, LocationId, PlaqueError, Result, UnitId};

/// Caller-supplied description of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDetails {
    /// Free-text street address.
    pub address: String,
    /// Apartment / door / plot number within the address.
    pub sub_identifier: String,
    /// Leaf of the location hierarchy the unit sits in.
    pub location: LocationId,
}

impl UnitDetails {
    #[must_use]
    pub fn new(
        address: impl Into<String>,
        sub_identifier: impl Into<String>,
        location: LocationId,
    ) -> Self {
        Self {
            address: address.into(),
            sub_identifier: sub_identifier.into(),
            location,
        }
    }

    /// Details for a placeholder reserve unit at `location`.
    #[must_use]
    pub fn reserve(location: LocationId) -> Self {
        Self::new("", "", location)
    }

    /// Check details submitted by a claimant.
    ///
    /// # Errors
    /// Returns [`PlaqueError::InvalidUnitDetails`] for a blank address.
    pub fn validate_for_claim(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(PlaqueError::InvalidUnitDetails {
                reason: "address must not be blank".into(),
            });
        }
        Ok(())
    }
}

/// Profile fields of a holder, forwarded to the holder directory on claim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderProfile {
    pub first_name: String,
    pub last_name: String,
}

/// A unit (house). Unowned units form the reserve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    /// `None` means the unit is in reserve and claimable.
    pub owner: Option<HolderId>,
    pub location: LocationId,
    pub address: String,
    pub sub_identifier: String,
    /// Created through the administrative path; suppresses auto-token issuance.
    pub admin_created: bool,
    pub created_at: DateTime<Utc>,
}

impl Unit {
    /// Build a unit row from details.
    #[must_use]
    pub fn new(id: UnitId, details: UnitDetails, owner: Option<HolderId>) -> Self {
        Self {
            id,
            owner,
            location: details.location,
            address: details.address,
            sub_identifier: details.sub_identifier,
            admin_created: false,
            created_at: Utc::now(),
        }
    }

    /// Mark the unit as created by an administrator.
    #[must_use]
    pub fn admin(mut self) -> Self {
        self.admin_created = true;
        self
    }

    #[must_use]
    pub fn is_reserve(&self) -> bool {
        self.owner.is_none()
    }

    /// Overwrite the descriptive fields in place.
    pub fn apply_details(&mut self, details: &UnitDetails) {
        self.address.clone_from(&details.address);
        self.sub_identifier.clone_from(&details.sub_identifier);
        self.location = details.location;
    }
}
