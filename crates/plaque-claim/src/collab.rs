//! Collaborator seams: holder identities, the location hierarchy, and the
//! post-claim notification hook.
//!
//! The registry only ever talks to these through trait objects. The
//! in-memory implementations back the simulation binary and the tests.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use plaque_types::{ClaimReceipt, HolderId, HolderProfile, LocationId, PlaqueError, Result};
use tracing::info;

/// Identity system for holders.
pub trait HolderDirectory: Send + Sync {
    /// Whether the identity exists.
    fn is_known(&self, holder: HolderId) -> bool;

    /// Store the profile fields submitted with a claim.
    ///
    /// # Errors
    /// Implementation-defined; callers log and ignore failures.
    fn update_profile(&self, holder: HolderId, profile: &HolderProfile) -> Result<()>;
}

/// Location hierarchy.
pub trait LocationDirectory: Send + Sync {
    fn exists(&self, location: LocationId) -> bool;

    /// Whether `location` is `ancestor` or lies beneath it.
    fn belongs_to(&self, location: LocationId, ancestor: LocationId) -> bool;
}

/// Best-effort hook fired after a claim commits.
pub trait ClaimNotifier: Send + Sync {
    /// # Errors
    /// Implementation-defined; a failure never affects the claim.
    fn claimed(&self, receipt: &ClaimReceipt) -> Result<()>;
}

/// The three collaborators a registry needs, bundled for construction.
#[derive(Clone)]
pub struct Collaborators {
    pub holders: Arc<dyn HolderDirectory>,
    pub locations: Arc<dyn LocationDirectory>,
    pub notifier: Arc<dyn ClaimNotifier>,
}

impl Collaborators {
    #[must_use]
    pub fn new(
        holders: Arc<dyn HolderDirectory>,
        locations: Arc<dyn LocationDirectory>,
        notifier: Arc<dyn ClaimNotifier>,
    ) -> Self {
        Self {
            holders,
            locations,
            notifier,
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

/// Holder directory backed by a map of registered identities.
#[derive(Debug, Default)]
pub struct InMemoryHolders {
    profiles: RwLock<HashMap<HolderId, HolderProfile>>,
}

impl InMemoryHolders {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a holder with an empty profile.
    pub fn register(&self, holder: HolderId) {
        self.profiles.write().entry(holder).or_default();
    }

    /// Register a fresh holder and return its id.
    pub fn register_new(&self) -> HolderId {
        let holder = HolderId::new();
        self.register(holder);
        holder
    }

    #[must_use]
    pub fn profile(&self, holder: HolderId) -> Option<HolderProfile> {
        self.profiles.read().get(&holder).cloned()
    }
}

impl HolderDirectory for InMemoryHolders {
    fn is_known(&self, holder: HolderId) -> bool {
        self.profiles.read().contains_key(&holder)
    }

    fn update_profile(&self, holder: HolderId, profile: &HolderProfile) -> Result<()> {
        let mut profiles = self.profiles.write();
        let entry = profiles
            .get_mut(&holder)
            .ok_or_else(|| PlaqueError::HolderDirectory {
                reason: format!("no profile for {holder}"),
            })?;
        entry.clone_from(profile);
        Ok(())
    }
}

/// Location hierarchy stored as child → parent links.
#[derive(Debug, Default)]
pub struct LocationTree {
    parents: RwLock<HashMap<LocationId, Option<LocationId>>>,
}

impl LocationTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_root(&self, location: LocationId) {
        self.parents.write().insert(location, None);
    }

    /// Add `location` beneath `parent`.
    ///
    /// # Errors
    /// `UnknownLocation` if the parent has not been added.
    pub fn add_child(&self, location: LocationId, parent: LocationId) -> Result<()> {
        let mut parents = self.parents.write();
        if !parents.contains_key(&parent) {
            return Err(PlaqueError::UnknownLocation(parent));
        }
        parents.insert(location, Some(parent));
        Ok(())
    }
}

impl LocationDirectory for LocationTree {
    fn exists(&self, location: LocationId) -> bool {
        self.parents.read().contains_key(&location)
    }

    fn belongs_to(&self, location: LocationId, ancestor: LocationId) -> bool {
        let parents = self.parents.read();
        let mut current = Some(location);
        // Bounded by the tree size so a malformed cycle cannot spin forever.
        for _ in 0..=parents.len() {
            match current {
                Some(id) if id == ancestor => return true,
                Some(id) => current = parents.get(&id).copied().flatten(),
                None => return false,
            }
        }
        false
    }
}

/// Notifier that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl ClaimNotifier for LogNotifier {
    fn claimed(&self, receipt: &ClaimReceipt) -> Result<()> {
        info!(
            token = %receipt.token,
            unit = %receipt.unit.id,
            holder = %receipt.holder,
            "claim notification"
        );
        Ok(())
    }
}
