//! Append-only credential collection, frozen into a
//! [`CredentialBook`](super::CredentialBook).

use super::{V0Credential, V1Credential};
use crate::config::{contract_violation, GlobalConfig, PanicReason};
use crate::core::handle_map::{Handle, HandleClass, HandleMap};
use crate::error::Result;
use once_cell::sync::Lazy;
use tracing::debug;

#[derive(Default)]
pub(crate) struct SlabContents {
    pub(crate) v0: Vec<V0Credential>,
    pub(crate) v1: Vec<V1Credential>,
}

static SLABS: Lazy<HandleMap<SlabContents>> = Lazy::new(|| {
    HandleMap::with_max_active(
        HandleClass::CredentialSlab,
        GlobalConfig::max_handles(HandleClass::CredentialSlab),
    )
});

pub(crate) fn live_handles() -> u32 {
    SLABS.live_count()
}

/// Mutable, move-only credential collection.
///
/// Occupies one credential-slab slot until dropped or consumed by
/// [`CredentialBook::try_create_from_slab`](super::CredentialBook::try_create_from_slab).
///
/// A consumed slab cannot be used again:
/// ```compile_fail
/// use presence_protocol::credential::{CredentialBook, CredentialSlab};
///
/// let slab = CredentialSlab::create().unwrap();
/// let _book = CredentialBook::try_create_from_slab(slab).unwrap();
/// let _again = CredentialBook::try_create_from_slab(slab);
/// ```
#[derive(Debug)]
pub struct CredentialSlab {
    handle: Handle,
}

impl CredentialSlab {
    /// Allocate an empty slab.
    ///
    /// # Errors
    /// [`PresenceError::ResourceExhausted`](crate::error::PresenceError::ResourceExhausted)
    /// if the configured number of slabs is already live.
    pub fn create() -> Result<Self> {
        let handle = SLABS.allocate(SlabContents::default)?;
        debug!(slot = handle.index(), "Credential slab created");
        Ok(Self { handle })
    }

    /// Append a V0 credential.
    ///
    /// Never fails today; the `Result` keeps room for per-slab limits
    /// without changing the signature.
    pub fn add_v0_credential(&mut self, credential: V0Credential) -> Result<()> {
        self.with_contents(|contents| contents.v0.push(credential));
        Ok(())
    }

    /// Append a V1 credential. Never fails today, like [`Self::add_v0_credential`].
    pub fn add_v1_credential(&mut self, credential: V1Credential) -> Result<()> {
        self.with_contents(|contents| contents.v1.push(credential));
        Ok(())
    }

    /// Number of V0 and V1 credentials added so far
    pub fn num_credentials(&self) -> (usize, usize) {
        SLABS
            .get(self.handle, |contents| (contents.v0.len(), contents.v1.len()))
            .unwrap_or_else(|_| contract_violation(PanicReason::InvalidStackDataStructure))
    }

    fn with_contents<F: FnOnce(&mut SlabContents)>(&mut self, f: F) {
        SLABS
            .get_mut(self.handle, f)
            .unwrap_or_else(|_| contract_violation(PanicReason::InvalidStackDataStructure));
    }

    /// Release the slot and hand back its credentials
    pub(crate) fn take_contents(self) -> SlabContents {
        let handle = self.handle;
        std::mem::forget(self);
        SLABS
            .deallocate(handle)
            .unwrap_or_else(|_| contract_violation(PanicReason::InvalidStackDataStructure))
    }
}

impl Drop for CredentialSlab {
    fn drop(&mut self) {
        SLABS.release(self.handle);
    }
}
