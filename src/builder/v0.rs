//! V0 advertisement builder.

use crate::config::{contract_violation, GlobalConfig, PanicReason};
use crate::core::byte_buffer::RawAdvertisement;
use crate::core::handle_map::{Handle, HandleClass, HandleMap};
use crate::credential::V0BroadcastCredential;
use crate::error::{PresenceError, Result};
use crate::protocol::v0::{
    Flavor, V0DataElement, V0_HEADER_ENCRYPTED, V0_HEADER_PLAINTEXT, V0_IDENTITY_TOKEN_LEN,
    V0_MAX_ADV_LEN, V0_SALT_LEN,
};
use crate::utils::crypto::{self, KeySeed};
use crate::utils::metrics::global_metrics;
use bytes::{BufMut, BytesMut};
use once_cell::sync::Lazy;
use tracing::debug;

enum V0Encryption {
    Public,
    Encrypted {
        credential: V0BroadcastCredential,
        salt: [u8; V0_SALT_LEN],
    },
}

impl V0Encryption {
    /// Bytes preceding the data elements
    fn prefix_len(&self) -> usize {
        match self {
            V0Encryption::Public => 1,
            V0Encryption::Encrypted { .. } => 1 + V0_SALT_LEN + V0_IDENTITY_TOKEN_LEN,
        }
    }
}

struct V0BuilderState {
    encryption: V0Encryption,
    des: Vec<V0DataElement>,
    des_len: usize,
}

static BUILDERS: Lazy<HandleMap<V0BuilderState>> = Lazy::new(|| {
    HandleMap::with_max_active(
        HandleClass::V0AdvertisementBuilder,
        GlobalConfig::max_handles(HandleClass::V0AdvertisementBuilder),
    )
});

pub(crate) fn live_handles() -> u32 {
    BUILDERS.live_count()
}

/// Builds a single V0 advertisement.
///
/// Holds one V0-builder slot until serialized or dropped.
///
/// ```rust
/// use presence_protocol::builder::V0AdvertisementBuilder;
/// use presence_protocol::protocol::v0::{TxPower, V0DataElement};
///
/// let mut builder = V0AdvertisementBuilder::create_public()?;
/// builder.try_add_de(V0DataElement::TxPower(TxPower::try_build_from_i8(3)?))?;
/// assert_eq!(builder.try_serialize()?.as_slice(), &[0x00, 0x15, 0x03]);
/// # Ok::<(), presence_protocol::error::PresenceError>(())
/// ```
///
/// Serializing consumes the builder:
/// ```compile_fail
/// use presence_protocol::builder::V0AdvertisementBuilder;
///
/// let builder = V0AdvertisementBuilder::create_public().unwrap();
/// let _adv = builder.try_serialize();
/// let _flavor = builder.flavor();
/// ```
#[derive(Debug)]
pub struct V0AdvertisementBuilder {
    handle: Handle,
    flavor: Flavor,
}

impl V0AdvertisementBuilder {
    fn create(encryption: V0Encryption, flavor: Flavor) -> Result<Self> {
        let handle = BUILDERS.allocate(|| V0BuilderState {
            encryption,
            des: Vec::new(),
            des_len: 0,
        })?;
        debug!(slot = handle.index(), %flavor, "V0 advertisement builder created");
        Ok(Self { handle, flavor })
    }

    /// Builder for a plaintext advertisement
    pub fn create_public() -> Result<Self> {
        Self::create(V0Encryption::Public, Flavor::Public)
    }

    /// Builder for an advertisement encrypted to `credential` under `salt`
    pub fn create_encrypted(credential: V0BroadcastCredential, salt: [u8; V0_SALT_LEN]) -> Result<Self> {
        Self::create(V0Encryption::Encrypted { credential, salt }, Flavor::Private)
    }

    /// Like [`Self::create_encrypted`], with a salt from the system random source
    pub fn create_encrypted_with_random_salt(credential: V0BroadcastCredential) -> Result<Self> {
        Self::create_encrypted(credential, crypto::random_bytes()?)
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    /// Append a data element.
    ///
    /// # Errors
    /// Fails without modifying the builder if the element's flavor differs
    /// from the advertisement's, or if it would not fit.
    pub fn try_add_de(&mut self, de: V0DataElement) -> Result<()> {
        if let Some(de_flavor) = de.flavor() {
            if de_flavor != self.flavor {
                return Err(PresenceError::DataElementFlavorMismatch {
                    de: de_flavor,
                    adv: self.flavor,
                });
            }
        }

        BUILDERS
            .get_mut(self.handle, |state| {
                let requested = de.encoded_len();
                if state.encryption.prefix_len() + state.des_len + requested > V0_MAX_ADV_LEN {
                    return Err(PresenceError::AdvertisementFull {
                        requested,
                        max: V0_MAX_ADV_LEN,
                    });
                }
                state.des.push(de);
                state.des_len += requested;
                Ok(())
            })
            .unwrap_or_else(|_| contract_violation(PanicReason::InvalidStackDataStructure))
    }

    /// Encode the advertisement, releasing the builder's slot.
    ///
    /// # Errors
    /// [`PresenceError::EmptyAdvertisement`] if no data element was added.
    pub fn try_serialize(self) -> Result<RawAdvertisement> {
        let handle = self.handle;
        std::mem::forget(self);
        let state = BUILDERS
            .deallocate(handle)
            .unwrap_or_else(|_| contract_violation(PanicReason::InvalidStackDataStructure));

        if state.des.is_empty() {
            return Err(PresenceError::EmptyAdvertisement);
        }

        let mut des = BytesMut::with_capacity(state.des_len);
        for de in &state.des {
            de.encode(&mut des);
        }

        let mut adv = BytesMut::with_capacity(V0_MAX_ADV_LEN);
        match &state.encryption {
            V0Encryption::Public => {
                adv.put_u8(V0_HEADER_PLAINTEXT);
                adv.put_slice(&des);
            }
            V0Encryption::Encrypted { credential, salt } => {
                let mut plaintext = BytesMut::with_capacity(V0_IDENTITY_TOKEN_LEN + des.len());
                plaintext.put_slice(credential.identity_token());
                plaintext.put_slice(&des);

                let keystream = KeySeed::new(credential.key_seed()).v0_keystream(salt, plaintext.len())?;
                crypto::xor_in_place(&mut plaintext, &keystream);

                adv.put_u8(V0_HEADER_ENCRYPTED);
                adv.put_slice(salt);
                adv.put_slice(&plaintext);
            }
        }

        global_metrics().advertisement_serialized();
        RawAdvertisement::try_from_slice(&adv)
    }
}

impl Drop for V0AdvertisementBuilder {
    fn drop(&mut self) {
        BUILDERS.release(self.handle);
    }
}
