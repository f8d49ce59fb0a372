//! V1 advertisement and section builders.

use crate::config::{contract_violation, GlobalConfig, PanicReason};
use crate::core::byte_buffer::RawAdvertisement;
use crate::core::handle_map::{Handle, HandleClass, HandleMap};
use crate::credential::V1BroadcastCredential;
use crate::error::{PresenceError, Result};
use crate::protocol::v1::{
    V1DataElement, VerificationMode, SECTION_IDENTITY_PUBLIC, V1_HEADER, V1_IDENTITY_TOKEN_LEN,
    V1_MAX_ADV_LEN, V1_MAX_SECTIONS, V1_MAX_SECTION_CONTENTS_LEN, V1_MIC_LEN, V1_SALT_LEN,
};
use crate::utils::crypto::{self, KeySeed};
use crate::utils::metrics::global_metrics;
use bytes::{BufMut, BytesMut};
use once_cell::sync::Lazy;
use tracing::debug;

enum SectionEncryption {
    Public,
    Encrypted {
        credential: V1BroadcastCredential,
        mode: VerificationMode,
        salt: [u8; V1_SALT_LEN],
    },
}

/// Builds one section of a V1 advertisement
pub struct V1SectionBuilder {
    encryption: SectionEncryption,
    des: BytesMut,
}

impl V1SectionBuilder {
    /// Section broadcast in the clear
    pub fn public() -> Self {
        Self {
            encryption: SectionEncryption::Public,
            des: BytesMut::new(),
        }
    }

    /// Section encrypted to `credential` and authenticated with `mode`
    pub fn encrypted(
        credential: V1BroadcastCredential,
        mode: VerificationMode,
        salt: [u8; V1_SALT_LEN],
    ) -> Self {
        Self {
            encryption: SectionEncryption::Encrypted {
                credential,
                mode,
                salt,
            },
            des: BytesMut::new(),
        }
    }

    /// Like [`Self::encrypted`], with a salt from the system random source
    pub fn encrypted_with_random_salt(
        credential: V1BroadcastCredential,
        mode: VerificationMode,
    ) -> Result<Self> {
        Ok(Self::encrypted(credential, mode, crypto::random_bytes()?))
    }

    fn overhead(&self) -> usize {
        match &self.encryption {
            SectionEncryption::Public => 1,
            SectionEncryption::Encrypted { mode, .. } => mode.overhead(),
        }
    }

    /// Length of the section contents as encoded so far
    pub fn contents_len(&self) -> usize {
        self.overhead() + self.des.len()
    }

    /// Append a data element.
    ///
    /// # Errors
    /// [`PresenceError::AdvertisementFull`] if the section contents would
    /// exceed what a single-section advertisement can carry.
    pub fn try_add_de(&mut self, de: V1DataElement) -> Result<()> {
        let requested = de.encoded_len();
        if self.contents_len() + requested > V1_MAX_SECTION_CONTENTS_LEN {
            return Err(PresenceError::AdvertisementFull {
                requested,
                max: V1_MAX_SECTION_CONTENTS_LEN,
            });
        }
        de.encode(&mut self.des);
        Ok(())
    }

    /// Append `[len][contents]` to `out`
    fn encode(&self, out: &mut BytesMut) -> Result<()> {
        let contents_len = self.contents_len() as u8;
        out.put_u8(contents_len);

        let SectionEncryption::Encrypted {
            credential,
            mode,
            salt,
        } = &self.encryption
        else {
            out.put_u8(SECTION_IDENTITY_PUBLIC);
            out.put_slice(&self.des);
            return Ok(());
        };

        let key_seed = KeySeed::new(credential.key_seed());
        let prefix = [V1_HEADER, contents_len, mode.identity_byte()];
        let token = credential.identity_token();

        let mut body = self.des.clone();
        if *mode == VerificationMode::Signature {
            let message = [&prefix[..], &salt[..], &token[..], &self.des[..]].concat();
            body.put_slice(&crypto::sign(credential.signing_key(), &message));
        }

        let keystream = key_seed.v1_keystream(salt, V1_IDENTITY_TOKEN_LEN + body.len())?;
        let mut token_ct = *token;
        crypto::xor_in_place(&mut token_ct, &keystream);
        crypto::xor_in_place(&mut body, &keystream[V1_IDENTITY_TOKEN_LEN..]);

        out.put_slice(&prefix[2..]);
        out.put_slice(salt);
        out.put_slice(&token_ct);
        out.put_slice(&body);

        if *mode == VerificationMode::Mic {
            let mic_key = key_seed.v1_mic_key()?;
            let mic = crypto::hmac_sha256(
                &mic_key[..],
                &[&prefix[..], &salt[..], &token_ct[..], &body[..]],
            )?;
            out.put_slice(&mic[..V1_MIC_LEN]);
        }
        Ok(())
    }
}

struct V1BuilderState {
    sections: Vec<V1SectionBuilder>,
    encoded_len: usize,
}

static BUILDERS: Lazy<HandleMap<V1BuilderState>> = Lazy::new(|| {
    HandleMap::with_max_active(
        HandleClass::V1AdvertisementBuilder,
        GlobalConfig::max_handles(HandleClass::V1AdvertisementBuilder),
    )
});

pub(crate) fn live_handles() -> u32 {
    BUILDERS.live_count()
}

/// Builds a V1 advertisement from up to eight sections.
///
/// Holds one V1-builder slot until serialized or dropped.
///
/// ```rust
/// use presence_protocol::builder::{V1AdvertisementBuilder, V1SectionBuilder};
/// use presence_protocol::protocol::v1::V1DataElement;
///
/// let mut section = V1SectionBuilder::public();
/// section.try_add_de(V1DataElement::try_new(5, vec![3])?)?;
///
/// let mut builder = V1AdvertisementBuilder::create()?;
/// builder.try_add_section(section)?;
/// assert_eq!(builder.try_serialize()?.as_slice(), &[0x20, 0x03, 0x03, 0x15, 0x03]);
/// # Ok::<(), presence_protocol::error::PresenceError>(())
/// ```
#[derive(Debug)]
pub struct V1AdvertisementBuilder {
    handle: Handle,
}

impl V1AdvertisementBuilder {
    pub fn create() -> Result<Self> {
        let handle = BUILDERS.allocate(|| V1BuilderState {
            sections: Vec::new(),
            encoded_len: 1,
        })?;
        debug!(slot = handle.index(), "V1 advertisement builder created");
        Ok(Self { handle })
    }

    /// Append a section.
    ///
    /// # Errors
    /// [`PresenceError::TooManySections`] beyond eight sections and
    /// [`PresenceError::AdvertisementFull`] beyond the advertisement length.
    pub fn try_add_section(&mut self, section: V1SectionBuilder) -> Result<()> {
        BUILDERS
            .get_mut(self.handle, |state| {
                if state.sections.len() == V1_MAX_SECTIONS {
                    return Err(PresenceError::TooManySections(V1_MAX_SECTIONS));
                }
                let requested = 1 + section.contents_len();
                if state.encoded_len + requested > V1_MAX_ADV_LEN {
                    return Err(PresenceError::AdvertisementFull {
                        requested,
                        max: V1_MAX_ADV_LEN,
                    });
                }
                state.encoded_len += requested;
                state.sections.push(section);
                Ok(())
            })
            .unwrap_or_else(|_| contract_violation(PanicReason::InvalidStackDataStructure))
    }

    /// Encode the advertisement, releasing the builder's slot.
    ///
    /// # Errors
    /// [`PresenceError::EmptyAdvertisement`] if no section was added.
    pub fn try_serialize(self) -> Result<RawAdvertisement> {
        let handle = self.handle;
        std::mem::forget(self);
        let state = BUILDERS
            .deallocate(handle)
            .unwrap_or_else(|_| contract_violation(PanicReason::InvalidStackDataStructure));

        if state.sections.is_empty() {
            return Err(PresenceError::EmptyAdvertisement);
        }

        let mut adv = BytesMut::with_capacity(state.encoded_len);
        adv.put_u8(V1_HEADER);
        for section in &state.sections {
            section.encode(&mut adv)?;
        }

        global_metrics().advertisement_serialized();
        RawAdvertisement::try_from_slice(&adv)
    }
}

impl Drop for V1AdvertisementBuilder {
    fn drop(&mut self) {
        BUILDERS.release(self.handle);
    }
}
