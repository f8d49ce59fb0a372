//! Decoded V1 advertisements and their legible sections.

use super::{DecodeError, DeserializedIdentityKind};
use crate::config::{contract_violation, GlobalConfig, PanicReason};
use crate::core::handle_map::{Handle, HandleClass, HandleMap};
use crate::credential::book::{BookContents, MatchedIdentity};
use crate::credential::search::find_first_match;
use crate::error::{PresenceError, Result};
use crate::protocol::v1::{
    parse_data_elements, parse_sections, RawSection, V1DataElement, VerificationMode,
    ENCRYPTED_SECTION_PREFIX_LEN, V1_IDENTITY_TOKEN_LEN, V1_SALT_LEN,
};
use crate::utils::crypto;
use crate::utils::metrics::global_metrics;
use once_cell::sync::Lazy;
use std::sync::Arc;
use tracing::{debug, warn};

/// Offset of the first DE in a public section (after the identity byte)
const PUBLIC_SECTION_DE_OFFSET: usize = 1;

struct V1IdentityContext {
    identity: Arc<MatchedIdentity>,
    verification_mode: VerificationMode,
    salt: [u8; V1_SALT_LEN],
    identity_token: [u8; V1_IDENTITY_TOKEN_LEN],
}

struct SectionContents {
    identity: Option<V1IdentityContext>,
    des: Vec<V1DataElement>,
}

static SECTIONS: Lazy<HandleMap<Vec<SectionContents>>> = Lazy::new(|| {
    HandleMap::with_max_active(
        HandleClass::LegibleV1Sections,
        GlobalConfig::max_handles(HandleClass::LegibleV1Sections),
    )
});

pub(crate) fn live_handles() -> u32 {
    SECTIONS.live_count()
}

pub(crate) fn deserialize(
    adv: &[u8],
    book: &BookContents,
) -> std::result::Result<DeserializedV1Advertisement, DecodeError> {
    let raw_sections = parse_sections(adv)?;
    let num_shards = GlobalConfig::num_shards();

    let mut legible = Vec::with_capacity(raw_sections.len());
    let mut num_undecryptable: u8 = 0;

    for raw in &raw_sections {
        match raw {
            RawSection::Public { des } => legible.push(SectionContents {
                identity: None,
                des: parse_data_elements(des, PUBLIC_SECTION_DE_OFFSET)?,
            }),
            RawSection::Encrypted(section) => {
                let matched = find_first_match(&book.v1, num_shards, |material| {
                    material.try_decrypt(section).unwrap_or_else(|err| {
                        warn!(error = %err, "V1 credential trial failed");
                        None
                    })
                });

                let Some(matched) = matched else {
                    debug!(mode = %section.mode, "No V1 credential matched section");
                    num_undecryptable += 1;
                    continue;
                };
                global_metrics().credential_match();

                legible.push(SectionContents {
                    des: parse_data_elements(&matched.des, ENCRYPTED_SECTION_PREFIX_LEN)?,
                    identity: Some(V1IdentityContext {
                        identity: matched.identity,
                        verification_mode: section.mode,
                        salt: section.salt,
                        identity_token: matched.identity_token,
                    }),
                });
            }
        }
    }

    if num_undecryptable > 0 {
        global_metrics().undecryptable_sections(u64::from(num_undecryptable));
    }

    // At most 8 sections
    let num_legible_sections = legible.len() as u8;
    let handle = SECTIONS.allocate(|| legible)?;

    Ok(DeserializedV1Advertisement {
        num_legible_sections,
        num_undecryptable_sections: num_undecryptable,
        legible_sections: LegibleV1Sections { handle },
    })
}

/// A structurally valid V1 advertisement
#[derive(Debug)]
pub struct DeserializedV1Advertisement {
    num_legible_sections: u8,
    num_undecryptable_sections: u8,
    legible_sections: LegibleV1Sections,
}

impl DeserializedV1Advertisement {
    pub fn num_legible_sections(&self) -> u8 {
        self.num_legible_sections
    }

    /// Encrypted sections no credential in the book could open
    pub fn num_undecryptable_sections(&self) -> u8 {
        self.num_undecryptable_sections
    }

    /// Legible section at `index`.
    ///
    /// # Errors
    /// [`PresenceError::IndexOutOfRange`] if `index >= num_legible_sections`.
    pub fn try_get_section(&self, index: u8) -> Result<DeserializedV1Section<'_>> {
        self.legible_sections.try_get_section(index)
    }

    pub fn into_legible_sections(self) -> LegibleV1Sections {
        self.legible_sections
    }
}

/// Slot-backed storage of an advertisement's legible sections.
///
/// Holds one legible-sections slot until dropped.
#[derive(Debug)]
pub struct LegibleV1Sections {
    handle: Handle,
}

impl LegibleV1Sections {
    fn with_section<R>(&self, index: u8, f: impl FnOnce(&SectionContents) -> R) -> Result<R> {
        SECTIONS
            .get(self.handle, |sections| {
                sections
                    .get(usize::from(index))
                    .map(f)
                    .ok_or(PresenceError::IndexOutOfRange {
                        index: usize::from(index),
                        len: sections.len(),
                    })
            })
            .unwrap_or_else(|_| contract_violation(PanicReason::InvalidStackDataStructure))
    }

    pub fn try_get_section(&self, index: u8) -> Result<DeserializedV1Section<'_>> {
        let (identity_kind, num_des) = self.with_section(index, |section| {
            let kind = match section.identity {
                Some(_) => DeserializedIdentityKind::Decrypted,
                None => DeserializedIdentityKind::Plaintext,
            };
            // At most 252 DE bytes; every DE takes at least one
            (kind, section.des.len() as u8)
        })?;
        Ok(DeserializedV1Section {
            sections: self,
            index,
            identity_kind,
            num_des,
        })
    }
}

impl Drop for LegibleV1Sections {
    fn drop(&mut self) {
        SECTIONS.release(self.handle);
    }
}

/// Credential, mode and salt behind a decrypted V1 section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V1IdentityDetails {
    cred_id: u32,
    verification_mode: VerificationMode,
    salt: [u8; V1_SALT_LEN],
    identity_token: [u8; V1_IDENTITY_TOKEN_LEN],
}

impl V1IdentityDetails {
    pub fn cred_id(&self) -> u32 {
        self.cred_id
    }

    pub fn verification_mode(&self) -> VerificationMode {
        self.verification_mode
    }

    pub fn salt(&self) -> [u8; V1_SALT_LEN] {
        self.salt
    }

    pub fn identity_token(&self) -> [u8; V1_IDENTITY_TOKEN_LEN] {
        self.identity_token
    }
}

/// Borrowed view of one legible section
#[derive(Debug, Clone, Copy)]
pub struct DeserializedV1Section<'a> {
    sections: &'a LegibleV1Sections,
    index: u8,
    identity_kind: DeserializedIdentityKind,
    num_des: u8,
}

impl DeserializedV1Section<'_> {
    pub fn identity_kind(&self) -> DeserializedIdentityKind {
        self.identity_kind
    }

    pub fn num_des(&self) -> u8 {
        self.num_des
    }

    fn with_contents<R>(&self, f: impl FnOnce(&SectionContents) -> R) -> R {
        self.sections
            .with_section(self.index, f)
            .unwrap_or_else(|_| contract_violation(PanicReason::InvalidStackDataStructure))
    }

    fn identity<R>(&self, f: impl FnOnce(&V1IdentityContext) -> R) -> Result<R> {
        self.with_contents(|section| section.identity.as_ref().map(f))
            .ok_or(PresenceError::NotEncrypted)
    }

    /// Data element at `index`.
    ///
    /// # Errors
    /// [`PresenceError::IndexOutOfRange`] if `index >= num_des`.
    pub fn try_get_de(&self, index: u8) -> Result<V1DataElement> {
        self.with_contents(|section| {
            section
                .des
                .get(usize::from(index))
                .cloned()
                .ok_or(PresenceError::IndexOutOfRange {
                    index: usize::from(index),
                    len: section.des.len(),
                })
        })
    }

    /// # Errors
    /// [`PresenceError::NotEncrypted`] for public sections.
    pub fn try_get_identity_details(&self) -> Result<V1IdentityDetails> {
        self.identity(|context| V1IdentityDetails {
            cred_id: context.identity.cred_id(),
            verification_mode: context.verification_mode,
            salt: context.salt,
            identity_token: context.identity_token,
        })
    }

    /// Decrypt the matched credential's metadata.
    ///
    /// # Errors
    /// [`PresenceError::NotEncrypted`] for public sections and
    /// [`PresenceError::DecryptionFailure`] if the metadata does not
    /// authenticate under the credential's key seed.
    pub fn try_decrypt_metadata(&self) -> Result<Vec<u8>> {
        self.identity(|context| Arc::clone(&context.identity))?
            .decrypt_metadata()
    }

    /// Salt for the data element at byte `offset` of this section.
    ///
    /// # Errors
    /// [`PresenceError::NotEncrypted`] for public sections.
    pub fn derive_salt_for_offset(&self, offset: u8) -> Result<[u8; V1_SALT_LEN]> {
        let salt = self.identity(|context| context.salt)?;
        crypto::derive_de_salt(&salt, offset)
    }
}
