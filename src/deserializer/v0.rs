//! Decoded V0 advertisements.

use super::{DecodeError, DeserializedIdentityKind};
use crate::config::{contract_violation, GlobalConfig, PanicReason};
use crate::core::handle_map::{Handle, HandleClass, HandleMap};
use crate::credential::book::{BookContents, MatchedIdentity};
use crate::credential::search::find_first_match;
use crate::error::{DeserializeError, PresenceError, Result};
use crate::protocol::v0::{
    parse_data_elements, V0DataElement, V0Encoding, V0_IDENTITY_TOKEN_LEN, V0_MAX_ADV_LEN,
    V0_MAX_CIPHERTEXT_LEN, V0_MIN_CIPHERTEXT_LEN, V0_SALT_LEN,
};
use crate::utils::metrics::global_metrics;
use once_cell::sync::Lazy;
use std::sync::Arc;
use tracing::{debug, warn};

struct V0IdentityContext {
    identity: Arc<MatchedIdentity>,
    salt: [u8; V0_SALT_LEN],
    identity_token: [u8; V0_IDENTITY_TOKEN_LEN],
}

struct V0PayloadContents {
    des: Vec<V0DataElement>,
    identity: Option<V0IdentityContext>,
}

static PAYLOADS: Lazy<HandleMap<V0PayloadContents>> = Lazy::new(|| {
    HandleMap::with_max_active(
        HandleClass::V0Payload,
        GlobalConfig::max_handles(HandleClass::V0Payload),
    )
});

pub(crate) fn live_handles() -> u32 {
    PAYLOADS.live_count()
}

pub(crate) fn deserialize(
    adv: &[u8],
    book: &BookContents,
) -> std::result::Result<V0Advertisement, DecodeError> {
    if adv.len() > V0_MAX_ADV_LEN {
        return Err(DeserializeError::TooLong(adv.len()).into());
    }
    let Some((&header, body)) = adv.split_first() else {
        return Err(DeserializeError::EmptyAdvertisement.into());
    };

    let encoding = V0Encoding::from_header(header)?;
    let (des, identity) = match encoding {
        V0Encoding::Unencrypted => (parse_data_elements(encoding.flavor(), body)?, None),
        V0Encoding::Encrypted => {
            if body.len() < V0_SALT_LEN + V0_MIN_CIPHERTEXT_LEN {
                return Err(DeserializeError::Truncated("V0 encrypted payload").into());
            }
            let (salt_bytes, ciphertext) = body.split_at(V0_SALT_LEN);
            if ciphertext.len() > V0_MAX_CIPHERTEXT_LEN {
                return Err(DeserializeError::TooLong(adv.len()).into());
            }
            let salt = [salt_bytes[0], salt_bytes[1]];

            let matched = find_first_match(&book.v0, GlobalConfig::num_shards(), |material| {
                material
                    .try_decrypt(&salt, ciphertext)
                    .unwrap_or_else(|err| {
                        warn!(error = %err, "V0 credential trial failed");
                        None
                    })
            });

            let Some(matched) = matched else {
                debug!(candidates = book.v0.len(), "No V0 credential matched");
                global_metrics().no_matching_credential();
                return Ok(V0Advertisement::NoMatchingCredentials);
            };
            global_metrics().credential_match();

            let des = parse_data_elements(encoding.flavor(), &matched.des)?;
            let identity = V0IdentityContext {
                identity: matched.identity,
                salt,
                identity_token: matched.identity_token,
            };
            (des, Some(identity))
        }
    };

    let identity_kind = match identity {
        Some(_) => DeserializedIdentityKind::Decrypted,
        None => DeserializedIdentityKind::Plaintext,
    };
    // At most 12 DEs fit in 23 bytes
    let num_des = des.len() as u8;
    let handle = PAYLOADS.allocate(|| V0PayloadContents { des, identity })?;

    Ok(V0Advertisement::Legible(LegibleV0Advertisement {
        identity_kind,
        num_des,
        payload: V0Payload { handle },
    }))
}

/// Kind tag of a [`V0Advertisement`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum V0AdvertisementKind {
    Legible,
    NoMatchingCredentials,
}

/// A structurally valid V0 advertisement
#[derive(Debug)]
pub enum V0Advertisement {
    Legible(LegibleV0Advertisement),
    /// Encrypted, and no credential in the book could open it
    NoMatchingCredentials,
}

impl V0Advertisement {
    pub fn kind(&self) -> V0AdvertisementKind {
        match self {
            V0Advertisement::Legible(_) => V0AdvertisementKind::Legible,
            V0Advertisement::NoMatchingCredentials => V0AdvertisementKind::NoMatchingCredentials,
        }
    }

    /// Consume the advertisement as legible content.
    ///
    /// Calling this on [`V0Advertisement::NoMatchingCredentials`] is a
    /// contract violation.
    pub fn into_legible(self) -> LegibleV0Advertisement {
        match self {
            V0Advertisement::Legible(legible) => legible,
            V0Advertisement::NoMatchingCredentials => {
                contract_violation(PanicReason::EnumCastFailed)
            }
        }
    }
}

/// Plaintext or decrypted V0 content
#[derive(Debug)]
pub struct LegibleV0Advertisement {
    identity_kind: DeserializedIdentityKind,
    num_des: u8,
    payload: V0Payload,
}

impl LegibleV0Advertisement {
    pub fn identity_kind(&self) -> DeserializedIdentityKind {
        self.identity_kind
    }

    pub fn num_des(&self) -> u8 {
        self.num_des
    }

    pub fn into_payload(self) -> V0Payload {
        self.payload
    }
}

/// Credential and salt behind a decrypted V0 payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V0IdentityDetails {
    cred_id: u32,
    salt: [u8; V0_SALT_LEN],
    identity_token: [u8; V0_IDENTITY_TOKEN_LEN],
}

impl V0IdentityDetails {
    pub fn cred_id(&self) -> u32 {
        self.cred_id
    }

    pub fn salt(&self) -> [u8; V0_SALT_LEN] {
        self.salt
    }

    pub fn identity_token(&self) -> [u8; V0_IDENTITY_TOKEN_LEN] {
        self.identity_token
    }
}

/// Data elements of a legible V0 advertisement.
///
/// Holds one V0-payload slot until dropped.
#[derive(Debug)]
pub struct V0Payload {
    handle: Handle,
}

impl V0Payload {
    fn with_contents<R>(&self, f: impl FnOnce(&V0PayloadContents) -> R) -> R {
        PAYLOADS
            .get(self.handle, f)
            .unwrap_or_else(|_| contract_violation(PanicReason::InvalidStackDataStructure))
    }

    /// Data element at `index`.
    ///
    /// # Errors
    /// [`PresenceError::IndexOutOfRange`] if `index >= num_des`.
    pub fn try_get_de(&self, index: u8) -> Result<V0DataElement> {
        self.with_contents(|contents| {
            contents
                .des
                .get(usize::from(index))
                .copied()
                .ok_or(PresenceError::IndexOutOfRange {
                    index: usize::from(index),
                    len: contents.des.len(),
                })
        })
    }

    /// Matched credential of an encrypted payload.
    ///
    /// # Errors
    /// [`PresenceError::NotEncrypted`] for plaintext payloads.
    pub fn try_get_identity_details(&self) -> Result<V0IdentityDetails> {
        self.with_contents(|contents| {
            let context = contents.identity.as_ref().ok_or(PresenceError::NotEncrypted)?;
            Ok(V0IdentityDetails {
                cred_id: context.identity.cred_id(),
                salt: context.salt,
                identity_token: context.identity_token,
            })
        })
    }

    /// Decrypt the matched credential's metadata.
    ///
    /// # Errors
    /// [`PresenceError::NotEncrypted`] for plaintext payloads and
    /// [`PresenceError::DecryptionFailure`] if the metadata does not
    /// authenticate under the credential's key seed.
    pub fn try_decrypt_metadata(&self) -> Result<Vec<u8>> {
        let identity = self.with_contents(|contents| {
            contents
                .identity
                .as_ref()
                .map(|context| Arc::clone(&context.identity))
                .ok_or(PresenceError::NotEncrypted)
        })?;
        identity.decrypt_metadata()
    }
}

impl Drop for V0Payload {
    fn drop(&mut self) {
        PAYLOADS.release(self.handle);
    }
}
