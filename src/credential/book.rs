//! Read-only credential key ring used by the deserializer.
//!
//! Building a book precalculates every credential's derived keys once, so a
//! deserialize call only pays for the salt-dependent keystream of each
//! candidate. The precalculated contents sit behind an `Arc` and are shared
//! read-only by concurrent deserialize calls and by the decoded results that
//! later decrypt metadata.

use super::slab::CredentialSlab;
use super::{V0Credential, V1Credential};
use crate::config::{contract_violation, GlobalConfig, PanicReason};
use crate::core::handle_map::{Handle, HandleClass, HandleMap};
use crate::error::Result;
use crate::protocol::v0::V0_IDENTITY_TOKEN_LEN;
use crate::protocol::v1::{EncryptedSection, VerificationMode, V1_IDENTITY_TOKEN_LEN, V1_SIGNATURE_LEN};
use crate::utils::crypto::{self, KeySeed, MetadataKeys, HMAC_LEN};
use ed25519_dalek::VerifyingKey;
use once_cell::sync::Lazy;
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

static BOOKS: Lazy<HandleMap<Arc<BookContents>>> = Lazy::new(|| {
    HandleMap::with_max_active(
        HandleClass::CredentialBook,
        GlobalConfig::max_handles(HandleClass::CredentialBook),
    )
});

pub(crate) fn live_handles() -> u32 {
    BOOKS.live_count()
}

/// Identity of a matched credential, kept alive by decoded results
pub(crate) struct MatchedIdentity {
    cred_id: u32,
    encrypted_metadata: Vec<u8>,
    metadata_keys: MetadataKeys,
}

impl MatchedIdentity {
    pub(crate) fn cred_id(&self) -> u32 {
        self.cred_id
    }

    pub(crate) fn decrypt_metadata(&self) -> Result<Vec<u8>> {
        self.metadata_keys.open(&self.encrypted_metadata)
    }
}

/// Plaintext recovered from a V0 payload by its matching credential
pub(crate) struct V0Match {
    pub(crate) identity: Arc<MatchedIdentity>,
    pub(crate) identity_token: [u8; V0_IDENTITY_TOKEN_LEN],
    pub(crate) des: Vec<u8>,
}

/// Plaintext recovered from a V1 section by its matching credential
pub(crate) struct V1Match {
    pub(crate) identity: Arc<MatchedIdentity>,
    pub(crate) identity_token: [u8; V1_IDENTITY_TOKEN_LEN],
    pub(crate) des: Vec<u8>,
}

fn xor_array<const N: usize>(ciphertext: &[u8; N], keystream: &[u8]) -> [u8; N] {
    let mut out = *ciphertext;
    crypto::xor_in_place(&mut out, keystream);
    out
}

pub(crate) struct V0CryptoMaterial {
    key_seed: KeySeed,
    token_hmac_key: Zeroizing<[u8; 32]>,
    legacy_metadata_key_hmac: [u8; HMAC_LEN],
    identity: Arc<MatchedIdentity>,
}

impl V0CryptoMaterial {
    fn precalculate(credential: &V0Credential) -> Result<Self> {
        let key_seed = KeySeed::new(credential.key_seed());
        Ok(Self {
            token_hmac_key: key_seed.v0_identity_token_hmac_key()?,
            legacy_metadata_key_hmac: *credential.legacy_metadata_key_hmac(),
            identity: Arc::new(MatchedIdentity {
                cred_id: credential.matched().cred_id(),
                encrypted_metadata: credential.matched().encrypted_metadata().to_vec(),
                metadata_keys: key_seed.metadata_keys()?,
            }),
            key_seed,
        })
    }

    /// Recover the token and DEs of `ciphertext` if this credential produced it.
    ///
    /// `ciphertext` must be at least a token long.
    pub(crate) fn try_decrypt(&self, salt: &[u8; 2], ciphertext: &[u8]) -> Result<Option<V0Match>> {
        let keystream = self.key_seed.v0_keystream(salt, ciphertext.len())?;
        let (token_ct, des_ct) = ciphertext.split_at(V0_IDENTITY_TOKEN_LEN);

        let mut identity_token = [0u8; V0_IDENTITY_TOKEN_LEN];
        identity_token.copy_from_slice(token_ct);
        crypto::xor_in_place(&mut identity_token, &keystream);

        if !crypto::hmac_sha256_verify(
            &self.token_hmac_key[..],
            &identity_token,
            &self.legacy_metadata_key_hmac,
        )? {
            return Ok(None);
        }

        let mut des = des_ct.to_vec();
        crypto::xor_in_place(&mut des, &keystream[V0_IDENTITY_TOKEN_LEN..]);
        Ok(Some(V0Match {
            identity: Arc::clone(&self.identity),
            identity_token,
            des,
        }))
    }
}

pub(crate) struct V1CryptoMaterial {
    key_seed: KeySeed,
    mic_token_hmac_key: Zeroizing<[u8; 32]>,
    signed_token_hmac_key: Zeroizing<[u8; 32]>,
    mic_key: Zeroizing<[u8; 32]>,
    expected_mic_identity_token_hmac: [u8; HMAC_LEN],
    expected_signed_identity_token_hmac: [u8; HMAC_LEN],
    public_key: Option<VerifyingKey>,
    identity: Arc<MatchedIdentity>,
}

impl V1CryptoMaterial {
    fn precalculate(credential: &V1Credential) -> Result<Self> {
        let key_seed = KeySeed::new(credential.key_seed());
        let public_key = crypto::parse_verifying_key(credential.public_key());
        if public_key.is_none() {
            warn!(
                cred_id = credential.matched().cred_id(),
                "V1 credential public key is not a valid Ed25519 key; signature sections will not match"
            );
        }
        Ok(Self {
            mic_token_hmac_key: key_seed.v1_mic_identity_token_hmac_key()?,
            signed_token_hmac_key: key_seed.v1_signed_identity_token_hmac_key()?,
            mic_key: key_seed.v1_mic_key()?,
            expected_mic_identity_token_hmac: *credential.expected_mic_identity_token_hmac(),
            expected_signed_identity_token_hmac: *credential.expected_signed_identity_token_hmac(),
            public_key,
            identity: Arc::new(MatchedIdentity {
                cred_id: credential.matched().cred_id(),
                encrypted_metadata: credential.matched().encrypted_metadata().to_vec(),
                metadata_keys: key_seed.metadata_keys()?,
            }),
            key_seed,
        })
    }

    /// Decrypt and authenticate `section` if this credential produced it
    pub(crate) fn try_decrypt(&self, section: &EncryptedSection<'_>) -> Result<Option<V1Match>> {
        let keystream = self
            .key_seed
            .v1_keystream(&section.salt, V1_IDENTITY_TOKEN_LEN + section.body_ct.len())?;
        let identity_token = xor_array(&section.token_ct, &keystream);

        let (token_hmac_key, expected) = match section.mode {
            VerificationMode::Mic => (
                &self.mic_token_hmac_key,
                &self.expected_mic_identity_token_hmac,
            ),
            VerificationMode::Signature => (
                &self.signed_token_hmac_key,
                &self.expected_signed_identity_token_hmac,
            ),
        };
        if !crypto::hmac_sha256_verify(&token_hmac_key[..], &identity_token, expected)? {
            return Ok(None);
        }

        let prefix = section.authenticated_prefix();
        let mut plaintext = section.body_ct.to_vec();

        let verified = match (section.mode, section.mic) {
            (VerificationMode::Mic, Some(mic)) => crypto::hmac_sha256_verify_truncated(
                &self.mic_key[..],
                &[&prefix[..], &section.salt[..], &section.token_ct[..], section.body_ct],
                &mic,
            )?,
            (VerificationMode::Signature, _) => {
                crypto::xor_in_place(&mut plaintext, &keystream[V1_IDENTITY_TOKEN_LEN..]);
                let split = plaintext.len() - V1_SIGNATURE_LEN;
                let mut signature = [0u8; V1_SIGNATURE_LEN];
                signature.copy_from_slice(&plaintext[split..]);
                plaintext.truncate(split);

                match &self.public_key {
                    Some(key) => {
                        let message =
                            [&prefix[..], &section.salt[..], &identity_token[..], &plaintext[..]].concat();
                        crypto::verify_signature(key, &message, &signature)
                    }
                    None => false,
                }
            }
            (VerificationMode::Mic, None) => false,
        };

        if !verified {
            debug!(
                cred_id = self.identity.cred_id,
                mode = %section.mode,
                "Identity token matched but section failed verification"
            );
            return Ok(None);
        }

        if section.mode == VerificationMode::Mic {
            crypto::xor_in_place(&mut plaintext, &keystream[V1_IDENTITY_TOKEN_LEN..]);
        }
        Ok(Some(V1Match {
            identity: Arc::clone(&self.identity),
            identity_token,
            des: plaintext,
        }))
    }
}

/// Precalculated crypto material of every credential in a book
pub(crate) struct BookContents {
    pub(crate) v0: Vec<V0CryptoMaterial>,
    pub(crate) v1: Vec<V1CryptoMaterial>,
}

/// Immutable, move-only set of discovery credentials.
///
/// Occupies one credential-book slot until dropped.
#[derive(Debug)]
pub struct CredentialBook {
    handle: Handle,
}

impl CredentialBook {
    /// Freeze `slab` into a book.
    ///
    /// The slab is consumed and its slot released whether or not the book
    /// can be created.
    ///
    /// # Errors
    /// [`PresenceError::ResourceExhausted`](crate::error::PresenceError::ResourceExhausted)
    /// if the configured number of books is already live.
    pub fn try_create_from_slab(slab: CredentialSlab) -> Result<Self> {
        let credentials = slab.take_contents();

        let contents = BookContents {
            v0: credentials
                .v0
                .iter()
                .map(V0CryptoMaterial::precalculate)
                .collect::<Result<_>>()?,
            v1: credentials
                .v1
                .iter()
                .map(V1CryptoMaterial::precalculate)
                .collect::<Result<_>>()?,
        };
        let (num_v0, num_v1) = (contents.v0.len(), contents.v1.len());

        let handle = BOOKS.allocate(|| Arc::new(contents))?;
        debug!(slot = handle.index(), num_v0, num_v1, "Credential book created");
        Ok(Self { handle })
    }

    pub(crate) fn contents(&self) -> Arc<BookContents> {
        BOOKS
            .get(self.handle, Arc::clone)
            .unwrap_or_else(|_| contract_violation(PanicReason::InvalidStackDataStructure))
    }

    pub fn num_v0_credentials(&self) -> usize {
        self.contents().v0.len()
    }

    pub fn num_v1_credentials(&self) -> usize {
        self.contents().v1.len()
    }
}

impl Drop for CredentialBook {
    fn drop(&mut self) {
        BOOKS.release(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{V0BroadcastCredential, V1BroadcastCredential};

    fn book_with(v0: Vec<V0Credential>, v1: Vec<V1Credential>) -> CredentialBook {
        let mut slab = CredentialSlab::create().unwrap();
        for cred in v0 {
            slab.add_v0_credential(cred).unwrap();
        }
        for cred in v1 {
            slab.add_v1_credential(cred).unwrap();
        }
        CredentialBook::try_create_from_slab(slab).unwrap()
    }

    #[test]
    fn test_book_counts() {
        let v0 = V0BroadcastCredential::new([1; 32], [2; 14])
            .derive_discovery_credential(1, vec![])
            .unwrap();
        let v1 = V1BroadcastCredential::new([3; 32], [4; 16], [5; 32])
            .derive_discovery_credential(2, vec![])
            .unwrap();
        let book = book_with(vec![v0], vec![v1.clone(), v1]);
        assert_eq!(book.num_v0_credentials(), 1);
        assert_eq!(book.num_v1_credentials(), 2);
    }

    #[test]
    fn test_v0_material_matches_only_its_token() {
        let broadcast = V0BroadcastCredential::new([7; 32], [8; 14]);
        let metadata = broadcast.encrypt_metadata(b"phone").unwrap();
        let cred = broadcast.derive_discovery_credential(42, metadata).unwrap();
        let material = V0CryptoMaterial::precalculate(&cred).unwrap();

        let salt = [0x12, 0x34];
        let mut ciphertext = [8u8; 14].to_vec();
        ciphertext.extend_from_slice(&[0x15, 0x03]);
        let keystream = KeySeed::new(&[7; 32]).v0_keystream(&salt, ciphertext.len()).unwrap();
        crypto::xor_in_place(&mut ciphertext, &keystream);

        let matched = material.try_decrypt(&salt, &ciphertext).unwrap().unwrap();
        assert_eq!(matched.identity.cred_id(), 42);
        assert_eq!(matched.identity_token, [8; 14]);
        assert_eq!(matched.des, vec![0x15, 0x03]);
        assert_eq!(matched.identity.decrypt_metadata().unwrap(), b"phone");

        // A different salt yields a different token, which fails the HMAC check
        assert!(material.try_decrypt(&[0x12, 0x35], &ciphertext).unwrap().is_none());
    }

    #[test]
    fn test_invalid_public_key_is_tolerated() {
        let cred = V1Credential::new(
            [1; 32],
            [0; 32],
            [0; 32],
            [0xFF; 32],
            crate::credential::MatchedCredentialData::new(9, vec![]),
        );
        let material = V1CryptoMaterial::precalculate(&cred).unwrap();
        assert_eq!(material.identity.cred_id(), 9);
    }
}
