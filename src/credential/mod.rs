//! # Credentials
//!
//! Discovery credentials identify a broadcaster to a receiver. They are
//! collected in a [`CredentialSlab`], frozen into a [`CredentialBook`], and the
//! book is handed to every deserialize call as its key ring.
//!
//! ## Flow
//! ```text
//! CredentialSlab::create() -> add_v0_credential / add_v1_credential
//!     -> CredentialBook::try_create_from_slab(slab)   (slab consumed)
//!     -> deserialize_advertisement(&adv, &book)
//! ```
//!
//! Broadcast credentials ([`V0BroadcastCredential`], [`V1BroadcastCredential`])
//! hold the sender's secrets and can derive the matching discovery credential.

pub mod book;
pub mod search;
pub mod slab;

pub use book::CredentialBook;
pub use slab::CredentialSlab;

use crate::error::Result;
use crate::protocol::v0::V0_IDENTITY_TOKEN_LEN;
use crate::protocol::v1::V1_IDENTITY_TOKEN_LEN;
use crate::utils::crypto::{self, KeySeed, HMAC_LEN, KEY_SEED_LEN};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Caller data returned when a credential matches
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MatchedCredentialData {
    cred_id: u32,
    encrypted_metadata: Vec<u8>,
}

impl MatchedCredentialData {
    pub fn new(cred_id: u32, encrypted_metadata: impl Into<Vec<u8>>) -> Self {
        Self {
            cred_id,
            encrypted_metadata: encrypted_metadata.into(),
        }
    }

    pub fn cred_id(&self) -> u32 {
        self.cred_id
    }

    pub fn encrypted_metadata(&self) -> &[u8] {
        &self.encrypted_metadata
    }
}

impl fmt::Debug for MatchedCredentialData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchedCredentialData")
            .field("cred_id", &self.cred_id)
            .field("encrypted_metadata_len", &self.encrypted_metadata.len())
            .finish()
    }
}

/// Receiver-side V0 credential
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct V0Credential {
    key_seed: [u8; KEY_SEED_LEN],
    legacy_metadata_key_hmac: [u8; HMAC_LEN],
    matched: MatchedCredentialData,
}

impl V0Credential {
    pub fn new(
        key_seed: [u8; KEY_SEED_LEN],
        legacy_metadata_key_hmac: [u8; HMAC_LEN],
        matched: MatchedCredentialData,
    ) -> Self {
        Self {
            key_seed,
            legacy_metadata_key_hmac,
            matched,
        }
    }

    pub fn key_seed(&self) -> &[u8; KEY_SEED_LEN] {
        &self.key_seed
    }

    pub fn legacy_metadata_key_hmac(&self) -> &[u8; HMAC_LEN] {
        &self.legacy_metadata_key_hmac
    }

    pub fn matched(&self) -> &MatchedCredentialData {
        &self.matched
    }
}

impl fmt::Debug for V0Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("V0Credential")
            .field("matched", &self.matched)
            .finish_non_exhaustive()
    }
}

/// Receiver-side V1 credential
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct V1Credential {
    key_seed: [u8; KEY_SEED_LEN],
    expected_mic_identity_token_hmac: [u8; HMAC_LEN],
    expected_signed_identity_token_hmac: [u8; HMAC_LEN],
    public_key: [u8; 32],
    matched: MatchedCredentialData,
}

impl V1Credential {
    pub fn new(
        key_seed: [u8; KEY_SEED_LEN],
        expected_mic_identity_token_hmac: [u8; HMAC_LEN],
        expected_signed_identity_token_hmac: [u8; HMAC_LEN],
        public_key: [u8; 32],
        matched: MatchedCredentialData,
    ) -> Self {
        Self {
            key_seed,
            expected_mic_identity_token_hmac,
            expected_signed_identity_token_hmac,
            public_key,
            matched,
        }
    }

    pub fn key_seed(&self) -> &[u8; KEY_SEED_LEN] {
        &self.key_seed
    }

    pub fn expected_mic_identity_token_hmac(&self) -> &[u8; HMAC_LEN] {
        &self.expected_mic_identity_token_hmac
    }

    pub fn expected_signed_identity_token_hmac(&self) -> &[u8; HMAC_LEN] {
        &self.expected_signed_identity_token_hmac
    }

    /// Ed25519 public key used to verify signature-mode sections
    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    pub fn matched(&self) -> &MatchedCredentialData {
        &self.matched
    }
}

impl fmt::Debug for V1Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("V1Credential")
            .field("public_key", &hex::encode(self.public_key))
            .field("matched", &self.matched)
            .finish_non_exhaustive()
    }
}

/// Sender-side V0 credential
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct V0BroadcastCredential {
    key_seed: [u8; KEY_SEED_LEN],
    identity_token: [u8; V0_IDENTITY_TOKEN_LEN],
}

impl V0BroadcastCredential {
    pub fn new(key_seed: [u8; KEY_SEED_LEN], identity_token: [u8; V0_IDENTITY_TOKEN_LEN]) -> Self {
        Self {
            key_seed,
            identity_token,
        }
    }

    pub fn key_seed(&self) -> &[u8; KEY_SEED_LEN] {
        &self.key_seed
    }

    pub fn identity_token(&self) -> &[u8; V0_IDENTITY_TOKEN_LEN] {
        &self.identity_token
    }

    /// Receiver credential that matches advertisements built with this one
    pub fn derive_discovery_credential(
        &self,
        cred_id: u32,
        encrypted_metadata: impl Into<Vec<u8>>,
    ) -> Result<V0Credential> {
        let seed = KeySeed::new(&self.key_seed);
        let hmac_key = seed.v0_identity_token_hmac_key()?;
        let legacy_metadata_key_hmac = crypto::hmac_sha256(&hmac_key[..], &[&self.identity_token[..]])?;
        Ok(V0Credential::new(
            self.key_seed,
            legacy_metadata_key_hmac,
            MatchedCredentialData::new(cred_id, encrypted_metadata),
        ))
    }

    /// Encrypt metadata so the derived discovery credential can decrypt it
    pub fn encrypt_metadata(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        crypto::encrypt_metadata(&self.key_seed, plaintext)
    }
}

/// Sender-side V1 credential
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct V1BroadcastCredential {
    key_seed: [u8; KEY_SEED_LEN],
    identity_token: [u8; V1_IDENTITY_TOKEN_LEN],
    signing_key: [u8; 32],
}

impl V1BroadcastCredential {
    pub fn new(
        key_seed: [u8; KEY_SEED_LEN],
        identity_token: [u8; V1_IDENTITY_TOKEN_LEN],
        signing_key: [u8; 32],
    ) -> Self {
        Self {
            key_seed,
            identity_token,
            signing_key,
        }
    }

    pub fn key_seed(&self) -> &[u8; KEY_SEED_LEN] {
        &self.key_seed
    }

    pub fn identity_token(&self) -> &[u8; V1_IDENTITY_TOKEN_LEN] {
        &self.identity_token
    }

    pub(crate) fn signing_key(&self) -> &[u8; 32] {
        &self.signing_key
    }

    /// Receiver credential that matches sections built with this one
    pub fn derive_discovery_credential(
        &self,
        cred_id: u32,
        encrypted_metadata: impl Into<Vec<u8>>,
    ) -> Result<V1Credential> {
        let seed = KeySeed::new(&self.key_seed);
        let mic_key = seed.v1_mic_identity_token_hmac_key()?;
        let signed_key = seed.v1_signed_identity_token_hmac_key()?;
        Ok(V1Credential::new(
            self.key_seed,
            crypto::hmac_sha256(&mic_key[..], &[&self.identity_token[..]])?,
            crypto::hmac_sha256(&signed_key[..], &[&self.identity_token[..]])?,
            crypto::signing_public_key(&self.signing_key),
            MatchedCredentialData::new(cred_id, encrypted_metadata),
        ))
    }

    pub fn encrypt_metadata(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        crypto::encrypt_metadata(&self.key_seed, plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v0_discovery_credential_derivation_is_stable() {
        let broadcast = V0BroadcastCredential::new([1; 32], [2; 14]);
        let a = broadcast.derive_discovery_credential(7, vec![]).unwrap();
        let b = broadcast.derive_discovery_credential(8, vec![]).unwrap();
        assert_eq!(a.legacy_metadata_key_hmac(), b.legacy_metadata_key_hmac());
        assert_eq!(a.key_seed(), &[1; 32]);
        assert_eq!(a.matched().cred_id(), 7);

        let other = V0BroadcastCredential::new([1; 32], [3; 14])
            .derive_discovery_credential(7, vec![])
            .unwrap();
        assert_ne!(a.legacy_metadata_key_hmac(), other.legacy_metadata_key_hmac());
    }

    #[test]
    fn test_v1_discovery_credential_tags_differ_by_mode() {
        let broadcast = V1BroadcastCredential::new([4; 32], [5; 16], [6; 32]);
        let cred = broadcast.derive_discovery_credential(1, vec![9]).unwrap();
        assert_ne!(
            cred.expected_mic_identity_token_hmac(),
            cred.expected_signed_identity_token_hmac()
        );
        assert_eq!(cred.public_key(), &crypto::signing_public_key(&[6; 32]));
        assert_eq!(cred.matched().encrypted_metadata(), &[9]);
    }

    #[test]
    fn test_debug_output_omits_key_material() {
        let broadcast = V0BroadcastCredential::new([0xAB; 32], [0; 14]);
        let cred = broadcast.derive_discovery_credential(3, vec![]).unwrap();
        let text = format!("{cred:?}");
        assert!(text.contains("cred_id: 3"));
        assert!(!text.contains("171"));
    }
}
