//! # Cryptographic Glue
//!
//! Key derivation and primitive wrappers used by credential matching and
//! advertisement building. No primitive is implemented here; everything comes
//! from the RustCrypto and dalek crates.
//!
//! ## Derivation
//! Every credential carries a 32-byte key seed. All working keys are derived
//! from it with HKDF-SHA256 under distinct labels:
//! - V0 keystream (per 2-byte salt) and V0 identity token HMAC key
//! - V1 keystream (per 16-byte salt), MIC key, and the identity token HMAC
//!   keys for MIC and signature sections
//! - ChaCha20-Poly1305 key and nonce for the credential's encrypted metadata
//!
//! ## Security
//! - Tag and token comparisons are constant time (`Mac::verify_*`)
//! - Derived keys are zeroized on drop (`Zeroizing`)
//! - Salts come from the system random source (getrandom)

use crate::error::{constants, PresenceError, Result};
use crate::protocol::v1::V1_SIGNATURE_LEN;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Length of every key seed
pub const KEY_SEED_LEN: usize = 32;
/// Length of an HMAC-SHA256 tag
pub const HMAC_LEN: usize = 32;

const V0_KEYSTREAM_LABEL: &[u8] = b"presence v0 keystream";
const V0_TOKEN_HMAC_LABEL: &[u8] = b"presence v0 identity token hmac key";
const V1_KEYSTREAM_LABEL: &[u8] = b"presence v1 keystream";
const V1_MIC_TOKEN_HMAC_LABEL: &[u8] = b"presence v1 mic identity token hmac key";
const V1_SIGNED_TOKEN_HMAC_LABEL: &[u8] = b"presence v1 signed identity token hmac key";
const V1_MIC_KEY_LABEL: &[u8] = b"presence v1 section mic key";
const METADATA_KEY_LABEL: &[u8] = b"presence metadata key";
const METADATA_NONCE_LABEL: &[u8] = b"presence metadata nonce";
const DE_SALT_LABEL: &[u8] = b"presence v1 data element salt";

fn key_derivation_error<E: std::fmt::Display>(err: E) -> PresenceError {
    PresenceError::Crypto(format!("{}: {err}", constants::ERR_KEY_DERIVATION))
}

/// HKDF state extracted from a credential's key seed
#[derive(Clone)]
pub struct KeySeed {
    hkdf: Hkdf<Sha256>,
}

impl KeySeed {
    pub fn new(key_seed: &[u8; KEY_SEED_LEN]) -> Self {
        Self {
            hkdf: Hkdf::<Sha256>::new(None, key_seed),
        }
    }

    fn expand_into(&self, info: &[&[u8]], okm: &mut [u8]) -> Result<()> {
        self.hkdf
            .expand_multi_info(info, okm)
            .map_err(key_derivation_error)
    }

    fn expand_key(&self, label: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
        let mut key = Zeroizing::new([0u8; 32]);
        self.expand_into(&[label], &mut key[..])?;
        Ok(key)
    }

    /// Keystream covering a V0 token and its data elements
    pub fn v0_keystream(&self, salt: &[u8; 2], len: usize) -> Result<Zeroizing<Vec<u8>>> {
        let mut keystream = Zeroizing::new(vec![0u8; len]);
        self.expand_into(&[V0_KEYSTREAM_LABEL, &salt[..]], keystream.as_mut_slice())?;
        Ok(keystream)
    }

    pub fn v0_identity_token_hmac_key(&self) -> Result<Zeroizing<[u8; 32]>> {
        self.expand_key(V0_TOKEN_HMAC_LABEL)
    }

    /// Keystream covering a V1 token and the encrypted remainder of a section
    pub fn v1_keystream(&self, salt: &[u8; 16], len: usize) -> Result<Zeroizing<Vec<u8>>> {
        let mut keystream = Zeroizing::new(vec![0u8; len]);
        self.expand_into(&[V1_KEYSTREAM_LABEL, &salt[..]], keystream.as_mut_slice())?;
        Ok(keystream)
    }

    pub fn v1_mic_identity_token_hmac_key(&self) -> Result<Zeroizing<[u8; 32]>> {
        self.expand_key(V1_MIC_TOKEN_HMAC_LABEL)
    }

    pub fn v1_signed_identity_token_hmac_key(&self) -> Result<Zeroizing<[u8; 32]>> {
        self.expand_key(V1_SIGNED_TOKEN_HMAC_LABEL)
    }

    pub fn v1_mic_key(&self) -> Result<Zeroizing<[u8; 32]>> {
        self.expand_key(V1_MIC_KEY_LABEL)
    }

    /// AEAD key and nonce protecting this credential's metadata
    pub fn metadata_keys(&self) -> Result<MetadataKeys> {
        let key = self.expand_key(METADATA_KEY_LABEL)?;
        let mut nonce = Zeroizing::new([0u8; 12]);
        self.expand_into(&[METADATA_NONCE_LABEL], &mut nonce[..])?;
        Ok(MetadataKeys { key, nonce })
    }
}

/// ChaCha20-Poly1305 key and nonce for credential metadata
#[derive(Clone)]
pub struct MetadataKeys {
    key: Zeroizing<[u8; 32]>,
    nonce: Zeroizing<[u8; 12]>,
}

impl MetadataKeys {
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key[..]));
        cipher
            .encrypt(Nonce::from_slice(&self.nonce[..]), plaintext)
            .map_err(|_| PresenceError::Crypto(constants::ERR_METADATA_ENCRYPTION.to_string()))
    }

    /// Decrypt and authenticate metadata.
    ///
    /// # Errors
    /// Returns [`PresenceError::DecryptionFailure`] if the tag does not verify.
    pub fn open(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key[..]));
        cipher
            .decrypt(Nonce::from_slice(&self.nonce[..]), ciphertext)
            .map_err(|_| PresenceError::DecryptionFailure)
    }
}

/// Encrypt credential metadata under keys derived from `key_seed`
pub fn encrypt_metadata(key_seed: &[u8; KEY_SEED_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    KeySeed::new(key_seed).metadata_keys()?.seal(plaintext)
}

/// Derive the salt for the data element at `offset` of an encrypted V1 section
pub fn derive_de_salt(section_salt: &[u8; 16], offset: u8) -> Result<[u8; 16]> {
    let hkdf = Hkdf::<Sha256>::new(None, section_salt);
    let mut salt = [0u8; 16];
    hkdf.expand_multi_info(&[DE_SALT_LABEL, &[offset][..]], &mut salt)
        .map_err(key_derivation_error)?;
    Ok(salt)
}

fn new_mac(key: &[u8]) -> Result<HmacSha256> {
    <HmacSha256 as Mac>::new_from_slice(key).map_err(key_derivation_error)
}

/// HMAC-SHA256 over the concatenation of `parts`
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; HMAC_LEN]> {
    let mut mac = new_mac(key)?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Constant-time check of a full HMAC-SHA256 tag
pub fn hmac_sha256_verify(key: &[u8], data: &[u8], expected: &[u8; HMAC_LEN]) -> Result<bool> {
    let mut mac = new_mac(key)?;
    mac.update(data);
    Ok(mac.verify_slice(expected).is_ok())
}

/// Constant-time check of a left-truncated HMAC-SHA256 tag
pub fn hmac_sha256_verify_truncated(key: &[u8], parts: &[&[u8]], tag: &[u8]) -> Result<bool> {
    let mut mac = new_mac(key)?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.verify_truncated_left(tag).is_ok())
}

/// XOR `keystream` into `data` in place; `keystream` must be at least as long
pub fn xor_in_place(data: &mut [u8], keystream: &[u8]) {
    data.iter_mut()
        .zip(keystream.iter())
        .for_each(|(byte, key)| *byte ^= key);
}

/// Parse a 32-byte Ed25519 public key; `None` if it is not a valid point
pub fn parse_verifying_key(bytes: &[u8; 32]) -> Option<VerifyingKey> {
    VerifyingKey::from_bytes(bytes).ok()
}

pub fn verify_signature(key: &VerifyingKey, message: &[u8], signature: &[u8; V1_SIGNATURE_LEN]) -> bool {
    key.verify(message, &Signature::from_bytes(signature)).is_ok()
}

/// Public key matching a 32-byte Ed25519 signing key
pub fn signing_public_key(secret: &[u8; 32]) -> [u8; 32] {
    SigningKey::from_bytes(secret).verifying_key().to_bytes()
}

pub fn sign(secret: &[u8; 32], message: &[u8]) -> [u8; V1_SIGNATURE_LEN] {
    SigningKey::from_bytes(secret).sign(message).to_bytes()
}

/// Fill an array from the system random source
pub fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    getrandom::fill(&mut bytes)
        .map_err(|e| PresenceError::Crypto(format!("{}: {e}", constants::ERR_RANDOM_SOURCE)))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::v1::V1_MIC_LEN;

    fn decrypt_metadata(key_seed: &[u8; KEY_SEED_LEN], ciphertext: &[u8]) -> Result<Vec<u8>> {
        KeySeed::new(key_seed).metadata_keys()?.open(ciphertext)
    }

    const SEED: [u8; 32] = [0x11; 32];

    #[test]
    fn test_labels_produce_distinct_keys() {
        let seed = KeySeed::new(&SEED);
        let a = seed.v0_identity_token_hmac_key().unwrap();
        let b = seed.v1_mic_identity_token_hmac_key().unwrap();
        let c = seed.v1_signed_identity_token_hmac_key().unwrap();
        let d = seed.v1_mic_key().unwrap();
        assert_ne!(*a, *b);
        assert_ne!(*b, *c);
        assert_ne!(*c, *d);
    }

    #[test]
    fn test_keystream_depends_on_salt() {
        let seed = KeySeed::new(&SEED);
        let a = seed.v0_keystream(&[0, 1], 21).unwrap();
        let b = seed.v0_keystream(&[0, 2], 21).unwrap();
        assert_eq!(a.len(), 21);
        assert_ne!(*a, *b);
        // Prefix stability: shorter expansions are prefixes of longer ones
        let c = seed.v0_keystream(&[0, 1], 16).unwrap();
        assert_eq!(&a[..16], c.as_slice());
    }

    #[test]
    fn test_metadata_roundtrip_and_tamper() {
        let ciphertext = encrypt_metadata(&SEED, b"device name").unwrap();
        assert_eq!(decrypt_metadata(&SEED, &ciphertext).unwrap(), b"device name");

        let mut tampered = ciphertext.clone();
        tampered[0] ^= 1;
        assert!(matches!(
            decrypt_metadata(&SEED, &tampered),
            Err(PresenceError::DecryptionFailure)
        ));
        assert!(decrypt_metadata(&[0x22; 32], &ciphertext).is_err());
    }

    #[test]
    fn test_hmac_verification() {
        let tag = hmac_sha256(b"key", &[&b"to"[..], &b"ken"[..]]).unwrap();
        assert!(hmac_sha256_verify(b"key", b"token", &tag).unwrap());
        assert!(!hmac_sha256_verify(b"key", b"tokem", &tag).unwrap());
        assert!(hmac_sha256_verify_truncated(b"key", &[&b"token"[..]], &tag[..V1_MIC_LEN]).unwrap());
        assert!(!hmac_sha256_verify_truncated(b"key", &[&b"token"[..]], &tag[V1_MIC_LEN..]).unwrap());
    }

    #[test]
    fn test_de_salt_varies_with_offset() {
        let salt = [7u8; 16];
        assert_ne!(derive_de_salt(&salt, 0).unwrap(), derive_de_salt(&salt, 1).unwrap());
        assert_eq!(derive_de_salt(&salt, 3).unwrap(), derive_de_salt(&salt, 3).unwrap());
    }

    #[test]
    fn test_signature_roundtrip() {
        let secret = [9u8; 32];
        let public = parse_verifying_key(&signing_public_key(&secret)).unwrap();
        let signature = sign(&secret, b"section");
        assert!(verify_signature(&public, b"section", &signature));
        assert!(!verify_signature(&public, b"sectiom", &signature));
    }

    #[test]
    fn test_xor_is_involution() {
        let mut data = *b"plaintext";
        let keystream = [0x5Au8; 9];
        xor_in_place(&mut data, &keystream);
        assert_ne!(&data, b"plaintext");
        xor_in_place(&mut data, &keystream);
        assert_eq!(&data, b"plaintext");
    }

    #[test]
    fn test_random_bytes() {
        let a = random_bytes::<16>().unwrap();
        let b = random_bytes::<16>().unwrap();
        assert_ne!(a, b);
    }
}
