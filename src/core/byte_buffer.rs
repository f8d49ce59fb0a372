//! # Byte Buffer
//!
//! Fixed-capacity, inline byte container used for raw advertisements.
//!
//! Construction is the only point where bounds are checked; a buffer can never
//! hold more than `N` bytes and is immutable afterwards.

use crate::error::{PresenceError, Result};
use std::fmt;

/// Largest advertisement any supported version can produce
pub const MAX_ADV_BUFFER_LEN: usize = 255;

/// Buffer type carrying a raw advertisement of either version
pub type RawAdvertisement = ByteBuffer<MAX_ADV_BUFFER_LEN>;

/// Inline byte array of capacity `N` plus a runtime length
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteBuffer<const N: usize> {
    len: usize,
    bytes: [u8; N],
}

impl<const N: usize> ByteBuffer<N> {
    /// Copy `data` into a new buffer.
    ///
    /// # Errors
    /// Returns [`PresenceError::BufferTooLarge`] if `data` is longer than `N`.
    pub fn try_from_slice(data: &[u8]) -> Result<Self> {
        if data.len() > N {
            return Err(PresenceError::BufferTooLarge {
                len: data.len(),
                capacity: N,
            });
        }
        let mut bytes = [0u8; N];
        bytes[..data.len()].copy_from_slice(data);
        Ok(Self {
            len: data.len(),
            bytes,
        })
    }

    /// Build a buffer from the raw bytes of a string
    pub fn try_from_string(data: &str) -> Result<Self> {
        Self::try_from_slice(data.as_bytes())
    }

    /// Build a buffer from a hex-encoded string (e.g. `"001503"`)
    pub fn try_from_hex(hex_str: &str) -> Result<Self> {
        let decoded = hex::decode(hex_str)?;
        Self::try_from_slice(&decoded)
    }

    /// Capacity of this buffer type
    pub const fn capacity() -> usize {
        N
    }

    /// Number of valid bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// View of the valid bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Copy of the valid bytes
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    /// Lower-case hex encoding of the valid bytes
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_slice())
    }
}

impl<const N: usize> AsRef<[u8]> for ByteBuffer<N> {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl<const N: usize> TryFrom<&[u8]> for ByteBuffer<N> {
    type Error = PresenceError;

    fn try_from(data: &[u8]) -> Result<Self> {
        Self::try_from_slice(data)
    }
}

impl<const N: usize> fmt::Debug for ByteBuffer<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteBuffer<{N}>({})", self.to_hex())
    }
}

impl<const N: usize> fmt::Display for ByteBuffer<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
