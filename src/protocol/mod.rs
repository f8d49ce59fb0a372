//! # Wire Protocol
//!
//! Grammar and value types of Nearby Presence advertisements.
//!
//! The first byte of every advertisement carries the version in its top three
//! bits. Everything after that byte is version specific:
//! - [`v0`]: flat data element sequence, optionally encrypted as a whole
//! - [`v1`]: up to eight sections, each public or encrypted to one credential
//!
//! This module only knows about bytes. Credential matching and the handle
//! lifecycle live in [`crate::deserializer`]; encoding lives in [`crate::builder`].

pub mod v0;
pub mod v1;

use crate::error::DeserializeError;

/// Advertisement format version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdvertisementVersion {
    V0,
    V1,
}

impl AdvertisementVersion {
    /// Version encoded in the top 3 bits of the header byte
    pub fn from_header(header: u8) -> Result<Self, DeserializeError> {
        match header >> 5 {
            0 => Ok(AdvertisementVersion::V0),
            1 => Ok(AdvertisementVersion::V1),
            other => Err(DeserializeError::UnsupportedVersion(other)),
        }
    }
}
