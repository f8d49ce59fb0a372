//! # Error Types
//!
//! Error handling for advertisement deserialization, credential management
//! and advertisement building.
//!
//! This module defines every error variant a caller can observe, from buffer
//! bounds violations to resource exhaustion of the handle tables.
//!
//! ## Error Categories
//! - **Resource Exhaustion**: a handle table reached its configured ceiling
//! - **Bounds Errors**: out-of-range section / data element access, oversized buffers
//! - **Builder Errors**: flavor mismatches, full advertisements, empty advertisements
//! - **Cryptographic Errors**: metadata decryption failures, invalid keys
//! - **Configuration Errors**: invalid or already-applied configuration
//!
//! Structural problems in received advertisements are *not* surfaced as
//! [`PresenceError`]. They are described by [`DeserializeError`], logged, and
//! collapsed into the terminal `DeserializeResult::Error` outcome.
//!
//! ## Example Usage
//! ```rust
//! use presence_protocol::core::byte_buffer::ByteBuffer;
//! use presence_protocol::error::PresenceError;
//!
//! let result = ByteBuffer::<2>::try_from_slice(&[1, 2, 3]);
//! assert!(matches!(result, Err(PresenceError::BufferTooLarge { len: 3, capacity: 2 })));
//! ```

use crate::core::handle_map::{HandleClass, HandleError};
use crate::protocol::v0::{ActionType, Flavor};
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Configuration errors
    pub const ERR_CONFIG_ALREADY_APPLIED: &str = "Global configuration value already set or observed";
    pub const ERR_CONFIG_INVALID: &str = "Configuration validation failed";

    /// Cryptographic errors
    pub const ERR_KEY_DERIVATION: &str = "Key derivation failed";
    pub const ERR_METADATA_ENCRYPTION: &str = "Metadata encryption failed";
    pub const ERR_RANDOM_SOURCE: &str = "System random source unavailable";

    /// Logging errors
    pub const ERR_SUBSCRIBER_INSTALL: &str = "Failed to install tracing subscriber";
}

/// PresenceError is the primary error type for all library operations
#[derive(Error, Debug)]
pub enum PresenceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Resource exhausted: too many live {0} handles")]
    ResourceExhausted(HandleClass),

    #[error("Handle error: {0}")]
    Handle(HandleError),

    #[error("Index {index} out of range (length {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Buffer too large: {len} bytes exceeds capacity of {capacity}")]
    BufferTooLarge { len: usize, capacity: usize },

    #[error("Invalid hex string: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("Action {action:?} is not legal in a {flavor:?} advertisement")]
    FlavorMismatch { action: ActionType, flavor: Flavor },

    #[error("Data element flavor {de:?} does not match advertisement flavor {adv:?}")]
    DataElementFlavorMismatch { de: Flavor, adv: Flavor },

    #[error("TX power {0} is out of range")]
    TxPowerOutOfRange(i8),

    #[error("Context sync sequence number {0} does not fit in 4 bits")]
    ContextSyncSequenceNumberOutOfRange(u8),

    #[error("Advertisement full: adding {requested} bytes would exceed {max} bytes")]
    AdvertisementFull { requested: usize, max: usize },

    #[error("Advertisement already holds the maximum of {0} sections")]
    TooManySections(usize),

    #[error("Advertisement contains no data elements or sections")]
    EmptyAdvertisement,

    #[error("Invalid data element: {0}")]
    InvalidDataElement(String),

    #[error("Content is plaintext; no identity is available")]
    NotEncrypted,

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<HandleError> for PresenceError {
    fn from(err: HandleError) -> Self {
        match err {
            HandleError::Full { class, .. } => PresenceError::ResourceExhausted(class),
            other => PresenceError::Handle(other),
        }
    }
}

/// Structural reasons a received advertisement is rejected.
///
/// These never escape [`crate::deserializer::deserialize_advertisement`]; they
/// are logged at debug level and reported as `DeserializeResult::Error`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeserializeError {
    #[error("Advertisement is empty")]
    EmptyAdvertisement,

    #[error("Unsupported advertisement version {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid advertisement header 0x{0:02x}")]
    InvalidHeader(u8),

    #[error("Advertisement of {0} bytes exceeds the maximum length")]
    TooLong(usize),

    #[error("Truncated {0}")]
    Truncated(&'static str),

    #[error("Payload contains no data elements")]
    NoDataElements,

    #[error("Data element of type {de_type} has invalid length {len}")]
    InvalidLength { de_type: u32, len: usize },

    #[error("Unknown data element type {0}")]
    UnknownDataElementType(u32),

    #[error("Identity data element in an unexpected position")]
    UnexpectedIdentity,

    #[error("Actions bits 0x{bits:04x} are not legal in a {flavor:?} advertisement")]
    IllegalActions { bits: u16, flavor: Flavor },

    #[error("TX power value {0} is out of range")]
    InvalidTxPower(i8),

    #[error("Data element type encoding overflows")]
    InvalidDataElementType,

    #[error("Section of length zero")]
    EmptySection,

    #[error("Unknown section identity 0x{0:02x}")]
    UnknownSectionIdentity(u8),

    #[error("Advertisement contains {0} sections")]
    InvalidSectionCount(usize),
}

/// Type alias for Results using PresenceError
pub type Result<T> = std::result::Result<T, PresenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_handle_maps_to_resource_exhausted() {
        let err: PresenceError = HandleError::Full {
            class: HandleClass::CredentialBook,
            max: 4,
        }
        .into();
        assert!(matches!(
            err,
            PresenceError::ResourceExhausted(HandleClass::CredentialBook)
        ));
    }

    #[test]
    fn test_error_messages() {
        let err = PresenceError::IndexOutOfRange { index: 3, len: 1 };
        assert_eq!(err.to_string(), "Index 3 out of range (length 1)");

        let err = DeserializeError::InvalidHeader(0xE0);
        assert_eq!(err.to_string(), "Invalid advertisement header 0xe0");
    }
}
