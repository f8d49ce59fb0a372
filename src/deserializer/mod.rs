//! # Deserializer
//!
//! Turns a raw advertisement plus a [`CredentialBook`] into a typed result.
//!
//! ## Outcomes
//! - [`DeserializeResult::V0`] / [`DeserializeResult::V1`]: structurally valid
//!   advertisement. Encrypted content that no credential opens is reported as
//!   [`V0Advertisement::NoMatchingCredentials`] or as an undecryptable V1
//!   section count, never as an error.
//! - [`DeserializeResult::Error`]: structurally invalid input. The reason is
//!   logged at debug level and counted in the metrics.
//! - `Err(PresenceError::ResourceExhausted)`: decoding would exceed the
//!   configured number of live decoded advertisements.
//!
//! ## Ownership
//! Decoded advertisements hold a slot until dropped. The `into_*` projections
//! consume their receiver and pass the slot along, so a consumed value cannot
//! be touched again:
//! ```compile_fail
//! use presence_protocol::core::byte_buffer::RawAdvertisement;
//! use presence_protocol::credential::{CredentialBook, CredentialSlab};
//! use presence_protocol::deserializer::deserialize_advertisement;
//!
//! let book = CredentialBook::try_create_from_slab(CredentialSlab::create().unwrap()).unwrap();
//! let adv = RawAdvertisement::try_from_slice(&[0x00, 0x15, 0x03]).unwrap();
//! let result = deserialize_advertisement(&adv, &book).unwrap();
//! let _v0 = result.into_v0();
//! let _kind = result.kind();
//! ```
//!
//! ## Example
//! ```rust
//! use presence_protocol::core::byte_buffer::RawAdvertisement;
//! use presence_protocol::credential::{CredentialBook, CredentialSlab};
//! use presence_protocol::deserializer::{deserialize_advertisement, DeserializedIdentityKind};
//! use presence_protocol::protocol::v0::V0DataElement;
//!
//! let book = CredentialBook::try_create_from_slab(CredentialSlab::create()?)?;
//! let adv = RawAdvertisement::try_from_slice(&[0x00, 0x03, 0x15, 0x03])?;
//!
//! let legible = deserialize_advertisement(&adv, &book)?.into_v0().into_legible();
//! assert_eq!(legible.identity_kind(), DeserializedIdentityKind::Plaintext);
//! assert_eq!(legible.num_des(), 1);
//!
//! let payload = legible.into_payload();
//! match payload.try_get_de(0)? {
//!     V0DataElement::TxPower(power) => assert_eq!(power.as_i8(), 3),
//!     other => panic!("unexpected {other:?}"),
//! }
//! # Ok::<(), presence_protocol::error::PresenceError>(())
//! ```

pub mod v0;
pub mod v1;

pub use v0::{LegibleV0Advertisement, V0Advertisement, V0IdentityDetails, V0Payload};
pub use v1::{
    DeserializedV1Advertisement, DeserializedV1Section, LegibleV1Sections, V1IdentityDetails,
};

use crate::config::{contract_violation, PanicReason};
use crate::core::byte_buffer::RawAdvertisement;
use crate::core::handle_map::HandleError;
use crate::credential::CredentialBook;
use crate::error::{DeserializeError, PresenceError, Result};
use crate::protocol::AdvertisementVersion;
use crate::utils::metrics::{global_metrics, Timer};
use tracing::{debug, instrument};

/// Whether decoded content was broadcast in the clear or decrypted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeserializedIdentityKind {
    Plaintext,
    Decrypted,
}

/// Kind tag of a [`DeserializeResult`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeserializeResultKind {
    V0,
    V1,
    Error,
}

/// Outcome of one deserialize call
#[derive(Debug)]
pub enum DeserializeResult {
    V0(V0Advertisement),
    V1(DeserializedV1Advertisement),
    Error,
}

impl DeserializeResult {
    pub fn kind(&self) -> DeserializeResultKind {
        match self {
            DeserializeResult::V0(_) => DeserializeResultKind::V0,
            DeserializeResult::V1(_) => DeserializeResultKind::V1,
            DeserializeResult::Error => DeserializeResultKind::Error,
        }
    }

    /// Consume the result as a V0 advertisement.
    ///
    /// Calling this on any other kind is a contract violation.
    pub fn into_v0(self) -> V0Advertisement {
        match self {
            DeserializeResult::V0(adv) => adv,
            _ => contract_violation(PanicReason::EnumCastFailed),
        }
    }

    /// Consume the result as a V1 advertisement.
    ///
    /// Calling this on any other kind is a contract violation.
    pub fn into_v1(self) -> DeserializedV1Advertisement {
        match self {
            DeserializeResult::V1(adv) => adv,
            _ => contract_violation(PanicReason::EnumCastFailed),
        }
    }
}

/// Failure of a version-specific decoder
pub(crate) enum DecodeError {
    /// Input is malformed; reported as `DeserializeResult::Error`
    Structural(DeserializeError),
    /// Surfaced to the caller unchanged
    Fatal(PresenceError),
}

impl From<DeserializeError> for DecodeError {
    fn from(err: DeserializeError) -> Self {
        DecodeError::Structural(err)
    }
}

impl From<PresenceError> for DecodeError {
    fn from(err: PresenceError) -> Self {
        DecodeError::Fatal(err)
    }
}

impl From<HandleError> for DecodeError {
    fn from(err: HandleError) -> Self {
        DecodeError::Fatal(err.into())
    }
}

/// Decode `adv` against the credentials in `book`.
///
/// # Errors
/// Only [`PresenceError::ResourceExhausted`] (and key derivation failures,
/// which cannot occur for well-formed input lengths) are returned as `Err`;
/// every structural problem yields `Ok(DeserializeResult::Error)`.
#[instrument(level = "debug", skip_all, fields(adv_len = adv.len()))]
pub fn deserialize_advertisement(
    adv: &RawAdvertisement,
    book: &CredentialBook,
) -> Result<DeserializeResult> {
    let _timer = Timer::start("deserialize_advertisement");
    let bytes = adv.as_slice();
    let metrics = global_metrics();

    let decoded = match bytes.first() {
        None => Err(DecodeError::Structural(DeserializeError::EmptyAdvertisement)),
        Some(&header) => match AdvertisementVersion::from_header(header) {
            Err(err) => Err(DecodeError::Structural(err)),
            Ok(AdvertisementVersion::V0) => {
                v0::deserialize(bytes, &book.contents()).map(DeserializeResult::V0)
            }
            Ok(AdvertisementVersion::V1) => {
                v1::deserialize(bytes, &book.contents()).map(DeserializeResult::V1)
            }
        },
    };

    match decoded {
        Ok(result) => {
            match result.kind() {
                DeserializeResultKind::V0 => metrics.v0_advertisement(),
                DeserializeResultKind::V1 => metrics.v1_advertisement(),
                DeserializeResultKind::Error => metrics.structural_error(),
            }
            Ok(result)
        }
        Err(DecodeError::Structural(err)) => {
            debug!(error = %err, "Rejected malformed advertisement");
            metrics.structural_error();
            Ok(DeserializeResult::Error)
        }
        Err(DecodeError::Fatal(err)) => Err(err),
    }
}
