//! # Presence Protocol
//!
//! Credential-scoped deserialization and encoding of Nearby Presence
//! advertisements.
//!
//! A receiver collects discovery credentials into a [`CredentialSlab`], freezes
//! the slab into a [`CredentialBook`], and hands every received advertisement
//! together with the book to [`deserialize_advertisement`]. Encrypted content
//! is decrypted and authenticated by whichever credential produced it; content
//! no credential opens is reported as such rather than as an error.
//!
//! ## Modules
//! - [`core`]: bounded byte buffers and the handle arena
//! - [`protocol`]: V0 / V1 wire grammar and value types
//! - [`credential`]: credentials, slabs and books
//! - [`deserializer`]: advertisement decoding and the decoded-object API
//! - [`builder`]: advertisement encoding
//! - [`config`]: process-wide limits, panic handler and file/env configuration
//! - [`utils`]: crypto primitives, logging and metrics
//!
//! ## Example
//! ```rust
//! use presence_protocol::builder::V0AdvertisementBuilder;
//! use presence_protocol::credential::{
//!     CredentialBook, CredentialSlab, V0BroadcastCredential,
//! };
//! use presence_protocol::deserializer::{deserialize_advertisement, DeserializedIdentityKind};
//! use presence_protocol::protocol::v0::{TxPower, V0DataElement};
//!
//! let broadcast = V0BroadcastCredential::new([0x11; 32], [0x22; 14]);
//! let discovery = broadcast.derive_discovery_credential(7, Vec::new())?;
//!
//! let mut slab = CredentialSlab::create()?;
//! slab.add_v0_credential(discovery)?;
//! let book = CredentialBook::try_create_from_slab(slab)?;
//!
//! let mut builder = V0AdvertisementBuilder::create_encrypted(broadcast, [0x01, 0x02])?;
//! builder.try_add_de(V0DataElement::TxPower(TxPower::try_build_from_i8(-20)?))?;
//! let adv = builder.try_serialize()?;
//!
//! let legible = deserialize_advertisement(&adv, &book)?.into_v0().into_legible();
//! assert_eq!(legible.identity_kind(), DeserializedIdentityKind::Decrypted);
//! let payload = legible.into_payload();
//! assert_eq!(payload.try_get_identity_details()?.cred_id(), 7);
//! # Ok::<(), presence_protocol::error::PresenceError>(())
//! ```

pub mod builder;
pub mod config;
pub mod core;
pub mod credential;
pub mod deserializer;
pub mod error;
pub mod protocol;
pub mod utils;

pub use config::{GlobalConfig, PresenceConfig};
pub use crate::core::byte_buffer::{ByteBuffer, RawAdvertisement};
pub use credential::{CredentialBook, CredentialSlab};
pub use deserializer::{deserialize_advertisement, DeserializeResult, DeserializeResultKind};
pub use error::{PresenceError, Result};
