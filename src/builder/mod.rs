//! # Advertisement Builders
//!
//! Encoders producing advertisements the deserializer accepts.
//!
//! ## Components
//! - **V0AdvertisementBuilder**: one flat list of data elements, public or
//!   encrypted to a single broadcast credential (24 bytes max)
//! - **V1AdvertisementBuilder**: up to eight sections of at most 254 bytes in total
//! - **V1SectionBuilder**: one public, MIC-authenticated or signed section
//!
//! Both advertisement builders occupy a handle slot until serialized or dropped,
//! so their ceilings are configured through [`crate::config::GlobalConfig`]
//! like every other slot-backed object.

pub mod v0;
pub mod v1;

pub use v0::V0AdvertisementBuilder;
pub use v1::{V1AdvertisementBuilder, V1SectionBuilder};
