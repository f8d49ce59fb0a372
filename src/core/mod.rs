//! # Core Components
//!
//! Low-level containers shared by every other module.
//!
//! ## Components
//! - **ByteBuffer**: bounds-checked, fixed-capacity byte container for raw advertisements
//! - **HandleMap**: fixed-ceiling slot arena with generation-checked handles
//!
//! ## Resource Model
//! Every slot-backed object (slabs, books, decoded advertisements, builders)
//! lives in a [`handle_map::HandleMap`] whose ceiling comes from the global
//! configuration. Allocation beyond the ceiling fails; nothing is evicted.

pub mod byte_buffer;
pub mod handle_map;
