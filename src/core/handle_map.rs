//! # Handle Map
//!
//! Fixed-capacity slot arena backing every live, slot-bound object in the
//! library (credential slabs and books, decoded advertisements, builders).
//!
//! Each allocation occupies exactly one slot until it is deallocated. The
//! arena never grows past its configured ceiling: once `max_active` slots are
//! live, [`HandleMap::allocate`] fails with [`HandleError::Full`] instead of
//! evicting anything.
//!
//! Handles pair a slot index with a generation counter. Deallocating a slot
//! bumps its generation, so a stale handle referring to a recycled slot is
//! rejected with [`HandleError::NotPresent`] rather than reading someone
//! else's data.
//!
//! ## Usage
//! ```rust
//! use presence_protocol::core::handle_map::{HandleClass, HandleMap};
//!
//! let map = HandleMap::with_max_active(HandleClass::CredentialSlab, 1);
//! let handle = map.allocate(|| 7u32).unwrap();
//! assert!(map.allocate(|| 8u32).is_err());
//! assert_eq!(map.deallocate(handle).unwrap(), 7);
//! assert!(map.get(handle, |v| *v).is_err());
//! ```

use crate::utils::metrics::global_metrics;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

/// Resource class of a handle table; used in diagnostics and errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandleClass {
    CredentialSlab,
    CredentialBook,
    V0Payload,
    LegibleV1Sections,
    V0AdvertisementBuilder,
    V1AdvertisementBuilder,
}

impl HandleClass {
    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            HandleClass::CredentialSlab => "credential slab",
            HandleClass::CredentialBook => "credential book",
            HandleClass::V0Payload => "V0 payload",
            HandleClass::LegibleV1Sections => "legible V1 sections",
            HandleClass::V0AdvertisementBuilder => "V0 advertisement builder",
            HandleClass::V1AdvertisementBuilder => "V1 advertisement builder",
        }
    }
}

impl fmt::Display for HandleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Index + generation reference to a slot in a [`HandleMap`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    /// Slot index this handle refers to
    pub fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot at the time of allocation
    pub fn generation(self) -> u32 {
        self.generation
    }
}

/// Errors raised by handle table operations
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleError {
    #[error("{class} table is full ({max} live handles)")]
    Full { class: HandleClass, max: u32 },

    #[error("{class} handle {handle:?} is not present")]
    NotPresent { class: HandleClass, handle: Handle },
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: u32,
}

/// Thread-safe, fixed-ceiling slot arena
pub struct HandleMap<T> {
    class: HandleClass,
    max_active: u32,
    arena: Mutex<Arena<T>>,
}

impl<T> HandleMap<T> {
    /// Create an empty map that holds at most `max_active` live values
    pub fn with_max_active(class: HandleClass, max_active: u32) -> Self {
        Self {
            class,
            max_active,
            arena: Mutex::new(Arena {
                slots: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
        }
    }

    // Arena state is updated atomically under the lock, so a poisoned lock
    // still guards a consistent arena.
    fn lock(&self) -> MutexGuard<'_, Arena<T>> {
        self.arena.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a slot and fill it with the value produced by `make`.
    ///
    /// `make` only runs once a slot has been reserved.
    ///
    /// # Errors
    /// Returns [`HandleError::Full`] if `max_active` values are already live.
    pub fn allocate<F>(&self, make: F) -> Result<Handle, HandleError>
    where
        F: FnOnce() -> T,
    {
        let mut arena = self.lock();
        if arena.live >= self.max_active {
            debug!(class = %self.class, max = self.max_active, "Handle table full");
            global_metrics().resource_exhausted();
            return Err(HandleError::Full {
                class: self.class,
                max: self.max_active,
            });
        }

        let index = match arena.free.pop() {
            Some(index) => index,
            None => {
                // live < max_active <= u32::MAX, and every slot is live when
                // the free list is empty, so the new index fits in a u32.
                let index = arena.slots.len() as u32;
                arena.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                index
            }
        };

        let slot = &mut arena.slots[index as usize];
        slot.value = Some(make());
        let handle = Handle {
            index,
            generation: slot.generation,
        };
        arena.live += 1;
        Ok(handle)
    }

    /// Run `f` against the value behind `handle`
    pub fn get<R, F>(&self, handle: Handle, f: F) -> Result<R, HandleError>
    where
        F: FnOnce(&T) -> R,
    {
        let arena = self.lock();
        arena
            .slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
            .map(f)
            .ok_or(HandleError::NotPresent {
                class: self.class,
                handle,
            })
    }

    /// Run `f` against a mutable reference to the value behind `handle`
    pub fn get_mut<R, F>(&self, handle: Handle, f: F) -> Result<R, HandleError>
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut arena = self.lock();
        arena
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
            .map(f)
            .ok_or(HandleError::NotPresent {
                class: self.class,
                handle,
            })
    }

    /// Release the slot behind `handle`, returning its value.
    ///
    /// The slot's generation is advanced so `handle` can never resolve again.
    pub fn deallocate(&self, handle: Handle) -> Result<T, HandleError> {
        let mut arena = self.lock();
        let value = arena
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| {
                let value = slot.value.take()?;
                slot.generation = slot.generation.wrapping_add(1);
                Some(value)
            })
            .ok_or(HandleError::NotPresent {
                class: self.class,
                handle,
            })?;
        arena.free.push(handle.index);
        arena.live -= 1;
        Ok(value)
    }

    /// Release the slot behind `handle` from a destructor.
    ///
    /// An owned handle is always present, so a failure here is logged rather
    /// than propagated. Returns whether a value was released.
    pub fn release(&self, handle: Handle) -> bool {
        match self.deallocate(handle) {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "Owned handle missing on release");
                false
            }
        }
    }

    /// Number of currently live values
    pub fn live_count(&self) -> u32 {
        self.lock().live
    }

    /// Configured ceiling of live values
    pub fn max_active(&self) -> u32 {
        self.max_active
    }

    /// Resource class of this table
    pub fn class(&self) -> HandleClass {
        self.class
    }
}
