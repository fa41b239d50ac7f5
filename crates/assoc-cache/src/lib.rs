//! Lazily computed, versioned values attached to long-lived owner objects.
//!
//! A [`CacheKind`] describes one independent computation. Calling [`CacheKind::get`] with an
//! owner computes the value once and associates it with that owner; subsequent calls return the
//! cached value through a lock-free fast path. [`CacheKind::remove`] starts a new epoch for the
//! kind, after which the value is computed again on the next `get`.
//!
//! Owners only need to host a single [`AssociationSlot`], exposed through the [`CacheOwner`]
//! trait. The slot lazily creates the owner's backing store, which holds the exact mapping from
//! kinds to entries plus a small open-addressed cache array that readers probe without locking.
//!
//! ```
//! use std::convert::Infallible;
//! use assoc_cache::{AssociationSlot, CacheKind, CacheOwner};
//!
//! struct Document {
//!     text: String,
//!     slot: AssociationSlot,
//! }
//!
//! impl CacheOwner for Document {
//!     fn association_slot(&self) -> &AssociationSlot {
//!         &self.slot
//!     }
//! }
//!
//! let word_count = CacheKind::from_fn(|doc: &Document| {
//!     Ok::<_, Infallible>(doc.text.split_whitespace().count())
//! });
//!
//! let doc = Document {
//!     text: "a lazily computed value".into(),
//!     slot: AssociationSlot::new(),
//! };
//! assert_eq!(*word_count.get(&doc).unwrap(), 4);
//! ```

#![warn(missing_docs)]

#[macro_use]
pub mod metrics;

mod config;
mod entry;
mod kind;
mod owner;
mod probe;
mod store;
mod utils;
mod version;


pub use config::{ConfigError, StoreConfig};
pub use entry::EntryState;
pub use kind::{CacheKind, ComputeFn, ComputeValue};
pub use owner::{AssociationSlot, CacheOwner, StoreStats};
pub use version::KindId;

/// Number of slots, starting at the home slot, that the fast path inspects for an entry.
pub const PROBE_LIMIT: usize = 6;

/// Mask applied to slot hashes; also bounds the capacity of a cache array.
pub const HASH_MASK: u32 = u32::MAX >> 2;
