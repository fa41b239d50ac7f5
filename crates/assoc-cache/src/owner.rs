use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::config::{ConfigError, StoreConfig};
use crate::store::BackingStore;

/// An object that values can be associated with.
///
/// The owner only has to host an [`AssociationSlot`]. It does not need to know anything about
/// the kinds that attach values to it.
pub trait CacheOwner {
    /// Returns the slot holding this owner's backing store.
    ///
    /// Must return the same slot for the entire lifetime of the owner.
    fn association_slot(&self) -> &AssociationSlot;
}

impl CacheOwner for AssociationSlot {
    fn association_slot(&self) -> &AssociationSlot {
        self
    }
}

impl<T: CacheOwner + ?Sized> CacheOwner for &T {
    fn association_slot(&self) -> &AssociationSlot {
        (**self).association_slot()
    }
}

impl<T: CacheOwner + ?Sized> CacheOwner for Box<T> {
    fn association_slot(&self) -> &AssociationSlot {
        (**self).association_slot()
    }
}

impl<T: CacheOwner + ?Sized> CacheOwner for Arc<T> {
    fn association_slot(&self) -> &AssociationSlot {
        (**self).association_slot()
    }
}

/// The owner-side reference to a lazily created backing store.
///
/// The store is created at most once, by the first `get` or `put` for this owner, and lives as
/// long as the slot.
pub struct AssociationSlot {
    store: OnceCell<BackingStore>,
    config: StoreConfig,
}

impl AssociationSlot {
    /// Creates an empty slot using the default [`StoreConfig`].
    pub fn new() -> Self {
        AssociationSlot {
            store: OnceCell::new(),
            config: StoreConfig::default(),
        }
    }

    /// Creates an empty slot whose backing store will be sized according to `config`.
    pub fn with_config(config: StoreConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(AssociationSlot {
            store: OnceCell::new(),
            config,
        })
    }

    /// Whether a backing store was created for this slot.
    pub fn is_initialized(&self) -> bool {
        self.store.get().is_some()
    }

    /// Returns a snapshot of the backing store's bookkeeping, if there is a store.
    pub fn stats(&self) -> Option<StoreStats> {
        self.store.get().map(BackingStore::stats)
    }

    pub(crate) fn store(&self) -> Option<&BackingStore> {
        self.store.get()
    }

    pub(crate) fn store_or_init(&self) -> &BackingStore {
        self.store.get_or_init(|| BackingStore::new(self.config))
    }
}

impl Default for AssociationSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AssociationSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssociationSlot")
            .field("store", &self.store.get())
            .finish()
    }
}

/// Bookkeeping of a backing store, see [`AssociationSlot::stats`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of kinds in the exact map, including pending computations.
    pub entries: usize,
    /// Number of slots of the cache array.
    pub cache_capacity: usize,
    /// Number of occupied slots of the cache array.
    pub cache_load: usize,
}
