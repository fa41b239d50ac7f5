use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::version::{KindState, Version};

/// A computed value with its type erased, so that one store can hold values of many kinds.
pub(crate) type ErasedValue = Arc<dyn Any + Send + Sync>;

/// The lifecycle state of the entry an owner holds for a kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    /// A computation is in flight and no value was installed yet.
    Promise,
    /// A value belonging to the current epoch of the kind.
    Live,
    /// A value of a previous epoch. The next `get` adopts it into the current epoch.
    Stale,
    /// A value whose kind no longer exists.
    Dead,
}

pub(crate) enum EntryValue {
    Promise,
    Resolved(ErasedValue),
    Dead,
}

/// An immutable binding of a version to a value.
pub(crate) struct Entry {
    version: Version,
    value: EntryValue,
}

impl Entry {
    /// The sentinel signalling that a computation for `version` is in flight.
    pub fn promise(version: Version) -> Arc<Self> {
        Arc::new(Entry {
            version,
            value: EntryValue::Promise,
        })
    }

    pub fn resolved(version: Version, value: ErasedValue) -> Arc<Self> {
        Arc::new(Entry {
            version,
            value: EntryValue::Resolved(value),
        })
    }

    /// Marks a vacated slot inside a probe run of the cache array.
    pub fn dead() -> Arc<Self> {
        Arc::new(Entry {
            version: Version::dead(),
            value: EntryValue::Dead,
        })
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn is_promise(&self) -> bool {
        matches!(self.value, EntryValue::Promise)
    }

    pub fn is_live(&self) -> bool {
        self.version.is_live()
    }

    /// Whether a reader of `kind` may return this entry's value.
    pub fn matches(&self, kind: &Arc<KindState>) -> bool {
        matches!(self.value, EntryValue::Resolved(_)) && self.version.is_current_for(kind)
    }

    /// Moves the value over into `version`.
    pub fn refresh_version(&self, version: Version) -> Arc<Self> {
        let value = match &self.value {
            EntryValue::Promise => EntryValue::Promise,
            EntryValue::Resolved(value) => EntryValue::Resolved(Arc::clone(value)),
            EntryValue::Dead => EntryValue::Dead,
        };
        Arc::new(Entry { version, value })
    }

    /// Returns the value if it is resolved and of type `V`.
    pub fn value<V: Any + Send + Sync>(&self) -> Option<Arc<V>> {
        match &self.value {
            EntryValue::Resolved(value) => Arc::clone(value).downcast::<V>().ok(),
            EntryValue::Promise | EntryValue::Dead => None,
        }
    }

    pub fn state(&self, kind: &Arc<KindState>) -> EntryState {
        match self.value {
            EntryValue::Promise => EntryState::Promise,
            EntryValue::Dead => EntryState::Dead,
            EntryValue::Resolved(_) if self.version.is_current_for(kind) => EntryState::Live,
            EntryValue::Resolved(_) if self.version.belongs_to(kind) => EntryState::Stale,
            EntryValue::Resolved(_) => EntryState::Dead,
        }
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self.value {
            EntryValue::Promise => "promise",
            EntryValue::Resolved(_) => "resolved",
            EntryValue::Dead => "dead",
        };
        f.debug_struct("Entry")
            .field("version", &self.version)
            .field("value", &value)
            .finish()
    }
}
