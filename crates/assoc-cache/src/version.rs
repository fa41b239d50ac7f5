//! Kind identities, slot hashes and epochs.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::HASH_MASK;

/// Golden-ratio increment that spreads consecutive kinds across the cache array.
const HASH_INCREMENT: u32 = 0x61c8_8647;

static NEXT_SLOT_HASH: AtomicU32 = AtomicU32::new(0);
static NEXT_KIND_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies a [`CacheKind`](crate::CacheKind) within the backing store of an owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KindId(u64);

impl fmt::Display for KindId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kind#{}", self.0)
    }
}

/// The part of a kind that entries link back to.
pub(crate) struct KindState {
    id: KindId,
    slot_hash: u32,
    epoch: AtomicU64,
}

impl KindState {
    pub fn new() -> Arc<Self> {
        let slot_hash = NEXT_SLOT_HASH.fetch_add(HASH_INCREMENT, Ordering::Relaxed) & HASH_MASK;
        Arc::new(KindState {
            id: KindId(NEXT_KIND_ID.fetch_add(1, Ordering::Relaxed)),
            slot_hash,
            epoch: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> KindId {
        self.id
    }

    pub fn slot_hash(&self) -> u32 {
        self.slot_hash
    }

    /// Loads the current epoch.
    ///
    /// This is the one load every reader depends on to observe a `remove` from another thread.
    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn version(self: &Arc<Self>) -> Version {
        Version {
            kind: Arc::downgrade(self),
            epoch: self.current_epoch(),
        }
    }

    /// Starts a new epoch, turning every entry of the previous one stale on all owners.
    pub fn bump_version(self: &Arc<Self>) -> Version {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        Version {
            kind: Arc::downgrade(self),
            epoch,
        }
    }
}

impl fmt::Debug for KindState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KindState")
            .field("id", &self.id)
            .field("slot_hash", &format_args!("{:#x}", self.slot_hash))
            .field("epoch", &self.current_epoch())
            .finish()
    }
}

/// One epoch of validity of a kind.
///
/// Versions are compared by identity: two versions are the same if they refer to the same kind
/// allocation and carry the same epoch. The weak link keeps that allocation from being reused
/// while any entry still refers to it.
#[derive(Clone)]
pub(crate) struct Version {
    kind: Weak<KindState>,
    epoch: u64,
}

impl Version {
    /// A version that belongs to no kind and thus never matches.
    pub fn dead() -> Self {
        Version {
            kind: Weak::new(),
            epoch: 0,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// The kind this version belongs to, unless it was dropped in the meantime.
    pub fn kind(&self) -> Option<Arc<KindState>> {
        self.kind.upgrade()
    }

    pub fn belongs_to(&self, kind: &Arc<KindState>) -> bool {
        std::ptr::eq(self.kind.as_ptr(), Arc::as_ptr(kind))
    }

    /// Whether this is the current version of `kind`, without touching any reference counts.
    pub fn is_current_for(&self, kind: &Arc<KindState>) -> bool {
        self.belongs_to(kind) && self.epoch == kind.current_epoch()
    }

    pub fn same_as(&self, other: &Version) -> bool {
        Weak::ptr_eq(&self.kind, &other.kind) && self.epoch == other.epoch
    }

    /// Whether the kind is still alive and has not moved on to a newer epoch.
    pub fn is_live(&self) -> bool {
        self.kind()
            .is_some_and(|kind| kind.current_epoch() == self.epoch)
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Some(kind) => write!(f, "Version({}@{})", kind.id(), self.epoch),
            None => write!(f, "Version(<dead>@{})", self.epoch),
        }
    }
}
