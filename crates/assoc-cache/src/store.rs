//! The per-owner backing store.
//!
//! Every owner gets one [`BackingStore`]. It holds the exact mapping from kinds to their current
//! [`Entry`], plus an open-addressed [`CacheArray`] that readers probe without locking (see the
//! `probe` module). All mutations, including every write to the cache array that is not an
//! opportunistic fast-path relocation, happen under the store lock.
//!
//! Entries are placed into the array at the home slot of their kind, or at most
//! [`PROBE_LIMIT`] - 1 slots after it. Runs of occupied slots are never interrupted by an empty
//! slot while they may still contain reachable entries; vacated slots in the middle of a run
//! hold the dead sentinel instead.

use std::fmt;
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::PROBE_LIMIT;
use crate::config::StoreConfig;
use crate::entry::{Entry, EntryState, ErasedValue};
use crate::owner::StoreStats;
use crate::version::{KindId, KindState};

/// The fast-path cache array. Its length is always a power of two.
pub(crate) struct CacheArray {
    slots: Box<[ArcSwapOption<Entry>]>,
}

impl CacheArray {
    fn new(len: usize) -> Self {
        debug_assert!(len.is_power_of_two());
        CacheArray {
            slots: (0..len).map(|_| ArcSwapOption::empty()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    pub fn home(&self, kind: &KindState) -> usize {
        kind.slot_hash() as usize & self.mask()
    }

    /// Loads the slot at `pos`, which wraps around the end of the array.
    pub fn load(&self, pos: usize) -> Option<Arc<Entry>> {
        self.slots[pos & self.mask()].load_full()
    }

    pub fn store(&self, pos: usize, entry: Option<Arc<Entry>>) {
        self.slots[pos & self.mask()].store(entry)
    }

    /// How many slots `entry` sits past its home slot when placed at `pos`.
    ///
    /// Entries without a kind have no home and are reported as perfectly placed.
    pub fn dislocation(&self, pos: usize, entry: &Entry) -> usize {
        match entry.version().kind() {
            Some(kind) => pos.wrapping_sub(kind.slot_hash() as usize) & self.mask(),
            None => 0,
        }
    }

    fn live_entries(&self) -> impl Iterator<Item = Arc<Entry>> + '_ {
        self.slots
            .iter()
            .filter_map(|slot| slot.load_full())
            .filter(|entry| entry.is_live())
    }
}

impl fmt::Debug for CacheArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.slots.iter().map(|slot| slot.load_full()))
            .finish()
    }
}

/// Everything protected by the store lock.
struct StoreState {
    entries: FxHashMap<KindId, Arc<Entry>>,
    /// Number of occupied slots in the cache array, including dead sentinels.
    load: usize,
    load_limit: usize,
    dead: Arc<Entry>,
}

impl StoreState {
    /// Accounts for overwriting `incumbent` and returns it if it is still worth keeping.
    fn overwritten_entry(&mut self, incumbent: Option<Arc<Entry>>) -> Option<Arc<Entry>> {
        match incumbent {
            None => {
                self.load += 1;
                None
            }
            Some(incumbent) if incumbent.is_live() => Some(incumbent),
            Some(_) => None,
        }
    }

    /// Puts `entry` at `pos` and returns the live entry it displaced.
    ///
    /// When placing `gently`, a live incumbent is not displaced and `entry` is handed back
    /// instead.
    fn place_in_cache(
        &mut self,
        cache: &CacheArray,
        pos: usize,
        entry: Arc<Entry>,
        gently: bool,
    ) -> Option<Arc<Entry>> {
        let incumbent = self.overwritten_entry(cache.load(pos));
        if gently && incumbent.is_some() {
            return Some(entry);
        }
        cache.store(pos, Some(entry));
        incumbent
    }

    /// Adds a resolved entry to the cache array at its home slot.
    ///
    /// A live entry of another kind that occupied the home slot is moved into a free slot within
    /// its own probe window, or dropped from the cache array if there is none.
    fn add_to_cache(&mut self, cache: &CacheArray, entry: Arc<Entry>) {
        debug_assert!(!entry.is_promise(), "promises must never be cached");
        let Some(kind) = entry.version().kind() else {
            return;
        };

        let home = cache.home(&kind);
        let Some(mut displaced) = self.place_in_cache(cache, home, entry, false) else {
            return;
        };
        if displaced.version().belongs_to(&kind) {
            // An older copy of the very same entry.
            return;
        }

        let home2 = home.wrapping_sub(cache.dislocation(home, &displaced));
        for offset in 0..PROBE_LIMIT {
            match self.place_in_cache(cache, home2.wrapping_add(offset), displaced, true) {
                None => return,
                Some(entry) => displaced = entry,
            }
        }

        tracing::trace!(entry = ?displaced, "Dropped displaced entry from cache array");
        metric!(counter("assoc_cache.cache_drop") += 1);
    }

    /// Clears stale and dead slots in `begin..begin + count`, pulling dislocated entries forward
    /// into the vacated slots where possible.
    fn remove_stale_entries(&mut self, cache: &CacheArray, begin: usize, count: usize) {
        let mut removed = 0;
        for pos in begin..begin + count {
            match cache.load(pos) {
                Some(entry) if !entry.is_live() => {}
                _ => continue,
            }
            let replacement = self.find_replacement(cache, pos);
            if replacement.is_none() {
                removed += 1;
            }
            cache.store(pos, replacement);
        }
        self.load = self.load.saturating_sub(removed);
    }

    /// Finds a live entry after `home1` in the same run that may move into `home1`.
    ///
    /// An entry whose home is exactly `home1` is preferred, otherwise the furthest candidate
    /// whose home lies before `home1`. The candidate's old slot is vacated.
    fn find_replacement(&mut self, cache: &CacheArray, home1: usize) -> Option<Arc<Entry>> {
        let mut best: Option<(usize, Arc<Entry>, bool)> = None;
        for pos2 in home1 + 1..home1 + PROBE_LIMIT {
            let Some(entry2) = cache.load(pos2) else {
                break;
            };
            if !entry2.is_live() {
                continue;
            }
            let dislocation = cache.dislocation(pos2, &entry2);
            if dislocation == 0 {
                continue;
            }
            // Signed, as the home of a run wrapping around the end lies before slot 0.
            let home2 = pos2 as isize - dislocation as isize;
            let home1 = home1 as isize;
            if home2 == home1 {
                best = Some((pos2, entry2, true));
            } else if home2 < home1 && !best.as_ref().is_some_and(|(_, _, exact)| *exact) {
                best = Some((pos2, entry2, false));
            }
        }

        let (pos, replacement, _) = best?;
        if cache.load(pos + 1).is_some() {
            // Keep the run intact for entries behind the vacated slot.
            cache.store(pos, Some(Arc::clone(&self.dead)));
        } else {
            cache.store(pos, None);
            self.load = self.load.saturating_sub(1);
        }
        Some(replacement)
    }

    /// Forgets entries of kinds that no longer exist.
    fn purge_dropped_kinds(&mut self) {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.version().kind().is_some());
        let purged = before - self.entries.len();
        if purged > 0 {
            tracing::trace!(purged, "Purged entries of dropped kinds");
        }
    }
}

/// The exact map and fast-path cache array of one owner.
pub(crate) struct BackingStore {
    state: Mutex<StoreState>,
    cache: ArcSwap<CacheArray>,
    pub(crate) dead: Arc<Entry>,
    config: StoreConfig,
}

impl BackingStore {
    pub fn new(config: StoreConfig) -> Self {
        let dead = Entry::dead();
        let len = config.initial_entries;
        tracing::debug!(capacity = len, "Creating backing store");

        BackingStore {
            state: Mutex::new(StoreState {
                entries: FxHashMap::default(),
                load: 0,
                load_limit: config.load_limit(len),
                dead: Arc::clone(&dead),
            }),
            cache: ArcSwap::from_pointee(CacheArray::new(len)),
            dead,
            config,
        }
    }

    /// The cache array as seen by lock-free readers.
    pub(crate) fn cache(&self) -> arc_swap::Guard<Arc<CacheArray>> {
        self.cache.load()
    }

    /// Returns the resolved entry of `kind`, or the promise the caller has to fulfill.
    ///
    /// A resolved entry of a previous epoch is adopted into the current one and offered to the
    /// cache array.
    pub fn start_entry(&self, kind: &Arc<KindState>) -> Arc<Entry> {
        let mut state = self.state.lock();
        let version = kind.version();

        let Some(entry) = state.entries.get(&kind.id()).cloned() else {
            let promise = Entry::promise(version);
            state.entries.insert(kind.id(), Arc::clone(&promise));
            return promise;
        };

        if entry.is_promise() {
            if entry.version().same_as(&version) {
                return entry;
            }
            let promise = Entry::promise(version);
            state.entries.insert(kind.id(), Arc::clone(&promise));
            return promise;
        }

        let entry = if entry.version().same_as(&version) {
            entry
        } else {
            let refreshed = entry.refresh_version(version);
            state.entries.insert(kind.id(), Arc::clone(&refreshed));
            refreshed
        };

        let cache = self.check_cache_load(&mut state);
        state.add_to_cache(&cache, Arc::clone(&entry));
        entry
    }

    /// Installs a computed entry if the promise it was computed for is still pending.
    ///
    /// Returns `None` if something else happened to the entry in the meantime, in which case the
    /// computed value must be discarded.
    pub fn finish_entry(&self, kind: &Arc<KindState>, computed: Arc<Entry>) -> Option<Arc<Entry>> {
        let mut state = self.state.lock();
        let pending = state.entries.get(&kind.id()).is_some_and(|current| {
            current.is_promise() && current.version().same_as(computed.version())
        });
        if !pending {
            return None;
        }

        let version = kind.version();
        let entry = if computed.version().same_as(&version) {
            computed
        } else {
            computed.refresh_version(version)
        };
        state.entries.insert(kind.id(), Arc::clone(&entry));

        let cache = self.check_cache_load(&mut state);
        state.add_to_cache(&cache, Arc::clone(&entry));
        Some(entry)
    }

    /// Removes `promise` after its computation failed, so the next reader starts over.
    pub fn abandon_entry(&self, kind: &KindState, promise: &Arc<Entry>) {
        let mut state = self.state.lock();
        if state
            .entries
            .get(&kind.id())
            .is_some_and(|current| Arc::ptr_eq(current, promise))
        {
            state.entries.remove(&kind.id());
        }
    }

    /// Invalidates the resolved entry of `kind`, returning whether there was one.
    ///
    /// Pending computations are left alone.
    pub fn remove_entry(&self, kind: &Arc<KindState>) -> bool {
        let mut state = self.state.lock();
        match state.entries.remove(&kind.id()) {
            None => false,
            Some(promise) if promise.is_promise() => {
                state.entries.insert(kind.id(), promise);
                false
            }
            Some(_) => {
                kind.bump_version();
                let cache = self.cache.load_full();
                state.remove_stale_entries(&cache, kind.slot_hash() as usize, PROBE_LIMIT);
                true
            }
        }
    }

    /// Replaces whatever `kind` holds with `value`, starting a new epoch if there was anything.
    pub fn change_entry(&self, kind: &Arc<KindState>, value: ErasedValue) {
        let mut state = self.state.lock();
        if state.entries.contains_key(&kind.id()) {
            kind.bump_version();
            let cache = self.cache.load_full();
            state.remove_stale_entries(&cache, kind.slot_hash() as usize, PROBE_LIMIT);
        }

        let entry = Entry::resolved(kind.version(), value);
        state.entries.insert(kind.id(), Arc::clone(&entry));

        let cache = self.check_cache_load(&mut state);
        state.add_to_cache(&cache, entry);
    }

    pub fn entry_state(&self, kind: &Arc<KindState>) -> Option<EntryState> {
        let state = self.state.lock();
        state.entries.get(&kind.id()).map(|entry| entry.state(kind))
    }

    pub fn stats(&self) -> StoreStats {
        let state = self.state.lock();
        StoreStats {
            entries: state.entries.len(),
            cache_capacity: self.cache.load().len(),
            cache_load: state.load,
        }
    }

    /// Makes room in the cache array if it is loaded beyond its limit.
    ///
    /// Returns the cache array that subsequent placements must go into.
    fn check_cache_load(&self, state: &mut StoreState) -> Arc<CacheArray> {
        let cache = self.cache.load_full();
        if state.load < state.load_limit {
            return cache;
        }

        state.remove_stale_entries(&cache, 0, cache.len() + PROBE_LIMIT - 1);
        state.purge_dropped_kinds();
        if state.load < state.load_limit {
            return cache;
        }

        if cache.len() >= self.config.max_entries {
            tracing::debug!(
                capacity = cache.len(),
                load = state.load,
                "Cache array is at its maximum size"
            );
            return cache;
        }

        let len = cache.len() * 2;
        let grown = Arc::new(CacheArray::new(len));
        state.load = 0;
        state.load_limit = self.config.load_limit(len);
        for entry in cache.live_entries() {
            state.add_to_cache(&grown, entry);
        }
        self.cache.store(Arc::clone(&grown));

        tracing::debug!(capacity = len, load = state.load, "Grew cache array");
        metric!(counter("assoc_cache.resize") += 1);
        metric!(gauge("assoc_cache.capacity") = len as u64);
        grown
    }
}

impl fmt::Debug for BackingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.state.try_lock().map(|state| (state.entries.len(), state.load));
        f.debug_struct("BackingStore")
            .field("entries and load", &stats)
            .field("capacity", &self.cache.load().len())
            .field("config", &self.config)
            .finish()
    }
}
