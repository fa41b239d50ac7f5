//! Lock-free lookups in the cache array of a backing store.
//!
//! These routines race with each other and with the locked writers of the store. Any entry they
//! return has been verified to carry the current version of the requested kind, so a lost race
//! can only cause a miss, never a wrong value. Misses fall back to the slow path.

use std::sync::Arc;

use crate::PROBE_LIMIT;
use crate::entry::Entry;
use crate::store::{BackingStore, CacheArray};
use crate::version::KindState;

impl BackingStore {
    /// Looks for the current entry of `kind` without taking the store lock.
    pub(crate) fn probe(&self, kind: &Arc<KindState>) -> Option<Arc<Entry>> {
        let cache = self.cache();
        probe_home_location(&cache, kind)
            .or_else(|| probe_backup_locations(&cache, kind, &self.dead))
    }
}

fn probe_home_location(cache: &CacheArray, kind: &Arc<KindState>) -> Option<Arc<Entry>> {
    cache
        .load(cache.home(kind))
        .filter(|entry| entry.matches(kind))
}

/// Scans the slots following the home slot of `kind`.
///
/// A match is moved into the home slot so the next lookup hits right away. The entry it evicts
/// from there takes over the first non-live slot of the run, or the match's old slot, if it is
/// still within reach of its own home from there.
fn probe_backup_locations(
    cache: &CacheArray,
    kind: &Arc<KindState>,
    dead: &Arc<Entry>,
) -> Option<Arc<Entry>> {
    let home = cache.home(kind);
    // Nothing at home means nothing was ever displaced from there.
    let evicted = cache.load(home)?;

    let mut vacant = None;
    for pos in home + 1..home + PROBE_LIMIT {
        let entry = cache.load(pos)?;
        if entry.matches(kind) {
            cache.store(home, Some(Arc::clone(&entry)));
            let vacant = match vacant {
                Some(vacant) => {
                    cache.store(pos, Some(Arc::clone(dead)));
                    vacant
                }
                None => pos,
            };
            let relocated = if cache.dislocation(vacant, &evicted) < PROBE_LIMIT {
                evicted
            } else {
                Arc::clone(dead)
            };
            cache.store(vacant, Some(relocated));
            return Some(entry);
        }
        if vacant.is_none() && !entry.is_live() {
            vacant = Some(pos);
        }
    }
    None
}
