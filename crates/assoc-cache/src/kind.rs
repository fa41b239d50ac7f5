use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::entry::{Entry, EntryState};
use crate::owner::CacheOwner;
use crate::store::BackingStore;
use crate::utils::defer::defer;
use crate::version::{KindId, KindState};

/// The computation behind a [`CacheKind`].
pub trait ComputeValue: Send + Sync {
    /// The type of object values are attached to.
    type Owner: CacheOwner + ?Sized;
    /// The computed value.
    type Value: Send + Sync + 'static;
    /// The error a failed computation returns.
    type Error;

    /// Computes the value for `owner`.
    ///
    /// This may be called more than once per owner and epoch when readers race, so it should be
    /// idempotent. It is never called while any cache lock is held.
    fn compute_value(&self, owner: &Self::Owner) -> Result<Self::Value, Self::Error>;
}

/// Adapts a closure into a [`ComputeValue`], see [`CacheKind::from_fn`].
pub struct ComputeFn<O: ?Sized, V, E, F> {
    f: F,
    _marker: PhantomData<fn(&O) -> Result<V, E>>,
}

impl<O, V, E, F> ComputeValue for ComputeFn<O, V, E, F>
where
    O: CacheOwner + ?Sized,
    V: Send + Sync + 'static,
    F: Fn(&O) -> Result<V, E> + Send + Sync,
{
    type Owner = O;
    type Value = V;
    type Error = E;

    fn compute_value(&self, owner: &O) -> Result<V, E> {
        (self.f)(owner)
    }
}

/// One independent computation whose results are cached per owner.
///
/// Each kind has an epoch. Values computed for an owner stay valid until [`remove`] or [`put`]
/// is called for that owner, which starts a new epoch for the kind. Values of other owners
/// computed in a previous epoch are carried over into the new one on their next lookup, without
/// computing them again.
///
/// [`remove`]: CacheKind::remove
/// [`put`]: CacheKind::put
pub struct CacheKind<C> {
    state: Arc<KindState>,
    name: Cow<'static, str>,
    computation: C,
}

impl<O, V, E, F> CacheKind<ComputeFn<O, V, E, F>>
where
    O: CacheOwner + ?Sized,
    V: Send + Sync + 'static,
    F: Fn(&O) -> Result<V, E> + Send + Sync,
{
    /// Creates a kind computing its values with the closure `f`.
    pub fn from_fn(f: F) -> Self {
        Self::new(ComputeFn {
            f,
            _marker: PhantomData,
        })
    }
}

impl<C: ComputeValue> CacheKind<C> {
    /// Creates a kind computing its values with `computation`.
    pub fn new(computation: C) -> Self {
        CacheKind {
            state: KindState::new(),
            name: Cow::Borrowed("unnamed"),
            computation,
        }
    }

    /// Sets the name used in logs and metrics.
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// The identity of this kind.
    pub fn id(&self) -> KindId {
        self.state.id()
    }

    /// The name used in logs and metrics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The hash that determines the home slot of this kind in cache arrays.
    pub fn slot_hash(&self) -> u32 {
        self.state.slot_hash()
    }

    /// The current epoch. It advances whenever a cached value is invalidated.
    pub fn epoch(&self) -> u64 {
        self.state.current_epoch()
    }

    /// The computation behind this kind.
    pub fn computation(&self) -> &C {
        &self.computation
    }

    /// Returns the value for `owner`, computing it if necessary.
    ///
    /// Concurrent callers that all miss may each run the computation. Only one result is
    /// installed and returned to all of them; the others are discarded. If a concurrent
    /// [`remove`](Self::remove) or [`put`](Self::put) supersedes the computation, it is retried,
    /// without any bound on the number of retries.
    ///
    /// If the computation fails, nothing is cached and the error is returned.
    ///
    /// Calling `get` for the same owner from within the computation of this kind never
    /// terminates.
    pub fn get(&self, owner: &C::Owner) -> Result<Arc<C::Value>, C::Error> {
        let slot = owner.association_slot();
        if let Some(value) = slot
            .store()
            .and_then(|store| store.probe(&self.state))
            .and_then(|entry| entry.value::<C::Value>())
        {
            return Ok(value);
        }

        self.get_from_store(owner, slot.store_or_init())
    }

    fn get_from_store(
        &self,
        owner: &C::Owner,
        store: &BackingStore,
    ) -> Result<Arc<C::Value>, C::Error> {
        loop {
            let entry = store.start_entry(&self.state);
            if !entry.is_promise() {
                return Ok(self.resolved_value(&entry));
            }

            tracing::trace!(kind = self.name(), epoch = entry.version().epoch(), "Computing value");
            metric!(counter("assoc_cache.compute") += 1, "kind" => self.name());

            let abandon = defer(|| store.abandon_entry(&self.state, &entry));
            let value = match self.computation.compute_value(owner) {
                Ok(value) => value,
                Err(err) => {
                    metric!(counter("assoc_cache.compute.error") += 1, "kind" => self.name());
                    return Err(err);
                }
            };
            abandon.cancel();

            let computed = Entry::resolved(entry.version().clone(), Arc::new(value));
            if let Some(installed) = store.finish_entry(&self.state, computed) {
                return Ok(self.resolved_value(&installed));
            }

            tracing::trace!(kind = self.name(), "Computed value was superseded, retrying");
            metric!(counter("assoc_cache.retry") += 1, "kind" => self.name());
        }
    }

    fn resolved_value(&self, entry: &Entry) -> Arc<C::Value> {
        match entry.value::<C::Value>() {
            Some(value) => value,
            None => unreachable!("{} resolved to a value of a different type", self.id()),
        }
    }

    /// Invalidates the value of `owner`, so that the next [`get`](Self::get) computes it again.
    ///
    /// Does nothing if there is no value, and leaves computations that are in flight alone.
    pub fn remove(&self, owner: &C::Owner) {
        let Some(store) = owner.association_slot().store() else {
            return;
        };
        if store.remove_entry(&self.state) {
            tracing::trace!(kind = self.name(), epoch = self.epoch(), "Invalidated value");
            metric!(counter("assoc_cache.remove") += 1, "kind" => self.name());
        }
    }

    /// Associates `value` with `owner` without running the computation.
    ///
    /// Any previous value is invalidated first, exactly like [`remove`](Self::remove) would.
    pub fn put(&self, owner: &C::Owner, value: C::Value) {
        let store = owner.association_slot().store_or_init();
        store.change_entry(&self.state, Arc::new(value));
        metric!(counter("assoc_cache.put") += 1, "kind" => self.name());
    }

    /// Reports what `owner` currently holds for this kind.
    pub fn entry_state(&self, owner: &C::Owner) -> Option<EntryState> {
        owner
            .association_slot()
            .store()
            .and_then(|store| store.entry_state(&self.state))
    }
}

impl<C> fmt::Debug for CacheKind<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheKind")
            .field("name", &self.name)
            .field("state", &self.state)
            .finish()
    }
}
