use assoc_cache::{
    AssociationSlot, CacheKind, CacheOwner, EntryState, PROBE_LIMIT, StoreConfig, StoreStats,
};

use crate::utils::{Widget, colliding_kinds, setup, stamping_kind};

#[test]
fn test_colliding_kinds_stay_correct() {
    setup();
    let widget = Widget::fixed(1, 8);
    // More kinds share a home slot than the probe window can hold.
    let kinds = colliding_kinds(PROBE_LIMIT + 2, 8, stamping_kind);

    for _ in 0..3 {
        for kind in &kinds {
            let value = kind.get(&widget).unwrap();
            assert_eq!(value.widget, 1);
            assert_eq!(value.seq, 0);
        }
    }
    for kind in &kinds {
        assert_eq!(kind.computation().calls(), 1);
    }

    // Invalidating one of them recomputes only that one.
    kinds[3].remove(&widget);
    for (index, kind) in kinds.iter().enumerate() {
        let expected = if index == 3 { 1 } else { 0 };
        assert_eq!(kind.get(&widget).unwrap().seq, expected);
    }

    let stats = widget.association_slot().stats().unwrap();
    assert_eq!(stats.entries, kinds.len());
    assert_eq!(stats.cache_capacity, 8);
    assert!(stats.cache_load <= 8, "{stats:?}");
}

#[test]
fn test_cache_array_grows() {
    setup();
    let widget = Widget::new(1);
    let kinds: Vec<_> = (0..100).map(|_| stamping_kind()).collect();
    for kind in &kinds {
        kind.get(&widget).unwrap();
    }

    let stats = widget.association_slot().stats().unwrap();
    assert_eq!(stats.entries, 100);
    assert!(stats.cache_capacity > 32, "{stats:?}");
    assert!(stats.cache_capacity.is_power_of_two());
    for kind in &kinds {
        assert_eq!(kind.get(&widget).unwrap().seq, 0);
    }
}

struct Gadget(AssociationSlot);

impl CacheOwner for Gadget {
    fn association_slot(&self) -> &AssociationSlot {
        &self.0
    }
}

#[test]
fn test_growth_stops_at_the_cap() {
    let config = StoreConfig {
        initial_entries: 4,
        max_entries: 16,
        ..Default::default()
    };
    let gadget = Gadget(AssociationSlot::with_config(config).unwrap());
    let kinds: Vec<_> = (0..64)
        .map(|n| CacheKind::from_fn(move |_: &Gadget| Ok::<_, ()>(n)))
        .collect();

    for _ in 0..2 {
        for (n, kind) in kinds.iter().enumerate() {
            assert_eq!(*kind.get(&gadget).unwrap(), n);
        }
    }

    let stats = gadget.association_slot().stats().unwrap();
    assert_eq!(stats.cache_capacity, 16);
    assert_eq!(stats.entries, 64);
}

#[test]
fn test_dropped_kinds_are_forgotten() {
    setup();
    let widget = Widget::fixed(1, 8);
    {
        let doomed: Vec<_> = (0..4).map(|_| stamping_kind()).collect();
        for kind in &doomed {
            kind.get(&widget).unwrap();
        }
    }
    assert_eq!(widget.association_slot().stats().unwrap().entries, 4);

    let kinds: Vec<_> = (0..20).map(|_| stamping_kind()).collect();
    for kind in &kinds {
        kind.get(&widget).unwrap();
    }

    let stats = widget.association_slot().stats().unwrap();
    assert_eq!(stats.entries, kinds.len());
    for kind in &kinds {
        assert_eq!(kind.entry_state(&widget), Some(EntryState::Live));
    }
}

#[test]
fn test_store_is_created_lazily() {
    let widget = Widget::new(1);
    let kind = stamping_kind();
    assert_eq!(widget.association_slot().stats(), None);

    kind.get(&widget).unwrap();
    assert_eq!(
        widget.association_slot().stats(),
        Some(StoreStats {
            entries: 1,
            cache_capacity: 32,
            cache_load: 1,
        })
    );
}

#[test]
fn test_invalid_slot_config() {
    let config = StoreConfig {
        initial_entries: 10,
        ..Default::default()
    };
    let err = AssociationSlot::with_config(config).unwrap_err();
    assert_eq!(err.to_string(), "initial_entries must be a power of two, got 10");
}
