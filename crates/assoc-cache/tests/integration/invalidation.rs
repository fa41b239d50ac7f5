use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use assoc_cache::{CacheKind, CacheOwner, EntryState};
use thiserror::Error;

use crate::utils::{Stamp, Widget, setup, stamping_kind};

#[test]
fn test_counter_scenario() {
    setup();
    let counter = AtomicUsize::new(0);
    let kind = CacheKind::from_fn(|_: &Widget| {
        Ok::<_, ()>(counter.fetch_add(1, Ordering::SeqCst))
    });
    let (o1, o2) = (Widget::new(1), Widget::new(2));

    assert_eq!(*kind.get(&o1).unwrap(), 0);
    assert_eq!(*kind.get(&o1).unwrap(), 0);
    kind.remove(&o1);
    assert_eq!(*kind.get(&o1).unwrap(), 1);
    assert_eq!(*kind.get(&o2).unwrap(), 2);
    kind.remove(&o2);
    assert_eq!(*kind.get(&o1).unwrap(), 1);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[test]
fn test_remove_invalidates() {
    let kind = stamping_kind();
    let widget = Widget::new(1);

    let first = kind.get(&widget).unwrap();
    kind.remove(&widget);
    let second = kind.get(&widget).unwrap();

    assert_eq!(first.seq, 0);
    assert_eq!(second.seq, 1);
    assert_eq!(kind.computation().calls(), 2);
}

#[test]
fn test_remove_leaves_other_owners_alone() {
    let kind = stamping_kind();
    let widgets: Vec<_> = (0..4).map(Widget::new).collect();
    let before: Vec<_> = widgets.iter().map(|w| kind.get(w).unwrap()).collect();

    kind.remove(&widgets[0]);
    // The epoch moved on, so the others are stale but keep their values.
    assert_eq!(kind.entry_state(&widgets[1]), Some(EntryState::Stale));

    for (widget, before) in widgets.iter().zip(&before).skip(1) {
        let after = kind.get(widget).unwrap();
        assert!(Arc::ptr_eq(&after, before));
        assert_eq!(kind.entry_state(widget), Some(EntryState::Live));
    }
    assert_eq!(kind.computation().calls(), 4);
    assert_eq!(kind.get(&widgets[0]).unwrap().seq, 4);
}

#[test]
fn test_remove_is_idempotent() {
    let kind = stamping_kind();
    let widget = Widget::new(1);

    kind.remove(&widget);
    kind.remove(&widget);
    // Removing never creates a backing store.
    assert!(!widget.association_slot().is_initialized());
    assert_eq!(kind.epoch(), 0);

    kind.get(&widget).unwrap();
    kind.remove(&widget);
    kind.remove(&widget);
    assert_eq!(kind.epoch(), 1);
    assert_eq!(kind.entry_state(&widget), None);
}

#[test]
fn test_kinds_do_not_interfere() {
    let lengths = CacheKind::from_fn(|w: &Widget| Ok::<_, ()>(w.id * 10));
    let stamps = stamping_kind();
    let widget = Widget::new(4);

    assert_eq!(*lengths.get(&widget).unwrap(), 40);
    assert_eq!(stamps.get(&widget).unwrap().widget, 4);

    stamps.remove(&widget);
    assert_eq!(lengths.epoch(), 0);
    assert_eq!(lengths.entry_state(&widget), Some(EntryState::Live));
    assert_eq!(widget.association_slot().stats().unwrap().entries, 1);
}

#[test]
fn test_put_overrides_computation() {
    let kind = stamping_kind();
    let widget = Widget::new(1);
    let other = Widget::new(2);

    let manual = Stamp {
        widget: 1,
        seq: 999,
    };
    kind.put(&widget, manual);
    assert_eq!(*kind.get(&widget).unwrap(), manual);
    assert_eq!(kind.computation().calls(), 0);

    kind.get(&other).unwrap();
    kind.put(&other, Stamp { widget: 2, seq: 0 });
    assert_eq!(kind.epoch(), 1);
    // The earlier put is adopted into the new epoch.
    assert_eq!(*kind.get(&widget).unwrap(), manual);
}

#[derive(Debug, Error, PartialEq, Eq)]
enum ParseError {
    #[error("widget {0} cannot be parsed")]
    Unparsable(usize),
}

#[test]
fn test_failed_computation_is_retried() {
    setup();
    let attempts = AtomicUsize::new(0);
    let kind = CacheKind::from_fn(|w: &Widget| {
        if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(ParseError::Unparsable(w.id))
        } else {
            Ok(w.id)
        }
    });
    let widget = Widget::new(5);

    let err = kind.get(&widget).unwrap_err();
    assert_eq!(err, ParseError::Unparsable(5));
    assert_eq!(err.to_string(), "widget 5 cannot be parsed");
    assert_eq!(kind.entry_state(&widget), None);

    assert!(kind.get(&widget).is_err());
    assert_eq!(*kind.get(&widget).unwrap(), 5);
    assert_eq!(*kind.get(&widget).unwrap(), 5);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[test]
fn test_panicking_computation_leaves_no_promise() {
    let calls = AtomicUsize::new(0);
    let kind = CacheKind::from_fn(|w: &Widget| {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("first computation fails");
        }
        Ok::<_, ()>(w.id)
    });
    let widget = Widget::new(6);

    let result = panic::catch_unwind(AssertUnwindSafe(|| kind.get(&widget)));
    assert!(result.is_err());
    assert_eq!(kind.entry_state(&widget), None);

    assert_eq!(*kind.get(&widget).unwrap(), 6);
}
