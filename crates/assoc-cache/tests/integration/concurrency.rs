use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use assoc_cache::{CacheKind, EntryState};

use crate::utils::{Stamp, Stamping, Widget, setup, stamping_kind};

#[test]
fn test_racing_readers_share_one_value() {
    setup();
    let kind = CacheKind::new(Stamping::slow(Duration::from_millis(20)));
    let widget = Widget::new(1);
    let threads = 16;
    let barrier = Barrier::new(threads);

    let values: Vec<Arc<Stamp>> = thread::scope(|s| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    kind.get(&widget).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    // Racing computations may all run, but exactly one result is installed and returned.
    let calls = kind.computation().calls();
    assert!((1..=threads).contains(&calls), "{calls} computations");
    for value in &values {
        assert!(Arc::ptr_eq(value, &values[0]));
    }
    assert_eq!(values[0].widget, 1);

    // From now on the value is served from the cache.
    let cached = kind.get(&widget).unwrap();
    assert!(Arc::ptr_eq(&cached, &values[0]));
    assert_eq!(kind.computation().calls(), calls);
}

#[test]
fn test_values_stay_with_their_owner() {
    setup();
    let kinds: Vec<_> = (0..8).map(|_| stamping_kind()).collect();
    let widgets: Vec<_> = (0..8).map(Widget::new).collect();
    let stop = AtomicBool::new(false);

    thread::scope(|s| {
        for reader in 0..8 {
            let (kinds, widgets, stop) = (&kinds, &widgets, &stop);
            s.spawn(move || {
                let mut round = reader;
                while !stop.load(Ordering::Relaxed) {
                    let widget = &widgets[round % widgets.len()];
                    let kind = &kinds[(round / widgets.len()) % kinds.len()];
                    assert_eq!(kind.get(widget).unwrap().widget, widget.id);
                    round += 1;
                }
            });
        }

        s.spawn(|| {
            for round in 0..2_000 {
                let widget = &widgets[round % widgets.len()];
                kinds[round % kinds.len()].remove(widget);
                if round % 100 == 0 {
                    thread::yield_now();
                }
            }
            stop.store(true, Ordering::Relaxed);
        });
    });

    for kind in &kinds {
        for widget in &widgets {
            assert_eq!(kind.get(widget).unwrap().widget, widget.id);
            assert_eq!(kind.entry_state(widget), Some(EntryState::Live));
        }
    }
}

#[test]
fn test_remove_racing_with_get_terminates() {
    setup();
    let kind = CacheKind::new(Stamping::slow(Duration::from_millis(1)));
    let widget = Widget::new(7);
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|| {
            while !done.load(Ordering::Relaxed) {
                kind.remove(&widget);
            }
        });
        for _ in 0..200 {
            assert_eq!(kind.get(&widget).unwrap().widget, 7);
        }
        done.store(true, Ordering::Relaxed);
    });

    // Once removals stop, the value settles.
    let settled = kind.get(&widget).unwrap();
    assert!(Arc::ptr_eq(&settled, &kind.get(&widget).unwrap()));
}

#[test]
fn test_put_racing_with_get() {
    setup();
    let kind = stamping_kind();
    let widget = Widget::new(3);

    thread::scope(|s| {
        s.spawn(|| {
            for seq in 0..500 {
                kind.put(
                    &widget,
                    Stamp {
                        widget: 3,
                        seq: usize::MAX - seq,
                    },
                );
            }
        });
        for _ in 0..500 {
            assert_eq!(kind.get(&widget).unwrap().widget, 3);
        }
    });

    let last = kind.get(&widget).unwrap();
    assert_eq!(last.widget, 3);
}
