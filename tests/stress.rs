//! Multi-thread stress scenarios that are too slow or too large in state
//! space for loom (`tests/loom.rs` covers the same properties at a scale
//! loom can exhaustively explore). These use real `std::thread`s and a
//! `rand`-driven key generator, matching how the rest of this crate's test
//! suite sizes its stress scenarios.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use fib_core::{AddressFamily, Fib, FibConfig, Ipv4Prefix};

fn fib4() -> Fib<Ipv4Prefix, u32> {
    Fib::new(FibConfig::new(AddressFamily::Ip4))
}

/// Scenario 3: six threads insert disjoint key ranges concurrently; every
/// key must be findable afterward and the count must be exact.
#[test]
fn six_threads_disjoint_inserts_all_land() {
    const PER_THREAD: u32 = 10_000;
    const THREADS: u32 = 6;

    let fib = Arc::new(fib4());
    let mut handles = Vec::new();
    for t in 0..THREADS {
        let fib = Arc::clone(&fib);
        handles.push(thread::spawn(move || {
            for i in 0..PER_THREAD {
                let addr = THREADS * i + t;
                fib.get(&Ipv4Prefix::new(addr, 32), || addr);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(fib.len(), (PER_THREAD * THREADS) as usize);
    for addr in 0..(PER_THREAD * THREADS) {
        let key = Ipv4Prefix::new(addr, 32);
        let found = fib.find(&key).unwrap_or_else(|| panic!("missing {addr}"));
        assert_eq!(*found.value(), addr);
    }
}

/// Scenario 3 variant: the same disjoint-insert race, but keys are drawn
/// from a shuffled order per thread (via `rand`) rather than a simple
/// stride, so insertion order relative to table growth isn't uniform
/// across threads.
#[test]
fn disjoint_inserts_in_randomized_order_all_land() {
    const PER_THREAD: u32 = 4_000;
    const THREADS: u32 = 6;

    let fib = Arc::new(fib4());
    let mut handles = Vec::new();
    for t in 0..THREADS {
        let fib = Arc::clone(&fib);
        handles.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(u64::from(t) * 0x9E37_79B9 + 1);
            let mut order: Vec<u32> = (0..PER_THREAD).collect();
            // Fisher-Yates, driven by `rand` rather than a fixed pattern.
            for i in (1..order.len()).rev() {
                let j = rng.gen_range(0..=i);
                order.swap(i, j);
            }
            for i in order {
                let addr = (t << 16) | i;
                fib.get(&Ipv4Prefix::new(addr, 32), || addr);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(fib.len(), (PER_THREAD * THREADS) as usize);
    for t in 0..THREADS {
        for i in 0..PER_THREAD {
            let addr = (t << 16) | i;
            let key = Ipv4Prefix::new(addr, 32);
            assert!(fib.find(&key).is_some(), "missing {addr:#x}");
        }
    }
}

/// Scenario 5: drive a resumable cursor to completion via repeated
/// `advance_past`/`unlink` pairs, simulating arbitrarily long suspensions
/// between steps (nothing here pins a hazard row between calls).
#[test]
fn cursor_advance_and_unlink_visits_every_entry_once() {
    const N: u32 = 10_000;
    let fib = fib4();
    for i in 0..N {
        fib.get(&Ipv4Prefix::new(i, 32), || i);
    }

    let mut cursor = fib.iter();
    let mut visited = 0usize;
    while let Some(handle) = cursor.advance_past() {
        let _ = *handle.value();
        drop(handle);
        assert!(cursor.unlink());
        visited += 1;
    }

    assert_eq!(visited, N as usize);
    assert_eq!(fib.len(), 0);
}

/// Scenario 6: 31 independently suspended cursors, each parked on a
/// distinct entry, survive every one of those entries being deleted from
/// outside while they're suspended. No cursor may observe a torn or freed
/// node once released past the barrier.
#[test]
fn suspended_cursors_survive_concurrent_external_deletes() {
    const N: usize = 31;
    let fib = Arc::new(fib4());
    for i in 0..N as u32 {
        fib.get(&Ipv4Prefix::new(i, 32), || i);
    }

    // Park one cursor per entry by racing each forward until it lands on a
    // distinct value; insertion order and list order coincide here (all
    // /32s hash independently), so in practice each `advance_past` lands on
    // a fresh key, but we don't rely on a specific order -- only that every
    // cursor ends up parked on *some* live entry before the barrier opens.
    let mut cursors = Vec::with_capacity(N);
    let mut seen_values = Vec::with_capacity(N);
    let mut cursor = fib.iter();
    for _ in 0..N {
        let handle = cursor.advance_past().expect("table has N entries");
        seen_values.push(*handle.value());
        drop(handle);
        cursors.push(cursor.clone_position());
    }
    drop(cursor);

    let barrier = Arc::new(Barrier::new(N + 1));
    let visited_count = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for mut parked in cursors {
        let barrier = Arc::clone(&barrier);
        let visited_count = Arc::clone(&visited_count);
        handles.push(thread::spawn(move || {
            barrier.wait();
            // The entry this cursor is parked on may already be gone by the
            // time we resume; that's fine, we just shouldn't crash or loop
            // forever. Draining to completion proves the rest of the table
            // (already emptied by the deleter below, modulo races) is still
            // walkable.
            while parked.advance_past().is_some() {
                visited_count.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }

    let deleter = {
        let fib = Arc::clone(&fib);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            for v in 0..N as u32 {
                if let Some(h) = fib.find(&Ipv4Prefix::new(v, 32)) {
                    fib.delete(h);
                }
            }
        })
    };

    for h in handles {
        h.join().unwrap();
    }
    deleter.join().unwrap();

    // Cursors starting further along the list overlap with later ones, so
    // this is a loose sanity bound, not an exact count -- see the scenario's
    // own "may or may not be visited" wording for nodes raced by a delete.
    assert!(visited_count.load(Ordering::SeqCst) <= N * N);
    assert_eq!(fib.len(), 0, "every entry must have been deleted exactly once");
}
