//! Indirection layer so the reclaimer thread and its shutdown handshake can
//! be exercised by `loom`'s model checker under `--cfg loom`, while normal
//! builds pay for nothing but the real `std` primitives.

use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(loom)] {
        pub(crate) use loom::sync::{Condvar, Mutex};
        pub(crate) use loom::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
        pub(crate) use loom::thread;
    } else {
        pub(crate) use std::sync::{Condvar, Mutex};
        pub(crate) use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
        pub(crate) use std::thread;
    }
}

/// `loom`'s `Condvar` has no `wait_timeout` (timeouts aren't meaningful
/// under exhaustive interleaving exploration), so the reclaimer's periodic
/// wakeup collapses to a plain `wait` there; it still exercises the same
/// notify/shutdown handshake, just without the sleep.
#[cfg(not(loom))]
pub(crate) fn wait_timeout<'a, T>(
    cvar: &Condvar,
    guard: std::sync::MutexGuard<'a, T>,
    dur: std::time::Duration,
) -> std::sync::MutexGuard<'a, T> {
    cvar.wait_timeout(guard, dur).unwrap().0
}

#[cfg(loom)]
pub(crate) fn wait_timeout<'a, T>(
    cvar: &Condvar,
    guard: loom::sync::MutexGuard<'a, T>,
    _dur: std::time::Duration,
) -> loom::sync::MutexGuard<'a, T> {
    cvar.wait(guard).unwrap()
}
