//! Hazard pointer registry: a fixed table of reservation slots that let a
//! thread publish "I am currently looking at this node" so the reclaimer
//! knows not to free it out from under a concurrent reader.
//!
//! The registry size is a hard ceiling (`MAX_THREADS`), not a growable pool.
//! A thread that can't find a free row spins until one frees up rather than
//! falling back to a slower path, keeping the hot path free of any
//! allocation.

use std::ptr;

use crate::loom::{AtomicBool, AtomicPtr, Ordering};
use crate::node::Node;

/// Upper bound on the number of threads that may operate on a single `Fib`
/// concurrently. A fixed ceiling rather than a growable pool; raising it
/// is a deliberate future option, not something this crate does
/// dynamically.
pub(crate) const MAX_THREADS: usize = 32;

struct HazardSlot<K, V> {
    taken: AtomicBool,
    curr: AtomicPtr<Node<K, V>>,
    succ: AtomicPtr<Node<K, V>>,
}

impl<K, V> HazardSlot<K, V> {
    fn new() -> Self {
        HazardSlot {
            taken: AtomicBool::new(false),
            curr: AtomicPtr::new(ptr::null_mut()),
            succ: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

pub(crate) struct HazardRegistry<K, V> {
    slots: Box<[HazardSlot<K, V>]>,
}

impl<K, V> HazardRegistry<K, V> {
    pub(crate) fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_THREADS);
        for _ in 0..MAX_THREADS {
            slots.push(HazardSlot::new());
        }
        HazardRegistry {
            slots: slots.into_boxed_slice(),
        }
    }

    /// Reserves a free row, spinning until one is available. Every call
    /// must be paired with the returned guard's drop (or an explicit
    /// [`ReservedSlot::release`]) to give the row back.
    pub(crate) fn reserve(&self) -> ReservedSlot<'_, K, V> {
        loop {
            for (index, slot) in self.slots.iter().enumerate() {
                if slot
                    .taken
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    slot.curr.store(ptr::null_mut(), Ordering::SeqCst);
                    slot.succ.store(ptr::null_mut(), Ordering::SeqCst);
                    return ReservedSlot {
                        registry: self,
                        index,
                    };
                }
            }
            std::hint::spin_loop();
        }
    }

    /// True if any reserved row's `curr` or `succ` hazard currently points
    /// at `node`. Called by the reclaimer before freeing a retired node.
    pub(crate) fn is_protected(&self, node: *mut Node<K, V>) -> bool {
        self.slots.iter().any(|slot| {
            slot.taken.load(Ordering::SeqCst)
                && (slot.curr.load(Ordering::SeqCst) == node
                    || slot.succ.load(Ordering::SeqCst) == node)
        })
    }
}

/// RAII guard for a reserved hazard row. Releases the row on drop.
pub(crate) struct ReservedSlot<'r, K, V> {
    registry: &'r HazardRegistry<K, V>,
    index: usize,
}

impl<'r, K, V> ReservedSlot<'r, K, V> {
    #[inline]
    pub(crate) fn protect_curr(&self, node: *mut Node<K, V>) {
        self.registry.slots[self.index]
            .curr
            .store(node, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn protect_succ(&self, node: *mut Node<K, V>) {
        self.registry.slots[self.index]
            .succ
            .store(node, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn clear(&self) {
        self.registry.slots[self.index]
            .curr
            .store(ptr::null_mut(), Ordering::SeqCst);
        self.registry.slots[self.index]
            .succ
            .store(ptr::null_mut(), Ordering::SeqCst);
    }
}

impl<'r, K, V> Drop for ReservedSlot<'r, K, V> {
    fn drop(&mut self) {
        let slot = &self.registry.slots[self.index];
        slot.curr.store(ptr::null_mut(), Ordering::SeqCst);
        slot.succ.store(ptr::null_mut(), Ordering::SeqCst);
        slot.taken.store(false, Ordering::SeqCst);
    }
}


#[cfg(all(test, loom))]
mod loom_tests {
    use super::*;
    use loom::thread;

    /// Two threads racing `reserve` on a registry with a single usable row
    /// must never both believe they hold it: exactly one proceeds while the
    /// other spins, and both eventually get a row of their own.
    #[test]
    fn concurrent_reserve_never_double_grants_a_row() {
        loom::model(|| {
            let registry = std::sync::Arc::new(HazardRegistry::<u32, u32>::new());
            let node = Box::into_raw(Node::new_data(0, 1u32, 2u32));

            let r1 = registry.clone();
            let t1 = thread::spawn(move || {
                let slot = r1.reserve();
                slot.protect_curr(node);
                assert!(r1.is_protected(node));
            });

            let slot = registry.reserve();
            slot.protect_curr(node);
            assert!(registry.is_protected(node));
            drop(slot);

            t1.join().unwrap();
            assert!(!registry.is_protected(node));
            unsafe { crate::node::drop_node(node) };
        });
    }
}
