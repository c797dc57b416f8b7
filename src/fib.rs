//! The table itself: construction, the four public operations (`find`,
//! `get`, `route`, `delete`) and the split-ordered-list machinery they
//! share.

use std::ptr;
use std::sync::Arc;

use crate::bits::{parent_bucket, reverse_bits};
use crate::config::FibConfig;
use crate::error::fatal;
use crate::handle::Handle;
use crate::hazard::{HazardRegistry, ReservedSlot};
use crate::key::{FibKey, RoutableKey};
use crate::loom::Ordering;
use crate::node::Node;
use crate::reclaim::Reclaimer;
use crate::table::Directory;

/// A lock-free, hazard-pointer-protected table mapping keys to values.
///
/// Cloning a `Fib` is not supported; share it behind an `Arc` across
/// threads the way the rest of the crate's internals do.
pub struct Fib<K, V> {
    pub(crate) directory: Directory<K, V>,
    pub(crate) hazards: Arc<HazardRegistry<K, V>>,
    reclaimer: crate::loom::Mutex<Option<Reclaimer<K, V>>>,
    config: FibConfig,
}

unsafe impl<K: Send, V: Send> Send for Fib<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for Fib<K, V> {}

impl<K, V> Fib<K, V>
where
    K: FibKey + Send + 'static,
    V: Send + 'static,
{
    pub fn new(config: FibConfig) -> Self {
        let directory = Directory::new(config.resolved_hash_order());
        let hazards = Arc::new(HazardRegistry::new());
        let reclaimer = Reclaimer::start(Arc::clone(&hazards), config.reclaim_interval);
        Fib {
            directory,
            hazards,
            reclaimer: crate::loom::Mutex::new(Some(reclaimer)),
            config,
        }
    }

    /// The configuration this table was constructed with.
    pub fn config(&self) -> &FibConfig {
        &self.config
    }

    /// Current number of live entries. Approximate under concurrent
    /// mutation: a snapshot, not a linearization point.
    pub fn len(&self) -> usize {
        self.directory.entries()
    }

    /// True if [`Fib::len`] is zero.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts a one-shot walk over every live entry.
    pub fn walk(&self) -> crate::iter::Walker<'_, K, V> {
        crate::iter::Walker::new(self)
    }

    /// Starts a resumable cursor over every live entry.
    pub fn iter(&self) -> crate::iter::FibCursor<'_, K, V> {
        crate::iter::FibCursor::new(self)
    }

    /// Stops the background reclaimer and blocks until it has exited.
    /// Idempotent; also invoked by `Drop`.
    pub fn shutdown(&self) {
        let mut guard = self.reclaimer.lock().unwrap();
        if let Some(mut reclaimer) = guard.take() {
            reclaimer.shutdown();
            // SAFETY: the reclaimer thread has joined, so no other thread
            // can still be inspecting the retired list concurrently. Any
            // caller-held `Handle`s referencing these nodes would be a
            // misuse of `shutdown` (calling it while the table is still in
            // use), not something we can prevent from here.
            unsafe { reclaimer.drain_unchecked() };
        }
    }

    /// Panics if `a` was not drawn from this table's configured address
    /// family. A caller bug (wiring the wrong key type's values into the
    /// wrong `Fib`), not a condition to recover from.
    fn assert_family(&self, a: &K) {
        if a.family() != self.config.family {
            fatal!(
                "address family mismatch: key is {:?}, table is {:?}",
                a.family(),
                self.config.family
            );
        }
    }

    /// Finds the entry for `a`, if any.
    pub fn find(&self, a: &K) -> Option<Handle<'_, K, V>> {
        self.assert_family(a);
        let hash = a.fib_hash();
        let target = reverse_bits(hash);
        let bucket = hash & self.directory.table().mask;
        let sentinel = self.existing_sentinel(bucket)?;

        let slot = self.hazards.reserve();
        let node = self.locate(sentinel, target, a, &slot)?;
        unsafe { (*node).links.add_link() };
        Some(Handle::new(self, node))
    }

    /// Finds the entry for `a`, creating it via `make_value` if absent.
    pub fn get(&self, a: &K, make_value: impl FnOnce() -> V) -> Handle<'_, K, V> {
        self.assert_family(a);
        let hash = a.fib_hash();
        let target = reverse_bits(hash);
        let bucket = hash & self.directory.table().mask;
        let sentinel = self.get_or_create_sentinel(bucket);

        let slot = self.hazards.reserve();
        loop {
            if let Some(node) = self.locate(sentinel, target, a, &slot) {
                unsafe { (*node).links.add_link() };
                return Handle::new(self, node);
            }

            let new_node = Box::into_raw(Node::new_data(target, a.clone(), make_value()));
            let (pred, curr) = self.search(sentinel, &slot, target, |n| data_matches(n, a));
            unsafe { (*new_node).next.store(curr, Ordering::SeqCst) };
            let cas = unsafe {
                (*pred)
                    .next
                    .compare_exchange(curr, new_node, Ordering::SeqCst, Ordering::SeqCst)
            };
            match cas {
                Ok(()) => {
                    unsafe { (*new_node).links.add_link() }; // the predecessor's back-link
                    self.directory.bump_entries();
                    self.directory.maybe_grow();
                    unsafe { (*new_node).links.add_link() }; // this call's returned Handle
                    return Handle::new(self, new_node);
                }
                Err(_) => {
                    // lost the race: free our speculative node and retry
                    // the whole lookup, since someone else may have just
                    // inserted the entry we were about to create.
                    unsafe { drop(Box::from_raw(new_node)) };
                    continue;
                }
            }
        }
    }

    /// Longest-prefix match: repeatedly shortens `a` by one bit until an
    /// exact entry is found or the prefix is exhausted.
    pub fn route(&self, a: &K) -> Option<Handle<'_, K, V>>
    where
        K: RoutableKey,
    {
        let mut candidate = a.clone();
        loop {
            if let Some(handle) = self.find(&candidate) {
                return Some(handle);
            }
            if candidate.prefix_len() == 0 {
                return None;
            }
            candidate = candidate.shorten_by_one();
        }
    }

    /// Removes the entry behind `handle`. Returns `false` if some other
    /// thread (or a previous call) already deleted it.
    pub fn delete(&self, handle: Handle<'_, K, V>) -> bool {
        let node = handle.node_ptr();
        if unsafe { (*node).is_sentinel() } {
            fatal!("attempted to delete a sentinel node");
        }
        let marked_now = unsafe { (*node).next.mark_deleted(Ordering::SeqCst) };
        if marked_now {
            self.directory.drop_entries();
            self.help_unlink(node);
        }
        drop(handle);
        marked_now
    }

    /// Walks from the node's own bucket sentinel to physically unlink it
    /// (and any other marked nodes encountered along the way) right away,
    /// rather than waiting for a future traversal to stumble onto it.
    ///
    /// Fatal if the walk exhausts the bucket's region of the list without
    /// ever encountering `node`: a predecessor search that falls off the
    /// end without finding its target means the caller handed `delete` a
    /// handle foreign to this table.
    fn help_unlink(&self, node: *mut Node<K, V>) {
        let order_key = unsafe { (*node).order_key };
        let hash = reverse_bits(order_key);
        let bucket = hash & self.directory.table().mask;
        let Some(sentinel) = self.existing_sentinel(bucket) else {
            fatal!("delete on a handle foreign to this table");
        };
        let slot = self.hazards.reserve();
        if !self.unlink_tracked(sentinel, &slot, order_key, node) {
            fatal!("delete on a handle foreign to this table");
        }
    }

    /// Same walk-and-unlink-marked-nodes behavior as `search`, specialized
    /// for `help_unlink`: additionally reports whether `node` itself was
    /// ever observed as `curr` along the way, so a genuinely foreign
    /// pointer (never part of this table) can be told apart from a normal
    /// "nothing left to do here" empty/overshot walk.
    fn unlink_tracked(
        &self,
        start: *mut Node<K, V>,
        slot: &ReservedSlot<'_, K, V>,
        target: u32,
        node: *mut Node<K, V>,
    ) -> bool {
        let mut found = false;
        'retry: loop {
            let mut pred = start;
            slot.protect_curr(pred);
            loop {
                let curr = unsafe { (*pred).next.load(Ordering::SeqCst) };
                if curr.is_null() {
                    return found;
                }
                slot.protect_succ(curr);
                if unsafe { (*pred).next.load(Ordering::SeqCst) } != curr {
                    continue 'retry;
                }
                if ptr::eq(curr, node) {
                    found = true;
                }
                let (succ, marked) = unsafe { (*curr).next.load_marked(Ordering::SeqCst) };
                if marked {
                    match unsafe {
                        (*pred)
                            .next
                            .compare_exchange(curr, succ, Ordering::SeqCst, Ordering::SeqCst)
                    } {
                        Ok(()) => {
                            if !succ.is_null() {
                                unsafe { (*succ).links.add_link() };
                            }
                            let _ = unsafe { (*curr).links.remove_link() };
                            self.retire(curr);
                            continue;
                        }
                        Err(_) => continue 'retry,
                    }
                }
                let n = unsafe { &*curr };
                if n.order_key > target {
                    return found;
                }
                pred = curr;
                slot.protect_curr(pred);
            }
        }
    }

    /// Looks up an existing node matching `a` starting from `start`,
    /// scanning forward through any hash-colliding duplicates.
    fn locate(
        &self,
        start: *mut Node<K, V>,
        target: u32,
        a: &K,
        slot: &ReservedSlot<'_, K, V>,
    ) -> Option<*mut Node<K, V>> {
        let (_, curr) = self.search(start, slot, target, |n| data_matches(n, a));
        if curr.is_null() {
            return None;
        }
        let node = unsafe { &*curr };
        if node.order_key == target && !node.is_sentinel() && node.key() == a {
            Some(curr)
        } else {
            None
        }
    }

    /// Finds (or creates, recursively creating every ancestor along the
    /// way) the sentinel heading `bucket`'s chain.
    pub(crate) fn get_or_create_sentinel(&self, bucket: u32) -> *mut Node<K, V> {
        let table = self.directory.table();
        let existing = table.slots[bucket as usize].load(Ordering::SeqCst);
        if !existing.is_null() {
            return existing;
        }

        if bucket == 0 {
            let node = Box::into_raw(Node::new_sentinel(0));
            return match table.slots[0].compare_exchange(
                ptr::null_mut(),
                node,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(()) => node,
                Err(actual) => {
                    unsafe { drop(Box::from_raw(node)) };
                    actual
                }
            };
        }

        let parent = parent_bucket(bucket);
        let parent_sentinel = self.get_or_create_sentinel(parent);

        let new_sentinel = Box::into_raw(Node::new_sentinel(bucket));
        let target = unsafe { (*new_sentinel).order_key };
        let slot = self.hazards.reserve();
        let published = loop {
            let (pred, curr) = self.search(parent_sentinel, &slot, target, |_| true);
            // Someone else's sentinel for this exact bucket is already
            // spliced into the list (its CAS below beat ours, or raced it);
            // a sentinel's `order_key` is `reverse_bits(bucket)`, unique per
            // bucket, so an equal-key sentinel here can only be this
            // bucket's. Drop our speculative allocation and adopt theirs
            // instead of blindly CASing a second one in ahead of/behind it.
            if !curr.is_null() && unsafe { (*curr).order_key == target && (*curr).is_sentinel() } {
                unsafe { drop(Box::from_raw(new_sentinel)) };
                break curr;
            }
            unsafe { (*new_sentinel).next.store(curr, Ordering::SeqCst) };
            let cas = unsafe {
                (*pred).next.compare_exchange(
                    curr,
                    new_sentinel,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
            };
            if cas.is_ok() {
                #[cfg(feature = "tracing")]
                tracing::trace!(bucket, "fib sentinel created");
                break new_sentinel;
            }
        };

        let table = self.directory.table();
        match table.slots[bucket as usize].compare_exchange(
            ptr::null_mut(),
            published,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(()) => published,
            Err(_) => table.slots[bucket as usize].load(Ordering::SeqCst),
        }
    }

    /// Returns the sentinel for `bucket` only if it has already been
    /// created; never creates one. Used by lookups, which must not
    /// materialize buckets that were never populated.
    fn existing_sentinel(&self, bucket: u32) -> Option<*mut Node<K, V>> {
        let mut b = bucket;
        loop {
            let ptr = self.directory.table().slots[b as usize].load(Ordering::SeqCst);
            if !ptr.is_null() {
                return Some(ptr);
            }
            if b == 0 {
                return None;
            }
            b = parent_bucket(b);
        }
    }

    /// Walks the list from `start`, physically unlinking any marked node
    /// it passes over, stopping at the first unmarked node whose ordering
    /// key exceeds `target`, or for which `matches` returns true while its
    /// key equals `target`.
    ///
    /// `pred` occupies the slot's `curr` hazard field and `curr` occupies
    /// `succ` for as long as each is being dereferenced, mirroring the
    /// source's two soft-link slots per traversal step (`curr`/`succ` in
    /// `soft_links[row]`) so that re-reading `pred` after publishing the
    /// next candidate never dereferences an unprotected pointer.
    pub(crate) fn search(
        &self,
        start: *mut Node<K, V>,
        slot: &ReservedSlot<'_, K, V>,
        target: u32,
        mut matches: impl FnMut(&Node<K, V>) -> bool,
    ) -> (*mut Node<K, V>, *mut Node<K, V>) {
        'retry: loop {
            let mut pred = start;
            slot.protect_curr(pred);
            loop {
                let curr = unsafe { (*pred).next.load(Ordering::SeqCst) };
                if curr.is_null() {
                    return (pred, curr);
                }
                slot.protect_succ(curr);
                if unsafe { (*pred).next.load(Ordering::SeqCst) } != curr {
                    // pred itself is still protected via the `curr` slot,
                    // so this re-read is safe even though it disagrees.
                    continue 'retry;
                }
                let (succ, marked) = unsafe { (*curr).next.load_marked(Ordering::SeqCst) };
                if marked {
                    match unsafe {
                        (*pred)
                            .next
                            .compare_exchange(curr, succ, Ordering::SeqCst, Ordering::SeqCst)
                    } {
                        Ok(()) => {
                            // `pred` now points directly at `succ`; that's a
                            // freshly-live reference that didn't exist a
                            // moment ago (the old one, via `curr.next`, is
                            // about to become a dangling-but-still-allocated
                            // pointer until `curr` itself is freed -- see
                            // `reclaim.rs::free_retired`, which removes this
                            // same link the instant that happens).
                            if !succ.is_null() {
                                unsafe { (*succ).links.add_link() };
                            }
                            let remaining = unsafe { (*curr).links.remove_link() };
                            let _ = remaining;
                            self.retire(curr);
                            continue;
                        }
                        Err(_) => continue 'retry,
                    }
                }
                let node = unsafe { &*curr };
                if node.order_key > target || (node.order_key == target && matches(node)) {
                    return (pred, curr);
                }
                pred = curr;
                slot.protect_curr(pred);
            }
        }
    }

    pub(crate) fn retire(&self, node: *mut Node<K, V>) {
        let guard = self.reclaimer.lock().unwrap();
        if let Some(reclaimer) = guard.as_ref() {
            reclaimer.retire(node);
        } else {
            // Shutdown already happened; nothing left to protect against.
            unsafe { crate::node::drop_node(node) };
        }
    }
}

impl<K, V> Drop for Fib<K, V>
where
    K: FibKey + Send + 'static,
    V: Send + 'static,
{
    fn drop(&mut self) {
        self.shutdown();
        // Every remaining node, live or retired, belongs to us alone now.
        // All buckets share a single underlying list ordered by `order_key`,
        // and bucket 0's sentinel (order_key 0) is always its head, so a
        // single walk from `slots[0]` reaches every node exactly once.
        // Walking from every slot instead would revisit (and double-free)
        // nodes shared between buckets' chains.
        let table = self.directory.table();
        let mut node = table.slots[0].load(Ordering::SeqCst);
        while !node.is_null() {
            let next = unsafe { (*node).next.load(Ordering::SeqCst) };
            unsafe { crate::node::drop_node(node) };
            node = next;
        }
        for slot in table.slots.iter() {
            slot.store(ptr::null_mut(), Ordering::SeqCst);
        }
    }
}

fn data_matches<K: FibKey, V>(node: &Node<K, V>, a: &K) -> bool {
    !node.is_sentinel() && node.key() == a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FibConfig;
    use crate::key::{AddressFamily, Ipv4Prefix};
    use std::sync::Barrier;
    use std::thread;

    /// Regression test for a race where two threads lazily creating the
    /// same not-yet-existing bucket's sentinel could each win a CAS into
    /// the shared list, leaving one permanently orphaned and unreachable
    /// from the directory. Every racing thread must converge on the same
    /// node.
    #[test]
    fn concurrent_sentinel_creation_converges_on_one_node() {
        let fib: Arc<Fib<Ipv4Prefix, u32>> =
            Arc::new(Fib::new(FibConfig::new(AddressFamily::Ip4).with_hash_order(4)));
        let bucket = 9u32;
        const THREADS: usize = 8;
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let fib = Arc::clone(&fib);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    fib.get_or_create_sentinel(bucket) as usize
                })
            })
            .collect();

        let mut pointers: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        pointers.sort_unstable();
        pointers.dedup();
        assert_eq!(
            pointers.len(),
            1,
            "every racing thread must agree on the same sentinel node"
        );
    }

    /// A `Handle` obtained from one table passed into a different table's
    /// `delete` is a caller bug, not something the unlink walk can route
    /// around -- it must abort rather than silently leave the node marked
    /// deleted with nothing ever physically unlinking it.
    #[test]
    #[should_panic(expected = "delete on a handle foreign to this table")]
    fn delete_with_handle_from_another_table_is_fatal() {
        let fib_a: Fib<Ipv4Prefix, u32> = Fib::new(FibConfig::new(AddressFamily::Ip4));
        let fib_b: Fib<Ipv4Prefix, u32> = Fib::new(FibConfig::new(AddressFamily::Ip4));

        // Give `fib_b` a populated directory (in particular, bucket 0's
        // sentinel) so the walk actually runs to completion instead of
        // bailing out on a missing sentinel first.
        fib_b.get(&Ipv4Prefix::new(0x0b00_0000, 8), || 99u32);

        let handle = fib_a.get(&Ipv4Prefix::new(0x0a00_0000, 8), || 1u32);
        fib_b.delete(handle);
    }
}
