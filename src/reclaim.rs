//! Deferred reclamation: retired nodes sit on a lock-free stack until a
//! background thread confirms no back-links and no hazard pointer still
//! reach them, then frees them.
//!
//! `Reclaimer::shutdown` blocks until the background thread has actually
//! stopped rather than firing and forgetting it, a deliberate choice
//! documented in `DESIGN.md`.

use std::ptr;
use std::sync::Arc;
use std::time::Duration;

use crate::hazard::HazardRegistry;
use crate::loom::{AtomicBool, AtomicPtr, Ordering};
use crate::node::{drop_node, Node};

/// Frees a node that is actually being removed from the retired list, first
/// releasing the borrowed link its own `.next` field held on its successor.
///
/// That link was added by `Fib::search`'s unlink path the moment this node
/// became unreachable through the live list (a predecessor's pointer swung
/// past it straight to the successor); it stays live for exactly as long as
/// this node's stale `.next` field remains allocated memory pointing at it.
/// Freeing the node without dropping the link first would leave the
/// successor's count permanently inflated and, worse, is the only point
/// where that stale reference actually goes away -- skip it and a node can
/// be freed while this one's `.next` still (harmlessly, now) "points" at it,
/// but a *third* node relying on that same borrowed count to stay alive
/// would never see it released.
unsafe fn free_retired<K, V>(node: *mut Node<K, V>) {
    let succ = (*node).next.load(Ordering::SeqCst);
    if !succ.is_null() {
        (*succ).links.remove_link();
    }
    drop_node(node);
}

struct RetiredEntry<K, V> {
    node: *mut Node<K, V>,
    next: *mut RetiredEntry<K, V>,
}

/// Lock-free stack of nodes awaiting reclamation.
struct RetiredList<K, V> {
    head: AtomicPtr<RetiredEntry<K, V>>,
}

impl<K, V> RetiredList<K, V> {
    fn new() -> Self {
        RetiredList {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    fn push(&self, node: *mut Node<K, V>) {
        let entry = Box::into_raw(Box::new(RetiredEntry {
            node,
            next: ptr::null_mut(),
        }));
        loop {
            let head = self.head.load(Ordering::SeqCst);
            unsafe { (*entry).next = head };
            if self
                .head
                .compare_exchange(head, entry, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Atomically takes every currently-retired entry for processing.
    fn take_all(&self) -> *mut RetiredEntry<K, V> {
        self.head.swap(ptr::null_mut(), Ordering::SeqCst)
    }
}

pub(crate) struct Reclaimer<K, V> {
    retired: Arc<RetiredList<K, V>>,
    running: Arc<AtomicBool>,
    wake: Arc<(crate::loom::Mutex<bool>, crate::loom::Condvar)>,
    handle: Option<crate::loom::thread::JoinHandle<()>>,
}

impl<K, V> Reclaimer<K, V>
where
    K: Send + 'static,
    V: Send + 'static,
{
    /// Spawns the background reclamation thread. `registry` is shared with
    /// the operations that publish hazard pointers while they walk the list.
    pub(crate) fn start(registry: Arc<HazardRegistry<K, V>>, interval: Duration) -> Self {
        let retired = Arc::new(RetiredList::new());
        let running = Arc::new(AtomicBool::new(true));
        let wake = Arc::new((crate::loom::Mutex::new(false), crate::loom::Condvar::new()));

        let thread_retired = Arc::clone(&retired);
        let thread_running = Arc::clone(&running);
        let thread_wake = Arc::clone(&wake);
        let handle = crate::loom::thread::spawn(move || {
            reclaim_loop(
                thread_retired,
                registry,
                thread_running,
                thread_wake,
                interval,
            );
        });

        Reclaimer {
            retired,
            running,
            wake,
            handle: Some(handle),
        }
    }

    /// Hands a logically-deleted, physically-unlinked node to the reclaimer.
    pub(crate) fn retire(&self, node: *mut Node<K, V>) {
        self.retired.push(node);
    }

    /// Stops the background thread and blocks until it has exited. Any
    /// nodes still retired at this point are freed unconditionally by the
    /// caller afterwards (see `Fib`'s `Drop`), since by then no other
    /// thread can hold a reference.
    pub(crate) fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        {
            let (lock, cvar) = &*self.wake;
            let mut woken = lock.lock().unwrap();
            *woken = true;
            cvar.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Drains whatever is left on the retired stack, freeing every node
    /// unconditionally. Only safe once no other thread can observe the
    /// `Fib` anymore (called from `Drop`).
    pub(crate) unsafe fn drain_unchecked(&self) {
        let mut entry = self.retired.take_all();
        while !entry.is_null() {
            let boxed = Box::from_raw(entry);
            free_retired(boxed.node);
            entry = boxed.next;
        }
    }
}

fn reclaim_loop<K, V>(
    retired: Arc<RetiredList<K, V>>,
    registry: Arc<HazardRegistry<K, V>>,
    running: Arc<AtomicBool>,
    wake: Arc<(crate::loom::Mutex<bool>, crate::loom::Condvar)>,
    interval: Duration,
) {
    while running.load(Ordering::SeqCst) {
        {
            let (lock, cvar) = &*wake;
            let guard = lock.lock().unwrap();
            let mut guard = crate::loom::wait_timeout(cvar, guard, interval);
            *guard = false;
        }
        if !running.load(Ordering::SeqCst) {
            break;
        }
        reclaim_pass(&retired, &registry);
    }
}

/// One sweep of the retired stack: anything with zero back-links and no
/// hazard pointer on it gets freed, everything else is pushed back for the
/// next pass.
fn reclaim_pass<K, V>(retired: &RetiredList<K, V>, registry: &HazardRegistry<K, V>) {
    let mut entry = retired.take_all();
    let mut still_waiting = Vec::new();
    let mut freed = 0usize;

    while !entry.is_null() {
        let boxed = unsafe { Box::from_raw(entry) };
        let next = boxed.next;
        let node = boxed.node;
        let links = unsafe { (*node).links.links() };
        if links == 0 && !registry.is_protected(node) {
            unsafe { free_retired(node) };
            freed += 1;
        } else {
            still_waiting.push(node);
        }
        entry = next;
    }

    #[cfg(feature = "tracing")]
    tracing::trace!(freed, "fib reclaim pass");

    for node in still_waiting {
        retired.push(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unprotected_zero_link_node_is_freed() {
        let registry: Arc<HazardRegistry<u32, u32>> = Arc::new(HazardRegistry::new());
        let retired: RetiredList<u32, u32> = RetiredList::new();
        let node = Box::into_raw(Node::new_data(0, 1u32, 2u32));
        retired.push(node);
        reclaim_pass(&retired, &registry);
        // Freed: re-pushing would now operate on dangling memory, so we
        // simply confirm the retired list drained to empty.
        assert!(retired.take_all().is_null());
    }

    #[test]
    fn freeing_a_retired_node_drops_its_successors_borrowed_link() {
        let registry: Arc<HazardRegistry<u32, u32>> = Arc::new(HazardRegistry::new());
        let retired: RetiredList<u32, u32> = RetiredList::new();

        // `succ` stands in for the node a predecessor's pointer was swung
        // onto when `node` got physically unlinked -- it carries the
        // borrowed link `Fib::search`'s unlink branch added at that point.
        let succ = Box::into_raw(Node::new_data(1, 10u32, 20u32));
        unsafe { (*succ).links.add_link() };

        let node = Box::into_raw(Node::new_data(0, 1u32, 2u32));
        unsafe { (*node).next.store(succ, Ordering::SeqCst) };
        retired.push(node);

        reclaim_pass(&retired, &registry);
        assert!(retired.take_all().is_null(), "node has zero links and is unprotected");

        // The only link `succ` ever held was the borrowed one; freeing
        // `node` must have released it.
        assert_eq!(unsafe { (*succ).links.links() }, 0);
        unsafe { drop_node(succ) };
    }

    #[test]
    fn linked_node_survives_a_pass() {
        let registry: Arc<HazardRegistry<u32, u32>> = Arc::new(HazardRegistry::new());
        let retired: RetiredList<u32, u32> = RetiredList::new();
        let node = Box::into_raw(Node::new_data(0, 1u32, 2u32));
        unsafe { (*node).links.add_link() };
        retired.push(node);
        reclaim_pass(&retired, &registry);
        let remaining = retired.take_all();
        assert!(!remaining.is_null());
        unsafe {
            let boxed = Box::from_raw(remaining);
            assert_eq!(boxed.node, node);
            (*node).links.remove_link();
            drop_node(node);
        }
    }
}
