//! Enumeration surfaces over a live, concurrently-mutated table.
//!
//! [`Walker`] is the simple case: hold one hazard row for the whole walk,
//! never stop. [`FibCursor`] is the resumable case the background route
//! dumper needs: it can be suspended indefinitely between steps (so it
//! must not pin one of the 32 hazard rows the whole time) and supports
//! unlinking the entry it is currently sitting on.

use crate::handle::Handle;
use crate::hazard::ReservedSlot;
use crate::key::FibKey;
use crate::loom::Ordering;
use crate::node::Node;
use crate::Fib;

/// Advances `cursor` (currently sitting at `pred`) to the next live data
/// node, physically skipping over sentinels and (without unlinking) over
/// already-deleted data nodes.
///
/// `pred` occupies the slot's `curr` hazard field for as long as it's being
/// dereferenced; the node under examination occupies `succ`. This mirrors
/// the two soft-link slots the source keeps per traversal step so that
/// re-reading `pred` after publishing the next candidate never dereferences
/// an unprotected pointer.
fn next_live<K, V>(
    fib: &Fib<K, V>,
    slot: &ReservedSlot<'_, K, V>,
    mut pred: *mut Node<K, V>,
) -> Option<*mut Node<K, V>>
where
    K: FibKey + Send + 'static,
    V: Send + 'static,
{
    slot.protect_curr(pred);
    loop {
        let curr = unsafe { (*pred).next.load(Ordering::SeqCst) };
        if curr.is_null() {
            return None;
        }
        slot.protect_succ(curr);
        if unsafe { (*pred).next.load(Ordering::SeqCst) } != curr {
            // pred mutated under us; pred itself is still protected via the
            // `curr` slot, so re-reading its `next` here is safe.
            continue;
        }
        let node = unsafe { &*curr };
        if node.is_sentinel() || node.next.is_marked(Ordering::SeqCst) {
            pred = curr;
            slot.protect_curr(pred);
            continue;
        }
        return Some(curr);
    }
}

/// A one-shot, non-resumable walk over every live entry in the table.
pub struct Walker<'f, K, V>
where
    K: FibKey + Send + 'static,
    V: Send + 'static,
{
    fib: &'f Fib<K, V>,
    slot: ReservedSlot<'f, K, V>,
    pred: *mut Node<K, V>,
}

impl<'f, K, V> Walker<'f, K, V>
where
    K: FibKey + Send + 'static,
    V: Send + 'static,
{
    pub(crate) fn new(fib: &'f Fib<K, V>) -> Self {
        let head = fib.get_or_create_sentinel(0);
        let slot = fib.hazards.reserve();
        Walker {
            fib,
            slot,
            pred: head,
        }
    }
}

impl<'f, K, V> Iterator for Walker<'f, K, V>
where
    K: FibKey + Send + 'static,
    V: Send + 'static,
{
    type Item = Handle<'f, K, V>;

    fn next(&mut self) -> Option<Self::Item> {
        let curr = next_live(self.fib, &self.slot, self.pred)?;
        self.pred = curr;
        unsafe { (*curr).links.add_link() };
        Some(Handle::new(self.fib, curr))
    }
}

/// A suspend/resume-friendly cursor. Between calls to [`advance_past`]
/// it holds no hazard row, only a back-link pinning its current node
/// alive, so any number of cursors can sit suspended at once.
///
/// [`advance_past`]: FibCursor::advance_past
pub struct FibCursor<'f, K, V>
where
    K: FibKey + Send + 'static,
    V: Send + 'static,
{
    fib: &'f Fib<K, V>,
    /// The node this cursor is currently parked on (already visited and
    /// returned to the caller), or `None` before the first step. Holds
    /// one extra back-link for as long as it's `Some`.
    pinned: Option<*mut Node<K, V>>,
}

// SAFETY: the only thing `FibCursor` owns beyond a shared reference to the
// table is the raw `pinned` pointer, and that pointer is protected from
// concurrent reclamation the same way every other cross-thread reference
// into the table is: a back-link (see `node::LinkCounter`) kept alive for
// as long as the cursor holds it. Moving a parked cursor to another thread
// simply moves that ownership along with it; nothing about `pinned` assumes
// it's read from the thread that parked it. This is the mechanism
// `clone_position`'s doc comment refers to when it says "hand off to
// another thread".
unsafe impl<'f, K, V> Send for FibCursor<'f, K, V>
where
    K: FibKey + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
}

impl<'f, K, V> FibCursor<'f, K, V>
where
    K: FibKey + Send + 'static,
    V: Send + 'static,
{
    pub(crate) fn new(fib: &'f Fib<K, V>) -> Self {
        FibCursor { fib, pinned: None }
    }

    fn start_point(&self) -> *mut Node<K, V> {
        self.pinned.unwrap_or_else(|| self.fib.get_or_create_sentinel(0))
    }

    /// Moves to the next live entry and returns a handle to it, or `None`
    /// once the end of the table is reached (after which the cursor is
    /// exhausted; create a new one with [`Fib::iter`] to restart).
    pub fn advance_past(&mut self) -> Option<Handle<'f, K, V>> {
        let start = self.start_point();
        let slot = self.fib.hazards.reserve();
        let found = next_live(self.fib, &slot, start);

        if let Some(old) = self.pinned.take() {
            unsafe { (*old).links.remove_link() };
        }

        match found {
            Some(node) => {
                unsafe { (*node).links.add_link() }; // cursor's own pin
                self.pinned = Some(node);
                unsafe { (*node).links.add_link() }; // the returned handle
                Some(Handle::new(self.fib, node))
            }
            None => None,
        }
    }

    /// Deletes the entry the cursor currently sits on. A no-op returning
    /// `false` if the cursor hasn't been advanced yet, or the entry was
    /// already deleted.
    pub fn unlink(&mut self) -> bool {
        let Some(node) = self.pinned else {
            return false;
        };
        unsafe { (*node).links.add_link() };
        let handle = Handle::new(self.fib, node);
        self.fib.delete(handle)
    }

    /// Snapshots the current position into an independently-advanceable
    /// cursor, for example to hand off to another thread.
    pub fn clone_position(&self) -> FibCursor<'f, K, V> {
        if let Some(node) = self.pinned {
            unsafe { (*node).links.add_link() };
        }
        FibCursor {
            fib: self.fib,
            pinned: self.pinned,
        }
    }
}

impl<'f, K, V> Drop for FibCursor<'f, K, V>
where
    K: FibKey + Send + 'static,
    V: Send + 'static,
{
    fn drop(&mut self) {
        if let Some(node) = self.pinned.take() {
            unsafe { (*node).links.remove_link() };
        }
    }
}
