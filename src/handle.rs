//! A caller-held reference into the table, returned by `find`/`get`/`route`
//! and the enumeration surfaces.
//!
//! A `Handle` is not a hazard pointer: once the call that produced it
//! returns, nothing protects its node from deletion by another thread
//! except the `Handle` itself holding one of the node's back-links (see
//! `node::LinkCounter`). That keeps the underlying allocation alive for as
//! long as the `Handle` exists, even if the entry is concurrently deleted
//! and physically unlinked -- the node just won't show up in future
//! lookups anymore.

use std::marker::PhantomData;

use crate::key::FibKey;
use crate::loom::Ordering;
use crate::node::Node;
use crate::Fib;

/// A live reference to one entry in a [`Fib`], returned by lookups and
/// enumeration. See the module docs for its lifetime/safety story.
pub struct Handle<'f, K, V>
where
    K: FibKey + Send + 'static,
    V: Send + 'static,
{
    fib: &'f Fib<K, V>,
    node: *mut Node<K, V>,
    _marker: PhantomData<&'f Node<K, V>>,
}

impl<'f, K, V> Handle<'f, K, V>
where
    K: FibKey + Send + 'static,
    V: Send + 'static,
{
    /// # Safety (invariant, not an `unsafe fn`)
    /// Callers must have already registered a back-link for `node` (i.e.
    /// called `add_link`) before constructing a `Handle` around it.
    pub(crate) fn new(fib: &'f Fib<K, V>, node: *mut Node<K, V>) -> Self {
        Handle {
            fib,
            node,
            _marker: PhantomData,
        }
    }

    pub(crate) fn node_ptr(&self) -> *mut Node<K, V> {
        self.node
    }

    /// The key of the entry this handle refers to.
    pub fn key(&self) -> &K {
        unsafe { (*self.node).key() }
    }

    /// The value of the entry this handle refers to.
    pub fn value(&self) -> &V {
        unsafe { (*self.node).value() }
    }

    /// True if the entry has already been logically deleted (by this
    /// handle's own `delete` call, or by some other thread racing it).
    pub fn is_deleted(&self) -> bool {
        unsafe { (*self.node).next.is_marked(Ordering::SeqCst) }
    }
}

impl<'f, K, V> Drop for Handle<'f, K, V>
where
    K: FibKey + Send + 'static,
    V: Send + 'static,
{
    fn drop(&mut self) {
        unsafe { (*self.node).links.remove_link() };
        let _ = self.fib;
    }
}
