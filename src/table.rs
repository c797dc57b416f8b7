//! The bucket directory: an array of pointers into the split-ordered list,
//! doubled in place as load grows.
//!
//! Each [`Table`] snapshot is immutable once published: its slot count and
//! mask are fixed at allocation time, so a reader that atomically loads the
//! current `Table` pointer can read its `mask` and index its `slots` with
//! no further synchronization and no risk of the two disagreeing (which is
//! exactly the race that a naive "separate atomic size + separate atomic
//! pointer" design would have). Outgrown tables are kept around and freed
//! only when the owning `Fib` is dropped -- see `DESIGN.md` for why that
//! bounded leak is preferable to a second class of hazard-protected pointer.

use crate::loom::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use crate::node::Node;

pub(crate) const DEFAULT_HASH_ORDER: u32 = 10;
const HASH_HI_MARK_MUL: usize = 2;
const HASH_HI_MAX: u32 = 24;

pub(crate) struct Table<K, V> {
    pub(crate) order: u32,
    pub(crate) mask: u32,
    pub(crate) slots: Box<[AtomicPtr<Node<K, V>>]>,
}

impl<K, V> Table<K, V> {
    fn new(order: u32) -> Box<Table<K, V>> {
        let size = 1usize << order;
        let mut slots = Vec::with_capacity(size);
        for _ in 0..size {
            slots.push(AtomicPtr::new(std::ptr::null_mut()));
        }
        Box::new(Table {
            order,
            mask: (size - 1) as u32,
            slots: slots.into_boxed_slice(),
        })
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.slots.len()
    }
}

/// The directory of bucket-head pointers, doubled under a single-writer
/// lock (`resizing`) while readers keep traversing lock-free.
pub(crate) struct Directory<K, V> {
    current: AtomicPtr<Table<K, V>>,
    retired: crate::loom::Mutex<Vec<*mut Table<K, V>>>,
    entries: AtomicUsize,
    entries_max: AtomicUsize,
    resizing: AtomicBool,
}

unsafe impl<K: Send, V: Send> Send for Directory<K, V> {}
unsafe impl<K: Send, V: Send> Sync for Directory<K, V> {}

impl<K, V> Directory<K, V> {
    pub(crate) fn new(hash_order: u32) -> Self {
        let order = if hash_order == 0 {
            DEFAULT_HASH_ORDER
        } else {
            hash_order
        };
        let table = Box::into_raw(Table::new(order));
        Directory {
            current: AtomicPtr::new(table),
            retired: crate::loom::Mutex::new(Vec::new()),
            entries: AtomicUsize::new(0),
            entries_max: AtomicUsize::new((1usize << order) * HASH_HI_MARK_MUL),
            resizing: AtomicBool::new(false),
        }
    }

    /// Loads the current table snapshot. The returned reference stays valid
    /// for the lifetime of `self` (outgrown tables are leaked until drop,
    /// never freed early).
    #[inline]
    pub(crate) fn table(&self) -> &Table<K, V> {
        unsafe { &*self.current.load(Ordering::SeqCst) }
    }

    pub(crate) fn bump_entries(&self) -> usize {
        self.entries.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn drop_entries(&self) {
        self.entries.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn entries(&self) -> usize {
        self.entries.load(Ordering::SeqCst)
    }

    fn entries_max(&self) -> usize {
        self.entries_max.load(Ordering::SeqCst)
    }

    /// Doubles the table if occupancy crossed the high-water mark and no
    /// other thread is already resizing. A best-effort trigger: a few
    /// inserts slipping past the mark before the winner finishes is fine.
    pub(crate) fn maybe_grow(&self) {
        let table = self.table();
        if table.order >= HASH_HI_MAX {
            return;
        }
        if self.entries() <= self.entries_max() {
            return;
        }
        if self
            .resizing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let old_ptr = self.current.load(Ordering::SeqCst);
        let old = unsafe { &*old_ptr };
        let new_order = old.order + 1;
        let mut new_table = Table::new(new_order);
        for (i, slot) in old.slots.iter().enumerate() {
            new_table.slots[i].store(slot.load(Ordering::SeqCst), Ordering::SeqCst);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(from_order = old.order, to_order = new_order, "fib rehash");

        let new_ptr = Box::into_raw(new_table);
        self.current.store(new_ptr, Ordering::SeqCst);
        self.entries_max
            .store((1usize << new_order) * HASH_HI_MARK_MUL, Ordering::SeqCst);
        self.retired.lock().unwrap().push(old_ptr);
        self.resizing.store(false, Ordering::SeqCst);
    }
}

impl<K, V> Drop for Directory<K, V> {
    fn drop(&mut self) {
        unsafe {
            let current = self.current.load(Ordering::SeqCst);
            drop(Box::from_raw(current));
            for table in self.retired.lock().unwrap().drain(..) {
                drop(Box::from_raw(table));
            }
        }
    }
}
