//! The ordered set façade (component C5): owns a copy of every key it is
//! given, stored as its own allocation alongside the AVL node [`raw`]
//! allocates for it.
//!
//! Two allocations happen per [`OrderedSet::insert`] - one for the node
//! (inside [`RawAvlTree`]), one for the key copy (inside this module) - and
//! [`OrderedSet::erase`] releases both. A failure partway through `insert`
//! unwinds whatever was already acquired, the same way
//! `original_source/src/set.c`'s `cmagic_set_allocate` erases the
//! just-inserted (valueless) tree node again when the key-copy `malloc`
//! fails.

use core::cmp::Ordering;
use core::marker::PhantomData;
use core::mem::size_of;
use core::ptr::NonNull;

use region_alloc::AllocatorVTable;

use crate::raw::{Cursor, InsertResult, RawAvlTree};

fn compare_keys<K: Ord>(a: *const u8, b: *const u8) -> Ordering {
    unsafe { (*a.cast::<K>()).cmp(&*b.cast::<K>()) }
}

/// A read-only handle to one key living in an [`OrderedSet`].
#[derive(Clone, Copy)]
pub struct SetCursor<'a, K> {
    inner: Cursor<'a>,
    _marker: PhantomData<K>,
}

impl<'a, K> SetCursor<'a, K> {
    /// The key this cursor points at.
    pub fn key(&self) -> &'a K {
        unsafe { &*self.inner.key_ptr().cast::<K>() }
    }
}

/// The outcome of [`OrderedSet::insert`]/[`OrderedSet::allocate`].
pub struct SetInsertOutcome<'a, K> {
    /// The entry that now holds this key, or `None` if a required
    /// allocation failed and the set is unchanged.
    pub cursor: Option<SetCursor<'a, K>>,
    /// `true` if the key was already present; no allocation or mutation
    /// happened.
    pub already_existed: bool,
}

/// A self-balancing ordered set of `K`, allocated entirely through an
/// [`AllocatorVTable`].
pub struct OrderedSet<'a, K: Ord> {
    tree: RawAvlTree<'a, fn(*const u8, *const u8) -> Ordering>,
    key_size: usize,
    _marker: PhantomData<K>,
}

impl<'a, K: Ord> OrderedSet<'a, K> {
    /// Creates a new, empty set that allocates node and key storage through
    /// `allocator`, ordered by `K`'s [`Ord`] implementation.
    pub fn new(allocator: &'a dyn AllocatorVTable) -> Self {
        OrderedSet {
            tree: RawAvlTree::new(allocator, compare_keys::<K> as fn(*const u8, *const u8) -> Ordering),
            key_size: size_of::<K>(),
            _marker: PhantomData,
        }
    }

    /// The allocator this set's node and key storage are drawn from.
    pub fn allocator(&self) -> &'a dyn AllocatorVTable {
        self.tree.allocator()
    }

    /// The number of keys currently stored.
    pub fn size(&self) -> usize {
        self.tree.size()
    }

    /// Reserves storage for `key` without copying its bytes into that
    /// storage: the node is attached, comparing against `key` as given, but
    /// the key's eventual resting place holds whatever bytes were already
    /// there.
    ///
    /// Used by wrappers that want to construct a key in place rather than
    /// move one in. [`OrderedSet::insert`] is this followed by a byte copy.
    ///
    /// # Safety
    ///
    /// The caller must initialize the `size_of::<K>()` bytes at
    /// `cursor.key_ptr()` before any operation on this set that may compare
    /// against this entry (including another `allocate`/`insert`, `find`,
    /// iteration, or dropping the set), and the bytes written must compare
    /// equal - under `K`'s `Ord` impl - to `key` as given here.
    pub unsafe fn allocate(&self, key: &K) -> SetInsertOutcome<'a, K> {
        let key_ptr = (key as *const K).cast::<u8>().cast_mut();
        match self.tree.insert(key_ptr, core::ptr::null_mut()) {
            None => SetInsertOutcome {
                cursor: None,
                already_existed: false,
            },
            Some(InsertResult {
                cursor,
                already_existed: true,
            }) => SetInsertOutcome {
                cursor: Some(SetCursor {
                    inner: cursor,
                    _marker: PhantomData,
                }),
                already_existed: true,
            },
            Some(InsertResult {
                cursor,
                already_existed: false,
            }) => {
                let Some(storage) = self.allocator().allocate(self.key_size) else {
                    self.tree.erase(key_ptr.cast_const());
                    return SetInsertOutcome {
                        cursor: None,
                        already_existed: false,
                    };
                };
                unsafe { cursor.set_key_ptr(storage.as_ptr()) };
                SetInsertOutcome {
                    cursor: Some(SetCursor {
                        inner: cursor,
                        _marker: PhantomData,
                    }),
                    already_existed: false,
                }
            }
        }
    }

    /// Inserts `key` by value, copying it into freshly allocated storage if
    /// it was not already present. `key` is consumed either way: on success
    /// its bytes move into the set's storage, and on an `already_existed` or
    /// failed outcome it is simply dropped as any unused owned value would
    /// be.
    pub fn insert(&self, key: K) -> SetInsertOutcome<'a, K> {
        let outcome = unsafe { self.allocate(&key) };
        if let Some(cursor) = &outcome.cursor {
            if !outcome.already_existed {
                unsafe { core::ptr::write(cursor.inner.key_ptr().cast::<K>(), key) };
                return outcome;
            }
        }
        outcome
    }

    /// Finds the entry matching `key`, if any.
    pub fn find(&self, key: &K) -> Option<SetCursor<'a, K>> {
        self.tree
            .find((key as *const K).cast::<u8>())
            .map(|inner| SetCursor {
                inner,
                _marker: PhantomData,
            })
    }

    /// Removes `key`, dropping and releasing its stored copy. Returns
    /// `false`, leaving the set unchanged, if `key` was absent.
    pub fn erase(&self, key: &K) -> bool {
        match self.tree.erase((key as *const K).cast::<u8>()) {
            None => false,
            Some((key_ptr, _value_ptr)) => {
                unsafe {
                    core::ptr::drop_in_place(key_ptr.cast::<K>());
                    self.allocator().release(NonNull::new_unchecked(key_ptr));
                }
                true
            }
        }
    }

    /// The in-order first (smallest) entry.
    pub fn first(&self) -> Option<SetCursor<'a, K>> {
        self.tree.first().map(|inner| SetCursor {
            inner,
            _marker: PhantomData,
        })
    }

    /// The in-order last (largest) entry.
    pub fn last(&self) -> Option<SetCursor<'a, K>> {
        self.tree.last().map(|inner| SetCursor {
            inner,
            _marker: PhantomData,
        })
    }

    /// The in-order successor of `cursor`, if any.
    pub fn next(&self, cursor: SetCursor<'a, K>) -> Option<SetCursor<'a, K>> {
        self.tree.next(cursor.inner).map(|inner| SetCursor {
            inner,
            _marker: PhantomData,
        })
    }

    /// The in-order predecessor of `cursor`, if any.
    pub fn prev(&self, cursor: SetCursor<'a, K>) -> Option<SetCursor<'a, K>> {
        self.tree.prev(cursor.inner).map(|inner| SetCursor {
            inner,
            _marker: PhantomData,
        })
    }

    /// Drops and releases every stored key, leaving the set empty.
    pub fn clear(&self) {
        let mut cursor = self.tree.first();
        while let Some(c) = cursor {
            let next = self.tree.next(c);
            unsafe {
                core::ptr::drop_in_place(c.key_ptr().cast::<K>());
                self.allocator()
                    .release(NonNull::new_unchecked(c.key_ptr()));
            }
            cursor = next;
        }
        self.tree.clear();
    }
}

impl<'a, K: Ord> Drop for OrderedSet<'a, K> {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use region_alloc::HeapAllocator;

    #[test]
    fn ordering_matches_seed_scenario_3() {
        let heap = HeapAllocator;
        let set: OrderedSet<i32> = OrderedSet::new(&heap);
        for n in [4, 1, -2, 2, 3, -5, -4, -3, -1, 0, 5] {
            let outcome = set.insert(n);
            assert!(!outcome.already_existed);
        }
        assert_eq!(set.size(), 11);

        let mut seen = std::vec::Vec::new();
        let mut cursor = set.first();
        while let Some(c) = cursor {
            seen.push(*c.key());
            cursor = set.next(c);
        }
        assert_eq!(seen, std::vec![-5, -4, -3, -2, -1, 0, 1, 2, 3, 4, 5]);

        let outcome = set.insert(3);
        assert!(outcome.already_existed);
        assert_eq!(set.size(), 11);
    }

    #[test]
    fn erase_removes_and_drops_the_stored_copy() {
        let heap = HeapAllocator;
        let set: OrderedSet<std::string::String> = OrderedSet::new(&heap);
        set.insert(std::string::String::from("hello"));
        assert!(set.find(&std::string::String::from("hello")).is_some());
        assert!(set.erase(&std::string::String::from("hello")));
        assert!(set.find(&std::string::String::from("hello")).is_none());
        assert_eq!(set.size(), 0);
    }

    #[test]
    fn clear_empties_the_set() {
        let heap = HeapAllocator;
        let set: OrderedSet<i32> = OrderedSet::new(&heap);
        for n in 0..10 {
            set.insert(n);
        }
        set.clear();
        assert_eq!(set.size(), 0);
        assert!(set.first().is_none());
    }

    // Random inserts/erases against a small key range, checked against a
    // `BTreeSet` reference for membership and ascending-order iteration.
    quickcheck::quickcheck! {
        fn matches_a_btreeset_reference(seed: u64, ops: std::vec::Vec<(bool, i8)>) -> bool {
            use rand::{Rng, SeedableRng};
            let _ = rand::rngs::StdRng::seed_from_u64(seed); // keep the seed in the corpus for shrinking.

            let heap = HeapAllocator;
            let set: OrderedSet<i32> = OrderedSet::new(&heap);
            let mut reference = std::collections::BTreeSet::new();

            for (erase, key) in ops {
                let key = key as i32;
                if erase {
                    if set.erase(&key) != reference.remove(&key) {
                        return false;
                    }
                } else {
                    let already = !reference.insert(key);
                    if set.insert(key).already_existed != already {
                        return false;
                    }
                }
            }

            if set.size() != reference.len() {
                return false;
            }
            let mut seen = std::vec::Vec::new();
            let mut cursor = set.first();
            while let Some(c) = cursor {
                seen.push(*c.key());
                cursor = set.next(c);
            }
            seen == reference.into_iter().collect::<std::vec::Vec<_>>()
        }
    }
}
