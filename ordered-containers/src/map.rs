//! The ordered map façade (component C6): as [`crate::set::OrderedSet`], but
//! a value copy rides along with every key, and erasing an entry can run a
//! caller-supplied teardown hook first.
//!
//! Every [`OrderedMap::insert`] performs up to two payload allocations (key
//! copy, value copy) plus the node allocation inside [`RawAvlTree`]; either
//! all three exist and the entry is attached, or the map is left exactly as
//! it was, mirroring `original_source/src/map.c`'s `cmagic_map_allocate`,
//! which erases the half-built tree node again if the value-copy `malloc`
//! fails after the key-copy one already succeeded.

use core::cmp::Ordering;
use core::marker::PhantomData;
use core::mem::size_of;
use core::ptr::NonNull;

use region_alloc::AllocatorVTable;

use crate::raw::{Cursor, InsertResult, RawAvlTree};

fn compare_keys<K: Ord>(a: *const u8, b: *const u8) -> Ordering {
    unsafe { (*a.cast::<K>()).cmp(&*b.cast::<K>()) }
}

/// A handle to one key/value entry living in an [`OrderedMap`].
#[derive(Clone, Copy)]
pub struct MapCursor<'a, K, V> {
    inner: Cursor<'a>,
    _marker: PhantomData<(K, V)>,
}

impl<'a, K, V> MapCursor<'a, K, V> {
    /// The key of this entry.
    pub fn key(&self) -> &'a K {
        unsafe { &*self.inner.key_ptr().cast::<K>() }
    }

    /// The value of this entry.
    pub fn value(&self) -> &'a V {
        unsafe { &*self.inner.value_ptr().cast::<V>() }
    }

    /// The value of this entry, mutable in place.
    pub fn value_mut(&self) -> &'a mut V {
        unsafe { &mut *self.inner.value_ptr().cast::<V>() }
    }
}

/// The outcome of [`OrderedMap::insert`]/[`OrderedMap::allocate`].
pub struct MapInsertOutcome<'a, K, V> {
    /// The entry that now holds this key, or `None` if a required
    /// allocation failed and the map is unchanged.
    pub cursor: Option<MapCursor<'a, K, V>>,
    /// `true` if the key was already present; no allocation or mutation
    /// happened.
    pub already_existed: bool,
}

/// A destructor invoked once per entry by [`OrderedMap::erase_with`],
/// immediately before that entry's key and value storage is dropped and
/// released. Must not itself release the addresses it is given.
pub type EraseDestructor<'d, K, V> = &'d dyn Fn(&K, &mut V);

/// A self-balancing ordered map from `K` to `V`, allocated entirely through
/// an [`AllocatorVTable`].
pub struct OrderedMap<'a, K: Ord, V> {
    tree: RawAvlTree<'a, fn(*const u8, *const u8) -> Ordering>,
    key_size: usize,
    value_size: usize,
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: Ord, V> OrderedMap<'a, K, V> {
    /// Creates a new, empty map that allocates node, key, and value storage
    /// through `allocator`, ordered by `K`'s [`Ord`] implementation.
    pub fn new(allocator: &'a dyn AllocatorVTable) -> Self {
        OrderedMap {
            tree: RawAvlTree::new(allocator, compare_keys::<K> as fn(*const u8, *const u8) -> Ordering),
            key_size: size_of::<K>(),
            value_size: size_of::<V>(),
            _marker: PhantomData,
        }
    }

    /// The allocator this map's node, key, and value storage are drawn from.
    pub fn allocator(&self) -> &'a dyn AllocatorVTable {
        self.tree.allocator()
    }

    /// The number of entries currently stored.
    pub fn size(&self) -> usize {
        self.tree.size()
    }

    /// Reserves storage for an entry keyed by `key` without copying any
    /// bytes into the key or value storage.
    ///
    /// # Safety
    ///
    /// Same obligations as [`crate::set::OrderedSet::allocate`]: the caller
    /// must initialize the key (and, before reading it back, the value)
    /// storage before any operation that may compare against this entry,
    /// and the key bytes written must compare equal to `key` as given here.
    pub unsafe fn allocate(&self, key: &K) -> MapInsertOutcome<'a, K, V> {
        let key_ptr = (key as *const K).cast::<u8>().cast_mut();
        match self.tree.insert(key_ptr, core::ptr::null_mut()) {
            None => MapInsertOutcome {
                cursor: None,
                already_existed: false,
            },
            Some(InsertResult {
                cursor,
                already_existed: true,
            }) => MapInsertOutcome {
                cursor: Some(MapCursor {
                    inner: cursor,
                    _marker: PhantomData,
                }),
                already_existed: true,
            },
            Some(InsertResult {
                cursor,
                already_existed: false,
            }) => {
                let Some(key_storage) = self.allocator().allocate(self.key_size) else {
                    self.tree.erase(key_ptr.cast_const());
                    return MapInsertOutcome {
                        cursor: None,
                        already_existed: false,
                    };
                };
                let Some(value_storage) = self.allocator().allocate(self.value_size) else {
                    self.tree.erase(key_ptr.cast_const());
                    unsafe { self.allocator().release(key_storage) };
                    return MapInsertOutcome {
                        cursor: None,
                        already_existed: false,
                    };
                };
                unsafe {
                    cursor.set_key_ptr(key_storage.as_ptr());
                    cursor.set_value_ptr(value_storage.as_ptr());
                }
                MapInsertOutcome {
                    cursor: Some(MapCursor {
                        inner: cursor,
                        _marker: PhantomData,
                    }),
                    already_existed: false,
                }
            }
        }
    }

    /// Inserts `key`/`value` by value. Atomic: either both copies exist and
    /// the entry is attached, or the map is unchanged and both `key` and
    /// `value` are simply dropped as unused owned values.
    pub fn insert(&self, key: K, value: V) -> MapInsertOutcome<'a, K, V> {
        let outcome = unsafe { self.allocate(&key) };
        if let Some(cursor) = &outcome.cursor {
            if !outcome.already_existed {
                unsafe {
                    core::ptr::write(cursor.inner.key_ptr().cast::<K>(), key);
                    core::ptr::write(cursor.inner.value_ptr().cast::<V>(), value);
                }
                return outcome;
            }
        }
        outcome
    }

    /// Finds the entry matching `key`, if any.
    pub fn find(&self, key: &K) -> Option<MapCursor<'a, K, V>> {
        self.tree
            .find((key as *const K).cast::<u8>())
            .map(|inner| MapCursor {
                inner,
                _marker: PhantomData,
            })
    }

    /// Removes `key`, dropping and releasing its stored key and value.
    /// Returns `false`, leaving the map unchanged, if `key` was absent.
    pub fn erase(&self, key: &K) -> bool {
        self.erase_with(key, None)
    }

    /// As [`OrderedMap::erase`], but runs `destructor` on the still-valid
    /// key/value addresses immediately before they are dropped and
    /// released - the hook a language-native wrapper uses to run
    /// user-defined teardown exactly once per entry.
    pub fn erase_with(&self, key: &K, destructor: Option<EraseDestructor<K, V>>) -> bool {
        match self.tree.erase((key as *const K).cast::<u8>()) {
            None => false,
            Some((key_ptr, value_ptr)) => {
                unsafe {
                    if let Some(destructor) = destructor {
                        destructor(&*key_ptr.cast::<K>(), &mut *value_ptr.cast::<V>());
                    }
                    core::ptr::drop_in_place(key_ptr.cast::<K>());
                    core::ptr::drop_in_place(value_ptr.cast::<V>());
                    self.allocator().release(NonNull::new_unchecked(key_ptr));
                    self.allocator()
                        .release(NonNull::new_unchecked(value_ptr));
                }
                true
            }
        }
    }

    /// The in-order first (smallest-keyed) entry.
    pub fn first(&self) -> Option<MapCursor<'a, K, V>> {
        self.tree.first().map(|inner| MapCursor {
            inner,
            _marker: PhantomData,
        })
    }

    /// The in-order last (largest-keyed) entry.
    pub fn last(&self) -> Option<MapCursor<'a, K, V>> {
        self.tree.last().map(|inner| MapCursor {
            inner,
            _marker: PhantomData,
        })
    }

    /// The in-order successor of `cursor`, if any.
    pub fn next(&self, cursor: MapCursor<'a, K, V>) -> Option<MapCursor<'a, K, V>> {
        self.tree.next(cursor.inner).map(|inner| MapCursor {
            inner,
            _marker: PhantomData,
        })
    }

    /// The in-order predecessor of `cursor`, if any.
    pub fn prev(&self, cursor: MapCursor<'a, K, V>) -> Option<MapCursor<'a, K, V>> {
        self.tree.prev(cursor.inner).map(|inner| MapCursor {
            inner,
            _marker: PhantomData,
        })
    }

    /// Drops and releases every stored key and value, leaving the map
    /// empty.
    pub fn clear(&self) {
        let mut cursor = self.tree.first();
        while let Some(c) = cursor {
            let next = self.tree.next(c);
            unsafe {
                core::ptr::drop_in_place(c.key_ptr().cast::<K>());
                core::ptr::drop_in_place(c.value_ptr().cast::<V>());
                self.allocator()
                    .release(NonNull::new_unchecked(c.key_ptr()));
                self.allocator()
                    .release(NonNull::new_unchecked(c.value_ptr()));
            }
            cursor = next;
        }
        self.tree.clear();
    }
}

impl<'a, K: Ord, V> Drop for OrderedMap<'a, K, V> {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use region_alloc::HeapAllocator;

    #[test]
    fn association_matches_seed_scenario_4() {
        let heap = HeapAllocator;
        let map: OrderedMap<i32, &'static str> = OrderedMap::new(&heap);
        for (k, v) in [
            (3, "three"),
            (8, "eight"),
            (5, "five"),
            (2, "two"),
            (1, "one"),
            (7, "seven"),
            (10, "ten"),
            (4, "four"),
            (9, "nine"),
            (6, "six"),
        ] {
            assert!(!map.insert(k, v).already_existed);
        }

        let mut keys = std::vec::Vec::new();
        let mut values = std::vec::Vec::new();
        let mut cursor = map.first();
        while let Some(c) = cursor {
            keys.push(*c.key());
            values.push(*c.value());
            cursor = map.next(c);
        }
        assert_eq!(keys, std::vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(
            values,
            std::vec!["one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten"]
        );

        map.clear();
        assert_eq!(map.size(), 0);
    }

    #[test]
    fn erase_with_destructor_runs_before_release() {
        let heap = HeapAllocator;
        let map: OrderedMap<i32, i32> = OrderedMap::new(&heap);
        map.insert(1, 41);

        let seen = core::cell::Cell::new(None);
        let destructor: EraseDestructor<i32, i32> = &|k, v| seen.set(Some((*k, *v)));
        assert!(map.erase_with(&1, Some(destructor)));
        assert_eq!(seen.get(), Some((1, 41)));
        assert!(map.find(&1).is_none());
    }

    #[test]
    fn value_mut_updates_in_place() {
        let heap = HeapAllocator;
        let map: OrderedMap<i32, i32> = OrderedMap::new(&heap);
        map.insert(1, 1);
        let cursor = map.find(&1).unwrap();
        *cursor.value_mut() = 42;
        assert_eq!(*map.find(&1).unwrap().value(), 42);
    }
}
