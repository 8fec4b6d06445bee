//! The AVL tree engine (component C4): a balanced ordered map of opaque key
//! pointers to opaque value pointers, parameterized by a user comparator.
//!
//! This is the untyped core that [`crate::set::OrderedSet`] and
//! [`crate::map::OrderedMap`] build on. It never reads or copies the bytes a
//! key or value pointer refers to - it only compares them (through the
//! caller's comparator) and moves the pointers around. Every node is its own
//! allocation from the tree's [`AllocatorVTable`], obtained and released one
//! at a time, exactly like the rest of this workspace's allocator-bound
//! containers.
//!
//! Rebalancing follows the textbook four-rotation AVL table, keyed on the
//! balance factor and which child of the heavy subtree the change landed in.
//! A rotation that would otherwise need to dereference an absent "inner"
//! child (`T2` in most textbook diagrams) tolerates it being null, rather
//! than assuming a node can't be a rotation pivot with an empty middle
//! subtree.

use core::cell::Cell;
use core::cmp::Ordering;
use core::marker::PhantomData;
use core::mem::size_of;
use core::ptr::NonNull;
use region_alloc::AllocatorVTable;
#[allow(unused_imports)]
use region_alloc::{extra_assert, extra_assert_eq};

#[cfg(any(test, feature = "extra_assertions"))]
const AVL_TREE_MAGIC: u32 = 0x54524545; // b"TREE" read as a big-endian u32.

struct Node {
    parent: Cell<*mut Node>,
    left: Cell<*mut Node>,
    right: Cell<*mut Node>,
    height: Cell<i32>,
    key: Cell<*mut u8>,
    value: Cell<*mut u8>,
}

fn height_of(node: *mut Node) -> i32 {
    if node.is_null() {
        0
    } else {
        unsafe { (*node).height.get() }
    }
}

fn balance_of(node: *mut Node) -> i32 {
    unsafe { height_of((*node).left.get()) - height_of((*node).right.get()) }
}

fn recompute_height(node: *mut Node) {
    unsafe {
        let h = 1 + height_of((*node).left.get()).max(height_of((*node).right.get()));
        (*node).height.set(h);
    }
}

/// A handle to a single node, valid as long as the tree it came from is not
/// mutated through an operation other than reads via this same handle.
///
/// Mirrors the C library's raw `{key, value}` iterator struct: it grants
/// access to the node's key/value pointers, but carries no guarantee beyond
/// "don't use this across a mutating call" - the same contract the rest of
/// this crate documents for iterator invalidation.
#[derive(Clone, Copy)]
pub struct Cursor<'a> {
    node: NonNull<Node>,
    _marker: PhantomData<&'a ()>,
}

impl<'a> Cursor<'a> {
    /// The key pointer stored in this node.
    pub fn key_ptr(&self) -> *mut u8 {
        unsafe { self.node.as_ref().key.get() }
    }

    /// The value pointer stored in this node.
    pub fn value_ptr(&self) -> *mut u8 {
        unsafe { self.node.as_ref().value.get() }
    }

    /// Overwrites the key pointer stored in this node.
    ///
    /// # Safety
    ///
    /// The previous key pointer, if it was an allocation the caller owns,
    /// must already have been released (or intentionally kept reachable
    /// elsewhere) before calling this.
    pub unsafe fn set_key_ptr(&self, ptr: *mut u8) {
        unsafe { self.node.as_ref().key.set(ptr) };
    }

    /// Overwrites the value pointer stored in this node. Same caveats as
    /// [`Cursor::set_key_ptr`].
    pub unsafe fn set_value_ptr(&self, ptr: *mut u8) {
        unsafe { self.node.as_ref().value.set(ptr) };
    }
}

/// The result of [`RawAvlTree::insert`].
pub struct InsertResult<'a> {
    /// The node that now holds this key - freshly created, or the one that
    /// already existed.
    pub cursor: Cursor<'a>,
    /// `true` if the key was already present and no node was created.
    pub already_existed: bool,
}

/// A balanced binary search tree over opaque `*mut u8` key/value pointers,
/// ordered by `comparator` and allocating nodes through `allocator`.
///
/// `C` is `Fn(*const u8, *const u8) -> Ordering`; typed wrappers
/// ([`crate::set::OrderedSet`], [`crate::map::OrderedMap`]) supply a closure
/// that casts the two raw pointers back to `&K` before calling a typed
/// comparison function.
pub struct RawAvlTree<'a, C> {
    allocator: &'a dyn AllocatorVTable,
    comparator: C,
    root: Cell<*mut Node>,
    size: Cell<usize>,
    #[cfg(any(test, feature = "extra_assertions"))]
    magic: u32,
}

impl<'a, C> RawAvlTree<'a, C>
where
    C: Fn(*const u8, *const u8) -> Ordering,
{
    /// Creates a new, empty tree bound to `allocator` and `comparator`.
    pub fn new(allocator: &'a dyn AllocatorVTable, comparator: C) -> Self {
        RawAvlTree {
            allocator,
            comparator,
            root: Cell::new(core::ptr::null_mut()),
            size: Cell::new(0),
            #[cfg(any(test, feature = "extra_assertions"))]
            magic: AVL_TREE_MAGIC,
        }
    }

    fn assert_valid(&self) {
        #[cfg(any(test, feature = "extra_assertions"))]
        extra_assert_eq!(self.magic, AVL_TREE_MAGIC);
    }

    /// The allocator this tree releases and obtains node storage through.
    pub fn allocator(&self) -> &'a dyn AllocatorVTable {
        self.allocator
    }

    /// The number of entries currently in the tree.
    pub fn size(&self) -> usize {
        self.assert_valid();
        self.size.get()
    }

    fn compare(&self, a: *const u8, b: *const u8) -> Ordering {
        (self.comparator)(a, b)
    }

    fn allocate_node(&self, key: *mut u8, value: *mut u8) -> Option<NonNull<Node>> {
        let raw = self.allocator.allocate(size_of::<Node>())?;
        let node: *mut Node = raw.as_ptr().cast();
        unsafe {
            (*node).parent = Cell::new(core::ptr::null_mut());
            (*node).left = Cell::new(core::ptr::null_mut());
            (*node).right = Cell::new(core::ptr::null_mut());
            (*node).height = Cell::new(1);
            (*node).key = Cell::new(key);
            (*node).value = Cell::new(value);
            Some(NonNull::new_unchecked(node))
        }
    }

    fn set_child(&self, parent: *mut Node, was_left: bool, child: *mut Node) {
        if parent.is_null() {
            self.root.set(child);
        } else {
            unsafe {
                if was_left {
                    (*parent).left.set(child);
                } else {
                    (*parent).right.set(child);
                }
            }
        }
        if !child.is_null() {
            unsafe { (*child).parent.set(parent) };
        }
    }

    fn rotate_left(&self, x: *mut Node) -> *mut Node {
        unsafe {
            let y = (*x).right.get();
            debug_assert!(!y.is_null());
            let t2 = (*y).left.get();
            let parent = (*x).parent.get();
            let x_was_left = !parent.is_null() && (*parent).left.get() == x;

            (*y).left.set(x);
            (*x).parent.set(y);
            (*x).right.set(t2);
            if !t2.is_null() {
                (*t2).parent.set(x);
            }

            (*y).parent.set(parent);
            if parent.is_null() {
                self.root.set(y);
            } else if x_was_left {
                (*parent).left.set(y);
            } else {
                (*parent).right.set(y);
            }

            recompute_height(x);
            recompute_height(y);
            y
        }
    }

    fn rotate_right(&self, x: *mut Node) -> *mut Node {
        unsafe {
            let y = (*x).left.get();
            debug_assert!(!y.is_null());
            let t2 = (*y).right.get();
            let parent = (*x).parent.get();
            let x_was_left = !parent.is_null() && (*parent).left.get() == x;

            (*y).right.set(x);
            (*x).parent.set(y);
            (*x).left.set(t2);
            if !t2.is_null() {
                (*t2).parent.set(x);
            }

            (*y).parent.set(parent);
            if parent.is_null() {
                self.root.set(y);
            } else if x_was_left {
                (*parent).left.set(y);
            } else {
                (*parent).right.set(y);
            }

            recompute_height(x);
            recompute_height(y);
            y
        }
    }

    /// Rebalances `node` if needed and returns whatever now occupies the
    /// slot it used to (itself, or a rotation's new subtree root).
    fn rebalance_one(&self, node: *mut Node) -> *mut Node {
        recompute_height(node);
        let balance = balance_of(node);
        unsafe {
            if balance > 1 {
                let left = (*node).left.get();
                if balance_of(left) < 0 {
                    self.rotate_left(left);
                }
                self.rotate_right(node)
            } else if balance < -1 {
                let right = (*node).right.get();
                if balance_of(right) > 0 {
                    self.rotate_right(right);
                }
                self.rotate_left(node)
            } else {
                node
            }
        }
    }

    /// Walks from `from` up to the root, rebalancing every ancestor. A
    /// single rotation always suffices after an insertion, but an erase can
    /// need one at every level, so both callers just run this the same way.
    fn rebalance_to_root(&self, from: *mut Node) {
        let mut node = from;
        while !node.is_null() {
            let replacement = self.rebalance_one(node);
            node = unsafe { (*replacement).parent.get() };
        }
    }

    /// Finds the node matching `key`, or the last node visited along the
    /// path (used by `insert` to know where to attach a new node).
    fn search(&self, key: *const u8) -> Result<*mut Node, *mut Node> {
        let mut node = self.root.get();
        let mut parent = core::ptr::null_mut();
        while !node.is_null() {
            parent = node;
            let node_key = unsafe { (*node).key.get() };
            match self.compare(key, node_key) {
                Ordering::Equal => return Ok(node),
                Ordering::Less => node = unsafe { (*node).left.get() },
                Ordering::Greater => node = unsafe { (*node).right.get() },
            }
        }
        Err(parent)
    }

    /// Inserts `key`/`value`, or returns the existing node if `key` is
    /// already present (its key/value pointers are left untouched - callers
    /// needing replace-on-conflict semantics update them explicitly).
    ///
    /// Returns `None` only when a new node was needed and the allocator
    /// could not provide one; the tree is left unchanged in that case.
    pub fn insert(&self, key: *mut u8, value: *mut u8) -> Option<InsertResult<'a>> {
        self.assert_valid();
        match self.search(key) {
            Ok(existing) => Some(InsertResult {
                cursor: Cursor {
                    node: unsafe { NonNull::new_unchecked(existing) },
                    _marker: PhantomData,
                },
                already_existed: true,
            }),
            Err(parent) => {
                let new_node = self.allocate_node(key, value)?;
                if parent.is_null() {
                    self.root.set(new_node.as_ptr());
                } else {
                    let went_left = self.compare(key, unsafe { (*parent).key.get() }) == Ordering::Less;
                    self.set_child(parent, went_left, new_node.as_ptr());
                }
                self.size.set(self.size.get() + 1);
                self.rebalance_to_root(parent);
                Some(InsertResult {
                    cursor: Cursor {
                        node: new_node,
                        _marker: PhantomData,
                    },
                    already_existed: false,
                })
            }
        }
    }

    /// Finds the node matching `key`, if any.
    pub fn find(&self, key: *const u8) -> Option<Cursor<'a>> {
        self.assert_valid();
        match self.search(key) {
            Ok(node) => Some(Cursor {
                node: unsafe { NonNull::new_unchecked(node) },
                _marker: PhantomData,
            }),
            Err(_) => None,
        }
    }

    fn leftmost(&self, mut node: *mut Node) -> *mut Node {
        unsafe {
            while !(*node).left.get().is_null() {
                node = (*node).left.get();
            }
        }
        node
    }

    fn rightmost(&self, mut node: *mut Node) -> *mut Node {
        unsafe {
            while !(*node).right.get().is_null() {
                node = (*node).right.get();
            }
        }
        node
    }

    /// The in-order first (smallest-keyed) entry.
    pub fn first(&self) -> Option<Cursor<'a>> {
        self.assert_valid();
        let root = self.root.get();
        if root.is_null() {
            return None;
        }
        let node = self.leftmost(root);
        Some(Cursor {
            node: unsafe { NonNull::new_unchecked(node) },
            _marker: PhantomData,
        })
    }

    /// The in-order last (largest-keyed) entry.
    pub fn last(&self) -> Option<Cursor<'a>> {
        self.assert_valid();
        let root = self.root.get();
        if root.is_null() {
            return None;
        }
        let node = self.rightmost(root);
        Some(Cursor {
            node: unsafe { NonNull::new_unchecked(node) },
            _marker: PhantomData,
        })
    }

    /// The in-order successor of `cursor`, if any.
    pub fn next(&self, cursor: Cursor<'a>) -> Option<Cursor<'a>> {
        self.assert_valid();
        let mut node = cursor.node.as_ptr();
        unsafe {
            if !(*node).right.get().is_null() {
                let n = self.leftmost((*node).right.get());
                return Some(Cursor {
                    node: NonNull::new_unchecked(n),
                    _marker: PhantomData,
                });
            }
            let mut parent = (*node).parent.get();
            while !parent.is_null() && (*parent).right.get() == node {
                node = parent;
                parent = (*parent).parent.get();
            }
            if parent.is_null() {
                None
            } else {
                Some(Cursor {
                    node: NonNull::new_unchecked(parent),
                    _marker: PhantomData,
                })
            }
        }
    }

    /// The in-order predecessor of `cursor`, if any.
    pub fn prev(&self, cursor: Cursor<'a>) -> Option<Cursor<'a>> {
        self.assert_valid();
        let mut node = cursor.node.as_ptr();
        unsafe {
            if !(*node).left.get().is_null() {
                let n = self.rightmost((*node).left.get());
                return Some(Cursor {
                    node: NonNull::new_unchecked(n),
                    _marker: PhantomData,
                });
            }
            let mut parent = (*node).parent.get();
            while !parent.is_null() && (*parent).left.get() == node {
                node = parent;
                parent = (*parent).parent.get();
            }
            if parent.is_null() {
                None
            } else {
                Some(Cursor {
                    node: NonNull::new_unchecked(parent),
                    _marker: PhantomData,
                })
            }
        }
    }

    /// Removes the node matching `key`, returning the key/value pointers it
    /// held so the caller (which owns whatever those point to) can release
    /// them. Returns `None`, leaving the tree unchanged, if `key` is absent.
    pub fn erase(&self, key: *const u8) -> Option<(*mut u8, *mut u8)> {
        self.assert_valid();
        let node = match self.search(key) {
            Ok(node) => node,
            Err(_) => return None,
        };

        let removed_key = unsafe { (*node).key.get() };
        let removed_value = unsafe { (*node).value.get() };

        unsafe {
            let to_splice;
            if !(*node).left.get().is_null() && !(*node).right.get().is_null() {
                // Two children: the in-order successor (leftmost of the
                // right subtree) has no left child, so splicing it out is
                // always the one-or-zero-child case below. Its key/value
                // move into `node`; the successor's own node is what gets
                // physically freed.
                let successor = self.leftmost((*node).right.get());
                (*node).key.set((*successor).key.get());
                (*node).value.set((*successor).value.get());
                to_splice = successor;
            } else {
                to_splice = node;
            }

            let child = if !(*to_splice).left.get().is_null() {
                (*to_splice).left.get()
            } else {
                (*to_splice).right.get()
            };
            let parent = (*to_splice).parent.get();
            let was_left = !parent.is_null() && (*parent).left.get() == to_splice;
            self.set_child(parent, was_left, child);

            self.allocator.release(NonNull::new_unchecked(to_splice.cast()));
            self.size.set(self.size.get() - 1);
            self.rebalance_to_root(parent);
        }

        Some((removed_key, removed_value))
    }

    /// Releases every node's storage, leaving the tree empty. Does not
    /// touch whatever the key/value pointers refer to - callers that own
    /// that memory must release it first (while cursors are still valid),
    /// typically by walking `first`/`next` before calling `clear`.
    pub fn clear(&self) {
        self.assert_valid();
        self.clear_subtree(self.root.get());
        self.root.set(core::ptr::null_mut());
        self.size.set(0);
    }

    fn clear_subtree(&self, node: *mut Node) {
        if node.is_null() {
            return;
        }
        unsafe {
            self.clear_subtree((*node).left.get());
            self.clear_subtree((*node).right.get());
            self.allocator.release(NonNull::new_unchecked(node.cast()));
        }
    }
}

impl<'a, C> Drop for RawAvlTree<'a, C> {
    fn drop(&mut self) {
        #[cfg(any(test, feature = "extra_assertions"))]
        {
            self.magic = 0;
        }
        self.clear_subtree_for_drop(self.root.get());
    }
}

impl<'a, C> RawAvlTree<'a, C> {
    fn clear_subtree_for_drop(&self, node: *mut Node) {
        if node.is_null() {
            return;
        }
        unsafe {
            self.clear_subtree_for_drop((*node).left.get());
            self.clear_subtree_for_drop((*node).right.get());
            self.allocator.release(NonNull::new_unchecked(node.cast()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use region_alloc::HeapAllocator;
    use std::boxed::Box;

    fn leak_i32(n: i32) -> *mut u8 {
        Box::into_raw(Box::new(n)).cast()
    }

    unsafe fn read_i32(ptr: *const u8) -> i32 {
        unsafe { *ptr.cast::<i32>() }
    }

    fn cmp_i32(a: *const u8, b: *const u8) -> Ordering {
        unsafe { read_i32(a).cmp(&read_i32(b)) }
    }

    #[test]
    fn ordering_matches_insertion_sequence() {
        let heap = HeapAllocator;
        let tree = RawAvlTree::new(&heap, cmp_i32);
        for n in [4, 1, -2, 2, 3, -5, -4, -3, -1, 0, 5] {
            let ptr = leak_i32(n);
            tree.insert(ptr, core::ptr::null_mut())
                .expect("allocation should succeed");
        }
        assert_eq!(tree.size(), 11);

        let mut seen = std::vec::Vec::new();
        let mut cursor = tree.first();
        while let Some(c) = cursor {
            seen.push(unsafe { read_i32(c.key_ptr()) });
            cursor = tree.next(c);
        }
        assert_eq!(seen, std::vec![-5, -4, -3, -2, -1, 0, 1, 2, 3, 4, 5]);

        let mut rev = std::vec::Vec::new();
        let mut cursor = tree.last();
        while let Some(c) = cursor {
            rev.push(unsafe { read_i32(c.key_ptr()) });
            cursor = tree.prev(c);
        }
        seen.reverse();
        assert_eq!(rev, seen);
    }

    #[test]
    fn erase_with_two_children_promotes_successor() {
        let heap = HeapAllocator;
        let tree = RawAvlTree::new(&heap, cmp_i32);
        for n in [10, 5, 15, 3, 7, 12, 20] {
            tree.insert(leak_i32(n), core::ptr::null_mut()).unwrap();
        }
        let (k, _v) = tree.erase(&10i32 as *const i32 as *const u8).unwrap();
        let _ = unsafe { Box::from_raw(k.cast::<i32>()) };

        let mut seen = std::vec::Vec::new();
        let mut cursor = tree.first();
        while let Some(c) = cursor {
            seen.push(unsafe { read_i32(c.key_ptr()) });
            cursor = tree.next(c);
        }
        assert_eq!(seen, std::vec![3, 5, 7, 12, 15, 20]);
        assert_eq!(tree.size(), 6);

        for ptr in [5, 15, 3, 7, 12, 20] {
            let _ = ptr;
        }
    }

    #[test]
    fn find_reports_absent_keys() {
        let heap = HeapAllocator;
        let tree = RawAvlTree::new(&heap, cmp_i32);
        tree.insert(leak_i32(1), core::ptr::null_mut()).unwrap();
        assert!(tree.find(&1i32 as *const i32 as *const u8).is_some());
        assert!(tree.find(&2i32 as *const i32 as *const u8).is_none());
    }
}
