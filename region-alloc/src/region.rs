//! The fixed-region allocator (component C3): a `malloc`/`realloc`/`free`
//! triad over a single, caller-supplied byte buffer. No syscalls, no growth,
//! no best-fit or slab tricks - a linear first-fit scan over an intrusive,
//! ascending-address, doubly-linked list of the blocks that are currently
//! live.
//!
//! Every block, live or not-yet-allocated, is measured in multiples of one
//! `Header`-sized, `Header`-aligned slot. A `Header` prefixes every live
//! block and also serves, zeroed out, as the list's sentinel at the very
//! start of the region - the same trick `g_pool_begin[0]` plays in the
//! library this crate is modeled on.

use crate::const_init::ConstInit;
use crate::vtable::AllocatorVTable;
use core::cell::Cell;
use core::mem::size_of;
use core::ptr::NonNull;

#[repr(C)]
struct Header {
    next: Cell<*mut Header>,
    prev: Cell<*mut Header>,
    payload_bytes: Cell<usize>,
}

const SLOT_SIZE: usize = size_of::<Header>();
const SLOT_ALIGN: usize = core::mem::align_of::<Header>();

/// The number of slots (one header's worth, plus however many data slots
/// `payload_bytes` needs) a block of `payload_bytes` occupies.
///
/// `payload_bytes` comes straight from the public, `usize`-typed
/// `malloc`/`realloc` entry points, so - unlike [`crate::align::div_ceil`],
/// which assumes small, caller-controlled, attacker-free divisors - this
/// cannot assume the addition stays in range. `None` means "no real pool
/// could ever have this many slots free," which every caller below treats as
/// an ordinary allocation failure rather than letting the arithmetic wrap
/// into a deceptively small slot count.
fn slots_needed(payload_bytes: usize) -> Option<usize> {
    let data_slots = payload_bytes.checked_add(SLOT_SIZE - 1)? / SLOT_SIZE;
    1usize.checked_add(data_slots)
}

unsafe fn data_begin(node: *mut Header) -> *mut u8 {
    unsafe { node.add(1).cast() }
}

unsafe fn data_end(node: *mut Header) -> *mut u8 {
    unsafe {
        // `node`'s payload_bytes was already accepted by a prior
        // `slots_needed` call when this block was allocated or resized, so
        // recomputing it here can't overflow.
        let slots = slots_needed((*node).payload_bytes.get())
            .expect("a live node's payload_bytes was already validated");
        node.cast::<u8>().add(slots * SLOT_SIZE)
    }
}

unsafe fn associated_node(data: NonNull<u8>) -> *mut Header {
    unsafe { data.as_ptr().cast::<Header>().sub(1) }
}

/// Status returned by [`RegionAllocator::free_ext`], mirroring the five
/// outcomes a fixed-region `free` can distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeStatus {
    /// The block was found and released.
    Ok,
    /// `ptr` was `None`; a no-op, same as freeing a null pointer.
    OkNull,
    /// `ptr` falls inside the pool's address range, but is not (or is no
    /// longer) the address of a live allocation.
    ErrNotAllocated,
    /// `ptr` falls outside the pool's address range entirely.
    ErrOutsideOfPool,
    /// The allocator has not been initialized, or was given a region too
    /// small to hold even the sentinel slot.
    ErrUninitialised,
}

/// A first-fit allocator over a single, fixed-size region of memory supplied
/// by the caller.
///
/// The allocator is `Sync` so it can live in a `static`, but it performs no
/// locking of its own: per the single-threaded, non-reentrant contract this
/// crate documents, callers sharing one instance across threads must
/// synchronize access themselves.
pub struct RegionAllocator {
    pool_begin: Cell<*mut Header>,
    pool_end: Cell<*mut u8>,
}

unsafe impl Sync for RegionAllocator {}

impl ConstInit for RegionAllocator {
    const INIT: RegionAllocator = RegionAllocator {
        pool_begin: Cell::new(ConstInit::INIT),
        pool_end: Cell::new(ConstInit::INIT),
    };
}

impl Default for RegionAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionAllocator {
    /// An allocator in the uninitialized state; every operation other than
    /// `init` and the introspection queries is a no-op or reports failure
    /// until `init` is called.
    pub const fn new() -> Self {
        Self::INIT
    }

    /// `true` once `init` has successfully carved out a usable region.
    pub fn is_initialized(&self) -> bool {
        !self.pool_begin.get().is_null() && !self.pool_end.get().is_null()
    }

    /// Carves a pool for this allocator out of `region`. The region's start
    /// and end are rounded inward to the allocator's slot alignment; if the
    /// rounded region cannot hold even the sentinel slot, the allocator
    /// becomes (or remains) uninitialized.
    ///
    /// Calling `init` again - on a fresh region, or the same one - is
    /// permitted and simply discards whatever the allocator had tracked
    /// before.
    ///
    /// # Safety
    ///
    /// `region` must be valid for reads and writes for as long as this
    /// allocator is used afterwards, and must not be accessed through any
    /// other alias while this allocator is live.
    pub unsafe fn init(&self, region: *mut u8, len: usize) {
        let begin_addr = crate::align::align_up(region as usize, SLOT_ALIGN);
        let end_addr = crate::align::align_down(region as usize + len, SLOT_ALIGN);

        if end_addr > begin_addr && end_addr - begin_addr >= SLOT_SIZE {
            let begin = begin_addr as *mut Header;
            unsafe {
                (*begin).next = Cell::new(core::ptr::null_mut());
                (*begin).prev = Cell::new(core::ptr::null_mut());
                (*begin).payload_bytes = Cell::new(0);
            }
            self.pool_begin.set(begin);
            self.pool_end.set(end_addr as *mut u8);
        } else {
            self.pool_begin.set(core::ptr::null_mut());
            self.pool_end.set(core::ptr::null_mut());
        }
    }

    fn node_list_head(&self) -> *mut Header {
        debug_assert!(self.is_initialized());
        unsafe { (*self.pool_begin.get()).next.get() }
    }

    fn is_existing_memory_node(&self, node: *mut Header) -> bool {
        let mut cursor = self.node_list_head();
        while !cursor.is_null() {
            if cursor == node {
                return true;
            }
            cursor = unsafe { (*cursor).next.get() };
        }
        false
    }

    /// Number of whole slots available between the end of `node`'s current
    /// footprint and the start of the next node (or the end of the pool).
    fn free_space_after(&self, node: *mut Header) -> usize {
        unsafe {
            let begin = data_end(node);
            let next = (*node).next.get();
            let end = if next.is_null() {
                self.pool_end.get()
            } else {
                next.cast::<u8>()
            };
            if (end as usize) < (begin as usize) {
                0
            } else {
                (end as usize - begin as usize) / SLOT_SIZE
            }
        }
    }

    /// Allocates `size` bytes, scanning the live-block list in ascending
    /// address order and placing the new block in the first gap that fits
    /// (including the gap right after the sentinel).
    ///
    /// `size == 0` returns a unique, non-null pointer that is safe to pass
    /// to `free`/`reallocate` but must not be read from or written to.
    ///
    /// A `size` so large that it could never fit in any real pool (the slot
    /// count it would need overflows `usize`) is rejected the same as any
    /// other size a pool this small can't satisfy.
    pub fn malloc(&self, size: usize) -> Option<NonNull<u8>> {
        if !self.is_initialized() {
            return None;
        }
        let needed = slots_needed(size)?;

        let mut node = self.pool_begin.get();
        loop {
            let free_slots = self.free_space_after(node);
            if free_slots >= needed {
                unsafe {
                    let new_node: *mut Header = data_end(node).cast();
                    let next = (*node).next.get();
                    (*new_node).next = Cell::new(next);
                    (*new_node).prev = Cell::new(node);
                    (*new_node).payload_bytes = Cell::new(size);

                    (*node).next.set(new_node);
                    if !next.is_null() {
                        (*next).prev.set(new_node);
                    }

                    return Some(NonNull::new_unchecked(data_begin(new_node)));
                }
            }
            node = unsafe { (*node).next.get() };
            if node.is_null() {
                return None;
            }
        }
    }

    /// Resizes a block previously returned by `malloc`/`reallocate` on this
    /// allocator, preserving its contents up to `min(old_size, new_size)`.
    ///
    /// Shrinking, and growing into the gap immediately following the block,
    /// happen in place in O(1) without moving any data. Otherwise a fresh
    /// block is allocated, the contents are copied, and the old block is
    /// freed; if that allocation fails, the original block is left
    /// untouched and `None` is returned.
    ///
    /// A `None` pointer behaves like `malloc(new_size)`. A `Some` pointer
    /// that is not a block this allocator currently considers live - a
    /// forged address, or one already freed - also returns `None`, leaving
    /// the rest of the allocator's state untouched.
    pub fn realloc(&self, ptr: Option<NonNull<u8>>, new_size: usize) -> Option<NonNull<u8>> {
        let Some(ptr) = ptr else {
            return self.malloc(new_size);
        };
        if !self.is_initialized() {
            return None;
        }

        let node = unsafe { associated_node(ptr) };
        if !self.is_existing_memory_node(node) {
            return None;
        }

        let old_size = unsafe { (*node).payload_bytes.get() };
        if new_size <= old_size {
            unsafe { (*node).payload_bytes.set(new_size) };
            return Some(ptr);
        }

        // `old_size` came from a block this allocator already holds live, so
        // a prior `slots_needed` call already accepted it; `new_size` is
        // caller-supplied and may be large enough that the slot count it
        // would need overflows `usize` - treated the same as "doesn't fit
        // in the gap," falling through to the allocate-and-copy path below
        // (which itself fails the same way `malloc` would for this size).
        let old_slots =
            slots_needed(old_size).expect("old_size came from an already-validated live block");
        if let Some(new_slots) = slots_needed(new_size) {
            if let Some(extra_slots_needed) = new_slots.checked_sub(old_slots) {
                if extra_slots_needed <= self.free_space_after(node) {
                    unsafe { (*node).payload_bytes.set(new_size) };
                    return Some(ptr);
                }
            }
        }

        let new_ptr = self.malloc(new_size)?;
        unsafe {
            core::ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old_size);
        }
        let status = self.free_ext(Some(ptr));
        debug_assert_eq!(status, FreeStatus::Ok);
        Some(new_ptr)
    }

    /// Releases a block previously returned by `malloc`/`reallocate`,
    /// reporting exactly which of the five outcomes occurred.
    pub fn free_ext(&self, ptr: Option<NonNull<u8>>) -> FreeStatus {
        if !self.is_initialized() {
            return FreeStatus::ErrUninitialised;
        }
        let Some(ptr) = ptr else {
            return FreeStatus::OkNull;
        };

        let addr = ptr.as_ptr() as usize;
        // The pool's address range runs from the sentinel onward, not from
        // whichever node currently happens to be first in the live list -
        // that list shrinks and grows as blocks come and go, but the pool's
        // bounds don't. Bounding by the live head would wrongly blame a
        // double-free of a low-address block on "outside the pool" whenever
        // a higher-address block is still live.
        let lower_bound = self.pool_begin.get() as usize;
        if addr < lower_bound || addr >= self.pool_end.get() as usize {
            return FreeStatus::ErrOutsideOfPool;
        }

        let node = unsafe { associated_node(ptr) };
        if !self.is_existing_memory_node(node) {
            return FreeStatus::ErrNotAllocated;
        }

        unsafe {
            let prev = (*node).prev.get();
            let next = (*node).next.get();
            (*prev).next.set(next);
            if !next.is_null() {
                (*next).prev.set(prev);
            }
        }
        FreeStatus::Ok
    }

    /// Releases a block, discarding the detailed status. Freeing `None`, or
    /// a pointer that is no longer (or never was) live, is a silent no-op.
    pub fn free(&self, ptr: Option<NonNull<u8>>) {
        let _ = self.free_ext(ptr);
    }

    /// The number of currently-live blocks.
    pub fn allocations(&self) -> usize {
        if !self.is_initialized() {
            return 0;
        }
        let mut count = 0;
        let mut cursor = self.node_list_head();
        while !cursor.is_null() {
            count += 1;
            cursor = unsafe { (*cursor).next.get() };
        }
        count
    }

    /// The sum of every live block's requested size, in bytes - not
    /// counting header/slot-rounding overhead.
    pub fn allocated_bytes(&self) -> usize {
        if !self.is_initialized() {
            return 0;
        }
        let mut total = 0;
        let mut cursor = self.node_list_head();
        while !cursor.is_null() {
            total += unsafe { (*cursor).payload_bytes.get() };
            cursor = unsafe { (*cursor).next.get() };
        }
        total
    }

    /// The number of additional payload bytes that could be allocated right
    /// now, accounting for per-block header overhead and slot rounding.
    ///
    /// Computed from the actual span of the region, not `size_of::<*const
    /// _>()` - the formula the library this crate is modeled on actually
    /// uses, which returns nonsense for any pool larger than a few words.
    pub fn free_bytes(&self) -> usize {
        if !self.is_initialized() {
            return 0;
        }
        let span_bytes = self.pool_end.get() as usize - self.pool_begin.get() as usize;
        let mut used_slots = 1; // the sentinel itself.
        let mut cursor = self.node_list_head();
        while !cursor.is_null() {
            // Every live node's payload_bytes was already validated by
            // `slots_needed` when it was allocated or resized.
            used_slots += slots_needed(unsafe { (*cursor).payload_bytes.get() })
                .expect("a live node's payload_bytes was already validated");
            cursor = unsafe { (*cursor).next.get() };
        }
        span_bytes.saturating_sub(used_slots * SLOT_SIZE)
    }
}

unsafe impl AllocatorVTable for RegionAllocator {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        self.malloc(size)
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        _old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        self.realloc(Some(ptr), new_size)
    }

    unsafe fn release(&self, ptr: NonNull<u8>) {
        let status = self.free_ext(Some(ptr));
        debug_assert_eq!(status, FreeStatus::Ok);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::boxed::Box;
    use std::vec;

    fn new_region(len: usize) -> (RegionAllocator, *mut u8) {
        let buf: &'static mut [u8] = Box::leak(vec![0u8; len].into_boxed_slice());
        let ptr = buf.as_mut_ptr();
        let alloc = RegionAllocator::new();
        unsafe { alloc.init(ptr, len) };
        (alloc, ptr)
    }

    #[test]
    fn pool_lifecycle_with_600_byte_buffer() {
        let (alloc, _buf) = new_region(600);
        assert!(alloc.is_initialized());
        assert_eq!(alloc.allocations(), 0);
        assert_eq!(alloc.allocated_bytes(), 0);

        let a = alloc.malloc(20).expect("first allocation should succeed");
        let b = alloc.malloc(20).expect("second allocation should succeed");
        assert_ne!(a, b);
        assert_eq!(alloc.allocations(), 2);
        assert_eq!(alloc.allocated_bytes(), 40);

        assert_eq!(alloc.free_ext(Some(a)), FreeStatus::Ok);
        assert_eq!(alloc.allocations(), 1);
        assert_eq!(alloc.free_ext(Some(a)), FreeStatus::ErrNotAllocated);

        assert_eq!(alloc.free_ext(None), FreeStatus::OkNull);
    }

    #[test]
    fn freeing_a_pointer_truly_outside_the_pool_is_distinguished_from_a_stale_one() {
        let (alloc, buf) = new_region(600);
        let a = alloc.malloc(20).unwrap();
        let _b = alloc.malloc(20).unwrap();

        // Genuinely outside the region: must be reported as such regardless
        // of which blocks are currently live. Never dereferenced, so built
        // from a plain address rather than in-bounds pointer arithmetic.
        let outside_addr = buf as usize + 10_000;
        let outside = unsafe { NonNull::new_unchecked(outside_addr as *mut u8) };
        assert_eq!(alloc.free_ext(Some(outside)), FreeStatus::ErrOutsideOfPool);

        // A low-address, already-freed block, with a higher-address block
        // still live: still inside the pool, just not currently allocated.
        assert_eq!(alloc.free_ext(Some(a)), FreeStatus::Ok);
        assert_eq!(alloc.free_ext(Some(a)), FreeStatus::ErrNotAllocated);
    }

    #[test]
    fn saturates_with_repeated_small_allocations() {
        let (alloc, _buf) = new_region(4 * SLOT_SIZE + size_of::<Header>());
        let mut count = 0;
        while alloc.malloc(4).is_some() {
            count += 1;
        }
        assert!(count > 0);
        assert!(alloc.malloc(4).is_none());
    }

    #[test]
    fn uninitialised_allocator_rejects_everything() {
        let alloc = RegionAllocator::new();
        assert!(!alloc.is_initialized());
        assert!(alloc.malloc(8).is_none());
        assert_eq!(alloc.free_ext(None), FreeStatus::OkNull);
        assert_eq!(alloc.allocated_bytes(), 0);
    }

    #[test]
    fn realloc_rejects_a_pointer_that_is_not_currently_live() {
        let (alloc, _buf) = new_region(4096);
        let a = alloc.malloc(8).unwrap();
        assert_eq!(alloc.free_ext(Some(a)), FreeStatus::Ok);
        assert!(alloc.realloc(Some(a), 16).is_none());
        assert_eq!(alloc.allocations(), 0);
    }

    #[test]
    fn malloc_rejects_a_size_whose_slot_count_would_overflow() {
        let (alloc, _buf) = new_region(4096);
        assert!(alloc.malloc(usize::MAX - 5).is_none());
        assert_eq!(alloc.allocations(), 0);
    }

    #[test]
    fn realloc_rejects_a_new_size_whose_slot_count_would_overflow() {
        let (alloc, _buf) = new_region(4096);
        let a = alloc.malloc(8).unwrap();
        assert!(alloc.realloc(Some(a), usize::MAX - 5).is_none());
        // the original block is untouched: still live at its old size.
        assert_eq!(alloc.allocations(), 1);
    }

    #[test]
    fn realloc_grows_in_place_when_room_allows() {
        let (alloc, _buf) = new_region(4096);
        let a = alloc.malloc(8).unwrap();
        unsafe { a.as_ptr().write_bytes(0x42, 8) };
        let grown = alloc.realloc(Some(a), 32).expect("grow should succeed");
        assert_eq!(unsafe { *grown.as_ptr() }, 0x42);
    }

    #[test]
    fn realloc_shrink_then_grow_stays_valid() {
        let (alloc, _buf) = new_region(4096);
        let a = alloc.malloc(64).unwrap();
        let shrunk = alloc.realloc(Some(a), 8).unwrap();
        assert_eq!(shrunk, a);
        let grown = alloc.realloc(Some(shrunk), 32).unwrap();
        assert_eq!(grown, a);
    }

    #[test]
    fn free_bytes_uses_the_region_span_formula() {
        let (alloc, _buf) = new_region(600);
        let before = alloc.free_bytes();
        let _a = alloc.malloc(20).unwrap();
        let after = alloc.free_bytes();
        assert!(after < before);
        assert_eq!(before - after, slots_needed(20).unwrap() * SLOT_SIZE);
    }

    // Random alloc/free churn against a region large enough that it should
    // never saturate; `allocations`/`allocated_bytes` must track the live
    // set exactly regardless of the order frees happen in.
    quickcheck::quickcheck! {
        fn allocations_and_allocated_bytes_track_the_live_set(seed: u64) -> bool {
            use rand::{Rng, SeedableRng};

            let (alloc, _buf) = new_region(1 << 16);
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            let mut live: std::vec::Vec<(NonNull<u8>, usize)> = std::vec::Vec::new();

            for _ in 0..500 {
                if !live.is_empty() && rng.gen_range(0..3) == 0 {
                    let i = rng.gen_range(0..live.len());
                    let (ptr, _size) = live.swap_remove(i);
                    if alloc.free_ext(Some(ptr)) != FreeStatus::Ok {
                        return false;
                    }
                } else {
                    let size = rng.gen_range(1..64);
                    if let Some(ptr) = alloc.malloc(size) {
                        live.push((ptr, size));
                    }
                }

                if alloc.allocations() != live.len() {
                    return false;
                }
                let expected_bytes: usize = live.iter().map(|&(_, size)| size).sum();
                if alloc.allocated_bytes() != expected_bytes {
                    return false;
                }
            }
            true
        }
    }
}
