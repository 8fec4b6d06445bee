//! The heap-backed well-known [`AllocatorVTable`] instance: delegates to the
//! process's global allocator via the `alloc` crate, the same way a plain
//! `malloc`/`realloc`/`free` would.
//!
//! `release` takes only a pointer, matching the rest of this crate's vtable
//! contract, so every allocation is prefixed with a small header recording
//! the size it was made with - the same trick the global allocator itself
//! plays on most platforms.

use crate::vtable::AllocatorVTable;
use alloc::alloc::{alloc, dealloc, realloc, Layout};
use core::mem::size_of;
use core::ptr::NonNull;

#[repr(C)]
struct Header {
    size: usize,
}

// `max_align_t`-ish: comfortably covers any key/value/node type a container
// is instantiated with.
const ALIGN: usize = 16;

/// `None` means `size` is large enough that no layout could ever describe
/// it - either `header + size` overflows `usize`, or the total would exceed
/// `isize::MAX`. Callers treat that the same as any other allocation failure.
fn header_layout(size: usize) -> Option<Layout> {
    let header = crate::align::align_up(size_of::<Header>(), ALIGN);
    let total = header.checked_add(size)?;
    Layout::from_size_align(total, ALIGN).ok()
}

unsafe fn header_of(ptr: NonNull<u8>) -> *mut Header {
    let header = crate::align::align_up(size_of::<Header>(), ALIGN);
    ptr.as_ptr().sub(header).cast()
}

unsafe fn data_of(header_ptr: *mut u8) -> NonNull<u8> {
    let header = crate::align::align_up(size_of::<Header>(), ALIGN);
    NonNull::new_unchecked(header_ptr.add(header))
}

/// An [`AllocatorVTable`] that forwards to the global (heap) allocator.
///
/// This is a zero-sized unit type: every `HeapAllocator` value is
/// interchangeable, so it can be used as `&HeapAllocator` wherever a
/// `&dyn AllocatorVTable` is expected without taking up any storage.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

unsafe impl AllocatorVTable for HeapAllocator {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let layout = header_layout(size)?;
        // SAFETY: `layout` always has a non-zero size thanks to the header.
        let raw = unsafe { alloc(layout) };
        let raw = NonNull::new(raw)?;
        unsafe {
            (*raw.as_ptr().cast::<Header>()).size = size;
            Some(data_of(raw.as_ptr()))
        }
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        extra_assert_eq!(unsafe { (*header_of(ptr)).size }, old_size);
        let old_layout = header_layout(old_size)?;
        let new_layout = header_layout(new_size)?;
        let old_header = header_of(ptr).cast::<u8>();
        let raw = unsafe { realloc(old_header, old_layout, new_layout.size()) };
        let raw = NonNull::new(raw)?;
        unsafe {
            (*raw.as_ptr().cast::<Header>()).size = new_size;
            Some(data_of(raw.as_ptr()))
        }
    }

    unsafe fn release(&self, ptr: NonNull<u8>) {
        let header = header_of(ptr);
        let size = unsafe { (*header).size };
        // `size` came from a previous successful `header_layout` call at
        // allocate/reallocate time, so recomputing it here can't overflow.
        let layout =
            header_layout(size).expect("a previously-allocated size must still compute a layout");
        unsafe { dealloc(header.cast(), layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_allocate_reallocate_release() {
        let heap = HeapAllocator;
        let a = heap.allocate(12).expect("allocate");
        unsafe {
            a.as_ptr().write_bytes(0xAB, 12);
            let b = heap
                .reallocate(a, 12, 64)
                .expect("reallocate should grow in place or move");
            assert_eq!(*b.as_ptr(), 0xAB);
            heap.release(b);
        }
    }

    #[test]
    fn allocate_rejects_a_size_whose_layout_would_overflow() {
        let heap = HeapAllocator;
        assert!(heap.allocate(usize::MAX).is_none());
    }

    #[test]
    fn reallocate_rejects_a_new_size_whose_layout_would_overflow() {
        let heap = HeapAllocator;
        let a = heap.allocate(12).unwrap();
        unsafe {
            assert!(heap.reallocate(a, 12, usize::MAX).is_none());
            heap.release(a);
        }
    }

    #[test]
    fn distinct_allocations_do_not_alias() {
        let heap = HeapAllocator;
        unsafe {
            let a = heap.allocate(8).unwrap();
            let b = heap.allocate(8).unwrap();
            assert_ne!(a, b);
            heap.release(a);
            heap.release(b);
        }
    }
}
