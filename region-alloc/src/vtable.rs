//! The allocator vtable (component C2): the single seam every higher-level
//! container in this workspace allocates and frees through.
//!
//! A vtable is three operations - `allocate`, `reallocate`, `release` - bound
//! together behind a trait object, the same shape as a C struct of three
//! function pointers. Containers hold a `&dyn AllocatorVTable` rather than
//! being generic over the allocator type, so one compiled copy of a tree or
//! map works with any backing store.

use core::ptr::NonNull;

/// A pluggable allocator, addressed only through `allocate`/`reallocate`/
/// `release`. Implementations are free to back this with a heap, a fixed
/// region of bytes, or anything else that can satisfy the contract below.
///
/// # Contract
///
/// - `allocate(0)` may return either `None` or a unique, dangling-but-valid
///   pointer that is safe to pass to `release`; callers must not read or
///   write through a zero-size allocation either way.
/// - A `None` return from `allocate`/`reallocate` means the request could not
///   be satisfied; the allocator's state is left unchanged.
/// - `reallocate` must preserve the first `min(old_size, new_size)` bytes of
///   the original allocation's contents on success, and must leave the
///   original allocation intact and valid on failure.
/// - `release` invalidates `ptr`; passing a pointer that was not returned by
///   `allocate`/`reallocate` on the same allocator is undefined behavior.
///
/// # Safety
///
/// Implementors must ensure `allocate` and `reallocate` return pointers that
/// are valid for reads and writes of the requested size, and that `release`
/// does not alias memory still reachable through another live pointer.
pub unsafe trait AllocatorVTable {
    /// Requests a fresh block of at least `size` bytes. Returns `None` if the
    /// request cannot be satisfied.
    fn allocate(&self, size: usize) -> Option<NonNull<u8>>;

    /// Resizes a block previously returned by `allocate`/`reallocate` on this
    /// same allocator from `old_size` to `new_size` bytes, preserving its
    /// contents up to the smaller of the two sizes. Returns `None` (leaving
    /// `ptr` valid and unchanged) if the request cannot be satisfied.
    ///
    /// # Safety
    ///
    /// `ptr` must currently be allocated on `self` with size `old_size`.
    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>>;

    /// Releases a block previously returned by `allocate`/`reallocate` on
    /// this same allocator.
    ///
    /// # Safety
    ///
    /// `ptr` must currently be allocated on `self`; it must not be used
    /// again afterwards.
    unsafe fn release(&self, ptr: NonNull<u8>);
}

unsafe impl<A: AllocatorVTable + ?Sized> AllocatorVTable for &A {
    #[inline]
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        (**self).allocate(size)
    }

    #[inline]
    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        (**self).reallocate(ptr, old_size, new_size)
    }

    #[inline]
    unsafe fn release(&self, ptr: NonNull<u8>) {
        (**self).release(ptr)
    }
}
