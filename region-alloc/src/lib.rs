/*!

`region-alloc` is a freestanding-friendly pair of building blocks:

- [`vtable::AllocatorVTable`], a three-operation `allocate`/`reallocate`/
  `release` seam that every container in this workspace allocates through,
  with two well-known implementations: [`heap::HeapAllocator`] (the process's
  global allocator) and [`region::RegionAllocator`] (below).
- [`region::RegionAllocator`], a `malloc`/`realloc`/`free` triad over a
  single, caller-supplied byte buffer - no syscalls, no growth, a linear
  first-fit scan over an intrusive list of the blocks currently live.

Both pieces are `#![no_std]` and single-threaded: no locks are taken, and no
allocation outlives the region (or the process, for the heap backend) it came
from. Callers sharing an allocator across threads are responsible for
synchronizing access themselves.

## Cargo features

- `extra_assertions`: enables extra, expensive integrity checks (ascending
  address ordering of the live-block list, magic-value descriptor checks
  downstream in `ordered-containers`) that are too costly to run by default
  even in debug builds.
*/

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
mod extra_assert;

mod const_init;

pub mod align;
pub mod heap;
pub mod region;
pub mod vtable;

pub use heap::HeapAllocator;
pub use region::{FreeStatus, RegionAllocator};
pub use vtable::AllocatorVTable;
