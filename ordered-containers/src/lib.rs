/*!

`ordered-containers` is an AVL-balanced ordered set/map pair, allocated
entirely through a [`region_alloc::AllocatorVTable`] rather than the global
allocator. Every node, and every stored key/value copy, is one allocation
obtained from whatever vtable the container was constructed with - the
process heap via [`region_alloc::HeapAllocator`], or a single fixed byte
region via [`region_alloc::RegionAllocator`].

- [`raw::RawAvlTree`] is the untyped engine: a balanced binary search tree
  over opaque `*mut u8` key/value pointers, comparing through a caller
  comparator and never copying or reading the bytes those pointers refer to.
  Most users will not touch this directly.
- [`set::OrderedSet`] wraps the engine to own copies of fixed-size keys.
- [`map::OrderedMap`] wraps the engine to own copies of fixed-size keys and
  fixed-size values, with an optional erase-destructor hook.

## Cargo features

- `extra_assertions`: enables the same expensive integrity checks
  `region-alloc`'s feature of the same name does, plus this crate's own
  AVL descriptor magic-value check.
*/

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod map;
pub mod raw;
pub mod set;

pub use map::OrderedMap;
pub use raw::{Cursor, InsertResult, RawAvlTree};
pub use set::OrderedSet;
