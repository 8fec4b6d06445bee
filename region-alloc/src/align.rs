//! Address alignment helpers shared by the allocator vtable and the
//! fixed-region allocator.
//!
//! `alignment` is always a power of two; callers are expected to uphold that
//! invariant, same as the rest of this crate's contracts.

/// Rounds `addr` up to the smallest multiple of `alignment` that is `>= addr`.
///
/// An already-aligned address is returned unchanged, so `alignment == 1` is a
/// no-op for every `addr`.
#[inline]
pub fn align_up(addr: usize, alignment: usize) -> usize {
    extra_assert!(alignment.is_power_of_two());
    let mask = alignment - 1;
    (addr + mask) & !mask
}

/// Rounds `addr` down to the largest multiple of `alignment` that is `<= addr`.
#[inline]
pub fn align_down(addr: usize, alignment: usize) -> usize {
    extra_assert!(alignment.is_power_of_two());
    addr & !(alignment - 1)
}

/// `true` if `addr` is already a multiple of `alignment`.
#[inline]
pub fn is_aligned(addr: usize, alignment: usize) -> bool {
    align_down(addr, alignment) == addr
}

/// Ceiling division, as used to translate a byte count into a number of
/// fixed-size slots.
#[inline]
pub fn div_ceil(dividend: usize, divisor: usize) -> usize {
    (dividend + divisor - 1) / divisor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_is_a_no_op_when_already_aligned() {
        assert_eq!(align_up(64, 1), 64);
        assert_eq!(align_up(64, 16), 64);
        assert_eq!(align_up(0, 8), 0);
    }

    #[test]
    fn align_up_rounds_to_the_next_multiple() {
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(17, 16), 32);
        assert_eq!(align_up(63, 8), 64);
    }

    #[test]
    fn align_down_rounds_to_the_previous_multiple() {
        assert_eq!(align_down(64, 16), 64);
        assert_eq!(align_down(65, 16), 64);
        assert_eq!(align_down(1, 16), 0);
    }

    #[test]
    fn div_ceil_rounds_up() {
        assert_eq!(div_ceil(0, 8), 0);
        assert_eq!(div_ceil(1, 8), 1);
        assert_eq!(div_ceil(8, 8), 1);
        assert_eq!(div_ceil(9, 8), 2);
    }
}
