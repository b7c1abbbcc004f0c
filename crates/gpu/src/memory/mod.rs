//! Index math for sub-allocating GPU memory and descriptor heaps.
//!
//! Nothing in here touches the GPU. Allocators hand out offsets (in bytes or
//! descriptor slots) and rely on their owner to map those offsets onto native
//! heaps and to delay frees until the GPU is done with them.

mod buddy;
mod linear;
mod ring;

pub use buddy::{BuddyAllocation, BuddyAllocator, BuddyBlock, MultiBuddyAllocation, MultiBuddyAllocator};
pub use linear::{LinearAllocation, LinearAllocator, PageRequest};
pub use ring::RingAllocator;

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The allocator does not have enough free space to satisfy the request
    /// right now, but could once earlier allocations are freed.
    #[error("out of memory: requested {requested} of {available} available (capacity {capacity})")]
    OutOfMemory {
        capacity: u64,
        available: u64,
        requested: u64,
    },
    /// The allocator is not large enough to satisfy the request even when
    /// completely empty.
    #[error("request exceeds allocator capacity")]
    InsufficientCapacity,
}

/// Rounds `value` up to the next multiple of `alignment`. An alignment of 0
/// leaves the value unchanged.
#[must_use]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        value
    } else {
        next_multiple_of(value, alignment)
    }
}

#[must_use]
pub const fn next_multiple_of(a: u64, b: u64) -> u64 {
    match a % b {
        0 => a,
        r => a + (b - r),
    }
}

#[must_use]
pub const fn is_power_of_two(value: u64) -> bool {
    value != 0 && value & (value - 1) == 0
}

/// `ceil(log2(value))`, with `ceil_log2(0) == ceil_log2(1) == 0`.
#[must_use]
pub const fn ceil_log2(value: u64) -> u32 {
    if value <= 1 {
        0
    } else {
        64 - (value - 1).leading_zeros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(7, 0), 7);

        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(3), 2);
        assert_eq!(ceil_log2(4), 2);
        assert_eq!(ceil_log2(1025), 11);

        assert!(is_power_of_two(64));
        assert!(!is_power_of_two(0));
        assert!(!is_power_of_two(96));
    }
}
