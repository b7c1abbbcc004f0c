use super::Error;

/// An allocator of contiguous slot ranges from a fixed-size ring.
///
/// Allocation advances the head; the tail only moves when the owner calls
/// [`RingAllocator::release_to`] with a marker previously returned by
/// [`RingAllocator::marker`]. Ranges are therefore released strictly in the
/// order they were allocated, which is what fence-ordered GPU consumption
/// requires.
///
/// Counters are monotonic; positions in the ring are the counters modulo the
/// capacity. A range never straddles the end of the ring: if the tail end is
/// too short, it is skipped and counted as allocated until the tail passes it.
#[derive(Debug)]
pub struct RingAllocator {
    capacity: u64,
    allocated: u64,
    released: u64,
}

impl RingAllocator {
    pub fn new(capacity: u64) -> Self {
        assert!(capacity > 0);

        Self {
            capacity,
            allocated: 0,
            released: 0,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Slots between the tail and the head, including skipped slots.
    pub fn used(&self) -> u64 {
        self.allocated - self.released
    }

    /// Returns true if the ring has no extant allocations.
    pub fn is_empty(&self) -> bool {
        self.allocated == self.released
    }

    pub fn is_full(&self) -> bool {
        self.used() == self.capacity
    }

    /// Position of the oldest live slot.
    pub fn front(&self) -> u64 {
        self.released % self.capacity
    }

    /// Position where the next allocation would start if it fits.
    pub fn rear(&self) -> u64 {
        self.allocated % self.capacity
    }

    /// Reserves `count` contiguous slots and returns the offset of the first.
    ///
    /// A failed allocation leaves the ring unchanged.
    ///
    /// ## Errors
    ///
    /// Returns `Error::InsufficientCapacity` if the ring could never hold the
    /// request, and `Error::OutOfMemory` if it cannot right now because of
    /// extant allocations.
    pub fn allocate(&mut self, count: u64) -> Result<u64, Error> {
        if count > self.capacity {
            return Err(Error::InsufficientCapacity);
        }

        let head = self.rear();
        let tail = self.front();

        if count == 0 {
            return Ok(head);
        }

        let out_of_memory = Error::OutOfMemory {
            capacity: self.capacity,
            available: self.capacity - self.used(),
            requested: count,
        };

        let offset = match head.cmp(&tail) {
            std::cmp::Ordering::Greater => {
                if head + count <= self.capacity {
                    // [   free   |   used   |  <here> ]
                    //            ^tail      ^head
                    head
                } else if tail >= count {
                    // [  <here>  |   used   |  skip  ]
                    //            ^tail      ^head
                    self.allocated += self.capacity - head;
                    0
                } else {
                    return Err(out_of_memory);
                }
            }
            std::cmp::Ordering::Less => {
                if tail - head >= count {
                    // [   used   |  <here>  |   used  ]
                    //            ^head      ^tail
                    head
                } else {
                    return Err(out_of_memory);
                }
            }
            std::cmp::Ordering::Equal => {
                if !self.is_empty() {
                    return Err(out_of_memory);
                }

                if head + count <= self.capacity {
                    head
                } else {
                    // empty, so both ends can jump to the start
                    self.allocated += self.capacity - head;
                    self.released = self.allocated;
                    0
                }
            }
        };

        self.allocated += count;
        Ok(offset)
    }

    /// A marker for everything allocated so far. Passing it to `release_to`
    /// frees all of it.
    pub fn marker(&self) -> u64 {
        self.allocated
    }

    pub fn release_to(&mut self, marker: u64) {
        debug_assert!(marker >= self.released && marker <= self.allocated);
        self.released = marker.max(self.released);
    }

    pub fn reset(&mut self) {
        self.allocated = 0;
        self.released = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_and_wrap() {
        let mut ring = RingAllocator::new(8);

        assert_eq!(ring.allocate(9), Err(Error::InsufficientCapacity));
        assert_eq!(ring.allocate(6), Ok(0));
        let first = ring.marker();

        // 2 slots left at the end, 0 at the front
        assert!(matches!(ring.allocate(3), Err(Error::OutOfMemory { .. })));
        assert_eq!(ring.rear(), 6);
        assert_eq!(ring.allocate(2), Ok(6));
        assert!(ring.is_full());

        ring.release_to(first);
        assert_eq!(ring.front(), 6);
        assert_eq!(ring.allocate(4), Ok(0));
        assert!(matches!(ring.allocate(3), Err(Error::OutOfMemory { .. })));
        assert_eq!(ring.allocate(2), Ok(4));
    }

    #[test]
    fn skips_short_tail() {
        let mut ring = RingAllocator::new(8);

        ring.allocate(2).unwrap();
        let first = ring.marker();
        ring.allocate(4).unwrap();
        ring.release_to(first);

        // head at 6, tail at 2: 2 slots at the end and 2 at the front are
        // not enough for 3
        assert!(ring.allocate(3).is_err());
        assert_eq!(ring.used(), 4);

        ring.release_to(ring.marker());
        assert!(ring.is_empty());

        // empty but the head is at 6: the range moves to the start
        assert_eq!(ring.allocate(3), Ok(0));
        assert_eq!(ring.used(), 3);
    }

    #[test]
    fn failed_allocation_does_not_change_state() {
        let mut ring = RingAllocator::new(4);
        ring.allocate(3).unwrap();

        let (allocated, released) = (ring.allocated, ring.released);
        assert!(ring.allocate(2).is_err());
        assert_eq!((ring.allocated, ring.released), (allocated, released));
    }
}
