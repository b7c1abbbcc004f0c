use std::collections::BTreeSet;

use super::{align_up, ceil_log2, is_power_of_two, Error};

/// A block handed out by a [`BuddyAllocator`], in units of the minimum block
/// size. This is what must be passed back to free it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BuddyBlock {
    pub unit_offset: u64,
    pub order: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuddyAllocation {
    pub block: BuddyBlock,
    /// Byte offset of the usable memory, already aligned.
    pub offset: u64,
}

/// Power-of-two buddy allocator over a single block of `max_block_size` bytes.
///
/// Blocks are split on allocation and merged with their buddy on free. All
/// sizes are rounded up to `min_block_size * 2^order`.
#[derive(Debug)]
pub struct BuddyAllocator {
    min_block_size: u64,
    max_block_size: u64,
    max_order: u32,
    free_blocks: Vec<BTreeSet<u64>>,
    allocated: u64,
}

impl BuddyAllocator {
    pub fn new(min_block_size: u64, max_block_size: u64) -> Self {
        assert!(min_block_size > 0);
        assert_eq!(max_block_size % min_block_size, 0);
        assert!(is_power_of_two(max_block_size / min_block_size));

        let max_order = ceil_log2(max_block_size / min_block_size);
        let mut allocator = Self {
            min_block_size,
            max_block_size,
            max_order,
            free_blocks: Vec::new(),
            allocated: 0,
        };
        allocator.reset();
        allocator
    }

    pub fn min_block_size(&self) -> u64 {
        self.min_block_size
    }

    pub fn max_block_size(&self) -> u64 {
        self.max_block_size
    }

    /// Bytes currently handed out, including rounding.
    pub fn allocated_size(&self) -> u64 {
        self.allocated
    }

    pub fn is_empty(&self) -> bool {
        self.allocated == 0
    }

    /// The number of free blocks of the given order.
    pub fn free_block_count(&self, order: u32) -> usize {
        self.free_blocks.get(order as usize).map_or(0, BTreeSet::len)
    }

    pub fn reset(&mut self) {
        self.free_blocks.clear();
        self.free_blocks.resize_with(self.max_order as usize + 1, BTreeSet::new);
        self.free_blocks[self.max_order as usize].insert(0);
        self.allocated = 0;
    }

    /// Allocates `size` bytes aligned to `alignment`. If the minimum block size
    /// is not itself a multiple of the alignment, the block is padded so the
    /// aligned range still fits.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Result<BuddyAllocation, Error> {
        let padded = if alignment != 0 && self.min_block_size % alignment != 0 {
            size + alignment
        } else {
            size
        };

        let units = padded.max(1).div_ceil(self.min_block_size);
        let order = ceil_log2(units);

        if order > self.max_order {
            return Err(Error::InsufficientCapacity);
        }

        let unit_offset = self.allocate_block(order).ok_or(Error::OutOfMemory {
            capacity: self.max_block_size,
            available: self.max_block_size - self.allocated,
            requested: size,
        })?;

        let block_size = self.order_to_size(order);
        self.allocated += block_size;

        let start = unit_offset * self.min_block_size;
        let offset = align_up(start, alignment);
        debug_assert!(offset - start + size <= block_size);

        Ok(BuddyAllocation {
            block: BuddyBlock { unit_offset, order },
            offset,
        })
    }

    pub fn free(&mut self, block: BuddyBlock) {
        debug_assert!(block.order <= self.max_order);
        self.release_block(block.unit_offset, block.order);
        self.allocated -= self.order_to_size(block.order);
    }

    fn order_to_size(&self, order: u32) -> u64 {
        (1u64 << order) * self.min_block_size
    }

    fn allocate_block(&mut self, order: u32) -> Option<u64> {
        if order > self.max_order {
            return None;
        }

        if let Some(offset) = self.free_blocks[order as usize].pop_first() {
            return Some(offset);
        }

        let left = self.allocate_block(order + 1)?;
        self.free_blocks[order as usize].insert(left + (1 << order));
        Some(left)
    }

    fn release_block(&mut self, unit_offset: u64, order: u32) {
        let buddy = unit_offset ^ (1 << order);

        if order < self.max_order && self.free_blocks[order as usize].remove(&buddy) {
            self.release_block(unit_offset.min(buddy), order + 1);
        } else {
            self.free_blocks[order as usize].insert(unit_offset);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MultiBuddyAllocation {
    pub page: usize,
    pub block: BuddyBlock,
    pub offset: u64,
}

/// A growable set of buddy pages. When no existing page can satisfy a
/// request, a new one is appended with a maximum block size of
/// `max(default_max_block_size, request)`.
#[derive(Debug)]
pub struct MultiBuddyAllocator {
    name: String,
    min_block_size: u64,
    default_max_block_size: u64,
    pages: Vec<BuddyAllocator>,
}

impl MultiBuddyAllocator {
    pub fn new(name: impl Into<String>, min_block_size: u64, default_max_block_size: u64) -> Self {
        Self {
            name: name.into(),
            min_block_size,
            default_max_block_size,
            pages: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page(&self, index: usize) -> &BuddyAllocator {
        &self.pages[index]
    }

    pub fn allocated_size(&self) -> u64 {
        self.pages.iter().map(BuddyAllocator::allocated_size).sum()
    }

    /// Allocates from the first page with room. If none has, `append_page` is
    /// called with the size of the page about to be created so the owner can
    /// back it with native memory before the allocator starts using it.
    pub fn allocate<E, F>(
        &mut self,
        size: u64,
        alignment: u64,
        append_page: F,
    ) -> Result<MultiBuddyAllocation, E>
    where
        E: From<Error>,
        F: FnOnce(u64) -> Result<(), E>,
    {
        for (page, allocator) in self.pages.iter_mut().enumerate() {
            if let Ok(a) = allocator.allocate(size, alignment) {
                return Ok(MultiBuddyAllocation {
                    page,
                    block: a.block,
                    offset: a.offset,
                });
            }
        }

        let mut page_size = size;
        if alignment != 0 && self.min_block_size % alignment != 0 {
            page_size += alignment;
        }

        page_size = if page_size <= self.default_max_block_size {
            self.default_max_block_size
        } else {
            page_size.div_ceil(self.min_block_size).next_power_of_two() * self.min_block_size
        };

        append_page(page_size)?;
        self.pages.push(BuddyAllocator::new(self.min_block_size, page_size));
        log::trace!(
            "{} creates new page; min block size {}, max block size {}",
            self.name,
            self.min_block_size,
            page_size
        );

        let page = self.pages.len() - 1;
        let a = self.pages[page].allocate(size, alignment)?;
        Ok(MultiBuddyAllocation {
            page,
            block: a.block,
            offset: a.offset,
        })
    }

    pub fn free(&mut self, allocation: &MultiBuddyAllocation) {
        self.pages[allocation.page].free(allocation.block);
    }

    pub fn reset(&mut self) {
        self.pages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_merge() {
        let mut buddy = BuddyAllocator::new(256, 4096);

        let a = buddy.allocate(256, 256).unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(a.block.order, 0);
        // splitting the 4096 block down to 256 leaves one free buddy per order
        assert_eq!(buddy.free_block_count(0), 1);
        assert_eq!(buddy.free_block_count(1), 1);
        assert_eq!(buddy.free_block_count(2), 1);
        assert_eq!(buddy.free_block_count(3), 1);
        assert_eq!(buddy.free_block_count(4), 0);

        let b = buddy.allocate(300, 256).unwrap();
        assert_eq!(b.block.order, 1);
        assert_eq!(b.offset, 512);
        assert_eq!(buddy.allocated_size(), 256 + 512);

        buddy.free(a.block);
        buddy.free(b.block);
        assert!(buddy.is_empty());
        assert_eq!(buddy.free_block_count(4), 1);
        assert_eq!(buddy.free_block_count(0), 0);
    }

    #[test]
    fn exhaustion_and_capacity() {
        let mut buddy = BuddyAllocator::new(256, 1024);

        assert_eq!(buddy.allocate(2048, 256), Err(Error::InsufficientCapacity));

        let blocks: Vec<_> = (0..4).map(|_| buddy.allocate(256, 256).unwrap()).collect();
        assert!(matches!(buddy.allocate(1, 0), Err(Error::OutOfMemory { .. })));

        buddy.free(blocks[1].block);
        let again = buddy.allocate(200, 0).unwrap();
        assert_eq!(again.offset, 256);
    }

    #[test]
    fn unaligned_min_block_pads() {
        let mut buddy = BuddyAllocator::new(48, 48 * 16);

        let a = buddy.allocate(16, 0).unwrap();
        let b = buddy.allocate(16, 64).unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset % 64, 0);
        assert!(b.offset >= 48);
    }

    #[test]
    fn multi_buddy_appends_pages() {
        let mut multi = MultiBuddyAllocator::new("test", 256, 1024);
        let mut appended = Vec::new();

        let alloc = |multi: &mut MultiBuddyAllocator, size: u64, appended: &mut Vec<u64>| {
            multi
                .allocate::<Error, _>(size, 256, |page_size| {
                    appended.push(page_size);
                    Ok(())
                })
                .unwrap()
        };

        let a = alloc(&mut multi, 1024, &mut appended);
        let b = alloc(&mut multi, 512, &mut appended);
        let c = alloc(&mut multi, 5000, &mut appended);

        assert_eq!(appended, vec![1024, 1024, 8192]);
        assert_eq!((a.page, b.page, c.page), (0, 1, 2));

        multi.free(&a);
        let d = alloc(&mut multi, 256, &mut appended);
        assert_eq!(d.page, 0);
        assert_eq!(appended.len(), 3);
    }
}
