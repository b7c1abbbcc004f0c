use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    hal::{self, HeapType, NativeResource, ResourceDesc, ResourceFlags, CONSTANT_BUFFER_ALIGNMENT},
    memory::{LinearAllocation, LinearAllocator, MultiBuddyAllocation, MultiBuddyAllocator},
    resource::{Allocation, Resource, ResourceAllocator, ResourceInit, ResourceState},
    sync::{Fence, ReleaseQueue},
    Result,
};

fn create_page(device: &dyn hal::Device, size: u64, name: &str) -> Result<Arc<dyn NativeResource>> {
    let desc = ResourceDesc::buffer(size, ResourceFlags::empty());
    let page = device.create_committed_resource(HeapType::Upload, &desc, ResourceState::GENERIC_READ, None, name)?;
    Ok(page.into())
}

struct BuddyPages {
    buddy: MultiBuddyAllocator,
    pages: Vec<Arc<dyn NativeResource>>,
}

/// Persistent upload ranges sub-allocated from upload buffer pages by a
/// multi-buddy allocator.
pub struct UploadBuddyAllocator {
    device: Arc<dyn hal::Device>,
    clock: Arc<Fence>,
    state: Mutex<BuddyPages>,
    releases: ReleaseQueue<MultiBuddyAllocation>,
}

impl UploadBuddyAllocator {
    pub fn new(device: Arc<dyn hal::Device>, clock: Arc<Fence>, page_size: u64) -> Self {
        Self {
            device,
            clock,
            state: Mutex::new(BuddyPages {
                buddy: MultiBuddyAllocator::new("UploadBuddyAllocator", CONSTANT_BUFFER_ALIGNMENT, page_size),
                pages: Vec::new(),
            }),
            releases: ReleaseQueue::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.state.lock().pages.len()
    }

    pub fn allocated_size(&self) -> u64 {
        self.state.lock().buddy.allocated_size()
    }

    pub fn pending_releases(&self) -> usize {
        self.releases.len()
    }

    pub fn allocate(self: &Arc<Self>, name: &str, size: u64, alignment: u64) -> Result<Resource> {
        let mut state = self.state.lock();
        let BuddyPages { buddy, pages } = &mut *state;

        let allocation = buddy.allocate::<crate::Error, _>(size, alignment, |page_size| {
            pages.push(create_page(self.device.as_ref(), page_size, "UploadBuddyPage")?);
            Ok(())
        })?;

        let raw = pages[allocation.page].clone();
        drop(state);

        Ok(Resource::new(ResourceInit {
            raw,
            name: name.to_owned(),
            heap_type: HeapType::Upload,
            offset: allocation.offset,
            size,
            initial_state: ResourceState::GENERIC_READ,
            allocation: Allocation::UploadBuddy(allocation),
            allocator: Some(self.clone()),
        }))
    }

    pub fn clean_up(&self, completed: u64) {
        let released = self.releases.drain_completed(completed);
        if released.is_empty() {
            return;
        }

        let mut state = self.state.lock();
        for allocation in released {
            state.buddy.free(&allocation);
        }
    }
}

impl ResourceAllocator for UploadBuddyAllocator {
    fn release(&self, _raw: Arc<dyn NativeResource>, allocation: Allocation) {
        match allocation {
            Allocation::UploadBuddy(block) => self.releases.push(self.clock.next_value(), block),
            other => debug_assert!(false, "upload buddy allocator got back {other:?}"),
        }
    }
}

enum Retired {
    Page(usize),
    LargePage(usize),
}

struct LinearPages {
    linear: LinearAllocator,
    pages: Vec<Arc<dyn NativeResource>>,
    free_pages: Vec<usize>,
    large_pages: Vec<Option<Arc<dyn NativeResource>>>,
}

/// Transient upload ranges bumped out of upload buffer pages.
///
/// Ranges are valid until the end of the frame they were allocated in. A page
/// is retired with the frame fence value when it fills up or when the frame
/// ends, and becomes reusable once the GPU passes that value. Requests larger
/// than a page get a page of their own that is destroyed when the range is
/// dropped.
pub struct UploadLinearAllocator {
    device: Arc<dyn hal::Device>,
    clock: Arc<Fence>,
    state: Mutex<LinearPages>,
    retired: ReleaseQueue<Retired>,
}

impl UploadLinearAllocator {
    pub fn new(device: Arc<dyn hal::Device>, clock: Arc<Fence>, page_size: u64) -> Self {
        Self {
            device,
            clock,
            state: Mutex::new(LinearPages {
                linear: LinearAllocator::new("UploadLinearAllocator", page_size),
                pages: Vec::new(),
                free_pages: Vec::new(),
                large_pages: Vec::new(),
            }),
            retired: ReleaseQueue::new(),
        }
    }

    pub fn page_size(&self) -> u64 {
        self.state.lock().linear.page_size()
    }

    /// Regular pages created so far.
    pub fn page_count(&self) -> usize {
        self.state.lock().pages.len()
    }

    /// Regular pages ready for reuse.
    pub fn free_page_count(&self) -> usize {
        self.state.lock().free_pages.len()
    }

    pub fn large_page_count(&self) -> usize {
        self.state.lock().large_pages.iter().flatten().count()
    }

    pub fn pending_releases(&self) -> usize {
        self.retired.len()
    }

    pub fn allocate(self: &Arc<Self>, name: &str, size: u64, alignment: u64) -> Result<Resource> {
        let key = self.clock.next_value();
        let mut state = self.state.lock();
        let LinearPages {
            linear,
            pages,
            free_pages,
            large_pages,
        } = &mut *state;
        let current = linear.current_page();

        let allocation: LinearAllocation = linear.allocate::<crate::Error, _>(size, alignment, |request| {
            if request.large {
                large_pages.push(Some(create_page(self.device.as_ref(), request.size, "UploadLargePage")?));
                return Ok((large_pages.len() - 1, true));
            }

            if let Some(page) = current {
                self.retired.push(key, Retired::Page(page));
            }

            match free_pages.pop() {
                Some(page) => Ok((page, false)),
                None => {
                    pages.push(create_page(self.device.as_ref(), request.size, "UploadLinearPage")?);
                    Ok((pages.len() - 1, true))
                }
            }
        })?;

        let raw = if allocation.large {
            large_pages[allocation.page].clone()
        } else {
            Some(pages[allocation.page].clone())
        };
        drop(state);

        let Some(raw) = raw else {
            unreachable!("linear allocation points at a destroyed large page")
        };

        Ok(Resource::new(ResourceInit {
            raw,
            name: name.to_owned(),
            heap_type: HeapType::Upload,
            offset: allocation.offset,
            size,
            initial_state: ResourceState::GENERIC_READ,
            allocation: Allocation::UploadLinear(allocation),
            allocator: Some(self.clone()),
        }))
    }

    /// Retires the current page with `key`. The next allocation starts a new
    /// page.
    pub fn retire_frame(&self, key: u64) {
        let mut state = self.state.lock();
        if let Some(page) = state.linear.current_page() {
            self.retired.push(key, Retired::Page(page));
        }
        state.linear.reset();
    }

    pub fn clean_up(&self, completed: u64) {
        let retired = self.retired.drain_completed(completed);
        if retired.is_empty() {
            return;
        }

        let mut state = self.state.lock();
        for item in retired {
            match item {
                Retired::Page(page) => state.free_pages.push(page),
                Retired::LargePage(page) => state.large_pages[page] = None,
            }
        }
    }
}

impl ResourceAllocator for UploadLinearAllocator {
    fn release(&self, raw: Arc<dyn NativeResource>, allocation: Allocation) {
        drop(raw);

        // Regular ranges are freed with their page.
        if let Allocation::UploadLinear(LinearAllocation {
            page, large: true, ..
        }) = allocation
        {
            self.retired.push(self.clock.next_value(), Retired::LargePage(page));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::tests::setup;

    #[test]
    fn buddy_ranges_share_pages() {
        let (_null, device, clock) = setup();
        let allocator = Arc::new(UploadBuddyAllocator::new(device, clock.clone(), 4096));

        let a = allocator.allocate("a", 100, 256).unwrap();
        let b = allocator.allocate("b", 300, 256).unwrap();
        assert_eq!(allocator.page_count(), 1);
        assert_eq!(a.offset(), 0);
        assert_eq!(b.offset(), 512);
        assert_eq!(b.gpu_address(), a.gpu_address() + 512);
        assert!(a.is_state_locked());

        a.write(0, &[1, 2, 3]).unwrap();
        let mut out = [0; 3];
        a.read(0, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3]);

        drop(a);
        assert_eq!(allocator.allocated_size(), 256 + 512);
        allocator.clean_up(clock.next_value());
        assert_eq!(allocator.allocated_size(), 512);
        drop(b);
    }

    #[test]
    fn linear_pages_recycle_after_fence() {
        let (null, device, clock) = setup();
        let allocator = Arc::new(UploadLinearAllocator::new(device, clock.clone(), 1024));

        let a = allocator.allocate("a", 600, 256).unwrap();
        // does not fit next to `a`, so the first page retires
        let b = allocator.allocate("b", 600, 256).unwrap();
        assert_eq!(allocator.page_count(), 2);
        assert!(!Arc::ptr_eq(a.raw_arc(), b.raw_arc()));

        let big = allocator.allocate("big", 4096, 256).unwrap();
        assert_eq!(allocator.large_page_count(), 1);
        assert_eq!(null.live_resources(), 3);
        drop((a, b, big));

        let key = clock.next_value();
        allocator.retire_frame(key);
        assert_eq!(allocator.pending_releases(), 3);

        allocator.clean_up(key - 1);
        assert_eq!(allocator.free_page_count(), 0);

        allocator.clean_up(key);
        assert_eq!(allocator.free_page_count(), 2);
        assert_eq!(allocator.large_page_count(), 0);
        assert_eq!(null.live_resources(), 2);

        // recycled, not created
        let _c = allocator.allocate("c", 16, 16).unwrap();
        assert_eq!(allocator.page_count(), 2);
        assert_eq!(allocator.free_page_count(), 1);
    }
}
