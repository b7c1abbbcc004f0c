use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use structures::FlagVec;

use crate::{
    hal::{self, CpuDescriptor, DescriptorHeapType},
    sync::{Fence, ReleaseQueue},
    Result,
};

struct Page {
    heap: Box<dyn hal::DescriptorHeap>,
    used: FlagVec,
    count: u32,
}

/// Fixed-stride descriptor slots in pages of host-only descriptor heaps.
///
/// Freed slots stay reserved until the frame fence passes the value that was
/// next when they were freed.
pub struct OfflineDescriptorAllocator {
    device: Arc<dyn hal::Device>,
    clock: Arc<Fence>,
    ty: DescriptorHeapType,
    page_size: u32,
    increment: u32,
    pages: Mutex<Vec<Page>>,
    releases: ReleaseQueue<(u32, u32)>,
}

impl OfflineDescriptorAllocator {
    pub fn new(device: Arc<dyn hal::Device>, clock: Arc<Fence>, ty: DescriptorHeapType, page_size: u32) -> Self {
        assert!(page_size > 0);
        let increment = device.descriptor_increment_size(ty);

        Self {
            device,
            clock,
            ty,
            page_size,
            increment,
            pages: Mutex::new(Vec::new()),
            releases: ReleaseQueue::new(),
        }
    }

    pub fn ty(&self) -> DescriptorHeapType {
        self.ty
    }

    pub fn page_count(&self) -> usize {
        self.pages.lock().len()
    }

    /// Slots handed out or waiting to be freed.
    pub fn used_count(&self) -> u32 {
        self.pages.lock().iter().map(|p| p.count).sum()
    }

    pub fn pending_releases(&self) -> usize {
        self.releases.len()
    }

    pub fn allocate(self: &Arc<Self>) -> Result<OfflineDescriptor> {
        let mut pages = self.pages.lock();

        let mut found = None;
        for (index, page) in pages.iter_mut().enumerate() {
            if page.count == self.page_size {
                continue;
            }

            if let Some(slot) = page.used.first_clear(self.page_size as usize) {
                found = Some((index, slot));
                break;
            }
        }

        let (page, slot) = match found {
            Some(found) => found,
            None => {
                let heap = self.device.create_descriptor_heap(
                    self.ty,
                    self.page_size,
                    false,
                    &format!("Offline{}DescriptorPage", self.ty.name()),
                )?;
                log::trace!(
                    "offline {} descriptor allocator creates page {}; size {}",
                    self.ty.name(),
                    pages.len(),
                    self.page_size
                );

                pages.push(Page {
                    heap,
                    used: FlagVec::with_capacity(self.page_size as usize),
                    count: 0,
                });
                (pages.len() - 1, 0)
            }
        };

        let entry = &mut pages[page];
        entry.used.set(slot, true);
        entry.count += 1;
        let cpu = entry.heap.cpu_start().offset(slot as u32, self.increment);

        Ok(OfflineDescriptor {
            allocator: self.clone(),
            page: page as u32,
            slot: slot as u32,
            cpu,
        })
    }

    fn release(&self, page: u32, slot: u32) {
        self.releases.push(self.clock.next_value(), (page, slot));
    }

    pub fn clean_up(&self, completed: u64) {
        let released = self.releases.drain_completed(completed);
        if released.is_empty() {
            return;
        }

        let mut pages = self.pages.lock();
        for (page, slot) in released {
            let entry = &mut pages[page as usize];
            let was_used = entry.used.set(slot as usize, false);
            debug_assert!(was_used, "descriptor slot freed twice");
            entry.count -= 1;
        }
    }
}

/// A slot from an [`OfflineDescriptorAllocator`], freed when dropped.
pub struct OfflineDescriptor {
    allocator: Arc<OfflineDescriptorAllocator>,
    page: u32,
    slot: u32,
    cpu: CpuDescriptor,
}

impl OfflineDescriptor {
    pub fn ty(&self) -> DescriptorHeapType {
        self.allocator.ty
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn cpu(&self) -> CpuDescriptor {
        self.cpu
    }
}

impl Drop for OfflineDescriptor {
    fn drop(&mut self) {
        self.allocator.release(self.page, self.slot);
    }
}

impl fmt::Debug for OfflineDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineDescriptor")
            .field("ty", &self.allocator.ty)
            .field("page", &self.page)
            .field("slot", &self.slot)
            .field("cpu", &self.cpu)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::hal::null;

    fn allocator(page_size: u32) -> (Arc<Fence>, Arc<OfflineDescriptorAllocator>) {
        let device: Arc<dyn hal::Device> = Arc::new(null::Device::new());
        let clock = Arc::new(Fence::new(device.as_ref(), "frame").unwrap());
        let allocator = Arc::new(OfflineDescriptorAllocator::new(
            device,
            clock.clone(),
            DescriptorHeapType::CbvSrvUav,
            page_size,
        ));
        (clock, allocator)
    }

    #[test]
    fn slots_are_unique_and_paged() {
        let (_clock, allocator) = allocator(4);

        let descriptors = (0..10).map(|_| allocator.allocate().unwrap()).collect::<Vec<_>>();
        assert_eq!(allocator.page_count(), 3);

        let slots = descriptors
            .iter()
            .map(|d| (d.page(), d.slot()))
            .collect::<HashSet<_>>();
        assert_eq!(slots.len(), 10);

        let handles = descriptors.iter().map(|d| d.cpu()).collect::<HashSet<_>>();
        assert_eq!(handles.len(), 10);
    }

    #[test]
    fn slot_reuse_waits_for_fence() {
        let (clock, allocator) = allocator(2);

        let a = allocator.allocate().unwrap();
        let b = allocator.allocate().unwrap();
        let (a_page, a_slot) = (a.page(), a.slot());
        drop(a);

        // still reserved: a fresh page is needed
        let c = allocator.allocate().unwrap();
        assert_eq!(c.page(), 1);
        assert_eq!(allocator.used_count(), 3);

        let key = clock.signal_next_on_cpu().unwrap();
        allocator.clean_up(key);
        assert_eq!(allocator.pending_releases(), 0);

        let d = allocator.allocate().unwrap();
        assert_eq!((d.page(), d.slot()), (a_page, a_slot));
        drop((b, c, d));
    }
}
