use std::sync::Arc;

use crate::{
    hal::{self, ClearValue, HeapType, NativeResource, ResourceDesc},
    resource::{Allocation, Resource, ResourceAllocator, ResourceInit, ResourceState},
    sync::{Fence, ReleaseQueue},
    Result,
};

/// One native resource per allocation.
pub struct CommittedAllocator {
    device: Arc<dyn hal::Device>,
    clock: Arc<Fence>,
    heap_type: HeapType,
    releases: ReleaseQueue<Arc<dyn NativeResource>>,
}

impl CommittedAllocator {
    pub fn new(device: Arc<dyn hal::Device>, clock: Arc<Fence>, heap_type: HeapType) -> Self {
        Self {
            device,
            clock,
            heap_type,
            releases: ReleaseQueue::new(),
        }
    }

    pub fn heap_type(&self) -> HeapType {
        self.heap_type
    }

    pub fn allocate(
        self: &Arc<Self>,
        name: &str,
        desc: &ResourceDesc,
        initial_state: ResourceState,
        clear_value: Option<&ClearValue>,
    ) -> Result<Resource> {
        // Upload and readback heaps only accept one state each.
        let initial_state = match self.heap_type {
            HeapType::Default => initial_state,
            HeapType::Upload => ResourceState::GENERIC_READ,
            HeapType::Readback => ResourceState::COPY_DEST,
        };

        let raw: Arc<dyn NativeResource> = self
            .device
            .create_committed_resource(self.heap_type, desc, initial_state, clear_value, name)?
            .into();

        let size = if desc.is_buffer() {
            desc.width
        } else {
            self.device.resource_allocation_info(desc).size
        };

        Ok(Resource::new(ResourceInit {
            raw,
            name: name.to_owned(),
            heap_type: self.heap_type,
            offset: 0,
            size,
            initial_state,
            allocation: Allocation::Committed,
            allocator: Some(self.clone()),
        }))
    }

    pub fn pending_releases(&self) -> usize {
        self.releases.len()
    }

    pub fn clean_up(&self, completed: u64) {
        drop(self.releases.drain_completed(completed));
    }
}

impl ResourceAllocator for CommittedAllocator {
    fn release(&self, raw: Arc<dyn NativeResource>, allocation: Allocation) {
        debug_assert_eq!(allocation, Allocation::Committed);
        self.releases.push(self.clock.next_value(), raw);
    }
}
