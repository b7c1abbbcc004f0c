use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    hal::{self, ClearValue, HeapDesc, HeapType, HeapUsage, NativeResource, ResourceDesc},
    memory::{MultiBuddyAllocation, MultiBuddyAllocator},
    resource::{Allocation, Resource, ResourceAllocator, ResourceInit, ResourceState},
    sync::{Fence, ReleaseQueue},
    Result,
};

/// The resource categories that tier 1 hardware keeps in separate heaps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlacedKind {
    Buffer = 0,
    Texture = 1,
    RenderTexture = 2,
    RenderTextureMs = 3,
}

impl PlacedKind {
    pub fn of(desc: &ResourceDesc) -> Self {
        if desc.is_buffer() {
            PlacedKind::Buffer
        } else if !desc.is_render_texture() {
            PlacedKind::Texture
        } else if desc.sample_count > 1 {
            PlacedKind::RenderTextureMs
        } else {
            PlacedKind::RenderTexture
        }
    }

    fn usage(self) -> HeapUsage {
        match self {
            PlacedKind::Buffer => HeapUsage::Buffers,
            PlacedKind::Texture => HeapUsage::Textures,
            PlacedKind::RenderTexture | PlacedKind::RenderTextureMs => HeapUsage::RenderTextures,
        }
    }

    fn alignment(self) -> u64 {
        match self {
            PlacedKind::RenderTextureMs => hal::MSAA_PLACEMENT_ALIGNMENT,
            _ => hal::DEFAULT_PLACEMENT_ALIGNMENT,
        }
    }
}

struct Pages {
    buddy: MultiBuddyAllocator,
    heaps: Vec<Box<dyn hal::Heap>>,
}

/// Places resources in native heaps carved up by a multi-buddy allocator.
pub struct PlacedAllocator {
    device: Arc<dyn hal::Device>,
    clock: Arc<Fence>,
    kind: PlacedKind,
    heap_type: HeapType,
    pages: Mutex<Pages>,
    releases: ReleaseQueue<(Arc<dyn NativeResource>, MultiBuddyAllocation)>,
}

impl PlacedAllocator {
    pub fn new(
        device: Arc<dyn hal::Device>,
        clock: Arc<Fence>,
        kind: PlacedKind,
        heap_type: HeapType,
        page_size: u64,
    ) -> Self {
        let name = format!("Placed{kind:?}Allocator({heap_type:?})");

        Self {
            device,
            clock,
            kind,
            heap_type,
            pages: Mutex::new(Pages {
                buddy: MultiBuddyAllocator::new(name, kind.alignment(), page_size),
                heaps: Vec::new(),
            }),
            releases: ReleaseQueue::new(),
        }
    }

    pub fn kind(&self) -> PlacedKind {
        self.kind
    }

    pub fn heap_count(&self) -> usize {
        self.pages.lock().heaps.len()
    }

    /// Bytes currently owned by live or pending resources.
    pub fn allocated_size(&self) -> u64 {
        self.pages.lock().buddy.allocated_size()
    }

    pub fn pending_releases(&self) -> usize {
        self.releases.len()
    }

    pub fn allocate(
        self: &Arc<Self>,
        name: &str,
        desc: &ResourceDesc,
        initial_state: ResourceState,
        clear_value: Option<&ClearValue>,
    ) -> Result<Resource> {
        debug_assert_eq!(PlacedKind::of(desc), self.kind);

        let initial_state = match self.heap_type {
            HeapType::Upload => ResourceState::GENERIC_READ,
            HeapType::Readback => ResourceState::COPY_DEST,
            HeapType::Default => initial_state,
        };

        let info = self.device.resource_allocation_info(desc);
        let mut pages = self.pages.lock();
        let Pages { buddy, heaps } = &mut *pages;

        let allocation = buddy.allocate::<crate::Error, _>(info.size, info.alignment, |page_size| {
            let heap = self.device.create_heap(
                &HeapDesc {
                    size: page_size,
                    heap_type: self.heap_type,
                    usage: self.kind.usage(),
                    alignment: self.kind.alignment(),
                },
                buddy_name(self.kind),
            )?;
            heaps.push(heap);
            Ok(())
        })?;

        let raw = self.device.create_placed_resource(
            heaps[allocation.page].as_ref(),
            allocation.offset,
            desc,
            initial_state,
            clear_value,
            name,
        );

        let raw: Arc<dyn NativeResource> = match raw {
            Ok(raw) => raw.into(),
            Err(e) => {
                buddy.free(&allocation);
                return Err(e);
            }
        };
        drop(pages);

        let size = if desc.is_buffer() { desc.width } else { info.size };

        Ok(Resource::new(ResourceInit {
            raw,
            name: name.to_owned(),
            heap_type: self.heap_type,
            offset: 0,
            size,
            initial_state,
            allocation: Allocation::Placed(allocation),
            allocator: Some(self.clone()),
        }))
    }

    pub fn clean_up(&self, completed: u64) {
        let released = self.releases.drain_completed(completed);
        if released.is_empty() {
            return;
        }

        let mut pages = self.pages.lock();
        for (raw, allocation) in released {
            // The native resource goes first; its memory is reused after.
            drop(raw);
            pages.buddy.free(&allocation);
        }
    }
}

fn buddy_name(kind: PlacedKind) -> &'static str {
    match kind {
        PlacedKind::Buffer => "PlacedBufferHeap",
        PlacedKind::Texture => "PlacedTextureHeap",
        PlacedKind::RenderTexture => "PlacedRenderTextureHeap",
        PlacedKind::RenderTextureMs => "PlacedRenderTextureMsHeap",
    }
}

impl ResourceAllocator for PlacedAllocator {
    fn release(&self, raw: Arc<dyn NativeResource>, allocation: Allocation) {
        match allocation {
            Allocation::Placed(block) => self.releases.push(self.clock.next_value(), (raw, block)),
            other => debug_assert!(false, "placed allocator got back {other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        hal::{Format, ResourceDimension, ResourceFlags},
        heap::tests::setup,
    };

    #[test]
    fn blocks_return_after_clean_up() {
        let (null, device, clock) = setup();
        let allocator = Arc::new(PlacedAllocator::new(
            device,
            clock.clone(),
            PlacedKind::Buffer,
            HeapType::Default,
            1 << 20,
        ));

        let desc = ResourceDesc::buffer(4096, ResourceFlags::empty());
        let a = allocator
            .allocate("a", &desc, ResourceState::COMMON, None)
            .unwrap();
        let b = allocator
            .allocate("b", &desc, ResourceState::COMMON, None)
            .unwrap();
        assert_eq!(allocator.heap_count(), 1);
        assert_eq!(allocator.allocated_size(), 2 * hal::DEFAULT_PLACEMENT_ALIGNMENT);

        let Allocation::Placed(block) = a.allocation() else {
            panic!("expected a placed allocation")
        };
        assert_eq!(block.offset % hal::DEFAULT_PLACEMENT_ALIGNMENT, 0);

        drop(a);
        drop(b);
        assert_eq!(allocator.pending_releases(), 2);
        assert_eq!(allocator.allocated_size(), 2 * hal::DEFAULT_PLACEMENT_ALIGNMENT);
        assert_eq!(null.live_resources(), 2);

        allocator.clean_up(clock.next_value());
        assert_eq!(allocator.allocated_size(), 0);
        assert_eq!(null.live_resources(), 0);
    }

    #[test]
    fn msaa_targets_align_to_4mb() {
        let (_null, device, clock) = setup();
        let allocator = Arc::new(PlacedAllocator::new(
            device,
            clock,
            PlacedKind::RenderTextureMs,
            HeapType::Default,
            16 << 20,
        ));

        let desc = ResourceDesc {
            dimension: ResourceDimension::Texture2D,
            width: 64,
            height: 64,
            depth_or_array_size: 1,
            mip_levels: 1,
            format: Format::R8G8B8A8Unorm,
            sample_count: 4,
            sample_quality: 0,
            flags: ResourceFlags::ALLOW_RENDER_TARGET,
        };
        assert_eq!(PlacedKind::of(&desc), PlacedKind::RenderTextureMs);

        let _a = allocator
            .allocate("a", &desc, ResourceState::RENDER_TARGET, None)
            .unwrap();
        let b = allocator
            .allocate("b", &desc, ResourceState::RENDER_TARGET, None)
            .unwrap();

        let Allocation::Placed(block) = b.allocation() else {
            panic!("expected a placed allocation")
        };
        assert_eq!(block.offset, hal::MSAA_PLACEMENT_ALIGNMENT);
    }
}
