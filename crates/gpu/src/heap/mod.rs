//! Allocators that turn resource descriptions into [`Resource`]s.
//!
//! Every allocator keeps a release queue keyed by the frame fence value that
//! was next when the resource was dropped. [`HeapAllocators::clean_up`] frees
//! everything whose key the GPU has passed.

mod committed;
mod placed;
mod upload;

use std::sync::Arc;

pub use committed::CommittedAllocator;
pub use placed::{PlacedAllocator, PlacedKind};
pub use upload::{UploadBuddyAllocator, UploadLinearAllocator};

use crate::{
    hal::{self, ClearValue, HeapType, ResourceDesc},
    resource::{Resource, ResourceState},
    sync::Fence,
    Config, Error, Result,
};

/// Where a resource's memory comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AllocatorKind {
    CommittedDefault,
    CommittedUpload,
    CommittedReadback,
    PlacedDefault,
    PlacedUpload,
}

impl AllocatorKind {
    pub fn heap_type(self) -> HeapType {
        match self {
            AllocatorKind::CommittedDefault | AllocatorKind::PlacedDefault => HeapType::Default,
            AllocatorKind::CommittedUpload | AllocatorKind::PlacedUpload => HeapType::Upload,
            AllocatorKind::CommittedReadback => HeapType::Readback,
        }
    }
}

/// Which upload sub-allocator serves a buffer range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubAllocatorKind {
    /// Lives until the end of the current frame. Pages are recycled once the
    /// frame fence passes.
    TempUpload,
    /// Lives until dropped.
    PersistentUpload,
}

/// Every heap allocator of a device.
pub struct HeapAllocators {
    committed_default: Arc<CommittedAllocator>,
    committed_upload: Arc<CommittedAllocator>,
    committed_readback: Arc<CommittedAllocator>,
    placed_default: [Arc<PlacedAllocator>; 4],
    placed_upload: Arc<PlacedAllocator>,
    upload_buddy: Arc<UploadBuddyAllocator>,
    upload_linear: Arc<UploadLinearAllocator>,
}

impl HeapAllocators {
    pub fn new(device: &Arc<dyn hal::Device>, clock: &Arc<Fence>, config: &Config) -> Self {
        let committed = |heap_type| Arc::new(CommittedAllocator::new(device.clone(), clock.clone(), heap_type));
        let placed = |kind, heap_type, page_size| {
            Arc::new(PlacedAllocator::new(
                device.clone(),
                clock.clone(),
                kind,
                heap_type,
                page_size,
            ))
        };

        Self {
            committed_default: committed(HeapType::Default),
            committed_upload: committed(HeapType::Upload),
            committed_readback: committed(HeapType::Readback),
            placed_default: [
                placed(PlacedKind::Buffer, HeapType::Default, config.placed_buffer_page_size),
                placed(PlacedKind::Texture, HeapType::Default, config.placed_texture_page_size),
                placed(PlacedKind::RenderTexture, HeapType::Default, config.placed_texture_page_size),
                placed(PlacedKind::RenderTextureMs, HeapType::Default, config.placed_texture_page_size),
            ],
            placed_upload: placed(PlacedKind::Buffer, HeapType::Upload, config.placed_buffer_page_size),
            upload_buddy: Arc::new(UploadBuddyAllocator::new(
                device.clone(),
                clock.clone(),
                config.upload_page_size,
            )),
            upload_linear: Arc::new(UploadLinearAllocator::new(
                device.clone(),
                clock.clone(),
                config.upload_page_size,
            )),
        }
    }

    pub fn committed(&self, heap_type: HeapType) -> &Arc<CommittedAllocator> {
        match heap_type {
            HeapType::Default => &self.committed_default,
            HeapType::Upload => &self.committed_upload,
            HeapType::Readback => &self.committed_readback,
        }
    }

    pub fn placed(&self, heap_type: HeapType, kind: PlacedKind) -> Option<&Arc<PlacedAllocator>> {
        match (heap_type, kind) {
            (HeapType::Default, kind) => Some(&self.placed_default[kind as usize]),
            (HeapType::Upload, PlacedKind::Buffer) => Some(&self.placed_upload),
            _ => None,
        }
    }

    pub fn upload_buddy(&self) -> &Arc<UploadBuddyAllocator> {
        &self.upload_buddy
    }

    pub fn upload_linear(&self) -> &Arc<UploadLinearAllocator> {
        &self.upload_linear
    }

    /// Creates a resource with its own memory or placed in a shared heap. The
    /// placed sub-type is picked from the description.
    pub fn allocate(
        &self,
        kind: AllocatorKind,
        name: &str,
        desc: &ResourceDesc,
        initial_state: ResourceState,
        clear_value: Option<&ClearValue>,
    ) -> Result<Resource> {
        match kind {
            AllocatorKind::CommittedDefault | AllocatorKind::CommittedUpload | AllocatorKind::CommittedReadback => {
                self.committed(kind.heap_type())
                    .allocate(name, desc, initial_state, clear_value)
            }
            AllocatorKind::PlacedDefault | AllocatorKind::PlacedUpload => {
                let placed_kind = PlacedKind::of(desc);
                let allocator = self.placed(kind.heap_type(), placed_kind).ok_or_else(|| {
                    Error::InvalidArgument(format!("{placed_kind:?} resources cannot be placed in an upload heap"))
                })?;
                allocator.allocate(name, desc, initial_state, clear_value)
            }
        }
    }

    /// Sub-allocates `size` bytes of upload memory.
    pub fn sub_allocate(&self, kind: SubAllocatorKind, name: &str, size: u64, alignment: u64) -> Result<Resource> {
        match kind {
            SubAllocatorKind::TempUpload => self.upload_linear.allocate(name, size, alignment),
            SubAllocatorKind::PersistentUpload => self.upload_buddy.allocate(name, size, alignment),
        }
    }

    /// Closes the frame for allocators that think in frames. Everything handed
    /// out by the linear upload allocator so far is released with `key`.
    pub fn retire_frame(&self, key: u64) {
        self.upload_linear.retire_frame(key);
    }

    /// Frees everything released with a key `<= completed`.
    pub fn clean_up(&self, completed: u64) {
        self.committed_default.clean_up(completed);
        self.committed_upload.clean_up(completed);
        self.committed_readback.clean_up(completed);
        for placed in &self.placed_default {
            placed.clean_up(completed);
        }
        self.placed_upload.clean_up(completed);
        self.upload_buddy.clean_up(completed);
        self.upload_linear.clean_up(completed);
    }

    /// Number of releases still waiting on the GPU, across all allocators.
    pub fn pending_releases(&self) -> usize {
        self.committed_default.pending_releases()
            + self.committed_upload.pending_releases()
            + self.committed_readback.pending_releases()
            + self.placed_default.iter().map(|p| p.pending_releases()).sum::<usize>()
            + self.placed_upload.pending_releases()
            + self.upload_buddy.pending_releases()
            + self.upload_linear.pending_releases()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{null, ResourceFlags};

    pub(super) fn setup() -> (Arc<null::Device>, Arc<dyn hal::Device>, Arc<Fence>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let null = Arc::new(null::Device::new());
        let device: Arc<dyn hal::Device> = null.clone();
        let clock = Arc::new(Fence::new(device.as_ref(), "frame").unwrap());
        (null, device, clock)
    }

    #[test]
    fn placed_upload_rejects_textures() {
        let (_null, device, clock) = setup();
        let allocators = HeapAllocators::new(&device, &clock, &Config::default());

        let texture = ResourceDesc {
            dimension: hal::ResourceDimension::Texture2D,
            width: 4,
            height: 4,
            depth_or_array_size: 1,
            mip_levels: 1,
            format: hal::Format::R8G8B8A8Unorm,
            sample_count: 1,
            sample_quality: 0,
            flags: ResourceFlags::empty(),
        };

        assert!(matches!(
            allocators.allocate(AllocatorKind::PlacedUpload, "t", &texture, ResourceState::COMMON, None),
            Err(Error::InvalidArgument(_))
        ));
        assert!(allocators
            .allocate(AllocatorKind::PlacedDefault, "t", &texture, ResourceState::COMMON, None)
            .is_ok());
    }

    #[test]
    fn clean_up_waits_for_key() {
        let (null, device, clock) = setup();
        let allocators = HeapAllocators::new(&device, &clock, &Config::default());

        let desc = ResourceDesc::buffer(1024, ResourceFlags::empty());
        let buffer = allocators
            .allocate(AllocatorKind::CommittedDefault, "b", &desc, ResourceState::COMMON, None)
            .unwrap();
        assert_eq!(null.live_resources(), 1);

        drop(buffer);
        assert_eq!(allocators.pending_releases(), 1);

        allocators.clean_up(clock.next_value() - 1);
        assert_eq!(null.live_resources(), 1);

        allocators.clean_up(clock.next_value());
        assert_eq!(allocators.pending_releases(), 0);
        assert_eq!(null.live_resources(), 0);
    }
}
