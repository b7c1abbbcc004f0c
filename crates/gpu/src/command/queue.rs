use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

use crate::{
    hal::{self, QueueDesc, QueueType},
    sync::{Fence, SyncPoint},
    Result,
};

/// A hardware queue, the fence it signals after every submission, and the
/// command allocators waiting for that fence.
pub struct CommandQueue {
    ty: QueueType,
    device: Arc<dyn hal::Device>,
    raw: Box<dyn hal::Queue>,
    fence: Arc<Fence>,
    allocators: Mutex<VecDeque<(u64, Box<dyn hal::CommandAllocator>)>>,
    allocator_count: AtomicUsize,
}

impl CommandQueue {
    pub fn new(device: Arc<dyn hal::Device>, ty: QueueType, desc: &QueueDesc) -> Result<Self> {
        let raw = device.create_queue(ty, desc, &format!("{}Queue", ty.name()))?;
        let fence = Arc::new(Fence::new(device.as_ref(), format!("{}QueueFence", ty.name()))?);
        log::debug!("created {} queue", ty.name());

        Ok(Self {
            ty,
            device,
            raw,
            fence,
            allocators: Mutex::new(VecDeque::new()),
            allocator_count: AtomicUsize::new(0),
        })
    }

    pub fn ty(&self) -> QueueType {
        self.ty
    }

    pub fn raw(&self) -> &dyn hal::Queue {
        self.raw.as_ref()
    }

    pub fn fence(&self) -> &Arc<Fence> {
        &self.fence
    }

    /// Native allocators created so far.
    pub fn allocator_count(&self) -> usize {
        self.allocator_count.load(Ordering::Acquire)
    }

    /// Allocators waiting in the pool, whether or not they can be reused yet.
    pub fn pooled_allocator_count(&self) -> usize {
        self.allocators.lock().len()
    }

    /// Returns a reset allocator whose previous commands the GPU has finished
    /// with, or a new one.
    pub fn request_allocator(&self) -> Result<Box<dyn hal::CommandAllocator>> {
        {
            let mut allocators = self.allocators.lock();
            if let Some((value, _)) = allocators.front() {
                if self.fence.is_completed(*value) {
                    if let Some((_, allocator)) = allocators.pop_front() {
                        allocator.reset()?;
                        return Ok(allocator);
                    }
                }
            }
        }

        let allocator = self.device.create_command_allocator(self.ty)?;
        let count = self.allocator_count.fetch_add(1, Ordering::AcqRel) + 1;
        log::trace!("{} queue creates command allocator {}", self.ty.name(), count);
        Ok(allocator)
    }

    /// Signals the queue fence and pools `allocator` until the GPU reaches
    /// the signalled value.
    pub fn release_allocator(&self, allocator: Box<dyn hal::CommandAllocator>) -> Result<SyncPoint> {
        let sync_point = self.create_sync_point()?;
        self.allocators.lock().push_back((sync_point.value(), allocator));
        Ok(sync_point)
    }

    /// Signals the next fence value once everything submitted so far has run.
    pub fn create_sync_point(&self) -> Result<SyncPoint> {
        let value = self.fence.signal_next_on_gpu(self.raw.as_ref())?;
        Ok(SyncPoint::new(self.fence.clone(), value))
    }

    /// Makes this queue wait for `sync_point` without blocking the host.
    pub fn wait_on_gpu(&self, sync_point: &SyncPoint) -> Result<()> {
        sync_point.wait_gpu(self.raw.as_ref())
    }

    pub fn execute(&self, lists: &[&dyn hal::CommandList]) -> Result<()> {
        self.raw.execute(lists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::null;

    #[test]
    fn allocators_wait_for_their_fence() {
        let null = Arc::new(null::Device::new());
        let queue = CommandQueue::new(null.clone(), QueueType::Direct, &QueueDesc::default()).unwrap();

        null.pause();
        let first = queue.request_allocator().unwrap();
        let sync_point = queue.release_allocator(first).unwrap();
        assert!(!sync_point.is_completed());

        // still in flight, so a second one is created
        let second = queue.request_allocator().unwrap();
        assert_eq!(queue.allocator_count(), 2);
        queue.release_allocator(second).unwrap();

        null.resume();
        let _reused = queue.request_allocator().unwrap();
        assert_eq!(queue.allocator_count(), 2);
        assert_eq!(queue.pooled_allocator_count(), 1);
    }
}
