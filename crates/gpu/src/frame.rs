//! The three queues, the frame fences that pace them, and the pools of
//! command lists that contexts are built from.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    command::{CommandQueue, RecycledContext},
    hal::{self, QueueDesc, QueueType},
    sync::Fence,
    Result,
};

pub struct CommandManager {
    device: Arc<dyn hal::Device>,
    queues: [CommandQueue; 3],
    frame_fences: [Arc<Fence>; 3],
    contexts: [Mutex<Vec<RecycledContext>>; 3],
}

impl CommandManager {
    pub fn new(device: Arc<dyn hal::Device>, desc: &QueueDesc) -> Result<Self> {
        let queue = |ty| CommandQueue::new(device.clone(), ty, desc);
        let queues = [queue(QueueType::Direct)?, queue(QueueType::Compute)?, queue(QueueType::Copy)?];

        let fence = |ty: QueueType| -> Result<Arc<Fence>> {
            Ok(Arc::new(Fence::new(device.as_ref(), format!("{}FrameFence", ty.name()))?))
        };
        let frame_fences = [fence(QueueType::Direct)?, fence(QueueType::Compute)?, fence(QueueType::Copy)?];

        Ok(Self {
            device,
            queues,
            frame_fences,
            contexts: Default::default(),
        })
    }

    pub fn queue(&self, ty: QueueType) -> &CommandQueue {
        &self.queues[ty.index()]
    }

    pub fn frame_fence(&self, ty: QueueType) -> &Arc<Fence> {
        &self.frame_fences[ty.index()]
    }

    /// The fence whose next value keys every deferred release.
    pub fn clock(&self) -> &Arc<Fence> {
        self.frame_fence(QueueType::Direct)
    }

    /// Idle command lists waiting to be reused for `ty`.
    pub fn pooled_context_count(&self, ty: QueueType) -> usize {
        self.contexts[ty.index()].lock().len()
    }

    /// An allocator and an open command list recording into it.
    pub(crate) fn request(&self, ty: QueueType) -> Result<(Box<dyn hal::CommandAllocator>, RecycledContext)> {
        let allocator = self.queue(ty).request_allocator()?;
        let pooled = self.contexts[ty.index()].lock().pop();

        let context = match pooled {
            Some(mut context) => {
                context.list.reset(allocator.as_ref())?;
                context
            }
            None => {
                log::trace!("creating {} command list", ty.name());
                let list = self.device.create_command_list(ty, allocator.as_ref())?;
                RecycledContext::new(ty, list)
            }
        };

        Ok((allocator, context))
    }

    pub(crate) fn recycle(&self, context: RecycledContext) {
        self.contexts[context.ty.index()].lock().push(context);
    }

    /// The value every frame fence signals next. The fences move in lock
    /// step, so this is also the key of anything released right now.
    pub fn next_frame_fence(&self) -> u64 {
        self.clock().next_value()
    }

    /// The highest frame every queue has finished.
    pub fn completed_frame_fence(&self) -> u64 {
        self.frame_fences
            .iter()
            .map(|fence| fence.completed())
            .min()
            .unwrap_or(0)
    }

    /// Signals the next value of every frame fence on its queue, and with
    /// `wait` blocks until all of them have been reached.
    pub fn signal_next_frame_fence(&self, wait: bool) -> Result<u64> {
        let value = self.next_frame_fence();

        for (queue, fence) in self.queues.iter().zip(&self.frame_fences) {
            let signalled = fence.signal_next_on_gpu(queue.raw())?;
            debug_assert_eq!(signalled, value, "frame fences out of step");
        }

        if wait {
            for fence in &self.frame_fences {
                fence.wait_cpu(value)?;
            }
        }

        Ok(value)
    }

    /// Blocks until every queue has finished everything submitted so far.
    pub fn wait_for_gpu_idle(&self) -> Result<()> {
        for queue in &self.queues {
            queue.create_sync_point()?.wait_cpu()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for CommandManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandManager")
            .field("frame_fences", &self.frame_fences)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::null;

    #[test]
    fn frame_fences_move_together() {
        let null = Arc::new(null::Device::new());
        let commands = CommandManager::new(null.clone(), &QueueDesc::default()).unwrap();
        assert_eq!(commands.next_frame_fence(), 1);
        assert_eq!(commands.completed_frame_fence(), 0);

        null.pause();
        assert_eq!(commands.signal_next_frame_fence(false).unwrap(), 1);
        assert_eq!(commands.next_frame_fence(), 2);
        assert_eq!(commands.completed_frame_fence(), 0);

        null.resume();
        assert_eq!(commands.completed_frame_fence(), 1);

        assert_eq!(commands.signal_next_frame_fence(true).unwrap(), 2);
        for ty in QueueType::ALL {
            assert_eq!(commands.frame_fence(ty).completed(), 2);
        }
    }

    #[test]
    fn command_lists_are_pooled() {
        let null = Arc::new(null::Device::new());
        let commands = CommandManager::new(null, &QueueDesc::default()).unwrap();

        let (allocator, mut context) = commands.request(QueueType::Copy).unwrap();
        assert_eq!(commands.pooled_context_count(QueueType::Copy), 0);

        context.list.close().unwrap();
        commands.queue(QueueType::Copy).release_allocator(allocator).unwrap();
        commands.recycle(context);
        assert_eq!(commands.pooled_context_count(QueueType::Copy), 1);

        let (_allocator, context) = commands.request(QueueType::Copy).unwrap();
        assert_eq!(context.ty, QueueType::Copy);
        assert_eq!(commands.pooled_context_count(QueueType::Copy), 0);
        assert_eq!(commands.queue(QueueType::Copy).allocator_count(), 1);
    }
}
