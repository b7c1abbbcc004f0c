//! Fences, sync points and fence-keyed release queues.

use std::{
    collections::VecDeque,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

use crate::{hal, Result};

/// A monotonically increasing 64-bit counter signalled by a queue or by the
/// host.
///
/// `completed <= last signalled <= next_value - 1` always holds, and the
/// cached completed value never decreases.
pub struct Fence {
    raw: Box<dyn hal::Fence>,
    name: String,
    next_value: AtomicU64,
    last_completed: AtomicU64,
    wait_lock: Mutex<()>,
}

impl Fence {
    pub fn new(device: &dyn hal::Device, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let raw = device.create_fence(0, &name)?;

        Ok(Self {
            raw,
            name,
            next_value: AtomicU64::new(1),
            last_completed: AtomicU64::new(0),
            wait_lock: Mutex::new(()),
        })
    }

    pub fn raw(&self) -> &dyn hal::Fence {
        self.raw.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The value the next signal will use.
    pub fn next_value(&self) -> u64 {
        self.next_value.load(Ordering::Acquire)
    }

    pub fn last_signalled(&self) -> u64 {
        self.next_value() - 1
    }

    /// Queries the native fence and returns the completed value.
    pub fn completed(&self) -> u64 {
        let value = self.raw.completed_value();
        self.last_completed.fetch_max(value, Ordering::AcqRel).max(value)
    }

    /// Returns true if the fence has reached `value`. The native fence is
    /// only queried when the cached value is behind.
    pub fn is_completed(&self, value: u64) -> bool {
        if value <= self.last_completed.load(Ordering::Acquire) {
            return true;
        }

        value <= self.completed()
    }

    /// Makes `queue` signal the next value once it has finished all work
    /// submitted so far.
    pub fn signal_next_on_gpu(&self, queue: &dyn hal::Queue) -> Result<u64> {
        let value = self.next_value.fetch_add(1, Ordering::AcqRel);
        queue.signal(self.raw.as_ref(), value)?;
        Ok(value)
    }

    pub fn signal_next_on_cpu(&self) -> Result<u64> {
        let value = self.next_value.fetch_add(1, Ordering::AcqRel);
        self.raw.signal(value)?;
        self.last_completed.fetch_max(value, Ordering::AcqRel);
        Ok(value)
    }

    /// Blocks until the fence reaches `value`.
    pub fn wait_cpu(&self, value: u64) -> Result<()> {
        if self.is_completed(value) {
            return Ok(());
        }

        let _guard = self.wait_lock.lock();

        if !self.is_completed(value) {
            self.raw.wait(value)?;
            self.last_completed.fetch_max(value, Ordering::AcqRel);
        }

        Ok(())
    }

    /// Makes `queue` wait for the fence to reach `value`. The host does not
    /// block.
    pub fn wait_gpu(&self, queue: &dyn hal::Queue, value: u64) -> Result<()> {
        queue.wait(self.raw.as_ref(), value)
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fence")
            .field("name", &self.name)
            .field("next_value", &self.next_value())
            .field("last_completed", &self.last_completed.load(Ordering::Relaxed))
            .finish()
    }
}

/// A fence paired with a value. The default sync point has no fence and is
/// always complete.
#[derive(Clone, Default)]
pub struct SyncPoint {
    fence: Option<Arc<Fence>>,
    value: u64,
}

impl SyncPoint {
    pub fn new(fence: Arc<Fence>, value: u64) -> Self {
        Self {
            fence: Some(fence),
            value,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.fence.is_some()
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn fence(&self) -> Option<&Arc<Fence>> {
        self.fence.as_ref()
    }

    pub fn is_completed(&self) -> bool {
        self.fence
            .as_ref()
            .map_or(true, |fence| fence.is_completed(self.value))
    }

    pub fn wait_cpu(&self) -> Result<()> {
        match &self.fence {
            Some(fence) => fence.wait_cpu(self.value),
            None => Ok(()),
        }
    }

    pub fn wait_gpu(&self, queue: &dyn hal::Queue) -> Result<()> {
        match &self.fence {
            Some(fence) => fence.wait_gpu(queue, self.value),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for SyncPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.fence {
            Some(fence) => write!(f, "SyncPoint({}, {})", fence.name(), self.value),
            None => f.write_str("SyncPoint(none)"),
        }
    }
}

/// A FIFO of items waiting for a fence value to complete.
///
/// Keys are expected in non-decreasing order. Draining stops at the first
/// item whose key has not been reached, so an out-of-order key only delays
/// the items behind it.
pub struct ReleaseQueue<T> {
    items: Mutex<VecDeque<(u64, T)>>,
}

impl<T> Default for ReleaseQueue<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }
}

impl<T> ReleaseQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, key: u64, item: T) {
        self.items.lock().push_back((key, item));
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Removes every item whose key is `<= completed`, in order.
    pub fn drain_completed(&self, completed: u64) -> Vec<T> {
        let mut items = self.items.lock();
        let count = items.iter().take_while(|(key, _)| *key <= completed).count();
        items.drain(..count).map(|(_, item)| item).collect()
    }

    /// Removes everything regardless of key.
    pub fn drain_all(&self) -> Vec<T> {
        self.items.lock().drain(..).map(|(_, item)| item).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{null, Device as _, QueueDesc, QueueType};

    #[test]
    fn fence_values() {
        let device = null::Device::new();
        let queue = device
            .create_queue(QueueType::Direct, &QueueDesc::default(), "queue")
            .unwrap();
        let fence = Fence::new(&device, "fence").unwrap();

        assert_eq!(fence.next_value(), 1);
        assert!(fence.is_completed(0));

        device.pause();
        let value = fence.signal_next_on_gpu(queue.as_ref()).unwrap();
        assert_eq!(value, 1);
        assert_eq!(fence.last_signalled(), 1);
        assert!(!fence.is_completed(1));

        let sync = SyncPoint::new(Arc::new(fence), value);
        assert!(!sync.is_completed());
        sync.wait_cpu().unwrap();
        assert!(sync.is_completed());

        assert!(SyncPoint::default().is_completed());
        assert!(SyncPoint::default().wait_cpu().is_ok());
    }

    #[test]
    fn cpu_signal_completes_immediately() {
        let device = null::Device::new();
        let fence = Fence::new(&device, "fence").unwrap();
        let value = fence.signal_next_on_cpu().unwrap();
        assert!(fence.is_completed(value));
        assert_eq!(fence.completed(), value);
    }

    #[test]
    fn release_queue_drains_prefix() {
        let queue = ReleaseQueue::new();
        queue.push(1, 'a');
        queue.push(2, 'b');
        queue.push(2, 'c');
        queue.push(4, 'd');

        assert!(queue.drain_completed(0).is_empty());
        assert_eq!(queue.drain_completed(2), vec!['a', 'b', 'c']);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain_all(), vec!['d']);
        assert!(queue.is_empty());
    }
}
