//! Reference-counted GPU resources and their tracked states.

use std::{fmt, ptr::NonNull, sync::Arc};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::{
    hal::{HeapType, NativeResource, ResourceDesc, ALL_SUBRESOURCES},
    memory::{LinearAllocation, MultiBuddyAllocation},
    Result,
};

/// The usage state of a resource, with the same bit values as
/// `D3D12_RESOURCE_STATES`.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ResourceState(u32);

impl ResourceState {
    pub const COMMON: Self = Self(0);
    pub const VERTEX_AND_CONSTANT_BUFFER: Self = Self(0x1);
    pub const INDEX_BUFFER: Self = Self(0x2);
    pub const RENDER_TARGET: Self = Self(0x4);
    pub const UNORDERED_ACCESS: Self = Self(0x8);
    pub const DEPTH_WRITE: Self = Self(0x10);
    pub const DEPTH_READ: Self = Self(0x20);
    pub const NON_PIXEL_SHADER_RESOURCE: Self = Self(0x40);
    pub const PIXEL_SHADER_RESOURCE: Self = Self(0x80);
    pub const STREAM_OUT: Self = Self(0x100);
    pub const INDIRECT_ARGUMENT: Self = Self(0x200);
    pub const COPY_DEST: Self = Self(0x400);
    pub const COPY_SOURCE: Self = Self(0x800);
    pub const RESOLVE_DEST: Self = Self(0x1000);
    pub const RESOLVE_SOURCE: Self = Self(0x2000);
    pub const GENERIC_READ: Self = Self(0x1 | 0x2 | 0x40 | 0x80 | 0x200 | 0x800);
    pub const ALL_SHADER_RESOURCE: Self = Self(0x40 | 0x80);
    pub const PREDICATION: Self = Self::INDIRECT_ARGUMENT;

    const NAMES: [(Self, &'static str); 15] = [
        (Self::VERTEX_AND_CONSTANT_BUFFER, "VERTEX_AND_CONSTANT_BUFFER"),
        (Self::INDEX_BUFFER, "INDEX_BUFFER"),
        (Self::RENDER_TARGET, "RENDER_TARGET"),
        (Self::UNORDERED_ACCESS, "UNORDERED_ACCESS"),
        (Self::DEPTH_WRITE, "DEPTH_WRITE"),
        (Self::DEPTH_READ, "DEPTH_READ"),
        (Self::NON_PIXEL_SHADER_RESOURCE, "NON_PIXEL_SHADER_RESOURCE"),
        (Self::PIXEL_SHADER_RESOURCE, "PIXEL_SHADER_RESOURCE"),
        (Self::STREAM_OUT, "STREAM_OUT"),
        (Self::INDIRECT_ARGUMENT, "INDIRECT_ARGUMENT"),
        (Self::COPY_DEST, "COPY_DEST"),
        (Self::COPY_SOURCE, "COPY_SOURCE"),
        (Self::RESOLVE_DEST, "RESOLVE_DEST"),
        (Self::RESOLVE_SOURCE, "RESOLVE_SOURCE"),
        (Self::COMMON, "COMMON"),
    ];

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_common(self) -> bool {
        self.0 == 0
    }

    /// True if every bit of `other` is set in `self`.
    pub const fn has_all(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn has_any(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Whether going from `self` to `after` needs a barrier.
    ///
    /// `COMMON` is zero, so it has to be compared directly. Otherwise a
    /// resource already in a superset of the requested read states stays put.
    pub const fn needs_transition_to(self, after: Self) -> bool {
        if self.is_common() || after.is_common() {
            self.0 != after.0
        } else {
            !self.has_all(after)
        }
    }
}

impl fmt::Debug for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_common() {
            return f.write_str("COMMON");
        }

        let mut first = true;
        for (state, name) in Self::NAMES {
            if !state.is_common() && self.has_all(state) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }

        let unknown = Self::NAMES
            .iter()
            .fold(*self, |acc, (state, _)| acc.without(*state));
        if !unknown.is_common() {
            if !first {
                f.write_str(" | ")?;
            }
            write!(f, "{:#x}", unknown.0)?;
        }

        Ok(())
    }
}

/// The tracked state of every subresource of a resource.
///
/// Most resources are transitioned as a whole, so the per-subresource array
/// is only materialised once a single subresource diverges.
#[derive(Clone, Debug)]
pub struct StateTracker {
    uniform: ResourceState,
    per_subresource: SmallVec<[ResourceState; 1]>,
    all_equal: bool,
    locked: bool,
}

impl StateTracker {
    pub fn new(initial: ResourceState, subresource_count: u32) -> Self {
        Self {
            uniform: initial,
            per_subresource: SmallVec::from_elem(initial, subresource_count.max(1) as usize),
            all_equal: true,
            locked: false,
        }
    }

    pub fn subresource_count(&self) -> u32 {
        self.per_subresource.len() as u32
    }

    pub fn all_equal(&self) -> bool {
        self.all_equal
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// The state of one subresource, or the common state of all of them when
    /// `subresource` is `ALL_SUBRESOURCES`. Returns `None` in the latter case
    /// if the subresources disagree.
    pub fn get(&self, subresource: u32) -> Option<ResourceState> {
        if self.all_equal {
            Some(self.uniform)
        } else if subresource == ALL_SUBRESOURCES {
            None
        } else {
            Some(self.per_subresource[subresource as usize])
        }
    }

    pub fn set(&mut self, subresource: u32, state: ResourceState) {
        if self.locked {
            return;
        }

        if subresource == ALL_SUBRESOURCES {
            self.uniform = state;
            self.all_equal = true;
            return;
        }

        if self.all_equal {
            if self.uniform == state {
                return;
            }
            self.per_subresource.iter_mut().for_each(|s| *s = self.uniform);
            self.all_equal = false;
        }

        self.per_subresource[subresource as usize] = state;

        if self.per_subresource.iter().all(|s| *s == state) {
            self.uniform = state;
            self.all_equal = true;
        }
    }

    /// Pins the resource in `state`. Later `set` calls are ignored.
    pub fn lock(&mut self, state: ResourceState) {
        self.set(ALL_SUBRESOURCES, state);
        self.locked = true;
    }

    /// Every `(subresource, state)` pair, or a single `(ALL_SUBRESOURCES,
    /// state)` when they agree.
    pub fn states(&self) -> SmallVec<[(u32, ResourceState); 1]> {
        if self.all_equal {
            smallvec::smallvec![(ALL_SUBRESOURCES, self.uniform)]
        } else {
            self.per_subresource
                .iter()
                .enumerate()
                .map(|(i, s)| (i as u32, *s))
                .collect()
        }
    }
}

/// Identifies the block a resource occupies so its allocator can free it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Allocation {
    /// The resource owns its memory.
    Committed,
    Placed(MultiBuddyAllocation),
    UploadBuddy(MultiBuddyAllocation),
    UploadLinear(LinearAllocation),
}

/// Something that produced a resource and wants it back when the last
/// reference goes away.
pub trait ResourceAllocator: Send + Sync {
    /// Called exactly once per resource, from whichever thread dropped the
    /// last reference. The allocator must keep `raw` alive until the GPU is
    /// done with it.
    fn release(&self, raw: Arc<dyn NativeResource>, allocation: Allocation);
}

struct Inner {
    raw: Arc<dyn NativeResource>,
    name: String,
    heap_type: HeapType,
    /// Offset of this resource inside `raw`. Non-zero only for upload
    /// sub-allocations.
    offset: u64,
    size: u64,
    state: Mutex<StateTracker>,
    allocation: Allocation,
    allocator: Option<Arc<dyn ResourceAllocator>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(allocator) = self.allocator.take() {
            allocator.release(self.raw.clone(), self.allocation);
        }
    }
}

/// A GPU resource shared by reference count.
///
/// When the last clone is dropped the resource is handed back to the
/// allocator that produced it, which defers destroying the native object
/// until the GPU has passed the current frame.
#[derive(Clone)]
pub struct Resource {
    inner: Arc<Inner>,
}

pub struct ResourceInit {
    pub raw: Arc<dyn NativeResource>,
    pub name: String,
    pub heap_type: HeapType,
    pub offset: u64,
    pub size: u64,
    pub initial_state: ResourceState,
    pub allocation: Allocation,
    pub allocator: Option<Arc<dyn ResourceAllocator>>,
}

impl Resource {
    pub fn new(init: ResourceInit) -> Self {
        let subresources = init.raw.desc().subresource_count();
        let mut state = StateTracker::new(init.initial_state, subresources);

        match init.heap_type {
            HeapType::Upload => state.lock(ResourceState::GENERIC_READ),
            HeapType::Readback => state.lock(ResourceState::COPY_DEST),
            HeapType::Default => {}
        }

        Self {
            inner: Arc::new(Inner {
                raw: init.raw,
                name: init.name,
                heap_type: init.heap_type,
                offset: init.offset,
                size: init.size,
                state: Mutex::new(state),
                allocation: init.allocation,
                allocator: init.allocator,
            }),
        }
    }

    /// Wraps a native resource nobody allocated, such as a swap chain buffer.
    pub fn external(raw: Arc<dyn NativeResource>, name: impl Into<String>, state: ResourceState) -> Self {
        let size = raw.desc().width;
        Self::new(ResourceInit {
            raw,
            name: name.into(),
            heap_type: HeapType::Default,
            offset: 0,
            size,
            initial_state: state,
            allocation: Allocation::Committed,
            allocator: None,
        })
    }

    pub fn raw(&self) -> &dyn NativeResource {
        self.inner.raw.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn desc(&self) -> &ResourceDesc {
        self.inner.raw.desc()
    }

    pub fn heap_type(&self) -> HeapType {
        self.inner.heap_type
    }

    pub fn allocation(&self) -> Allocation {
        self.inner.allocation
    }

    /// Offset of this resource's data inside the native resource.
    pub fn offset(&self) -> u64 {
        self.inner.offset
    }

    pub fn size(&self) -> u64 {
        self.inner.size
    }

    pub fn gpu_address(&self) -> u64 {
        self.inner.raw.gpu_address() + self.inner.offset
    }

    pub fn subresource_count(&self) -> u32 {
        self.inner.raw.desc().subresource_count()
    }

    pub fn state(&self, subresource: u32) -> Option<ResourceState> {
        self.inner.state.lock().get(subresource)
    }

    pub fn set_state(&self, subresource: u32, state: ResourceState) {
        self.inner.state.lock().set(subresource, state);
    }

    pub fn states(&self) -> SmallVec<[(u32, ResourceState); 1]> {
        self.inner.state.lock().states()
    }

    pub fn lock_state(&self, state: ResourceState) {
        self.inner.state.lock().lock(state);
    }

    pub fn is_state_locked(&self) -> bool {
        self.inner.state.lock().is_locked()
    }

    /// Maps the resource for host access. The pointer is already offset to
    /// the start of this resource's range.
    pub fn map(&self) -> Result<NonNull<u8>> {
        let ptr = self.inner.raw.map()?;
        // SAFETY: offset + size lies within the native allocation.
        Ok(unsafe { NonNull::new_unchecked(ptr.as_ptr().add(self.inner.offset as usize)) })
    }

    pub fn unmap(&self) {
        self.inner.raw.unmap();
    }

    /// Copies `data` into the resource at `offset`. Only valid for resources
    /// in CPU-accessible heaps.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        assert!(
            offset + data.len() as u64 <= self.inner.size,
            "write of {} bytes at {} overflows {} ({} bytes)",
            data.len(),
            offset,
            self.inner.name,
            self.inner.size
        );

        let ptr = self.map()?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr().add(offset as usize), data.len());
        }
        self.unmap();
        Ok(())
    }

    /// Copies `out.len()` bytes starting at `offset` out of the resource.
    pub fn read(&self, offset: u64, out: &mut [u8]) -> Result<()> {
        assert!(offset + out.len() as u64 <= self.inner.size);

        let ptr = self.map()?;
        unsafe {
            std::ptr::copy_nonoverlapping(ptr.as_ptr().add(offset as usize), out.as_mut_ptr(), out.len());
        }
        self.unmap();
        Ok(())
    }

    /// An identity usable as a map key for as long as the resource lives.
    pub fn key(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &Resource) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn native_ptr_eq(&self, other: &dyn NativeResource) -> bool {
        std::ptr::addr_eq(self.inner.raw.as_ref() as *const dyn NativeResource, other as *const _)
    }

    pub(crate) fn raw_arc(&self) -> &Arc<dyn NativeResource> {
        &self.inner.raw
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.inner.name)
            .field("heap_type", &self.inner.heap_type)
            .field("offset", &self.inner.offset)
            .field("size", &self.inner.size)
            .field("allocation", &self.inner.allocation)
            .finish()
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Resource {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_bits() {
        let read = ResourceState::GENERIC_READ;
        assert!(read.has_all(ResourceState::PIXEL_SHADER_RESOURCE));
        assert!(read.has_any(ResourceState::COPY_SOURCE.with(ResourceState::COPY_DEST)));
        assert!(!read.has_all(ResourceState::COPY_DEST));
        assert_eq!(
            read.without(ResourceState::ALL_SHADER_RESOURCE)
                .has_any(ResourceState::PIXEL_SHADER_RESOURCE),
            false
        );
        assert_eq!(
            format!("{:?}", ResourceState::COPY_DEST.with(ResourceState::PIXEL_SHADER_RESOURCE)),
            "PIXEL_SHADER_RESOURCE | COPY_DEST"
        );
    }

    #[test]
    fn transition_rule() {
        use ResourceState as S;
        assert!(S::COMMON.needs_transition_to(S::COPY_DEST));
        assert!(S::COPY_DEST.needs_transition_to(S::COMMON));
        assert!(!S::COMMON.needs_transition_to(S::COMMON));
        assert!(!S::GENERIC_READ.needs_transition_to(S::PIXEL_SHADER_RESOURCE));
        assert!(S::PIXEL_SHADER_RESOURCE.needs_transition_to(S::ALL_SHADER_RESOURCE));
        assert!(S::RENDER_TARGET.needs_transition_to(S::PIXEL_SHADER_RESOURCE));
    }

    #[test]
    fn tracker_splits_and_merges() {
        let mut tracker = StateTracker::new(ResourceState::COMMON, 3);
        assert_eq!(tracker.get(ALL_SUBRESOURCES), Some(ResourceState::COMMON));

        tracker.set(1, ResourceState::RENDER_TARGET);
        assert!(!tracker.all_equal());
        assert_eq!(tracker.get(ALL_SUBRESOURCES), None);
        assert_eq!(tracker.get(0), Some(ResourceState::COMMON));
        assert_eq!(tracker.get(1), Some(ResourceState::RENDER_TARGET));
        assert_eq!(tracker.states().len(), 3);

        tracker.set(0, ResourceState::RENDER_TARGET);
        tracker.set(2, ResourceState::RENDER_TARGET);
        assert!(tracker.all_equal());
        assert_eq!(tracker.get(2), Some(ResourceState::RENDER_TARGET));

        tracker.lock(ResourceState::GENERIC_READ);
        tracker.set(ALL_SUBRESOURCES, ResourceState::COPY_DEST);
        assert_eq!(tracker.get(0), Some(ResourceState::GENERIC_READ));
    }
}
