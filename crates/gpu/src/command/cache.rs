//! Staging of root signature arguments between draws.
//!
//! Bindings are collected here as draws are recorded and only turned into
//! native calls when the context applies them. Root buffers are tracked per
//! slot. Descriptor tables are tracked as a whole per stage, since they are
//! copied into the online heap in one piece.

use smallvec::SmallVec;
use structures::FlagVec;

use crate::{
    hal::{CpuDescriptor, PipelineKind},
    resource::{Resource, ResourceState},
    shader::ShaderStage,
};

/// Root arguments are limited to 64 DWORDs. Every stage may use two tables
/// (one DWORD each), and root buffers take two DWORDs, which leaves room for
/// `(64 - 2 * 8) / 2` of them.
pub const ROOT_BUFFER_CAPACITY: usize = 24;
pub const SRV_UAV_TABLE_CAPACITY: usize = 64;
pub const SAMPLER_TABLE_CAPACITY: usize = 16;

/// Root CBV and SRV addresses, indexed by root parameter.
pub struct RootBufferCache {
    count: usize,
    addresses: [u64; ROOT_BUFFER_CAPACITY],
    constant: FlagVec,
    dirty: FlagVec,
}

impl Default for RootBufferCache {
    fn default() -> Self {
        Self {
            count: 0,
            addresses: [0; ROOT_BUFFER_CAPACITY],
            constant: FlagVec::with_capacity(ROOT_BUFFER_CAPACITY),
            dirty: FlagVec::with_capacity(ROOT_BUFFER_CAPACITY),
        }
    }
}

impl RootBufferCache {
    pub fn reset(&mut self) {
        self.count = 0;
        self.addresses = [0; ROOT_BUFFER_CAPACITY];
        self.constant.clear_all();
        self.dirty.clear_all();
    }

    /// One past the highest index set since the last reset.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn set(&mut self, index: usize, address: u64, is_constant_buffer: bool) {
        assert!(index < ROOT_BUFFER_CAPACITY, "root buffer index {index} out of range");

        if index < self.count
            && self.addresses[index] == address
            && self.constant.get(index) == is_constant_buffer
        {
            return;
        }

        self.count = self.count.max(index + 1);
        self.addresses[index] = address;
        self.constant.set(index, is_constant_buffer);
        self.dirty.set(index, true);
    }

    /// `(address, is constant buffer)`
    pub fn get(&self, index: usize) -> (u64, bool) {
        assert!(index < self.count);
        (self.addresses[index], self.constant.get(index))
    }

    pub fn is_dirty(&self, index: usize) -> bool {
        self.dirty.get(index)
    }

    /// The dirty slots, in ascending order.
    pub fn dirty(&self) -> impl Iterator<Item = (u32, u64, bool)> + '_ {
        self.dirty
            .iter_ones()
            .filter(|i| *i < self.count)
            .map(|i| (i as u32, self.addresses[i], self.constant.get(i)))
    }

    /// Clears the dirty bits once the slots have been written.
    pub fn apply(&mut self) {
        self.dirty.clear_all();
    }
}

/// Offline descriptors of one descriptor table.
pub struct DescriptorTableCache<const N: usize> {
    handles: [CpuDescriptor; N],
    null: CpuDescriptor,
    count: usize,
    dirty: bool,
}

impl<const N: usize> Default for DescriptorTableCache<N> {
    fn default() -> Self {
        Self {
            handles: [CpuDescriptor::default(); N],
            null: CpuDescriptor::default(),
            count: 0,
            dirty: false,
        }
    }
}

impl<const N: usize> DescriptorTableCache<N> {
    pub fn reset(&mut self) {
        self.count = 0;
        self.dirty = false;
    }

    /// The descriptor copied into slots that nothing is bound to.
    pub fn set_null(&mut self, null: CpuDescriptor) {
        self.null = null;
    }

    pub fn set(&mut self, index: usize, handle: CpuDescriptor) {
        assert!(index < N, "descriptor table index {index} out of range");

        if index < self.count && self.handles[index] == handle {
            return;
        }

        // The table is copied in one piece, so unset slots below `index`
        // point at the null descriptor.
        for slot in self.count..index {
            self.handles[slot] = self.null;
        }

        self.handles[index] = handle;
        self.count = self.count.max(index + 1);
        self.dirty = true;
    }

    pub fn handles(&self) -> &[CpuDescriptor] {
        &self.handles[..self.count]
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }
}

#[derive(Default)]
pub struct StageCache {
    pub buffers: RootBufferCache,
    pub srv_uav: DescriptorTableCache<SRV_UAV_TABLE_CAPACITY>,
    pub samplers: DescriptorTableCache<SAMPLER_TABLE_CAPACITY>,
}

impl StageCache {
    pub fn reset(&mut self) {
        self.buffers.reset();
        self.srv_uav.reset();
        self.samplers.reset();
    }
}

/// Per-stage caches of one pipeline kind plus the states the bound resources
/// need before the next draw or dispatch.
pub struct ParameterCache {
    kind: PipelineKind,
    stages: SmallVec<[StageCache; 2]>,
    required_states: Vec<(Resource, ResourceState)>,
}

impl ParameterCache {
    pub fn new(kind: PipelineKind) -> Self {
        let stages = ShaderStage::of_kind(kind).iter().map(|_| StageCache::default()).collect();

        Self {
            kind,
            stages,
            required_states: Vec::new(),
        }
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    pub fn stages(&self) -> &[StageCache] {
        &self.stages
    }

    pub fn stages_mut(&mut self) -> &mut [StageCache] {
        &mut self.stages
    }

    pub fn stage(&self, stage: ShaderStage) -> &StageCache {
        &self.stages[stage.index_in(self.kind)]
    }

    /// Sets the descriptors that fill unbound view and sampler slots.
    pub fn set_null_descriptors(&mut self, view: CpuDescriptor, sampler: CpuDescriptor) {
        for stage in &mut self.stages {
            stage.srv_uav.set_null(view);
            stage.samplers.set_null(sampler);
        }
    }

    pub fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
        self.required_states.clear();
    }

    pub fn set_buffer(
        &mut self,
        stage: ShaderStage,
        root_index: u32,
        resource: &Resource,
        address: u64,
        is_constant_buffer: bool,
    ) {
        let state = if is_constant_buffer {
            ResourceState::VERTEX_AND_CONSTANT_BUFFER
        } else {
            stage.shader_resource_state()
        };

        self.stages[stage.index_in(self.kind)]
            .buffers
            .set(root_index as usize, address, is_constant_buffer);
        self.require(resource, state);
    }

    pub fn set_srv(&mut self, stage: ShaderStage, slot: u32, resource: &Resource, descriptor: CpuDescriptor) {
        self.stages[stage.index_in(self.kind)]
            .srv_uav
            .set(slot as usize, descriptor);
        self.require(resource, stage.shader_resource_state());
    }

    pub fn set_uav(&mut self, stage: ShaderStage, slot: u32, resource: &Resource, descriptor: CpuDescriptor) {
        self.stages[stage.index_in(self.kind)]
            .srv_uav
            .set(slot as usize, descriptor);
        self.require(resource, ResourceState::UNORDERED_ACCESS);
    }

    pub fn set_sampler(&mut self, stage: ShaderStage, slot: u32, descriptor: CpuDescriptor) {
        self.stages[stage.index_in(self.kind)]
            .samplers
            .set(slot as usize, descriptor);
    }

    /// Forces every non-empty table to be copied again, as needed after the
    /// online heaps change.
    pub fn mark_tables_dirty(&mut self) {
        for stage in &mut self.stages {
            stage.srv_uav.set_dirty(!stage.srv_uav.is_empty());
            stage.samplers.set_dirty(!stage.samplers.is_empty());
        }
    }

    pub fn has_dirty_tables(&self) -> bool {
        self.stages
            .iter()
            .any(|s| s.srv_uav.is_dirty() || s.samplers.is_dirty())
    }

    pub fn required_states(&self) -> &[(Resource, ResourceState)] {
        &self.required_states
    }

    pub fn take_required_states(&mut self) -> Vec<(Resource, ResourceState)> {
        std::mem::take(&mut self.required_states)
    }

    fn require(&mut self, resource: &Resource, state: ResourceState) {
        match self
            .required_states
            .iter_mut()
            .find(|(r, _)| r.ptr_eq(resource))
        {
            Some((_, required)) => *required = required.with(state),
            None => self.required_states.push((resource.clone(), state)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_buffers_track_changes() {
        let mut cache = RootBufferCache::default();
        cache.set(2, 0x1000, true);
        assert_eq!(cache.len(), 3);
        assert!(cache.is_dirty(2));
        assert!(!cache.is_dirty(0));

        cache.apply();
        cache.set(2, 0x1000, true);
        assert_eq!(cache.dirty().count(), 0);

        cache.set(2, 0x1000, false);
        assert_eq!(cache.dirty().collect::<Vec<_>>(), vec![(2, 0x1000, false)]);

        cache.reset();
        assert!(cache.is_empty());
    }

    #[test]
    fn tables_dirty_on_change_only() {
        let mut table = DescriptorTableCache::<4>::default();
        table.set_null(CpuDescriptor(8));
        table.set(1, CpuDescriptor(64));
        assert!(table.is_dirty());
        assert_eq!(table.handles(), &[CpuDescriptor(8), CpuDescriptor(64)]);

        table.set_dirty(false);
        table.set(1, CpuDescriptor(64));
        assert!(!table.is_dirty());

        table.set(0, CpuDescriptor(32));
        assert!(table.is_dirty());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn unbound_slots_use_null_descriptors() {
        let mut cache = ParameterCache::new(PipelineKind::Compute);
        cache.set_null_descriptors(CpuDescriptor(8), CpuDescriptor(16));

        let stage = &mut cache.stages_mut()[0];
        stage.srv_uav.set(2, CpuDescriptor(64));
        stage.samplers.set(1, CpuDescriptor(96));
        assert_eq!(
            stage.srv_uav.handles(),
            &[CpuDescriptor(8), CpuDescriptor(8), CpuDescriptor(64)]
        );
        assert_eq!(stage.samplers.handles(), &[CpuDescriptor(16), CpuDescriptor(96)]);
    }

    #[test]
    fn heap_change_dirties_only_used_tables() {
        let mut cache = ParameterCache::new(PipelineKind::Graphics);
        cache.stages_mut()[1].srv_uav.set(0, CpuDescriptor(32));
        cache.stages_mut()[1].srv_uav.set_dirty(false);
        assert!(!cache.has_dirty_tables());

        cache.mark_tables_dirty();
        assert!(cache.stage(ShaderStage::Pixel).srv_uav.is_dirty());
        assert!(!cache.stage(ShaderStage::Vertex).srv_uav.is_dirty());
        assert!(!cache.stage(ShaderStage::Pixel).samplers.is_dirty());
    }
}
