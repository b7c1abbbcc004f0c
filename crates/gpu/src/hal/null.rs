//! A device that runs entirely on the host.
//!
//! Resources are plain byte arrays, so copies and host mapping behave like
//! they would on hardware. Command lists record [`Command`] values instead of
//! native commands, and each queue keeps a log of the waits, executions and
//! signals issued on it.
//!
//! Queues complete work immediately unless the device is paused, in which case
//! fence signals issued by queues stay pending until [`Device::resume`] is
//! called. This models a GPU that is running behind the host. A blocking host
//! wait on a fence drains the pending signals, just as the host would
//! eventually observe the GPU catching up.

use std::{
    any::Any,
    collections::HashMap,
    ptr::NonNull,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

use super::{
    AllocationInfo, Barrier, ClearFlags, ClearValue, ComputePipelineDesc,
    CopyLocation, CpuDescriptor, DescriptorHeapType, Format, GpuDescriptor, GraphicsPipelineDesc,
    HeapDesc, HeapType, IndexBufferView, PipelineKind, PlacedFootprint,
    PredicationOp, PrimitiveTopology, QueueDesc, QueueType, ResourceDesc, ResourceDimension,
    RootSignatureDesc, SamplerDesc, ScissorRect, VertexBufferView, ViewDesc, Viewport,
    DEFAULT_PLACEMENT_ALIGNMENT, MSAA_PLACEMENT_ALIGNMENT,
};
use crate::{memory::align_up, resource::ResourceState, Error, Result};

const DESCRIPTOR_INCREMENT: u32 = 32;

type Memory = Arc<Mutex<Box<[u8]>>>;

/// The contents of one descriptor slot.
#[derive(Clone, Debug, PartialEq)]
pub enum Descriptor {
    View { resource: Option<u64>, view: ViewDesc },
    Sampler(SamplerDesc),
}

/// A recorded command.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Transition {
        resource: u64,
        subresource: u32,
        before: ResourceState,
        after: ResourceState,
    },
    UavBarrier {
        resource: Option<u64>,
    },
    SetPipelineState(u64),
    SetRootSignature(PipelineKind, u64),
    SetDescriptorHeaps {
        view: Option<CpuDescriptor>,
        sampler: Option<CpuDescriptor>,
    },
    SetRootDescriptorTable {
        kind: PipelineKind,
        index: u32,
        table: GpuDescriptor,
    },
    SetRootConstantBufferView {
        kind: PipelineKind,
        index: u32,
        address: u64,
    },
    SetRootShaderResourceView {
        kind: PipelineKind,
        index: u32,
        address: u64,
    },
    SetRenderTargets {
        colors: Vec<CpuDescriptor>,
        depth_stencil: Option<CpuDescriptor>,
    },
    ClearRenderTarget {
        rtv: CpuDescriptor,
        color: [f32; 4],
    },
    ClearDepthStencil {
        dsv: CpuDescriptor,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
    },
    SetViewports(Vec<Viewport>),
    SetScissorRects(Vec<ScissorRect>),
    SetStencilRef(u32),
    SetPrimitiveTopology(PrimitiveTopology),
    SetVertexBuffers {
        start_slot: u32,
        views: Vec<VertexBufferView>,
    },
    SetIndexBuffer(Option<IndexBufferView>),
    SetPredication(Option<(u64, u64, PredicationOp)>),
    DrawInstanced {
        vertex_count: u32,
        instance_count: u32,
        start_vertex: u32,
        start_instance: u32,
    },
    DrawIndexedInstanced {
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    CopyBufferRegion {
        dest: u64,
        dest_offset: u64,
        source: u64,
        source_offset: u64,
        size: u64,
    },
    CopyResource {
        dest: u64,
        source: u64,
    },
    CopyTextureRegion {
        dest: u64,
        source: u64,
    },
    ResolveSubresource {
        dest: u64,
        dest_subresource: u32,
        source: u64,
        source_subresource: u32,
        format: Format,
    },
}

impl Command {
    pub fn is_barrier(&self) -> bool {
        matches!(self, Command::Transition { .. } | Command::UavBarrier { .. })
    }

    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            Command::DrawInstanced { .. } | Command::DrawIndexedInstanced { .. }
        )
    }
}

/// Something a queue did, in the order it did it.
#[derive(Clone, Debug, PartialEq)]
pub enum QueueOp {
    Wait { fence: u64, value: u64 },
    Execute { commands: Vec<Command> },
    Signal { fence: u64, value: u64 },
}

struct Shared {
    removed: AtomicBool,
    paused: AtomicBool,
    pending_signals: Mutex<Vec<(Arc<AtomicU64>, u64)>>,
    descriptors: Mutex<HashMap<usize, Descriptor>>,
    next_descriptor_address: AtomicUsize,
    next_gpu_address: AtomicU64,
    next_id: AtomicU64,
    live_resources: AtomicUsize,
}

impl Shared {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn flush_pending(&self) {
        for (value, signalled) in self.pending_signals.lock().drain(..) {
            value.fetch_max(signalled, Ordering::AcqRel);
        }
    }
}

fn downcast<'a, T: 'static>(any: &'a dyn Any, what: &'static str) -> Result<&'a T> {
    any.downcast_ref::<T>().ok_or(Error::Backend {
        call: what,
        message: "object does not belong to the null backend".to_owned(),
    })
}

/// Panicking variant for recording calls, which cannot report errors.
fn expect_null<T: 'static>(any: &dyn Any) -> &T {
    match any.downcast_ref::<T>() {
        Some(object) => object,
        None => panic!("object does not belong to the null backend"),
    }
}

pub struct Device {
    shared: Arc<Shared>,
}

impl Default for Device {
    fn default() -> Self {
        Self::new()
    }
}

impl Device {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                removed: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                pending_signals: Mutex::new(Vec::new()),
                descriptors: Mutex::new(HashMap::new()),
                next_descriptor_address: AtomicUsize::new(0x10000),
                next_gpu_address: AtomicU64::new(0x1_0000_0000),
                next_id: AtomicU64::new(1),
                live_resources: AtomicUsize::new(0),
            }),
        }
    }

    /// Stops queues from completing fence signals until `resume`.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
    }

    /// Completes every pending signal and lets queues complete work
    /// immediately again.
    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
        self.shared.flush_pending();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    /// Simulates device removal. Every subsequent `check_removed` fails.
    pub fn remove(&self) {
        self.shared.removed.store(true, Ordering::Release);
    }

    /// The descriptor at a CPU or GPU address. Both address spaces coincide
    /// on this backend.
    pub fn descriptor(&self, address: u64) -> Option<Descriptor> {
        self.shared.descriptors.lock().get(&(address as usize)).cloned()
    }

    /// The number of native resources not yet destroyed.
    pub fn live_resources(&self) -> usize {
        self.shared.live_resources.load(Ordering::Acquire)
    }
}

impl super::Device for Device {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn check_removed(&self) -> Result<()> {
        if self.shared.removed.load(Ordering::Acquire) {
            Err(Error::DeviceRemoved("the null device was removed".to_owned()))
        } else {
            Ok(())
        }
    }

    fn create_fence(&self, initial_value: u64, _name: &str) -> Result<Box<dyn super::Fence>> {
        Ok(Box::new(Fence {
            id: self.shared.next_id(),
            value: Arc::new(AtomicU64::new(initial_value)),
            shared: self.shared.clone(),
        }))
    }

    fn create_queue(&self, ty: QueueType, _desc: &QueueDesc, _name: &str) -> Result<Box<dyn super::Queue>> {
        self.check_removed_()?;
        Ok(Box::new(Queue {
            ty,
            shared: self.shared.clone(),
            log: Mutex::new(Vec::new()),
        }))
    }

    fn create_command_allocator(&self, ty: QueueType) -> Result<Box<dyn super::CommandAllocator>> {
        Ok(Box::new(CommandAllocator {
            id: self.shared.next_id(),
            ty,
            resets: AtomicU32::new(0),
        }))
    }

    fn create_command_list(
        &self,
        ty: QueueType,
        allocator: &dyn super::CommandAllocator,
    ) -> Result<Box<dyn super::CommandList>> {
        let allocator = downcast::<CommandAllocator>(allocator.as_any(), "CreateCommandList")?;
        debug_assert_eq!(allocator.ty, ty);

        Ok(Box::new(CommandList {
            id: self.shared.next_id(),
            ty,
            closed: false,
            commands: Vec::new(),
            transfers: Vec::new(),
        }))
    }

    fn create_heap(&self, desc: &HeapDesc, _name: &str) -> Result<Box<dyn super::Heap>> {
        self.check_removed_()?;
        Ok(Box::new(Heap { desc: *desc }))
    }

    fn resource_allocation_info(&self, desc: &ResourceDesc) -> AllocationInfo {
        let alignment = if desc.sample_count > 1 {
            MSAA_PLACEMENT_ALIGNMENT
        } else {
            DEFAULT_PLACEMENT_ALIGNMENT
        };

        let bytes = if desc.is_buffer() {
            desc.width
        } else {
            super::linear_footprints(desc, 0, desc.subresource_count(), 0).1
                * u64::from(desc.sample_count.max(1))
        };

        AllocationInfo {
            size: align_up(bytes.max(1), alignment),
            alignment,
        }
    }

    fn create_committed_resource(
        &self,
        heap_type: HeapType,
        desc: &ResourceDesc,
        _initial_state: ResourceState,
        _clear_value: Option<&ClearValue>,
        _name: &str,
    ) -> Result<Box<dyn super::NativeResource>> {
        self.check_removed_()?;
        Ok(Box::new(self.make_resource(heap_type, desc)))
    }

    fn create_placed_resource(
        &self,
        heap: &dyn super::Heap,
        offset: u64,
        desc: &ResourceDesc,
        _initial_state: ResourceState,
        _clear_value: Option<&ClearValue>,
        _name: &str,
    ) -> Result<Box<dyn super::NativeResource>> {
        self.check_removed_()?;
        let heap = downcast::<Heap>(heap.as_any(), "CreatePlacedResource")?;
        let info = super::Device::resource_allocation_info(self, desc);

        if offset % info.alignment != 0 || offset + info.size > heap.desc.size {
            return Err(Error::Backend {
                call: "CreatePlacedResource",
                message: format!(
                    "resource of {} bytes does not fit at offset {} of a {} byte heap",
                    info.size, offset, heap.desc.size
                ),
            });
        }

        Ok(Box::new(self.make_resource(heap.desc.heap_type, desc)))
    }

    fn copyable_footprints(
        &self,
        desc: &ResourceDesc,
        first: u32,
        count: u32,
        base_offset: u64,
    ) -> (Vec<PlacedFootprint>, u64) {
        super::linear_footprints(desc, first, count, base_offset)
    }

    fn create_descriptor_heap(
        &self,
        ty: DescriptorHeapType,
        capacity: u32,
        shader_visible: bool,
        _name: &str,
    ) -> Result<Box<dyn super::DescriptorHeap>> {
        self.check_removed_()?;
        let bytes = align_up(u64::from(capacity) * u64::from(DESCRIPTOR_INCREMENT), 4096) as usize;
        let start = self
            .shared
            .next_descriptor_address
            .fetch_add(bytes, Ordering::Relaxed);

        Ok(Box::new(DescriptorHeap {
            ty,
            capacity,
            start,
            shader_visible,
            shared: self.shared.clone(),
        }))
    }

    fn descriptor_increment_size(&self, _ty: DescriptorHeapType) -> u32 {
        DESCRIPTOR_INCREMENT
    }

    fn create_view(&self, resource: Option<&dyn super::NativeResource>, view: &ViewDesc, dest: CpuDescriptor) {
        let resource = resource.map(|r| expect_null::<Resource>(r.as_any()).id);
        self.shared
            .descriptors
            .lock()
            .insert(dest.0, Descriptor::View { resource, view: *view });
    }

    fn create_sampler(&self, desc: &SamplerDesc, dest: CpuDescriptor) {
        self.shared
            .descriptors
            .lock()
            .insert(dest.0, Descriptor::Sampler(*desc));
    }

    fn copy_descriptors(&self, _ty: DescriptorHeapType, dest: CpuDescriptor, sources: &[CpuDescriptor]) {
        let mut descriptors = self.shared.descriptors.lock();

        for (i, source) in sources.iter().enumerate() {
            assert_ne!(source.0, 0, "copying from a null descriptor handle");
            let target = dest.offset(i as u32, DESCRIPTOR_INCREMENT).0;
            match descriptors.get(&source.0).cloned() {
                Some(descriptor) => descriptors.insert(target, descriptor),
                None => descriptors.remove(&target),
            };
        }
    }

    fn create_root_signature(&self, _desc: &RootSignatureDesc) -> Result<Box<dyn super::RootSignature>> {
        self.check_removed_()?;
        Ok(Box::new(RootSignature {
            id: self.shared.next_id(),
        }))
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> Result<Box<dyn super::PipelineState>> {
        self.check_removed_()?;
        downcast::<RootSignature>(desc.root_signature.as_any(), "CreateGraphicsPipelineState")?;

        if desc.vertex_shader.is_empty() {
            return Err(Error::PipelineCreation("missing vertex shader".to_owned()));
        }

        Ok(Box::new(PipelineState {
            id: self.shared.next_id(),
            kind: PipelineKind::Graphics,
            rtv_formats: desc.rtv_formats.to_vec(),
            dsv_format: desc.dsv_format,
            sample_count: desc.sample_count,
            depth_bias: desc.depth_bias,
            wireframe: desc.wireframe,
        }))
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> Result<Box<dyn super::PipelineState>> {
        self.check_removed_()?;
        downcast::<RootSignature>(desc.root_signature.as_any(), "CreateComputePipelineState")?;

        if desc.compute_shader.is_empty() {
            return Err(Error::PipelineCreation("missing compute shader".to_owned()));
        }

        Ok(Box::new(PipelineState {
            id: self.shared.next_id(),
            kind: PipelineKind::Compute,
            rtv_formats: Vec::new(),
            dsv_format: Format::Unknown,
            sample_count: 1,
            depth_bias: 0,
            wireframe: false,
        }))
    }
}

impl Device {
    fn check_removed_(&self) -> Result<()> {
        super::Device::check_removed(self)
    }

    fn make_resource(&self, heap_type: HeapType, desc: &ResourceDesc) -> Resource {
        let (layout, bytes) = if desc.is_buffer() {
            (Vec::new(), desc.width)
        } else {
            super::linear_footprints(desc, 0, desc.subresource_count(), 0)
        };

        let gpu_address = self
            .shared
            .next_gpu_address
            .fetch_add(align_up(bytes.max(1), DEFAULT_PLACEMENT_ALIGNMENT), Ordering::Relaxed);

        self.shared.live_resources.fetch_add(1, Ordering::AcqRel);

        Resource {
            id: self.shared.next_id(),
            desc: *desc,
            heap_type,
            gpu_address,
            layout,
            memory: Arc::new(Mutex::new(vec![0; bytes as usize].into_boxed_slice())),
            shared: self.shared.clone(),
        }
    }
}

pub struct Fence {
    id: u64,
    value: Arc<AtomicU64>,
    shared: Arc<Shared>,
}

impl Fence {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl super::Fence for Fence {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn completed_value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    fn signal(&self, value: u64) -> Result<()> {
        self.value.fetch_max(value, Ordering::AcqRel);
        Ok(())
    }

    fn wait(&self, value: u64) -> Result<()> {
        if self.completed_value() < value {
            self.shared.flush_pending();
        }

        if self.completed_value() < value {
            return Err(Error::Backend {
                call: "SetEventOnCompletion",
                message: format!("fence {} will never reach {}", self.id, value),
            });
        }

        Ok(())
    }
}

pub struct Queue {
    ty: QueueType,
    shared: Arc<Shared>,
    log: Mutex<Vec<QueueOp>>,
}

impl Queue {
    pub fn ty(&self) -> QueueType {
        self.ty
    }

    pub fn log(&self) -> Vec<QueueOp> {
        self.log.lock().clone()
    }

    /// Every command executed on this queue, in execution order.
    pub fn executed_commands(&self) -> Vec<Command> {
        self.log
            .lock()
            .iter()
            .filter_map(|op| match op {
                QueueOp::Execute { commands } => Some(commands.iter().cloned()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }
}

impl super::Queue for Queue {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn signal(&self, fence: &dyn super::Fence, value: u64) -> Result<()> {
        let fence = downcast::<Fence>(fence.as_any(), "ID3D12CommandQueue::Signal")?;
        self.log.lock().push(QueueOp::Signal {
            fence: fence.id,
            value,
        });

        if self.shared.paused.load(Ordering::Acquire) {
            self.shared
                .pending_signals
                .lock()
                .push((fence.value.clone(), value));
        } else {
            fence.value.fetch_max(value, Ordering::AcqRel);
        }

        Ok(())
    }

    fn wait(&self, fence: &dyn super::Fence, value: u64) -> Result<()> {
        let fence = downcast::<Fence>(fence.as_any(), "ID3D12CommandQueue::Wait")?;
        self.log.lock().push(QueueOp::Wait {
            fence: fence.id,
            value,
        });
        Ok(())
    }

    fn execute(&self, lists: &[&dyn super::CommandList]) -> Result<()> {
        for list in lists {
            let list = downcast::<CommandList>(list.as_any(), "ExecuteCommandLists")?;

            if !list.closed {
                return Err(Error::Backend {
                    call: "ExecuteCommandLists",
                    message: "command list was not closed".to_owned(),
                });
            }

            for transfer in &list.transfers {
                transfer.run();
            }

            self.log.lock().push(QueueOp::Execute {
                commands: list.commands.clone(),
            });
        }

        Ok(())
    }
}

pub struct CommandAllocator {
    id: u64,
    ty: QueueType,
    resets: AtomicU32,
}

impl CommandAllocator {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn reset_count(&self) -> u32 {
        self.resets.load(Ordering::Acquire)
    }
}

impl super::CommandAllocator for CommandAllocator {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn reset(&self) -> Result<()> {
        self.resets.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// A byte copy executed when the command list runs.
struct Transfer {
    dest: Memory,
    dest_offset: u64,
    source: Memory,
    source_offset: u64,
    size: u64,
}

impl Transfer {
    fn run(&self) {
        let (dest_offset, source_offset, size) = (
            self.dest_offset as usize,
            self.source_offset as usize,
            self.size as usize,
        );

        if Arc::ptr_eq(&self.dest, &self.source) {
            let mut memory = self.dest.lock();
            memory.copy_within(source_offset..source_offset + size, dest_offset);
        } else {
            let source = self.source.lock();
            let mut dest = self.dest.lock();
            dest[dest_offset..dest_offset + size]
                .copy_from_slice(&source[source_offset..source_offset + size]);
        }
    }
}

pub struct CommandList {
    id: u64,
    ty: QueueType,
    closed: bool,
    commands: Vec<Command>,
    transfers: Vec<Transfer>,
}

impl CommandList {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn ty(&self) -> QueueType {
        self.ty
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    fn push(&mut self, command: Command) {
        debug_assert!(!self.closed, "recording into a closed command list");
        self.commands.push(command);
    }

    fn subresource_range(resource: &Resource, index: u32) -> (u64, u64) {
        if resource.desc.is_buffer() {
            return (0, resource.desc.width);
        }

        let footprint = &resource.layout[index as usize];
        let size = u64::from(footprint.row_pitch)
            * u64::from(footprint.num_rows)
            * u64::from(footprint.depth);
        (footprint.offset, size)
    }

    fn location<'a>(location: &'a CopyLocation<'a>) -> (&'a Resource, u64, u64) {
        match location {
            CopyLocation::Subresource { resource, index } => {
                let resource = expect_null::<Resource>(resource.as_any());
                let (offset, size) = Self::subresource_range(resource, *index);
                (resource, offset, size)
            }
            CopyLocation::Footprint {
                resource,
                footprint,
            } => {
                let resource = expect_null::<Resource>(resource.as_any());
                let size = u64::from(footprint.row_pitch)
                    * u64::from(footprint.num_rows)
                    * u64::from(footprint.depth);
                (resource, footprint.offset, size)
            }
        }
    }
}

impl super::CommandList for CommandList {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn reset(&mut self, allocator: &dyn super::CommandAllocator) -> Result<()> {
        downcast::<CommandAllocator>(allocator.as_any(), "ID3D12GraphicsCommandList::Reset")?;
        self.closed = false;
        self.commands.clear();
        self.transfers.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Backend {
                call: "ID3D12GraphicsCommandList::Close",
                message: "command list is already closed".to_owned(),
            });
        }
        self.closed = true;
        Ok(())
    }

    fn resource_barriers(&mut self, barriers: &[Barrier]) {
        for barrier in barriers {
            let command = match barrier {
                Barrier::Transition {
                    resource,
                    subresource,
                    before,
                    after,
                } => Command::Transition {
                    resource: expect_null::<Resource>(resource.as_any()).id,
                    subresource: *subresource,
                    before: *before,
                    after: *after,
                },
                Barrier::Uav { resource } => Command::UavBarrier {
                    resource: resource.map(|r| expect_null::<Resource>(r.as_any()).id),
                },
            };
            self.push(command);
        }
    }

    fn set_pipeline_state(&mut self, pipeline: &dyn super::PipelineState) {
        let id = expect_null::<PipelineState>(pipeline.as_any()).id;
        self.push(Command::SetPipelineState(id));
    }

    fn set_root_signature(&mut self, kind: PipelineKind, root_signature: &dyn super::RootSignature) {
        let id = expect_null::<RootSignature>(root_signature.as_any()).id;
        self.push(Command::SetRootSignature(kind, id));
    }

    fn set_descriptor_heaps(
        &mut self,
        view_heap: Option<&dyn super::DescriptorHeap>,
        sampler_heap: Option<&dyn super::DescriptorHeap>,
    ) {
        self.push(Command::SetDescriptorHeaps {
            view: view_heap.map(super::DescriptorHeap::cpu_start),
            sampler: sampler_heap.map(super::DescriptorHeap::cpu_start),
        });
    }

    fn set_root_descriptor_table(&mut self, kind: PipelineKind, index: u32, table: GpuDescriptor) {
        self.push(Command::SetRootDescriptorTable { kind, index, table });
    }

    fn set_root_constant_buffer_view(&mut self, kind: PipelineKind, index: u32, address: u64) {
        self.push(Command::SetRootConstantBufferView { kind, index, address });
    }

    fn set_root_shader_resource_view(&mut self, kind: PipelineKind, index: u32, address: u64) {
        self.push(Command::SetRootShaderResourceView { kind, index, address });
    }

    fn set_render_targets(&mut self, colors: &[CpuDescriptor], depth_stencil: Option<CpuDescriptor>) {
        self.push(Command::SetRenderTargets {
            colors: colors.to_vec(),
            depth_stencil,
        });
    }

    fn clear_render_target(&mut self, rtv: CpuDescriptor, color: [f32; 4]) {
        self.push(Command::ClearRenderTarget { rtv, color });
    }

    fn clear_depth_stencil(&mut self, dsv: CpuDescriptor, flags: ClearFlags, depth: f32, stencil: u8) {
        self.push(Command::ClearDepthStencil {
            dsv,
            flags,
            depth,
            stencil,
        });
    }

    fn set_viewports(&mut self, viewports: &[Viewport]) {
        self.push(Command::SetViewports(viewports.to_vec()));
    }

    fn set_scissor_rects(&mut self, rects: &[ScissorRect]) {
        self.push(Command::SetScissorRects(rects.to_vec()));
    }

    fn set_stencil_ref(&mut self, value: u32) {
        self.push(Command::SetStencilRef(value));
    }

    fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.push(Command::SetPrimitiveTopology(topology));
    }

    fn set_vertex_buffers(&mut self, start_slot: u32, views: &[VertexBufferView]) {
        self.push(Command::SetVertexBuffers {
            start_slot,
            views: views.to_vec(),
        });
    }

    fn set_index_buffer(&mut self, view: Option<&IndexBufferView>) {
        self.push(Command::SetIndexBuffer(view.copied()));
    }

    fn set_predication(&mut self, predicate: Option<(&dyn super::NativeResource, u64, PredicationOp)>) {
        let predicate =
            predicate.map(|(r, offset, op)| (expect_null::<Resource>(r.as_any()).id, offset, op));
        self.push(Command::SetPredication(predicate));
    }

    fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32, start_vertex: u32, start_instance: u32) {
        self.push(Command::DrawInstanced {
            vertex_count,
            instance_count,
            start_vertex,
            start_instance,
        });
    }

    fn draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    ) {
        self.push(Command::DrawIndexedInstanced {
            index_count,
            instance_count,
            start_index,
            base_vertex,
            start_instance,
        });
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.push(Command::Dispatch { x, y, z });
    }

    fn copy_buffer_region(
        &mut self,
        dest: &dyn super::NativeResource,
        dest_offset: u64,
        source: &dyn super::NativeResource,
        source_offset: u64,
        size: u64,
    ) {
        let dest = expect_null::<Resource>(dest.as_any());
        let source = expect_null::<Resource>(source.as_any());

        self.push(Command::CopyBufferRegion {
            dest: dest.id,
            dest_offset,
            source: source.id,
            source_offset,
            size,
        });
        self.transfers.push(Transfer {
            dest: dest.memory.clone(),
            dest_offset,
            source: source.memory.clone(),
            source_offset,
            size,
        });
    }

    fn copy_resource(&mut self, dest: &dyn super::NativeResource, source: &dyn super::NativeResource) {
        let dest = expect_null::<Resource>(dest.as_any());
        let source = expect_null::<Resource>(source.as_any());
        let size = dest.memory.lock().len().min(source.memory.lock().len()) as u64;

        self.push(Command::CopyResource {
            dest: dest.id,
            source: source.id,
        });
        self.transfers.push(Transfer {
            dest: dest.memory.clone(),
            dest_offset: 0,
            source: source.memory.clone(),
            source_offset: 0,
            size,
        });
    }

    fn copy_texture_region(&mut self, dest: &CopyLocation, source: &CopyLocation) {
        let (dest, dest_offset, dest_size) = Self::location(dest);
        let (source, source_offset, source_size) = Self::location(source);

        self.push(Command::CopyTextureRegion {
            dest: dest.id,
            source: source.id,
        });
        self.transfers.push(Transfer {
            dest: dest.memory.clone(),
            dest_offset,
            source: source.memory.clone(),
            source_offset,
            size: dest_size.min(source_size),
        });
    }

    fn resolve_subresource(
        &mut self,
        dest: &dyn super::NativeResource,
        dest_subresource: u32,
        source: &dyn super::NativeResource,
        source_subresource: u32,
        format: Format,
    ) {
        let dest = expect_null::<Resource>(dest.as_any());
        let source = expect_null::<Resource>(source.as_any());
        let (dest_offset, dest_size) = Self::subresource_range(dest, dest_subresource);
        let (source_offset, source_size) = Self::subresource_range(source, source_subresource);

        self.push(Command::ResolveSubresource {
            dest: dest.id,
            dest_subresource,
            source: source.id,
            source_subresource,
            format,
        });
        self.transfers.push(Transfer {
            dest: dest.memory.clone(),
            dest_offset,
            source: source.memory.clone(),
            source_offset,
            size: dest_size.min(source_size),
        });
    }
}

pub struct Resource {
    id: u64,
    desc: ResourceDesc,
    heap_type: HeapType,
    gpu_address: u64,
    layout: Vec<PlacedFootprint>,
    memory: Memory,
    shared: Arc<Shared>,
}

impl Resource {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn heap_type(&self) -> HeapType {
        self.heap_type
    }

    /// A copy of the resource's memory, regardless of heap type.
    pub fn contents(&self) -> Vec<u8> {
        self.memory.lock().to_vec()
    }
}

impl Drop for Resource {
    fn drop(&mut self) {
        self.shared.live_resources.fetch_sub(1, Ordering::AcqRel);
    }
}

impl super::NativeResource for Resource {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    fn gpu_address(&self) -> u64 {
        if self.desc.dimension == ResourceDimension::Buffer {
            self.gpu_address
        } else {
            0
        }
    }

    fn map(&self) -> Result<NonNull<u8>> {
        if !self.heap_type.is_cpu_accessible() {
            return Err(Error::Backend {
                call: "ID3D12Resource::Map",
                message: "resource is not in a CPU accessible heap".to_owned(),
            });
        }

        let ptr = self.memory.lock().as_mut_ptr();
        NonNull::new(ptr).ok_or(Error::Backend {
            call: "ID3D12Resource::Map",
            message: "null mapping".to_owned(),
        })
    }

    fn unmap(&self) {}
}

pub struct Heap {
    desc: HeapDesc,
}

impl super::Heap for Heap {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn desc(&self) -> &HeapDesc {
        &self.desc
    }
}

pub struct DescriptorHeap {
    ty: DescriptorHeapType,
    capacity: u32,
    start: usize,
    shader_visible: bool,
    shared: Arc<Shared>,
}

impl Drop for DescriptorHeap {
    fn drop(&mut self) {
        let end = self.start + self.capacity as usize * DESCRIPTOR_INCREMENT as usize;
        self.shared
            .descriptors
            .lock()
            .retain(|address, _| !(self.start..end).contains(address));
    }
}

impl super::DescriptorHeap for DescriptorHeap {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn ty(&self) -> DescriptorHeapType {
        self.ty
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn increment_size(&self) -> u32 {
        DESCRIPTOR_INCREMENT
    }

    fn cpu_start(&self) -> CpuDescriptor {
        CpuDescriptor(self.start)
    }

    fn gpu_start(&self) -> Option<GpuDescriptor> {
        self.shader_visible.then_some(GpuDescriptor(self.start as u64))
    }
}

pub struct RootSignature {
    id: u64,
}

impl RootSignature {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl super::RootSignature for RootSignature {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct PipelineState {
    id: u64,
    kind: PipelineKind,
    rtv_formats: Vec<Format>,
    dsv_format: Format,
    sample_count: u32,
    depth_bias: i32,
    wireframe: bool,
}

impl PipelineState {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    pub fn rtv_formats(&self) -> &[Format] {
        &self.rtv_formats
    }

    pub fn dsv_format(&self) -> Format {
        self.dsv_format
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn depth_bias(&self) -> i32 {
        self.depth_bias
    }

    pub fn is_wireframe(&self) -> bool {
        self.wireframe
    }
}

impl super::PipelineState for PipelineState {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{
        AddressMode, CommandList as _, DescriptorHeap as _, Device as _, Fence as _, Filter,
        NativeResource as _, Queue as _,
    };

    #[test]
    fn paused_queue_defers_signals() {
        let device = Device::new();
        let fence = device.create_fence(0, "fence").unwrap();
        let queue = device
            .create_queue(QueueType::Direct, &QueueDesc::default(), "queue")
            .unwrap();

        device.pause();
        queue.signal(fence.as_ref(), 1).unwrap();
        assert_eq!(fence.completed_value(), 0);

        // a host wait observes the GPU catching up
        fence.wait(1).unwrap();
        assert_eq!(fence.completed_value(), 1);

        assert!(fence.wait(5).is_err());

        device.resume();
        queue.signal(fence.as_ref(), 2).unwrap();
        assert_eq!(fence.completed_value(), 2);
    }

    #[test]
    fn copies_run_on_execute() {
        let device = Device::new();
        let desc = ResourceDesc::buffer(16, Default::default());
        let upload = device
            .create_committed_resource(HeapType::Upload, &desc, ResourceState::GENERIC_READ, None, "src")
            .unwrap();
        let target = device
            .create_committed_resource(HeapType::Default, &desc, ResourceState::COPY_DEST, None, "dst")
            .unwrap();
        assert_eq!(device.live_resources(), 2);
        assert!(target.map().is_err());

        unsafe {
            let ptr = upload.map().unwrap();
            std::ptr::copy_nonoverlapping([1u8, 2, 3, 4].as_ptr(), ptr.as_ptr().add(4), 4);
        }

        let allocator = device.create_command_allocator(QueueType::Direct).unwrap();
        let mut list = device
            .create_command_list(QueueType::Direct, allocator.as_ref())
            .unwrap();
        list.copy_buffer_region(target.as_ref(), 0, upload.as_ref(), 4, 4);
        list.close().unwrap();

        let target_contents = || {
            expect_null::<Resource>(target.as_any()).contents()[..4].to_vec()
        };
        assert_eq!(target_contents(), vec![0, 0, 0, 0]);

        let queue = device
            .create_queue(QueueType::Direct, &QueueDesc::default(), "queue")
            .unwrap();
        queue.execute(&[list.as_ref()]).unwrap();
        assert_eq!(target_contents(), vec![1, 2, 3, 4]);

        drop(upload);
        assert_eq!(device.live_resources(), 1);
    }

    #[test]
    fn descriptors_copy_between_heaps() {
        let device = Device::new();
        let offline = device
            .create_descriptor_heap(DescriptorHeapType::Sampler, 4, false, "offline")
            .unwrap();
        let online = device
            .create_descriptor_heap(DescriptorHeapType::Sampler, 4, true, "online")
            .unwrap();
        assert!(offline.gpu_start().is_none());

        let sampler = SamplerDesc {
            filter: Filter::Point,
            address: AddressMode::Clamp,
            mip_lod_bias: 0.0,
            max_anisotropy: 1,
            comparison: None,
        };
        device.create_sampler(&sampler, offline.cpu_start().offset(1, DESCRIPTOR_INCREMENT));
        device.copy_descriptors(
            DescriptorHeapType::Sampler,
            online.cpu_start().offset(2, DESCRIPTOR_INCREMENT),
            &[offline.cpu_start().offset(1, DESCRIPTOR_INCREMENT)],
        );

        let gpu = online.gpu_start().unwrap().offset(2, DESCRIPTOR_INCREMENT);
        assert_eq!(device.descriptor(gpu.0), Some(Descriptor::Sampler(sampler)));

        drop(online);
        assert_eq!(device.descriptor(gpu.0), None);
    }
}
