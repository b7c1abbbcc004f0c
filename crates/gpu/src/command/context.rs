use std::{collections::HashMap, sync::Arc};

use bytemuck::Pod;
use smallvec::SmallVec;

use super::cache::{ParameterCache, StageCache};
use crate::{
    buffer::{Buffer, BufferAllocation, BufferDesc, BufferElement, BufferUsages},
    descriptor::{OnlineDescriptorMultiAllocator, TableBases},
    hal::{
        self, Barrier, ClearFlags, CopyLocation, CpuDescriptor, IndexBufferView, PipelineKind, PredicationOp,
        PrimitiveTopology, ScissorRect, VertexBufferView, Viewport, ALL_SUBRESOURCES,
        SIMULTANEOUS_RENDER_TARGET_COUNT,
    },
    heap::SubAllocatorKind,
    material::Material,
    mesh::{Geometry, Mesh, MeshRenderer},
    resource::{Resource, ResourceState},
    shader::{id_name, name_id, ComputeShader, OutputDesc, RootSignature, INSTANCE_BUFFER, MATERIAL_CONSTANT_BUFFER},
    sync::SyncPoint,
    texture::{Texture, TextureElement},
    Device, Error, QueueType, Result,
};

/// The tag that selects the pass a renderer is drawn with.
pub const LIGHT_MODE_TAG: &str = "LightMode";

enum PendingBarrier {
    Transition {
        resource: Resource,
        subresource: u32,
        before: ResourceState,
        after: ResourceState,
    },
    Uav(Option<Resource>),
}

/// The parts of a context that outlive one recording. Kept in the command
/// manager's pool between uses.
pub(crate) struct RecycledContext {
    pub(crate) ty: QueueType,
    pub(crate) list: Box<dyn hal::CommandList>,
    graphics: ParameterCache,
    compute: ParameterCache,
    barriers: Vec<PendingBarrier>,
}

impl RecycledContext {
    pub(crate) fn new(ty: QueueType, list: Box<dyn hal::CommandList>) -> Self {
        Self {
            ty,
            list,
            graphics: ParameterCache::new(PipelineKind::Graphics),
            compute: ParameterCache::new(PipelineKind::Compute),
            barriers: Vec::new(),
        }
    }
}

struct BoundTarget {
    texture: Texture,
    descriptor: CpuDescriptor,
}

/// An open command list plus everything needed to turn high level draws into
/// native commands.
///
/// A context is obtained open from [`Device::request_context`] and consumed
/// by [`submit`](Self::submit), so recording into a closed or submitted
/// context cannot be expressed.
pub struct CommandContext {
    device: Arc<Device>,
    ty: QueueType,
    allocator: Box<dyn hal::CommandAllocator>,
    list: Box<dyn hal::CommandList>,
    barriers: Vec<PendingBarrier>,
    waits: Vec<SyncPoint>,

    graphics: ParameterCache,
    compute: ParameterCache,
    root_signatures: [Option<Arc<RootSignature>>; 2],
    pipeline: Option<Arc<dyn hal::PipelineState>>,
    heaps: Option<(Arc<dyn hal::DescriptorHeap>, Arc<dyn hal::DescriptorHeap>)>,

    textures: HashMap<i32, Texture>,
    buffers: HashMap<i32, Buffer>,
    instance_buffer: Option<Buffer>,

    output: OutputDesc,
    color_targets: SmallVec<[BoundTarget; SIMULTANEOUS_RENDER_TARGET_COUNT]>,
    depth_target: Option<BoundTarget>,
    viewport: Option<Viewport>,
    scissor: Option<ScissorRect>,
    stencil_ref: Option<u32>,
    topology: Option<PrimitiveTopology>,
    vertex_buffer: Option<VertexBufferView>,
    index_buffer: Option<IndexBufferView>,
}

impl CommandContext {
    pub(crate) fn new(
        device: Arc<Device>,
        allocator: Box<dyn hal::CommandAllocator>,
        recycled: RecycledContext,
    ) -> Self {
        let RecycledContext {
            ty,
            list,
            mut graphics,
            mut compute,
            mut barriers,
        } = recycled;

        let (null_view, null_sampler) = device.null_descriptors();
        for cache in [&mut graphics, &mut compute] {
            cache.reset();
            cache.set_null_descriptors(null_view, null_sampler);
        }
        barriers.clear();

        Self {
            device,
            ty,
            allocator,
            list,
            barriers,
            waits: Vec::new(),
            graphics,
            compute,
            root_signatures: [None, None],
            pipeline: None,
            heaps: None,
            textures: HashMap::new(),
            buffers: HashMap::new(),
            instance_buffer: None,
            output: OutputDesc::default(),
            color_targets: SmallVec::new(),
            depth_target: None,
            viewport: None,
            scissor: None,
            stencil_ref: None,
            topology: None,
            vertex_buffer: None,
            index_buffer: None,
        }
    }

    pub fn ty(&self) -> QueueType {
        self.ty
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn output_desc(&self) -> &OutputDesc {
        &self.output
    }

    /// Closes the command list and submits it, after making the queue wait
    /// for every sync point passed to [`wait_on_gpu`](Self::wait_on_gpu).
    ///
    /// The returned sync point completes once the GPU has run the list.
    pub fn submit(mut self) -> Result<SyncPoint> {
        self.flush_resource_barriers();
        self.device.raw().check_removed()?;
        self.list.close()?;

        let commands = self.device.commands();
        let queue = commands.queue(self.ty);
        for sync_point in &self.waits {
            queue.wait_on_gpu(sync_point)?;
        }
        queue.execute(&[self.list.as_ref()])?;
        let sync_point = queue.release_allocator(self.allocator)?;

        commands.recycle(RecycledContext {
            ty: self.ty,
            list: self.list,
            graphics: self.graphics,
            compute: self.compute,
            barriers: self.barriers,
        });

        Ok(sync_point)
    }

    /// Makes the queue wait for `sync_point` before running this context's
    /// commands. The host does not block.
    pub fn wait_on_gpu(&mut self, sync_point: &SyncPoint) {
        if sync_point.is_valid() {
            self.waits.push(sync_point.clone());
        }
    }

    pub fn transition_resource(&mut self, resource: &Resource, after: ResourceState) {
        self.transition_subresource(resource, ALL_SUBRESOURCES, after);
    }

    /// Queues a barrier from the tracked state of `subresource` to `after`.
    /// The tracked state changes immediately; the barrier is emitted on the
    /// next flush. Transitions of the same subresource between flushes merge
    /// into one barrier, and cancel out if they end where they started.
    pub fn transition_subresource(&mut self, resource: &Resource, subresource: u32, after: ResourceState) {
        if resource.is_state_locked() {
            return;
        }

        if subresource == ALL_SUBRESOURCES {
            for (index, before) in resource.states() {
                if before.needs_transition_to(after) {
                    self.push_transition(resource, index, before, after);
                    resource.set_state(index, after);
                }
            }
            return;
        }

        debug_assert!(subresource < resource.subresource_count());
        let Some(before) = resource.state(subresource) else {
            unreachable!("single subresources always have a state")
        };

        if before.needs_transition_to(after) {
            self.push_transition(resource, subresource, before, after);
            resource.set_state(subresource, after);
        }
    }

    fn push_transition(&mut self, resource: &Resource, subresource: u32, before: ResourceState, after: ResourceState) {
        let mut mismatch = false;
        let mut merge = None;

        // transitions queued before a UAV barrier on the resource stay in front of it
        let first = self
            .barriers
            .iter()
            .rposition(|barrier| match barrier {
                PendingBarrier::Uav(None) => true,
                PendingBarrier::Uav(Some(pending)) => pending.ptr_eq(resource),
                PendingBarrier::Transition { .. } => false,
            })
            .map_or(0, |index| index + 1);

        for (index, barrier) in self.barriers.iter().enumerate().skip(first) {
            let PendingBarrier::Transition {
                resource: pending,
                subresource: pending_subresource,
                ..
            } = barrier
            else {
                continue;
            };

            if !pending.ptr_eq(resource) {
                continue;
            }

            if *pending_subresource == subresource {
                merge = Some(index);
                break;
            }

            if *pending_subresource == ALL_SUBRESOURCES || subresource == ALL_SUBRESOURCES {
                mismatch = true;
            }
        }

        if let Some(index) = merge {
            let cancelled = match &mut self.barriers[index] {
                PendingBarrier::Transition {
                    before: pending_before,
                    after: pending_after,
                    ..
                } => {
                    *pending_after = after;
                    *pending_before == after
                }
                PendingBarrier::Uav(_) => false,
            };

            if cancelled {
                self.barriers.remove(index);
            }
            return;
        }

        if mismatch {
            self.flush_resource_barriers();
        }

        self.barriers.push(PendingBarrier::Transition {
            resource: resource.clone(),
            subresource,
            before,
            after,
        });
    }

    /// Orders unordered access to `resource`, or to every resource when
    /// `None`.
    pub fn uav_barrier(&mut self, resource: Option<&Resource>) {
        self.barriers.push(PendingBarrier::Uav(resource.cloned()));
    }

    pub fn pending_barrier_count(&self) -> usize {
        self.barriers.len()
    }

    pub fn flush_resource_barriers(&mut self) {
        if self.barriers.is_empty() {
            return;
        }

        let barriers: SmallVec<[Barrier; 8]> = self
            .barriers
            .iter()
            .map(|barrier| match barrier {
                PendingBarrier::Transition {
                    resource,
                    subresource,
                    before,
                    after,
                } => Barrier::Transition {
                    resource: resource.raw(),
                    subresource: *subresource,
                    before: *before,
                    after: *after,
                },
                PendingBarrier::Uav(resource) => Barrier::Uav {
                    resource: resource.as_ref().map(Resource::raw),
                },
            })
            .collect();

        self.list.resource_barriers(&barriers);
        drop(barriers);
        self.barriers.clear();
    }

    pub fn set_texture(&mut self, name: &str, texture: &Texture) {
        self.textures.insert(name_id(name), texture.clone());
    }

    pub fn get_texture(&self, name: &str) -> Option<Texture> {
        self.textures.get(&name_id(name)).cloned()
    }

    pub fn clear_textures(&mut self) {
        self.textures.clear();
    }

    pub fn set_buffer(&mut self, name: &str, buffer: &Buffer) {
        self.buffers.insert(name_id(name), buffer.clone());
    }

    pub fn get_buffer(&self, name: &str) -> Option<Buffer> {
        self.buffers.get(&name_id(name)).cloned()
    }

    pub fn clear_buffers(&mut self) {
        self.buffers.clear();
    }

    /// The buffer bound as `_InstanceBuffer` by draws that do not upload
    /// their own instance data.
    pub fn set_instance_buffer(&mut self, buffer: Option<&Buffer>) {
        self.instance_buffer = buffer.cloned();
    }

    pub fn set_render_targets(&mut self, colors: &[&Texture], depth_stencil: Option<&Texture>) -> Result<()> {
        let colors: SmallVec<[(&Texture, u32, u32); SIMULTANEOUS_RENDER_TARGET_COUNT]> =
            colors.iter().map(|t| (*t, 0, 0)).collect();
        self.set_render_target_slices(&colors, depth_stencil.map(|t| (t, 0, 0)))
    }

    /// Binds `(texture, array slice, mip)` targets and resets the viewport and
    /// scissor rectangle to the size of the first one.
    pub fn set_render_target_slices(
        &mut self,
        colors: &[(&Texture, u32, u32)],
        depth_stencil: Option<(&Texture, u32, u32)>,
    ) -> Result<()> {
        assert!(colors.len() <= SIMULTANEOUS_RENDER_TARGET_COUNT);

        if colors.is_empty() && depth_stencil.is_none() {
            log::warn!("set_render_targets called without any targets");
        }

        self.color_targets.clear();
        self.depth_target = None;
        self.output.rtv_formats = [hal::Format::Unknown; SIMULTANEOUS_RENDER_TARGET_COUNT];
        self.output.rtv_count = colors.len() as u32;
        self.output.dsv_format = hal::Format::Unknown;

        let mut size = None;
        let mut samples = 1;

        for (index, (texture, slice, mip)) in colors.iter().enumerate() {
            debug_assert!(!texture.desc().is_depth_stencil(), "{} is not a color target", texture.name());
            let descriptor = texture.rtv(*slice, *mip)?;
            let subresource = texture.subresource_index(TextureElement::Color, *slice, *mip);
            self.transition_subresource(texture.resource(), subresource, ResourceState::RENDER_TARGET);

            self.output.rtv_formats[index] = texture.desc().rtv_dsv_format();
            size.get_or_insert((texture.desc().width >> mip, texture.desc().height >> mip));
            samples = texture.desc().msaa_samples;
            self.color_targets.push(BoundTarget {
                texture: (*texture).clone(),
                descriptor,
            });
        }

        if let Some((texture, slice, mip)) = depth_stencil {
            debug_assert!(texture.desc().is_depth_stencil(), "{} is not a depth target", texture.name());
            let descriptor = texture.dsv(slice, mip)?;
            let depth = texture.subresource_index(TextureElement::Depth, slice, mip);
            self.transition_subresource(texture.resource(), depth, ResourceState::DEPTH_WRITE);
            if texture.desc().has_stencil() {
                let stencil = texture.subresource_index(TextureElement::Stencil, slice, mip);
                self.transition_subresource(texture.resource(), stencil, ResourceState::DEPTH_WRITE);
            }

            self.output.dsv_format = texture.desc().rtv_dsv_format();
            size.get_or_insert((texture.desc().width >> mip, texture.desc().height >> mip));
            samples = texture.desc().msaa_samples;
            self.depth_target = Some(BoundTarget {
                texture: texture.clone(),
                descriptor,
            });
        }

        self.output.sample_count = samples;
        self.output.sample_quality = 0;

        self.flush_resource_barriers();
        let colors: SmallVec<[CpuDescriptor; SIMULTANEOUS_RENDER_TARGET_COUNT]> =
            self.color_targets.iter().map(|t| t.descriptor).collect();
        self.list
            .set_render_targets(&colors, self.depth_target.as_ref().map(|t| t.descriptor));

        if let Some((width, height)) = size {
            let (width, height) = (width.max(1), height.max(1));
            self.set_viewport(Viewport {
                x: 0.0,
                y: 0.0,
                width: width as f32,
                height: height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            });
            self.set_scissor_rect(ScissorRect {
                left: 0,
                top: 0,
                right: width as i32,
                bottom: height as i32,
            });
        }

        Ok(())
    }

    pub fn clear_render_target(&mut self, index: usize, color: [f32; 4]) {
        match self.color_targets.get(index) {
            Some(target) => {
                let descriptor = target.descriptor;
                self.flush_resource_barriers();
                self.list.clear_render_target(descriptor, color);
            }
            None => log::warn!(
                "clearing color target {index} but only {} are bound",
                self.color_targets.len()
            ),
        }
    }

    pub fn clear_depth_stencil(&mut self, flags: ClearFlags, depth: f32, stencil: u8) {
        match &self.depth_target {
            Some(target) => {
                let descriptor = target.descriptor;
                let flags = if target.texture.desc().has_stencil() {
                    flags
                } else {
                    flags - ClearFlags::STENCIL
                };
                self.flush_resource_barriers();
                self.list.clear_depth_stencil(descriptor, flags, depth, stencil);
            }
            None => log::warn!("clearing depth stencil but none is bound"),
        }
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        if self.viewport != Some(viewport) {
            self.viewport = Some(viewport);
            self.list.set_viewports(&[viewport]);
        }
    }

    pub fn set_scissor_rect(&mut self, rect: ScissorRect) {
        if self.scissor != Some(rect) {
            self.scissor = Some(rect);
            self.list.set_scissor_rects(&[rect]);
        }
    }

    /// Takes effect through the pipeline state of the next draw.
    pub fn set_depth_bias(&mut self, bias: i32, clamp: f32, slope_scaled: f32) {
        self.output.depth_bias = bias;
        self.output.depth_bias_clamp = clamp;
        self.output.slope_scaled_depth_bias = slope_scaled;
    }

    pub fn set_wireframe(&mut self, wireframe: bool) {
        self.output.wireframe = wireframe;
    }

    /// Skips subsequent draws and dispatches depending on the 64-bit value
    /// at `offset` in `buffer`. `None` turns predication off.
    pub fn set_predication(&mut self, predicate: Option<(&Buffer, u64, PredicationOp)>) {
        match predicate {
            Some((buffer, offset, op)) => {
                let resource = buffer.resource();
                let offset = resource.offset() + buffer.element_offset(BufferElement::StructuredData) + offset;
                self.transition_resource(resource, ResourceState::PREDICATION);
                self.flush_resource_barriers();
                self.list.set_predication(Some((resource.raw(), offset, op)));
            }
            None => self.list.set_predication(None),
        }
    }

    /// Copies `size` bytes between two buffer resources. Offsets are relative
    /// to the start of each resource.
    pub fn copy_buffer_region(
        &mut self,
        dest: &Resource,
        dest_offset: u64,
        source: &Resource,
        source_offset: u64,
        size: u64,
    ) {
        debug_assert!(dest_offset + size <= dest.size() && source_offset + size <= source.size());

        self.transition_resource(dest, ResourceState::COPY_DEST);
        self.transition_resource(source, ResourceState::COPY_SOURCE);
        self.flush_resource_barriers();
        self.list.copy_buffer_region(
            dest.raw(),
            dest.offset() + dest_offset,
            source.raw(),
            source.offset() + source_offset,
            size,
        );
    }

    /// Copies the data of `source` into `dest`, up to the smaller of the two.
    pub fn copy_buffer(&mut self, dest: &Buffer, source: &Buffer) {
        let size = dest.data_size().min(source.data_size());
        self.copy_buffer_region(
            dest.resource(),
            dest.element_offset(BufferElement::StructuredData),
            source.resource(),
            source.element_offset(BufferElement::StructuredData),
            size,
        );
    }

    pub fn copy_texture(&mut self, dest: &Texture, dest_subresource: u32, source: &Texture, source_subresource: u32) {
        self.transition_subresource(dest.resource(), dest_subresource, ResourceState::COPY_DEST);
        self.transition_subresource(source.resource(), source_subresource, ResourceState::COPY_SOURCE);
        self.flush_resource_barriers();
        self.list.copy_texture_region(
            &CopyLocation::Subresource {
                resource: dest.resource().raw(),
                index: dest_subresource,
            },
            &CopyLocation::Subresource {
                resource: source.resource().raw(),
                index: source_subresource,
            },
        );
    }

    /// Uploads tightly packed data into consecutive subresources starting at
    /// `first`, through a transient upload range.
    pub fn update_subresources(&mut self, dest: &Resource, first: u32, data: &[&[u8]]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let (footprints, total) =
            self.device
                .raw()
                .copyable_footprints(dest.desc(), first, data.len() as u32, 0);
        let staging = self.device.sub_allocate(
            SubAllocatorKind::TempUpload,
            "UpdateSubresourcesUpload",
            total,
            hal::TEXTURE_DATA_PLACEMENT_ALIGNMENT,
        )?;

        for (footprint, bytes) in footprints.iter().zip(data) {
            let row_size = footprint.row_size as usize;
            let rows = (footprint.num_rows * footprint.depth) as usize;
            if bytes.len() < row_size * rows {
                return Err(Error::InvalidArgument(format!(
                    "{}: subresource data holds {} bytes, {} needed",
                    dest.name(),
                    bytes.len(),
                    row_size * rows
                )));
            }

            for (row, chunk) in bytes.chunks(row_size).take(rows).enumerate() {
                staging.write(footprint.offset + row as u64 * u64::from(footprint.row_pitch), chunk)?;
            }
        }

        self.transition_resource(dest, ResourceState::COPY_DEST);
        self.flush_resource_barriers();

        if dest.desc().is_buffer() {
            self.list.copy_buffer_region(
                dest.raw(),
                dest.offset(),
                staging.raw(),
                staging.offset() + footprints[0].offset,
                footprints[0].row_size,
            );
            return Ok(());
        }

        for (index, footprint) in footprints.iter().enumerate() {
            let mut footprint = *footprint;
            footprint.offset += staging.offset();

            self.list.copy_texture_region(
                &CopyLocation::Subresource {
                    resource: dest.raw(),
                    index: first + index as u32,
                },
                &CopyLocation::Footprint {
                    resource: staging.raw(),
                    footprint,
                },
            );
        }

        Ok(())
    }

    /// Resolves a multisampled subresource into a single sampled one.
    pub fn resolve_texture(&mut self, dest: &Texture, dest_subresource: u32, source: &Texture, source_subresource: u32) {
        debug_assert!(source.desc().msaa_samples > 1, "{} is not multisampled", source.name());

        self.transition_subresource(dest.resource(), dest_subresource, ResourceState::RESOLVE_DEST);
        self.transition_subresource(source.resource(), source_subresource, ResourceState::RESOLVE_SOURCE);
        self.flush_resource_barriers();
        self.list.resolve_subresource(
            dest.resource().raw(),
            dest_subresource,
            source.resource().raw(),
            source_subresource,
            dest.desc().rtv_dsv_format(),
        );
    }

    pub fn draw_mesh(&mut self, mesh: &Mesh, sub_mesh: usize, material: &Material, pass: usize) -> Result<()> {
        self.draw(mesh, sub_mesh, material, pass, None, 1)
    }

    /// Draws one instance per element of `instances`, which is uploaded as
    /// `_InstanceBuffer`.
    pub fn draw_mesh_instanced<T: Pod>(
        &mut self,
        mesh: &Mesh,
        sub_mesh: usize,
        material: &Material,
        pass: usize,
        instances: &[T],
    ) -> Result<()> {
        if instances.is_empty() {
            return Ok(());
        }

        let buffer = Buffer::with_allocation(
            &self.device,
            "InstanceBuffer",
            &BufferDesc::new(std::mem::size_of::<T>() as u32, instances.len() as u32, BufferUsages::STRUCTURED),
            BufferAllocation::Sub(SubAllocatorKind::TempUpload),
        )?;
        buffer.set_data(0, bytemuck::cast_slice(instances))?;

        self.draw(mesh, sub_mesh, material, pass, Some(&buffer), instances.len() as u32)
    }

    pub fn draw_geometry(&mut self, geometry: Geometry, material: &Material, pass: usize) -> Result<()> {
        let mesh = self.device.geometry(geometry)?;
        self.draw(&mesh, 0, material, pass, None, 1)
    }

    pub fn draw_geometry_instanced<T: Pod>(
        &mut self,
        geometry: Geometry,
        material: &Material,
        pass: usize,
        instances: &[T],
    ) -> Result<()> {
        let mesh = self.device.geometry(geometry)?;
        self.draw_mesh_instanced(&mesh, 0, material, pass, instances)
    }

    /// Draws every active renderer with the first pass of each material
    /// tagged `LightMode = light_mode`. Renderers sharing a mesh, sub-mesh,
    /// material and pass are drawn as instances of one draw, in the order
    /// the groups are first seen.
    pub fn draw_mesh_renderers(&mut self, renderers: &[MeshRenderer], light_mode: &str) -> Result<()> {
        type Key = (*const Mesh, usize, *const Material, usize);

        let mut batches: Vec<(Key, &MeshRenderer, usize, usize, Vec<[[f32; 4]; 4]>)> = Vec::new();
        let mut index: HashMap<Key, usize> = HashMap::new();

        for renderer in renderers.iter().filter(|r| r.active) {
            let count = renderer.mesh.sub_mesh_count().min(renderer.materials.len());

            for sub_mesh in 0..count {
                let material = &renderer.materials[sub_mesh];
                let Some(pass) = material.shader().first_pass_with_tag(LIGHT_MODE_TAG, light_mode) else {
                    continue;
                };

                let key = (Arc::as_ptr(&renderer.mesh), sub_mesh, Arc::as_ptr(material), pass);
                match index.get(&key) {
                    Some(batch) => batches[*batch].4.push(renderer.world),
                    None => {
                        index.insert(key, batches.len());
                        batches.push((key, renderer, sub_mesh, pass, vec![renderer.world]));
                    }
                }
            }
        }

        for (_, renderer, sub_mesh, pass, worlds) in &batches {
            self.draw_mesh_instanced(
                &renderer.mesh,
                *sub_mesh,
                &renderer.materials[*sub_mesh],
                *pass,
                worlds,
            )?;
        }

        Ok(())
    }

    fn draw(
        &mut self,
        mesh: &Mesh,
        sub_mesh: usize,
        material: &Material,
        pass: usize,
        instances: Option<&Buffer>,
        instance_count: u32,
    ) -> Result<()> {
        let device = self.device.clone();
        let shader_pass = material.shader().pass(pass);
        let signature = shader_pass.root_signature(&device)?;
        let pipeline = shader_pass.pipeline(&device, mesh.input_desc(), &self.output)?;

        self.set_pipeline(pipeline);
        self.set_root_signature(&signature);
        self.bind_resources(&signature, Some((material, pass)), instances)?;

        let (vertices, indices) = mesh.gpu_buffers(&device)?;
        self.transition_resource(vertices.resource(), ResourceState::VERTEX_AND_CONSTANT_BUFFER);
        self.transition_resource(indices.resource(), ResourceState::INDEX_BUFFER);

        self.apply(PipelineKind::Graphics, &signature)?;

        let topology = mesh.input_desc().topology();
        if self.topology != Some(topology) {
            self.topology = Some(topology);
            self.list.set_primitive_topology(topology);
        }

        let vbv = vertices.vbv();
        if self.vertex_buffer != Some(vbv) {
            self.vertex_buffer = Some(vbv);
            self.list.set_vertex_buffers(0, &[vbv]);
        }

        let ibv = indices.ibv();
        if self.index_buffer != Some(ibv) {
            self.index_buffer = Some(ibv);
            self.list.set_index_buffer(Some(&ibv));
        }

        if let Some(stencil_ref) = shader_pass.stencil_ref().map(u32::from) {
            if self.stencil_ref != Some(stencil_ref) {
                self.stencil_ref = Some(stencil_ref);
                self.list.set_stencil_ref(stencil_ref);
            }
        }

        let sub_mesh = mesh.sub_mesh(sub_mesh);
        self.list.draw_indexed_instanced(
            sub_mesh.index_count,
            instance_count,
            sub_mesh.start_index,
            sub_mesh.base_vertex,
            0,
        );

        Ok(())
    }

    pub fn dispatch_compute(&mut self, shader: &ComputeShader, kernel: usize, x: u32, y: u32, z: u32) -> Result<()> {
        let device = self.device.clone();
        let kernel = shader.kernel(kernel);
        let signature = kernel.root_signature(&device)?;
        let pipeline = kernel.pipeline(&device)?;

        self.set_pipeline(pipeline);
        self.set_root_signature(&signature);
        self.bind_resources(&signature, None, None)?;
        self.apply(PipelineKind::Compute, &signature)?;
        self.list.dispatch(x, y, z);
        Ok(())
    }

    /// Dispatches enough thread groups to cover the given number of threads.
    pub fn dispatch_compute_by_thread_count(
        &mut self,
        shader: &ComputeShader,
        kernel: usize,
        x: u32,
        y: u32,
        z: u32,
    ) -> Result<()> {
        let [gx, gy, gz] = shader.kernel(kernel).thread_group_size();
        self.dispatch_compute(shader, kernel, x.div_ceil(gx), y.div_ceil(gy), z.div_ceil(gz))
    }

    fn set_pipeline(&mut self, pipeline: Arc<dyn hal::PipelineState>) {
        let unchanged = self
            .pipeline
            .as_ref()
            .is_some_and(|current| Arc::as_ptr(current) as *const () == Arc::as_ptr(&pipeline) as *const ());

        if !unchanged {
            self.list.set_pipeline_state(pipeline.as_ref());
            self.pipeline = Some(pipeline);
        }
    }

    /// Binds `signature` if its native object differs from the bound one.
    /// Switching invalidates every root argument of that pipeline kind.
    fn set_root_signature(&mut self, signature: &Arc<RootSignature>) {
        let kind = signature.kind();
        let slot = &mut self.root_signatures[kind as usize];

        if slot.as_ref().is_some_and(|bound| bound.raw_ptr() == signature.raw_ptr()) {
            return;
        }

        *slot = Some(signature.clone());
        self.list.set_root_signature(kind, signature.raw().as_ref());
        self.cache_mut(kind).reset();
    }

    fn cache_mut(&mut self, kind: PipelineKind) -> &mut ParameterCache {
        match kind {
            PipelineKind::Graphics => &mut self.graphics,
            PipelineKind::Compute => &mut self.compute,
        }
    }

    /// Resolves every binding the root signature declares, looking in the
    /// material first, then in the context globals, then among the built-in
    /// buffers.
    fn bind_resources(
        &mut self,
        signature: &RootSignature,
        material: Option<(&Material, usize)>,
        instances: Option<&Buffer>,
    ) -> Result<()> {
        let kind = signature.kind();
        let material_constants = name_id(MATERIAL_CONSTANT_BUFFER);
        let instance_buffer = name_id(INSTANCE_BUFFER);

        for (stage, layout) in signature.stages() {
            for slot in &layout.buffers {
                let buffer = match material {
                    Some((material, pass)) if slot.id == material_constants => {
                        material.constant_buffer(&self.device, pass)?
                    }
                    _ => None,
                }
                .or_else(|| self.buffers.get(&slot.id).cloned())
                .or_else(|| {
                    (slot.id == instance_buffer)
                        .then(|| instances.cloned().or_else(|| self.instance_buffer.clone()))
                        .flatten()
                })
                .ok_or_else(|| missing("buffer", slot.id))?;

                let address = buffer.gpu_address(BufferElement::StructuredData);
                self.cache_mut(kind)
                    .set_buffer(stage, slot.root_index, buffer.resource(), address, slot.is_constant_buffer);
            }

            for slot in &layout.srv_textures {
                let texture = material
                    .and_then(|(material, _)| material.texture_by_id(slot.id))
                    .or_else(|| self.textures.get(&slot.id).cloned())
                    .ok_or_else(|| missing("texture", slot.id))?;

                let srv = texture.srv(TextureElement::Default)?;
                let cache = self.cache_mut(kind);
                cache.set_srv(stage, slot.offset, texture.resource(), srv);

                if let Some(offset) = slot.sampler_offset {
                    let sampler = texture.sampler()?;
                    self.cache_mut(kind).set_sampler(stage, offset, sampler);
                }
            }

            for slot in &layout.uav_buffers {
                let buffer = self
                    .buffers
                    .get(&slot.id)
                    .cloned()
                    .ok_or_else(|| missing("RW buffer", slot.id))?;

                let element = if buffer.desc().usages.contains(BufferUsages::RW_BYTE_ADDRESS) {
                    BufferElement::RawData
                } else {
                    BufferElement::StructuredData
                };
                let uav = buffer.uav(element)?;
                self.cache_mut(kind).set_uav(stage, slot.offset, buffer.resource(), uav);
            }

            for slot in &layout.uav_textures {
                let texture = material
                    .and_then(|(material, _)| material.texture_by_id(slot.id))
                    .or_else(|| self.textures.get(&slot.id).cloned())
                    .ok_or_else(|| missing("RW texture", slot.id))?;

                let uav = texture.uav(TextureElement::Default, 0)?;
                self.cache_mut(kind).set_uav(stage, slot.offset, texture.resource(), uav);
            }
        }

        Ok(())
    }

    /// Turns the staged parameters of `kind` into native calls: descriptor
    /// tables, barriers, then root buffers.
    fn apply(&mut self, kind: PipelineKind, signature: &RootSignature) -> Result<()> {
        self.stage_descriptor_tables(kind, signature)?;

        for (resource, state) in self.cache_mut(kind).take_required_states() {
            self.transition_resource(&resource, state);
        }
        self.flush_resource_barriers();

        let cache = match kind {
            PipelineKind::Graphics => &mut self.graphics,
            PipelineKind::Compute => &mut self.compute,
        };
        for stage in cache.stages_mut() {
            for (index, address, is_constant_buffer) in stage.buffers.dirty() {
                if is_constant_buffer {
                    self.list.set_root_constant_buffer_view(kind, index, address);
                } else {
                    self.list.set_root_shader_resource_view(kind, index, address);
                }
            }
            stage.buffers.apply();
        }

        Ok(())
    }

    /// Copies every dirty table into the online heaps and binds it. If a heap
    /// is full it is rolled over and everything is staged again once; a
    /// second failure means a single draw needs more than a whole heap.
    fn stage_descriptor_tables(&mut self, kind: PipelineKind, signature: &RootSignature) -> Result<()> {
        if !self.cache_mut(kind).has_dirty_tables() {
            return Ok(());
        }

        let device = self.device.clone();
        let key = device.next_frame_fence();
        let mut views = device.online_views().lock();
        let mut samplers = device.online_samplers().lock();

        if !self.heaps_match(&views, &samplers) {
            self.graphics.mark_tables_dirty();
            self.compute.mark_tables_dirty();
        }

        let mut rolled_over = false;
        let (view_bases, sampler_bases) = loop {
            let cache = match kind {
                PipelineKind::Graphics => &self.graphics,
                PipelineKind::Compute => &self.compute,
            };

            let view_bases = allocate_tables(&mut views, cache, |s| (s.srv_uav.handles(), s.srv_uav.is_dirty()));
            let sampler_bases =
                allocate_tables(&mut samplers, cache, |s| (s.samplers.handles(), s.samplers.is_dirty()));

            match (view_bases, sampler_bases) {
                (Some(views), Some(samplers)) => break (views, samplers),
                (view_bases, sampler_bases) => {
                    assert!(
                        !rolled_over,
                        "a single draw needs more descriptors than an online heap holds"
                    );

                    if view_bases.is_none() {
                        views.rollover(key)?;
                    }
                    if sampler_bases.is_none() {
                        samplers.rollover(key)?;
                    }

                    rolled_over = true;
                    self.graphics.mark_tables_dirty();
                    self.compute.mark_tables_dirty();
                }
            }
        };

        if !self.heaps_match(&views, &samplers) {
            let heaps = (views.heap().clone(), samplers.heap().clone());
            self.list
                .set_descriptor_heaps(Some(heaps.0.as_ref()), Some(heaps.1.as_ref()));
            self.heaps = Some(heaps);
        }

        drop(views);
        drop(samplers);

        let cache = match kind {
            PipelineKind::Graphics => &mut self.graphics,
            PipelineKind::Compute => &mut self.compute,
        };
        for ((stage, layout), cache) in signature.stages().zip(cache.stages_mut()) {
            let index = stage.index_in(kind);

            if let (Some(table), Some(base)) = (layout.srv_uav_table, view_bases[index]) {
                self.list.set_root_descriptor_table(kind, table, base);
            }
            if let (Some(table), Some(base)) = (layout.sampler_table, sampler_bases[index]) {
                self.list.set_root_descriptor_table(kind, table, base);
            }

            cache.srv_uav.set_dirty(false);
            cache.samplers.set_dirty(false);
        }

        Ok(())
    }

    fn heaps_match(&self, views: &OnlineDescriptorMultiAllocator, samplers: &OnlineDescriptorMultiAllocator) -> bool {
        self.heaps.as_ref().is_some_and(|(view_heap, sampler_heap)| {
            Arc::ptr_eq(view_heap, views.heap()) && Arc::ptr_eq(sampler_heap, samplers.heap())
        })
    }
}

/// Reserves one table per stage for the stages `select` reports dirty.
fn allocate_tables(
    online: &mut OnlineDescriptorMultiAllocator,
    cache: &ParameterCache,
    select: impl Fn(&StageCache) -> (&[CpuDescriptor], bool),
) -> Option<TableBases> {
    let tables: SmallVec<[&[CpuDescriptor]; 2]> = cache
        .stages()
        .iter()
        .map(|stage| match select(stage) {
            (handles, true) => handles,
            (_, false) => &[],
        })
        .collect();

    online.allocate_many(&tables).map(|(bases, _)| bases)
}

fn missing(kind: &'static str, id: i32) -> Error {
    Error::MissingBinding {
        kind,
        name: id_name(id).unwrap_or_else(|| format!("#{id}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::tests::{direct_queue, null_device, null_id, render_target},
        hal::{null, Format, RenderState},
        shader::{Shader, ShaderPass, ShaderProgram, ShaderStage},
        texture::{TextureDesc, TextureDimension},
    };

    fn transitions(commands: &[null::Command]) -> Vec<(u64, u32, ResourceState, ResourceState)> {
        commands
            .iter()
            .filter_map(|command| match command {
                null::Command::Transition {
                    resource,
                    subresource,
                    before,
                    after,
                } => Some((*resource, *subresource, *before, *after)),
                _ => None,
            })
            .collect()
    }

    fn texture_array(device: &Arc<Device>, name: &str, format: Format, slices: u32) -> Texture {
        let mut desc = TextureDesc::new_2d(format, 16, 16);
        desc.dimension = TextureDimension::Tex2DArray;
        desc.depth_or_array_size = slices;
        Texture::new_render(device, name, &desc).unwrap()
    }

    #[test]
    fn stencil_plane_transitions_alone() {
        let (device, _null) = null_device();
        let depth = Texture::new_render(&device, "Depth", &TextureDesc::new_2d(Format::D24UnormS8Uint, 16, 16)).unwrap();
        let stencil = depth.subresource_index(TextureElement::Stencil, 0, 0);
        assert_eq!(stencil, 1);
        assert_eq!(depth.resource().subresource_count(), 2);

        let mut context = device.request_context(QueueType::Direct).unwrap();
        context.transition_subresource(depth.resource(), stencil, ResourceState::PIXEL_SHADER_RESOURCE);
        assert_eq!(depth.resource().state(0), Some(ResourceState::COMMON));
        assert_eq!(depth.resource().state(stencil), Some(ResourceState::PIXEL_SHADER_RESOURCE));

        // binding as a depth target brings both planes to DEPTH_WRITE
        context.set_render_targets(&[], Some(&depth)).unwrap();
        context.submit().unwrap().wait_cpu().unwrap();

        let id = null_id(depth.resource());
        assert_eq!(
            transitions(&direct_queue(&device).executed_commands()),
            [
                (id, 1, ResourceState::COMMON, ResourceState::DEPTH_WRITE),
                (id, 0, ResourceState::COMMON, ResourceState::DEPTH_WRITE),
            ]
        );
    }

    #[test]
    fn transitions_do_not_merge_across_uav_barriers() {
        let (device, _null) = null_device();
        let target = render_target(&device);
        let resource = target.resource();

        let mut context = device.request_context(QueueType::Direct).unwrap();
        context.transition_resource(resource, ResourceState::UNORDERED_ACCESS);
        context.transition_resource(resource, ResourceState::COPY_SOURCE);
        assert_eq!(context.pending_barrier_count(), 1);
        context.flush_resource_barriers();

        context.transition_resource(resource, ResourceState::UNORDERED_ACCESS);
        context.uav_barrier(Some(resource));
        context.transition_resource(resource, ResourceState::COPY_SOURCE);
        assert_eq!(context.pending_barrier_count(), 3);
        context.submit().unwrap().wait_cpu().unwrap();

        let id = null_id(resource);
        let commands = direct_queue(&device).executed_commands();
        let barriers: Vec<_> = commands.iter().filter(|c| c.is_barrier()).cloned().collect();
        assert_eq!(
            barriers[1..],
            [
                null::Command::Transition {
                    resource: id,
                    subresource: ALL_SUBRESOURCES,
                    before: ResourceState::COPY_SOURCE,
                    after: ResourceState::UNORDERED_ACCESS,
                },
                null::Command::UavBarrier { resource: Some(id) },
                null::Command::Transition {
                    resource: id,
                    subresource: ALL_SUBRESOURCES,
                    before: ResourceState::UNORDERED_ACCESS,
                    after: ResourceState::COPY_SOURCE,
                },
            ]
        );
    }

    #[test]
    fn dispatch_by_thread_count_rounds_up() {
        let (device, _null) = null_device();
        let program = ShaderProgram::new(ShaderStage::Compute, [5; 16], vec![1]).with_thread_group_size(8, 8, 1);
        let shader = ComputeShader::new("Blur", vec![("Main".to_owned(), program)]).unwrap();

        let mut context = device.request_context(QueueType::Direct).unwrap();
        context.dispatch_compute(&shader, 0, 2, 2, 2).unwrap();
        context.dispatch_compute_by_thread_count(&shader, 0, 20, 9, 1).unwrap();
        context.dispatch_compute_by_thread_count(&shader, 0, 16, 8, 1).unwrap();
        context.submit().unwrap().wait_cpu().unwrap();

        let dispatches: Vec<_> = direct_queue(&device)
            .executed_commands()
            .into_iter()
            .filter(|c| matches!(c, null::Command::Dispatch { .. }))
            .collect();
        assert_eq!(
            dispatches,
            [
                null::Command::Dispatch { x: 2, y: 2, z: 2 },
                null::Command::Dispatch { x: 3, y: 2, z: 1 },
                null::Command::Dispatch { x: 2, y: 1, z: 1 },
            ]
        );
    }

    #[test]
    fn copies_and_resolves_touch_only_their_subresources() {
        let (device, _null) = null_device();
        let dest = texture_array(&device, "Dest", Format::R8G8B8A8Unorm, 3);
        let source = texture_array(&device, "Source", Format::R8G8B8A8Unorm, 3);
        let mut desc = TextureDesc::new_2d(Format::R8G8B8A8Unorm, 16, 16);
        desc.msaa_samples = 4;
        let multisampled = Texture::new_render(&device, "Multisampled", &desc).unwrap();

        let dest_slice = dest.subresource_index(TextureElement::Color, 2, 0);
        let source_slice = source.subresource_index(TextureElement::Color, 1, 0);

        let mut context = device.request_context(QueueType::Direct).unwrap();
        context.copy_texture(&dest, dest_slice, &source, source_slice);
        context.resolve_texture(&dest, 0, &multisampled, 0);
        context.submit().unwrap().wait_cpu().unwrap();

        assert_eq!(dest.resource().state(1), Some(ResourceState::COMMON));
        assert_eq!(source.resource().state(0), Some(ResourceState::COMMON));

        let (dest_id, source_id, msaa_id) = (
            null_id(dest.resource()),
            null_id(source.resource()),
            null_id(multisampled.resource()),
        );
        let commands = direct_queue(&device).executed_commands();
        assert_eq!(
            transitions(&commands),
            [
                (dest_id, 2, ResourceState::COMMON, ResourceState::COPY_DEST),
                (source_id, 1, ResourceState::COMMON, ResourceState::COPY_SOURCE),
                (dest_id, 0, ResourceState::COMMON, ResourceState::RESOLVE_DEST),
                (msaa_id, 0, ResourceState::COMMON, ResourceState::RESOLVE_SOURCE),
            ]
        );
        assert!(commands.contains(&null::Command::CopyTextureRegion {
            dest: dest_id,
            source: source_id,
        }));
        assert!(commands.contains(&null::Command::ResolveSubresource {
            dest: dest_id,
            dest_subresource: 0,
            source: msaa_id,
            source_subresource: 0,
            format: Format::R8G8B8A8Unorm,
        }));
    }

    #[test]
    fn predication_reads_the_buffer_as_an_argument() {
        let (device, _null) = null_device();
        let predicate = Buffer::new(&device, "Occlusion", &BufferDesc::new(8, 2, BufferUsages::COPY)).unwrap();

        let mut context = device.request_context(QueueType::Direct).unwrap();
        context.set_predication(Some((&predicate, 8, PredicationOp::EqualZero)));
        context.set_predication(None);
        context.submit().unwrap().wait_cpu().unwrap();

        let resource = predicate.resource();
        assert_eq!(resource.state(0), Some(ResourceState::PREDICATION));

        let offset = resource.offset() + predicate.element_offset(BufferElement::StructuredData) + 8;
        let commands: Vec<_> = direct_queue(&device)
            .executed_commands()
            .into_iter()
            .filter(|c| c.is_barrier() || matches!(c, null::Command::SetPredication(_)))
            .collect();
        assert_eq!(
            commands,
            [
                null::Command::Transition {
                    resource: null_id(resource),
                    subresource: ALL_SUBRESOURCES,
                    before: ResourceState::COMMON,
                    after: ResourceState::PREDICATION,
                },
                null::Command::SetPredication(Some((null_id(resource), offset, PredicationOp::EqualZero))),
                null::Command::SetPredication(None),
            ]
        );
    }

    #[test]
    fn fixed_function_state_is_set_on_change_only() {
        let (device, _null) = null_device();
        let target = render_target(&device);
        let vertex = ShaderProgram::new(ShaderStage::Vertex, [21; 16], vec![1]);
        let pixel = ShaderProgram::new(ShaderStage::Pixel, [22; 16], vec![2]);
        let pass = ShaderPass::new("Outline", vertex, pixel).with_render_state(RenderState::default(), Some(3));
        let material = Material::new("Outline", Arc::new(Shader::new("Outline", vec![pass])));

        let full = Viewport {
            x: 0.0,
            y: 0.0,
            width: 16.0,
            height: 16.0,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let half = Viewport { width: 8.0, ..full };
        let scissor = ScissorRect {
            left: 0,
            top: 0,
            right: 8,
            bottom: 8,
        };

        let mut context = device.request_context(QueueType::Direct).unwrap();
        context.set_render_targets(&[&target], None).unwrap();
        context.set_viewport(full);
        context.set_viewport(half);
        context.set_viewport(half);
        context.set_scissor_rect(scissor);
        context.set_scissor_rect(scissor);
        context.draw_geometry(Geometry::FullScreenTriangle, &material, 0).unwrap();
        context.draw_geometry(Geometry::FullScreenTriangle, &material, 0).unwrap();
        context.submit().unwrap().wait_cpu().unwrap();

        let commands = direct_queue(&device).executed_commands();
        let viewports: Vec<_> = commands
            .iter()
            .filter_map(|c| match c {
                null::Command::SetViewports(viewports) => Some(viewports.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(viewports, [vec![full], vec![half]]);

        let scissors = commands
            .iter()
            .filter(|c| matches!(c, null::Command::SetScissorRects(_)))
            .count();
        assert_eq!(scissors, 2);

        let stencil_refs: Vec<_> = commands
            .iter()
            .filter(|c| matches!(c, null::Command::SetStencilRef(_)))
            .collect();
        assert_eq!(stencil_refs, [&null::Command::SetStencilRef(3)]);
        assert_eq!(commands.iter().filter(|c| c.is_draw()).count(), 2);
    }
}
