use std::{collections::HashMap, sync::Arc};

use parking_lot::{const_rwlock, Mutex, RwLock};

use crate::{
    command::CommandContext,
    descriptor::{OfflineDescriptor, OfflineDescriptorAllocator, OnlineDescriptorMultiAllocator, SamplerCache},
    frame::CommandManager,
    hal::{
        self, AddressMode, ClearValue, CpuDescriptor, DescriptorHeapType, Filter, Format, QueueDesc, ResourceDesc,
        SamplerDesc, ViewDesc, ViewDimension,
    },
    heap::{AllocatorKind, HeapAllocators, SubAllocatorKind},
    mesh::{Geometry, Mesh},
    resource::{Resource, ResourceState},
    shader::RootSignatureCache,
    Backend, Config, Error, QueueType, Result,
};

static DEVICE: RwLock<Option<Arc<Device>>> = const_rwlock(None);

/// Creates the process-wide device. Fails if one already exists.
pub fn init_device(config: &Config) -> Result<Arc<Device>> {
    let mut slot = DEVICE.write();

    if slot.is_some() {
        return Err(Error::DeviceAlreadyInitialized);
    }

    let device = Arc::new(Device::new(config)?);
    *slot = Some(device.clone());
    Ok(device)
}

/// The device created by [`init_device`].
pub fn device() -> Result<Arc<Device>> {
    DEVICE.read().clone().ok_or(Error::NoDevice)
}

/// Waits for the GPU to finish and tears the process-wide device down.
///
/// Resources still held elsewhere keep the device alive; they are released
/// when the last of them is dropped.
pub fn destroy_device() -> Result<()> {
    let Some(device) = DEVICE.write().take() else {
        return Err(Error::NoDevice);
    };

    device.shutdown()?;

    let references = Arc::strong_count(&device) - 1;
    if references > 0 {
        log::warn!("device destroyed with {references} outstanding references");
    }

    Ok(())
}

/// The native device plus every allocator, cache and queue built on it.
pub struct Device {
    raw: Arc<dyn hal::Device>,
    config: Config,
    commands: CommandManager,
    heaps: HeapAllocators,
    offline: [Arc<OfflineDescriptorAllocator>; 4],
    online_views: Mutex<OnlineDescriptorMultiAllocator>,
    online_samplers: Mutex<OnlineDescriptorMultiAllocator>,
    samplers: SamplerCache,
    null_view: OfflineDescriptor,
    null_sampler: OfflineDescriptor,
    root_signatures: RootSignatureCache,
    geometry: Mutex<HashMap<Geometry, Arc<Mesh>>>,
}

impl Device {
    pub fn new(config: &Config) -> Result<Self> {
        let raw: Arc<dyn hal::Device> = match config.backend {
            Backend::Null => Arc::new(hal::null::Device::new()),
            #[cfg(target_os = "windows")]
            Backend::Dx12 => Arc::new(hal::dx12::Device::new(config)?),
            #[cfg(not(target_os = "windows"))]
            Backend::Dx12 => return Err(Error::BackendUnavailable),
        };

        Self::with_hal(raw, config)
    }

    /// Builds a device around an existing native device.
    pub fn with_hal(raw: Arc<dyn hal::Device>, config: &Config) -> Result<Self> {
        let commands = CommandManager::new(raw.clone(), &QueueDesc::default())?;
        let clock = commands.clock().clone();

        let heaps = HeapAllocators::new(&raw, &clock, config);
        let offline = DescriptorHeapType::ALL.map(|ty| {
            Arc::new(OfflineDescriptorAllocator::new(
                raw.clone(),
                clock.clone(),
                ty,
                config.offline_descriptor_page_sizes[ty.index()],
            ))
        });

        let online_views = OnlineDescriptorMultiAllocator::new(
            raw.clone(),
            DescriptorHeapType::CbvSrvUav,
            config.online_view_descriptor_heap_size,
        )?;
        let online_samplers = OnlineDescriptorMultiAllocator::new(
            raw.clone(),
            DescriptorHeapType::Sampler,
            config.online_sampler_descriptor_heap_size,
        )?;

        let samplers = SamplerCache::new(raw.clone(), offline[DescriptorHeapType::Sampler.index()].clone());
        let root_signatures = RootSignatureCache::new(raw.clone());

        let null_view = offline[DescriptorHeapType::CbvSrvUav.index()].allocate()?;
        raw.create_view(
            None,
            &ViewDesc::TextureSrv {
                format: Format::R8G8B8A8Unorm,
                dimension: ViewDimension::Texture2D,
                most_detailed_mip: 0,
                mip_levels: 1,
                first_slice: 0,
                array_size: 1,
            },
            null_view.cpu(),
        );
        let null_sampler = offline[DescriptorHeapType::Sampler.index()].allocate()?;
        raw.create_sampler(
            &SamplerDesc {
                filter: Filter::Point,
                address: AddressMode::Clamp,
                mip_lod_bias: 0.0,
                max_anisotropy: 1,
                comparison: None,
            },
            null_sampler.cpu(),
        );

        log::info!("created {:?} device", config.backend);

        Ok(Self {
            raw,
            config: config.clone(),
            commands,
            heaps,
            offline,
            online_views: Mutex::new(online_views),
            online_samplers: Mutex::new(online_samplers),
            samplers,
            null_view,
            null_sampler,
            root_signatures,
            geometry: Mutex::new(HashMap::new()),
        })
    }

    pub fn raw(&self) -> &Arc<dyn hal::Device> {
        &self.raw
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn commands(&self) -> &CommandManager {
        &self.commands
    }

    pub fn heaps(&self) -> &HeapAllocators {
        &self.heaps
    }

    pub fn root_signatures(&self) -> &RootSignatureCache {
        &self.root_signatures
    }

    pub fn offline_descriptors(&self, ty: DescriptorHeapType) -> &Arc<OfflineDescriptorAllocator> {
        &self.offline[ty.index()]
    }

    pub fn online_views(&self) -> &Mutex<OnlineDescriptorMultiAllocator> {
        &self.online_views
    }

    pub fn online_samplers(&self) -> &Mutex<OnlineDescriptorMultiAllocator> {
        &self.online_samplers
    }

    pub fn allocate_resource(
        &self,
        kind: AllocatorKind,
        name: &str,
        desc: &ResourceDesc,
        initial_state: ResourceState,
        clear_value: Option<&ClearValue>,
    ) -> Result<Resource> {
        self.heaps.allocate(kind, name, desc, initial_state, clear_value)
    }

    pub fn sub_allocate(&self, kind: SubAllocatorKind, name: &str, size: u64, alignment: u64) -> Result<Resource> {
        self.heaps.sub_allocate(kind, name, size, alignment)
    }

    pub fn allocate_descriptor(&self, ty: DescriptorHeapType) -> Result<OfflineDescriptor> {
        self.offline[ty.index()].allocate()
    }

    pub fn sampler(&self, desc: &SamplerDesc) -> Result<Arc<OfflineDescriptor>> {
        self.samplers.get(desc)
    }

    /// `(view, sampler)` descriptors with nothing behind them, copied into
    /// table slots that no binding fills.
    pub fn null_descriptors(&self) -> (CpuDescriptor, CpuDescriptor) {
        (self.null_view.cpu(), self.null_sampler.cpu())
    }

    /// An open context recording for the queue of type `ty`.
    pub fn request_context(self: &Arc<Self>, ty: QueueType) -> Result<CommandContext> {
        self.raw.check_removed()?;
        let (allocator, recycled) = self.commands.request(ty)?;
        Ok(CommandContext::new(self.clone(), allocator, recycled))
    }

    /// The shared mesh for `geometry`, built on first use.
    pub fn geometry(&self, geometry: Geometry) -> Result<Arc<Mesh>> {
        Ok(self
            .geometry
            .lock()
            .entry(geometry)
            .or_insert_with(|| Arc::new(geometry.build()))
            .clone())
    }

    pub fn next_frame_fence(&self) -> u64 {
        self.commands.next_frame_fence()
    }

    pub fn completed_frame_fence(&self) -> u64 {
        self.commands.completed_frame_fence()
    }

    /// Ends the frame: closes the frame's transient allocations and online
    /// descriptors, signals the frame fences, optionally waits for them, and
    /// frees whatever the GPU has finished with.
    pub fn signal_next_frame_fence(&self, wait: bool) -> Result<u64> {
        self.raw.check_removed()?;

        let key = self.commands.next_frame_fence();
        self.heaps.retire_frame(key);
        self.online_views.lock().retire_frame(key);
        self.online_samplers.lock().retire_frame(key);

        let value = self.commands.signal_next_frame_fence(wait)?;
        log::trace!("frame {value} ends");

        self.clean_up_resources();
        Ok(value)
    }

    /// Frees everything released with a key the GPU has passed.
    pub fn clean_up_resources(&self) {
        let completed = self.commands.completed_frame_fence();

        self.heaps.clean_up(completed);
        for offline in &self.offline {
            offline.clean_up(completed);
        }
        self.online_views.lock().clean_up(completed);
        self.online_samplers.lock().clean_up(completed);
    }

    pub fn wait_for_gpu_idle(&self) -> Result<()> {
        self.commands.wait_for_gpu_idle()?;
        self.signal_next_frame_fence(true)?;
        Ok(())
    }

    /// Drops the device's own references to GPU objects so that the device
    /// itself can be freed.
    fn shutdown(&self) -> Result<()> {
        self.geometry.lock().clear();
        self.samplers.clear();
        self.wait_for_gpu_idle()
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("backend", &self.config.backend)
            .field("commands", &self.commands)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        buffer::{Buffer, BufferAllocation, BufferDesc, BufferUsages},
        hal::{null, Format, HeapType, ResourceFlags},
        heap::PlacedKind,
        material::Material,
        mesh::MeshRenderer,
        shader::{Shader, ShaderPass, ShaderProgram, ShaderStage, INSTANCE_BUFFER},
        texture::{Texture, TextureDesc},
    };

    pub fn null_device() -> (Arc<Device>, Arc<null::Device>) {
        null_device_with(&Config {
            backend: Backend::Null,
            ..Config::default()
        })
    }

    pub fn null_device_with(config: &Config) -> (Arc<Device>, Arc<null::Device>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let null = Arc::new(null::Device::new());
        let device = Device::with_hal(null.clone(), config).unwrap();
        (Arc::new(device), null)
    }

    pub fn direct_queue(device: &Device) -> &null::Queue {
        device
            .commands()
            .queue(QueueType::Direct)
            .raw()
            .as_any()
            .downcast_ref::<null::Queue>()
            .unwrap()
    }

    pub fn null_id(resource: &Resource) -> u64 {
        resource.raw().as_any().downcast_ref::<null::Resource>().unwrap().id()
    }

    pub fn render_target(device: &Arc<Device>) -> Texture {
        Texture::new_render(device, "Target", &TextureDesc::new_2d(Format::R8G8B8A8Unorm, 16, 16)).unwrap()
    }

    #[test]
    fn global_device_lifecycle() {
        assert!(matches!(destroy_device(), Err(Error::NoDevice)));

        let config = Config {
            backend: Backend::Null,
            ..Config::default()
        };
        let created = init_device(&config).unwrap();
        assert!(Arc::ptr_eq(&created, &device().unwrap()));
        assert!(matches!(init_device(&config), Err(Error::DeviceAlreadyInitialized)));

        drop(created);
        destroy_device().unwrap();
        assert!(matches!(device(), Err(Error::NoDevice)));
    }

    #[test]
    fn released_resources_outlive_their_frame() {
        let (device, null) = null_device();
        let baseline = null.live_resources();

        let resource = device
            .allocate_resource(
                AllocatorKind::CommittedDefault,
                "Scratch",
                &ResourceDesc::buffer(4096, ResourceFlags::empty()),
                ResourceState::COMMON,
                None,
            )
            .unwrap();
        assert_eq!(null.live_resources(), baseline + 1);

        null.pause();
        drop(resource);
        device.signal_next_frame_fence(false).unwrap();
        assert_eq!(device.completed_frame_fence(), 0);
        assert_eq!(null.live_resources(), baseline + 1);

        null.resume();
        device.clean_up_resources();
        assert_eq!(null.live_resources(), baseline);
    }

    #[test]
    fn placed_blocks_outlive_the_copy_that_reads_them() {
        let (device, null) = null_device();
        let placed = device.heaps().placed(HeapType::Default, PlacedKind::Buffer).unwrap().clone();
        let baseline = placed.allocated_size();

        let desc = BufferDesc::new(4, 1024, BufferUsages::STRUCTURED);
        let dest = Buffer::new(&device, "Dest", &desc).unwrap();
        let source = Buffer::with_allocation(
            &device,
            "Source",
            &desc,
            BufferAllocation::Sub(SubAllocatorKind::PersistentUpload),
        )
        .unwrap();
        source.set_data(0, &[3; 4096]).unwrap();
        let used = placed.allocated_size();
        assert!(used > baseline);

        null.pause();
        let mut context = device.request_context(QueueType::Direct).unwrap();
        context.copy_buffer(&dest, &source);
        let copied = context.submit().unwrap();
        drop(dest);
        drop(source);
        device.signal_next_frame_fence(false).unwrap();

        assert!(!copied.is_completed());
        assert_eq!(placed.allocated_size(), used);
        assert_eq!(placed.pending_releases(), 1);

        null.resume();
        copied.wait_cpu().unwrap();
        device.clean_up_resources();
        assert_eq!(placed.allocated_size(), baseline);
        assert_eq!(placed.pending_releases(), 0);
        assert!(direct_queue(&device)
            .executed_commands()
            .iter()
            .any(|c| matches!(c, null::Command::CopyBufferRegion { size: 4096, .. })));
    }

    #[test]
    fn null_descriptors_have_nothing_behind_them() {
        let (device, null) = null_device();
        let (view, sampler) = device.null_descriptors();

        assert!(matches!(
            null.descriptor(view.0 as u64),
            Some(null::Descriptor::View { resource: None, .. })
        ));
        assert!(matches!(null.descriptor(sampler.0 as u64), Some(null::Descriptor::Sampler(_))));
    }

    #[test]
    fn removed_device_refuses_work() {
        let (device, null) = null_device();
        let context = device.request_context(QueueType::Direct).unwrap();

        null.remove();
        assert!(matches!(context.submit(), Err(Error::DeviceRemoved(_))));
        assert!(matches!(
            device.request_context(QueueType::Direct),
            Err(Error::DeviceRemoved(_))
        ));
        assert!(device.signal_next_frame_fence(false).unwrap_err().is_fatal());
    }

    #[test]
    fn gpu_waits_are_issued_before_execution() {
        let (device, _null) = null_device();

        let copy = device.request_context(QueueType::Copy).unwrap();
        let copied = copy.submit().unwrap();

        let mut direct = device.request_context(QueueType::Direct).unwrap();
        direct.wait_on_gpu(&copied);
        direct.submit().unwrap();

        let log = direct_queue(&device).log();
        let wait = log
            .iter()
            .position(|op| matches!(op, null::QueueOp::Wait { value, .. } if *value == copied.value()))
            .unwrap();
        let execute = log
            .iter()
            .position(|op| matches!(op, null::QueueOp::Execute { .. }))
            .unwrap();
        assert!(wait < execute);
    }

    #[test]
    fn transitions_between_flushes_merge() {
        let (device, _null) = null_device();
        let desc = ResourceDesc::buffer(256, ResourceFlags::empty());
        let a = device
            .allocate_resource(AllocatorKind::CommittedDefault, "A", &desc, ResourceState::COMMON, None)
            .unwrap();
        let b = device
            .allocate_resource(AllocatorKind::CommittedDefault, "B", &desc, ResourceState::COMMON, None)
            .unwrap();

        let mut context = device.request_context(QueueType::Direct).unwrap();
        context.transition_resource(&a, ResourceState::COPY_DEST);
        context.transition_resource(&a, ResourceState::COPY_SOURCE);
        context.transition_resource(&a, ResourceState::ALL_SHADER_RESOURCE);
        assert_eq!(context.pending_barrier_count(), 1);

        context.transition_resource(&b, ResourceState::COPY_DEST);
        context.transition_resource(&b, ResourceState::COMMON);
        assert_eq!(context.pending_barrier_count(), 1);

        // already there
        context.transition_resource(&a, ResourceState::PIXEL_SHADER_RESOURCE);
        assert_eq!(context.pending_barrier_count(), 1);

        direct_queue(&device).clear_log();
        context.submit().unwrap();

        let transitions: Vec<_> = direct_queue(&device)
            .executed_commands()
            .into_iter()
            .filter(|c| c.is_barrier())
            .collect();
        assert_eq!(transitions.len(), 1);
        match &transitions[0] {
            null::Command::Transition {
                resource,
                before,
                after,
                ..
            } => {
                assert_eq!(*resource, null_id(&a));
                assert_eq!(*before, ResourceState::COMMON);
                assert_eq!(*after, ResourceState::ALL_SHADER_RESOURCE);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(a.state(0), Some(ResourceState::ALL_SHADER_RESOURCE));
        assert_eq!(b.state(0), Some(ResourceState::COMMON));
    }

    fn textured_shader(texture_count: u32) -> Arc<Shader> {
        let vertex = ShaderProgram::new(ShaderStage::Vertex, [11; 16], vec![1]);
        let pixel = (0..texture_count).fold(
            ShaderProgram::new(ShaderStage::Pixel, [12; 16], vec![2]),
            |program, register| program.with_texture(&format!("_Layer{register}"), register, None),
        );
        Arc::new(Shader::new("Layered", vec![ShaderPass::new("Main", vertex, pixel)]))
    }

    fn layered_material(device: &Arc<Device>, name: &str, shader: &Arc<Shader>, count: u32) -> Material {
        let material = Material::new(name, shader.clone());
        for layer in 0..count {
            let texture = Texture::new_render(
                device,
                &format!("{name}{layer}"),
                &TextureDesc::new_2d(Format::R8G8B8A8Unorm, 4, 4),
            )
            .unwrap();
            material.set_texture(&format!("_Layer{layer}"), &texture);
        }
        material
    }

    #[test]
    fn full_online_heap_rolls_over() {
        let (device, _null) = null_device_with(&Config {
            backend: Backend::Null,
            online_view_descriptor_heap_size: 8,
            ..Config::default()
        });
        let shader = textured_shader(6);
        let first = layered_material(&device, "First", &shader, 6);
        let second = layered_material(&device, "Second", &shader, 6);
        let target = render_target(&device);

        let mut context = device.request_context(QueueType::Direct).unwrap();
        context.set_render_targets(&[&target], None).unwrap();
        context.draw_geometry(Geometry::FullScreenTriangle, &first, 0).unwrap();
        assert_eq!(device.online_views().lock().heap_count(), 1);

        context.draw_geometry(Geometry::FullScreenTriangle, &second, 0).unwrap();
        direct_queue(&device).clear_log();
        context.submit().unwrap();

        let online = device.online_views().lock();
        assert_eq!(online.heap_count(), 2);
        assert_eq!(online.current().used(), 6);
        let start = online.heap().gpu_start().unwrap();
        drop(online);

        let commands = direct_queue(&device).executed_commands();
        let heap_changes = commands
            .iter()
            .filter(|c| matches!(c, null::Command::SetDescriptorHeaps { .. }))
            .count();
        assert_eq!(heap_changes, 2);

        let last_table = commands
            .iter()
            .rev()
            .find_map(|c| match c {
                null::Command::SetRootDescriptorTable { table, .. } => Some(*table),
                _ => None,
            })
            .unwrap();
        assert_eq!(last_table, start);
    }

    #[test]
    fn missing_bindings_are_reported() {
        let (device, _null) = null_device();
        let shader = textured_shader(2);
        let material = layered_material(&device, "Half", &shader, 1);
        let target = render_target(&device);

        let mut context = device.request_context(QueueType::Direct).unwrap();
        context.set_render_targets(&[&target], None).unwrap();
        match context.draw_geometry(Geometry::Cube, &material, 0) {
            Err(Error::MissingBinding { kind, name }) => {
                assert_eq!(kind, "texture");
                assert_eq!(name, "_Layer1");
            }
            other => panic!("unexpected result {other:?}"),
        }

        // globals fill in what the material lacks
        let fallback = Texture::new_render(&device, "Fallback", &TextureDesc::new_2d(Format::R8G8B8A8Unorm, 4, 4))
            .unwrap();
        context.set_texture("_Layer1", &fallback);
        context.draw_geometry(Geometry::Cube, &material, 0).unwrap();
        assert!(fallback.resource().state(0).unwrap().has_all(ResourceState::PIXEL_SHADER_RESOURCE));
        context.submit().unwrap();
    }

    #[test]
    fn renderers_sharing_mesh_and_material_are_instanced() {
        let (device, _null) = null_device();
        let vertex = ShaderProgram::new(ShaderStage::Vertex, [21; 16], vec![3]).with_structured_buffer(INSTANCE_BUFFER, 0);
        let pixel = ShaderProgram::new(ShaderStage::Pixel, [22; 16], vec![4]);
        let shader = Arc::new(Shader::new(
            "Unlit",
            vec![ShaderPass::new("Forward", vertex, pixel).with_tag("LightMode", "Forward")],
        ));
        let a = Arc::new(Material::new("A", shader.clone()));
        let b = Arc::new(Material::new("B", shader));
        let mesh = device.geometry(Geometry::Cube).unwrap();
        let target = render_target(&device);

        let draws = |renderers: &[MeshRenderer]| -> Vec<u32> {
            let mut context = device.request_context(QueueType::Direct).unwrap();
            context.set_render_targets(&[&target], None).unwrap();
            context.draw_mesh_renderers(renderers, "Forward").unwrap();
            context.draw_mesh_renderers(renderers, "ShadowCaster").unwrap();

            direct_queue(&device).clear_log();
            context.submit().unwrap();
            direct_queue(&device)
                .executed_commands()
                .iter()
                .filter_map(|c| match c {
                    null::Command::DrawIndexedInstanced { instance_count, .. } => Some(*instance_count),
                    _ => None,
                })
                .collect()
        };

        let same = [
            MeshRenderer::new(mesh.clone(), vec![a.clone()]),
            MeshRenderer::new(mesh.clone(), vec![a.clone()]),
        ];
        assert_eq!(draws(&same), vec![2]);

        let mut hidden = MeshRenderer::new(mesh.clone(), vec![b.clone()]);
        hidden.active = false;
        let mixed = [
            MeshRenderer::new(mesh.clone(), vec![a.clone()]),
            MeshRenderer::new(mesh.clone(), vec![b.clone()]),
            hidden,
            MeshRenderer::new(mesh, vec![a]),
        ];
        assert_eq!(draws(&mixed), vec![2, 1]);
    }

    #[test]
    fn transient_upload_pages_are_reused() {
        let (device, null) = null_device();
        let page = device.config().upload_page_size;

        let upload = |size| {
            Buffer::with_allocation(
                &device,
                "Transient",
                &BufferDesc::new(size, 1, BufferUsages::CONSTANT),
                BufferAllocation::Sub(SubAllocatorKind::TempUpload),
            )
            .unwrap()
        };

        for _ in 0..4 {
            let _buffer = upload(1024);
            device.signal_next_frame_fence(true).unwrap();
        }
        assert_eq!(device.heaps().upload_linear().page_count(), 1);

        // a frame that is still in flight keeps its page
        null.pause();
        let _buffer = upload(1024);
        device.signal_next_frame_fence(false).unwrap();
        let _buffer = upload(1024);
        assert_eq!(device.heaps().upload_linear().page_count(), 2);

        null.resume();
        device.signal_next_frame_fence(true).unwrap();
        let _buffer = upload((page / 2) as u32);
        assert_eq!(device.heaps().upload_linear().page_count(), 2);
    }

    #[test]
    fn geometry_is_shared() {
        let (device, _null) = null_device();
        let a = device.geometry(Geometry::Sphere).unwrap();
        let b = device.geometry(Geometry::Sphere).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &device.geometry(Geometry::Cube).unwrap()));
    }
}
