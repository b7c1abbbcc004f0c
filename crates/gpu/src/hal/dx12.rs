//! The Direct3D 12 backend.
//!
//! Every wrapper here owns a single COM interface. D3D12 objects are free
//! threaded, which is what the `Send + Sync` impls at the bottom of the file
//! rely on. Objects from another backend passed to any of these methods are a
//! programming error.

use std::{any::Any, ffi::CString, mem::ManuallyDrop, ptr::NonNull};

use parking_lot::Mutex;
use smallvec::SmallVec;
use windows::{
    core::{ComInterface, HSTRING, PCSTR},
    Win32::{
        Foundation::{CloseHandle, E_OUTOFMEMORY, HANDLE, RECT},
        Graphics::{
            Direct3D::*,
            Direct3D12::*,
            Dxgi::{
                Common::*, CreateDXGIFactory2, IDXGIAdapter, IDXGIFactory6,
                DXGI_CREATE_FACTORY_DEBUG, DXGI_ERROR_DEVICE_HUNG, DXGI_ERROR_DEVICE_REMOVED,
                DXGI_ERROR_DEVICE_RESET, DXGI_GPU_PREFERENCE_HIGH_PERFORMANCE,
                DXGI_GPU_PREFERENCE_MINIMUM_POWER,
            },
        },
        System::Threading::{CreateEventW, WaitForSingleObject},
    },
};

use super::{
    AddressMode, AllocationInfo, Barrier, BlendMode, ClearFlags, ClearValue, CompareFunc,
    ComputePipelineDesc, CopyLocation, CpuDescriptor, CullMode, DescriptorHeapType,
    DescriptorRangeKind, Filter, Format, GpuDescriptor, GraphicsPipelineDesc, HeapDesc, HeapType,
    HeapUsage, IndexBufferView, InputClassification, PipelineKind, PlacedFootprint, PredicationOp,
    PrimitiveTopology, QueueDesc, QueuePriority, QueueType, ResourceDesc, ResourceDimension,
    RootParameterKind, RootSignatureDesc, SamplerDesc, ScissorRect, ShaderVisibility, TopologyType,
    VertexBufferView, ViewDesc, ViewDimension, Viewport,
};
use crate::{resource::ResourceState, Config, Error, PowerPreference, Result};

fn check<T>(call: &'static str, result: windows::core::Result<T>) -> Result<T> {
    result.map_err(|error| {
        let code = error.code();
        let message = error.message().to_string();

        if code == DXGI_ERROR_DEVICE_REMOVED
            || code == DXGI_ERROR_DEVICE_RESET
            || code == DXGI_ERROR_DEVICE_HUNG
        {
            Error::DeviceRemoved(format!("{call}: {message}"))
        } else {
            Error::Backend { call, message }
        }
    })
}

/// Like [`check`], but reports driver out-of-memory as such.
fn check_alloc<T>(call: &'static str, requested: u64, result: windows::core::Result<T>) -> Result<T> {
    match result {
        Err(error) if error.code() == E_OUTOFMEMORY => Err(Error::OutOfMemory { requested }),
        other => check(call, other),
    }
}

fn created<T>(call: &'static str, object: Option<T>) -> Result<T> {
    object.ok_or_else(|| Error::Backend {
        call,
        message: "no object was returned".to_owned(),
    })
}

fn downcast<'a, T: 'static>(any: &'a dyn Any, what: &'static str) -> Result<&'a T> {
    any.downcast_ref::<T>().ok_or(Error::Backend {
        call: what,
        message: "object does not belong to the D3D12 backend".to_owned(),
    })
}

/// Panicking variant for recording calls, which cannot report errors.
fn expect_native<T: 'static>(any: &dyn Any) -> &T {
    match any.downcast_ref::<T>() {
        Some(object) => object,
        None => panic!("object does not belong to the D3D12 backend"),
    }
}

fn raw_resource(resource: &dyn super::NativeResource) -> &ID3D12Resource {
    &expect_native::<Resource>(resource.as_any()).resource
}

/// A non-owning copy of an interface pointer, for the descriptor structs that
/// hold one without adding a reference.
fn borrowed<T: ComInterface>(interface: &T) -> ManuallyDrop<Option<T>> {
    ManuallyDrop::new(Some(unsafe { std::mem::transmute_copy(interface) }))
}

fn set_name<T: ComInterface>(object: &T, name: &str) {
    if name.is_empty() {
        return;
    }

    if let Ok(object) = object.cast::<ID3D12Object>() {
        if let Err(error) = unsafe { object.SetName(&HSTRING::from(name)) } {
            log::debug!("could not name D3D12 object {name}: {error}");
        }
    }
}

pub struct Device {
    device: ID3D12Device,
    info_queue: Option<ID3D12InfoQueue>,
    _factory: IDXGIFactory6,
    _adapter: IDXGIAdapter,
}

impl Device {
    pub fn new(config: &Config) -> Result<Self> {
        let enable_debug = config.debug_layer_enabled();

        let factory: IDXGIFactory6 = {
            let flags = if enable_debug { DXGI_CREATE_FACTORY_DEBUG } else { 0 };
            check("CreateDXGIFactory2", unsafe { CreateDXGIFactory2(flags) })?
        };

        let power_preference = match config.power_preference {
            PowerPreference::LowPower => DXGI_GPU_PREFERENCE_MINIMUM_POWER,
            PowerPreference::HighPerformance => DXGI_GPU_PREFERENCE_HIGH_PERFORMANCE,
        };

        let adapter: IDXGIAdapter = check(
            "EnumAdapterByGpuPreference",
            unsafe { factory.EnumAdapterByGpuPreference(0, power_preference) }
                .or_else(|_| unsafe { factory.EnumWarpAdapter() }),
        )?;

        if let Ok(desc) = unsafe { adapter.GetDesc() } {
            let len = desc.Description.iter().position(|c| *c == 0).unwrap_or(desc.Description.len());
            log::info!(
                "using adapter {} ({} MiB dedicated video memory)",
                String::from_utf16_lossy(&desc.Description[..len]),
                desc.DedicatedVideoMemory / (1024 * 1024)
            );
        }

        if enable_debug {
            let mut debug: Option<ID3D12Debug> = None;
            check("D3D12GetDebugInterface", unsafe { D3D12GetDebugInterface(&mut debug) })?;
            if let Some(debug) = debug {
                unsafe { debug.EnableDebugLayer() };
                log::info!("D3D12 debug layer enabled");
            }
        }

        let device = {
            let mut device: Option<ID3D12Device> = None;
            check("D3D12CreateDevice", unsafe {
                D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, &mut device)
            })?;
            created("D3D12CreateDevice", device)?
        };

        let info_queue = if enable_debug {
            device.cast::<ID3D12InfoQueue>().ok()
        } else {
            None
        };

        Ok(Self {
            device,
            info_queue,
            _factory: factory,
            _adapter: adapter,
        })
    }

    pub fn raw(&self) -> &ID3D12Device {
        &self.device
    }

    /// Drains the debug layer's message queue into the log.
    fn forward_debug_messages(&self) {
        let Some(info_queue) = &self.info_queue else {
            return;
        };

        unsafe {
            for index in 0..info_queue.GetNumStoredMessages() {
                let mut length = 0;
                if info_queue.GetMessage(index, None, &mut length).is_err() {
                    continue;
                }

                let mut storage = vec![0u64; length.div_ceil(8)];
                let message = storage.as_mut_ptr().cast::<D3D12_MESSAGE>();
                if info_queue.GetMessage(index, Some(message), &mut length).is_err() {
                    continue;
                }

                let message = &*message;
                let text = std::slice::from_raw_parts(
                    message.pDescription.cast::<u8>(),
                    message.DescriptionByteLength.saturating_sub(1),
                );
                let text = String::from_utf8_lossy(text);

                match message.Severity {
                    D3D12_MESSAGE_SEVERITY_CORRUPTION | D3D12_MESSAGE_SEVERITY_ERROR => {
                        log::error!("D3D12: {text}")
                    }
                    D3D12_MESSAGE_SEVERITY_WARNING => log::warn!("D3D12: {text}"),
                    _ => log::debug!("D3D12: {text}"),
                }
            }

            info_queue.ClearStoredMessages();
        }
    }
}

impl super::Device for Device {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn check_removed(&self) -> Result<()> {
        self.forward_debug_messages();
        unsafe { self.device.GetDeviceRemovedReason() }
            .map_err(|error| Error::DeviceRemoved(error.message().to_string()))
    }

    fn create_fence(&self, initial_value: u64, name: &str) -> Result<Box<dyn super::Fence>> {
        let fence: ID3D12Fence = check("CreateFence", unsafe {
            self.device.CreateFence(initial_value, D3D12_FENCE_FLAG_NONE)
        })?;
        set_name(&fence, name);

        let event = check("CreateEventW", unsafe { CreateEventW(None, false, false, None) })?;

        Ok(Box::new(Fence {
            fence,
            event,
            waiting: Mutex::new(()),
        }))
    }

    fn create_queue(&self, ty: QueueType, desc: &QueueDesc, name: &str) -> Result<Box<dyn super::Queue>> {
        let queue_desc = D3D12_COMMAND_QUEUE_DESC {
            Type: command_list_type(ty),
            Priority: match desc.priority {
                QueuePriority::Normal => D3D12_COMMAND_QUEUE_PRIORITY_NORMAL.0,
                QueuePriority::High => D3D12_COMMAND_QUEUE_PRIORITY_HIGH.0,
            },
            Flags: if desc.disable_gpu_timeout {
                D3D12_COMMAND_QUEUE_FLAG_DISABLE_GPU_TIMEOUT
            } else {
                D3D12_COMMAND_QUEUE_FLAG_NONE
            },
            NodeMask: 0,
        };

        let queue: ID3D12CommandQueue =
            check("CreateCommandQueue", unsafe { self.device.CreateCommandQueue(&queue_desc) })?;
        set_name(&queue, name);

        Ok(Box::new(Queue { queue }))
    }

    fn create_command_allocator(&self, ty: QueueType) -> Result<Box<dyn super::CommandAllocator>> {
        let allocator: ID3D12CommandAllocator = check("CreateCommandAllocator", unsafe {
            self.device.CreateCommandAllocator(command_list_type(ty))
        })?;
        set_name(&allocator, &format!("{}CommandAllocator", ty.name()));

        Ok(Box::new(CommandAllocator { allocator, ty }))
    }

    fn create_command_list(
        &self,
        ty: QueueType,
        allocator: &dyn super::CommandAllocator,
    ) -> Result<Box<dyn super::CommandList>> {
        let allocator = downcast::<CommandAllocator>(allocator.as_any(), "CreateCommandList")?;
        debug_assert_eq!(allocator.ty, ty);

        let list: ID3D12GraphicsCommandList = check("CreateCommandList", unsafe {
            self.device
                .CreateCommandList(0, command_list_type(ty), &allocator.allocator, None)
        })?;
        set_name(&list, &format!("{}CommandList", ty.name()));

        Ok(Box::new(CommandList { list, ty }))
    }

    fn create_heap(&self, desc: &HeapDesc, name: &str) -> Result<Box<dyn super::Heap>> {
        let heap_desc = D3D12_HEAP_DESC {
            SizeInBytes: desc.size,
            Properties: heap_properties(desc.heap_type),
            Alignment: desc.alignment,
            Flags: match desc.usage {
                HeapUsage::Buffers => D3D12_HEAP_FLAG_ALLOW_ONLY_BUFFERS,
                HeapUsage::Textures => D3D12_HEAP_FLAG_ALLOW_ONLY_NON_RT_DS_TEXTURES,
                HeapUsage::RenderTextures => D3D12_HEAP_FLAG_ALLOW_ONLY_RT_DS_TEXTURES,
            },
        };

        let mut heap: Option<ID3D12Heap> = None;
        check_alloc("CreateHeap", desc.size, unsafe {
            self.device.CreateHeap(&heap_desc, &mut heap)
        })?;
        let heap = created("CreateHeap", heap)?;
        set_name(&heap, name);

        Ok(Box::new(Heap { heap, desc: *desc }))
    }

    fn resource_allocation_info(&self, desc: &ResourceDesc) -> AllocationInfo {
        let info = unsafe { self.device.GetResourceAllocationInfo(0, &[resource_desc(desc)]) };
        AllocationInfo {
            size: info.SizeInBytes,
            alignment: info.Alignment,
        }
    }

    fn create_committed_resource(
        &self,
        heap_type: HeapType,
        desc: &ResourceDesc,
        initial_state: ResourceState,
        clear_value: Option<&ClearValue>,
        name: &str,
    ) -> Result<Box<dyn super::NativeResource>> {
        let clear = clear_value.map(clear_value_desc);
        let mut resource: Option<ID3D12Resource> = None;

        check_alloc("CreateCommittedResource", desc.width, unsafe {
            self.device.CreateCommittedResource(
                &heap_properties(heap_type),
                D3D12_HEAP_FLAG_NONE,
                &resource_desc(desc),
                resource_states(initial_state),
                clear.as_ref().map(|clear| clear as *const _),
                &mut resource,
            )
        })?;

        Ok(Box::new(Resource::new(
            created("CreateCommittedResource", resource)?,
            *desc,
            name,
        )))
    }

    fn create_placed_resource(
        &self,
        heap: &dyn super::Heap,
        offset: u64,
        desc: &ResourceDesc,
        initial_state: ResourceState,
        clear_value: Option<&ClearValue>,
        name: &str,
    ) -> Result<Box<dyn super::NativeResource>> {
        let heap = downcast::<Heap>(heap.as_any(), "CreatePlacedResource")?;
        let clear = clear_value.map(clear_value_desc);
        let mut resource: Option<ID3D12Resource> = None;

        check_alloc("CreatePlacedResource", desc.width, unsafe {
            self.device.CreatePlacedResource(
                &heap.heap,
                offset,
                &resource_desc(desc),
                resource_states(initial_state),
                clear.as_ref().map(|clear| clear as *const _),
                &mut resource,
            )
        })?;

        Ok(Box::new(Resource::new(
            created("CreatePlacedResource", resource)?,
            *desc,
            name,
        )))
    }

    fn copyable_footprints(
        &self,
        desc: &ResourceDesc,
        first: u32,
        count: u32,
        base_offset: u64,
    ) -> (Vec<PlacedFootprint>, u64) {
        let native_desc = resource_desc(desc);
        let mut layouts = vec![D3D12_PLACED_SUBRESOURCE_FOOTPRINT::default(); count as usize];
        let mut rows = vec![0u32; count as usize];
        let mut row_sizes = vec![0u64; count as usize];
        let mut total = 0;

        unsafe {
            self.device.GetCopyableFootprints(
                &native_desc,
                first,
                count,
                base_offset,
                Some(layouts.as_mut_ptr()),
                Some(rows.as_mut_ptr()),
                Some(row_sizes.as_mut_ptr()),
                Some(&mut total),
            );
        }

        let footprints = layouts
            .iter()
            .zip(rows)
            .zip(row_sizes)
            .map(|((layout, num_rows), row_size)| PlacedFootprint {
                offset: layout.Offset,
                format: desc.format,
                width: layout.Footprint.Width,
                height: layout.Footprint.Height,
                depth: layout.Footprint.Depth,
                row_pitch: layout.Footprint.RowPitch,
                num_rows,
                row_size,
            })
            .collect();

        (footprints, total)
    }

    fn create_descriptor_heap(
        &self,
        ty: DescriptorHeapType,
        capacity: u32,
        shader_visible: bool,
        name: &str,
    ) -> Result<Box<dyn super::DescriptorHeap>> {
        let heap: ID3D12DescriptorHeap = check("CreateDescriptorHeap", unsafe {
            self.device.CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                Type: descriptor_heap_type(ty),
                NumDescriptors: capacity,
                Flags: if shader_visible {
                    D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
                } else {
                    D3D12_DESCRIPTOR_HEAP_FLAG_NONE
                },
                NodeMask: 0,
            })
        })?;
        set_name(&heap, name);

        let cpu_start = CpuDescriptor(unsafe { heap.GetCPUDescriptorHandleForHeapStart() }.ptr);
        let gpu_start = shader_visible
            .then(|| GpuDescriptor(unsafe { heap.GetGPUDescriptorHandleForHeapStart() }.ptr));

        Ok(Box::new(DescriptorHeap {
            heap,
            ty,
            capacity,
            increment_size: self.descriptor_increment_size(ty),
            cpu_start,
            gpu_start,
        }))
    }

    fn descriptor_increment_size(&self, ty: DescriptorHeapType) -> u32 {
        unsafe {
            self.device
                .GetDescriptorHandleIncrementSize(descriptor_heap_type(ty))
        }
    }

    fn create_view(&self, resource: Option<&dyn super::NativeResource>, view: &ViewDesc, dest: CpuDescriptor) {
        let raw = resource.map(raw_resource);
        let dest = cpu_handle(dest);

        unsafe {
            match *view {
                ViewDesc::ConstantBuffer { address, size } => {
                    self.device.CreateConstantBufferView(
                        Some(&D3D12_CONSTANT_BUFFER_VIEW_DESC {
                            BufferLocation: address,
                            SizeInBytes: size,
                        }),
                        dest,
                    );
                }
                ViewDesc::BufferSrv { .. } | ViewDesc::TextureSrv { .. } => {
                    self.device
                        .CreateShaderResourceView(raw, Some(&srv_desc(view)), dest);
                }
                ViewDesc::BufferUav { counter_offset, .. } => {
                    let counter = counter_offset.and(raw);
                    self.device
                        .CreateUnorderedAccessView(raw, counter, Some(&uav_desc(view)), dest);
                }
                ViewDesc::TextureUav { .. } => {
                    self.device.CreateUnorderedAccessView(
                        raw,
                        None::<&ID3D12Resource>,
                        Some(&uav_desc(view)),
                        dest,
                    );
                }
                ViewDesc::RenderTarget {
                    format,
                    dimension,
                    mip_slice,
                    first_slice,
                    array_size,
                } => {
                    let desc = rtv_desc(format, dimension, mip_slice, first_slice, array_size);
                    self.device.CreateRenderTargetView(raw, Some(&desc), dest);
                }
                ViewDesc::DepthStencil {
                    format,
                    dimension,
                    mip_slice,
                    first_slice,
                    array_size,
                } => {
                    let desc = dsv_desc(format, dimension, mip_slice, first_slice, array_size);
                    self.device.CreateDepthStencilView(raw, Some(&desc), dest);
                }
            }
        }
    }

    fn create_sampler(&self, desc: &SamplerDesc, dest: CpuDescriptor) {
        let address = address_mode(desc.address);
        let sampler = D3D12_SAMPLER_DESC {
            Filter: filter(desc.filter),
            AddressU: address,
            AddressV: address,
            AddressW: address,
            MipLODBias: desc.mip_lod_bias,
            MaxAnisotropy: desc.max_anisotropy,
            ComparisonFunc: desc
                .comparison
                .map_or(D3D12_COMPARISON_FUNC_NEVER, comparison_func),
            BorderColor: [0.0; 4],
            MinLOD: 0.0,
            MaxLOD: f32::MAX,
        };

        unsafe { self.device.CreateSampler(&sampler, cpu_handle(dest)) };
    }

    fn copy_descriptors(&self, ty: DescriptorHeapType, dest: CpuDescriptor, sources: &[CpuDescriptor]) {
        let increment = self.descriptor_increment_size(ty);
        let heap_type = descriptor_heap_type(ty);

        for (index, source) in sources.iter().enumerate() {
            unsafe {
                self.device.CopyDescriptorsSimple(
                    1,
                    cpu_handle(dest.offset(index as u32, increment)),
                    cpu_handle(*source),
                    heap_type,
                );
            }
        }
    }

    fn create_root_signature(&self, desc: &RootSignatureDesc) -> Result<Box<dyn super::RootSignature>> {
        let ranges: Vec<Vec<D3D12_DESCRIPTOR_RANGE>> = desc
            .parameters
            .iter()
            .map(|parameter| match &parameter.kind {
                RootParameterKind::Table(ranges) => ranges
                    .iter()
                    .map(|range| D3D12_DESCRIPTOR_RANGE {
                        RangeType: match range.kind {
                            DescriptorRangeKind::Srv => D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
                            DescriptorRangeKind::Uav => D3D12_DESCRIPTOR_RANGE_TYPE_UAV,
                            DescriptorRangeKind::Cbv => D3D12_DESCRIPTOR_RANGE_TYPE_CBV,
                            DescriptorRangeKind::Sampler => D3D12_DESCRIPTOR_RANGE_TYPE_SAMPLER,
                        },
                        NumDescriptors: range.count,
                        BaseShaderRegister: range.base_register,
                        RegisterSpace: range.space,
                        OffsetInDescriptorsFromTableStart: range.table_offset,
                    })
                    .collect(),
                _ => Vec::new(),
            })
            .collect();

        let parameters: Vec<D3D12_ROOT_PARAMETER> = desc
            .parameters
            .iter()
            .zip(&ranges)
            .map(|(parameter, ranges)| {
                let (ty, anonymous) = match parameter.kind {
                    RootParameterKind::Cbv { register, space } => (
                        D3D12_ROOT_PARAMETER_TYPE_CBV,
                        D3D12_ROOT_PARAMETER_0 {
                            Descriptor: D3D12_ROOT_DESCRIPTOR {
                                ShaderRegister: register,
                                RegisterSpace: space,
                            },
                        },
                    ),
                    RootParameterKind::Srv { register, space } => (
                        D3D12_ROOT_PARAMETER_TYPE_SRV,
                        D3D12_ROOT_PARAMETER_0 {
                            Descriptor: D3D12_ROOT_DESCRIPTOR {
                                ShaderRegister: register,
                                RegisterSpace: space,
                            },
                        },
                    ),
                    RootParameterKind::Table(_) => (
                        D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
                        D3D12_ROOT_PARAMETER_0 {
                            DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                                NumDescriptorRanges: ranges.len() as u32,
                                pDescriptorRanges: ranges.as_ptr(),
                            },
                        },
                    ),
                };

                D3D12_ROOT_PARAMETER {
                    ParameterType: ty,
                    Anonymous: anonymous,
                    ShaderVisibility: shader_visibility(parameter.visibility),
                }
            })
            .collect();

        let static_samplers: Vec<D3D12_STATIC_SAMPLER_DESC> = desc
            .static_samplers
            .iter()
            .map(|sampler| {
                let address = address_mode(sampler.desc.address);
                D3D12_STATIC_SAMPLER_DESC {
                    Filter: filter(sampler.desc.filter),
                    AddressU: address,
                    AddressV: address,
                    AddressW: address,
                    MipLODBias: sampler.desc.mip_lod_bias,
                    MaxAnisotropy: sampler.desc.max_anisotropy,
                    ComparisonFunc: sampler
                        .desc
                        .comparison
                        .map_or(D3D12_COMPARISON_FUNC_NEVER, comparison_func),
                    BorderColor: D3D12_STATIC_BORDER_COLOR_OPAQUE_BLACK,
                    MinLOD: 0.0,
                    MaxLOD: f32::MAX,
                    ShaderRegister: sampler.register,
                    RegisterSpace: sampler.space,
                    ShaderVisibility: shader_visibility(sampler.visibility),
                }
            })
            .collect();

        let root_desc = D3D12_ROOT_SIGNATURE_DESC {
            NumParameters: parameters.len() as u32,
            pParameters: parameters.as_ptr(),
            NumStaticSamplers: static_samplers.len() as u32,
            pStaticSamplers: static_samplers.as_ptr(),
            Flags: if desc.allow_input_layout {
                D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT
            } else {
                D3D12_ROOT_SIGNATURE_FLAG_NONE
            },
        };

        let mut blob: Option<ID3DBlob> = None;
        let mut error: Option<ID3DBlob> = None;
        let serialized = unsafe {
            D3D12SerializeRootSignature(
                &root_desc,
                D3D_ROOT_SIGNATURE_VERSION_1,
                &mut blob,
                Some(&mut error),
            )
        };

        if let Err(serialize_error) = serialized {
            let message = error
                .map(|error| String::from_utf8_lossy(blob_bytes(&error)).into_owned())
                .unwrap_or_else(|| serialize_error.message().to_string());
            return Err(Error::PipelineCreation(format!(
                "root signature serialization failed: {message}"
            )));
        }

        let blob = created("D3D12SerializeRootSignature", blob)?;
        let root_signature: ID3D12RootSignature = check("CreateRootSignature", unsafe {
            self.device.CreateRootSignature(0, blob_bytes(&blob))
        })?;

        Ok(Box::new(RootSignature { root_signature }))
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> Result<Box<dyn super::PipelineState>> {
        let root_signature =
            downcast::<RootSignature>(desc.root_signature.as_any(), "CreateGraphicsPipelineState")?;

        let semantic_names = desc
            .input_layout
            .iter()
            .map(|element| {
                CString::new(element.semantic_name.as_str()).map_err(|_| {
                    Error::PipelineCreation(format!(
                        "semantic name {:?} contains a nul byte",
                        element.semantic_name
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let input_elements: Vec<D3D12_INPUT_ELEMENT_DESC> = desc
            .input_layout
            .iter()
            .zip(&semantic_names)
            .map(|(element, name)| D3D12_INPUT_ELEMENT_DESC {
                SemanticName: PCSTR(name.as_ptr().cast()),
                SemanticIndex: element.semantic_index,
                Format: dxgi_format(element.format),
                InputSlot: element.input_slot,
                AlignedByteOffset: D3D12_APPEND_ALIGNED_ELEMENT,
                InputSlotClass: match element.classification {
                    InputClassification::PerVertex => D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
                    InputClassification::PerInstance => D3D12_INPUT_CLASSIFICATION_PER_INSTANCE_DATA,
                },
                InstanceDataStepRate: element.instance_step_rate,
            })
            .collect();

        let state = desc.render_state;
        let mut rtv_formats = [DXGI_FORMAT_UNKNOWN; 8];
        for (native, format) in rtv_formats.iter_mut().zip(desc.rtv_formats) {
            *native = dxgi_format(*format);
        }

        let has_depth = desc.dsv_format != Format::Unknown;
        let stencil_face = D3D12_DEPTH_STENCILOP_DESC {
            StencilFailOp: D3D12_STENCIL_OP_KEEP,
            StencilDepthFailOp: D3D12_STENCIL_OP_KEEP,
            StencilPassOp: D3D12_STENCIL_OP_KEEP,
            StencilFunc: state
                .stencil_test
                .map_or(D3D12_COMPARISON_FUNC_ALWAYS, comparison_func),
        };

        let pipeline_desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
            pRootSignature: borrowed(&root_signature.root_signature),
            VS: shader_bytecode(desc.vertex_shader),
            PS: shader_bytecode(desc.pixel_shader),
            BlendState: D3D12_BLEND_DESC {
                AlphaToCoverageEnable: false.into(),
                IndependentBlendEnable: false.into(),
                RenderTarget: [blend_desc(state.blend); 8],
            },
            SampleMask: u32::MAX,
            RasterizerState: D3D12_RASTERIZER_DESC {
                FillMode: if desc.wireframe {
                    D3D12_FILL_MODE_WIREFRAME
                } else {
                    D3D12_FILL_MODE_SOLID
                },
                CullMode: match state.cull {
                    CullMode::None => D3D12_CULL_MODE_NONE,
                    CullMode::Front => D3D12_CULL_MODE_FRONT,
                    CullMode::Back => D3D12_CULL_MODE_BACK,
                },
                FrontCounterClockwise: false.into(),
                DepthBias: desc.depth_bias,
                DepthBiasClamp: desc.depth_bias_clamp,
                SlopeScaledDepthBias: desc.slope_scaled_depth_bias,
                DepthClipEnable: true.into(),
                MultisampleEnable: (desc.sample_count > 1).into(),
                AntialiasedLineEnable: false.into(),
                ForcedSampleCount: 0,
                ConservativeRaster: D3D12_CONSERVATIVE_RASTERIZATION_MODE_OFF,
            },
            DepthStencilState: D3D12_DEPTH_STENCIL_DESC {
                DepthEnable: (has_depth && state.depth_test.is_some()).into(),
                DepthWriteMask: if has_depth && state.depth_write {
                    D3D12_DEPTH_WRITE_MASK_ALL
                } else {
                    D3D12_DEPTH_WRITE_MASK_ZERO
                },
                DepthFunc: state
                    .depth_test
                    .map_or(D3D12_COMPARISON_FUNC_ALWAYS, comparison_func),
                StencilEnable: (desc.dsv_format.has_stencil() && state.stencil_test.is_some()).into(),
                StencilReadMask: 0xFF,
                StencilWriteMask: 0xFF,
                FrontFace: stencil_face,
                BackFace: stencil_face,
            },
            InputLayout: D3D12_INPUT_LAYOUT_DESC {
                pInputElementDescs: input_elements.as_ptr(),
                NumElements: input_elements.len() as u32,
            },
            PrimitiveTopologyType: match desc.topology_type {
                TopologyType::Undefined => D3D12_PRIMITIVE_TOPOLOGY_TYPE_UNDEFINED,
                TopologyType::Point => D3D12_PRIMITIVE_TOPOLOGY_TYPE_POINT,
                TopologyType::Line => D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE,
                TopologyType::Triangle => D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
            },
            NumRenderTargets: desc.rtv_formats.len() as u32,
            RTVFormats: rtv_formats,
            DSVFormat: dxgi_format(desc.dsv_format),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: desc.sample_count.max(1),
                Quality: desc.sample_quality,
            },
            NodeMask: 0,
            Flags: D3D12_PIPELINE_STATE_FLAG_NONE,
            ..Default::default()
        };

        let pipeline: ID3D12PipelineState =
            unsafe { self.device.CreateGraphicsPipelineState(&pipeline_desc) }
                .map_err(|error| Error::PipelineCreation(error.message().to_string()))?;

        Ok(Box::new(PipelineState { pipeline }))
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> Result<Box<dyn super::PipelineState>> {
        let root_signature =
            downcast::<RootSignature>(desc.root_signature.as_any(), "CreateComputePipelineState")?;

        let pipeline_desc = D3D12_COMPUTE_PIPELINE_STATE_DESC {
            pRootSignature: borrowed(&root_signature.root_signature),
            CS: shader_bytecode(desc.compute_shader),
            NodeMask: 0,
            Flags: D3D12_PIPELINE_STATE_FLAG_NONE,
            ..Default::default()
        };

        let pipeline: ID3D12PipelineState =
            unsafe { self.device.CreateComputePipelineState(&pipeline_desc) }
                .map_err(|error| Error::PipelineCreation(error.message().to_string()))?;

        Ok(Box::new(PipelineState { pipeline }))
    }
}

pub struct Fence {
    fence: ID3D12Fence,
    event: HANDLE,
    /// The event is auto-reset, so only one thread may wait on it at a time.
    waiting: Mutex<()>,
}

impl super::Fence for Fence {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn completed_value(&self) -> u64 {
        unsafe { self.fence.GetCompletedValue() }
    }

    fn signal(&self, value: u64) -> Result<()> {
        check("ID3D12Fence::Signal", unsafe { self.fence.Signal(value) })
    }

    fn wait(&self, value: u64) -> Result<()> {
        if self.completed_value() >= value {
            return Ok(());
        }

        let _guard = self.waiting.lock();
        check("SetEventOnCompletion", unsafe {
            self.fence.SetEventOnCompletion(value, self.event)
        })?;
        unsafe { WaitForSingleObject(self.event, u32::MAX) };

        // A removed device completes every fence with u64::MAX.
        if self.completed_value() == u64::MAX {
            return Err(Error::DeviceRemoved(
                "fence completed with the removal sentinel".to_owned(),
            ));
        }

        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        let _ = unsafe { CloseHandle(self.event) };
    }
}

pub struct Queue {
    queue: ID3D12CommandQueue,
}

impl super::Queue for Queue {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn signal(&self, fence: &dyn super::Fence, value: u64) -> Result<()> {
        let fence = downcast::<Fence>(fence.as_any(), "ID3D12CommandQueue::Signal")?;
        check("ID3D12CommandQueue::Signal", unsafe {
            self.queue.Signal(&fence.fence, value)
        })
    }

    fn wait(&self, fence: &dyn super::Fence, value: u64) -> Result<()> {
        let fence = downcast::<Fence>(fence.as_any(), "ID3D12CommandQueue::Wait")?;
        check("ID3D12CommandQueue::Wait", unsafe {
            self.queue.Wait(&fence.fence, value)
        })
    }

    fn execute(&self, lists: &[&dyn super::CommandList]) -> Result<()> {
        let lists = lists
            .iter()
            .map(|list| {
                let list = downcast::<CommandList>(list.as_any(), "ExecuteCommandLists")?;
                check("ExecuteCommandLists", list.list.cast::<ID3D12CommandList>()).map(Some)
            })
            .collect::<Result<SmallVec<[Option<ID3D12CommandList>; 4]>>>()?;

        unsafe { self.queue.ExecuteCommandLists(&lists) };
        Ok(())
    }
}

pub struct CommandAllocator {
    allocator: ID3D12CommandAllocator,
    ty: QueueType,
}

impl super::CommandAllocator for CommandAllocator {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn reset(&self) -> Result<()> {
        check("ID3D12CommandAllocator::Reset", unsafe {
            self.allocator.Reset()
        })
    }
}

pub struct CommandList {
    list: ID3D12GraphicsCommandList,
    ty: QueueType,
}

impl CommandList {
    pub fn raw(&self) -> &ID3D12GraphicsCommandList {
        &self.list
    }
}

impl super::CommandList for CommandList {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn reset(&mut self, allocator: &dyn super::CommandAllocator) -> Result<()> {
        let allocator = downcast::<CommandAllocator>(allocator.as_any(), "ID3D12GraphicsCommandList::Reset")?;
        debug_assert_eq!(allocator.ty, self.ty);
        check("ID3D12GraphicsCommandList::Reset", unsafe {
            self.list.Reset(&allocator.allocator, None)
        })
    }

    fn close(&mut self) -> Result<()> {
        check("ID3D12GraphicsCommandList::Close", unsafe { self.list.Close() })
    }

    fn resource_barriers(&mut self, barriers: &[Barrier]) {
        let native = barriers
            .iter()
            .map(|barrier| match barrier {
                Barrier::Transition {
                    resource,
                    subresource,
                    before,
                    after,
                } => D3D12_RESOURCE_BARRIER {
                    Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
                    Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
                    Anonymous: D3D12_RESOURCE_BARRIER_0 {
                        Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                            pResource: borrowed(raw_resource(*resource)),
                            Subresource: *subresource,
                            StateBefore: resource_states(*before),
                            StateAfter: resource_states(*after),
                        }),
                    },
                },
                Barrier::Uav { resource } => D3D12_RESOURCE_BARRIER {
                    Type: D3D12_RESOURCE_BARRIER_TYPE_UAV,
                    Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
                    Anonymous: D3D12_RESOURCE_BARRIER_0 {
                        UAV: ManuallyDrop::new(D3D12_RESOURCE_UAV_BARRIER {
                            pResource: match resource {
                                Some(resource) => borrowed(raw_resource(*resource)),
                                None => ManuallyDrop::new(None),
                            },
                        }),
                    },
                },
            })
            .collect::<SmallVec<[D3D12_RESOURCE_BARRIER; 16]>>();

        if !native.is_empty() {
            unsafe { self.list.ResourceBarrier(&native) };
        }
    }

    fn set_pipeline_state(&mut self, pipeline: &dyn super::PipelineState) {
        let pipeline = expect_native::<PipelineState>(pipeline.as_any());
        unsafe { self.list.SetPipelineState(&pipeline.pipeline) };
    }

    fn set_root_signature(&mut self, kind: PipelineKind, root_signature: &dyn super::RootSignature) {
        let root_signature = &expect_native::<RootSignature>(root_signature.as_any()).root_signature;
        unsafe {
            match kind {
                PipelineKind::Graphics => self.list.SetGraphicsRootSignature(root_signature),
                PipelineKind::Compute => self.list.SetComputeRootSignature(root_signature),
            }
        }
    }

    fn set_descriptor_heaps(
        &mut self,
        view_heap: Option<&dyn super::DescriptorHeap>,
        sampler_heap: Option<&dyn super::DescriptorHeap>,
    ) {
        let heaps = [view_heap, sampler_heap]
            .into_iter()
            .flatten()
            .map(|heap| Some(expect_native::<DescriptorHeap>(heap.as_any()).heap.clone()))
            .collect::<SmallVec<[Option<ID3D12DescriptorHeap>; 2]>>();

        unsafe { self.list.SetDescriptorHeaps(&heaps) };
    }

    fn set_root_descriptor_table(&mut self, kind: PipelineKind, index: u32, table: GpuDescriptor) {
        let table = D3D12_GPU_DESCRIPTOR_HANDLE { ptr: table.0 };
        unsafe {
            match kind {
                PipelineKind::Graphics => self.list.SetGraphicsRootDescriptorTable(index, table),
                PipelineKind::Compute => self.list.SetComputeRootDescriptorTable(index, table),
            }
        }
    }

    fn set_root_constant_buffer_view(&mut self, kind: PipelineKind, index: u32, address: u64) {
        unsafe {
            match kind {
                PipelineKind::Graphics => self.list.SetGraphicsRootConstantBufferView(index, address),
                PipelineKind::Compute => self.list.SetComputeRootConstantBufferView(index, address),
            }
        }
    }

    fn set_root_shader_resource_view(&mut self, kind: PipelineKind, index: u32, address: u64) {
        unsafe {
            match kind {
                PipelineKind::Graphics => self.list.SetGraphicsRootShaderResourceView(index, address),
                PipelineKind::Compute => self.list.SetComputeRootShaderResourceView(index, address),
            }
        }
    }

    fn set_render_targets(&mut self, colors: &[CpuDescriptor], depth_stencil: Option<CpuDescriptor>) {
        let colors = colors
            .iter()
            .map(|rtv| cpu_handle(*rtv))
            .collect::<SmallVec<[D3D12_CPU_DESCRIPTOR_HANDLE; 8]>>();
        let depth_stencil = depth_stencil.map(cpu_handle);

        unsafe {
            self.list.OMSetRenderTargets(
                colors.len() as u32,
                (!colors.is_empty()).then_some(colors.as_ptr()),
                false,
                depth_stencil.as_ref().map(|dsv| dsv as *const _),
            );
        }
    }

    fn clear_render_target(&mut self, rtv: CpuDescriptor, color: [f32; 4]) {
        unsafe {
            self.list
                .ClearRenderTargetView(cpu_handle(rtv), color.as_ptr(), &[]);
        }
    }

    fn clear_depth_stencil(&mut self, dsv: CpuDescriptor, flags: ClearFlags, depth: f32, stencil: u8) {
        let mut native = D3D12_CLEAR_FLAGS(0);
        if flags.contains(ClearFlags::DEPTH) {
            native |= D3D12_CLEAR_FLAG_DEPTH;
        }
        if flags.contains(ClearFlags::STENCIL) {
            native |= D3D12_CLEAR_FLAG_STENCIL;
        }

        unsafe {
            self.list
                .ClearDepthStencilView(cpu_handle(dsv), native, depth, stencil, &[]);
        }
    }

    fn set_viewports(&mut self, viewports: &[Viewport]) {
        let viewports = viewports
            .iter()
            .map(|viewport| D3D12_VIEWPORT {
                TopLeftX: viewport.x,
                TopLeftY: viewport.y,
                Width: viewport.width,
                Height: viewport.height,
                MinDepth: viewport.min_depth,
                MaxDepth: viewport.max_depth,
            })
            .collect::<SmallVec<[D3D12_VIEWPORT; 8]>>();

        unsafe { self.list.RSSetViewports(&viewports) };
    }

    fn set_scissor_rects(&mut self, rects: &[ScissorRect]) {
        let rects = rects
            .iter()
            .map(|rect| RECT {
                left: rect.left,
                top: rect.top,
                right: rect.right,
                bottom: rect.bottom,
            })
            .collect::<SmallVec<[RECT; 8]>>();

        unsafe { self.list.RSSetScissorRects(&rects) };
    }

    fn set_stencil_ref(&mut self, value: u32) {
        unsafe { self.list.OMSetStencilRef(value) };
    }

    fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        let topology = match topology {
            PrimitiveTopology::Undefined => D3D_PRIMITIVE_TOPOLOGY_UNDEFINED,
            PrimitiveTopology::PointList => D3D_PRIMITIVE_TOPOLOGY_POINTLIST,
            PrimitiveTopology::LineList => D3D_PRIMITIVE_TOPOLOGY_LINELIST,
            PrimitiveTopology::LineStrip => D3D_PRIMITIVE_TOPOLOGY_LINESTRIP,
            PrimitiveTopology::TriangleList => D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
            PrimitiveTopology::TriangleStrip => D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP,
        };
        unsafe { self.list.IASetPrimitiveTopology(topology) };
    }

    fn set_vertex_buffers(&mut self, start_slot: u32, views: &[VertexBufferView]) {
        let views = views
            .iter()
            .map(|view| D3D12_VERTEX_BUFFER_VIEW {
                BufferLocation: view.address,
                SizeInBytes: view.size,
                StrideInBytes: view.stride,
            })
            .collect::<SmallVec<[D3D12_VERTEX_BUFFER_VIEW; 4]>>();

        unsafe { self.list.IASetVertexBuffers(start_slot, Some(views.as_slice())) };
    }

    fn set_index_buffer(&mut self, view: Option<&IndexBufferView>) {
        let view = view.map(|view| D3D12_INDEX_BUFFER_VIEW {
            BufferLocation: view.address,
            SizeInBytes: view.size,
            Format: dxgi_format(view.format),
        });

        unsafe {
            self.list
                .IASetIndexBuffer(view.as_ref().map(|view| view as *const _));
        }
    }

    fn set_predication(&mut self, predicate: Option<(&dyn super::NativeResource, u64, PredicationOp)>) {
        let (buffer, offset, op) = match predicate {
            Some((buffer, offset, op)) => (Some(raw_resource(buffer)), offset, op),
            None => (None, 0, PredicationOp::EqualZero),
        };
        let op = match op {
            PredicationOp::EqualZero => D3D12_PREDICATION_OP_EQUAL_ZERO,
            PredicationOp::NotEqualZero => D3D12_PREDICATION_OP_NOT_EQUAL_ZERO,
        };

        unsafe { self.list.SetPredication(buffer, offset, op) };
    }

    fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32, start_vertex: u32, start_instance: u32) {
        unsafe {
            self.list
                .DrawInstanced(vertex_count, instance_count, start_vertex, start_instance)
        };
    }

    fn draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    ) {
        unsafe {
            self.list.DrawIndexedInstanced(
                index_count,
                instance_count,
                start_index,
                base_vertex,
                start_instance,
            )
        };
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        unsafe { self.list.Dispatch(x, y, z) };
    }

    fn copy_buffer_region(
        &mut self,
        dest: &dyn super::NativeResource,
        dest_offset: u64,
        source: &dyn super::NativeResource,
        source_offset: u64,
        size: u64,
    ) {
        unsafe {
            self.list.CopyBufferRegion(
                raw_resource(dest),
                dest_offset,
                raw_resource(source),
                source_offset,
                size,
            )
        };
    }

    fn copy_resource(&mut self, dest: &dyn super::NativeResource, source: &dyn super::NativeResource) {
        unsafe { self.list.CopyResource(raw_resource(dest), raw_resource(source)) };
    }

    fn copy_texture_region(&mut self, dest: &CopyLocation, source: &CopyLocation) {
        let dest = copy_location(dest);
        let source = copy_location(source);
        unsafe { self.list.CopyTextureRegion(&dest, 0, 0, 0, &source, None) };
    }

    fn resolve_subresource(
        &mut self,
        dest: &dyn super::NativeResource,
        dest_subresource: u32,
        source: &dyn super::NativeResource,
        source_subresource: u32,
        format: Format,
    ) {
        unsafe {
            self.list.ResolveSubresource(
                raw_resource(dest),
                dest_subresource,
                raw_resource(source),
                source_subresource,
                dxgi_format(format),
            )
        };
    }
}

pub struct Resource {
    resource: ID3D12Resource,
    desc: ResourceDesc,
    gpu_address: u64,
}

impl Resource {
    fn new(resource: ID3D12Resource, desc: ResourceDesc, name: &str) -> Self {
        set_name(&resource, name);
        let gpu_address = if desc.is_buffer() {
            unsafe { resource.GetGPUVirtualAddress() }
        } else {
            0
        };

        Self {
            resource,
            desc,
            gpu_address,
        }
    }

    pub fn raw(&self) -> &ID3D12Resource {
        &self.resource
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
        self.gpu_address
    }

    fn map(&self) -> Result<NonNull<u8>> {
        let mut ptr = std::ptr::null_mut();
        check("ID3D12Resource::Map", unsafe {
            self.resource.Map(0, None, Some(&mut ptr))
        })?;

        NonNull::new(ptr.cast()).ok_or(Error::Backend {
            call: "ID3D12Resource::Map",
            message: "mapped a null pointer".to_owned(),
        })
    }

    fn unmap(&self) {
        unsafe { self.resource.Unmap(0, None) };
    }
}

pub struct Heap {
    heap: ID3D12Heap,
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
    heap: ID3D12DescriptorHeap,
    ty: DescriptorHeapType,
    capacity: u32,
    increment_size: u32,
    cpu_start: CpuDescriptor,
    gpu_start: Option<GpuDescriptor>,
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
        self.increment_size
    }

    fn cpu_start(&self) -> CpuDescriptor {
        self.cpu_start
    }

    fn gpu_start(&self) -> Option<GpuDescriptor> {
        self.gpu_start
    }
}

pub struct RootSignature {
    root_signature: ID3D12RootSignature,
}

impl super::RootSignature for RootSignature {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct PipelineState {
    pipeline: ID3D12PipelineState,
}

impl super::PipelineState for PipelineState {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

unsafe impl Send for Device {}
unsafe impl Sync for Device {}
unsafe impl Send for Fence {}
unsafe impl Sync for Fence {}
unsafe impl Send for Queue {}
unsafe impl Sync for Queue {}
unsafe impl Send for CommandAllocator {}
unsafe impl Sync for CommandAllocator {}
// Recording needs `&mut`, so a list is never touched from two threads at once.
unsafe impl Send for CommandList {}
unsafe impl Sync for CommandList {}
unsafe impl Send for Resource {}
unsafe impl Sync for Resource {}
unsafe impl Send for Heap {}
unsafe impl Sync for Heap {}
unsafe impl Send for DescriptorHeap {}
unsafe impl Sync for DescriptorHeap {}
unsafe impl Send for RootSignature {}
unsafe impl Sync for RootSignature {}
unsafe impl Send for PipelineState {}
unsafe impl Sync for PipelineState {}

fn blob_bytes(blob: &ID3DBlob) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(blob.GetBufferPointer().cast::<u8>(), blob.GetBufferSize())
    }
}

fn shader_bytecode(code: &[u8]) -> D3D12_SHADER_BYTECODE {
    D3D12_SHADER_BYTECODE {
        pShaderBytecode: code.as_ptr().cast(),
        BytecodeLength: code.len(),
    }
}

fn cpu_handle(descriptor: CpuDescriptor) -> D3D12_CPU_DESCRIPTOR_HANDLE {
    D3D12_CPU_DESCRIPTOR_HANDLE { ptr: descriptor.0 }
}

fn command_list_type(ty: QueueType) -> D3D12_COMMAND_LIST_TYPE {
    match ty {
        QueueType::Direct => D3D12_COMMAND_LIST_TYPE_DIRECT,
        QueueType::Compute => D3D12_COMMAND_LIST_TYPE_COMPUTE,
        QueueType::Copy => D3D12_COMMAND_LIST_TYPE_COPY,
    }
}

fn descriptor_heap_type(ty: DescriptorHeapType) -> D3D12_DESCRIPTOR_HEAP_TYPE {
    match ty {
        DescriptorHeapType::CbvSrvUav => D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
        DescriptorHeapType::Sampler => D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
        DescriptorHeapType::Rtv => D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
        DescriptorHeapType::Dsv => D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
    }
}

fn heap_properties(ty: HeapType) -> D3D12_HEAP_PROPERTIES {
    D3D12_HEAP_PROPERTIES {
        Type: match ty {
            HeapType::Default => D3D12_HEAP_TYPE_DEFAULT,
            HeapType::Upload => D3D12_HEAP_TYPE_UPLOAD,
            HeapType::Readback => D3D12_HEAP_TYPE_READBACK,
        },
        CPUPageProperty: D3D12_CPU_PAGE_PROPERTY_UNKNOWN,
        MemoryPoolPreference: D3D12_MEMORY_POOL_UNKNOWN,
        CreationNodeMask: 0,
        VisibleNodeMask: 0,
    }
}

/// The bit values of [`ResourceState`] are the native ones.
fn resource_states(state: ResourceState) -> D3D12_RESOURCE_STATES {
    D3D12_RESOURCE_STATES(state.bits() as i32)
}

fn resource_desc(desc: &ResourceDesc) -> D3D12_RESOURCE_DESC {
    let mut flags = D3D12_RESOURCE_FLAG_NONE;
    if desc.flags.contains(super::ResourceFlags::ALLOW_RENDER_TARGET) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET;
    }
    if desc.flags.contains(super::ResourceFlags::ALLOW_DEPTH_STENCIL) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL;
    }
    if desc.flags.contains(super::ResourceFlags::ALLOW_UNORDERED_ACCESS) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS;
    }
    if desc.flags.contains(super::ResourceFlags::DENY_SHADER_RESOURCE) {
        flags |= D3D12_RESOURCE_FLAG_DENY_SHADER_RESOURCE;
    }

    D3D12_RESOURCE_DESC {
        Dimension: match desc.dimension {
            ResourceDimension::Buffer => D3D12_RESOURCE_DIMENSION_BUFFER,
            ResourceDimension::Texture1D => D3D12_RESOURCE_DIMENSION_TEXTURE1D,
            ResourceDimension::Texture2D => D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            ResourceDimension::Texture3D => D3D12_RESOURCE_DIMENSION_TEXTURE3D,
        },
        Alignment: 0,
        Width: desc.width,
        Height: desc.height,
        DepthOrArraySize: desc.depth_or_array_size,
        MipLevels: desc.mip_levels,
        Format: dxgi_format(desc.format),
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: desc.sample_count.max(1),
            Quality: desc.sample_quality,
        },
        Layout: if desc.is_buffer() {
            D3D12_TEXTURE_LAYOUT_ROW_MAJOR
        } else {
            D3D12_TEXTURE_LAYOUT_UNKNOWN
        },
        Flags: flags,
    }
}

fn clear_value_desc(value: &ClearValue) -> D3D12_CLEAR_VALUE {
    match *value {
        ClearValue::Color { format, color } => D3D12_CLEAR_VALUE {
            Format: dxgi_format(format),
            Anonymous: D3D12_CLEAR_VALUE_0 { Color: color },
        },
        ClearValue::DepthStencil {
            format,
            depth,
            stencil,
        } => D3D12_CLEAR_VALUE {
            Format: dxgi_format(format),
            Anonymous: D3D12_CLEAR_VALUE_0 {
                DepthStencil: D3D12_DEPTH_STENCIL_VALUE {
                    Depth: depth,
                    Stencil: stencil,
                },
            },
        },
    }
}

fn copy_location(location: &CopyLocation) -> D3D12_TEXTURE_COPY_LOCATION {
    match location {
        CopyLocation::Subresource { resource, index } => D3D12_TEXTURE_COPY_LOCATION {
            pResource: borrowed(raw_resource(*resource)),
            Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                SubresourceIndex: *index,
            },
        },
        CopyLocation::Footprint {
            resource,
            footprint,
        } => D3D12_TEXTURE_COPY_LOCATION {
            pResource: borrowed(raw_resource(*resource)),
            Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                PlacedFootprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                    Offset: footprint.offset,
                    Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                        Format: dxgi_format(footprint.format),
                        Width: footprint.width,
                        Height: footprint.height,
                        Depth: footprint.depth,
                        RowPitch: footprint.row_pitch,
                    },
                },
            },
        },
    }
}

/// Stencil-plane formats read plane 1 of a depth-stencil resource.
fn plane_slice(format: Format) -> u32 {
    match format {
        Format::X24TypelessG8Uint | Format::X32TypelessG8X24Uint => 1,
        _ => 0,
    }
}

fn srv_desc(view: &ViewDesc) -> D3D12_SHADER_RESOURCE_VIEW_DESC {
    match *view {
        ViewDesc::BufferSrv {
            first_element,
            num_elements,
            stride,
            raw,
        } => D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: if raw { DXGI_FORMAT_R32_TYPELESS } else { DXGI_FORMAT_UNKNOWN },
            ViewDimension: D3D12_SRV_DIMENSION_BUFFER,
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Buffer: D3D12_BUFFER_SRV {
                    FirstElement: first_element,
                    NumElements: num_elements,
                    StructureByteStride: if raw { 0 } else { stride },
                    Flags: if raw {
                        D3D12_BUFFER_SRV_FLAG_RAW
                    } else {
                        D3D12_BUFFER_SRV_FLAG_NONE
                    },
                },
            },
        },
        ViewDesc::TextureSrv {
            format,
            dimension,
            most_detailed_mip,
            mip_levels,
            first_slice,
            array_size,
        } => {
            let plane = plane_slice(format);
            let (view_dimension, anonymous) = match dimension {
                ViewDimension::Texture2D | ViewDimension::Buffer => (
                    D3D12_SRV_DIMENSION_TEXTURE2D,
                    D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                        Texture2D: D3D12_TEX2D_SRV {
                            MostDetailedMip: most_detailed_mip,
                            MipLevels: mip_levels,
                            PlaneSlice: plane,
                            ResourceMinLODClamp: 0.0,
                        },
                    },
                ),
                ViewDimension::Texture2DMs => (
                    D3D12_SRV_DIMENSION_TEXTURE2DMS,
                    D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                        Texture2DMS: D3D12_TEX2DMS_SRV::default(),
                    },
                ),
                ViewDimension::Texture2DArray => (
                    D3D12_SRV_DIMENSION_TEXTURE2DARRAY,
                    D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                        Texture2DArray: D3D12_TEX2D_ARRAY_SRV {
                            MostDetailedMip: most_detailed_mip,
                            MipLevels: mip_levels,
                            FirstArraySlice: first_slice,
                            ArraySize: array_size,
                            PlaneSlice: plane,
                            ResourceMinLODClamp: 0.0,
                        },
                    },
                ),
                ViewDimension::Texture2DMsArray => (
                    D3D12_SRV_DIMENSION_TEXTURE2DMSARRAY,
                    D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                        Texture2DMSArray: D3D12_TEX2DMS_ARRAY_SRV {
                            FirstArraySlice: first_slice,
                            ArraySize: array_size,
                        },
                    },
                ),
                ViewDimension::Texture3D => (
                    D3D12_SRV_DIMENSION_TEXTURE3D,
                    D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                        Texture3D: D3D12_TEX3D_SRV {
                            MostDetailedMip: most_detailed_mip,
                            MipLevels: mip_levels,
                            ResourceMinLODClamp: 0.0,
                        },
                    },
                ),
                ViewDimension::TextureCube => (
                    D3D12_SRV_DIMENSION_TEXTURECUBE,
                    D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                        TextureCube: D3D12_TEXCUBE_SRV {
                            MostDetailedMip: most_detailed_mip,
                            MipLevels: mip_levels,
                            ResourceMinLODClamp: 0.0,
                        },
                    },
                ),
                ViewDimension::TextureCubeArray => (
                    D3D12_SRV_DIMENSION_TEXTURECUBEARRAY,
                    D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                        TextureCubeArray: D3D12_TEXCUBE_ARRAY_SRV {
                            MostDetailedMip: most_detailed_mip,
                            MipLevels: mip_levels,
                            First2DArrayFace: first_slice,
                            NumCubes: array_size / 6,
                            ResourceMinLODClamp: 0.0,
                        },
                    },
                ),
            };

            D3D12_SHADER_RESOURCE_VIEW_DESC {
                Format: dxgi_format(format),
                ViewDimension: view_dimension,
                Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                Anonymous: anonymous,
            }
        }
        _ => D3D12_SHADER_RESOURCE_VIEW_DESC::default(),
    }
}

fn uav_desc(view: &ViewDesc) -> D3D12_UNORDERED_ACCESS_VIEW_DESC {
    match *view {
        ViewDesc::BufferUav {
            first_element,
            num_elements,
            stride,
            raw,
            counter_offset,
        } => D3D12_UNORDERED_ACCESS_VIEW_DESC {
            Format: if raw { DXGI_FORMAT_R32_TYPELESS } else { DXGI_FORMAT_UNKNOWN },
            ViewDimension: D3D12_UAV_DIMENSION_BUFFER,
            Anonymous: D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                Buffer: D3D12_BUFFER_UAV {
                    FirstElement: first_element,
                    NumElements: num_elements,
                    StructureByteStride: if raw { 0 } else { stride },
                    CounterOffsetInBytes: counter_offset.unwrap_or(0),
                    Flags: if raw {
                        D3D12_BUFFER_UAV_FLAG_RAW
                    } else {
                        D3D12_BUFFER_UAV_FLAG_NONE
                    },
                },
            },
        },
        ViewDesc::TextureUav {
            format,
            dimension,
            mip_slice,
            first_slice,
            array_size,
        } => {
            let (view_dimension, anonymous) = match dimension {
                ViewDimension::Texture3D => (
                    D3D12_UAV_DIMENSION_TEXTURE3D,
                    D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                        Texture3D: D3D12_TEX3D_UAV {
                            MipSlice: mip_slice,
                            FirstWSlice: first_slice,
                            WSize: array_size,
                        },
                    },
                ),
                ViewDimension::Texture2DArray
                | ViewDimension::Texture2DMsArray
                | ViewDimension::TextureCube
                | ViewDimension::TextureCubeArray => (
                    D3D12_UAV_DIMENSION_TEXTURE2DARRAY,
                    D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                        Texture2DArray: D3D12_TEX2D_ARRAY_UAV {
                            MipSlice: mip_slice,
                            FirstArraySlice: first_slice,
                            ArraySize: array_size,
                            PlaneSlice: 0,
                        },
                    },
                ),
                _ => (
                    D3D12_UAV_DIMENSION_TEXTURE2D,
                    D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                        Texture2D: D3D12_TEX2D_UAV {
                            MipSlice: mip_slice,
                            PlaneSlice: 0,
                        },
                    },
                ),
            };

            D3D12_UNORDERED_ACCESS_VIEW_DESC {
                Format: dxgi_format(format),
                ViewDimension: view_dimension,
                Anonymous: anonymous,
            }
        }
        _ => D3D12_UNORDERED_ACCESS_VIEW_DESC::default(),
    }
}

fn rtv_desc(
    format: Format,
    dimension: ViewDimension,
    mip_slice: u32,
    first_slice: u32,
    array_size: u32,
) -> D3D12_RENDER_TARGET_VIEW_DESC {
    let (view_dimension, anonymous) = match dimension {
        ViewDimension::Texture2DMs => (
            D3D12_RTV_DIMENSION_TEXTURE2DMS,
            D3D12_RENDER_TARGET_VIEW_DESC_0 {
                Texture2DMS: D3D12_TEX2DMS_RTV::default(),
            },
        ),
        ViewDimension::Texture2DMsArray => (
            D3D12_RTV_DIMENSION_TEXTURE2DMSARRAY,
            D3D12_RENDER_TARGET_VIEW_DESC_0 {
                Texture2DMSArray: D3D12_TEX2DMS_ARRAY_RTV {
                    FirstArraySlice: first_slice,
                    ArraySize: array_size,
                },
            },
        ),
        ViewDimension::Texture3D => (
            D3D12_RTV_DIMENSION_TEXTURE3D,
            D3D12_RENDER_TARGET_VIEW_DESC_0 {
                Texture3D: D3D12_TEX3D_RTV {
                    MipSlice: mip_slice,
                    FirstWSlice: first_slice,
                    WSize: array_size,
                },
            },
        ),
        ViewDimension::Texture2DArray | ViewDimension::TextureCube | ViewDimension::TextureCubeArray => (
            D3D12_RTV_DIMENSION_TEXTURE2DARRAY,
            D3D12_RENDER_TARGET_VIEW_DESC_0 {
                Texture2DArray: D3D12_TEX2D_ARRAY_RTV {
                    MipSlice: mip_slice,
                    FirstArraySlice: first_slice,
                    ArraySize: array_size,
                    PlaneSlice: 0,
                },
            },
        ),
        ViewDimension::Texture2D | ViewDimension::Buffer => (
            D3D12_RTV_DIMENSION_TEXTURE2D,
            D3D12_RENDER_TARGET_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_RTV {
                    MipSlice: mip_slice,
                    PlaneSlice: 0,
                },
            },
        ),
    };

    D3D12_RENDER_TARGET_VIEW_DESC {
        Format: dxgi_format(format),
        ViewDimension: view_dimension,
        Anonymous: anonymous,
    }
}

fn dsv_desc(
    format: Format,
    dimension: ViewDimension,
    mip_slice: u32,
    first_slice: u32,
    array_size: u32,
) -> D3D12_DEPTH_STENCIL_VIEW_DESC {
    let (view_dimension, anonymous) = match dimension {
        ViewDimension::Texture2DMs => (
            D3D12_DSV_DIMENSION_TEXTURE2DMS,
            D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture2DMS: D3D12_TEX2DMS_DSV::default(),
            },
        ),
        ViewDimension::Texture2DMsArray => (
            D3D12_DSV_DIMENSION_TEXTURE2DMSARRAY,
            D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture2DMSArray: D3D12_TEX2DMS_ARRAY_DSV {
                    FirstArraySlice: first_slice,
                    ArraySize: array_size,
                },
            },
        ),
        ViewDimension::Texture2D | ViewDimension::Buffer => (
            D3D12_DSV_DIMENSION_TEXTURE2D,
            D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_DSV { MipSlice: mip_slice },
            },
        ),
        _ => (
            D3D12_DSV_DIMENSION_TEXTURE2DARRAY,
            D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture2DArray: D3D12_TEX2D_ARRAY_DSV {
                    MipSlice: mip_slice,
                    FirstArraySlice: first_slice,
                    ArraySize: array_size,
                },
            },
        ),
    };

    D3D12_DEPTH_STENCIL_VIEW_DESC {
        Format: dxgi_format(format),
        ViewDimension: view_dimension,
        Flags: D3D12_DSV_FLAG_NONE,
        Anonymous: anonymous,
    }
}

fn filter(filter: Filter) -> D3D12_FILTER {
    match filter {
        Filter::Point => D3D12_FILTER_MIN_MAG_MIP_POINT,
        Filter::Bilinear => D3D12_FILTER_MIN_MAG_LINEAR_MIP_POINT,
        Filter::Trilinear => D3D12_FILTER_MIN_MAG_MIP_LINEAR,
        Filter::Comparison => D3D12_FILTER_COMPARISON_MIN_MAG_LINEAR_MIP_POINT,
        Filter::Anisotropic => D3D12_FILTER_ANISOTROPIC,
    }
}

fn address_mode(mode: AddressMode) -> D3D12_TEXTURE_ADDRESS_MODE {
    match mode {
        AddressMode::Wrap => D3D12_TEXTURE_ADDRESS_MODE_WRAP,
        AddressMode::Clamp => D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
        AddressMode::Mirror => D3D12_TEXTURE_ADDRESS_MODE_MIRROR,
        AddressMode::MirrorOnce => D3D12_TEXTURE_ADDRESS_MODE_MIRROR_ONCE,
    }
}

fn comparison_func(func: CompareFunc) -> D3D12_COMPARISON_FUNC {
    match func {
        CompareFunc::Never => D3D12_COMPARISON_FUNC_NEVER,
        CompareFunc::Less => D3D12_COMPARISON_FUNC_LESS,
        CompareFunc::Equal => D3D12_COMPARISON_FUNC_EQUAL,
        CompareFunc::LessEqual => D3D12_COMPARISON_FUNC_LESS_EQUAL,
        CompareFunc::Greater => D3D12_COMPARISON_FUNC_GREATER,
        CompareFunc::NotEqual => D3D12_COMPARISON_FUNC_NOT_EQUAL,
        CompareFunc::GreaterEqual => D3D12_COMPARISON_FUNC_GREATER_EQUAL,
        CompareFunc::Always => D3D12_COMPARISON_FUNC_ALWAYS,
    }
}

fn shader_visibility(visibility: ShaderVisibility) -> D3D12_SHADER_VISIBILITY {
    match visibility {
        ShaderVisibility::All => D3D12_SHADER_VISIBILITY_ALL,
        ShaderVisibility::Vertex => D3D12_SHADER_VISIBILITY_VERTEX,
        ShaderVisibility::Pixel => D3D12_SHADER_VISIBILITY_PIXEL,
    }
}

fn blend_desc(mode: BlendMode) -> D3D12_RENDER_TARGET_BLEND_DESC {
    let (enable, source, dest) = match mode {
        BlendMode::Opaque => (false, D3D12_BLEND_ONE, D3D12_BLEND_ZERO),
        BlendMode::AlphaBlend => (true, D3D12_BLEND_SRC_ALPHA, D3D12_BLEND_INV_SRC_ALPHA),
        BlendMode::Additive => (true, D3D12_BLEND_ONE, D3D12_BLEND_ONE),
        BlendMode::Premultiplied => (true, D3D12_BLEND_ONE, D3D12_BLEND_INV_SRC_ALPHA),
    };

    D3D12_RENDER_TARGET_BLEND_DESC {
        BlendEnable: enable.into(),
        LogicOpEnable: false.into(),
        SrcBlend: source,
        DestBlend: dest,
        BlendOp: D3D12_BLEND_OP_ADD,
        SrcBlendAlpha: D3D12_BLEND_ONE,
        DestBlendAlpha: if mode == BlendMode::Additive {
            D3D12_BLEND_ONE
        } else {
            D3D12_BLEND_INV_SRC_ALPHA
        },
        BlendOpAlpha: D3D12_BLEND_OP_ADD,
        LogicOp: D3D12_LOGIC_OP_NOOP,
        RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
    }
}

fn dxgi_format(format: Format) -> DXGI_FORMAT {
    match format {
        Format::Unknown => DXGI_FORMAT_UNKNOWN,
        Format::R32G32B32A32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
        Format::R32G32B32A32Uint => DXGI_FORMAT_R32G32B32A32_UINT,
        Format::R32G32B32Float => DXGI_FORMAT_R32G32B32_FLOAT,
        Format::R32G32Float => DXGI_FORMAT_R32G32_FLOAT,
        Format::R32Float => DXGI_FORMAT_R32_FLOAT,
        Format::R32Uint => DXGI_FORMAT_R32_UINT,
        Format::R32Sint => DXGI_FORMAT_R32_SINT,
        Format::R16G16B16A16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
        Format::R16G16B16A16Unorm => DXGI_FORMAT_R16G16B16A16_UNORM,
        Format::R16G16Float => DXGI_FORMAT_R16G16_FLOAT,
        Format::R16G16Unorm => DXGI_FORMAT_R16G16_UNORM,
        Format::R16Float => DXGI_FORMAT_R16_FLOAT,
        Format::R16Unorm => DXGI_FORMAT_R16_UNORM,
        Format::R16Uint => DXGI_FORMAT_R16_UINT,
        Format::R8G8B8A8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        Format::R8G8B8A8UnormSrgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        Format::R8G8B8A8Uint => DXGI_FORMAT_R8G8B8A8_UINT,
        Format::R8G8Unorm => DXGI_FORMAT_R8G8_UNORM,
        Format::R8Unorm => DXGI_FORMAT_R8_UNORM,
        Format::R8Uint => DXGI_FORMAT_R8_UINT,
        Format::B8G8R8A8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        Format::B8G8R8A8UnormSrgb => DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
        Format::R11G11B10Float => DXGI_FORMAT_R11G11B10_FLOAT,
        Format::R10G10B10A2Unorm => DXGI_FORMAT_R10G10B10A2_UNORM,
        Format::Bc1Unorm => DXGI_FORMAT_BC1_UNORM,
        Format::Bc1UnormSrgb => DXGI_FORMAT_BC1_UNORM_SRGB,
        Format::Bc3Unorm => DXGI_FORMAT_BC3_UNORM,
        Format::Bc3UnormSrgb => DXGI_FORMAT_BC3_UNORM_SRGB,
        Format::Bc4Unorm => DXGI_FORMAT_BC4_UNORM,
        Format::Bc5Unorm => DXGI_FORMAT_BC5_UNORM,
        Format::Bc6hUf16 => DXGI_FORMAT_BC6H_UF16,
        Format::Bc7Unorm => DXGI_FORMAT_BC7_UNORM,
        Format::Bc7UnormSrgb => DXGI_FORMAT_BC7_UNORM_SRGB,
        Format::R32Typeless => DXGI_FORMAT_R32_TYPELESS,
        Format::R16Typeless => DXGI_FORMAT_R16_TYPELESS,
        Format::R24G8Typeless => DXGI_FORMAT_R24G8_TYPELESS,
        Format::R32G8X24Typeless => DXGI_FORMAT_R32G8X24_TYPELESS,
        Format::R24UnormX8Typeless => DXGI_FORMAT_R24_UNORM_X8_TYPELESS,
        Format::X24TypelessG8Uint => DXGI_FORMAT_X24_TYPELESS_G8_UINT,
        Format::R32FloatX8X24Typeless => DXGI_FORMAT_R32_FLOAT_X8X24_TYPELESS,
        Format::X32TypelessG8X24Uint => DXGI_FORMAT_X32_TYPELESS_G8X24_UINT,
        Format::D32Float => DXGI_FORMAT_D32_FLOAT,
        Format::D16Unorm => DXGI_FORMAT_D16_UNORM,
        Format::D24UnormS8Uint => DXGI_FORMAT_D24_UNORM_S8_UINT,
        Format::D32FloatS8X24Uint => DXGI_FORMAT_D32_FLOAT_S8X24_UINT,
    }
}
