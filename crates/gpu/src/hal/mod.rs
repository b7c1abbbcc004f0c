//! The native graphics API, seen through object-safe traits.
//!
//! The rest of the crate only ever talks to the GPU through these traits. The
//! `dx12` backend maps them onto Direct3D 12; the `null` backend emulates them
//! in host memory so that lifetime, descriptor and recording logic can be
//! exercised without a GPU.

use std::{any::Any, ptr::NonNull};

use bitflags::bitflags;

use crate::{resource::ResourceState, Result};

pub mod null;

#[cfg(target_os = "windows")]
pub mod dx12;

/// One of the three logical hardware queues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueType {
    Direct,
    Compute,
    Copy,
}

impl QueueType {
    pub const ALL: [QueueType; 3] = [QueueType::Direct, QueueType::Compute, QueueType::Copy];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            QueueType::Direct => "Direct",
            QueueType::Compute => "AsyncCompute",
            QueueType::Copy => "AsyncCopy",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QueuePriority {
    #[default]
    Normal,
    High,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct QueueDesc {
    pub priority: QueuePriority,
    pub disable_gpu_timeout: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeapType {
    Default,
    Upload,
    Readback,
}

impl HeapType {
    pub fn is_cpu_accessible(self) -> bool {
        !matches!(self, HeapType::Default)
    }
}

/// What kind of resources a native heap may contain. Resource heap tier 1
/// hardware cannot mix these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeapUsage {
    Buffers,
    Textures,
    RenderTextures,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapDesc {
    pub size: u64,
    pub heap_type: HeapType,
    pub usage: HeapUsage,
    pub alignment: u64,
}

/// 64 KiB, the placement alignment of everything except MSAA textures.
pub const DEFAULT_PLACEMENT_ALIGNMENT: u64 = 64 * 1024;
/// 4 MiB, the placement alignment of MSAA textures.
pub const MSAA_PLACEMENT_ALIGNMENT: u64 = 4 * 1024 * 1024;
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;
pub const TEXTURE_DATA_PITCH_ALIGNMENT: u64 = 256;
pub const TEXTURE_DATA_PLACEMENT_ALIGNMENT: u64 = 512;
pub const UAV_COUNTER_ALIGNMENT: u64 = 4096;
pub const SIMULTANEOUS_RENDER_TARGET_COUNT: usize = 8;
pub const ALL_SUBRESOURCES: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Format {
    #[default]
    Unknown,
    R32G32B32A32Float,
    R32G32B32A32Uint,
    R32G32B32Float,
    R32G32Float,
    R32Float,
    R32Uint,
    R32Sint,
    R16G16B16A16Float,
    R16G16B16A16Unorm,
    R16G16Float,
    R16G16Unorm,
    R16Float,
    R16Unorm,
    R16Uint,
    R8G8B8A8Unorm,
    R8G8B8A8UnormSrgb,
    R8G8B8A8Uint,
    R8G8Unorm,
    R8Unorm,
    R8Uint,
    B8G8R8A8Unorm,
    B8G8R8A8UnormSrgb,
    R11G11B10Float,
    R10G10B10A2Unorm,
    Bc1Unorm,
    Bc1UnormSrgb,
    Bc3Unorm,
    Bc3UnormSrgb,
    Bc4Unorm,
    Bc5Unorm,
    Bc6hUf16,
    Bc7Unorm,
    Bc7UnormSrgb,
    R32Typeless,
    R16Typeless,
    R24G8Typeless,
    R32G8X24Typeless,
    R24UnormX8Typeless,
    X24TypelessG8Uint,
    R32FloatX8X24Typeless,
    X32TypelessG8X24Uint,
    D32Float,
    D16Unorm,
    D24UnormS8Uint,
    D32FloatS8X24Uint,
}

impl Format {
    /// `(block width in texels, bytes per block)`. Uncompressed formats have
    /// 1x1 blocks.
    pub fn block_info(self) -> (u32, u32) {
        use Format::*;
        match self {
            Unknown => (1, 0),
            R32G32B32A32Float | R32G32B32A32Uint => (1, 16),
            R32G32B32Float => (1, 12),
            R32G32Float | R16G16B16A16Float | R16G16B16A16Unorm | R32G8X24Typeless
            | R32FloatX8X24Typeless | X32TypelessG8X24Uint | D32FloatS8X24Uint => (1, 8),
            R32Float | R32Uint | R32Sint | R16G16Float | R16G16Unorm | R8G8B8A8Unorm
            | R8G8B8A8UnormSrgb | R8G8B8A8Uint | B8G8R8A8Unorm | B8G8R8A8UnormSrgb
            | R11G11B10Float | R10G10B10A2Unorm | R32Typeless | R24G8Typeless
            | R24UnormX8Typeless | X24TypelessG8Uint | D32Float | D24UnormS8Uint => (1, 4),
            R16Float | R16Unorm | R16Uint | R8G8Unorm | R16Typeless | D16Unorm => (1, 2),
            R8Unorm | R8Uint => (1, 1),
            Bc1Unorm | Bc1UnormSrgb | Bc4Unorm => (4, 8),
            Bc3Unorm | Bc3UnormSrgb | Bc5Unorm | Bc6hUf16 | Bc7Unorm | Bc7UnormSrgb => (4, 16),
        }
    }

    pub fn is_depth_stencil(self) -> bool {
        matches!(
            self,
            Format::D32Float | Format::D16Unorm | Format::D24UnormS8Uint | Format::D32FloatS8X24Uint
        )
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, Format::D24UnormS8Uint | Format::D32FloatS8X24Uint)
    }

    /// Depth-stencil formats keep depth and stencil in separate planes,
    /// whether the resource is created typed or typeless.
    pub fn plane_count(self) -> u32 {
        match self {
            Format::D24UnormS8Uint
            | Format::D32FloatS8X24Uint
            | Format::R24G8Typeless
            | Format::R32G8X24Typeless => 2,
            _ => 1,
        }
    }

    pub fn is_srgb(self) -> bool {
        matches!(
            self,
            Format::R8G8B8A8UnormSrgb
                | Format::B8G8R8A8UnormSrgb
                | Format::Bc1UnormSrgb
                | Format::Bc3UnormSrgb
                | Format::Bc7UnormSrgb
        )
    }

    /// The sRGB variant of this format, or the format itself if it has none.
    pub fn to_srgb(self) -> Format {
        match self {
            Format::R8G8B8A8Unorm => Format::R8G8B8A8UnormSrgb,
            Format::B8G8R8A8Unorm => Format::B8G8R8A8UnormSrgb,
            Format::Bc1Unorm => Format::Bc1UnormSrgb,
            Format::Bc3Unorm => Format::Bc3UnormSrgb,
            Format::Bc7Unorm => Format::Bc7UnormSrgb,
            other => other,
        }
    }

    /// Depth formats have to be created typeless so that both depth-stencil
    /// and shader-resource views can be made of them.
    pub fn to_typeless(self) -> Format {
        match self {
            Format::D32Float => Format::R32Typeless,
            Format::D16Unorm => Format::R16Typeless,
            Format::D24UnormS8Uint => Format::R24G8Typeless,
            Format::D32FloatS8X24Uint => Format::R32G8X24Typeless,
            other => other,
        }
    }

    /// The shader-readable format of a depth or stencil plane.
    pub fn depth_plane_srv(self) -> Format {
        match self {
            Format::D32Float => Format::R32Float,
            Format::D16Unorm => Format::R16Unorm,
            Format::D24UnormS8Uint => Format::R24UnormX8Typeless,
            Format::D32FloatS8X24Uint => Format::R32FloatX8X24Typeless,
            other => other,
        }
    }

    pub fn stencil_plane_srv(self) -> Format {
        match self {
            Format::D24UnormS8Uint => Format::X24TypelessG8Uint,
            Format::D32FloatS8X24Uint => Format::X32TypelessG8X24Uint,
            other => other,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceDimension {
    Buffer,
    Texture1D,
    Texture2D,
    Texture3D,
}

bitflags! {
    #[derive(Default)]
    pub struct ResourceFlags: u32 {
        const ALLOW_RENDER_TARGET = 0x1;
        const ALLOW_DEPTH_STENCIL = 0x2;
        const ALLOW_UNORDERED_ACCESS = 0x4;
        const DENY_SHADER_RESOURCE = 0x8;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceDesc {
    pub dimension: ResourceDimension,
    pub width: u64,
    pub height: u32,
    pub depth_or_array_size: u16,
    pub mip_levels: u16,
    pub format: Format,
    pub sample_count: u32,
    pub sample_quality: u32,
    pub flags: ResourceFlags,
}

impl ResourceDesc {
    pub fn buffer(size: u64, flags: ResourceFlags) -> Self {
        Self {
            dimension: ResourceDimension::Buffer,
            width: size,
            height: 1,
            depth_or_array_size: 1,
            mip_levels: 1,
            format: Format::Unknown,
            sample_count: 1,
            sample_quality: 0,
            flags,
        }
    }

    pub fn is_buffer(&self) -> bool {
        self.dimension == ResourceDimension::Buffer
    }

    pub fn is_render_texture(&self) -> bool {
        self.flags
            .intersects(ResourceFlags::ALLOW_RENDER_TARGET | ResourceFlags::ALLOW_DEPTH_STENCIL)
    }

    /// `1` for buffers; `mips * array slices * planes` for textures.
    pub fn subresource_count(&self) -> u32 {
        if self.is_buffer() {
            return 1;
        }

        let array = if self.dimension == ResourceDimension::Texture3D {
            1
        } else {
            u32::from(self.depth_or_array_size)
        };
        u32::from(self.mip_levels) * array * self.format.plane_count()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearValue {
    Color { format: Format, color: [f32; 4] },
    DepthStencil { format: Format, depth: f32, stencil: u8 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocationInfo {
    pub size: u64,
    pub alignment: u64,
}

/// A host-side descriptor address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CpuDescriptor(pub usize);

impl CpuDescriptor {
    pub fn offset(self, index: u32, increment: u32) -> Self {
        Self(self.0 + index as usize * increment as usize)
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// A shader-visible descriptor address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct GpuDescriptor(pub u64);

impl GpuDescriptor {
    pub fn offset(self, index: u32, increment: u32) -> Self {
        Self(self.0 + u64::from(index) * u64::from(increment))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorHeapType {
    CbvSrvUav,
    Sampler,
    Rtv,
    Dsv,
}

impl DescriptorHeapType {
    pub const ALL: [DescriptorHeapType; 4] = [
        DescriptorHeapType::CbvSrvUav,
        DescriptorHeapType::Sampler,
        DescriptorHeapType::Rtv,
        DescriptorHeapType::Dsv,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            DescriptorHeapType::CbvSrvUav => "CBV_SRV_UAV",
            DescriptorHeapType::Sampler => "SAMPLER",
            DescriptorHeapType::Rtv => "RTV",
            DescriptorHeapType::Dsv => "DSV",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ViewDimension {
    Buffer,
    Texture2D,
    Texture2DMs,
    Texture2DArray,
    Texture2DMsArray,
    Texture3D,
    TextureCube,
    TextureCubeArray,
}

/// Everything needed to write one view descriptor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ViewDesc {
    ConstantBuffer {
        address: u64,
        size: u32,
    },
    BufferSrv {
        first_element: u64,
        num_elements: u32,
        stride: u32,
        raw: bool,
    },
    BufferUav {
        first_element: u64,
        num_elements: u32,
        stride: u32,
        raw: bool,
        counter_offset: Option<u64>,
    },
    TextureSrv {
        format: Format,
        dimension: ViewDimension,
        most_detailed_mip: u32,
        mip_levels: u32,
        first_slice: u32,
        array_size: u32,
    },
    TextureUav {
        format: Format,
        dimension: ViewDimension,
        mip_slice: u32,
        first_slice: u32,
        array_size: u32,
    },
    RenderTarget {
        format: Format,
        dimension: ViewDimension,
        mip_slice: u32,
        first_slice: u32,
        array_size: u32,
    },
    DepthStencil {
        format: Format,
        dimension: ViewDimension,
        mip_slice: u32,
        first_slice: u32,
        array_size: u32,
    },
}

impl ViewDesc {
    pub fn heap_type(&self) -> DescriptorHeapType {
        match self {
            ViewDesc::RenderTarget { .. } => DescriptorHeapType::Rtv,
            ViewDesc::DepthStencil { .. } => DescriptorHeapType::Dsv,
            _ => DescriptorHeapType::CbvSrvUav,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Filter {
    Point,
    Bilinear,
    Trilinear,
    Comparison,
    Anisotropic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Wrap,
    Clamp,
    Mirror,
    MirrorOnce,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerDesc {
    pub filter: Filter,
    pub address: AddressMode,
    pub mip_lod_bias: f32,
    pub max_anisotropy: u32,
    pub comparison: Option<CompareFunc>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    Undefined,
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
}

impl PrimitiveTopology {
    pub fn topology_type(self) -> TopologyType {
        match self {
            PrimitiveTopology::Undefined => TopologyType::Undefined,
            PrimitiveTopology::PointList => TopologyType::Point,
            PrimitiveTopology::LineList | PrimitiveTopology::LineStrip => TopologyType::Line,
            PrimitiveTopology::TriangleList | PrimitiveTopology::TriangleStrip => {
                TopologyType::Triangle
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TopologyType {
    Undefined,
    Point,
    Line,
    Triangle,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VertexBufferView {
    pub address: u64,
    pub size: u32,
    pub stride: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexBufferView {
    pub address: u64,
    pub size: u32,
    pub format: Format,
}

bitflags! {
    pub struct ClearFlags: u32 {
        const COLOR = 0x1;
        const DEPTH = 0x2;
        const STENCIL = 0x4;
        const DEPTH_STENCIL = Self::DEPTH.bits | Self::STENCIL.bits;
        const ALL = Self::COLOR.bits | Self::DEPTH.bits | Self::STENCIL.bits;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PredicationOp {
    EqualZero,
    NotEqualZero,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Graphics,
    Compute,
}

/// Layout of one subresource inside a linear buffer, as used for texture
/// uploads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlacedFootprint {
    pub offset: u64,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub row_pitch: u32,
    /// Rows of blocks (not texels) in one depth slice.
    pub num_rows: u32,
    /// Unpadded bytes in one row of blocks.
    pub row_size: u64,
}

pub enum CopyLocation<'a> {
    Subresource {
        resource: &'a dyn NativeResource,
        index: u32,
    },
    Footprint {
        resource: &'a dyn NativeResource,
        footprint: PlacedFootprint,
    },
}

pub enum Barrier<'a> {
    Transition {
        resource: &'a dyn NativeResource,
        subresource: u32,
        before: ResourceState,
        after: ResourceState,
    },
    Uav {
        resource: Option<&'a dyn NativeResource>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderVisibility {
    All,
    Vertex,
    Pixel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorRangeKind {
    Srv,
    Uav,
    Cbv,
    Sampler,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorRange {
    pub kind: DescriptorRangeKind,
    pub count: u32,
    pub base_register: u32,
    pub space: u32,
    pub table_offset: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RootParameterKind {
    Cbv { register: u32, space: u32 },
    Srv { register: u32, space: u32 },
    Table(Vec<DescriptorRange>),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RootParameter {
    pub kind: RootParameterKind,
    pub visibility: ShaderVisibility,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StaticSampler {
    pub desc: SamplerDesc,
    pub register: u32,
    pub space: u32,
    pub visibility: ShaderVisibility,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RootSignatureDesc {
    pub parameters: Vec<RootParameter>,
    pub static_samplers: Vec<StaticSampler>,
    pub allow_input_layout: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InputClassification {
    PerVertex,
    PerInstance,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InputElement {
    pub semantic_name: String,
    pub semantic_index: u32,
    pub format: Format,
    pub input_slot: u32,
    pub classification: InputClassification,
    pub instance_step_rate: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Opaque,
    AlphaBlend,
    Additive,
    Premultiplied,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderState {
    pub cull: CullMode,
    pub blend: BlendMode,
    pub depth_test: Option<CompareFunc>,
    pub depth_write: bool,
    pub stencil_test: Option<CompareFunc>,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            cull: CullMode::Back,
            blend: BlendMode::Opaque,
            depth_test: Some(CompareFunc::GreaterEqual),
            depth_write: true,
            stencil_test: None,
        }
    }
}

pub struct GraphicsPipelineDesc<'a> {
    pub root_signature: &'a dyn RootSignature,
    pub vertex_shader: &'a [u8],
    pub pixel_shader: &'a [u8],
    pub input_layout: &'a [InputElement],
    pub topology_type: TopologyType,
    pub render_state: RenderState,
    pub rtv_formats: &'a [Format],
    pub dsv_format: Format,
    pub sample_count: u32,
    pub sample_quality: u32,
    pub depth_bias: i32,
    pub depth_bias_clamp: f32,
    pub slope_scaled_depth_bias: f32,
    pub wireframe: bool,
}

pub struct ComputePipelineDesc<'a> {
    pub root_signature: &'a dyn RootSignature,
    pub compute_shader: &'a [u8],
}

pub trait Device: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    /// Returns an error if the device has been removed.
    fn check_removed(&self) -> Result<()>;

    fn create_fence(&self, initial_value: u64, name: &str) -> Result<Box<dyn Fence>>;
    fn create_queue(&self, ty: QueueType, desc: &QueueDesc, name: &str) -> Result<Box<dyn Queue>>;
    fn create_command_allocator(&self, ty: QueueType) -> Result<Box<dyn CommandAllocator>>;
    fn create_command_list(
        &self,
        ty: QueueType,
        allocator: &dyn CommandAllocator,
    ) -> Result<Box<dyn CommandList>>;

    fn create_heap(&self, desc: &HeapDesc, name: &str) -> Result<Box<dyn Heap>>;
    fn resource_allocation_info(&self, desc: &ResourceDesc) -> AllocationInfo;
    fn create_committed_resource(
        &self,
        heap_type: HeapType,
        desc: &ResourceDesc,
        initial_state: ResourceState,
        clear_value: Option<&ClearValue>,
        name: &str,
    ) -> Result<Box<dyn NativeResource>>;
    fn create_placed_resource(
        &self,
        heap: &dyn Heap,
        offset: u64,
        desc: &ResourceDesc,
        initial_state: ResourceState,
        clear_value: Option<&ClearValue>,
        name: &str,
    ) -> Result<Box<dyn NativeResource>>;
    /// Footprints of `count` subresources starting at `first`, laid out from
    /// `base_offset`, and the total number of bytes they span.
    fn copyable_footprints(
        &self,
        desc: &ResourceDesc,
        first: u32,
        count: u32,
        base_offset: u64,
    ) -> (Vec<PlacedFootprint>, u64);

    fn create_descriptor_heap(
        &self,
        ty: DescriptorHeapType,
        capacity: u32,
        shader_visible: bool,
        name: &str,
    ) -> Result<Box<dyn DescriptorHeap>>;
    fn descriptor_increment_size(&self, ty: DescriptorHeapType) -> u32;
    fn create_view(&self, resource: Option<&dyn NativeResource>, view: &ViewDesc, dest: CpuDescriptor);
    fn create_sampler(&self, desc: &SamplerDesc, dest: CpuDescriptor);
    /// Copies single descriptors from `sources` into the contiguous range
    /// starting at `dest`.
    fn copy_descriptors(&self, ty: DescriptorHeapType, dest: CpuDescriptor, sources: &[CpuDescriptor]);

    fn create_root_signature(&self, desc: &RootSignatureDesc) -> Result<Box<dyn RootSignature>>;
    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> Result<Box<dyn PipelineState>>;
    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> Result<Box<dyn PipelineState>>;
}

pub trait Fence: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn completed_value(&self) -> u64;
    /// Sets the fence value from the host.
    fn signal(&self, value: u64) -> Result<()>;
    /// Blocks the calling thread until the fence reaches `value`.
    fn wait(&self, value: u64) -> Result<()>;
}

pub trait Queue: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn signal(&self, fence: &dyn Fence, value: u64) -> Result<()>;
    /// Makes the queue wait for `fence` to reach `value` before executing
    /// anything submitted after this call.
    fn wait(&self, fence: &dyn Fence, value: u64) -> Result<()>;
    fn execute(&self, lists: &[&dyn CommandList]) -> Result<()>;
}

pub trait CommandAllocator: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn reset(&self) -> Result<()>;
}

/// A native command list. Recording calls cannot fail; errors are reported
/// by `close`.
pub trait CommandList: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn reset(&mut self, allocator: &dyn CommandAllocator) -> Result<()>;
    fn close(&mut self) -> Result<()>;

    fn resource_barriers(&mut self, barriers: &[Barrier]);

    fn set_pipeline_state(&mut self, pipeline: &dyn PipelineState);
    fn set_root_signature(&mut self, kind: PipelineKind, root_signature: &dyn RootSignature);
    fn set_descriptor_heaps(
        &mut self,
        view_heap: Option<&dyn DescriptorHeap>,
        sampler_heap: Option<&dyn DescriptorHeap>,
    );
    fn set_root_descriptor_table(&mut self, kind: PipelineKind, index: u32, table: GpuDescriptor);
    fn set_root_constant_buffer_view(&mut self, kind: PipelineKind, index: u32, address: u64);
    fn set_root_shader_resource_view(&mut self, kind: PipelineKind, index: u32, address: u64);

    fn set_render_targets(&mut self, colors: &[CpuDescriptor], depth_stencil: Option<CpuDescriptor>);
    fn clear_render_target(&mut self, rtv: CpuDescriptor, color: [f32; 4]);
    fn clear_depth_stencil(&mut self, dsv: CpuDescriptor, flags: ClearFlags, depth: f32, stencil: u8);
    fn set_viewports(&mut self, viewports: &[Viewport]);
    fn set_scissor_rects(&mut self, rects: &[ScissorRect]);
    fn set_stencil_ref(&mut self, value: u32);
    fn set_primitive_topology(&mut self, topology: PrimitiveTopology);
    fn set_vertex_buffers(&mut self, start_slot: u32, views: &[VertexBufferView]);
    fn set_index_buffer(&mut self, view: Option<&IndexBufferView>);
    fn set_predication(&mut self, predicate: Option<(&dyn NativeResource, u64, PredicationOp)>);

    fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32, start_vertex: u32, start_instance: u32);
    fn draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    );
    fn dispatch(&mut self, x: u32, y: u32, z: u32);

    fn copy_buffer_region(
        &mut self,
        dest: &dyn NativeResource,
        dest_offset: u64,
        source: &dyn NativeResource,
        source_offset: u64,
        size: u64,
    );
    fn copy_resource(&mut self, dest: &dyn NativeResource, source: &dyn NativeResource);
    fn copy_texture_region(&mut self, dest: &CopyLocation, source: &CopyLocation);
    fn resolve_subresource(
        &mut self,
        dest: &dyn NativeResource,
        dest_subresource: u32,
        source: &dyn NativeResource,
        source_subresource: u32,
        format: Format,
    );
}

pub trait NativeResource: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn desc(&self) -> &ResourceDesc;
    fn gpu_address(&self) -> u64;
    /// Maps subresource 0 for host access. Only valid for upload and
    /// readback heaps.
    fn map(&self) -> Result<NonNull<u8>>;
    fn unmap(&self);
}

pub trait Heap: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn desc(&self) -> &HeapDesc;
}

pub trait DescriptorHeap: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn ty(&self) -> DescriptorHeapType;
    fn capacity(&self) -> u32;
    fn increment_size(&self) -> u32;
    fn cpu_start(&self) -> CpuDescriptor;
    /// `None` for heaps that are not shader visible.
    fn gpu_start(&self) -> Option<GpuDescriptor>;
}

pub trait RootSignature: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

pub trait PipelineState: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// Computes footprints the way the native API does: rows padded to 256
/// bytes, subresources placed at 512-byte boundaries.
pub(crate) fn linear_footprints(
    desc: &ResourceDesc,
    first: u32,
    count: u32,
    base_offset: u64,
) -> (Vec<PlacedFootprint>, u64) {
    use crate::memory::align_up;

    let mips = u32::from(desc.mip_levels.max(1));
    let (block, block_bytes) = desc.format.block_info();
    let mut footprints = Vec::with_capacity(count as usize);
    let mut offset = align_up(base_offset, TEXTURE_DATA_PLACEMENT_ALIGNMENT);
    let mut total = 0;

    for index in first..first + count {
        if desc.is_buffer() {
            footprints.push(PlacedFootprint {
                offset,
                format: Format::Unknown,
                width: desc.width as u32,
                height: 1,
                depth: 1,
                row_pitch: align_up(desc.width, TEXTURE_DATA_PITCH_ALIGNMENT) as u32,
                num_rows: 1,
                row_size: desc.width,
            });
            total = offset + desc.width - base_offset;
            continue;
        }

        let mip = index % mips;
        let width = ((desc.width as u32) >> mip).max(1);
        let height = (desc.height >> mip).max(1);
        let depth = if desc.dimension == ResourceDimension::Texture3D {
            (u32::from(desc.depth_or_array_size) >> mip).max(1)
        } else {
            1
        };

        let row_size = u64::from(width.div_ceil(block) * block_bytes);
        let num_rows = height.div_ceil(block);
        let row_pitch = align_up(row_size, TEXTURE_DATA_PITCH_ALIGNMENT);

        footprints.push(PlacedFootprint {
            offset,
            format: desc.format,
            width,
            height,
            depth,
            row_pitch: row_pitch as u32,
            num_rows,
            row_size,
        });

        let size = row_pitch * u64::from(num_rows) * u64::from(depth);
        total = offset + size - base_offset;
        offset = align_up(offset + size, TEXTURE_DATA_PLACEMENT_ALIGNMENT);
    }

    (footprints, total)
}
