//! GPU resource lifetime, descriptor and command submission core.
//!
//! Resources are reference counted and hand themselves back to their
//! allocator when the last reference goes away. Nothing is actually freed
//! until the frame fence passes the value that was next at the time of the
//! release, so the GPU never sees memory or descriptors disappear under it.
//!
//! The entry point is [`init_device`], which creates the process-wide
//! [`Device`]. Contexts are requested from the device, record commands, and
//! are submitted for a [`SyncPoint`]. [`Device::signal_next_frame_fence`] ends a
//! frame and sweeps every allocator.

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod hal;
pub mod heap;
pub mod material;
pub mod memory;
pub mod mesh;
pub mod resource;
pub mod shader;
pub mod sync;
pub mod texture;

mod device;
mod error;
mod frame;

pub use buffer::{Buffer, BufferDesc, BufferElement, BufferFlags, BufferUsages};
pub use command::{CommandContext, CommandQueue};
pub use device::{destroy_device, device, init_device, Device};
pub use error::{Error, Result};
pub use frame::CommandManager;
pub use hal::QueueType;
pub use heap::{AllocatorKind, SubAllocatorKind};
pub use material::Material;
pub use mesh::{Geometry, Mesh, MeshRenderer};
pub use resource::{Resource, ResourceState};
pub use shader::{ComputeShader, Shader, ShaderPass, ShaderProgram};
pub use sync::{Fence, SyncPoint};
pub use texture::{Texture, TextureDesc, TextureKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    /// Direct3D 12. Only available on Windows.
    Dx12,
    /// A host-memory device that records commands instead of running them.
    Null,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerPreference {
    LowPower,
    HighPerformance,
}

#[derive(Clone, Debug)]
pub struct Config {
    /// The native API to run on. Defaults to `Dx12` on Windows and `Null`
    /// everywhere else.
    pub backend: Backend,

    /// Whether or not to enable the native debug layer.
    ///
    /// This may have an outsized impact on performance. Defaults to `None`,
    /// which enables it in debug builds. Override with `Some(true)` or
    /// `Some(false)` to force it on or off.
    pub debug_layer: Option<bool>,

    /// Influences adapter selection on multi-GPU systems. Defaults to
    /// `HighPerformance`.
    pub power_preference: PowerPreference,

    /// Descriptors per offline page, indexed by
    /// [`hal::DescriptorHeapType::index`]. Defaults to 1024 views, 256
    /// samplers, 64 render target views and 64 depth stencil views.
    pub offline_descriptor_page_sizes: [u32; 4],

    /// Capacity of each shader-visible view heap. Defaults to 1,000,000.
    pub online_view_descriptor_heap_size: u32,

    /// Capacity of each shader-visible sampler heap. Defaults to 2048.
    pub online_sampler_descriptor_heap_size: u32,

    /// Size of a page of the transient upload allocator, and of the pages of
    /// the persistent upload allocator. Defaults to 4 MiB.
    pub upload_page_size: u64,

    /// Size of the native heaps that placed buffers are carved from. Defaults
    /// to 64 MiB.
    pub placed_buffer_page_size: u64,

    /// Size of the native heaps that placed textures and render textures are
    /// carved from. Defaults to 64 MiB.
    pub placed_texture_page_size: u64,

    /// How many frames the host may run ahead of the GPU. The device does not
    /// enforce this; callers wait on the frame fence with it. Defaults to 3.
    pub frame_latency: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: if cfg!(target_os = "windows") {
                Backend::Dx12
            } else {
                Backend::Null
            },
            debug_layer: None,
            power_preference: PowerPreference::HighPerformance,
            offline_descriptor_page_sizes: [1024, 256, 64, 64],
            online_view_descriptor_heap_size: 1_000_000,
            online_sampler_descriptor_heap_size: 2048,
            upload_page_size: 4 * 1024 * 1024,
            placed_buffer_page_size: 64 * 1024 * 1024,
            placed_texture_page_size: 64 * 1024 * 1024,
            frame_latency: 3,
        }
    }
}

impl Config {
    pub fn debug_layer_enabled(&self) -> bool {
        self.debug_layer.unwrap_or(cfg!(debug_assertions))
    }
}
