//! Textures, render textures and their views.
//!
//! There is one texture type. Whether it can be rendered to, and who
//! provides its pixels, is decided by its [`TextureKind`].

use std::{collections::HashMap, sync::Arc};

use bitflags::bitflags;
use parking_lot::Mutex;

use crate::{
    descriptor::OfflineDescriptor,
    hal::{
        self, AddressMode, ClearValue, CompareFunc, CpuDescriptor, DescriptorHeapType, Filter, Format,
        ResourceDesc, ResourceDimension, ResourceFlags, SamplerDesc, ViewDesc, ViewDimension,
    },
    heap::AllocatorKind,
    resource::{Resource, ResourceState},
    Device, Error, QueueType, Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureKind {
    /// Pixels come from the host. Never a render target.
    External,
    /// Written by the GPU as a render target, depth buffer or UAV.
    Render,
}

bitflags! {
    #[derive(Default)]
    pub struct TextureFlags: u32 {
        const SRGB = 1 << 0;
        const MIPMAPS = 1 << 1;
        const UNORDERED_ACCESS = 1 << 2;
        const SWAP_CHAIN = 1 << 3;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureDimension {
    Tex2D,
    Tex3D,
    Cube,
    Tex2DArray,
    CubeArray,
}

impl TextureDimension {
    pub fn is_cube(self) -> bool {
        matches!(self, TextureDimension::Cube | TextureDimension::CubeArray)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Point,
    Bilinear,
    Trilinear,
    /// Depth comparison for shadow maps.
    Shadow,
    /// Anisotropic filtering with the given maximum, clamped to `1..=16`.
    Anisotropic(u8),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WrapMode {
    Repeat,
    Clamp,
    Mirror,
    MirrorOnce,
}

/// Which plane of a texture a view or subresource refers to. `Default` is
/// the color plane of color textures and the depth plane of depth textures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureElement {
    Default,
    Color,
    Depth,
    Stencil,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CubeFace {
    PositiveX = 0,
    NegativeX = 1,
    PositiveY = 2,
    NegativeY = 3,
    PositiveZ = 4,
    NegativeZ = 5,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextureDesc {
    pub format: Format,
    pub flags: TextureFlags,
    pub dimension: TextureDimension,
    pub width: u32,
    pub height: u32,
    /// Depth for 3D textures, slices for arrays, and cubes (not faces) for
    /// cube arrays. `1` for a single cube.
    pub depth_or_array_size: u32,
    pub msaa_samples: u32,
    pub filter: FilterMode,
    pub wrap: WrapMode,
    pub mipmap_bias: f32,
}

impl TextureDesc {
    pub fn new_2d(format: Format, width: u32, height: u32) -> Self {
        Self {
            format,
            flags: TextureFlags::empty(),
            dimension: TextureDimension::Tex2D,
            width,
            height,
            depth_or_array_size: 1,
            msaa_samples: 1,
            filter: FilterMode::Bilinear,
            wrap: WrapMode::Clamp,
            mipmap_bias: 0.0,
        }
    }

    pub fn is_depth_stencil(&self) -> bool {
        self.format.is_depth_stencil()
    }

    pub fn has_stencil(&self) -> bool {
        self.format.has_stencil()
    }

    pub fn is_compatible_with(&self, other: &TextureDesc) -> bool {
        self.format == other.format
            && self.flags == other.flags
            && self.dimension == other.dimension
            && self.width == other.width
            && self.height == other.height
            && self.depth_or_array_size == other.depth_or_array_size
            && self.msaa_samples == other.msaa_samples
    }

    /// Array slices as the native API counts them: six per cube.
    pub fn array_size(&self) -> u32 {
        match self.dimension {
            TextureDimension::Tex3D => 1,
            TextureDimension::Cube => 6,
            TextureDimension::CubeArray => self.depth_or_array_size * 6,
            TextureDimension::Tex2D | TextureDimension::Tex2DArray => self.depth_or_array_size,
        }
    }

    /// Format of the native resource. Depth formats are created typeless so
    /// that they can also be sampled.
    pub fn resource_format(&self) -> Format {
        if self.is_depth_stencil() {
            self.format.to_typeless()
        } else {
            self.rtv_dsv_format()
        }
    }

    pub fn rtv_dsv_format(&self) -> Format {
        if self.flags.contains(TextureFlags::SRGB) {
            self.format.to_srgb()
        } else {
            self.format
        }
    }

    pub fn srv_uav_format(&self, element: TextureElement) -> Format {
        match self.plane(element) {
            0 if self.is_depth_stencil() => self.format.depth_plane_srv(),
            0 => self.rtv_dsv_format(),
            _ => self.format.stencil_plane_srv(),
        }
    }

    /// Full mip chain length for these dimensions.
    pub fn full_mip_count(&self) -> u32 {
        let mut size = self.width.max(self.height);
        if self.dimension == TextureDimension::Tex3D {
            size = size.max(self.depth_or_array_size);
        }
        32 - size.max(1).leading_zeros()
    }

    /// 0 for color or depth, 1 for stencil. Panics on elements the format
    /// does not have.
    fn plane(&self, element: TextureElement) -> u32 {
        match (self.is_depth_stencil(), element) {
            (true, TextureElement::Default | TextureElement::Depth) => 0,
            (true, TextureElement::Stencil) if self.has_stencil() => 1,
            (false, TextureElement::Default | TextureElement::Color) => 0,
            _ => panic!("{element:?} is not an element of {:?} textures", self.format),
        }
    }

    fn resource_desc(&self, kind: TextureKind, mip_levels: u32) -> ResourceDesc {
        let mut flags = ResourceFlags::empty();

        if kind == TextureKind::Render {
            flags |= if self.is_depth_stencil() {
                ResourceFlags::ALLOW_DEPTH_STENCIL
            } else {
                ResourceFlags::ALLOW_RENDER_TARGET
            };
        }

        if self.flags.contains(TextureFlags::UNORDERED_ACCESS) {
            flags |= ResourceFlags::ALLOW_UNORDERED_ACCESS;
        }

        let (dimension, depth_or_array_size) = match self.dimension {
            TextureDimension::Tex3D => (ResourceDimension::Texture3D, self.depth_or_array_size),
            _ => (ResourceDimension::Texture2D, self.array_size()),
        };

        ResourceDesc {
            dimension,
            width: u64::from(self.width.max(1)),
            height: self.height.max(1),
            depth_or_array_size: depth_or_array_size as u16,
            mip_levels: mip_levels as u16,
            format: self.resource_format(),
            sample_count: self.msaa_samples.max(1),
            sample_quality: 0,
            flags,
        }
    }

    fn sampler_desc(&self) -> SamplerDesc {
        let (filter, max_anisotropy, comparison) = match self.filter {
            FilterMode::Point => (Filter::Point, 1, None),
            FilterMode::Bilinear => (Filter::Bilinear, 1, None),
            FilterMode::Trilinear => (Filter::Trilinear, 1, None),
            // depth is reversed, nearer is greater
            FilterMode::Shadow => (Filter::Comparison, 1, Some(CompareFunc::GreaterEqual)),
            FilterMode::Anisotropic(n) => (Filter::Anisotropic, u32::from(n.clamp(1, 16)), None),
        };

        SamplerDesc {
            filter,
            address: match self.wrap {
                WrapMode::Repeat => AddressMode::Wrap,
                WrapMode::Clamp => AddressMode::Clamp,
                WrapMode::Mirror => AddressMode::Mirror,
                WrapMode::MirrorOnce => AddressMode::MirrorOnce,
            },
            mip_lod_bias: self.mipmap_bias,
            max_anisotropy,
            comparison,
        }
    }
}

#[derive(Default)]
struct Views {
    srv: [Option<OfflineDescriptor>; 2],
    uav: HashMap<(u32, u32), OfflineDescriptor>,
    rtv_dsv: HashMap<(u32, u32, u32), OfflineDescriptor>,
    sampler: Option<Arc<OfflineDescriptor>>,
}

struct Inner {
    device: Arc<Device>,
    name: String,
    kind: TextureKind,
    desc: TextureDesc,
    mip_levels: u32,
    resource: Resource,
    views: Mutex<Views>,
}

/// A reference-counted texture.
#[derive(Clone)]
pub struct Texture {
    inner: Arc<Inner>,
}

impl Texture {
    /// Creates a render texture in a placed default heap, cleared to
    /// transparent black or to depth 0.
    pub fn new_render(device: &Arc<Device>, name: &str, desc: &TextureDesc) -> Result<Self> {
        Self::new_render_in(device, name, desc, AllocatorKind::PlacedDefault)
    }

    pub fn new_render_in(device: &Arc<Device>, name: &str, desc: &TextureDesc, allocator: AllocatorKind) -> Result<Self> {
        let resource_desc = desc.resource_desc(TextureKind::Render, 1);
        let clear = if desc.is_depth_stencil() {
            ClearValue::DepthStencil {
                format: desc.format,
                depth: 0.0,
                stencil: 0,
            }
        } else {
            ClearValue::Color {
                format: desc.rtv_dsv_format(),
                color: [0.0; 4],
            }
        };

        let resource = device.allocate_resource(allocator, name, &resource_desc, ResourceState::COMMON, Some(&clear))?;
        Ok(Self::from_parts(device, name, TextureKind::Render, desc, resource))
    }

    /// Creates a texture and uploads `pixels` into it.
    ///
    /// `pixels` holds every subresource tightly packed, array slice by array
    /// slice, each slice with `mip_levels` mips from largest to smallest.
    /// Blocks until the upload has run.
    pub fn from_pixels(
        device: &Arc<Device>,
        name: &str,
        desc: &TextureDesc,
        pixels: &[u8],
        mip_levels: u32,
    ) -> Result<Self> {
        let mip_levels = mip_levels.max(1);
        let resource_desc = desc.resource_desc(TextureKind::External, mip_levels);
        let resource = device.allocate_resource(
            AllocatorKind::PlacedDefault,
            name,
            &resource_desc,
            ResourceState::COMMON,
            None,
        )?;

        let texture = Self::from_parts(device, name, TextureKind::External, desc, resource);
        texture.load_from_pixels(pixels)?;
        Ok(texture)
    }

    /// Wraps a native resource owned elsewhere, such as a swap chain buffer.
    pub fn from_native(
        device: &Arc<Device>,
        name: &str,
        desc: &TextureDesc,
        raw: Arc<dyn hal::NativeResource>,
        state: ResourceState,
    ) -> Self {
        let mut desc = *desc;
        desc.flags |= TextureFlags::SWAP_CHAIN;
        let resource = Resource::external(raw, name, state);
        Self::from_parts(device, name, TextureKind::Render, &desc, resource)
    }

    fn from_parts(device: &Arc<Device>, name: &str, kind: TextureKind, desc: &TextureDesc, resource: Resource) -> Self {
        let mip_levels = u32::from(resource.desc().mip_levels.max(1));

        Self {
            inner: Arc::new(Inner {
                device: device.clone(),
                name: name.to_owned(),
                kind,
                desc: *desc,
                mip_levels,
                resource,
                views: Mutex::new(Views::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> TextureKind {
        self.inner.kind
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.inner.desc
    }

    pub fn mip_levels(&self) -> u32 {
        self.inner.mip_levels
    }

    pub fn resource(&self) -> &Resource {
        &self.inner.resource
    }

    pub fn allows_rendering(&self) -> bool {
        self.inner.kind == TextureKind::Render
    }

    pub fn ptr_eq(&self, other: &Texture) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The native subresource index of `(element, array slice, mip)`.
    pub fn subresource_index(&self, element: TextureElement, array_slice: u32, mip: u32) -> u32 {
        let desc = &self.inner.desc;
        let mips = self.inner.mip_levels;
        let array_size = if desc.dimension == TextureDimension::Tex3D {
            1
        } else {
            desc.array_size()
        };

        debug_assert!(mip < mips && array_slice < array_size);
        mip + array_slice * mips + desc.plane(element) * mips * array_size
    }

    pub fn cube_face_subresource_index(&self, element: TextureElement, face: CubeFace, cube: u32, mip: u32) -> u32 {
        debug_assert!(self.inner.desc.dimension.is_cube());
        self.subresource_index(element, face as u32 + cube * 6, mip)
    }

    /// Copies tightly packed pixel data into every subresource.
    pub fn load_from_pixels(&self, pixels: &[u8]) -> Result<()> {
        let inner = &self.inner;
        let desc = inner.resource.desc();
        let count = desc.subresource_count();
        let (footprints, _) = inner.device.raw().copyable_footprints(desc, 0, count, 0);

        let mut slices = Vec::with_capacity(footprints.len());
        let mut offset = 0;
        for footprint in &footprints {
            let size = (footprint.row_size * u64::from(footprint.num_rows) * u64::from(footprint.depth)) as usize;
            let Some(slice) = pixels.get(offset..offset + size) else {
                break;
            };
            slices.push(slice);
            offset += size;
        }

        if slices.len() != footprints.len() || offset != pixels.len() {
            return Err(Error::InvalidArgument(format!(
                "{}: expected {} bytes of pixel data, got {}",
                inner.name,
                footprints
                    .iter()
                    .map(|f| f.row_size * u64::from(f.num_rows) * u64::from(f.depth))
                    .sum::<u64>(),
                pixels.len()
            )));
        }

        let mut context = inner.device.request_context(QueueType::Direct)?;
        context.update_subresources(&inner.resource, 0, &slices)?;
        context.transition_resource(&inner.resource, ResourceState::ALL_SHADER_RESOURCE);
        context.submit()?.wait_cpu()
    }

    pub fn srv(&self, element: TextureElement) -> Result<CpuDescriptor> {
        let inner = &self.inner;
        let desc = &inner.desc;
        let plane = desc.plane(element);

        let mut views = inner.views.lock();
        if let Some(descriptor) = &views.srv[plane as usize] {
            return Ok(descriptor.cpu());
        }

        let multisampled = desc.msaa_samples > 1;
        let dimension = match (desc.dimension, multisampled) {
            (TextureDimension::Tex2D, false) => ViewDimension::Texture2D,
            (TextureDimension::Tex2D, true) => ViewDimension::Texture2DMs,
            (TextureDimension::Tex2DArray, false) => ViewDimension::Texture2DArray,
            (TextureDimension::Tex2DArray, true) => ViewDimension::Texture2DMsArray,
            (TextureDimension::Tex3D, false) => ViewDimension::Texture3D,
            (TextureDimension::Cube, false) => ViewDimension::TextureCube,
            (TextureDimension::CubeArray, false) => ViewDimension::TextureCubeArray,
            (dimension, true) => panic!("{dimension:?} textures cannot be multisampled"),
        };

        let view = ViewDesc::TextureSrv {
            format: desc.srv_uav_format(element),
            dimension,
            most_detailed_mip: 0,
            mip_levels: inner.mip_levels,
            first_slice: 0,
            array_size: match desc.dimension {
                TextureDimension::CubeArray => desc.depth_or_array_size,
                TextureDimension::Tex3D => 1,
                _ => desc.array_size(),
            },
        };

        let descriptor = self.create_view(&view)?;
        let cpu = descriptor.cpu();
        views.srv[plane as usize] = Some(descriptor);
        Ok(cpu)
    }

    pub fn uav(&self, element: TextureElement, mip: u32) -> Result<CpuDescriptor> {
        let inner = &self.inner;
        let desc = &inner.desc;
        assert!(
            desc.flags.contains(TextureFlags::UNORDERED_ACCESS),
            "{} was not created with unordered access",
            inner.name
        );
        let plane = desc.plane(element);

        let mut views = inner.views.lock();
        if let Some(descriptor) = views.uav.get(&(plane, mip)) {
            return Ok(descriptor.cpu());
        }

        let multisampled = desc.msaa_samples > 1;
        let (dimension, array_size) = match desc.dimension {
            TextureDimension::Tex3D => (ViewDimension::Texture3D, desc.depth_or_array_size),
            TextureDimension::Tex2D if multisampled => (ViewDimension::Texture2DMs, 1),
            TextureDimension::Tex2D => (ViewDimension::Texture2D, 1),
            _ if multisampled => (ViewDimension::Texture2DMsArray, desc.array_size()),
            _ => (ViewDimension::Texture2DArray, desc.array_size()),
        };

        let view = ViewDesc::TextureUav {
            format: desc.srv_uav_format(element),
            dimension,
            mip_slice: mip,
            first_slice: 0,
            array_size,
        };

        let descriptor = self.create_view(&view)?;
        let cpu = descriptor.cpu();
        views.uav.insert((plane, mip), descriptor);
        Ok(cpu)
    }

    /// Render target view of one slice.
    pub fn rtv(&self, array_slice: u32, mip: u32) -> Result<CpuDescriptor> {
        debug_assert!(!self.inner.desc.is_depth_stencil());
        self.rtv_dsv(array_slice, 1, mip)
    }

    /// Depth stencil view of one slice.
    pub fn dsv(&self, array_slice: u32, mip: u32) -> Result<CpuDescriptor> {
        debug_assert!(self.inner.desc.is_depth_stencil());
        self.rtv_dsv(array_slice, 1, mip)
    }

    pub fn cube_face_rtv_dsv(&self, face: CubeFace, face_count: u32, cube: u32, mip: u32) -> Result<CpuDescriptor> {
        self.rtv_dsv(face as u32 + cube * 6, face_count, mip)
    }

    /// A render target or depth stencil view, depending on the format, of
    /// `slice_count` slices (or depth slices of a 3D texture) starting at
    /// `first_slice`.
    pub fn rtv_dsv(&self, first_slice: u32, slice_count: u32, mip: u32) -> Result<CpuDescriptor> {
        let inner = &self.inner;
        let desc = &inner.desc;
        assert!(self.allows_rendering(), "{} cannot be rendered to", inner.name);

        let key = (first_slice, slice_count, mip);
        let mut views = inner.views.lock();
        if let Some(descriptor) = views.rtv_dsv.get(&key) {
            return Ok(descriptor.cpu());
        }

        let dimension = match (desc.dimension, desc.msaa_samples > 1) {
            (TextureDimension::Tex3D, _) => ViewDimension::Texture3D,
            (TextureDimension::Tex2D, false) => ViewDimension::Texture2D,
            (TextureDimension::Tex2D, true) => ViewDimension::Texture2DMs,
            (_, false) => ViewDimension::Texture2DArray,
            (_, true) => ViewDimension::Texture2DMsArray,
        };

        let view = if desc.is_depth_stencil() {
            assert_ne!(dimension, ViewDimension::Texture3D, "depth textures cannot be 3D");
            ViewDesc::DepthStencil {
                format: desc.format,
                dimension,
                mip_slice: mip,
                first_slice,
                array_size: slice_count,
            }
        } else {
            ViewDesc::RenderTarget {
                format: desc.rtv_dsv_format(),
                dimension,
                mip_slice: mip,
                first_slice,
                array_size: slice_count,
            }
        };

        let descriptor = self.create_view(&view)?;
        let cpu = descriptor.cpu();
        views.rtv_dsv.insert(key, descriptor);
        Ok(cpu)
    }

    /// The sampler described by the texture's filter and wrap modes, shared
    /// with every other texture that samples the same way.
    pub fn sampler(&self) -> Result<CpuDescriptor> {
        let inner = &self.inner;
        let mut views = inner.views.lock();

        if let Some(sampler) = &views.sampler {
            return Ok(sampler.cpu());
        }

        let sampler = inner.device.sampler(&inner.desc.sampler_desc())?;
        let cpu = sampler.cpu();
        views.sampler = Some(sampler);
        Ok(cpu)
    }

    fn create_view(&self, view: &ViewDesc) -> Result<OfflineDescriptor> {
        let inner = &self.inner;
        let ty = view.heap_type();
        debug_assert!(ty != DescriptorHeapType::Sampler);

        let descriptor = inner.device.allocate_descriptor(ty)?;
        inner
            .device
            .raw()
            .create_view(Some(inner.resource.raw()), view, descriptor.cpu());
        Ok(descriptor)
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .field("desc", &self.inner.desc)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{device::tests::null_device, hal::null};

    #[test]
    fn subresources_are_mip_major_within_planes() {
        let (device, _null) = null_device();
        let mut desc = TextureDesc::new_2d(Format::D24UnormS8Uint, 16, 16);
        desc.dimension = TextureDimension::Tex2DArray;
        desc.depth_or_array_size = 3;
        let texture = Texture::new_render(&device, "shadows", &desc).unwrap();

        assert_eq!(texture.mip_levels(), 1);
        assert_eq!(texture.subresource_index(TextureElement::Depth, 2, 0), 2);
        assert_eq!(texture.subresource_index(TextureElement::Stencil, 0, 0), 3);
        assert_eq!(texture.resource().subresource_count(), 6);
    }

    #[test]
    fn full_mip_chain() {
        let desc = TextureDesc::new_2d(Format::R8G8B8A8Unorm, 256, 64);
        assert_eq!(desc.full_mip_count(), 9);
        assert_eq!(TextureDesc::new_2d(Format::R8G8B8A8Unorm, 1, 1).full_mip_count(), 1);
    }

    #[test]
    fn views_are_created_once() {
        let (device, null) = null_device();
        let mut desc = TextureDesc::new_2d(Format::R16G16B16A16Float, 32, 32);
        desc.dimension = TextureDimension::Cube;
        let texture = Texture::new_render(&device, "Reflection", &desc).unwrap();

        let srv = texture.srv(TextureElement::Default).unwrap();
        assert_eq!(texture.srv(TextureElement::Color).unwrap(), srv);

        let face = texture.cube_face_rtv_dsv(CubeFace::NegativeY, 1, 0, 0).unwrap();
        assert_eq!(texture.rtv(3, 0).unwrap(), face);
        assert_ne!(texture.rtv(4, 0).unwrap(), face);

        match null.descriptor(face.0 as u64) {
            Some(null::Descriptor::View {
                view: ViewDesc::RenderTarget {
                    dimension,
                    first_slice,
                    ..
                },
                ..
            }) => {
                assert_eq!(dimension, ViewDimension::Texture2DArray);
                assert_eq!(first_slice, 3);
            }
            other => panic!("unexpected descriptor {other:?}"),
        }
    }

    #[test]
    fn depth_is_typeless_and_sampled_by_plane() {
        let desc = TextureDesc::new_2d(Format::D32Float, 8, 8);
        assert_eq!(desc.resource_format(), Format::R32Typeless);
        assert_eq!(desc.srv_uav_format(TextureElement::Default), Format::R32Float);

        let mut srgb = TextureDesc::new_2d(Format::R8G8B8A8Unorm, 8, 8);
        srgb.flags = TextureFlags::SRGB;
        assert_eq!(srgb.resource_format(), Format::R8G8B8A8UnormSrgb);
    }

    #[test]
    #[should_panic]
    fn stencil_of_color_texture_panics() {
        let desc = TextureDesc::new_2d(Format::R8G8B8A8Unorm, 8, 8);
        desc.srv_uav_format(TextureElement::Stencil);
    }

    #[test]
    fn samplers_are_shared() {
        let (device, _null) = null_device();
        let mut desc = TextureDesc::new_2d(Format::R8G8B8A8Unorm, 4, 4);
        desc.filter = FilterMode::Anisotropic(8);
        desc.wrap = WrapMode::Repeat;

        let a = Texture::new_render(&device, "a", &desc).unwrap();
        let b = Texture::new_render(&device, "b", &desc).unwrap();
        assert_eq!(a.sampler().unwrap(), b.sampler().unwrap());

        desc.wrap = WrapMode::Clamp;
        let c = Texture::new_render(&device, "c", &desc).unwrap();
        assert_ne!(a.sampler().unwrap(), c.sampler().unwrap());
    }

    #[test]
    fn pixels_are_uploaded_with_row_pitch() {
        let (device, _null) = null_device();
        let desc = TextureDesc::new_2d(Format::R8G8B8A8Unorm, 64, 2);
        let pixels: Vec<u8> = (0..512).map(|i| i as u8).collect();
        let texture = Texture::from_pixels(&device, "albedo", &desc, &pixels, 1).unwrap();

        let raw = texture.resource().raw().as_any().downcast_ref::<null::Resource>().unwrap();
        assert_eq!(&raw.contents()[..512], &pixels[..]);
        assert_eq!(
            texture.resource().state(0),
            Some(ResourceState::ALL_SHADER_RESOURCE)
        );

        assert!(matches!(
            Texture::from_pixels(&device, "short", &desc, &pixels[..100], 1),
            Err(Error::InvalidArgument(_))
        ));
    }
}
