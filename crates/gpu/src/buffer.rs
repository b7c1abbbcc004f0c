//! Structured, raw, vertex, index and constant buffers.
//!
//! A buffer is a single resource that may hold a 4-byte append/consume
//! counter in front of its data. Where the resource comes from depends on
//! its usages and flags:
//!
//! - anything with unordered access is placed in a default heap,
//! - `TRANSIENT` buffers are bumped out of the per-frame upload pages,
//! - `DYNAMIC` buffers are sub-allocated from persistent upload pages,
//! - everything else is placed in a default heap and written through a
//!   staging copy.

use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::Mutex;

use crate::{
    descriptor::OfflineDescriptor,
    hal::{
        CpuDescriptor, DescriptorHeapType, Format, IndexBufferView, ResourceDesc, ResourceFlags, VertexBufferView,
        ViewDesc, CONSTANT_BUFFER_ALIGNMENT,
    },
    heap::{AllocatorKind, SubAllocatorKind},
    memory::align_up,
    resource::{Resource, ResourceState},
    Device, Error, QueueType, Result,
};

bitflags! {
    #[derive(Default)]
    pub struct BufferUsages: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const CONSTANT = 1 << 2;
        const COPY = 1 << 3;
        const STRUCTURED = 1 << 4;
        const BYTE_ADDRESS = 1 << 5;
        const RW_STRUCTURED = 1 << 6;
        const RW_STRUCTURED_WITH_COUNTER = 1 << 7;
        const APPEND_STRUCTURED = 1 << 8;
        const CONSUME_STRUCTURED = 1 << 9;
        const RW_BYTE_ADDRESS = 1 << 10;

        const UNORDERED_ACCESS = Self::RW_STRUCTURED.bits
            | Self::RW_STRUCTURED_WITH_COUNTER.bits
            | Self::APPEND_STRUCTURED.bits
            | Self::CONSUME_STRUCTURED.bits
            | Self::RW_BYTE_ADDRESS.bits;
        const COUNTER = Self::RW_STRUCTURED_WITH_COUNTER.bits
            | Self::APPEND_STRUCTURED.bits
            | Self::CONSUME_STRUCTURED.bits;
    }
}

bitflags! {
    #[derive(Default)]
    pub struct BufferFlags: u32 {
        /// Written by the host every frame or so. Lives in upload memory.
        const DYNAMIC = 1 << 0;
        /// Only valid until the end of the current frame. Implies `DYNAMIC`.
        const TRANSIENT = 1 << 1;
    }
}

/// The part of a buffer a view or address refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferElement {
    StructuredData,
    RawData,
    StructuredCounter,
    RawCounter,
}

impl BufferElement {
    const COUNT: usize = 4;

    pub fn is_counter(self) -> bool {
        matches!(self, BufferElement::StructuredCounter | BufferElement::RawCounter)
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    pub stride: u32,
    pub count: u32,
    pub usages: BufferUsages,
    pub flags: BufferFlags,
}

impl BufferDesc {
    pub fn new(stride: u32, count: u32, usages: BufferUsages) -> Self {
        Self {
            stride,
            count,
            usages,
            flags: BufferFlags::empty(),
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: BufferFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn has_counter(&self) -> bool {
        self.usages.intersects(BufferUsages::COUNTER)
    }

    pub fn allows_unordered_access(&self) -> bool {
        self.usages.intersects(BufferUsages::UNORDERED_ACCESS)
    }

    /// Alignment of the data region inside the resource.
    ///
    /// Constant buffers need 256 bytes, structured views address whole
    /// elements, and raw views address 32-bit words.
    pub fn data_alignment(&self) -> u64 {
        let mut alignment = 4;

        if self.usages.contains(BufferUsages::CONSTANT) {
            alignment = CONSTANT_BUFFER_ALIGNMENT;
        }

        if self.usages.intersects(
            BufferUsages::STRUCTURED
                | BufferUsages::RW_STRUCTURED
                | BufferUsages::RW_STRUCTURED_WITH_COUNTER
                | BufferUsages::APPEND_STRUCTURED
                | BufferUsages::CONSUME_STRUCTURED,
        ) {
            alignment = lcm(alignment, u64::from(self.stride.max(1)));
        }

        alignment
    }

    /// Bytes of element data, padded to 256 for constant buffers.
    pub fn data_size(&self) -> u64 {
        let size = u64::from(self.stride) * u64::from(self.count);

        if self.usages.contains(BufferUsages::CONSTANT) {
            align_up(size, CONSTANT_BUFFER_ALIGNMENT)
        } else {
            size
        }
    }

    /// `(counter offset, data offset, total size)`
    pub fn layout(&self) -> (Option<u64>, u64, u64) {
        if self.has_counter() {
            let data_offset = align_up(4, self.data_alignment());
            (Some(0), data_offset, data_offset + self.data_size())
        } else {
            (None, 0, self.data_size())
        }
    }

    fn validate(&self) -> Result<()> {
        if self.stride == 0 || self.count == 0 {
            return Err(Error::InvalidArgument(format!(
                "buffer must have a non-zero stride and count, got {}x{}",
                self.stride, self.count
            )));
        }

        if self.usages.contains(BufferUsages::INDEX) && self.stride != 2 && self.stride != 4 {
            return Err(Error::InvalidArgument(format!(
                "index buffer stride must be 2 or 4, got {}",
                self.stride
            )));
        }

        if self.usages.contains(BufferUsages::BYTE_ADDRESS | BufferUsages::RW_BYTE_ADDRESS)
            && self.data_size() % 4 != 0
        {
            return Err(Error::InvalidArgument(
                "byte address buffers must be a multiple of 4 bytes".to_owned(),
            ));
        }

        Ok(())
    }
}

fn lcm(a: u64, b: u64) -> u64 {
    fn gcd(a: u64, b: u64) -> u64 {
        if b == 0 {
            a
        } else {
            gcd(b, a % b)
        }
    }

    a / gcd(a, b) * b
}

/// Where a buffer's memory comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferAllocation {
    Heap(AllocatorKind),
    Sub(SubAllocatorKind),
}

impl BufferAllocation {
    /// Picks an allocator from the buffer's usages and flags.
    pub fn for_desc(desc: &BufferDesc) -> Self {
        if desc.allows_unordered_access() {
            if desc.flags.intersects(BufferFlags::DYNAMIC | BufferFlags::TRANSIENT) {
                log::warn!("unordered access buffers cannot live in upload memory, ignoring {:?}", desc.flags);
            }
            return BufferAllocation::Heap(AllocatorKind::PlacedDefault);
        }

        if desc.flags.contains(BufferFlags::TRANSIENT) {
            BufferAllocation::Sub(SubAllocatorKind::TempUpload)
        } else if desc.flags.contains(BufferFlags::DYNAMIC) {
            BufferAllocation::Sub(SubAllocatorKind::PersistentUpload)
        } else {
            BufferAllocation::Heap(AllocatorKind::PlacedDefault)
        }
    }
}

struct Inner {
    device: Arc<Device>,
    name: String,
    desc: BufferDesc,
    allocation: BufferAllocation,
    resource: Resource,
    counter_offset: Option<u64>,
    data_offset: u64,
    uavs: Mutex<[Option<OfflineDescriptor>; BufferElement::COUNT]>,
}

/// A reference-counted GPU buffer.
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<Inner>,
}

impl Buffer {
    pub fn new(device: &Arc<Device>, name: &str, desc: &BufferDesc) -> Result<Self> {
        Self::with_allocation(device, name, desc, BufferAllocation::for_desc(desc))
    }

    pub fn with_allocation(
        device: &Arc<Device>,
        name: &str,
        desc: &BufferDesc,
        allocation: BufferAllocation,
    ) -> Result<Self> {
        desc.validate()?;
        let (counter_offset, data_offset, size) = desc.layout();

        let resource = match allocation {
            BufferAllocation::Heap(kind) => {
                let flags = if desc.allows_unordered_access() {
                    ResourceFlags::ALLOW_UNORDERED_ACCESS
                } else {
                    ResourceFlags::empty()
                };

                device.allocate_resource(
                    kind,
                    name,
                    &ResourceDesc::buffer(size, flags),
                    ResourceState::COMMON,
                    None,
                )?
            }
            BufferAllocation::Sub(kind) => {
                if desc.allows_unordered_access() {
                    return Err(Error::InvalidArgument(format!(
                        "{name}: unordered access buffers cannot be sub-allocated"
                    )));
                }
                device.sub_allocate(kind, name, size, desc.data_alignment())?
            }
        };

        Ok(Self {
            inner: Arc::new(Inner {
                device: device.clone(),
                name: name.to_owned(),
                desc: *desc,
                allocation,
                resource,
                counter_offset,
                data_offset,
                uavs: Mutex::new(Default::default()),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn desc(&self) -> &BufferDesc {
        &self.inner.desc
    }

    pub fn allocation(&self) -> BufferAllocation {
        self.inner.allocation
    }

    pub fn resource(&self) -> &Resource {
        &self.inner.resource
    }

    pub fn stride(&self) -> u32 {
        self.inner.desc.stride
    }

    pub fn count(&self) -> u32 {
        self.inner.desc.count
    }

    pub fn data_size(&self) -> u64 {
        self.inner.desc.data_size()
    }

    /// Offset of `element` from the start of the buffer's range in the
    /// resource.
    pub fn element_offset(&self, element: BufferElement) -> u64 {
        if element.is_counter() {
            match self.inner.counter_offset {
                Some(offset) => offset,
                None => panic!("{} has no counter", self.inner.name),
            }
        } else {
            self.inner.data_offset
        }
    }

    pub fn gpu_address(&self, element: BufferElement) -> u64 {
        self.inner.resource.gpu_address() + self.element_offset(element)
    }

    /// Whether a buffer described by `desc` could reuse this one.
    pub fn is_compatible_with(&self, desc: &BufferDesc) -> bool {
        self.inner.desc == *desc
    }

    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn vbv(&self) -> VertexBufferView {
        debug_assert!(self.inner.desc.usages.contains(BufferUsages::VERTEX));

        VertexBufferView {
            address: self.gpu_address(BufferElement::StructuredData),
            size: self.data_size() as u32,
            stride: self.inner.desc.stride,
        }
    }

    pub fn ibv(&self) -> IndexBufferView {
        debug_assert!(self.inner.desc.usages.contains(BufferUsages::INDEX));

        IndexBufferView {
            address: self.gpu_address(BufferElement::StructuredData),
            size: self.data_size() as u32,
            format: if self.inner.desc.stride == 2 {
                Format::R16Uint
            } else {
                Format::R32Uint
            },
        }
    }

    /// The unordered access view of `element`, created on first use.
    pub fn uav(&self, element: BufferElement) -> Result<CpuDescriptor> {
        let inner = &self.inner;
        assert!(
            inner.desc.allows_unordered_access(),
            "{} does not allow unordered access",
            inner.name
        );

        let mut uavs = inner.uavs.lock();
        if let Some(descriptor) = &uavs[element.index()] {
            return Ok(descriptor.cpu());
        }

        let view = self.uav_desc(element);
        let descriptor = inner.device.allocate_descriptor(DescriptorHeapType::CbvSrvUav)?;
        inner
            .device
            .raw()
            .create_view(Some(inner.resource.raw()), &view, descriptor.cpu());

        let cpu = descriptor.cpu();
        uavs[element.index()] = Some(descriptor);
        Ok(cpu)
    }

    fn uav_desc(&self, element: BufferElement) -> ViewDesc {
        let desc = &self.inner.desc;
        let base = self.inner.resource.offset();

        match element {
            BufferElement::StructuredData => {
                let stride = u64::from(desc.stride);
                ViewDesc::BufferUav {
                    first_element: (base + self.inner.data_offset) / stride,
                    num_elements: desc.count,
                    stride: desc.stride,
                    raw: false,
                    counter_offset: self.inner.counter_offset.map(|offset| base + offset),
                }
            }
            BufferElement::RawData => ViewDesc::BufferUav {
                first_element: (base + self.inner.data_offset) / 4,
                num_elements: (self.data_size() / 4) as u32,
                stride: 0,
                raw: true,
                counter_offset: None,
            },
            BufferElement::StructuredCounter | BufferElement::RawCounter => ViewDesc::BufferUav {
                first_element: (base + self.element_offset(element)) / 4,
                num_elements: 1,
                stride: if element == BufferElement::RawCounter { 0 } else { 4 },
                raw: element == BufferElement::RawCounter,
                counter_offset: None,
            },
        }
    }

    /// Writes `data` at `offset` bytes into the data region.
    ///
    /// Upload memory is written in place. Default heap buffers are written
    /// through a transient upload range and a copy on the direct queue, and
    /// this blocks until the copy has run.
    pub fn set_data(&self, offset: u64, data: &[u8]) -> Result<()> {
        let inner = &self.inner;
        assert!(
            offset + data.len() as u64 <= self.data_size(),
            "{}: writing {} bytes at {} overflows {} bytes",
            inner.name,
            data.len(),
            offset,
            self.data_size()
        );

        if data.is_empty() {
            return Ok(());
        }

        self.write_element(BufferElement::StructuredData, offset, data)
    }

    /// Overwrites the append/consume counter.
    pub fn set_counter(&self, value: u32) -> Result<()> {
        self.write_element(BufferElement::RawCounter, 0, &value.to_le_bytes())
    }

    fn write_element(&self, element: BufferElement, offset: u64, data: &[u8]) -> Result<()> {
        let inner = &self.inner;
        let offset = self.element_offset(element) + offset;

        if inner.resource.heap_type().is_cpu_accessible() {
            return inner.resource.write(offset, data);
        }

        let staging = inner.device.sub_allocate(
            SubAllocatorKind::TempUpload,
            "BufferStagingUpload",
            data.len() as u64,
            4,
        )?;
        staging.write(0, data)?;

        let mut context = inner.device.request_context(QueueType::Direct)?;
        let previous = inner.resource.state(0).unwrap_or(ResourceState::COMMON);
        context.copy_buffer_region(&inner.resource, offset, &staging, 0, data.len() as u64);
        context.transition_resource(&inner.resource, previous);
        context.submit()?.wait_cpu()
    }

    /// Copies the data region back to the host. Blocks until the GPU has
    /// finished every copy submitted so far on the direct queue.
    pub fn read_back(&self) -> Result<Vec<u8>> {
        let inner = &self.inner;
        let size = self.data_size();
        let mut out = vec![0; size as usize];

        if inner.resource.heap_type().is_cpu_accessible() {
            inner.resource.read(inner.data_offset, &mut out)?;
            return Ok(out);
        }

        let readback = inner.device.allocate_resource(
            AllocatorKind::CommittedReadback,
            "BufferReadback",
            &ResourceDesc::buffer(size, ResourceFlags::empty()),
            ResourceState::COPY_DEST,
            None,
        )?;

        let mut context = inner.device.request_context(QueueType::Direct)?;
        context.copy_buffer_region(&readback, 0, &inner.resource, inner.data_offset, size);
        context.submit()?.wait_cpu()?;

        readback.read(0, &mut out)?;
        Ok(out)
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("name", &self.inner.name)
            .field("desc", &self.inner.desc)
            .field("allocation", &self.inner.allocation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::tests::null_device,
        hal::{null, HeapType},
    };

    #[test]
    fn counter_precedes_aligned_data() {
        let desc = BufferDesc::new(12, 10, BufferUsages::APPEND_STRUCTURED);
        assert_eq!(desc.data_alignment(), 12);
        assert_eq!(desc.layout(), (Some(0), 12, 132));

        let constant = BufferDesc::new(4, 3, BufferUsages::CONSTANT);
        assert_eq!(constant.data_size(), 256);
        assert_eq!(constant.layout(), (None, 0, 256));
    }

    #[test]
    fn index_stride_is_checked() {
        let (device, _null) = null_device();
        let desc = BufferDesc::new(3, 6, BufferUsages::INDEX);
        assert!(matches!(
            Buffer::new(&device, "bad", &desc),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn allocation_follows_flags() {
        let vertex = BufferDesc::new(16, 4, BufferUsages::VERTEX);
        assert_eq!(
            BufferAllocation::for_desc(&vertex),
            BufferAllocation::Heap(AllocatorKind::PlacedDefault)
        );
        assert_eq!(
            BufferAllocation::for_desc(&vertex.with_flags(BufferFlags::DYNAMIC)),
            BufferAllocation::Sub(SubAllocatorKind::PersistentUpload)
        );
        assert_eq!(
            BufferAllocation::for_desc(&vertex.with_flags(BufferFlags::DYNAMIC | BufferFlags::TRANSIENT)),
            BufferAllocation::Sub(SubAllocatorKind::TempUpload)
        );

        let rw = BufferDesc::new(4, 4, BufferUsages::RW_BYTE_ADDRESS).with_flags(BufferFlags::TRANSIENT);
        assert_eq!(
            BufferAllocation::for_desc(&rw),
            BufferAllocation::Heap(AllocatorKind::PlacedDefault)
        );
    }

    #[test]
    fn set_data_round_trips() {
        let (device, _null) = null_device();
        let data: Vec<u8> = (0..64).collect();

        for flags in [BufferFlags::empty(), BufferFlags::DYNAMIC] {
            let desc = BufferDesc::new(4, 16, BufferUsages::STRUCTURED).with_flags(flags);
            let buffer = Buffer::new(&device, "data", &desc).unwrap();
            buffer.set_data(0, &data).unwrap();
            assert_eq!(buffer.read_back().unwrap(), data);
        }
    }

    #[test]
    fn default_heap_write_goes_through_copy() {
        let (device, _null) = null_device();
        let desc = BufferDesc::new(4, 4, BufferUsages::VERTEX);
        let buffer = Buffer::new(&device, "vertices", &desc).unwrap();
        assert_eq!(buffer.resource().heap_type(), HeapType::Default);

        buffer.set_data(4, &[9, 9, 9, 9]).unwrap();

        let queue = device.commands().queue(QueueType::Direct);
        let queue = queue.raw().as_any().downcast_ref::<null::Queue>().unwrap();
        assert!(queue
            .executed_commands()
            .iter()
            .any(|c| matches!(c, null::Command::CopyBufferRegion { size: 4, .. })));

        assert_eq!(&buffer.read_back().unwrap()[4..8], &[9, 9, 9, 9]);
    }

    #[test]
    fn uavs_are_cached() {
        let (device, null) = null_device();
        let desc = BufferDesc::new(16, 8, BufferUsages::RW_STRUCTURED_WITH_COUNTER);
        let buffer = Buffer::new(&device, "particles", &desc).unwrap();

        let data = buffer.uav(BufferElement::StructuredData).unwrap();
        assert_eq!(buffer.uav(BufferElement::StructuredData).unwrap(), data);

        let counter = buffer.uav(BufferElement::RawCounter).unwrap();
        assert_ne!(counter, data);

        match null.descriptor(data.0 as u64) {
            Some(null::Descriptor::View {
                view: ViewDesc::BufferUav {
                    first_element,
                    counter_offset,
                    ..
                },
                ..
            }) => {
                assert_eq!(first_element, 1);
                assert_eq!(counter_offset, Some(0));
            }
            other => panic!("unexpected descriptor {other:?}"),
        }
    }
}
