use std::{collections::VecDeque, sync::Arc};

use smallvec::SmallVec;

use crate::{
    hal::{self, CpuDescriptor, DescriptorHeapType, GpuDescriptor},
    memory::RingAllocator,
    Result,
};

/// Base handles of the tables reserved by one `allocate_many` call; `None`
/// for tables that had no descriptors.
pub type TableBases = SmallVec<[Option<GpuDescriptor>; 4]>;

/// A shader-visible descriptor heap used as a ring of descriptor tables.
///
/// Tables are valid until the frame they were allocated in retires. The
/// owner calls [`retire`](Self::retire) at the end of every frame and
/// [`clean_up`](Self::clean_up) once the GPU has passed older frames.
pub struct OnlineDescriptorAllocator {
    device: Arc<dyn hal::Device>,
    heap: Arc<dyn hal::DescriptorHeap>,
    ring: RingAllocator,
    increment: u32,
    releases: VecDeque<(u64, u64)>,
}

impl OnlineDescriptorAllocator {
    pub fn new(device: Arc<dyn hal::Device>, ty: DescriptorHeapType, capacity: u32, name: &str) -> Result<Self> {
        debug_assert!(matches!(ty, DescriptorHeapType::CbvSrvUav | DescriptorHeapType::Sampler));

        let heap: Arc<dyn hal::DescriptorHeap> = device.create_descriptor_heap(ty, capacity, true, name)?.into();
        let increment = heap.increment_size();

        Ok(Self {
            device,
            heap,
            ring: RingAllocator::new(u64::from(capacity)),
            increment,
            releases: VecDeque::new(),
        })
    }

    pub fn heap(&self) -> &Arc<dyn hal::DescriptorHeap> {
        &self.heap
    }

    pub fn capacity(&self) -> u32 {
        self.ring.capacity() as u32
    }

    pub fn front(&self) -> u32 {
        self.ring.front() as u32
    }

    pub fn rear(&self) -> u32 {
        self.ring.rear() as u32
    }

    pub fn used(&self) -> u32 {
        self.ring.used() as u32
    }

    /// Reserves one table and copies `sources` into it.
    pub fn allocate(&mut self, sources: &[CpuDescriptor]) -> Option<GpuDescriptor> {
        self.allocate_many(&[sources]).and_then(|bases| bases[0])
    }

    /// Reserves one contiguous run for all `tables` and copies each table's
    /// offline descriptors into its part of the run.
    ///
    /// Returns `None` without changing anything if the ring cannot hold the
    /// run right now.
    pub fn allocate_many(&mut self, tables: &[&[CpuDescriptor]]) -> Option<TableBases> {
        let total: usize = tables.iter().map(|t| t.len()).sum();
        if total == 0 {
            return Some(tables.iter().map(|_| None).collect());
        }

        let first = self.ring.allocate(total as u64).ok()? as u32;
        let ty = self.heap.ty();
        let cpu_start = self.heap.cpu_start();
        let Some(gpu_start) = self.heap.gpu_start() else {
            unreachable!("online descriptor heaps are shader visible")
        };

        let mut offset = first;
        let bases = tables
            .iter()
            .map(|table| {
                if table.is_empty() {
                    return None;
                }

                self.device
                    .copy_descriptors(ty, cpu_start.offset(offset, self.increment), table);
                let base = gpu_start.offset(offset, self.increment);
                offset += table.len() as u32;
                Some(base)
            })
            .collect();

        Some(bases)
    }

    /// Marks everything allocated so far as used by the frame that completes
    /// at `key`.
    pub fn retire(&mut self, key: u64) {
        let marker = self.ring.marker();
        match self.releases.back_mut() {
            Some((last_key, last_marker)) if *last_marker == marker => *last_key = (*last_key).max(key),
            _ => self.releases.push_back((key, marker)),
        }
    }

    pub fn clean_up(&mut self, completed: u64) {
        while let Some((key, marker)) = self.releases.front().copied() {
            if key > completed {
                break;
            }
            self.ring.release_to(marker);
            self.releases.pop_front();
        }
    }

    pub fn reset(&mut self) {
        self.ring.reset();
        self.releases.clear();
    }
}

/// A current online allocator plus retired siblings that are recycled once
/// the GPU is done with them.
pub struct OnlineDescriptorMultiAllocator {
    device: Arc<dyn hal::Device>,
    ty: DescriptorHeapType,
    capacity: u32,
    current: OnlineDescriptorAllocator,
    retired: VecDeque<(u64, OnlineDescriptorAllocator)>,
    last_completed: u64,
    heap_count: usize,
}

impl OnlineDescriptorMultiAllocator {
    pub fn new(device: Arc<dyn hal::Device>, ty: DescriptorHeapType, capacity: u32) -> Result<Self> {
        let current = OnlineDescriptorAllocator::new(device.clone(), ty, capacity, &heap_name(ty, 0))?;

        Ok(Self {
            device,
            ty,
            capacity,
            current,
            retired: VecDeque::new(),
            last_completed: 0,
            heap_count: 1,
        })
    }

    pub fn ty(&self) -> DescriptorHeapType {
        self.ty
    }

    pub fn current(&self) -> &OnlineDescriptorAllocator {
        &self.current
    }

    pub fn heap(&self) -> &Arc<dyn hal::DescriptorHeap> {
        self.current.heap()
    }

    /// Native heaps created so far, including retired ones.
    pub fn heap_count(&self) -> usize {
        self.heap_count
    }

    pub fn allocate_many(&mut self, tables: &[&[CpuDescriptor]]) -> Option<(TableBases, Arc<dyn hal::DescriptorHeap>)> {
        let bases = self.current.allocate_many(tables)?;
        Some((bases, self.current.heap().clone()))
    }

    /// Switches to a sibling heap. The current heap is retired with `key`
    /// (the frame fence value its tables may still be used by). The oldest
    /// retired heap is reused if the GPU is done with it; otherwise a new one
    /// is created.
    pub fn rollover(&mut self, key: u64) -> Result<()> {
        let next = match self.retired.front() {
            Some((retired_key, _)) if *retired_key <= self.last_completed => {
                let Some((_, mut allocator)) = self.retired.pop_front() else {
                    unreachable!()
                };
                allocator.reset();
                allocator
            }
            _ => {
                let allocator = OnlineDescriptorAllocator::new(
                    self.device.clone(),
                    self.ty,
                    self.capacity,
                    &heap_name(self.ty, self.heap_count),
                )?;
                self.heap_count += 1;
                allocator
            }
        };

        log::trace!(
            "online {} descriptor heap rolls over; {} of {} used",
            self.ty.name(),
            self.current.used(),
            self.capacity
        );

        let previous = std::mem::replace(&mut self.current, next);
        self.retired.push_back((key, previous));
        Ok(())
    }

    pub fn retire_frame(&mut self, key: u64) {
        self.current.retire(key);
    }

    pub fn clean_up(&mut self, completed: u64) {
        self.last_completed = self.last_completed.max(completed);
        self.current.clean_up(completed);
    }
}

fn heap_name(ty: DescriptorHeapType, index: usize) -> String {
    format!("Online{}DescriptorHeap{}", ty.name(), index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{null, Device as _, SamplerDesc, ViewDesc};

    fn sources(device: &null::Device, count: u32) -> (Box<dyn hal::DescriptorHeap>, Vec<CpuDescriptor>) {
        let heap = device
            .create_descriptor_heap(DescriptorHeapType::CbvSrvUav, count, false, "offline")
            .unwrap();
        let increment = heap.increment_size();
        let handles = (0..count)
            .map(|i| {
                let handle = heap.cpu_start().offset(i, increment);
                device.create_view(
                    None,
                    &ViewDesc::ConstantBuffer {
                        address: u64::from(i) * 256,
                        size: 256,
                    },
                    handle,
                );
                handle
            })
            .collect();
        (heap, handles)
    }

    #[test]
    fn tables_are_copied_contiguously() {
        let null = Arc::new(null::Device::new());
        let (_offline, handles) = sources(&null, 5);
        let mut online = OnlineDescriptorAllocator::new(null.clone(), DescriptorHeapType::CbvSrvUav, 16, "online").unwrap();

        let bases = online
            .allocate_many(&[&handles[..2], &[], &handles[2..]])
            .unwrap();
        assert_eq!(bases.len(), 3);
        assert!(bases[1].is_none());

        let increment = online.heap().increment_size();
        let second = bases[2].unwrap();
        assert_eq!(second, bases[0].unwrap().offset(2, increment));
        assert_eq!(null.descriptor(second.0), null.descriptor(handles[2].0 as u64));
        assert_eq!(online.rear(), 5);
    }

    #[test]
    fn ring_space_returns_after_clean_up() {
        let null = Arc::new(null::Device::new());
        let (_offline, handles) = sources(&null, 6);
        let mut online = OnlineDescriptorAllocator::new(null.clone(), DescriptorHeapType::CbvSrvUav, 8, "online").unwrap();

        assert!(online.allocate(&handles).is_some());
        online.retire(1);
        assert!(online.allocate(&handles).is_none());

        online.clean_up(0);
        assert!(online.allocate(&handles).is_none());

        online.clean_up(1);
        assert_eq!(online.used(), 0);
        assert_eq!(online.allocate(&handles), Some(online.heap().gpu_start().unwrap()));
    }

    #[test]
    fn rollover_switches_to_fresh_heap() {
        let null = Arc::new(null::Device::new());
        let (_offline, handles) = sources(&null, 6);
        let mut multi = OnlineDescriptorMultiAllocator::new(null.clone(), DescriptorHeapType::CbvSrvUav, 8).unwrap();

        let (_, first_heap) = multi.allocate_many(&[&handles[..]]).unwrap();
        assert!(multi.allocate_many(&[&handles[..]]).is_none());

        multi.rollover(1).unwrap();
        let (bases, second_heap) = multi.allocate_many(&[&handles[..]]).unwrap();
        assert!(!Arc::ptr_eq(&first_heap, &second_heap));
        assert_eq!(bases[0], second_heap.gpu_start());
        assert_eq!(multi.heap_count(), 2);

        // the first heap comes back once its frame has completed
        multi.clean_up(1);
        multi.rollover(2).unwrap();
        assert!(Arc::ptr_eq(multi.heap(), &first_heap));
        assert_eq!(multi.current().used(), 0);
        assert_eq!(multi.heap_count(), 2);
    }

    #[test]
    fn samplers_use_their_own_heap_type() {
        let null = Arc::new(null::Device::new());
        let offline = null
            .create_descriptor_heap(DescriptorHeapType::Sampler, 1, false, "offline")
            .unwrap();
        null.create_sampler(
            &SamplerDesc {
                filter: hal::Filter::Bilinear,
                address: hal::AddressMode::Wrap,
                mip_lod_bias: 0.0,
                max_anisotropy: 1,
                comparison: None,
            },
            offline.cpu_start(),
        );

        let mut online = OnlineDescriptorAllocator::new(null.clone(), DescriptorHeapType::Sampler, 4, "samplers").unwrap();
        let base = online.allocate(&[offline.cpu_start()]).unwrap();
        assert!(matches!(null.descriptor(base.0), Some(null::Descriptor::Sampler(_))));
    }
}
