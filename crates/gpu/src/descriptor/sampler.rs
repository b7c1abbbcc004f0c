use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use super::{OfflineDescriptor, OfflineDescriptorAllocator};
use crate::{
    hal::{self, AddressMode, CompareFunc, Filter, SamplerDesc},
    Result,
};

/// A sampler description with its float fields compared by bits, so that it
/// can key a map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct SamplerKey {
    filter: Filter,
    address: AddressMode,
    mip_lod_bias: u32,
    max_anisotropy: u32,
    comparison: Option<CompareFunc>,
}

impl From<&SamplerDesc> for SamplerKey {
    fn from(desc: &SamplerDesc) -> Self {
        Self {
            filter: desc.filter,
            address: desc.address,
            mip_lod_bias: desc.mip_lod_bias.to_bits(),
            max_anisotropy: desc.max_anisotropy,
            comparison: desc.comparison,
        }
    }
}

/// Device-wide sampler descriptors, one per distinct sampler description.
pub struct SamplerCache {
    device: Arc<dyn hal::Device>,
    allocator: Arc<OfflineDescriptorAllocator>,
    samplers: Mutex<HashMap<SamplerKey, Arc<OfflineDescriptor>>>,
}

impl SamplerCache {
    pub fn new(device: Arc<dyn hal::Device>, allocator: Arc<OfflineDescriptorAllocator>) -> Self {
        debug_assert_eq!(allocator.ty(), hal::DescriptorHeapType::Sampler);

        Self {
            device,
            allocator,
            samplers: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.samplers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, desc: &SamplerDesc) -> Result<Arc<OfflineDescriptor>> {
        let mut samplers = self.samplers.lock();

        if let Some(sampler) = samplers.get(&SamplerKey::from(desc)) {
            return Ok(sampler.clone());
        }

        let descriptor = Arc::new(self.allocator.allocate()?);
        self.device.create_sampler(desc, descriptor.cpu());
        samplers.insert(SamplerKey::from(desc), descriptor.clone());
        Ok(descriptor)
    }

    pub fn clear(&self) {
        self.samplers.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{hal::null, sync::Fence};

    #[test]
    fn equal_descs_share_a_descriptor() {
        let null = Arc::new(null::Device::new());
        let device: Arc<dyn hal::Device> = null.clone();
        let clock = Arc::new(Fence::new(device.as_ref(), "frame").unwrap());
        let allocator = Arc::new(OfflineDescriptorAllocator::new(
            device.clone(),
            clock,
            hal::DescriptorHeapType::Sampler,
            16,
        ));
        let cache = SamplerCache::new(device, allocator);

        let mut desc = SamplerDesc {
            filter: Filter::Trilinear,
            address: AddressMode::Clamp,
            mip_lod_bias: 0.0,
            max_anisotropy: 1,
            comparison: None,
        };

        let a = cache.get(&desc).unwrap();
        let b = cache.get(&desc).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        desc.mip_lod_bias = -0.5;
        let c = cache.get(&desc).unwrap();
        assert_ne!(a.cpu(), c.cpu());
        assert_eq!(cache.len(), 2);
        assert_eq!(null.descriptor(c.cpu().0 as u64), Some(null::Descriptor::Sampler(desc)));
    }
}
