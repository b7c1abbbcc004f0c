//! Descriptor storage.
//!
//! Views are created once in host-only offline pages. When a draw or
//! dispatch needs them, they are copied into a shader-visible online ring
//! as contiguous tables.

mod offline;
mod online;
mod sampler;

pub use offline::{OfflineDescriptor, OfflineDescriptorAllocator};
pub use online::{OnlineDescriptorAllocator, OnlineDescriptorMultiAllocator, TableBases};
pub use sampler::SamplerCache;

pub(crate) use sampler::SamplerKey;
