//! Command recording and submission.

mod cache;
mod context;
mod queue;

pub use cache::{
    DescriptorTableCache, ParameterCache, RootBufferCache, StageCache, ROOT_BUFFER_CAPACITY,
    SAMPLER_TABLE_CAPACITY, SRV_UAV_TABLE_CAPACITY,
};
pub use context::{CommandContext, LIGHT_MODE_TAG};
pub use queue::CommandQueue;

pub(crate) use context::RecycledContext;
