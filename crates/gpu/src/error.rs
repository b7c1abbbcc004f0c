use crate::memory;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the GPU core.
///
/// None of these are recoverable inside the core. Device removal and driver
/// out-of-memory are expected to end with the caller destroying the device.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("out of GPU memory while allocating {requested} bytes")]
    OutOfMemory { requested: u64 },

    #[error("request exceeds the capacity of the allocator")]
    InsufficientCapacity,

    #[error("device removed: {0}")]
    DeviceRemoved(String),

    #[error("a device has already been initialized")]
    DeviceAlreadyInitialized,

    #[error("no device has been initialized")]
    NoDevice,

    #[error("the requested backend is not available on this platform")]
    BackendUnavailable,

    #[error("{call} failed: {message}")]
    Backend { call: &'static str, message: String },

    #[error("failed to create pipeline state: {0}")]
    PipelineCreation(String),

    #[error("failed to find {kind} parameter '{name}'")]
    MissingBinding { kind: &'static str, name: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<memory::Error> for Error {
    fn from(error: memory::Error) -> Self {
        match error {
            memory::Error::OutOfMemory { requested, .. } => Self::OutOfMemory { requested },
            memory::Error::InsufficientCapacity => Self::InsufficientCapacity,
        }
    }
}

impl Error {
    /// Returns true if the error means the device can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceRemoved(_) | Self::OutOfMemory { .. })
    }
}
