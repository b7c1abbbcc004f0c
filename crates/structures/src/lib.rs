//! Small host-side containers shared by the GPU core.

pub mod flagvec;

pub use flagvec::FlagVec;
