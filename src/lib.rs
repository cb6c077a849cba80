#![recursion_limit = "256"]

pub mod config;
pub mod device;
pub mod error;
pub mod hub;
pub mod inference;
pub mod interpolate;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod transform;

pub use error::DepthMapError;

/// Backend used by the CPU path and by the test suite.
pub type InferenceBackend = device::CpuBackend;
