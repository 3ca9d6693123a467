//! # GPU Module
//!
//! Headless wgpu device acquisition and the offscreen keying pipelines.

pub mod device;
pub mod pipeline;
pub mod shaders;

pub use device::GpuDevice;
pub use pipeline::{GpuPipelineContext, KeyUniforms};
