//! GPU pipeline: device/adapter setup, framebuffer ping-pong state, the
//! per-stage uniform layouts, and the bundled WGSL programs.

pub mod context;
pub mod framebuffers;
pub mod pipeline;
pub mod shaders;
pub mod uniforms;

pub use context::GpuContext;
pub use pipeline::{GpuPipeline, OptionsPatch};
