use thiserror::Error;

use crate::types::ShaderStage;

/// Failures reported by a [`crate::gpu::GraphicsContext`].
///
/// `Allocation` and `Backend` are fatal to the component that hit them.
/// Compile and link errors leave the owning program unusable until it is
/// recompiled; the rest of the frame continues.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("failed to allocate GPU {resource}")]
    Allocation { resource: &'static str },
    #[error("{stage} shader failed to compile:\n{log}")]
    Compile { stage: ShaderStage, log: String },
    #[error("program failed to link:\n{log}")]
    Link { log: String },
    #[error("uniform block `{name}` is not declared by the program")]
    MissingUniformBlock { name: String },
    #[error("program `{program}` is not linked")]
    NotLinked { program: String },
    #[error("GPU backend error: {0}")]
    Backend(String),
    #[error("failed to read back pixels: {0}")]
    Readback(String),
}

/// Reasons a pass cannot run its setup this frame.
#[derive(Debug, Error)]
pub enum PassError {
    #[error("pass `{pass}` has no target framebuffer")]
    MissingTarget { pass: String },
    #[error("pass `{pass}` refers to a framebuffer that no longer exists")]
    MissingFramebuffer { pass: String },
    #[error("pass `{pass}` has no texture for unit {unit}")]
    MissingInput { pass: String, unit: u32 },
    #[error("pass `{pass}` cannot draw: program `{program}` is not linked")]
    ProgramUnavailable { pass: String, program: String },
    #[error("pass `{pass}` lost a GPU resource")]
    Gpu {
        pass: String,
        #[source]
        source: GpuError,
    },
}
