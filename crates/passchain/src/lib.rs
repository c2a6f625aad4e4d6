//! Render-pass orchestration for multi-pass GPU pipelines.
//!
//! A [`Renderer`] owns the framebuffers and an ordered list of passes. The
//! host polls it once per display refresh and only draws when something is
//! actually stale:
//!
//! ```text
//!   host loop
//!      │ prepare(time)
//!      ▼
//!   Renderer ──▶ size / camera changes ──▶ Sizeable / CameraAware passes
//!      │               │
//!      │               └─▶ needs_redraw()? ──▶ draw(time)
//!      ▼                                          │
//!   PassEntry: pre_draw ─▶ setup ─▶ draw ─▶ tear_down ─▶ post_draw
//! ```
//!
//! Every stateful component tracks its own dirty fields with a
//! [`ChangeSet`]; `setup` consumes them so unchanged state is never
//! re-uploaded. [`TaaRenderer`] layers temporal accumulation on top: it
//! jitters passes along a Halton sequence and keeps a running mean until the
//! frame budget is spent.
//!
//! The GPU is reached only through [`gpu::GraphicsContext`]. Tests and tools
//! use the in-memory [`gpu::HeadlessContext`]; [`gpu::WgpuContext`] renders
//! with wgpu.

pub mod camera;
pub mod change_set;
pub mod error;
pub mod framebuffer;
pub mod gpu;
pub mod halton;
pub mod pass;
pub mod renderer;
pub mod resources;
pub mod shader;
pub mod taa;
pub mod texture;
pub mod types;

pub use camera::{Camera, CameraMatrices};
pub use change_set::{ChangeSet, TrackedField};
pub use error::{GpuError, PassError};
pub use framebuffer::{Attachment, AttachmentSpec, Framebuffer};
pub use gpu::{GraphicsContext, HeadlessContext, WgpuContext};
pub use pass::{
    BlitPass, FrameContext, FullscreenPass, MeshPass, PassEntry, PassId, RedrawPolicy,
    RenderPass,
};
pub use renderer::{Renderer, RendererField};
pub use resources::{AttachmentRef, FramebufferKey, Resources};
pub use shader::{Program, UniformBlock, UniformValue};
pub use taa::{TaaField, TaaRenderer, TaaSettings, TaaTarget};
pub use texture::Texture2D;
pub use types::{
    AttachmentSlot, BlendMode, BufferMode, ClearOp, FilterMode, Rect, Size, TextureFormat,
    VertexFormat,
};
