//! Render passes and the per-frame hook protocol.
//!
//! A pass runs as `pre_draw → setup → draw → tear_down → post_draw`. `setup`
//! is the only step that consumes dirty flags. When it fails the pass is
//! skipped for this frame, but its `post_draw` hook still runs so hooks that
//! keep several passes in lock-step (framebuffer swaps) never drift apart.
//!
//! Optional behaviour is expressed as capability traits ([`Sizeable`],
//! [`CameraAware`], [`Jitterable`], [`Accumulating`]) that a pass exposes
//! through the matching `as_*` query.

mod blit;
mod fullscreen;
mod mesh;

pub use blit::{BlitField, BlitPass};
pub use fullscreen::{FullscreenField, FullscreenPass, TextureSource};
pub use mesh::{MeshField, MeshPass};

use std::any::Any;

use glam::Vec2;

use crate::camera::CameraMatrices;
use crate::error::{GpuError, PassError};
use crate::gpu::GraphicsContext;
use crate::resources::{FramebufferKey, Resources};
use crate::types::{BlendMode, Size};

/// Whether a pass asks for frames on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RedrawPolicy {
    /// Every frame.
    RequestsRedraw,
    /// Never; the pass only runs when something else triggers a frame.
    NeverRequestsRedraw,
    /// Whenever one of its tracked fields is dirty.
    #[default]
    DelegatesToFields,
}

/// What a pass and its hooks may touch while a frame is drawn.
pub struct FrameContext<'a> {
    pub gpu: &'a mut dyn GraphicsContext,
    pub resources: &'a mut Resources,
}

impl FrameContext<'_> {
    /// Swaps the double-buffered attachments of `framebuffer`.
    pub fn swap_framebuffer(&mut self, framebuffer: FramebufferKey) {
        if let Some(framebuffer) = self.resources.framebuffer_mut(framebuffer) {
            framebuffer.swap(self.gpu, true, true);
        }
    }

    pub fn clear_framebuffer(&mut self, framebuffer: FramebufferKey) {
        if let Some(framebuffer) = self.resources.framebuffer(framebuffer) {
            framebuffer.clear(self.gpu, true, true);
        }
    }

    pub fn set_blend(&mut self, blend: Option<BlendMode>) {
        self.gpu.set_blend(blend);
    }
}

/// Receives the canvas size whenever it changes.
pub trait Sizeable {
    fn size_changed(&mut self, size: Size);
}

/// Receives the camera matrices whenever the camera moves.
pub trait CameraAware {
    fn camera_changed(&mut self, matrices: &CameraMatrices);
}

/// Accepts a sub-pixel NDC offset before each accumulation sample.
pub trait Jitterable {
    fn set_ndc_offset(&mut self, offset: Vec2);
}

/// Blends its input into a running mean indexed by frame.
pub trait Accumulating {
    fn set_frame(&mut self, frame: u32);
}

/// A unit of GPU work with its own dirty tracking.
pub trait RenderPass: Any {
    fn name(&self) -> &str;

    /// One-time GPU allocation. Marks every tracked field dirty so the first
    /// frame runs a full setup. Only fatal failures are returned.
    fn initialize(&mut self, gpu: &mut dyn GraphicsContext) -> Result<(), GpuError>;

    /// True while any tracked field is dirty.
    fn changes_pending(&self) -> bool;

    fn redraw_policy(&self) -> RedrawPolicy {
        RedrawPolicy::DelegatesToFields
    }

    /// Whether this pass alone wants a new frame.
    fn needs_redraw(&self) -> bool {
        match self.redraw_policy() {
            RedrawPolicy::RequestsRedraw => true,
            RedrawPolicy::NeverRequestsRedraw => false,
            RedrawPolicy::DelegatesToFields => self.changes_pending(),
        }
    }

    /// Consumes the dirty fields it handles and binds targets, program and
    /// inputs. Must leave binding state untouched when it fails.
    fn setup(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), PassError>;

    fn draw(&mut self, ctx: &mut FrameContext<'_>);

    /// Restores whatever `setup` bound.
    fn tear_down(&mut self, ctx: &mut FrameContext<'_>);

    fn release(&mut self, _gpu: &mut dyn GraphicsContext) {}

    fn as_sizeable(&mut self) -> Option<&mut dyn Sizeable> {
        None
    }

    fn as_camera_aware(&mut self) -> Option<&mut dyn CameraAware> {
        None
    }

    fn as_jitterable(&mut self) -> Option<&mut dyn Jitterable> {
        None
    }

    fn as_accumulating(&mut self) -> Option<&mut dyn Accumulating> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Callback run around a pass.
pub type Hook = Box<dyn FnMut(&mut FrameContext<'_>)>;

/// Position of a pass in its renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub(crate) usize);

/// A registered pass plus its hooks.
pub struct PassEntry {
    id: PassId,
    pass: Box<dyn RenderPass>,
    pre_draw: Option<Hook>,
    post_draw: Option<Hook>,
}

impl PassEntry {
    pub(crate) fn new(id: PassId, pass: Box<dyn RenderPass>) -> Self {
        Self {
            id,
            pass,
            pre_draw: None,
            post_draw: None,
        }
    }

    pub fn id(&self) -> PassId {
        self.id
    }

    pub fn set_pre_draw(&mut self, hook: impl FnMut(&mut FrameContext<'_>) + 'static) -> &mut Self {
        self.pre_draw = Some(Box::new(hook));
        self
    }

    pub fn set_post_draw(&mut self, hook: impl FnMut(&mut FrameContext<'_>) + 'static) -> &mut Self {
        self.post_draw = Some(Box::new(hook));
        self
    }

    pub fn pass(&self) -> &dyn RenderPass {
        self.pass.as_ref()
    }

    pub fn pass_mut(&mut self) -> &mut dyn RenderPass {
        self.pass.as_mut()
    }

    pub fn downcast_ref<P: RenderPass>(&self) -> Option<&P> {
        self.pass.as_any().downcast_ref()
    }

    pub fn downcast_mut<P: RenderPass>(&mut self) -> Option<&mut P> {
        self.pass.as_any_mut().downcast_mut()
    }

    /// Runs one frame of the pass with its hooks.
    pub(crate) fn run(&mut self, ctx: &mut FrameContext<'_>) {
        if let Some(hook) = self.pre_draw.as_mut() {
            hook(ctx);
        }
        match self.pass.setup(ctx) {
            Ok(()) => {
                self.pass.draw(ctx);
                self.pass.tear_down(ctx);
            }
            Err(err) => {
                tracing::warn!(pass = %self.pass.name(), error = %err, "pass setup failed, skipping draw");
            }
        }
        if let Some(hook) = self.post_draw.as_mut() {
            hook(ctx);
        }
    }

    pub(crate) fn release(mut self, gpu: &mut dyn GraphicsContext) {
        self.pass.release(gpu);
    }
}
