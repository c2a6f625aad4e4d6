use std::any::Any;

use crate::change_set::ChangeSet;
use crate::error::{GpuError, PassError};
use crate::gpu::GraphicsContext;
use crate::resources::FramebufferKey;
use crate::types::{AttachmentSlot, FilterMode, FramebufferTarget};

use super::{FrameContext, RenderPass};

crate::tracked_fields! {
    pub enum BlitField {
        ReadTarget,
        ReadBuffer,
        DrawTarget,
        DrawBuffer,
    }
}

/// Copies one attachment of a framebuffer into one buffer of another,
/// scaling nearest-neighbour between their sizes.
pub struct BlitPass {
    name: String,
    changes: ChangeSet<BlitField>,
    read_target: Option<FramebufferKey>,
    read_buffer: AttachmentSlot,
    draw_target: Option<FramebufferKey>,
    draw_buffer: AttachmentSlot,
}

impl BlitPass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            changes: ChangeSet::new(),
            read_target: None,
            read_buffer: AttachmentSlot::Color(0),
            draw_target: None,
            draw_buffer: AttachmentSlot::Color(0),
        }
    }

    pub fn set_read_target(&mut self, framebuffer: FramebufferKey) {
        self.read_target = Some(framebuffer);
        self.changes.set(BlitField::ReadTarget);
    }

    pub fn set_read_buffer(&mut self, slot: AttachmentSlot) {
        self.read_buffer = slot;
        self.changes.set(BlitField::ReadBuffer);
    }

    pub fn set_draw_target(&mut self, framebuffer: FramebufferKey) {
        self.draw_target = Some(framebuffer);
        self.changes.set(BlitField::DrawTarget);
    }

    pub fn set_draw_buffer(&mut self, slot: AttachmentSlot) {
        self.draw_buffer = slot;
        self.changes.set(BlitField::DrawBuffer);
    }

    pub fn read_target(&self) -> Option<FramebufferKey> {
        self.read_target
    }

    pub fn draw_target(&self) -> Option<FramebufferKey> {
        self.draw_target
    }

    pub fn read_buffer(&self) -> AttachmentSlot {
        self.read_buffer
    }

    pub fn draw_buffer(&self) -> AttachmentSlot {
        self.draw_buffer
    }

    fn targets(&self) -> Result<(FramebufferKey, FramebufferKey), PassError> {
        match (self.read_target, self.draw_target) {
            (Some(read), Some(draw)) => Ok((read, draw)),
            _ => Err(PassError::MissingTarget {
                pass: self.name.clone(),
            }),
        }
    }
}

impl RenderPass for BlitPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self, _gpu: &mut dyn GraphicsContext) -> Result<(), GpuError> {
        self.changes.set_all();
        Ok(())
    }

    fn changes_pending(&self) -> bool {
        self.changes.any()
    }

    fn setup(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), PassError> {
        let (read, draw) = self.targets()?;
        let missing = || PassError::MissingFramebuffer {
            pass: self.name.clone(),
        };
        let read = ctx.resources.framebuffer(read).ok_or_else(missing)?;
        let draw = ctx.resources.framebuffer(draw).ok_or_else(missing)?;

        read.bind(ctx.gpu, FramebufferTarget::Read);
        read.read_buffer(ctx.gpu, self.read_buffer);
        draw.bind(ctx.gpu, FramebufferTarget::Draw);
        draw.draw_buffer(ctx.gpu, self.draw_buffer);

        self.changes.reset();
        Ok(())
    }

    fn draw(&mut self, ctx: &mut FrameContext<'_>) {
        let Ok((read, draw)) = self.targets() else {
            return;
        };
        let (Some(read), Some(draw)) = (
            ctx.resources.framebuffer(read),
            ctx.resources.framebuffer(draw),
        ) else {
            return;
        };
        let (source, destination) = (read.size().full_rect(), draw.size().full_rect());
        ctx.gpu
            .blit_framebuffer(source, destination, FilterMode::Nearest);
    }

    fn tear_down(&mut self, ctx: &mut FrameContext<'_>) {
        ctx.gpu.bind_framebuffer(FramebufferTarget::Read, None);
        ctx.gpu.bind_framebuffer(FramebufferTarget::Draw, None);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
