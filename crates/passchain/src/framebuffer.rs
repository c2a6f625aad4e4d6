use crate::error::GpuError;
use crate::gpu::{FramebufferId, GraphicsContext};
use crate::texture::Texture2D;
use crate::types::{AttachmentSlot, BufferMode, ClearOp, FramebufferTarget, Size, TextureFormat};

/// Description of one attachment handed to [`Framebuffer::new`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AttachmentSpec {
    pub format: TextureFormat,
    pub mode: BufferMode,
    /// Falls back to [`TextureFormat::default_clear`].
    pub clear: Option<ClearOp>,
}

impl AttachmentSpec {
    pub fn new(format: TextureFormat, mode: BufferMode) -> Self {
        Self {
            format,
            mode,
            clear: None,
        }
    }

    pub fn single(format: TextureFormat) -> Self {
        Self::new(format, BufferMode::Single)
    }

    pub fn double(format: TextureFormat) -> Self {
        Self::new(format, BufferMode::Double)
    }

    pub fn with_clear(mut self, clear: ClearOp) -> Self {
        self.clear = Some(clear);
        self
    }
}

/// A texture bound to a framebuffer slot.
#[derive(Debug)]
pub struct Attachment {
    slot: AttachmentSlot,
    texture: Texture2D,
    clear: ClearOp,
}

impl Attachment {
    pub fn slot(&self) -> AttachmentSlot {
        self.slot
    }

    pub fn texture(&self) -> &Texture2D {
        &self.texture
    }

    pub fn clear_op(&self) -> ClearOp {
        self.clear
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Offscreen(FramebufferId),
    Canvas,
}

/// A named render target.
///
/// Offscreen framebuffers own their attachment textures and keep the GPU
/// attachment of every double-buffered texture pointed at its current write
/// image. The canvas variant owns nothing: clearing clears the canvas,
/// swapping does nothing and resizing resizes the canvas itself.
#[derive(Debug)]
pub struct Framebuffer {
    name: String,
    kind: Kind,
    attachments: Vec<Attachment>,
    size: Size,
}

impl Framebuffer {
    /// Creates the framebuffer object and one texture per spec.
    ///
    /// Colour attachments are numbered in the order they appear; depth
    /// formats take the depth or depth-stencil slot. All colour attachments
    /// start out as draw buffers.
    pub fn new(
        gpu: &mut dyn GraphicsContext,
        name: impl Into<String>,
        specs: &[AttachmentSpec],
    ) -> Result<Self, GpuError> {
        let name = name.into();
        let handle = gpu.create_framebuffer()?;

        let mut attachments: Vec<Attachment> = Vec::with_capacity(specs.len());
        let mut color_index = 0;
        for spec in specs {
            let texture = match Texture2D::new(gpu, spec.format, spec.mode) {
                Ok(texture) => texture,
                Err(err) => {
                    for attachment in attachments {
                        attachment.texture.release(gpu);
                    }
                    gpu.delete_framebuffer(handle);
                    return Err(err);
                }
            };
            let slot = AttachmentSlot::for_format(spec.format, color_index);
            if slot.color_index().is_some() {
                color_index += 1;
            }
            attachments.push(Attachment {
                slot,
                texture,
                clear: spec.clear.unwrap_or_else(|| spec.format.default_clear()),
            });
        }

        let framebuffer = Self {
            name,
            kind: Kind::Offscreen(handle),
            attachments,
            size: Size::unit(),
        };
        framebuffer.bind(gpu, FramebufferTarget::Draw);
        for attachment in &framebuffer.attachments {
            gpu.attach_texture(attachment.slot, attachment.texture.write_handle());
        }
        gpu.set_draw_buffers(framebuffer.color_mask());
        framebuffer.unbind(gpu, FramebufferTarget::Draw);

        tracing::debug!(
            framebuffer = %framebuffer.name,
            attachments = framebuffer.attachments.len(),
            "framebuffer created"
        );
        Ok(framebuffer)
    }

    /// Proxy for the canvas (default framebuffer).
    pub fn canvas(gpu: &dyn GraphicsContext) -> Self {
        Self {
            name: "Canvas".to_owned(),
            kind: Kind::Canvas,
            attachments: Vec::new(),
            size: gpu.canvas_size(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_canvas(&self) -> bool {
        self.kind == Kind::Canvas
    }

    /// `None` for the canvas.
    pub fn handle(&self) -> Option<FramebufferId> {
        match self.kind {
            Kind::Offscreen(handle) => Some(handle),
            Kind::Canvas => None,
        }
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Texture of attachment `index`, in creation order.
    pub fn texture(&self, index: usize) -> Option<&Texture2D> {
        self.attachments.get(index).map(|attachment| &attachment.texture)
    }

    /// Mutable access for filter changes. Swapping through this reference
    /// bypasses re-attachment; use [`Framebuffer::swap`] instead.
    pub fn texture_mut(&mut self, index: usize) -> Option<&mut Texture2D> {
        self.attachments
            .get_mut(index)
            .map(|attachment| &mut attachment.texture)
    }

    pub fn is_double_buffered(&self) -> bool {
        self.attachments
            .iter()
            .any(|attachment| attachment.texture.is_double_buffered())
    }

    fn color_mask(&self) -> u32 {
        self.attachments
            .iter()
            .filter_map(|attachment| attachment.slot.color_index())
            .fold(0, |mask, index| mask | (1 << index))
    }

    pub fn bind(&self, gpu: &mut dyn GraphicsContext, target: FramebufferTarget) {
        gpu.bind_framebuffer(target, self.handle());
    }

    pub fn unbind(&self, gpu: &mut dyn GraphicsContext, target: FramebufferTarget) {
        gpu.bind_framebuffer(target, None);
    }

    /// Runs every attachment's clear operation.
    ///
    /// `bind`/`unbind` let the call compose inside an already bound block.
    pub fn clear(&self, gpu: &mut dyn GraphicsContext, bind: bool, unbind: bool) {
        if bind {
            self.bind(gpu, FramebufferTarget::Draw);
        }
        if self.is_canvas() {
            gpu.clear_canvas();
        }
        for attachment in &self.attachments {
            match attachment.clear {
                ClearOp::Color(value) => {
                    if let Some(index) = attachment.slot.color_index() {
                        gpu.clear_color(index, value);
                    }
                }
                ClearOp::Depth(depth) => gpu.clear_depth_stencil(depth, None),
                ClearOp::DepthStencil { depth, stencil } => {
                    gpu.clear_depth_stencil(depth, Some(stencil))
                }
                ClearOp::Keep => {}
            }
        }
        if unbind {
            self.unbind(gpu, FramebufferTarget::Draw);
        }
    }

    /// Swaps every double-buffered attachment and re-attaches its new write
    /// image. Single-buffered attachments are left alone.
    pub fn swap(&mut self, gpu: &mut dyn GraphicsContext, bind: bool, unbind: bool) {
        if self.is_canvas() {
            return;
        }
        if bind {
            self.bind(gpu, FramebufferTarget::Draw);
        }
        for attachment in &mut self.attachments {
            if attachment.texture.is_double_buffered() {
                attachment.texture.swap();
                gpu.attach_texture(attachment.slot, attachment.texture.write_handle());
            }
        }
        if unbind {
            self.unbind(gpu, FramebufferTarget::Draw);
        }
    }

    /// Resizes every attachment, or the canvas itself.
    pub fn set_size(&mut self, gpu: &mut dyn GraphicsContext, size: Size) {
        self.size = size;
        if self.is_canvas() {
            gpu.resize_canvas(size);
            return;
        }
        for attachment in &mut self.attachments {
            attachment.texture.set_size(gpu, size);
        }
        tracing::debug!(framebuffer = %self.name, %size, "framebuffer resized");
    }

    /// Routes fragment output to a single colour attachment of the bound
    /// framebuffer.
    pub fn draw_buffer(&self, gpu: &mut dyn GraphicsContext, slot: AttachmentSlot) {
        match slot.color_index() {
            Some(index) => self.draw_buffers(gpu, 1 << index),
            None => self.draw_buffers(gpu, 0),
        }
    }

    /// Selects the colour attachments written by draws while this
    /// framebuffer is bound, bit `i` = colour attachment `i`.
    pub fn draw_buffers(&self, gpu: &mut dyn GraphicsContext, mask: u32) {
        if !self.is_canvas() {
            gpu.set_draw_buffers(mask);
        }
    }

    /// Selects the attachment read by blits while this framebuffer is bound
    /// for reading.
    pub fn read_buffer(&self, gpu: &mut dyn GraphicsContext, slot: AttachmentSlot) {
        if !self.is_canvas() {
            gpu.set_read_buffer(slot);
        }
    }

    /// Deletes the attachment textures, then the framebuffer object.
    pub fn release(self, gpu: &mut dyn GraphicsContext) {
        for attachment in self.attachments {
            attachment.texture.release(gpu);
        }
        if let Kind::Offscreen(handle) = self.kind {
            gpu.delete_framebuffer(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{HeadlessCommand, HeadlessContext};

    fn headless() -> HeadlessContext {
        HeadlessContext::new(Size::new(4, 4))
    }

    #[test]
    fn attaches_write_handles_and_default_clears() {
        let mut gpu = headless();
        let framebuffer = Framebuffer::new(
            &mut gpu,
            "gbuffer",
            &[
                AttachmentSpec::double(TextureFormat::RGBA),
                AttachmentSpec::single(TextureFormat::R32F),
                AttachmentSpec::single(TextureFormat::DEPTH),
            ],
        )
        .expect("framebuffer");
        let handle = framebuffer.handle().expect("offscreen");

        let slots: Vec<_> = framebuffer.attachments().iter().map(Attachment::slot).collect();
        assert_eq!(
            slots,
            vec![
                AttachmentSlot::Color(0),
                AttachmentSlot::Color(1),
                AttachmentSlot::Depth
            ]
        );
        for attachment in framebuffer.attachments() {
            assert_eq!(
                gpu.attachment(handle, attachment.slot()),
                Some(attachment.texture().write_handle())
            );
        }
        assert_eq!(framebuffer.attachments()[0].clear_op(), ClearOp::Color([0.0; 4]));
        assert_eq!(framebuffer.attachments()[2].clear_op(), ClearOp::Depth(1.0));
        assert_eq!(gpu.draw_buffer_mask(handle), Some(0b11));
        assert_eq!(gpu.bound_framebuffer(FramebufferTarget::Draw), None);
    }

    #[test]
    fn swap_reattaches_only_double_buffered_attachments() {
        let mut gpu = headless();
        let mut framebuffer = Framebuffer::new(
            &mut gpu,
            "pingpong",
            &[
                AttachmentSpec::double(TextureFormat::RGBA),
                AttachmentSpec::single(TextureFormat::RGBA),
            ],
        )
        .expect("framebuffer");
        let handle = framebuffer.handle().expect("offscreen");
        let read_before = framebuffer.texture(0).expect("texture").read_handle();
        let single = framebuffer.texture(1).expect("texture").write_handle();

        framebuffer.swap(&mut gpu, true, true);

        let pingpong = framebuffer.texture(0).expect("texture");
        assert_eq!(pingpong.write_handle(), read_before);
        assert_eq!(gpu.attachment(handle, AttachmentSlot::Color(0)), Some(read_before));
        assert_eq!(gpu.attachment(handle, AttachmentSlot::Color(1)), Some(single));
    }

    #[test]
    fn clear_writes_configured_values() {
        let mut gpu = headless();
        let mut framebuffer = Framebuffer::new(
            &mut gpu,
            "colored",
            &[AttachmentSpec::single(TextureFormat::RGBA32F).with_clear(ClearOp::Color([0.5, 0.25, 0.0, 1.0]))],
        )
        .expect("framebuffer");
        framebuffer.set_size(&mut gpu, Size::new(2, 2));
        framebuffer.clear(&mut gpu, true, true);

        let texture = framebuffer.texture(0).expect("texture").write_handle();
        assert_eq!(gpu.texel(texture, 1, 1), Some([0.5, 0.25, 0.0, 1.0]));
        assert!(gpu
            .commands()
            .iter()
            .any(|command| matches!(command, HeadlessCommand::ClearColor { index: 0, .. })));
    }

    #[test]
    fn set_size_propagates_to_every_texture() {
        let mut gpu = headless();
        let mut framebuffer = Framebuffer::new(
            &mut gpu,
            "sized",
            &[
                AttachmentSpec::double(TextureFormat::RGBA16F),
                AttachmentSpec::single(TextureFormat::DEPTH),
            ],
        )
        .expect("framebuffer");
        framebuffer.set_size(&mut gpu, Size::new(400, 300));

        assert_eq!(framebuffer.size(), Size::new(400, 300));
        for attachment in framebuffer.attachments() {
            for &image in attachment.texture().image_ids() {
                assert_eq!(gpu.texture_size(image), Some(Size::new(400, 300)));
            }
        }
    }

    #[test]
    fn canvas_forwards_size_and_ignores_swap() {
        let mut gpu = headless();
        let mut canvas = Framebuffer::canvas(&gpu);
        assert!(canvas.is_canvas());
        assert_eq!(canvas.size(), Size::new(4, 4));

        canvas.set_size(&mut gpu, Size::new(8, 2));
        assert_eq!(gpu.canvas_size(), Size::new(8, 2));

        canvas.swap(&mut gpu, true, true);
        canvas.clear(&mut gpu, true, true);
        assert_eq!(gpu.commands(), &[HeadlessCommand::ClearCanvas]);
    }

    #[test]
    fn release_is_leaves_first_and_complete() {
        let mut gpu = headless();
        let framebuffer = Framebuffer::new(
            &mut gpu,
            "released",
            &[AttachmentSpec::double(TextureFormat::RGBA)],
        )
        .expect("framebuffer");
        assert_eq!(gpu.live_textures(), 2);
        framebuffer.release(&mut gpu);
        assert_eq!(gpu.live_textures(), 0);
        assert_eq!(gpu.live_framebuffers(), 0);
    }
}
