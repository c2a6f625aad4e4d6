use crate::framebuffer::Framebuffer;
use crate::gpu::{GraphicsContext, TextureId};
use crate::texture::Texture2D;

/// Stable reference to a framebuffer owned by a renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferKey(pub(crate) usize);

/// One attachment of one framebuffer, e.g. the colour texture a later pass
/// samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AttachmentRef {
    pub framebuffer: FramebufferKey,
    /// Attachment index in creation order.
    pub attachment: usize,
}

impl AttachmentRef {
    pub fn new(framebuffer: FramebufferKey, attachment: usize) -> Self {
        Self {
            framebuffer,
            attachment,
        }
    }

    /// First attachment of `framebuffer`.
    pub fn first(framebuffer: FramebufferKey) -> Self {
        Self::new(framebuffer, 0)
    }
}

/// Framebuffers shared by the passes of a renderer, in registration order.
#[derive(Debug, Default)]
pub struct Resources {
    framebuffers: Vec<Framebuffer>,
}

impl Resources {
    pub(crate) fn insert(&mut self, framebuffer: Framebuffer) -> FramebufferKey {
        self.framebuffers.push(framebuffer);
        FramebufferKey(self.framebuffers.len() - 1)
    }

    pub fn framebuffer(&self, key: FramebufferKey) -> Option<&Framebuffer> {
        self.framebuffers.get(key.0)
    }

    pub fn framebuffer_mut(&mut self, key: FramebufferKey) -> Option<&mut Framebuffer> {
        self.framebuffers.get_mut(key.0)
    }

    pub fn texture(&self, attachment: AttachmentRef) -> Option<&Texture2D> {
        self.framebuffer(attachment.framebuffer)?
            .texture(attachment.attachment)
    }

    /// Image currently exposed for reading by `attachment`.
    pub fn read_handle(&self, attachment: AttachmentRef) -> Option<TextureId> {
        self.texture(attachment).map(Texture2D::read_handle)
    }

    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FramebufferKey, &Framebuffer)> {
        self.framebuffers
            .iter()
            .enumerate()
            .map(|(index, framebuffer)| (FramebufferKey(index), framebuffer))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Framebuffer> {
        self.framebuffers.iter_mut()
    }

    /// Releases every framebuffer, last registered first.
    pub(crate) fn release(self, gpu: &mut dyn GraphicsContext) {
        for framebuffer in self.framebuffers.into_iter().rev() {
            framebuffer.release(gpu);
        }
    }
}
