use std::fmt;

/// Pixel dimensions of a render target or the canvas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Smallest allocatable size; textures start here before their first resize.
    pub const fn unit() -> Self {
        Self::new(1, 1)
    }

    /// Width over height, with zero-height sizes treated as square.
    pub fn aspect(self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    /// Scales a logical size by `factor`, flooring and clamping to at least 1×1.
    pub fn scaled(self, factor: f32) -> Self {
        let scale = |value: u32| ((value as f32 * factor).floor() as u32).max(1);
        Self::new(scale(self.width), scale(self.height))
    }

    pub fn texel_count(self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn full_rect(self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }
}

impl Default for Size {
    fn default() -> Self {
        Self::unit()
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Axis-aligned pixel rectangle used for viewports and blits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn size(self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// How the channels of a texel are laid out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelLayout {
    Red,
    Rgba,
    Depth,
    DepthStencil,
}

/// Scalar type of each channel as supplied on upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarType {
    UnsignedByte,
    HalfFloat,
    Float,
    UnsignedInt24_8,
}

/// Storage format the GPU allocates for the texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InternalFormat {
    R8,
    R32F,
    Rgba8,
    Rgba16F,
    Rgba32F,
    Depth32F,
    Depth24Stencil8,
}

/// Pixel format descriptor: channel layout, upload scalar type and storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureFormat {
    pub layout: ChannelLayout,
    pub scalar: ScalarType,
    pub internal: InternalFormat,
}

impl TextureFormat {
    pub const R: Self = Self::new(ChannelLayout::Red, ScalarType::UnsignedByte, InternalFormat::R8);
    pub const RGBA: Self = Self::new(
        ChannelLayout::Rgba,
        ScalarType::UnsignedByte,
        InternalFormat::Rgba8,
    );
    pub const RGBA16F: Self = Self::new(
        ChannelLayout::Rgba,
        ScalarType::HalfFloat,
        InternalFormat::Rgba16F,
    );
    pub const RGBA32F: Self =
        Self::new(ChannelLayout::Rgba, ScalarType::Float, InternalFormat::Rgba32F);
    pub const R32F: Self = Self::new(ChannelLayout::Red, ScalarType::Float, InternalFormat::R32F);
    pub const DEPTH: Self =
        Self::new(ChannelLayout::Depth, ScalarType::Float, InternalFormat::Depth32F);
    pub const DEPTH_STENCIL: Self = Self::new(
        ChannelLayout::DepthStencil,
        ScalarType::UnsignedInt24_8,
        InternalFormat::Depth24Stencil8,
    );

    pub const fn new(layout: ChannelLayout, scalar: ScalarType, internal: InternalFormat) -> Self {
        Self {
            layout,
            scalar,
            internal,
        }
    }

    pub fn channels(self) -> usize {
        match self.layout {
            ChannelLayout::Red | ChannelLayout::Depth => 1,
            ChannelLayout::DepthStencil => 2,
            ChannelLayout::Rgba => 4,
        }
    }

    /// Bytes one texel occupies in upload data.
    pub fn bytes_per_texel(self) -> usize {
        match self.internal {
            InternalFormat::R8 => 1,
            InternalFormat::R32F | InternalFormat::Rgba8 => 4,
            InternalFormat::Depth32F | InternalFormat::Depth24Stencil8 => 4,
            InternalFormat::Rgba16F => 8,
            InternalFormat::Rgba32F => 16,
        }
    }

    pub fn is_color(self) -> bool {
        matches!(self.layout, ChannelLayout::Red | ChannelLayout::Rgba)
    }

    /// Clear operation a fresh attachment of this format gets: transparent
    /// black for colour, far plane for depth.
    pub fn default_clear(self) -> ClearOp {
        match self.layout {
            ChannelLayout::Red | ChannelLayout::Rgba => ClearOp::Color([0.0; 4]),
            ChannelLayout::Depth => ClearOp::Depth(1.0),
            ChannelLayout::DepthStencil => ClearOp::DepthStencil {
                depth: 1.0,
                stencil: 0,
            },
        }
    }
}

/// Texture sampling filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
}

/// Which of the two filters a filter change applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterTarget {
    Min,
    Mag,
}

/// Whether a texture owns one image or a ping-pong pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum BufferMode {
    #[default]
    Single,
    Double,
}

impl BufferMode {
    pub fn image_count(self) -> usize {
        match self {
            BufferMode::Single => 1,
            BufferMode::Double => 2,
        }
    }
}

/// Framebuffer attachment point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttachmentSlot {
    Color(u32),
    Depth,
    DepthStencil,
}

impl AttachmentSlot {
    /// Attachment slot a texture of `format` naturally binds to.
    pub fn for_format(format: TextureFormat, color_index: u32) -> Self {
        match format.layout {
            ChannelLayout::Red | ChannelLayout::Rgba => AttachmentSlot::Color(color_index),
            ChannelLayout::Depth => AttachmentSlot::Depth,
            ChannelLayout::DepthStencil => AttachmentSlot::DepthStencil,
        }
    }

    pub fn color_index(self) -> Option<u32> {
        match self {
            AttachmentSlot::Color(index) => Some(index),
            _ => None,
        }
    }
}

impl fmt::Display for AttachmentSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachmentSlot::Color(index) => write!(f, "color{index}"),
            AttachmentSlot::Depth => f.write_str("depth"),
            AttachmentSlot::DepthStencil => f.write_str("depth-stencil"),
        }
    }
}

/// Framebuffer binding point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum FramebufferTarget {
    #[default]
    Draw,
    Read,
}

/// How an attachment is reset by [`crate::Framebuffer::clear`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearOp {
    Color([f32; 4]),
    Depth(f32),
    DepthStencil { depth: f32, stencil: u32 },
    /// Leave the attachment untouched.
    Keep,
}

/// Fixed-function blending applied to draws.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// `src * src_alpha + dst * (1 - src_alpha)` on every channel.
    Alpha,
    /// `src + dst`.
    Additive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Primitive {
    #[default]
    Triangles,
    TriangleStrip,
    Lines,
    Points,
}

/// Per-vertex attribute data type, always 32-bit floats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float,
    Vec2,
    Vec3,
    Vec4,
}

impl VertexFormat {
    pub fn components(self) -> u32 {
        match self {
            Self::Float => 1,
            Self::Vec2 => 2,
            Self::Vec3 => 3,
            Self::Vec4 => 4,
        }
    }

    pub fn byte_size(self) -> u32 {
        self.components() * 4
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_size_floors_and_clamps() {
        assert_eq!(Size::new(801, 601).scaled(0.5), Size::new(400, 300));
        assert_eq!(Size::new(1, 1).scaled(0.25), Size::new(1, 1));
        assert_eq!(Size::new(400, 300).scaled(2.0), Size::new(800, 600));
    }

    #[test]
    fn default_clear_follows_channel_layout() {
        assert_eq!(TextureFormat::RGBA16F.default_clear(), ClearOp::Color([0.0; 4]));
        assert_eq!(TextureFormat::R32F.default_clear(), ClearOp::Color([0.0; 4]));
        assert_eq!(TextureFormat::DEPTH.default_clear(), ClearOp::Depth(1.0));
        assert!(matches!(
            TextureFormat::DEPTH_STENCIL.default_clear(),
            ClearOp::DepthStencil { depth, .. } if depth == 1.0
        ));
    }

    #[test]
    fn attachment_slot_follows_format() {
        assert_eq!(
            AttachmentSlot::for_format(TextureFormat::RGBA, 2),
            AttachmentSlot::Color(2)
        );
        assert_eq!(
            AttachmentSlot::for_format(TextureFormat::DEPTH, 2),
            AttachmentSlot::Depth
        );
    }
}
