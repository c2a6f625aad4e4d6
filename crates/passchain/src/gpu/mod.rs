//! Graphics-context capability set and its backends.
//!
//! Everything above this module talks to the GPU through [`GraphicsContext`],
//! a GL-shaped, bind-then-operate interface:
//! - `headless` keeps every object in memory. Clears and blits write real
//!   texels, draws are recorded with their full binding snapshot, and shader
//!   sources are genuinely parsed and reflected. Tests run against it.
//! - `context` drives wgpu: an offscreen canvas texture, GL-style bound state
//!   emulated on the host, and per-draw submission.
//! - `pipeline` turns linked programs into cached wgpu render pipelines.
//! - `reflect` parses GLSL with naga and extracts uniform-block layouts and
//!   resource bindings for both backends.
//!
//! Binding conventions shared by every shader: uniform blocks live in
//! descriptor set 0, texture unit `N` is the `texture2D` at set 1 binding
//! `2N` plus the `sampler` at binding `2N + 1`. Vertex attributes are
//! sourced from the bound vertex array, one buffer slot per location.

mod context;
mod handles;
mod headless;
mod pipeline;
mod reflect;

pub use context::WgpuContext;
pub use headless::{DrawCall, HeadlessCommand, HeadlessContext};
pub use reflect::{ArrayInfo, BlockLayout, BlockMember, UniformType};

pub(crate) use handles::HandleTable;

use crate::error::GpuError;
use crate::types::{
    AttachmentSlot, BlendMode, FilterMode, FilterTarget, FramebufferTarget, Primitive, Rect,
    ShaderStage, Size, TextureFormat, VertexFormat,
};

macro_rules! gpu_handle {
    ($($(#[$meta:meta])* $name:ident),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub(crate) u32);

            impl $name {
                pub fn raw(self) -> u32 {
                    self.0
                }
            }
        )+
    };
}

gpu_handle! {
    /// Opaque texture object.
    TextureId,
    /// Opaque framebuffer object. The canvas has no id.
    FramebufferId,
    /// Opaque buffer object holding uniform block or vertex data.
    BufferId,
    /// Compiled shader stage.
    ShaderId,
    /// Linked program.
    ProgramId,
    /// Attribute-to-buffer mapping used by draws.
    VertexArrayId,
}

/// Where one vertex attribute reads its data inside a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    pub format: VertexFormat,
    /// Bytes between consecutive vertices; 0 means tightly packed.
    pub stride: u32,
    /// Byte offset of the first vertex's attribute.
    pub offset: u32,
}

impl VertexLayout {
    pub fn packed(format: VertexFormat) -> Self {
        Self {
            format,
            stride: 0,
            offset: 0,
        }
    }

    pub fn interleaved(format: VertexFormat, stride: u32, offset: u32) -> Self {
        Self {
            format,
            stride,
            offset,
        }
    }

    pub fn effective_stride(&self) -> u32 {
        if self.stride == 0 {
            self.format.byte_size()
        } else {
            self.stride
        }
    }
}

/// An attribute of a vertex array: its source buffer and layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexBinding {
    pub buffer: BufferId,
    pub layout: VertexLayout,
}

/// Attribute bindings by shader location.
pub(crate) type VertexArray = std::collections::BTreeMap<u32, VertexBinding>;

/// GPU capability set used by every component of the render-pass layer.
///
/// The interface is stateful: objects are bound to slots (`bind_framebuffer`,
/// `bind_texture`, `bind_buffer_base`, `bind_vertex_array`, `use_program`)
/// and later operations act on whatever is bound. Passing `None` to a framebuffer bind selects the
/// canvas.
pub trait GraphicsContext {
    fn create_texture(&mut self) -> Result<TextureId, GpuError>;
    /// (Re)allocates storage; previous contents are discarded.
    fn allocate_texture(&mut self, texture: TextureId, format: TextureFormat, size: Size);
    /// Allocates storage sized `size` and fills it from tightly packed `data`.
    fn upload_texture(
        &mut self,
        texture: TextureId,
        format: TextureFormat,
        size: Size,
        data: &[u8],
    );
    fn set_texture_filter(&mut self, texture: TextureId, target: FilterTarget, mode: FilterMode);
    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>);
    fn delete_texture(&mut self, texture: TextureId);

    fn create_framebuffer(&mut self) -> Result<FramebufferId, GpuError>;
    fn bind_framebuffer(&mut self, target: FramebufferTarget, framebuffer: Option<FramebufferId>);
    /// Attaches `texture` to the framebuffer bound for drawing.
    fn attach_texture(&mut self, slot: AttachmentSlot, texture: TextureId);
    /// Selects color attachments written by draws, bit `i` = color attachment `i`.
    fn set_draw_buffers(&mut self, mask: u32);
    fn set_read_buffer(&mut self, slot: AttachmentSlot);
    /// Clears color attachment `index` of the draw framebuffer.
    fn clear_color(&mut self, index: u32, value: [f32; 4]);
    fn clear_depth_stencil(&mut self, depth: f32, stencil: Option<u32>);
    /// Clears color, depth and stencil of the canvas.
    fn clear_canvas(&mut self);
    /// Copies the read buffer of the read framebuffer into the draw buffers of
    /// the draw framebuffer.
    fn blit_framebuffer(&mut self, source: Rect, destination: Rect, filter: FilterMode);
    fn resize_canvas(&mut self, size: Size);
    fn canvas_size(&self) -> Size;
    /// Tightly packed RGBA8 rows of the canvas, top row first.
    fn read_canvas(&mut self) -> Result<Vec<u8>, GpuError>;
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);

    fn create_buffer(&mut self) -> Result<BufferId, GpuError>;
    fn buffer_data(&mut self, buffer: BufferId, data: &[u8]);
    fn bind_buffer_base(&mut self, index: u32, buffer: Option<BufferId>);
    fn delete_buffer(&mut self, buffer: BufferId);

    fn create_vertex_array(&mut self) -> Result<VertexArrayId, GpuError>;
    /// `None` unbinds; draws then take no vertex input.
    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayId>);
    /// Sources attribute `location` of the bound vertex array from `buffer`.
    fn vertex_attribute(&mut self, location: u32, buffer: BufferId, layout: VertexLayout);
    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId);

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId, GpuError>;
    fn link_program(&mut self, vertex: ShaderId, fragment: ShaderId)
        -> Result<ProgramId, GpuError>;
    fn uniform_block_layout(&self, program: ProgramId, name: &str) -> Option<BlockLayout>;
    /// Location of the vertex shader input `name`, if the program reads it.
    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<u32>;
    /// Routes the program's block `name` to indexed buffer binding `binding`.
    fn uniform_block_binding(&mut self, program: ProgramId, name: &str, binding: u32);
    fn use_program(&mut self, program: Option<ProgramId>);
    fn delete_shader(&mut self, shader: ShaderId);
    fn delete_program(&mut self, program: ProgramId);

    fn viewport(&mut self, rect: Rect);
    fn set_blend(&mut self, blend: Option<BlendMode>);
    fn set_depth_test(&mut self, enabled: bool);
    fn draw_arrays(&mut self, primitive: Primitive, first: u32, count: u32);
}

/// Host-side binding state shared by both backends.
#[derive(Clone, Debug)]
pub(crate) struct BoundState {
    pub draw_framebuffer: Option<FramebufferId>,
    pub read_framebuffer: Option<FramebufferId>,
    pub program: Option<ProgramId>,
    pub texture_units: std::collections::BTreeMap<u32, TextureId>,
    pub buffer_bindings: std::collections::BTreeMap<u32, BufferId>,
    pub vertex_array: Option<VertexArrayId>,
    pub viewport: Rect,
    pub blend: Option<BlendMode>,
    pub depth_test: bool,
}

impl BoundState {
    pub fn new(canvas: Size) -> Self {
        Self {
            draw_framebuffer: None,
            read_framebuffer: None,
            program: None,
            texture_units: Default::default(),
            buffer_bindings: Default::default(),
            vertex_array: None,
            viewport: canvas.full_rect(),
            blend: None,
            depth_test: false,
        }
    }

    pub fn bind_framebuffer(&mut self, target: FramebufferTarget, framebuffer: Option<FramebufferId>) {
        match target {
            FramebufferTarget::Draw => self.draw_framebuffer = framebuffer,
            FramebufferTarget::Read => self.read_framebuffer = framebuffer,
        }
    }

    pub fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) {
        match texture {
            Some(texture) => {
                self.texture_units.insert(unit, texture);
            }
            None => {
                self.texture_units.remove(&unit);
            }
        }
    }

    pub fn bind_buffer(&mut self, index: u32, buffer: Option<BufferId>) {
        match buffer {
            Some(buffer) => {
                self.buffer_bindings.insert(index, buffer);
            }
            None => {
                self.buffer_bindings.remove(&index);
            }
        }
    }

    /// Drops every binding that refers to a deleted object.
    pub fn forget_texture(&mut self, texture: TextureId) {
        self.texture_units.retain(|_, bound| *bound != texture);
    }

    pub fn forget_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.draw_framebuffer == Some(framebuffer) {
            self.draw_framebuffer = None;
        }
        if self.read_framebuffer == Some(framebuffer) {
            self.read_framebuffer = None;
        }
    }

    pub fn forget_buffer(&mut self, buffer: BufferId) {
        self.buffer_bindings.retain(|_, bound| *bound != buffer);
    }

    pub fn forget_vertex_array(&mut self, vertex_array: VertexArrayId) {
        if self.vertex_array == Some(vertex_array) {
            self.vertex_array = None;
        }
    }

    pub fn forget_program(&mut self, program: ProgramId) {
        if self.program == Some(program) {
            self.program = None;
        }
    }
}

/// Color attachment indices selected by a draw-buffer mask, lowest first.
pub(crate) fn mask_indices(mask: u32) -> impl Iterator<Item = u32> {
    (0..u32::BITS).filter(move |index| mask & (1 << index) != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_layouts_use_the_format_size_as_stride() {
        assert_eq!(VertexLayout::packed(VertexFormat::Vec3).effective_stride(), 12);
        assert_eq!(
            VertexLayout::interleaved(VertexFormat::Vec2, 20, 12).effective_stride(),
            20
        );
    }

    #[test]
    fn mask_indices_lists_set_bits() {
        assert_eq!(mask_indices(0b1011).collect::<Vec<_>>(), vec![0, 1, 3]);
        assert_eq!(mask_indices(0).count(), 0);
    }
}
