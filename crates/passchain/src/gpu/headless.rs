use std::collections::BTreeMap;

use crate::error::GpuError;
use crate::types::{
    AttachmentSlot, BlendMode, ChannelLayout, FilterMode, FilterTarget, FramebufferTarget,
    InternalFormat, Primitive, Rect, ShaderStage, Size, TextureFormat,
};

use super::reflect::{self, BlockLayout, ParsedShader};
use super::{
    mask_indices, BoundState, BufferId, FramebufferId, GraphicsContext, HandleTable, ProgramId,
    ShaderId, TextureId, VertexArray, VertexArrayId, VertexBinding, VertexLayout,
};

struct HeadlessTexture {
    format: TextureFormat,
    size: Size,
    texels: Vec<[f32; 4]>,
    min_filter: FilterMode,
    mag_filter: FilterMode,
}

impl HeadlessTexture {
    fn new() -> Self {
        Self {
            format: TextureFormat::RGBA,
            size: Size::new(0, 0),
            texels: Vec::new(),
            min_filter: FilterMode::Nearest,
            mag_filter: FilterMode::Nearest,
        }
    }

    fn allocate(&mut self, format: TextureFormat, size: Size) {
        self.format = format;
        self.size = size;
        self.texels = vec![[0.0; 4]; size.texel_count()];
    }

    fn fill(&mut self, value: [f32; 4]) {
        let value = match self.format.layout {
            ChannelLayout::Red => [value[0], 0.0, 0.0, 1.0],
            _ => value,
        };
        self.texels.iter_mut().for_each(|texel| *texel = value);
    }

    fn texel(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        self.texels
            .get(y as usize * self.size.width as usize + x as usize)
            .copied()
    }
}

struct HeadlessFramebuffer {
    attachments: BTreeMap<AttachmentSlot, TextureId>,
    draw_buffers: u32,
    read_buffer: AttachmentSlot,
}

struct HeadlessProgram {
    blocks: Vec<BlockLayout>,
    block_bindings: BTreeMap<String, u32>,
    attributes: Vec<(String, u32)>,
}

/// Snapshot of everything bound when a draw was issued.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawCall {
    pub program: ProgramId,
    /// `None` when drawing to the canvas.
    pub framebuffer: Option<FramebufferId>,
    /// Color attachment index and texture written by the draw.
    pub targets: Vec<(u32, TextureId)>,
    pub primitive: Primitive,
    pub first: u32,
    pub count: u32,
    pub viewport: Rect,
    pub blend: Option<BlendMode>,
    pub depth_test: bool,
    pub textures: BTreeMap<u32, TextureId>,
    /// Attributes of the bound vertex array by location; empty when none is
    /// bound.
    pub vertex_inputs: BTreeMap<u32, VertexBinding>,
    /// Bytes of every uniform block of the program as bound at draw time.
    pub uniform_blocks: BTreeMap<String, Option<Vec<u8>>>,
}

impl DrawCall {
    /// Reads an `f32` at `offset` of uniform block `block`.
    pub fn uniform_f32(&self, block: &str, offset: u32) -> Option<f32> {
        let bytes = self.uniform_blocks.get(block)?.as_ref()?;
        let start = offset as usize;
        let raw: [u8; 4] = bytes.get(start..start + 4)?.try_into().ok()?;
        Some(f32::from_le_bytes(raw))
    }
}

/// Operations recorded by [`HeadlessContext`], in submission order.
#[derive(Clone, Debug, PartialEq)]
pub enum HeadlessCommand {
    ClearColor {
        framebuffer: Option<FramebufferId>,
        index: u32,
        value: [f32; 4],
    },
    ClearDepthStencil {
        framebuffer: Option<FramebufferId>,
        depth: f32,
        stencil: Option<u32>,
    },
    ClearCanvas,
    Blit {
        source: Option<FramebufferId>,
        destination: Option<FramebufferId>,
        source_rect: Rect,
        destination_rect: Rect,
        filter: FilterMode,
    },
    Draw(DrawCall),
}

/// In-memory [`GraphicsContext`].
///
/// Nothing is rasterised, but every other operation has its real effect:
/// textures store texels, clears and blits write them, buffers keep their
/// bytes, and GLSL is parsed, validated and reflected.
pub struct HeadlessContext {
    textures: HandleTable<HeadlessTexture>,
    framebuffers: HandleTable<HeadlessFramebuffer>,
    buffers: HandleTable<Vec<u8>>,
    shaders: HandleTable<ParsedShader>,
    programs: HandleTable<HeadlessProgram>,
    vertex_arrays: HandleTable<VertexArray>,
    canvas: HeadlessTexture,
    state: BoundState,
    commands: Vec<HeadlessCommand>,
    fail_allocations: bool,
}

impl HeadlessContext {
    pub fn new(canvas: Size) -> Self {
        let mut canvas_texture = HeadlessTexture::new();
        canvas_texture.allocate(TextureFormat::RGBA, canvas);
        Self {
            textures: HandleTable::new(),
            framebuffers: HandleTable::new(),
            buffers: HandleTable::new(),
            shaders: HandleTable::new(),
            programs: HandleTable::new(),
            vertex_arrays: HandleTable::new(),
            canvas: canvas_texture,
            state: BoundState::new(canvas),
            commands: Vec::new(),
            fail_allocations: false,
        }
    }

    /// Makes every subsequent object creation fail with
    /// [`GpuError::Allocation`].
    pub fn set_fail_allocations(&mut self, fail: bool) {
        self.fail_allocations = fail;
    }

    pub fn commands(&self) -> &[HeadlessCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<HeadlessCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn draw_calls(&self) -> impl Iterator<Item = &DrawCall> {
        self.commands.iter().filter_map(|command| match command {
            HeadlessCommand::Draw(call) => Some(call),
            _ => None,
        })
    }

    pub fn texture_size(&self, texture: TextureId) -> Option<Size> {
        self.textures.get(texture.0).map(|entry| entry.size)
    }

    pub fn texture_format(&self, texture: TextureId) -> Option<TextureFormat> {
        self.textures.get(texture.0).map(|entry| entry.format)
    }

    pub fn texel(&self, texture: TextureId, x: u32, y: u32) -> Option<[f32; 4]> {
        self.textures.get(texture.0)?.texel(x, y)
    }

    pub fn canvas_texel(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        self.canvas.texel(x, y)
    }

    /// `(min, mag)` filters of a texture.
    pub fn texture_filters(&self, texture: TextureId) -> Option<(FilterMode, FilterMode)> {
        self.textures
            .get(texture.0)
            .map(|entry| (entry.min_filter, entry.mag_filter))
    }

    pub fn buffer_contents(&self, buffer: BufferId) -> Option<&[u8]> {
        self.buffers.get(buffer.0).map(Vec::as_slice)
    }

    /// Components of attribute `binding` for vertex `vertex`, read from the
    /// buffer's current contents.
    pub fn vertex_values(&self, binding: &VertexBinding, vertex: u32) -> Option<Vec<f32>> {
        let bytes = self.buffer_contents(binding.buffer)?;
        let layout = binding.layout;
        let start = layout.offset as usize + vertex as usize * layout.effective_stride() as usize;
        let end = start + layout.format.byte_size() as usize;
        let raw = bytes.get(start..end)?;
        Some(
            raw.chunks_exact(4)
                .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect(),
        )
    }

    pub fn attachment(&self, framebuffer: FramebufferId, slot: AttachmentSlot) -> Option<TextureId> {
        self.framebuffers
            .get(framebuffer.0)?
            .attachments
            .get(&slot)
            .copied()
    }

    pub fn draw_buffer_mask(&self, framebuffer: FramebufferId) -> Option<u32> {
        self.framebuffers
            .get(framebuffer.0)
            .map(|entry| entry.draw_buffers)
    }

    pub fn bound_framebuffer(&self, target: FramebufferTarget) -> Option<FramebufferId> {
        match target {
            FramebufferTarget::Draw => self.state.draw_framebuffer,
            FramebufferTarget::Read => self.state.read_framebuffer,
        }
    }

    pub fn bound_program(&self) -> Option<ProgramId> {
        self.state.program
    }

    pub fn bound_texture(&self, unit: u32) -> Option<TextureId> {
        self.state.texture_units.get(&unit).copied()
    }

    pub fn current_viewport(&self) -> Rect {
        self.state.viewport
    }

    pub fn current_blend(&self) -> Option<BlendMode> {
        self.state.blend
    }

    pub fn current_depth_test(&self) -> bool {
        self.state.depth_test
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn live_shaders(&self) -> usize {
        self.shaders.len()
    }

    pub fn live_vertex_arrays(&self) -> usize {
        self.vertex_arrays.len()
    }

    fn draw_attachment(&self, slot: AttachmentSlot) -> Option<TextureId> {
        let framebuffer = self.state.draw_framebuffer?;
        self.attachment(framebuffer, slot)
    }

    /// Textures written by a draw or blit to the bound draw framebuffer.
    fn draw_targets(&self) -> Vec<(u32, TextureId)> {
        let Some(framebuffer) = self
            .state
            .draw_framebuffer
            .and_then(|id| self.framebuffers.get(id.0))
        else {
            return Vec::new();
        };
        mask_indices(framebuffer.draw_buffers)
            .filter_map(|index| {
                framebuffer
                    .attachments
                    .get(&AttachmentSlot::Color(index))
                    .map(|texture| (index, *texture))
            })
            .collect()
    }

    fn read_source(&self) -> Option<(Size, Vec<[f32; 4]>)> {
        match self.state.read_framebuffer {
            None => Some((self.canvas.size, self.canvas.texels.clone())),
            Some(framebuffer) => {
                let entry = self.framebuffers.get(framebuffer.0)?;
                let texture = entry.attachments.get(&entry.read_buffer)?;
                let texture = self.textures.get(texture.0)?;
                Some((texture.size, texture.texels.clone()))
            }
        }
    }
}

fn allocate<T>(
    fail: bool,
    table: &mut HandleTable<T>,
    value: T,
    resource: &'static str,
) -> Result<u32, GpuError> {
    if fail {
        return Err(GpuError::Allocation { resource });
    }
    table.insert(value).ok_or(GpuError::Allocation { resource })
}

fn decode_texels(format: TextureFormat, size: Size, data: &[u8]) -> Option<Vec<[f32; 4]>> {
    if data.len() != size.texel_count() * format.bytes_per_texel() {
        return None;
    }
    let f32_at = |chunk: &[u8], index: usize| {
        let start = index * 4;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&chunk[start..start + 4]);
        f32::from_le_bytes(raw)
    };
    let texels = data
        .chunks_exact(format.bytes_per_texel())
        .map(|chunk| match format.internal {
            InternalFormat::R8 => [chunk[0] as f32 / 255.0, 0.0, 0.0, 1.0],
            InternalFormat::Rgba8 => [
                chunk[0] as f32 / 255.0,
                chunk[1] as f32 / 255.0,
                chunk[2] as f32 / 255.0,
                chunk[3] as f32 / 255.0,
            ],
            InternalFormat::R32F | InternalFormat::Depth32F => [f32_at(chunk, 0), 0.0, 0.0, 1.0],
            InternalFormat::Rgba32F => [
                f32_at(chunk, 0),
                f32_at(chunk, 1),
                f32_at(chunk, 2),
                f32_at(chunk, 3),
            ],
            InternalFormat::Rgba16F => {
                let half = |index: usize| {
                    half::f16::from_bits(u16::from_le_bytes([chunk[index * 2], chunk[index * 2 + 1]]))
                        .to_f32()
                };
                [half(0), half(1), half(2), half(3)]
            }
            InternalFormat::Depth24Stencil8 => {
                let packed = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                [
                    (packed >> 8) as f32 / 0x00ff_ffff as f32,
                    (packed & 0xff) as f32,
                    0.0,
                    1.0,
                ]
            }
        })
        .collect();
    Some(texels)
}

fn blit_texels(
    source: (Size, &[[f32; 4]]),
    source_rect: Rect,
    destination: &mut HeadlessTexture,
    destination_rect: Rect,
) {
    let (source_size, source_texels) = source;
    if source_rect.width == 0 || source_rect.height == 0 {
        return;
    }
    for dy in 0..destination_rect.height {
        for dx in 0..destination_rect.width {
            let x = destination_rect.x + dx;
            let y = destination_rect.y + dy;
            if x >= destination.size.width || y >= destination.size.height {
                continue;
            }
            let sx = source_rect.x
                + (u64::from(dx) * u64::from(source_rect.width) / u64::from(destination_rect.width))
                    as u32;
            let sy = source_rect.y
                + (u64::from(dy) * u64::from(source_rect.height)
                    / u64::from(destination_rect.height)) as u32;
            if sx >= source_size.width || sy >= source_size.height {
                continue;
            }
            let value = source_texels[sy as usize * source_size.width as usize + sx as usize];
            let index = y as usize * destination.size.width as usize + x as usize;
            destination.texels[index] = value;
        }
    }
}

impl GraphicsContext for HeadlessContext {
    fn create_texture(&mut self) -> Result<TextureId, GpuError> {
        let id = allocate(self.fail_allocations, &mut self.textures, HeadlessTexture::new(), "texture");
        id.map(TextureId)
    }

    fn allocate_texture(&mut self, texture: TextureId, format: TextureFormat, size: Size) {
        match self.textures.get_mut(texture.0) {
            Some(entry) => entry.allocate(format, size),
            None => tracing::warn!(texture = texture.0, "allocate on unknown texture ignored"),
        }
    }

    fn upload_texture(&mut self, texture: TextureId, format: TextureFormat, size: Size, data: &[u8]) {
        let Some(entry) = self.textures.get_mut(texture.0) else {
            tracing::warn!(texture = texture.0, "upload to unknown texture ignored");
            return;
        };
        entry.allocate(format, size);
        match decode_texels(format, size, data) {
            Some(texels) => entry.texels = texels,
            None => tracing::warn!(
                expected_len = size.texel_count() * format.bytes_per_texel(),
                actual_len = data.len(),
                "texture upload ignored due to mismatched payload size"
            ),
        }
    }

    fn set_texture_filter(&mut self, texture: TextureId, target: FilterTarget, mode: FilterMode) {
        if let Some(entry) = self.textures.get_mut(texture.0) {
            match target {
                FilterTarget::Min => entry.min_filter = mode,
                FilterTarget::Mag => entry.mag_filter = mode,
            }
        }
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) {
        self.state.bind_texture(unit, texture);
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(texture.0);
        self.state.forget_texture(texture);
        self.framebuffers.retain(|_, framebuffer| {
            framebuffer
                .attachments
                .retain(|_, attached| *attached != texture);
            true
        });
    }

    fn create_framebuffer(&mut self) -> Result<FramebufferId, GpuError> {
        let id = allocate(
            self.fail_allocations,
            &mut self.framebuffers,
            HeadlessFramebuffer {
                attachments: BTreeMap::new(),
                draw_buffers: 0b1,
                read_buffer: AttachmentSlot::Color(0),
            },
            "framebuffer",
        );
        id.map(FramebufferId)
    }

    fn bind_framebuffer(&mut self, target: FramebufferTarget, framebuffer: Option<FramebufferId>) {
        self.state.bind_framebuffer(target, framebuffer);
    }

    fn attach_texture(&mut self, slot: AttachmentSlot, texture: TextureId) {
        let Some(framebuffer) = self.state.draw_framebuffer else {
            tracing::warn!(%slot, "cannot attach a texture to the canvas");
            return;
        };
        if let Some(entry) = self.framebuffers.get_mut(framebuffer.0) {
            entry.attachments.insert(slot, texture);
        }
    }

    fn set_draw_buffers(&mut self, mask: u32) {
        if let Some(entry) = self
            .state
            .draw_framebuffer
            .and_then(|id| self.framebuffers.get_mut(id.0))
        {
            entry.draw_buffers = mask;
        }
    }

    fn set_read_buffer(&mut self, slot: AttachmentSlot) {
        if let Some(entry) = self
            .state
            .read_framebuffer
            .and_then(|id| self.framebuffers.get_mut(id.0))
        {
            entry.read_buffer = slot;
        }
    }

    fn clear_color(&mut self, index: u32, value: [f32; 4]) {
        self.commands.push(HeadlessCommand::ClearColor {
            framebuffer: self.state.draw_framebuffer,
            index,
            value,
        });
        if self.state.draw_framebuffer.is_none() {
            if index == 0 {
                self.canvas.fill(value);
            }
            return;
        }
        if let Some(texture) = self.draw_attachment(AttachmentSlot::Color(index)) {
            if let Some(entry) = self.textures.get_mut(texture.0) {
                entry.fill(value);
            }
        }
    }

    fn clear_depth_stencil(&mut self, depth: f32, stencil: Option<u32>) {
        self.commands.push(HeadlessCommand::ClearDepthStencil {
            framebuffer: self.state.draw_framebuffer,
            depth,
            stencil,
        });
        let target = self
            .draw_attachment(AttachmentSlot::DepthStencil)
            .or_else(|| self.draw_attachment(AttachmentSlot::Depth));
        if let Some(entry) = target.and_then(|texture| self.textures.get_mut(texture.0)) {
            let stencil = stencil.unwrap_or(0) as f32;
            entry
                .texels
                .iter_mut()
                .for_each(|texel| *texel = [depth, stencil, 0.0, 1.0]);
        }
    }

    fn clear_canvas(&mut self) {
        self.commands.push(HeadlessCommand::ClearCanvas);
        self.canvas.fill([0.0; 4]);
    }

    fn blit_framebuffer(&mut self, source: Rect, destination: Rect, filter: FilterMode) {
        self.commands.push(HeadlessCommand::Blit {
            source: self.state.read_framebuffer,
            destination: self.state.draw_framebuffer,
            source_rect: source,
            destination_rect: destination,
            filter,
        });
        let Some((source_size, texels)) = self.read_source() else {
            tracing::warn!("blit ignored: read framebuffer has no readable attachment");
            return;
        };
        if self.state.draw_framebuffer.is_none() {
            blit_texels((source_size, &texels), source, &mut self.canvas, destination);
            return;
        }
        for (_, texture) in self.draw_targets() {
            if let Some(entry) = self.textures.get_mut(texture.0) {
                blit_texels((source_size, &texels), source, entry, destination);
            }
        }
    }

    fn resize_canvas(&mut self, size: Size) {
        if self.canvas.size != size {
            self.canvas.allocate(TextureFormat::RGBA, size);
        }
    }

    fn canvas_size(&self) -> Size {
        self.canvas.size
    }

    fn read_canvas(&mut self) -> Result<Vec<u8>, GpuError> {
        Ok(self
            .canvas
            .texels
            .iter()
            .flat_map(|texel| texel.map(|channel| (channel.clamp(0.0, 1.0) * 255.0).round() as u8))
            .collect())
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffers.remove(framebuffer.0);
        self.state.forget_framebuffer(framebuffer);
    }

    fn create_buffer(&mut self) -> Result<BufferId, GpuError> {
        let id = allocate(self.fail_allocations, &mut self.buffers, Vec::new(), "buffer");
        id.map(BufferId)
    }

    fn buffer_data(&mut self, buffer: BufferId, data: &[u8]) {
        match self.buffers.get_mut(buffer.0) {
            Some(contents) => {
                contents.clear();
                contents.extend_from_slice(data);
            }
            None => tracing::warn!(buffer = buffer.0, "data for unknown buffer ignored"),
        }
    }

    fn bind_buffer_base(&mut self, index: u32, buffer: Option<BufferId>) {
        self.state.bind_buffer(index, buffer);
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(buffer.0);
        self.state.forget_buffer(buffer);
    }

    fn create_vertex_array(&mut self) -> Result<VertexArrayId, GpuError> {
        let id = allocate(
            self.fail_allocations,
            &mut self.vertex_arrays,
            VertexArray::new(),
            "vertex array",
        );
        id.map(VertexArrayId)
    }

    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayId>) {
        self.state.vertex_array = vertex_array;
    }

    fn vertex_attribute(&mut self, location: u32, buffer: BufferId, layout: VertexLayout) {
        let Some(entry) = self
            .state
            .vertex_array
            .and_then(|id| self.vertex_arrays.get_mut(id.0))
        else {
            tracing::warn!(location, "vertex attribute ignored: no vertex array bound");
            return;
        };
        entry.insert(location, VertexBinding { buffer, layout });
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId) {
        self.vertex_arrays.remove(vertex_array.0);
        self.state.forget_vertex_array(vertex_array);
    }

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId, GpuError> {
        let parsed = reflect::parse_shader(stage, source)?;
        let id = allocate(self.fail_allocations, &mut self.shaders, parsed, "shader");
        id.map(ShaderId)
    }

    fn link_program(&mut self, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId, GpuError> {
        let (Some(vertex), Some(fragment)) =
            (self.shaders.get(vertex.0), self.shaders.get(fragment.0))
        else {
            return Err(GpuError::Link {
                log: "attached shader does not exist".to_owned(),
            });
        };
        reflect::check_link(vertex, fragment).map_err(|log| GpuError::Link { log })?;

        let mut blocks = reflect::uniform_blocks(&vertex.module);
        for block in reflect::uniform_blocks(&fragment.module) {
            if !blocks.iter().any(|known| known.name == block.name) {
                blocks.push(block);
            }
        }

        let id = allocate(
            self.fail_allocations,
            &mut self.programs,
            HeadlessProgram {
                blocks,
                block_bindings: BTreeMap::new(),
                attributes: reflect::vertex_inputs(&vertex.module),
            },
            "program",
        );
        id.map(ProgramId)
    }

    fn uniform_block_layout(&self, program: ProgramId, name: &str) -> Option<BlockLayout> {
        self.programs
            .get(program.0)?
            .blocks
            .iter()
            .find(|block| block.name == name)
            .cloned()
    }

    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        self.programs
            .get(program.0)?
            .attributes
            .iter()
            .find_map(|(input, location)| (input == name).then_some(*location))
    }

    fn uniform_block_binding(&mut self, program: ProgramId, name: &str, binding: u32) {
        if let Some(entry) = self.programs.get_mut(program.0) {
            entry.block_bindings.insert(name.to_owned(), binding);
        }
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        self.state.program = program;
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        self.shaders.remove(shader.0);
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(program.0);
        self.state.forget_program(program);
    }

    fn viewport(&mut self, rect: Rect) {
        self.state.viewport = rect;
    }

    fn set_blend(&mut self, blend: Option<BlendMode>) {
        self.state.blend = blend;
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.state.depth_test = enabled;
    }

    fn draw_arrays(&mut self, primitive: Primitive, first: u32, count: u32) {
        let Some(program_id) = self.state.program else {
            tracing::warn!("draw ignored: no program bound");
            return;
        };
        let Some(program) = self.programs.get(program_id.0) else {
            tracing::warn!(program = program_id.0, "draw ignored: program was deleted");
            return;
        };

        let vertex_inputs = self
            .state
            .vertex_array
            .and_then(|id| self.vertex_arrays.get(id.0))
            .cloned()
            .unwrap_or_default();
        if let Some((name, location)) = program
            .attributes
            .iter()
            .find(|(_, location)| !vertex_inputs.contains_key(location))
        {
            tracing::warn!(%name, location, "draw ignored: vertex input has no attribute");
            return;
        }

        let uniform_blocks = program
            .blocks
            .iter()
            .map(|block| {
                let contents = program
                    .block_bindings
                    .get(&block.name)
                    .and_then(|binding| self.state.buffer_bindings.get(binding))
                    .and_then(|buffer| self.buffers.get(buffer.0))
                    .cloned();
                (block.name.clone(), contents)
            })
            .collect();

        let call = DrawCall {
            program: program_id,
            framebuffer: self.state.draw_framebuffer,
            targets: self.draw_targets(),
            primitive,
            first,
            count,
            viewport: self.state.viewport,
            blend: self.state.blend,
            depth_test: self.state.depth_test,
            textures: self.state.texture_units.clone(),
            vertex_inputs,
            uniform_blocks,
        };
        self.commands.push(HeadlessCommand::Draw(call));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VertexFormat;

    #[test]
    fn upload_decodes_half_floats() {
        let mut gpu = HeadlessContext::new(Size::new(4, 4));
        let texture = gpu.create_texture().expect("texture");
        let data: Vec<u8> = [0.5f32, 1.0, 2.0, 0.25]
            .iter()
            .flat_map(|value| half::f16::from_f32(*value).to_bits().to_le_bytes())
            .collect();
        gpu.upload_texture(texture, TextureFormat::RGBA16F, Size::unit(), &data);
        assert_eq!(gpu.texel(texture, 0, 0), Some([0.5, 1.0, 2.0, 0.25]));
    }

    #[test]
    fn mismatched_upload_leaves_zeroed_storage() {
        let mut gpu = HeadlessContext::new(Size::new(4, 4));
        let texture = gpu.create_texture().expect("texture");
        gpu.upload_texture(texture, TextureFormat::R32F, Size::new(2, 2), &[0u8; 3]);
        assert_eq!(gpu.texture_size(texture), Some(Size::new(2, 2)));
        assert_eq!(gpu.texel(texture, 1, 1), Some([0.0; 4]));
    }

    #[test]
    fn blit_scales_with_nearest_sampling() {
        let mut gpu = HeadlessContext::new(Size::new(4, 4));
        let source = gpu.create_texture().expect("texture");
        let data: Vec<u8> = [1.0f32, 2.0, 3.0, 4.0]
            .iter()
            .flat_map(|value| value.to_le_bytes())
            .collect();
        gpu.upload_texture(source, TextureFormat::R32F, Size::new(2, 2), &data);

        let framebuffer = gpu.create_framebuffer().expect("framebuffer");
        gpu.bind_framebuffer(FramebufferTarget::Draw, Some(framebuffer));
        gpu.attach_texture(AttachmentSlot::Color(0), source);
        gpu.bind_framebuffer(FramebufferTarget::Draw, None);

        gpu.bind_framebuffer(FramebufferTarget::Read, Some(framebuffer));
        gpu.blit_framebuffer(
            Rect::new(0, 0, 2, 2),
            Rect::new(0, 0, 4, 4),
            FilterMode::Nearest,
        );

        assert_eq!(gpu.canvas_texel(0, 0).map(|texel| texel[0]), Some(1.0));
        assert_eq!(gpu.canvas_texel(3, 0).map(|texel| texel[0]), Some(2.0));
        assert_eq!(gpu.canvas_texel(0, 3).map(|texel| texel[0]), Some(3.0));
        assert_eq!(gpu.canvas_texel(3, 3).map(|texel| texel[0]), Some(4.0));
    }

    #[test]
    fn allocation_failures_are_reported() {
        let mut gpu = HeadlessContext::new(Size::unit());
        gpu.set_fail_allocations(true);
        assert!(matches!(
            gpu.create_texture(),
            Err(GpuError::Allocation { resource: "texture" })
        ));
        assert_eq!(gpu.live_textures(), 0);
    }

    const MESH_VERTEX: &str = r#"#version 450
layout(location = 0) in vec3 a_position;
layout(location = 1) in vec2 a_uv;
layout(location = 0) out vec2 v_uv;

void main() {
    v_uv = a_uv;
    gl_Position = vec4(a_position, 1.0);
}
"#;

    const MESH_FRAGMENT: &str = r#"#version 450
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 f_color;

void main() {
    f_color = vec4(v_uv, 0.0, 1.0);
}
"#;

    fn mesh_program(gpu: &mut HeadlessContext) -> ProgramId {
        let vertex = gpu
            .compile_shader(ShaderStage::Vertex, MESH_VERTEX)
            .expect("vertex shader");
        let fragment = gpu
            .compile_shader(ShaderStage::Fragment, MESH_FRAGMENT)
            .expect("fragment shader");
        gpu.link_program(vertex, fragment).expect("program")
    }

    #[test]
    fn draws_record_interleaved_vertex_input() {
        let mut gpu = HeadlessContext::new(Size::new(4, 4));
        let program = mesh_program(&mut gpu);
        assert_eq!(gpu.attribute_location(program, "a_position"), Some(0));
        assert_eq!(gpu.attribute_location(program, "a_uv"), Some(1));
        assert_eq!(gpu.attribute_location(program, "a_normal"), None);

        // Two vertices of position.xyz followed by uv.
        let vertices: [f32; 10] = [0.0, 0.5, 0.0, 0.25, 0.75, 1.0, -1.0, 0.0, 1.0, 0.0];
        let buffer = gpu.create_buffer().expect("buffer");
        gpu.buffer_data(buffer, bytemuck::cast_slice(&vertices));
        let vertex_array = gpu.create_vertex_array().expect("vertex array");
        gpu.bind_vertex_array(Some(vertex_array));
        gpu.vertex_attribute(0, buffer, VertexLayout::interleaved(VertexFormat::Vec3, 20, 0));
        gpu.vertex_attribute(1, buffer, VertexLayout::interleaved(VertexFormat::Vec2, 20, 12));

        gpu.use_program(Some(program));
        gpu.draw_arrays(Primitive::Triangles, 0, 2);

        let call = gpu.draw_calls().next().expect("draw call");
        assert_eq!(call.vertex_inputs.len(), 2);
        let uv = call.vertex_inputs.get(&1).expect("uv attribute");
        assert_eq!(gpu.vertex_values(uv, 0), Some(vec![0.25, 0.75]));
        assert_eq!(gpu.vertex_values(uv, 1), Some(vec![1.0, 0.0]));
        let position = call.vertex_inputs.get(&0).expect("position attribute");
        assert_eq!(gpu.vertex_values(position, 1), Some(vec![1.0, -1.0, 0.0]));
    }

    #[test]
    fn draw_without_vertex_input_is_ignored() {
        let mut gpu = HeadlessContext::new(Size::new(4, 4));
        let program = mesh_program(&mut gpu);
        let vertex_array = gpu.create_vertex_array().expect("vertex array");
        gpu.use_program(Some(program));
        gpu.draw_arrays(Primitive::Triangles, 0, 3);
        assert_eq!(gpu.draw_calls().count(), 0);

        gpu.bind_vertex_array(Some(vertex_array));
        gpu.delete_vertex_array(vertex_array);
        assert_eq!(gpu.live_vertex_arrays(), 0);
        gpu.draw_arrays(Primitive::Triangles, 0, 3);
        assert_eq!(gpu.draw_calls().count(), 0);
    }

    #[test]
    fn deleting_a_texture_detaches_it() {
        let mut gpu = HeadlessContext::new(Size::unit());
        let texture = gpu.create_texture().expect("texture");
        let framebuffer = gpu.create_framebuffer().expect("framebuffer");
        gpu.bind_framebuffer(FramebufferTarget::Draw, Some(framebuffer));
        gpu.attach_texture(AttachmentSlot::Color(0), texture);
        gpu.delete_texture(texture);
        assert_eq!(gpu.attachment(framebuffer, AttachmentSlot::Color(0)), None);
    }
}
