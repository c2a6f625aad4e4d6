use std::collections::BTreeMap;
use std::collections::HashMap;

use anyhow::{Context as AnyhowContext, Result};

use crate::error::GpuError;
use crate::types::{
    AttachmentSlot, BlendMode, FilterMode, FilterTarget, FramebufferTarget, Primitive, Rect,
    ShaderStage, Size, TextureFormat,
};

use super::pipeline::{self, Blitter, GpuProgram, PipelineKey};
use super::reflect::{self, BlockLayout, ParsedShader, ResourceKind};
use super::{
    mask_indices, BoundState, BufferId, FramebufferId, GraphicsContext, HandleTable, ProgramId,
    ShaderId, TextureId, VertexArray, VertexArrayId, VertexBinding, VertexLayout,
};

const CANVAS_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

struct GpuTexture {
    format: TextureFormat,
    size: Size,
    storage: Option<(wgpu::Texture, wgpu::TextureView)>,
    min_filter: FilterMode,
    mag_filter: FilterMode,
}

struct GpuFramebuffer {
    attachments: BTreeMap<AttachmentSlot, TextureId>,
    draw_buffers: u32,
    read_buffer: AttachmentSlot,
}

struct CanvasTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: Size,
}

/// Where a draw, clear or blit writes.
#[derive(Clone, Copy, Debug)]
enum ColorTarget {
    Canvas,
    Texture(TextureId),
}

/// [`GraphicsContext`] backed by wgpu.
///
/// The canvas is an offscreen RGBA8 texture that can be read back with
/// [`GraphicsContext::read_canvas`]. Each clear, blit and draw is encoded and
/// submitted immediately, so the bound-state model of the trait maps onto
/// wgpu's explicit passes one operation at a time.
pub struct WgpuContext {
    _instance: wgpu::Instance,
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    canvas: CanvasTarget,
    textures: HandleTable<GpuTexture>,
    framebuffers: HandleTable<GpuFramebuffer>,
    buffers: HandleTable<Option<wgpu::Buffer>>,
    shaders: HandleTable<ParsedShader>,
    programs: HandleTable<GpuProgram>,
    vertex_arrays: HandleTable<VertexArray>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    blitter: Blitter,
    state: BoundState,
}

impl WgpuContext {
    /// Acquires an adapter and device and allocates the canvas.
    pub fn new(canvas_size: Size) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .context("failed to find a suitable GPU adapter")?;

        let adapter_info = adapter.get_info();
        tracing::debug!(
            name = %adapter_info.name,
            backend = ?adapter_info.backend,
            device_type = ?adapter_info.device_type,
            "selected GPU adapter"
        );

        let max_dimension = adapter.limits().max_texture_dimension_2d;
        if canvas_size.width > max_dimension || canvas_size.height > max_dimension {
            anyhow::bail!(
                "GPU max texture dimension is {max_dimension}, requested canvas is {canvas_size}"
            );
        }

        let required_features = adapter.features() & wgpu::Features::FLOAT32_FILTERABLE;
        if !required_features.contains(wgpu::Features::FLOAT32_FILTERABLE) {
            tracing::warn!("adapter cannot filter 32-bit float textures; sampling them will fail");
        }

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("passchain device"),
            required_features,
            required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .context("failed to create GPU device")?;

        let canvas = create_canvas(&device, canvas_size);
        let blitter = Blitter::new(&device);

        Ok(Self {
            _instance: instance,
            device,
            queue,
            adapter_name: adapter_info.name,
            canvas,
            textures: HandleTable::new(),
            framebuffers: HandleTable::new(),
            buffers: HandleTable::new(),
            shaders: HandleTable::new(),
            programs: HandleTable::new(),
            vertex_arrays: HandleTable::new(),
            pipelines: HashMap::new(),
            blitter,
            state: BoundState::new(canvas_size),
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn begin_scope(&self) {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
    }

    /// Pops the validation scope opened by [`Self::begin_scope`], returning the
    /// captured error message if any.
    fn end_scope(&self) -> Option<String> {
        pollster::block_on(self.device.pop_error_scope()).map(|error| error.to_string())
    }

    fn end_scope_logged(&self, operation: &'static str) {
        if let Some(error) = self.end_scope() {
            tracing::warn!(operation, %error, "GPU validation error");
        }
    }

    fn texture_view(&self, texture: TextureId) -> Option<&wgpu::TextureView> {
        self.textures
            .get(texture.0)?
            .storage
            .as_ref()
            .map(|(_, view)| view)
    }

    fn target_view(&self, target: ColorTarget) -> Option<&wgpu::TextureView> {
        match target {
            ColorTarget::Canvas => Some(&self.canvas.view),
            ColorTarget::Texture(texture) => self.texture_view(texture),
        }
    }

    fn target_format(&self, target: ColorTarget) -> Option<wgpu::TextureFormat> {
        match target {
            ColorTarget::Canvas => Some(CANVAS_FORMAT),
            ColorTarget::Texture(texture) => self
                .textures
                .get(texture.0)
                .map(|entry| pipeline::wgpu_format(entry.format)),
        }
    }

    fn target_size(&self, target: ColorTarget) -> Option<Size> {
        match target {
            ColorTarget::Canvas => Some(self.canvas.size),
            ColorTarget::Texture(texture) => self.textures.get(texture.0).map(|entry| entry.size),
        }
    }

    /// Color outputs of the draw framebuffer, indexed by attachment location.
    fn draw_color_targets(&self) -> Vec<Option<ColorTarget>> {
        let Some(framebuffer) = self.state.draw_framebuffer else {
            return vec![Some(ColorTarget::Canvas)];
        };
        let Some(entry) = self.framebuffers.get(framebuffer.0) else {
            return Vec::new();
        };
        let mut targets = Vec::new();
        for index in mask_indices(entry.draw_buffers) {
            if let Some(texture) = entry.attachments.get(&AttachmentSlot::Color(index)) {
                let location = index as usize;
                if targets.len() <= location {
                    targets.resize(location + 1, None);
                }
                targets[location] = Some(ColorTarget::Texture(*texture));
            }
        }
        targets
    }

    fn draw_depth_target(&self) -> Option<TextureId> {
        let entry = self
            .framebuffers
            .get(self.state.draw_framebuffer?.0)?;
        entry
            .attachments
            .get(&AttachmentSlot::DepthStencil)
            .or_else(|| entry.attachments.get(&AttachmentSlot::Depth))
            .copied()
    }

    fn clamp_viewport(&self, size: Size) -> [f32; 4] {
        let viewport = self.state.viewport;
        let x = viewport.x.min(size.width);
        let y = viewport.y.min(size.height);
        let width = viewport.width.min(size.width - x).max(1);
        let height = viewport.height.min(size.height - y).max(1);
        [x as f32, y as f32, width as f32, height as f32]
    }

    fn ensure_pipeline(&mut self, key: &PipelineKey) -> bool {
        if self.pipelines.contains_key(key) {
            return true;
        }
        let Some(program) = self.programs.get(key.program.0) else {
            return false;
        };
        self.begin_scope();
        let pipeline = pipeline::create_pipeline(&self.device, program, key);
        if let Some(error) = self.end_scope() {
            tracing::warn!(%error, program = key.program.0, "failed to create render pipeline");
            return false;
        }
        self.pipelines.insert(key.clone(), pipeline);
        true
    }

    fn create_sampler(&self, texture: &GpuTexture) -> wgpu::Sampler {
        self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("texture unit sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: pipeline::filter_mode(texture.mag_filter),
            min_filter: pipeline::filter_mode(texture.min_filter),
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        })
    }

    /// Builds one bind group per descriptor set of `program` from the current
    /// texture units and indexed buffer bindings.
    fn bind_groups(&self, program: &GpuProgram) -> Result<Vec<wgpu::BindGroup>, String> {
        let mut samplers: HashMap<u32, wgpu::Sampler> = HashMap::new();
        for slot in &program.slots {
            if let ResourceKind::Sampler { .. } = slot.kind {
                let unit = slot.texture_unit();
                let texture = self
                    .state
                    .texture_units
                    .get(&unit)
                    .and_then(|texture| self.textures.get(texture.0))
                    .ok_or_else(|| format!("no texture bound to unit {unit}"))?;
                samplers.insert(slot.binding, self.create_sampler(texture));
            }
        }

        let mut groups = Vec::with_capacity(program.group_layouts.len());
        for (group, layout) in program.group_layouts.iter().enumerate() {
            let mut entries = Vec::new();
            for slot in program.slots.iter().filter(|slot| slot.group == group as u32) {
                let resource = match &slot.kind {
                    ResourceKind::UniformBlock { block } => {
                        let binding = program.block_bindings.get(block).copied().unwrap_or(0);
                        let buffer = self
                            .state
                            .buffer_bindings
                            .get(&binding)
                            .and_then(|buffer| self.buffers.get(buffer.0))
                            .and_then(Option::as_ref)
                            .ok_or_else(|| format!("no buffer bound for uniform block `{block}`"))?;
                        buffer.as_entire_binding()
                    }
                    ResourceKind::Texture => {
                        let unit = slot.texture_unit();
                        let view = self
                            .state
                            .texture_units
                            .get(&unit)
                            .and_then(|texture| self.texture_view(*texture))
                            .ok_or_else(|| format!("no texture bound to unit {unit}"))?;
                        wgpu::BindingResource::TextureView(view)
                    }
                    ResourceKind::Sampler { .. } => match samplers.get(&slot.binding) {
                        Some(sampler) => wgpu::BindingResource::Sampler(sampler),
                        None => return Err(format!("missing sampler for binding {}", slot.binding)),
                    },
                };
                entries.push(wgpu::BindGroupEntry {
                    binding: slot.binding,
                    resource,
                });
            }
            groups.push(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("program bind group"),
                layout,
                entries: &entries,
            }));
        }
        Ok(groups)
    }

    fn submit(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(Some(encoder.finish()));
    }

    fn encoder(&self, label: &'static str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }
}

fn create_canvas(device: &wgpu::Device, size: Size) -> CanvasTarget {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("canvas"),
        size: extent(size),
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: CANVAS_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    CanvasTarget {
        texture,
        view,
        size,
    }
}

fn extent(size: Size) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.width.max(1),
        height: size.height.max(1),
        depth_or_array_layers: 1,
    }
}

fn clear_color_value(value: [f32; 4]) -> wgpu::Color {
    wgpu::Color {
        r: f64::from(value[0]),
        g: f64::from(value[1]),
        b: f64::from(value[2]),
        a: f64::from(value[3]),
    }
}

fn has_stencil(format: wgpu::TextureFormat) -> bool {
    matches!(
        format,
        wgpu::TextureFormat::Depth24PlusStencil8 | wgpu::TextureFormat::Depth32FloatStencil8
    )
}

impl GraphicsContext for WgpuContext {
    fn create_texture(&mut self) -> Result<TextureId, GpuError> {
        self.textures
            .insert(GpuTexture {
                format: TextureFormat::RGBA,
                size: Size::new(0, 0),
                storage: None,
                min_filter: FilterMode::Nearest,
                mag_filter: FilterMode::Nearest,
            })
            .map(TextureId)
            .ok_or(GpuError::Allocation { resource: "texture" })
    }

    fn allocate_texture(&mut self, texture: TextureId, format: TextureFormat, size: Size) {
        let Some(entry) = self.textures.get_mut(texture.0) else {
            tracing::warn!(texture = texture.0, "allocate on unknown texture ignored");
            return;
        };
        let allocation = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("pass texture"),
            size: extent(size),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: pipeline::wgpu_format(format),
            usage: pipeline::texture_usage(format),
            view_formats: &[],
        });
        let view = allocation.create_view(&wgpu::TextureViewDescriptor::default());
        entry.format = format;
        entry.size = size;
        entry.storage = Some((allocation, view));
    }

    fn upload_texture(&mut self, texture: TextureId, format: TextureFormat, size: Size, data: &[u8]) {
        self.allocate_texture(texture, format, size);
        let expected_len = size.texel_count() * format.bytes_per_texel();
        if data.len() != expected_len {
            tracing::warn!(
                expected_len,
                actual_len = data.len(),
                "texture upload ignored due to mismatched payload size"
            );
            return;
        }
        if !format.is_color() {
            tracing::warn!(?format, "depth textures cannot be uploaded; allocation kept");
            return;
        }
        let Some((allocation, _)) = self
            .textures
            .get(texture.0)
            .and_then(|entry| entry.storage.as_ref())
        else {
            return;
        };
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: allocation,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(size.width * format.bytes_per_texel() as u32),
                rows_per_image: Some(size.height),
            },
            extent(size),
        );
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
        if let Some(entry) = self.textures.remove(texture.0) {
            if let Some((allocation, _)) = entry.storage {
                allocation.destroy();
            }
        }
        self.state.forget_texture(texture);
        self.framebuffers.retain(|_, framebuffer| {
            framebuffer
                .attachments
                .retain(|_, attached| *attached != texture);
            true
        });
    }

    fn create_framebuffer(&mut self) -> Result<FramebufferId, GpuError> {
        self.framebuffers
            .insert(GpuFramebuffer {
                attachments: BTreeMap::new(),
                draw_buffers: 0b1,
                read_buffer: AttachmentSlot::Color(0),
            })
            .map(FramebufferId)
            .ok_or(GpuError::Allocation {
                resource: "framebuffer",
            })
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
        let target = match self.state.draw_framebuffer {
            None if index == 0 => Some(ColorTarget::Canvas),
            None => None,
            Some(framebuffer) => self
                .framebuffers
                .get(framebuffer.0)
                .and_then(|entry| entry.attachments.get(&AttachmentSlot::Color(index)))
                .map(|texture| ColorTarget::Texture(*texture)),
        };
        let Some(view) = target.and_then(|target| self.target_view(target)) else {
            return;
        };

        let mut encoder = self.encoder("clear color");
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("clear color"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(clear_color_value(value)),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        self.submit(encoder);
    }

    fn clear_depth_stencil(&mut self, depth: f32, stencil: Option<u32>) {
        let Some(texture) = self.draw_depth_target() else {
            return;
        };
        let Some((format, view)) = self.textures.get(texture.0).and_then(|entry| {
            entry
                .storage
                .as_ref()
                .map(|(_, view)| (pipeline::wgpu_format(entry.format), view))
        }) else {
            return;
        };

        let mut encoder = self.encoder("clear depth");
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("clear depth"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(depth),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: has_stencil(format).then(|| wgpu::Operations {
                    load: stencil.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                    store: wgpu::StoreOp::Store,
                }),
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        self.submit(encoder);
    }

    fn clear_canvas(&mut self) {
        let mut encoder = self.encoder("clear canvas");
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("clear canvas"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.canvas.view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        self.submit(encoder);
    }

    fn blit_framebuffer(&mut self, source: Rect, destination: Rect, filter: FilterMode) {
        if filter != FilterMode::Nearest {
            tracing::debug!(?filter, "blits always sample nearest");
        }
        let source_target = match self.state.read_framebuffer {
            None => Some(ColorTarget::Canvas),
            Some(framebuffer) => self
                .framebuffers
                .get(framebuffer.0)
                .and_then(|entry| entry.attachments.get(&entry.read_buffer))
                .map(|texture| ColorTarget::Texture(*texture)),
        };
        let Some(source_target) = source_target else {
            tracing::warn!("blit ignored: read framebuffer has no readable attachment");
            return;
        };
        let (Some(source_view), Some(source_size)) = (
            self.target_view(source_target).cloned(),
            self.target_size(source_target),
        ) else {
            return;
        };
        if self.target_format(source_target).is_some_and(|format| format.is_depth_stencil_format()) {
            tracing::warn!("blit ignored: depth attachments cannot be blitted");
            return;
        }
        let normalized = [
            source.x as f32 / source_size.width.max(1) as f32,
            source.y as f32 / source_size.height.max(1) as f32,
            source.width as f32 / source_size.width.max(1) as f32,
            source.height as f32 / source_size.height.max(1) as f32,
        ];

        let targets: Vec<ColorTarget> = self.draw_color_targets().into_iter().flatten().collect();
        let mut encoder = self.encoder("blit");
        self.begin_scope();
        for target in targets {
            let (Some(view), Some(format), Some(size)) = (
                self.target_view(target).cloned(),
                self.target_format(target),
                self.target_size(target),
            ) else {
                continue;
            };
            let x = destination.x.min(size.width);
            let y = destination.y.min(size.height);
            let viewport = [
                x as f32,
                y as f32,
                destination.width.min(size.width - x).max(1) as f32,
                destination.height.min(size.height - y).max(1) as f32,
            ];
            self.blitter.encode(
                &self.device,
                &mut encoder,
                &source_view,
                normalized,
                &view,
                format,
                viewport,
            );
        }
        self.submit(encoder);
        self.end_scope_logged("blit");
    }

    fn resize_canvas(&mut self, size: Size) {
        if self.canvas.size != size {
            self.canvas.texture.destroy();
            self.canvas = create_canvas(&self.device, size);
        }
    }

    fn canvas_size(&self) -> Size {
        self.canvas.size
    }

    fn read_canvas(&mut self) -> Result<Vec<u8>, GpuError> {
        let size = self.canvas.size;
        let unpadded = size.width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("canvas readback"),
            size: u64::from(padded) * u64::from(size.height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.encoder("canvas readback");
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.canvas.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(size.height),
                },
            },
            extent(size),
        );
        self.submit(encoder);

        let slice = buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| GpuError::Readback(err.to_string()))?;
        receiver
            .recv()
            .map_err(|err| GpuError::Readback(err.to_string()))?
            .map_err(|err| GpuError::Readback(err.to_string()))?;

        let mapped = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((unpadded * size.height) as usize);
        for row in mapped.chunks(padded as usize) {
            pixels.extend_from_slice(&row[..unpadded as usize]);
        }
        drop(mapped);
        buffer.unmap();
        Ok(pixels)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffers.remove(framebuffer.0);
        self.state.forget_framebuffer(framebuffer);
    }

    fn create_buffer(&mut self) -> Result<BufferId, GpuError> {
        self.buffers
            .insert(None)
            .map(BufferId)
            .ok_or(GpuError::Allocation { resource: "buffer" })
    }

    fn buffer_data(&mut self, buffer: BufferId, data: &[u8]) {
        let Some(slot) = self.buffers.get_mut(buffer.0) else {
            tracing::warn!(buffer = buffer.0, "data for unknown buffer ignored");
            return;
        };
        let size = (data.len() as u64).div_ceil(16).max(1) * 16;
        if slot.as_ref().map(wgpu::Buffer::size) != Some(size) {
            if let Some(previous) = slot.take() {
                previous.destroy();
            }
            *slot = Some(self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("buffer data"),
                size,
                usage: wgpu::BufferUsages::UNIFORM
                    | wgpu::BufferUsages::VERTEX
                    | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
        }
        if let Some(gpu_buffer) = slot.as_ref() {
            let mut padded = data.to_vec();
            padded.resize(data.len().div_ceil(4) * 4, 0);
            self.queue.write_buffer(gpu_buffer, 0, &padded);
        }
    }

    fn bind_buffer_base(&mut self, index: u32, buffer: Option<BufferId>) {
        self.state.bind_buffer(index, buffer);
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        if let Some(Some(gpu_buffer)) = self.buffers.remove(buffer.0) {
            gpu_buffer.destroy();
        }
        self.state.forget_buffer(buffer);
    }

    fn create_vertex_array(&mut self) -> Result<VertexArrayId, GpuError> {
        self.vertex_arrays
            .insert(VertexArray::new())
            .map(VertexArrayId)
            .ok_or(GpuError::Allocation {
                resource: "vertex array",
            })
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
        self.shaders
            .insert(parsed)
            .map(ShaderId)
            .ok_or(GpuError::Allocation { resource: "shader" })
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

        self.begin_scope();
        let program = GpuProgram::new(&self.device, vertex, fragment);
        if let Some(log) = self.end_scope() {
            return Err(GpuError::Link { log });
        }
        self.programs
            .insert(program)
            .map(ProgramId)
            .ok_or(GpuError::Allocation { resource: "program" })
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
        self.pipelines.retain(|key, _| key.program != program);
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
        let color_targets = self.draw_color_targets();
        let depth_target = self.draw_depth_target();
        let Some(target_size) = color_targets
            .iter()
            .flatten()
            .find_map(|target| self.target_size(*target))
            .or_else(|| depth_target.and_then(|texture| self.target_size(ColorTarget::Texture(texture))))
        else {
            tracing::warn!("draw ignored: framebuffer has no attachments to draw into");
            return;
        };

        let vertex_inputs = self
            .state
            .vertex_array
            .and_then(|id| self.vertex_arrays.get(id.0))
            .cloned()
            .unwrap_or_default();
        if let Some(program) = self.programs.get(program_id.0) {
            if let Some((name, location)) = program
                .attributes
                .iter()
                .find(|(_, location)| !vertex_inputs.contains_key(location))
            {
                tracing::warn!(%name, location, "draw ignored: vertex input has no attribute");
                return;
            }
        }
        if let Some(location) = vertex_inputs.iter().find_map(|(location, binding)| {
            let filled = matches!(self.buffers.get(binding.buffer.0), Some(Some(_)));
            (!filled).then_some(*location)
        }) {
            tracing::warn!(location, "draw ignored: vertex buffer has no data");
            return;
        }

        let key = PipelineKey {
            program: program_id,
            color_targets: color_targets
                .iter()
                .map(|target| target.and_then(|target| self.target_format(target)))
                .collect(),
            depth: depth_target.and_then(|texture| {
                self.textures
                    .get(texture.0)
                    .map(|entry| pipeline::wgpu_format(entry.format))
            }),
            blend: self.state.blend,
            depth_test: self.state.depth_test,
            primitive,
            vertex_buffers: vertex_inputs
                .iter()
                .map(|(location, binding)| (*location, binding.layout))
                .collect(),
        };
        if !self.ensure_pipeline(&key) {
            return;
        }
        let (Some(program), Some(render_pipeline)) =
            (self.programs.get(program_id.0), self.pipelines.get(&key))
        else {
            return;
        };
        let vertex_buffers: Vec<&wgpu::Buffer> = vertex_inputs
            .values()
            .filter_map(|binding| self.buffers.get(binding.buffer.0).and_then(Option::as_ref))
            .collect();
        let bind_groups = match self.bind_groups(program) {
            Ok(groups) => groups,
            Err(reason) => {
                tracing::warn!(program = program_id.0, %reason, "draw ignored");
                return;
            }
        };

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = color_targets
            .iter()
            .map(|target| {
                let view = target.and_then(|target| self.target_view(target))?;
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let depth_attachment = depth_target
            .and_then(|texture| self.texture_view(texture))
            .map(|view| wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: key.depth.filter(|format| has_stencil(*format)).map(|_| {
                    wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }
                }),
            });
        let [x, y, width, height] = self.clamp_viewport(target_size);

        self.begin_scope();
        let mut encoder = self.encoder("draw");
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("draw"),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(render_pipeline);
            for (index, group) in bind_groups.iter().enumerate() {
                pass.set_bind_group(index as u32, group, &[]);
            }
            for (slot, buffer) in vertex_buffers.iter().enumerate() {
                pass.set_vertex_buffer(slot as u32, buffer.slice(..));
            }
            pass.set_viewport(x, y, width, height, 0.0, 1.0);
            pass.draw(first..first + count, 0..1);
        }
        self.submit(encoder);
        self.end_scope_logged("draw");
    }
}
