use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

use wgpu::util::DeviceExt;

use crate::shader::sources::FULLSCREEN_VERTEX;
use crate::types::{BlendMode, InternalFormat, Primitive, TextureFormat, VertexFormat};

use super::reflect::{self, BlockLayout, ParsedShader, ResourceKind, ResourceSlot};
use super::{ProgramId, VertexLayout};

/// Everything a render pipeline depends on besides the program's shaders.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct PipelineKey {
    pub program: ProgramId,
    /// Color target format per fragment output location.
    pub color_targets: Vec<Option<wgpu::TextureFormat>>,
    pub depth: Option<wgpu::TextureFormat>,
    pub blend: Option<BlendMode>,
    pub depth_test: bool,
    pub primitive: Primitive,
    /// One vertex buffer slot per attribute, ordered by shader location.
    pub vertex_buffers: Vec<(u32, VertexLayout)>,
}

/// A linked program: both stage modules plus the explicit layout derived from
/// their reflected bindings.
pub(crate) struct GpuProgram {
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
    pub slots: Vec<ResourceSlot>,
    pub blocks: Vec<BlockLayout>,
    pub block_bindings: BTreeMap<String, u32>,
    /// Vertex shader inputs as `(name, location)`.
    pub attributes: Vec<(String, u32)>,
    pub group_layouts: Vec<wgpu::BindGroupLayout>,
    layout: wgpu::PipelineLayout,
}

impl GpuProgram {
    pub fn new(device: &wgpu::Device, vertex: &ParsedShader, fragment: &ParsedShader) -> Self {
        let slots = reflect::program_slots(&vertex.module, &fragment.module);
        let mut blocks = reflect::uniform_blocks(&vertex.module);
        for block in reflect::uniform_blocks(&fragment.module) {
            if !blocks.iter().any(|known| known.name == block.name) {
                blocks.push(block);
            }
        }

        let group_count = slots.iter().map(|slot| slot.group + 1).max().unwrap_or(0);
        let group_layouts: Vec<wgpu::BindGroupLayout> = (0..group_count)
            .map(|group| {
                let entries: Vec<wgpu::BindGroupLayoutEntry> = slots
                    .iter()
                    .filter(|slot| slot.group == group)
                    .map(layout_entry)
                    .collect();
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("program bind group layout"),
                    entries: &entries,
                })
            })
            .collect();
        let layout_refs: Vec<&wgpu::BindGroupLayout> = group_layouts.iter().collect();
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("program pipeline layout"),
            bind_group_layouts: &layout_refs,
            push_constant_ranges: &[],
        });

        Self {
            vertex: create_module(device, vertex),
            fragment: create_module(device, fragment),
            slots,
            blocks,
            block_bindings: BTreeMap::new(),
            attributes: reflect::vertex_inputs(&vertex.module),
            group_layouts,
            layout,
        }
    }
}

fn create_module(device: &wgpu::Device, parsed: &ParsedShader) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(match parsed.stage {
            crate::types::ShaderStage::Vertex => "program vertex",
            crate::types::ShaderStage::Fragment => "program fragment",
        }),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Owned(parsed.source.clone()),
            stage: reflect::naga_stage(parsed.stage),
            defines: &[],
        },
    })
}

fn layout_entry(slot: &ResourceSlot) -> wgpu::BindGroupLayoutEntry {
    let ty = match slot.kind {
        ResourceKind::UniformBlock { .. } => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        ResourceKind::Texture => wgpu::BindingType::Texture {
            multisampled: false,
            view_dimension: wgpu::TextureViewDimension::D2,
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
        },
        ResourceKind::Sampler { comparison: true } => {
            wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison)
        }
        ResourceKind::Sampler { comparison: false } => {
            wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)
        }
    };
    wgpu::BindGroupLayoutEntry {
        binding: slot.binding,
        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
        ty,
        count: None,
    }
}

pub(crate) fn create_pipeline(
    device: &wgpu::Device,
    program: &GpuProgram,
    key: &PipelineKey,
) -> wgpu::RenderPipeline {
    let targets: Vec<Option<wgpu::ColorTargetState>> = key
        .color_targets
        .iter()
        .map(|format| {
            format.map(|format| wgpu::ColorTargetState {
                format,
                blend: key.blend.map(blend_state),
                write_mask: wgpu::ColorWrites::ALL,
            })
        })
        .collect();

    let attributes: Vec<[wgpu::VertexAttribute; 1]> = key
        .vertex_buffers
        .iter()
        .map(|(location, layout)| {
            [wgpu::VertexAttribute {
                format: vertex_format(layout.format),
                offset: u64::from(layout.offset),
                shader_location: *location,
            }]
        })
        .collect();
    let buffers: Vec<wgpu::VertexBufferLayout> = key
        .vertex_buffers
        .iter()
        .zip(&attributes)
        .map(|((_, layout), attribute)| wgpu::VertexBufferLayout {
            array_stride: u64::from(layout.effective_stride()),
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: attribute,
        })
        .collect();

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("program pipeline"),
        layout: Some(&program.layout),
        vertex: wgpu::VertexState {
            module: &program.vertex,
            entry_point: Some("main"),
            buffers: &buffers,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: topology(key.primitive),
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: key.depth.map(|format| wgpu::DepthStencilState {
            format,
            depth_write_enabled: key.depth_test,
            depth_compare: if key.depth_test {
                wgpu::CompareFunction::Less
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: &program.fragment,
            entry_point: Some("main"),
            targets: &targets,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview: None,
        cache: None,
    })
}

pub(crate) fn blend_state(mode: BlendMode) -> wgpu::BlendState {
    let component = match mode {
        BlendMode::Alpha => wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::SrcAlpha,
            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
            operation: wgpu::BlendOperation::Add,
        },
        BlendMode::Additive => wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::One,
            operation: wgpu::BlendOperation::Add,
        },
    };
    wgpu::BlendState {
        color: component,
        alpha: component,
    }
}

fn topology(primitive: Primitive) -> wgpu::PrimitiveTopology {
    match primitive {
        Primitive::Triangles => wgpu::PrimitiveTopology::TriangleList,
        Primitive::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        Primitive::Lines => wgpu::PrimitiveTopology::LineList,
        Primitive::Points => wgpu::PrimitiveTopology::PointList,
    }
}

fn vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float => wgpu::VertexFormat::Float32,
        VertexFormat::Vec2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Vec3 => wgpu::VertexFormat::Float32x3,
        VertexFormat::Vec4 => wgpu::VertexFormat::Float32x4,
    }
}

pub(crate) fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format.internal {
        InternalFormat::R8 => wgpu::TextureFormat::R8Unorm,
        InternalFormat::R32F => wgpu::TextureFormat::R32Float,
        InternalFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        InternalFormat::Rgba16F => wgpu::TextureFormat::Rgba16Float,
        InternalFormat::Rgba32F => wgpu::TextureFormat::Rgba32Float,
        InternalFormat::Depth32F => wgpu::TextureFormat::Depth32Float,
        InternalFormat::Depth24Stencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
    }
}

pub(crate) fn texture_usage(format: TextureFormat) -> wgpu::TextureUsages {
    if format.is_color() {
        wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST
    } else {
        wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING
    }
}

pub(crate) fn filter_mode(mode: crate::types::FilterMode) -> wgpu::FilterMode {
    match mode {
        crate::types::FilterMode::Nearest => wgpu::FilterMode::Nearest,
        crate::types::FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

const BLIT_FRAGMENT: &str = r#"#version 450
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 f_color;

layout(std140, set = 0, binding = 0) uniform BlitParams {
    vec4 u_sourceRect;
};
layout(set = 0, binding = 1) uniform texture2D u_source;
layout(set = 0, binding = 2) uniform sampler u_sourceSampler;

void main() {
    vec2 uv = u_sourceRect.xy + v_uv * u_sourceRect.zw;
    f_color = texture(sampler2D(u_source, u_sourceSampler), uv);
}
"#;

/// Framebuffer blits drawn as a fullscreen triangle into the destination
/// viewport. Works across formats and sizes; always samples nearest.
pub(crate) struct Blitter {
    layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
    sampler: wgpu::Sampler,
    pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
}

impl Blitter {
    pub fn new(device: &wgpu::Device) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blit layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("blit pipeline layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let vertex = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blit vertex"),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Borrowed(FULLSCREEN_VERTEX),
                stage: wgpu::naga::ShaderStage::Vertex,
                defines: &[],
            },
        });
        let fragment = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blit fragment"),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Borrowed(BLIT_FRAGMENT),
                stage: wgpu::naga::ShaderStage::Fragment,
                defines: &[],
            },
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("blit sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            layout,
            pipeline_layout,
            vertex,
            fragment,
            sampler,
            pipelines: HashMap::new(),
        }
    }

    fn pipeline(&mut self, device: &wgpu::Device, format: wgpu::TextureFormat) -> &wgpu::RenderPipeline {
        let Self {
            pipeline_layout,
            vertex,
            fragment,
            pipelines,
            ..
        } = self;
        pipelines.entry(format).or_insert_with(|| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("blit pipeline"),
                layout: Some(pipeline_layout),
                vertex: wgpu::VertexState {
                    module: vertex,
                    entry_point: Some("main"),
                    buffers: &[],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: fragment,
                    entry_point: Some("main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                multiview: None,
                cache: None,
            })
        })
    }

    /// Records a blit of `source_rect` (normalised `[x, y, w, h]`) of `source`
    /// into `viewport` of `target`.
    #[allow(clippy::too_many_arguments)]
    pub fn encode(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        source: &wgpu::TextureView,
        source_rect: [f32; 4],
        target: &wgpu::TextureView,
        target_format: wgpu::TextureFormat,
        viewport: [f32; 4],
    ) {
        let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("blit params"),
            contents: bytemuck::cast_slice(&source_rect),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("blit bind group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(source),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        let pipeline = self.pipeline(device, target_format);

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("blit pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        let [x, y, width, height] = viewport;
        pass.set_viewport(x, y, width, height, 0.0, 1.0);
        pass.draw(0..3, 0..1);
    }
}
