//! GLSL front end and uniform reflection shared by both backends.

use std::error::Error as StdError;

use wgpu::naga;

use crate::error::GpuError;
use crate::types::ShaderStage;

/// Type of a uniform block member as declared in GLSL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UniformType {
    Float,
    Int,
    UInt,
    Bool,
    Vec2,
    Vec3,
    Vec4,
    IVec2,
    IVec3,
    IVec4,
    UVec2,
    UVec3,
    UVec4,
    Mat2,
    Mat3,
    Mat4,
    Struct,
    Other,
}

/// Element count and std140 stride of an array member.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArrayInfo {
    pub length: Option<u32>,
    pub stride: u32,
}

/// One member of a uniform block, with its std140 byte offset.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockMember {
    pub name: String,
    pub ty: UniformType,
    pub offset: u32,
    pub array: Option<ArrayInfo>,
    /// Members of a struct-typed member (or of its array element), offsets
    /// relative to the start of one element.
    pub fields: Vec<BlockMember>,
}

impl BlockMember {
    /// Byte offset of element `index` of an array member; the member offset
    /// itself for non-arrays.
    pub fn element_offset(&self, index: u32) -> u32 {
        match self.array {
            Some(array) => self.offset + array.stride * index,
            None => self.offset,
        }
    }

    pub fn field(&self, name: &str) -> Option<&BlockMember> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// Reflected layout of one uniform block.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockLayout {
    pub name: String,
    /// Total data size in bytes.
    pub size: u32,
    pub members: Vec<BlockMember>,
}

impl BlockLayout {
    pub fn member(&self, name: &str) -> Option<&BlockMember> {
        self.members.iter().find(|member| member.name == name)
    }
}

/// A parsed and validated shader stage.
pub(crate) struct ParsedShader {
    pub stage: ShaderStage,
    pub source: String,
    pub module: naga::Module,
}

/// What a bound resource in a shader expects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ResourceKind {
    UniformBlock { block: String },
    Texture,
    Sampler { comparison: bool },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ResourceSlot {
    pub group: u32,
    pub binding: u32,
    pub kind: ResourceKind,
}

impl ResourceSlot {
    /// Texture unit a set 1 texture or sampler binding belongs to.
    pub fn texture_unit(&self) -> u32 {
        self.binding / 2
    }
}

pub(crate) fn naga_stage(stage: ShaderStage) -> naga::ShaderStage {
    match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    }
}

/// Parses and validates one GLSL stage. The error log uses the familiar
/// `ERROR: 0:<line>: <message>` shape so it reads like a driver info log.
pub(crate) fn parse_shader(stage: ShaderStage, source: &str) -> Result<ParsedShader, GpuError> {
    let mut frontend = naga::front::glsl::Frontend::default();
    let options = naga::front::glsl::Options::from(naga_stage(stage));
    let module = frontend
        .parse(&options, source)
        .map_err(|errors| GpuError::Compile {
            stage,
            log: errors
                .errors
                .iter()
                .map(|error| {
                    let location = error.meta.location(source);
                    format!("ERROR: 0:{}: {}", location.line_number, error.kind)
                })
                .collect::<Vec<_>>()
                .join("\n"),
        })?;

    validate(&module).map_err(|log| GpuError::Compile { stage, log })?;

    Ok(ParsedShader {
        stage,
        source: source.to_owned(),
        module,
    })
}

fn validate(module: &naga::Module) -> Result<naga::valid::ModuleInfo, String> {
    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator
        .validate(module)
        .map_err(|error| error_chain(error.as_inner()))
}

fn error_chain(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Checks that two stages can form a program.
pub(crate) fn check_link(vertex: &ParsedShader, fragment: &ParsedShader) -> Result<(), String> {
    if vertex.stage != ShaderStage::Vertex {
        return Err("first attached shader is not a vertex shader".to_owned());
    }
    if fragment.stage != ShaderStage::Fragment {
        return Err("second attached shader is not a fragment shader".to_owned());
    }
    for parsed in [vertex, fragment] {
        if !parsed
            .module
            .entry_points
            .iter()
            .any(|entry| entry.name == "main")
        {
            return Err(format!("{} shader has no `main` entry point", parsed.stage));
        }
    }

    let vertex_blocks = uniform_blocks(&vertex.module);
    for block in uniform_blocks(&fragment.module) {
        if let Some(other) = vertex_blocks.iter().find(|other| other.name == block.name) {
            if other.size != block.size {
                return Err(format!(
                    "uniform block `{}` is declared with different layouts in the two stages",
                    block.name
                ));
            }
        }
    }
    Ok(())
}

/// Layout of the uniform block named `name` (block name, or instance name).
pub(crate) fn block_layout(module: &naga::Module, name: &str) -> Option<BlockLayout> {
    uniform_blocks(module).into_iter().find(|block| block.name == name)
        .or_else(|| {
            module.global_variables.iter().find_map(|(_, global)| {
                if global.space != naga::AddressSpace::Uniform
                    || global.name.as_deref() != Some(name)
                {
                    return None;
                }
                block_from_type(module, global.ty, name)
            })
        })
}

/// Every uniform block declared by the module.
pub(crate) fn uniform_blocks(module: &naga::Module) -> Vec<BlockLayout> {
    module
        .global_variables
        .iter()
        .filter(|(_, global)| global.space == naga::AddressSpace::Uniform)
        .filter_map(|(_, global)| {
            let ty = &module.types[global.ty];
            let name = ty.name.clone().or_else(|| global.name.clone())?;
            block_from_type(module, global.ty, &name)
        })
        .collect()
}

/// User-defined inputs of the vertex entry point as `(name, location)`.
/// Built-ins such as `gl_VertexIndex` are skipped.
pub(crate) fn vertex_inputs(module: &naga::Module) -> Vec<(String, u32)> {
    module
        .entry_points
        .iter()
        .filter(|entry| entry.stage == naga::ShaderStage::Vertex)
        .flat_map(|entry| entry.function.arguments.iter())
        .filter_map(|argument| match (&argument.name, &argument.binding) {
            (Some(name), Some(naga::Binding::Location { location, .. })) => {
                Some((name.clone(), *location))
            }
            _ => None,
        })
        .collect()
}

fn block_from_type(
    module: &naga::Module,
    ty: naga::Handle<naga::Type>,
    name: &str,
) -> Option<BlockLayout> {
    match &module.types[ty].inner {
        naga::TypeInner::Struct { members, span } => Some(BlockLayout {
            name: name.to_owned(),
            // std140 rounds every block up to a vec4 boundary.
            size: span.next_multiple_of(16),
            members: reflect_members(module, members),
        }),
        _ => None,
    }
}

fn reflect_members(module: &naga::Module, members: &[naga::StructMember]) -> Vec<BlockMember> {
    members
        .iter()
        .map(|member| {
            let (element, array) = match &module.types[member.ty].inner {
                naga::TypeInner::Array { base, size, stride } => {
                    let length = match size {
                        naga::ArraySize::Constant(length) => Some(length.get()),
                        _ => None,
                    };
                    (
                        *base,
                        Some(ArrayInfo {
                            length,
                            stride: *stride,
                        }),
                    )
                }
                _ => (member.ty, None),
            };
            let fields = match &module.types[element].inner {
                naga::TypeInner::Struct { members, .. } => reflect_members(module, members),
                _ => Vec::new(),
            };
            BlockMember {
                name: member.name.clone().unwrap_or_default(),
                ty: uniform_type(&module.types[element].inner),
                offset: member.offset,
                array,
                fields,
            }
        })
        .collect()
}

fn uniform_type(inner: &naga::TypeInner) -> UniformType {
    use naga::{ScalarKind, TypeInner, VectorSize};

    match inner {
        TypeInner::Scalar(scalar) => match scalar.kind {
            ScalarKind::Float => UniformType::Float,
            ScalarKind::Sint => UniformType::Int,
            ScalarKind::Uint => UniformType::UInt,
            ScalarKind::Bool => UniformType::Bool,
            _ => UniformType::Other,
        },
        TypeInner::Vector { size, scalar } => match (scalar.kind, size) {
            (ScalarKind::Float, VectorSize::Bi) => UniformType::Vec2,
            (ScalarKind::Float, VectorSize::Tri) => UniformType::Vec3,
            (ScalarKind::Float, VectorSize::Quad) => UniformType::Vec4,
            (ScalarKind::Sint, VectorSize::Bi) => UniformType::IVec2,
            (ScalarKind::Sint, VectorSize::Tri) => UniformType::IVec3,
            (ScalarKind::Sint, VectorSize::Quad) => UniformType::IVec4,
            (ScalarKind::Uint, VectorSize::Bi) => UniformType::UVec2,
            (ScalarKind::Uint, VectorSize::Tri) => UniformType::UVec3,
            (ScalarKind::Uint, VectorSize::Quad) => UniformType::UVec4,
            _ => UniformType::Other,
        },
        TypeInner::Matrix { columns, rows, .. } => match (columns, rows) {
            (VectorSize::Bi, VectorSize::Bi) => UniformType::Mat2,
            (VectorSize::Tri, VectorSize::Tri) => UniformType::Mat3,
            (VectorSize::Quad, VectorSize::Quad) => UniformType::Mat4,
            _ => UniformType::Other,
        },
        TypeInner::Struct { .. } => UniformType::Struct,
        _ => UniformType::Other,
    }
}

/// Resource bindings declared by the module, ordered by (group, binding).
pub(crate) fn resource_slots(module: &naga::Module) -> Vec<ResourceSlot> {
    let mut slots: Vec<ResourceSlot> = module
        .global_variables
        .iter()
        .filter_map(|(_, global)| {
            let binding = global.binding.as_ref()?;
            let ty = &module.types[global.ty];
            let kind = match (&global.space, &ty.inner) {
                (naga::AddressSpace::Uniform, _) => ResourceKind::UniformBlock {
                    block: ty.name.clone().or_else(|| global.name.clone())?,
                },
                (naga::AddressSpace::Handle, naga::TypeInner::Image { .. }) => {
                    ResourceKind::Texture
                }
                (naga::AddressSpace::Handle, naga::TypeInner::Sampler { comparison }) => {
                    ResourceKind::Sampler {
                        comparison: *comparison,
                    }
                }
                _ => return None,
            };
            Some(ResourceSlot {
                group: binding.group,
                binding: binding.binding,
                kind,
            })
        })
        .collect();
    slots.sort_by_key(|slot| (slot.group, slot.binding));
    slots
}

/// Union of the resource slots of both stages of a program.
pub(crate) fn program_slots(vertex: &naga::Module, fragment: &naga::Module) -> Vec<ResourceSlot> {
    let mut slots = resource_slots(vertex);
    for slot in resource_slots(fragment) {
        if !slots
            .iter()
            .any(|known| known.group == slot.group && known.binding == slot.binding)
        {
            slots.push(slot);
        }
    }
    slots.sort_by_key(|slot| (slot.group, slot.binding));
    slots
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAGMENT: &str = r#"#version 450
struct Sphere {
    vec3 center;
    float radius;
    vec3 color;
};

layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 f_color;

layout(std140, set = 0, binding = 0) uniform Params {
    float u_alpha;
    vec3 u_eye;
    mat4 u_viewProjectionInverse;
    vec2 u_resolution;
};

layout(std140, set = 0, binding = 1) uniform Spheres {
    Sphere spheres[4];
};

layout(set = 1, binding = 0) uniform texture2D u_input;
layout(set = 1, binding = 1) uniform sampler u_inputSampler;

void main() {
    vec4 base = texture(sampler2D(u_input, u_inputSampler), v_uv);
    f_color = vec4(base.rgb + spheres[0].color * u_eye, u_alpha)
        + u_viewProjectionInverse[0] * u_resolution.x;
}
"#;

    #[test]
    fn reflects_std140_offsets_and_size() {
        let parsed = parse_shader(ShaderStage::Fragment, FRAGMENT).expect("valid shader");
        let params = block_layout(&parsed.module, "Params").expect("Params block");

        let offsets: Vec<(&str, u32)> = params
            .members
            .iter()
            .map(|member| (member.name.as_str(), member.offset))
            .collect();
        assert_eq!(
            offsets,
            vec![
                ("u_alpha", 0),
                ("u_eye", 16),
                ("u_viewProjectionInverse", 32),
                ("u_resolution", 96),
            ]
        );
        assert_eq!(params.size, 112);
        assert_eq!(
            params.member("u_viewProjectionInverse").map(|member| member.ty),
            Some(UniformType::Mat4)
        );
    }

    #[test]
    fn reflects_struct_arrays() {
        let parsed = parse_shader(ShaderStage::Fragment, FRAGMENT).expect("valid shader");
        let spheres = block_layout(&parsed.module, "Spheres").expect("Spheres block");
        let member = spheres.member("spheres").expect("spheres member");

        let array = member.array.expect("array member");
        assert_eq!(array.length, Some(4));
        assert_eq!(array.stride, 32);
        assert_eq!(member.element_offset(2), 64);
        assert_eq!(member.field("radius").map(|field| field.offset), Some(12));
        assert_eq!(member.field("color").map(|field| field.offset), Some(16));
        assert_eq!(spheres.size, 128);
    }

    #[test]
    fn lists_vertex_inputs_by_location() {
        let source = r#"#version 450
layout(location = 0) in vec3 a_position;
layout(location = 2) in vec2 a_uv;
layout(location = 0) out vec2 v_uv;

void main() {
    v_uv = a_uv;
    gl_Position = vec4(a_position, float(gl_VertexIndex) * 0.0 + 1.0);
}
"#;
        let parsed = parse_shader(ShaderStage::Vertex, source).expect("valid shader");
        let mut inputs = vertex_inputs(&parsed.module);
        inputs.sort_by_key(|(_, location)| *location);
        assert_eq!(
            inputs,
            vec![("a_position".to_owned(), 0), ("a_uv".to_owned(), 2)]
        );
    }

    #[test]
    fn single_scalar_block_is_padded_to_a_vec4() {
        let source = r#"#version 450
layout(location = 0) out vec4 f_color;

layout(std140, set = 0, binding = 0) uniform Fade {
    float u_alpha;
};

void main() {
    f_color = vec4(u_alpha);
}
"#;
        let parsed = parse_shader(ShaderStage::Fragment, source).expect("valid shader");
        let fade = block_layout(&parsed.module, "Fade").expect("Fade block");
        assert_eq!(fade.size, 16);
        assert_eq!(fade.member("u_alpha").map(|member| member.offset), Some(0));
    }

    #[test]
    fn lists_resource_slots_in_binding_order() {
        let parsed = parse_shader(ShaderStage::Fragment, FRAGMENT).expect("valid shader");
        let slots = resource_slots(&parsed.module);
        let summary: Vec<(u32, u32)> = slots
            .iter()
            .map(|slot| (slot.group, slot.binding))
            .collect();
        assert_eq!(summary, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
        assert_eq!(slots[2].kind, ResourceKind::Texture);
        assert_eq!(slots[3].texture_unit(), 0);
    }

    #[test]
    fn compile_errors_carry_line_numbers() {
        let source = "#version 450\nvoid main() {\n    undefined_call();\n}\n";
        match parse_shader(ShaderStage::Fragment, source) {
            Err(GpuError::Compile { stage, log }) => {
                assert_eq!(stage, ShaderStage::Fragment);
                assert!(log.contains("0:3:"), "{log}");
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("shader should not compile"),
        }
    }
}
