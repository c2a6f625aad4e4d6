use std::any::Any;

use glam::{Mat4, Vec2};

use crate::camera::CameraMatrices;
use crate::change_set::ChangeSet;
use crate::error::{GpuError, PassError};
use crate::gpu::{BufferId, GraphicsContext, VertexArrayId, VertexLayout};
use crate::resources::FramebufferKey;
use crate::shader::Program;
use crate::types::{FramebufferTarget, Primitive, VertexFormat};

use super::{CameraAware, FrameContext, Jitterable, RedrawPolicy, RenderPass};

crate::tracked_fields! {
    /// State of a [`MeshPass`] that can go stale between frames.
    pub enum MeshField {
        Target,
        Program,
        Mesh,
        Model,
        Camera,
        Jitter,
    }
}

/// One per-vertex input of a mesh, stored tightly packed.
struct MeshAttribute {
    name: String,
    format: VertexFormat,
    data: Vec<f32>,
    buffer: Option<BufferId>,
}

impl MeshAttribute {
    fn vertex_count(&self) -> u32 {
        (self.data.len() / self.format.components() as usize) as u32
    }
}

mod uniform_names {
    pub const MODEL: &str = "u_model";
    pub const VIEW_PROJECTION: &str = "u_viewProjection";
    pub const EYE: &str = "u_eye";
    pub const NDC_OFFSET: &str = "u_ndcOffset";
}

/// Draws a triangle list from per-vertex attribute arrays.
///
/// Each attribute is matched by name to an input of the vertex shader and
/// fed from its own buffer through a vertex array. The pass always listens to
/// the camera and writes `u_model`, `u_viewProjection`, `u_eye` and
/// `u_ndcOffset` of the `Params` block when the shader declares them.
pub struct MeshPass {
    name: String,
    changes: ChangeSet<MeshField>,
    policy: RedrawPolicy,
    program: Program,
    target: Option<FramebufferKey>,
    vertex_array: Option<VertexArrayId>,
    attributes: Vec<MeshAttribute>,
    vertex_count: u32,
    depth_test: bool,
    model: Mat4,
    camera: Option<CameraMatrices>,
    ndc_offset: Vec2,
}

impl MeshPass {
    pub fn new(
        name: impl Into<String>,
        vertex_source: impl Into<String>,
        fragment_source: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let program = Program::new(name.clone(), vertex_source, fragment_source);
        Self {
            name,
            changes: ChangeSet::new(),
            policy: RedrawPolicy::default(),
            program,
            target: None,
            vertex_array: None,
            attributes: Vec::new(),
            vertex_count: 0,
            depth_test: false,
            model: Mat4::IDENTITY,
            camera: None,
            ndc_offset: Vec2::ZERO,
        }
    }

    pub fn with_target(mut self, target: FramebufferKey) -> Self {
        self.set_target(target);
        self
    }

    pub fn with_attribute(mut self, name: &str, format: VertexFormat, data: Vec<f32>) -> Self {
        self.set_attribute(name, format, data);
        self
    }

    pub fn with_model(mut self, model: Mat4) -> Self {
        self.set_model(model);
        self
    }

    pub fn with_depth_test(mut self) -> Self {
        self.depth_test = true;
        self
    }

    pub fn with_redraw_policy(mut self, policy: RedrawPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn set_target(&mut self, target: FramebufferKey) {
        self.target = Some(target);
        self.changes.set(MeshField::Target);
    }

    /// Replaces the data of attribute `name`, adding it if new. The vertex
    /// count is that of the shortest attribute.
    pub fn set_attribute(&mut self, name: &str, format: VertexFormat, data: Vec<f32>) {
        match self.attributes.iter_mut().find(|attribute| attribute.name == name) {
            Some(attribute) => {
                attribute.format = format;
                attribute.data = data;
            }
            None => self.attributes.push(MeshAttribute {
                name: name.to_owned(),
                format,
                data,
                buffer: None,
            }),
        }
        self.changes.set(MeshField::Mesh);
    }

    pub fn set_model(&mut self, model: Mat4) {
        self.model = model;
        self.changes.set(MeshField::Model);
    }

    pub fn set_vertex_source(&mut self, source: impl Into<String>) {
        self.program.set_vertex_source(source);
        self.changes.set(MeshField::Program);
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn vertex_array(&self) -> Option<VertexArrayId> {
        self.vertex_array
    }

    pub fn camera(&self) -> Option<&CameraMatrices> {
        self.camera.as_ref()
    }

    pub fn changes(&self) -> &ChangeSet<MeshField> {
        &self.changes
    }

    fn ensure_program(&mut self, gpu: &mut dyn GraphicsContext) -> Result<(), PassError> {
        let program_changed = self.changes.take(MeshField::Program);
        if !program_changed && !self.program.is_stale() {
            return Ok(());
        }
        let before = self.program.handle();
        self.program.compile(gpu).map_err(|err| match err {
            GpuError::Allocation { resource } => PassError::Gpu {
                pass: self.name.clone(),
                source: GpuError::Allocation { resource },
            },
            _ => PassError::ProgramUnavailable {
                pass: self.name.clone(),
                program: self.program.name().to_owned(),
            },
        })?;
        if self.program.handle() != before {
            // Attribute locations and every uniform belong to the old link.
            for field in [
                MeshField::Mesh,
                MeshField::Model,
                MeshField::Camera,
                MeshField::Jitter,
            ] {
                self.changes.set(field);
            }
        }
        Ok(())
    }

    /// Uploads every attribute and points the vertex array at it.
    fn upload_mesh(&mut self, gpu: &mut dyn GraphicsContext) -> Result<(), GpuError> {
        let (Some(vertex_array), Some(program)) = (self.vertex_array, self.program.handle())
        else {
            return Ok(());
        };
        gpu.bind_vertex_array(Some(vertex_array));
        for attribute in &mut self.attributes {
            let buffer = match attribute.buffer {
                Some(buffer) => buffer,
                None => {
                    let buffer = gpu.create_buffer()?;
                    attribute.buffer = Some(buffer);
                    buffer
                }
            };
            gpu.buffer_data(buffer, bytemuck::cast_slice(&attribute.data));
            match gpu.attribute_location(program, &attribute.name) {
                Some(location) => {
                    gpu.vertex_attribute(location, buffer, VertexLayout::packed(attribute.format));
                }
                None => tracing::debug!(
                    pass = %self.name,
                    attribute = %attribute.name,
                    "attribute not read by the vertex shader"
                ),
            }
        }
        gpu.bind_vertex_array(None);
        self.vertex_count = self
            .attributes
            .iter()
            .map(MeshAttribute::vertex_count)
            .min()
            .unwrap_or(0);
        Ok(())
    }

    fn apply_uniforms(&mut self) {
        if self.changes.take(MeshField::Model) {
            self.program.set_uniform(uniform_names::MODEL, self.model);
        }
        if self.changes.take(MeshField::Camera) {
            if let Some(camera) = self.camera {
                self.program
                    .set_uniform(uniform_names::VIEW_PROJECTION, camera.view_projection);
                self.program.set_uniform(uniform_names::EYE, camera.eye);
            }
        }
        if self.changes.take(MeshField::Jitter) {
            self.program
                .set_uniform(uniform_names::NDC_OFFSET, self.ndc_offset);
        }
    }
}

impl RenderPass for MeshPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self, gpu: &mut dyn GraphicsContext) -> Result<(), GpuError> {
        self.vertex_array = Some(gpu.create_vertex_array()?);
        match self.program.compile(gpu) {
            Ok(()) => {}
            Err(GpuError::Compile { .. } | GpuError::Link { .. }) => {}
            Err(err) => return Err(err),
        }
        self.changes.set_all();
        Ok(())
    }

    fn changes_pending(&self) -> bool {
        self.changes.any()
    }

    fn redraw_policy(&self) -> RedrawPolicy {
        self.policy
    }

    fn setup(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), PassError> {
        let target = self.target.ok_or_else(|| PassError::MissingTarget {
            pass: self.name.clone(),
        })?;
        let viewport = ctx
            .resources
            .framebuffer(target)
            .map(|framebuffer| framebuffer.size().full_rect())
            .ok_or_else(|| PassError::MissingFramebuffer {
                pass: self.name.clone(),
            })?;

        self.ensure_program(ctx.gpu)?;
        if self.changes.take(MeshField::Mesh) {
            self.upload_mesh(ctx.gpu).map_err(|source| PassError::Gpu {
                pass: self.name.clone(),
                source,
            })?;
        }
        self.changes.take(MeshField::Target);
        self.apply_uniforms();

        if let Some(framebuffer) = ctx.resources.framebuffer(target) {
            framebuffer.bind(ctx.gpu, FramebufferTarget::Draw);
        }
        ctx.gpu.viewport(viewport);
        self.program
            .bind(ctx.gpu)
            .map_err(|_| PassError::ProgramUnavailable {
                pass: self.name.clone(),
                program: self.program.name().to_owned(),
            })?;
        ctx.gpu.set_depth_test(self.depth_test);
        ctx.gpu.bind_vertex_array(self.vertex_array);
        Ok(())
    }

    fn draw(&mut self, ctx: &mut FrameContext<'_>) {
        if self.vertex_count > 0 {
            ctx.gpu.draw_arrays(Primitive::Triangles, 0, self.vertex_count);
        }
    }

    fn tear_down(&mut self, ctx: &mut FrameContext<'_>) {
        ctx.gpu.bind_vertex_array(None);
        if self.depth_test {
            ctx.gpu.set_depth_test(false);
        }
        self.program.unbind(ctx.gpu);
        ctx.gpu.bind_framebuffer(FramebufferTarget::Draw, None);
    }

    fn release(&mut self, gpu: &mut dyn GraphicsContext) {
        for attribute in &mut self.attributes {
            if let Some(buffer) = attribute.buffer.take() {
                gpu.delete_buffer(buffer);
            }
        }
        if let Some(vertex_array) = self.vertex_array.take() {
            gpu.delete_vertex_array(vertex_array);
        }
        self.program.release(gpu);
    }

    fn as_camera_aware(&mut self) -> Option<&mut dyn CameraAware> {
        Some(self)
    }

    fn as_jitterable(&mut self) -> Option<&mut dyn Jitterable> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl CameraAware for MeshPass {
    fn camera_changed(&mut self, matrices: &CameraMatrices) {
        self.camera = Some(*matrices);
        self.changes.set(MeshField::Camera);
    }
}

impl Jitterable for MeshPass {
    fn set_ndc_offset(&mut self, offset: Vec2) {
        self.ndc_offset = offset;
        self.changes.set(MeshField::Jitter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framebuffer::{AttachmentSpec, Framebuffer};
    use crate::gpu::HeadlessContext;
    use crate::resources::Resources;
    use crate::types::{Size, TextureFormat};
    use glam::Vec3;

    const VERTEX: &str = r"#version 450
layout(location = 0) in vec3 a_position;
layout(location = 1) in vec3 a_normal;
layout(location = 0) out vec3 v_normal;

layout(std140, set = 0, binding = 0) uniform Params {
    mat4 u_model;
    mat4 u_viewProjection;
    vec3 u_eye;
};

void main() {
    v_normal = mat3(u_model) * a_normal;
    gl_Position = u_viewProjection * u_model * vec4(a_position, 1.0);
}
";

    const FRAGMENT: &str = r"#version 450
layout(location = 0) in vec3 v_normal;
layout(location = 0) out vec4 f_color;

void main() {
    f_color = vec4(normalize(v_normal) * 0.5 + 0.5, 1.0);
}
";

    fn triangle() -> MeshPass {
        MeshPass::new("mesh", VERTEX, FRAGMENT)
            .with_attribute(
                "a_position",
                VertexFormat::Vec3,
                vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            )
            .with_attribute(
                "a_normal",
                VertexFormat::Vec3,
                vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
            )
    }

    struct Fixture {
        gpu: HeadlessContext,
        resources: Resources,
        target: FramebufferKey,
    }

    impl Fixture {
        fn new() -> Self {
            let mut gpu = HeadlessContext::new(Size::new(4, 4));
            let mut resources = Resources::default();
            let mut framebuffer = Framebuffer::new(
                &mut gpu,
                "target",
                &[AttachmentSpec::single(TextureFormat::RGBA)],
            )
            .expect("framebuffer");
            framebuffer.set_size(&mut gpu, Size::new(4, 4));
            let target = resources.insert(framebuffer);
            Self {
                gpu,
                resources,
                target,
            }
        }

        fn run(&mut self, pass: &mut MeshPass) -> Result<(), PassError> {
            let mut ctx = FrameContext {
                gpu: &mut self.gpu,
                resources: &mut self.resources,
            };
            pass.setup(&mut ctx)?;
            pass.draw(&mut ctx);
            pass.tear_down(&mut ctx);
            Ok(())
        }
    }

    #[test]
    fn draws_the_uploaded_vertices() {
        let mut fixture = Fixture::new();
        let mut pass = triangle().with_target(fixture.target);
        pass.initialize(&mut fixture.gpu).expect("initialize");
        fixture.run(&mut pass).expect("frame");
        assert!(!pass.changes_pending());
        assert_eq!(pass.vertex_count(), 3);

        let call = fixture.gpu.draw_calls().last().expect("draw").clone();
        assert_eq!((call.first, call.count), (0, 3));
        assert_eq!(call.vertex_inputs.len(), 2);
        let position = call.vertex_inputs.get(&0).expect("position input");
        assert_eq!(fixture.gpu.vertex_values(position, 1), Some(vec![1.0, 0.0, 0.0]));
        let normal = call.vertex_inputs.get(&1).expect("normal input");
        assert_eq!(fixture.gpu.vertex_values(normal, 2), Some(vec![0.0, 0.0, 1.0]));

        // Vertex array is unbound again after the pass.
        let program = pass.program().handle().expect("linked");
        fixture.gpu.use_program(Some(program));
        fixture.gpu.draw_arrays(Primitive::Triangles, 0, 3);
        assert_eq!(fixture.gpu.draw_calls().count(), 1);
    }

    #[test]
    fn camera_and_model_reach_the_params_block() {
        let mut fixture = Fixture::new();
        let model = Mat4::from_translation(Vec3::new(0.0, 2.0, 0.0));
        let mut pass = triangle().with_target(fixture.target).with_model(model);
        pass.initialize(&mut fixture.gpu).expect("initialize");
        let mut camera = crate::camera::Camera::default();
        camera.set_eye(Vec3::new(1.0, 2.0, 3.0));
        pass.as_camera_aware()
            .expect("camera listener")
            .camera_changed(&camera.matrices());
        fixture.run(&mut pass).expect("frame");

        let call = fixture.gpu.draw_calls().last().expect("draw").clone();
        let params = pass.program().params().expect("params");
        let translation_y = params.member("u_model").expect("u_model").offset + 13 * 4;
        assert_eq!(call.uniform_f32("Params", translation_y), Some(2.0));
        let eye = params.member("u_eye").expect("u_eye").offset;
        assert_eq!(call.uniform_f32("Params", eye), Some(1.0));
    }

    #[test]
    fn replacing_an_attribute_reuploads_and_recounts() {
        let mut fixture = Fixture::new();
        let mut pass = triangle().with_target(fixture.target);
        pass.initialize(&mut fixture.gpu).expect("initialize");
        fixture.run(&mut pass).expect("frame");
        let live = fixture.gpu.live_buffers();

        pass.set_attribute(
            "a_position",
            VertexFormat::Vec3,
            vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0],
        );
        assert!(pass.needs_redraw());
        fixture.run(&mut pass).expect("frame");
        assert_eq!(pass.vertex_count(), 2);
        assert_eq!(fixture.gpu.live_buffers(), live);
        let call = fixture.gpu.draw_calls().last().expect("draw");
        assert_eq!(call.count, 2);
    }

    #[test]
    fn missing_shader_input_skips_the_draw() {
        let mut fixture = Fixture::new();
        let mut pass = MeshPass::new("mesh", VERTEX, FRAGMENT)
            .with_target(fixture.target)
            .with_attribute(
                "a_position",
                VertexFormat::Vec3,
                vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            );
        pass.initialize(&mut fixture.gpu).expect("initialize");
        fixture.run(&mut pass).expect("frame");
        assert_eq!(fixture.gpu.draw_calls().count(), 0);
    }

    #[test]
    fn release_frees_buffers_and_vertex_array() {
        let mut fixture = Fixture::new();
        let mut pass = triangle().with_target(fixture.target);
        pass.initialize(&mut fixture.gpu).expect("initialize");
        fixture.run(&mut pass).expect("frame");
        assert_eq!(fixture.gpu.live_vertex_arrays(), 1);

        pass.release(&mut fixture.gpu);
        assert_eq!(fixture.gpu.live_vertex_arrays(), 0);
        assert_eq!(fixture.gpu.live_programs(), 0);
        assert!(pass.vertex_array().is_none());
    }
}
