use std::any::Any;
use std::collections::BTreeMap;

use glam::Vec2;

use crate::camera::CameraMatrices;
use crate::change_set::ChangeSet;
use crate::error::{GpuError, PassError};
use crate::gpu::{BlockLayout, GraphicsContext, TextureId, UniformType};
use crate::halton::accumulation_weight;
use crate::resources::{AttachmentRef, FramebufferKey, Resources};
use crate::shader::sources::{ACCUMULATE_FRAGMENT, FULLSCREEN_FRAGMENT, FULLSCREEN_VERTEX};
use crate::shader::{Program, UniformBlock, UniformValue};
use crate::texture::Texture2D;
use crate::types::{FramebufferTarget, Primitive, Size};

use super::{
    Accumulating, CameraAware, FrameContext, Jitterable, RedrawPolicy, RenderPass, Sizeable,
};

crate::tracked_fields! {
    /// State of a [`FullscreenPass`] that can go stale between frames.
    pub enum FullscreenField {
        Target,
        DrawBuffers,
        Inputs,
        Program,
        Parameters,
        UniformBlocks,
        Size,
        Camera,
        Jitter,
        Frame,
    }
}

/// Where a texture unit of a pass samples from.
#[derive(Debug)]
pub enum TextureSource {
    /// Read handle of a framebuffer attachment, re-resolved every frame so
    /// ping-pong swaps are picked up.
    Attachment(AttachmentRef),
    /// A lookup texture owned and released by the pass.
    Owned(Texture2D),
}

impl TextureSource {
    fn read_handle(&self, resources: &Resources) -> Option<TextureId> {
        match self {
            TextureSource::Attachment(attachment) => resources.read_handle(*attachment),
            TextureSource::Owned(texture) => Some(texture.read_handle()),
        }
    }
}

type BlockInit = Box<dyn FnMut(&BlockLayout) -> Vec<u8>>;

struct BlockSpec {
    name: String,
    init: BlockInit,
}

/// Uniforms written automatically when the matching field is dirty.
mod uniform_names {
    pub const RESOLUTION: &str = "u_resolution";
    pub const EYE: &str = "u_eye";
    pub const VIEW: &str = "u_view";
    pub const PROJECTION: &str = "u_projection";
    pub const VIEW_PROJECTION: &str = "u_viewProjection";
    pub const VIEW_PROJECTION_INVERSE: &str = "u_viewProjectionInverse";
    pub const NDC_OFFSET: &str = "u_ndcOffset";
    pub const FRAME: &str = "u_frame";
    pub const ALPHA: &str = "u_alpha";
}

/// Runs a fragment shader over a whole target with one triangle.
///
/// The pass is assembled from capabilities instead of subclasses: it can
/// listen to size and camera changes, accept TAA jitter and act as the
/// accumulation pass. Each capability feeds a conventional uniform of the
/// `Params` block (`u_resolution`, `u_eye`, `u_viewProjectionInverse`,
/// `u_ndcOffset`, `u_frame`, `u_alpha`, ...) that the shader may or may not
/// declare.
pub struct FullscreenPass {
    name: String,
    changes: ChangeSet<FullscreenField>,
    policy: RedrawPolicy,
    program: Program,
    target: Option<FramebufferKey>,
    draw_buffers: Option<u32>,
    inputs: BTreeMap<u32, TextureSource>,
    parameters: BTreeMap<String, UniformValue>,
    block_specs: Vec<BlockSpec>,
    blocks: Vec<UniformBlock>,
    listens_to_size: bool,
    listens_to_camera: bool,
    jittered: bool,
    accumulating: bool,
    size: Size,
    camera: Option<CameraMatrices>,
    ndc_offset: Vec2,
    frame: u32,
}

impl FullscreenPass {
    pub fn new(name: impl Into<String>, fragment_source: impl Into<String>) -> Self {
        let name = name.into();
        let program = Program::new(name.clone(), FULLSCREEN_VERTEX, fragment_source);
        Self {
            name,
            changes: ChangeSet::new(),
            policy: RedrawPolicy::default(),
            program,
            target: None,
            draw_buffers: None,
            inputs: BTreeMap::new(),
            parameters: BTreeMap::new(),
            block_specs: Vec::new(),
            blocks: Vec::new(),
            listens_to_size: false,
            listens_to_camera: false,
            jittered: false,
            accumulating: false,
            size: Size::unit(),
            camera: None,
            ndc_offset: Vec2::ZERO,
            frame: 0,
        }
    }

    /// Copies texture unit 0 to the target.
    pub fn copy(name: impl Into<String>) -> Self {
        Self::new(name, FULLSCREEN_FRAGMENT)
    }

    /// Blends texture unit 0 into the target with weight `1 / (frame + 1)`.
    ///
    /// Requires alpha blending while it draws; the TAA renderer enables it
    /// from the pass hooks.
    pub fn accumulate(name: impl Into<String>) -> Self {
        let mut pass = Self::new(name, ACCUMULATE_FRAGMENT);
        pass.accumulating = true;
        pass
    }

    pub fn with_vertex_source(mut self, source: impl Into<String>) -> Self {
        self.program.set_vertex_source(source);
        self
    }

    pub fn with_target(mut self, target: FramebufferKey) -> Self {
        self.set_target(target);
        self
    }

    pub fn with_draw_buffers(mut self, mask: u32) -> Self {
        self.set_draw_buffers(mask);
        self
    }

    pub fn with_input(mut self, unit: u32, attachment: AttachmentRef) -> Self {
        self.set_input(unit, attachment);
        self
    }

    pub fn with_owned_texture(mut self, unit: u32, texture: Texture2D) -> Self {
        self.inputs.insert(unit, TextureSource::Owned(texture));
        self.changes.set(FullscreenField::Inputs);
        self
    }

    pub fn with_parameter(mut self, name: &str, value: impl Into<UniformValue>) -> Self {
        self.set_parameter(name, value);
        self
    }

    pub fn with_define(mut self, key: &str, value: impl ToString, suffix: &str) -> Self {
        self.set_define(key, value, suffix);
        self
    }

    /// Creates the uniform block `name` after every link, filling its CPU
    /// data with `init` from the reflected layout.
    pub fn with_uniform_block(
        mut self,
        name: impl Into<String>,
        init: impl FnMut(&BlockLayout) -> Vec<u8> + 'static,
    ) -> Self {
        self.block_specs.push(BlockSpec {
            name: name.into(),
            init: Box::new(init),
        });
        self.changes.set(FullscreenField::UniformBlocks);
        self
    }

    pub fn listening_to_size(mut self) -> Self {
        self.listens_to_size = true;
        self
    }

    pub fn listening_to_camera(mut self) -> Self {
        self.listens_to_camera = true;
        self
    }

    pub fn jittered(mut self) -> Self {
        self.jittered = true;
        self
    }

    pub fn with_redraw_policy(mut self, policy: RedrawPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn set_target(&mut self, target: FramebufferKey) {
        self.target = Some(target);
        self.changes.set(FullscreenField::Target);
    }

    /// Restricts output to the colour attachments in `mask` and points
    /// `COLOR_LOCATION` at the lowest of them.
    pub fn set_draw_buffers(&mut self, mask: u32) {
        self.draw_buffers = Some(mask);
        let location = if mask == 0 { 0 } else { mask.trailing_zeros() };
        self.set_define("COLOR_LOCATION", location, "");
        self.changes.set(FullscreenField::DrawBuffers);
    }

    pub fn set_input(&mut self, unit: u32, attachment: AttachmentRef) -> Option<TextureSource> {
        self.changes.set(FullscreenField::Inputs);
        self.inputs.insert(unit, TextureSource::Attachment(attachment))
    }

    /// Detaches unit `unit`. An owned texture is handed back for release.
    pub fn remove_input(&mut self, unit: u32) -> Option<TextureSource> {
        self.changes.set(FullscreenField::Inputs);
        self.inputs.remove(&unit)
    }

    pub fn set_parameter(&mut self, name: &str, value: impl Into<UniformValue>) {
        self.parameters.insert(name.to_owned(), value.into());
        self.changes.set(FullscreenField::Parameters);
    }

    pub fn parameter(&self, name: &str) -> Option<UniformValue> {
        self.parameters.get(name).copied()
    }

    pub fn set_define(&mut self, key: &str, value: impl ToString, suffix: &str) {
        if self.program.set_define(key, value, suffix) {
            self.changes.set(FullscreenField::Program);
        }
    }

    pub fn set_fragment_source(&mut self, source: impl Into<String>) {
        self.program.set_fragment_source(source);
        self.changes.set(FullscreenField::Program);
    }

    /// Edits the CPU data of a user uniform block; it is uploaded in the
    /// next setup. Returns false when the block does not exist (yet).
    pub fn update_uniform_block(&mut self, name: &str, edit: impl FnOnce(&mut UniformBlock)) -> bool {
        let Some(block) = self.blocks.iter_mut().find(|block| block.name() == name) else {
            return false;
        };
        edit(block);
        self.changes.set(FullscreenField::UniformBlocks);
        true
    }

    pub fn uniform_block(&self, name: &str) -> Option<&UniformBlock> {
        self.blocks.iter().find(|block| block.name() == name)
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn target(&self) -> Option<FramebufferKey> {
        self.target
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn camera(&self) -> Option<&CameraMatrices> {
        self.camera.as_ref()
    }

    pub fn ndc_offset(&self) -> Vec2 {
        self.ndc_offset
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn changes(&self) -> &ChangeSet<FullscreenField> {
        &self.changes
    }

    /// Compiles if needed. After a relink every uniform is rewritten.
    fn ensure_program(&mut self, gpu: &mut dyn GraphicsContext) -> Result<(), PassError> {
        let program_changed = self.changes.take(FullscreenField::Program);
        if !program_changed && !self.program.is_stale() {
            return Ok(());
        }
        let before = self.program.handle();
        match self.program.compile(gpu) {
            Ok(()) => {}
            Err(GpuError::Allocation { resource }) => {
                return Err(PassError::Gpu {
                    pass: self.name.clone(),
                    source: GpuError::Allocation { resource },
                });
            }
            Err(_) => {
                return Err(PassError::ProgramUnavailable {
                    pass: self.name.clone(),
                    program: self.program.name().to_owned(),
                });
            }
        }
        if self.program.handle() != before {
            self.rebuild_blocks(gpu).map_err(|source| PassError::Gpu {
                pass: self.name.clone(),
                source,
            })?;
            for field in [
                FullscreenField::Parameters,
                FullscreenField::Size,
                FullscreenField::Camera,
                FullscreenField::Jitter,
                FullscreenField::Frame,
                FullscreenField::UniformBlocks,
            ] {
                self.changes.set(field);
            }
        }
        Ok(())
    }

    fn rebuild_blocks(&mut self, gpu: &mut dyn GraphicsContext) -> Result<(), GpuError> {
        for block in self.blocks.drain(..) {
            block.release(gpu);
        }
        let Some(handle) = self.program.handle() else {
            return Ok(());
        };
        for spec in &mut self.block_specs {
            let Some(layout) = gpu.uniform_block_layout(handle, &spec.name) else {
                tracing::warn!(pass = %self.name, block = %spec.name, "uniform block not found in program");
                continue;
            };
            let data = (spec.init)(&layout);
            let block = self.program.create_uniform_block(gpu, &spec.name, Some(data))?;
            self.blocks.push(block);
        }
        Ok(())
    }

    fn write_counter(&mut self, name: &str, value: u32) {
        let ty = self
            .program
            .params()
            .and_then(|params| params.member(name))
            .map(|member| member.ty);
        match ty {
            Some(UniformType::UInt) => self.program.set_uniform(name, value),
            Some(UniformType::Int) => self.program.set_uniform(name, value as i32),
            Some(UniformType::Float) => self.program.set_uniform(name, value as f32),
            _ => false,
        };
    }

    fn apply_uniforms(&mut self) {
        if self.changes.take(FullscreenField::Parameters) {
            for (name, value) in &self.parameters {
                self.program.set_uniform(name, *value);
            }
        }
        if self.changes.take(FullscreenField::Size) {
            let resolution = Vec2::new(self.size.width as f32, self.size.height as f32);
            self.program.set_uniform(uniform_names::RESOLUTION, resolution);
        }
        if self.changes.take(FullscreenField::Camera) {
            if let Some(camera) = self.camera {
                self.program.set_uniform(uniform_names::EYE, camera.eye);
                self.program.set_uniform(uniform_names::VIEW, camera.view);
                self.program.set_uniform(uniform_names::PROJECTION, camera.projection);
                self.program
                    .set_uniform(uniform_names::VIEW_PROJECTION, camera.view_projection);
                self.program.set_uniform(
                    uniform_names::VIEW_PROJECTION_INVERSE,
                    camera.view_projection_inverse,
                );
            }
        }
        if self.changes.take(FullscreenField::Jitter) {
            self.program.set_uniform(uniform_names::NDC_OFFSET, self.ndc_offset);
        }
        if self.changes.take(FullscreenField::Frame) {
            self.write_counter(uniform_names::FRAME, self.frame);
            if self.accumulating {
                self.program
                    .set_uniform(uniform_names::ALPHA, accumulation_weight(self.frame));
            }
        }
    }
}

impl RenderPass for FullscreenPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self, gpu: &mut dyn GraphicsContext) -> Result<(), GpuError> {
        match self.program.compile(gpu) {
            Ok(()) => self.rebuild_blocks(gpu)?,
            // Already logged with the numbered source; setup retries.
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
        let framebuffer = ctx
            .resources
            .framebuffer(target)
            .ok_or_else(|| PassError::MissingFramebuffer {
                pass: self.name.clone(),
            })?;
        let viewport = framebuffer.size().full_rect();
        let mut textures = Vec::with_capacity(self.inputs.len());
        for (&unit, source) in &self.inputs {
            let handle = source
                .read_handle(ctx.resources)
                .ok_or_else(|| PassError::MissingInput {
                    pass: self.name.clone(),
                    unit,
                })?;
            textures.push((unit, handle));
        }

        self.ensure_program(ctx.gpu)?;
        self.changes.take(FullscreenField::Target);
        self.changes.take(FullscreenField::DrawBuffers);
        self.changes.take(FullscreenField::Inputs);
        self.apply_uniforms();

        if let Some(framebuffer) = ctx.resources.framebuffer(target) {
            framebuffer.bind(ctx.gpu, FramebufferTarget::Draw);
            if let Some(mask) = self.draw_buffers {
                framebuffer.draw_buffers(ctx.gpu, mask);
            }
        }
        ctx.gpu.viewport(viewport);
        self.program
            .bind(ctx.gpu)
            .map_err(|_| PassError::ProgramUnavailable {
                pass: self.name.clone(),
                program: self.program.name().to_owned(),
            })?;

        let upload_blocks = self.changes.take(FullscreenField::UniformBlocks);
        for block in &self.blocks {
            if upload_blocks {
                block.upload(ctx.gpu);
            }
            block.bind(ctx.gpu);
        }
        for (unit, handle) in textures {
            ctx.gpu.bind_texture(unit, Some(handle));
        }
        Ok(())
    }

    fn draw(&mut self, ctx: &mut FrameContext<'_>) {
        ctx.gpu.draw_arrays(Primitive::Triangles, 0, 3);
    }

    fn tear_down(&mut self, ctx: &mut FrameContext<'_>) {
        for &unit in self.inputs.keys() {
            ctx.gpu.bind_texture(unit, None);
        }
        for block in &self.blocks {
            block.unbind(ctx.gpu);
        }
        self.program.unbind(ctx.gpu);
        ctx.gpu.bind_framebuffer(FramebufferTarget::Draw, None);
    }

    fn release(&mut self, gpu: &mut dyn GraphicsContext) {
        for block in self.blocks.drain(..) {
            block.release(gpu);
        }
        for source in std::mem::take(&mut self.inputs).into_values() {
            if let TextureSource::Owned(texture) = source {
                texture.release(gpu);
            }
        }
        self.program.release(gpu);
    }

    fn as_sizeable(&mut self) -> Option<&mut dyn Sizeable> {
        if self.listens_to_size {
            Some(self)
        } else {
            None
        }
    }

    fn as_camera_aware(&mut self) -> Option<&mut dyn CameraAware> {
        if self.listens_to_camera {
            Some(self)
        } else {
            None
        }
    }

    fn as_jitterable(&mut self) -> Option<&mut dyn Jitterable> {
        if self.jittered {
            Some(self)
        } else {
            None
        }
    }

    fn as_accumulating(&mut self) -> Option<&mut dyn Accumulating> {
        if self.accumulating {
            Some(self)
        } else {
            None
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Sizeable for FullscreenPass {
    fn size_changed(&mut self, size: Size) {
        self.size = size;
        self.changes.set(FullscreenField::Size);
    }
}

impl CameraAware for FullscreenPass {
    fn camera_changed(&mut self, matrices: &CameraMatrices) {
        self.camera = Some(*matrices);
        self.changes.set(FullscreenField::Camera);
    }
}

impl Jitterable for FullscreenPass {
    fn set_ndc_offset(&mut self, offset: Vec2) {
        self.ndc_offset = offset;
        self.changes.set(FullscreenField::Jitter);
    }
}

impl Accumulating for FullscreenPass {
    fn set_frame(&mut self, frame: u32) {
        self.frame = frame;
        self.changes.set(FullscreenField::Frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framebuffer::{AttachmentSpec, Framebuffer};
    use crate::gpu::HeadlessContext;
    use crate::types::TextureFormat;

    const GRADIENT: &str = r"#version 450
#define COLOR_LOCATION 0
layout(location = 0) in vec2 v_uv;
layout(location = COLOR_LOCATION) out vec4 f_color;

layout(std140, set = 0, binding = 0) uniform Params {
    vec2 u_resolution;
    vec2 u_ndcOffset;
    vec3 u_eye;
    uint u_frame;
    float u_gain;
};

void main() {
    f_color = vec4(v_uv * u_resolution * u_gain, float(u_frame), 1.0);
}
";

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

        fn run(&mut self, pass: &mut FullscreenPass) -> Result<(), PassError> {
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
    fn first_frame_consumes_every_field() {
        let mut fixture = Fixture::new();
        let mut pass = FullscreenPass::new("gradient", GRADIENT)
            .with_target(fixture.target)
            .with_parameter("u_gain", 2.0)
            .listening_to_size();
        pass.initialize(&mut fixture.gpu).expect("initialize");
        assert!(pass.needs_redraw());

        pass.as_sizeable()
            .expect("size listener")
            .size_changed(Size::new(4, 4));
        fixture.run(&mut pass).expect("frame");
        assert!(!pass.changes_pending());

        let draw = fixture.gpu.draw_calls().last().expect("draw").clone();
        let params = pass.program().params().expect("params");
        let gain = params.member("u_gain").expect("u_gain").offset;
        let resolution = params.member("u_resolution").expect("u_resolution").offset;
        assert_eq!(draw.uniform_f32("Params", gain), Some(2.0));
        assert_eq!(draw.uniform_f32("Params", resolution), Some(4.0));
        assert_eq!(draw.framebuffer, pass_target_handle(&fixture));
        assert_eq!(draw.count, 3);
        assert_eq!(fixture.gpu.bound_program(), None);
        assert_eq!(fixture.gpu.bound_framebuffer(FramebufferTarget::Draw), None);
    }

    fn pass_target_handle(fixture: &Fixture) -> Option<crate::gpu::FramebufferId> {
        fixture
            .resources
            .framebuffer(fixture.target)
            .and_then(Framebuffer::handle)
    }

    #[test]
    fn setters_mark_only_their_field() {
        let mut fixture = Fixture::new();
        let mut pass = FullscreenPass::new("gradient", GRADIENT).with_target(fixture.target);
        pass.initialize(&mut fixture.gpu).expect("initialize");
        fixture.run(&mut pass).expect("frame");

        pass.set_parameter("u_gain", 0.5);
        let dirty: Vec<_> = pass.changes().dirty_fields().collect();
        assert_eq!(dirty, vec![FullscreenField::Parameters]);

        pass.set_ndc_offset(Vec2::new(0.25, -0.25));
        assert!(pass.changes().get(FullscreenField::Jitter));
        fixture.run(&mut pass).expect("frame");
        assert!(!pass.changes_pending());
    }

    #[test]
    fn capabilities_are_opt_in() {
        let mut pass = FullscreenPass::copy("copy");
        assert!(pass.as_sizeable().is_none());
        assert!(pass.as_camera_aware().is_none());
        assert!(pass.as_jitterable().is_none());
        assert!(pass.as_accumulating().is_none());

        let mut pass = FullscreenPass::accumulate("taa").listening_to_camera().jittered();
        assert!(pass.as_camera_aware().is_some());
        assert!(pass.as_jitterable().is_some());
        assert!(pass.as_accumulating().is_some());
    }

    #[test]
    fn missing_target_fails_before_binding_anything() {
        let mut fixture = Fixture::new();
        let mut pass = FullscreenPass::copy("copy");
        pass.initialize(&mut fixture.gpu).expect("initialize");
        assert!(matches!(
            fixture.run(&mut pass),
            Err(PassError::MissingTarget { .. })
        ));
        assert_eq!(fixture.gpu.bound_program(), None);
        assert_eq!(fixture.gpu.draw_calls().count(), 0);
    }

    #[test]
    fn missing_input_is_reported_per_unit() {
        let mut fixture = Fixture::new();
        let dangling = AttachmentRef::new(fixture.target, 5);
        let mut pass = FullscreenPass::copy("copy")
            .with_target(fixture.target)
            .with_input(0, dangling);
        pass.initialize(&mut fixture.gpu).expect("initialize");
        assert!(matches!(
            fixture.run(&mut pass),
            Err(PassError::MissingInput { unit: 0, .. })
        ));
    }

    #[test]
    fn broken_shader_only_fails_setup() {
        let mut fixture = Fixture::new();
        let mut pass =
            FullscreenPass::new("broken", "void main() { undefined(); }").with_target(fixture.target);
        pass.initialize(&mut fixture.gpu).expect("compile errors are not fatal");
        assert!(matches!(
            fixture.run(&mut pass),
            Err(PassError::ProgramUnavailable { .. })
        ));
        assert_eq!(fixture.gpu.bound_framebuffer(FramebufferTarget::Draw), None);

        pass.set_fragment_source(FULLSCREEN_FRAGMENT);
        pass.set_input(0, AttachmentRef::first(fixture.target));
        fixture.run(&mut pass).expect("fixed shader draws");
    }

    #[test]
    fn accumulate_writes_running_mean_weight() {
        let mut fixture = Fixture::new();
        let mut pass = FullscreenPass::accumulate("taa")
            .with_target(fixture.target)
            .with_input(0, AttachmentRef::first(fixture.target));
        pass.initialize(&mut fixture.gpu).expect("initialize");

        for frame in 0..4 {
            pass.set_frame(frame);
            fixture.run(&mut pass).expect("frame");
            let draw = fixture.gpu.draw_calls().last().expect("draw").clone();
            assert_eq!(
                draw.uniform_f32("Params", 0),
                Some(1.0 / (frame as f32 + 1.0))
            );
        }
    }

    #[test]
    fn owned_textures_are_bound_and_released() {
        let mut fixture = Fixture::new();
        let mut noise = Texture2D::new(
            &mut fixture.gpu,
            TextureFormat::R,
            crate::types::BufferMode::Single,
        )
        .expect("texture");
        noise.set_data(&mut fixture.gpu, Size::new(2, 2), &[0, 64, 128, 255]);
        let handle = noise.read_handle();

        let mut pass = FullscreenPass::copy("lookup")
            .with_target(fixture.target)
            .with_owned_texture(0, noise);
        pass.initialize(&mut fixture.gpu).expect("initialize");
        fixture.run(&mut pass).expect("frame");
        let draw = fixture.gpu.draw_calls().last().expect("draw").clone();
        assert_eq!(draw.textures.get(&0), Some(&handle));

        let live = fixture.gpu.live_textures();
        pass.release(&mut fixture.gpu);
        assert_eq!(fixture.gpu.live_textures(), live - 1);
        assert_eq!(fixture.gpu.live_programs(), 0);
    }

    #[test]
    fn user_uniform_blocks_follow_their_layout() {
        const SPHERES: &str = r"#version 450
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 f_color;
layout(std140, set = 0, binding = 1) uniform Scene {
    vec4 u_tint;
    float u_scale;
};
void main() { f_color = u_tint * u_scale; }
";
        let mut fixture = Fixture::new();
        let mut pass = FullscreenPass::new("scene", SPHERES)
            .with_target(fixture.target)
            .with_uniform_block("Scene", |layout| {
                let mut data = vec![0u8; layout.size as usize];
                if let Some(scale) = layout.member("u_scale") {
                    let offset = scale.offset as usize;
                    data[offset..offset + 4].copy_from_slice(&3.0f32.to_le_bytes());
                }
                data
            });
        pass.initialize(&mut fixture.gpu).expect("initialize");
        fixture.run(&mut pass).expect("frame");

        let scale = pass
            .uniform_block("Scene")
            .and_then(|block| block.member("u_scale"))
            .map(|member| member.offset)
            .expect("u_scale");
        let draw = fixture.gpu.draw_calls().last().expect("draw").clone();
        assert_eq!(draw.uniform_f32("Scene", scale), Some(3.0));

        assert!(pass.update_uniform_block("Scene", |block| {
            block.set("u_scale", 5.0);
        }));
        fixture.run(&mut pass).expect("frame");
        let draw = fixture.gpu.draw_calls().last().expect("draw").clone();
        assert_eq!(draw.uniform_f32("Scene", scale), Some(5.0));
    }
}
