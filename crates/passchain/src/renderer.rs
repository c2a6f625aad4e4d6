use crate::camera::Camera;
use crate::change_set::ChangeSet;
use crate::error::GpuError;
use crate::framebuffer::{AttachmentSpec, Framebuffer};
use crate::gpu::GraphicsContext;
use crate::pass::{BlitPass, FrameContext, PassEntry, PassId, RenderPass};
use crate::resources::{AttachmentRef, FramebufferKey, Resources};
use crate::types::{AttachmentSlot, FilterMode, Size, TextureFormat};

crate::tracked_fields! {
    pub enum RendererField {
        Size,
    }
}

/// Owns the framebuffers and passes of one pipeline and decides per poll
/// whether a frame is needed.
///
/// A host calls [`Renderer::prepare`] once per display refresh and
/// [`Renderer::draw`] only when it returned true. Size changes and camera
/// movement are pushed to the passes that declared interest before their
/// dirtiness is evaluated.
pub struct Renderer<G: GraphicsContext> {
    gpu: G,
    resources: Resources,
    passes: Vec<PassEntry>,
    camera: Camera,
    changes: ChangeSet<RendererField>,
    logical_size: Size,
    size_factor: f32,
    size: Size,
    last_frame: f64,
    drawn_camera_stamp: Option<u64>,
    prepared_camera_stamp: Option<u64>,
}

impl<G: GraphicsContext> Renderer<G> {
    /// Wraps `gpu`; the initial size is the current canvas size.
    pub fn new(gpu: G) -> Self {
        let size = gpu.canvas_size();
        let mut renderer = Self {
            gpu,
            resources: Resources::default(),
            passes: Vec::new(),
            camera: Camera::default(),
            changes: ChangeSet::new(),
            logical_size: size,
            size_factor: 1.0,
            size,
            last_frame: 0.0,
            drawn_camera_stamp: None,
            prepared_camera_stamp: None,
        };
        renderer.resize(size);
        renderer
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut G {
        &mut self.gpu
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    /// Replaces the camera; the new one counts as moved.
    pub fn set_camera(&mut self, mut camera: Camera) {
        camera.set_aspect(self.size.aspect());
        self.camera = camera;
        self.drawn_camera_stamp = None;
        self.prepared_camera_stamp = None;
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn framebuffer(&self, key: FramebufferKey) -> Option<&Framebuffer> {
        self.resources.framebuffer(key)
    }

    /// Physical render size: the logical size scaled by the size factor.
    pub fn size(&self) -> Size {
        self.size
    }

    pub fn logical_size(&self) -> Size {
        self.logical_size
    }

    pub fn size_factor(&self) -> f32 {
        self.size_factor
    }

    /// Time passed to the last [`Renderer::draw`].
    pub fn last_frame(&self) -> f64 {
        self.last_frame
    }

    pub fn changes(&self) -> &ChangeSet<RendererField> {
        &self.changes
    }

    /// Records a new logical canvas size. Takes effect in the next prepare.
    pub fn resize(&mut self, logical: Size) {
        self.logical_size = logical;
        self.size = logical.scaled(self.size_factor);
        self.camera.set_aspect(self.size.aspect());
        self.changes.set(RendererField::Size);
    }

    /// Renders at `factor` times the logical size, e.g. 0.5 for half
    /// resolution.
    pub fn set_size_factor(&mut self, factor: f32) {
        self.size_factor = factor;
        self.resize(self.logical_size);
    }

    /// True when the camera moved since the last drawn frame. The first
    /// frame always counts as a move.
    pub fn camera_changed(&self) -> bool {
        self.drawn_camera_stamp
            .map_or(true, |stamp| self.camera.timestamp() > stamp)
    }

    pub fn add_framebuffer(
        &mut self,
        name: &str,
        attachments: &[AttachmentSpec],
    ) -> Result<FramebufferKey, GpuError> {
        let mut framebuffer = Framebuffer::new(&mut self.gpu, name, attachments)?;
        framebuffer.set_size(&mut self.gpu, self.size);
        Ok(self.resources.insert(framebuffer))
    }

    /// Registers the canvas as a framebuffer so passes can target it.
    pub fn add_canvas(&mut self) -> FramebufferKey {
        let mut canvas = Framebuffer::canvas(&self.gpu);
        canvas.set_size(&mut self.gpu, self.size);
        self.resources.insert(canvas)
    }

    /// A framebuffer with one nearest-filtered colour attachment.
    pub fn add_single_texture_buffer(
        &mut self,
        name: &str,
        format: TextureFormat,
    ) -> Result<FramebufferKey, GpuError> {
        let key = self.add_framebuffer(name, &[AttachmentSpec::single(format)])?;
        self.set_attachment_filter(AttachmentRef::first(key), FilterMode::Nearest, FilterMode::Nearest);
        Ok(key)
    }

    /// Sets both filters of an attachment, on both images when it is
    /// double-buffered.
    pub fn set_attachment_filter(&mut self, attachment: AttachmentRef, min: FilterMode, mag: FilterMode) {
        let texture = self
            .resources
            .framebuffer_mut(attachment.framebuffer)
            .and_then(|framebuffer| framebuffer.texture_mut(attachment.attachment));
        if let Some(texture) = texture {
            texture.set_min_filter(&mut self.gpu, min);
            texture.set_mag_filter(&mut self.gpu, mag);
        }
    }

    /// Initializes `pass` and appends it to the execution order.
    ///
    /// The pass immediately receives the current size and camera if it
    /// listens for them.
    pub fn add_pass(&mut self, pass: impl RenderPass) -> Result<&mut PassEntry, GpuError> {
        let mut pass: Box<dyn RenderPass> = Box::new(pass);
        pass.initialize(&mut self.gpu)?;
        if let Some(listener) = pass.as_sizeable() {
            listener.size_changed(self.size);
        }
        if let Some(listener) = pass.as_camera_aware() {
            listener.camera_changed(&self.camera.matrices());
        }
        tracing::debug!(pass = %pass.name(), index = self.passes.len(), "pass registered");

        let id = PassId(self.passes.len());
        self.passes.push(PassEntry::new(id, pass));
        let index = self.passes.len() - 1;
        Ok(&mut self.passes[index])
    }

    /// Adds a pass copying `read_buffer` of `source` into `draw_buffer` of
    /// `destination`.
    pub fn add_blit_pass(
        &mut self,
        source: FramebufferKey,
        read_buffer: AttachmentSlot,
        destination: FramebufferKey,
        draw_buffer: AttachmentSlot,
    ) -> Result<PassId, GpuError> {
        let mut pass = BlitPass::new("Blit");
        pass.set_read_target(source);
        pass.set_read_buffer(read_buffer);
        pass.set_draw_target(destination);
        pass.set_draw_buffer(draw_buffer);
        Ok(self.add_pass(pass)?.id())
    }

    pub fn passes(&self) -> &[PassEntry] {
        &self.passes
    }

    pub fn passes_mut(&mut self) -> impl Iterator<Item = &mut PassEntry> {
        self.passes.iter_mut()
    }

    pub fn entry_mut(&mut self, id: PassId) -> Option<&mut PassEntry> {
        self.passes.get_mut(id.0)
    }

    pub fn pass<P: RenderPass>(&self, id: PassId) -> Option<&P> {
        self.passes.get(id.0)?.downcast_ref()
    }

    pub fn pass_mut<P: RenderPass>(&mut self, id: PassId) -> Option<&mut P> {
        self.passes.get_mut(id.0)?.downcast_mut()
    }

    pub fn clear_framebuffer(&mut self, key: FramebufferKey) {
        if let Some(framebuffer) = self.resources.framebuffer(key) {
            framebuffer.clear(&mut self.gpu, true, true);
        }
    }

    pub fn swap_framebuffer(&mut self, key: FramebufferKey) {
        if let Some(framebuffer) = self.resources.framebuffer_mut(key) {
            framebuffer.swap(&mut self.gpu, true, true);
        }
    }

    /// Propagates pending size and camera changes and reports whether a
    /// frame should be drawn.
    pub fn prepare(&mut self, _time: f64) -> bool {
        let mut should_run = self.changes.any();

        if self.changes.get(RendererField::Size) {
            let size = self.size;
            self.gpu.resize_canvas(size);
            self.gpu.viewport(size.full_rect());
            for framebuffer in self.resources.iter_mut() {
                framebuffer.set_size(&mut self.gpu, size);
            }
            for entry in &mut self.passes {
                if let Some(listener) = entry.pass_mut().as_sizeable() {
                    listener.size_changed(size);
                }
            }
            tracing::debug!(%size, "render size changed");
        }

        if self.camera_changed() {
            let matrices = self.camera.matrices();
            for entry in &mut self.passes {
                if let Some(listener) = entry.pass_mut().as_camera_aware() {
                    listener.camera_changed(&matrices);
                }
            }
            tracing::debug!(eye = ?matrices.eye, center = ?matrices.center, "camera changed");
            should_run = true;
        }
        self.prepared_camera_stamp = Some(self.camera.timestamp());

        for entry in &self.passes {
            if entry.pass().needs_redraw() {
                should_run = true;
            }
        }

        self.changes.reset();
        should_run
    }

    /// Runs every pass in registration order.
    pub fn draw(&mut self, time: f64) {
        let mut ctx = FrameContext {
            gpu: &mut self.gpu,
            resources: &mut self.resources,
        };
        for entry in &mut self.passes {
            entry.run(&mut ctx);
        }

        self.last_frame = self.last_frame.max(time);
        if let Some(stamp) = self.prepared_camera_stamp.take() {
            self.drawn_camera_stamp = Some(stamp);
        }
    }

    /// Tears down passes, then framebuffers, and hands the context back.
    pub fn release(mut self) -> G {
        for entry in std::mem::take(&mut self.passes) {
            entry.release(&mut self.gpu);
        }
        std::mem::take(&mut self.resources).release(&mut self.gpu);
        self.gpu
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessContext;
    use crate::pass::FullscreenPass;
    use glam::Vec3;

    fn renderer() -> Renderer<HeadlessContext> {
        Renderer::new(HeadlessContext::new(Size::new(800, 600)))
    }

    #[test]
    fn first_prepare_always_runs() {
        let mut renderer = renderer();
        assert!(renderer.prepare(0.0));
        renderer.draw(0.0);
        assert!(!renderer.prepare(16.0));
    }

    #[test]
    fn size_factor_scales_the_render_size() {
        let mut renderer = renderer();
        renderer.set_size_factor(0.5);
        assert_eq!(renderer.size(), Size::new(400, 300));
        assert_eq!(renderer.logical_size(), Size::new(800, 600));
        assert!(renderer.changes().get(RendererField::Size));
        assert!((renderer.camera().aspect() - 4.0 / 3.0).abs() < 1e-6);

        renderer.prepare(0.0);
        assert_eq!(renderer.gpu().canvas_size(), Size::new(400, 300));
    }

    #[test]
    fn last_frame_never_decreases() {
        let mut renderer = renderer();
        renderer.draw(10.0);
        renderer.draw(5.0);
        assert_eq!(renderer.last_frame(), 10.0);
    }

    #[test]
    fn camera_change_is_committed_by_draw() {
        let mut renderer = renderer();
        renderer.prepare(0.0);
        renderer.draw(0.0);
        assert!(!renderer.camera_changed());

        renderer.camera_mut().set_fov_y_degrees(45.0);
        assert!(renderer.prepare(1.0));
        // Not drawn yet, so the move is still pending.
        assert!(renderer.camera_changed());
        renderer.draw(1.0);
        assert!(!renderer.camera_changed());
    }

    #[test]
    fn replaced_camera_counts_as_moved() {
        let mut renderer = renderer();
        for _ in 0..3 {
            renderer.camera_mut().set_eye(Vec3::new(0.0, 1.0, 5.0));
        }
        renderer.prepare(0.0);
        renderer.draw(0.0);
        assert!(!renderer.camera_changed());

        // A fresh camera starts its own count below the stamp already drawn.
        renderer.set_camera(Camera::new(Vec3::new(2.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y));
        assert!(renderer.camera().timestamp() < 4);
        assert!(renderer.camera_changed());
        assert!(renderer.prepare(1.0));
        renderer.draw(1.0);
        assert!(!renderer.camera_changed());
    }

    #[test]
    fn passes_are_typed_by_id() {
        let mut renderer = renderer();
        let canvas = renderer.add_canvas();
        let id = renderer
            .add_pass(FullscreenPass::copy("copy").with_target(canvas))
            .expect("pass")
            .id();
        assert!(renderer.pass::<FullscreenPass>(id).is_some());
        assert!(renderer.pass::<BlitPass>(id).is_none());
        assert_eq!(renderer.passes().len(), 1);
    }

    #[test]
    fn release_returns_a_clean_context() {
        let mut renderer = renderer();
        let buffer = renderer
            .add_single_texture_buffer("buffer", TextureFormat::RGBA)
            .expect("framebuffer");
        renderer
            .add_pass(FullscreenPass::copy("copy").with_target(buffer))
            .expect("pass");
        let gpu = renderer.release();
        assert_eq!(gpu.live_textures(), 0);
        assert_eq!(gpu.live_framebuffers(), 0);
        assert_eq!(gpu.live_programs(), 0);
        assert_eq!(gpu.live_shaders(), 0);
    }
}
