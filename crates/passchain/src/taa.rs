//! Temporal accumulation on top of [`Renderer`].
//!
//! Each frame the jittered passes get a sub-pixel offset taken from a 2-D
//! Halton sequence and the accumulation pass blends the new sample into a
//! running mean. Moving the camera, changing the settings or an explicit
//! redraw request restarts the sequence and clears the buffer.

use glam::Vec2;

use crate::change_set::ChangeSet;
use crate::error::GpuError;
use crate::gpu::GraphicsContext;
use crate::halton::{halton_2d, jitter_offset};
use crate::pass::{FullscreenPass, PassId};
use crate::renderer::Renderer;
use crate::resources::{AttachmentRef, FramebufferKey};
use crate::types::{BlendMode, FilterMode, TextureFormat};

crate::tracked_fields! {
    pub enum TaaField {
        Enabled,
        Frame,
        FrameBudget,
        HaltonBases,
    }
}

/// User-facing accumulation settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaaSettings {
    pub enabled: bool,
    /// Samples accumulated before the image is considered converged.
    pub frames: u32,
    pub halton: (u32, u32),
}

impl Default for TaaSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            frames: 64,
            halton: (2, 3),
        }
    }
}

/// Accumulation buffer plus the pass that writes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaaTarget {
    pub framebuffer: FramebufferKey,
    pub pass: PassId,
}

/// A [`Renderer`] that keeps accumulating jittered samples while nothing
/// changes.
pub struct TaaRenderer<G: GraphicsContext> {
    base: Renderer<G>,
    settings: TaaSettings,
    changes: ChangeSet<TaaField>,
    frame: u32,
    kernel: Vec<Vec2>,
    target: Option<TaaTarget>,
}

impl<G: GraphicsContext> TaaRenderer<G> {
    pub fn new(gpu: G) -> Self {
        Self::with_settings(gpu, TaaSettings::default())
    }

    pub fn with_settings(gpu: G, settings: TaaSettings) -> Self {
        Self {
            base: Renderer::new(gpu),
            settings: TaaSettings {
                frames: settings.frames.max(1),
                ..settings
            },
            changes: ChangeSet::all_set(),
            frame: 0,
            kernel: Vec::new(),
            target: None,
        }
    }

    pub fn base(&self) -> &Renderer<G> {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut Renderer<G> {
        &mut self.base
    }

    pub fn settings(&self) -> TaaSettings {
        self.settings
    }

    /// Index of the next sample; 0 right after a reset.
    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Jitter sequence in `[0, 1)²`, one entry per sample after the first.
    pub fn kernel(&self) -> &[Vec2] {
        &self.kernel
    }

    pub fn target(&self) -> Option<TaaTarget> {
        self.target
    }

    pub fn changes(&self) -> &ChangeSet<TaaField> {
        &self.changes
    }

    /// True once every sample of the budget has been accumulated.
    pub fn converged(&self) -> bool {
        self.settings.enabled && self.frame >= self.settings.frames
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.settings.enabled = enabled;
        self.changes.set(TaaField::Enabled);
    }

    /// Budgets below one sample are raised to one.
    pub fn set_frame_budget(&mut self, frames: u32) {
        self.settings.frames = frames.max(1);
        self.changes.set(TaaField::FrameBudget);
    }

    pub fn set_halton_bases(&mut self, x: u32, y: u32) {
        self.settings.halton = (x, y);
        self.changes.set(TaaField::HaltonBases);
    }

    /// Creates the "TAA" buffer and the pass accumulating `input` into it.
    ///
    /// `input` is sampled with nearest filtering so jittered samples are not
    /// smeared a second time.
    pub fn setup_taa(&mut self, input: AttachmentRef) -> Result<TaaTarget, GpuError> {
        let framebuffer = self
            .base
            .add_single_texture_buffer("TAA", TextureFormat::RGBA)?;
        self.base
            .set_attachment_filter(input, FilterMode::Nearest, FilterMode::Nearest);

        let pass = FullscreenPass::accumulate("TAA Accumulate")
            .with_target(framebuffer)
            .with_input(0, input);
        let entry = self.base.add_pass(pass)?;
        entry
            .set_pre_draw(|ctx| ctx.set_blend(Some(BlendMode::Alpha)))
            .set_post_draw(|ctx| ctx.set_blend(None));

        let target = TaaTarget {
            framebuffer,
            pass: entry.id(),
        };
        self.target = Some(target);
        self.changes.set(TaaField::Frame);
        Ok(target)
    }

    /// Advances the accumulation state and reports whether a frame is due.
    ///
    /// `request_redraw` restarts accumulation, e.g. after a scene parameter
    /// changed outside the renderer's knowledge.
    pub fn prepare(&mut self, time: f64, request_redraw: bool) -> bool {
        let settings_changed = self.changes.get(TaaField::Enabled)
            || self.changes.get(TaaField::FrameBudget)
            || self.changes.get(TaaField::HaltonBases);
        if settings_changed {
            let (x, y) = self.settings.halton;
            self.kernel = halton_2d(x, y, self.settings.frames as usize, 0);
        }

        let camera_changed = self.base.camera_changed();
        let restart = settings_changed || camera_changed || request_redraw;
        if restart {
            self.reset_accumulation();
            tracing::debug!(
                settings_changed,
                camera_changed,
                request_redraw,
                "temporal accumulation reset"
            );
        }

        if self.changes.get(TaaField::Frame) {
            self.apply_frame();
        }

        let should_run = self.base.prepare(time) | self.changes.any() | restart;
        self.changes.reset();
        should_run
    }

    pub fn draw(&mut self, time: f64) {
        self.base.draw(time);

        if self.settings.enabled && self.frame < self.settings.frames {
            self.frame += 1;
            if self.frame < self.settings.frames {
                self.changes.set(TaaField::Frame);
            }
        }
    }

    pub fn release(self) -> G {
        self.base.release()
    }

    fn reset_accumulation(&mut self) {
        if self.frame > 0 {
            self.changes.set(TaaField::Frame);
        }
        self.frame = 0;
        if let Some(target) = self.target {
            self.base.clear_framebuffer(target.framebuffer);
        }
    }

    fn apply_frame(&mut self) {
        let offset = jitter_offset(&self.kernel, self.frame);
        let frame = self.frame;
        for entry in self.base.passes_mut() {
            let pass = entry.pass_mut();
            if let Some(jitterable) = pass.as_jitterable() {
                jitterable.set_ndc_offset(offset);
            }
            if let Some(accumulating) = pass.as_accumulating() {
                accumulating.set_frame(frame);
            }
        }
    }
}
