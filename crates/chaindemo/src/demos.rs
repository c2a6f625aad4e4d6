//! Example pass chains.
//!
//! - `fullscreen`: a gradient rendered offscreen, inverted onto the canvas.
//! - `pingpong`: jump flooding in a double-buffered attachment, shaded as a
//!   Voronoi diagram.
//! - `taa`: a jittered sphere raytracer accumulated over the frame budget and
//!   blitted to the canvas.

use anyhow::{Context, Result};
use glam::Vec3;
use passchain::gpu::{BlockLayout, GraphicsContext};
use passchain::{
    AttachmentRef, AttachmentSlot, AttachmentSpec, ClearOp, FullscreenPass, GpuError,
    RedrawPolicy, Renderer, Size, TaaRenderer, TaaSettings, TextureFormat, UniformValue,
};
use rand::prelude::*;

use crate::noise::{noise_texture, normal_noise, random_noise};

const GRADIENT_FRAGMENT: &str = include_str!("../shaders/gradient.frag");
const INVERT_FRAGMENT: &str = include_str!("../shaders/invert.frag");
const SEED_FRAGMENT: &str = include_str!("../shaders/seed.frag");
const FLOOD_FRAGMENT: &str = include_str!("../shaders/flood.frag");
const VORONOI_FRAGMENT: &str = include_str!("../shaders/voronoi.frag");
const RAYTRACE_FRAGMENT: &str = include_str!("../shaders/raytrace.frag");

const FLOOD_RANGE: u32 = 128;
const SEED_NOISE_RESOLUTION: u32 = 64;
const NOISE_RESOLUTION: u32 = 256;
const MAX_BOUNCE: u32 = 5;

/// A renderer the frame loop can drive without knowing its flavour.
pub trait Pipeline {
    fn prepare(&mut self, time: f64) -> bool;
    fn draw(&mut self, time: f64);
    fn canvas_size(&self) -> Size;
    fn read_canvas(&mut self) -> Result<Vec<u8>, GpuError>;
    /// Tears down passes and framebuffers.
    fn release(self: Box<Self>);
}

impl<G: GraphicsContext> Pipeline for Renderer<G> {
    fn prepare(&mut self, time: f64) -> bool {
        Renderer::prepare(self, time)
    }

    fn draw(&mut self, time: f64) {
        Renderer::draw(self, time);
    }

    fn canvas_size(&self) -> Size {
        self.gpu().canvas_size()
    }

    fn read_canvas(&mut self) -> Result<Vec<u8>, GpuError> {
        self.gpu_mut().read_canvas()
    }

    fn release(self: Box<Self>) {
        Renderer::release(*self);
    }
}

impl<G: GraphicsContext> Pipeline for TaaRenderer<G> {
    fn prepare(&mut self, time: f64) -> bool {
        TaaRenderer::prepare(self, time, false)
    }

    fn draw(&mut self, time: f64) {
        TaaRenderer::draw(self, time);
    }

    fn canvas_size(&self) -> Size {
        self.base().gpu().canvas_size()
    }

    fn read_canvas(&mut self) -> Result<Vec<u8>, GpuError> {
        self.base_mut().gpu_mut().read_canvas()
    }

    fn release(self: Box<Self>) {
        TaaRenderer::release(*self);
    }
}

pub fn fullscreen<G: GraphicsContext>(renderer: &mut Renderer<G>) -> Result<()> {
    let scene = renderer
        .add_framebuffer(
            "Scene",
            &[
                AttachmentSpec::single(TextureFormat::RGBA),
                AttachmentSpec::single(TextureFormat::DEPTH),
            ],
        )
        .context("failed to create scene framebuffer")?;
    renderer
        .add_pass(
            FullscreenPass::new("Gradient", GRADIENT_FRAGMENT)
                .with_target(scene)
                .with_parameter("u_tint", Vec3::new(1.0, 0.55, 0.2))
                .listening_to_size(),
        )
        .context("failed to add gradient pass")?
        .set_pre_draw(move |ctx| ctx.clear_framebuffer(scene));

    let canvas = renderer.add_canvas();
    renderer
        .add_pass(
            FullscreenPass::new("Invert", INVERT_FRAGMENT)
                .with_target(canvas)
                .with_input(0, AttachmentRef::first(scene)),
        )
        .context("failed to add invert pass")?;
    Ok(())
}

/// Seeds, `log2(range) + 1` flood steps with halving stride, then shading.
///
/// The flood steps never ask for a redraw themselves; they run whenever the
/// seeds change.
pub fn pingpong<G: GraphicsContext>(renderer: &mut Renderer<G>, seed: u64) -> Result<()> {
    let points = renderer
        .add_framebuffer(
            "Points",
            &[
                AttachmentSpec::single(TextureFormat::RGBA),
                AttachmentSpec::double(TextureFormat::RGBA32F)
                    .with_clear(ClearOp::Color([-1.0; 4])),
            ],
        )
        .context("failed to create point framebuffer")?;
    let flood = AttachmentRef::new(points, 1);

    let mut rng = StdRng::seed_from_u64(seed);
    let values = random_noise(
        &mut rng,
        (SEED_NOISE_RESOLUTION * SEED_NOISE_RESOLUTION) as usize,
    );
    let seeds = noise_texture(renderer.gpu_mut(), SEED_NOISE_RESOLUTION, &values)
        .context("failed to upload seed noise")?;
    renderer
        .add_pass(
            FullscreenPass::new("Seeds", SEED_FRAGMENT)
                .with_target(points)
                .with_draw_buffers(0b10)
                .with_owned_texture(0, seeds)
                .with_parameter("u_density", 0.01_f32),
        )
        .context("failed to add seed pass")?
        .set_pre_draw(move |ctx| ctx.clear_framebuffer(points))
        .set_post_draw(move |ctx| ctx.swap_framebuffer(points));

    let mut step = FLOOD_RANGE;
    while step >= 1 {
        renderer
            .add_pass(
                FullscreenPass::new(format!("Flood {step}"), FLOOD_FRAGMENT)
                    .with_target(points)
                    .with_draw_buffers(0b10)
                    .with_input(0, flood)
                    .with_parameter("u_step", step as i32)
                    .listening_to_size()
                    .with_redraw_policy(RedrawPolicy::NeverRequestsRedraw),
            )
            .context("failed to add flood pass")?
            .set_post_draw(move |ctx| ctx.swap_framebuffer(points));
        step /= 2;
    }

    let canvas = renderer.add_canvas();
    renderer
        .add_pass(
            FullscreenPass::new("Voronoi", VORONOI_FRAGMENT)
                .with_target(canvas)
                .with_input(0, flood),
        )
        .context("failed to add voronoi pass")?;
    Ok(())
}

struct Sphere {
    position: Vec3,
    radius: f32,
    diffuse: Vec3,
    roughness: f32,
    emissive: Vec3,
    emissive_strength: f32,
}

impl Sphere {
    const fn diffuse(position: [f32; 3], radius: f32, diffuse: [f32; 3], roughness: f32) -> Self {
        Self {
            position: Vec3::from_array(position),
            radius,
            diffuse: Vec3::from_array(diffuse),
            roughness,
            emissive: Vec3::ZERO,
            emissive_strength: 0.0,
        }
    }
}

fn spheres() -> [Sphere; 7] {
    [
        Sphere {
            position: Vec3::ZERO,
            radius: 0.5,
            diffuse: Vec3::ZERO,
            roughness: 1.0,
            emissive: Vec3::ONE,
            emissive_strength: 1.0,
        },
        Sphere::diffuse([1.0, 0.0, 0.0], 0.25, [1.0, 0.5, 0.5], 0.2),
        Sphere::diffuse([0.0, 1.0, 0.0], 0.25, [0.5, 1.0, 0.5], 1.0),
        Sphere::diffuse([0.0, 0.0, 1.0], 0.25, [0.5, 0.5, 1.0], 1.0),
        Sphere::diffuse([-1.0, 0.0, 0.0], 0.25, [0.5, 1.0, 1.0], 0.2),
        Sphere::diffuse([0.0, -1.0, 0.0], 0.25, [1.0, 0.5, 1.0], 1.0),
        Sphere::diffuse([0.0, 0.0, -1.0], 0.25, [1.0, 1.0, 0.5], 1.0),
    ]
}

/// Lays the sphere table out by the reflected offsets of `u_spheres`.
fn sphere_block_data(layout: &BlockLayout) -> Vec<u8> {
    let mut data = vec![0u8; layout.size as usize];
    let Some(member) = layout.member("u_spheres") else {
        return data;
    };
    for (index, sphere) in spheres().iter().enumerate() {
        let base = member.element_offset(index as u32);
        let fields = [
            ("positionRadius", sphere.position.extend(sphere.radius)),
            ("diffuseRoughness", sphere.diffuse.extend(sphere.roughness)),
            ("emissive", sphere.emissive.extend(sphere.emissive_strength)),
        ];
        for (name, value) in fields {
            let Some(field) = member.field(name) else {
                continue;
            };
            let offset = (base + field.offset) as usize;
            let bytes = UniformValue::from(value).std140_bytes();
            if let Some(slot) = data.get_mut(offset..offset + bytes.len()) {
                slot.copy_from_slice(&bytes);
            }
        }
    }
    data
}

/// Raytraced spheres accumulated by the TAA renderer, then blitted to the
/// canvas.
pub fn taa<G: GraphicsContext>(taa: &mut TaaRenderer<G>, seed: u64) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let count = (NOISE_RESOLUTION * NOISE_RESOLUTION) as usize;
    let random = noise_texture(
        taa.base_mut().gpu_mut(),
        NOISE_RESOLUTION,
        &random_noise(&mut rng, count),
    )
    .context("failed to upload random noise")?;
    let normal = noise_texture(
        taa.base_mut().gpu_mut(),
        NOISE_RESOLUTION,
        &normal_noise(&mut rng, count),
    )
    .context("failed to upload normal noise")?;

    let base = taa.base_mut();
    let scene = base
        .add_single_texture_buffer("Raytracing", TextureFormat::RGBA16F)
        .context("failed to create raytracing framebuffer")?;
    base.add_pass(
        FullscreenPass::new("Raytracing", RAYTRACE_FRAGMENT)
            .with_target(scene)
            .with_define("MAX_BOUNCE", MAX_BOUNCE, "")
            .with_define("SPHERE_COUNT", spheres().len(), "")
            .with_uniform_block("Spheres", sphere_block_data)
            .with_owned_texture(0, random)
            .with_owned_texture(1, normal)
            .with_parameter("u_ambient", Vec3::splat(0.25))
            .with_parameter("u_noiseResolution", NOISE_RESOLUTION as f32)
            .listening_to_size()
            .listening_to_camera()
            .jittered(),
    )
    .context("failed to add raytracing pass")?;

    let target = taa
        .setup_taa(AttachmentRef::first(scene))
        .context("failed to set up temporal accumulation")?;

    let base = taa.base_mut();
    let canvas = base.add_canvas();
    base.add_blit_pass(
        target.framebuffer,
        AttachmentSlot::Color(0),
        canvas,
        AttachmentSlot::Color(0),
    )
    .context("failed to add present pass")?;
    Ok(())
}

pub fn taa_settings(config: &chainconfig::TaaConfig) -> TaaSettings {
    TaaSettings {
        enabled: config.enabled,
        frames: config.frames,
        halton: (config.halton[0], config.halton[1]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use passchain::gpu::HeadlessCommand;
    use passchain::HeadlessContext;

    fn renderer() -> Renderer<HeadlessContext> {
        Renderer::new(HeadlessContext::new(Size::new(32, 24)))
    }

    #[test]
    fn fullscreen_chain_draws_into_the_canvas() {
        let mut renderer = renderer();
        fullscreen(&mut renderer).expect("fullscreen demo");
        assert_eq!(renderer.passes().len(), 2);
        assert!(renderer.prepare(0.0));
        renderer.draw(0.0);

        let calls: Vec<_> = renderer.gpu().draw_calls().cloned().collect();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].framebuffer, None);
        assert!(!renderer.prepare(1.0));
    }

    #[test]
    fn pingpong_chain_halves_the_flood_step() {
        let mut renderer = renderer();
        pingpong(&mut renderer, 3).expect("pingpong demo");
        // seeds, eight flood steps (128 ..= 1), voronoi
        assert_eq!(renderer.passes().len(), 10);
        let steps: Vec<_> = renderer
            .passes()
            .iter()
            .filter_map(|entry| entry.downcast_ref::<FullscreenPass>())
            .filter_map(|pass| pass.parameter("u_step"))
            .collect();
        assert_eq!(steps.first(), Some(&UniformValue::Int(128)));
        assert_eq!(steps.last(), Some(&UniformValue::Int(1)));

        assert!(renderer.prepare(0.0));
        renderer.draw(0.0);
        let (_, points) = renderer.resources().iter().next().expect("points");
        assert!(points.is_double_buffered());
        assert!(!renderer.prepare(1.0));
    }

    #[test]
    fn taa_chain_presents_the_accumulation_buffer() {
        let mut renderer = TaaRenderer::with_settings(
            HeadlessContext::new(Size::new(16, 16)),
            TaaSettings {
                frames: 4,
                ..TaaSettings::default()
            },
        );
        taa(&mut renderer, 5).expect("taa demo");
        let mut drawn = 0;
        for tick in 0..10 {
            if renderer.prepare(tick as f64, false) {
                renderer.draw(tick as f64);
                drawn += 1;
            }
        }
        assert_eq!(drawn, 4);
        let blits = renderer
            .base()
            .gpu()
            .commands()
            .iter()
            .filter(|command| matches!(command, HeadlessCommand::Blit { .. }))
            .count();
        assert_eq!(blits, 4);
    }

    #[test]
    fn sphere_table_follows_the_reflected_layout() {
        let mut gpu = HeadlessContext::new(Size::new(4, 4));
        let mut program = passchain::Program::new(
            "raytrace",
            passchain::shader::sources::FULLSCREEN_VERTEX,
            RAYTRACE_FRAGMENT,
        );
        program.set_define("SPHERE_COUNT", spheres().len(), "");
        program.compile(&mut gpu).expect("compile");
        let handle = program.handle().expect("linked");
        let layout = gpu
            .uniform_block_layout(handle, "Spheres")
            .expect("Spheres block");
        let data = sphere_block_data(&layout);
        assert_eq!(data.len(), layout.size as usize);

        let member = layout.member("u_spheres").expect("u_spheres");
        let radius_offset = (member.element_offset(1)
            + member.field("positionRadius").expect("field").offset
            + 12) as usize;
        let radius = f32::from_le_bytes(
            data[radius_offset..radius_offset + 4]
                .try_into()
                .expect("four bytes"),
        );
        assert_eq!(radius, 0.25);
    }
}
