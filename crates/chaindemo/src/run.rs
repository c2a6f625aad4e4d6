use std::path::Path;

use anyhow::{Context, Result};
use chainconfig::ChainConfig;
use glam::Vec3;
use passchain::{Camera, GraphicsContext, HeadlessContext, Renderer, Size, TaaRenderer, WgpuContext};
use tracing_subscriber::EnvFilter;

use crate::cli::{Backend, Cli, Demo};
use crate::demos::{self, Pipeline};

pub fn run(cli: Cli) -> Result<()> {
    let config = effective_config(&cli)?;
    if cli.print_config {
        let rendered = config
            .to_toml_string()
            .context("failed to serialise configuration")?;
        print!("{rendered}");
        return Ok(());
    }

    let size = Size::new(config.canvas.width, config.canvas.height);
    tracing::info!(demo = ?cli.demo, backend = ?cli.backend, %size, "building pass chain");
    let mut pipeline: Box<dyn Pipeline> = match cli.backend {
        Backend::Headless => build(HeadlessContext::new(size), &cli, &config)?,
        Backend::Wgpu => {
            let gpu = WgpuContext::new(size).context("failed to initialise wgpu")?;
            tracing::info!(adapter = gpu.adapter_name(), "using wgpu adapter");
            build(gpu, &cli, &config)?
        }
    };

    let drawn = run_frames(pipeline.as_mut(), &config);
    tracing::info!(drawn, "frame loop finished");
    println!("drew {drawn} frame(s)");

    if let Some(path) = cli.export.as_deref() {
        export_canvas(pipeline.as_mut(), path)?;
        tracing::info!(path = %path.display(), "exported canvas");
    }

    pipeline.release();
    Ok(())
}

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Configuration file (or defaults) with command-line overrides applied.
fn effective_config(cli: &Cli) -> Result<ChainConfig> {
    let mut config = match cli.config.as_deref() {
        Some(path) => ChainConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ChainConfig::default(),
    };
    if let Some(size) = cli.size {
        config.canvas.width = size.width;
        config.canvas.height = size.height;
    }
    if let Some(frames) = cli.frames {
        config.frame_loop.max_frames = frames;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn camera(config: &ChainConfig) -> Camera {
    let settings = &config.camera;
    let mut camera = Camera::new(
        Vec3::from_array(settings.eye),
        Vec3::from_array(settings.center),
        Vec3::from_array(settings.up),
    );
    camera.set_fov_y_degrees(settings.fov_y);
    camera.set_clip(settings.near, settings.far);
    camera
}

fn build<G: GraphicsContext + 'static>(
    gpu: G,
    cli: &Cli,
    config: &ChainConfig,
) -> Result<Box<dyn Pipeline>> {
    match cli.demo {
        Demo::Fullscreen | Demo::Pingpong => {
            let mut renderer = Renderer::new(gpu);
            configure(&mut renderer, config);
            if cli.demo == Demo::Fullscreen {
                demos::fullscreen(&mut renderer)?;
            } else {
                demos::pingpong(&mut renderer, cli.seed)?;
            }
            Ok(Box::new(renderer))
        }
        Demo::Taa => {
            let mut renderer = TaaRenderer::with_settings(gpu, demos::taa_settings(&config.taa));
            configure(renderer.base_mut(), config);
            demos::taa(&mut renderer, cli.seed)?;
            Ok(Box::new(renderer))
        }
    }
}

fn configure<G: GraphicsContext>(renderer: &mut Renderer<G>, config: &ChainConfig) {
    renderer.resize(Size::new(config.canvas.width, config.canvas.height));
    renderer.set_size_factor(config.canvas.size_factor);
    renderer.set_camera(camera(config));
}

/// Draws until the chain goes idle or the frame limit is hit. Time advances
/// by the configured interval per tick.
fn run_frames(pipeline: &mut dyn Pipeline, config: &ChainConfig) -> u32 {
    let interval = config.frame_loop.interval.as_secs_f64();
    let mut drawn = 0;
    while drawn < config.frame_loop.max_frames {
        let time = f64::from(drawn) * interval;
        if !pipeline.prepare(time) {
            tracing::debug!(time, "pass chain idle");
            break;
        }
        pipeline.draw(time);
        drawn += 1;
    }
    drawn
}

fn export_canvas(pipeline: &mut dyn Pipeline, path: &Path) -> Result<()> {
    let size = pipeline.canvas_size();
    let pixels = pipeline
        .read_canvas()
        .context("failed to read back the canvas")?;
    let image = image::RgbaImage::from_raw(size.width, size.height, pixels)
        .context("canvas readback has unexpected length")?;
    image
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use clap::Parser;

    #[test]
    fn command_line_overrides_config_values() {
        let cli = Cli::try_parse_from(["chaindemo", "--size", "40x30", "--frames", "7"]).unwrap();
        let config = effective_config(&cli).unwrap();
        assert_eq!((config.canvas.width, config.canvas.height), (40, 30));
        assert_eq!(config.frame_loop.max_frames, 7);
    }

    #[test]
    fn frame_loop_stops_when_idle() {
        let cli = Cli::try_parse_from(["chaindemo", "--size", "8x8"]).unwrap();
        let config = effective_config(&cli).unwrap();
        let mut pipeline = build(HeadlessContext::new(Size::new(8, 8)), &cli, &config).unwrap();
        assert_eq!(run_frames(pipeline.as_mut(), &config), 1);
        pipeline.release();
    }

    #[test]
    fn frame_loop_respects_the_limit() {
        let cli = Cli::try_parse_from(["chaindemo", "--demo", "taa", "--size", "8x8"]).unwrap();
        let mut config = effective_config(&cli).unwrap();
        config.frame_loop.max_frames = 5;
        config.frame_loop.interval = Duration::from_millis(10);
        let mut pipeline = build(HeadlessContext::new(Size::new(8, 8)), &cli, &config).unwrap();
        assert_eq!(run_frames(pipeline.as_mut(), &config), 5);
        pipeline.release();
    }
}
