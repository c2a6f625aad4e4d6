use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "chaindemo",
    author,
    version,
    about = "Render a pass chain for a bounded number of frames"
)]
pub struct Cli {
    /// Pass chain to build.
    #[arg(long, value_enum, default_value_t = Demo::Fullscreen)]
    pub demo: Demo,

    /// Graphics backend; `headless` records draws without a GPU.
    #[arg(long, value_enum, default_value_t = Backend::Headless)]
    pub backend: Backend,

    /// TOML configuration file.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override the canvas size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_canvas_size)]
    pub size: Option<CanvasSize>,

    /// Stop after this many drawn frames.
    #[arg(long, value_name = "COUNT")]
    pub frames: Option<u32>,

    /// Seed for the noise textures.
    #[arg(long, default_value_t = 1)]
    pub seed: u64,

    /// Write the final canvas to the provided PNG path.
    #[arg(long, value_name = "PATH", value_parser = parse_export_path)]
    pub export: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    pub print_config: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Demo {
    Fullscreen,
    Pingpong,
    Taa,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    Headless,
    Wgpu,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_canvas_size(spec: &str) -> Result<CanvasSize, String> {
    let (width, height) = spec
        .trim()
        .split_once(['x', 'X', '×'])
        .ok_or_else(|| "expected WxH format, e.g. 1920x1080".to_string())?;

    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| "invalid width in size specification".to_string())?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| "invalid height in size specification".to_string())?;

    if width == 0 || height == 0 {
        return Err("canvas dimensions must be greater than zero".into());
    }
    Ok(CanvasSize { width, height })
}

pub fn parse_export_path(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    check_export_format(&path)?;
    Ok(path)
}

fn check_export_format(path: &Path) -> Result<(), String> {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => Ok(()),
        None => Err("export path has no extension; expected .png".to_string()),
        Some(other) => Err(format!(
            "unsupported export format '.{other}'; expected .png"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canvas_sizes() {
        assert_eq!(
            parse_canvas_size("1280x720").unwrap(),
            CanvasSize {
                width: 1280,
                height: 720,
            }
        );
        assert_eq!(
            parse_canvas_size(" 64 X 32 ").unwrap(),
            CanvasSize {
                width: 64,
                height: 32,
            }
        );
        assert!(parse_canvas_size("0x720").is_err());
        assert!(parse_canvas_size("1280").is_err());
        assert!(parse_canvas_size("widexhigh").is_err());
    }

    #[test]
    fn export_path_must_be_png() {
        assert!(parse_export_path("frame.png").is_ok());
        assert!(parse_export_path("frame.PNG").is_ok());
        assert!(parse_export_path("frame.exr").is_err());
        assert!(parse_export_path("frame").is_err());
    }

    #[test]
    fn cli_defaults_to_headless_fullscreen() {
        let cli = Cli::try_parse_from(["chaindemo"]).unwrap();
        assert_eq!(cli.demo, Demo::Fullscreen);
        assert_eq!(cli.backend, Backend::Headless);
        assert!(cli.size.is_none());

        let cli = Cli::try_parse_from([
            "chaindemo",
            "--demo",
            "taa",
            "--backend",
            "wgpu",
            "--size",
            "32x16",
            "--frames",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.demo, Demo::Taa);
        assert_eq!(cli.backend, Backend::Wgpu);
        assert_eq!(cli.frames, Some(3));
        assert_eq!(
            cli.size,
            Some(CanvasSize {
                width: 32,
                height: 16,
            })
        );
    }
}
