use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read configuration {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Declarative description of a pass-chain run: canvas, camera, temporal
/// accumulation and frame pacing.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChainConfig {
    pub version: u32,
    #[serde(default)]
    pub canvas: CanvasConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub taa: TaaConfig,
    #[serde(default)]
    pub frame_loop: FrameLoopConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CanvasConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Physical render size relative to the logical canvas size.
    #[serde(default = "default_size_factor")]
    pub size_factor: f32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CameraConfig {
    #[serde(default = "default_eye")]
    pub eye: [f32; 3],
    #[serde(default)]
    pub center: [f32; 3],
    #[serde(default = "default_up")]
    pub up: [f32; 3],
    /// Vertical field of view in degrees.
    #[serde(default = "default_fov_y")]
    pub fov_y: f32,
    #[serde(default = "default_near")]
    pub near: f32,
    #[serde(default = "default_far")]
    pub far: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TaaConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_taa_frames")]
    pub frames: u32,
    #[serde(default = "default_halton")]
    pub halton: [u32; 2],
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FrameLoopConfig {
    #[serde(
        default = "default_interval",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub interval: Duration,
    #[serde(default = "default_max_frames")]
    pub max_frames: u32,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            version: 1,
            canvas: CanvasConfig::default(),
            camera: CameraConfig::default(),
            taa: TaaConfig::default(),
            frame_loop: FrameLoopConfig::default(),
        }
    }
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            size_factor: default_size_factor(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            eye: default_eye(),
            center: [0.0; 3],
            up: default_up(),
            fov_y: default_fov_y(),
            near: default_near(),
            far: default_far(),
        }
    }
}

impl Default for TaaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frames: default_taa_frames(),
            halton: default_halton(),
        }
    }
}

impl Default for FrameLoopConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            max_frames: default_max_frames(),
        }
    }
}

fn default_width() -> u32 {
    800
}

fn default_height() -> u32 {
    600
}

fn default_size_factor() -> f32 {
    1.0
}

fn default_eye() -> [f32; 3] {
    [0.0, 0.0, 5.0]
}

fn default_up() -> [f32; 3] {
    [0.0, 1.0, 0.0]
}

fn default_fov_y() -> f32 {
    60.0
}

fn default_near() -> f32 {
    0.25
}

fn default_far() -> f32 {
    16.0
}

fn default_true() -> bool {
    true
}

fn default_taa_frames() -> u32 {
    64
}

fn default_halton() -> [u32; 2] {
    [2, 3]
}

fn default_interval() -> Duration {
    Duration::from_millis(16)
}

fn default_max_frames() -> u32 {
    240
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of milliseconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_millis(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_millis(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs_f64(v / 1000.0))
        }
    }

    deserializer.deserialize_any(Visitor)
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

impl ChainConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: ChainConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        let canvas = &self.canvas;
        if canvas.width == 0 || canvas.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "canvas size must be non-zero, got {}x{}",
                canvas.width, canvas.height
            )));
        }
        if !(canvas.size_factor > 0.0 && canvas.size_factor <= 4.0) {
            return Err(ConfigError::Invalid(format!(
                "canvas.size_factor must be in (0, 4], got {}",
                canvas.size_factor
            )));
        }

        let camera = &self.camera;
        if !(camera.near > 0.0 && camera.near < camera.far) {
            return Err(ConfigError::Invalid(format!(
                "camera clip planes must satisfy 0 < near < far, got near {} far {}",
                camera.near, camera.far
            )));
        }
        if !(camera.fov_y > 0.0 && camera.fov_y < 180.0) {
            return Err(ConfigError::Invalid(format!(
                "camera.fov_y must be in (0, 180) degrees, got {}",
                camera.fov_y
            )));
        }
        if camera.eye == camera.center {
            return Err(ConfigError::Invalid(
                "camera.eye and camera.center must differ".into(),
            ));
        }
        if camera.up == [0.0; 3] {
            return Err(ConfigError::Invalid("camera.up may not be zero".into()));
        }

        if self.taa.frames == 0 {
            return Err(ConfigError::Invalid("taa.frames must be >= 1".into()));
        }
        if let Some(base) = self.taa.halton.iter().find(|base| **base < 2) {
            return Err(ConfigError::Invalid(format!(
                "taa.halton bases must be >= 2, got {base}"
            )));
        }

        if self.frame_loop.interval.is_zero() {
            return Err(ConfigError::Invalid(
                "frame_loop.interval must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = 1

[canvas]
width = 1280
height = 720
size_factor = 0.5

[camera]
eye = [0.0, 1.0, 6.0]
center = [0.0, 0.5, 0.0]
fov_y = 45

[taa]
enabled = true
frames = 32
halton = [3, 5]

[frame_loop]
interval = "33ms"
max_frames = 120
"#;

    #[test]
    fn parses_sample_config() {
        let config = ChainConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.canvas.width, 1280);
        assert_eq!(config.canvas.size_factor, 0.5);
        assert_eq!(config.camera.eye, [0.0, 1.0, 6.0]);
        assert_eq!(config.camera.up, [0.0, 1.0, 0.0]);
        assert_eq!(config.camera.fov_y, 45.0);
        assert_eq!(config.taa.frames, 32);
        assert_eq!(config.taa.halton, [3, 5]);
        assert_eq!(config.frame_loop.interval, Duration::from_millis(33));
        assert_eq!(config.frame_loop.max_frames, 120);
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = ChainConfig::from_toml_str("version = 1").expect("parse config");
        assert_eq!(config, ChainConfig::default());
        assert_eq!(config.camera.near, 0.25);
        assert_eq!(config.camera.far, 16.0);
        assert_eq!(config.frame_loop.interval, Duration::from_millis(16));
    }

    #[test]
    fn numeric_interval_is_milliseconds() {
        let config = ChainConfig::from_toml_str(
            r#"
version = 1

[frame_loop]
interval = 8
"#,
        )
        .expect("parse config");
        assert_eq!(config.frame_loop.interval, Duration::from_millis(8));
    }

    #[test]
    fn rejects_unknown_version() {
        let err = ChainConfig::from_toml_str("version = 2").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_inverted_clip_planes() {
        let config = r#"
version = 1

[camera]
near = 10.0
far = 1.0
"#;
        let err = ChainConfig::from_toml_str(config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_degenerate_halton_base() {
        let config = r#"
version = 1

[taa]
halton = [1, 3]
"#;
        let err = ChainConfig::from_toml_str(config).unwrap_err();
        assert!(err.to_string().contains("halton"));
    }

    #[test]
    fn rejects_zero_frame_budget_and_canvas() {
        let frames = ChainConfig::from_toml_str("version = 1\n[taa]\nframes = 0\n").unwrap_err();
        assert!(matches!(frames, ConfigError::Invalid(_)));
        let canvas = ChainConfig::from_toml_str("version = 1\n[canvas]\nwidth = 0\n").unwrap_err();
        assert!(matches!(canvas, ConfigError::Invalid(_)));
    }

    #[test]
    fn reports_malformed_toml() {
        let err = ChainConfig::from_toml_str("version = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn serialized_config_round_trips() {
        let config = ChainConfig::from_toml_str(SAMPLE).expect("parse config");
        let serialized = config.to_toml_string().expect("serialize config");
        let reparsed = ChainConfig::from_toml_str(&serialized).expect("reparse config");
        assert_eq!(reparsed, config);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = ChainConfig::load("/nonexistent/passchain.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
