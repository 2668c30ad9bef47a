//! # Cube Configuration
//!
//! The single configuration value threaded from the command line to the
//! driver. Every setting that used to be process-wide state (display mode,
//! output path, direct-display indices, output size) lives here.
//!
//! A TOML file named by `VKCUBE_CONFIG` may supply defaults; command-line
//! flags are applied on top of it by the application.

use serde::{Serialize, Deserialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub use crate::config::{Config, ConfigError};

/// Environment variable naming an optional TOML configuration file
pub const CONFIG_ENV_VAR: &str = "VKCUBE_CONFIG";

/// Default PNG path for the headless back-end
pub const DEFAULT_OUTPUT: &str = "./cube.png";

/// Default DRM device node for the KMS back-end
pub const DEFAULT_DRM_DEVICE: &str = "/dev/dri/card0";

/// Presentation back-end selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Try Wayland, XCB, KMS and headless in that order
    #[default]
    Auto,
    /// Render one frame to a PNG file
    Headless,
    /// Kernel mode-setting scan-out
    Kms,
    /// Wayland xdg-toplevel window
    Wayland,
    /// X11 window through XCB
    Xcb,
    /// Direct-to-display plane through `VK_KHR_display`
    Khr,
}

impl DisplayMode {
    /// Name used on the command line and in diagnostics
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Headless => "headless",
            Self::Kms => "kms",
            Self::Wayland => "wayland",
            Self::Xcb => "xcb",
            Self::Khr => "khr",
        }
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognised display-mode name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown display mode '{0}'")]
pub struct UnknownDisplayMode(pub String);

impl FromStr for DisplayMode {
    type Err = UnknownDisplayMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "headless" => Ok(Self::Headless),
            "kms" => Ok(Self::Kms),
            "wayland" => Ok(Self::Wayland),
            "xcb" => Ok(Self::Xcb),
            "khr" => Ok(Self::Khr),
            other => Err(UnknownDisplayMode(other.to_string())),
        }
    }
}

/// Display, mode and plane indices for the direct-display back-end
///
/// An unset index makes the back-end print the matching inventory and fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KhrSelection {
    /// Index into the physical device's displays
    pub display: Option<u32>,
    /// Index into the chosen display's modes
    pub mode: Option<u32>,
    /// Index into the physical device's planes
    pub plane: Option<u32>,
}

impl KhrSelection {
    /// Parse a `display:mode:plane` triple
    ///
    /// Fields are split on `:` with empty fields skipped, so `"1::2"` sets
    /// the display to 1 and the mode to 2. Each field takes its leading
    /// integer, a field without digits counts as 0, and negative values
    /// leave the index unset.
    pub fn parse(spec: &str) -> Self {
        let mut fields = spec.split(':').filter(|field| !field.is_empty()).map(leading_int);
        let mut selection = Self::default();

        if let Some(display) = fields.next() {
            selection.display = u32::try_from(display).ok();
            if let Some(mode) = fields.next() {
                selection.mode = u32::try_from(mode).ok();
                if let Some(plane) = fields.next() {
                    selection.plane = u32::try_from(plane).ok();
                }
            }
        }

        selection
    }
}

/// Leading decimal integer of `s`, 0 when there is none
fn leading_int(s: &str) -> i64 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let magnitude = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, digit| {
            acc.saturating_mul(10).saturating_add(i64::from(digit - b'0'))
        });

    if negative { -magnitude } else { magnitude }
}

/// # Shader Configuration
///
/// Locations of the pre-compiled SPIR-V for the cube's two stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Path to the vertex shader SPIR-V file
    pub vertex_shader_path: PathBuf,
    /// Path to the fragment shader SPIR-V file
    pub fragment_shader_path: PathBuf,
}

impl ShaderConfig {
    /// File name of the compiled vertex stage
    pub const VERTEX_SPV: &'static str = "vkcube.vert.spv";
    /// File name of the compiled fragment stage
    pub const FRAGMENT_SPV: &'static str = "vkcube.frag.spv";

    /// Create a new shader configuration
    pub fn new(vertex_path: impl Into<PathBuf>, fragment_path: impl Into<PathBuf>) -> Self {
        Self {
            vertex_shader_path: vertex_path.into(),
            fragment_shader_path: fragment_path.into(),
        }
    }

    /// Create shader config with automatic path resolution
    ///
    /// Tries the common shader locations in order so the binary works from
    /// the workspace root as well as from an install directory.
    pub fn with_path_resolution(base_vertex: &str, base_fragment: &str) -> Self {
        let shader_dirs = [
            "target/shaders/",
            "shaders/",
            "resources/shaders/",
            "../shaders/",
            "./",
        ];

        let find = |name: &str| {
            shader_dirs
                .iter()
                .map(|dir| Path::new(dir).join(name))
                .find(|candidate| candidate.exists())
                .unwrap_or_else(|| Path::new("shaders").join(name))
        };

        Self {
            vertex_shader_path: find(base_vertex),
            fragment_shader_path: find(base_fragment),
        }
    }

    /// Validate that shader files exist
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.vertex_shader_path.exists() {
            return Err(ConfigError::Invalid(format!(
                "Vertex shader not found: {}",
                self.vertex_shader_path.display()
            )));
        }
        if !self.fragment_shader_path.exists() {
            return Err(ConfigError::Invalid(format!(
                "Fragment shader not found: {}",
                self.fragment_shader_path.display()
            )));
        }
        Ok(())
    }

    /// Read both stages as opaque SPIR-V bytes
    pub fn load(&self) -> Result<(Vec<u8>, Vec<u8>), ConfigError> {
        self.validate()?;
        let vertex = std::fs::read(&self.vertex_shader_path)?;
        let fragment = std::fs::read(&self.fragment_shader_path)?;
        Ok((vertex, fragment))
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::with_path_resolution(Self::VERTEX_SPV, Self::FRAGMENT_SPV)
    }
}

/// Everything the driver needs to pick, build and run a back-end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CubeConfig {
    /// Back-end to use
    pub display_mode: DisplayMode,
    /// Direct-display indices
    pub khr: KhrSelection,
    /// PNG written by the headless back-end
    pub output: PathBuf,
    /// Initial output width in pixels (window and headless image)
    pub width: u32,
    /// Initial output height in pixels
    pub height: u32,
    /// Render every frame at this tick instead of following the clock
    pub fixed_tick: Option<u64>,
    /// SPIR-V locations
    pub shaders: ShaderConfig,
    /// DRM device node opened by the KMS back-end
    pub drm_device: PathBuf,
}

impl Default for CubeConfig {
    fn default() -> Self {
        Self {
            display_mode: DisplayMode::Auto,
            khr: KhrSelection::default(),
            output: PathBuf::from(DEFAULT_OUTPUT),
            width: 1024,
            height: 768,
            fixed_tick: None,
            shaders: ShaderConfig::default(),
            drm_device: PathBuf::from(DEFAULT_DRM_DEVICE),
        }
    }
}

impl Config for CubeConfig {}

impl CubeConfig {
    /// Load from the file named by `VKCUBE_CONFIG`, or fall back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => {
                log::debug!("Loading configuration from {:?}", path);
                let config = Self::load_from_file(PathBuf::from(path))?;
                config.validate()?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Reject values no back-end can work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "output size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.output.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("output path is empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_mode_round_trips_names() {
        for mode in [
            DisplayMode::Auto,
            DisplayMode::Headless,
            DisplayMode::Kms,
            DisplayMode::Wayland,
            DisplayMode::Xcb,
            DisplayMode::Khr,
        ] {
            assert_eq!(mode.as_str().parse::<DisplayMode>(), Ok(mode));
        }
        assert!("x11".parse::<DisplayMode>().is_err());
        assert!("Wayland".parse::<DisplayMode>().is_err());
    }

    #[test]
    fn test_khr_full_selection() {
        let selection = KhrSelection::parse("0:1:2");
        assert_eq!(selection.display, Some(0));
        assert_eq!(selection.mode, Some(1));
        assert_eq!(selection.plane, Some(2));
    }

    #[test]
    fn test_khr_partial_selection() {
        let selection = KhrSelection::parse("3");
        assert_eq!(selection.display, Some(3));
        assert_eq!(selection.mode, None);
        assert_eq!(selection.plane, None);

        let selection = KhrSelection::parse("3:4");
        assert_eq!(selection.mode, Some(4));
        assert_eq!(selection.plane, None);
    }

    #[test]
    fn test_khr_empty_fields_are_skipped() {
        let selection = KhrSelection::parse("1::2");
        assert_eq!(selection.display, Some(1));
        assert_eq!(selection.mode, Some(2));
        assert_eq!(selection.plane, None);

        assert_eq!(KhrSelection::parse(""), KhrSelection::default());
        assert_eq!(KhrSelection::parse(":::"), KhrSelection::default());
    }

    #[test]
    fn test_khr_atoi_semantics() {
        let selection = KhrSelection::parse("x:7abc:-1");
        assert_eq!(selection.display, Some(0));
        assert_eq!(selection.mode, Some(7));
        assert_eq!(selection.plane, None);
    }

    #[test]
    fn test_default_config() {
        let config = CubeConfig::default();
        assert_eq!(config.display_mode, DisplayMode::Auto);
        assert_eq!(config.output, PathBuf::from("./cube.png"));
        assert_eq!((config.width, config.height), (1024, 768));
        assert_eq!(config.fixed_tick, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_size_is_rejected() {
        let config = CubeConfig { width: 0, ..CubeConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vkcube.toml");
        std::fs::write(
            &path,
            "display_mode = \"headless\"\nwidth = 640\nheight = 480\nfixed_tick = 0\n\n[khr]\ndisplay = 1\n",
        )
        .unwrap();

        let config = CubeConfig::load_from_file(&path).unwrap();
        assert_eq!(config.display_mode, DisplayMode::Headless);
        assert_eq!((config.width, config.height), (640, 480));
        assert_eq!(config.fixed_tick, Some(0));
        assert_eq!(config.khr.display, Some(1));
        assert_eq!(config.khr.mode, None);
        assert_eq!(config.output, PathBuf::from(DEFAULT_OUTPUT));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.toml");
        let config = CubeConfig {
            display_mode: DisplayMode::Xcb,
            width: 800,
            ..CubeConfig::default()
        };

        config.save_to_file(&path).unwrap();
        let loaded = CubeConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_non_toml_file_is_rejected() {
        let err = CubeConfig::load_from_file("settings.ron").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_shader_validation_reports_missing_stage() {
        let shaders = ShaderConfig::new("/nonexistent/a.spv", "/nonexistent/b.spv");
        let err = shaders.validate().unwrap_err();
        assert!(err.to_string().contains("Vertex shader not found"));
    }
}
