//! Configuration system
//!
//! Application settings are plain serde structs that load from either TOML or
//! RON, selected by file extension.

use std::path::{Path, PathBuf};

pub use serde::{Deserialize, Serialize};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        match ConfigFormat::from_path(path)? {
            ConfigFormat::Toml => {
                toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
            }
            ConfigFormat::Ron => {
                ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
            }
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = match ConfigFormat::from_path(path)? {
            ConfigFormat::Toml => {
                toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
            }
            ConfigFormat::Ron => ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?,
        };

        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A value failed validation
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Toml,
    Ron,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(Self::Toml),
            Some("ron") => Ok(Self::Ron),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Window creation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "hello world".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// Configuration for the Vulkan renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Number of frame slots cycling through the frame loop
    pub max_frames_in_flight: usize,
    /// Whether to enable the Khronos validation layer and debug messenger
    pub enable_validation: bool,
    /// Background clear color [R, G, B, A] (0.0-1.0 range)
    pub clear_color: [f32; 4],
    /// Always upload the texture through a staging buffer
    pub force_texture_staging: bool,
    /// Frame fence wait timeout in milliseconds; unset waits indefinitely
    pub fence_timeout_ms: Option<u64>,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            ..Self::default()
        }
    }

    /// Set number of frames in flight
    pub fn with_max_frames_in_flight(mut self, max_frames: usize) -> Self {
        self.max_frames_in_flight = max_frames.clamp(1, 8);
        self
    }

    /// Enable or disable Vulkan validation layers
    pub fn with_validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Set background clear color [R, G, B, A] (0.0-1.0 range)
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Fence wait timeout in nanoseconds as passed to the driver
    pub fn fence_timeout_ns(&self) -> u64 {
        self.fence_timeout_ms
            .map_or(u64::MAX, |ms| ms.saturating_mul(1_000_000))
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: "Frame Pipeline".to_string(),
            max_frames_in_flight: 2,
            enable_validation: cfg!(debug_assertions),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            force_texture_staging: true,
            fence_timeout_ms: None,
        }
    }
}

/// Asset file locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Compiled vertex shader (SPIR-V)
    pub vertex_shader: String,
    /// Compiled fragment shader (SPIR-V)
    pub fragment_shader: String,
    /// Texture image sampled by the fragment shader
    pub texture: String,
}

impl AssetConfig {
    /// Resolve the vertex shader path against common build output locations
    pub fn vertex_shader_path(&self) -> PathBuf {
        resolve_asset_path(&self.vertex_shader, "target/shaders")
    }

    /// Resolve the fragment shader path against common build output locations
    pub fn fragment_shader_path(&self) -> PathBuf {
        resolve_asset_path(&self.fragment_shader, "target/shaders")
    }

    /// Resolve the texture path against the resources directory
    pub fn texture_path(&self) -> PathBuf {
        resolve_asset_path(&self.texture, "resources/textures")
    }
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            vertex_shader: "vertshader.spv".to_string(),
            fragment_shader: "fragshader.spv".to_string(),
            texture: "texture.jpg".to_string(),
        }
    }
}

/// Resolve an asset path by checking multiple common locations
///
/// Tries the path as given, then `<dir>/<file>` relative to the working
/// directory, then `../<dir>/<file>` for binaries run from a member crate.
/// Falls back to the original path so the eventual IO error names it.
pub fn resolve_asset_path(base_path: &str, dir: &str) -> PathBuf {
    let base = PathBuf::from(base_path);
    if base.exists() {
        return base;
    }

    let Some(file_name) = base.file_name() else {
        return base;
    };

    [Path::new(dir).join(file_name), Path::new("..").join(dir).join(file_name)]
        .into_iter()
        .find(|candidate| candidate.exists())
        .unwrap_or(base)
}

/// Top-level application configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Window settings
    pub window: WindowConfig,
    /// Renderer settings
    pub renderer: RendererConfig,
    /// Asset locations
    pub assets: AssetConfig,
}

impl AppConfig {
    /// Check values that would otherwise fail deep inside device setup
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }

        if self.renderer.max_frames_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "max_frames_in_flight must be at least 1".to_string(),
            ));
        }

        let assets = [
            ("vertex_shader", &self.assets.vertex_shader),
            ("fragment_shader", &self.assets.fragment_shader),
            ("texture", &self.assets.texture),
        ];
        if let Some((name, _)) = assets.iter().find(|(_, path)| path.is_empty()) {
            return Err(ConfigError::Invalid(format!("{name} path is empty")));
        }

        Ok(())
    }
}

impl Config for AppConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("frame_pipeline_{}_{}", std::process::id(), name))
    }

    #[test]
    fn test_default_config_matches_demo_scene() {
        let config = AppConfig::default();
        assert_eq!(config.window.title, "hello world");
        assert_eq!((config.window.width, config.window.height), (800, 600));
        assert_eq!(config.renderer.max_frames_in_flight, 2);
        assert_eq!(config.renderer.fence_timeout_ns(), u64::MAX);
        assert_eq!(config.assets.vertex_shader, "vertshader.spv");
        assert_eq!(config.assets.fragment_shader, "fragshader.spv");
        assert_eq!(config.assets.texture, "texture.jpg");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip() {
        let path = temp_path("round_trip.toml");
        let mut config = AppConfig::default();
        config.window.title = "resize test".to_string();
        config.renderer = RendererConfig::new("toml app")
            .with_max_frames_in_flight(3)
            .with_clear_color([0.1, 0.2, 0.3, 1.0]);

        config.save_to_file(&path).unwrap();
        let loaded = AppConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_ron_round_trip() {
        let path = temp_path("round_trip.ron");
        let mut config = AppConfig::default();
        config.assets.texture = "checker.png".to_string();

        config.save_to_file(&path).unwrap();
        let loaded = AppConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str("[window]\nwidth = 1024\n").unwrap();
        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.renderer.max_frames_in_flight, 2);
    }

    #[test]
    fn test_unsupported_extension() {
        let result = AppConfig::default().save_to_file(temp_path("config.json"));
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.window.height = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AppConfig::default();
        config.renderer.max_frames_in_flight = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.assets.fragment_shader.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bounded_fence_timeout() {
        let mut config = RendererConfig::default();
        config.fence_timeout_ms = Some(250);
        assert_eq!(config.fence_timeout_ns(), 250_000_000);
    }

    #[test]
    fn test_max_frames_in_flight_is_clamped() {
        assert_eq!(RendererConfig::default().with_max_frames_in_flight(0).max_frames_in_flight, 1);
        assert_eq!(RendererConfig::default().with_max_frames_in_flight(64).max_frames_in_flight, 8);
    }

    #[test]
    fn test_missing_asset_falls_back_to_given_path() {
        let resolved = resolve_asset_path("definitely_missing_shader.spv", "target/shaders");
        assert_eq!(resolved, PathBuf::from("definitely_missing_shader.spv"));
    }
}
