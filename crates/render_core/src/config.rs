//! # Configuration
//!
//! Settings for the viewer and the render core, loadable from TOML or RON.
//! Defaults reproduce the stock viewer: an 800x600 window, two frames in
//! flight, a black clear color and the viking room model.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file, choosing the format by extension
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

    /// Save configuration to file, choosing the format by extension
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

#[derive(Debug, Clone, Copy)]
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

    /// A value is out of its accepted range
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Window creation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Title bar text
    pub title: String,
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Model Viewer".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// Compiled SPIR-V shader locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Path to the vertex shader SPIR-V file
    pub vertex_shader_path: String,
    /// Path to the fragment shader SPIR-V file
    pub fragment_shader_path: String,
}

impl ShaderConfig {
    /// Create a new shader configuration
    pub fn new(vertex_path: impl Into<String>, fragment_path: impl Into<String>) -> Self {
        Self {
            vertex_shader_path: vertex_path.into(),
            fragment_shader_path: fragment_path.into(),
        }
    }

    /// Check that both shader files exist
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, path) in [
            ("shaders.vertex_shader_path", &self.vertex_shader_path),
            ("shaders.fragment_shader_path", &self.fragment_shader_path),
        ] {
            if !Path::new(path).exists() {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("shader not found at {path}"),
                });
            }
        }
        Ok(())
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::new(
            "target/shaders/model.vert.spv",
            "target/shaders/model.frag.spv",
        )
    }
}

/// Model and texture locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetConfig {
    /// Wavefront OBJ file to display
    pub model_path: String,
    /// Texture applied to the model
    pub texture_path: String,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            model_path: "models/viking_room.obj".to_string(),
            texture_path: "textures/viking_room.png".to_string(),
        }
    }
}

/// # Render configuration
///
/// Top level settings consumed by [`crate::RenderCore`] and the viewer binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Window settings
    pub window: WindowConfig,
    /// Number of frames the CPU may record ahead of the GPU
    pub max_frames_in_flight: usize,
    /// RGBA clear color of the color attachment
    pub clear_color: [f32; 4],
    /// Whether to enable Vulkan validation layers; `None` follows the build type
    pub enable_validation: Option<bool>,
    /// Upper bound on a single in-flight fence wait, in nanoseconds
    pub fence_timeout_ns: u64,
    /// Shader configuration
    pub shaders: ShaderConfig,
    /// Asset configuration
    pub assets: AssetConfig,
    /// Default log filter used when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            application_name: "Model Viewer".to_string(),
            window: WindowConfig::default(),
            max_frames_in_flight: 2,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            enable_validation: None,
            fence_timeout_ns: 10_000_000_000,
            shaders: ShaderConfig::default(),
            assets: AssetConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Config for RenderConfig {}

impl RenderConfig {
    /// Create a configuration with a custom application name
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            ..Self::default()
        }
    }

    /// Set maximum frames in flight
    #[must_use]
    pub fn with_max_frames_in_flight(mut self, frames: usize) -> Self {
        self.max_frames_in_flight = frames;
        self
    }

    /// Set custom shader configuration
    #[must_use]
    pub fn with_shaders(mut self, shaders: ShaderConfig) -> Self {
        self.shaders = shaders;
        self
    }

    /// Force validation layers on or off
    #[must_use]
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Resolve the validation setting against the build type
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Reject settings the core cannot run with, including missing shaders
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frames_in_flight < 2 {
            return Err(ConfigError::Invalid {
                field: "max_frames_in_flight",
                reason: format!("must be at least 2, got {}", self.max_frames_in_flight),
            });
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid {
                field: "window",
                reason: format!(
                    "dimensions must be non-zero, got {}x{}",
                    self.window.width, self.window.height
                ),
            });
        }
        self.shaders.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Empty shader files in `dir`, enough for validation
    fn shaders_in(dir: &Path) -> ShaderConfig {
        let vertex = dir.join("model.vert.spv");
        let fragment = dir.join("model.frag.spv");
        std::fs::write(&vertex, b"").unwrap();
        std::fs::write(&fragment, b"").unwrap();
        ShaderConfig::new(vertex.to_string_lossy(), fragment.to_string_lossy())
    }

    #[test]
    fn test_defaults_match_stock_viewer() {
        let config = RenderConfig::default();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.max_frames_in_flight, 2);
        assert_eq!(config.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(config.assets.model_path, "models/viking_room.obj");

        let dir = tempfile::tempdir().unwrap();
        let config = config.with_shaders(shaders_in(dir.path()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_shader_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut shaders = shaders_in(dir.path());
        shaders.vertex_shader_path = dir.path().join("absent.vert.spv").to_string_lossy().into_owned();

        let config = RenderConfig::default().with_shaders(shaders);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "shaders.vertex_shader_path", .. })
        ));
    }

    #[test]
    fn test_single_frame_in_flight_rejected() {
        let config = RenderConfig::default().with_max_frames_in_flight(1);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "max_frames_in_flight", .. })
        ));
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut config = RenderConfig::default();
        config.window.height = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "window", .. })
        ));
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("viewer.toml");

        let config = RenderConfig::new("Round Trip").with_max_frames_in_flight(3);
        config.save_to_file(&path).unwrap();

        let loaded = RenderConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_ron_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("viewer.ron");

        let config = RenderConfig::default().with_validation(false);
        config.save_to_file(&path).unwrap();

        let loaded = RenderConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.enable_validation, Some(false));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "max_frames_in_flight = 3\n").unwrap();

        let loaded = RenderConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.max_frames_in_flight, 3);
        assert_eq!(loaded.window, WindowConfig::default());
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let result = RenderConfig::load_from_file("viewer.yaml");
        assert!(result.is_err());
    }
}
