//! Configuration for the camera daemon

mod camera;
mod daemon;
mod lifecycle;
mod logging;

pub use camera::{CameraBackend, CameraConfig};
pub use daemon::{ServerConfig, DEFAULT_PORT};
pub use lifecycle::{LifecycleConfig, PathOverrides, DEFAULT_BASE_DIR, DEFAULT_DAEMON_NAME};
pub use logging::{LogFormat, LogLevel, LoggingConfig};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main daemon configuration, loaded from an optional TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Loopback server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Camera and recording configuration
    #[serde(default)]
    pub camera: CameraConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Validate all configuration fields.
    ///
    /// Collects every problem and reports them together.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        // Server validation
        if self.server.max_connections == 0 {
            errors.push("max_connections must be positive".to_string());
        }
        if self.server.backlog == 0 {
            errors.push("backlog must be positive".to_string());
        }

        // Camera validation
        let camera = &self.camera;
        if camera.recording_dir.as_os_str().is_empty() {
            errors.push("recording_dir must not be empty".to_string());
        }
        if camera.default_video_name.is_empty() {
            errors.push("default_video_name must not be empty".to_string());
        }
        if camera.default_video_name.contains(['/', '\\']) {
            errors.push("default_video_name must not contain path separators".to_string());
        }
        if camera.video_extension.is_empty() {
            errors.push("video_extension must not be empty".to_string());
        }
        if camera.video_extension.contains(['.', '/', '\\']) {
            errors.push("video_extension must not contain dots or path separators".to_string());
        }
        if camera.video_width == 0 || camera.video_height == 0 {
            errors.push("video resolution must be positive".to_string());
        }
        if camera.video_framerate == 0 {
            errors.push("video_framerate must be positive".to_string());
        }
        if camera.still_width == Some(0) || camera.still_height == Some(0) {
            errors.push("still resolution must be positive when set".to_string());
        }
        if camera.capture_timeout_secs == 0 {
            errors.push("capture_timeout_secs must be positive".to_string());
        }
        if camera.backend == CameraBackend::Rpicam
            && (camera.still_command.is_empty() || camera.video_command.is_empty())
        {
            errors.push("rpicam backend requires still_command and video_command".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }
}
