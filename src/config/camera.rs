//! Camera hardware and recording configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Which driver owns the camera hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackend {
    /// Raspberry Pi camera via the `rpicam-still` / `rpicam-vid` tools
    Rpicam,
    /// Synthetic test pattern, no hardware required
    Mock,
}

impl CameraBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rpicam => "rpicam",
            Self::Mock => "mock",
        }
    }
}

impl fmt::Display for CameraBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Driver backend
    pub backend: CameraBackend,
    /// Directory all recordings are written into
    pub recording_dir: PathBuf,
    /// Basename used when `video_start` carries no filename
    pub default_video_name: String,
    /// Extension enforced on every recording (without the dot)
    pub video_extension: String,
    /// Recording resolution applied before each recording starts
    pub video_width: u32,
    pub video_height: u32,
    /// Recording framerate applied before each recording starts
    pub video_framerate: u32,
    /// Still capture resolution (driver default when unset)
    pub still_width: Option<u32>,
    pub still_height: Option<u32>,
    /// Executable used for still captures
    pub still_command: String,
    /// Executable used for recordings
    pub video_command: String,
    /// Upper bound on a single still capture
    pub capture_timeout_secs: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            backend: CameraBackend::Rpicam,
            recording_dir: PathBuf::from("/var/ramdrive"),
            default_video_name: "malpi".to_string(),
            video_extension: "h264".to_string(),
            video_width: 640,
            video_height: 480,
            video_framerate: 15,
            still_width: None,
            still_height: None,
            still_command: "rpicam-still".to_string(),
            video_command: "rpicam-vid".to_string(),
            capture_timeout_secs: 10,
        }
    }
}

impl CameraConfig {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs)
    }
}
