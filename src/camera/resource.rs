//! Exclusive owner of the camera hardware
//!
//! [`CameraResource`] holds the driver and the state the daemon believes the
//! camera is in. It is not shareable on its own; concurrent access goes through
//! [`super::CameraHandle`].

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::config::CameraConfig;
use crate::daemon::protocol::Parameter;

use super::driver::{CameraDriver, DriverSettings};
use super::CameraError;

/// Valid brightness range accepted by `set brightness`
pub const BRIGHTNESS_RANGE: std::ops::RangeInclusive<i64> = 1..=100;

/// Snapshot of the camera's logical state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraState {
    pub recording: bool,
    /// Target file of the active recording, set exactly when `recording`
    pub active_file: Option<PathBuf>,
    pub resolution: Option<(u32, u32)>,
    pub framerate: Option<u32>,
    pub brightness: Option<u32>,
    pub shutter_speed: Option<u32>,
    pub iso: Option<u32>,
}

impl CameraState {
    fn new() -> Self {
        Self {
            recording: false,
            active_file: None,
            resolution: None,
            framerate: None,
            brightness: None,
            shutter_speed: None,
            iso: None,
        }
    }

    fn settings(&self) -> DriverSettings {
        DriverSettings {
            resolution: self.resolution,
            framerate: self.framerate,
            brightness: self.brightness,
            shutter_speed: self.shutter_speed,
            iso: self.iso,
        }
    }
}

/// Recording location rules
#[derive(Debug, Clone)]
struct RecordingPolicy {
    dir: PathBuf,
    default_name: String,
    extension: String,
    resolution: (u32, u32),
    framerate: u32,
}

/// Sole owner of the camera driver
pub struct CameraResource {
    driver: Box<dyn CameraDriver>,
    state: CameraState,
    policy: RecordingPolicy,
    closed: bool,
}

impl CameraResource {
    pub fn new(driver: Box<dyn CameraDriver>, config: &CameraConfig) -> Self {
        Self {
            driver,
            state: CameraState::new(),
            policy: RecordingPolicy {
                dir: config.recording_dir.clone(),
                default_name: config.default_video_name.clone(),
                extension: config.video_extension.clone(),
                resolution: (config.video_width, config.video_height),
                framerate: config.video_framerate,
            },
            closed: false,
        }
    }

    pub fn state(&self) -> &CameraState {
        &self.state
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<(), CameraError> {
        if self.closed {
            Err(CameraError::Closed)
        } else {
            Ok(())
        }
    }

    /// Capture one JPEG still. Recording state is untouched.
    pub async fn capture_image(&mut self) -> Result<Vec<u8>, CameraError> {
        self.ensure_open()?;
        let settings = self.state.settings();
        let jpeg = self.driver.capture_jpeg(&settings).await?;
        debug!("Captured {} byte image", jpeg.len());
        Ok(jpeg)
    }

    /// Start recording to `filename` under the recording directory.
    ///
    /// An active recording is stopped first. The name is reduced to a bare
    /// basename with the recording extension enforced.
    pub async fn start_recording(&mut self, filename: &str) -> Result<PathBuf, CameraError> {
        self.ensure_open()?;
        if self.state.recording {
            info!("Preempting active recording");
            self.stop_recording().await?;
        }

        let path = self.recording_path(filename);

        self.state.resolution = Some(self.policy.resolution);
        self.state.framerate = Some(self.policy.framerate);
        let settings = self.state.settings();

        self.driver.start_recording(&path, &settings).await?;
        self.state.recording = true;
        self.state.active_file = Some(path.clone());
        info!("Recording to {}", path.display());
        Ok(path)
    }

    /// Stop the active recording; no-op when idle.
    ///
    /// The state is cleared even when the driver reports a failure so the
    /// daemon never believes a dead recording is still running.
    pub async fn stop_recording(&mut self) -> Result<(), CameraError> {
        if !self.state.recording {
            return Ok(());
        }
        let result = self.driver.stop_recording().await;
        if let Some(path) = self.state.active_file.take() {
            info!("Stopped recording {}", path.display());
        }
        self.state.recording = false;
        result
    }

    /// Apply a capture parameter.
    ///
    /// Only brightness is range checked. A rejected value or a driver failure
    /// leaves the state unchanged.
    pub async fn set_parameter(&mut self, parameter: Parameter, value: i64) -> Result<(), CameraError> {
        self.ensure_open()?;

        let invalid = |reason: &str| CameraError::InvalidParameter {
            name: parameter.as_str().to_string(),
            value,
            reason: reason.to_string(),
        };
        let unsigned = u32::try_from(value).map_err(|_| invalid("not representable"))?;

        let mut next = self.state.clone();
        match parameter {
            Parameter::Brightness => {
                if !BRIGHTNESS_RANGE.contains(&value) {
                    return Err(invalid("must be between 1 and 100"));
                }
                next.brightness = Some(unsigned);
            }
            Parameter::ShutterSpeed => next.shutter_speed = Some(unsigned),
            Parameter::Iso => next.iso = Some(unsigned),
            Parameter::Framerate => next.framerate = Some(unsigned),
        }

        self.driver.apply_settings(&next.settings()).await?;
        info!("Set {} to {}", parameter, value);
        self.state = next;
        Ok(())
    }

    /// Stop any recording and release the driver. Safe to call repeatedly.
    pub async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.stop_recording().await {
            warn!("Failed to stop recording during shutdown: {}", e);
        }
        if let Err(e) = self.driver.close().await {
            warn!("Failed to close camera: {}", e);
        }
        self.closed = true;
        info!("Camera released ({} driver)", self.driver.name());
    }

    /// Resolve a client supplied name to a path inside the recording directory
    pub fn recording_path(&self, filename: &str) -> PathBuf {
        self.policy
            .dir
            .join(normalize_video_filename(filename, &self.policy.default_name, &self.policy.extension))
    }
}

/// Reduce a client supplied name to a safe file name.
///
/// Keeps only the final path component, falls back to `default_name` when
/// nothing is left, and appends `.extension` unless already present.
pub fn normalize_video_filename(filename: &str, default_name: &str, extension: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .replace('\0', "");
    let base = if base.is_empty() {
        default_name.to_string()
    } else {
        base
    };

    let suffix = format!(".{}", extension);
    if base.ends_with(&suffix) {
        base
    } else {
        base + &suffix
    }
}
