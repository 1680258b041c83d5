//! Camera driver seam
//!
//! The daemon never talks to hardware directly. Everything it needs from a
//! camera goes through [`CameraDriver`], so a backend only has to know how to
//! grab a JPEG, start and stop an H.264 recording, and accept new settings.

use std::path::Path;

use async_trait::async_trait;

use super::CameraError;

/// Capture parameters a driver should honor on its next operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverSettings {
    /// Frame size, driver default when unset
    pub resolution: Option<(u32, u32)>,
    pub framerate: Option<u32>,
    /// Brightness on a 0-100 scale, 50 is neutral
    pub brightness: Option<u32>,
    /// Shutter speed in microseconds
    pub shutter_speed: Option<u32>,
    pub iso: Option<u32>,
}

/// Backend that owns the physical camera
///
/// Implementations may assume calls never overlap: the daemon routes every
/// call through a single owner.
#[async_trait]
pub trait CameraDriver: Send {
    /// Short backend name for logs
    fn name(&self) -> &str;

    /// Capture one JPEG-encoded still frame
    async fn capture_jpeg(&mut self, settings: &DriverSettings) -> Result<Vec<u8>, CameraError>;

    /// Begin recording H.264 to `path`
    async fn start_recording(
        &mut self,
        path: &Path,
        settings: &DriverSettings,
    ) -> Result<(), CameraError>;

    /// Finish the active recording and finalize its file
    async fn stop_recording(&mut self) -> Result<(), CameraError>;

    /// Push new settings to the hardware. Rejecting them leaves the previous
    /// settings in effect.
    async fn apply_settings(&mut self, settings: &DriverSettings) -> Result<(), CameraError>;

    /// Release the hardware handle
    async fn close(&mut self) -> Result<(), CameraError>;
}
