//! Test-pattern driver
//!
//! Stands in for real hardware during development and in tests. Every call is
//! recorded, and overlapping calls are counted so callers can check that the
//! daemon never drives the camera from two places at once.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::driver::{CameraDriver, DriverSettings};
use super::CameraError;

/// Minimal JFIF-framed image returned by every capture
pub const TEST_FRAME: &[u8] = &[
    0xFF, 0xD8, // SOI
    0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x01, 0x00, 0x00, 0x01, 0x00,
    0x01, 0x00, 0x00, // APP0
    0xFF, 0xD9, // EOI
];

/// Header written at the start of every mock recording
const RECORDING_HEADER: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x67];

/// One call observed by the mock driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Capture,
    StartRecording(PathBuf),
    StopRecording,
    ApplySettings(DriverSettings),
    Close,
}

#[derive(Default)]
struct Shared {
    calls: Mutex<Vec<DriverCall>>,
    in_flight: AtomicUsize,
    overlaps: AtomicUsize,
    fail_capture: AtomicBool,
    fail_settings: AtomicBool,
}

/// Read-only view into a [`MockDriver`] that outlives the driver itself
#[derive(Clone)]
pub struct MockProbe {
    shared: Arc<Shared>,
}

impl MockProbe {
    /// All calls so far, in order
    pub fn calls(&self) -> Vec<DriverCall> {
        self.shared.calls.lock().clone()
    }

    pub fn capture_count(&self) -> usize {
        self.shared
            .calls
            .lock()
            .iter()
            .filter(|call| matches!(call, DriverCall::Capture))
            .count()
    }

    /// Number of calls that started while another was still running
    pub fn overlaps(&self) -> usize {
        self.shared.overlaps.load(Ordering::SeqCst)
    }

    /// Make subsequent captures fail with a hardware error
    pub fn fail_captures(&self, fail: bool) {
        self.shared.fail_capture.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent settings changes fail with a hardware error
    pub fn fail_settings(&self, fail: bool) {
        self.shared.fail_settings.store(fail, Ordering::SeqCst);
    }
}

/// In-process camera producing [`TEST_FRAME`] and stub recording files
pub struct MockDriver {
    shared: Arc<Shared>,
    latency: Duration,
    recording: Option<File>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            latency: Duration::ZERO,
            recording: None,
        }
    }

    /// Simulated time each call holds the camera
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn probe(&self) -> MockProbe {
        MockProbe {
            shared: self.shared.clone(),
        }
    }

    async fn enter(&self, call: DriverCall) -> CallGuard<'_> {
        if self.shared.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.shared.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let guard = CallGuard {
            shared: &self.shared,
        };
        self.shared.calls.lock().push(call);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        guard
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

struct CallGuard<'a> {
    shared: &'a Shared,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CameraDriver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    async fn capture_jpeg(&mut self, _settings: &DriverSettings) -> Result<Vec<u8>, CameraError> {
        let _guard = self.enter(DriverCall::Capture).await;
        if self.shared.fail_capture.load(Ordering::SeqCst) {
            return Err(CameraError::Hardware("mock capture failure".to_string()));
        }
        Ok(TEST_FRAME.to_vec())
    }

    async fn start_recording(
        &mut self,
        path: &Path,
        _settings: &DriverSettings,
    ) -> Result<(), CameraError> {
        let guard = self.enter(DriverCall::StartRecording(path.to_path_buf())).await;
        let mut file = File::create(path)?;
        file.write_all(RECORDING_HEADER)?;
        drop(guard);
        self.recording = Some(file);
        Ok(())
    }

    async fn stop_recording(&mut self) -> Result<(), CameraError> {
        drop(self.enter(DriverCall::StopRecording).await);
        if let Some(file) = self.recording.take() {
            file.sync_all()?;
        }
        Ok(())
    }

    async fn apply_settings(&mut self, settings: &DriverSettings) -> Result<(), CameraError> {
        let _guard = self.enter(DriverCall::ApplySettings(settings.clone())).await;
        if self.shared.fail_settings.load(Ordering::SeqCst) {
            return Err(CameraError::Hardware("mock settings failure".to_string()));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), CameraError> {
        drop(self.enter(DriverCall::Close).await);
        self.recording = None;
        Ok(())
    }
}
