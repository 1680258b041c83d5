//! Camera Module
//!
//! Exclusive ownership of the single camera. The driver sits behind
//! [`CameraResource`], and the resource sits behind [`CameraHandle`], which
//! every connection clones. The handle's lock is the only way in, so at most
//! one camera operation runs at any moment.

pub mod driver;
pub mod mock;
pub mod resource;
pub mod rpicam;

pub use driver::{CameraDriver, DriverSettings};
pub use mock::{MockDriver, MockProbe};
pub use resource::{normalize_video_filename, CameraResource, CameraState};
pub use rpicam::RpicamDriver;

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::{CameraBackend, CameraConfig};
use crate::daemon::protocol::Parameter;

/// Errors raised by camera operations
#[derive(Debug, Error)]
pub enum CameraError {
    /// The driver call failed (timeout, device gone, tool crashed)
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// A parameter value was rejected before reaching the hardware
    #[error("Invalid value {value} for {name}: {reason}")]
    InvalidParameter {
        name: String,
        value: i64,
        reason: String,
    },

    /// The camera has already been released
    #[error("Camera is closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Open the driver selected by configuration.
///
/// Failure here is fatal for the daemon: it has no camera to serve.
pub async fn open_driver(config: &CameraConfig) -> Result<Box<dyn CameraDriver>, CameraError> {
    let driver: Box<dyn CameraDriver> = match config.backend {
        CameraBackend::Rpicam => Box::new(RpicamDriver::open(config).await?),
        CameraBackend::Mock => Box::new(MockDriver::new()),
    };
    info!("Camera backend: {}", config.backend);
    Ok(driver)
}

/// Cloneable, serializing access to the one [`CameraResource`]
#[derive(Clone)]
pub struct CameraHandle {
    inner: Arc<Mutex<CameraResource>>,
}

impl CameraHandle {
    pub fn new(resource: CameraResource) -> Self {
        Self {
            inner: Arc::new(Mutex::new(resource)),
        }
    }

    pub async fn capture_image(&self) -> Result<Vec<u8>, CameraError> {
        self.inner.lock().await.capture_image().await
    }

    pub async fn start_recording(&self, filename: &str) -> Result<PathBuf, CameraError> {
        self.inner.lock().await.start_recording(filename).await
    }

    pub async fn stop_recording(&self) -> Result<(), CameraError> {
        self.inner.lock().await.stop_recording().await
    }

    pub async fn set_parameter(&self, parameter: Parameter, value: i64) -> Result<(), CameraError> {
        self.inner.lock().await.set_parameter(parameter, value).await
    }

    /// Waits for any in-flight operation, then releases the hardware
    pub async fn shutdown(&self) {
        self.inner.lock().await.shutdown().await
    }

    pub async fn state(&self) -> CameraState {
        self.inner.lock().await.state().clone()
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.is_closed()
    }
}
