//! rpicamd: Raspberry Pi camera daemon
//!
//! One background process owns the camera and serves local clients over a
//! newline-delimited text protocol on a loopback TCP port:
//! - still JPEG captures, returned raw on the connection
//! - H.264 recording start/stop into a fixed recording directory
//! - capture parameter changes (brightness, shutter speed, ISO, framerate)
//! - single-instance start/stop/restart/status via a locked PID file

pub mod camera;
pub mod client;
pub mod config;
pub mod daemon;
pub mod logging;

pub use config::Config;
