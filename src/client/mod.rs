//! Client Module
//!
//! Client side of the camera line protocol. The `snapshot` command and the
//! integration tests use it; any program that can open a TCP socket can do
//! the same by hand.

pub mod connection;

pub use connection::CameraConnection;

use std::net::{Ipv4Addr, SocketAddr};

use thiserror::Error;

use crate::config::DEFAULT_PORT;
use crate::daemon::protocol::{Command, Parameter};

/// Errors that can occur when communicating with the daemon
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Daemon is not running. Start it with: rpicamd start")]
    DaemonNotRunning,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// The daemon closed the connection without data (capture failed)
    #[error("Daemon returned no image data")]
    EmptyImage,
}

/// Talks to a camera daemon on the local host
#[derive(Debug, Clone, Copy)]
pub struct CameraClient {
    addr: SocketAddr,
}

impl CameraClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Client for a daemon listening on `port` on the loopback interface
    pub fn with_port(port: u16) -> Self {
        Self::new(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Open a connection for sending several control commands
    pub async fn connect(&self) -> Result<CameraConnection, ClientError> {
        CameraConnection::connect_to(self.addr).await
    }

    /// Fetch one JPEG still
    pub async fn fetch_image(&self) -> Result<Vec<u8>, ClientError> {
        self.connect().await?.fetch_image().await
    }

    /// Start recording to `filename` (empty for the daemon's default name)
    pub async fn start_video(&self, filename: &str) -> Result<(), ClientError> {
        self.send_one(Command::StartVideo {
            filename: filename.to_string(),
        })
        .await
    }

    pub async fn stop_video(&self) -> Result<(), ClientError> {
        self.send_one(Command::StopVideo {
            filename: String::new(),
        })
        .await
    }

    pub async fn set_parameter(&self, parameter: Parameter, value: i64) -> Result<(), ClientError> {
        self.send_one(Command::SetParameter { parameter, value }).await
    }

    async fn send_one(&self, command: Command) -> Result<(), ClientError> {
        let mut conn = self.connect().await?;
        conn.send(&command).await?;
        conn.close().await
    }
}

impl Default for CameraClient {
    fn default() -> Self {
        Self::with_port(DEFAULT_PORT)
    }
}
