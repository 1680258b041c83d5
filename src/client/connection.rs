//! Client Connection
//!
//! Handles the loopback TCP connection to the daemon.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::daemon::protocol::Command;

use super::ClientError;

/// Client connection to the daemon
pub struct CameraConnection {
    stream: TcpStream,
}

impl CameraConnection {
    /// Connect to the daemon at `addr`
    pub async fn connect_to(addr: SocketAddr) -> Result<Self, ClientError> {
        debug!("Connecting to daemon at: {}", addr);

        let stream = TcpStream::connect(addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                ClientError::DaemonNotRunning
            } else {
                ClientError::ConnectionFailed(e.to_string())
            }
        })?;

        debug!("Connected to daemon");
        Ok(Self { stream })
    }

    /// Send one command line. Control commands get no reply.
    pub async fn send(&mut self, command: &Command) -> Result<(), ClientError> {
        let line = format!("{}\n", command);
        self.stream
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ClientError::RequestFailed(format!("Failed to send '{}': {}", command, e)))?;
        self.stream
            .flush()
            .await
            .map_err(|e| ClientError::RequestFailed(format!("Failed to flush: {}", e)))
    }

    /// Request a still image and read it until the daemon closes the
    /// connection. Consumes the connection since the daemon closes it.
    pub async fn fetch_image(mut self) -> Result<Vec<u8>, ClientError> {
        self.send(&Command::CaptureImage).await?;
        // Signal "no more input" so the daemon sees a complete exchange
        self.stream
            .shutdown()
            .await
            .map_err(|e| ClientError::RequestFailed(format!("Failed to shut down write half: {}", e)))?;

        let mut jpeg = Vec::new();
        self.stream
            .read_to_end(&mut jpeg)
            .await
            .map_err(|e| ClientError::RequestFailed(format!("Failed to read image: {}", e)))?;

        if jpeg.is_empty() {
            return Err(ClientError::EmptyImage);
        }
        debug!("Received {} byte image", jpeg.len());
        Ok(jpeg)
    }

    /// Close the connection after all sent lines were delivered
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.stream
            .shutdown()
            .await
            .map_err(|e| ClientError::RequestFailed(format!("Failed to close connection: {}", e)))
    }
}
