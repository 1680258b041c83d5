//! Command Handler
//!
//! Runs the line protocol for one client connection. Lines are handled
//! strictly in order; a control line never produces a reply, and the first
//! capture request ends the connection after the image is written.

use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::camera::CameraHandle;

use super::protocol::{parse_line, trim_line_ending, Command};

/// Longest line accepted before the connection is dropped
pub const MAX_LINE_LENGTH: usize = 4096;

/// What the connection loop should do after a line
#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    /// Keep reading lines
    Continue,
    /// Write these bytes, then close
    Image(Vec<u8>),
    /// Close without writing anything
    Close,
}

/// Why a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEnd {
    /// Client closed its write side
    ClientClosed,
    /// A capture request was answered (or failed) and the connection closed
    Answered,
    IdleTimeout,
    Shutdown,
    LineTooLong,
}

/// Translates client lines into camera operations
#[derive(Clone)]
pub struct CommandHandler {
    camera: CameraHandle,
    idle_timeout: Option<Duration>,
}

impl CommandHandler {
    pub fn new(camera: CameraHandle, idle_timeout: Option<Duration>) -> Self {
        Self {
            camera,
            idle_timeout,
        }
    }

    /// Handle a single line (terminator already stripped)
    pub async fn handle_line(&self, line: &str) -> Reply {
        let command = match parse_line(line) {
            Ok(command) => command,
            Err(e) => {
                warn!("Ignoring line {:?}: {}", line, e);
                return Reply::Continue;
            }
        };

        match command {
            Command::StartVideo { filename } => {
                if let Err(e) = self.camera.start_recording(&filename).await {
                    error!("video_start failed: {}", e);
                }
                Reply::Continue
            }
            Command::StopVideo { .. } => {
                if let Err(e) = self.camera.stop_recording().await {
                    error!("video_stop failed: {}", e);
                }
                Reply::Continue
            }
            Command::SetParameter { parameter, value } => {
                if let Err(e) = self.camera.set_parameter(parameter, value).await {
                    warn!("set {} {} rejected: {}", parameter, value, e);
                }
                Reply::Continue
            }
            Command::CaptureImage => match self.camera.capture_image().await {
                Ok(jpeg) => Reply::Image(jpeg),
                Err(e) => {
                    error!("Image capture failed: {}", e);
                    Reply::Close
                }
            },
        }
    }

    /// Serve one connection until the client finishes, a capture is
    /// answered, the idle timeout fires, or the daemon shuts down.
    pub async fn serve<S>(
        &self,
        stream: S,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<ConnectionEnd>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();

        loop {
            buf.clear();

            let read = async {
                // Room for a full line plus `\r\n`
                let mut limited = (&mut reader).take(MAX_LINE_LENGTH as u64 + 2);
                limited.read_until(b'\n', &mut buf).await
            };
            let read = async {
                match self.idle_timeout {
                    Some(limit) => tokio::time::timeout(limit, read).await.ok(),
                    None => Some(read.await),
                }
            };

            let n = tokio::select! {
                result = read => match result {
                    Some(result) => result?,
                    None => {
                        debug!("Connection idle for {:?}, closing", self.idle_timeout);
                        return Ok(ConnectionEnd::IdleTimeout);
                    }
                },
                // A dropped sender also means the daemon is going away
                _ = shutdown.recv() => {
                    debug!("Closing connection for shutdown");
                    return Ok(ConnectionEnd::Shutdown);
                }
            };

            if n == 0 {
                debug!("Client closed connection");
                return Ok(ConnectionEnd::ClientClosed);
            }
            let content = match buf.strip_suffix(b"\n") {
                Some(rest) => rest.strip_suffix(b"\r").unwrap_or(rest),
                None => &buf[..],
            };
            if content.len() > MAX_LINE_LENGTH {
                warn!("Line exceeds {} bytes, dropping connection", MAX_LINE_LENGTH);
                return Ok(ConnectionEnd::LineTooLong);
            }

            let text = String::from_utf8_lossy(&buf);
            let line = trim_line_ending(&text);
            debug!("Received: {:?}", line);

            match self.handle_line(line).await {
                Reply::Continue => {}
                Reply::Image(jpeg) => {
                    writer.write_all(&jpeg).await?;
                    writer.shutdown().await?;
                    info!("Sent {} byte image", jpeg.len());
                    return Ok(ConnectionEnd::Answered);
                }
                Reply::Close => {
                    writer.shutdown().await?;
                    return Ok(ConnectionEnd::Answered);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::mock::{DriverCall, MockProbe, TEST_FRAME};
    use crate::camera::{CameraResource, MockDriver};
    use crate::config::CameraConfig;
    use tempfile::TempDir;

    fn create_test_handler(temp: &TempDir, idle: Option<Duration>) -> (CommandHandler, CameraHandle, MockProbe) {
        let driver = MockDriver::new();
        let probe = driver.probe();
        let config = CameraConfig {
            recording_dir: temp.path().to_path_buf(),
            ..CameraConfig::default()
        };
        let camera = CameraHandle::new(CameraResource::new(Box::new(driver), &config));
        (CommandHandler::new(camera.clone(), idle), camera, probe)
    }

    #[tokio::test]
    async fn control_lines_continue_without_reply() {
        let temp = TempDir::new().unwrap();
        let (handler, camera, _probe) = create_test_handler(&temp, None);

        assert_eq!(handler.handle_line("video_start test").await, Reply::Continue);
        assert!(camera.state().await.recording);
        assert_eq!(handler.handle_line("set brightness 70").await, Reply::Continue);
        assert_eq!(handler.handle_line("video_stop").await, Reply::Continue);
        assert!(!camera.state().await.recording);
    }

    #[tokio::test]
    async fn malformed_set_changes_nothing() {
        let temp = TempDir::new().unwrap();
        let (handler, camera, probe) = create_test_handler(&temp, None);
        let before = camera.state().await;

        for line in ["set brightness", "set contrast 5", "set iso x", "set a b c", "set brightness 0"] {
            assert_eq!(handler.handle_line(line).await, Reply::Continue, "{line}");
        }

        assert_eq!(camera.state().await, before);
        assert!(probe.calls().is_empty());
    }

    #[tokio::test]
    async fn unrecognized_line_captures_exactly_once() {
        let temp = TempDir::new().unwrap();
        let (handler, _camera, probe) = create_test_handler(&temp, None);

        for (i, line) in ["image", "", "gibberish"].into_iter().enumerate() {
            assert_eq!(handler.handle_line(line).await, Reply::Image(TEST_FRAME.to_vec()));
            assert_eq!(probe.capture_count(), i + 1);
        }
    }

    #[tokio::test]
    async fn capture_failure_closes_without_data() {
        let temp = TempDir::new().unwrap();
        let (handler, _camera, probe) = create_test_handler(&temp, None);
        probe.fail_captures(true);
        assert_eq!(handler.handle_line("image").await, Reply::Close);
    }

    #[tokio::test]
    async fn serve_writes_image_and_closes() {
        let temp = TempDir::new().unwrap();
        let (handler, _camera, probe) = create_test_handler(&temp, None);
        let (_tx, rx) = broadcast::channel(1);
        let (mut client, server) = tokio::io::duplex(1024);

        let task = tokio::spawn(async move { handler.serve(server, rx).await });

        client.write_all(b"set iso 200\nimage\nvideo_start late\n").await.unwrap();
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();

        assert_eq!(received, TEST_FRAME);
        assert_eq!(task.await.unwrap().unwrap(), ConnectionEnd::Answered);
        // Lines after the capture are never processed
        let calls = probe.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1], DriverCall::Capture);
    }

    #[tokio::test]
    async fn serve_handles_final_line_without_newline() {
        let temp = TempDir::new().unwrap();
        let (handler, _camera, _probe) = create_test_handler(&temp, None);
        let (_tx, rx) = broadcast::channel(1);
        let (mut client, server) = tokio::io::duplex(1024);

        let task = tokio::spawn(async move { handler.serve(server, rx).await });

        client.write_all(b"image").await.unwrap();
        client.shutdown().await.unwrap();
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();

        assert_eq!(received, TEST_FRAME);
        assert_eq!(task.await.unwrap().unwrap(), ConnectionEnd::Answered);
    }

    #[tokio::test]
    async fn serve_ends_when_client_closes() {
        let temp = TempDir::new().unwrap();
        let (handler, camera, _probe) = create_test_handler(&temp, None);
        let (_tx, rx) = broadcast::channel(1);
        let (mut client, server) = tokio::io::duplex(1024);

        let task = tokio::spawn(async move { handler.serve(server, rx).await });

        client.write_all(b"video_start test\r\n").await.unwrap();
        client.shutdown().await.unwrap();

        assert_eq!(task.await.unwrap().unwrap(), ConnectionEnd::ClientClosed);
        assert_eq!(
            camera.state().await.active_file,
            Some(temp.path().join("test.h264"))
        );
    }

    #[tokio::test]
    async fn serve_times_out_idle_clients() {
        let temp = TempDir::new().unwrap();
        let (handler, _camera, _probe) =
            create_test_handler(&temp, Some(Duration::from_millis(50)));
        let (_tx, rx) = broadcast::channel(1);
        let (_client, server) = tokio::io::duplex(1024);

        let end = handler.serve(server, rx).await.unwrap();
        assert_eq!(end, ConnectionEnd::IdleTimeout);
    }

    #[tokio::test]
    async fn serve_stops_on_shutdown() {
        let temp = TempDir::new().unwrap();
        let (handler, _camera, _probe) = create_test_handler(&temp, None);
        let (tx, rx) = broadcast::channel(1);
        let (_client, server) = tokio::io::duplex(1024);

        let task = tokio::spawn(async move { handler.serve(server, rx).await });
        tx.send(()).unwrap();

        assert_eq!(task.await.unwrap().unwrap(), ConnectionEnd::Shutdown);
    }

    #[tokio::test]
    async fn serve_drops_overlong_lines() {
        let temp = TempDir::new().unwrap();
        let (handler, _camera, probe) = create_test_handler(&temp, None);
        let (_tx, rx) = broadcast::channel(1);
        let (mut client, server) = tokio::io::duplex(MAX_LINE_LENGTH * 2);

        let task = tokio::spawn(async move { handler.serve(server, rx).await });
        client.write_all(&vec![b'x'; MAX_LINE_LENGTH + 10]).await.unwrap();

        assert_eq!(task.await.unwrap().unwrap(), ConnectionEnd::LineTooLong);
        assert_eq!(probe.capture_count(), 0);
    }

    #[tokio::test]
    async fn serve_accepts_line_at_the_limit() {
        let temp = TempDir::new().unwrap();
        let (handler, _camera, probe) = create_test_handler(&temp, None);
        let (_tx, rx) = broadcast::channel(1);
        let (mut client, server) = tokio::io::duplex(MAX_LINE_LENGTH * 2);

        let task = tokio::spawn(async move { handler.serve(server, rx).await });
        let mut line = vec![b'x'; MAX_LINE_LENGTH];
        line.extend_from_slice(b"\r\n");
        client.write_all(&line).await.unwrap();

        assert_eq!(task.await.unwrap().unwrap(), ConnectionEnd::Answered);
        assert_eq!(probe.capture_count(), 1);
    }
}
