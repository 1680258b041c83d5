//! Raspberry Pi camera driver built on the `rpicam-apps` command-line tools
//!
//! Stills come from one short-lived `rpicam-still` run writing JPEG to stdout.
//! A recording is a long-lived `rpicam-vid` child streaming raw H.264 to its
//! stdout, which is the output file. It is interrupted with SIGINT so it
//! flushes before exiting.
//!
//! libcamera gives the device to one process at a time, so a still taken
//! during a recording pauses the recorder, captures, and resumes it appending
//! to the same file. Annex B streams concatenate, leaving one playable file
//! with a short gap.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::CameraConfig;

use super::driver::{CameraDriver, DriverSettings};
use super::CameraError;

/// How long a recorder gets to finalize its file after SIGINT
const RECORDER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Driver invoking `rpicam-still` / `rpicam-vid`
pub struct RpicamDriver {
    still_command: String,
    video_command: String,
    still_resolution: Option<(u32, u32)>,
    capture_timeout: Duration,
    recorder: Option<Recorder>,
}

/// A running `rpicam-vid` and what it needs to be restarted
struct Recorder {
    child: Child,
    path: PathBuf,
    settings: DriverSettings,
}

impl RpicamDriver {
    /// Check that the capture tools are present and build the driver.
    ///
    /// A missing tool is a hardware initialization failure.
    pub async fn open(config: &CameraConfig) -> Result<Self, CameraError> {
        for command in [&config.still_command, &config.video_command] {
            let status = Command::new(command)
                .arg("--version")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map_err(|e| CameraError::Hardware(format!("cannot run {}: {}", command, e)))?;
            if !status.success() {
                return Err(CameraError::Hardware(format!(
                    "{} --version exited with {}",
                    command, status
                )));
            }
        }

        info!(
            "rpicam driver ready (still: {}, video: {})",
            config.still_command, config.video_command
        );

        Ok(Self {
            still_command: config.still_command.clone(),
            video_command: config.video_command.clone(),
            still_resolution: config.still_width.zip(config.still_height),
            capture_timeout: config.capture_timeout(),
            recorder: None,
        })
    }

    async fn finish_recorder(mut child: Child) -> Result<(), CameraError> {
        if let Some(pid) = child.id() {
            // SIGINT lets rpicam-vid close the file cleanly
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
            if rc != 0 {
                warn!(
                    "Failed to interrupt recorder {}: {}",
                    pid,
                    std::io::Error::last_os_error()
                );
            }
        }

        match tokio::time::timeout(RECORDER_STOP_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Recorder exited with {}", status);
                Ok(())
            }
            Ok(Err(e)) => Err(CameraError::Hardware(format!("waiting for recorder: {}", e))),
            Err(_) => {
                warn!("Recorder did not exit within {:?}, killing it", RECORDER_STOP_TIMEOUT);
                child.kill().await.map_err(CameraError::Io)
            }
        }
    }

    /// Launch `rpicam-vid` writing to `path`, truncating it unless `append`
    fn spawn_recorder(
        &self,
        path: &Path,
        settings: &DriverSettings,
        append: bool,
    ) -> Result<Recorder, CameraError> {
        let output = open_output(path, append)?;

        let mut cmd = Command::new(&self.video_command);
        cmd.args(["-n", "-t", "0", "--codec", "h264", "-o", "-"])
            .args(setting_args(settings))
            .stdin(Stdio::null())
            .stdout(Stdio::from(output))
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| CameraError::Hardware(format!("run {}: {}", self.video_command, e)))?;

        if let Some(status) = child.try_wait()? {
            return Err(CameraError::Hardware(format!(
                "{} exited immediately with {}",
                self.video_command, status
            )));
        }

        Ok(Recorder {
            child,
            path: path.to_path_buf(),
            settings: settings.clone(),
        })
    }

    async fn run_still(&self, settings: &DriverSettings) -> Result<Vec<u8>, CameraError> {
        let mut still = settings.clone();
        still.resolution = self.still_resolution;
        still.framerate = None;

        let mut cmd = Command::new(&self.still_command);
        cmd.args(["-n", "-t", "1", "-e", "jpg", "-o", "-"])
            .args(setting_args(&still))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("capture: {}", self.still_command);
        let output = tokio::time::timeout(self.capture_timeout, cmd.output())
            .await
            .map_err(|_| {
                CameraError::Hardware(format!("capture timed out after {:?}", self.capture_timeout))
            })?
            .map_err(|e| CameraError::Hardware(format!("run {}: {}", self.still_command, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CameraError::Hardware(format!(
                "{} exited with {}: {}",
                self.still_command,
                output.status,
                stderr.trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(CameraError::Hardware("capture produced no image data".to_string()));
        }
        Ok(output.stdout)
    }
}

fn open_output(path: &Path, append: bool) -> Result<File, CameraError> {
    let mut options = OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    Ok(options.open(path)?)
}

/// Translate driver settings into `rpicam-apps` options
pub(crate) fn setting_args(settings: &DriverSettings) -> Vec<String> {
    let mut args = Vec::new();
    if let Some((width, height)) = settings.resolution {
        args.extend(["--width".to_string(), width.to_string()]);
        args.extend(["--height".to_string(), height.to_string()]);
    }
    if let Some(framerate) = settings.framerate {
        args.extend(["--framerate".to_string(), framerate.to_string()]);
    }
    if let Some(brightness) = settings.brightness {
        // rpicam brightness runs -1.0..=1.0 with 0.0 neutral
        let scaled = (brightness as f64 - 50.0) / 50.0;
        args.extend(["--brightness".to_string(), format!("{:.2}", scaled)]);
    }
    if let Some(shutter) = settings.shutter_speed {
        args.extend(["--shutter".to_string(), format!("{}us", shutter)]);
    }
    if let Some(iso) = settings.iso {
        // ISO 100 corresponds to unity analogue gain
        let gain = iso as f64 / 100.0;
        args.extend(["--gain".to_string(), format!("{:.2}", gain)]);
    }
    args
}

#[async_trait]
impl CameraDriver for RpicamDriver {
    fn name(&self) -> &str {
        "rpicam"
    }

    async fn capture_jpeg(&mut self, settings: &DriverSettings) -> Result<Vec<u8>, CameraError> {
        let paused = match self.recorder.take() {
            Some(recorder) => {
                info!("Pausing recording of {} for a still", recorder.path.display());
                Self::finish_recorder(recorder.child).await?;
                Some((recorder.path, recorder.settings))
            }
            None => None,
        };

        let still = self.run_still(settings).await;

        if let Some((path, recording_settings)) = paused {
            match self.spawn_recorder(&path, &recording_settings, true) {
                Ok(recorder) => {
                    debug!("Resumed recording of {}", path.display());
                    self.recorder = Some(recorder);
                }
                Err(e) => {
                    warn!("Failed to resume recording of {}: {}", path.display(), e);
                    return Err(e);
                }
            }
        }
        still
    }

    async fn start_recording(
        &mut self,
        path: &Path,
        settings: &DriverSettings,
    ) -> Result<(), CameraError> {
        if let Some(recorder) = self.recorder.take() {
            Self::finish_recorder(recorder.child).await?;
        }
        self.recorder = Some(self.spawn_recorder(path, settings, false)?);
        Ok(())
    }

    async fn stop_recording(&mut self) -> Result<(), CameraError> {
        match self.recorder.take() {
            Some(recorder) => Self::finish_recorder(recorder.child).await,
            None => Ok(()),
        }
    }

    async fn apply_settings(&mut self, settings: &DriverSettings) -> Result<(), CameraError> {
        // Options are passed per invocation; a running recorder keeps its own
        if self.recorder.is_some() {
            debug!("Settings {:?} take effect from the next recording", settings);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), CameraError> {
        self.stop_recording().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_settings_produce_no_args() {
        assert!(setting_args(&DriverSettings::default()).is_empty());
    }

    #[test]
    fn settings_are_scaled_for_rpicam() {
        let settings = DriverSettings {
            resolution: Some((640, 480)),
            framerate: Some(15),
            brightness: Some(75),
            shutter_speed: Some(20000),
            iso: Some(400),
        };
        let args = setting_args(&settings);
        assert_eq!(
            args,
            vec![
                "--width", "640", "--height", "480", "--framerate", "15", "--brightness", "0.50",
                "--shutter", "20000us", "--gain", "4.00",
            ]
        );
    }

    fn write_tool(dir: &Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        let script = format!(
            "#!/bin/sh\n[ \"$1\" = \"--version\" ] && exit 0\n{}\n",
            body
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    /// Stand-in tools where the recorder holds the device like libcamera does
    fn exclusive_tools(dir: &Path) -> CameraConfig {
        let busy = dir.join("busy");
        let video = write_tool(
            dir,
            "fake-vid",
            &format!(
                "touch {busy}\ntrap 'rm -f {busy}; exit 0' INT\nwhile true; do printf v; sleep 0.05; done",
                busy = busy.display()
            ),
        );
        let still = write_tool(
            dir,
            "fake-still",
            &format!(
                "[ -e {busy} ] && {{ echo 'device busy' >&2; exit 1; }}\nprintf '\\377\\330jpeg'",
                busy = busy.display()
            ),
        );
        CameraConfig {
            still_command: still,
            video_command: video,
            ..CameraConfig::default()
        }
    }

    async fn wait_for_growth(path: &Path, past: u64) -> u64 {
        for _ in 0..100 {
            let len = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            if len > past {
                return len;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("{} never grew past {} bytes", path.display(), past);
    }

    #[tokio::test]
    async fn still_during_recording_pauses_and_resumes() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = exclusive_tools(temp.path());
        let mut driver = RpicamDriver::open(&config).await.unwrap();
        let video = temp.path().join("clip.h264");

        driver
            .start_recording(&video, &DriverSettings::default())
            .await
            .unwrap();
        let before = wait_for_growth(&video, 0).await;

        let jpeg = driver.capture_jpeg(&DriverSettings::default()).await.unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert!(driver.recorder.is_some());

        // Resumed recorder appends instead of truncating
        wait_for_growth(&video, before).await;
        driver.stop_recording().await.unwrap();
        assert!(driver.recorder.is_none());
        assert!(!temp.path().join("busy").exists());

        let contents = std::fs::read(&video).unwrap();
        assert!(contents.iter().all(|b| *b == b'v'));
    }

    #[tokio::test]
    async fn still_without_recording_leaves_recorder_alone() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = exclusive_tools(temp.path());
        let mut driver = RpicamDriver::open(&config).await.unwrap();

        let jpeg = driver.capture_jpeg(&DriverSettings::default()).await.unwrap();
        assert_eq!(jpeg, b"\xFF\xD8jpeg");
        assert!(driver.recorder.is_none());
    }

    #[tokio::test]
    async fn open_fails_when_tools_are_missing() {
        let config = CameraConfig {
            still_command: "/nonexistent/rpicam-still".to_string(),
            ..CameraConfig::default()
        };
        let result = RpicamDriver::open(&config).await;
        assert!(matches!(result, Err(CameraError::Hardware(_))));
    }
}
