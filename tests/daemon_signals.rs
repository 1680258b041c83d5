//! SIGTERM handling, kept in its own test binary since the signal is
//! process-wide

use std::time::Duration;

use rpicamd::config::CameraBackend;
use rpicamd::daemon::{register_sigterm, Daemon};
use rpicamd::Config;
use tempfile::TempDir;

#[tokio::test]
async fn test_sigterm_during_startup_still_releases_camera() {
    let temp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.server.port = 0;
    config.camera.backend = CameraBackend::Mock;
    config.camera.recording_dir = temp.path().to_path_buf();

    let sigterm = register_sigterm().unwrap();
    // Arrives before the camera is open and the server is bound
    let rc = unsafe { libc::kill(std::process::id() as libc::pid_t, libc::SIGTERM) };
    assert_eq!(rc, 0);

    let daemon = Daemon::start(config).await.unwrap();
    let camera = daemon.camera();

    tokio::time::timeout(Duration::from_secs(10), daemon.with_sigterm(sigterm).run())
        .await
        .expect("daemon should stop on the early SIGTERM")
        .unwrap();
    assert!(camera.is_closed().await);
}
