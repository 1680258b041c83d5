//! start/stop/restart/status driven through the `rpicamd` binary with the mock camera

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};

use tempfile::TempDir;

const NAME: &str = "camtest";

fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("rpicamd.toml");
    let config = format!(
        "[server]\nport = 0\n\n[camera]\nbackend = \"mock\"\nrecording_dir = \"{}\"\n",
        dir.join("rec").display()
    );
    std::fs::write(&path, config).unwrap();
    path
}

fn rpicamd(dir: &Path, config: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_rpicamd"));
    cmd.arg("-n").arg(NAME).arg("-d").arg(dir).arg("-c").arg(config);
    cmd
}

fn run(dir: &Path, config: &Path, args: &[&str]) -> Output {
    rpicamd(dir, config).args(args).output().unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn pid_file(dir: &Path) -> PathBuf {
    dir.join("run").join(format!("{NAME}.pid"))
}

fn spawn_foreground(dir: &Path, config: &Path) -> Child {
    spawn(dir, config, &["start", "--foreground"])
}

fn spawn(dir: &Path, config: &Path, args: &[&str]) -> Child {
    rpicamd(dir, config)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap()
}

fn wait_until_running(dir: &Path, config: &Path) -> String {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let out = stdout(&run(dir, config, &["status"]));
        if out.contains("running, PID") {
            return out;
        }
        assert!(Instant::now() < deadline, "daemon never came up: {out}");
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn running_pid(dir: &Path, config: &Path) -> Option<u32> {
    let out = stdout(&run(dir, config, &["status"]));
    out.trim()
        .strip_prefix(&format!("{NAME}: running, PID = "))
        .and_then(|pid| pid.parse().ok())
}

fn wait_until_stopped(dir: &Path, config: &Path) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while pid_file(dir).exists() || running_pid(dir, config).is_some() {
        assert!(Instant::now() < deadline, "daemon never went away");
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn wait_for_exit(child: &mut Child) -> std::process::ExitStatus {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            panic!("daemon did not exit after stop");
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn test_stop_and_status_when_not_running() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());

    let status = run(temp.path(), &config, &["status"]);
    assert!(status.status.success());
    assert_eq!(stdout(&status), format!("{NAME}: NOT running\n"));

    let stop = run(temp.path(), &config, &["stop"]);
    assert!(stop.status.success());
    assert_eq!(stdout(&stop), format!("{NAME}: NOT running\n"));
}

#[test]
fn test_start_status_second_start_and_stop() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());

    let mut daemon = spawn_foreground(temp.path(), &config);
    let status = wait_until_running(temp.path(), &config);
    assert_eq!(status, format!("{NAME}: running, PID = {}\n", daemon.id()));

    let verbose = stdout(&run(temp.path(), &config, &["-v", "status"]));
    assert!(verbose.contains(&format!("{NAME}: PID file: {}", pid_file(temp.path()).display())));
    assert!(verbose.contains("Log file:"));

    let pid_before = std::fs::read_to_string(pid_file(temp.path())).unwrap();
    let second = run(temp.path(), &config, &["start", "--foreground"]);
    assert!(!second.status.success());
    assert!(stdout(&second).contains("cannot start"));
    assert!(String::from_utf8_lossy(&second.stderr).contains("cannot start"));
    assert_eq!(std::fs::read_to_string(pid_file(temp.path())).unwrap(), pid_before);

    let stop = run(temp.path(), &config, &["stop"]);
    assert!(stop.status.success());
    assert!(wait_for_exit(&mut daemon).success());

    assert!(!pid_file(temp.path()).exists());
    assert_eq!(
        stdout(&run(temp.path(), &config, &["status"])),
        format!("{NAME}: NOT running\n")
    );
}

#[test]
fn test_restart_replaces_running_instance() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());

    let mut first = spawn_foreground(temp.path(), &config);
    wait_until_running(temp.path(), &config);
    assert_eq!(running_pid(temp.path(), &config), Some(first.id()));

    let mut second = spawn(temp.path(), &config, &["restart", "--foreground"]);
    assert!(wait_for_exit(&mut first).success());

    // The replacement owns the PID file at its path, not an unlinked copy
    let deadline = Instant::now() + Duration::from_secs(10);
    while running_pid(temp.path(), &config) != Some(second.id()) {
        assert!(Instant::now() < deadline, "restarted daemon never showed up in status");
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(pid_file(temp.path()).exists());

    let third = run(temp.path(), &config, &["start", "--foreground"]);
    assert!(!third.status.success());
    assert!(stdout(&third).contains(&format!("already running with PID = {}", second.id())));

    let stop = run(temp.path(), &config, &["stop"]);
    assert!(stop.status.success());
    assert!(wait_for_exit(&mut second).success());
    wait_until_stopped(temp.path(), &config);
}

#[test]
fn test_detached_start_status_and_stop() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());
    let out_file = temp.path().join("daemon.out");
    let err_file = temp.path().join("daemon.err");
    let redirects = [
        "-s",
        out_file.to_str().unwrap(),
        "-e",
        err_file.to_str().unwrap(),
    ];

    // The launching process returns once the daemon has detached
    let start = rpicamd(temp.path(), &config)
        .args(redirects)
        .arg("start")
        .output()
        .unwrap();
    assert!(start.status.success(), "{}", String::from_utf8_lossy(&start.stderr));

    wait_until_running(temp.path(), &config);
    let pid = running_pid(temp.path(), &config).unwrap();
    assert_ne!(pid, std::process::id());
    assert!(out_file.exists());
    assert!(err_file.exists());

    let verbose = stdout(
        &rpicamd(temp.path(), &config)
            .args(redirects)
            .args(["-v", "status"])
            .output()
            .unwrap(),
    );
    assert!(verbose.contains(&format!("{NAME}: Stdout file: {}", out_file.display())));
    assert!(verbose.contains(&format!("{NAME}: Stderr file: {}", err_file.display())));

    let stop = run(temp.path(), &config, &["stop"]);
    assert!(stop.status.success());
    wait_until_stopped(temp.path(), &config);

    let log = std::fs::read_to_string(temp.path().join("log").join(format!("{NAME}.log"))).unwrap();
    assert!(log.contains("Camera released"));
}
