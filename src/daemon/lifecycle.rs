//! Daemon Lifecycle Management
//!
//! Handles daemon startup, shutdown, and single-instance guarantees.
//!
//! [`ProcessLifecycleManager`] implements `start`, `stop`, `restart` and
//! `status` against the PID file described by a [`LifecycleConfig`]. What the
//! daemon actually does once it is running is supplied as a [`Service`].

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::time::Duration;

use daemonize::Daemonize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::LifecycleConfig;

use super::pidfile::{self, PidLock};

/// How long `start` waits for a previous owner to release the PID lock
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// Permission bits cleared for files the daemon creates
const DAEMON_UMASK: u32 = 0o002;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("cannot start: PID file {} is locked by another instance", .pid_file.display())]
    AlreadyRunning {
        pid: Option<i32>,
        pid_file: PathBuf,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to daemonize: {0}")]
    Daemonize(String),

    #[error("Failed to signal PID {pid}: {source}")]
    Signal {
        pid: i32,
        #[source]
        source: std::io::Error,
    },

    #[error("Service failed: {0:#}")]
    Service(anyhow::Error),
}

/// The work a daemon does once it owns its PID file.
///
/// `run` is expected to block until the process is asked to stop.
pub trait Service {
    fn run(self, config: &LifecycleConfig) -> anyhow::Result<()>;
}

impl<F> Service for F
where
    F: FnOnce(&LifecycleConfig) -> anyhow::Result<()>,
{
    fn run(self, config: &LifecycleConfig) -> anyhow::Result<()> {
        self(config)
    }
}

/// Result of a `stop` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// SIGTERM was delivered to this PID
    Signalled(i32),
    NotRunning,
}

/// Snapshot of the PID file state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: Option<i32>,
}

pub struct ProcessLifecycleManager {
    config: LifecycleConfig,
    lock_timeout: Duration,
}

impl ProcessLifecycleManager {
    pub fn new(config: LifecycleConfig) -> Self {
        Self {
            config,
            lock_timeout: LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Take the PID lock, detach (unless running in the foreground), and run
    /// `service` until it returns. The PID file is removed afterwards.
    ///
    /// Must be called before any async runtime or extra thread exists, since
    /// detaching forks the process.
    pub fn start<S: Service>(&self, service: S) -> Result<(), LifecycleError> {
        self.create_directories()?;

        let mut lock = PidLock::acquire(&self.config.pid_file, self.lock_timeout)?;

        if !self.config.foreground {
            self.daemonize()?;
        }
        lock.write_pid(std::process::id())?;
        info!(
            "{} started, PID = {} (PID file {})",
            self.config.name,
            std::process::id(),
            lock.path().display()
        );

        let result = service.run(&self.config);

        lock.release();
        match &result {
            Ok(()) => info!("{} stopped", self.config.name),
            Err(e) => warn!("{} stopped with error: {:#}", self.config.name, e),
        }
        result.map_err(LifecycleError::Service)
    }

    /// Send SIGTERM to the recorded PID if the lock is held.
    ///
    /// Returns without waiting for the process to exit.
    pub fn stop(&self) -> Result<StopOutcome, LifecycleError> {
        let status = self.status();
        match (status.running, status.pid) {
            (true, Some(pid)) => {
                send_terminate(pid)?;
                info!("Sent SIGTERM to PID {}", pid);
                Ok(StopOutcome::Signalled(pid))
            }
            _ => Ok(StopOutcome::NotRunning),
        }
    }

    /// `stop` then `start`, with no wait in between beyond the lock timeout
    pub fn restart<S: Service>(&self, service: S) -> Result<StopOutcome, LifecycleError> {
        let outcome = self.stop()?;
        self.start(service)?;
        Ok(outcome)
    }

    pub fn status(&self) -> DaemonStatus {
        let path = &self.config.pid_file;
        let pid = pidfile::read_pid(path);
        let running = pid.is_some() && pidfile::is_locked(path);
        DaemonStatus {
            running,
            pid: if running { pid } else { None },
        }
    }

    fn create_directories(&self) -> Result<(), LifecycleError> {
        for dir in self.config.required_directories() {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    fn daemonize(&self) -> Result<(), LifecycleError> {
        let stdout = open_append(&self.config.stdout_file)?;
        let stderr = open_append(&self.config.stderr_file)?;

        Daemonize::new()
            .working_directory(&self.config.working_directory)
            .umask(DAEMON_UMASK)
            .stdout(stdout)
            .stderr(stderr)
            .start()
            .map_err(|e| LifecycleError::Daemonize(e.to_string()))
    }
}

fn open_append(path: &std::path::Path) -> std::io::Result<std::fs::File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn send_terminate(pid: i32) -> Result<(), LifecycleError> {
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(LifecycleError::Signal {
            pid,
            source: std::io::Error::last_os_error(),
        })
    }
}
