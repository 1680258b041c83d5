//! Camera daemon service
//!
//! [`Daemon`] ties the camera and the server together and owns the shutdown
//! path. [`CameraService`] is the [`Service`] the lifecycle manager runs after
//! it has taken the PID lock and detached.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::signal::unix::{Signal, SignalKind};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::camera::{self, CameraHandle, CameraResource};
use crate::config::{Config, LifecycleConfig};
use crate::logging;

use super::lifecycle::Service;
use super::server::CameraServer;

/// Extra time the daemon gives the server beyond its own drain period
const SERVER_STOP_SLACK: Duration = Duration::from_secs(2);

/// Daemon instance managing the camera and the server
pub struct Daemon {
    camera: CameraHandle,
    server: CameraServer,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_grace: Duration,
    sigterm: Option<Signal>,
}

impl Daemon {
    /// Open the camera and bind the server.
    ///
    /// A camera that cannot be opened is fatal: nothing is listening yet.
    pub async fn start(config: Config) -> Result<Self> {
        info!("Starting camera daemon");

        let driver = camera::open_driver(&config.camera)
            .await
            .context("Failed to open camera")?;
        let camera = CameraHandle::new(CameraResource::new(driver, &config.camera));

        let server = match CameraServer::bind(&config.server, camera.clone()) {
            Ok(server) => server,
            Err(e) => {
                camera.shutdown().await;
                return Err(e);
            }
        };

        let (shutdown_tx, _) = broadcast::channel(16);

        info!("Recording directory: {}", config.camera.recording_dir.display());

        Ok(Self {
            camera,
            server,
            shutdown_tx,
            shutdown_grace: config.server.shutdown_grace(),
            sigterm: None,
        })
    }

    /// Use a SIGTERM stream registered before startup, so a signal that
    /// arrives while the camera opens is seen by `run`
    pub fn with_sigterm(mut self, sigterm: Signal) -> Self {
        self.sigterm = Some(sigterm);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.server.local_addr()
    }

    /// Sender that stops the daemon when anything is sent on it
    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn camera(&self) -> CameraHandle {
        self.camera.clone()
    }

    /// Serve until Ctrl+C, SIGTERM, or an internal shutdown request.
    ///
    /// The camera is shut down on every path out of here, including a
    /// server failure.
    pub async fn run(self) -> Result<()> {
        let Self {
            camera,
            server,
            shutdown_tx,
            shutdown_grace,
            sigterm,
        } = self;
        let sigterm = sigterm.or_else(register_sigterm);

        let mut shutdown_rx = shutdown_tx.subscribe();
        let mut server_task = tokio::spawn(server.run(shutdown_tx.clone()));

        info!("Daemon running");

        let finished_early = tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                None
            }
            _ = wait_for_sigterm(sigterm) => {
                info!("Received SIGTERM, shutting down");
                None
            }
            _ = shutdown_rx.recv() => {
                info!("Shutdown requested");
                None
            }
            result = &mut server_task => {
                error!("Server stopped unexpectedly");
                Some(result)
            }
        };

        // Trigger shutdown
        let _ = shutdown_tx.send(());

        let server_result = match finished_early {
            Some(result) => result,
            None => match tokio::time::timeout(shutdown_grace + SERVER_STOP_SLACK, &mut server_task)
                .await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!("Server did not stop within {:?}, aborting", shutdown_grace);
                    server_task.abort();
                    Ok(Ok(()))
                }
            },
        };

        // In-flight camera operations finish before the hardware is released
        camera.shutdown().await;
        info!("Daemon shutdown complete");

        match server_result {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("Server task failed: {}", e)),
        }
    }
}

/// Install the SIGTERM handler. Until this runs the default action kills
/// the process.
pub fn register_sigterm() -> Option<Signal> {
    match signal::unix::signal(SignalKind::terminate()) {
        Ok(sigterm) => Some(sigterm),
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}. Falling back to pending future.", e);
            None
        }
    }
}

/// Wait for SIGTERM signal
async fn wait_for_sigterm(sigterm: Option<Signal>) {
    match sigterm {
        Some(mut sigterm) => {
            sigterm.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// The camera daemon as run by the lifecycle manager
pub struct CameraService {
    config: Config,
}

impl CameraService {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl Service for CameraService {
    fn run(self, lifecycle: &LifecycleConfig) -> Result<()> {
        if lifecycle.foreground {
            logging::init_console(self.config.logging.level.with_verbose(lifecycle.verbose))?;
        } else {
            logging::init_file(&lifecycle.log_file, &self.config.logging, lifecycle.verbose)?;
        }

        // Built only now: the runtime's threads must not exist across the fork
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("rpicamd-worker")
            .build()
            .context("Failed to build async runtime")?;

        let result = runtime.block_on(async {
            let sigterm = register_sigterm();
            let mut daemon = Daemon::start(self.config).await?;
            if let Some(sigterm) = sigterm {
                daemon = daemon.with_sigterm(sigterm);
            }
            daemon.run().await
        });
        if let Err(e) = &result {
            error!("{}: {:#}", lifecycle.name, e);
        }
        result
    }
}
