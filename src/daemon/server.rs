//! Loopback TCP Server
//!
//! Accepts client connections on 127.0.0.1 and runs a [`CommandHandler`]
//! for each one in its own task. The number of live connections is capped by
//! a semaphore; once it is exhausted, new clients wait in the listen backlog.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::camera::CameraHandle;
use crate::config::ServerConfig;

use super::handler::CommandHandler;

/// Camera protocol server bound to a loopback port
pub struct CameraServer {
    listener: TcpListener,
    handler: CommandHandler,
    connection_limit: Arc<Semaphore>,
    shutdown_grace: Duration,
}

impl CameraServer {
    /// Bind the listening socket with address reuse enabled, so a restart
    /// does not trip over connections lingering in TIME_WAIT.
    pub fn bind(config: &ServerConfig, camera: CameraHandle) -> Result<Self> {
        let addr = config.listen_addr();
        let socket = TcpSocket::new_v4().context("Failed to create socket")?;
        socket
            .set_reuseaddr(true)
            .context("Failed to set SO_REUSEADDR")?;
        socket
            .bind(addr)
            .with_context(|| format!("Failed to bind {}", addr))?;
        let listener = socket
            .listen(config.backlog)
            .with_context(|| format!("Failed to listen on {}", addr))?;

        Ok(Self {
            listener,
            handler: CommandHandler::new(camera, config.idle_timeout()),
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            shutdown_grace: config.shutdown_grace(),
        })
    }

    /// Address actually bound (useful when the configured port is 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` fires, then give open connections
    /// up to the grace period to finish.
    pub async fn run(self, shutdown: broadcast::Sender<()>) -> Result<()> {
        let mut stop = shutdown.subscribe();
        let mut connections = JoinSet::new();

        info!("Listening on {}", self.local_addr()?);

        loop {
            let permit = tokio::select! {
                permit = self.connection_limit.clone().acquire_owned() => {
                    permit.context("Connection limiter closed")?
                }
                _ = stop.recv() => break,
            };

            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            debug!("New client connection from {}", peer);
                            let handler = self.handler.clone();
                            let conn_shutdown = shutdown.subscribe();
                            connections.spawn(async move {
                                let _permit = permit;
                                match handler.serve(stream, conn_shutdown).await {
                                    Ok(end) => debug!("Connection from {} ended: {:?}", peer, end),
                                    Err(e) => warn!("Connection error from {}: {}", peer, e),
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = stop.recv() => break,
            }

            // Reap finished connections so the set does not grow unbounded
            while connections.try_join_next().is_some() {}
        }

        info!("Server shutting down, {} connection(s) open", connections.len());
        drop(self.listener);

        let drain = async {
            while let Some(result) = connections.join_next().await {
                if let Err(e) = result {
                    warn!("Connection task failed: {}", e);
                }
            }
        };
        if tokio::time::timeout(self.shutdown_grace, drain).await.is_err() {
            warn!(
                "Connections still open after {:?}, aborting them",
                self.shutdown_grace
            );
            connections.abort_all();
        }

        Ok(())
    }
}
