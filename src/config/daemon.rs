//! Daemon server configuration

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default loopback port the camera daemon listens on
pub const DEFAULT_PORT: u16 = 12346;

/// Loopback TCP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port on 127.0.0.1 to listen on
    pub port: u16,
    /// Listen backlog passed to `listen(2)`
    pub backlog: u32,
    /// Maximum number of client connections served at once
    pub max_connections: usize,
    /// Seconds a connection may sit idle between lines (0 disables the timeout)
    pub idle_timeout_secs: u64,
    /// Seconds to wait for in-flight connections during shutdown
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            backlog: 16,
            max_connections: 32,
            idle_timeout_secs: 300,
            shutdown_grace_secs: 5,
        }
    }
}

impl ServerConfig {
    /// Loopback socket address for this configuration
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.port))
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
