//! Daemon Module
//!
//! The camera daemon: one process owns the camera and serves local clients
//! over a loopback line protocol.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    camera daemon                         │
//! │                                                          │
//! │  ┌────────────────┐   per connection   ┌──────────────┐  │
//! │  │ CameraServer   │ ─────────────────▶ │ Command      │  │
//! │  │ (127.0.0.1)    │                    │ Handler      │  │
//! │  └────────────────┘                    └──────┬───────┘  │
//! │                                               │          │
//! │                                  ┌────────────▼───────┐  │
//! │                                  │ CameraHandle       │  │
//! │                                  │ (one op at a time) │  │
//! │                                  └────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! rpicamd start
//! rpicamd status -v
//! rpicamd stop
//! ```

pub mod handler;
pub mod lifecycle;
pub mod pidfile;
pub mod protocol;
pub mod server;
pub mod service;

pub use handler::{CommandHandler, ConnectionEnd, Reply, MAX_LINE_LENGTH};
pub use lifecycle::{
    DaemonStatus, LifecycleError, ProcessLifecycleManager, Service, StopOutcome, LOCK_TIMEOUT,
};
pub use pidfile::PidLock;
pub use protocol::{parse_line, Command, Parameter, ProtocolError};
pub use server::CameraServer;
pub use service::{register_sigterm, CameraService, Daemon};
