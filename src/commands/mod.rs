//! CLI command implementations

pub mod daemon;
pub mod snapshot;
