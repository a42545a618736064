//! Error types for simulation runs

use std::path::PathBuf;

use ferry_core::{ConfigError, HostAddress, TopologyError};
use ferry_dtn::{DtnError, LinkError};
use thiserror::Error;

/// Fatal errors that stop a run
///
/// Each of these points at a modelling bug or a bad scenario, never at a
/// condition the simulation could recover from.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Routing error: {0}")]
    Dtn(#[from] DtnError),

    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A link was torn down that one of its endpoints did not know about
    #[error("Host {host} has no connection to {peer}")]
    MissingConnection { host: HostAddress, peer: HostAddress },

    /// A scripted event references a host outside the world
    #[error("Event at {time} references unknown host {host}")]
    UnknownEventHost { host: HostAddress, time: f64 },
}

/// Failures while persisting reports
///
/// These never affect simulation state; callers log and carry on.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to write report {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode run summary: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result type for simulation operations
pub type SimResult<T> = Result<T, SimError>;
