//! DTN-specific error types

use ferry_core::{ConfigError, HostAddress};
use thiserror::Error;

/// Errors that can occur in the DTN subsystem
#[derive(Debug, Error)]
pub enum DtnError {
    /// Contact link misuse
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// Invalid router configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Precondition violations on a contact link
///
/// These indicate a modelling bug in the caller and abort the run.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Finalize or abort without an in-flight transfer
    #[error("No transfer in flight on link {a}-{b}")]
    NoTransfer { a: HostAddress, b: HostAddress },

    /// Transfer started on a link that is down
    #[error("Link {a}-{b} is down")]
    Down { a: HostAddress, b: HostAddress },

    /// Second transfer started while one is in flight
    #[error("Link {a}-{b} already carries a transfer")]
    Busy { a: HostAddress, b: HostAddress },

    /// Host is not one of the two endpoints
    #[error("Host {host} is not an endpoint of link {a}-{b}")]
    NotEndpoint {
        host: HostAddress,
        a: HostAddress,
        b: HostAddress,
    },
}

/// Result type for DTN operations
pub type DtnResult<T> = Result<T, DtnError>;
