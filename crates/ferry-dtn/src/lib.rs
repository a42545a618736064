//! # Ferry DTN
//!
//! Contact links and opportunistic routers for the Ferry simulator.
//!
//! Hosts in a delay-tolerant network only meet intermittently. While two
//! hosts are in range a [`ContactLink`] carries at most one message at a
//! time between them; the routers attached to the hosts decide which
//! messages to hand over.
//!
//! ## Features
//!
//! - **Contact links**: `Down`/`Idle`/`Transferring` state machine with byte
//!   progress and abort accounting.
//!
//! - **Delivery predictability routing**: PRoPHET style encounter, aging and
//!   transitivity updates; messages go to peers more likely to meet their
//!   destination.
//!
//! - **Adaptive replication**: a spray-style replica budget where every
//!   hand-off is gated by Q-learning over the receiver's context, TOPP
//!   utility, and a per-host energy budget.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ferry_core::{HostAddress, Settings};
//! use ferry_dtn::RouterKind;
//!
//! let settings = Settings::load("scenario.toml")?;
//! let kind = RouterKind::from_settings(&settings, "AdaptiveRLRouter")?;
//! let router = kind.build(HostAddress(0), 5_000_000, 0.0);
//! ```
//!
//! ## Architecture
//!
//! - [`link`]: the contact link state machine
//! - [`router`]: the [`Router`] trait, peer snapshots and shared buffering
//! - [`prophet`]: delivery predictability routing
//! - [`adaptive`]: the adaptive replication router
//! - [`copies`]: replica budget bookkeeping
//! - [`energy`]: per-host energy accounts
//! - [`buffer`]: bounded FIFO message buffer
//! - [`report`]: report sink for run statistics
//! - [`error`]: DTN error types

pub mod adaptive;
pub mod buffer;
pub mod copies;
pub mod energy;
pub mod error;
pub mod link;
pub mod prophet;
pub mod report;
pub mod router;

// Re-export main types
pub use adaptive::{AdaptiveConfig, AdaptiveRouter, HostStatus, QTableReportConfig, q_table_csv};
pub use buffer::MessageBuffer;
pub use copies::{CopyLedger, CopySplit, DEFAULT_MAX_COPIES};
pub use energy::{EnergyAccount, EnergyConfig};
pub use error::{DtnError, DtnResult, LinkError};
pub use link::{ContactLink, LinkKey, LinkState, Transfer, TransferNotice};
pub use prophet::{ProphetConfig, ProphetRouter, ProphetState};
pub use report::{CopyAction, EventLog, ReportEvent, ReportSink};
pub use router::{
    AdaptiveSummary, DenyReason, PeerCommand, PeerSnapshot, ProtocolState, ProtocolTag,
    ReceiveVerdict, Router, RouterBase, RouterContext, SnapshotScope, TopologyView,
    TransferOffer, TransferOutcome, TransferStatus,
};

use ferry_core::{ConfigError, HostAddress, Settings};

/// Scenario name of the delivery predictability router
pub const PROPHET_ROUTER: &str = "ProphetRouter";
/// Scenario name of the adaptive replication router
pub const ADAPTIVE_ROUTER: &str = "AdaptiveRLRouter";

/// Router selection with its configuration
#[derive(Debug, Clone)]
pub enum RouterKind {
    Prophet(ProphetConfig),
    Adaptive(AdaptiveConfig),
}

impl RouterKind {
    /// Resolve a router by its scenario name and read its settings
    ///
    /// Accepts the short names `prophet` and `adaptive` as well.
    pub fn from_settings(settings: &Settings, name: &str) -> DtnResult<Self> {
        match name {
            PROPHET_ROUTER | "prophet" => Ok(Self::Prophet(ProphetConfig::from_settings(
                &settings.namespace(PROPHET_ROUTER),
            )?)),
            ADAPTIVE_ROUTER | "adaptive" => Ok(Self::Adaptive(AdaptiveConfig::from_settings(settings)?)),
            other => Err(ConfigError::invalid(
                "Scenario.router",
                format!("unknown router {other:?}, expected {PROPHET_ROUTER} or {ADAPTIVE_ROUTER}"),
            )
            .into()),
        }
    }

    pub fn protocol(&self) -> ProtocolTag {
        match self {
            Self::Prophet(_) => ProtocolTag::Predictability,
            Self::Adaptive(_) => ProtocolTag::Adaptive,
        }
    }

    /// Instantiate a router for one host
    pub fn build(&self, address: HostAddress, buffer_capacity: u64, now: f64) -> Box<dyn Router> {
        match self {
            Self::Prophet(config) => Box::new(ProphetRouter::new(address, buffer_capacity, *config)),
            Self::Adaptive(config) => {
                Box::new(AdaptiveRouter::new(address, buffer_capacity, *config, now))
            }
        }
    }
}
