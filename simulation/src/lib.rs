//! # Ferry Simulation
//!
//! A discrete-event simulator for delay-tolerant networks.
//!
//! ## Overview
//!
//! Hosts wander through a rectangular world. Whenever two of them come
//! within radio range a contact link opens, and the routers attached to the
//! hosts decide which buffered messages to hand over before the contact
//! ends. Two routers are available:
//!
//! - **ProphetRouter**: forwards to peers with a higher delivery
//!   predictability for the destination
//! - **AdaptiveRLRouter**: replicates under a halving copy budget, gated by
//!   Q-learning over the receiver's context and by its energy
//!
//! ## Architecture
//!
//! - **World** (`world.rs`): event scheduling, host-update passes, links
//!   and the snapshot/command transfer protocol
//! - **Topology** (`topology.rs`): registry for density queries and the
//!   connectivity grid
//! - **Events** (`events.rs`): scripted events, the message generator and
//!   the scheduled-update queue
//! - **Mobility** (`mobility.rs`): stationary hosts and random walks
//! - **Reports** (`reports.rs`): run statistics and report files
//! - **Scenario** (`scenario.rs`): TOML scenario loading
//!
//! ## Example
//!
//! ```rust,ignore
//! use ferry_core::Settings;
//! use ferry_simulation::{DEFAULT_SCENARIO, ScenarioConfig, run_scenario};
//!
//! let settings = Settings::from_toml_str(DEFAULT_SCENARIO)?;
//! let scenario = run_scenario(ScenarioConfig::from_settings(&settings)?, None)?;
//!
//! let summary = scenario.report().summary();
//! println!("delivered {} of {}", summary.delivered, summary.created);
//! ```

pub mod error;
pub mod events;
pub mod host;
pub mod mobility;
pub mod reports;
pub mod scenario;
pub mod topology;
pub mod world;

// Re-export main types
pub use error::{ReportError, SimError, SimResult};
pub use events::{EventQueue, GeneratorConfig, MessageGenerator, ScheduledUpdates, SimEvent, TimedEvent};
pub use host::Host;
pub use mobility::{MovementConfig, RandomWalk, Stationary};
pub use reports::{RunSummary, SimReport};
pub use scenario::{DEFAULT_SCENARIO, MobilityKind, Scenario, ScenarioConfig, build_world, run_scenario};
pub use topology::{ConnectivityGrid, TopologyRegistry};
pub use world::{CancelToken, TickLogger, UpdateListener, World, WorldConfig};
