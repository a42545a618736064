//! # Ferry Core
//!
//! Core types and collaborator traits for the Ferry delay-tolerant-network
//! simulator.
//!
//! This crate provides:
//! - Host and message identities ([`HostAddress`], [`MessageId`])
//! - The [`Message`] type with its replica property bag
//! - Namespaced configuration lookup ([`Settings`])
//! - The [`MobilityProvider`] and [`EventSource`] traits the scheduler
//!   is written against
//! - Shared error types

pub mod error;
pub mod geometry;
pub mod identity;
pub mod message;
pub mod settings;
pub mod traits;

pub use error::{ConfigError, ConfigResult, TopologyError};
pub use geometry::Coord;
pub use identity::{HostAddress, MessageId};
pub use message::{Message, PropertyValue, REMAINING_COPIES};
pub use settings::Settings;
pub use traits::{EventSource, MobilityProvider};
