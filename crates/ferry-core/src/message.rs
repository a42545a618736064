//! Messages carried through the network
//!
//! A [`Message`] is immutable in its identity (id, endpoints, size, creation
//! time) but carries a small property bag that routers use to annotate a
//! replica, most importantly the remaining replication budget.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identity::{HostAddress, MessageId};

/// Property key holding the remaining-copies budget of a replica
pub const REMAINING_COPIES: &str = "remaining_copies";

/// Value stored in a message's property bag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Int(i64),
    Float(f64),
    Text(String),
}

/// A message travelling from a source host to a destination host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub from: HostAddress,
    pub to: HostAddress,
    /// Size in bytes
    pub size: u64,
    /// Virtual time at which the message was created
    pub created_at: f64,
    #[serde(default)]
    properties: BTreeMap<String, PropertyValue>,
}

impl Message {
    pub fn new(
        id: impl Into<MessageId>,
        from: HostAddress,
        to: HostAddress,
        size: u64,
        created_at: f64,
    ) -> Self {
        Self {
            id: id.into(),
            from,
            to,
            size,
            created_at,
            properties: BTreeMap::new(),
        }
    }

    /// Age of the message at virtual time `now`
    pub fn age(&self, now: f64) -> f64 {
        (now - self.created_at).max(0.0)
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: PropertyValue) {
        self.properties.insert(key.into(), value);
    }

    /// Remaining-copies budget stamped on this replica, if any
    pub fn remaining_copies(&self) -> Option<u32> {
        match self.properties.get(REMAINING_COPIES) {
            Some(PropertyValue::Int(n)) => Some((*n).clamp(0, i64::from(u32::MAX)) as u32),
            _ => None,
        }
    }

    pub fn set_remaining_copies(&mut self, copies: u32) {
        self.properties
            .insert(REMAINING_COPIES.to_string(), PropertyValue::Int(i64::from(copies)));
    }
}
