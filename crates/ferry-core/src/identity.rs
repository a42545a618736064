//! Host and message identities
//!
//! Hosts are addressed by a dense integer index: address `n` lives in slot
//! `n` of the world's host table. Messages carry a string id such as `M12`.

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Network address of a simulated host
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[display("{_0}")]
#[serde(transparent)]
pub struct HostAddress(pub u32);

impl HostAddress {
    /// Create an address from its numeric value
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Slot index of this host in the world's host table
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// Seed value derived from this address, used for per-host randomness
    pub fn seed(&self) -> u64 {
        u64::from(self.0)
    }

    /// Generate addresses `0..count`
    pub fn range(count: usize) -> Vec<Self> {
        (0..count as u32).map(Self).collect()
    }
}

impl From<u32> for HostAddress {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Identifier of a message, unique per simulation run
#[derive(
    Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[display("{_0}")]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_and_index() {
        let addr = HostAddress::new(7);
        assert_eq!(addr.to_string(), "7");
        assert_eq!(addr.index(), 7);
        assert_eq!(addr.seed(), 7);
    }

    #[test]
    fn test_address_range() {
        let addrs = HostAddress::range(3);
        assert_eq!(addrs, vec![HostAddress(0), HostAddress(1), HostAddress(2)]);
    }

    #[test]
    fn test_message_id_ordering() {
        let a = MessageId::from("M1");
        let b = MessageId::from("M2");
        assert!(a < b);
        assert_eq!(a.as_str(), "M1");
        assert_eq!(b.to_string(), "M2");
    }
}
