//! Contact links between two hosts in radio range
//!
//! A [`ContactLink`] models one active contact and the single message
//! transfer it may carry:
//!
//! ```text
//! Down ──connect──▶ Idle ──start──▶ Transferring
//!   ▲                ▲  ◀─finalize/abort─┘   │
//!   └───tear_down────┴───────────────────────┘
//! ```
//!
//! Key concepts:
//! - **One transfer at a time**: a second `start_transfer` is an error
//! - **Cumulative bytes**: `finalize_transfer` credits the full message size,
//!   `abort_transfer` credits only the prefix already sent
//! - **Teardown**: `tear_down` never aborts. An in-flight transfer is
//!   discarded without crediting any bytes; callers that want the sent
//!   prefix counted must abort first

use ferry_core::{HostAddress, Message, MessageId};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::LinkError;

/// Order-independent key of a host pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkKey {
    pub low: HostAddress,
    pub high: HostAddress,
}

impl LinkKey {
    pub fn new(a: HostAddress, b: HostAddress) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn contains(&self, host: HostAddress) -> bool {
        self.low == host || self.high == host
    }
}

/// Observable state of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Down,
    Idle,
    Transferring,
}

/// A message on its way across a link
#[derive(Debug, Clone)]
pub struct Transfer {
    pub message: Message,
    pub from: HostAddress,
    pub to: HostAddress,
    pub started_at: f64,
}

/// Result of ending a transfer, to be routed to the receiving host
#[derive(Debug, Clone)]
pub enum TransferNotice {
    /// The whole message arrived
    Completed {
        message: Message,
        from: HostAddress,
        to: HostAddress,
    },
    /// Only a prefix arrived before the transfer was cut
    Aborted {
        message_id: MessageId,
        from: HostAddress,
        to: HostAddress,
        bytes_sent: u64,
        bytes_remaining: u64,
    },
}

/// An active radio contact between two hosts
#[derive(Debug, Clone)]
pub struct ContactLink {
    key: LinkKey,
    /// Bytes per unit of virtual time
    speed: f64,
    up: bool,
    transfer: Option<Transfer>,
    bytes_transferred: u64,
    opened_at: f64,
}

impl ContactLink {
    /// Open a link between `a` and `b` at time `now`
    pub fn new(a: HostAddress, b: HostAddress, speed: f64, now: f64) -> Self {
        trace!(%a, %b, now, "Link up");
        Self {
            key: LinkKey::new(a, b),
            speed,
            up: true,
            transfer: None,
            bytes_transferred: 0,
            opened_at: now,
        }
    }

    pub fn key(&self) -> LinkKey {
        self.key
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn opened_at(&self) -> f64 {
        self.opened_at
    }

    /// The endpoint opposite to `host`
    pub fn other(&self, host: HostAddress) -> Result<HostAddress, LinkError> {
        if host == self.key.low {
            Ok(self.key.high)
        } else if host == self.key.high {
            Ok(self.key.low)
        } else {
            Err(self.not_endpoint(host))
        }
    }

    fn not_endpoint(&self, host: HostAddress) -> LinkError {
        LinkError::NotEndpoint {
            host,
            a: self.key.low,
            b: self.key.high,
        }
    }

    pub fn state(&self) -> LinkState {
        match (self.up, &self.transfer) {
            (false, _) => LinkState::Down,
            (true, None) => LinkState::Idle,
            (true, Some(_)) => LinkState::Transferring,
        }
    }

    pub fn is_up(&self) -> bool {
        self.up
    }

    pub fn is_transferring(&self) -> bool {
        self.transfer.is_some()
    }

    /// Up and carrying nothing
    pub fn is_ready_for_transfer(&self) -> bool {
        self.state() == LinkState::Idle
    }

    pub fn transfer(&self) -> Option<&Transfer> {
        self.transfer.as_ref()
    }

    /// Sender of the in-flight transfer
    pub fn sender(&self) -> Option<HostAddress> {
        self.transfer.as_ref().map(|t| t.from)
    }

    /// Begin sending `message` from `from` to the opposite endpoint
    pub fn start_transfer(
        &mut self,
        from: HostAddress,
        message: Message,
        now: f64,
    ) -> Result<(), LinkError> {
        let to = self.other(from)?;
        if !self.up {
            return Err(LinkError::Down {
                a: self.key.low,
                b: self.key.high,
            });
        }
        if self.transfer.is_some() {
            return Err(LinkError::Busy {
                a: self.key.low,
                b: self.key.high,
            });
        }
        debug!(message = %message.id, %from, %to, size = message.size, now, "Transfer started");
        self.transfer = Some(Transfer {
            message,
            from,
            to,
            started_at: now,
        });
        Ok(())
    }

    fn sent_bytes(&self, transfer: &Transfer, now: f64) -> u64 {
        let elapsed = (now - transfer.started_at).max(0.0);
        let sent = (elapsed * self.speed).floor();
        if sent >= transfer.message.size as f64 {
            transfer.message.size
        } else {
            sent as u64
        }
    }

    /// Bytes of the in-flight message still to send at `now`
    pub fn remaining_bytes(&self, now: f64) -> u64 {
        match &self.transfer {
            Some(t) => t.message.size - self.sent_bytes(t, now),
            None => 0,
        }
    }

    /// Whether the in-flight message has been fully sent by `now`
    pub fn is_message_transferred(&self, now: f64) -> bool {
        self.transfer.is_some() && self.remaining_bytes(now) == 0
    }

    /// Complete the in-flight transfer, crediting the full message size
    pub fn finalize_transfer(&mut self) -> Result<TransferNotice, LinkError> {
        let transfer = self.transfer.take().ok_or(LinkError::NoTransfer {
            a: self.key.low,
            b: self.key.high,
        })?;
        self.bytes_transferred += transfer.message.size;
        debug!(message = %transfer.message.id, from = %transfer.from, to = %transfer.to, "Transfer finalized");
        Ok(TransferNotice::Completed {
            message: transfer.message,
            from: transfer.from,
            to: transfer.to,
        })
    }

    /// Cut the in-flight transfer, crediting only the bytes sent by `now`
    pub fn abort_transfer(&mut self, now: f64) -> Result<TransferNotice, LinkError> {
        let transfer = self.transfer.take().ok_or(LinkError::NoTransfer {
            a: self.key.low,
            b: self.key.high,
        })?;
        let sent = self.sent_bytes(&transfer, now);
        self.bytes_transferred += sent;
        debug!(message = %transfer.message.id, sent, "Transfer aborted");
        Ok(TransferNotice::Aborted {
            message_id: transfer.message.id,
            from: transfer.from,
            to: transfer.to,
            bytes_sent: sent,
            bytes_remaining: transfer.message.size - sent,
        })
    }

    /// Take the link down without aborting
    ///
    /// Returns the discarded transfer, if any. No bytes are credited for it.
    pub fn tear_down(&mut self) -> Option<Transfer> {
        self.up = false;
        let discarded = self.transfer.take();
        if let Some(t) = &discarded {
            debug!(message = %t.message.id, "Link torn down with transfer in flight");
        }
        discarded
    }

    /// Cumulative bytes, plus the in-flight prefix sent by `now`
    pub fn total_bytes_transferred(&self, now: f64) -> u64 {
        let in_flight = self
            .transfer
            .as_ref()
            .map(|t| self.sent_bytes(t, now))
            .unwrap_or(0);
        self.bytes_transferred + in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a() -> HostAddress {
        HostAddress(1)
    }

    fn b() -> HostAddress {
        HostAddress(2)
    }

    fn msg(size: u64) -> Message {
        Message::new("M1", a(), b(), size, 0.0)
    }

    #[test]
    fn test_key_is_order_independent() {
        assert_eq!(LinkKey::new(a(), b()), LinkKey::new(b(), a()));
        assert!(LinkKey::new(b(), a()).contains(a()));
    }

    #[test]
    fn test_state_machine() {
        let mut link = ContactLink::new(a(), b(), 10.0, 0.0);
        assert_eq!(link.state(), LinkState::Idle);

        link.start_transfer(a(), msg(100), 0.0).unwrap();
        assert_eq!(link.state(), LinkState::Transferring);
        assert_eq!(link.sender(), Some(a()));

        link.finalize_transfer().unwrap();
        assert_eq!(link.state(), LinkState::Idle);

        link.tear_down();
        assert_eq!(link.state(), LinkState::Down);
    }

    #[test]
    fn test_single_transfer_at_a_time() {
        let mut link = ContactLink::new(a(), b(), 10.0, 0.0);
        link.start_transfer(a(), msg(100), 0.0).unwrap();
        let err = link.start_transfer(b(), msg(50), 1.0).unwrap_err();
        assert!(matches!(err, LinkError::Busy { .. }));
    }

    #[test]
    fn test_start_on_down_link_fails() {
        let mut link = ContactLink::new(a(), b(), 10.0, 0.0);
        link.tear_down();
        assert!(matches!(
            link.start_transfer(a(), msg(10), 0.0),
            Err(LinkError::Down { .. })
        ));
    }

    #[test]
    fn test_foreign_sender_rejected() {
        let mut link = ContactLink::new(a(), b(), 10.0, 0.0);
        assert!(matches!(
            link.start_transfer(HostAddress(9), msg(10), 0.0),
            Err(LinkError::NotEndpoint { .. })
        ));
    }

    #[test]
    fn test_finalize_without_transfer_is_error() {
        let mut link = ContactLink::new(a(), b(), 10.0, 0.0);
        assert!(matches!(
            link.finalize_transfer(),
            Err(LinkError::NoTransfer { .. })
        ));
        assert!(matches!(
            link.abort_transfer(1.0),
            Err(LinkError::NoTransfer { .. })
        ));
    }

    #[test]
    fn test_progress_and_completion() {
        let mut link = ContactLink::new(a(), b(), 10.0, 0.0);
        link.start_transfer(a(), msg(100), 5.0).unwrap();
        assert_eq!(link.remaining_bytes(5.0), 100);
        assert_eq!(link.remaining_bytes(10.0), 50);
        assert!(!link.is_message_transferred(14.0));
        assert!(link.is_message_transferred(15.0));
        assert_eq!(link.total_bytes_transferred(10.0), 50);

        match link.finalize_transfer().unwrap() {
            TransferNotice::Completed { message, from, to } => {
                assert_eq!(message.id, MessageId::from("M1"));
                assert_eq!((from, to), (a(), b()));
            }
            other => panic!("unexpected notice {other:?}"),
        }
        assert_eq!(link.total_bytes_transferred(100.0), 100);
    }

    #[test]
    fn test_abort_credits_only_sent_prefix() {
        let mut link = ContactLink::new(a(), b(), 10.0, 0.0);
        link.start_transfer(a(), msg(1000), 0.0).unwrap();
        match link.abort_transfer(40.0).unwrap() {
            TransferNotice::Aborted {
                bytes_sent,
                bytes_remaining,
                ..
            } => {
                assert_eq!(bytes_sent, 400);
                assert_eq!(bytes_remaining, 600);
            }
            other => panic!("unexpected notice {other:?}"),
        }
        assert_eq!(link.total_bytes_transferred(40.0), 400);
    }

    #[test]
    fn test_teardown_discards_without_credit() {
        let mut link = ContactLink::new(a(), b(), 10.0, 0.0);
        link.start_transfer(a(), msg(1000), 0.0).unwrap();
        let discarded = link.tear_down();
        assert!(discarded.is_some());
        assert_eq!(link.total_bytes_transferred(40.0), 0);
    }

    #[test]
    fn test_total_bytes_monotonic() {
        let mut link = ContactLink::new(a(), b(), 7.0, 0.0);
        let mut last = 0;
        let mut now = 0.0;
        for size in [30u64, 45, 12] {
            link.start_transfer(a(), msg(size), now).unwrap();
            while !link.is_message_transferred(now) {
                now += 1.0;
                let total = link.total_bytes_transferred(now);
                assert!(total >= last);
                last = total;
            }
            link.finalize_transfer().unwrap();
            let total = link.total_bytes_transferred(now);
            assert!(total >= last);
            last = total;
        }
        assert_eq!(last, 87);
    }
}
