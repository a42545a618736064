//! Router capability interface
//!
//! Routers never touch each other directly. The world hands a router
//! read-only [`PeerSnapshot`]s of its neighbours, and a router that needs
//! to change a peer's state answers with [`PeerCommand`]s that the world
//! applies to that peer afterwards:
//!
//! ```text
//! world ── snapshot(sender) ──▶ receiver.message_transferred(msg, &snapshot)
//!       ◀── TransferOutcome { status, replies: [PeerCommand] } ──┘
//! world ── sender.apply_command(reply) for each reply
//! ```
//!
//! Compatibility between strategies is decided by the [`ProtocolTag`] a
//! snapshot carries, not by inspecting concrete types.

use std::collections::{BTreeMap, BTreeSet};

use ferry_core::{HostAddress, Message, MessageId};
use ferry_learning::QTable;
use tracing::{debug, trace};

use crate::buffer::MessageBuffer;
use crate::report::ReportSink;

/// Routing strategy a host runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolTag {
    /// Delivery-predictability (PRoPHET style) routing
    Predictability,
    /// Q-learning gated, budget limited replication
    Adaptive,
}

/// Global view of the world that routers may query
pub trait TopologyView {
    /// Number of hosts in the world
    fn host_count(&self) -> usize;

    /// Share of the other hosts within `range` of `host`, in `[0, 1]`
    fn density(&self, host: HostAddress, range: f64) -> f64;
}

/// Everything a router may use during one call besides its own state
pub struct RouterContext<'a> {
    /// Current virtual time
    pub now: f64,
    /// Whether any link of this host carries a transfer
    pub transferring: bool,
    pub topology: &'a dyn TopologyView,
    pub reports: &'a mut dyn ReportSink,
}

/// How much state a snapshot should include
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotScope {
    /// Enough for forwarding decisions
    Summary,
    /// Also the state needed by a transfer-completion hook
    Transfer,
}

/// Learned state an adaptive router exposes to its peers
#[derive(Debug, Clone, Default)]
pub struct AdaptiveSummary {
    /// Every host met so far
    pub contacts: BTreeSet<HostAddress>,
    /// TOPP utility of the latest decision
    pub utility: f64,
    /// FORWARD value of the latest decision state
    pub forward_q: f64,
    /// Full Q-table, only in [`SnapshotScope::Transfer`] snapshots
    pub q_table: Option<QTable>,
}

/// Strategy-specific part of a snapshot
#[derive(Debug, Clone)]
pub enum ProtocolState {
    /// Delivery predictabilities by destination
    Predictability(BTreeMap<HostAddress, f64>),
    Adaptive(AdaptiveSummary),
}

/// Read-only view of a peer router
#[derive(Debug, Clone)]
pub struct PeerSnapshot {
    pub address: HostAddress,
    /// Any link of the peer carries a transfer
    pub transferring: bool,
    /// The peer accepts inbound messages at all
    pub accepting: bool,
    pub messages: BTreeSet<MessageId>,
    pub state: ProtocolState,
}

impl PeerSnapshot {
    pub fn protocol(&self) -> ProtocolTag {
        match self.state {
            ProtocolState::Predictability(_) => ProtocolTag::Predictability,
            ProtocolState::Adaptive(_) => ProtocolTag::Adaptive,
        }
    }

    pub fn has_message(&self, id: &MessageId) -> bool {
        self.messages.contains(id)
    }

    /// Whether the peer can take a new transfer right now
    pub fn is_available(&self) -> bool {
        self.accepting && !self.transferring
    }

    pub fn predictabilities(&self) -> Option<&BTreeMap<HostAddress, f64>> {
        match &self.state {
            ProtocolState::Predictability(table) => Some(table),
            ProtocolState::Adaptive(_) => None,
        }
    }

    pub fn adaptive(&self) -> Option<&AdaptiveSummary> {
        match &self.state {
            ProtocolState::Adaptive(summary) => Some(summary),
            ProtocolState::Predictability(_) => None,
        }
    }
}

/// State change a router asks the world to apply to a peer
#[derive(Debug, Clone)]
pub enum PeerCommand {
    /// Max-merge this table into the peer's Q-table
    MergeQTable(QTable),
    /// Lower the peer's replica budget of a message
    SetRemainingCopies {
        message_id: MessageId,
        remaining: u32,
    },
}

/// A message a router wants to send to a connected peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOffer {
    pub message_id: MessageId,
    pub to: HostAddress,
}

/// Why a router refuses to start receiving a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Already held, already delivered, or the router is out of service
    Stale,
    /// Larger than the whole buffer
    NoRoom,
}

/// Answer to a request to start a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveVerdict {
    Accept,
    Deny(DenyReason),
}

/// Fate of a fully received message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Reached its destination
    Delivered,
    /// Buffered for further forwarding
    Stored,
    /// Discarded by the receiver
    Rejected,
}

/// What a receiving router did with a message
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub status: TransferStatus,
    /// Commands for the sending router
    pub replies: Vec<PeerCommand>,
}

impl TransferOutcome {
    pub fn new(status: TransferStatus) -> Self {
        Self {
            status,
            replies: Vec::new(),
        }
    }

    pub fn rejected() -> Self {
        Self::new(TransferStatus::Rejected)
    }
}

/// A routing strategy attached to one host
pub trait Router {
    fn address(&self) -> HostAddress;

    fn protocol(&self) -> ProtocolTag;

    /// Shared store-carry-forward state
    fn base(&self) -> &RouterBase;

    /// Accept a message created at this host
    fn create_message(&mut self, message: Message, ctx: &mut RouterContext<'_>) -> bool;

    /// Whether a transfer of `message` towards this host may start
    fn check_receive(&self, message: &Message) -> ReceiveVerdict {
        self.base().check_receive(message)
    }

    /// A message fully arrived from `sender`
    fn message_transferred(
        &mut self,
        message: Message,
        sender: &PeerSnapshot,
        ctx: &mut RouterContext<'_>,
    ) -> TransferOutcome;

    /// A message towards this host was cut short
    fn message_aborted(&mut self, id: &MessageId, from: HostAddress, bytes_remaining: u64) {
        debug!(host = %self.address(), message = %id, %from, bytes_remaining, "Incoming transfer aborted");
    }

    /// A transfer this host started has been handled by the receiver
    fn transfer_done(
        &mut self,
        _id: &MessageId,
        _to: HostAddress,
        _status: TransferStatus,
        _ctx: &mut RouterContext<'_>,
    ) {
    }

    fn link_up(&mut self, _peer: &PeerSnapshot, _ctx: &mut RouterContext<'_>) {}

    fn link_down(&mut self, _peer: HostAddress, _ctx: &mut RouterContext<'_>) {}

    /// Periodic update; returns offers in preference order
    fn update(&mut self, peers: &[PeerSnapshot], ctx: &mut RouterContext<'_>) -> Vec<TransferOffer>;

    /// Read-only view of this router for its peers
    fn snapshot(&mut self, now: f64, scope: SnapshotScope) -> PeerSnapshot;

    /// Apply a command issued by a peer
    fn apply_command(&mut self, _command: PeerCommand, _ctx: &mut RouterContext<'_>) {}

    /// Whether this router may act as a transfer source
    fn can_start_transfer(&self) -> bool {
        !self.base().buffer().is_empty()
    }

    /// Whether peers may pull messages addressed to them from this router
    fn accepts_deliverable_requests(&self) -> bool {
        true
    }

    /// Copy of a buffered message for sending
    fn outgoing_message(&self, id: &MessageId) -> Option<Message> {
        self.base().buffer().get(id).cloned()
    }

    /// End of run hook
    fn finish(&mut self, _ctx: &mut RouterContext<'_>) {}

    /// Human readable state summary
    fn routing_info(&mut self, _now: f64) -> Vec<String> {
        let base = self.base();
        vec![format!(
            "{} messages buffered ({} of {} bytes)",
            base.buffer().len(),
            base.buffer().used(),
            base.buffer().capacity()
        )]
    }
}

/// Buffer and delivery bookkeeping shared by every strategy
#[derive(Debug, Clone)]
pub struct RouterBase {
    address: HostAddress,
    buffer: MessageBuffer,
    delivered: BTreeSet<MessageId>,
}

impl RouterBase {
    pub fn new(address: HostAddress, buffer_capacity: u64) -> Self {
        Self {
            address,
            buffer: MessageBuffer::new(buffer_capacity),
            delivered: BTreeSet::new(),
        }
    }

    pub fn address(&self) -> HostAddress {
        self.address
    }

    pub fn buffer(&self) -> &MessageBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut MessageBuffer {
        &mut self.buffer
    }

    pub fn has_delivered(&self, id: &MessageId) -> bool {
        self.delivered.contains(id)
    }

    pub fn message_ids(&self) -> BTreeSet<MessageId> {
        self.buffer.ids().cloned().collect()
    }

    pub fn check_receive(&self, message: &Message) -> ReceiveVerdict {
        if self.buffer.has(&message.id) || self.delivered.contains(&message.id) {
            return ReceiveVerdict::Deny(DenyReason::Stale);
        }
        if !self.buffer.fits(message.size) {
            return ReceiveVerdict::Deny(DenyReason::NoRoom);
        }
        ReceiveVerdict::Accept
    }

    /// Buffer a message created at this host
    ///
    /// Gives the message back when it can never fit.
    pub fn create(
        &mut self,
        message: Message,
        ctx: &mut RouterContext<'_>,
    ) -> Result<Vec<Message>, Message> {
        ctx.reports.message_created(&message, ctx.now);
        self.buffer.insert(message)
    }

    /// Buffer a relayed message without delivery handling
    pub fn store(&mut self, message: Message) -> Result<Vec<Message>, Message> {
        self.buffer.insert(message)
    }

    /// Record a message as delivered here, reporting it once
    pub fn deliver(&mut self, message: &Message, ctx: &mut RouterContext<'_>) -> bool {
        if !self.delivered.insert(message.id.clone()) {
            return false;
        }
        debug!(host = %self.address, message = %message.id, "Message delivered");
        ctx.reports.message_delivered(message, self.address, ctx.now);
        true
    }

    /// Default handling of a fully received message
    pub fn receive(
        &mut self,
        message: Message,
        from: HostAddress,
        ctx: &mut RouterContext<'_>,
    ) -> TransferStatus {
        if message.to == self.address {
            self.deliver(&message, ctx);
            return TransferStatus::Delivered;
        }
        let id = message.id.clone();
        match self.buffer.insert(message) {
            Ok(evicted) => {
                for dropped in evicted {
                    trace!(host = %self.address, message = %dropped.id, "Dropped from full buffer");
                }
                ctx.reports.message_copied(&id, from, self.address, ctx.now);
                TransferStatus::Stored
            }
            Err(rejected) => {
                debug!(host = %self.address, message = %rejected.id, "Message does not fit");
                TransferStatus::Rejected
            }
        }
    }

    /// Offers of buffered messages to connected peers that are their destination
    pub fn deliverable_offers(&self, peers: &[PeerSnapshot]) -> Vec<TransferOffer> {
        let mut offers = Vec::new();
        for message in self.buffer.iter() {
            for peer in peers {
                if peer.address == message.to
                    && peer.is_available()
                    && !peer.has_message(&message.id)
                {
                    offers.push(TransferOffer {
                        message_id: message.id.clone(),
                        to: peer.address,
                    });
                }
            }
        }
        offers
    }
}
