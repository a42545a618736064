//! Adaptive replication router
//!
//! Replicates messages spray-and-wait style, but every hand-off is gated by
//! what the receiving host has learned about its situation.
//!
//! Key concepts:
//! - **Context**: battery, buffer occupancy, popularity (distinct hosts
//!   met), tie strength to a neighbour and local density form the Q-learning
//!   state of a decision
//! - **Passive learning**: every update records a zero-reward self
//!   transition per known neighbour, so each visited state gets an entry
//! - **Qualification**: a relayed replica is kept only when the sender
//!   looks like the better carrier (higher TOPP utility or higher FORWARD
//!   value); the destination always accepts
//! - **Budget**: the replica budget is split on every hand-off and capped by
//!   an adaptive ceiling (see [`CopyLedger`])
//! - **Energy**: receiving costs energy; a drained host turns `Dead` and
//!   stops taking part in routing
//! - **Knowledge sharing**: on every hand-off both Q-tables are max-merged

use std::collections::{BTreeMap, BTreeSet};

use ferry_core::{ConfigError, ConfigResult, HostAddress, Message, MessageId, Settings};
use ferry_learning::{
    Action, ContextState, QLearningAgent, QLearningConfig, QTable, RewardFunction,
    UtilityScorer, UtilityWeights,
};
use tracing::{debug, info, trace, warn};

use crate::copies::{CopyLedger, DEFAULT_MAX_COPIES};
use crate::energy::{EnergyAccount, EnergyConfig};
use crate::report::CopyAction;
use crate::router::{
    AdaptiveSummary, DenyReason, PeerCommand, PeerSnapshot, ProtocolState, ProtocolTag,
    ReceiveVerdict, Router, RouterBase, RouterContext, SnapshotScope, TransferOffer,
    TransferOutcome, TransferStatus,
};

/// Liveness of an adaptive host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    Alive,
    /// Out of energy; only passive bookkeeping continues
    Dead,
}

/// Periodic Q-table dump settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QTableReportConfig {
    pub enabled: bool,
    /// Dump when the integer virtual time is a multiple of this
    pub interval: u64,
}

impl Default for QTableReportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: 1000,
        }
    }
}

/// Adaptive router configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveConfig {
    /// Replica budget of new messages
    pub max_copies: u32,
    /// Radius of the local density query
    pub density_range: f64,
    pub learning: QLearningConfig,
    pub weights: UtilityWeights,
    pub energy: EnergyConfig,
    pub q_table_report: QTableReportConfig,
    /// Log every context refresh at debug level
    pub log_node_update: bool,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            max_copies: DEFAULT_MAX_COPIES,
            density_range: 100.0,
            learning: QLearningConfig::default(),
            weights: UtilityWeights::default(),
            energy: EnergyConfig::default(),
            q_table_report: QTableReportConfig::default(),
            log_node_update: false,
        }
    }
}

impl AdaptiveConfig {
    /// Read the `RL`, `Utility`, `Energy` and `QTableReport` namespaces
    pub fn from_settings(settings: &Settings) -> ConfigResult<Self> {
        let defaults = Self::default();
        let rl = settings.namespace("RL");
        let report = settings.namespace("QTableReport");

        let max_copies = rl.u64_or("maxCopies", u64::from(defaults.max_copies))?;
        let max_copies = u32::try_from(max_copies)
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| ConfigError::invalid(rl.full_key("maxCopies"), "must be in 1..=u32::MAX"))?;
        let density_range = rl.f64_or("densityRange", defaults.density_range)?;
        if density_range < 0.0 {
            return Err(ConfigError::invalid(
                rl.full_key("densityRange"),
                "must not be negative",
            ));
        }
        let interval = report.u64_or("interval", defaults.q_table_report.interval)?;
        if interval == 0 {
            return Err(ConfigError::invalid(
                report.full_key("interval"),
                "must be positive",
            ));
        }

        Ok(Self {
            max_copies,
            density_range,
            learning: QLearningConfig::from_settings(&rl)?,
            weights: UtilityWeights::from_settings(&settings.namespace("Utility"))?,
            energy: EnergyConfig::from_settings(&settings.namespace("Energy"))?,
            q_table_report: QTableReportConfig {
                enabled: report.bool_or("enable", defaults.q_table_report.enabled)?,
                interval,
            },
            log_node_update: rl.bool_or("logNodeUpdate", defaults.log_node_update)?,
        })
    }
}

/// Q-learning gated, energy-aware, budget-limited replication
#[derive(Debug, Clone)]
pub struct AdaptiveRouter {
    base: RouterBase,
    config: AdaptiveConfig,
    status: HostStatus,
    energy: EnergyAccount,
    agent: QLearningAgent,
    scorer: UtilityScorer,
    ledger: CopyLedger,
    started_at: f64,
    /// Every host met so far
    contacts: BTreeSet<HostAddress>,
    /// Cumulative contact time per neighbour
    contact_time: BTreeMap<HostAddress, f64>,
    /// Time up to which contact time has been counted, per connected neighbour
    contact_marks: BTreeMap<HostAddress, f64>,
    tie_strengths: BTreeMap<HostAddress, f64>,
    last_state: Option<ContextState>,
    last_utility: f64,
    last_dump: Option<i64>,
    /// Hand-offs refused by a peer during the current contact
    refused: BTreeSet<(MessageId, HostAddress)>,
}

impl AdaptiveRouter {
    /// Router with an energy level drawn from the configured range
    pub fn new(
        address: HostAddress,
        buffer_capacity: u64,
        config: AdaptiveConfig,
        started_at: f64,
    ) -> Self {
        let energy = EnergyAccount::seeded(address, &config.energy);
        Self::with_energy(address, buffer_capacity, config, energy, started_at)
    }

    pub fn with_energy(
        address: HostAddress,
        buffer_capacity: u64,
        config: AdaptiveConfig,
        energy: EnergyAccount,
        started_at: f64,
    ) -> Self {
        Self {
            base: RouterBase::new(address, buffer_capacity),
            status: HostStatus::Alive,
            energy,
            agent: QLearningAgent::new(config.learning, address.seed()),
            scorer: UtilityScorer::new(config.weights),
            ledger: CopyLedger::new(config.max_copies),
            started_at,
            contacts: BTreeSet::new(),
            contact_time: BTreeMap::new(),
            contact_marks: BTreeMap::new(),
            tie_strengths: BTreeMap::new(),
            last_state: None,
            last_utility: 0.0,
            last_dump: None,
            refused: BTreeSet::new(),
            config,
        }
    }

    pub fn status(&self) -> HostStatus {
        self.status
    }

    pub fn is_alive(&self) -> bool {
        self.status == HostStatus::Alive
    }

    pub fn energy(&self) -> &EnergyAccount {
        &self.energy
    }

    pub fn agent(&self) -> &QLearningAgent {
        &self.agent
    }

    pub fn ledger(&self) -> &CopyLedger {
        &self.ledger
    }

    pub fn last_state(&self) -> Option<ContextState> {
        self.last_state
    }

    pub fn last_utility(&self) -> f64 {
        self.last_utility
    }

    pub fn contacts(&self) -> &BTreeSet<HostAddress> {
        &self.contacts
    }

    pub fn tie_strength(&self, peer: HostAddress) -> f64 {
        self.tie_strengths.get(&peer).copied().unwrap_or(0.0)
    }

    /// Recharge the energy account; a dead host does not come back
    pub fn recharge(&mut self, amount: f64) {
        self.energy.recharge(amount);
    }

    fn forward_q(&self) -> f64 {
        self.last_state
            .map(|s| self.agent.q_value(&s, Action::Forward))
            .unwrap_or(0.0)
    }

    fn die(&mut self, now: f64) {
        if self.status == HostStatus::Dead {
            return;
        }
        self.status = HostStatus::Dead;
        info!(host = %self.address(), now, "Host out of energy, leaving the network");
    }

    /// Accumulate contact time with every connected neighbour
    fn observe_contacts(&mut self, peers: &[PeerSnapshot], now: f64) {
        let observed = now - self.started_at;
        for peer in peers {
            self.contacts.insert(peer.address);
            let mark = self.contact_marks.entry(peer.address).or_insert(now);
            let elapsed = (now - *mark).max(0.0);
            *mark = now;
            let total = self.contact_time.entry(peer.address).or_insert(0.0);
            *total += elapsed;
            let tie = if observed > 0.0 { *total / observed } else { 0.0 };
            self.tie_strengths.insert(peer.address, tie.clamp(0.0, 1.0));
        }
    }

    /// Derive a state per known neighbour, pick an action and learn passively
    fn refresh_context(&mut self, ctx: &mut RouterContext<'_>) {
        let battery = self.energy.fraction();
        let buffer = self.base.buffer().occupancy();
        let popularity = self.contacts.len() as u32;
        let density = ctx.topology.density(self.address(), self.config.density_range);

        let ties: Vec<(HostAddress, f64)> =
            self.tie_strengths.iter().map(|(h, t)| (*h, *t)).collect();
        for (neighbor, tie) in ties {
            // Only the Q-table key is rounded; utilities compare raw values
            let state = ContextState::new(battery, buffer, popularity, tie, density);
            let topp = self.scorer.topp(battery, buffer, popularity, tie, density);
            let action = self.agent.choose_action(&state);
            self.agent.update(state, action, 0.0, &state, ctx.now);
            self.last_state = Some(state);
            self.last_utility = topp;
            if self.config.log_node_update {
                debug!(host = %self.address(), %neighbor, %state, topp, %action, "Context refreshed");
            }
        }
    }

    fn dump_q_table_if_due(&mut self, ctx: &mut RouterContext<'_>) {
        let report = self.config.q_table_report;
        if !report.enabled {
            return;
        }
        let tick = ctx.now.floor() as i64;
        if tick % report.interval as i64 != 0 || self.last_dump == Some(tick) {
            return;
        }
        self.last_dump = Some(tick);
        ctx.reports
            .q_table_snapshot(self.address(), ctx.now, self.agent.table());
    }

    /// Deliver buffered messages addressed to this host
    fn check_delivered_messages(&mut self, ctx: &mut RouterContext<'_>) {
        let own = self.address();
        let arrived: Vec<MessageId> = self
            .base
            .buffer()
            .iter()
            .filter(|m| m.to == own)
            .map(|m| m.id.clone())
            .collect();
        for id in arrived {
            let Some(message) = self.base.buffer_mut().remove(&id) else {
                continue;
            };
            self.base.deliver(&message, ctx);
            self.ledger.remove(&id);
            match self.last_state {
                Some(state) => {
                    let reward = RewardFunction::binary(true);
                    self.agent
                        .update(state, Action::Forward, reward, &state, ctx.now);
                }
                None => debug!(host = %own, message = %id, "Delivered before any context was seen"),
            }
        }
    }

    /// Replication offers of messages with budget left, best peers first
    fn replication_offers(&self, peers: &[PeerSnapshot]) -> Vec<TransferOffer> {
        let mut ranked: Vec<&PeerSnapshot> = peers
            .iter()
            .filter(|p| p.is_available() && p.protocol() == ProtocolTag::Adaptive)
            .collect();
        ranked.sort_by(|a, b| {
            let ua = a.adaptive().map(|s| s.utility).unwrap_or(0.0);
            let ub = b.adaptive().map(|s| s.utility).unwrap_or(0.0);
            ub.partial_cmp(&ua).unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut offers = Vec::new();
        for message in self.base.buffer().iter() {
            if self.ledger.copies(&message.id) == 0 {
                continue;
            }
            for peer in &ranked {
                if peer.address == message.to
                    || peer.has_message(&message.id)
                    || self.refused.contains(&(message.id.clone(), peer.address))
                {
                    continue;
                }
                offers.push(TransferOffer {
                    message_id: message.id.clone(),
                    to: peer.address,
                });
            }
        }
        offers
    }

    fn set_remaining(&mut self, id: &MessageId, remaining: u32) {
        let stored = self.ledger.record(id, remaining);
        if let Some(message) = self.base.buffer_mut().get_mut(id) {
            message.set_remaining_copies(stored);
        }
    }

    fn store(&mut self, message: Message) -> TransferStatus {
        match self.base.store(message) {
            Ok(evicted) => {
                for dropped in evicted {
                    trace!(host = %self.address(), message = %dropped.id, "Dropped from full buffer");
                    self.ledger.remove(&dropped.id);
                }
                TransferStatus::Stored
            }
            Err(rejected) => {
                debug!(host = %self.address(), message = %rejected.id, "Message does not fit");
                self.ledger.remove(&rejected.id);
                TransferStatus::Rejected
            }
        }
    }

    fn charge_receive(&mut self, message: &Message, now: f64) {
        let cost = self.config.energy.receive_cost(message.size);
        if !self.energy.can_act(cost) {
            self.energy.consume(cost);
            self.die(now);
            return;
        }
        if self.energy.consume(cost) {
            self.die(now);
        }
    }
}

impl Router for AdaptiveRouter {
    fn address(&self) -> HostAddress {
        self.base.address()
    }

    fn protocol(&self) -> ProtocolTag {
        ProtocolTag::Adaptive
    }

    fn base(&self) -> &RouterBase {
        &self.base
    }

    fn create_message(&mut self, mut message: Message, ctx: &mut RouterContext<'_>) -> bool {
        if !self.is_alive() {
            debug!(host = %self.address(), message = %message.id, "Dead host refuses new message");
            return false;
        }
        let budget = self.ledger.register(&message.id);
        message.set_remaining_copies(budget);
        let id = message.id.clone();
        match self.base.create(message, ctx) {
            Ok(evicted) => {
                for dropped in evicted {
                    self.ledger.remove(&dropped.id);
                }
                true
            }
            Err(_) => {
                self.ledger.remove(&id);
                false
            }
        }
    }

    fn check_receive(&self, message: &Message) -> ReceiveVerdict {
        if !self.is_alive() {
            return ReceiveVerdict::Deny(DenyReason::Stale);
        }
        self.base.check_receive(message)
    }

    fn message_transferred(
        &mut self,
        mut message: Message,
        sender: &PeerSnapshot,
        ctx: &mut RouterContext<'_>,
    ) -> TransferOutcome {
        if !self.is_alive() {
            debug!(host = %self.address(), message = %message.id, "Dead host discards arrival");
            return TransferOutcome::rejected();
        }

        let own = self.address();
        let id = message.id.clone();
        let is_destination = message.to == own;
        let empty = AdaptiveSummary::default();
        let peer = sender.adaptive().unwrap_or(&empty);
        let my_utility = self.last_utility;
        let my_q = self.forward_q();

        let remaining = message
            .remaining_copies()
            .unwrap_or_else(|| self.ledger.copies(&id));
        let ceiling = CopyLedger::adaptive_limit(
            remaining,
            self.config.max_copies,
            &self.contacts,
            &peer.contacts,
            ctx.topology.host_count(),
        );

        let qualified = is_destination || peer.utility > my_utility || peer.forward_q > my_q;
        if !qualified {
            debug!(
                host = %own,
                message = %id,
                from = %sender.address,
                peer_utility = peer.utility,
                my_utility,
                peer_q = peer.forward_q,
                my_q,
                "Replica refused, sender is the better carrier"
            );
            return TransferOutcome::rejected();
        }

        let mut replies = Vec::new();
        if !is_destination {
            if remaining <= 1 {
                self.ledger.forward_final(&id);
                message.set_remaining_copies(0);
                replies.push(PeerCommand::SetRemainingCopies {
                    message_id: id.clone(),
                    remaining: 0,
                });
            } else {
                let split = self.ledger.forward_half(&id, remaining, ceiling);
                message.set_remaining_copies(split.receiver);
                replies.push(PeerCommand::SetRemainingCopies {
                    message_id: id.clone(),
                    remaining: split.forwarder,
                });
            }
            ctx.reports.copy_action(&CopyAction {
                message_id: id.clone(),
                holder: own,
                source: sender.address,
                utility: my_utility,
                q_value: my_q,
                time: ctx.now,
            });
            ctx.reports.message_copied(&id, sender.address, own, ctx.now);
        }

        if let Some(table) = &peer.q_table {
            self.agent.sync_with(table);
            replies.push(PeerCommand::MergeQTable(self.agent.table().clone()));
        }

        if let Some(state) = self.last_state {
            let delay = message.age(ctx.now);
            let reward = RewardFunction::graded(true, delay);
            self.agent
                .update(state, Action::Forward, reward, &state, ctx.now);
        }
        self.charge_receive(&message, ctx.now);

        let status = self.store(message);
        if status == TransferStatus::Stored {
            trace!(host = %own, message = %id, ceiling, "Replica accepted");
        }
        TransferOutcome { status, replies }
    }

    fn transfer_done(
        &mut self,
        id: &MessageId,
        to: HostAddress,
        status: TransferStatus,
        _ctx: &mut RouterContext<'_>,
    ) {
        if status == TransferStatus::Rejected {
            self.refused.insert((id.clone(), to));
        }
    }

    fn link_down(&mut self, peer: HostAddress, _ctx: &mut RouterContext<'_>) {
        self.contact_marks.remove(&peer);
        self.refused.retain(|(_, p)| *p != peer);
    }

    fn update(&mut self, peers: &[PeerSnapshot], ctx: &mut RouterContext<'_>) -> Vec<TransferOffer> {
        self.observe_contacts(peers, ctx.now);
        if !self.is_alive() {
            return Vec::new();
        }

        self.refresh_context(ctx);
        self.dump_q_table_if_due(ctx);
        self.check_delivered_messages(ctx);

        if !self.can_start_transfer() || ctx.transferring {
            return Vec::new();
        }
        let mut offers = self.base.deliverable_offers(peers);
        offers.extend(self.replication_offers(peers));
        offers
    }

    fn snapshot(&mut self, _now: f64, scope: SnapshotScope) -> PeerSnapshot {
        let q_table = match scope {
            SnapshotScope::Transfer => Some(self.agent.table().clone()),
            SnapshotScope::Summary => None,
        };
        PeerSnapshot {
            address: self.address(),
            transferring: false,
            accepting: self.is_alive(),
            messages: self.base.message_ids(),
            state: ProtocolState::Adaptive(AdaptiveSummary {
                contacts: self.contacts.clone(),
                utility: self.last_utility,
                forward_q: self.forward_q(),
                q_table,
            }),
        }
    }

    fn apply_command(&mut self, command: PeerCommand, _ctx: &mut RouterContext<'_>) {
        match command {
            PeerCommand::MergeQTable(table) => self.agent.sync_with(&table),
            PeerCommand::SetRemainingCopies {
                message_id,
                remaining,
            } => {
                if !self.base.buffer().has(&message_id) {
                    warn!(host = %self.address(), message = %message_id, "Budget update for a message no longer held");
                }
                self.set_remaining(&message_id, remaining);
            }
        }
    }

    fn can_start_transfer(&self) -> bool {
        self.is_alive() && !self.base.buffer().is_empty()
    }

    fn accepts_deliverable_requests(&self) -> bool {
        self.is_alive()
    }

    fn finish(&mut self, ctx: &mut RouterContext<'_>) {
        ctx.reports.final_q_table(self.address(), self.agent.table());
    }

    fn routing_info(&mut self, _now: f64) -> Vec<String> {
        vec![
            format!("status {:?}, energy {:.1} of {:.1}", self.status, self.energy.level(), self.energy.initial()),
            format!("{} contacts, {} learned states", self.contacts.len(), self.agent.table().len()),
            format!("utility {:.3}, forward q {:.3}", self.last_utility, self.forward_q()),
        ]
    }
}

/// Q-table rows as `battery,buffer,popularity,tieStrength,density,action,qValue`
pub fn q_table_csv(table: &QTable) -> String {
    let mut out = String::from("battery,buffer,popularity,tieStrength,density,action,qValue\n");
    for (state, row) in table {
        for (action, value) in row {
            out.push_str(&format!("{},{},{:.6}\n", state.to_csv(), action, value));
        }
    }
    out
}
