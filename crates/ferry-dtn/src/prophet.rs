//! Delivery-predictability routing (PRoPHET)
//!
//! PRoPHET uses encounter history to estimate delivery probabilities.
//! Hosts that are met often are more likely to be good carriers towards
//! each other.
//!
//! Key concepts:
//! - **Delivery predictability (P)**: likelihood that this host can deliver
//!   to a destination, in `[0, 1]`
//! - **Encounter update**: on every contact `P(b) = P(b) + (1 - P(b)) * P_init`
//! - **Transitivity**: if A often meets B and B often meets C, then
//!   `P(c) = P(c) + (1 - P(c)) * P(b) * P_b(c) * beta`
//! - **Aging**: values decay lazily by `gamma^dt`, where `dt` is the virtual
//!   time since the last aging in configurable time units. Aging twice at
//!   the same timestamp is a no-op.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use ferry_core::{ConfigError, ConfigResult, HostAddress, Message, Settings};
use tracing::{debug, trace};

use crate::router::{
    PeerSnapshot, ProtocolState, ProtocolTag, Router, RouterBase, RouterContext,
    SnapshotScope, TransferOffer, TransferOutcome,
};

/// PRoPHET protocol configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProphetConfig {
    /// Predictability gained by a direct encounter (P_init)
    /// Default: 0.75
    pub initial_probability: f64,

    /// Aging constant (gamma), applied once per elapsed time unit
    /// Default: 0.98
    pub aging_constant: f64,

    /// Transitivity scaling factor (beta)
    /// Default: 0.25
    pub transitivity_constant: f64,

    /// Virtual time making up one aging unit
    /// Default: 30
    pub seconds_in_time_unit: f64,
}

impl Default for ProphetConfig {
    fn default() -> Self {
        Self {
            initial_probability: 0.75,
            aging_constant: 0.98,
            transitivity_constant: 0.25,
            seconds_in_time_unit: 30.0,
        }
    }
}

impl ProphetConfig {
    /// Read the `ProphetRouter` namespace; `secondsInTimeUnit` is required
    pub fn from_settings(settings: &Settings) -> ConfigResult<Self> {
        let defaults = Self::default();
        let config = Self {
            initial_probability: settings
                .f64_or("initialPredictability", defaults.initial_probability)?,
            aging_constant: settings.f64_or("gamma", defaults.aging_constant)?,
            transitivity_constant: settings.f64_or("beta", defaults.transitivity_constant)?,
            seconds_in_time_unit: settings.get_f64("secondsInTimeUnit")?,
        };
        if config.seconds_in_time_unit <= 0.0 {
            return Err(ConfigError::invalid(
                settings.full_key("secondsInTimeUnit"),
                "must be positive",
            ));
        }
        let unit = [
            ("initialPredictability", config.initial_probability),
            ("gamma", config.aging_constant),
            ("beta", config.transitivity_constant),
        ];
        for (key, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::invalid(
                    settings.full_key(key),
                    format!("{value} is outside [0, 1]"),
                ));
            }
        }
        Ok(config)
    }
}

/// Delivery predictabilities of one host
#[derive(Debug, Clone)]
pub struct ProphetState {
    local_id: HostAddress,
    probabilities: BTreeMap<HostAddress, f64>,
    config: ProphetConfig,
    last_aging: f64,
}

impl ProphetState {
    pub fn new(local_id: HostAddress, config: ProphetConfig) -> Self {
        Self {
            local_id,
            probabilities: BTreeMap::new(),
            config,
            last_aging: 0.0,
        }
    }

    pub fn with_defaults(local_id: HostAddress) -> Self {
        Self::new(local_id, ProphetConfig::default())
    }

    pub fn local_id(&self) -> HostAddress {
        self.local_id
    }

    pub fn config(&self) -> &ProphetConfig {
        &self.config
    }

    /// Predictability towards `destination` at `now`, 0 if unknown
    pub fn get_probability(&mut self, destination: HostAddress, now: f64) -> f64 {
        self.age_all(now);
        self.probabilities.get(&destination).copied().unwrap_or(0.0)
    }

    /// Every known predictability, aged to `now`
    pub fn all_probabilities(&mut self, now: f64) -> BTreeMap<HostAddress, f64> {
        self.age_all(now);
        self.probabilities.clone()
    }

    pub fn known_destinations(&self) -> usize {
        self.probabilities.len()
    }

    /// Record a direct encounter with `peer`
    pub fn encounter(&mut self, peer: HostAddress, now: f64) {
        if peer == self.local_id {
            return;
        }
        self.age_all(now);
        let p_old = self.probabilities.get(&peer).copied().unwrap_or(0.0);
        let p_new = p_old + (1.0 - p_old) * self.config.initial_probability;
        self.probabilities.insert(peer, p_new.clamp(0.0, 1.0));
    }

    /// Learn from the predictabilities of `intermediary`
    pub fn transitive_update(
        &mut self,
        intermediary: HostAddress,
        intermediary_probs: &BTreeMap<HostAddress, f64>,
        now: f64,
    ) {
        let p_to_intermediary = self.get_probability(intermediary, now);
        for (destination, p_int_to_dest) in intermediary_probs {
            if *destination == self.local_id {
                continue;
            }
            let p_old = self.probabilities.get(destination).copied().unwrap_or(0.0);
            let transitive =
                p_to_intermediary * p_int_to_dest * self.config.transitivity_constant;
            let p_new = p_old + (1.0 - p_old) * transitive;
            self.probabilities.insert(*destination, p_new.clamp(0.0, 1.0));
        }
    }

    /// Age every value to `now`
    pub fn age_all(&mut self, now: f64) {
        let time_diff = (now - self.last_aging) / self.config.seconds_in_time_unit;
        if time_diff <= 0.0 {
            return;
        }
        let mult = self.config.aging_constant.powf(time_diff);
        for p in self.probabilities.values_mut() {
            *p *= mult;
        }
        self.last_aging = now;
    }

    /// Should we hand a message for `destination` to a peer reporting `theirs`?
    pub fn should_forward_to(&mut self, destination: HostAddress, theirs: f64, now: f64) -> bool {
        theirs > self.get_probability(destination, now)
    }
}

/// Epidemic router that forwards only towards better carriers
#[derive(Debug, Clone)]
pub struct ProphetRouter {
    base: RouterBase,
    state: ProphetState,
}

impl ProphetRouter {
    pub fn new(address: HostAddress, buffer_capacity: u64, config: ProphetConfig) -> Self {
        Self {
            base: RouterBase::new(address, buffer_capacity),
            state: ProphetState::new(address, config),
        }
    }

    pub fn state(&self) -> &ProphetState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ProphetState {
        &mut self.state
    }

    /// Offers to connected peers with a better predictability, best first
    fn better_carrier_offers(&mut self, peers: &[PeerSnapshot], now: f64) -> Vec<TransferOffer> {
        let mut candidates: Vec<(f64, TransferOffer)> = Vec::new();
        for peer in peers {
            if !peer.is_available() {
                continue;
            }
            let Some(theirs) = peer.predictabilities() else {
                continue;
            };
            for message in self.base.buffer().iter() {
                if message.to == peer.address || peer.has_message(&message.id) {
                    continue;
                }
                let p_peer = theirs.get(&message.to).copied().unwrap_or(0.0);
                if self.state.should_forward_to(message.to, p_peer, now) {
                    candidates.push((
                        p_peer,
                        TransferOffer {
                            message_id: message.id.clone(),
                            to: peer.address,
                        },
                    ));
                }
            }
        }
        // Stable sort keeps discovery order among equal predictabilities
        candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        candidates.into_iter().map(|(_, offer)| offer).collect()
    }
}

impl Router for ProphetRouter {
    fn address(&self) -> HostAddress {
        self.base.address()
    }

    fn protocol(&self) -> ProtocolTag {
        ProtocolTag::Predictability
    }

    fn base(&self) -> &RouterBase {
        &self.base
    }

    fn create_message(&mut self, message: Message, ctx: &mut RouterContext<'_>) -> bool {
        self.base.create(message, ctx).is_ok()
    }

    fn message_transferred(
        &mut self,
        message: Message,
        sender: &PeerSnapshot,
        ctx: &mut RouterContext<'_>,
    ) -> TransferOutcome {
        let status = self.base.receive(message, sender.address, ctx);
        TransferOutcome::new(status)
    }

    fn link_up(&mut self, peer: &PeerSnapshot, ctx: &mut RouterContext<'_>) {
        self.state.encounter(peer.address, ctx.now);
        match peer.predictabilities() {
            Some(theirs) => self.state.transitive_update(peer.address, theirs, ctx.now),
            None => debug!(
                host = %self.address(),
                peer = %peer.address,
                "Peer does not share predictabilities, skipping transitive update"
            ),
        }
    }

    fn update(&mut self, peers: &[PeerSnapshot], ctx: &mut RouterContext<'_>) -> Vec<TransferOffer> {
        self.state.age_all(ctx.now);
        if !self.can_start_transfer() || ctx.transferring {
            return Vec::new();
        }
        let mut offers = self.base.deliverable_offers(peers);
        offers.extend(self.better_carrier_offers(peers, ctx.now));
        trace!(host = %self.address(), offers = offers.len(), "Prophet update");
        offers
    }

    fn snapshot(&mut self, now: f64, _scope: SnapshotScope) -> PeerSnapshot {
        PeerSnapshot {
            address: self.address(),
            transferring: false,
            accepting: true,
            messages: self.base.message_ids(),
            state: ProtocolState::Predictability(self.state.all_probabilities(now)),
        }
    }

    fn routing_info(&mut self, now: f64) -> Vec<String> {
        let mut info = vec![format!(
            "{} delivery predictabilities",
            self.state.known_destinations()
        )];
        for (host, p) in self.state.all_probabilities(now) {
            info.push(format!("  {host} : {p:.6}"));
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{EventLog, ReportEvent};
    use crate::router::TransferStatus;
    use std::collections::BTreeSet;

    const EPS: f64 = 1e-9;

    struct FlatTopology;

    impl crate::router::TopologyView for FlatTopology {
        fn host_count(&self) -> usize {
            4
        }

        fn density(&self, _host: HostAddress, _range: f64) -> f64 {
            0.0
        }
    }

    fn h(n: u32) -> HostAddress {
        HostAddress(n)
    }

    fn peer(addr: u32, preds: &[(u32, f64)]) -> PeerSnapshot {
        PeerSnapshot {
            address: h(addr),
            transferring: false,
            accepting: true,
            messages: BTreeSet::new(),
            state: ProtocolState::Predictability(
                preds.iter().map(|(a, p)| (h(*a), *p)).collect(),
            ),
        }
    }

    #[test]
    fn test_initial_encounter() {
        let mut state = ProphetState::with_defaults(h(0));
        assert_eq!(state.get_probability(h(1), 0.0), 0.0);
        state.encounter(h(1), 0.0);
        assert!((state.get_probability(h(1), 0.0) - 0.75).abs() < EPS);
    }

    #[test]
    fn test_repeated_encounters_approach_one() {
        let mut state = ProphetState::with_defaults(h(0));
        let mut last = 0.0;
        for _ in 0..40 {
            state.encounter(h(1), 0.0);
            let p = state.get_probability(h(1), 0.0);
            assert!(p >= last);
            assert!(p <= 1.0);
            last = p;
        }
        state.encounter(h(1), 0.0);
        assert!(state.get_probability(h(1), 0.0) <= 1.0);
    }

    #[test]
    fn test_no_self_encounter() {
        let mut state = ProphetState::with_defaults(h(0));
        state.encounter(h(0), 0.0);
        assert_eq!(state.known_destinations(), 0);
    }

    #[test]
    fn test_aging_is_lazy_and_idempotent_per_timestamp() {
        let mut state = ProphetState::with_defaults(h(0));
        state.encounter(h(1), 0.0);

        let p1 = state.get_probability(h(1), 300.0);
        let p2 = state.get_probability(h(1), 300.0);
        assert_eq!(p1, p2);
        // 300 time / 30 per unit = 10 units
        assert!((p1 - 0.75 * 0.98f64.powi(10)).abs() < EPS);
    }

    #[test]
    fn test_aging_strictly_decreases_but_stays_positive() {
        let mut state = ProphetState::with_defaults(h(0));
        state.encounter(h(1), 0.0);
        let mut last = state.get_probability(h(1), 0.0);
        for step in 1..50 {
            let p = state.get_probability(h(1), step as f64 * 600.0);
            assert!(p < last);
            assert!(p > 0.0);
            last = p;
        }
    }

    #[test]
    fn test_transitive_update() {
        let mut a = ProphetState::with_defaults(h(0));
        a.encounter(h(1), 0.0);

        let mut b = ProphetState::with_defaults(h(1));
        b.encounter(h(2), 0.0);
        b.encounter(h(0), 0.0);

        let b_probs = b.all_probabilities(0.0);
        a.transitive_update(h(1), &b_probs, 0.0);

        let expected = 0.75 * 0.75 * 0.25;
        assert!((a.get_probability(h(2), 0.0) - expected).abs() < EPS);
        // Own entry in the peer table is ignored
        assert!(!a.all_probabilities(0.0).contains_key(&h(0)));
    }

    #[test]
    fn test_config_requires_time_unit() {
        let settings = Settings::from_toml_str("[ProphetRouter]\nbeta = 0.3\n").unwrap();
        assert!(ProphetConfig::from_settings(&settings.namespace("ProphetRouter")).is_err());

        let settings =
            Settings::from_toml_str("[ProphetRouter]\nbeta = 0.3\nsecondsInTimeUnit = 10\n")
                .unwrap();
        let config = ProphetConfig::from_settings(&settings.namespace("ProphetRouter")).unwrap();
        assert_eq!(config.transitivity_constant, 0.3);
        assert_eq!(config.seconds_in_time_unit, 10.0);
    }

    #[test]
    fn test_offers_rank_better_carriers() {
        let mut router = ProphetRouter::new(h(0), 10_000, ProphetConfig::default());
        let mut log = EventLog::new();
        let topo = FlatTopology;
        let mut ctx = RouterContext {
            now: 0.0,
            transferring: false,
            topology: &topo,
            reports: &mut log,
        };
        router.create_message(Message::new("M1", h(0), h(3), 100, 0.0), &mut ctx);

        // Our own predictability to 3 is 0.2 through transitivity
        router.state_mut().encounter(h(9), 0.0);
        let mut via = BTreeMap::new();
        via.insert(h(3), 1.0);
        router.state_mut().transitive_update(h(9), &via, 0.0);
        let ours = router.state_mut().get_probability(h(3), 0.0);
        assert!(ours > 0.1 && ours < 0.3);

        let peers = vec![
            peer(1, &[(3, 0.4)]),
            peer(2, &[(3, 0.9)]),
            peer(4, &[(3, 0.05)]),
        ];
        let offers = router.update(&peers, &mut ctx);
        let targets: Vec<_> = offers.iter().map(|o| o.to).collect();
        assert_eq!(targets, vec![h(2), h(1)]);
    }

    #[test]
    fn test_direct_delivery_first() {
        let mut router = ProphetRouter::new(h(0), 10_000, ProphetConfig::default());
        let mut log = EventLog::new();
        let topo = FlatTopology;
        let mut ctx = RouterContext {
            now: 0.0,
            transferring: false,
            topology: &topo,
            reports: &mut log,
        };
        router.create_message(Message::new("M1", h(0), h(3), 100, 0.0), &mut ctx);
        let offers = router.update(&[peer(2, &[(3, 0.9)]), peer(3, &[])], &mut ctx);
        assert_eq!(offers[0].to, h(3));
        assert_eq!(offers[1].to, h(2));
    }

    #[test]
    fn test_no_offers_while_transferring() {
        let mut router = ProphetRouter::new(h(0), 10_000, ProphetConfig::default());
        let mut log = EventLog::new();
        let topo = FlatTopology;
        let mut ctx = RouterContext {
            now: 0.0,
            transferring: true,
            topology: &topo,
            reports: &mut log,
        };
        router.create_message(Message::new("M1", h(0), h(3), 100, 0.0), &mut ctx);
        assert!(router.update(&[peer(3, &[])], &mut ctx).is_empty());
    }

    #[test]
    fn test_receive_delivers_or_stores() {
        let mut router = ProphetRouter::new(h(3), 10_000, ProphetConfig::default());
        let mut log = EventLog::new();
        let topo = FlatTopology;
        let mut ctx = RouterContext {
            now: 5.0,
            transferring: false,
            topology: &topo,
            reports: &mut log,
        };
        let sender = peer(0, &[]);
        let outcome =
            router.message_transferred(Message::new("M1", h(0), h(3), 10, 0.0), &sender, &mut ctx);
        assert_eq!(outcome.status, TransferStatus::Delivered);
        let outcome =
            router.message_transferred(Message::new("M2", h(0), h(1), 10, 0.0), &sender, &mut ctx);
        assert_eq!(outcome.status, TransferStatus::Stored);
        assert!(router.base().buffer().has(&"M2".into()));
        assert!(
            log.events
                .iter()
                .any(|e| matches!(e, ReportEvent::Delivered { id, .. } if id.as_str() == "M1"))
        );
    }

    #[test]
    fn test_link_up_with_foreign_protocol_only_encounters() {
        let mut router = ProphetRouter::new(h(0), 10_000, ProphetConfig::default());
        let mut log = EventLog::new();
        let topo = FlatTopology;
        let mut ctx = RouterContext {
            now: 0.0,
            transferring: false,
            topology: &topo,
            reports: &mut log,
        };
        let adaptive = PeerSnapshot {
            address: h(5),
            transferring: false,
            accepting: true,
            messages: BTreeSet::new(),
            state: ProtocolState::Adaptive(Default::default()),
        };
        router.link_up(&adaptive, &mut ctx);
        assert_eq!(router.state().known_destinations(), 1);
    }
}
