//! The world: event scheduling, host updates and contact handling
//!
//! Each call to [`World::update`] advances virtual time by one update
//! interval:
//!
//! 1. Pop every event due within the interval, earliest first across all
//!    sources (ties go to the internal scheduled-update queue, then to the
//!    source registered first). After each event the clock jumps to its
//!    time and one host-update pass runs.
//! 2. Move every host by the full interval.
//! 3. Advance the clock to the interval boundary and run a final pass.
//! 4. Notify the [`UpdateListener`]s.
//!
//! A host-update pass visits every host exactly once, either in address
//! order or shuffled with a generator seeded from the integer virtual time.
//!
//! Routers never touch each other. When a transfer completes the world
//! takes a [`SnapshotScope::Transfer`] snapshot of the sender, hands it to
//! the receiver together with the message, and applies the receiver's
//! [`PeerCommand`](ferry_dtn::PeerCommand) replies to the sender.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ferry_core::{
    ConfigError, Coord, EventSource, HostAddress, Message, MessageId, Settings, TopologyError,
};
use ferry_dtn::{
    ContactLink, LinkKey, PeerSnapshot, ReceiveVerdict, ReportSink, Router, RouterContext,
    SnapshotScope, TransferNotice, TransferOffer,
};
use ferry_logging::HostContextGuard;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, info, trace, warn};

use crate::error::{SimError, SimResult};
use crate::events::{ScheduledUpdates, SimEvent};
use crate::host::Host;
use crate::topology::{ConnectivityGrid, TopologyRegistry};

/// Configuration of the world loop and the radio interface
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldConfig {
    /// Length of one tick in virtual time
    pub update_interval: f64,
    /// Shuffle the host-update order every pass
    pub randomize_update_order: bool,
    /// Derive links from host distance instead of scripted events
    pub simulate_connections: bool,
    pub transmit_range: f64,
    /// Bytes per unit of virtual time
    pub transmit_speed: f64,
    /// Grid cell size as a multiple of the transmit range
    pub cell_size_mult: f64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            update_interval: 1.0,
            randomize_update_order: true,
            simulate_connections: true,
            transmit_range: 10.0,
            transmit_speed: 250_000.0,
            cell_size_mult: 5.0,
        }
    }
}

impl WorldConfig {
    /// Read the `Scenario`, `Interface` and `Optimization` namespaces
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let scenario = settings.namespace("Scenario");
        let interface = settings.namespace("Interface");
        let optimization = settings.namespace("Optimization");

        let config = Self {
            update_interval: scenario.f64_or("updateInterval", defaults.update_interval)?,
            randomize_update_order: optimization
                .bool_or("randomizeUpdateOrder", defaults.randomize_update_order)?,
            simulate_connections: scenario
                .bool_or("simulateConnections", defaults.simulate_connections)?,
            transmit_range: interface.f64_or("transmitRange", defaults.transmit_range)?,
            transmit_speed: interface.f64_or("transmitSpeed", defaults.transmit_speed)?,
            cell_size_mult: optimization.f64_or("cellSizeMult", defaults.cell_size_mult)?,
        };
        if config.update_interval <= 0.0 {
            return Err(ConfigError::invalid(
                scenario.full_key("updateInterval"),
                "must be positive",
            ));
        }
        if config.transmit_speed <= 0.0 {
            return Err(ConfigError::invalid(
                interface.full_key("transmitSpeed"),
                "must be positive",
            ));
        }
        Ok(config)
    }
}

/// Shared flag to stop a run between two host updates
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Observer notified after every tick
pub trait UpdateListener {
    fn updated(&mut self, now: f64, hosts: &[Option<Host>]);
}

/// Logs world progress, at `info` every `every` ticks and `trace` otherwise
#[derive(Debug, Clone, Default)]
pub struct TickLogger {
    every: u64,
    ticks: u64,
}

impl TickLogger {
    pub fn new(every: u64) -> Self {
        Self { every, ticks: 0 }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

impl UpdateListener for TickLogger {
    fn updated(&mut self, now: f64, hosts: &[Option<Host>]) {
        self.ticks += 1;
        let live = hosts.iter().flatten().count();
        let links = hosts.iter().flatten().map(|h| h.links.len()).sum::<usize>() / 2;
        if self.every > 0 && self.ticks % self.every == 0 {
            info!(now, hosts = live, links, "Simulation progress");
        } else {
            trace!(now, hosts = live, links, "Tick done");
        }
    }
}

/// Where the next event comes from
#[derive(Debug, Clone, Copy)]
enum EventOrigin {
    Source(usize),
    Scheduled,
}

fn slot_mut(hosts: &mut [Option<Host>], address: HostAddress) -> Result<&mut Host, TopologyError> {
    hosts
        .get_mut(address.index())
        .ok_or(TopologyError::UnknownHost(address))?
        .as_mut()
        .ok_or(TopologyError::EmptySlot(address))
}

fn host_busy(links: &BTreeMap<LinkKey, ContactLink>, host: &Host) -> bool {
    host.links
        .iter()
        .any(|key| links.get(key).is_some_and(ContactLink::is_transferring))
}

/// The simulated world
pub struct World {
    config: WorldConfig,
    hosts: Vec<Option<Host>>,
    links: BTreeMap<LinkKey, ContactLink>,
    sources: Vec<Box<dyn EventSource<SimEvent>>>,
    scheduled: ScheduledUpdates,
    topology: TopologyRegistry,
    clock: f64,
    update_order: Vec<usize>,
    cancel: CancelToken,
    listeners: Vec<Box<dyn UpdateListener>>,
    /// Bytes carried by links that have been torn down
    retired_bytes: u64,
}

impl World {
    /// Create a world; host `n` must have address `n`
    pub fn new(config: WorldConfig, hosts: Vec<Host>) -> SimResult<Self> {
        for (slot, host) in hosts.iter().enumerate() {
            if host.address.index() != slot {
                return Err(ConfigError::invalid(
                    "Scenario.hosts",
                    format!("host {} placed in slot {slot}", host.address),
                )
                .into());
            }
        }
        let grid = ConnectivityGrid::new(config.transmit_range, config.cell_size_mult)?;
        let update_order = (0..hosts.len()).collect();
        let mut world = Self {
            config,
            hosts: hosts.into_iter().map(Some).collect(),
            links: BTreeMap::new(),
            sources: Vec::new(),
            scheduled: ScheduledUpdates::new(),
            topology: TopologyRegistry::new(grid),
            clock: 0.0,
            update_order,
            cancel: CancelToken::new(),
            listeners: Vec::new(),
            retired_bytes: 0,
        };
        world.refresh_topology();
        info!(hosts = world.hosts.len(), "World created");
        Ok(world)
    }

    /// Register an event source; earlier sources win ties
    pub fn add_source(&mut self, source: Box<dyn EventSource<SimEvent>>) {
        debug!(source = source.name(), "Event source added");
        self.sources.push(source);
    }

    pub fn add_listener(&mut self, listener: Box<dyn UpdateListener>) {
        self.listeners.push(listener);
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn now(&self) -> f64 {
        self.clock
    }

    pub fn hosts(&self) -> &[Option<Host>] {
        &self.hosts
    }

    pub fn topology(&self) -> &TopologyRegistry {
        &self.topology
    }

    /// Host-update order of the latest pass
    pub fn update_order(&self) -> &[usize] {
        &self.update_order
    }

    pub fn link(&self, a: HostAddress, b: HostAddress) -> Option<&ContactLink> {
        self.links.get(&LinkKey::new(a, b))
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn host_by_address(&self, address: HostAddress) -> Result<&Host, TopologyError> {
        self.hosts
            .get(address.index())
            .ok_or(TopologyError::UnknownHost(address))?
            .as_ref()
            .ok_or(TopologyError::EmptySlot(address))
    }

    pub fn host_by_address_mut(&mut self, address: HostAddress) -> Result<&mut Host, TopologyError> {
        slot_mut(&mut self.hosts, address)
    }

    /// Take a host out of the world, tearing down its links first
    ///
    /// Its slot stays empty; later passes skip it.
    pub fn remove_host(
        &mut self,
        address: HostAddress,
        reports: &mut dyn ReportSink,
    ) -> SimResult<Host> {
        let keys: Vec<LinkKey> = self.host_by_address(address)?.links.iter().copied().collect();
        for key in keys {
            self.disconnect(key, reports)?;
        }
        let host = self.hosts[address.index()]
            .take()
            .ok_or(TopologyError::EmptySlot(address))?;
        self.refresh_topology();
        info!(host = %address, "Host removed");
        Ok(host)
    }

    /// Queue a host-update pass at `time`
    pub fn schedule_update(&mut self, time: f64) {
        self.scheduled.add(time);
    }

    /// Bytes moved over all links so far, including in-flight prefixes
    pub fn total_bytes_transferred(&self) -> u64 {
        self.retired_bytes
            + self
                .links
                .values()
                .map(|link| link.total_bytes_transferred(self.clock))
                .sum::<u64>()
    }

    /// Whether any link of `address` carries a transfer
    pub fn is_transferring(&self, address: HostAddress) -> bool {
        self.hosts
            .get(address.index())
            .and_then(Option::as_ref)
            .is_some_and(|host| host_busy(&self.links, host))
    }

    /// Run mobility-only ticks so that time 0 starts from a settled layout
    pub fn warmup(&mut self, duration: f64) {
        if duration <= 0.0 {
            return;
        }
        let interval = self.config.update_interval;
        self.clock = -duration;
        while self.clock < -interval {
            self.move_hosts(interval);
            self.clock += interval;
        }
        self.move_hosts(-self.clock);
        self.clock = 0.0;
        debug!(duration, "Warm-up done");
    }

    /// Advance the world by one update interval
    pub fn update(&mut self, reports: &mut dyn ReportSink) -> SimResult<()> {
        let run_until = self.clock + self.config.update_interval;

        while let Some((time, origin)) = self.next_event() {
            if time > run_until {
                break;
            }
            self.clock = self.clock.max(time);
            let event = match origin {
                EventOrigin::Source(index) => self.sources[index].pop_next_event(),
                EventOrigin::Scheduled => self.scheduled.pop_next_event(),
            };
            if let Some(event) = event {
                self.process_event(event, reports)?;
            }
            self.update_hosts(reports)?;
            if self.cancel.is_cancelled() {
                return Ok(());
            }
        }

        self.move_hosts(self.config.update_interval);
        self.clock = run_until;
        self.update_hosts(reports)?;

        for listener in &mut self.listeners {
            listener.updated(self.clock, &self.hosts);
        }
        Ok(())
    }

    /// Tick until `end_time`, cancellation or `max_ticks`; returns the ticks run
    pub fn run_until(
        &mut self,
        end_time: f64,
        max_ticks: Option<u64>,
        reports: &mut dyn ReportSink,
    ) -> SimResult<u64> {
        let mut ticks = 0;
        while self.clock < end_time
            && !self.cancel.is_cancelled()
            && max_ticks.is_none_or(|limit| ticks < limit)
        {
            self.update(reports)?;
            ticks += 1;
        }
        if self.cancel.is_cancelled() {
            info!(now = self.clock, ticks, "Run cancelled");
        }
        Ok(ticks)
    }

    /// Give every router its end-of-run hook
    pub fn finish(&mut self, reports: &mut dyn ReportSink) -> SimResult<()> {
        for slot in 0..self.hosts.len() {
            let Some(address) = self.hosts[slot].as_ref().map(|h| h.address) else {
                continue;
            };
            self.with_router(address, reports, |router, ctx| router.finish(ctx))?;
        }
        info!(now = self.clock, bytes = self.total_bytes_transferred(), "Run finished");
        Ok(())
    }

    /// Human readable router state of one host
    pub fn routing_info(&mut self, address: HostAddress) -> SimResult<Vec<String>> {
        let now = self.clock;
        Ok(slot_mut(&mut self.hosts, address)?.router.routing_info(now))
    }

    fn next_event(&self) -> Option<(f64, EventOrigin)> {
        let scheduled = self.scheduled.next_event_time();
        let mut best = scheduled
            .is_finite()
            .then_some((scheduled, EventOrigin::Scheduled));
        for (index, source) in self.sources.iter().enumerate() {
            let time = source.next_event_time();
            if time.is_finite() && best.is_none_or(|(t, _)| time < t) {
                best = Some((time, EventOrigin::Source(index)));
            }
        }
        best
    }

    fn check_event_host(&self, host: HostAddress) -> SimResult<()> {
        if host.index() >= self.hosts.len() {
            return Err(SimError::UnknownEventHost {
                host,
                time: self.clock,
            });
        }
        Ok(())
    }

    fn process_event(&mut self, event: SimEvent, reports: &mut dyn ReportSink) -> SimResult<()> {
        trace!(now = self.clock, ?event, "Processing event");
        match event {
            SimEvent::ConnectionUp { a, b } => {
                self.check_event_host(a)?;
                self.check_event_host(b)?;
                self.connect(a, b, reports)?;
            }
            SimEvent::ConnectionDown { a, b } => {
                self.check_event_host(a)?;
                self.check_event_host(b)?;
                let key = LinkKey::new(a, b);
                if self.links.contains_key(&key) {
                    self.disconnect(key, reports)?;
                } else {
                    debug!(%a, %b, "Disconnect of hosts that are not linked");
                }
            }
            SimEvent::CreateMessage { id, from, to, size } => {
                self.check_event_host(from)?;
                self.check_event_host(to)?;
                self.create_message(Message::new(id, from, to, size, self.clock), reports)?;
            }
            SimEvent::ScheduledUpdate => {}
        }
        Ok(())
    }

    fn create_message(&mut self, message: Message, reports: &mut dyn ReportSink) -> SimResult<()> {
        let from = message.from;
        let id = message.id.clone();
        let accepted =
            self.with_router(from, reports, |router, ctx| router.create_message(message, ctx))?;
        if accepted {
            debug!(host = %from, message = %id, "Message created");
        } else {
            debug!(host = %from, message = %id, "Message refused at source");
        }
        Ok(())
    }

    /// Call into one router with a fresh context
    fn with_router<R>(
        &mut self,
        address: HostAddress,
        reports: &mut dyn ReportSink,
        f: impl FnOnce(&mut dyn Router, &mut RouterContext<'_>) -> R,
    ) -> SimResult<R> {
        let transferring = self.is_transferring(address);
        let host = slot_mut(&mut self.hosts, address)?;
        let mut ctx = RouterContext {
            now: self.clock,
            transferring,
            topology: &self.topology,
            reports,
        };
        Ok(f(host.router.as_mut(), &mut ctx))
    }

    fn snapshot(&mut self, address: HostAddress, scope: SnapshotScope) -> SimResult<PeerSnapshot> {
        let transferring = self.is_transferring(address);
        let now = self.clock;
        let host = slot_mut(&mut self.hosts, address)?;
        let mut snapshot = host.router.snapshot(now, scope);
        snapshot.transferring = transferring;
        Ok(snapshot)
    }

    fn positions(&self) -> Vec<Option<Coord>> {
        self.hosts
            .iter()
            .map(|slot| slot.as_ref().map(Host::location))
            .collect()
    }

    fn refresh_topology(&mut self) {
        let positions = self.positions();
        self.topology.refresh(positions);
    }

    fn move_hosts(&mut self, dt: f64) {
        for host in self.hosts.iter_mut().flatten() {
            host.mobility.advance(dt);
        }
        self.refresh_topology();
    }

    fn update_hosts(&mut self, reports: &mut dyn ReportSink) -> SimResult<()> {
        if self.config.randomize_update_order {
            let mut rng = StdRng::seed_from_u64(self.clock.max(0.0).floor() as u64);
            self.update_order.shuffle(&mut rng);
        }
        for position in 0..self.update_order.len() {
            if self.cancel.is_cancelled() {
                debug!(now = self.clock, "Host-update pass interrupted");
                break;
            }
            let slot = self.update_order[position];
            let Some(address) = self.hosts[slot].as_ref().map(|h| h.address) else {
                warn!(slot, now = self.clock, "Empty host slot, skipping update");
                continue;
            };
            let _context = HostContextGuard::new(address, self.clock);
            self.update_host(address, reports)?;
        }
        Ok(())
    }

    fn update_host(&mut self, address: HostAddress, reports: &mut dyn ReportSink) -> SimResult<()> {
        if self.config.simulate_connections {
            self.update_connections(address, reports)?;
        }
        self.complete_transfers(address, reports)?;

        let peers = self.peer_snapshots(address)?;
        let offers = self.with_router(address, reports, |router, ctx| router.update(&peers, ctx))?;

        if self.is_transferring(address) {
            return Ok(());
        }
        if !self.start_first_offer(address, &offers)? {
            self.request_deliverables(address)?;
        }
        Ok(())
    }

    /// Bring links in line with the current distances
    fn update_connections(
        &mut self,
        address: HostAddress,
        reports: &mut dyn ReportSink,
    ) -> SimResult<()> {
        let in_range: BTreeSet<HostAddress> = self
            .topology
            .in_range(address, self.config.transmit_range)
            .into_iter()
            .collect();
        let current = self.host_by_address(address)?.peers();
        for peer in &current {
            if !in_range.contains(peer) {
                self.disconnect(LinkKey::new(address, *peer), reports)?;
            }
        }
        for peer in in_range {
            if !current.contains(&peer) {
                self.connect(address, peer, reports)?;
            }
        }
        Ok(())
    }

    fn connect(
        &mut self,
        a: HostAddress,
        b: HostAddress,
        reports: &mut dyn ReportSink,
    ) -> SimResult<()> {
        let key = LinkKey::new(a, b);
        if a == b || self.links.contains_key(&key) {
            return Ok(());
        }
        slot_mut(&mut self.hosts, a)?.links.insert(key);
        slot_mut(&mut self.hosts, b)?.links.insert(key);
        self.links.insert(
            key,
            ContactLink::new(a, b, self.config.transmit_speed, self.clock),
        );

        let snapshot_a = self.snapshot(a, SnapshotScope::Summary)?;
        let snapshot_b = self.snapshot(b, SnapshotScope::Summary)?;
        self.with_router(a, reports, |router, ctx| router.link_up(&snapshot_b, ctx))?;
        self.with_router(b, reports, |router, ctx| router.link_up(&snapshot_a, ctx))?;
        Ok(())
    }

    /// Abort any transfer, then tear the link down and tell both routers
    fn disconnect(&mut self, key: LinkKey, reports: &mut dyn ReportSink) -> SimResult<()> {
        let Some(mut link) = self.links.remove(&key) else {
            return Ok(());
        };
        if link.is_transferring()
            && let TransferNotice::Aborted {
                message_id,
                from,
                to,
                bytes_remaining,
                ..
            } = link.abort_transfer(self.clock)?
        {
            self.with_router(to, reports, |router, _ctx| {
                router.message_aborted(&message_id, from, bytes_remaining)
            })?;
        }
        link.tear_down();
        self.retired_bytes += link.total_bytes_transferred(self.clock);

        for (host, peer) in [(key.low, key.high), (key.high, key.low)] {
            if !slot_mut(&mut self.hosts, host)?.links.remove(&key) {
                return Err(SimError::MissingConnection { host, peer });
            }
        }
        self.with_router(key.low, reports, |router, ctx| router.link_down(key.high, ctx))?;
        self.with_router(key.high, reports, |router, ctx| router.link_down(key.low, ctx))?;
        Ok(())
    }

    fn peer_snapshots(&mut self, address: HostAddress) -> SimResult<Vec<PeerSnapshot>> {
        let peers = self.host_by_address(address)?.peers();
        let mut snapshots = Vec::with_capacity(peers.len());
        for peer in peers {
            if self.host_by_address(peer).is_err() {
                warn!(host = %address, %peer, "Linked to an empty host slot");
                continue;
            }
            snapshots.push(self.snapshot(peer, SnapshotScope::Summary)?);
        }
        Ok(snapshots)
    }

    /// Finalize the transfers this host is sending that have fully arrived
    fn complete_transfers(
        &mut self,
        address: HostAddress,
        reports: &mut dyn ReportSink,
    ) -> SimResult<()> {
        let keys: Vec<LinkKey> = self.host_by_address(address)?.links.iter().copied().collect();
        for key in keys {
            let done = self.links.get(&key).is_some_and(|link| {
                link.sender() == Some(address) && link.is_message_transferred(self.clock)
            });
            if done {
                self.complete_transfer(key, reports)?;
            }
        }
        Ok(())
    }

    fn complete_transfer(&mut self, key: LinkKey, reports: &mut dyn ReportSink) -> SimResult<()> {
        let link = self.links.get_mut(&key).ok_or(SimError::MissingConnection {
            host: key.low,
            peer: key.high,
        })?;
        let TransferNotice::Completed { message, from, to } = link.finalize_transfer()? else {
            return Ok(());
        };
        let id = message.id.clone();

        let sender = self.snapshot(from, SnapshotScope::Transfer)?;
        let outcome = self.with_router(to, reports, |router, ctx| {
            router.message_transferred(message, &sender, ctx)
        })?;
        trace!(message = %id, %from, %to, status = ?outcome.status, "Transfer handled");

        let status = outcome.status;
        for reply in outcome.replies {
            self.with_router(from, reports, |router, ctx| router.apply_command(reply, ctx))?;
        }
        self.with_router(from, reports, |router, ctx| {
            router.transfer_done(&id, to, status, ctx)
        })?;
        Ok(())
    }

    fn start_first_offer(
        &mut self,
        address: HostAddress,
        offers: &[TransferOffer],
    ) -> SimResult<bool> {
        for offer in offers {
            if self.try_start(address, offer.to, &offer.message_id)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Let linked peers push messages addressed to this host
    fn request_deliverables(&mut self, address: HostAddress) -> SimResult<bool> {
        let peers = self.host_by_address(address)?.peers();
        for peer in peers {
            if self.is_transferring(peer) {
                continue;
            }
            let Ok(peer_host) = self.host_by_address(peer) else {
                continue;
            };
            if !peer_host.router.accepts_deliverable_requests() {
                continue;
            }
            let addressed: Vec<MessageId> = peer_host
                .router
                .base()
                .buffer()
                .iter()
                .filter(|m| m.to == address)
                .map(|m| m.id.clone())
                .collect();
            for id in addressed {
                if self.try_start(peer, address, &id)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Start sending `id` from `from` to `to` if the link and receiver allow it
    fn try_start(&mut self, from: HostAddress, to: HostAddress, id: &MessageId) -> SimResult<bool> {
        let key = LinkKey::new(from, to);
        let ready = self
            .links
            .get(&key)
            .is_some_and(ContactLink::is_ready_for_transfer);
        if !ready || self.is_transferring(to) {
            return Ok(false);
        }
        let Some(message) = self.host_by_address(from)?.router.outgoing_message(id) else {
            return Ok(false);
        };
        if let ReceiveVerdict::Deny(reason) = self.host_by_address(to)?.router.check_receive(&message)
        {
            trace!(message = %id, %from, %to, ?reason, "Receiver declined");
            return Ok(false);
        }
        if let Some(link) = self.links.get_mut(&key) {
            link.start_transfer(from, message, self.clock)?;
        }
        Ok(true)
    }
}
