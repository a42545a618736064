//! End-to-end runs of the world loop

use std::cell::RefCell;
use std::rc::Rc;

use ferry_core::{Coord, HostAddress, Message, MessageId, MobilityProvider, Settings};
use ferry_dtn::{
    PeerCommand, PeerSnapshot, ProphetConfig, ProtocolTag, ReceiveVerdict, Router, RouterBase,
    RouterContext, RouterKind, SnapshotScope, TransferOffer, TransferOutcome, TransferStatus,
};
use ferry_simulation::{
    CancelToken, DEFAULT_SCENARIO, EventQueue, Host, Scenario, ScenarioConfig, SimEvent, SimReport,
    Stationary, TimedEvent, UpdateListener, World, WorldConfig, run_scenario,
};

fn demo_config(router: &str, hosts: i64, end_time: f64) -> ScenarioConfig {
    ferry_logging::init_testing();
    let mut settings = Settings::from_toml_str(DEFAULT_SCENARIO).unwrap();
    settings.set("Scenario.router", router).unwrap();
    settings.set("Scenario.hosts", hosts).unwrap();
    settings.set("Scenario.endTime", end_time).unwrap();
    settings.set("Scenario.warmup", 20.0).unwrap();
    ScenarioConfig::from_settings(&settings).unwrap()
}

/// Three stationary hosts whose contacts come only from the script
fn scripted_config(router: &str, script: &str) -> ScenarioConfig {
    ferry_logging::init_testing();
    let source = format!(
        r#"
        [Scenario]
        router = "{router}"
        hosts = 3
        endTime = 30
        simulateConnections = false

        [ProphetRouter]
        secondsInTimeUnit = 30

        [MovementModel]
        model = "Stationary"
        positions = [[0, 0], [500, 0], [1000, 0]]

        [Events]
        interval = 0
        script = [
            {script}
        ]
        "#
    );
    ScenarioConfig::from_settings(&Settings::from_toml_str(&source).unwrap()).unwrap()
}

#[test]
fn test_identical_runs_are_identical() {
    let first = run_scenario(demo_config("adaptive", 8, 300.0), None).unwrap();
    let second = run_scenario(demo_config("adaptive", 8, 300.0), None).unwrap();

    assert_eq!(first.report().summary(), second.report().summary());
    assert_eq!(first.world().update_order(), second.world().update_order());
    for host in HostAddress::range(8) {
        assert_eq!(
            first.report().final_table(host),
            second.report().final_table(host)
        );
        assert!(first.report().final_table(host).is_some());
    }
    assert!(first.report().created() > 0);
}

#[test]
fn test_prophet_relays_over_scripted_contacts() {
    let config = scripted_config(
        "prophet",
        r#"{ time = 2, type = "ConnectionUp", a = 1, b = 2 },
            { time = 4, type = "ConnectionDown", a = 1, b = 2 },
            { time = 5, type = "CreateMessage", id = "m1", from = 0, to = 2, size = 1000 },
            { time = 6, type = "ConnectionUp", a = 0, b = 1 },
            { time = 10, type = "ConnectionDown", a = 0, b = 1 },
            { time = 12, type = "ConnectionUp", a = 1, b = 2 },"#,
    );
    let scenario = run_scenario(config, None).unwrap();
    let report = scenario.report();
    let id = MessageId::new("m1");
    assert_eq!(report.created(), 1);
    assert_eq!(report.copies_of(&id), 1);
    assert!(report.is_delivered(&id));
    assert!(scenario.world().total_bytes_transferred() >= 2000);
}

#[test]
fn test_adaptive_delivers_to_connected_destination() {
    let config = scripted_config(
        "adaptive",
        r#"{ time = 1, type = "ConnectionUp", a = 0, b = 1 },
            { time = 2, type = "CreateMessage", id = "m1", from = 0, to = 1, size = 1000 },"#,
    );
    let scenario = run_scenario(config, None).unwrap();
    assert!(scenario.report().is_delivered(&MessageId::new("m1")));
    assert_eq!(scenario.report().summary().delivered, 1);
}

#[test]
fn test_unknown_host_in_script_is_fatal() {
    let config = scripted_config(
        "prophet",
        r#"{ time = 1, type = "ConnectionUp", a = 0, b = 7 },"#,
    );
    assert!(run_scenario(config, None).is_err());
}

struct CancelAfter {
    ticks: u64,
    seen: u64,
    token: CancelToken,
}

impl UpdateListener for CancelAfter {
    fn updated(&mut self, _now: f64, _hosts: &[Option<Host>]) {
        self.seen += 1;
        if self.seen == self.ticks {
            self.token.cancel();
        }
    }
}

#[test]
fn test_cancellation_stops_the_run() {
    let mut scenario = Scenario::build(demo_config("prophet", 5, 1000.0)).unwrap();
    let token = scenario.cancel_token();
    scenario.world_mut().add_listener(Box::new(CancelAfter {
        ticks: 3,
        seen: 0,
        token,
    }));
    assert_eq!(scenario.run(None).unwrap(), 3);
    assert_eq!(scenario.world().now(), 3.0);
}

#[test]
fn test_cancel_before_start_runs_nothing() {
    let mut scenario = Scenario::build(demo_config("adaptive", 5, 1000.0)).unwrap();
    scenario.cancel_token().cancel();
    assert_eq!(scenario.run(None).unwrap(), 0);
}

type UpdateLog = Rc<RefCell<Vec<(HostAddress, f64)>>>;

/// Records every update and optionally cancels the run from inside it
struct Recording {
    inner: Box<dyn Router>,
    log: UpdateLog,
    cancel: Rc<RefCell<Option<CancelToken>>>,
}

impl Router for Recording {
    fn address(&self) -> HostAddress {
        self.inner.address()
    }

    fn protocol(&self) -> ProtocolTag {
        self.inner.protocol()
    }

    fn base(&self) -> &RouterBase {
        self.inner.base()
    }

    fn create_message(&mut self, message: Message, ctx: &mut RouterContext<'_>) -> bool {
        self.inner.create_message(message, ctx)
    }

    fn check_receive(&self, message: &Message) -> ReceiveVerdict {
        self.inner.check_receive(message)
    }

    fn message_transferred(
        &mut self,
        message: Message,
        sender: &PeerSnapshot,
        ctx: &mut RouterContext<'_>,
    ) -> TransferOutcome {
        self.inner.message_transferred(message, sender, ctx)
    }

    fn transfer_done(
        &mut self,
        id: &MessageId,
        to: HostAddress,
        status: TransferStatus,
        ctx: &mut RouterContext<'_>,
    ) {
        self.inner.transfer_done(id, to, status, ctx);
    }

    fn link_up(&mut self, peer: &PeerSnapshot, ctx: &mut RouterContext<'_>) {
        self.inner.link_up(peer, ctx);
    }

    fn link_down(&mut self, peer: HostAddress, ctx: &mut RouterContext<'_>) {
        self.inner.link_down(peer, ctx);
    }

    fn update(&mut self, peers: &[PeerSnapshot], ctx: &mut RouterContext<'_>) -> Vec<TransferOffer> {
        self.log.borrow_mut().push((self.address(), ctx.now));
        if let Some(token) = self.cancel.borrow().as_ref() {
            token.cancel();
        }
        self.inner.update(peers, ctx)
    }

    fn snapshot(&mut self, now: f64, scope: SnapshotScope) -> PeerSnapshot {
        self.inner.snapshot(now, scope)
    }

    fn apply_command(&mut self, command: PeerCommand, ctx: &mut RouterContext<'_>) {
        self.inner.apply_command(command, ctx);
    }
}

/// Four isolated hosts updated in address order; host 1 cancels the run
fn cancelling_world() -> (World, UpdateLog) {
    let log = UpdateLog::default();
    let slot = Rc::new(RefCell::new(None));
    let kind = RouterKind::Prophet(ProphetConfig::default());
    let hosts = HostAddress::range(4)
        .into_iter()
        .map(|address| {
            let cancel = if address == HostAddress(1) {
                Rc::clone(&slot)
            } else {
                Rc::new(RefCell::new(None))
            };
            Host::new(
                address,
                Box::new(Stationary::new(Coord::new(f64::from(address.0) * 1000.0, 0.0))),
                Box::new(Recording {
                    inner: kind.build(address, 1_000_000, 0.0),
                    log: Rc::clone(&log),
                    cancel,
                }),
            )
        })
        .collect();
    let config = WorldConfig {
        randomize_update_order: false,
        simulate_connections: false,
        ..WorldConfig::default()
    };
    let world = World::new(config, hosts).unwrap();
    *slot.borrow_mut() = Some(world.cancel_token());
    (world, log)
}

#[test]
fn test_cancel_inside_pass_skips_remaining_hosts() {
    let (mut world, log) = cancelling_world();
    let mut report = SimReport::new();
    world.update(&mut report).unwrap();

    assert_eq!(
        *log.borrow(),
        vec![(HostAddress(0), 1.0), (HostAddress(1), 1.0)]
    );
    assert_eq!(world.now(), 1.0);

    // Nothing runs after cancellation, earlier updates are kept
    assert_eq!(world.run_until(10.0, None, &mut report).unwrap(), 0);
    assert_eq!(log.borrow().len(), 2);
    assert_eq!(world.now(), 1.0);
}

#[test]
fn test_cancel_during_event_pass_keeps_event_time() {
    let (mut world, log) = cancelling_world();
    world.schedule_update(0.5);
    world.update(&mut SimReport::new()).unwrap();

    assert_eq!(
        *log.borrow(),
        vec![(HostAddress(0), 0.5), (HostAddress(1), 0.5)]
    );
    assert_eq!(world.now(), 0.5);
}

#[test]
fn test_reports_persist_after_adaptive_run() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = run_scenario(demo_config("adaptive", 6, 1000.0), None).unwrap();
    let files = scenario.report().persist(dir.path()).unwrap();

    assert!(dir.path().join("copy_summary.txt").exists());
    assert!(dir.path().join("copy_action_log.tsv").exists());
    assert!(dir.path().join("run_summary.json").exists());
    for host in 0..6 {
        assert!(dir.path().join(format!("qtable_node_{host}.csv")).exists());
    }
    assert!(files.len() >= 9);
}

/// Stays put for `after` steps, then jumps to `to`
struct Jump {
    at: Coord,
    to: Coord,
    after: u32,
    steps: u32,
}

impl MobilityProvider for Jump {
    fn advance(&mut self, _dt: f64) {
        self.steps += 1;
        if self.steps >= self.after {
            self.at = self.to;
        }
    }

    fn location(&self) -> Coord {
        self.at
    }
}

#[test]
fn test_range_loss_aborts_and_credits_sent_prefix() {
    let kind = RouterKind::Prophet(ProphetConfig::default());
    let hosts = vec![
        Host::new(
            HostAddress(0),
            Box::new(Stationary::new(Coord::new(0.0, 0.0))),
            kind.build(HostAddress(0), 1_000_000, 0.0),
        ),
        Host::new(
            HostAddress(1),
            Box::new(Jump {
                at: Coord::new(5.0, 0.0),
                to: Coord::new(500.0, 0.0),
                after: 2,
                steps: 0,
            }),
            kind.build(HostAddress(1), 1_000_000, 0.0),
        ),
    ];
    let config = WorldConfig {
        randomize_update_order: false,
        transmit_speed: 100.0,
        ..WorldConfig::default()
    };
    let mut world = World::new(config, hosts).unwrap();
    world.add_source(Box::new(EventQueue::new(vec![TimedEvent::new(
        0.5,
        SimEvent::CreateMessage {
            id: MessageId::new("m1"),
            from: HostAddress(0),
            to: HostAddress(1),
            size: 1000,
        },
    )])));

    let mut report = SimReport::new();
    world.update(&mut report).unwrap();
    assert!(world.is_transferring(HostAddress(0)));

    world.update(&mut report).unwrap();
    world.update(&mut report).unwrap();
    assert_eq!(world.link_count(), 0);
    assert!(!world.is_transferring(HostAddress(0)));
    // 1.5 time units at 100 bytes each before the contact broke
    assert_eq!(world.total_bytes_transferred(), 150);
    assert!(!report.is_delivered(&MessageId::new("m1")));
}
