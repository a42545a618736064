//! Scenario files
//!
//! A scenario is a TOML document read through [`Settings`]. The `Scenario`
//! namespace picks the router, the population and the run length; the
//! other namespaces configure the world, the routers and the event sources.

use std::path::Path;

use ferry_core::{ConfigError, Coord, HostAddress, MobilityProvider, Settings};
use ferry_dtn::{ADAPTIVE_ROUTER, RouterKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::error::SimResult;
use crate::events::{EventQueue, GeneratorConfig, MessageGenerator, TimedEvent};
use crate::host::Host;
use crate::mobility::{MovementConfig, RandomWalk, Stationary};
use crate::reports::SimReport;
use crate::world::{CancelToken, TickLogger, World, WorldConfig};

/// Built-in scenario used by `ferry demo`
pub const DEFAULT_SCENARIO: &str = r#"
[Scenario]
name = "random-walk-demo"
router = "AdaptiveRLRouter"
hosts = 20
endTime = 2000
updateInterval = 1.0
warmup = 100
bufferSize = 5000000
seed = 1
worldSize = [300, 300]
simulateConnections = true

[Interface]
transmitRange = 30
transmitSpeed = 250000

[Optimization]
randomizeUpdateOrder = true
cellSizeMult = 5

[ProphetRouter]
secondsInTimeUnit = 30

[RL]
maxCopies = 10

[QTableReport]
enable = true
interval = 1000

[MovementModel]
model = "RandomWalk"
minSpeed = 0.5
maxSpeed = 1.5

[Events]
interval = 25
minSize = 50000
maxSize = 100000
prefix = "M"
"#;

/// How hosts move
#[derive(Debug, Clone, PartialEq)]
pub enum MobilityKind {
    RandomWalk,
    /// Fixed positions; hosts without one get a seeded random spot
    Stationary(Vec<Coord>),
}

/// Everything needed to build and run one world
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub name: String,
    pub router: RouterKind,
    pub hosts: usize,
    pub end_time: f64,
    pub warmup: f64,
    /// Buffer capacity of every host in bytes
    pub buffer_size: u64,
    pub seed: u64,
    pub world: WorldConfig,
    pub mobility: MobilityKind,
    pub movement: MovementConfig,
    pub generator: GeneratorConfig,
    pub script: Vec<TimedEvent>,
    /// Ticks between two progress lines, 0 disables them
    pub progress_every: u64,
}

impl ScenarioConfig {
    pub fn from_settings(settings: &Settings) -> SimResult<Self> {
        let scenario = settings.namespace("Scenario");
        let router_name = scenario.str_or("router", ADAPTIVE_ROUTER)?;
        let router = RouterKind::from_settings(settings, &router_name)?;

        let hosts = scenario.u64_or("hosts", 10)?;
        if hosts == 0 {
            return Err(ConfigError::invalid(scenario.full_key("hosts"), "need at least one host").into());
        }
        let end_time = scenario.f64_or("endTime", 3600.0)?;
        if end_time <= 0.0 {
            return Err(ConfigError::invalid(scenario.full_key("endTime"), "must be positive").into());
        }
        let warmup = scenario.f64_or("warmup", 0.0)?;
        if warmup < 0.0 {
            return Err(ConfigError::invalid(scenario.full_key("warmup"), "must not be negative").into());
        }
        let world_size = if scenario.contains("worldSize") {
            let [width, height]: [f64; 2] = scenario.deserialize("worldSize")?;
            (width, height)
        } else {
            (1000.0, 1000.0)
        };

        let movement_settings = settings.namespace("MovementModel");
        let mobility = match movement_settings.str_or("model", "RandomWalk")?.as_str() {
            "RandomWalk" => MobilityKind::RandomWalk,
            "Stationary" => {
                let positions: Vec<[f64; 2]> = if movement_settings.contains("positions") {
                    movement_settings.deserialize("positions")?
                } else {
                    Vec::new()
                };
                MobilityKind::Stationary(positions.into_iter().map(|[x, y]| Coord::new(x, y)).collect())
            }
            other => {
                return Err(ConfigError::invalid(
                    movement_settings.full_key("model"),
                    format!("unknown movement model {other:?}"),
                )
                .into());
            }
        };

        Ok(Self {
            name: scenario.str_or("name", "scenario")?,
            router,
            hosts: hosts as usize,
            end_time,
            warmup,
            buffer_size: scenario.u64_or("bufferSize", 5_000_000)?,
            seed: scenario.u64_or("seed", 1)?,
            world: WorldConfig::from_settings(settings)?,
            mobility,
            movement: MovementConfig::from_settings(settings, world_size)?,
            generator: GeneratorConfig::from_settings(settings)?,
            script: EventQueue::from_settings(settings)?.into_events(),
            progress_every: scenario.u64_or("progressEvery", 500)?,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> SimResult<Self> {
        Self::from_settings(&Settings::load(path)?)
    }

    fn mobility_for(&self, address: HostAddress) -> Box<dyn MobilityProvider> {
        let seed = self.seed.wrapping_mul(1_000_003).wrapping_add(address.seed());
        match &self.mobility {
            MobilityKind::RandomWalk => Box::new(RandomWalk::new(self.movement, seed)),
            MobilityKind::Stationary(positions) => {
                let location = positions.get(address.index()).copied().unwrap_or_else(|| {
                    let mut rng = StdRng::seed_from_u64(seed);
                    let (width, height) = self.movement.bounds;
                    Coord::new(rng.random::<f64>() * width, rng.random::<f64>() * height)
                });
                Box::new(Stationary::new(location))
            }
        }
    }
}

/// Create the world described by `config`, without running it
pub fn build_world(config: &ScenarioConfig) -> SimResult<World> {
    let hosts = HostAddress::range(config.hosts)
        .into_iter()
        .map(|address| {
            Host::new(
                address,
                config.mobility_for(address),
                config.router.build(address, config.buffer_size, 0.0),
            )
        })
        .collect();
    let mut world = World::new(config.world, hosts)?;
    world.add_source(Box::new(EventQueue::new(config.script.clone())));
    world.add_source(Box::new(MessageGenerator::new(
        config.generator.clone(),
        config.hosts,
        config.end_time,
        config.seed,
    )));
    world.add_listener(Box::new(TickLogger::new(config.progress_every)));
    Ok(world)
}

/// A built world together with the report it writes into
pub struct Scenario {
    config: ScenarioConfig,
    world: World,
    report: SimReport,
    ticks: u64,
}

impl Scenario {
    pub fn build(config: ScenarioConfig) -> SimResult<Self> {
        let world = build_world(&config)?;
        Ok(Self {
            config,
            world,
            report: SimReport::new(),
            ticks: 0,
        })
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.world.cancel_token()
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn report(&self) -> &SimReport {
        &self.report
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Warm up, tick until the end time (or `max_ticks`), then finish
    pub fn run(&mut self, max_ticks: Option<u64>) -> SimResult<u64> {
        info!(
            scenario = %self.config.name,
            router = ?self.config.router.protocol(),
            hosts = self.config.hosts,
            end_time = self.config.end_time,
            "Scenario started"
        );
        self.world.warmup(self.config.warmup);
        let remaining = max_ticks.map(|limit| limit.saturating_sub(self.ticks));
        self.ticks += self
            .world
            .run_until(self.config.end_time, remaining, &mut self.report)?;
        self.world.finish(&mut self.report)?;
        let summary = self.report.summary();
        info!(
            ticks = self.ticks,
            created = summary.created,
            delivered = summary.delivered,
            copies = summary.copies,
            "Scenario finished"
        );
        Ok(self.ticks)
    }

    pub fn into_report(self) -> SimReport {
        self.report
    }
}

/// Build and run a scenario in one go
pub fn run_scenario(config: ScenarioConfig, max_ticks: Option<u64>) -> SimResult<Scenario> {
    let mut scenario = Scenario::build(config)?;
    scenario.run(max_ticks)?;
    Ok(scenario)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_dtn::ProtocolTag;

    #[test]
    fn test_default_scenario_parses() {
        let settings = Settings::from_toml_str(DEFAULT_SCENARIO).unwrap();
        let config = ScenarioConfig::from_settings(&settings).unwrap();
        assert_eq!(config.hosts, 20);
        assert_eq!(config.router.protocol(), ProtocolTag::Adaptive);
        assert_eq!(config.movement.bounds, (300.0, 300.0));
        assert_eq!(config.mobility, MobilityKind::RandomWalk);
        assert!(config.script.is_empty());
    }

    #[test]
    fn test_router_override() {
        let mut settings = Settings::from_toml_str(DEFAULT_SCENARIO).unwrap();
        settings.set("Scenario.router", "prophet").unwrap();
        let config = ScenarioConfig::from_settings(&settings).unwrap();
        assert_eq!(config.router.protocol(), ProtocolTag::Predictability);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut settings = Settings::from_toml_str(DEFAULT_SCENARIO).unwrap();
        settings.set("Scenario.hosts", 0).unwrap();
        assert!(ScenarioConfig::from_settings(&settings).is_err());

        let mut settings = Settings::from_toml_str(DEFAULT_SCENARIO).unwrap();
        settings.set("MovementModel.model", "Teleport").unwrap();
        assert!(ScenarioConfig::from_settings(&settings).is_err());

        let mut settings = Settings::from_toml_str(DEFAULT_SCENARIO).unwrap();
        settings.set("Optimization.cellSizeMult", 1.0).unwrap();
        let config = ScenarioConfig::from_settings(&settings).unwrap();
        assert!(build_world(&config).is_err());
    }

    #[test]
    fn test_stationary_positions() {
        let settings = Settings::from_toml_str(
            "[Scenario]\nrouter = \"prophet\"\nhosts = 3\n[ProphetRouter]\nsecondsInTimeUnit = 30\n[MovementModel]\nmodel = \"Stationary\"\npositions = [[1, 2], [3, 4]]\n",
        )
        .unwrap();
        let config = ScenarioConfig::from_settings(&settings).unwrap();
        let world = build_world(&config).unwrap();
        let host = world.host_by_address(HostAddress(1)).unwrap();
        assert_eq!(host.location(), Coord::new(3.0, 4.0));
        // no position given for host 2
        let spot = world.host_by_address(HostAddress(2)).unwrap().location();
        assert!((0.0..=1000.0).contains(&spot.x));
    }

    #[test]
    fn test_tick_limit() {
        let mut settings = Settings::from_toml_str(DEFAULT_SCENARIO).unwrap();
        settings.set("Scenario.hosts", 4).unwrap();
        settings.set("Scenario.warmup", 0).unwrap();
        let scenario = run_scenario(ScenarioConfig::from_settings(&settings).unwrap(), Some(5)).unwrap();
        assert_eq!(scenario.ticks(), 5);
        assert_eq!(scenario.world().now(), 5.0);
    }
}
