//! Mobility models
//!
//! Hosts move through a rectangular world `[0, width] x [0, height]`. Every
//! model is deterministic given its seed.

use std::f64::consts::TAU;

use ferry_core::{ConfigError, Coord, MobilityProvider, Settings};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// A host that never moves
#[derive(Debug, Clone, Copy)]
pub struct Stationary {
    location: Coord,
}

impl Stationary {
    pub fn new(location: Coord) -> Self {
        Self { location }
    }
}

impl MobilityProvider for Stationary {
    fn advance(&mut self, _dt: f64) {}

    fn location(&self) -> Coord {
        self.location
    }
}

/// Speed range and world bounds for random movement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementConfig {
    pub min_speed: f64,
    pub max_speed: f64,
    /// World width and height
    pub bounds: (f64, f64),
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            min_speed: 0.5,
            max_speed: 1.5,
            bounds: (1000.0, 1000.0),
        }
    }
}

impl MovementConfig {
    /// Read `MovementModel.minSpeed` / `maxSpeed` with the given world bounds
    pub fn from_settings(settings: &Settings, bounds: (f64, f64)) -> Result<Self, ConfigError> {
        let movement = settings.namespace("MovementModel");
        let defaults = Self::default();
        let min_speed = movement.f64_or("minSpeed", defaults.min_speed)?;
        let max_speed = movement.f64_or("maxSpeed", defaults.max_speed)?;
        if min_speed < 0.0 || max_speed < min_speed {
            return Err(ConfigError::invalid(
                movement.full_key("maxSpeed"),
                format!("speed range [{min_speed}, {max_speed}] is empty or negative"),
            ));
        }
        if bounds.0 <= 0.0 || bounds.1 <= 0.0 {
            return Err(ConfigError::invalid(
                "Scenario.worldSize",
                "world size must be positive",
            ));
        }
        Ok(Self {
            min_speed,
            max_speed,
            bounds,
        })
    }
}

/// Seeded random walk that reflects off the world borders
///
/// Each call to [`advance`](MobilityProvider::advance) draws a fresh heading
/// and speed, then moves `speed * dt` along it.
#[derive(Debug, Clone)]
pub struct RandomWalk {
    location: Coord,
    config: MovementConfig,
    rng: StdRng,
}

impl RandomWalk {
    /// Start at a random location drawn from the same seed
    pub fn new(config: MovementConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let location = Coord::new(
            rng.random::<f64>() * config.bounds.0,
            rng.random::<f64>() * config.bounds.1,
        );
        Self {
            location,
            config,
            rng,
        }
    }

    pub fn starting_at(location: Coord, config: MovementConfig, seed: u64) -> Self {
        Self {
            location,
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

/// Fold a coordinate back into `[0, max]`
fn reflect(value: f64, max: f64) -> f64 {
    let period = 2.0 * max;
    let folded = value.rem_euclid(period);
    if folded > max { period - folded } else { folded }
}

impl MobilityProvider for RandomWalk {
    fn advance(&mut self, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        let heading = self.rng.random::<f64>() * TAU;
        let speed = self
            .rng
            .random_range(self.config.min_speed..=self.config.max_speed);
        let step = speed * dt;
        let (width, height) = self.config.bounds;
        self.location = Coord::new(
            reflect(self.location.x + heading.cos() * step, width),
            reflect(self.location.y + heading.sin() * step, height),
        );
    }

    fn location(&self) -> Coord {
        self.location
    }
}
