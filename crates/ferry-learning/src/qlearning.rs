//! Tabular Q-learning
//!
//! Key concepts:
//! - **Q-table**: one value per `(ContextState, Action)`, created lazily on
//!   the first update of a pair and never removed
//! - **Exploration**: with probability epsilon, or for a state never seen
//!   before, a uniformly random action is chosen
//! - **Decay**: every `decay_interval` units of virtual time all values are
//!   multiplied by `decay_rate`, pulling stale knowledge toward zero
//! - **Merge**: two tables combine by element-wise maximum, which is
//!   idempotent and commutative

use std::collections::BTreeMap;
use std::fmt;

use ferry_core::{ConfigError, ConfigResult, Settings};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::context::ContextState;

/// Replication decision taken for a context
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Action {
    Forward,
    Drop,
    Store,
}

impl Action {
    /// Every action, in selection order
    pub const ALL: [Action; 3] = [Action::Forward, Action::Drop, Action::Store];

    pub fn name(&self) -> &'static str {
        match self {
            Action::Forward => "FORWARD",
            Action::Drop => "DROP",
            Action::Store => "STORE",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Q-values of one state, by action
pub type ActionValues = BTreeMap<Action, f64>;

/// A full Q-table
pub type QTable = BTreeMap<ContextState, ActionValues>;

/// Merge `other` into `target`, keeping the larger value per entry
pub fn merge_max(target: &mut QTable, other: &QTable) {
    for (state, row) in other {
        let target_row = target.entry(*state).or_default();
        for (action, value) in row {
            match target_row.get(action) {
                Some(current) if *current >= *value => {}
                _ => {
                    target_row.insert(*action, *value);
                }
            }
        }
    }
}

/// Hyperparameters of the agent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QLearningConfig {
    /// Learning rate (alpha)
    pub learning_rate: f64,
    /// Discount factor (gamma)
    pub discount: f64,
    /// Exploration probability (epsilon)
    pub exploration: f64,
    /// Multiplier applied to every value on decay
    pub decay_rate: f64,
    /// Virtual time between decays
    pub decay_interval: f64,
    /// Updated values below this floor are stored as zero
    pub floor: f64,
}

impl Default for QLearningConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            discount: 0.9,
            exploration: 0.2,
            decay_rate: 0.99,
            decay_interval: 1000.0,
            floor: 0.001,
        }
    }
}

impl QLearningConfig {
    /// Greedy configuration with no exploration
    pub fn greedy() -> Self {
        Self {
            exploration: 0.0,
            ..Default::default()
        }
    }

    /// Read hyperparameters from the `RL` namespace
    pub fn from_settings(settings: &Settings) -> ConfigResult<Self> {
        let defaults = Self::default();
        let config = Self {
            learning_rate: settings.f64_or("alpha", defaults.learning_rate)?,
            discount: settings.f64_or("gamma", defaults.discount)?,
            exploration: settings.f64_or("epsilon", defaults.exploration)?,
            decay_rate: settings.f64_or("decayRate", defaults.decay_rate)?,
            decay_interval: settings.f64_or("decayInterval", defaults.decay_interval)?,
            floor: defaults.floor,
        };
        config.validate(settings)?;
        Ok(config)
    }

    fn validate(&self, settings: &Settings) -> ConfigResult<()> {
        let unit = [
            ("alpha", self.learning_rate),
            ("gamma", self.discount),
            ("epsilon", self.exploration),
            ("decayRate", self.decay_rate),
        ];
        for (key, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::invalid(
                    settings.full_key(key),
                    format!("{value} is outside [0, 1]"),
                ));
            }
        }
        if self.decay_interval <= 0.0 {
            return Err(ConfigError::invalid(
                settings.full_key("decayInterval"),
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Tabular Q-learning agent owned by one router
#[derive(Debug, Clone)]
pub struct QLearningAgent {
    config: QLearningConfig,
    actions: Vec<Action>,
    table: QTable,
    rng: StdRng,
    last_decay: f64,
    updates: u64,
}

impl QLearningAgent {
    /// Create an agent over [`Action::ALL`] with a seeded exploration stream
    pub fn new(config: QLearningConfig, seed: u64) -> Self {
        Self::with_actions(config, Action::ALL.to_vec(), seed)
    }

    pub fn with_actions(config: QLearningConfig, actions: Vec<Action>, seed: u64) -> Self {
        Self {
            config,
            actions,
            table: QTable::new(),
            rng: StdRng::seed_from_u64(seed),
            last_decay: 0.0,
            updates: 0,
        }
    }

    pub fn config(&self) -> &QLearningConfig {
        &self.config
    }

    pub fn table(&self) -> &QTable {
        &self.table
    }

    /// Number of updates applied so far
    pub fn update_count(&self) -> u64 {
        self.updates
    }

    pub fn knows(&self, state: &ContextState) -> bool {
        self.table.contains_key(state)
    }

    /// Recorded value of a pair, 0 when absent
    pub fn q_value(&self, state: &ContextState, action: Action) -> f64 {
        self.table
            .get(state)
            .and_then(|row| row.get(&action))
            .copied()
            .unwrap_or(0.0)
    }

    /// Largest recorded value of a state, 0 when unseen or empty
    pub fn max_value(&self, state: &ContextState) -> f64 {
        self.table
            .get(state)
            .and_then(|row| row.values().copied().reduce(f64::max))
            .unwrap_or(0.0)
    }

    /// Pick an action for `state`
    pub fn choose_action(&mut self, state: &ContextState) -> Action {
        let row = match self.table.get(state) {
            Some(row) if !row.is_empty() => row,
            _ => return self.random_action(),
        };
        if self.rng.random::<f64>() < self.config.exploration {
            return self.random_action();
        }

        let mut best = None;
        let mut best_value = f64::NEG_INFINITY;
        for (action, value) in row {
            if *value > best_value {
                best_value = *value;
                best = Some(*action);
            }
        }
        match best {
            Some(action) => action,
            None => self.random_action(),
        }
    }

    fn random_action(&mut self) -> Action {
        if self.actions.is_empty() {
            return Action::Store;
        }
        let idx = self.rng.random_range(0..self.actions.len());
        self.actions[idx]
    }

    /// Apply one Q-learning step and run a decay if one is due at `now`
    pub fn update(
        &mut self,
        state: ContextState,
        action: Action,
        reward: f64,
        next_state: &ContextState,
        now: f64,
    ) {
        let current = self.q_value(&state, action);
        let max_next = self.max_value(next_state);
        let mut value = current
            + self.config.learning_rate * (reward + self.config.discount * max_next - current);
        if value < self.config.floor {
            value = 0.0;
        }
        self.table.entry(state).or_default().insert(action, value);
        self.updates += 1;
        trace!(%state, %action, reward, value, "Q update");

        if now - self.last_decay >= self.config.decay_interval {
            self.decay_all();
            self.last_decay = now;
        }
    }

    /// Multiply every recorded value by the decay rate
    pub fn decay_all(&mut self) {
        let rate = self.config.decay_rate;
        for row in self.table.values_mut() {
            for value in row.values_mut() {
                *value *= rate;
            }
        }
    }

    /// Element-wise maximum merge with another table
    pub fn sync_with(&mut self, other: &QTable) {
        merge_max(&mut self.table, other);
    }
}
