//! # Ferry Learning
//!
//! Learning primitives behind the adaptive replication router.
//!
//! - [`ContextState`]: rounded, hashable routing context used as the state key
//! - [`UtilityScorer`]: TOPP utility of a host as a message carrier
//! - [`RewardFunction`]: binary and delay-graded delivery rewards
//! - [`QLearningAgent`]: tabular Q-learning with decay and max-merge

pub mod context;
pub mod qlearning;
pub mod reward;
pub mod utility;

pub use context::ContextState;
pub use qlearning::{Action, ActionValues, QLearningAgent, QLearningConfig, QTable, merge_max};
pub use reward::{DELAY_THRESHOLD, RewardFunction};
pub use utility::{UtilityScorer, UtilityWeights, normalize};
