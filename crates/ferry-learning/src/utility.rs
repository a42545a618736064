//! TOPP forwarding utility
//!
//! The utility of a host as a carrier blends two halves:
//!
//! - **ability**: how much energy and buffer room it has left
//! - **social**: how well connected it is (popularity, tie strength)
//!
//! and mixes the weighted result with the local node density:
//!
//! ```text
//! weighted = wA * (0.5 * battery + 0.5 * (1 - buffer))
//!          + wS * (0.5 * norm(popularity) + 0.5 * tie)
//! topp     = 0.8 * weighted + 0.2 * norm(density)
//! ```

use ferry_core::{ConfigResult, Settings};
use serde::{Deserialize, Serialize};

use crate::context::ContextState;

/// Share of the final score taken by the weighted ability/social part
const WEIGHTED_SHARE: f64 = 0.8;
/// Share of the final score taken by local density
const DENSITY_SHARE: f64 = 0.2;

/// Scale a raw count into `[0, 1]`
pub fn normalize(value: f64) -> f64 {
    (value / 10.0).clamp(0.0, 1.0)
}

/// Weights of the ability and social halves
///
/// The weights need not sum to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UtilityWeights {
    pub ability: f64,
    pub social: f64,
}

impl Default for UtilityWeights {
    fn default() -> Self {
        Self {
            ability: 0.5,
            social: 0.5,
        }
    }
}

impl UtilityWeights {
    /// Read `abilityWeight` / `socialWeight` from the `Utility` namespace
    pub fn from_settings(settings: &Settings) -> ConfigResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            ability: settings.f64_or("abilityWeight", defaults.ability)?,
            social: settings.f64_or("socialWeight", defaults.social)?,
        })
    }
}

/// Computes the TOPP utility score
#[derive(Debug, Clone, Copy, Default)]
pub struct UtilityScorer {
    weights: UtilityWeights,
}

impl UtilityScorer {
    pub fn new(weights: UtilityWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> UtilityWeights {
        self.weights
    }

    pub fn topp(
        &self,
        battery: f64,
        buffer: f64,
        popularity: u32,
        tie_strength: f64,
        density: f64,
    ) -> f64 {
        let ability = 0.5 * battery + 0.5 * (1.0 - buffer);
        let social = 0.5 * normalize(f64::from(popularity)) + 0.5 * tie_strength;
        let weighted = self.weights.ability * ability + self.weights.social * social;
        WEIGHTED_SHARE * weighted + DENSITY_SHARE * normalize(density)
    }

    /// TOPP of an already-rounded context state
    pub fn score(&self, state: &ContextState) -> f64 {
        self.topp(
            state.battery(),
            state.buffer(),
            state.popularity(),
            state.tie_strength(),
            state.density(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_normalize_clamps() {
        assert_eq!(normalize(5.0), 0.5);
        assert_eq!(normalize(25.0), 1.0);
        assert_eq!(normalize(-1.0), 0.0);
    }

    #[test]
    fn test_topp_formula() {
        let scorer = UtilityScorer::default();
        // ability = 0.5*1 + 0.5*(1-0) = 1.0 ; social = 0.5*0.5 + 0.5*0.2 = 0.35
        // weighted = 0.5*1.0 + 0.5*0.35 = 0.675 ; topp = 0.8*0.675 + 0.2*norm(0.5)
        let topp = scorer.topp(1.0, 0.0, 5, 0.2, 0.5);
        let expected = 0.8 * 0.675 + 0.2 * 0.05;
        assert!((topp - expected).abs() < EPS);
    }

    #[test]
    fn test_custom_weights_need_not_sum_to_one() {
        let scorer = UtilityScorer::new(UtilityWeights {
            ability: 1.0,
            social: 1.0,
        });
        let topp = scorer.topp(1.0, 0.0, 10, 1.0, 0.0);
        assert!((topp - 0.8 * 2.0).abs() < EPS);
    }

    #[test]
    fn test_score_matches_topp() {
        let scorer = UtilityScorer::default();
        let state = ContextState::new(0.75, 0.25, 2, 0.4, 0.1);
        let direct = scorer.topp(0.75, 0.25, 2, 0.4, 0.1);
        assert!((scorer.score(&state) - direct).abs() < EPS);
    }

    #[test]
    fn test_weights_from_settings() {
        let settings =
            Settings::from_toml_str("[Utility]\nabilityWeight = 0.7\n").unwrap();
        let weights = UtilityWeights::from_settings(&settings.namespace("Utility")).unwrap();
        assert_eq!(weights.ability, 0.7);
        assert_eq!(weights.social, 0.5);
    }
}
