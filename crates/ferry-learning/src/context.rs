//! Routing context used as the Q-learning state key
//!
//! Every real-valued component is rounded to two decimals on construction
//! and stored as integer hundredths, so two contexts that print the same
//! also compare, order and hash the same. This keeps the Q-table from
//! fragmenting into near-duplicate float keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Round a unit-interval value to integer hundredths
///
/// Values outside `[0, 1]` are clamped; NaN maps to 0.
fn hundredths(value: f64) -> u16 {
    if value.is_nan() {
        return 0;
    }
    (value.clamp(0.0, 1.0) * 100.0).round() as u16
}

/// Snapshot of a host's situation at one routing decision
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ContextState {
    battery: u16,
    buffer: u16,
    popularity: u32,
    tie_strength: u16,
    density: u16,
}

impl ContextState {
    /// Build a state, rounding every fraction to two decimals
    pub fn new(battery: f64, buffer: f64, popularity: u32, tie_strength: f64, density: f64) -> Self {
        Self {
            battery: hundredths(battery),
            buffer: hundredths(buffer),
            popularity,
            tie_strength: hundredths(tie_strength),
            density: hundredths(density),
        }
    }

    /// Remaining battery fraction
    pub fn battery(&self) -> f64 {
        f64::from(self.battery) / 100.0
    }

    /// Buffer occupancy fraction
    pub fn buffer(&self) -> f64 {
        f64::from(self.buffer) / 100.0
    }

    /// Number of distinct neighbours met so far
    pub fn popularity(&self) -> u32 {
        self.popularity
    }

    pub fn tie_strength(&self) -> f64 {
        f64::from(self.tie_strength) / 100.0
    }

    /// Share of the population currently within range
    pub fn density(&self) -> f64 {
        f64::from(self.density) / 100.0
    }

    /// Comma separated components, in the column order of Q-table dumps
    pub fn to_csv(&self) -> String {
        format!(
            "{:.2},{:.2},{},{:.2},{:.2}",
            self.battery(),
            self.buffer(),
            self.popularity,
            self.tie_strength(),
            self.density()
        )
    }
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Context[batt={:.2}, buf={:.2}, pop={}, tie={:.2}, dens={:.2}]",
            self.battery(),
            self.buffer(),
            self.popularity,
            self.tie_strength(),
            self.density()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_rounding_merges_nearby_values() {
        let a = ContextState::new(0.504, 0.2, 3, 0.111, 0.5);
        let b = ContextState::new(0.496, 0.2, 3, 0.109, 0.5);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_distinct_after_rounding() {
        let a = ContextState::new(0.50, 0.2, 3, 0.1, 0.5);
        let b = ContextState::new(0.51, 0.2, 3, 0.1, 0.5);
        assert_ne!(a, b);
    }

    #[test]
    fn test_components_clamped() {
        let s = ContextState::new(1.7, -0.3, 0, f64::NAN, 0.25);
        assert_eq!(s.battery(), 1.0);
        assert_eq!(s.buffer(), 0.0);
        assert_eq!(s.tie_strength(), 0.0);
        assert_eq!(s.density(), 0.25);
    }

    #[test]
    fn test_csv_and_display() {
        let s = ContextState::new(0.8, 0.1, 4, 0.05, 0.33);
        assert_eq!(s.to_csv(), "0.80,0.10,4,0.05,0.33");
        assert_eq!(
            s.to_string(),
            "Context[batt=0.80, buf=0.10, pop=4, tie=0.05, dens=0.33]"
        );
    }
}
