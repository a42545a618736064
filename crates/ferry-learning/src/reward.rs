//! Scalar rewards fed to the Q-learning agent

/// Delay (in virtual time units) under which a delivery earns the full reward
pub const DELAY_THRESHOLD: f64 = 600.0;

/// Reward shaping for delivery outcomes
pub struct RewardFunction;

impl RewardFunction {
    /// 1.0 for a delivery, 0.0 otherwise
    pub fn binary(delivered: bool) -> f64 {
        if delivered { 1.0 } else { 0.0 }
    }

    /// 1.0 for a timely delivery, 0.5 for a late one, 0.0 for none
    pub fn graded(delivered: bool, delay: f64) -> f64 {
        if !delivered {
            0.0
        } else if delay < DELAY_THRESHOLD {
            1.0
        } else {
            0.5
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary() {
        assert_eq!(RewardFunction::binary(true), 1.0);
        assert_eq!(RewardFunction::binary(false), 0.0);
    }

    #[test]
    fn test_graded() {
        assert_eq!(RewardFunction::graded(true, 10.0), 1.0);
        assert_eq!(RewardFunction::graded(true, 599.9), 1.0);
        assert_eq!(RewardFunction::graded(true, 600.0), 0.5);
        assert_eq!(RewardFunction::graded(true, 5000.0), 0.5);
        assert_eq!(RewardFunction::graded(false, 10.0), 0.0);
    }
}
