use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::environment::Space;

/// With probability `epsilon` replace `action` by a uniform sample from
/// `space`.
pub fn epsilon_greedy<R: Rng + ?Sized>(epsilon: f64, action: usize, space: &Space, rng: &mut R) -> usize {
    if rng.gen_bool(epsilon.clamp(0.0, 1.0)) {
        space.sample(rng)
    } else {
        action
    }
}

/// Exponential decay from `base` towards `end`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpsilonSchedule {
    pub base: f64,
    pub end: f64,
    pub decay: f64,
}

impl Default for EpsilonSchedule {
    fn default() -> Self {
        Self {
            base: 1.0,
            end: 0.05,
            decay: std::f64::consts::LN_2 / 500.0,
        }
    }
}

impl EpsilonSchedule {
    pub fn value(&self, step: u64) -> f64 {
        self.end + (self.base - self.end) * (-self.decay * step as f64).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::RngState;

    #[test]
    fn test_epsilon_extremes() {
        let mut rng = RngState::seed_from_u64(0);
        let space = Space::Discrete { n: 4 };
        for _ in 0..50 {
            assert_eq!(epsilon_greedy(0.0, 3, &space, &mut rng), 3);
        }
        let explored = (0..200)
            .map(|_| epsilon_greedy(1.0, 3, &space, &mut rng))
            .filter(|&a| a != 3)
            .count();
        assert!(explored > 100);
    }

    #[test]
    fn test_schedule_halves_every_500_steps() {
        let schedule = EpsilonSchedule {
            base: 1.0,
            end: 0.0,
            ..Default::default()
        };
        assert_eq!(schedule.value(0), 1.0);
        assert!((schedule.value(500) - 0.5).abs() < 1e-9);
        assert!((schedule.value(1000) - 0.25).abs() < 1e-9);
        assert!(EpsilonSchedule::default().value(1_000_000) >= 0.05);
    }
}
