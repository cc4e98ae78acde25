use std::fmt;

use tracing::info;

use crate::{
    data::rollout::{collect_rollout, Rollout},
    environment::Environment,
    module::policy::Policy,
    rng::RngState,
    Result,
};

/// Summary of per-agent episode returns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RolloutStatistics {
    pub min: f32,
    pub mean: f32,
    pub std: f32,
    pub max: f32,
}

impl RolloutStatistics {
    pub fn from_returns(returns: &[f32]) -> Option<Self> {
        if returns.is_empty() {
            return None;
        }
        let n = returns.len() as f32;
        let mean = returns.iter().sum::<f32>() / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f32>() / n;
        Some(Self {
            min: returns.iter().cloned().fold(f32::INFINITY, f32::min),
            mean,
            std: variance.sqrt(),
            max: returns.iter().cloned().fold(f32::NEG_INFINITY, f32::max),
        })
    }

    pub fn from_rollout(rollout: &Rollout) -> Option<Self> {
        Self::from_returns(&rollout.episode_returns())
    }
}

impl fmt::Display for RolloutStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "min {:.2} | mean {:.2} ± {:.2} | max {:.2}",
            self.min, self.mean, self.std, self.max
        )
    }
}

/// Log the return statistics of one finished episode.
pub fn log_rollout(episode: usize, rollout: &Rollout) -> Option<RolloutStatistics> {
    let statistics = RolloutStatistics::from_rollout(rollout)?;
    info!(
        episode,
        steps = rollout.len(),
        min = statistics.min,
        mean = statistics.mean,
        std = statistics.std,
        max = statistics.max,
        "episode returns {statistics}"
    );
    Some(statistics)
}

/// Play one episode without learning and return each agent's total reward.
pub fn evaluate_episode<E, P>(env: &mut E, policy: &P, episode_length: usize, rng: &mut RngState) -> Result<Vec<f32>>
where
    E: Environment + ?Sized,
    P: Policy + ?Sized,
{
    Ok(collect_rollout(env, policy, episode_length, rng, || false)?
        .map(|rollout| rollout.episode_returns())
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use expect_test::expect;

    use super::*;
    use crate::{
        environment::{gym_rs::GymEnvironment, Space},
        module::policy::UniformPolicy,
    };

    #[test]
    fn test_statistics() {
        let statistics = RolloutStatistics::from_returns(&[1.0, 3.0, 5.0, 7.0]).unwrap();
        assert_eq!(statistics.mean, 4.0);
        assert_eq!(statistics.min, 1.0);
        assert_eq!(statistics.max, 7.0);
        assert!((statistics.std - 5.0f32.sqrt()).abs() < 1e-6);
        expect!["min 1.00 | mean 4.00 ± 2.24 | max 7.00"].assert_eq(&statistics.to_string());
        assert_eq!(RolloutStatistics::from_returns(&[]), None);
    }

    #[test]
    fn test_evaluate_cartpole_episode() {
        let mut env = GymEnvironment::cartpole(0);
        let policy = UniformPolicy {
            action_space: Space::Discrete { n: 2 },
        };
        let mut rng = RngState::seed_from_u64(0);
        let returns = evaluate_episode(&mut env, &policy, 500, &mut rng).unwrap();
        assert_eq!(returns.len(), 1);
        assert!(returns[0] >= 1.0);
    }
}
