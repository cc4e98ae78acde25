use serde::{Deserialize, Serialize};

use crate::{
    environment::{Environment, Observation},
    module::policy::Policy,
    rng::RngState,
    Error, Result,
};

/// One episode of a single environment, batched over its agents.
///
/// Every recorded timestep carries one entry per agent in each of the five
/// arrays; the agent count is fixed by the first record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rollout {
    observations: Vec<Vec<Observation>>,
    actions: Vec<Vec<usize>>,
    rewards: Vec<Vec<f32>>,
    values: Vec<Vec<f32>>,
    dones: Vec<Vec<bool>>,
}

/// Read-only view of a rollout, indexed `[timestep][agent]`.
#[derive(Debug, Clone, Copy)]
pub struct RolloutBatch<'a> {
    pub observations: &'a [Vec<Observation>],
    pub actions: &'a [Vec<usize>],
    pub rewards: &'a [Vec<f32>],
    pub values: &'a [Vec<f32>],
    pub dones: &'a [Vec<bool>],
}

impl Rollout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(steps: usize) -> Self {
        Self {
            observations: Vec::with_capacity(steps),
            actions: Vec::with_capacity(steps),
            rewards: Vec::with_capacity(steps),
            values: Vec::with_capacity(steps),
            dones: Vec::with_capacity(steps),
        }
    }

    /// Append one timestep.
    pub fn record(
        &mut self,
        observations: Vec<Observation>,
        actions: Vec<usize>,
        rewards: Vec<f32>,
        values: Vec<f32>,
        dones: Vec<bool>,
    ) -> Result<()> {
        let expected = self.agents().unwrap_or(observations.len());
        for actual in [
            observations.len(),
            actions.len(),
            rewards.len(),
            values.len(),
            dones.len(),
        ] {
            if actual != expected {
                return Err(Error::ShapeMismatch { expected, actual });
            }
        }
        self.observations.push(observations);
        self.actions.push(actions);
        self.rewards.push(rewards);
        self.values.push(values);
        self.dones.push(dones);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Agents per timestep, once anything has been recorded.
    pub fn agents(&self) -> Option<usize> {
        self.observations.first().map(Vec::len)
    }

    pub fn as_batch(&self) -> RolloutBatch<'_> {
        RolloutBatch {
            observations: &self.observations,
            actions: &self.actions,
            rewards: &self.rewards,
            values: &self.values,
            dones: &self.dones,
        }
    }

    /// Discounted returns, `[timestep][agent]`.
    ///
    /// `return[t] = reward[t] + gamma * return[t + 1] * (1 - done[t])`, with
    /// the last timestep's return equal to its reward.
    pub fn returns(&self, gamma: f32) -> Vec<Vec<f32>> {
        let mut returns = self.rewards.clone();
        for t in (0..self.len().saturating_sub(1)).rev() {
            for agent in 0..returns[t].len() {
                let mask = if self.dones[t][agent] { 0.0 } else { 1.0 };
                returns[t][agent] += gamma * returns[t + 1][agent] * mask;
            }
        }
        returns
    }

    /// `return - value` for every timestep and agent.
    pub fn advantages(&self, returns: &[Vec<f32>]) -> Vec<Vec<f32>> {
        returns
            .iter()
            .zip(&self.values)
            .map(|(r, v)| r.iter().zip(v).map(|(r, v)| r - v).collect())
            .collect()
    }

    /// Undiscounted reward per agent, counting only steps taken while alive.
    pub fn episode_returns(&self) -> Vec<f32> {
        let mut totals = vec![0.0; self.agents().unwrap_or(0)];
        for (rewards, dones) in self.rewards.iter().zip(&self.dones) {
            for ((total, reward), done) in totals.iter_mut().zip(rewards).zip(dones) {
                if !done {
                    *total += reward;
                }
            }
        }
        totals
    }
}

/// Play one episode of `env` under `policy`.
///
/// Each record pairs an observation with the done flags that held when it
/// was taken. The episode ends when every agent is done or after
/// `episode_length` steps. `should_stop` is polled before every step;
/// `Ok(None)` means it fired and the partial episode was discarded.
pub fn collect_rollout<E, P, S>(
    env: &mut E,
    policy: &P,
    episode_length: usize,
    rng: &mut RngState,
    mut should_stop: S,
) -> Result<Option<Rollout>>
where
    E: Environment + ?Sized,
    P: Policy + ?Sized,
    S: FnMut() -> bool,
{
    let mut observations = env.reset()?;
    let mut dones = vec![false; observations.len()];
    let mut rollout = Rollout::with_capacity(episode_length);

    for _ in 0..episode_length {
        if should_stop() {
            return Ok(None);
        }
        let (actions, values) = policy.predict(&observations, rng)?;
        let step = env.step(&actions)?;
        rollout.record(observations, actions, step.rewards, values, dones)?;
        observations = step.observations;
        dones = step.dones;
        if dones.iter().all(|&done| done) {
            break;
        }
    }
    Ok(Some(rollout))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::{
        environment::{remote::tests::Counter, Info, Space, StepResult},
        module::policy::UniformPolicy,
    };

    fn single_agent(rewards: &[f32], dones: &[bool]) -> Rollout {
        let mut rollout = Rollout::new();
        for (&reward, &done) in rewards.iter().zip(dones) {
            rollout
                .record(vec![vec![0.0]], vec![0], vec![reward], vec![0.5], vec![done])
                .unwrap();
        }
        rollout
    }

    #[test]
    fn test_discounted_returns() {
        let rollout = single_agent(&[1.0, 1.0, 1.0], &[false, false, false]);
        assert_eq!(rollout.returns(0.5), vec![vec![1.75], vec![1.5], vec![1.0]]);
    }

    #[test]
    fn test_returns_stop_at_done() {
        let rollout = single_agent(&[1.0, 1.0, 1.0], &[false, true, true]);
        assert_eq!(rollout.returns(0.5), vec![vec![1.5], vec![1.0], vec![1.0]]);
    }

    #[test]
    fn test_advantages() {
        let rollout = single_agent(&[1.0, 1.0, 1.0], &[false, false, false]);
        let returns = rollout.returns(0.5);
        assert_eq!(rollout.advantages(&returns), vec![vec![1.25], vec![1.0], vec![0.5]]);
    }

    #[test]
    fn test_empty_rollout() {
        let rollout = Rollout::new();
        assert!(rollout.returns(0.9).is_empty());
        assert!(rollout.episode_returns().is_empty());
        assert_eq!(rollout.agents(), None);
    }

    #[test]
    fn test_record_rejects_ragged_timestep() {
        let mut rollout = Rollout::new();
        rollout
            .record(vec![vec![0.0]; 2], vec![0, 1], vec![0.0; 2], vec![0.0; 2], vec![false; 2])
            .unwrap();
        let result = rollout.record(vec![vec![0.0]; 2], vec![0], vec![0.0; 2], vec![0.0; 2], vec![false; 2]);
        assert!(matches!(result, Err(Error::ShapeMismatch { expected: 2, actual: 1 })));
        let result = rollout.record(vec![vec![0.0]; 3], vec![0; 3], vec![0.0; 3], vec![0.0; 3], vec![false; 3]);
        assert!(matches!(result, Err(Error::ShapeMismatch { expected: 2, actual: 3 })));
        assert_eq!(rollout.len(), 1);
    }

    #[test]
    fn test_episode_returns_ignore_dead_agents() {
        let mut rollout = Rollout::new();
        rollout
            .record(vec![vec![0.0]; 2], vec![0, 0], vec![1.0, 2.0], vec![0.0; 2], vec![false, false])
            .unwrap();
        rollout
            .record(vec![vec![0.0]; 2], vec![0, 0], vec![1.0, 5.0], vec![0.0; 2], vec![false, true])
            .unwrap();
        assert_eq!(rollout.episode_returns(), vec![2.0, 2.0]);
    }

    #[test]
    fn test_collect_rollout_caps_length() {
        let mut env = Counter {
            agents: 3,
            steps: 0,
            fail_at: None,
        };
        let policy = UniformPolicy {
            action_space: Space::Discrete { n: 3 },
        };
        let mut rng = RngState::seed_from_u64(0);
        let rollout = collect_rollout(&mut env, &policy, 7, &mut rng, || false)
            .unwrap()
            .unwrap();
        assert_eq!(rollout.len(), 7);
        assert_eq!(rollout.agents(), Some(3));
        let batch = rollout.as_batch();
        // observation t is the state before step t
        assert_eq!(batch.observations[0], vec![vec![0.0]; 3]);
        assert_eq!(batch.observations[6], vec![vec![6.0]; 3]);
        assert_eq!(batch.rewards[2], batch.actions[2].iter().map(|&a| a as f32).collect::<Vec<_>>());
    }

    /// One agent done after the first step, the other after the third.
    struct Staggered {
        t: usize,
    }

    impl Environment for Staggered {
        fn reset(&mut self) -> Result<Vec<Observation>> {
            self.t = 0;
            Ok(vec![vec![0.0]; 2])
        }

        fn step(&mut self, _actions: &[usize]) -> Result<StepResult> {
            self.t += 1;
            Ok(StepResult {
                observations: vec![vec![self.t as f32]; 2],
                rewards: vec![1.0, 1.0],
                dones: vec![true, self.t >= 3],
                info: Info::new(),
            })
        }

        fn observation_space(&self) -> Space {
            Space::Discrete { n: 1 }
        }

        fn action_space(&self) -> Space {
            Space::Discrete { n: 2 }
        }

        fn num_agents(&self) -> usize {
            2
        }
    }

    #[test]
    fn test_collect_rollout_ends_when_all_done() {
        let policy = UniformPolicy {
            action_space: Space::Discrete { n: 2 },
        };
        let mut rng = RngState::seed_from_u64(0);
        let rollout = collect_rollout(&mut Staggered { t: 0 }, &policy, 100, &mut rng, || false)
            .unwrap()
            .unwrap();
        assert_eq!(rollout.len(), 3);
        assert_eq!(
            rollout.as_batch().dones,
            &[vec![false, false], vec![true, false], vec![true, false]]
        );
        assert_eq!(rollout.episode_returns(), vec![1.0, 3.0]);
    }

    #[test]
    fn test_collect_rollout_stops_on_request() {
        let polls = Cell::new(0);
        let policy = UniformPolicy {
            action_space: Space::Discrete { n: 2 },
        };
        let mut rng = RngState::seed_from_u64(0);
        let result = collect_rollout(&mut Staggered { t: 0 }, &policy, 100, &mut rng, || {
            polls.set(polls.get() + 1);
            polls.get() > 2
        })
        .unwrap();
        assert!(result.is_none());
        assert_eq!(polls.get(), 3);
    }
}
