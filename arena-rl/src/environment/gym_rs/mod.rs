use gym_rs::{
    core::Env,
    envs::classical_control::cartpole::CartPoleEnv,
    utils::renderer::RenderMode,
};

use super::{Environment, Info, Observation, Space, StepResult};
use crate::{Error, Result};

/// Single-agent adapter over a `gym-rs` environment.
///
/// Once the wrapped episode ends, further steps are answered with the last
/// observation, zero reward and `done` until the next reset.
pub struct GymEnvironment<T: Env> {
    env: T,
    observation_space: Space,
    action_space: Space,
    last: Option<Observation>,
    done: bool,
}

impl<T> GymEnvironment<T>
where
    T: Env,
    T::Action: From<usize>,
    T::Observation: Into<Vec<f64>>,
{
    pub fn from(env: T, observation_space: Space, action_space: Space) -> Self {
        GymEnvironment {
            env,
            observation_space,
            action_space,
            last: None,
            done: false,
        }
    }
}

impl GymEnvironment<CartPoleEnv> {
    pub fn cartpole(seed: u64) -> Self {
        let mut env = CartPoleEnv::new(RenderMode::None);
        env.reset(Some(seed), false, None);
        GymEnvironment::from(
            env,
            Space::Box {
                shape: vec![4],
                low: f32::NEG_INFINITY,
                high: f32::INFINITY,
            },
            Space::Discrete { n: 2 },
        )
    }
}

fn to_observation<O: Into<Vec<f64>>>(observation: O) -> Observation {
    observation.into().into_iter().map(|v| v as f32).collect()
}

impl<T> Environment for GymEnvironment<T>
where
    T: Env,
    T::Action: From<usize>,
    T::Observation: Into<Vec<f64>>,
{
    fn reset(&mut self) -> Result<Vec<Observation>> {
        let (obs, _) = self.env.reset(None, false, None);
        let obs = to_observation(obs);
        self.last = Some(obs.clone());
        self.done = false;
        Ok(vec![obs])
    }

    fn step(&mut self, actions: &[usize]) -> Result<StepResult> {
        let &[action] = actions else {
            return Err(Error::ShapeMismatch {
                expected: 1,
                actual: actions.len(),
            });
        };
        let Some(last) = self.last.clone() else {
            return Err(Error::Environment("step called before reset".into()));
        };
        if self.done {
            return Ok(StepResult {
                observations: vec![last],
                rewards: vec![0.0],
                dones: vec![true],
                info: Info::new(),
            });
        }

        let action_reward = self.env.step(T::Action::from(action));
        let obs = to_observation(action_reward.observation);
        self.last = Some(obs.clone());
        self.done = action_reward.done;
        Ok(StepResult {
            observations: vec![obs],
            rewards: vec![*action_reward.reward.as_ref() as f32],
            dones: vec![action_reward.done],
            info: Info::new(),
        })
    }

    fn observation_space(&self) -> Space {
        self.observation_space.clone()
    }

    fn action_space(&self) -> Space {
        self.action_space.clone()
    }

    fn num_agents(&self) -> usize {
        1
    }
}
