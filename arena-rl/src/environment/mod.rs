use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Flat feature vector seen by one agent.
pub type Observation = Vec<f32>;

/// Free-form per-step diagnostics reported by an environment.
pub type Info = BTreeMap<String, f64>;

/// A multi-agent environment.
///
/// Every call is batched over the agents that share this instance: `reset`
/// returns one observation per agent and `step` takes one action per agent.
/// Implementations must be constructible inside the thread or process that
/// will step them; nothing here is shared between execution contexts.
pub trait Environment {
    fn reset(&mut self) -> Result<Vec<Observation>>;

    fn step(&mut self, actions: &[usize]) -> Result<StepResult>;

    fn observation_space(&self) -> Space;

    fn action_space(&self) -> Space;

    fn num_agents(&self) -> usize;
}

impl<E: Environment + ?Sized> Environment for Box<E> {
    fn reset(&mut self) -> Result<Vec<Observation>> {
        (**self).reset()
    }

    fn step(&mut self, actions: &[usize]) -> Result<StepResult> {
        (**self).step(actions)
    }

    fn observation_space(&self) -> Space {
        (**self).observation_space()
    }

    fn action_space(&self) -> Space {
        (**self).action_space()
    }

    fn num_agents(&self) -> usize {
        (**self).num_agents()
    }
}

/// Builds the environment for a given worker or producer index.
pub type EnvFactory = dyn Fn(usize) -> Result<Box<dyn Environment>> + Send + Sync;

/// Outcome of one environment step, batched over agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub observations: Vec<Observation>,
    pub rewards: Vec<f32>,
    pub dones: Vec<bool>,
    #[serde(default)]
    pub info: Info,
}

/// Shape descriptor for observations and actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Space {
    Discrete { n: usize },
    Box { shape: Vec<usize>, low: f32, high: f32 },
}

impl Space {
    /// Number of scalars in an element of the space (or choices, if
    /// discrete).
    pub fn size(&self) -> usize {
        match self {
            Space::Discrete { n } => *n,
            Space::Box { shape, .. } => shape.iter().product(),
        }
    }

    /// Uniformly sample a discrete action.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        match self {
            Space::Discrete { n } => rng.gen_range(0..*n),
            Space::Box { .. } => 0,
        }
    }
}

/// Serialisable recipe for building an environment, so that a freshly
/// spawned worker can construct exactly the environment its parent meant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "env", rename_all = "snake_case")]
pub enum EnvSpec {
    Arena(arena::ArenaConfig),
    CartPole { seed: u64 },
}

impl EnvSpec {
    /// Build the environment for worker or producer `index`. The seed is
    /// offset by `index` so that parallel copies do not replay each other.
    pub fn build(&self, index: usize) -> Result<Box<dyn Environment>> {
        match self {
            EnvSpec::Arena(config) => {
                let config = arena::ArenaConfig {
                    seed: config.seed.wrapping_add(index as u64),
                    ..config.clone()
                };
                Ok(Box::new(arena::Arena::new(config)?))
            }
            EnvSpec::CartPole { seed } => Ok(Box::new(gym_rs::GymEnvironment::cartpole(
                seed.wrapping_add(index as u64),
            ))),
        }
    }
}

pub mod arena;
pub mod features;
pub mod gym_rs;
pub mod pool;
pub mod remote;

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    #[test]
    fn test_space_size() {
        assert_eq!(Space::Discrete { n: 4 }.size(), 4);
        let space = Space::Box {
            shape: vec![3, 5, 5],
            low: -1.0,
            high: 1.0,
        };
        assert_eq!(space.size(), 75);
    }

    #[test]
    fn test_discrete_sample_in_range() {
        let mut rng = StdRng::seed_from_u64(3);
        let space = Space::Discrete { n: 3 };
        for _ in 0..100 {
            assert!(space.sample(&mut rng) < 3);
        }
    }

    #[test]
    fn test_env_spec_json() {
        let spec = EnvSpec::CartPole { seed: 9 };
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, r#"{"env":"cart_pole","seed":9}"#);
        assert_eq!(serde_json::from_str::<EnvSpec>(&json).unwrap(), spec);
    }

    #[test]
    fn test_arena_spec_offsets_seed() {
        let spec = EnvSpec::Arena(arena::ArenaConfig {
            observation: arena::ObservationKind::Ram,
            ..Default::default()
        });
        let mut first = spec.build(0).unwrap();
        let mut second = spec.build(1).unwrap();
        assert_ne!(first.reset().unwrap(), second.reset().unwrap());
    }
}
