use crate::{
    coordinator::snapshot::Snapshot,
    environment::{Observation, Space},
    rng::RngState,
    Result,
};

/// Acts for a batch of agents.
///
/// Returns one action and one value estimate per observation. Randomness
/// comes from the caller's [`RngState`] so that rollouts are reproducible.
pub trait Policy {
    fn predict(&self, observations: &[Observation], rng: &mut RngState) -> Result<(Vec<usize>, Vec<f32>)>;
}

impl<P: Policy + ?Sized> Policy for &P {
    fn predict(&self, observations: &[Observation], rng: &mut RngState) -> Result<(Vec<usize>, Vec<f32>)> {
        (**self).predict(observations, rng)
    }
}

/// Builds a policy from a published snapshot. Shared by every rollout
/// producer, each of which keeps its own decoded copy.
pub trait PolicyLoader: Send + Sync + 'static {
    type Policy: Policy;

    fn load(&self, snapshot: &Snapshot) -> Result<Self::Policy>;
}

/// Uniformly random actions with a zero value estimate.
#[derive(Debug, Clone)]
pub struct UniformPolicy {
    pub action_space: Space,
}

impl Policy for UniformPolicy {
    fn predict(&self, observations: &[Observation], rng: &mut RngState) -> Result<(Vec<usize>, Vec<f32>)> {
        let actions = observations.iter().map(|_| self.action_space.sample(rng)).collect();
        Ok((actions, vec![0.0; observations.len()]))
    }
}

/// Ignores snapshot contents and hands out a [`UniformPolicy`].
#[derive(Debug, Clone)]
pub struct UniformLoader {
    pub action_space: Space,
}

impl PolicyLoader for UniformLoader {
    type Policy = UniformPolicy;

    fn load(&self, _snapshot: &Snapshot) -> Result<UniformPolicy> {
        Ok(UniformPolicy {
            action_space: self.action_space.clone(),
        })
    }
}
