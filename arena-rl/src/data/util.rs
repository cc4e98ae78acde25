use crate::{
    environment::{Observation, StepResult},
    Error, Result,
};

/// One agent's `(s, a, s', r, done)` sample for off-policy learning.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub before: Observation,
    pub action: usize,
    pub after: Observation,
    pub reward: f32,
    pub done: bool,
}

/// Split a batched environment step into per-agent transitions, skipping
/// agents that were already done before the step.
pub fn split_step(
    before: &[Observation],
    actions: &[usize],
    step: &StepResult,
    already_done: &[bool],
) -> Result<Vec<Transition>> {
    let agents = before.len();
    for actual in [
        actions.len(),
        step.observations.len(),
        step.rewards.len(),
        step.dones.len(),
        already_done.len(),
    ] {
        if actual != agents {
            return Err(Error::ShapeMismatch {
                expected: agents,
                actual,
            });
        }
    }
    Ok((0..agents)
        .filter(|&agent| !already_done[agent])
        .map(|agent| Transition {
            before: before[agent].clone(),
            action: actions[agent],
            after: step.observations[agent].clone(),
            reward: step.rewards[agent],
            done: step.dones[agent],
        })
        .collect())
}
