//! Advantage actor-critic training.
//!
//! Three ways to gather experience share one update step:
//! - [`A2cTrainer::train_sync`] plays episodes on a local environment,
//! - [`A2cTrainer::train_batched`] steps a [`WorkerPool`] in lock-step,
//! - [`A2cTrainer::train_async`] consumes episodes from an
//!   [`AsyncCoordinator`] while its producers keep playing.

use std::{path::PathBuf, sync::Arc};

use arena_rl::{
    coordinator::{snapshot::PolicySnapshot, AsyncCoordinator, CoordinatorConfig},
    data::rollout::{collect_rollout, Rollout},
    environment::{
        pool::{Launcher, WorkerPool},
        EnvFactory, EnvSpec, Observation,
    },
    logging::log_rollout,
    module::{
        nn::{
            actor_critic::{ActorCritic, ActorCriticConfig, ActorCriticLoader},
            observation_tensor,
        },
        policy::Policy,
    },
    objective::a2c::{ActorCriticLoss, ActorCriticLossConfig},
    rng::RngState,
    Error, Result,
};
use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use tqdm::tqdm;
use tracing::{debug, info, warn};

use crate::hyperparameters::A2cHyperParameters;

/// Loss terms of one update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateStats {
    pub actor: f32,
    pub critic: f32,
    pub entropy: f32,
    pub total: f32,
}

pub struct A2cTrainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<ActorCritic<B>, B>,
{
    hp: A2cHyperParameters,
    env_spec: EnvSpec,
    model_config: ActorCriticConfig,
    model: ActorCritic<B>,
    loss: ActorCriticLoss,
    optim: O,
    device: B::Device,
    rng: RngState,
    snapshot: Option<PolicySnapshot>,
    updates: u64,
}

impl<B, O> A2cTrainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<ActorCritic<B>, B>,
{
    /// Size the network from one throwaway copy of the environment. With a
    /// `training_dir`, asynchronous training publishes every update to
    /// `<training_dir>/model/policy.bin`.
    pub fn new(
        hp: A2cHyperParameters,
        env_spec: EnvSpec,
        device: B::Device,
        optim: O,
        training_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let (observation_space, action_space) = {
            let env = env_spec.build(0)?;
            (env.observation_space(), env.action_space())
        };
        let model_config = ActorCriticConfig::new(
            observation_space.size(),
            hp.hidden_sizes.clone(),
            action_space.size(),
        );
        let model = model_config.init::<B>(&device)?;
        let loss = ActorCriticLossConfig::new()
            .with_entropy_weight(hp.entropy_weight)
            .with_value_weight(hp.value_weight)
            .init();
        let snapshot = training_dir
            .map(|dir| PolicySnapshot::new(dir.join("model")))
            .transpose()?;
        info!(
            observations = observation_space.size(),
            actions = action_space.size(),
            "built actor-critic"
        );

        Ok(Self {
            rng: RngState::seed_from_u64(hp.seed),
            hp,
            env_spec,
            model_config,
            model,
            loss,
            optim,
            device,
            snapshot,
            updates: 0,
        })
    }

    pub fn model(&self) -> &ActorCritic<B> {
        &self.model
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Play and learn from `num_episodes` episodes on a single local
    /// environment.
    pub fn train_sync(&mut self) -> Result<()> {
        let mut env = self.env_spec.build(0)?;
        for episode in tqdm(0..self.hp.num_episodes) {
            let policy = self.model.valid();
            let Some(rollout) = collect_rollout(
                &mut env,
                &policy,
                self.hp.episode_length,
                &mut self.rng,
                || false,
            )?
            else {
                continue;
            };
            log_rollout(episode, &rollout);
            self.learn(&rollout)?;
        }
        Ok(())
    }

    /// Step `num_envs` workers in lock-step with one batched prediction per
    /// step, then learn from each worker's episode in turn.
    pub fn train_batched<L: Launcher + ?Sized>(&mut self, launcher: &L) -> Result<()> {
        let mut pool = WorkerPool::open(launcher, self.hp.num_envs)?;
        for iteration in tqdm(0..self.hp.num_episodes) {
            let policy = self.model.valid();
            let rollouts = collect_batched(&mut pool, &policy, self.hp.episode_length, &mut self.rng)?;
            for (worker, rollout) in rollouts.iter().enumerate() {
                debug!(iteration, worker, steps = rollout.len(), "worker episode");
                log_rollout(iteration * rollouts.len() + worker, rollout);
                self.learn(rollout)?;
            }
        }
        pool.close()
    }

    /// Learn from episodes played concurrently by `num_envs` producers.
    ///
    /// Needs a training directory: the producers load the policy from the
    /// snapshot file, which is published once before they start and again
    /// after every update. A failed producer is logged and skipped.
    pub fn train_async(&mut self) -> Result<()> {
        let snapshot = self
            .snapshot
            .clone()
            .ok_or_else(|| Error::Config("asynchronous training needs a training directory".into()))?;
        self.publish(&snapshot)?;

        let spec = self.env_spec.clone();
        let env_factory: Arc<EnvFactory> = Arc::new(move |index: usize| spec.build(index));
        let loader = Arc::new(ActorCriticLoader::<B::InnerBackend> {
            config: self.model_config.clone(),
            device: self.device.clone(),
        });
        let config = CoordinatorConfig::new(self.hp.num_envs, self.hp.episode_length)
            .with_handoff_capacity(self.hp.handoff_capacity);
        let mut coordinator =
            AsyncCoordinator::open(&config, snapshot.clone(), env_factory, loader, &mut self.rng)?;

        let mut episode = 0;
        while episode < self.hp.num_episodes {
            match coordinator.await_rollout() {
                Ok(completed) => {
                    debug!(
                        producer = completed.producer,
                        policy_version = completed.policy_version,
                        lag = self.updates.saturating_sub(completed.policy_version),
                        "rollout received"
                    );
                    log_rollout(episode, &completed.rollout);
                    self.learn(&completed.rollout)?;
                    self.publish(&snapshot)?;
                    episode += 1;
                }
                Err(Error::ProducerFailed { producer, reason }) => {
                    warn!(
                        producer,
                        reason,
                        remaining = coordinator.open_producers(),
                        "rollout producer failed, continuing with the rest"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        coordinator.close();
        Ok(())
    }

    /// One gradient step on a whole episode.
    ///
    /// Returns are discounted per agent, advantages are `return - value`
    /// and records taken after an agent was done are masked out.
    pub fn update_with_rollout(&mut self, rollout: &Rollout) -> Result<UpdateStats> {
        if rollout.is_empty() {
            return Err(Error::ShapeMismatch {
                expected: 1,
                actual: 0,
            });
        }
        let returns = rollout.returns(self.hp.gamma);
        let advantages = rollout.advantages(&returns);
        let batch = rollout.as_batch();

        let observations: Vec<Observation> = batch.observations.iter().flatten().cloned().collect();
        let n = observations.len();
        let actions: Vec<i64> = batch.actions.iter().flatten().map(|&a| a as i64).collect();
        let mask: Vec<f32> = batch
            .dones
            .iter()
            .flatten()
            .map(|&done| if done { 0.0 } else { 1.0 })
            .collect();
        let returns: Vec<f32> = returns.into_iter().flatten().collect();
        let advantages: Vec<f32> = advantages.into_iter().flatten().collect();

        let device = &self.device;
        let observations = observation_tensor::<B>(&observations, device)?;
        let actions = Tensor::<B, 1, Int>::from_data(TensorData::new(actions, [n]), device);
        let returns = Tensor::<B, 1>::from_data(TensorData::new(returns, [n]), device);
        let advantages = Tensor::<B, 1>::from_data(TensorData::new(advantages, [n]), device);
        let mask = Tensor::<B, 1>::from_data(TensorData::new(mask, [n]), device);

        let (logits, values) = self.model.forward(observations);
        let loss = self.loss.forward(logits, values, actions, advantages, returns, mask);
        let stats = UpdateStats {
            actor: loss.actor.into_scalar().elem(),
            critic: loss.critic.into_scalar().elem(),
            entropy: loss.entropy.into_scalar().elem(),
            total: loss.total.clone().into_scalar().elem(),
        };
        if !stats.total.is_finite() {
            return Err(Error::Tensor(format!("non-finite loss {stats:?}")));
        }

        let grads = GradientsParams::from_grads(loss.total.backward(), &self.model);
        self.model = self.optim.step(self.hp.learning_rate, self.model.clone(), grads);
        self.updates += 1;
        Ok(stats)
    }

    fn learn(&mut self, rollout: &Rollout) -> Result<()> {
        let stats = self.update_with_rollout(rollout)?;
        debug!(
            update = self.updates,
            actor = stats.actor,
            critic = stats.critic,
            entropy = stats.entropy,
            total = stats.total,
            "a2c update"
        );
        Ok(())
    }

    /// Overwrite the snapshot with the current parameters.
    fn publish(&self, snapshot: &PolicySnapshot) -> Result<()> {
        snapshot.publish(self.updates, &self.model.valid().to_bytes()?)
    }
}

/// Play one episode on every worker of `pool` at once.
///
/// A worker's episode ends when all of its agents are done; the pool keeps
/// stepping it until every worker has finished or `episode_length` steps
/// have passed, but nothing more is recorded for it.
pub fn collect_batched<P: Policy + ?Sized>(
    pool: &mut WorkerPool,
    policy: &P,
    episode_length: usize,
    rng: &mut RngState,
) -> Result<Vec<Rollout>> {
    let mut observations = pool.reset()?;
    let mut dones: Vec<Vec<bool>> = observations.iter().map(|o| vec![false; o.len()]).collect();
    let mut finished = vec![false; pool.len()];
    let mut rollouts: Vec<Rollout> = (0..pool.len())
        .map(|_| Rollout::with_capacity(episode_length))
        .collect();

    for _ in 0..episode_length {
        let flat: Vec<Observation> = observations.iter().flatten().cloned().collect();
        let (actions, values) = policy.predict(&flat, rng)?;

        let mut offset = 0;
        let mut batched_actions = Vec::with_capacity(pool.len());
        let mut batched_values = Vec::with_capacity(pool.len());
        for worker in &observations {
            let end = offset + worker.len();
            batched_actions.push(actions[offset..end].to_vec());
            batched_values.push(values[offset..end].to_vec());
            offset = end;
        }

        let steps = pool.step(&batched_actions)?;
        let records = observations.into_iter().zip(batched_actions).zip(batched_values);
        let mut next_observations = Vec::with_capacity(steps.len());
        for (worker, (((before, actions), values), step)) in records.zip(steps).enumerate() {
            if !finished[worker] {
                rollouts[worker].record(before, actions, step.rewards, values, dones[worker].clone())?;
                finished[worker] = step.dones.iter().all(|&done| done);
            }
            dones[worker] = step.dones;
            next_observations.push(step.observations);
        }
        observations = next_observations;
        if finished.iter().all(|&f| f) {
            break;
        }
    }
    Ok(rollouts)
}

#[cfg(test)]
mod tests {
    use arena_rl::environment::pool::ThreadLauncher;
    use burn::backend::{Autodiff, NdArray};

    use super::*;
    use crate::{adam, hyperparameters::EnvKind};

    type B = Autodiff<NdArray>;

    fn hp() -> A2cHyperParameters {
        A2cHyperParameters {
            num_envs: 2,
            num_episodes: 3,
            episode_length: 20,
            learning_rate: 0.01,
            hidden_sizes: vec![8],
            ..A2cHyperParameters::preset(EnvKind::CartPole)
        }
    }

    fn trainer(
        hp: A2cHyperParameters,
        training_dir: Option<PathBuf>,
    ) -> A2cTrainer<B, impl Optimizer<ActorCritic<B>, B>> {
        let spec = hp.env_spec();
        A2cTrainer::new(hp, spec, Default::default(), adam::<B, ActorCritic<B>>(1.0), training_dir).unwrap()
    }

    fn cartpole_rollout(trainer: &mut A2cTrainer<B, impl Optimizer<ActorCritic<B>, B>>) -> Rollout {
        let mut env = trainer.env_spec.build(0).unwrap();
        let policy = trainer.model.valid();
        collect_rollout(&mut env, &policy, 20, &mut trainer.rng, || false)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_update_changes_policy() {
        let mut trainer = trainer(hp(), None);
        let rollout = cartpole_rollout(&mut trainer);
        let probe = observation_tensor::<B>(&rollout.as_batch().observations[0], &Default::default()).unwrap();
        let before = trainer.model().forward(probe.clone()).0.into_data().to_vec::<f32>().unwrap();

        let stats = trainer.update_with_rollout(&rollout).unwrap();
        assert!(stats.total.is_finite());
        assert!(stats.entropy > 0.0);
        assert_eq!(trainer.updates(), 1);
        let after = trainer.model().forward(probe).0.into_data().to_vec::<f32>().unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_empty_rollout_is_rejected() {
        let mut trainer = trainer(hp(), None);
        assert!(matches!(
            trainer.update_with_rollout(&Rollout::new()),
            Err(Error::ShapeMismatch { .. })
        ));
        assert_eq!(trainer.updates(), 0);
    }

    #[test]
    fn test_train_sync_writes_no_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(hp(), Some(dir.path().to_path_buf()));
        trainer.train_sync().unwrap();
        assert_eq!(trainer.updates(), 3);
        assert!(!dir.path().join("model").join(PolicySnapshot::FILE_NAME).exists());
    }

    #[test]
    fn test_train_batched_learns_from_every_worker() {
        let hp = hp();
        let launcher = ThreadLauncher::from_spec(hp.env_spec());
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(hp, Some(dir.path().to_path_buf()));
        trainer.train_batched(&launcher).unwrap();
        assert_eq!(trainer.updates(), 6);
        assert!(!dir.path().join("model").join(PolicySnapshot::FILE_NAME).exists());
    }

    #[test]
    fn test_train_async() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(hp(), Some(dir.path().to_path_buf()));
        trainer.train_async().unwrap();
        assert_eq!(trainer.updates(), 3);
        let snapshot = PolicySnapshot::new(dir.path().join("model")).unwrap();
        assert_eq!(snapshot.version().unwrap(), 3);
    }

    #[test]
    fn test_train_async_needs_training_dir() {
        let mut trainer = trainer(hp(), None);
        assert!(matches!(trainer.train_async(), Err(Error::Config(_))));
    }

    #[test]
    fn test_collect_batched_one_rollout_per_worker() {
        let launcher = ThreadLauncher::from_spec(EnvSpec::CartPole { seed: 5 });
        let mut pool = WorkerPool::open(&launcher, 3).unwrap();
        let policy = arena_rl::module::policy::UniformPolicy {
            action_space: pool.action_space().unwrap(),
        };
        let mut rng = RngState::seed_from_u64(0);
        let rollouts = collect_batched(&mut pool, &policy, 15, &mut rng).unwrap();
        assert_eq!(rollouts.len(), 3);
        for rollout in &rollouts {
            assert!(!rollout.is_empty() && rollout.len() <= 15);
            assert_eq!(rollout.agents(), Some(1));
        }
        pool.close().unwrap();
    }
}
