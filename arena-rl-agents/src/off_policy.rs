use std::path::PathBuf;

use arena_rl::{
    coordinator::snapshot::PolicySnapshot,
    data::{
        memory::{Memory, RingbufferMemory},
        util::{split_step, Transition},
    },
    environment::{Environment, Observation},
    logging::RolloutStatistics,
    module::exploration::{epsilon_greedy, EpsilonSchedule},
    rng::RngState,
    Result,
};
use tqdm::tqdm;
use tracing::{debug, info};

use crate::hyperparameters::DqnHyperParameters;

/// An agent that learns from replayed transitions.
pub trait OffPolicyAgent {
    /// Greedy action for each observation.
    fn act(&self, observations: &[Observation]) -> Result<Vec<usize>>;

    /// One gradient step; returns the loss.
    fn update(&mut self, batch: &[Transition]) -> Result<f32>;

    fn to_bytes(&self) -> Result<Vec<u8>>;
}

pub struct OffPolicyAlgorithm<E, A>
where
    E: Environment,
    A: OffPolicyAgent,
{
    hp: DqnHyperParameters,
    env: E,
    agent: A,
    memory: RingbufferMemory<Transition>,
    schedule: EpsilonSchedule,
    rng: RngState,
    training_dir: Option<PathBuf>,
    steps: u64,
}

impl<E, A> OffPolicyAlgorithm<E, A>
where
    E: Environment,
    A: OffPolicyAgent,
{
    pub fn new(hp: DqnHyperParameters, env: E, agent: A, training_dir: Option<PathBuf>) -> Self {
        Self {
            memory: RingbufferMemory::new(hp.replay_memory_capacity),
            schedule: EpsilonSchedule {
                base: hp.epsilon_base,
                end: hp.epsilon_end,
                decay: hp.epsilon_decay,
            },
            rng: RngState::seed_from_u64(hp.seed),
            hp,
            env,
            agent,
            training_dir,
            steps: 0,
        }
    }

    pub fn agent(&self) -> &A {
        &self.agent
    }

    pub fn memory(&self) -> &RingbufferMemory<Transition> {
        &self.memory
    }

    /// Train for `num_episodes` episodes and return each episode's mean
    /// agent return. With a training directory the final online network is
    /// saved under `<training_dir>/model`.
    pub fn train(&mut self) -> Result<Vec<f32>> {
        let mut episode_means = Vec::with_capacity(self.hp.num_episodes);
        for episode in tqdm(0..self.hp.num_episodes) {
            let returns = self.run_episode()?;
            if let Some(statistics) = RolloutStatistics::from_returns(&returns) {
                info!(
                    episode,
                    epsilon = self.schedule.value(self.steps),
                    memory = self.memory.len(),
                    "episode returns {statistics}"
                );
                episode_means.push(statistics.mean);
            }
        }

        if let Some(dir) = &self.training_dir {
            let snapshot = PolicySnapshot::new(dir.join("model"))?;
            snapshot.publish(self.hp.num_episodes as u64, &self.agent.to_bytes()?)?;
            info!(path = %snapshot.path().display(), "saved q-network");
        }
        Ok(episode_means)
    }

    fn run_episode(&mut self) -> Result<Vec<f32>> {
        let mut observations = self.env.reset()?;
        let mut dones = vec![false; observations.len()];
        let mut returns = vec![0.0; observations.len()];
        let action_space = self.env.action_space();

        for _ in 0..self.hp.episode_length {
            let epsilon = self.schedule.value(self.steps);
            let actions: Vec<usize> = self
                .agent
                .act(&observations)?
                .into_iter()
                .map(|action| epsilon_greedy(epsilon, action, &action_space, &mut self.rng))
                .collect();
            let step = self.env.step(&actions)?;

            for (agent, reward) in step.rewards.iter().enumerate() {
                if !dones[agent] {
                    returns[agent] += reward;
                }
            }
            self.memory.extend(split_step(&observations, &actions, &step, &dones)?);
            self.steps += 1;

            if self.steps % self.hp.learn_freq.max(1) == 0 && self.memory.len() >= self.hp.batch_size {
                let batch = self.memory.sample(self.hp.batch_size, &mut self.rng);
                let loss = self.agent.update(&batch)?;
                debug!(step = self.steps, loss, "dqn update");
            }

            observations = step.observations;
            dones = dones.iter().zip(&step.dones).map(|(&a, &b)| a || b).collect();
            if dones.iter().all(|&done| done) {
                break;
            }
        }
        Ok(returns)
    }
}

#[cfg(test)]
mod tests {
    use arena_rl::{
        environment::{gym_rs::GymEnvironment, EnvSpec},
        module::nn::q_network::QNetwork,
    };
    use burn::backend::{Autodiff, NdArray};

    use super::*;
    use crate::{adam, dqn::DeepQNetworkAgent, hyperparameters::EnvKind};

    type B = Autodiff<NdArray>;

    fn hp() -> DqnHyperParameters {
        DqnHyperParameters {
            num_episodes: 3,
            episode_length: 40,
            batch_size: 8,
            learn_freq: 2,
            target_update_freq: 5,
            hidden_sizes: vec![16],
            ..DqnHyperParameters::preset(EnvKind::CartPole)
        }
    }

    fn agent(hp: &DqnHyperParameters) -> DeepQNetworkAgent<B, impl burn::optim::Optimizer<QNetwork<B>, B>> {
        DeepQNetworkAgent::from_hyperparameters(hp, 4, 2, adam::<B, QNetwork<B>>(hp.grad_clip_norm), Default::default())
            .unwrap()
    }

    #[test]
    fn test_cartpole_training_loop() {
        let hp = hp();
        let dir = tempfile::tempdir().unwrap();
        let agent = agent(&hp);
        let mut algorithm =
            OffPolicyAlgorithm::new(hp, GymEnvironment::cartpole(1), agent, Some(dir.path().to_path_buf()));

        let means = algorithm.train().unwrap();
        assert_eq!(means.len(), 3);
        assert!(means.iter().all(|&m| m >= 1.0));
        assert!(algorithm.agent().updates() > 0);
        assert!(algorithm.memory().len() >= 3);

        let snapshot = PolicySnapshot::new(dir.path().join("model")).unwrap();
        assert_eq!(snapshot.version().unwrap(), 3);
    }

    #[test]
    fn test_no_update_before_memory_holds_a_batch() {
        let hp = DqnHyperParameters {
            num_episodes: 1,
            episode_length: 4,
            batch_size: 64,
            ..hp()
        };
        let agent = agent(&hp);
        let env = EnvSpec::CartPole { seed: 3 }.build(0).unwrap();
        let mut algorithm = OffPolicyAlgorithm::new(hp, env, agent, None);
        algorithm.train().unwrap();
        assert_eq!(algorithm.agent().updates(), 0);
        assert!(algorithm.memory().len() <= 4);
    }
}
