use arena_rl::{
    data::util::Transition,
    environment::Observation,
    module::nn::{
        q_network::{QNetwork, QNetworkConfig},
        target_model::TargetNetwork,
    },
    objective::dqn::{DeepQNetworkLoss, DeepQNetworkLossConfig, TransitionBatch},
    Error, Result,
};
use burn::{
    module::AutodiffModule,
    nn::loss::Reduction,
    optim::{GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use tracing::debug;

use crate::{hyperparameters::DqnHyperParameters, off_policy::OffPolicyAgent};

/// Deep Q-learning with a periodically synced target network.
pub struct DeepQNetworkAgent<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<QNetwork<B>, B>,
{
    network: TargetNetwork<B, QNetwork<B>>,
    loss: DeepQNetworkLoss,
    optim: O,
    learning_rate: f64,
    target_update_freq: u64,
    update_counter: u64,
    device: B::Device,
}

impl<B, O> DeepQNetworkAgent<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<QNetwork<B>, B>,
{
    pub fn new(model: QNetwork<B>, optim: O, hp: &DqnHyperParameters, device: B::Device) -> Result<Self> {
        let loss = DeepQNetworkLossConfig::new()
            .with_discount_factor(hp.gamma)
            .with_double_dqn(hp.double_dqn)
            .init()?;
        Ok(Self {
            network: TargetNetwork::new(model),
            loss,
            optim,
            learning_rate: hp.learning_rate,
            target_update_freq: hp.target_update_freq.max(1),
            update_counter: 0,
            device,
        })
    }

    /// Build the Q network described by `hp` for the given space sizes.
    pub fn from_hyperparameters(
        hp: &DqnHyperParameters,
        observation_size: usize,
        num_actions: usize,
        optim: O,
        device: B::Device,
    ) -> Result<Self> {
        let model = QNetworkConfig::new(observation_size, hp.hidden_sizes.clone(), num_actions)
            .with_dueling(hp.dueling_dqn)
            .with_dropout(hp.dropout)
            .init::<B>(&device)?;
        Self::new(model, optim, hp, device)
    }

    pub fn network(&self) -> &TargetNetwork<B, QNetwork<B>> {
        &self.network
    }

    pub fn updates(&self) -> u64 {
        self.update_counter
    }
}

impl<B, O> OffPolicyAgent for DeepQNetworkAgent<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<QNetwork<B>, B>,
{
    fn act(&self, observations: &[Observation]) -> Result<Vec<usize>> {
        self.network.online.valid().greedy(observations)
    }

    fn update(&mut self, batch: &[Transition]) -> Result<f32> {
        if batch.is_empty() {
            return Err(Error::ShapeMismatch {
                expected: 1,
                actual: 0,
            });
        }
        let batch = TransitionBatch::<B>::from_transitions(batch, &self.device)?;
        let loss = self.loss.forward(&self.network, batch, Reduction::Mean);
        let value: f32 = loss.clone().into_scalar().elem();

        let grads = GradientsParams::from_grads(loss.backward(), &self.network.online);
        self.network.online = self
            .optim
            .step(self.learning_rate, self.network.online.clone(), grads);

        self.update_counter += 1;
        if self.update_counter % self.target_update_freq == 0 {
            debug!(update = self.update_counter, "syncing target network");
            self.network = self.network.clone().hard_update();
        }
        Ok(value)
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        self.network.online.valid().to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use arena_rl::module::nn::observation_tensor;
    use burn::backend::{Autodiff, NdArray};

    use super::*;
    use crate::{adam, hyperparameters::EnvKind};

    type B = Autodiff<NdArray>;

    fn agent(target_update_freq: u64) -> DeepQNetworkAgent<B, impl Optimizer<QNetwork<B>, B>> {
        let hp = DqnHyperParameters {
            target_update_freq,
            learning_rate: 0.01,
            hidden_sizes: vec![8],
            ..DqnHyperParameters::preset(EnvKind::CartPole)
        };
        DeepQNetworkAgent::from_hyperparameters(&hp, 2, 3, adam::<B, QNetwork<B>>(1.0), Default::default())
            .unwrap()
    }

    fn batch() -> Vec<Transition> {
        (0..8)
            .map(|i| Transition {
                before: vec![i as f32 / 8.0, 1.0],
                action: i % 3,
                after: vec![(i + 1) as f32 / 8.0, 1.0],
                reward: 1.0,
                done: i == 7,
            })
            .collect()
    }

    fn outputs(network: &QNetwork<B>) -> Vec<f32> {
        let input = observation_tensor::<B>(&[vec![0.5, -0.5]], &Default::default()).unwrap();
        network.forward(input).into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_target_syncs_every_target_update_freq() {
        let mut agent = agent(3);
        let batch = batch();

        agent.update(&batch).unwrap();
        agent.update(&batch).unwrap();
        assert_ne!(outputs(&agent.network().online), outputs(&agent.network().target));

        agent.update(&batch).unwrap();
        assert_eq!(agent.updates(), 3);
        assert_eq!(outputs(&agent.network().online), outputs(&agent.network().target));
    }

    #[test]
    fn test_act_is_greedy() {
        let agent = agent(10);
        let observations = vec![vec![0.1, 0.2], vec![0.3, 0.4]];
        let actions = agent.act(&observations).unwrap();
        assert_eq!(actions, agent.network().online.greedy(&observations).unwrap());
        assert!(actions.iter().all(|&a| a < 3));
    }

    #[test]
    fn test_empty_batch_is_rejected() {
        let mut agent = agent(10);
        assert!(agent.update(&[]).is_err());
        assert_eq!(agent.updates(), 0);
    }

    #[test]
    fn test_saved_bytes_restore_online_network() {
        let agent = agent(10);
        let bytes = agent.to_bytes().unwrap();
        let device = Default::default();
        let restored = QNetworkConfig::new(2, vec![8], 3)
            .with_dueling(true)
            .init::<B>(&device)
            .unwrap()
            .load_bytes(bytes, &device)
            .unwrap();
        assert_eq!(outputs(&restored), outputs(&agent.network().online));
    }
}
