use burn::{
    nn::{LeakyRelu, LeakyReluConfig, Linear, LinearConfig},
    prelude::*,
    tensor::activation::softmax,
};
use rand::distributions::{Distribution, WeightedIndex};

use super::{
    float_vec, load_record_bytes, module_device,
    multi_layer_perceptron::{MultiLayerPerceptron, MultiLayerPerceptronConfig},
    observation_tensor, record_bytes,
};
use crate::{
    coordinator::snapshot::Snapshot,
    environment::Observation,
    module::policy::{Policy, PolicyLoader},
    rng::RngState,
    Error,
};

#[derive(Config, Debug)]
pub struct ActorCriticConfig {
    pub input_size: usize,
    pub hidden_sizes: Vec<usize>,
    pub num_actions: usize,
    #[config(default = 0.0)]
    pub dropout: f64,
}

/// Shared trunk with a policy-logit head and a state-value head.
#[derive(Module, Debug)]
pub struct ActorCritic<B: Backend> {
    trunk: MultiLayerPerceptron<B>,
    activation: LeakyRelu,
    policy: Linear<B>,
    value: Linear<B>,
}

impl ActorCriticConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::Result<ActorCritic<B>> {
        let Some(&features) = self.hidden_sizes.last() else {
            return Err(Error::Config("actor-critic needs at least one hidden layer".into()));
        };
        if self.num_actions == 0 {
            return Err(Error::Config("actor-critic needs at least one action".into()));
        }
        let mut sizes = vec![self.input_size];
        sizes.extend(&self.hidden_sizes);
        Ok(ActorCritic {
            trunk: MultiLayerPerceptronConfig::new(sizes)
                .with_dropout(self.dropout)
                .init(device)?,
            activation: LeakyReluConfig::new().init(),
            policy: LinearConfig::new(features, self.num_actions).init(device),
            value: LinearConfig::new(features, 1).init(device),
        })
    }
}

impl<B: Backend> ActorCritic<B> {
    /// Policy logits `[batch, actions]` and value estimates `[batch]`.
    pub fn forward(&self, observations: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 1>) {
        let features = self.activation.forward(self.trunk.forward(observations));
        let logits = self.policy.forward(features.clone());
        let values = self.value.forward(features).squeeze(1);
        (logits, values)
    }

    pub fn to_bytes(self) -> crate::Result<Vec<u8>> {
        record_bytes(self)
    }

    pub fn load_bytes(self, bytes: Vec<u8>, device: &B::Device) -> crate::Result<Self> {
        load_record_bytes(self, bytes, device)
    }
}

impl<B: Backend> Policy for ActorCritic<B> {
    /// Samples each action from the softmax of the policy logits.
    fn predict(&self, observations: &[Observation], rng: &mut RngState) -> crate::Result<(Vec<usize>, Vec<f32>)> {
        if observations.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let device = module_device(self)?;
        let (logits, values) = self.forward(observation_tensor(observations, &device)?);
        let [_, num_actions] = logits.dims();
        let probabilities = float_vec(softmax(logits, 1))?;

        let actions = probabilities
            .chunks(num_actions)
            .map(|row| {
                WeightedIndex::new(row)
                    .map(|distribution| distribution.sample(&mut *rng))
                    .map_err(|e| Error::Tensor(format!("invalid action distribution {row:?}: {e}")))
            })
            .collect::<crate::Result<Vec<_>>>()?;
        Ok((actions, float_vec(values)?))
    }
}

/// Rebuilds an [`ActorCritic`] on backend `B` from snapshot bytes.
#[derive(Debug, Clone)]
pub struct ActorCriticLoader<B: Backend> {
    pub config: ActorCriticConfig,
    pub device: B::Device,
}

impl<B: Backend> PolicyLoader for ActorCriticLoader<B> {
    type Policy = ActorCritic<B>;

    fn load(&self, snapshot: &Snapshot) -> crate::Result<ActorCritic<B>> {
        self.config
            .init::<B>(&self.device)?
            .load_bytes(snapshot.params.clone(), &self.device)
    }
}
