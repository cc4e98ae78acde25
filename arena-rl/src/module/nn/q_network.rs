use burn::{
    nn::{LeakyRelu, LeakyReluConfig, Linear, LinearConfig},
    prelude::*,
};

use super::{
    float_vec, int_vec, load_record_bytes, module_device,
    multi_layer_perceptron::{MultiLayerPerceptron, MultiLayerPerceptronConfig},
    observation_tensor, record_bytes,
};
use crate::{environment::Observation, module::policy::Policy, rng::RngState, Error};

#[derive(Config, Debug)]
pub struct QNetworkConfig {
    pub input_size: usize,
    pub hidden_sizes: Vec<usize>,
    pub num_actions: usize,
    /// Split the head into state-value and advantage streams.
    #[config(default = false)]
    pub dueling: bool,
    #[config(default = 0.0)]
    pub dropout: f64,
}

/// Action-value network, `[batch, features] -> [batch, actions]`.
#[derive(Module, Debug)]
pub struct QNetwork<B: Backend> {
    trunk: MultiLayerPerceptron<B>,
    activation: LeakyRelu,
    advantage: Linear<B>,
    value: Option<Linear<B>>,
}

impl QNetworkConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::Result<QNetwork<B>> {
        let Some(&features) = self.hidden_sizes.last() else {
            return Err(Error::Config("q-network needs at least one hidden layer".into()));
        };
        if self.num_actions == 0 {
            return Err(Error::Config("q-network needs at least one action".into()));
        }
        let mut sizes = vec![self.input_size];
        sizes.extend(&self.hidden_sizes);
        Ok(QNetwork {
            trunk: MultiLayerPerceptronConfig::new(sizes)
                .with_dropout(self.dropout)
                .init(device)?,
            activation: LeakyReluConfig::new().init(),
            advantage: LinearConfig::new(features, self.num_actions).init(device),
            value: self
                .dueling
                .then(|| LinearConfig::new(features, 1).init(device)),
        })
    }
}

impl<B: Backend> QNetwork<B> {
    pub fn forward(&self, observations: Tensor<B, 2>) -> Tensor<B, 2> {
        let features = self.activation.forward(self.trunk.forward(observations));
        let advantage = self.advantage.forward(features.clone());
        match &self.value {
            Some(value) => {
                let mean = advantage.clone().mean_dim(1);
                value.forward(features) + advantage - mean
            }
            None => advantage,
        }
    }

    pub fn to_bytes(self) -> crate::Result<Vec<u8>> {
        record_bytes(self)
    }

    pub fn load_bytes(self, bytes: Vec<u8>, device: &B::Device) -> crate::Result<Self> {
        load_record_bytes(self, bytes, device)
    }

    /// Argmax action for each observation.
    pub fn greedy(&self, observations: &[Observation]) -> crate::Result<Vec<usize>> {
        Ok(self.predict_greedy(observations)?.0)
    }

    fn predict_greedy(&self, observations: &[Observation]) -> crate::Result<(Vec<usize>, Vec<f32>)> {
        if observations.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let device = module_device(self)?;
        let q = self.forward(observation_tensor(observations, &device)?);
        let actions = int_vec(q.clone().argmax(1))?;
        let values = float_vec(q.max_dim(1))?;
        Ok((actions.into_iter().map(|a| a as usize).collect(), values))
    }
}

impl<B: Backend> Policy for QNetwork<B> {
    /// Greedy action with its Q-value as the value estimate.
    fn predict(&self, observations: &[Observation], _rng: &mut RngState) -> crate::Result<(Vec<usize>, Vec<f32>)> {
        self.predict_greedy(observations)
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use super::*;

    #[test]
    fn test_q_network_shapes() {
        let device = Default::default();
        for dueling in [false, true] {
            let network = QNetworkConfig::new(4, vec![8], 3)
                .with_dueling(dueling)
                .init::<NdArray>(&device)
                .unwrap();
            assert_eq!(network.forward(Tensor::zeros([2, 4], &device)).dims(), [2, 3]);
        }
    }

    #[test]
    fn test_greedy_matches_forward() {
        let device = Default::default();
        let network = QNetworkConfig::new(2, vec![8, 8], 5).init::<NdArray>(&device).unwrap();
        let observations = vec![vec![1.0, -1.0], vec![0.3, 0.7]];
        let q = float_vec(network.forward(observation_tensor(&observations, &device).unwrap())).unwrap();
        let actions = network.greedy(&observations).unwrap();
        for (row, action) in q.chunks(5).zip(actions) {
            let best = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            assert_eq!(row[action], best);
        }
    }

    #[test]
    fn test_bytes_round_trip() {
        let device = Default::default();
        let config = QNetworkConfig::new(3, vec![6], 2).with_dueling(true);
        let network = config.init::<NdArray>(&device).unwrap();
        let input = Tensor::<NdArray, 2>::ones([1, 3], &device);
        let expected = float_vec(network.forward(input.clone())).unwrap();

        let bytes = network.to_bytes().unwrap();
        let restored = config
            .init::<NdArray>(&device)
            .unwrap()
            .load_bytes(bytes, &device)
            .unwrap();
        assert_eq!(float_vec(restored.forward(input)).unwrap(), expected);
    }

    #[test]
    fn test_missing_hidden_layer() {
        let device = Default::default();
        assert!(QNetworkConfig::new(2, vec![], 5).init::<NdArray>(&device).is_err());
    }
}
