use burn::{
    nn::loss::{MseLoss, Reduction},
    prelude::*,
};

use super::temporal_difference::bootstrap_target;
use crate::{
    data::util::Transition,
    module::nn::{observation_tensor, q_network::QNetwork, target_model::TargetNetwork},
    Error,
};

#[derive(Config, Debug)]
pub struct DeepQNetworkLossConfig {
    #[config(default = 0.99)]
    pub discount_factor: f64,
    /// Choose the bootstrap action with the online network and evaluate it
    /// with the target network.
    #[config(default = true)]
    pub double_dqn: bool,
}

impl DeepQNetworkLossConfig {
    pub fn init(&self) -> crate::Result<DeepQNetworkLoss> {
        if !(0.0..=1.0).contains(&self.discount_factor) {
            return Err(Error::Config(format!(
                "the discount factor should be in the interval [0, 1], got {}",
                self.discount_factor
            )));
        }
        Ok(DeepQNetworkLoss {
            discount_factor: self.discount_factor,
            double_dqn: self.double_dqn,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DeepQNetworkLoss {
    discount_factor: f64,
    double_dqn: bool,
}

/// A replay sample laid out as tensors.
#[derive(Debug, Clone)]
pub struct TransitionBatch<B: Backend> {
    pub before: Tensor<B, 2>,
    pub actions: Tensor<B, 1, Int>,
    pub after: Tensor<B, 2>,
    pub rewards: Tensor<B, 1>,
    pub dones: Tensor<B, 1, Bool>,
}

impl<B: Backend> TransitionBatch<B> {
    pub fn from_transitions(transitions: &[Transition], device: &B::Device) -> crate::Result<Self> {
        let before: Vec<_> = transitions.iter().map(|t| t.before.clone()).collect();
        let after: Vec<_> = transitions.iter().map(|t| t.after.clone()).collect();
        let actions: Vec<i64> = transitions.iter().map(|t| t.action as i64).collect();
        let rewards: Vec<f32> = transitions.iter().map(|t| t.reward).collect();
        let dones: Vec<bool> = transitions.iter().map(|t| t.done).collect();
        let n = transitions.len();
        Ok(Self {
            before: observation_tensor(&before, device)?,
            actions: Tensor::from_data(TensorData::new(actions, [n]), device),
            after: observation_tensor(&after, device)?,
            rewards: Tensor::from_data(TensorData::new(rewards, [n]), device),
            dones: Tensor::from_data(TensorData::new(dones, [n]), device),
        })
    }

    pub fn len(&self) -> usize {
        self.rewards.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeepQNetworkLoss {
    /// Mean squared TD error of the online network's `Q(s, a)`.
    pub fn forward<B: Backend>(
        &self,
        network: &TargetNetwork<B, QNetwork<B>>,
        batch: TransitionBatch<B>,
        reduction: Reduction,
    ) -> Tensor<B, 1> {
        let q_before = network
            .online
            .forward(batch.before)
            .gather(1, batch.actions.unsqueeze_dim(1))
            .squeeze(1);

        let q_after_target = network.target.forward(batch.after.clone()).detach();
        let q_after = if self.double_dqn {
            let best = network.online.forward(batch.after).detach().argmax(1);
            q_after_target.gather(1, best).squeeze(1)
        } else {
            q_after_target.max_dim(1).squeeze(1)
        };

        let target = bootstrap_target(batch.rewards, q_after, batch.dones, self.discount_factor).detach();
        MseLoss::new().forward(q_before, target, reduction)
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use super::*;
    use crate::module::nn::q_network::QNetworkConfig;

    fn transitions() -> Vec<Transition> {
        (0..6)
            .map(|i| Transition {
                before: vec![i as f32, 1.0],
                action: i % 3,
                after: vec![i as f32 + 1.0, 1.0],
                reward: 1.0,
                done: i == 5,
            })
            .collect()
    }

    #[test]
    fn test_batch_layout() {
        let device = Default::default();
        let batch = TransitionBatch::<NdArray>::from_transitions(&transitions(), &device).unwrap();
        assert_eq!(batch.len(), 6);
        assert_eq!(batch.before.dims(), [6, 2]);
        assert_eq!(batch.actions.dims(), [6]);
    }

    #[test]
    fn test_invalid_discount_factor() {
        assert!(DeepQNetworkLossConfig::new().with_discount_factor(1.5).init().is_err());
    }

    #[test]
    fn test_loss_is_finite_and_non_negative() {
        let device = Default::default();
        let network = TargetNetwork::new(QNetworkConfig::new(2, vec![8], 3).init::<NdArray>(&device).unwrap());
        for double_dqn in [false, true] {
            let loss = DeepQNetworkLossConfig::new()
                .with_double_dqn(double_dqn)
                .init()
                .unwrap();
            let batch = TransitionBatch::from_transitions(&transitions(), &device).unwrap();
            let value: f32 = loss.forward(&network, batch, Reduction::Mean).into_scalar();
            assert!(value.is_finite());
            assert!(value >= 0.0);
        }
    }

    #[test]
    fn test_zero_discount_regresses_on_reward() {
        let device = Default::default();
        let network = TargetNetwork::new(QNetworkConfig::new(2, vec![8], 3).init::<NdArray>(&device).unwrap());
        let loss = DeepQNetworkLossConfig::new().with_discount_factor(0.0).init().unwrap();
        let transitions = transitions();
        let batch = TransitionBatch::from_transitions(&transitions, &device).unwrap();
        let q = network
            .online
            .forward(batch.before.clone())
            .gather(1, batch.actions.clone().unsqueeze_dim(1))
            .squeeze::<1>(1);
        let expected: f32 = (q - 1.0).powf_scalar(2.0).mean().into_scalar();
        let actual: f32 = loss.forward(&network, batch, Reduction::Mean).into_scalar();
        assert!((expected - actual).abs() < 1e-5);
    }
}
