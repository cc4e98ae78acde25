use burn::{
    prelude::*,
    tensor::activation::{log_softmax, softmax},
};

/// Advantage actor-critic objective over a flattened `[timestep * agent]`
/// batch. Entries with a zero mask (agents already done) do not contribute.
#[derive(Config, Debug)]
pub struct ActorCriticLossConfig {
    #[config(default = 0.01)]
    pub entropy_weight: f64,
    #[config(default = 0.5)]
    pub value_weight: f64,
}

impl ActorCriticLossConfig {
    pub fn init(&self) -> ActorCriticLoss {
        ActorCriticLoss {
            entropy_weight: self.entropy_weight,
            value_weight: self.value_weight,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActorCriticLoss {
    entropy_weight: f64,
    value_weight: f64,
}

pub struct ActorCriticLossOutput<B: Backend> {
    pub actor: Tensor<B, 1>,
    pub critic: Tensor<B, 1>,
    pub entropy: Tensor<B, 1>,
    /// `actor + value_weight * critic - entropy_weight * entropy`
    pub total: Tensor<B, 1>,
}

impl ActorCriticLoss {
    pub fn forward<B: Backend>(
        &self,
        logits: Tensor<B, 2>,
        values: Tensor<B, 1>,
        actions: Tensor<B, 1, Int>,
        advantages: Tensor<B, 1>,
        returns: Tensor<B, 1>,
        mask: Tensor<B, 1>,
    ) -> ActorCriticLossOutput<B> {
        let count = mask.clone().sum().clamp_min(1.0);
        let log_probs = log_softmax(logits.clone(), 1);
        let chosen = log_probs.clone().gather(1, actions.unsqueeze_dim(1)).squeeze(1);

        let actor = (chosen * advantages * mask.clone()).sum().neg() / count.clone();
        let entropy = (softmax(logits, 1) * log_probs).sum_dim(1).squeeze::<1>(1).neg();
        let entropy = (entropy * mask.clone()).sum() / count.clone();
        let critic = ((returns - values).powf_scalar(2.0) * mask).sum() / count;

        let total = actor.clone() + critic.clone() * self.value_weight - entropy.clone() * self.entropy_weight;
        ActorCriticLossOutput {
            actor,
            critic,
            entropy,
            total,
        }
    }
}
