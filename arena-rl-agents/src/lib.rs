pub mod a2c;
pub mod dqn;
pub mod hyperparameters;
pub mod off_policy;
pub mod run;

use burn::{
    grad_clipping::GradientClippingConfig,
    module::AutodiffModule,
    optim::{AdamConfig, Optimizer},
    tensor::backend::AutodiffBackend,
};

/// Adam with gradient-norm clipping.
pub fn adam<B, M>(grad_clip_norm: f32) -> impl Optimizer<M, B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    AdamConfig::new()
        .with_grad_clipping(Some(GradientClippingConfig::Norm(grad_clip_norm)))
        .init()
}
