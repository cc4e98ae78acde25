use burn::{
    nn::{Dropout, DropoutConfig, LeakyRelu, LeakyReluConfig, Linear, LinearConfig},
    prelude::*,
};

use crate::{Error};

#[derive(Config, Debug)]
pub struct MultiLayerPerceptronConfig {
    /// `(input size, hidden sizes..., output size)`
    pub sizes: Vec<usize>,
    #[config(default = 0.0)]
    pub dropout: f64,
}

/// Fully connected stack with leaky-relu (and optional dropout) between
/// layers. The last layer is linear.
#[derive(Module, Debug)]
pub struct MultiLayerPerceptron<B: Backend> {
    layers: Vec<Linear<B>>,
    activation: LeakyRelu,
    dropout: Dropout,
}

impl MultiLayerPerceptronConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::Result<MultiLayerPerceptron<B>> {
        if self.sizes.len() < 2 || self.sizes.contains(&0) {
            return Err(Error::Config(format!(
                "a perceptron needs at least an input and an output size, all positive, got {:?}",
                self.sizes
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::Config(format!("dropout must be in [0, 1), got {}", self.dropout)));
        }

        let layers = self
            .sizes
            .windows(2)
            .map(|pair| LinearConfig::new(pair[0], pair[1]).init(device))
            .collect();
        Ok(MultiLayerPerceptron {
            layers,
            activation: LeakyReluConfig::new().init(),
            dropout: DropoutConfig::new(self.dropout).init(),
        })
    }
}

impl<B: Backend> MultiLayerPerceptron<B> {
    pub fn forward<const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        let Some((last, hidden)) = self.layers.split_last() else {
            return input;
        };
        let mut x = input;
        for layer in hidden {
            x = layer.forward(x);
            x = self.activation.forward(x);
            x = self.dropout.forward(x);
        }
        last.forward(x)
    }
}
