//! Burn model definitions for the LeNet5 training workspace.
//!
//! `LeNet5` is a pure Burn module with a fixed topology:
//! - two conv (5x5) + tanh + 2x2 average-pool stages (1 -> 6 -> 16 channels),
//! - a third 5x5 conv (16 -> 120) that collapses a 32x32 input to 1x1,
//! - a 120 -> 84 -> `n_classes` classifier head with tanh in between.
//!
//! `forward` returns raw logits. Callers that need a probability distribution
//! use `forward_with_probs`.

use burn::module::Module;
use burn::nn;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AvgPool2d, AvgPool2dConfig};
use burn::tensor::activation::{softmax, tanh};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Side length of the square single-channel input the topology expects.
pub const INPUT_SIZE: usize = 32;
/// Number of input channels.
pub const INPUT_CHANNELS: usize = 1;

#[derive(Debug, Clone, Copy)]
pub struct LeNet5Config {
    pub n_classes: usize,
}

impl Default for LeNet5Config {
    fn default() -> Self {
        Self { n_classes: 10 }
    }
}

impl LeNet5Config {
    pub fn new(n_classes: usize) -> Self {
        Self { n_classes }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> LeNet5<B> {
        LeNet5::new(*self, device)
    }
}

#[derive(Debug, Module)]
pub struct LeNet5<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv3: Conv2d<B>,
    pool: AvgPool2d,
    fc1: nn::Linear<B>,
    fc2: nn::Linear<B>,
    n_classes: usize,
}

impl<B: Backend> LeNet5<B> {
    pub fn new(cfg: LeNet5Config, device: &B::Device) -> Self {
        let n_classes = cfg.n_classes.max(1);
        let conv1 = Conv2dConfig::new([INPUT_CHANNELS, 6], [5, 5]).init(device);
        let conv2 = Conv2dConfig::new([6, 16], [5, 5]).init(device);
        let conv3 = Conv2dConfig::new([16, 120], [5, 5]).init(device);
        // Non-overlapping 2x2 windows.
        let pool = AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init();
        let fc1 = nn::LinearConfig::new(120, 84).init(device);
        let fc2 = nn::LinearConfig::new(84, n_classes).init(device);
        Self {
            conv1,
            conv2,
            conv3,
            pool,
            fc1,
            fc2,
            n_classes,
        }
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Feature extractor: [B, 1, 32, 32] -> [B, 120].
    pub fn features(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.pool.forward(tanh(self.conv1.forward(input)));
        let x = self.pool.forward(tanh(self.conv2.forward(x)));
        let x = tanh(self.conv3.forward(x));
        x.flatten(1, 3)
    }

    /// Logits with shape [B, n_classes].
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.features(input);
        let x = tanh(self.fc1.forward(x));
        self.fc2.forward(x)
    }

    /// Logits plus their softmax over the class dimension.
    pub fn forward_with_probs(&self, input: Tensor<B, 4>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let logits = self.forward(input);
        let probs = softmax(logits.clone(), 1);
        (logits, probs)
    }
}

pub mod prelude {
    pub use super::{LeNet5, LeNet5Config, INPUT_CHANNELS, INPUT_SIZE};
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn feature_extractor_collapses_to_120() {
        let device = Default::default();
        let model = LeNet5Config::default().init::<TestBackend>(&device);
        let input = Tensor::<TestBackend, 4>::zeros([3, 1, 32, 32], &device);
        assert_eq!(model.features(input).dims(), [3, 120]);
    }

    #[test]
    fn zero_classes_is_clamped() {
        let device = Default::default();
        let model = LeNet5Config::new(0).init::<TestBackend>(&device);
        assert_eq!(model.n_classes(), 1);
    }
}
