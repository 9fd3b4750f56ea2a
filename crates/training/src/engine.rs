//! Model, optimizer and criterion bundled behind a per-batch step.

use burn::module::AutodiffModule;
use burn::nn::loss::{CrossEntropyLoss, CrossEntropyLossConfig};
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Int, Tensor};
use image_dataset::ClassificationBatch;
use models::LeNet5;

/// Loss and accuracy counts for one batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutput {
    pub loss: f32,
    pub correct: usize,
    pub total: usize,
}

pub struct Engine<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<LeNet5<B>, B>,
{
    model: LeNet5<B>,
    optimizer: O,
    criterion: CrossEntropyLoss<B>,
    device: B::Device,
}

impl<B, O> Engine<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<LeNet5<B>, B>,
{
    pub fn new(model: LeNet5<B>, optimizer: O, device: B::Device) -> Self {
        let criterion = CrossEntropyLossConfig::new().init(&device);
        Self {
            model,
            optimizer,
            criterion,
            device,
        }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn model(&self) -> &LeNet5<B> {
        &self.model
    }

    pub fn into_model(self) -> LeNet5<B> {
        self.model
    }

    /// forward -> cross-entropy -> backward -> optimizer step at `lr`.
    pub fn train_step(&mut self, batch: ClassificationBatch<B>, lr: f64) -> StepOutput {
        let model = self.model.clone();
        let total = batch.len();
        let logits = model.forward(batch.images);
        let loss = self.criterion.forward(logits.clone(), batch.labels.clone());
        let correct = correct_count(logits.detach(), batch.labels);
        let loss_value = loss.clone().detach().into_scalar().elem::<f32>();

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        self.model = self.optimizer.step(lr, model, grads);

        StepOutput {
            loss: loss_value,
            correct,
            total,
        }
    }

    /// Gradient-free evaluator over a snapshot of the current weights.
    pub fn evaluator(&self) -> Evaluator<B::InnerBackend> {
        Evaluator::new(self.model().valid(), &self.device)
    }
}

/// Forward-only loss/accuracy over test batches.
pub struct Evaluator<B: Backend> {
    model: LeNet5<B>,
    criterion: CrossEntropyLoss<B>,
}

impl<B: Backend> Evaluator<B> {
    pub fn new(model: LeNet5<B>, device: &B::Device) -> Self {
        Self {
            model,
            criterion: CrossEntropyLossConfig::new().init(device),
        }
    }

    pub fn step(&self, batch: ClassificationBatch<B>) -> StepOutput {
        let total = batch.len();
        let logits = self.model.forward(batch.images);
        let loss = self.criterion.forward(logits.clone(), batch.labels.clone());
        StepOutput {
            loss: loss.into_scalar().elem::<f32>(),
            correct: correct_count(logits, batch.labels),
            total,
        }
    }

    pub fn model(&self) -> &LeNet5<B> {
        &self.model
    }
}

/// Number of rows whose argmax matches the label.
pub fn correct_count<B: Backend>(logits: Tensor<B, 2>, labels: Tensor<B, 1, Int>) -> usize {
    logits
        .argmax(1)
        .squeeze::<1>(1)
        .equal(labels)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::Autodiff;
    use burn::optim::SgdConfig;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;
    use models::LeNet5Config;

    type Inner = NdArray<f32>;
    type TB = Autodiff<Inner>;

    #[test]
    fn correct_count_matches_argmax() {
        let device = Default::default();
        let logits = Tensor::<Inner, 2>::from_floats(
            [[0.1, 0.9, 0.0], [2.0, 0.0, 1.0], [0.0, 0.0, 3.0]],
            &device,
        );
        let labels =
            Tensor::<Inner, 1, Int>::from_ints(TensorData::new(vec![1i64, 2, 2], [3]), &device);
        assert_eq!(correct_count(logits, labels), 2);
    }

    #[test]
    fn train_step_reports_finite_loss() {
        let device = Default::default();
        let model = LeNet5Config::default().init::<TB>(&device);
        let optim = SgdConfig::new().init();
        let mut engine = Engine::new(model, optim, device);

        let images = Tensor::<TB, 4>::ones([2, 1, 32, 32], &device);
        let labels =
            Tensor::<TB, 1, Int>::from_ints(TensorData::new(vec![3i64, 7], [2]), &device);
        let out = engine.train_step(ClassificationBatch { images, labels }, 0.01);
        assert!(out.loss.is_finite());
        assert_eq!(out.total, 2);
        assert!(out.correct <= 2);

        let eval = engine.evaluator();
        let images = Tensor::<Inner, 4>::zeros([3, 1, 32, 32], &device);
        let labels =
            Tensor::<Inner, 1, Int>::from_ints(TensorData::new(vec![0i64, 1, 2], [3]), &device);
        let out = eval.step(ClassificationBatch { images, labels });
        assert_eq!(out.total, 3);
        assert!(out.loss.is_finite());
    }
}
