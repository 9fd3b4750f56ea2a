//! Shared run assembly for both modes: loaders, model, optimizer, hooks.

use crate::config::{OptimizerKind, RunConfig};
use crate::engine::Engine;
use crate::error::TrainResult;
use crate::hooks::{
    AccuracyHook, LogMemoryByEpochHook, LogMetricByEpochHook, LogTimingByEpochHook, LossHook,
    LrSchedulerHook, SaveCheckpointHook, ScalarExportHook, TrainerHook,
};
use crate::optim::{adam_config, sgd_config};
use crate::trainer::{FitOptions, FitSummary, Trainer};
use burn::optim::Optimizer;
use burn::tensor::backend::{AutodiffBackend, Backend};
use image_dataset::{DataLoader, ImageSource, ImageTransform, LoaderConfig, MnistSource, Split};
use models::{LeNet5, LeNet5Config};
use std::path::PathBuf;
use std::sync::Arc;

/// Train and test splits.
#[derive(Clone)]
pub struct DataSources {
    pub train: Arc<dyn ImageSource>,
    pub test: Arc<dyn ImageSource>,
}

impl DataSources {
    pub fn new(train: Arc<dyn ImageSource>, test: Arc<dyn ImageSource>) -> Self {
        Self { train, test }
    }

    /// MNIST through burn-dataset (downloaded and cached on first use).
    pub fn mnist() -> Self {
        Self {
            train: Arc::new(MnistSource::new(Split::Train)),
            test: Arc::new(MnistSource::new(Split::Test)),
        }
    }
}

/// Everything a mode needs besides the model and optimizer.
pub struct RunContext {
    pub cfg: RunConfig,
    pub train: DataLoader,
    pub test: DataLoader,
}

impl RunContext {
    pub fn build(cfg: &RunConfig, sources: DataSources) -> TrainResult<Self> {
        cfg.validate()?;
        let transform = ImageTransform::default();
        let train = DataLoader::new(
            sources.train,
            transform,
            LoaderConfig {
                seed: cfg.seed,
                num_workers: cfg.num_workers,
                max_batches: cfg.max_train_batches,
                ..LoaderConfig::train(cfg.batch_size)
            },
        )?;
        let test = DataLoader::new(
            sources.test,
            transform,
            LoaderConfig {
                num_workers: cfg.num_workers,
                max_batches: cfg.max_test_batches,
                ..LoaderConfig::eval(cfg.batch_size)
            },
        )?;
        Ok(Self {
            cfg: cfg.clone(),
            train,
            test,
        })
    }

    pub fn log_dir(&self) -> PathBuf {
        self.cfg.log_dir()
    }

    pub fn fit_options(&self) -> FitOptions {
        FitOptions {
            epochs: self.cfg.epochs,
            test_interval: self.cfg.test_interval,
            initial_lr: self.cfg.optimizer_params.lr,
        }
    }

    /// Observers for a run, in the order they are registered.
    pub fn default_hooks<B: AutodiffBackend>(&self) -> Vec<Box<dyn TrainerHook<B>>> {
        let cfg = &self.cfg;
        let mut hooks: Vec<Box<dyn TrainerHook<B>>> = vec![
            Box::new(LossHook::new()),
            Box::new(AccuracyHook::new()),
            Box::new(LrSchedulerHook::new(
                cfg.schedule.clone(),
                cfg.optimizer_params.lr,
                cfg.schedule_by_epoch,
            )),
            Box::new(LogMetricByEpochHook),
            Box::new(LogMemoryByEpochHook::new()),
            Box::new(LogTimingByEpochHook),
            Box::new(ScalarExportHook::new(cfg.log_dir())),
        ];
        if let Some(dir) = &cfg.checkpoint_dir {
            hooks.push(Box::new(SaveCheckpointHook::new(dir.clone())));
        }
        hooks
    }
}

#[derive(Debug)]
pub struct RunReport<B: Backend> {
    pub log_dir: PathBuf,
    pub summary: FitSummary,
    pub model: LeNet5<B>,
}

/// Builds a fresh model and optimizer for `cfg` and trains it to the epoch budget.
pub fn run<B: AutodiffBackend>(
    cfg: &RunConfig,
    sources: DataSources,
    device: &B::Device,
) -> TrainResult<RunReport<B>> {
    let ctx = RunContext::build(cfg, sources)?;
    if let Some(seed) = cfg.seed {
        B::seed(seed);
    }
    let model = LeNet5Config::new(cfg.n_classes).init::<B>(device);

    tracing::info!(
        mode = ?cfg.mode,
        optimizer = %cfg.optimizer,
        lr = cfg.optimizer_params.lr,
        schedule = cfg.schedule.name(),
        epochs = cfg.epochs,
        batch_size = cfg.batch_size,
        log_dir = %ctx.log_dir().display(),
        "run configured"
    );

    match cfg.optimizer {
        OptimizerKind::Sgd => {
            let optim = sgd_config(&cfg.optimizer_params).init::<B, LeNet5<B>>();
            fit_with(&ctx, model, optim, device)
        }
        OptimizerKind::Adam => {
            let optim = adam_config(&cfg.optimizer_params).init::<B, LeNet5<B>>();
            fit_with(&ctx, model, optim, device)
        }
    }
}

fn fit_with<B, O>(
    ctx: &RunContext,
    model: LeNet5<B>,
    optim: O,
    device: &B::Device,
) -> TrainResult<RunReport<B>>
where
    B: AutodiffBackend,
    O: Optimizer<LeNet5<B>, B>,
{
    let engine = Engine::new(model, optim, device.clone());
    let mut trainer = Trainer::new(engine).with_hooks(ctx.default_hooks::<B>());
    let summary = trainer.fit(&ctx.train, Some(&ctx.test), ctx.fit_options())?;
    Ok(RunReport {
        log_dir: ctx.log_dir(),
        summary,
        model: trainer.into_engine().into_model(),
    })
}
