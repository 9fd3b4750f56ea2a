#![recursion_limit = "256"]
//! LeNet5 training on MNIST: optimizer and schedule selection, the learning-rate
//! range test, and a hook-driven trainer.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod optim;
pub mod run;
pub mod schedule;
pub mod timer;
pub mod trainer;

pub use cli::{run_train, validate_backend_choice, BackendKind, TrainArgs};
pub use config::{
    format_rate, ConfigOverrides, Mode, OptimizerKind, OptimizerParams, RunConfig, RunFlags,
    ScheduleKind, CONFIG_ENV,
};
pub use engine::{Engine, Evaluator, StepOutput};
pub use error::{ConfigError, TrainError, TrainResult};
pub use hooks::{HookContext, TrainerHook};
pub use models::{LeNet5, LeNet5Config};
pub use run::{run, DataSources, RunContext, RunReport};
pub use schedule::{LrSchedule, Schedule, Scheduler};
pub use trainer::{FitOptions, FitSummary, Trainer, TrainerState};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;

pub type ADBackend = burn::backend::Autodiff<TrainBackend>;
