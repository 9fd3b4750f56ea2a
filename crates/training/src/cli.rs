use crate::config::{ConfigOverrides, RunConfig, RunFlags};
use crate::run::{run, DataSources};
use crate::{ADBackend, TrainBackend};
use burn::tensor::backend::Backend;
use clap::{Parser, ValueEnum};
use cli_support::LoggingArgs;
use std::path::PathBuf;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "train",
    about = "Train LeNet5 on MNIST, or sweep the learning rate with a range test"
)]
pub struct TrainArgs {
    /// `test` runs the learning-rate range test; anything else trains.
    #[arg(long, default_value = "test")]
    pub process: String,
    /// Optimizer: SGD or ADAM.
    #[arg(long, default_value = "SGD")]
    pub optimizer: String,
    /// Schedule for training: MultiStepLR or CosineAnnealingLR.
    #[arg(long, default_value = "MultiStepLR")]
    pub scheduler: String,
    /// Milestone preset: `uniform` or anything else for the front-loaded preset.
    #[arg(long = "MS_int", default_value = "uniform")]
    pub ms_int: String,
    /// Cosine annealing period, in schedule steps.
    #[arg(long = "Cos_int", default_value_t = 10)]
    pub cos_int: usize,
    /// Base learning rate for training.
    #[arg(long = "LR", default_value_t = 0.1)]
    pub lr: f64,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// TOML file overriding batch size, epochs, output paths and limits.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Seed for weight init and shuffling.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Save a checkpoint into this directory after every epoch.
    #[arg(long)]
    pub checkpoint_dir: Option<PathBuf>,
    /// Parent directory for the run's log directory.
    #[arg(long)]
    pub log_root: Option<PathBuf>,
    #[command(flatten)]
    pub logging: LoggingArgs,
}

impl TrainArgs {
    pub fn flags(&self) -> RunFlags<'_> {
        RunFlags {
            process: &self.process,
            optimizer: &self.optimizer,
            scheduler: &self.scheduler,
            ms_int: &self.ms_int,
            cos_int: self.cos_int,
            lr: self.lr,
        }
    }

    /// Flags, then the TOML overlay found by `--config` or `LENET_TRAIN_CONFIG`,
    /// then explicit path/seed flags.
    pub fn to_run_config(&self) -> anyhow::Result<RunConfig> {
        let overrides = ConfigOverrides::discover(self.config.as_deref())?;
        self.resolve(overrides.as_ref())
    }

    /// Same as [`Self::to_run_config`] with the overlay supplied by the caller;
    /// nothing is read from disk or the environment.
    pub fn resolve(&self, overrides: Option<&ConfigOverrides>) -> anyhow::Result<RunConfig> {
        let mut cfg = RunConfig::from_flags(&self.flags())?;
        if let Some(overrides) = overrides {
            cfg.apply_overrides(overrides);
        }
        if let Some(seed) = self.seed {
            cfg.seed = Some(seed);
        }
        if let Some(dir) = &self.checkpoint_dir {
            cfg.checkpoint_dir = Some(dir.clone());
        }
        if let Some(root) = &self.log_root {
            cfg.log_root = root.clone();
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            tracing::warn!("built with backend-wgpu; running on WGPU despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    validate_backend_choice(args.backend)?;
    let cfg = args.to_run_config()?;

    let device = <TrainBackend as Backend>::Device::default();
    let report = run::<ADBackend>(&cfg, DataSources::mnist(), &device)?;

    let last = report.summary.last_epoch();
    println!(
        "{} finished: {} epochs, {} steps, final lr {:.6e}, logs in {}",
        cfg.run_name,
        report.summary.epochs,
        report.summary.global_steps,
        report.summary.final_lr,
        report.log_dir.display()
    );
    if let Some(acc) = last.and_then(|e| e.test.get(crate::hooks::METRIC_ACCURACY)) {
        println!("test accuracy {:.4}", acc);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_keep_mixed_case_spellings() {
        let args = TrainArgs::parse_from([
            "train",
            "--process",
            "train",
            "--optimizer",
            "ADAM",
            "--scheduler",
            "CosineAnnealingLR",
            "--Cos_int",
            "10",
            "--LR",
            "0.05",
        ]);
        assert_eq!(args.cos_int, 10);
        assert_eq!(args.lr, 0.05);
        assert_eq!(args.ms_int, "uniform");
        let cfg = args.resolve(None).unwrap();
        assert_eq!(cfg.run_name, "tb_logs_ADAM_CosineAnnealingLR_10_0.05_train");
    }

    #[test]
    fn defaults_select_sgd_range_test() {
        let args = TrainArgs::parse_from(["train"]);
        assert_eq!(args.process, "test");
        assert_eq!(args.optimizer, "SGD");
        assert_eq!(args.scheduler, "MultiStepLR");
        assert_eq!(args.backend, BackendKind::NdArray);
    }

    #[test]
    fn explicit_flags_win_over_overlay() {
        let args = TrainArgs::parse_from(["train", "--seed", "4", "--log-root", "out"]);
        let overrides =
            ConfigOverrides::from_toml("seed = 9\nlog_root = \"runs\"\nepochs = 2").unwrap();
        let cfg = args.resolve(Some(&overrides)).unwrap();
        assert_eq!(cfg.seed, Some(4));
        assert_eq!(cfg.epochs, 2);
        assert_eq!(cfg.log_dir(), PathBuf::from("out/tb_logs_SGD_test"));

        let cfg = args.resolve(None).unwrap();
        assert_eq!(cfg.epochs, 5);
    }

    #[test]
    fn unknown_optimizer_is_an_error() {
        let args = TrainArgs::parse_from(["train", "--optimizer", "RMSProp"]);
        let err = args.resolve(None).unwrap_err();
        assert!(err.to_string().contains("RMSProp"));
    }
}
