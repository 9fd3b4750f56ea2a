//! Run configuration shared by the range-test and training modes.
//!
//! `RunConfig` is the single description of a run: mode, loader sizing, epoch
//! budget, optimizer, schedule and output locations. It is built from CLI flags
//! and can be overlaid by a TOML file (`--config` or `LENET_TRAIN_CONFIG`).

use crate::error::ConfigError;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const CONFIG_ENV: &str = "LENET_TRAIN_CONFIG";
pub const DEFAULT_BATCH_SIZE: usize = 128;
pub const RANGE_TEST_EPOCHS: usize = 5;
pub const TRAIN_EPOCHS: usize = 30;
pub const WEIGHT_DECAY: f32 = 5e-4;
pub const SGD_MOMENTUM: f64 = 0.9;
pub const MILESTONE_GAMMA: f64 = 0.2;
pub const RANGE_TEST_MIN_LR: f64 = 1e-5;
pub const RANGE_TEST_MAX_LR: f64 = 10.0;
pub const UNIFORM_MILESTONES: [usize; 4] = [3000, 6000, 9000, 12000];
pub const FRONT_LOADED_MILESTONES: [usize; 4] = [500, 1500, 4500, 13500];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Learning-rate range test.
    RangeTest,
    /// Full training with a decaying schedule.
    Train,
}

impl Mode {
    /// `"test"` selects the range test; every other value trains.
    pub fn from_process(process: &str) -> Self {
        if process == "test" {
            Mode::RangeTest
        } else {
            Mode::Train
        }
    }

    pub fn default_epochs(&self) -> usize {
        match self {
            Mode::RangeTest => RANGE_TEST_EPOCHS,
            Mode::Train => TRAIN_EPOCHS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerKind {
    Sgd,
    Adam,
}

impl OptimizerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizerKind::Sgd => "SGD",
            OptimizerKind::Adam => "ADAM",
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SGD" => Ok(OptimizerKind::Sgd),
            "ADAM" => Ok(OptimizerKind::Adam),
            other => Err(ConfigError::UnknownOptimizer(other.to_string())),
        }
    }
}

/// Hyperparameters handed to the optimizer constructor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerParams {
    pub lr: f64,
    /// SGD only.
    pub momentum: f64,
    pub weight_decay: f32,
}

impl OptimizerParams {
    /// Fixed starting rates used by the range test.
    pub fn range_test(kind: OptimizerKind) -> Self {
        let lr = match kind {
            OptimizerKind::Sgd => 0.2,
            OptimizerKind::Adam => 0.01,
        };
        Self::with_lr(lr)
    }

    pub fn with_lr(lr: f64) -> Self {
        Self {
            lr,
            momentum: SGD_MOMENTUM,
            weight_decay: WEIGHT_DECAY,
        }
    }
}

/// Named schedule flag values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerName {
    MultiStepLR,
    CosineAnnealingLR,
}

impl SchedulerName {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerName::MultiStepLR => "MultiStepLR",
            SchedulerName::CosineAnnealingLR => "CosineAnnealingLR",
        }
    }
}

impl FromStr for SchedulerName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MultiStepLR" => Ok(SchedulerName::MultiStepLR),
            "CosineAnnealingLR" => Ok(SchedulerName::CosineAnnealingLR),
            other => Err(ConfigError::UnknownScheduler(other.to_string())),
        }
    }
}

/// `"uniform"` spreads the decays evenly; anything else front-loads them.
pub fn milestone_preset(flag: &str) -> Vec<usize> {
    if flag == "uniform" {
        UNIFORM_MILESTONES.to_vec()
    } else {
        FRONT_LOADED_MILESTONES.to_vec()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleKind {
    /// Geometric sweep from `min_lr` to `max_lr` across the whole run.
    RangeTest { min_lr: f64, max_lr: f64 },
    /// Multiply by `gamma` at each milestone step. `preset` is the `--MS_int`
    /// value the milestones came from and names the log directory.
    MultiStep {
        preset: String,
        milestones: Vec<usize>,
        gamma: f64,
    },
    /// Half-cosine from the base rate to `eta_min` over `t_max` steps.
    CosineAnnealing { t_max: usize, eta_min: f64 },
}

impl ScheduleKind {
    pub fn range_test() -> Self {
        ScheduleKind::RangeTest {
            min_lr: RANGE_TEST_MIN_LR,
            max_lr: RANGE_TEST_MAX_LR,
        }
    }

    pub fn multi_step(preset_flag: &str) -> Self {
        ScheduleKind::MultiStep {
            preset: preset_flag.to_string(),
            milestones: milestone_preset(preset_flag),
            gamma: MILESTONE_GAMMA,
        }
    }

    pub fn cosine(t_max: usize) -> Self {
        ScheduleKind::CosineAnnealing {
            t_max,
            eta_min: 0.0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScheduleKind::RangeTest { .. } => "RangeTest",
            ScheduleKind::MultiStep { .. } => SchedulerName::MultiStepLR.as_str(),
            ScheduleKind::CosineAnnealing { .. } => SchedulerName::CosineAnnealingLR.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub mode: Mode,
    pub batch_size: usize,
    pub epochs: usize,
    pub n_classes: usize,
    pub optimizer: OptimizerKind,
    pub optimizer_params: OptimizerParams,
    pub schedule: ScheduleKind,
    /// Step the schedule once per epoch instead of once per batch.
    pub schedule_by_epoch: bool,
    /// Parent of the run's log directory.
    pub log_root: PathBuf,
    /// Leaf name of the run's log directory, derived from the flags.
    pub run_name: String,
    pub seed: Option<u64>,
    pub num_workers: usize,
    /// Evaluate every `test_interval` epochs.
    pub test_interval: usize,
    pub checkpoint_dir: Option<PathBuf>,
    pub max_train_batches: Option<usize>,
    pub max_test_batches: Option<usize>,
}

impl RunConfig {
    fn base(
        mode: Mode,
        optimizer: OptimizerKind,
        params: OptimizerParams,
        schedule: ScheduleKind,
        run_name: String,
    ) -> Self {
        Self {
            mode,
            batch_size: DEFAULT_BATCH_SIZE,
            epochs: mode.default_epochs(),
            n_classes: 10,
            optimizer,
            optimizer_params: params,
            schedule,
            schedule_by_epoch: false,
            log_root: PathBuf::from("."),
            run_name,
            seed: None,
            num_workers: 1,
            test_interval: 1,
            checkpoint_dir: None,
            max_train_batches: None,
            max_test_batches: None,
        }
    }

    /// Range test: fixed optimizer rate, geometric sweep, 5 epochs.
    pub fn range_test(optimizer: OptimizerKind) -> Self {
        Self::base(
            Mode::RangeTest,
            optimizer,
            OptimizerParams::range_test(optimizer),
            ScheduleKind::range_test(),
            format!("tb_logs_{optimizer}_test"),
        )
    }

    /// Full training run with the caller's base rate and schedule.
    pub fn training(optimizer: OptimizerKind, schedule: ScheduleKind, lr: f64) -> Self {
        let rate = format_rate(lr);
        let run_name = match &schedule {
            ScheduleKind::CosineAnnealing { t_max, .. } => {
                format!("tb_logs_{optimizer}_CosineAnnealingLR_{t_max}_{rate}_train")
            }
            ScheduleKind::MultiStep { preset, .. } => {
                format!("tb_logs_{optimizer}_MultiStepLR_{preset}_{rate}_train")
            }
            ScheduleKind::RangeTest { .. } => format!("tb_logs_{optimizer}_RangeTest_{rate}_train"),
        };
        Self::base(
            Mode::Train,
            optimizer,
            OptimizerParams::with_lr(lr),
            schedule,
            run_name,
        )
    }

    /// Builds a config from the raw flag strings, resolving names in the same
    /// order as the CLI: optimizer first, then (training only) scheduler.
    pub fn from_flags(flags: &RunFlags<'_>) -> Result<Self, ConfigError> {
        let mode = Mode::from_process(flags.process);
        let optimizer: OptimizerKind = flags.optimizer.parse()?;
        let cfg = match mode {
            Mode::RangeTest => Self::range_test(optimizer),
            Mode::Train => {
                let name: SchedulerName = flags.scheduler.parse()?;
                let schedule = match name {
                    SchedulerName::MultiStepLR => ScheduleKind::multi_step(flags.ms_int),
                    SchedulerName::CosineAnnealingLR => ScheduleKind::cosine(flags.cos_int),
                };
                Self::training(optimizer, schedule, flags.lr)
            }
        };
        Ok(cfg)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_root.join(&self.run_name)
    }

    pub fn apply_overrides(&mut self, o: &ConfigOverrides) {
        if let Some(v) = o.batch_size {
            self.batch_size = v;
        }
        if let Some(v) = o.epochs {
            self.epochs = v;
        }
        if let Some(v) = &o.log_root {
            self.log_root = v.clone();
        }
        if let Some(v) = o.seed {
            self.seed = Some(v);
        }
        if let Some(v) = o.num_workers {
            self.num_workers = v;
        }
        if let Some(v) = o.test_interval {
            self.test_interval = v;
        }
        if let Some(v) = &o.checkpoint_dir {
            self.checkpoint_dir = Some(v.clone());
        }
        if let Some(v) = o.max_train_batches {
            self.max_train_batches = Some(v);
        }
        if let Some(v) = o.max_test_batches {
            self.max_test_batches = Some(v);
        }
        if let Some(v) = o.schedule_by_epoch {
            self.schedule_by_epoch = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be positive"));
        }
        if self.epochs == 0 {
            return Err(ConfigError::invalid("epochs", "must be positive"));
        }
        if self.test_interval == 0 {
            return Err(ConfigError::invalid("test_interval", "must be positive"));
        }
        if self.n_classes == 0 {
            return Err(ConfigError::invalid("n_classes", "must be positive"));
        }
        let lr = self.optimizer_params.lr;
        if !lr.is_finite() || lr <= 0.0 {
            return Err(ConfigError::invalid("lr", format!("{lr} is not a positive rate")));
        }
        if matches!(self.max_train_batches, Some(0)) {
            return Err(ConfigError::invalid("max_train_batches", "must be positive"));
        }
        match &self.schedule {
            ScheduleKind::RangeTest { min_lr, max_lr } => {
                if !(*min_lr > 0.0 && max_lr > min_lr) {
                    return Err(ConfigError::invalid(
                        "schedule",
                        format!("range test needs 0 < min_lr < max_lr, got {min_lr}..{max_lr}"),
                    ));
                }
            }
            ScheduleKind::MultiStep {
                milestones, gamma, ..
            } => {
                if milestones.windows(2).any(|w| w[0] > w[1]) {
                    return Err(ConfigError::invalid("milestones", "must be non-decreasing"));
                }
                if !gamma.is_finite() || *gamma <= 0.0 {
                    return Err(ConfigError::invalid("gamma", "must be positive"));
                }
            }
            ScheduleKind::CosineAnnealing { t_max, .. } => {
                if *t_max == 0 {
                    return Err(ConfigError::invalid("Cos_int", "period must be positive"));
                }
            }
        }
        Ok(())
    }
}

/// Shortest round-trip rendering of a rate, always with a fractional part in
/// plain form and a signed two-digit exponent outside `[1e-4, 1e16)`: log
/// directory names read `1.0` and `1e-05` rather than `1` and `0.00001`.
pub fn format_rate(lr: f64) -> String {
    if lr.is_nan() {
        return "nan".to_string();
    }
    if lr.is_infinite() {
        return if lr > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if lr == 0.0 {
        return if lr.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }
    // `{:e}` gives the shortest round-trip digits, e.g. `1.5e-5`.
    let sci = format!("{lr:e}");
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    if (-4..16).contains(&exp) {
        let plain = lr.to_string();
        if plain.contains('.') {
            plain
        } else {
            format!("{plain}.0")
        }
    } else {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exp.abs())
    }
}

/// Raw flag values, before name resolution.
#[derive(Debug, Clone, Copy)]
pub struct RunFlags<'a> {
    pub process: &'a str,
    pub optimizer: &'a str,
    pub scheduler: &'a str,
    pub ms_int: &'a str,
    pub cos_int: usize,
    pub lr: f64,
}

impl Default for RunFlags<'_> {
    fn default() -> Self {
        Self {
            process: "test",
            optimizer: "SGD",
            scheduler: "MultiStepLR",
            ms_int: "uniform",
            cos_int: 10,
            lr: 0.1,
        }
    }
}

/// Optional TOML overlay. Every field is optional; absent fields keep the flag-derived value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    pub batch_size: Option<usize>,
    pub epochs: Option<usize>,
    pub log_root: Option<PathBuf>,
    pub seed: Option<u64>,
    pub num_workers: Option<usize>,
    pub test_interval: Option<usize>,
    pub checkpoint_dir: Option<PathBuf>,
    pub max_train_batches: Option<usize>,
    pub max_test_batches: Option<usize>,
    pub schedule_by_epoch: Option<bool>,
}

impl ConfigOverrides {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Explicit path first, then `LENET_TRAIN_CONFIG`. No file is not an error.
    pub fn discover(explicit: Option<&Path>) -> Result<Option<Self>, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_path(path).map(Some);
        }
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_path(Path::new(&path)).map(Some),
            _ => Ok(None),
        }
    }
}
