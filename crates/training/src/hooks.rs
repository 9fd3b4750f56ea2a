//! Trainer hooks.
//!
//! Hooks observe the loop at fixed points and run in ascending `priority()`.
//! Accumulators (loss, accuracy, lr) run first and publish into
//! `state.metrics`; loggers and exporters run last and read what was published.

use crate::config::ScheduleKind;
use crate::engine::StepOutput;
use crate::error::{TrainError, TrainResult};
use crate::schedule::{build_schedule, Scheduler};
use crate::trainer::{
    Phase, TrainerState, TIMER_TEST_EPOCH, TIMER_TRAIN_EPOCH, TIMER_TRAIN_STEP,
};
use burn::lr_scheduler::LrScheduler;
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::AutodiffBackend;
use models::LeNet5;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use sysinfo::{ProcessesToUpdate, System};

pub const PRIORITY_ACCUMULATE: i32 = 0;
pub const PRIORITY_SCHEDULE: i32 = 1;
pub const PRIORITY_LOG: i32 = 10;

pub const METRIC_LOSS: &str = "loss";
pub const METRIC_ACCURACY: &str = "accuracy";
pub const METRIC_LR: &str = "lr";

pub struct HookContext<'a, B: AutodiffBackend> {
    pub state: &'a mut TrainerState,
    pub model: &'a LeNet5<B>,
}

/// Every callback defaults to a no-op.
pub trait TrainerHook<B: AutodiffBackend>: Send {
    fn before_train(&mut self, _ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        Ok(())
    }

    fn after_train(&mut self, _ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        Ok(())
    }

    fn before_train_epoch(&mut self, _ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        Ok(())
    }

    fn after_train_epoch(&mut self, _ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        Ok(())
    }

    fn before_train_iter(&mut self, _ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        Ok(())
    }

    fn after_train_iter(
        &mut self,
        _ctx: &mut HookContext<'_, B>,
        _out: &StepOutput,
    ) -> TrainResult<()> {
        Ok(())
    }

    fn before_test_epoch(&mut self, _ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        Ok(())
    }

    fn after_test_epoch(&mut self, _ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        Ok(())
    }

    fn before_test_iter(&mut self, _ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        Ok(())
    }

    fn after_test_iter(
        &mut self,
        _ctx: &mut HookContext<'_, B>,
        _out: &StepOutput,
    ) -> TrainResult<()> {
        Ok(())
    }

    /// Lower runs first.
    fn priority(&self) -> i32 {
        PRIORITY_LOG
    }

    fn name(&self) -> &'static str;
}

/// Sample-weighted running mean.
#[derive(Debug, Default, Clone, Copy)]
struct Running {
    sum: f64,
    count: usize,
}

impl Running {
    fn add(&mut self, value: f64, weight: usize) {
        self.sum += value * weight as f64;
        self.count += weight;
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Mean cross-entropy per pass, published as `loss`.
#[derive(Debug, Default)]
pub struct LossHook {
    running: Running,
}

impl LossHook {
    pub fn new() -> Self {
        Self::default()
    }

    fn publish(&self, state: &mut TrainerState) {
        if let Some(mean) = self.running.mean() {
            state.publish(METRIC_LOSS, mean);
        }
    }
}

impl<B: AutodiffBackend> TrainerHook<B> for LossHook {
    fn before_train_epoch(&mut self, _ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        self.running = Running::default();
        Ok(())
    }

    fn after_train_iter(&mut self, _ctx: &mut HookContext<'_, B>, out: &StepOutput) -> TrainResult<()> {
        self.running.add(out.loss as f64, out.total);
        Ok(())
    }

    fn after_train_epoch(&mut self, ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        self.publish(ctx.state);
        Ok(())
    }

    fn before_test_epoch(&mut self, _ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        self.running = Running::default();
        Ok(())
    }

    fn after_test_iter(&mut self, _ctx: &mut HookContext<'_, B>, out: &StepOutput) -> TrainResult<()> {
        self.running.add(out.loss as f64, out.total);
        Ok(())
    }

    fn after_test_epoch(&mut self, ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        self.publish(ctx.state);
        Ok(())
    }

    fn priority(&self) -> i32 {
        PRIORITY_ACCUMULATE
    }

    fn name(&self) -> &'static str {
        "LossHook"
    }
}

/// Argmax accuracy per pass, published as `accuracy` in [0, 1].
#[derive(Debug, Default)]
pub struct AccuracyHook {
    correct: usize,
    total: usize,
}

impl AccuracyHook {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.correct = 0;
        self.total = 0;
    }

    fn publish(&self, state: &mut TrainerState) {
        if self.total > 0 {
            state.publish(METRIC_ACCURACY, self.correct as f64 / self.total as f64);
        }
    }
}

impl<B: AutodiffBackend> TrainerHook<B> for AccuracyHook {
    fn before_train_epoch(&mut self, _ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        self.reset();
        Ok(())
    }

    fn after_train_iter(&mut self, _ctx: &mut HookContext<'_, B>, out: &StepOutput) -> TrainResult<()> {
        self.correct += out.correct;
        self.total += out.total;
        Ok(())
    }

    fn after_train_epoch(&mut self, ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        self.publish(ctx.state);
        Ok(())
    }

    fn before_test_epoch(&mut self, _ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        self.reset();
        Ok(())
    }

    fn after_test_iter(&mut self, _ctx: &mut HookContext<'_, B>, out: &StepOutput) -> TrainResult<()> {
        self.correct += out.correct;
        self.total += out.total;
        Ok(())
    }

    fn after_test_epoch(&mut self, ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        self.publish(ctx.state);
        Ok(())
    }

    fn priority(&self) -> i32 {
        PRIORITY_ACCUMULATE
    }

    fn name(&self) -> &'static str {
        "AccuracyHook"
    }
}

/// Owns the schedule and drives `state.lr`.
///
/// The schedule is built in `before_train`, once the run length is known. With
/// `by_epoch = false` it advances after every train batch, otherwise after
/// every train epoch.
pub struct LrSchedulerHook {
    kind: ScheduleKind,
    base_lr: f64,
    by_epoch: bool,
    scheduler: Option<Scheduler>,
}

impl LrSchedulerHook {
    pub fn new(kind: ScheduleKind, base_lr: f64, by_epoch: bool) -> Self {
        Self {
            kind,
            base_lr,
            by_epoch,
            scheduler: None,
        }
    }

    fn advance(&mut self, state: &mut TrainerState) {
        if let Some(s) = self.scheduler.as_mut() {
            state.lr = LrScheduler::step(s);
        }
    }
}

impl<B: AutodiffBackend> TrainerHook<B> for LrSchedulerHook {
    fn before_train(&mut self, ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        let total_steps = if self.by_epoch {
            ctx.state.max_epochs
        } else {
            ctx.state.max_epochs * ctx.state.steps_per_epoch
        };
        let scheduler = Scheduler::new(build_schedule(&self.kind, self.base_lr, total_steps));
        ctx.state.lr = scheduler.current_lr();
        tracing::info!(
            schedule = scheduler.name(),
            by_epoch = self.by_epoch,
            total_steps,
            initial_lr = ctx.state.lr,
            "lr schedule ready"
        );
        self.scheduler = Some(scheduler);
        Ok(())
    }

    fn after_train_iter(&mut self, ctx: &mut HookContext<'_, B>, _out: &StepOutput) -> TrainResult<()> {
        if !self.by_epoch {
            self.advance(ctx.state);
        }
        Ok(())
    }

    fn after_train_epoch(&mut self, ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        // Report the rate the epoch ended on, before any epoch-level step.
        let last = ctx.state.lr_history.last().copied().unwrap_or(ctx.state.lr);
        ctx.state.publish(METRIC_LR, last);
        if self.by_epoch {
            self.advance(ctx.state);
        }
        Ok(())
    }

    fn priority(&self) -> i32 {
        PRIORITY_SCHEDULE
    }

    fn name(&self) -> &'static str {
        "LrSchedulerHook"
    }
}

fn format_metrics(metrics: &std::collections::BTreeMap<String, f64>) -> String {
    metrics
        .iter()
        .map(|(k, v)| format!("{k}={v:.5}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Logs published metrics at the end of each pass.
#[derive(Debug, Default)]
pub struct LogMetricByEpochHook;

impl<B: AutodiffBackend> TrainerHook<B> for LogMetricByEpochHook {
    fn after_train_epoch(&mut self, ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        let s = &ctx.state;
        tracing::info!(
            epoch = s.epoch + 1,
            max_epochs = s.max_epochs,
            "train {}",
            format_metrics(&s.metrics.train)
        );
        Ok(())
    }

    fn after_test_epoch(&mut self, ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        let s = &ctx.state;
        tracing::info!(
            epoch = s.epoch + 1,
            max_epochs = s.max_epochs,
            "test {}",
            format_metrics(&s.metrics.test)
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LogMetricByEpochHook"
    }
}

#[derive(Debug, Default)]
pub struct LogTimingByEpochHook;

impl<B: AutodiffBackend> TrainerHook<B> for LogTimingByEpochHook {
    fn after_train_epoch(&mut self, ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        let timer = &ctx.state.timer;
        let epoch_secs = timer.last(TIMER_TRAIN_EPOCH).as_secs_f64();
        let step_ms = timer.mean(TIMER_TRAIN_STEP).as_secs_f64() * 1e3;
        let throughput = if epoch_secs > 0.0 {
            ctx.state.steps_per_epoch as f64 / epoch_secs
        } else {
            0.0
        };
        tracing::info!(
            epoch = ctx.state.epoch + 1,
            epoch_secs = %format!("{epoch_secs:.2}"),
            mean_step_ms = %format!("{step_ms:.2}"),
            batches_per_sec = %format!("{throughput:.1}"),
            "train timing"
        );
        ctx.state.timer.reset(TIMER_TRAIN_STEP);
        Ok(())
    }

    fn after_test_epoch(&mut self, ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        let secs = ctx.state.timer.last(TIMER_TEST_EPOCH).as_secs_f64();
        tracing::info!(
            epoch = ctx.state.epoch + 1,
            epoch_secs = %format!("{secs:.2}"),
            "test timing"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LogTimingByEpochHook"
    }
}

/// Host memory snapshot: process RSS and system usage.
pub struct LogMemoryByEpochHook {
    sys: System,
    pid: Option<sysinfo::Pid>,
}

impl Default for LogMemoryByEpochHook {
    fn default() -> Self {
        Self::new()
    }
}

impl LogMemoryByEpochHook {
    pub fn new() -> Self {
        Self {
            sys: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    fn log(&mut self, epoch: usize, when: &'static str) {
        const MB: u64 = 1024 * 1024;
        self.sys.refresh_memory();
        let rss_mb = self.pid.and_then(|pid| {
            self.sys
                .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            self.sys.process(pid).map(|p| p.memory() / MB)
        });
        tracing::info!(
            epoch,
            when,
            rss_mb = rss_mb.unwrap_or(0),
            used_mb = self.sys.used_memory() / MB,
            total_mb = self.sys.total_memory() / MB,
            "memory"
        );
    }
}

impl<B: AutodiffBackend> TrainerHook<B> for LogMemoryByEpochHook {
    fn before_train(&mut self, _ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        self.log(0, "before-train");
        Ok(())
    }

    fn after_train_epoch(&mut self, ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        self.log(ctx.state.epoch + 1, "after-train-epoch");
        Ok(())
    }

    fn after_test_epoch(&mut self, ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        self.log(ctx.state.epoch + 1, "after-test-epoch");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LogMemoryByEpochHook"
    }
}

/// One line of `scalars.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarRecord {
    pub tag: String,
    pub step: usize,
    /// `None` for NaN/inf, which JSON cannot carry.
    pub value: Option<f64>,
    /// Seconds since the Unix epoch.
    pub wall_time: f64,
}

pub const SCALARS_FILE: &str = "scalars.jsonl";

/// Appends scalars to `<log_dir>/scalars.jsonl`: per-step `train/loss` and
/// `train/lr` keyed by global step, per-epoch `train/*` and `test/*` keyed by
/// epoch number.
pub struct ScalarExportHook {
    log_dir: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl ScalarExportHook {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            writer: None,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.log_dir.join(SCALARS_FILE)
    }

    fn write(&mut self, tag: &str, step: usize, value: f64) -> TrainResult<()> {
        let path = self.path();
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        let record = ScalarRecord {
            tag: tag.to_string(),
            step,
            value: value.is_finite().then_some(value),
            wall_time: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or_default(),
        };
        serde_json::to_writer(&mut *writer, &record)?;
        writer
            .write_all(b"\n")
            .map_err(|e| TrainError::io(&path, e))
    }

    fn write_epoch(&mut self, state: &TrainerState, phase: Phase) -> TrainResult<()> {
        let (prefix, metrics) = match phase {
            Phase::Test => ("test", &state.metrics.test),
            _ => ("train", &state.metrics.train),
        };
        let epoch = state.epoch + 1;
        for (name, value) in metrics {
            self.write(&format!("{prefix}/epoch_{name}"), epoch, *value)?;
        }
        self.flush()
    }

    fn flush(&mut self) -> TrainResult<()> {
        let path = self.path();
        match self.writer.as_mut() {
            Some(w) => w.flush().map_err(|e| TrainError::io(path, e)),
            None => Ok(()),
        }
    }
}

impl<B: AutodiffBackend> TrainerHook<B> for ScalarExportHook {
    fn before_train(&mut self, _ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        fs::create_dir_all(&self.log_dir).map_err(|e| TrainError::io(&self.log_dir, e))?;
        let path = self.path();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| TrainError::io(&path, e))?;
        tracing::info!(path = %path.display(), "writing scalars");
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    fn after_train_iter(&mut self, ctx: &mut HookContext<'_, B>, out: &StepOutput) -> TrainResult<()> {
        let step = ctx.state.global_step;
        let lr = ctx.state.lr_history.last().copied().unwrap_or(ctx.state.lr);
        self.write("train/loss", step, out.loss as f64)?;
        self.write("train/lr", step, lr)
    }

    fn after_train_epoch(&mut self, ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        self.write_epoch(ctx.state, Phase::Train)
    }

    fn after_test_epoch(&mut self, ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        self.write_epoch(ctx.state, Phase::Test)
    }

    fn after_train(&mut self, _ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        self.flush()?;
        self.writer = None;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ScalarExportHook"
    }
}

pub fn checkpoint_stem(epoch: usize) -> String {
    format!("lenet5_epoch_{epoch}")
}

/// Saves the model with `BinFileRecorder` after every train epoch.
/// Files are `<dir>/lenet5_epoch_<n>.bin`, `n` 1-based.
pub struct SaveCheckpointHook {
    dir: PathBuf,
}

impl SaveCheckpointHook {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl<B: AutodiffBackend> TrainerHook<B> for SaveCheckpointHook {
    fn before_train(&mut self, _ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        fs::create_dir_all(&self.dir).map_err(|e| TrainError::io(&self.dir, e))
    }

    fn after_train_epoch(&mut self, ctx: &mut HookContext<'_, B>) -> TrainResult<()> {
        let path = self.dir.join(checkpoint_stem(ctx.state.epoch + 1));
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        ctx.model
            .clone()
            .save_file(&path, &recorder)
            .map_err(|e| TrainError::Checkpoint {
                path: path.clone(),
                msg: e.to_string(),
            })?;
        tracing::info!(path = %path.display(), "saved checkpoint");
        Ok(())
    }

    fn priority(&self) -> i32 {
        PRIORITY_LOG + 1
    }

    fn name(&self) -> &'static str {
        "SaveCheckpointHook"
    }
}
