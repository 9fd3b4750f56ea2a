//! Epoch/iteration driver.
//!
//! `Trainer::fit` runs `Initialized -> {train epoch -> test epoch} x N -> Completed`
//! and calls every registered hook, in priority order, at each boundary. Hooks
//! see the mutable [`TrainerState`] and the current model; the LR hook owns the
//! schedule and writes `state.lr`, which the next train step reads.

use crate::engine::{Engine, StepOutput};
use crate::error::{TrainError, TrainResult};
use crate::hooks::{HookContext, TrainerHook};
use crate::timer::MultiTimer;
use burn::optim::Optimizer;
use burn::tensor::backend::AutodiffBackend;
use image_dataset::DataLoader;
use models::LeNet5;
use std::collections::BTreeMap;

pub const TIMER_TRAIN_EPOCH: &str = "train-epoch";
pub const TIMER_TRAIN_STEP: &str = "train-step";
pub const TIMER_TEST_EPOCH: &str = "test-epoch";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Train,
    Test,
}

/// Metrics published by hooks for the current epoch, keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochMetrics {
    pub train: BTreeMap<String, f64>,
    pub test: BTreeMap<String, f64>,
}

impl EpochMetrics {
    pub fn clear(&mut self) {
        self.train.clear();
        self.test.clear();
    }

    pub fn publish(&mut self, phase: Phase, name: &str, value: f64) {
        let map = match phase {
            Phase::Test => &mut self.test,
            _ => &mut self.train,
        };
        map.insert(name.to_string(), value);
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrainerState {
    /// 0-based.
    pub epoch: usize,
    pub max_epochs: usize,
    /// Batch index within the current pass.
    pub step: usize,
    pub steps_per_epoch: usize,
    pub test_steps: usize,
    /// Train batches completed across the run.
    pub global_step: usize,
    /// Rate used by the next train step.
    pub lr: f64,
    pub phase: Phase,
    pub metrics: EpochMetrics,
    pub timer: MultiTimer,
    /// Rate applied at every train step, in order.
    pub lr_history: Vec<f64>,
}

impl TrainerState {
    pub fn publish(&mut self, name: &str, value: f64) {
        self.metrics.publish(self.phase, name, value);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train: BTreeMap<String, f64>,
    pub test: BTreeMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct FitSummary {
    pub epochs: usize,
    pub global_steps: usize,
    /// Rate applied on the last optimizer step.
    pub final_lr: f64,
    pub lr_history: Vec<f64>,
    pub epoch_history: Vec<EpochRecord>,
}

impl FitSummary {
    pub fn last_epoch(&self) -> Option<&EpochRecord> {
        self.epoch_history.last()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FitOptions {
    pub epochs: usize,
    /// Evaluate after every `test_interval` epochs.
    pub test_interval: usize,
    /// Rate before any hook sets one.
    pub initial_lr: f64,
}

pub struct Trainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<LeNet5<B>, B>,
{
    engine: Engine<B, O>,
    hooks: Vec<Box<dyn TrainerHook<B>>>,
}

impl<B, O> Trainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<LeNet5<B>, B>,
{
    pub fn new(engine: Engine<B, O>) -> Self {
        Self {
            engine,
            hooks: Vec::new(),
        }
    }

    pub fn with_hooks(mut self, hooks: Vec<Box<dyn TrainerHook<B>>>) -> Self {
        for hook in hooks {
            self.add_hook(hook);
        }
        self
    }

    /// Stable insert by priority; equal priorities keep registration order.
    pub fn add_hook(&mut self, hook: Box<dyn TrainerHook<B>>) {
        let at = self
            .hooks
            .partition_point(|h| h.priority() <= hook.priority());
        self.hooks.insert(at, hook);
    }

    pub fn hook_names(&self) -> Vec<&str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }

    pub fn engine(&self) -> &Engine<B, O> {
        &self.engine
    }

    pub fn into_engine(self) -> Engine<B, O> {
        self.engine
    }

    pub fn fit(
        &mut self,
        train: &DataLoader,
        test: Option<&DataLoader>,
        opts: FitOptions,
    ) -> TrainResult<FitSummary> {
        let steps_per_epoch = train.len();
        if steps_per_epoch == 0 {
            return Err(TrainError::EmptyEpoch);
        }
        let test_interval = opts.test_interval.max(1);
        let Self { engine, hooks } = self;
        let mut state = TrainerState {
            max_epochs: opts.epochs,
            steps_per_epoch,
            test_steps: test.map(DataLoader::len).unwrap_or(0),
            lr: opts.initial_lr,
            ..TrainerState::default()
        };
        let mut epoch_history = Vec::with_capacity(opts.epochs);

        tracing::info!(
            epochs = opts.epochs,
            steps_per_epoch,
            train_samples = train.num_samples(),
            test_samples = test.map(DataLoader::num_samples).unwrap_or(0),
            hooks = ?hooks.iter().map(|h| h.name()).collect::<Vec<_>>(),
            "training started"
        );
        dispatch(hooks, &mut state, engine.model(), |h, ctx| h.before_train(ctx))?;

        for epoch in 0..opts.epochs {
            state.epoch = epoch;
            state.step = 0;
            state.phase = Phase::Train;
            state.metrics.clear();
            state.timer.start(TIMER_TRAIN_EPOCH);
            dispatch(hooks, &mut state, engine.model(), |h, ctx| {
                h.before_train_epoch(ctx)
            })?;

            let mut batches = train.iter(epoch as u64);
            while let Some(batch) = batches.next_batch::<B>(engine.device())? {
                dispatch(hooks, &mut state, engine.model(), |h, ctx| {
                    h.before_train_iter(ctx)
                })?;
                state.lr_history.push(state.lr);
                state.timer.start(TIMER_TRAIN_STEP);
                let out = engine.train_step(batch, state.lr);
                state.timer.stop(TIMER_TRAIN_STEP);
                tracing::trace!(
                    epoch,
                    step = state.step,
                    loss = out.loss,
                    lr = state.lr,
                    "train step"
                );
                dispatch(hooks, &mut state, engine.model(), |h, ctx| {
                    h.after_train_iter(ctx, &out)
                })?;
                state.step += 1;
                state.global_step += 1;
            }

            state.timer.stop(TIMER_TRAIN_EPOCH);
            dispatch(hooks, &mut state, engine.model(), |h, ctx| {
                h.after_train_epoch(ctx)
            })?;

            if let Some(test) = test {
                if (epoch + 1) % test_interval == 0 {
                    evaluate(engine, hooks, &mut state, test)?;
                }
            }

            state.phase = Phase::Idle;
            epoch_history.push(EpochRecord {
                epoch,
                train: state.metrics.train.clone(),
                test: state.metrics.test.clone(),
            });
        }

        dispatch(hooks, &mut state, engine.model(), |h, ctx| h.after_train(ctx))?;
        let final_lr = state.lr_history.last().copied().unwrap_or(state.lr);
        tracing::info!(
            epochs = opts.epochs,
            global_steps = state.global_step,
            final_lr,
            "training completed"
        );

        Ok(FitSummary {
            epochs: opts.epochs,
            global_steps: state.global_step,
            final_lr,
            lr_history: state.lr_history,
            epoch_history,
        })
    }
}

fn evaluate<B, O>(
    engine: &Engine<B, O>,
    hooks: &mut [Box<dyn TrainerHook<B>>],
    state: &mut TrainerState,
    test: &DataLoader,
) -> TrainResult<()>
where
    B: AutodiffBackend,
    O: Optimizer<LeNet5<B>, B>,
{
    state.phase = Phase::Test;
    state.step = 0;
    state.timer.start(TIMER_TEST_EPOCH);
    dispatch(hooks, state, engine.model(), |h, ctx| h.before_test_epoch(ctx))?;

    let evaluator = engine.evaluator();
    let mut batches = test.iter(0);
    while let Some(batch) = batches.next_batch::<B::InnerBackend>(engine.device())? {
        dispatch(hooks, state, engine.model(), |h, ctx| h.before_test_iter(ctx))?;
        let out: StepOutput = evaluator.step(batch);
        dispatch(hooks, state, engine.model(), |h, ctx| {
            h.after_test_iter(ctx, &out)
        })?;
        state.step += 1;
    }

    state.timer.stop(TIMER_TEST_EPOCH);
    dispatch(hooks, state, engine.model(), |h, ctx| h.after_test_epoch(ctx))
}

fn dispatch<B, F>(
    hooks: &mut [Box<dyn TrainerHook<B>>],
    state: &mut TrainerState,
    model: &LeNet5<B>,
    mut call: F,
) -> TrainResult<()>
where
    B: AutodiffBackend,
    F: FnMut(&mut dyn TrainerHook<B>, &mut HookContext<'_, B>) -> TrainResult<()>,
{
    for hook in hooks.iter_mut() {
        let mut ctx = HookContext {
            state: &mut *state,
            model,
        };
        call(hook.as_mut(), &mut ctx)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_route_by_phase() {
        let mut state = TrainerState {
            phase: Phase::Train,
            ..Default::default()
        };
        state.publish("loss", 1.5);
        state.phase = Phase::Test;
        state.publish("loss", 0.5);
        assert_eq!(state.metrics.train.get("loss"), Some(&1.5));
        assert_eq!(state.metrics.test.get("loss"), Some(&0.5));
        state.metrics.clear();
        assert!(state.metrics.train.is_empty());
    }
}
