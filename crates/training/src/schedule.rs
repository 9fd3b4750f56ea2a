//! Learning-rate schedules.
//!
//! Every schedule is a pure `step -> lr` mapping over the optimizer's base rate;
//! [`Scheduler`] owns the step counter and is driven through burn's
//! [`LrScheduler`] by the LR hook.

use crate::config::ScheduleKind;
use burn::lr_scheduler::LrScheduler;
use burn::tensor::backend::Backend;
use burn::LearningRate;
use std::f64::consts::PI;

pub trait LrSchedule: Send + Sync {
    /// Learning rate at step `step` (0-based).
    fn lr_at(&self, step: usize) -> f64;

    fn name(&self) -> &'static str;
}

/// Geometric sweep `base * 2^(low + (high - low) * b / total)` with
/// `low = log2(min)`, `high = log2(max)`. `min`/`max` are factors of the base
/// rate. The counter is never reset per epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeTestSchedule {
    pub base_lr: f64,
    pub min_lr: f64,
    pub max_lr: f64,
    pub total_steps: usize,
}

impl RangeTestSchedule {
    pub fn new(base_lr: f64, min_lr: f64, max_lr: f64, total_steps: usize) -> Self {
        Self {
            base_lr,
            min_lr,
            max_lr,
            total_steps: total_steps.max(1),
        }
    }
}

impl LrSchedule for RangeTestSchedule {
    fn lr_at(&self, step: usize) -> f64 {
        let low = self.min_lr.log2();
        let high = self.max_lr.log2();
        let frac = step as f64 / self.total_steps as f64;
        self.base_lr * (low + (high - low) * frac).exp2()
    }

    fn name(&self) -> &'static str {
        "RangeTest"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiStepSchedule {
    pub base_lr: f64,
    /// Sorted ascending.
    pub milestones: Vec<usize>,
    pub gamma: f64,
}

impl MultiStepSchedule {
    pub fn new(base_lr: f64, mut milestones: Vec<usize>, gamma: f64) -> Self {
        milestones.sort_unstable();
        Self {
            base_lr,
            milestones,
            gamma,
        }
    }

    /// Number of milestones already passed at `step`.
    pub fn decays_at(&self, step: usize) -> usize {
        self.milestones.partition_point(|&m| m <= step)
    }
}

impl LrSchedule for MultiStepSchedule {
    fn lr_at(&self, step: usize) -> f64 {
        self.base_lr * self.gamma.powi(self.decays_at(step) as i32)
    }

    fn name(&self) -> &'static str {
        "MultiStepLR"
    }
}

/// Closed-form cosine annealing. Minimum at `t_max`, back at `base_lr` at
/// `2 * t_max`, periodic thereafter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CosineAnnealingSchedule {
    pub base_lr: f64,
    pub t_max: usize,
    pub eta_min: f64,
}

impl CosineAnnealingSchedule {
    pub fn new(base_lr: f64, t_max: usize, eta_min: f64) -> Self {
        Self {
            base_lr,
            t_max: t_max.max(1),
            eta_min,
        }
    }
}

impl LrSchedule for CosineAnnealingSchedule {
    fn lr_at(&self, step: usize) -> f64 {
        let phase = PI * step as f64 / self.t_max as f64;
        self.eta_min + (self.base_lr - self.eta_min) * (1.0 + phase.cos()) / 2.0
    }

    fn name(&self) -> &'static str {
        "CosineAnnealingLR"
    }
}

/// One of the three schedule shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum Schedule {
    RangeTest(RangeTestSchedule),
    MultiStep(MultiStepSchedule),
    Cosine(CosineAnnealingSchedule),
}

impl LrSchedule for Schedule {
    fn lr_at(&self, step: usize) -> f64 {
        match self {
            Schedule::RangeTest(s) => s.lr_at(step),
            Schedule::MultiStep(s) => s.lr_at(step),
            Schedule::Cosine(s) => s.lr_at(step),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Schedule::RangeTest(s) => s.name(),
            Schedule::MultiStep(s) => s.name(),
            Schedule::Cosine(s) => s.name(),
        }
    }
}

/// `total_steps` is the number of schedule steps in the run (batches, or
/// epochs when stepping by epoch); only the range test uses it.
pub fn build_schedule(kind: &ScheduleKind, base_lr: f64, total_steps: usize) -> Schedule {
    match kind {
        ScheduleKind::RangeTest { min_lr, max_lr } => Schedule::RangeTest(
            RangeTestSchedule::new(base_lr, *min_lr, *max_lr, total_steps),
        ),
        ScheduleKind::MultiStep {
            milestones, gamma, ..
        } => Schedule::MultiStep(MultiStepSchedule::new(base_lr, milestones.clone(), *gamma)),
        ScheduleKind::CosineAnnealing { t_max, eta_min } => {
            Schedule::Cosine(CosineAnnealingSchedule::new(base_lr, *t_max, *eta_min))
        }
    }
}

/// A step counter over a schedule. `LrScheduler::step` advances one step and
/// returns the new rate; the record is the counter.
#[derive(Debug, Clone)]
pub struct Scheduler {
    schedule: Schedule,
    step: usize,
}

impl Scheduler {
    pub fn new(schedule: Schedule) -> Self {
        Self { schedule, step: 0 }
    }

    pub fn current_lr(&self) -> f64 {
        self.schedule.lr_at(self.step)
    }

    pub fn last_step(&self) -> usize {
        self.step
    }

    pub fn name(&self) -> &'static str {
        self.schedule.name()
    }
}

impl LrScheduler for Scheduler {
    type Record<B: Backend> = usize;

    fn step(&mut self) -> LearningRate {
        self.step += 1;
        self.current_lr()
    }

    fn to_record<B: Backend>(&self) -> Self::Record<B> {
        self.step
    }

    fn load_record<B: Backend>(mut self, record: Self::Record<B>) -> Self {
        self.step = record;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FRONT_LOADED_MILESTONES, UNIFORM_MILESTONES};
    use burn_ndarray::NdArray;
    use proptest::prelude::*;

    fn close(a: f64, b: f64, rel: f64) -> bool {
        (a - b).abs() <= rel * b.abs().max(1e-12)
    }

    #[test]
    fn range_test_endpoints() {
        let s = RangeTestSchedule::new(1.0, 1e-5, 10.0, 469 * 5);
        assert!(close(s.lr_at(0), 1e-5, 1e-9));
        assert!(close(s.lr_at(469 * 5), 10.0, 1e-9));
        let last = s.lr_at(469 * 5 - 1);
        assert!(last < 10.0 && last > 9.9);
    }

    #[test]
    fn range_test_scales_base_rate() {
        let sgd = RangeTestSchedule::new(0.2, 1e-5, 10.0, 100);
        let adam = RangeTestSchedule::new(0.01, 1e-5, 10.0, 100);
        assert!(close(sgd.lr_at(0), 2e-6, 1e-9));
        assert!(close(sgd.lr_at(100), 2.0, 1e-9));
        assert!(close(adam.lr_at(0), 1e-7, 1e-9));
        assert!(close(adam.lr_at(100), 0.1, 1e-9));
        assert!(close(sgd.lr_at(37) / adam.lr_at(37), 20.0, 1e-9));
    }

    #[test]
    fn milestone_decay_both_presets() {
        for preset in [UNIFORM_MILESTONES, FRONT_LOADED_MILESTONES] {
            let s = MultiStepSchedule::new(0.1, preset.to_vec(), 0.2);
            assert!(close(s.lr_at(0), 0.1, 1e-12));
            assert!(close(s.lr_at(preset[0] - 1), 0.1, 1e-12));
            for (k, &m) in preset.iter().enumerate() {
                let expected = 0.1 * 0.2f64.powi(k as i32 + 1);
                assert!(close(s.lr_at(m), expected, 1e-12), "milestone {m}");
            }
            assert!(close(s.lr_at(100_000), 0.1 * 0.2f64.powi(4), 1e-12));
        }
    }

    #[test]
    fn cosine_is_periodic() {
        let s = CosineAnnealingSchedule::new(0.05, 10, 0.0);
        assert!(close(s.lr_at(0), 0.05, 1e-12));
        assert!(close(s.lr_at(5), 0.025, 1e-9));
        assert!(s.lr_at(10).abs() < 1e-12);
        assert!(close(s.lr_at(20), 0.05, 1e-9));
        assert!(s.lr_at(11) > s.lr_at(10));
        for t in 0..10 {
            assert!(s.lr_at(t + 1) < s.lr_at(t));
        }
    }

    #[test]
    fn scheduler_counts_steps() {
        let mut sched = Scheduler::new(build_schedule(
            &ScheduleKind::MultiStep {
                preset: "custom".to_string(),
                milestones: vec![2, 4],
                gamma: 0.5,
            },
            1.0,
            10,
        ));
        assert_eq!(sched.current_lr(), 1.0);
        assert_eq!(sched.step(), 1.0);
        assert_eq!(sched.step(), 0.5);
        sched.step();
        assert_eq!(sched.step(), 0.25);
        assert_eq!(sched.last_step(), 4);
        assert_eq!(sched.name(), "MultiStepLR");
    }

    #[test]
    fn scheduler_record_restores_position() {
        let kind = ScheduleKind::cosine(10);
        let mut sched = Scheduler::new(build_schedule(&kind, 0.05, 100));
        for _ in 0..7 {
            sched.step();
        }
        let record = LrScheduler::to_record::<NdArray<f32>>(&sched);
        assert_eq!(record, 7);

        let fresh = Scheduler::new(build_schedule(&kind, 0.05, 100));
        let mut restored = LrScheduler::load_record::<NdArray<f32>>(fresh, record);
        assert_eq!(restored.current_lr(), sched.current_lr());
        assert_eq!(restored.step(), sched.step());
    }

    #[test]
    fn unsorted_milestones_are_sorted() {
        let s = MultiStepSchedule::new(1.0, vec![9, 3], 0.1);
        assert_eq!(s.milestones, vec![3, 9]);
        assert_eq!(s.decays_at(5), 1);
    }

    proptest! {
        #[test]
        fn range_test_sweeps_whole_run(epochs in 1usize..40, batches in 1usize..600) {
            let total = epochs * batches;
            let s = RangeTestSchedule::new(1.0, 1e-5, 10.0, total);
            prop_assert!(close(s.lr_at(0), 1e-5, 1e-9));
            prop_assert!(close(s.lr_at(total), 10.0, 1e-9));
            let mut prev = s.lr_at(0);
            for b in 1..total {
                let lr = s.lr_at(b);
                prop_assert!(lr > prev);
                prev = lr;
            }
            prop_assert!(prev < 10.0);
        }

        #[test]
        fn cosine_stays_within_bounds(t_max in 1usize..500, step in 0usize..5000) {
            let s = CosineAnnealingSchedule::new(0.3, t_max, 0.0);
            let lr = s.lr_at(step);
            prop_assert!((-1e-12..=0.3 + 1e-12).contains(&lr));
        }
    }
}
