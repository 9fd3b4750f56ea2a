use burn::backend::Autodiff;
use burn::optim::SgdConfig;
use burn_ndarray::NdArray;
use image_dataset::{DataLoader, ImageTransform, InMemorySource, LoaderConfig};
use std::sync::{Arc, Mutex};
use training::engine::StepOutput;
use training::hooks::{HookContext, LossHook, TrainerHook};
use training::{Engine, FitOptions, LeNet5Config, TrainError, Trainer};

type TB = Autodiff<NdArray<f32>>;

#[derive(Clone, Default)]
struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

struct Recorder {
    tag: &'static str,
    priority: i32,
    log: Log,
}

impl TrainerHook<TB> for Recorder {
    fn before_train(&mut self, _ctx: &mut HookContext<'_, TB>) -> training::TrainResult<()> {
        self.log.push(format!("{}:before_train", self.tag));
        Ok(())
    }

    fn before_train_epoch(&mut self, ctx: &mut HookContext<'_, TB>) -> training::TrainResult<()> {
        self.log
            .push(format!("{}:before_train_epoch:{}", self.tag, ctx.state.epoch));
        Ok(())
    }

    fn after_train_iter(
        &mut self,
        ctx: &mut HookContext<'_, TB>,
        out: &StepOutput,
    ) -> training::TrainResult<()> {
        assert!(out.total > 0);
        self.log
            .push(format!("{}:after_train_iter:{}", self.tag, ctx.state.global_step));
        Ok(())
    }

    fn after_test_epoch(&mut self, ctx: &mut HookContext<'_, TB>) -> training::TrainResult<()> {
        let loss = ctx.state.metrics.test.get("loss").copied();
        self.log.push(format!(
            "{}:after_test_epoch:{}:{}",
            self.tag,
            ctx.state.epoch,
            loss.is_some()
        ));
        Ok(())
    }

    fn after_train(&mut self, _ctx: &mut HookContext<'_, TB>) -> training::TrainResult<()> {
        self.log.push(format!("{}:after_train", self.tag));
        Ok(())
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn name(&self) -> &'static str {
        self.tag
    }
}

struct FailAfter {
    steps: usize,
}

impl TrainerHook<TB> for FailAfter {
    fn after_train_iter(
        &mut self,
        ctx: &mut HookContext<'_, TB>,
        _out: &StepOutput,
    ) -> training::TrainResult<()> {
        if ctx.state.global_step + 1 >= self.steps {
            return Err(TrainError::EmptyEpoch);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "FailAfter"
    }
}

fn loader(count: usize, batch: usize) -> DataLoader {
    DataLoader::new(
        Arc::new(InMemorySource::synthetic("hooks", count, 28, 28, 10)),
        ImageTransform::default(),
        LoaderConfig::eval(batch),
    )
    .unwrap()
}

fn trainer() -> Trainer<TB, impl burn::optim::Optimizer<training::LeNet5<TB>, TB>> {
    let device = Default::default();
    let model = LeNet5Config::default().init::<TB>(&device);
    Trainer::new(Engine::new(model, SgdConfig::new().init(), device))
}

#[test]
fn hooks_run_in_priority_order_and_test_respects_interval() {
    let log = Log::default();
    let mut trainer = trainer().with_hooks(vec![
        Box::new(Recorder {
            tag: "late",
            priority: 10,
            log: log.clone(),
        }),
        Box::new(Recorder {
            tag: "early",
            priority: 0,
            log: log.clone(),
        }),
        Box::new(LossHook::new()),
    ]);
    assert_eq!(trainer.hook_names(), vec!["early", "LossHook", "late"]);

    let train = loader(8, 4);
    let test = loader(4, 4);
    let summary = trainer
        .fit(
            &train,
            Some(&test),
            FitOptions {
                epochs: 3,
                test_interval: 2,
                initial_lr: 0.01,
            },
        )
        .unwrap();
    assert_eq!(summary.global_steps, 6);
    assert_eq!(summary.lr_history, vec![0.01; 6]);

    let events = log.events();
    assert_eq!(&events[..2], ["early:before_train", "late:before_train"]);
    assert_eq!(events[2], "early:before_train_epoch:0");
    assert_eq!(events[4], "early:after_train_iter:0");
    assert_eq!(events[5], "late:after_train_iter:0");
    assert_eq!(events.last().unwrap(), "late:after_train");

    // Only epoch 1 (the second) is evaluated; the loss hook has already published.
    let tests: Vec<_> = events
        .iter()
        .filter(|e| e.contains("after_test_epoch"))
        .collect();
    assert_eq!(
        tests,
        vec!["early:after_test_epoch:1:false", "late:after_test_epoch:1:true"]
    );

    assert!(summary.epoch_history[0].test.is_empty());
    assert!(summary.epoch_history[1].test.contains_key("loss"));
}

#[test]
fn hook_error_aborts_fit() {
    let mut trainer = trainer().with_hooks(vec![Box::new(FailAfter { steps: 3 })]);
    let train = loader(20, 4);
    let err = trainer
        .fit(
            &train,
            None,
            FitOptions {
                epochs: 2,
                test_interval: 1,
                initial_lr: 0.01,
            },
        )
        .unwrap_err();
    assert!(matches!(err, TrainError::EmptyEpoch));
}

#[test]
fn empty_train_loader_is_rejected() {
    let train = DataLoader::new(
        Arc::new(InMemorySource::synthetic("short", 3, 28, 28, 10)),
        ImageTransform::default(),
        LoaderConfig {
            drop_last: true,
            ..LoaderConfig::eval(4)
        },
    )
    .unwrap();
    let err = trainer()
        .fit(
            &train,
            None,
            FitOptions {
                epochs: 1,
                test_interval: 1,
                initial_lr: 0.01,
            },
        )
        .unwrap_err();
    assert!(matches!(err, TrainError::EmptyEpoch));
}
