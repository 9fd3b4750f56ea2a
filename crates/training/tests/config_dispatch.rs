use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use training::{ConfigError, ConfigOverrides, Mode, OptimizerKind, ScheduleKind, TrainArgs};

fn args(extra: &[&str]) -> TrainArgs {
    let mut argv = vec!["train"];
    argv.extend_from_slice(extra);
    TrainArgs::parse_from(argv)
}

fn config_error(err: anyhow::Error) -> ConfigError {
    err.downcast::<ConfigError>().unwrap()
}

#[test]
fn rmsprop_is_fatal_in_both_modes() {
    for process in ["test", "train"] {
        let err = args(&["--process", process, "--optimizer", "RMSProp"])
            .resolve(None)
            .unwrap_err();
        assert!(matches!(config_error(err), ConfigError::UnknownOptimizer(_)));
    }
}

#[test]
fn steplr_is_fatal_only_in_training() {
    let err = args(&["--process", "train", "--scheduler", "StepLR"])
        .resolve(None)
        .unwrap_err();
    assert!(matches!(config_error(err), ConfigError::UnknownScheduler(_)));

    let cfg = args(&["--process", "test", "--scheduler", "StepLR"])
        .resolve(None)
        .unwrap();
    assert_eq!(cfg.mode, Mode::RangeTest);
}

#[test]
fn front_loaded_milestones_for_non_uniform_preset() {
    let cfg = args(&["--process", "train", "--MS_int", "fast", "--LR", "0.2"])
        .resolve(None)
        .unwrap();
    assert_eq!(cfg.optimizer, OptimizerKind::Sgd);
    assert_eq!(cfg.optimizer_params.lr, 0.2);
    assert_eq!(
        cfg.schedule,
        ScheduleKind::MultiStep {
            preset: "fast".to_string(),
            milestones: vec![500, 1500, 4500, 13500],
            gamma: 0.2
        }
    );
    assert_eq!(cfg.run_name, "tb_logs_SGD_MultiStepLR_fast_0.2_train");
}

#[test]
fn toml_overlay_is_applied() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "batch_size = 64\nepochs = 3\ntest_interval = 2\nnum_workers = 0\ncheckpoint_dir = \"ckpt\""
    )
    .unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let cfg = args(&["--process", "train", "--optimizer", "ADAM", "--config", &path])
        .to_run_config()
        .unwrap();
    assert_eq!(cfg.batch_size, 64);
    assert_eq!(cfg.epochs, 3);
    assert_eq!(cfg.test_interval, 2);
    assert_eq!(cfg.num_workers, 0);
    assert_eq!(cfg.checkpoint_dir, Some(PathBuf::from("ckpt")));
}

#[test]
fn missing_explicit_config_is_an_error() {
    let err = ConfigOverrides::discover(Some(std::path::Path::new("/nonexistent/run.toml")))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn overlay_cannot_smuggle_invalid_values() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "epochs = 0").unwrap();
    let path = file.path().to_str().unwrap().to_string();
    let err = args(&["--config", &path]).to_run_config().unwrap_err();
    assert!(matches!(
        config_error(err),
        ConfigError::Invalid { field: "epochs", .. }
    ));
}
