//! `LENET_TRAIN_CONFIG` discovery. Kept in its own test binary because it
//! mutates the process environment.

use clap::Parser;
use std::io::Write;
use training::{TrainArgs, CONFIG_ENV};

#[test]
fn env_overlay_applies_unless_config_flag_or_caller_overrides() {
    let mut env_file = tempfile::NamedTempFile::new().unwrap();
    writeln!(env_file, "epochs = 3\nbatch_size = 16").unwrap();
    let mut flag_file = tempfile::NamedTempFile::new().unwrap();
    writeln!(flag_file, "epochs = 7").unwrap();

    std::env::set_var(CONFIG_ENV, env_file.path());

    let args = TrainArgs::parse_from(["train"]);
    let cfg = args.to_run_config().unwrap();
    assert_eq!(cfg.epochs, 3);
    assert_eq!(cfg.batch_size, 16);

    let cfg = args.resolve(None).unwrap();
    assert_eq!(cfg.epochs, 5);
    assert_eq!(cfg.batch_size, 128);

    let flag_path = flag_file.path().to_str().unwrap().to_string();
    let cfg = TrainArgs::parse_from(["train", "--config", &flag_path])
        .to_run_config()
        .unwrap();
    assert_eq!(cfg.epochs, 7);
    assert_eq!(cfg.batch_size, 128);

    std::env::remove_var(CONFIG_ENV);
    assert_eq!(args.to_run_config().unwrap().epochs, 5);
}
