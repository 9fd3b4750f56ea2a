use clap::Parser;
use training::{run_train, TrainArgs};

fn main() -> anyhow::Result<()> {
    let args = TrainArgs::parse();
    cli_support::init_tracing(&args.logging);
    run_train(args)
}
