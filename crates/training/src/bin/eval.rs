use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use clap::Parser;
use cli_support::LoggingArgs;
use image_dataset::{DataLoader, ImageTransform, LoaderConfig, MnistSource, Split};
use std::path::PathBuf;
use std::sync::Arc;
use training::{BackendKind, Evaluator, LeNet5, LeNet5Config, TrainBackend};

#[derive(Parser, Debug)]
#[command(
    name = "eval",
    about = "Evaluate a LeNet5 checkpoint on the MNIST test split (loss/accuracy)"
)]
struct Args {
    /// Checkpoint written by `train --checkpoint-dir` (with or without `.bin`).
    #[arg(long)]
    checkpoint: PathBuf,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    backend: BackendKind,
    #[arg(long, default_value_t = 128)]
    batch_size: usize,
    #[arg(long, default_value_t = 10)]
    n_classes: usize,
    /// Stop after this many batches.
    #[arg(long)]
    max_batches: Option<usize>,
    #[command(flatten)]
    logging: LoggingArgs,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    cli_support::init_tracing(&args.logging);
    training::validate_backend_choice(args.backend)?;

    let device = <TrainBackend as Backend>::Device::default();
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    let model: LeNet5<TrainBackend> = LeNet5Config::new(args.n_classes)
        .init(&device)
        .load_file(args.checkpoint.with_extension(""), &recorder, &device)
        .map_err(|e| {
            anyhow::anyhow!(
                "failed to load checkpoint {}: {e}",
                args.checkpoint.display()
            )
        })?;

    let loader = DataLoader::new(
        Arc::new(MnistSource::new(Split::Test)),
        ImageTransform::default(),
        LoaderConfig {
            max_batches: args.max_batches,
            ..LoaderConfig::eval(args.batch_size)
        },
    )?;

    let evaluator = Evaluator::new(model, &device);
    let mut batches = loader.iter(0);
    let (mut loss_sum, mut correct, mut total) = (0f64, 0usize, 0usize);
    while let Some(batch) = batches.next_batch::<TrainBackend>(&device)? {
        let out = evaluator.step(batch);
        loss_sum += out.loss as f64 * out.total as f64;
        correct += out.correct;
        total += out.total;
    }
    if total == 0 {
        anyhow::bail!("test split produced no batches");
    }

    println!(
        "Eval complete: loss={:.4}, accuracy={:.4} ({}/{})",
        loss_sum / total as f64,
        correct as f64 / total as f64,
        correct,
        total
    );
    Ok(())
}
