//! Command-line driver: trains a Dense → ReLU → Dense → Softmax network on MNIST
//! IDX files or on generated data, then saves the model.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use nn_engine::{Engine, EngineBuilder, FitConfig, IdxLoader, Loader, LrSchedule, SyntheticLoader};

const MNIST_CLASSES: usize = 10;

/// Train a feed-forward network.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Directory with the four MNIST IDX files. Generated data is used when omitted.
    #[arg(long)]
    mnist: Option<PathBuf>,

    /// Model file. Loaded if it exists, written after training.
    #[arg(long, default_value = "engine.json")]
    model: PathBuf,

    #[arg(long, default_value_t = 20)]
    epochs: usize,

    #[arg(long, default_value_t = 4)]
    threads: usize,

    #[arg(long, default_value_t = 32)]
    batch_size: usize,

    /// Neurons in the hidden Dense layer.
    #[arg(long, default_value_t = 100)]
    hidden: usize,

    /// Learning rate of the first epoch.
    #[arg(long, default_value_t = 0.02)]
    lr: f64,

    /// Learning rate of the last epoch; constant `--lr` when omitted.
    #[arg(long)]
    lr_final: Option<f64>,

    /// Scale of the initial N(0, 1) weights.
    #[arg(long, default_value_t = 0.2)]
    scale: f64,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Generated data: features per item.
    #[arg(long, default_value_t = 10)]
    synthetic_inputs: usize,

    /// Generated data: number of classes.
    #[arg(long, default_value_t = 3)]
    synthetic_classes: usize,

    /// Generated data: training items per epoch.
    #[arg(long, default_value_t = 10_000)]
    synthetic_items: usize,
}

fn loaders(args: &Args) -> anyhow::Result<(Box<dyn Loader>, Box<dyn Loader>)> {
    match &args.mnist {
        Some(dir) => {
            let train = IdxLoader::new(
                dir.join("train-images.idx3-ubyte"),
                dir.join("train-labels.idx1-ubyte"),
                args.batch_size,
            )?;
            let test = IdxLoader::new(
                dir.join("t10k-images.idx3-ubyte"),
                dir.join("t10k-labels.idx1-ubyte"),
                args.batch_size,
            )?;
            Ok((Box::new(train), Box::new(test)))
        }
        None => {
            let train = SyntheticLoader::new(
                args.synthetic_items,
                args.batch_size,
                args.synthetic_inputs,
                args.synthetic_classes,
                args.seed,
            )?;
            let test = SyntheticLoader::new(
                (args.synthetic_items / 10).max(1),
                args.batch_size,
                args.synthetic_inputs,
                args.synthetic_classes,
                args.seed.wrapping_add(1),
            )?;
            Ok((Box::new(train), Box::new(test)))
        }
    }
}

fn build_engine(args: &Args, input_size: usize, classes: usize) -> anyhow::Result<Engine> {
    if args.model.exists() {
        let engine = Engine::load_json(&args.model)
            .with_context(|| format!("loading {}", args.model.display()))?;
        if engine.input_size() != input_size || engine.output_size() != classes {
            bail!(
                "{} maps {} inputs to {} classes, data has {input_size} and {classes}",
                args.model.display(),
                engine.input_size(),
                engine.output_size()
            );
        }
        info!(path = %args.model.display(), "loaded model");
        return Ok(engine);
    }

    let engine = EngineBuilder::new(input_size)?
        .dense(args.hidden)?
        .relu()
        .dense(classes)?
        .softmax()
        .scale_initial_weights(args.scale)
        .build_with_seed(args.seed)?;
    Ok(engine)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let (train, test) = loaders(&args)?;
    let (input_size, classes) = match &args.mnist {
        Some(_) => (train.open()?.input_size, MNIST_CLASSES),
        None => (args.synthetic_inputs, args.synthetic_classes),
    };
    train.close()?;

    let mut engine = build_engine(&args, input_size, classes)?;
    let lr_schedule = match args.lr_final {
        Some(last) => LrSchedule::Linear {
            initial: args.lr,
            last,
        },
        None => LrSchedule::Constant(args.lr),
    };
    engine.set_fit_config(FitConfig {
        epochs: args.epochs,
        threads: args.threads,
        lr_schedule,
    })?;
    println!("{engine}");

    let report = engine.fit(train.as_ref(), test.as_ref())?;
    if let Some(last) = report.epochs.last() {
        info!(
            test_loss = last.test.loss,
            test_correct = last.test.percent_correct,
            "training finished"
        );
    }

    engine
        .save_json(&args.model)
        .with_context(|| format!("saving {}", args.model.display()))?;
    info!(path = %args.model.display(), "saved model");
    Ok(())
}
