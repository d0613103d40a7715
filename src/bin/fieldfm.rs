//! Command-line trainer for fieldfm datasets.
//!
//! Examples:
//!
//! - Train with per-epoch validation:
//!   `fieldfm --train cache/cv1_train --val cache/cv1_test --epochs 10 --threads 8`
//!
//! - Train the restricted model and write test predictions:
//!   `fieldfm --train cache/full_train --test cache/full_test --pred pred.txt --restricted`
//!
//! - Average four independently seeded models:
//!   `fieldfm --train cache/cv1_train --val cache/cv1_test --average 4`

use std::fs::File;
use std::io::{BufWriter, Write};
use std::process;

use fieldfm::data::Dataset;
use fieldfm::model::{ModelKind, ModelName, ModelOptions};
use fieldfm::training::{TrainError, TrainParams, Trainer, TrainingLogger, Verbosity};

#[derive(Debug)]
struct Args {
    train: String,
    val: Option<String>,
    test: Option<String>,
    pred: Option<String>,

    model: ModelName,

    epochs: u32,
    threads: usize,
    average: u64,
    seed: u64,
    dropout_log: u32,
    eta: f32,
    lambda: f32,
    restricted: bool,
    quiet: bool,
}

fn print_help_and_exit() -> ! {
    println!(
        "Usage: fieldfm --train <base> [options]

Options:
  --train <base>     train dataset base name (required; reads <base>.index and <base>.data)
  --val <base>       validation dataset, evaluated after every epoch
  --test <base>      test dataset to predict after training
  --pred <path>      file to save test predictions (one score per line)
  --model <name>     model variant: ffm | ffm-nn | ftrl | nn (default ffm)
  --epochs <n>       number of epochs (default 10)
  --threads <n>      number of threads (default 4)
  --average <n>      ensemble size, models averaged at prediction (default 1)
  --seed <n>         base random seed (default 2017)
  --dropout-log <n>  binary log of interaction drop probability; 0 disables (default 1)
  --eta <f>          learning rate (default 0.2)
  --lambda <f>       L2 regularization (default 0.00002)
  --restricted       restrict field interactions to cross-group terms
  --quiet            suppress progress output
  --help             print this message"
    );
    process::exit(0);
}

fn fatal(message: &str) -> ! {
    eprintln!("fieldfm: {message}");
    process::exit(1);
}

fn parse_args() -> Args {
    let mut train: Option<String> = None;
    let mut val: Option<String> = None;
    let mut test: Option<String> = None;
    let mut pred: Option<String> = None;
    let mut model = ModelName::Ffm;
    let mut epochs = 10u32;
    let mut threads = 4usize;
    let mut average = 1u64;
    let mut seed = 2017u64;
    let mut dropout_log = 1u32;
    let mut eta = 0.2f32;
    let mut lambda = 0.00002f32;
    let mut restricted = false;
    let mut quiet = false;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--train" => train = Some(it.next().unwrap_or_else(|| fatal("--train requires a value"))),
            "--val" => val = Some(it.next().unwrap_or_else(|| fatal("--val requires a value"))),
            "--test" => test = Some(it.next().unwrap_or_else(|| fatal("--test requires a value"))),
            "--pred" => pred = Some(it.next().unwrap_or_else(|| fatal("--pred requires a value"))),
            "--model" => {
                let name = it.next().unwrap_or_else(|| fatal("--model requires a value"));
                model = ModelName::parse(&name)
                    .unwrap_or_else(|| fatal(&format!("unknown model: {name}")));
            }
            "--epochs" => epochs = parse_value(it.next(), "--epochs"),
            "--threads" => threads = parse_value(it.next(), "--threads"),
            "--average" => average = parse_value(it.next(), "--average"),
            "--seed" => seed = parse_value(it.next(), "--seed"),
            "--dropout-log" => dropout_log = parse_value(it.next(), "--dropout-log"),
            "--eta" => eta = parse_value(it.next(), "--eta"),
            "--lambda" => lambda = parse_value(it.next(), "--lambda"),
            "--restricted" => restricted = true,
            "--quiet" => quiet = true,
            "--help" => print_help_and_exit(),
            other => fatal(&format!("unknown argument: {other}")),
        }
    }

    if average == 0 {
        fatal("--average must be at least 1");
    }

    Args {
        train: train.unwrap_or_else(|| fatal("--train is required")),
        val,
        test,
        pred,
        model,
        epochs,
        threads,
        average,
        seed,
        dropout_log,
        eta,
        lambda,
        restricted,
        quiet,
    }
}

fn parse_value<T: std::str::FromStr>(value: Option<String>, flag: &str) -> T {
    let value = value.unwrap_or_else(|| fatal(&format!("{flag} requires a value")));
    value
        .parse()
        .unwrap_or_else(|_| fatal(&format!("invalid value for {flag}: {value}")))
}

fn open_dataset(base: &str, logger: &TrainingLogger) -> Result<Dataset, TrainError> {
    let dataset = Dataset::open(base)?;
    logger.dataset_loaded(base, dataset.len());
    Ok(dataset)
}

fn run(args: &Args) -> Result<(), TrainError> {
    let verbosity = if args.quiet {
        Verbosity::Silent
    } else {
        Verbosity::Info
    };

    let trainer = Trainer::new(TrainParams {
        epochs: args.epochs,
        threads: args.threads,
        dropout_prob_log: args.dropout_log,
        seed: args.seed,
        verbosity,
        ..Default::default()
    });
    let logger = *trainer.logger();

    let options = ModelOptions {
        eta: args.eta,
        lambda: args.lambda,
        restricted: args.restricted,
    };
    let mut models: Vec<ModelKind> = (0..args.average)
        .map(|i| ModelKind::build(args.model, &options, args.seed.wrapping_add(i)))
        .collect();

    let ds_train = open_dataset(&args.train, &logger)?;
    let ds_val = match &args.val {
        Some(base) => Some(open_dataset(base, &logger)?),
        None => None,
    };

    for epoch in 0..args.epochs {
        logger.epoch(epoch);
        trainer.train_epoch(&mut models, &ds_train, epoch)?;

        if let Some(val) = &ds_val {
            trainer.evaluate(&models, val)?;
        }
    }

    if let (Some(test), Some(pred)) = (&args.test, &args.pred) {
        let ds_test = open_dataset(test, &logger)?;
        let predictions = trainer.predict(&models, &ds_test)?;

        let mut out = BufWriter::new(File::create(pred)?);
        for p in predictions {
            writeln!(out, "{p:.6}")?;
        }
        out.flush()?;
    }

    logger.finished();
    Ok(())
}

fn main() {
    let args = parse_args();
    if let Err(err) = run(&args) {
        fatal(&err.to_string());
    }
}
