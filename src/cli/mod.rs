// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Parses command line arguments with clap and routes each
// subcommand to its Layer 2 use case:
//   1. `train`    — fit the CNN and write checkpoints
//   2. `predict`  — label individual images
//   3. `evaluate` — score a checkpoint against a labelled directory

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, EvaluateArgs, PredictArgs, TrainArgs};

use crate::application::train_use_case::TrainConfig;

#[derive(Parser, Debug)]
#[command(
    name = "captcha-cnn",
    version = "0.1.0",
    about = "Train a CNN to read fixed-length text captchas, then use it to predict."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)    => run_train(args),
            Commands::Predict(args)  => run_predict(args),
            Commands::Evaluate(args) => run_evaluate(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    let config = match &args.config {
        Some(path) => TrainConfig::from_json_file(path)?,
        None       => args.into(),
    };
    tracing::info!("Starting training on images in: {}", config.train_img_path);

    let report = TrainUseCase::new(config).execute()?;

    let acc = report
        .verify_image_acc
        .map(|a| format!("{:.4}", a))
        .unwrap_or_else(|| "n/a".to_string());
    println!(
        "Training finished after {} steps ({:?}). Verify accuracy: {}",
        report.steps_run, report.state, acc
    );
    Ok(())
}

fn run_predict(args: PredictArgs) -> Result<()> {
    use crate::application::predict_use_case::PredictUseCase;

    let use_case = PredictUseCase::new(&args.model.model_dir, &args.model.model_name, &args.model.shape())?;
    for p in use_case.predict_files(&args.images)? {
        tracing::info!("{}: {:.1} ms", p.path.display(), p.latency.as_secs_f64() * 1000.0);
        println!("{}\t{}", p.path.display(), p.text);
    }
    Ok(())
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    use crate::application::predict_use_case::PredictUseCase;

    let use_case = PredictUseCase::new(&args.model.model_dir, &args.model.model_name, &args.model.shape())?;
    let summary  = use_case.evaluate_dir(&args.dir, &args.image_suffix)?;

    println!(
        "Correct: {}/{}  Accuracy: {:.4}  Mean latency: {:.1} ms  Skipped: {}",
        summary.correct,
        summary.total,
        summary.accuracy(),
        summary.mean_latency.as_secs_f64() * 1000.0,
        summary.skipped
    );
    Ok(())
}
