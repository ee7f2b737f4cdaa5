// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the three subcommands: `train`, `predict` and `evaluate`
// and all their configurable flags.

use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::application::{predict_use_case::EngineShape, train_use_case::TrainConfig};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train the CNN on a directory of labelled captcha images
    Train(TrainArgs),

    /// Predict the text of one or more captcha images
    Predict(PredictArgs),

    /// Score a trained model against a labelled image directory
    Evaluate(EvaluateArgs),
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// JSON config file; when given, the flags below are ignored
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory of training images named `<label>_<anything>.<suffix>`
    #[arg(long, default_value = "sample/train")]
    pub train_img_path: String,

    /// Directory of held-out images used for verification
    #[arg(long, default_value = "sample/test")]
    pub verify_img_path: String,

    /// Characters the model can emit, in class order
    #[arg(long, default_value = "0123456789abcdefghijklmnopqrstuvwxyz")]
    pub alphabet: String,

    #[arg(long, default_value = "model")]
    pub model_save_dir: String,

    #[arg(long, default_value = "model")]
    pub model_save_name: String,

    /// Maximum number of training steps
    #[arg(long, default_value_t = 3000)]
    pub cycle_stop: usize,

    /// Accuracy target for early stopping: training stops once train
    /// image accuracy is at least this value on 5 evaluations in a row,
    /// or as soon as one verify image accuracy is strictly above it
    #[arg(long, default_value_t = 0.99)]
    pub acc_stop: f32,

    /// Save a checkpoint every this many steps
    #[arg(long, default_value_t = 500)]
    pub cycle_save: usize,

    #[arg(long, default_value = "png")]
    pub image_suffix: String,

    #[arg(long, default_value_t = 128)]
    pub train_batch_size: usize,

    #[arg(long, default_value_t = 100)]
    pub test_batch_size: usize,

    /// Reject image directories containing files without `image_suffix`
    #[arg(long)]
    pub verify: bool,

    #[arg(long, default_value_t = 1e-4)]
    pub learning_rate: f64,

    #[arg(long, default_value_t = 0.25)]
    pub dropout: f64,

    /// Seed for shuffling and verify sampling
    #[arg(long)]
    pub seed: Option<u64>,
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            train_img_path:   a.train_img_path,
            verify_img_path:  a.verify_img_path,
            alphabet:         a.alphabet,
            model_save_dir:   a.model_save_dir,
            model_save_name:  a.model_save_name,
            cycle_stop:       a.cycle_stop,
            acc_stop:         a.acc_stop,
            cycle_save:       a.cycle_save,
            image_suffix:     a.image_suffix,
            train_batch_size: a.train_batch_size,
            test_batch_size:  a.test_batch_size,
            verify:           a.verify,
            learning_rate:    a.learning_rate,
            dropout:          a.dropout,
            seed:             a.seed,
        }
    }
}

/// Where the checkpoint lives and which shapes to expect.
/// Shapes default to the values recorded in the checkpoint manifest.
#[derive(Args, Debug)]
pub struct ModelArgs {
    #[arg(long, default_value = "model")]
    pub model_dir: String,

    #[arg(long, default_value = "model")]
    pub model_name: String,

    #[arg(long)]
    pub image_height: Option<usize>,

    #[arg(long)]
    pub image_width: Option<usize>,

    #[arg(long)]
    pub max_captcha: Option<usize>,

    #[arg(long)]
    pub alphabet: Option<String>,
}

impl ModelArgs {
    pub fn shape(&self) -> EngineShape {
        EngineShape {
            image_height: self.image_height,
            image_width:  self.image_width,
            max_captcha:  self.max_captcha,
            alphabet:     self.alphabet.clone(),
        }
    }
}

#[derive(Args, Debug)]
pub struct PredictArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Image files to label
    #[arg(required = true)]
    pub images: Vec<PathBuf>,
}

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Directory of labelled images
    #[arg(long, default_value = "sample/test")]
    pub dir: PathBuf,

    #[arg(long, default_value = "png")]
    pub image_suffix: String,
}
