// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full training pipeline in order:
//
//   Step 1: Parse the alphabet                (Layer 3 - domain)
//   Step 2: Prepare the checkpoint directory  (Layer 6 - infra)
//   Step 3: Index and shuffle the corpus      (Layer 4 - data)
//   Step 4: Derive image size / label length  (Layer 5 - ml)
//   Step 5: Probe one batch                   (Layer 4 - data)
//   Step 6: Save config                       (Layer 2)
//   Step 7: Build the CNN and optimiser       (Layer 5 - ml)
//   Step 8: Restore, then run the loop        (Layer 5 - ml)

use anyhow::{Context, Result};
use burn::optim::AdamConfig;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::data::{batcher::CaptchaBatcher, corpus::CorpusIndex};
use crate::domain::alphabet::{Alphabet, LabelCodec};
use crate::infra::{checkpoint::CheckpointStore, metrics::MetricsLogger};
use crate::ml::{
    learner::CnnLearner,
    model::CaptchaCnnConfig,
    trainer::{derive_meta, LoopSettings, TrainReport, TrainingLoop},
};

type TrainBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

// ─── Training Configuration ──────────────────────────────────────────────────
// All parameters for a training run. Serialisable so it can be
// loaded from a JSON file and saved next to the checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub train_img_path:   String,
    pub verify_img_path:  String,
    pub alphabet:         String,
    pub model_save_dir:   String,
    pub model_save_name:  String,
    pub cycle_stop:       usize,
    pub acc_stop:         f32,
    pub cycle_save:       usize,
    pub image_suffix:     String,
    pub train_batch_size: usize,
    pub test_batch_size:  usize,
    pub verify:           bool,
    pub learning_rate:    f64,
    pub dropout:          f64,
    /// Fixed shuffle/sampling seed; time-seeded when absent.
    pub seed:             Option<u64>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            train_img_path:   "sample/train".to_string(),
            verify_img_path:  "sample/test".to_string(),
            alphabet:         "0123456789abcdefghijklmnopqrstuvwxyz".to_string(),
            model_save_dir:   "model".to_string(),
            model_save_name:  "model".to_string(),
            cycle_stop:       3000,
            acc_stop:         0.99,
            cycle_save:       500,
            image_suffix:     "png".to_string(),
            train_batch_size: 128,
            test_batch_size:  100,
            verify:           false,
            learning_rate:    1e-4,
            dropout:          0.25,
            seed:             None,
        }
    }
}

impl TrainConfig {
    /// Read a config file; missing keys fall back to the defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Cannot read config from '{}'", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Invalid config in '{}'", path.display()))
    }

    fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join("train_config.json");
        fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            cycle_stop:       self.cycle_stop,
            acc_stop:         self.acc_stop,
            cycle_save:       self.cycle_save,
            train_batch_size: self.train_batch_size,
            test_batch_size:  self.test_batch_size,
        }
    }
}

// ─── TrainUseCase ────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline end to end.
    pub fn execute(&self) -> Result<TrainReport> {
        let cfg = &self.config;

        // ── Step 1: Alphabet ─────────────────────────────────────────────────
        let alphabet = Alphabet::new(&cfg.alphabet)?;

        // ── Step 2: Checkpoint directory ─────────────────────────────────────
        let store = CheckpointStore::new(&cfg.model_save_dir, &cfg.model_save_name);
        store.ensure_dir()?;

        // ── Step 3: Corpus ───────────────────────────────────────────────────
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None       => StdRng::from_entropy(),
        };
        let suffix = cfg.verify.then_some(cfg.image_suffix.as_str());
        let corpus = CorpusIndex::open(&cfg.train_img_path, &cfg.verify_img_path, suffix, rng)
            .with_context(|| format!("Cannot index corpus under '{}'", cfg.train_img_path))?;

        // ── Step 4: Shapes from the first training image ─────────────────────
        let meta = derive_meta(&corpus, &alphabet)?;

        tracing::info!("Image size: {} x {}", meta.image_height, meta.image_width);
        tracing::info!("Captcha length: {}", meta.max_captcha);
        tracing::info!("{} classes: {}", alphabet.len(), alphabet.as_string());
        tracing::info!(
            "Train set: '{}' ({} images)",
            corpus.train_dir().display(),
            corpus.list_train().len()
        );
        tracing::info!(
            "Verify set: '{}' ({} images)",
            corpus.verify_dir().display(),
            corpus.list_verify().len()
        );

        // ── Step 5: Probe batch ──────────────────────────────────────────────
        // Fails now, not mid-run, if the batch size exceeds the corpus
        // or a label does not fit the alphabet.
        let batcher = CaptchaBatcher::new(
            LabelCodec::new(alphabet.clone(), meta.max_captcha),
            meta.image_height,
            meta.image_width,
        );
        let probe = corpus.batch(0, cfg.train_batch_size, &batcher)?;
        tracing::info!(
            "Probe batch: images {:?}, labels {:?}",
            probe.features.shape(),
            probe.labels.shape()
        );

        // ── Step 6: Save config ──────────────────────────────────────────────
        cfg.save(store.dir())?;

        // ── Step 7: Model and optimiser ──────────────────────────────────────
        let device = burn::backend::wgpu::WgpuDevice::default();
        tracing::info!("Using WGPU device: {:?}", device);

        let model = CaptchaCnnConfig::new(
            meta.image_height,
            meta.image_width,
            meta.max_captcha,
            alphabet.len(),
        )
        .with_dropout(cfg.dropout)
        .init::<TrainBackend>(&device)?;
        let optim   = AdamConfig::new().with_epsilon(1e-8).init();
        let learner = CnnLearner::new(model, optim, cfg.learning_rate, device);

        // ── Step 8: Restore and train ────────────────────────────────────────
        let metrics = MetricsLogger::new(store.dir())?;
        let mut training =
            TrainingLoop::new(learner, corpus, batcher, store, meta, cfg.loop_settings())?
                .with_metrics(metrics);
        training.restore()?;

        let report = training.run()?;
        tracing::info!(
            "Training finished: {:?} after {} steps, checkpoints at {:?}",
            report.state,
            report.steps_run,
            report.checkpoint_steps
        );
        Ok(report)
    }
}
