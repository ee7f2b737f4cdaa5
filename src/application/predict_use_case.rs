// ============================================================
// Layer 2 — Predict Use Case
// ============================================================
// Builds one InferenceEngine and reuses it for every image:
//
//   predict   — label a list of image files
//   evaluate  — label every image in a directory and compare
//               against the label in each filename
//
// The engine's shapes come from the checkpoint manifest; any
// value given explicitly on the command line must agree with it
// or construction fails with a Format error.

use anyhow::{bail, Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use crate::data::{corpus::has_suffix, dataset::label_from_filename};
use crate::domain::alphabet::Alphabet;
use crate::infra::checkpoint::{CheckpointMeta, CheckpointStore};
use crate::ml::{
    inferencer::{open_cnn_engine, InferenceEngine},
    learner::CnnPredictor,
};

type InferBackend = burn::backend::Wgpu;

/// Shapes requested by the caller; `None` means "use the checkpoint's".
#[derive(Debug, Clone, Default)]
pub struct EngineShape {
    pub image_height: Option<usize>,
    pub image_width:  Option<usize>,
    pub max_captcha:  Option<usize>,
    pub alphabet:     Option<String>,
}

impl EngineShape {
    fn resolve(&self, store: &CheckpointStore) -> Result<CheckpointMeta> {
        if let (Some(h), Some(w), Some(l), Some(a)) =
            (self.image_height, self.image_width, self.max_captcha, &self.alphabet)
        {
            return Ok(CheckpointMeta {
                image_height: h,
                image_width:  w,
                max_captcha:  l,
                alphabet:     Alphabet::new(a)?,
            });
        }

        let stored = store.read_meta().with_context(|| {
            format!(
                "Cannot read checkpoint metadata from '{}'. Have you run 'train' first?",
                store.manifest_path().display()
            )
        })?;
        Ok(CheckpointMeta {
            image_height: self.image_height.unwrap_or(stored.image_height),
            image_width:  self.image_width.unwrap_or(stored.image_width),
            max_captcha:  self.max_captcha.unwrap_or(stored.max_captcha),
            alphabet:     match &self.alphabet {
                Some(a) => Alphabet::new(a)?,
                None    => stored.alphabet,
            },
        })
    }
}

#[derive(Debug, Clone)]
pub struct Prediction {
    pub path:    PathBuf,
    pub text:    String,
    pub latency: Duration,
}

#[derive(Debug, Clone)]
pub struct EvalSummary {
    pub total:        usize,
    pub correct:      usize,
    pub skipped:      usize,
    pub mean_latency: Duration,
}

impl EvalSummary {
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 { 0.0 } else { self.correct as f64 / self.total as f64 }
    }
}

pub struct PredictUseCase {
    engine: InferenceEngine<CnnPredictor<InferBackend>>,
}

impl PredictUseCase {
    pub fn new(model_dir: &str, model_name: &str, shape: &EngineShape) -> Result<Self> {
        let store  = CheckpointStore::new(model_dir, model_name);
        if !store.exists() {
            bail!(
                "No checkpoint at '{}'. Have you run 'train' first?",
                store.manifest_path().display()
            );
        }
        let meta   = shape.resolve(&store)?;
        let device = burn::backend::wgpu::WgpuDevice::default();

        let engine = open_cnn_engine::<InferBackend>(meta, &store, device)
            .with_context(|| format!("Cannot load model from '{}'", model_dir))?;
        tracing::info!(
            "Model ready: {} x {} images, {} characters from '{}'",
            engine.meta().image_height,
            engine.meta().image_width,
            engine.meta().max_captcha,
            engine.meta().alphabet.as_string()
        );
        Ok(Self { engine })
    }

    pub fn predict_files(&self, paths: &[PathBuf]) -> Result<Vec<Prediction>> {
        paths
            .iter()
            .map(|path| {
                let start = Instant::now();
                let text  = self
                    .engine
                    .predict_file(path)
                    .with_context(|| format!("Cannot predict '{}'", path.display()))?;
                let latency = start.elapsed();
                tracing::debug!("{} → {} in {:?}", path.display(), text, latency);
                Ok(Prediction { path: path.clone(), text, latency })
            })
            .collect()
    }

    /// Predict every `.<suffix>` file in `dir` and score it against
    /// its filename label. Unreadable images are skipped with a warning.
    pub fn evaluate_dir(&self, dir: &Path, suffix: &str) -> Result<EvalSummary> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("Cannot read directory '{}'", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && has_suffix(p, suffix))
            .collect();
        files.sort();

        let mut summary = EvalSummary {
            total:        0,
            correct:      0,
            skipped:      0,
            mean_latency: Duration::ZERO,
        };
        let mut elapsed = Duration::ZERO;

        for path in &files {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                summary.skipped += 1;
                continue;
            };
            let start = Instant::now();
            match self.engine.predict_file(path) {
                Ok(text) => {
                    elapsed += start.elapsed();
                    summary.total += 1;
                    if text == label_from_filename(name) {
                        summary.correct += 1;
                    } else {
                        tracing::debug!("{}: predicted '{}'", name, text);
                    }
                }
                Err(e) => {
                    tracing::warn!("Skipping '{}': {}", path.display(), e);
                    summary.skipped += 1;
                }
            }
        }

        if summary.total > 0 {
            summary.mean_latency = elapsed / summary.total as u32;
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{meta, StubModel};
    use tempfile::TempDir;

    #[test]
    fn test_full_shape_skips_manifest() {
        let tmp   = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path(), "model");
        let shape = EngineShape {
            image_height: Some(60),
            image_width:  Some(160),
            max_captcha:  Some(4),
            alphabet:     Some("0123456789".to_string()),
        };
        let resolved = shape.resolve(&store).unwrap();
        assert_eq!(resolved.image_height, 60);
        assert_eq!(resolved.alphabet.len(), 10);
    }

    #[test]
    fn test_partial_shape_fills_from_manifest() {
        let tmp   = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path(), "model");
        store.save(&StubModel::new(b"w"), &meta("abc", 3)).unwrap();

        let shape    = EngineShape { max_captcha: Some(5), ..Default::default() };
        let resolved = shape.resolve(&store).unwrap();
        assert_eq!(resolved.image_height, 8);
        assert_eq!(resolved.image_width, 8);
        assert_eq!(resolved.max_captcha, 5);
        assert_eq!(resolved.alphabet.as_string(), "abc");
    }

    #[test]
    fn test_missing_manifest_is_an_error() {
        let tmp   = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path(), "model");
        assert!(EngineShape::default().resolve(&store).is_err());
    }

    #[test]
    fn test_summary_accuracy() {
        let empty = EvalSummary { total: 0, correct: 0, skipped: 2, mean_latency: Duration::ZERO };
        assert_eq!(empty.accuracy(), 0.0);
        let half = EvalSummary { total: 4, correct: 2, skipped: 0, mean_latency: Duration::ZERO };
        assert!((half.accuracy() - 0.5).abs() < 1e-12);
    }
}
