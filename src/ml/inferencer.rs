// ============================================================
// Layer 5 — Inference Engine
// ============================================================
// A long-lived predictor. Construction does all the expensive
// work once:
//   - build the model for the fixed (H, W, L, alphabet)
//   - load the checkpoint, failing with NotFound / Format
// After that, predict() only runs
//   decode → resize → grayscale → normalise → forward → arg-max
// so repeated single-image queries never rebuild the model or
// re-read the checkpoint. The engine owns its model exclusively
// and never mutates it.

use burn::prelude::*;
use std::{fs, path::Path};

use crate::data::codec::ImageCodec;
use crate::domain::{
    alphabet::LabelCodec,
    error::Result,
    sample::Matrix,
    traits::{Forward, Snapshot},
};
use crate::infra::checkpoint::{CheckpointMeta, CheckpointStore};
use crate::ml::{learner::CnnPredictor, model::CaptchaCnnConfig};

/// A loaded model plus the codecs needed to turn image bytes into text.
pub struct InferenceEngine<M: Forward + Snapshot> {
    model:  M,
    codec:  ImageCodec,
    labels: LabelCodec,
    meta:   CheckpointMeta,
}

impl<M: Forward + Snapshot> InferenceEngine<M> {
    /// Load the checkpoint into `model` eagerly. There is no lazy or
    /// retry path: an engine either exists fully loaded or not at all.
    pub fn new(mut model: M, meta: CheckpointMeta, store: &CheckpointStore) -> Result<Self> {
        store.load(&mut model, &meta)?;
        let labels = LabelCodec::new(meta.alphabet.clone(), meta.max_captcha);
        Ok(Self { model, codec: ImageCodec::new(), labels, meta })
    }

    pub fn meta(&self) -> &CheckpointMeta {
        &self.meta
    }

    /// Predict the label of encoded image bytes.
    pub fn predict(&self, image: &[u8]) -> Result<String> {
        let grid     = self.codec.decode_resized(image, self.meta.image_height, self.meta.image_width)?;
        let features = Matrix::from_row(self.codec.features(&grid)?);
        let logits   = self.model.forward(&features)?;
        self.labels.decode(logits.row(0))
    }

    pub fn predict_file(&self, path: &Path) -> Result<String> {
        self.predict(&fs::read(path)?)
    }
}

/// Build a Burn CNN for `meta` on `device` and wrap it in an engine.
pub fn open_cnn_engine<B: Backend>(
    meta:   CheckpointMeta,
    store:  &CheckpointStore,
    device: B::Device,
) -> Result<InferenceEngine<CnnPredictor<B>>> {
    let config = CaptchaCnnConfig::new(
        meta.image_height,
        meta.image_width,
        meta.max_captcha,
        meta.alphabet.len(),
    );
    let model = config.init::<B>(&device)?;
    InferenceEngine::new(CnnPredictor::new(model, device), meta, store)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{alphabet::Alphabet, error::CaptchaError, sample::Batch, traits::Trainable};
    use crate::ml::learner::CnnLearner;
    use crate::test_support::{meta, write_images};
    use burn::{
        backend::{Autodiff, NdArray},
        optim::AdamConfig,
    };
    use tempfile::TempDir;

    type TestBackend = NdArray;

    #[test]
    fn test_missing_checkpoint_is_not_found() {
        let tmp   = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path(), "model");
        let err   = open_cnn_engine::<TestBackend>(meta("ab", 2), &store, Default::default())
            .err()
            .unwrap();
        assert!(matches!(err, CaptchaError::NotFound { .. }));
    }

    #[test]
    fn test_different_alphabet_size_is_format_error() {
        let tmp    = TempDir::new().unwrap();
        let store  = CheckpointStore::new(tmp.path(), "model");
        let device = Default::default();

        let model   = CaptchaCnnConfig::new(8, 8, 2, 3).init::<TestBackend>(&device).unwrap();
        store.save(&CnnPredictor::new(model, device.clone()), &meta("abc", 2)).unwrap();

        let err = open_cnn_engine::<TestBackend>(meta("ab", 2), &store, device)
            .err()
            .unwrap();
        assert!(matches!(err, CaptchaError::Format { .. }));
    }

    #[test]
    fn test_saved_model_predicts_identically_after_reload() {
        let tmp    = TempDir::new().unwrap();
        let store  = CheckpointStore::new(tmp.path(), "model");
        let device = Default::default();
        let meta   = meta("ab", 2);

        write_images(tmp.path(), &["ab"], 8, 8);
        let image = fs::read(tmp.path().join("ab_0.png")).unwrap();

        // one training step so the weights differ from a fresh init
        let model = CaptchaCnnConfig::new(8, 8, 2, 2)
            .init::<Autodiff<TestBackend>>(&device)
            .unwrap();
        let mut learner = CnnLearner::new(model, AdamConfig::new().init(), 1e-3, device.clone());
        let codec    = ImageCodec::new();
        let features = Matrix::from_row(codec.features(&codec.decode(&image).unwrap()).unwrap());
        let labels   = Matrix::from_row(vec![1.0, 0.0, 0.0, 1.0]);
        learner.step(&Batch { features: features.clone(), labels }).unwrap();
        store.save(&learner, &meta).unwrap();

        let engine = open_cnn_engine::<TestBackend>(meta.clone(), &store, device).unwrap();
        let before = learner.forward(&features).unwrap();
        let after  = engine.model.forward(&features).unwrap();
        for (a, b) in before.as_slice().iter().zip(after.as_slice()) {
            assert!((a - b).abs() < 1e-6);
        }

        let expected = LabelCodec::new(Alphabet::new("ab").unwrap(), 2).decode(before.row(0)).unwrap();
        assert_eq!(engine.predict(&image).unwrap(), expected);
    }

    #[test]
    fn test_predict_is_deterministic() {
        let tmp    = TempDir::new().unwrap();
        let store  = CheckpointStore::new(tmp.path(), "model");
        let device = Default::default();

        let model = CaptchaCnnConfig::new(8, 8, 2, 2).init::<TestBackend>(&device).unwrap();
        store.save(&CnnPredictor::new(model, device.clone()), &meta("ab", 2)).unwrap();
        let engine = open_cnn_engine::<TestBackend>(meta("ab", 2), &store, device).unwrap();

        // a larger image exercises the resize path too
        write_images(tmp.path(), &["ba"], 16, 24);
        let image = fs::read(tmp.path().join("ba_0.png")).unwrap();

        let first = engine.predict(&image).unwrap();
        assert_eq!(first.chars().count(), 2);
        assert_eq!(engine.predict(&image).unwrap(), first);
    }
}
