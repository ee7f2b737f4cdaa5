// ============================================================
// Layer 4 — Captcha Batcher
// ============================================================
// Stacks individual image files into one Batch:
//
//   Input:  N image paths, each H × W pixels, label of L chars
//   Output: features [N, H × W] and labels [N, L × K]
//
// Every row is fully populated before the batch is returned.
// Images whose size differs from the corpus size are rejected
// rather than silently resized, since the training shapes are
// fixed at start-up.

use std::path::PathBuf;

use crate::data::{codec::ImageCodec, dataset::ImageSample};
use crate::domain::{
    alphabet::LabelCodec,
    error::{CaptchaError, Result},
    sample::{Batch, Matrix},
};

#[derive(Debug, Clone)]
pub struct CaptchaBatcher {
    codec:  ImageCodec,
    labels: LabelCodec,
    height: usize,
    width:  usize,
}

impl CaptchaBatcher {
    pub fn new(labels: LabelCodec, height: usize, width: usize) -> Self {
        Self { codec: ImageCodec::new(), labels, height, width }
    }

    pub fn feature_len(&self) -> usize {
        self.height * self.width
    }

    /// Decode, normalise and one-hot every item into a single batch.
    pub fn batch(&self, items: &[PathBuf]) -> Result<Batch> {
        let mut features = Matrix::zeros(items.len(), self.feature_len());
        let mut labels   = Matrix::zeros(items.len(), self.labels.vector_len());

        for (i, path) in items.iter().enumerate() {
            let sample = ImageSample::load(&self.codec, path)?;
            if sample.grid.height != self.height || sample.grid.width != self.width {
                return Err(CaptchaError::config(format!(
                    "'{}' is {} x {}, expected {} x {}",
                    sample.path.display(),
                    sample.grid.height,
                    sample.grid.width,
                    self.height,
                    self.width
                )));
            }

            features.row_mut(i).copy_from_slice(&self.codec.features(&sample.grid)?);
            labels.row_mut(i).copy_from_slice(&self.labels.encode(&sample.label)?);
        }

        Ok(Batch { features, labels })
    }
}
