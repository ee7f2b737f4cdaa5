// Shared fixtures for unit tests.

use image::{GrayImage, Luma};
use std::{fs, path::Path};

use crate::domain::{
    alphabet::{Alphabet, LabelCodec},
    error::Result,
    sample::{Batch, Matrix},
    traits::{Forward, Snapshot, Trainable},
};
use crate::infra::checkpoint::CheckpointMeta;

/// Write one `<label>_<i>.png` grayscale image per label into `dir`.
pub fn write_images(dir: &Path, labels: &[&str], height: usize, width: usize) {
    fs::create_dir_all(dir).unwrap();
    for (i, label) in labels.iter().enumerate() {
        let img = GrayImage::from_fn(width as u32, height as u32, |x, y| {
            Luma([((x * 17 + y * 31 + i as u32 * 7) % 256) as u8])
        });
        img.save(dir.join(format!("{label}_{i}.png"))).unwrap();
    }
}

pub fn label_codec(chars: &str, max_captcha: usize) -> LabelCodec {
    LabelCodec::new(Alphabet::new(chars).unwrap(), max_captcha)
}

/// Metadata for 8 x 8 images.
pub fn meta(chars: &str, max_captcha: usize) -> CheckpointMeta {
    CheckpointMeta {
        image_height: 8,
        image_width:  8,
        max_captcha,
        alphabet:     Alphabet::new(chars).unwrap(),
    }
}

/// Model stand-in: predicts all-zero logits (class 0 everywhere)
/// and stores its "parameters" as a plain byte string.
pub struct StubModel {
    pub bytes: Vec<u8>,
    outputs:   usize,
}

impl StubModel {
    pub fn new(bytes: &[u8]) -> Self {
        Self { bytes: bytes.to_vec(), outputs: 0 }
    }

    pub fn with_outputs(outputs: usize) -> Self {
        Self { bytes: b"fresh".to_vec(), outputs }
    }
}

impl Forward for StubModel {
    fn forward(&self, features: &Matrix) -> Result<Matrix> {
        Ok(Matrix::zeros(features.rows(), self.outputs))
    }
}

impl Trainable for StubModel {
    fn step(&mut self, _batch: &Batch) -> Result<f32> {
        Ok(0.5)
    }
}

impl Snapshot for StubModel {
    fn params_to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.bytes.clone())
    }

    fn params_from_bytes(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.bytes = bytes;
        Ok(())
    }
}
