// ============================================================
// Layer 4 — Corpus Index
// ============================================================
// Enumerates the train and verify directories and hands out
// batches of file paths.
//
// Train batches are exhaustive slices of a list shuffled once at
// construction:
//
//   max_batches = floor(len(train) / size)
//   offset      = offset mod max_batches
//   slice       = train[offset * size .. (offset + 1) * size]
//
// so an offset past the end of the corpus replays an earlier
// slice, and the trailing len(train) mod size files are never
// used. Verify batches are drawn uniformly with replacement and
// may repeat a file within one batch.
//
// The random source is injected so a seeded generator yields the
// same shuffle and the same verify draws on every run.

use rand::{seq::SliceRandom, Rng};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::data::batcher::CaptchaBatcher;
use crate::domain::{
    error::{CaptchaError, Result},
    sample::Batch,
};

/// File listings of a train and a verify directory.
pub struct CorpusIndex<R: Rng> {
    train_dir:  PathBuf,
    verify_dir: PathBuf,
    /// Shuffled once in `open`, fixed afterwards.
    train:      Vec<PathBuf>,
    /// Sorted by name.
    verify:     Vec<PathBuf>,
    /// Source of verify draws.
    rng:        R,
}

impl<R: Rng> CorpusIndex<R> {
    /// List both directories and shuffle the training files.
    ///
    /// With `required_suffix` set, every training file must carry
    /// that extension or construction fails.
    pub fn open(
        train_dir:       impl Into<PathBuf>,
        verify_dir:      impl Into<PathBuf>,
        required_suffix: Option<&str>,
        mut rng:         R,
    ) -> Result<Self> {
        let train_dir  = train_dir.into();
        let verify_dir = verify_dir.into();

        let mut train = list_files(&train_dir)?;
        let verify    = list_files(&verify_dir)?;

        if train.is_empty() {
            return Err(CaptchaError::config(format!(
                "training directory '{}' contains no images",
                train_dir.display()
            )));
        }
        if verify.is_empty() {
            return Err(CaptchaError::config(format!(
                "verify directory '{}' contains no images",
                verify_dir.display()
            )));
        }

        if let Some(suffix) = required_suffix {
            check_suffix(&train, suffix)?;
            tracing::info!(
                "All {} training files end in '.{}'",
                train.len(),
                suffix.trim_start_matches('.')
            );
        }

        train.shuffle(&mut rng);

        Ok(Self { train_dir, verify_dir, train, verify, rng })
    }

    /// Directory the training files were listed from.
    pub fn train_dir(&self) -> &Path {
        &self.train_dir
    }

    /// Directory the verify files were listed from.
    pub fn verify_dir(&self) -> &Path {
        &self.verify_dir
    }

    /// Training files in shuffled order.
    pub fn list_train(&self) -> &[PathBuf] {
        &self.train
    }

    /// Verify files in name order.
    pub fn list_verify(&self) -> &[PathBuf] {
        &self.verify
    }

    /// The `offset`-th slice of `size` training files, wrapping around.
    pub fn train_slice(&self, offset: usize, size: usize) -> Result<&[PathBuf]> {
        let max_batches = if size == 0 { 0 } else { self.train.len() / size };
        if max_batches < 1 {
            return Err(CaptchaError::config(format!(
                "batch size {} needs at least that many training images, found {}",
                size,
                self.train.len()
            )));
        }

        let offset = offset % max_batches;
        Ok(&self.train[offset * size..(offset + 1) * size])
    }

    /// `size` verify files drawn independently with replacement.
    pub fn verify_draw(&mut self, size: usize) -> Vec<PathBuf> {
        (0..size)
            .map(|_| {
                let i = self.rng.gen_range(0..self.verify.len());
                self.verify[i].clone()
            })
            .collect()
    }

    /// Decoded training batch for `train_slice(offset, size)`.
    pub fn batch(&self, offset: usize, size: usize, batcher: &CaptchaBatcher) -> Result<Batch> {
        batcher.batch(self.train_slice(offset, size)?)
    }

    /// Decoded batch of `size` randomly drawn verify files.
    pub fn verify_batch(&mut self, size: usize, batcher: &CaptchaBatcher) -> Result<Batch> {
        let items = self.verify_draw(size);
        batcher.batch(&items)
    }
}

/// Regular files in `dir`, sorted by name so a seeded shuffle is
/// reproducible regardless of directory iteration order.
fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        CaptchaError::config(format!("cannot read directory '{}': {e}", dir.display()))
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Whether `path` has extension `suffix`. A leading dot on `suffix`
/// is ignored and the comparison is ASCII case-insensitive, so `png`,
/// `.png` and `PNG` all accept `x.png` and `X.PNG`.
pub fn has_suffix(path: &Path, suffix: &str) -> bool {
    let suffix = suffix.strip_prefix('.').unwrap_or(suffix);
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(suffix))
}

fn check_suffix(files: &[PathBuf], suffix: &str) -> Result<()> {
    for path in files {
        if !has_suffix(path, suffix) {
            return Err(CaptchaError::config(format!(
                "expected '.{}' images, found '{}'",
                suffix.trim_start_matches('.'),
                path.display()
            )));
        }
    }
    Ok(())
}
