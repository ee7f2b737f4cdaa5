// ============================================================
// Layer 3 — Error Taxonomy
// ============================================================
// Every recoverable failure in the library layers maps to one
// of these variants. The application layer wraps them in
// anyhow with file-path context.
//
//   Config      — bad corpus, bad image shape, suffix mismatch
//   NotFound    — no checkpoint where one was required
//   Format      — checkpoint present but incompatible/corrupt
//   Persistence — a save did not complete
//
// Whether NotFound/Format are fatal depends on the caller:
// the inference engine refuses to start, the training loop
// falls back to a fresh model.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CaptchaError>;

#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("no checkpoint found at '{}'", path.display())]
    NotFound { path: PathBuf },

    #[error("incompatible checkpoint at '{}': {reason}", path.display())]
    Format { path: PathBuf, reason: String },

    #[error("failed to persist checkpoint to '{}': {reason}", path.display())]
    Persistence { path: PathBuf, reason: String },

    #[error("cannot decode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("invalid label '{label}': {reason}")]
    Label { label: String, reason: String },

    #[error("model error: {0}")]
    Model(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptchaError {
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    pub fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Format { path: path.into(), reason: reason.into() }
    }

    pub fn persistence(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Persistence { path: path.into(), reason: reason.into() }
    }

    /// True for the two restore failures the training loop treats
    /// as "no prior model".
    pub fn is_cold_start(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Format { .. })
    }
}
