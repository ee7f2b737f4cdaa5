// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The trainable classifier is a black box behind two
// operations: a forward pass and a gradient step. Any
// differentiable backend can sit behind these traits without
// the training loop or the inference engine changing.
//
//   Forward   — predictions for a feature matrix
//   Trainable — Forward + one optimiser step on a batch
//   Snapshot  — parameter persistence, called only by
//               CheckpointStore
//
// Implementations:
//   - CnnLearner  (ml/learner.rs) → Forward + Trainable + Snapshot
//   - CnnPredictor (ml/learner.rs) → Forward + Snapshot

use crate::domain::error::Result;
use crate::domain::sample::{Batch, Matrix};

pub trait Forward {
    /// features: [n, H × W] → logits: [n, L × K]
    ///
    /// Must not change any parameter.
    fn forward(&self, features: &Matrix) -> Result<Matrix>;
}

pub trait Trainable: Forward {
    /// Run one optimiser step and return the batch loss
    /// measured before the update.
    fn step(&mut self, batch: &Batch) -> Result<f32>;
}

/// Parameter (de)serialisation. File layout and atomicity belong to
/// CheckpointStore; implementations only turn parameters into bytes
/// and back.
pub trait Snapshot {
    fn params_to_bytes(&self) -> Result<Vec<u8>>;

    /// Replace every trainable parameter. On error the current
    /// parameters are left untouched.
    fn params_from_bytes(&mut self, bytes: Vec<u8>) -> Result<()>;
}
