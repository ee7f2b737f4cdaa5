// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// This layer contains ALL Burn framework specific code.
// No other layer imports from burn directly — only this one
// (and the application layer, which picks the backend).
//
// What's in this layer:
//
//   model.rs      — The captcha CNN
//                   • three conv → ReLU → max-pool → dropout blocks
//                   • dense layer + dropout
//                   • L × K output logits
//                   • sigmoid cross-entropy loss
//
//   learner.rs    — Adapters from the CNN to the domain traits
//                   (CnnLearner for training, CnnPredictor for
//                   inference) and parameter (de)serialisation
//
//   trainer.rs    — The training state machine: batching,
//                   evaluation, stopping policy, checkpoints
//
//   inferencer.rs — The inference engine: loads a checkpoint
//                   once and answers single-image queries

/// Captcha CNN architecture
pub mod model;

/// Burn adapters behind the Forward / Trainable / Snapshot traits
pub mod learner;

/// Training loop with stopping policy and checkpointing
pub mod trainer;

/// Inference engine — loads a checkpoint and predicts labels
pub mod inferencer;
