// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types and traits that describe what a captcha
// model consumes and produces.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain structs, enums, and traits
//
// The model itself is a black box to everything above this
// layer: the training loop and the inference engine only see
// the traits in `traits.rs`.

/// Ordered character set and label <-> one-hot conversion
pub mod alphabet;

/// Error taxonomy shared by every layer
pub mod error;

/// Row-major numeric matrices and training batches
pub mod sample;

/// Core abstractions over the trainable model
pub mod traits;
