// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Files the system writes next to the model:
//
//   checkpoint.rs — Versioned parameter snapshots plus the
//                   metadata (image size, label length,
//                   alphabet) needed to rebuild the model for
//                   inference without a corpus.
//
//   metrics.rs    — Accuracy measurement and a CSV log of every
//                   evaluation for plotting learning curves.

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Accuracy and training metrics CSV logger
pub mod metrics;
