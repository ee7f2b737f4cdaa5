// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from image files on disk to numeric batches.
//
//   train/ and verify/ directories
//       │
//       ▼
//   CorpusIndex    → lists, shuffles and slices file paths
//       │
//       ▼
//   ImageSample    → filename label + decoded pixel grid
//       │
//       ▼
//   ImageCodec     → grayscale, normalise to [0, 1]
//       │
//       ▼
//   CaptchaBatcher → features [N, H×W], one-hot labels [N, L×K]
//
// Nothing here knows about Burn; the ML layer converts batches
// to tensors.

/// Image decoding, grayscale reduction and normalisation
pub mod codec;

/// Labelled image samples and filename label parsing
pub mod dataset;

/// Train/verify file listing, shuffling and batch slicing
pub mod corpus;

/// Stacks samples into feature and label matrices
pub mod batcher;
