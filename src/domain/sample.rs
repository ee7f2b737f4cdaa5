// ============================================================
// Layer 3 — Numeric Samples and Batches
// ============================================================
// Framework-neutral containers passed across the model seam.
// The ML layer turns these into Burn tensors; nothing above it
// knows tensors exist.

use crate::domain::error::{CaptchaError, Result};

/// A dense row-major matrix of f32.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(CaptchaError::Model(format!(
                "matrix data has {} values, expected {rows} x {cols}",
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self { rows, cols, data: vec![0.0; rows * cols] }
    }

    /// A one-row matrix holding a single feature vector.
    pub fn from_row(row: Vec<f32>) -> Self {
        Self { rows: 1, cols: row.len(), data: row }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn shape(&self) -> [usize; 2] {
        [self.rows, self.cols]
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
        &mut self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// One optimisation step's worth of data.
///
/// features: [batch_size, H × W]   labels: [batch_size, L × K]
#[derive(Debug, Clone)]
pub struct Batch {
    pub features: Matrix,
    pub labels:   Matrix,
}
