// ============================================================
// Layer 6 — Accuracy and Metrics Logger
// ============================================================
// Two accuracies are measured on every evaluation:
//
//   char_acc  — fraction of the N × L label positions whose
//               arg-max class matches the label
//   image_acc — fraction of the N samples whose L positions all
//               match
//
// Each evaluation is appended to a CSV file so learning curves
// can be plotted after the run:
//
//   step,split,char_acc,image_acc,loss
//   10,train,0.412500,0.000000,0.1873420000
//   10,verify,0.397500,0.000000,0.1873420000

use anyhow::Result;
use std::{
    fmt,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use crate::domain::{alphabet::argmax, sample::Matrix};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Verify,
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Split::Train  => write!(f, "train"),
            Split::Verify => write!(f, "verify"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Accuracy {
    pub char_acc:  f32,
    pub image_acc: f32,
}

impl Accuracy {
    /// Compare per-segment arg-max of `predictions` and `labels`,
    /// both [N, L × K]. An empty batch scores zero.
    pub fn measure(predictions: &Matrix, labels: &Matrix, char_set_len: usize) -> Self {
        let rows = predictions.rows().min(labels.rows());
        if rows == 0 || char_set_len == 0 {
            return Self { char_acc: 0.0, image_acc: 0.0 };
        }

        let mut chars_right  = 0usize;
        let mut chars_total  = 0usize;
        let mut images_right = 0usize;

        for i in 0..rows {
            let mut all_right = true;
            for (p, l) in predictions
                .row(i)
                .chunks(char_set_len)
                .zip(labels.row(i).chunks(char_set_len))
            {
                chars_total += 1;
                if argmax(p) == argmax(l) {
                    chars_right += 1;
                } else {
                    all_right = false;
                }
            }
            if all_right {
                images_right += 1;
            }
        }

        Self {
            char_acc:  chars_right as f32 / chars_total.max(1) as f32,
            image_acc: images_right as f32 / rows as f32,
        }
    }
}

/// One evaluation of one split.
#[derive(Debug, Clone, Copy)]
pub struct EvalRecord {
    pub step:     usize,
    pub split:    Split,
    pub accuracy: Accuracy,
    pub loss:     f32,
}

/// Appends evaluation records to a CSV file.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet, so
    /// restarted runs keep appending to the same log.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let csv_path = dir.join("metrics.csv");

        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "step,split,char_acc,image_acc,loss")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    pub fn log(&self, r: &EvalRecord) -> Result<()> {
        let mut f = OpenOptions::new().append(true).open(&self.csv_path)?;
        writeln!(
            f,
            "{},{},{:.6},{:.6},{:.10}",
            r.step, r.split, r.accuracy.char_acc, r.accuracy.image_acc, r.loss,
        )?;
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn m(rows: usize, data: &[f32]) -> Matrix {
        Matrix::new(rows, data.len() / rows, data.to_vec()).unwrap()
    }

    #[test]
    fn test_char_and_image_accuracy() {
        // K = 2, L = 2, two samples
        let labels = m(2, &[1.0, 0.0, 0.0, 1.0, /**/ 0.0, 1.0, 0.0, 1.0]);
        // sample 0 fully right, sample 1 first position wrong
        let preds  = m(2, &[0.9, 0.1, 0.2, 0.8, /**/ 0.7, 0.3, 0.1, 0.6]);

        let acc = Accuracy::measure(&preds, &labels, 2);
        assert!((acc.char_acc - 0.75).abs() < 1e-6);
        assert!((acc.image_acc - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_empty_batch_scores_zero() {
        let acc = Accuracy::measure(&Matrix::zeros(0, 4), &Matrix::zeros(0, 4), 2);
        assert_eq!(acc, Accuracy { char_acc: 0.0, image_acc: 0.0 });
    }

    #[test]
    fn test_csv_header_written_once() {
        let tmp = TempDir::new().unwrap();
        let record = EvalRecord {
            step:     10,
            split:    Split::Verify,
            accuracy: Accuracy { char_acc: 0.5, image_acc: 0.25 },
            loss:     0.125,
        };

        MetricsLogger::new(tmp.path()).unwrap().log(&record).unwrap();
        MetricsLogger::new(tmp.path()).unwrap().log(&record).unwrap();

        let text = fs::read_to_string(tmp.path().join("metrics.csv")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "step,split,char_acc,image_acc,loss");
        assert_eq!(lines[1], "10,verify,0.500000,0.250000,0.1250000000");
    }
}
