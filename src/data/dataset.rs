use std::path::{Path, PathBuf};

use crate::data::codec::{ImageCodec, PixelGrid};
use crate::domain::error::{CaptchaError, Result};

/// Filenames look like `<label>_<anything>.<suffix>`.
pub const LABEL_SEPARATOR: char = '_';

/// Ground-truth label encoded in a filename: the text before the
/// first separator, or the whole stem when there is none.
pub fn label_from_filename(name: &str) -> &str {
    match name.split_once(LABEL_SEPARATOR) {
        Some((label, _)) => label,
        None => Path::new(name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(name),
    }
}

/// One decoded image with its label. Lives only as long as the batch
/// being built from it.
#[derive(Debug, Clone)]
pub struct ImageSample {
    pub path:  PathBuf,
    pub label: String,
    pub grid:  PixelGrid,
}

impl ImageSample {
    pub fn load(codec: &ImageCodec, path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| CaptchaError::config(format!("unreadable filename '{}'", path.display())))?;
        let label = label_from_filename(name).to_string();
        let grid  = codec.load(path)?;
        Ok(Self { path: path.to_path_buf(), label, grid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_is_text_before_first_separator() {
        assert_eq!(label_from_filename("a3k9_1587381932.png"), "a3k9");
        assert_eq!(label_from_filename("x1_y2_z3.png"), "x1");
    }

    #[test]
    fn test_label_without_separator_is_stem() {
        assert_eq!(label_from_filename("q7w8.png"), "q7w8");
    }
}
