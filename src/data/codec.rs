// ============================================================
// Layer 4 — Image Codec
// ============================================================
// Turns image file bytes into the flat feature vector the model
// consumes.
//
// Pipeline (applied in order):
//   1. decode     bytes → PixelGrid (H × W, optional channel axis)
//   2. to_gray    PixelGrid → GrayGrid (H × W)
//   3. normalize  GrayGrid → Vec<f32> of H × W values in [0, 1]
//
// Grayscale reduction uses the ITU-R 601 luma weights
//   gray = 0.2989 R + 0.5870 G + 0.1140 B
// for every image with colour channels. A grey+alpha image keeps
// its grey channel; alpha is always ignored.

use std::{fs, path::Path};

use image::{imageops::FilterType, DynamicImage};

use crate::domain::error::{CaptchaError, Result};

const LUMA_R: f32 = 0.2989;
const LUMA_G: f32 = 0.5870;
const LUMA_B: f32 = 0.1140;

/// Decoded pixels. `channels` is `None` for a plain 2D grid.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelGrid {
    pub height:   usize,
    pub width:    usize,
    pub channels: Option<usize>,
    pub data:     Vec<u8>,
}

impl PixelGrid {
    /// Number of axes: 2 for a single-channel grid, 3 otherwise.
    pub fn ndim(&self) -> usize {
        if self.channels.is_some() { 3 } else { 2 }
    }
}

/// A single-channel H × W grid of intensities in [0, 255].
#[derive(Debug, Clone, PartialEq)]
pub struct GrayGrid {
    pub height: usize,
    pub width:  usize,
    pub data:   Vec<f32>,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageCodec;

impl ImageCodec {
    pub fn new() -> Self {
        Self
    }

    /// Read and decode an image file.
    pub fn load(&self, path: &Path) -> Result<PixelGrid> {
        let bytes = fs::read(path)?;
        self.decode(&bytes)
    }

    /// Decode encoded image bytes (PNG, JPEG, GIF, ...).
    pub fn decode(&self, bytes: &[u8]) -> Result<PixelGrid> {
        let img = image::load_from_memory(bytes)?;
        Ok(Self::grid_from(img))
    }

    /// Decode and resize to exactly `height × width`.
    /// Images that already have that size are not resampled.
    pub fn decode_resized(&self, bytes: &[u8], height: usize, width: usize) -> Result<PixelGrid> {
        let img = image::load_from_memory(bytes)?;
        let img = if img.height() as usize == height && img.width() as usize == width {
            img
        } else {
            img.resize_exact(width as u32, height as u32, FilterType::Triangle)
        };
        Ok(Self::grid_from(img))
    }

    fn grid_from(img: DynamicImage) -> PixelGrid {
        let height = img.height() as usize;
        let width  = img.width() as usize;
        let color  = img.color();

        let (channels, data) = match (color.has_color(), color.has_alpha()) {
            (false, false) => (None, img.to_luma8().into_raw()),
            (false, true)  => (Some(2), img.to_luma_alpha8().into_raw()),
            (true, false)  => (Some(3), img.to_rgb8().into_raw()),
            (true, true)   => (Some(4), img.to_rgba8().into_raw()),
        };
        PixelGrid { height, width, channels, data }
    }

    /// Reduce to one value per pixel. A 2D grid passes through.
    pub fn to_gray(&self, grid: &PixelGrid) -> Result<GrayGrid> {
        let pixels = grid.height * grid.width;
        let data: Vec<f32> = match grid.channels {
            None | Some(1) => grid.data.iter().map(|&v| v as f32).collect(),
            Some(c @ 2) => grid.data.chunks_exact(c).map(|px| px[0] as f32).collect(),
            Some(c) if c >= 3 => grid
                .data
                .chunks_exact(c)
                .map(|px| LUMA_R * px[0] as f32 + LUMA_G * px[1] as f32 + LUMA_B * px[2] as f32)
                .collect(),
            Some(c) => {
                return Err(CaptchaError::config(format!("unsupported channel count {c}")));
            }
        };

        if data.len() != pixels {
            return Err(CaptchaError::config(format!(
                "pixel grid holds {} pixels, expected {} x {}",
                data.len(),
                grid.height,
                grid.width
            )));
        }
        Ok(GrayGrid { height: grid.height, width: grid.width, data })
    }

    /// Flatten row-major and scale to [0, 1].
    pub fn normalize(&self, gray: &GrayGrid) -> Vec<f32> {
        debug_assert_eq!(gray.data.len(), gray.height * gray.width);
        gray.data.iter().map(|&v| (v / 255.0).clamp(0.0, 1.0)).collect()
    }

    /// decode → to_gray → normalize in one call.
    pub fn features(&self, grid: &PixelGrid) -> Result<Vec<f32>> {
        Ok(self.normalize(&self.to_gray(grid)?))
    }
}

impl Default for ImageCodec {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat, Luma, Rgb, RgbImage};
    use std::io::Cursor;

    fn png(img: DynamicImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_gray_png_decodes_to_2d() {
        let img   = GrayImage::from_fn(5, 3, |x, _| Luma([(x * 50) as u8]));
        let grid  = ImageCodec::new().decode(&png(DynamicImage::ImageLuma8(img))).unwrap();
        assert_eq!(grid.ndim(), 2);
        assert_eq!((grid.height, grid.width), (3, 5));
    }

    #[test]
    fn test_rgb_reduces_with_luma_weights() {
        let img   = RgbImage::from_pixel(2, 2, Rgb([255, 0, 0]));
        let codec = ImageCodec::new();
        let grid  = codec.decode(&png(DynamicImage::ImageRgb8(img))).unwrap();
        assert_eq!(grid.channels, Some(3));

        let gray = codec.to_gray(&grid).unwrap();
        assert!((gray.data[0] - 0.2989 * 255.0).abs() < 1e-3);
    }

    #[test]
    fn test_two_d_grid_passes_through_unchanged() {
        let grid = PixelGrid { height: 1, width: 3, channels: None, data: vec![0, 128, 255] };
        let gray = ImageCodec::new().to_gray(&grid).unwrap();
        assert_eq!(gray.data, vec![0.0, 128.0, 255.0]);
    }

    #[test]
    fn test_normalize_range_and_length() {
        let codec = ImageCodec::new();
        let img   = RgbImage::from_fn(7, 4, |x, y| Rgb([(x * 36) as u8, (y * 80) as u8, 255]));
        let grid  = codec.decode(&png(DynamicImage::ImageRgb8(img))).unwrap();
        let flat  = codec.features(&grid).unwrap();

        assert_eq!(flat.len(), 4 * 7);
        assert!(flat.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_resize_to_requested_shape() {
        let codec = ImageCodec::new();
        let bytes = png(DynamicImage::ImageLuma8(GrayImage::new(20, 10)));
        let grid  = codec.decode_resized(&bytes, 6, 12).unwrap();
        assert_eq!((grid.height, grid.width), (6, 12));
    }

    #[test]
    fn test_garbage_bytes_are_image_error() {
        let err = ImageCodec::new().decode(b"not an image").unwrap_err();
        assert!(matches!(err, CaptchaError::Image(_)));
    }
}
