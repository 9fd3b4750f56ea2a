//! Resize + to-tensor preprocessing.

use crate::types::{DatasetError, DatasetResult, RawImage};
use image::imageops::FilterType;
use image::GrayImage;

/// Resize a grayscale image to a fixed size, then scale intensities to [0, 1].
#[derive(Debug, Clone, Copy)]
pub struct ImageTransform {
    /// Output (width, height). `None` keeps the source size.
    pub target_size: Option<(u32, u32)>,
    pub filter: FilterType,
}

impl Default for ImageTransform {
    fn default() -> Self {
        Self::resize(32, 32)
    }
}

impl ImageTransform {
    /// Bilinear resize to `width` x `height`.
    pub fn resize(width: u32, height: u32) -> Self {
        Self {
            target_size: Some((width, height)),
            filter: FilterType::Triangle,
        }
    }

    pub fn identity() -> Self {
        Self {
            target_size: None,
            filter: FilterType::Triangle,
        }
    }

    /// Output dimensions for a sample of the given source size.
    pub fn output_size(&self, width: u32, height: u32) -> (u32, u32) {
        self.target_size.unwrap_or((width, height))
    }

    /// Returns the sample as a [1, H, W] float buffer (flattened).
    pub fn apply(&self, index: usize, sample: &RawImage) -> DatasetResult<Vec<f32>> {
        if sample.pixels.len() != sample.expected_len() {
            return Err(DatasetError::PixelCount {
                index,
                width: sample.width,
                height: sample.height,
                expected: sample.expected_len(),
                actual: sample.pixels.len(),
            });
        }
        let (out_w, out_h) = self.output_size(sample.width, sample.height);
        if out_w == 0 || out_h == 0 {
            return Err(DatasetError::Other(format!(
                "invalid transform target {out_w}x{out_h}"
            )));
        }
        if (out_w, out_h) == (sample.width, sample.height) {
            return Ok(to_unit_floats(&sample.pixels));
        }
        let img = GrayImage::from_raw(sample.width, sample.height, sample.pixels.clone())
            .ok_or_else(|| DatasetError::Other(format!("sample {index}: bad image buffer")))?;
        let resized = image::imageops::resize(&img, out_w, out_h, self.filter);
        Ok(to_unit_floats(resized.as_raw()))
    }
}

fn to_unit_floats(pixels: &[u8]) -> Vec<f32> {
    pixels.iter().map(|&p| p as f32 / 255.0).collect()
}
