//! Blank-frame heuristic
//!
//! A screenshot is shrunk to a tiny greyscale thumbnail and the number of
//! distinct byte values is counted. Loading screens, white pages and error
//! placeholders collapse to a handful of values, real pages rarely do.
//! False positives and false negatives are both expected.

use crate::{CaptureError, Config};
use image::imageops::FilterType;

#[derive(Debug, Clone, Copy)]
pub struct BlankFrameDetector {
    thumbnail_size: u32,
    threshold: usize,
}

impl BlankFrameDetector {
    pub fn new(thumbnail_size: u32, threshold: usize) -> Self {
        Self {
            thumbnail_size,
            threshold,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.thumbnail_size, config.blank_threshold)
    }

    /// Counts the distinct greyscale values of the downscaled image.
    pub fn distinct_values(&self, encoded: &[u8]) -> Result<usize, CaptureError> {
        let thumbnail = image::load_from_memory(encoded)?
            .resize_exact(self.thumbnail_size, self.thumbnail_size, FilterType::Triangle)
            .to_luma8();

        let mut seen = [false; 256];
        for &value in thumbnail.as_raw() {
            seen[value as usize] = true;
        }

        Ok(seen.iter().filter(|&&present| present).count())
    }

    pub fn is_likely_blank(&self, encoded: &[u8]) -> Result<bool, CaptureError> {
        Ok(self.distinct_values(encoded)? < self.threshold)
    }
}

impl Default for BlankFrameDetector {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
