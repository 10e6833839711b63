//! Blank margin detection for autocrop.
//!
//! The page is averaged down to a single pixel row spanning the full scan
//! width. Where no paper passed the sensor, that row shows the feeder's
//! background colour; the page starts at the first sufficiently long run of
//! anything else.

use crate::config::BlankProfile;
use crate::constants::{MAX_HEIGHT_INCHES, MIN_FEATURE_INCHES};
use crate::error::CropDetectionFailed;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An RGB pixel. Grayscale scans are expanded to three equal channels.
pub type Pixel = [u8; 3];

/// Column bounds of the page content, `left` inclusive and `right` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EdgeResult {
    pub left: u32,
    pub right: u32,
}

impl EdgeResult {
    pub fn width(&self) -> u32 {
        self.right - self.left
    }
}

/// True if any channel strays from `blank` by more than `tolerance`.
pub fn is_content(pixel: Pixel, blank: Pixel, tolerance: u8) -> bool {
    pixel.iter().zip(blank).any(|(&c, reference)| {
        let low = reference.saturating_sub(tolerance);
        let high = reference.saturating_add(tolerance);
        c < low || c > high
    })
}

/// Index where the first run of more than `min_run` content pixels starts, or
/// 0 if the whole line is blank.
pub fn find_edge(line: impl IntoIterator<Item = Pixel>, blank: Pixel, tolerance: u8, min_run: u32) -> u32 {
    let mut run = 0u32;
    for (index, pixel) in (0u32..).zip(line) {
        if is_content(pixel, blank, tolerance) {
            run += 1;
            if run > min_run {
                return index + 1 - run;
            }
        } else {
            run = 0;
        }
    }
    0
}

/// Shortest run of content pixels that counts as page, for a row `width` pixels wide.
pub fn min_run_for(width: usize) -> u32 {
    ((MIN_FEATURE_INCHES / MAX_HEIGHT_INCHES) * width as f64) as u32
}

/// Find both page edges on a resampled scan line.
pub fn detect_margins(
    line: &[Pixel],
    blank: Pixel,
    tolerance: u8,
    min_run: u32,
) -> Result<EdgeResult, CropDetectionFailed> {
    let width = line.len() as u32;
    let left = find_edge(line.iter().copied(), blank, tolerance, min_run);
    let right = width - find_edge(line.iter().rev().copied(), blank, tolerance, min_run);
    if left >= right {
        return Err(CropDetectionFailed { left, right });
    }
    Ok(EdgeResult { left, right })
}

/// [`detect_margins`] with the blank reference of `profile` and the default feature size.
pub fn detect_with_profile(line: &[Pixel], profile: BlankProfile) -> Result<EdgeResult, CropDetectionFailed> {
    detect_margins(line, profile.reference, profile.tolerance, min_run_for(line.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_reference_at_channel_limits() {
        assert!(!is_content([0, 0, 0], [10, 10, 10], 25));
        assert!(!is_content([255, 255, 255], [240, 240, 240], 25));
    }

    #[test]
    fn run_starting_at_first_column() {
        let ink = [200, 200, 200];
        assert_eq!(find_edge(vec![ink; 10], [44, 45, 45], 25, 5), 0);
        assert_eq!(find_edge(vec![ink; 6], [44, 45, 45], 25, 5), 0);
    }

    #[test]
    fn page_touching_both_sides() {
        let line = vec![[200, 200, 200]; 40];
        assert_eq!(
            detect_margins(&line, [44, 45, 45], 25, 5),
            Ok(EdgeResult { left: 0, right: 40 })
        );
    }

    #[test]
    fn single_channel_deviation_counts() {
        assert!(is_content([44, 45, 200], [44, 45, 45], 25));
    }
}
