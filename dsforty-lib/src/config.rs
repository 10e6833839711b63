//! Validated scan settings and engine policies.

use crate::constants::{BLANK_COLOR, BLANK_GRAY, BLANK_TOLERANCE, MAX_HEIGHT_INCHES, MAX_WIDTH_INCHES};
use crate::error::ConfigError;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::time::Duration;
use strum_macros::Display;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Optical resolution supported by the DS-40.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Default, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u16)]
pub enum Resolution {
    #[default]
    #[strum(to_string = "300 dpi")]
    Dpi300 = 300,
    #[strum(to_string = "600 dpi")]
    Dpi600 = 600,
}

impl Resolution {
    pub fn dpi(self) -> u32 {
        u16::from(self) as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ColorMode {
    /// Only understood by later firmware revisions.
    #[strum(to_string = "mono")]
    Mono,
    #[strum(to_string = "gray")]
    Gray,
    #[default]
    #[strum(to_string = "color")]
    Color,
}

impl ColorMode {
    /// Four byte colour token sent after `#COL`.
    pub fn code(self) -> &'static [u8; 4] {
        match self {
            ColorMode::Mono => b"M001",
            ColorMode::Gray => b"M008",
            ColorMode::Color => b"C024",
        }
    }
}

/// How the scanned page is trimmed before it is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CropMode {
    /// Emit the raw JPEG exactly as the scanner sent it.
    None,
    /// Full page width, cut to the height the scanner reported.
    FixedHeight,
    /// Like `FixedHeight`, with blank side margins trimmed by edge detection.
    #[default]
    AutoEdges,
}

/// Settings for one page. Immutable once a scan begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScanConfig {
    resolution: Resolution,
    color: ColorMode,
    quality: u8,
    crop: CropMode,
}

impl ScanConfig {
    pub fn new(resolution: u16, color: ColorMode, quality: u8, crop: CropMode) -> Result<Self, ConfigError> {
        let resolution = Resolution::try_from(resolution).map_err(|_| ConfigError::UnsupportedResolution(resolution))?;
        if !(1..=100).contains(&quality) {
            return Err(ConfigError::QualityOutOfRange(quality));
        }
        Ok(Self {
            resolution,
            color,
            quality,
            crop,
        })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn color(&self) -> ColorMode {
        self.color
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn crop(&self) -> CropMode {
        self.crop
    }

    /// Acquisition width in pixels for the widest supported page.
    pub fn width_px(&self) -> u32 {
        (self.resolution.dpi() as f64 * MAX_WIDTH_INCHES) as u32
    }

    /// Acquisition height in pixels for the longest supported page.
    pub fn height_px(&self) -> u32 {
        (self.resolution.dpi() as f64 * MAX_HEIGHT_INCHES) as u32
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            color: ColorMode::default(),
            quality: 100,
            crop: CropMode::default(),
        }
    }
}

/// What an empty feeder looks like to the sensor, per colour mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BlankProfile {
    pub reference: [u8; 3],
    pub tolerance: u8,
}

impl BlankProfile {
    pub fn for_mode(mode: ColorMode) -> Self {
        let reference = match mode {
            ColorMode::Mono | ColorMode::Gray => [BLANK_GRAY; 3],
            ColorMode::Color => BLANK_COLOR,
        };
        Self {
            reference,
            tolerance: BLANK_TOLERANCE,
        }
    }
}

/// How long to keep probing an empty feeder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PaperWait {
    pub poll_interval: Duration,
    /// `None` waits until paper shows up or the scan is cancelled.
    pub max_attempts: Option<u32>,
}

impl PaperWait {
    pub fn forever(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            max_attempts: None,
        }
    }

    pub fn bounded(poll_interval: Duration, max_attempts: u32) -> Self {
        Self {
            poll_interval,
            max_attempts: Some(max_attempts.max(1)),
        }
    }

    /// Bound the wait by wall-clock time, rounded up to whole polls.
    pub fn with_timeout(poll_interval: Duration, timeout: Duration) -> Self {
        let interval_ms = poll_interval.as_millis().max(1);
        let attempts = timeout.as_millis().div_ceil(interval_ms);
        Self::bounded(poll_interval, u32::try_from(attempts).unwrap_or(u32::MAX))
    }
}

impl Default for PaperWait {
    fn default() -> Self {
        Self::forever(Duration::from_millis(500))
    }
}

/// Retry and wait policies for the protocol engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EngineConfig {
    /// Extra attempts at entering control mode after a benign transport error.
    pub control_retries: u32,
    pub control_retry_delay: Duration,
    pub paper_wait: PaperWait,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            control_retries: 3,
            control_retry_delay: Duration::from_millis(500),
            paper_wait: PaperWait::default(),
        }
    }
}
