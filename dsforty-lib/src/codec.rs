//! JPEG handling behind the [`ImageCodec`] capability.
//!
//! The scanner streams a JPEG padded to the full 14 inch acquisition height;
//! cropping it must not re-encode, so [`JpegtranCodec`] hands the crop to
//! `jpegtran` and only decodes in-process to sample the page for autocrop.

use crate::edge::Pixel;
use crate::error::CodecError;
use image::imageops::FilterType;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use tracing::{debug, instrument};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Pixel rectangle anchored at the top edge of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CropRect {
    pub left: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// `jpegtran -crop` geometry, `WxH+X+Y`.
    pub fn geometry(&self) -> String {
        format!("{}x{}+{}+0", self.width, self.height, self.left)
    }
}

pub trait ImageCodec: Send + Sync {
    /// Decode `jpeg`, keep its top `width` x `height` pixels and average them
    /// down to a single row `width` pixels long.
    fn scan_line(&self, jpeg: &[u8], width: u32, height: u32) -> Result<Vec<Pixel>, CodecError>;

    /// Losslessly crop `jpeg` to `rect`.
    fn crop(&self, jpeg: &[u8], rect: CropRect) -> Result<Vec<u8>, CodecError>;
}

/// Decodes with the `image` crate and crops with the external `jpegtran` tool.
#[derive(Debug, Clone)]
pub struct JpegtranCodec {
    program: String,
}

impl JpegtranCodec {
    pub fn new() -> Self {
        Self::with_program("jpegtran")
    }

    /// Use a specific `jpegtran` binary.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for JpegtranCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageCodec for JpegtranCodec {
    #[instrument(skip(self, jpeg), fields(jpeg_len = jpeg.len()))]
    fn scan_line(&self, jpeg: &[u8], width: u32, height: u32) -> Result<Vec<Pixel>, CodecError> {
        let page = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)?;
        let width = width.min(page.width());
        let height = height.min(page.height());
        if width == 0 || height == 0 {
            return Err(CodecError::InvalidRect { left: 0, width, height });
        }
        debug!(width, height, "Resampling page to a single row");
        let row = page
            .crop_imm(0, 0, width, height)
            .resize_exact(width, 1, FilterType::Lanczos3)
            .to_rgb8();
        Ok(row.pixels().map(|p| p.0).collect())
    }

    #[instrument(skip(self, jpeg), fields(jpeg_len = jpeg.len(), geometry = %rect.geometry()))]
    fn crop(&self, jpeg: &[u8], rect: CropRect) -> Result<Vec<u8>, CodecError> {
        if rect.width == 0 || rect.height == 0 {
            return Err(CodecError::InvalidRect {
                left: rect.left,
                width: rect.width,
                height: rect.height,
            });
        }

        let mut child = Command::new(&self.program)
            .arg("-crop")
            .arg(rect.geometry())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(CodecError::Spawn)?;

        let broken_pipe = || CodecError::Spawn(std::io::ErrorKind::BrokenPipe.into());
        let mut stdin = child.stdin.take().ok_or_else(broken_pipe)?;
        let mut stdout = child.stdout.take().ok_or_else(broken_pipe)?;
        let mut stderr = child.stderr.take().ok_or_else(broken_pipe)?;

        // Feed stdin and drain stderr on their own threads so no full pipe can stall the child.
        let (read, written, diagnostics) = std::thread::scope(|scope| {
            let writer = scope.spawn(move || stdin.write_all(jpeg));
            let errors = scope.spawn(move || {
                let mut text = Vec::new();
                stderr.read_to_end(&mut text).map(|_| text)
            });
            let mut cropped = Vec::with_capacity(jpeg.len());
            let read = stdout.read_to_end(&mut cropped).map(|_| cropped);
            let written = writer.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic));
            let diagnostics = errors.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic));
            (read, written, diagnostics)
        });

        let status = child.wait().map_err(CodecError::Spawn)?;
        if !status.success() {
            return Err(CodecError::CropFailed {
                status,
                stderr: String::from_utf8_lossy(&diagnostics.unwrap_or_default()).trim().to_string(),
            });
        }
        written.map_err(CodecError::Spawn)?;
        let output = read.map_err(CodecError::Spawn)?;
        debug!(len = output.len(), "Cropped JPEG");
        Ok(output)
    }
}
