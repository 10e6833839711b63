//! JPEG sampling and the external cropper

mod common;

use common::*;
use dsforty_lib::JpegtranCodec;
use dsforty_lib::edge::detect_margins;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

/// A `width` x `height` feeder image with white paper over `paper` columns.
fn synthetic_jpeg(width: u32, height: u32, paper: std::ops::Range<u32>) -> Vec<u8> {
    let page = RgbImage::from_fn(width, height, |x, _| {
        if paper.contains(&x) { Rgb([250, 250, 248]) } else { Rgb(BLANK) }
    });
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, 95).encode_image(&page).unwrap();
    jpeg
}

#[test]
fn test_scan_line_finds_paper_in_decoded_page() {
    let jpeg = synthetic_jpeg(320, 96, 64..240);
    let line = JpegtranCodec::new().scan_line(&jpeg, 320, 96).unwrap();
    assert_eq!(line.len(), 320);

    let edges = detect_margins(&line, BLANK, 25, 5).unwrap();
    assert!(edges.left.abs_diff(64) <= 3, "left edge {}", edges.left);
    assert!(edges.right.abs_diff(240) <= 3, "right edge {}", edges.right);
}

#[test]
fn test_scan_line_only_samples_reported_height() {
    // The device pads below the sheet; sampling stops at the final height.
    let mut page = RgbImage::from_pixel(64, 64, Rgb(BLANK));
    for y in 32..64 {
        for x in 0..64 {
            page.put_pixel(x, y, Rgb([250, 250, 250]));
        }
    }
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, 95).encode_image(&page).unwrap();

    let line = JpegtranCodec::new().scan_line(&jpeg, 64, 24).unwrap();
    assert!(line.iter().all(|p| p.iter().zip(BLANK).all(|(&c, b)| c.abs_diff(b) <= 25)));
}

#[test]
fn test_scan_line_rejects_garbage() {
    let err = JpegtranCodec::new().scan_line(b"not a jpeg", 10, 10).unwrap_err();
    assert!(matches!(err, CodecError::Decode(_)));
}

#[test]
fn test_crop_without_jpegtran_reports_spawn_failure() {
    let codec = JpegtranCodec::with_program("/nonexistent/jpegtran-for-tests");
    let rect = CropRect {
        left: 0,
        width: 10,
        height: 10,
    };
    let err = codec.crop(&synthetic_jpeg(16, 16, 0..8), rect).unwrap_err();
    assert!(matches!(err, CodecError::Spawn(_)));
}

#[test]
fn test_crop_rejects_empty_rect() {
    let rect = CropRect {
        left: 5,
        width: 0,
        height: 10,
    };
    let err = JpegtranCodec::new().crop(b"", rect).unwrap_err();
    assert!(matches!(err, CodecError::InvalidRect { left: 5, .. }));
}
