//! Generated page images for pipeline tests

use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use std::io::Cursor;

/// A small scanned "page": two text-like bands split by a white gap.
///
/// Different `seed`s give different bytes, and therefore different
/// fingerprints.
pub fn page_png(seed: u8) -> Vec<u8> {
    let gray = GrayImage::from_fn(48, 80, |x, y| {
        if (30..60).contains(&y) {
            Luma([255])
        } else {
            Luma([((x * 7 + y * 13 + seed as u32 * 31) % 200) as u8])
        }
    });
    let mut buf = Vec::new();
    DynamicImage::ImageLuma8(gray)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("encode fixture page");
    buf
}

/// Bytes no image decoder recognises.
pub const NOT_AN_IMAGE: &[u8] = b"%PDF-1.4 definitely not a scan";
