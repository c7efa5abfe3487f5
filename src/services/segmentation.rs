use image::{DynamicImage, GrayImage, ImageFormat};
use std::io::Cursor;

/// Number of consecutive rows with identical mean intensity that ends a segment.
pub const DEFAULT_RUN_LENGTH: usize = 22;

/// Splits a page image into ordered sub-images for recognition.
pub trait Segmenter: Send + Sync {
    fn segment(&self, image: &[u8]) -> Result<Vec<Vec<u8>>, SegmentationError>;
}

/// Paragraph splitter driven by per-row mean intensity.
///
/// A blank band between paragraphs shows up as a run of rows with the same
/// mean gray level; every `run_length` such rows mark a cut. Segments are
/// returned top to bottom as PNG bytes.
pub struct RowIntensitySegmenter {
    run_length: usize,
}

impl Default for RowIntensitySegmenter {
    fn default() -> Self {
        Self {
            run_length: DEFAULT_RUN_LENGTH,
        }
    }
}

impl RowIntensitySegmenter {
    pub fn new(run_length: usize) -> Self {
        Self {
            run_length: run_length.max(1),
        }
    }

    /// Row indices where a new segment starts.
    pub fn split_points(&self, gray: &GrayImage) -> Vec<u32> {
        let (width, height) = gray.dimensions();
        if width == 0 {
            return Vec::new();
        }

        let density: Vec<u64> = gray
            .rows()
            .map(|row| row.map(|p| p.0[0] as u64).sum::<u64>() / width as u64)
            .collect();

        let mut splits = Vec::new();
        let mut run = 0;
        for line in 1..height as usize {
            if density[line] == density[line - 1] {
                run += 1;
            } else {
                run = 0;
            }
            if run == self.run_length {
                splits.push(line as u32);
                run = 0;
            }
        }
        splits
    }
}

impl Segmenter for RowIntensitySegmenter {
    fn segment(&self, image: &[u8]) -> Result<Vec<Vec<u8>>, SegmentationError> {
        let gray = image::load_from_memory(image)?.to_luma8();
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Err(SegmentationError::EmptyImage);
        }

        let mut bounds = Vec::new();
        let mut start = 0;
        for split in self.split_points(&gray) {
            bounds.push((start, split));
            start = split;
        }
        if start < height {
            bounds.push((start, height));
        }

        bounds
            .into_iter()
            .filter(|(top, bottom)| bottom > top)
            .map(|(top, bottom)| -> Result<Vec<u8>, SegmentationError> {
                let band = image::imageops::crop_imm(&gray, 0, top, width, bottom - top).to_image();
                let mut buf = Vec::new();
                DynamicImage::ImageLuma8(band).write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
                Ok(buf)
            })
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SegmentationError {
    #[error("Failed to decode or encode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("Image has no pixels")]
    EmptyImage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Text-like noise rows separated by a flat white band of `gap` rows.
    fn two_paragraphs(gap: u32) -> GrayImage {
        let height = 20 + gap + 20;
        GrayImage::from_fn(40, height, |x, y| {
            let in_gap = (20..20 + gap).contains(&y);
            if in_gap {
                Luma([255])
            } else {
                Luma([((x * 7 + y * 13) % 200) as u8])
            }
        })
    }

    fn png(gray: GrayImage) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(gray)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn wide_gap_splits_page() {
        let segmenter = RowIntensitySegmenter::default();
        let segments = segmenter.segment(&png(two_paragraphs(30))).unwrap();
        assert_eq!(segments.len(), 2);
        for segment in &segments {
            assert!(image::load_from_memory(segment).is_ok());
        }
    }

    #[test]
    fn narrow_gap_keeps_page_whole() {
        let segmenter = RowIntensitySegmenter::default();
        let segments = segmenter.segment(&png(two_paragraphs(10))).unwrap();
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn segments_cover_every_row() {
        let segmenter = RowIntensitySegmenter::new(5);
        let gray = two_paragraphs(30);
        let total: u32 = segmenter
            .segment(&png(gray.clone()))
            .unwrap()
            .iter()
            .map(|s| image::load_from_memory(s).unwrap().height())
            .sum();
        assert_eq!(total, gray.height());
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        let segmenter = RowIntensitySegmenter::default();
        assert!(matches!(
            segmenter.segment(b"not an image"),
            Err(SegmentationError::Image(_))
        ));
    }
}
