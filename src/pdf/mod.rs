//! Document parser/renderer collaborator
//! Created: 2025-06-03 16:12:19 UTC
//! Author: kartik4091
//!
//! The redaction core only talks to documents through the traits below.
//! `LopdfParser` is the production implementation.

use crate::error::{Error, Result};
use crate::types::Region;

pub mod lopdf_backend;
pub mod ocr;
pub mod text_layout;

pub use lopdf_backend::{LopdfDocument, LopdfParser};
pub use ocr::{DisabledOcr, OcrEngine, TesseractOcr};

/// Pixel payload of a rendered page
#[derive(Debug, Clone, PartialEq)]
pub enum BitmapData {
    /// Encoded JPEG passed through from the page image
    Jpeg(Vec<u8>),
    /// 8-bit grayscale, row-major
    Gray8(Vec<u8>),
    /// 8-bit interleaved RGB, row-major
    Rgb8(Vec<u8>),
}

/// Page raster handed to the OCR engine
#[derive(Debug, Clone, PartialEq)]
pub struct PageBitmap {
    pub width: u32,
    pub height: u32,
    pub data: BitmapData,
}

impl PageBitmap {
    /// Encodes the bitmap as an image file, returning the bytes and a file suffix
    pub fn encoded(&self) -> Result<(Vec<u8>, &'static str)> {
        let pixels = self.width as usize * self.height as usize;
        let (magic, channels, raw, suffix) = match &self.data {
            BitmapData::Jpeg(bytes) => return Ok((bytes.clone(), ".jpg")),
            BitmapData::Gray8(raw) => ("P5", 1, raw, ".pgm"),
            BitmapData::Rgb8(raw) => ("P6", 3, raw, ".ppm"),
        };

        let expected = pixels * channels;
        if raw.len() < expected {
            return Err(Error::DocumentError(format!(
                "bitmap has {} bytes, {}x{} needs {}",
                raw.len(),
                self.width,
                self.height,
                expected
            )));
        }

        let mut out = format!("{}\n{} {}\n255\n", magic, self.width, self.height).into_bytes();
        out.extend_from_slice(&raw[..expected]);
        Ok((out, suffix))
    }
}

/// Read side of a parsed document
pub trait PageSource {
    fn page_count(&self) -> usize;

    /// Plain text of one page, lines separated by `\n`
    fn page_text(&self, page: usize) -> Result<String>;

    /// Raster of the page for OCR, `None` when nothing can be rendered
    fn render_page(&self, page: usize) -> Result<Option<PageBitmap>>;

    /// Bounding regions of every occurrence of `needle` on the page
    fn search_page(&self, page: usize, needle: &str) -> Result<Vec<Region>>;

    /// Like [`PageSource::search_page`], keeping only occurrences that are
    /// not part of a longer word
    fn search_words(&self, page: usize, needle: &str) -> Result<Vec<Region>>;
}

/// Parsed document that can be edited and saved as a new revision
pub trait EditableDocument: PageSource + Send {
    /// Destructively replaces the glyphs inside `region` with `replacement`.
    /// Returns how many glyphs were rewritten; zero means nothing was there.
    fn redact_region(&mut self, page: usize, region: &Region, replacement: &str) -> Result<usize>;

    /// Appends one or more pages carrying `heading` followed by `body`
    fn append_text_page(&mut self, heading: &str, body: &str) -> Result<()>;

    /// Serializes the current state, edits included
    fn save(&mut self) -> Result<Vec<u8>>;
}

/// Opens PDF bytes
pub trait DocumentParser: Send + Sync {
    /// Fails with `DocumentOpenError` on corrupt or unsupported input
    fn open(&self, bytes: &[u8]) -> Result<Box<dyn EditableDocument>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gray_bitmap_encodes_as_pgm() {
        let bitmap = PageBitmap {
            width: 2,
            height: 2,
            data: BitmapData::Gray8(vec![0, 64, 128, 255, 99]),
        };
        let (bytes, suffix) = bitmap.encoded().unwrap();
        assert_eq!(suffix, ".pgm");
        assert!(bytes.starts_with(b"P5\n2 2\n255\n"));
        assert_eq!(&bytes[bytes.len() - 4..], &[0, 64, 128, 255]);
    }

    #[test]
    fn test_short_bitmap_is_rejected() {
        let bitmap = PageBitmap {
            width: 4,
            height: 4,
            data: BitmapData::Rgb8(vec![0; 10]),
        };
        assert!(bitmap.encoded().is_err());
    }
}
