//! Shared builders for integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

use blindreview::config::ServiceConfig;
use blindreview::pdf::{LopdfParser, OcrEngine, PageBitmap};
use blindreview::storage::{FileStore, LocalFileStore, MemoryStore};
use blindreview::workflow::{ReviewDesk, Submission};
use blindreview::Result;

pub const FIELD_KEY: &str = "YXNkZmdoamtscXdlcnR5dQ==";

/// One page of a fixture document
pub enum FixturePage<'a> {
    /// Text lines, 20 units apart, starting at (72, 720)
    Text(&'a [&'a str]),
    /// One line at (72, 720) with each word in its own `Tj`, the way many
    /// producers write text
    Words(&'a [&'a str]),
    /// A small grayscale image and no text layer
    Scan,
}

fn text_content(lines: &[&str]) -> Content {
    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 12.into()]),
        Operation::new("TL", vec![20.into()]),
        Operation::new("Td", vec![72.into(), 720.into()]),
    ];
    for line in lines {
        operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
        operations.push(Operation::new("T*", vec![]));
    }
    operations.push(Operation::new("ET", vec![]));
    Content { operations }
}

fn word_content(words: &[&str]) -> Content {
    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 12.into()]),
        Operation::new("Td", vec![72.into(), 720.into()]),
    ];
    for word in words {
        operations.push(Operation::new("Tj", vec![Object::string_literal(*word)]));
        // six units per glyph at 12pt, plus one glyph of gap
        let advance = (word.len() as i64 + 1) * 6;
        operations.push(Operation::new("Td", vec![advance.into(), 0.into()]));
    }
    operations.push(Operation::new("ET", vec![]));
    Content { operations }
}

fn scan_content() -> Content {
    Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![200.into(), 0.into(), 0.into(), 200.into(), 72.into(), 400.into()],
            ),
            Operation::new("Do", vec![Object::Name(b"Im1".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    }
}

pub fn build_pdf(pages: &[FixturePage<'_>]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for page in pages {
        let mut page_dict = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
        };
        let content = match page {
            FixturePage::Text(lines) => text_content(lines),
            FixturePage::Words(words) => word_content(words),
            FixturePage::Scan => {
                let image_id = doc.add_object(Stream::new(
                    dictionary! {
                        "Type" => "XObject",
                        "Subtype" => "Image",
                        "Width" => 2,
                        "Height" => 2,
                        "ColorSpace" => "DeviceGray",
                        "BitsPerComponent" => 8,
                    },
                    vec![0, 255, 255, 0],
                ));
                page_dict.set(
                    "Resources",
                    dictionary! { "XObject" => dictionary! { "Im1" => image_id } },
                );
                scan_content()
            }
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("fixture content encodes"),
        ));
        page_dict.set("Contents", content_id);
        kids.push(doc.add_object(page_dict).into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("fixture saves");
    bytes
}

pub fn text_pdf(lines: &[&str]) -> Vec<u8> {
    build_pdf(&[FixturePage::Text(lines)])
}

/// OCR stub that counts its calls
pub struct CountingOcr {
    pub calls: AtomicUsize,
    pub text: String,
}

impl CountingOcr {
    pub fn new(text: &str) -> Self {
        Self { calls: AtomicUsize::new(0), text: text.to_string() }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OcrEngine for CountingOcr {
    fn recognize(&self, _bitmap: &PageBitmap) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.text.clone())
    }
}

pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.security.field_key = FIELD_KEY.to_string();
    config.redaction.lock_wait_ms = 50;
    config.redaction.document_timeout_ms = 30_000;
    config
}

/// Desk over an in-memory store and a temporary upload root
pub struct Harness {
    pub desk: ReviewDesk,
    pub store: Arc<MemoryStore>,
    pub files: Arc<LocalFileStore>,
    pub ocr: Arc<CountingOcr>,
    _root: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_ocr("")
    }

    pub fn with_ocr(ocr_text: &str) -> Self {
        let root = tempfile::tempdir().expect("temp dir");
        let config = test_config();
        let store = Arc::new(MemoryStore::new());
        let files = Arc::new(LocalFileStore::new(root.path()));
        let ocr = Arc::new(CountingOcr::new(ocr_text));
        let desk = ReviewDesk::new(
            Arc::clone(&store),
            Arc::clone(&files) as Arc<dyn FileStore>,
            Arc::new(LopdfParser),
            Arc::clone(&ocr) as Arc<dyn OcrEngine>,
            config.field_codec().expect("test key is valid"),
            &config,
        );
        Self { desk, store, files, ocr, _root: root }
    }
}

pub fn submission(authors: &str, institution: &str, pdf: Vec<u8>) -> Submission {
    Submission {
        email: "jane.doe@uni.edu".to_string(),
        title: "On Blind Review".to_string(),
        authors: authors.to_string(),
        institution: institution.to_string(),
        filename: "paper.pdf".to_string(),
        bytes: pdf,
    }
}
