//! lopdf-backed document collaborator
//! Author: kartik4091
//! Created: 2025-06-05
//!
//! Redaction rewrites the string operands of text-showing operators in
//! place and stores the page's content as a fresh stream object, so the
//! saved file no longer carries the original bytes for that page.

use std::io::Read;

use flate2::read::ZlibDecoder;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tracing::{debug, warn};

use super::text_layout::{layout_runs, number, region_slots, runs_to_text, search_runs, TextRun};
use super::{BitmapData, DocumentParser, EditableDocument, PageBitmap, PageSource};
use crate::error::{Error, Result};
use crate::types::Region;

const PAGE_WIDTH: i64 = 612;
const PAGE_HEIGHT: i64 = 792;
const MARGIN: i64 = 72;
const BODY_FONT_SIZE: i64 = 11;
const LINE_LEADING: i64 = 15;
const WRAP_COLUMNS: usize = 90;
const LINES_PER_PAGE: usize = 40;
const MAX_TREE_DEPTH: usize = 32;

/// Opens documents with lopdf
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfParser;

impl DocumentParser for LopdfParser {
    fn open(&self, bytes: &[u8]) -> Result<Box<dyn EditableDocument>> {
        Ok(Box::new(LopdfDocument::load(bytes)?))
    }
}

#[derive(Debug)]
struct PageLayout {
    id: ObjectId,
    content: Content,
    runs: Vec<TextRun>,
    dirty: bool,
}

/// Parsed PDF plus a text layout of every page
#[derive(Debug)]
pub struct LopdfDocument {
    doc: Document,
    pages: Vec<PageLayout>,
}

impl LopdfDocument {
    pub fn load(bytes: &[u8]) -> Result<Self> {
        let doc = Document::load_mem(bytes).map_err(|e| Error::DocumentOpenError(e.to_string()))?;

        if doc.trailer.get(b"Encrypt").is_ok() {
            return Err(Error::DocumentOpenError(
                "encrypted documents are not supported".to_string(),
            ));
        }

        let pages: Vec<PageLayout> = doc
            .get_pages()
            .values()
            .map(|id| Self::layout_page(&doc, *id))
            .collect();

        if pages.is_empty() {
            return Err(Error::DocumentOpenError("document has no pages".to_string()));
        }

        debug!("Loaded document with {} pages", pages.len());
        Ok(Self { doc, pages })
    }

    fn layout_page(doc: &Document, id: ObjectId) -> PageLayout {
        let content = match doc.get_page_content(id).map(|bytes| Content::decode(&bytes)) {
            Ok(Ok(content)) => content,
            Ok(Err(e)) | Err(e) => {
                warn!("Page {:?} content could not be decoded: {}", id, e);
                Content { operations: Vec::new() }
            }
        };
        let runs = layout_runs(&content.operations);
        PageLayout { id, content, runs, dirty: false }
    }

    fn page(&self, page: usize) -> Result<&PageLayout> {
        self.pages
            .get(page)
            .ok_or_else(|| Error::DocumentError(format!("page {} out of range", page)))
    }

    fn resolve<'a>(&'a self, obj: &'a Object) -> &'a Object {
        match obj {
            Object::Reference(id) => self.doc.get_object(*id).unwrap_or(obj),
            _ => obj,
        }
    }

    fn resolve_dict<'a>(&'a self, obj: &'a Object) -> Option<&'a Dictionary> {
        match self.resolve(obj) {
            Object::Dictionary(dict) => Some(dict),
            _ => None,
        }
    }

    /// Resources of a page, following inheritance through `Parent`
    fn page_resources(&self, id: ObjectId) -> Option<&Dictionary> {
        let mut current = self.doc.get_object(id).ok().and_then(|o| o.as_dict().ok());
        for _ in 0..MAX_TREE_DEPTH {
            let node = current?;
            if let Ok(resources) = node.get(b"Resources") {
                return self.resolve_dict(resources);
            }
            current = node.get(b"Parent").ok().and_then(|p| self.resolve_dict(p));
        }
        None
    }

    fn pages_root(&self) -> Result<ObjectId> {
        self.doc
            .trailer
            .get(b"Root")
            .ok()
            .and_then(|root| self.resolve_dict(root))
            .and_then(|catalog| catalog.get(b"Pages").ok())
            .and_then(|pages| pages.as_reference().ok())
            .ok_or_else(|| Error::DocumentError("document has no page tree".to_string()))
    }

    fn decode_image(stream: &Stream) -> Option<PageBitmap> {
        let dict = &stream.dict;
        let width = dict.get(b"Width").ok().and_then(number)? as u32;
        let height = dict.get(b"Height").ok().and_then(number)? as u32;
        let bits = dict.get(b"BitsPerComponent").ok().and_then(number).unwrap_or(8.0);

        let filters: Vec<Vec<u8>> = match dict.get(b"Filter") {
            Ok(Object::Name(name)) => vec![name.clone()],
            Ok(Object::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_name().ok().map(|n| n.to_vec()))
                .collect(),
            _ => Vec::new(),
        };

        if filters.iter().any(|f| f.as_slice() == b"DCTDecode") {
            return Some(PageBitmap {
                width,
                height,
                data: BitmapData::Jpeg(stream.content.clone()),
            });
        }

        let raw = match filters.as_slice() {
            [] => stream.content.clone(),
            [flate] if flate.as_slice() == b"FlateDecode" => {
                let mut decoded = Vec::new();
                if let Err(e) = ZlibDecoder::new(&stream.content[..]).read_to_end(&mut decoded) {
                    warn!("Image stream could not be inflated: {}", e);
                    return None;
                }
                decoded
            }
            other => {
                debug!("Unsupported image filter chain of {} entries", other.len());
                return None;
            }
        };

        if bits as u32 != 8 {
            return None;
        }

        let pixels = width as usize * height as usize;
        let color_space = dict.get(b"ColorSpace").ok().and_then(|c| c.as_name().ok());
        match color_space {
            Some(b"DeviceGray") if raw.len() >= pixels => Some(PageBitmap {
                width,
                height,
                data: BitmapData::Gray8(raw),
            }),
            Some(b"DeviceRGB") if raw.len() >= pixels * 3 => Some(PageBitmap {
                width,
                height,
                data: BitmapData::Rgb8(raw),
            }),
            _ => None,
        }
    }

    fn text_page_content(heading: Option<&str>, lines: &[String]) -> Content {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("TL", vec![LINE_LEADING.into()]),
            Operation::new("Td", vec![MARGIN.into(), (PAGE_HEIGHT - MARGIN).into()]),
        ];

        if let Some(heading) = heading {
            operations.push(Operation::new("Tf", vec!["F1".into(), 16.into()]));
            operations.push(Operation::new("Tj", vec![latin1_string(heading)]));
            operations.push(Operation::new("T*", vec![]));
            operations.push(Operation::new("T*", vec![]));
        }

        operations.push(Operation::new("Tf", vec!["F1".into(), BODY_FONT_SIZE.into()]));
        for line in lines {
            operations.push(Operation::new("Tj", vec![latin1_string(line)]));
            operations.push(Operation::new("T*", vec![]));
        }
        operations.push(Operation::new("ET", vec![]));

        Content { operations }
    }

    fn replace_page_content(&mut self, index: usize) -> Result<()> {
        let page_id = self.pages[index].id;
        let encoded = self.pages[index]
            .content
            .encode()
            .map_err(|e| Error::DocumentError(e.to_string()))?;

        let old_ids = self.doc.get_page_contents(page_id);
        let new_id = self.doc.add_object(Stream::new(Dictionary::new(), encoded));
        self.doc
            .get_object_mut(page_id)
            .and_then(|obj| obj.as_dict_mut())
            .map_err(|e| Error::DocumentError(e.to_string()))?
            .set("Contents", Object::Reference(new_id));

        let other_pages: Vec<ObjectId> = self
            .pages
            .iter()
            .map(|p| p.id)
            .filter(|id| *id != page_id)
            .collect();
        for old in old_ids {
            let shared = other_pages
                .iter()
                .any(|other| self.doc.get_page_contents(*other).contains(&old));
            if !shared {
                self.doc.objects.remove(&old);
            }
        }

        self.pages[index].dirty = false;
        Ok(())
    }
}

impl PageSource for LopdfDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_text(&self, page: usize) -> Result<String> {
        Ok(runs_to_text(&self.page(page)?.runs))
    }

    fn render_page(&self, page: usize) -> Result<Option<PageBitmap>> {
        let layout = self.page(page)?;
        let xobjects = match self
            .page_resources(layout.id)
            .and_then(|res| res.get(b"XObject").ok())
            .and_then(|x| self.resolve_dict(x))
        {
            Some(xobjects) => xobjects,
            None => return Ok(None),
        };

        let mut largest: Option<(u64, &Stream)> = None;
        for (_, value) in xobjects.iter() {
            if let Object::Stream(stream) = self.resolve(value) {
                let is_image = stream
                    .dict
                    .get(b"Subtype")
                    .ok()
                    .and_then(|s| s.as_name().ok())
                    == Some(b"Image".as_slice());
                if !is_image {
                    continue;
                }
                let area = stream.dict.get(b"Width").ok().and_then(number).unwrap_or(0.0)
                    * stream.dict.get(b"Height").ok().and_then(number).unwrap_or(0.0);
                let area = area.max(0.0) as u64;
                if largest.map_or(true, |(best, _)| area > best) {
                    largest = Some((area, stream));
                }
            }
        }

        Ok(largest.and_then(|(_, stream)| Self::decode_image(stream)))
    }

    fn search_page(&self, page: usize, needle: &str) -> Result<Vec<Region>> {
        Ok(search_runs(&self.page(page)?.runs, needle, false))
    }

    fn search_words(&self, page: usize, needle: &str) -> Result<Vec<Region>> {
        Ok(search_runs(&self.page(page)?.runs, needle, true))
    }
}

impl EditableDocument for LopdfDocument {
    fn redact_region(&mut self, page: usize, region: &Region, replacement: &str) -> Result<usize> {
        let layout = self
            .pages
            .get_mut(page)
            .ok_or_else(|| Error::DocumentError(format!("page {} out of range", page)))?;

        let slots = region_slots(&layout.runs, region);
        let rewritten = slots.iter().flatten().count();
        if rewritten == 0 {
            return Ok(0);
        }

        let replacement: Vec<char> = replacement.chars().collect();
        for (k, entry) in slots.iter().enumerate() {
            let (r, g) = match entry {
                Some(target) => *target,
                None => continue,
            };
            let byte = latin1_byte(replacement.get(k).copied().unwrap_or(' '));
            let (op, part, offset) = {
                let glyph = &layout.runs[r].glyphs[g];
                (glyph.op, glyph.part, glyph.byte)
            };

            let slot = layout
                .content
                .operations
                .get_mut(op)
                .and_then(|operation| string_operand_mut(operation, part))
                .and_then(|bytes| bytes.get_mut(offset))
                .ok_or_else(|| {
                    Error::DocumentError(format!("glyph operand missing at operation {}", op))
                })?;
            *slot = byte;
            layout.runs[r].glyphs[g].ch = byte as char;
        }

        layout.dirty = true;
        Ok(rewritten)
    }

    fn append_text_page(&mut self, heading: &str, body: &str) -> Result<()> {
        let pages_id = self.pages_root()?;
        let font_id = self.doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = self.doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let lines = wrap_lines(body, WRAP_COLUMNS);
        let empty: &[String] = &[];
        let chunks: Vec<&[String]> = if lines.is_empty() {
            vec![empty]
        } else {
            lines.chunks(LINES_PER_PAGE).collect()
        };

        for (index, chunk) in chunks.iter().enumerate() {
            let heading = if index == 0 { Some(heading) } else { None };
            let content = Self::text_page_content(heading, chunk);
            let encoded = content.encode().map_err(|e| Error::DocumentError(e.to_string()))?;
            let content_id = self.doc.add_object(Stream::new(Dictionary::new(), encoded));
            let page_id = self.doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
                "Resources" => resources_id,
                "Contents" => content_id,
            });

            let pages = self
                .doc
                .get_object_mut(pages_id)
                .and_then(|obj| obj.as_dict_mut())
                .map_err(|e| Error::DocumentError(e.to_string()))?;
            let count = pages.get(b"Count").ok().and_then(number).unwrap_or(0.0) as i64;
            if let Ok(Object::Array(kids)) = pages.get_mut(b"Kids") {
                kids.push(Object::Reference(page_id));
            } else {
                pages.set("Kids", vec![Object::Reference(page_id)]);
            }
            pages.set("Count", count + 1);

            self.pages.push(PageLayout {
                id: page_id,
                runs: layout_runs(&content.operations),
                content,
                dirty: false,
            });
        }

        debug!("Appended {} text page(s)", chunks.len());
        Ok(())
    }

    fn save(&mut self) -> Result<Vec<u8>> {
        for index in 0..self.pages.len() {
            if self.pages[index].dirty {
                self.replace_page_content(index)?;
            }
        }

        let mut buffer = Vec::new();
        self.doc
            .save_to(&mut buffer)
            .map_err(|e| Error::DocumentError(e.to_string()))?;
        Ok(buffer)
    }
}

fn string_operand_mut(operation: &mut Operation, part: usize) -> Option<&mut Vec<u8>> {
    let target = match operation.operator.as_str() {
        "Tj" | "'" => operation.operands.get_mut(0),
        "\"" => operation.operands.get_mut(2),
        "TJ" => match operation.operands.get_mut(0) {
            Some(Object::Array(items)) => items.get_mut(part),
            _ => None,
        },
        _ => None,
    };
    match target {
        Some(Object::String(bytes, _)) => Some(bytes),
        _ => None,
    }
}

fn latin1_byte(c: char) -> u8 {
    u8::try_from(u32::from(c)).unwrap_or(b'?')
}

fn latin1_string(s: &str) -> Object {
    Object::String(s.chars().map(latin1_byte).collect(), StringFormat::Literal)
}

fn wrap_lines(body: &str, columns: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in body.lines() {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            if !line.is_empty() && line.chars().count() + 1 + word.chars().count() > columns {
                lines.push(std::mem::take(&mut line));
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(word);
        }
        lines.push(line);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pdf(lines: &[&str]) -> Vec<u8> {
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

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
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
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_text_and_search() {
        let doc = LopdfDocument::load(&sample_pdf(&["Jane Doe", "MIT Lab"])).unwrap();
        assert_eq!(doc.page_count(), 1);
        assert_eq!(doc.page_text(0).unwrap(), "Jane Doe\nMIT Lab");
        assert_eq!(doc.search_page(0, "Doe").unwrap().len(), 1);
        assert!(doc.search_page(0, "Smith").unwrap().is_empty());
        assert!(doc.page_text(3).is_err());
    }

    #[test]
    fn test_redaction_survives_save() {
        let mut doc = LopdfDocument::load(&sample_pdf(&["Jane Doe", "MIT Lab"])).unwrap();
        let region = doc.search_page(0, "Jane Doe").unwrap()[0];
        assert_eq!(doc.redact_region(0, &region, "********").unwrap(), 8);

        let saved = doc.save().unwrap();
        let reopened = LopdfDocument::load(&saved).unwrap();
        assert_eq!(reopened.page_text(0).unwrap(), "********\nMIT Lab");
        assert!(reopened.search_page(0, "Jane").unwrap().is_empty());
    }

    #[test]
    fn test_empty_region_is_a_no_op() {
        let mut doc = LopdfDocument::load(&sample_pdf(&["Jane Doe"])).unwrap();
        let nowhere = Region::new(0.0, 0.0, 1.0, 1.0);
        assert_eq!(doc.redact_region(0, &nowhere, "***").unwrap(), 0);
    }

    #[test]
    fn test_appended_page_is_readable() {
        let mut doc = LopdfDocument::load(&sample_pdf(&["Body"])).unwrap();
        doc.append_text_page("Reviewer Comments", "Solid work.\nMinor typos.").unwrap();
        assert_eq!(doc.page_count(), 2);

        let reopened = LopdfDocument::load(&doc.save().unwrap()).unwrap();
        assert_eq!(reopened.page_count(), 2);
        let text = reopened.page_text(1).unwrap();
        assert!(text.starts_with("Reviewer Comments"));
        assert!(text.contains("Minor typos."));
    }

    #[test]
    fn test_garbage_is_an_open_error() {
        let err = LopdfDocument::load(b"not a pdf").unwrap_err();
        assert!(matches!(err, Error::DocumentOpenError(_)));
    }

    #[test]
    fn test_text_only_page_has_no_bitmap() {
        let doc = LopdfDocument::load(&sample_pdf(&["Body"])).unwrap();
        assert!(doc.render_page(0).unwrap().is_none());
    }

    #[test]
    fn test_wrap_lines_respects_columns() {
        let lines = wrap_lines("aaa bbb ccc\n\nddd", 7);
        assert_eq!(lines, vec!["aaa bbb", "ccc", "", "ddd"]);
    }
}
