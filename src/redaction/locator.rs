//! Redaction locator
//! Author: kartik4091
//! Created: 2025-06-05
//!
//! Finds where each category's plaintext sits on each page. Text comes
//! from the page's text layer or, for pages without one, from OCR of the
//! rendered page. Both are NFC-normalised and space-joined before the
//! patterns run. Matches are then placed geometrically with a literal
//! search, word-bounded when the pattern is; anything that cannot be
//! placed is skipped with a warning.

use tracing::{debug, warn};

use super::patterns::PatternSet;
use crate::error::{Error, Result};
use crate::pdf::{OcrEngine, PageSource};
use crate::types::{Category, Region};
use crate::utils::{join_lines, normalize};

/// One placed occurrence
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedMatch {
    pub category: Category,
    pub page: usize,
    pub region: Region,
    pub text: String,
}

/// Result of a locate pass over a whole document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocateReport {
    /// Pages ascending, pattern order within a page
    pub matches: Vec<LocatedMatch>,
    /// Occurrences the patterns found in the page text
    pub expected: usize,
    /// Occurrences that could not be placed on the page
    pub skipped: usize,
    pub ocr_invocations: usize,
}

/// Text the patterns run against for one page
fn page_text<D>(doc: &D, ocr: &dyn OcrEngine, page: usize, report: &mut LocateReport) -> Result<String>
where
    D: PageSource + ?Sized,
{
    let text = normalize(&doc.page_text(page)?);
    if !text.trim().is_empty() {
        return Ok(join_lines(&text));
    }

    let bitmap = match doc.render_page(page)? {
        Some(bitmap) => bitmap,
        None => {
            debug!("Page {} has no text and nothing to render", page);
            return Ok(String::new());
        }
    };

    report.ocr_invocations += 1;
    match ocr.recognize(&bitmap) {
        Ok(recognized) => Ok(join_lines(&normalize(&recognized))),
        Err(e) => {
            warn!("OCR failed on page {}: {}", page, e);
            Ok(String::new())
        }
    }
}

/// Distinct matched literal of one page
struct LiteralHit {
    literal: String,
    whole_word: bool,
    occurrences: usize,
}

/// Distinct matched literals in first-seen order, with occurrence counts.
/// A span already matched by an earlier pattern of the set is not recounted.
fn literal_hits(set: &PatternSet, text: &str) -> Vec<LiteralHit> {
    let mut hits: Vec<LiteralHit> = Vec::new();
    let mut spans: Vec<(usize, usize)> = Vec::new();
    for pattern in set.patterns() {
        for found in pattern.regex.find_iter(text) {
            let literal = found.as_str();
            if literal.trim().is_empty() {
                continue;
            }
            if spans.iter().any(|(start, end)| found.start() < *end && *start < found.end()) {
                continue;
            }
            spans.push((found.start(), found.end()));
            match hits
                .iter_mut()
                .find(|hit| hit.literal == literal && hit.whole_word == pattern.whole_word)
            {
                Some(hit) => hit.occurrences += 1,
                None => hits.push(LiteralHit {
                    literal: literal.to_string(),
                    whole_word: pattern.whole_word,
                    occurrences: 1,
                }),
            }
        }
    }
    hits
}

pub fn locate<D>(doc: &D, ocr: &dyn OcrEngine, sets: &[PatternSet]) -> Result<LocateReport>
where
    D: PageSource + ?Sized,
{
    let mut report = LocateReport::default();

    for page in 0..doc.page_count() {
        let text = page_text(doc, ocr, page, &mut report)?;
        if text.is_empty() {
            continue;
        }

        let mut claimed: Vec<Region> = Vec::new();
        for set in sets {
            for hit in literal_hits(set, &text) {
                let regions = if hit.whole_word {
                    doc.search_words(page, &hit.literal)?
                } else {
                    doc.search_page(page, &hit.literal)?
                };
                if regions.is_empty() {
                    let mismatch = Error::LocatorMismatch { page, text: hit.literal.clone() };
                    warn!("{} ({} occurrence(s) skipped)", mismatch, hit.occurrences);
                    report.expected += hit.occurrences;
                    report.skipped += hit.occurrences;
                    continue;
                }

                let mut placed = 0;
                let mut overlapping = 0;
                for region in regions {
                    if placed + overlapping == hit.occurrences {
                        debug!("Page {} has more placements than matches, extra ignored", page);
                        break;
                    }
                    if claimed.iter().any(|c| c.intersects(&region)) {
                        overlapping += 1;
                        continue;
                    }
                    claimed.push(region);
                    report.matches.push(LocatedMatch {
                        category: set.category(),
                        page,
                        region,
                        text: hit.literal.clone(),
                    });
                    placed += 1;
                }

                let expected = hit.occurrences - overlapping;
                report.expected += expected;
                report.skipped += expected - placed;
            }
        }
    }

    debug!(
        "Located {} of {} occurrence(s), {} OCR pass(es)",
        report.matches.len(),
        report.expected,
        report.ocr_invocations
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::{BitmapData, PageBitmap};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Pages of text where every line is a row at y = 700 - 20 * index,
    /// each character 10 units wide
    struct FakeDoc {
        pages: Vec<Vec<&'static str>>,
        scanned: Vec<bool>,
    }

    impl PageSource for FakeDoc {
        fn page_count(&self) -> usize {
            self.pages.len()
        }

        fn page_text(&self, page: usize) -> Result<String> {
            if self.scanned[page] {
                return Ok(String::new());
            }
            Ok(self.pages[page].join("\n"))
        }

        fn render_page(&self, page: usize) -> Result<Option<PageBitmap>> {
            Ok(self.scanned[page].then(|| PageBitmap {
                width: 1,
                height: 1,
                data: BitmapData::Gray8(vec![0]),
            }))
        }

        fn search_page(&self, page: usize, needle: &str) -> Result<Vec<Region>> {
            if self.scanned[page] {
                return Ok(Vec::new());
            }
            let mut regions = Vec::new();
            for (row, line) in self.pages[page].iter().enumerate() {
                let y = 700.0 - 20.0 * row as f64;
                for (offset, _) in line.match_indices(needle) {
                    let x0 = 10.0 * offset as f64;
                    let x1 = x0 + 10.0 * needle.len() as f64;
                    regions.push(Region::new(x0, y, x1, y + 10.0));
                }
            }
            Ok(regions)
        }

        fn search_words(&self, page: usize, needle: &str) -> Result<Vec<Region>> {
            let word = |c: Option<char>| c.map_or(false, |c| c.is_alphanumeric());
            let mut regions = Vec::new();
            for (row, line) in self.pages[page].iter().enumerate() {
                let y = 700.0 - 20.0 * row as f64;
                for (offset, _) in line.match_indices(needle) {
                    let before = line[..offset].chars().next_back();
                    let after = line[offset + needle.len()..].chars().next();
                    if word(before) || word(after) {
                        continue;
                    }
                    let x0 = 10.0 * offset as f64;
                    let x1 = x0 + 10.0 * needle.len() as f64;
                    regions.push(Region::new(x0, y, x1, y + 10.0));
                }
            }
            Ok(regions)
        }
    }

    struct CountingOcr {
        calls: AtomicUsize,
        text: &'static str,
    }

    impl OcrEngine for CountingOcr {
        fn recognize(&self, _bitmap: &PageBitmap) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.text.to_string())
        }
    }

    fn no_ocr() -> CountingOcr {
        CountingOcr { calls: AtomicUsize::new(0), text: "" }
    }

    #[test]
    fn test_every_occurrence_is_located_in_order() {
        let doc = FakeDoc {
            pages: vec![vec!["Jane Doe", "Intro"], vec!["Jane Doe and John Roe", "Jane Doe"]],
            scanned: vec![false, false],
        };
        let sets = vec![PatternSet::for_category(Category::Authors, "Jane Doe, John Roe").unwrap()];
        let report = locate(&doc, &no_ocr(), &sets).unwrap();

        let placed: Vec<(usize, &str)> =
            report.matches.iter().map(|m| (m.page, m.text.as_str())).collect();
        assert_eq!(
            placed,
            vec![(0, "Jane Doe"), (1, "Jane Doe"), (1, "Jane Doe"), (1, "John Roe")]
        );
        assert_eq!(report.expected, 4);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.matches[0].region, Region::new(0.0, 700.0, 80.0, 710.0));
    }

    #[test]
    fn test_unplaceable_match_is_skipped() {
        let doc = FakeDoc {
            pages: vec![vec!["Jane", "Doe"]],
            scanned: vec![false],
        };
        // joined text reads "Jane Doe" but no single line holds it
        let sets = vec![PatternSet::for_category(Category::Authors, "Jane Doe").unwrap()];
        let report = locate(&doc, &no_ocr(), &sets).unwrap();

        assert!(report.matches.is_empty());
        assert_eq!(report.expected, 1);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn test_scanned_page_uses_ocr_once() {
        let doc = FakeDoc {
            pages: vec![vec!["Jane Doe"], vec![]],
            scanned: vec![false, true],
        };
        let ocr = CountingOcr {
            calls: AtomicUsize::new(0),
            text: "Jose\u{301} Doe\nabstract",
        };
        let sets = vec![PatternSet::for_category(Category::Authors, "Jos\u{e9} Doe").unwrap()];
        let report = locate(&doc, &ocr, &sets).unwrap();

        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.ocr_invocations, 1);
        // the normalised OCR text matched, but a scan has no text to place
        assert_eq!(report.expected, 1);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn test_author_inside_longer_word_is_not_placed() {
        let doc = FakeDoc {
            pages: vec![vec!["Jane Doe cites Jane Doerr"]],
            scanned: vec![false],
        };
        let sets = vec![PatternSet::for_category(Category::Authors, "Jane Doe").unwrap()];
        let report = locate(&doc, &no_ocr(), &sets).unwrap();

        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.matches[0].region, Region::new(0.0, 700.0, 80.0, 710.0));
        assert_eq!(report.expected, 1);
        assert_eq!(report.skipped, 0);
    }

    #[test]
    fn test_overlapping_categories_claim_once() {
        let doc = FakeDoc {
            pages: vec![vec!["Doe Lab"]],
            scanned: vec![false],
        };
        let sets = vec![
            PatternSet::for_category(Category::Institution, "Doe Lab").unwrap(),
            PatternSet::for_category(Category::Authors, "Doe Lab").unwrap(),
        ];
        let report = locate(&doc, &no_ocr(), &sets).unwrap();
        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.matches[0].category, Category::Institution);
        assert_eq!(report.skipped, 0);
    }
}
