//! Text layout model for page content streams
//! Author: kartik4091
//! Created: 2025-06-05
//!
//! Interprets the text operators of a decoded content stream into glyph
//! boxes. Glyph advance uses a fixed em fraction instead of font metrics,
//! so boxes are approximate but stable: the same stream always yields the
//! same geometry, which is what ledger replay depends on.

use lopdf::content::Operation;
use lopdf::Object;

use crate::types::Region;

const GLYPH_ADVANCE_EM: f64 = 0.5;
const ASCENT_EM: f64 = 0.8;
const DESCENT_EM: f64 = 0.2;

/// Row-vector affine matrix `[a b c d e f]`
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix {
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    e: f64,
    f: f64,
}

impl Matrix {
    const IDENTITY: Matrix = Matrix { a: 1.0, b: 0.0, c: 0.0, d: 1.0, e: 0.0, f: 0.0 };

    fn translate(tx: f64, ty: f64) -> Matrix {
        Matrix { e: tx, f: ty, ..Matrix::IDENTITY }
    }

    /// `self × other`
    fn mul(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    fn from_operands(operands: &[Object]) -> Option<Matrix> {
        let values: Vec<f64> = operands.iter().filter_map(number).collect();
        match values.as_slice() {
            [a, b, c, d, e, f] => Some(Matrix { a: *a, b: *b, c: *c, d: *d, e: *e, f: *f }),
            _ => None,
        }
    }

    fn vertical_scale(&self) -> f64 {
        (self.c * self.c + self.d * self.d).sqrt()
    }
}

/// Numeric value of an integer or real operand
pub(crate) fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

/// One shown byte and where it lives in the content stream
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Glyph {
    pub ch: char,
    /// Index of the text-showing operation
    pub op: usize,
    /// Element index inside a `TJ` array, zero otherwise
    pub part: usize,
    /// Byte offset inside the string operand
    pub byte: usize,
    pub bounds: Region,
}

/// Glyphs produced by a single text-showing operation
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TextRun {
    pub glyphs: Vec<Glyph>,
    pub baseline: f64,
    pub font_size: f64,
}

impl TextRun {
    pub fn text(&self) -> String {
        self.glyphs.iter().map(|g| g.ch).collect()
    }
}

#[derive(Debug, Clone)]
struct TextState {
    tm: Matrix,
    lm: Matrix,
    font_size: f64,
    char_spacing: f64,
    word_spacing: f64,
    horizontal_scale: f64,
    leading: f64,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            tm: Matrix::IDENTITY,
            lm: Matrix::IDENTITY,
            font_size: 12.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scale: 1.0,
            leading: 0.0,
        }
    }
}

impl TextState {
    fn move_line(&mut self, tx: f64, ty: f64) {
        self.lm = Matrix::translate(tx, ty).mul(&self.lm);
        self.tm = self.lm;
    }

    fn next_line(&mut self) {
        let leading = self.leading;
        self.move_line(0.0, -leading);
    }

    fn advance(&mut self, tx: f64) {
        self.tm = Matrix::translate(tx, 0.0).mul(&self.tm);
    }

    fn effective_size(&self) -> f64 {
        self.font_size * self.tm.vertical_scale()
    }

    fn show(&mut self, op: usize, part: usize, bytes: &[u8], glyphs: &mut Vec<Glyph>) {
        for (offset, byte) in bytes.iter().enumerate() {
            let size = self.effective_size();
            let word = if *byte == b' ' { self.word_spacing } else { 0.0 };
            let tx = (GLYPH_ADVANCE_EM * self.font_size + self.char_spacing + word)
                * self.horizontal_scale;

            let x0 = self.tm.e;
            let x1 = self.tm.e + tx * self.tm.a;
            let y = self.tm.f;
            glyphs.push(Glyph {
                ch: *byte as char,
                op,
                part,
                byte: offset,
                bounds: Region::new(x0, y - DESCENT_EM * size, x1, y + ASCENT_EM * size),
            });
            self.advance(tx);
        }
    }
}

fn string_bytes(obj: Option<&Object>) -> Option<&[u8]> {
    match obj {
        Some(Object::String(bytes, _)) => Some(bytes.as_slice()),
        _ => None,
    }
}

/// Lays out every text-showing operation of a content stream
pub(crate) fn layout_runs(operations: &[Operation]) -> Vec<TextRun> {
    let mut state = TextState::default();
    let mut runs = Vec::new();

    for (index, op) in operations.iter().enumerate() {
        let operands = &op.operands;
        let mut glyphs = Vec::new();
        let baseline = state.tm.f;

        match op.operator.as_str() {
            "BT" => {
                state.tm = Matrix::IDENTITY;
                state.lm = Matrix::IDENTITY;
            }
            "Tf" => {
                if let Some(size) = operands.get(1).and_then(number) {
                    state.font_size = size;
                }
            }
            "Tc" => {
                if let Some(v) = operands.first().and_then(number) {
                    state.char_spacing = v;
                }
            }
            "Tw" => {
                if let Some(v) = operands.first().and_then(number) {
                    state.word_spacing = v;
                }
            }
            "Tz" => {
                if let Some(v) = operands.first().and_then(number) {
                    state.horizontal_scale = v / 100.0;
                }
            }
            "TL" => {
                if let Some(v) = operands.first().and_then(number) {
                    state.leading = v;
                }
            }
            "Td" | "TD" => {
                if let (Some(tx), Some(ty)) = (
                    operands.first().and_then(number),
                    operands.get(1).and_then(number),
                ) {
                    if op.operator == "TD" {
                        state.leading = -ty;
                    }
                    state.move_line(tx, ty);
                }
            }
            "Tm" => {
                if let Some(m) = Matrix::from_operands(operands) {
                    state.tm = m;
                    state.lm = m;
                }
            }
            "T*" => state.next_line(),
            "Tj" => {
                if let Some(bytes) = string_bytes(operands.first()) {
                    state.show(index, 0, bytes, &mut glyphs);
                }
            }
            "'" => {
                state.next_line();
                if let Some(bytes) = string_bytes(operands.first()) {
                    state.show(index, 0, bytes, &mut glyphs);
                }
            }
            "\"" => {
                if let Some(v) = operands.first().and_then(number) {
                    state.word_spacing = v;
                }
                if let Some(v) = operands.get(1).and_then(number) {
                    state.char_spacing = v;
                }
                state.next_line();
                if let Some(bytes) = string_bytes(operands.get(2)) {
                    state.show(index, 0, bytes, &mut glyphs);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    for (part, item) in items.iter().enumerate() {
                        match item {
                            Object::String(bytes, _) => state.show(index, part, bytes, &mut glyphs),
                            other => {
                                if let Some(adjust) = number(other) {
                                    state.advance(
                                        -adjust / 1000.0 * state.font_size * state.horizontal_scale,
                                    );
                                }
                            }
                        }
                    }
                }
            }
            _ => {}
        }

        if !glyphs.is_empty() {
            // `'` and `"` move to the next line before showing
            let baseline = if matches!(op.operator.as_str(), "'" | "\"") {
                glyphs[0].bounds.y0 + DESCENT_EM * state.effective_size()
            } else {
                baseline
            };
            runs.push(TextRun {
                glyphs,
                baseline,
                font_size: state.effective_size(),
            });
        }
    }

    runs
}

/// Position of a glyph as (run index, glyph index)
pub(crate) type GlyphRef = (usize, usize);

/// One reading-order line. `None` marks the space inserted over a wide gap.
type Line = Vec<Option<GlyphRef>>;

/// Groups runs into lines: a new line when the baseline moves, a space
/// between runs on the same baseline that are far apart
fn reading_lines(runs: &[TextRun]) -> Vec<Line> {
    let mut lines: Vec<Line> = Vec::new();
    let mut previous: Option<(f64, f64, f64)> = None;

    for (r, run) in runs.iter().enumerate() {
        let (first, last) = match (run.glyphs.first(), run.glyphs.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => continue,
        };

        let mut line = match previous {
            Some((baseline, end_x, size))
                if (run.baseline - baseline).abs() <= size.max(1.0) * 0.5 =>
            {
                let mut line = lines.pop().unwrap_or_default();
                if first.bounds.x0 - end_x > size * GLYPH_ADVANCE_EM * 0.5 {
                    line.push(None);
                }
                line
            }
            _ => Vec::new(),
        };
        line.extend((0..run.glyphs.len()).map(|g| Some((r, g))));
        lines.push(line);
        previous = Some((run.baseline, last.bounds.x1, run.font_size));
    }

    lines
}

fn glyph_char(runs: &[TextRun], slot: Option<GlyphRef>) -> char {
    slot.map_or(' ', |(r, g)| runs[r].glyphs[g].ch)
}

fn line_chars(runs: &[TextRun], line: &[Option<GlyphRef>]) -> Vec<char> {
    line.iter().map(|slot| glyph_char(runs, *slot)).collect()
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// `\b` semantics at `at`: a word character on exactly one side
fn word_boundary(chars: &[char], at: usize) -> bool {
    let before = at
        .checked_sub(1)
        .and_then(|i| chars.get(i))
        .map_or(false, |c| is_word_char(*c));
    let after = chars.get(at).map_or(false, |c| is_word_char(*c));
    before != after
}

/// Reading-order text of a page: a newline between baselines, a space over wide gaps
pub(crate) fn runs_to_text(runs: &[TextRun]) -> String {
    reading_lines(runs)
        .iter()
        .map(|line| line_chars(runs, line).into_iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Regions of every non-overlapping occurrence of `needle` within one line of
/// [`runs_to_text`]. With `whole_word`, hits inside a longer word are dropped.
pub(crate) fn search_runs(runs: &[TextRun], needle: &str, whole_word: bool) -> Vec<Region> {
    let needle: Vec<char> = needle.chars().collect();
    let mut regions = Vec::new();
    if needle.is_empty() {
        return regions;
    }

    for line in reading_lines(runs) {
        let chars = line_chars(runs, &line);
        let mut i = 0;
        while i + needle.len() <= chars.len() {
            let end = i + needle.len();
            let bounded = !whole_word || (word_boundary(&chars, i) && word_boundary(&chars, end));
            if chars[i..end] == needle[..] && bounded {
                let region = line[i..end]
                    .iter()
                    .flatten()
                    .map(|(r, g)| runs[*r].glyphs[*g].bounds)
                    .reduce(|acc, bounds| acc.union(&bounds));
                if let Some(region) = region {
                    regions.push(region);
                }
                i = end;
            } else {
                i += 1;
            }
        }
    }

    regions
}

/// Reading-order slots covered by `region`. Inserted spaces between covered
/// glyphs of a line stay in as `None` so a replacement string lines up with
/// the text the region was found in.
pub(crate) fn region_slots(runs: &[TextRun], region: &Region) -> Vec<Option<GlyphRef>> {
    let inside = |(r, g): GlyphRef| {
        let (cx, cy) = runs[r].glyphs[g].bounds.center();
        region.contains_point(cx, cy)
    };

    let mut slots = Vec::new();
    for line in reading_lines(runs) {
        let covered: Vec<usize> = line
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.map_or(false, inside))
            .map(|(i, _)| i)
            .collect();
        let (first, last) = match (covered.first(), covered.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => continue,
        };
        slots.extend(
            line[first..=last]
                .iter()
                .filter(|slot| slot.map_or(true, inside))
                .copied(),
        );
    }
    slots
}
