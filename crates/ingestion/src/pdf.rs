//! PDF text extraction module
//!
//! Extracts reading-order text from PDF bytes using lopdf. Each page's content
//! stream is interpreted just far enough to know where every string is drawn;
//! fragments are then ordered top-to-bottom, left-to-right.

use crate::errors::IngestionError;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId};
use regex_lite::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;

/// Baselines closer than this (in text space units) belong to the same line
const LINE_TOLERANCE: f32 = 2.0;

/// TJ adjustments below this (thousandths of an em) are read as a word gap
const TJ_SPACE_THRESHOLD: f32 = -200.0;

/// Approximate advance of one glyph as a fraction of the font size
const GLYPH_ADVANCE: f32 = 0.5;

/// Extract the text of every page, in page order.
///
/// Pages are separated by a blank line. Fails on encrypted documents and on
/// any page whose content cannot be decoded.
pub fn extract_text(bytes: &[u8]) -> Result<String, IngestionError> {
    let doc = Document::load_mem(bytes).map_err(|e| {
        let message = e.to_string();
        // lopdf reports a failed automatic decryption as a load error
        if message.to_ascii_lowercase().contains("decrypt") {
            IngestionError::PdfEncrypted
        } else {
            IngestionError::PdfParse {
                message: format!("Failed to load PDF: {}", message),
            }
        }
    })?;

    ensure_not_encrypted(&doc)?;

    let pages = doc.get_pages();
    debug!(page_count = pages.len(), "Extracting text from PDF");

    let mut page_texts = Vec::with_capacity(pages.len());
    for (page_num, page_id) in pages {
        let text = extract_page_text(&doc, page_id).map_err(|e| IngestionError::PdfParse {
            message: format!("page {}: {}", page_num, e),
        })?;
        page_texts.push(text);
    }

    let raw = page_texts.join("\n\n");
    let cleaned = clean_text(&raw);

    debug!(
        original_len = raw.len(),
        cleaned_len = cleaned.len(),
        "Text extraction complete"
    );

    Ok(cleaned)
}

fn ensure_not_encrypted(doc: &Document) -> Result<(), IngestionError> {
    if doc.is_encrypted() {
        return Err(IngestionError::PdfEncrypted);
    }
    Ok(())
}

/// A string drawn at a baseline position
#[derive(Debug, Clone, PartialEq)]
struct Fragment {
    x: f32,
    y: f32,
    text: String,
}

/// Text state tracked while walking a content stream
struct TextState {
    /// Text matrix `[a b c d e f]`
    tm: [f32; 6],
    /// Text line matrix
    tlm: [f32; 6],
    leading: f32,
    font_size: f32,
}

const IDENTITY: [f32; 6] = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

impl TextState {
    fn new() -> Self {
        Self {
            tm: IDENTITY,
            tlm: IDENTITY,
            leading: 0.0,
            font_size: 1.0,
        }
    }

    fn begin_text(&mut self) {
        self.tm = IDENTITY;
        self.tlm = IDENTITY;
    }

    fn set_matrix(&mut self, m: [f32; 6]) {
        self.tm = m;
        self.tlm = m;
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        let [a, b, c, d, e, f] = self.tlm;
        self.tlm = [a, b, c, d, e + tx * a + ty * c, f + tx * b + ty * d];
        self.tm = self.tlm;
    }

    fn next_line(&mut self) {
        self.move_line(0.0, -self.leading);
    }

    fn show(&mut self, text: String, fragments: &mut Vec<Fragment>) {
        let glyphs = text.chars().count() as f32;
        if !text.trim().is_empty() {
            fragments.push(Fragment {
                x: self.tm[4],
                y: self.tm[5],
                text,
            });
        }
        // Keeps consecutive shows on one line ordered left to right
        self.tm[4] += glyphs * self.font_size * GLYPH_ADVANCE * self.tm[0];
    }
}

/// Font resource name to the simple encoding its strings are written in
type FontEncodings = BTreeMap<Vec<u8>, String>;

/// Encodings lopdf can map byte-for-byte to Unicode
const SIMPLE_ENCODINGS: [&str; 4] = [
    "StandardEncoding",
    "MacRomanEncoding",
    "MacExpertEncoding",
    "WinAnsiEncoding",
];

/// Extract text from a single page
fn extract_page_text(doc: &Document, page_id: ObjectId) -> Result<String, lopdf::Error> {
    let content = doc.get_page_content(page_id)?;
    let content = Content::decode(&content)?;

    let fonts = page_font_encodings(doc, page_id);
    let fragments = collect_fragments(&content.operations, &fonts);
    Ok(layout(fragments))
}

fn page_font_encodings(doc: &Document, page_id: ObjectId) -> FontEncodings {
    doc.get_page_fonts(page_id)
        .into_iter()
        .filter_map(|(name, font)| font_encoding(doc, font).map(|encoding| (name, encoding)))
        .collect()
}

/// The simple encoding of a font, if it has one. `/Differences` are ignored
/// and only the base encoding is used.
fn font_encoding(doc: &Document, font: &Dictionary) -> Option<String> {
    let encoding = match font.get(b"Encoding") {
        Ok(Object::Name(_)) => font.get_font_encoding().to_string(),
        Ok(Object::Dictionary(dict)) => base_encoding(dict),
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Name(name)) => String::from_utf8_lossy(name).into_owned(),
            Ok(Object::Dictionary(dict)) => base_encoding(dict),
            _ => return None,
        },
        // Type1 fonts without an /Encoding use the standard Latin set
        _ => match font.get(b"Subtype").and_then(Object::as_name_str) {
            Ok("Type1") => "StandardEncoding".to_string(),
            _ => return None,
        },
    };

    if SIMPLE_ENCODINGS.contains(&encoding.as_str()) {
        Some(encoding)
    } else {
        None
    }
}

fn base_encoding(dict: &Dictionary) -> String {
    dict.get(b"BaseEncoding")
        .and_then(Object::as_name_str)
        .unwrap_or("StandardEncoding")
        .to_string()
}

fn collect_fragments(operations: &[Operation], fonts: &FontEncodings) -> Vec<Fragment> {
    let mut state = TextState::new();
    let mut fragments = Vec::new();
    let mut encoding: Option<&str> = None;

    for op in operations {
        let operands = &op.operands;
        match op.operator.as_str() {
            "BT" => state.begin_text(),
            "Tf" => {
                encoding = operands
                    .first()
                    .and_then(|name| name.as_name().ok())
                    .and_then(|name| fonts.get(name))
                    .map(String::as_str);
                if let Some(size) = operands.get(1).and_then(number) {
                    state.font_size = size.abs().max(f32::EPSILON);
                }
            }
            "TL" => {
                if let Some(leading) = operands.first().and_then(number) {
                    state.leading = leading;
                }
            }
            "Tm" => {
                let values: Vec<f32> = operands.iter().filter_map(number).collect();
                if let Ok(m) = <[f32; 6]>::try_from(values) {
                    state.set_matrix(m);
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
            "T*" => state.next_line(),
            "Tj" => {
                if let Some(text) = operands.first().and_then(|obj| string(obj, encoding)) {
                    state.show(text, &mut fragments);
                }
            }
            "'" => {
                state.next_line();
                if let Some(text) = operands.first().and_then(|obj| string(obj, encoding)) {
                    state.show(text, &mut fragments);
                }
            }
            "\"" => {
                state.next_line();
                if let Some(text) = operands.get(2).and_then(|obj| string(obj, encoding)) {
                    state.show(text, &mut fragments);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    state.show(join_tj_array(items, encoding), &mut fragments);
                }
            }
            _ => {}
        }
    }

    fragments
}

/// Concatenate the strings of a TJ array, turning large negative kerns into spaces
fn join_tj_array(items: &[Object], encoding: Option<&str>) -> String {
    let mut text = String::new();
    for item in items {
        if let Some(s) = string(item, encoding) {
            text.push_str(&s);
        } else if let Some(adjust) = number(item) {
            if adjust < TJ_SPACE_THRESHOLD && !text.ends_with(' ') {
                text.push(' ');
            }
        }
    }
    text
}

/// Order fragments top to bottom, then left to right, and join them
fn layout(mut fragments: Vec<Fragment>) -> String {
    fragments.sort_by(|a, b| b.y.total_cmp(&a.y));

    let mut lines: Vec<Vec<Fragment>> = Vec::new();
    for fragment in fragments {
        let same_line = matches!(
            lines.last(),
            Some(line) if (line[0].y - fragment.y).abs() <= LINE_TOLERANCE
        );
        match lines.last_mut() {
            Some(line) if same_line => line.push(fragment),
            _ => lines.push(vec![fragment]),
        }
    }

    lines
        .into_iter()
        .map(|mut line| {
            line.sort_by(|a, b| a.x.total_cmp(&b.x));
            line.iter()
                .map(|f| f.text.trim())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

fn string(obj: &Object, encoding: Option<&str>) -> Option<String> {
    match obj {
        Object::String(bytes, _) => Some(decode_pdf_string(bytes, encoding)),
        _ => None,
    }
}

/// Decode a PDF string: UTF-16BE when it carries a BOM, otherwise through the
/// current font's encoding. Strings drawn with no known encoding are read one
/// char per byte.
fn decode_pdf_string(bytes: &[u8], encoding: Option<&str>) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }

    match encoding {
        Some(encoding) => Document::decode_text(Some(encoding), bytes),
        None => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex compiles"))
}

/// Clean extracted text
fn clean_text(text: &str) -> String {
    static HYPHENATED: OnceLock<Regex> = OnceLock::new();
    static SPACES: OnceLock<Regex> = OnceLock::new();
    static TRAILING: OnceLock<Regex> = OnceLock::new();
    static BLANK_LINES: OnceLock<Regex> = OnceLock::new();

    let text = text.replace(['\0', '\u{FEFF}'], "");
    let text = regex(&SPACES, r"[ \t]+").replace_all(&text, " ");
    let text = regex(&TRAILING, r"(?m) +$").replace_all(&text, "");
    let text = regex(&HYPHENATED, r"([A-Za-z])-\n *([a-z])").replace_all(&text, "${1}${2}");
    let text = regex(&BLANK_LINES, r"\n{3,}").replace_all(&text, "\n\n");

    text.trim().to_string()
}
