// Template locator: reconstruct text/image geometry from content streams
// and resolve a full PatchPlan before anything is mutated.

use std::collections::HashMap;

use lopdf::content::Content;
use lopdf::{Document, Object, ObjectId};

use crate::metrics;
use crate::pdf::{
    number, resolve, string_bytes, BoundingBox, PatchError, PatchPlan, TemplateConfig, TextInsert,
};

// ============================================================================
// Page scan
// ============================================================================

/// One text-show operator's worth of text with its device-space geometry.
#[derive(Debug, Clone)]
pub(crate) struct TextSpan {
    pub text: String,
    /// Characters of `text`, parallel to `advances`.
    pub chars: Vec<char>,
    /// Device-space advance of each character, kerning folded in.
    pub advances: Vec<f64>,
    /// Device X of the first glyph's origin.
    pub x: f64,
    pub baseline: f64,
    /// Effective font size in device space.
    pub size: f64,
    /// Index of the show operator in the decoded content stream.
    pub op_index: usize,
}

impl TextSpan {
    pub fn width(&self) -> f64 {
        self.advances.iter().sum()
    }

    pub fn bbox(&self) -> BoundingBox {
        let (descent, ascent) = metrics::line_extent(self.size);
        BoundingBox {
            x0: self.x,
            y0: self.baseline + descent,
            x1: self.x + self.width(),
            y1: self.baseline + ascent,
        }
    }

    /// Box around `len` characters starting at char index `start`.
    fn slice_box(&self, start: usize, len: usize) -> BoundingBox {
        let (descent, ascent) = metrics::line_extent(self.size);
        let x0 = self.x + self.advances[..start].iter().sum::<f64>();
        let width: f64 = self.advances[start..start + len].iter().sum();
        BoundingBox {
            x0,
            y0: self.baseline + descent,
            x1: x0 + width,
            y1: self.baseline + ascent,
        }
    }
}

/// An image XObject painted on the page.
#[derive(Debug, Clone)]
pub(crate) struct PlacedImage {
    pub rect: BoundingBox,
    pub op_index: usize,
}

#[derive(Debug, Default)]
pub(crate) struct PageScan {
    pub spans: Vec<TextSpan>,
    pub images: Vec<PlacedImage>,
}

/// A located piece of text: its box plus the baseline it sits on.
#[derive(Debug, Clone, Copy)]
struct TextMatch {
    bbox: BoundingBox,
    baseline: f64,
}

impl PageScan {
    /// All occurrences of `needle`, including substring matches inside a
    /// longer span, with boxes carved out via the recorded advances.
    fn find_text(&self, needle: &str) -> Vec<TextMatch> {
        let pattern: Vec<char> = needle.chars().collect();
        if pattern.is_empty() {
            return Vec::new();
        }
        let mut matches = Vec::new();
        for span in &self.spans {
            if span.chars.len() < pattern.len() {
                continue;
            }
            for start in 0..=(span.chars.len() - pattern.len()) {
                if span.chars[start..start + pattern.len()] == pattern[..] {
                    matches.push(TextMatch {
                        bbox: span.slice_box(start, pattern.len()),
                        baseline: span.baseline,
                    });
                }
            }
        }
        matches
    }
}

// ============================================================================
// Matrices
// ============================================================================

/// Row-major 2D affine transform, PDF operand order [a b c d e f].
#[derive(Debug, Clone, Copy)]
struct Mat {
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    e: f64,
    f: f64,
}

impl Mat {
    const IDENTITY: Mat = Mat {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    fn from_operands(operands: &[Object]) -> Option<Mat> {
        if operands.len() != 6 {
            return None;
        }
        let mut v = [0.0f64; 6];
        for (slot, obj) in v.iter_mut().zip(operands) {
            *slot = number(obj)?;
        }
        Some(Mat {
            a: v[0],
            b: v[1],
            c: v[2],
            d: v[3],
            e: v[4],
            f: v[5],
        })
    }

    /// `self` applied first, then `after`.
    fn then(&self, after: &Mat) -> Mat {
        Mat {
            a: self.a * after.a + self.b * after.c,
            b: self.a * after.b + self.b * after.d,
            c: self.c * after.a + self.d * after.c,
            d: self.c * after.b + self.d * after.d,
            e: self.e * after.a + self.f * after.c + after.e,
            f: self.e * after.b + self.f * after.d + after.f,
        }
    }

    /// Prepend a translation in the untransformed space (the Td/advance rule).
    fn pre_translate(&self, tx: f64, ty: f64) -> Mat {
        Mat {
            e: tx * self.a + ty * self.c + self.e,
            f: tx * self.b + ty * self.d + self.f,
            ..*self
        }
    }

    fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }
}

// ============================================================================
// Content-stream walk
// ============================================================================

/// Decode the page's content and record every text span and painted image
/// with device-space geometry. Read-only; repeated scans of an untouched
/// page return identical results.
pub(crate) fn scan_page(doc: &Document, page_id: ObjectId) -> Result<PageScan, PatchError> {
    let fonts = font_boldness(doc, page_id);
    let data = doc.get_page_content(page_id)?;
    let content = Content::decode(&data)?;

    let mut scan = PageScan::default();
    let mut ctm = Mat::IDENTITY;
    let mut ctm_stack: Vec<Mat> = Vec::new();
    let mut tm = Mat::IDENTITY;
    let mut tlm = Mat::IDENTITY;
    let mut leading = 0.0f64;
    let mut font_size = 0.0f64;
    let mut bold = false;
    let mut char_spacing = 0.0f64;
    let mut word_spacing = 0.0f64;

    for (op_index, op) in content.operations.iter().enumerate() {
        let operands = &op.operands;
        match op.operator.as_str() {
            "q" => ctm_stack.push(ctm),
            "Q" => ctm = ctm_stack.pop().unwrap_or(Mat::IDENTITY),
            "cm" => {
                if let Some(m) = Mat::from_operands(operands) {
                    ctm = m.then(&ctm);
                }
            }
            "BT" => {
                tm = Mat::IDENTITY;
                tlm = Mat::IDENTITY;
            }
            "Tf" => {
                if operands.len() == 2 {
                    if let Ok(name) = operands[0].as_name() {
                        bold = fonts
                            .get(&String::from_utf8_lossy(name).into_owned())
                            .copied()
                            .unwrap_or(false);
                    }
                    font_size = number(&operands[1]).unwrap_or(font_size);
                }
            }
            "TL" => {
                if let Some(l) = operands.first().and_then(number) {
                    leading = l;
                }
            }
            "Tc" => {
                if let Some(v) = operands.first().and_then(number) {
                    char_spacing = v;
                }
            }
            "Tw" => {
                if let Some(v) = operands.first().and_then(number) {
                    word_spacing = v;
                }
            }
            "Td" | "TD" => {
                if operands.len() == 2 {
                    let tx = number(&operands[0]).unwrap_or(0.0);
                    let ty = number(&operands[1]).unwrap_or(0.0);
                    if op.operator == "TD" {
                        leading = -ty;
                    }
                    tlm = tlm.pre_translate(tx, ty);
                    tm = tlm;
                }
            }
            "Tm" => {
                if let Some(m) = Mat::from_operands(operands) {
                    tm = m;
                    tlm = m;
                }
            }
            "T*" => {
                tlm = tlm.pre_translate(0.0, -leading);
                tm = tlm;
            }
            "Tj" => {
                if let Some(bytes) = operands.first().and_then(string_bytes) {
                    show_text(
                        &mut scan, &mut tm, &ctm, bytes, font_size, bold, char_spacing,
                        word_spacing, op_index,
                    );
                }
            }
            "'" => {
                tlm = tlm.pre_translate(0.0, -leading);
                tm = tlm;
                if let Some(bytes) = operands.first().and_then(string_bytes) {
                    show_text(
                        &mut scan, &mut tm, &ctm, bytes, font_size, bold, char_spacing,
                        word_spacing, op_index,
                    );
                }
            }
            "\"" => {
                if operands.len() == 3 {
                    word_spacing = number(&operands[0]).unwrap_or(word_spacing);
                    char_spacing = number(&operands[1]).unwrap_or(char_spacing);
                    tlm = tlm.pre_translate(0.0, -leading);
                    tm = tlm;
                    if let Some(bytes) = string_bytes(&operands[2]) {
                        show_text(
                            &mut scan, &mut tm, &ctm, bytes, font_size, bold, char_spacing,
                            word_spacing, op_index,
                        );
                    }
                }
            }
            "TJ" => {
                if let Some(Ok(elements)) = operands.first().map(Object::as_array) {
                    show_array(
                        &mut scan, &mut tm, &ctm, elements, font_size, bold, char_spacing,
                        word_spacing, op_index,
                    );
                }
            }
            "Do" => {
                // Unit square mapped through the CTM; the templates this
                // tool handles place images without rotation or skew.
                let (x0, y0) = ctm.apply(0.0, 0.0);
                let (x1, y1) = ctm.apply(1.0, 1.0);
                scan.images.push(PlacedImage {
                    rect: BoundingBox {
                        x0: x0.min(x1),
                        y0: y0.min(y1),
                        x1: x0.max(x1),
                        y1: y0.max(y1),
                    },
                    op_index,
                });
            }
            _ => {}
        }
    }

    Ok(scan)
}

#[allow(clippy::too_many_arguments)]
fn show_text(
    scan: &mut PageScan,
    tm: &mut Mat,
    ctm: &Mat,
    bytes: &[u8],
    font_size: f64,
    bold: bool,
    char_spacing: f64,
    word_spacing: f64,
    op_index: usize,
) {
    let device = tm.then(ctm);
    let (x, baseline) = device.apply(0.0, 0.0);
    let scale = device.a;
    let size = font_size * device.d.abs();

    let mut chars = Vec::with_capacity(bytes.len());
    let mut advances = Vec::with_capacity(bytes.len());
    let mut text_advance = 0.0;
    for &byte in bytes {
        let ch = byte as char;
        let mut w = metrics::advance(ch, bold) * font_size / 1000.0 + char_spacing;
        if byte == b' ' {
            w += word_spacing;
        }
        chars.push(ch);
        advances.push(w * scale);
        text_advance += w;
    }
    *tm = tm.pre_translate(text_advance, 0.0);

    if chars.is_empty() {
        return;
    }
    scan.spans.push(TextSpan {
        text: chars.iter().collect(),
        chars,
        advances,
        x,
        baseline,
        size,
        op_index,
    });
}

/// TJ: strings interleaved with kerning adjustments. The whole array makes
/// one span; adjustments widen or tighten the previous glyph's advance so
/// substring boxes stay accurate.
#[allow(clippy::too_many_arguments)]
fn show_array(
    scan: &mut PageScan,
    tm: &mut Mat,
    ctm: &Mat,
    elements: &[Object],
    font_size: f64,
    bold: bool,
    char_spacing: f64,
    word_spacing: f64,
    op_index: usize,
) {
    let mut chars: Vec<char> = Vec::new();
    let mut advances: Vec<f64> = Vec::new();
    let mut origin: Option<(f64, f64, f64)> = None;

    for element in elements {
        if let Some(bytes) = string_bytes(element) {
            let device = tm.then(ctm);
            if origin.is_none() && !bytes.is_empty() {
                let (x, y) = device.apply(0.0, 0.0);
                origin = Some((x, y, font_size * device.d.abs()));
            }
            let scale = device.a;
            let mut text_advance = 0.0;
            for &byte in bytes {
                let ch = byte as char;
                let mut w = metrics::advance(ch, bold) * font_size / 1000.0 + char_spacing;
                if byte == b' ' {
                    w += word_spacing;
                }
                chars.push(ch);
                advances.push(w * scale);
                text_advance += w;
            }
            *tm = tm.pre_translate(text_advance, 0.0);
        } else if let Some(adjustment) = number(element) {
            let shift = -adjustment / 1000.0 * font_size;
            let device_shift = shift * tm.then(ctm).a;
            *tm = tm.pre_translate(shift, 0.0);
            if let Some(last) = advances.last_mut() {
                *last += device_shift;
            }
        }
    }

    if let Some((x, baseline, size)) = origin {
        scan.spans.push(TextSpan {
            text: chars.iter().collect(),
            chars,
            advances,
            x,
            baseline,
            size,
            op_index,
        });
    }
}

/// Map the page's font resource names to "is a bold face".
fn font_boldness(doc: &Document, page_id: ObjectId) -> HashMap<String, bool> {
    let mut map = HashMap::new();
    let Some(resources) = page_resources(doc, page_id) else {
        return map;
    };
    let Ok(fonts) = resources.get(b"Font") else {
        return map;
    };
    let Ok(fonts) = resolve(doc, fonts).as_dict() else {
        return map;
    };
    for (name, font) in fonts.iter() {
        let base = resolve(doc, font)
            .as_dict()
            .ok()
            .and_then(|d| d.get(b"BaseFont").ok())
            .and_then(|o| o.as_name().ok())
            .map(|n| String::from_utf8_lossy(n).into_owned())
            .unwrap_or_default();
        map.insert(String::from_utf8_lossy(name).into_owned(), base.contains("Bold"));
    }
    map
}

/// The page's Resources dictionary, walking up the page tree when inherited.
pub(crate) fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&lopdf::Dictionary> {
    let mut id = page_id;
    for _ in 0..8 {
        let dict = doc.get_object(id).ok()?.as_dict().ok()?;
        if let Ok(resources) = dict.get(b"Resources") {
            return resolve(doc, resources).as_dict().ok();
        }
        id = dict.get(b"Parent").ok()?.as_reference().ok()?;
    }
    None
}

// ============================================================================
// Plan resolution
// ============================================================================

/// Search phase: find every anchor and placeholder, then resolve the full
/// plan (redaction cells, insertion coordinates, QR box) without touching
/// the document.
pub fn build_patch_plan(
    doc: &Document,
    page_id: ObjectId,
    config: &TemplateConfig,
    ssid: &str,
    password: &str,
) -> Result<PatchPlan, PatchError> {
    let geometry = &config.geometry;
    if !(geometry.left_border < geometry.divider && geometry.divider < geometry.right_border) {
        return Err(PatchError::Render(
            "table geometry must be ordered left < divider < right".to_string(),
        ));
    }

    let scan = scan_page(doc, page_id)?;

    let ssid_anchor = required_match(&scan, &config.ssid_label)?;
    let password_anchor = required_match(&scan, &config.password_label)?;
    let qr_anchor = required_match(&scan, &config.qr_label)?;

    let ssid_value = optional_match(&scan, &config.ssid_placeholder)?;
    let password_value = optional_match(&scan, &config.password_placeholder)?;

    // The located value gives the most accurate row geometry; the anchor is
    // the fallback when the template no longer carries a stale value.
    let ssid_row = ssid_value.unwrap_or(ssid_anchor);
    let password_row = password_value.unwrap_or(password_anchor);

    let ssid_cell = geometry.right_cell(ssid_row.bbox.y0, ssid_row.bbox.y1);
    let password_cell = geometry.right_cell(password_row.bbox.y0, password_row.bbox.y1);

    let qr_box = qr_placement(&qr_anchor.bbox, config);
    let qr_area = config.qr_placeholder.unwrap_or(qr_box);

    let center = geometry.right_column_center();
    let ssid_insert = TextInsert::resolve(ssid, center, ssid_row.baseline, config.font_size)?;
    let password_insert =
        TextInsert::resolve(password, center, password_row.baseline, config.font_size)?;

    Ok(PatchPlan {
        ssid_cell,
        password_cell,
        qr_area,
        ssid_value: ssid_value.map(|m| m.bbox),
        password_value: password_value.map(|m| m.bbox),
        ssid_insert,
        password_insert,
        qr_box,
    })
}

/// Square QR box centred under the anchor, top edge `qr_gap` below it.
fn qr_placement(anchor: &BoundingBox, config: &TemplateConfig) -> BoundingBox {
    let x0 = anchor.center_x() - config.qr_side / 2.0;
    let y1 = anchor.y0 - config.qr_gap;
    BoundingBox {
        x0,
        y0: y1 - config.qr_side,
        x1: x0 + config.qr_side,
        y1,
    }
}

fn required_match(scan: &PageScan, label: &str) -> Result<TextMatch, PatchError> {
    let matches = scan.find_text(label);
    match matches.len() {
        0 => Err(PatchError::AnchorNotFound(label.to_string())),
        1 => Ok(matches[0]),
        count => Err(PatchError::AmbiguousMatch {
            text: label.to_string(),
            count,
        }),
    }
}

fn optional_match(scan: &PageScan, text: &str) -> Result<Option<TextMatch>, PatchError> {
    let matches = scan.find_text(text);
    match matches.len() {
        0 => Ok(None),
        1 => Ok(Some(matches[0])),
        count => Err(PatchError::AmbiguousMatch {
            text: text.to_string(),
            count,
        }),
    }
}

// ============================================================================
// Tests
// ============================================================================
