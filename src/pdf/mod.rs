// PDF template patching: locate anchors, redact stale regions, place new content

pub mod locate;
pub mod place;
pub mod redact;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use serde::Deserialize;
use thiserror::Error;

use crate::metrics;
use crate::qr::RenderedQr;

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("Template anchor {0:?} not found on the page")]
    AnchorNotFound(String),
    #[error("Text {text:?} matches {count} times on the page; cannot patch safely")]
    AmbiguousMatch { text: String, count: usize },
    #[error("Cannot render replacement content: {0}")]
    Render(String),
    #[error("Template has no pages")]
    EmptyDocument,
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),
}

// ============================================================================
// Geometry
// ============================================================================

/// Axis-aligned rectangle in page-space points.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct BoundingBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BoundingBox {
    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    pub fn center_x(&self) -> f64 {
        (self.x0 + self.x1) / 2.0
    }

    /// True if the rectangles share interior area. Touching edges do not count.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        !(self.x1 <= other.x0
            || other.x1 <= self.x0
            || self.y1 <= other.y0
            || other.y1 <= self.y0)
    }

    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.x0 >= self.x0 && other.x1 <= self.x1 && other.y0 >= self.y0 && other.y1 <= self.y1
    }
}

/// Fixed X coordinates of the two-column credentials table.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TableGeometry {
    pub left_border: f64,
    pub divider: f64,
    pub right_border: f64,
}

impl TableGeometry {
    /// Centre of the value column, where replacement text is centred.
    pub fn right_column_center(&self) -> f64 {
        (self.divider + self.right_border) / 2.0
    }

    /// Full value cell for a row spanning `y0..y1`.
    pub fn right_cell(&self, y0: f64, y1: f64) -> BoundingBox {
        BoundingBox {
            x0: self.divider,
            y0,
            x1: self.right_border,
            y1,
        }
    }
}

impl Default for TableGeometry {
    fn default() -> Self {
        Self {
            left_border: 90.92,
            divider: 297.64,
            right_border: 505.64,
        }
    }
}

// ============================================================================
// Template configuration
// ============================================================================

/// Everything the patch pipeline needs to know about a template's layout.
///
/// Defaults describe the sample card template; a JSON config file can
/// override any subset of fields to support other templates of the same
/// table-and-label shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Label anchoring the SSID row.
    pub ssid_label: String,
    /// Label anchoring the password row.
    pub password_label: String,
    /// Label above the QR code area.
    pub qr_label: String,
    /// Stale SSID text expected in the value column.
    pub ssid_placeholder: String,
    /// Stale password text expected in the value column.
    pub password_placeholder: String,
    pub geometry: TableGeometry,
    /// Size the template prints credential values at, in points.
    pub font_size: f64,
    /// Side of the placed QR image, in points.
    pub qr_side: f64,
    /// Gap between the QR label's baseline area and the QR image top edge.
    pub qr_gap: f64,
    /// Region occupied by a pre-printed QR image, when the template has one.
    pub qr_placeholder: Option<BoundingBox>,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            ssid_label: "Rete Wi-Fi".to_string(),
            password_label: "Password".to_string(),
            qr_label: "Inquadra il QR code".to_string(),
            ssid_placeholder: "Edoras-Guest".to_string(),
            password_placeholder: "Edoras-2346".to_string(),
            geometry: TableGeometry::default(),
            font_size: 11.0,
            qr_side: 145.0,
            qr_gap: 10.0,
            qr_placeholder: None,
        }
    }
}

// ============================================================================
// Patch plan
// ============================================================================

/// A replacement string resolved to its final position.
#[derive(Debug, Clone)]
pub struct TextInsert {
    pub text: String,
    /// Latin-1 bytes as they will appear in the content stream.
    pub encoded: Vec<u8>,
    /// Left edge of the inserted text (centring already applied).
    pub x: f64,
    pub baseline: f64,
    pub size: f64,
}

impl TextInsert {
    /// Resolve `text` centred on `center` at the given baseline.
    ///
    /// Fails when a character has no Helvetica metric or cannot be encoded
    /// as Latin-1; centring from an estimated width would drift visibly
    /// with string length, so there is no fallback.
    pub fn resolve(
        text: &str,
        center: f64,
        baseline: f64,
        size: f64,
    ) -> Result<Self, PatchError> {
        let width = metrics::text_width(text, size, false).ok_or_else(|| {
            PatchError::Render(format!(
                "no Helvetica metrics for some characters of {:?}",
                text
            ))
        })?;
        let encoded = encode_latin1(text)?;
        Ok(Self {
            text: text.to_string(),
            encoded,
            x: center - width / 2.0,
            baseline,
            size,
        })
    }

    pub fn width(&self) -> f64 {
        // resolve() measured the text already; re-derive instead of storing.
        metrics::text_width(&self.text, self.size, false).unwrap_or(0.0)
    }

    fn bbox(&self) -> BoundingBox {
        let (descent, ascent) = metrics::line_extent(self.size);
        BoundingBox {
            x0: self.x,
            y0: self.baseline + descent,
            x1: self.x + self.width(),
            y1: self.baseline + ascent,
        }
    }
}

fn encode_latin1(text: &str) -> Result<Vec<u8>, PatchError> {
    text.chars()
        .map(|c| {
            let code = c as u32;
            if code == 0x20 || (0x21..=0x7E).contains(&code) || (0xA0..=0xFF).contains(&code) {
                Ok(code as u8)
            } else {
                Err(PatchError::Render(format!(
                    "character {:?} cannot be written with the template's encoding",
                    c
                )))
            }
        })
        .collect()
}

/// Fully resolved plan for one patch run.
///
/// Built by the locator before any mutation; the redactor and placer only
/// execute it. If plan construction fails, the document is untouched.
#[derive(Debug, Clone)]
pub struct PatchPlan {
    /// Full value cell to clear on the SSID row.
    pub ssid_cell: BoundingBox,
    /// Full value cell to clear on the password row.
    pub password_cell: BoundingBox,
    /// Region to clear for the QR code.
    pub qr_area: BoundingBox,
    /// Located stale SSID text, when the template still carried it.
    pub ssid_value: Option<BoundingBox>,
    /// Located stale password text, when the template still carried it.
    pub password_value: Option<BoundingBox>,
    pub ssid_insert: TextInsert,
    pub password_insert: TextInsert,
    /// Where the QR image lands.
    pub qr_box: BoundingBox,
}

impl PatchPlan {
    /// Regions the redactor clears.
    pub fn redaction_regions(&self) -> [BoundingBox; 3] {
        [self.ssid_cell, self.password_cell, self.qr_area]
    }

    /// Check that everything the plan writes stays on the page.
    fn check_bounds(&self, page: &BoundingBox) -> Result<(), PatchError> {
        for (what, bbox) in [
            ("SSID text", self.ssid_insert.bbox()),
            ("password text", self.password_insert.bbox()),
            ("QR image", self.qr_box),
        ] {
            if !page.contains(&bbox) {
                return Err(PatchError::Render(format!(
                    "{} placement ({:.1},{:.1})-({:.1},{:.1}) extends beyond the page",
                    what, bbox.x0, bbox.y0, bbox.x1, bbox.y1
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Patch the first page of `doc` in memory: locate, redact, place.
///
/// The document is only mutated once the whole plan has been resolved, so a
/// failing search or measurement leaves it byte-for-byte unchanged. Saving
/// is left to the caller; the executed plan is returned for reporting.
pub fn patch_template(
    doc: &mut Document,
    config: &TemplateConfig,
    ssid: &str,
    password: &str,
    qr: &RenderedQr,
) -> Result<PatchPlan, PatchError> {
    let page_id = first_page(doc)?;

    let plan = locate::build_patch_plan(doc, page_id, config, ssid, password)?;
    plan.check_bounds(&page_box(doc, page_id))?;

    redact::clear_regions(doc, page_id, &plan)?;
    place::apply_plan(doc, page_id, &plan, qr)?;
    Ok(plan)
}

fn first_page(doc: &Document) -> Result<ObjectId, PatchError> {
    doc.get_pages()
        .into_iter()
        .next()
        .map(|(_, id)| id)
        .ok_or(PatchError::EmptyDocument)
}

/// The page's MediaBox, walking up the page tree; A4 when absent.
fn page_box(doc: &Document, page_id: ObjectId) -> BoundingBox {
    let mut id = page_id;
    for _ in 0..8 {
        let Ok(dict) = doc.get_object(id).and_then(Object::as_dict) else {
            break;
        };
        if let Ok(obj) = dict.get(b"MediaBox") {
            if let Some(rect) = rect_from(resolve(doc, obj)) {
                return rect;
            }
        }
        match dict.get(b"Parent").and_then(Object::as_reference) {
            Ok(parent) => id = parent,
            Err(_) => break,
        }
    }
    BoundingBox {
        x0: 0.0,
        y0: 0.0,
        x1: 595.28,
        y1: 841.89,
    }
}

fn rect_from(obj: &Object) -> Option<BoundingBox> {
    let arr = obj.as_array().ok()?;
    if arr.len() != 4 {
        return None;
    }
    let mut v = [0.0f64; 4];
    for (slot, obj) in v.iter_mut().zip(arr) {
        *slot = number(obj)?;
    }
    Some(BoundingBox {
        x0: v[0],
        y0: v[1],
        x1: v[2],
        y1: v[3],
    })
}

/// Numeric value of an Integer or Real object.
pub(crate) fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

/// Raw bytes of a String object.
pub(crate) fn string_bytes(obj: &Object) -> Option<&[u8]> {
    match obj {
        Object::String(bytes, _) => Some(bytes),
        _ => None,
    }
}

/// Follow references to their target object.
pub(crate) fn resolve<'a>(doc: &'a Document, mut obj: &'a Object) -> &'a Object {
    for _ in 0..8 {
        match obj {
            Object::Reference(id) => match doc.get_object(*id) {
                Ok(target) => obj = target,
                Err(_) => return obj,
            },
            _ => return obj,
        }
    }
    obj
}

/// Replace the page's content with a single freshly encoded stream.
pub(crate) fn write_page_content(
    doc: &mut Document,
    page_id: ObjectId,
    data: Vec<u8>,
) -> Result<(), PatchError> {
    let stream_id = doc.add_object(Stream::new(Dictionary::new(), data));
    let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
    page.set("Contents", Object::Reference(stream_id));
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod testdoc {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};

    /// Build a one-page A4 document showing each `(text, x, y)` run in
    /// 11 pt Helvetica, the shape of the sample card template.
    pub fn template(rows: &[(&str, f64, f64)]) -> (Document, ObjectId) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let mut operations = Vec::new();
        for &(text, x, y) in rows {
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new(
                "Tf",
                vec![Object::Name(b"F1".to_vec()), Object::Real(11.0)],
            ));
            operations.push(Operation::new(
                "Tm",
                vec![
                    Object::Real(1.0),
                    Object::Real(0.0),
                    Object::Real(0.0),
                    Object::Real(1.0),
                    Object::Real(x as f32),
                    Object::Real(y as f32),
                ],
            ));
            operations.push(Operation::new(
                "Tj",
                vec![Object::String(
                    text.bytes().collect(),
                    StringFormat::Literal,
                )],
            ));
            operations.push(Operation::new("ET", vec![]));
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            Dictionary::new(),
            content.encode().unwrap(),
        ));

        let resources = dictionary! {
            "Font" => dictionary! {
                "F1" => dictionary! {
                    "Type" => "Font",
                    "Subtype" => "Type1",
                    "BaseFont" => "Helvetica",
                },
            },
        };
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(595.28),
                Object::Real(841.89),
            ],
            "Resources" => resources,
            "Contents" => content_id,
        });

        let pages = dictionary! {
            "Type" => "Pages",
            "Count" => 1,
            "Kids" => vec![Object::Reference(page_id)],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", Object::Reference(catalog_id));

        (doc, page_id)
    }

    /// The sample template: labels in the left column, stale values in the
    /// right column, QR caption lower down.
    pub fn standard() -> (Document, ObjectId) {
        template(&[
            ("Rete Wi-Fi", 100.0, 520.0),
            ("Edoras-Guest", 310.0, 520.0),
            ("Password", 100.0, 480.0),
            ("Edoras-2346", 310.0, 480.0),
            ("Inquadra il QR code", 230.0, 420.0),
        ])
    }
}
