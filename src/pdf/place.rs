// Content placer: write the new credentials and QR image into cleared regions

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};

use crate::pdf::locate::page_resources;
use crate::pdf::{resolve, write_page_content, BoundingBox, PatchError, PatchPlan, TextInsert};
use crate::qr::RenderedQr;

/// Execute the resolved plan: append the centred SSID/password text runs
/// and draw the QR image into its box. Mutates the document in memory only.
pub fn apply_plan(
    doc: &mut Document,
    page_id: ObjectId,
    plan: &PatchPlan,
    qr: &RenderedQr,
) -> Result<(), PatchError> {
    let font_name = ensure_helvetica(doc, page_id)?;
    let image_name = register_qr_image(doc, page_id, qr)?;

    let data = doc.get_page_content(page_id)?;
    let mut content = Content::decode(&data)?;
    append_text(&mut content.operations, &font_name, &plan.ssid_insert);
    append_text(&mut content.operations, &font_name, &plan.password_insert);
    append_image(&mut content.operations, &image_name, &plan.qr_box);

    write_page_content(doc, page_id, content.encode()?)
}

fn append_text(ops: &mut Vec<Operation>, font: &str, insert: &TextInsert) {
    ops.push(Operation::new("q", vec![]));
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new(
        "Tf",
        vec![
            Object::Name(font.as_bytes().to_vec()),
            Object::Real(insert.size as f32),
        ],
    ));
    ops.push(Operation::new(
        "rg",
        vec![Object::Integer(0), Object::Integer(0), Object::Integer(0)],
    ));
    ops.push(Operation::new(
        "Td",
        vec![
            Object::Real(insert.x as f32),
            Object::Real(insert.baseline as f32),
        ],
    ));
    ops.push(Operation::new(
        "Tj",
        vec![Object::String(insert.encoded.clone(), StringFormat::Literal)],
    ));
    ops.push(Operation::new("ET", vec![]));
    ops.push(Operation::new("Q", vec![]));
}

fn append_image(ops: &mut Vec<Operation>, name: &str, rect: &BoundingBox) {
    ops.push(Operation::new("q", vec![]));
    ops.push(Operation::new(
        "cm",
        vec![
            Object::Real(rect.width() as f32),
            Object::Integer(0),
            Object::Integer(0),
            Object::Real(rect.height() as f32),
            Object::Real(rect.x0 as f32),
            Object::Real(rect.y0 as f32),
        ],
    ));
    ops.push(Operation::new(
        "Do",
        vec![Object::Name(name.as_bytes().to_vec())],
    ));
    ops.push(Operation::new("Q", vec![]));
}

/// Find a Helvetica Type1 resource on the page, registering one when the
/// template brought its own fonts only.
fn ensure_helvetica(doc: &mut Document, page_id: ObjectId) -> Result<String, PatchError> {
    if let Some(resources) = page_resources(doc, page_id) {
        if let Ok(fonts) = resources.get(b"Font").map(|o| resolve(doc, o)) {
            if let Ok(fonts) = fonts.as_dict() {
                for (name, font) in fonts.iter() {
                    let is_helvetica = resolve(doc, font)
                        .as_dict()
                        .ok()
                        .and_then(|d| d.get(b"BaseFont").ok())
                        .and_then(|o| o.as_name().ok())
                        .map(|base| base == b"Helvetica")
                        .unwrap_or(false);
                    if is_helvetica {
                        return Ok(String::from_utf8_lossy(name).into_owned());
                    }
                }
            }
        }
    }
    let font = dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    };
    add_resource(doc, page_id, "Font", "WF", Object::Dictionary(font))
}

/// Embed the QR bitmap as an uncompressed DeviceRGB image XObject.
fn register_qr_image(
    doc: &mut Document,
    page_id: ObjectId,
    qr: &RenderedQr,
) -> Result<String, PatchError> {
    let width = qr.image.width();
    let height = qr.image.height();
    let stream = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        },
        qr.image.as_raw().clone(),
    );
    let stream_id = doc.add_object(stream);
    add_resource(doc, page_id, "XObject", "QRim", Object::Reference(stream_id))
}

/// Where a page's Resources dictionary lives.
#[derive(Clone, Copy)]
enum ResourceSlot {
    /// Directly on the page dictionary.
    OnPage,
    /// Behind a reference.
    Indirect(ObjectId),
}

/// Add `value` under `category` in the page's resources with a fresh name
/// built from `prefix`, and return that name.
fn add_resource(
    doc: &mut Document,
    page_id: ObjectId,
    category: &str,
    prefix: &str,
    value: Object,
) -> Result<String, PatchError> {
    let slot = materialize_resources(doc, page_id)?;

    // Decide the target and a non-colliding name before borrowing mutably.
    let resources = match slot {
        ResourceSlot::OnPage => doc
            .get_object(page_id)?
            .as_dict()?
            .get(b"Resources")?
            .as_dict()?,
        ResourceSlot::Indirect(id) => doc.get_object(id)?.as_dict()?,
    };
    let category_ref = match resources.get(category.as_bytes()) {
        Ok(Object::Reference(id)) => Some(*id),
        _ => None,
    };
    let name = {
        let existing = resources
            .get(category.as_bytes())
            .ok()
            .map(|o| resolve(doc, o));
        let keys: Vec<Vec<u8>> = existing
            .and_then(|o| o.as_dict().ok())
            .map(|d| d.iter().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default();
        let mut index = 0usize;
        loop {
            let candidate = format!("{}{}", prefix, index);
            if !keys.iter().any(|k| k == candidate.as_bytes()) {
                break candidate;
            }
            index += 1;
        }
    };

    if let Some(id) = category_ref {
        doc.get_object_mut(id)?
            .as_dict_mut()?
            .set(name.clone(), value);
        return Ok(name);
    }

    let resources = match slot {
        ResourceSlot::OnPage => doc
            .get_object_mut(page_id)?
            .as_dict_mut()?
            .get_mut(b"Resources")?
            .as_dict_mut()?,
        ResourceSlot::Indirect(id) => doc.get_object_mut(id)?.as_dict_mut()?,
    };
    let has_category = matches!(resources.get(category.as_bytes()), Ok(Object::Dictionary(_)));
    if has_category {
        resources
            .get_mut(category.as_bytes())?
            .as_dict_mut()?
            .set(name.clone(), value);
    } else {
        let mut dict = Dictionary::new();
        dict.set(name.clone(), value);
        resources.set(category, Object::Dictionary(dict));
    }
    Ok(name)
}

/// Guarantee the page owns a Resources entry, copying an inherited one from
/// the page tree (or starting empty) when needed.
fn materialize_resources(
    doc: &mut Document,
    page_id: ObjectId,
) -> Result<ResourceSlot, PatchError> {
    let page = doc.get_object(page_id)?.as_dict()?;
    match page.get(b"Resources") {
        Ok(Object::Reference(id)) => return Ok(ResourceSlot::Indirect(*id)),
        Ok(_) => return Ok(ResourceSlot::OnPage),
        Err(_) => {}
    }

    // Inherited resources: look up the parent chain, then clone down.
    let mut inherited = None;
    let mut id = page_id;
    for _ in 0..8 {
        let Ok(dict) = doc.get_object(id).and_then(Object::as_dict) else {
            break;
        };
        if id != page_id {
            if let Ok(resources) = dict.get(b"Resources") {
                if let Ok(resources) = resolve(doc, resources).as_dict() {
                    inherited = Some(resources.clone());
                    break;
                }
            }
        }
        match dict.get(b"Parent").and_then(Object::as_reference) {
            Ok(parent) => id = parent,
            Err(_) => break,
        }
    }

    let resources = inherited.unwrap_or_else(Dictionary::new);
    doc.get_object_mut(page_id)?
        .as_dict_mut()?
        .set("Resources", Object::Dictionary(resources));
    Ok(ResourceSlot::OnPage)
}
