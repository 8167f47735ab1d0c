// Region redactor: true deletion of stale content inside the plan's regions

use std::collections::HashSet;

use lopdf::content::{Content, Operation};
use lopdf::{Document, ObjectId};

use crate::pdf::locate::scan_page;
use crate::pdf::{write_page_content, PatchError, PatchPlan};

/// Erase everything inside the plan's redaction regions from the page.
///
/// A read-only scan first decides which show/paint operators fall inside a
/// region; the content is then rewritten in a single pass. Dropping the
/// operators (rather than covering them) guarantees the old text is gone
/// from the page's extractable content, not just hidden.
pub fn clear_regions(
    doc: &mut Document,
    page_id: ObjectId,
    plan: &PatchPlan,
) -> Result<(), PatchError> {
    let regions = plan.redaction_regions();
    let scan = scan_page(doc, page_id)?;

    let mut doomed: HashSet<usize> = HashSet::new();
    for span in &scan.spans {
        if regions.iter().any(|r| r.intersects(&span.bbox())) {
            doomed.insert(span.op_index);
        }
    }
    for image in &scan.images {
        if regions.iter().any(|r| r.intersects(&image.rect)) {
            doomed.insert(image.op_index);
        }
    }
    if doomed.is_empty() {
        return Ok(());
    }

    let data = doc.get_page_content(page_id)?;
    let content = Content::decode(&data)?;
    let mut kept = Vec::with_capacity(content.operations.len());
    for (index, op) in content.operations.into_iter().enumerate() {
        if !doomed.contains(&index) {
            kept.push(op);
            continue;
        }
        // ' and " advance the line and set spacings as side effects;
        // preserve those so any following text keeps its position.
        match op.operator.as_str() {
            "'" => kept.push(Operation::new("T*", vec![])),
            "\"" => {
                let mut operands = op.operands;
                if operands.len() == 3 {
                    let char_spacing = operands.remove(1);
                    let word_spacing = operands.remove(0);
                    kept.push(Operation::new("Tw", vec![word_spacing]));
                    kept.push(Operation::new("Tc", vec![char_spacing]));
                }
                kept.push(Operation::new("T*", vec![]));
            }
            _ => {}
        }
    }

    let encoded = Content { operations: kept }.encode()?;
    write_page_content(doc, page_id, encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::locate::build_patch_plan;
    use crate::pdf::{testdoc, TemplateConfig};

    fn texts(doc: &Document, page_id: ObjectId) -> Vec<String> {
        scan_page(doc, page_id)
            .unwrap()
            .spans
            .iter()
            .map(|s| s.text.clone())
            .collect()
    }

    #[test]
    fn test_clear_removes_placeholder_values_only() {
        let (mut doc, page_id) = testdoc::standard();
        let config = TemplateConfig::default();
        let plan = build_patch_plan(&doc, page_id, &config, "Rohan", "pw").unwrap();

        clear_regions(&mut doc, page_id, &plan).unwrap();

        let remaining = texts(&doc, page_id);
        assert!(remaining.iter().all(|t| !t.contains("Edoras")));
        assert!(remaining.contains(&"Rete Wi-Fi".to_string()));
        assert!(remaining.contains(&"Password".to_string()));
        assert!(remaining.contains(&"Inquadra il QR code".to_string()));
    }

    #[test]
    fn test_clear_removes_image_in_qr_area() {
        use lopdf::content::{Content, Operation};
        use lopdf::Object;

        let (mut doc, page_id) = testdoc::standard();
        // Paint a stale QR image roughly where the new one will go.
        let data = doc.get_page_content(page_id).unwrap();
        let mut content = Content::decode(&data).unwrap();
        content.operations.extend([
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Real(140.0),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Real(140.0),
                    Object::Real(240.0),
                    Object::Real(265.0),
                ],
            ),
            Operation::new("Do", vec![Object::Name(b"ImOld".to_vec())]),
            Operation::new("Q", vec![]),
        ]);
        write_page_content(&mut doc, page_id, content.encode().unwrap()).unwrap();

        let config = TemplateConfig::default();
        let plan = build_patch_plan(&doc, page_id, &config, "Rohan", "pw").unwrap();
        clear_regions(&mut doc, page_id, &plan).unwrap();

        assert!(scan_page(&doc, page_id).unwrap().images.is_empty());
    }

    #[test]
    fn test_clear_is_a_no_op_when_nothing_intersects() {
        let (mut doc, page_id) = testdoc::template(&[
            ("Rete Wi-Fi", 100.0, 520.0),
            ("Password", 100.0, 480.0),
            ("Inquadra il QR code", 230.0, 420.0),
        ]);
        let before = doc.get_page_content(page_id).unwrap();
        let config = TemplateConfig::default();
        let plan = build_patch_plan(&doc, page_id, &config, "Rohan", "pw").unwrap();
        clear_regions(&mut doc, page_id, &plan).unwrap();
        assert_eq!(doc.get_page_content(page_id).unwrap(), before);
    }
}
