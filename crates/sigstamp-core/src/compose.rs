//! Composite a signature image onto PDF pages

use crate::error::StampError;
use crate::geometry::{inherited_attribute, PageGeometry};
use crate::placement::{placement_rect, PlacementMap, PlacementRect, RawPlacement};
use crate::signature::SignatureImage;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

/// Prefix for the XObject resource name of the signature
const XOBJECT_PREFIX: &str = "SigImg";

/// A placement that made it onto a page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedPlacement {
    pub page_number: u32,
    /// Rectangle in visual page space
    pub rect: PlacementRect,
}

/// A placement that was dropped, with the reason
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedPlacement {
    pub key: String,
    pub reason: String,
}

/// Outcome of stamping one document
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StampReport {
    pub applied: Vec<AppliedPlacement>,
    pub skipped: Vec<SkippedPlacement>,
}

/// Draw the signature on every page named in `placements`.
///
/// Each entry is processed on its own: a bad page number, coordinate, or
/// image only drops that entry, which is logged and listed in the report.
/// `signature` is the decoded image or the error from decoding it.
pub fn stamp_document(
    doc: &mut Document,
    placements: &PlacementMap,
    scale_width: f64,
    signature: Result<&SignatureImage, &StampError>,
) -> StampReport {
    let mut stamper = Stamper {
        pages: doc.get_pages(),
        doc,
        signature,
        image_id: None,
        wrapped: HashSet::new(),
    };

    let mut report = StampReport::default();
    for raw in placements.entries() {
        match stamper.stamp_entry(raw, scale_width) {
            Ok(applied) => {
                debug!(
                    "Placed signature on page {} at {:?}",
                    applied.page_number, applied.rect
                );
                report.applied.push(applied);
            }
            Err(e) => {
                warn!("Skipping placement {:?}: {}", raw.key, e);
                report.skipped.push(SkippedPlacement {
                    key: raw.key.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        "Stamped {} placement(s), skipped {}",
        report.applied.len(),
        report.skipped.len()
    );
    report
}

struct Stamper<'a> {
    doc: &'a mut Document,
    pages: BTreeMap<u32, ObjectId>,
    signature: Result<&'a SignatureImage, &'a StampError>,
    /// Image XObject, embedded on first use and shared by every page
    image_id: Option<ObjectId>,
    /// Pages whose original content is already isolated in `q ... Q`
    wrapped: HashSet<ObjectId>,
}

impl Stamper<'_> {
    fn stamp_entry(
        &mut self,
        raw: &RawPlacement,
        scale_width: f64,
    ) -> Result<AppliedPlacement, StampError> {
        let entry = raw.resolve()?;

        let page_id = *self
            .pages
            .get(&entry.page_number)
            .ok_or(StampError::PageOutOfRange {
                page: entry.page_number,
                count: self.pages.len() as u32,
            })?;

        let signature = self
            .signature
            .map_err(|e| StampError::ImageError(e.to_string()))?;
        let ratio = signature.aspect_ratio()?;

        let geometry = PageGeometry::from_page(self.doc, page_id)?;
        let rect = placement_rect(
            geometry.width(),
            geometry.height(),
            entry.x,
            entry.y,
            scale_width,
            ratio,
        )?;

        let image_id = match self.image_id {
            Some(id) => id,
            None => {
                let id = embed_image(self.doc, signature)?;
                self.image_id = Some(id);
                id
            }
        };

        let name = register_xobject(self.doc, page_id, image_id)?;
        if !self.wrapped.contains(&page_id) {
            wrap_page_content(self.doc, page_id)?;
            self.wrapped.insert(page_id);
        }
        draw_image(self.doc, page_id, &name, geometry.image_matrix(&rect))?;

        Ok(AppliedPlacement {
            page_number: entry.page_number,
            rect,
        })
    }
}

/// Add the signature as an image XObject (plus soft mask) and return its id
fn embed_image(doc: &mut Document, signature: &SignatureImage) -> Result<ObjectId, StampError> {
    let (mut image, mask) = signature.to_streams()?;
    if let Some(mask) = mask {
        let mask_id = doc.add_object(mask);
        image.dict.set("SMask", Object::Reference(mask_id));
    }
    Ok(doc.add_object(image))
}

fn operation_error(e: lopdf::Error) -> StampError {
    StampError::InvalidPlacement(format!("PDF operation failed: {}", e))
}

/// Make the page's resources local and list the image under a free name.
///
/// Inherited or shared resource dictionaries are copied onto the page so
/// other pages never see the new entry.
fn register_xobject(
    doc: &mut Document,
    page_id: ObjectId,
    image_id: ObjectId,
) -> Result<Vec<u8>, StampError> {
    let mut resources = match inherited_attribute(doc, page_id, b"Resources") {
        Some(Object::Dictionary(dict)) => dict.clone(),
        Some(Object::Reference(id)) => doc.get_dictionary(*id).map_err(operation_error)?.clone(),
        Some(_) => {
            return Err(StampError::ParseError(
                "Page resources are not a dictionary".into(),
            ))
        }
        None => Dictionary::new(),
    };

    let mut xobjects = match resources.get(b"XObject") {
        Ok(Object::Dictionary(dict)) => dict.clone(),
        Ok(Object::Reference(id)) => doc.get_dictionary(*id).map_err(operation_error)?.clone(),
        _ => Dictionary::new(),
    };

    let existing = xobjects.iter().find_map(|(name, value)| match value {
        Object::Reference(id) if *id == image_id => Some(name.clone()),
        _ => None,
    });
    if let Some(name) = existing {
        return Ok(name);
    }

    let name = (0..)
        .map(|n| format!("{}{}", XOBJECT_PREFIX, n).into_bytes())
        .find(|candidate| !xobjects.has(candidate))
        .unwrap_or_else(|| XOBJECT_PREFIX.as_bytes().to_vec());

    xobjects.set(name.clone(), Object::Reference(image_id));
    resources.set("XObject", Object::Dictionary(xobjects));

    doc.get_dictionary_mut(page_id)
        .map_err(operation_error)?
        .set("Resources", Object::Dictionary(resources));

    Ok(name)
}

/// Current content streams of a page as a list of references
fn content_references(doc: &Document, page_id: ObjectId) -> Result<Vec<Object>, StampError> {
    let page = doc.get_dictionary(page_id).map_err(operation_error)?;
    match page.get(b"Contents") {
        Err(_) => Ok(Vec::new()),
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => Ok(items.clone()),
            _ => Ok(vec![Object::Reference(*id)]),
        },
        Ok(Object::Array(items)) => Ok(items.clone()),
        Ok(_) => Err(StampError::ParseError(
            "Page contents are neither a stream nor an array".into(),
        )),
    }
}

fn set_contents(doc: &mut Document, page_id: ObjectId, contents: Vec<Object>) -> Result<(), StampError> {
    doc.get_dictionary_mut(page_id)
        .map_err(operation_error)?
        .set("Contents", Object::Array(contents));
    Ok(())
}

fn add_content_stream(doc: &mut Document, operations: Vec<Operation>) -> Result<ObjectId, StampError> {
    let content = Content { operations };
    let bytes = content.encode().map_err(operation_error)?;
    Ok(doc.add_object(Stream::new(Dictionary::new(), bytes)))
}

/// Isolate the existing page content in its own graphics state so a
/// transformation left active by it cannot displace the overlay.
fn wrap_page_content(doc: &mut Document, page_id: ObjectId) -> Result<(), StampError> {
    let existing = content_references(doc, page_id)?;
    if existing.is_empty() {
        return Ok(());
    }

    let open_id = add_content_stream(doc, vec![Operation::new("q", vec![])])?;
    let close_id = add_content_stream(doc, vec![Operation::new("Q", vec![])])?;

    let mut contents = Vec::with_capacity(existing.len() + 2);
    contents.push(Object::Reference(open_id));
    contents.extend(existing);
    contents.push(Object::Reference(close_id));
    set_contents(doc, page_id, contents)
}

/// Append a content stream painting the image with the given matrix
fn draw_image(
    doc: &mut Document,
    page_id: ObjectId,
    name: &[u8],
    matrix: [f64; 6],
) -> Result<(), StampError> {
    let operations = vec![
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            matrix.iter().map(|v| Object::Real(*v as f32)).collect(),
        ),
        Operation::new("Do", vec![Object::Name(name.to_vec())]),
        Operation::new("Q", vec![]),
    ];
    let stream_id = add_content_stream(doc, operations)?;

    let mut contents = content_references(doc, page_id)?;
    contents.push(Object::Reference(stream_id));
    set_contents(doc, page_id, contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::PlacementEntry;
    use image::{DynamicImage, Rgba, RgbaImage};
    use lopdf::dictionary;
    use pretty_assertions::assert_eq;

    /// Build a document with `num_pages` US Letter pages, each with a text stream
    fn create_test_doc(num_pages: u32) -> Document {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();

        let mut page_ids = Vec::new();
        for i in 0..num_pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(12)]),
                    Operation::new("Td", vec![Object::Integer(100), Object::Integer(700)]),
                    Operation::new(
                        "Tj",
                        vec![Object::String(
                            format!("Page {}", i + 1).into_bytes(),
                            lopdf::StringFormat::Literal,
                        )],
                    ),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Contents" => content_id,
            });
            page_ids.push(page_id);
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => page_ids.iter().map(|id| Object::Reference(*id)).collect::<Vec<_>>(),
                "Count" => num_pages as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc
    }

    fn signature(width: u32, height: u32) -> SignatureImage {
        let img = RgbaImage::from_pixel(width, height, Rgba([0, 0, 128, 200]));
        SignatureImage::from_image(&DynamicImage::ImageRgba8(img))
    }

    fn map(entries: &[(u32, f64, f64)]) -> PlacementMap {
        PlacementMap::from_entries(entries.iter().map(|&(page_number, x, y)| PlacementEntry {
            page_number,
            x,
            y,
        }))
    }

    fn page_content(doc: &Document, page_number: u32) -> Vec<Operation> {
        let page_id = doc.get_pages()[&page_number];
        let bytes = doc.get_page_content(page_id).unwrap();
        Content::decode(&bytes).unwrap().operations
    }

    fn draws(doc: &Document, page_number: u32) -> Vec<Vec<f32>> {
        page_content(doc, page_number)
            .into_iter()
            .filter(|op| op.operator == "cm")
            .map(|op| {
                op.operands
                    .iter()
                    .map(|o| match o {
                        Object::Real(v) => *v,
                        Object::Integer(v) => *v as f32,
                        _ => f32::NAN,
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_reference_scenario_page_two() {
        let mut doc = create_test_doc(3);
        let sig = signature(200, 100);

        let report = stamp_document(&mut doc, &map(&[(2, 0.25, 0.75)]), 100.0, Ok(&sig));

        assert!(report.skipped.is_empty());
        assert_eq!(report.applied.len(), 1);
        let rect = report.applied[0].rect;
        assert_eq!(rect.width(), 100.0);
        assert_eq!(rect.height(), 50.0);
        assert_eq!(rect.center(), (0.25 * 612.0, 0.75 * 792.0));

        // Visual bottom-left (103, 619) is user space (103, 792 - 619)
        assert_eq!(draws(&doc, 2), vec![vec![100.0, 0.0, 0.0, 50.0, 103.0, 173.0]]);
        assert!(draws(&doc, 1).is_empty());
        assert!(draws(&doc, 3).is_empty());
        assert_eq!(doc.get_pages().len(), 3);
    }

    #[test]
    fn test_out_of_range_page_is_skipped() {
        let mut doc = create_test_doc(2);
        let sig = signature(100, 100);

        let report = stamp_document(
            &mut doc,
            &map(&[(1, 0.5, 0.5), (5, 0.5, 0.5)]),
            80.0,
            Ok(&sig),
        );

        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.applied[0].page_number, 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].key, "5");
        assert_eq!(draws(&doc, 1).len(), 1);
    }

    #[test]
    fn test_page_zero_is_skipped() {
        let mut doc = create_test_doc(2);
        let sig = signature(100, 100);

        let report = stamp_document(&mut doc, &map(&[(0, 0.5, 0.5)]), 80.0, Ok(&sig));
        assert!(report.applied.is_empty());
        assert!(draws(&doc, 2).is_empty());
    }

    #[test]
    fn test_only_marked_pages_change() {
        let mut doc = create_test_doc(3);
        let untouched_before = page_content(&doc, 2);
        let sig = signature(50, 20);

        let report = stamp_document(
            &mut doc,
            &map(&[(1, 0.1, 0.1), (3, 0.9, 0.9)]),
            80.0,
            Ok(&sig),
        );

        assert_eq!(report.applied.len(), 2);
        assert_eq!(draws(&doc, 1).len(), 1);
        assert_eq!(draws(&doc, 3).len(), 1);
        assert_eq!(page_content(&doc, 2), untouched_before);
    }

    #[test]
    fn test_unreadable_signature_skips_every_entry() {
        let mut doc = create_test_doc(2);
        let failure = StampError::ImageError("corrupt".into());

        let report = stamp_document(
            &mut doc,
            &map(&[(1, 0.5, 0.5), (2, 0.5, 0.5)]),
            80.0,
            Err(&failure),
        );

        assert!(report.applied.is_empty());
        assert_eq!(report.skipped.len(), 2);
        assert!(draws(&doc, 1).is_empty());
    }

    #[test]
    fn test_zero_size_signature_is_skipped() {
        let mut doc = create_test_doc(1);
        let sig = SignatureImage::from_image(&DynamicImage::ImageRgba8(RgbaImage::new(0, 0)));

        let report = stamp_document(&mut doc, &map(&[(1, 0.5, 0.5)]), 80.0, Ok(&sig));
        assert!(report.applied.is_empty());
        assert_eq!(report.skipped.len(), 1);
    }

    #[test]
    fn test_existing_content_is_wrapped_and_kept() {
        let mut doc = create_test_doc(1);
        let sig = signature(10, 10);

        stamp_document(&mut doc, &map(&[(1, 0.5, 0.5)]), 80.0, Ok(&sig));

        let ops: Vec<String> = page_content(&doc, 1)
            .into_iter()
            .map(|op| op.operator)
            .collect();
        assert_eq!(
            ops,
            vec!["q", "BT", "Tf", "Td", "Tj", "ET", "Q", "q", "cm", "Do", "Q"]
        );
    }

    #[test]
    fn test_image_embedded_once_with_soft_mask() {
        let mut doc = create_test_doc(3);
        let sig = signature(20, 10);

        stamp_document(
            &mut doc,
            &map(&[(1, 0.5, 0.5), (2, 0.5, 0.5), (3, 0.5, 0.5)]),
            80.0,
            Ok(&sig),
        );

        let images: Vec<&Stream> = doc
            .objects
            .values()
            .filter_map(|o| o.as_stream().ok())
            .filter(|s| s.dict.get(b"SMask").is_ok())
            .collect();
        assert_eq!(images.len(), 1);
    }

    #[test]
    fn test_inherited_resources_copied_to_page() {
        let mut doc = create_test_doc(2);
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let pages_id = doc
            .get_dictionary(doc.get_pages()[&1])
            .unwrap()
            .get(b"Parent")
            .unwrap()
            .as_reference()
            .unwrap();
        doc.get_dictionary_mut(pages_id).unwrap().set(
            "Resources",
            dictionary! { "Font" => dictionary! { "F1" => font_id } },
        );
        let sig = signature(10, 10);

        stamp_document(&mut doc, &map(&[(1, 0.5, 0.5)]), 80.0, Ok(&sig));

        let page1 = doc.get_dictionary(doc.get_pages()[&1]).unwrap();
        let resources = page1.get(b"Resources").unwrap().as_dict().unwrap();
        assert!(resources.get(b"Font").unwrap().as_dict().unwrap().has(b"F1"));
        assert!(resources.get(b"XObject").unwrap().as_dict().unwrap().has(b"SigImg0"));

        let page2 = doc.get_dictionary(doc.get_pages()[&2]).unwrap();
        assert!(page2.get(b"Resources").is_err());
    }

    #[test]
    fn test_free_xobject_name_chosen() {
        let mut doc = create_test_doc(1);
        let other = doc.add_object(Stream::new(Dictionary::new(), Vec::new()));
        let page_id = doc.get_pages()[&1];
        doc.get_dictionary_mut(page_id).unwrap().set(
            "Resources",
            dictionary! { "XObject" => dictionary! { "SigImg0" => other } },
        );
        let sig = signature(10, 10);

        stamp_document(&mut doc, &map(&[(1, 0.5, 0.5)]), 80.0, Ok(&sig));

        let page = doc.get_dictionary(page_id).unwrap();
        let xobjects = page
            .get(b"Resources")
            .unwrap()
            .as_dict()
            .unwrap()
            .get(b"XObject")
            .unwrap()
            .as_dict()
            .unwrap();
        assert!(xobjects.has(b"SigImg0"));
        assert!(xobjects.has(b"SigImg1"));
    }

    #[test]
    fn test_same_page_twice_accumulates() {
        let mut doc = create_test_doc(1);
        let sig = signature(10, 10);
        let placements = PlacementMap::from_json(
            r#"{"1": {"x": 0.2, "y": 0.2}, " 1": {"x": 0.8, "y": 0.8}}"#,
        )
        .unwrap();

        let report = stamp_document(&mut doc, &placements, 80.0, Ok(&sig));

        assert_eq!(report.applied.len(), 2);
        assert_eq!(draws(&doc, 1).len(), 2);
    }

    #[test]
    fn test_blank_page_without_contents() {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 200.into(), 200.into()],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        let sig = signature(10, 10);

        let report = stamp_document(&mut doc, &map(&[(1, 0.5, 0.5)]), 20.0, Ok(&sig));

        assert_eq!(report.applied.len(), 1);
        assert_eq!(draws(&doc, 1), vec![vec![20.0, 0.0, 0.0, 20.0, 90.0, 90.0]]);
    }

    #[test]
    fn test_failed_wrap_is_retried_on_next_entry() {
        let mut doc = create_test_doc(1);
        let page_id = doc.get_pages()[&1];
        doc.get_dictionary_mut(page_id)
            .unwrap()
            .set("Contents", Object::Integer(7));
        let sig = signature(10, 10);
        let placements = map(&[(1, 0.5, 0.5)]);
        let raw = &placements.entries()[0];

        let mut stamper = Stamper {
            pages: doc.get_pages(),
            doc: &mut doc,
            signature: Ok(&sig),
            image_id: None,
            wrapped: HashSet::new(),
        };

        assert!(stamper.stamp_entry(raw, 80.0).is_err());
        assert!(!stamper.wrapped.contains(&page_id));

        let content = Content {
            operations: vec![Operation::new("BT", vec![]), Operation::new("ET", vec![])],
        };
        let content_id = stamper
            .doc
            .add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));
        stamper
            .doc
            .get_dictionary_mut(page_id)
            .unwrap()
            .set("Contents", Object::Reference(content_id));

        assert!(stamper.stamp_entry(raw, 80.0).is_ok());
        assert!(stamper.wrapped.contains(&page_id));

        let ops: Vec<String> = page_content(&doc, 1)
            .into_iter()
            .map(|op| op.operator)
            .collect();
        assert_eq!(ops, vec!["q", "BT", "ET", "Q", "q", "cm", "Do", "Q"]);
    }
}
