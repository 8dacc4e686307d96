//! Page geometry and the mapping between visual page space and PDF user space
//!
//! Placements are expressed the way the page is shown in the preview
//! (top-left origin, y down, rotation applied). PDF content is drawn in user
//! space (bottom-left origin, y up, unrotated), so every rectangle goes
//! through [`PageGeometry::image_matrix`] before it reaches a content stream.

use crate::error::StampError;
use crate::placement::PlacementRect;
use lopdf::{Document, Object, ObjectId};

/// US Letter, used when a page declares no box at all
const DEFAULT_PAGE_BOX: [f64; 4] = [0.0, 0.0, 612.0, 792.0];

/// Guard against cyclic `Parent` chains in broken files
const MAX_TREE_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    /// Visible box in user space as `[x0, y0, x1, y1]` with `x0 < x1`, `y0 < y1`
    pub bbox: [f64; 4],
    /// Clockwise display rotation: 0, 90, 180 or 270
    pub rotation: u16,
}

impl PageGeometry {
    pub fn new(bbox: [f64; 4], rotation: i64) -> Self {
        let [a, b, c, d] = bbox;
        Self {
            bbox: [a.min(c), b.min(d), a.max(c), b.max(d)],
            rotation: normalize_rotation(rotation),
        }
    }

    /// Read the CropBox (or MediaBox) and Rotate entries of a page,
    /// following inheritance through the page tree.
    pub fn from_page(doc: &Document, page_id: ObjectId) -> Result<Self, StampError> {
        let bbox = match inherited_attribute(doc, page_id, b"CropBox")
            .or_else(|| inherited_attribute(doc, page_id, b"MediaBox"))
        {
            Some(obj) => parse_rect(doc, obj)?,
            None => DEFAULT_PAGE_BOX,
        };

        let rotation = inherited_attribute(doc, page_id, b"Rotate")
            .and_then(|obj| resolve(doc, obj).as_i64().ok())
            .unwrap_or(0);

        Ok(Self::new(bbox, rotation))
    }

    fn box_width(&self) -> f64 {
        self.bbox[2] - self.bbox[0]
    }

    fn box_height(&self) -> f64 {
        self.bbox[3] - self.bbox[1]
    }

    /// Width of the page as displayed
    pub fn width(&self) -> f64 {
        match self.rotation {
            90 | 270 => self.box_height(),
            _ => self.box_width(),
        }
    }

    /// Height of the page as displayed
    pub fn height(&self) -> f64 {
        match self.rotation {
            90 | 270 => self.box_width(),
            _ => self.box_height(),
        }
    }

    /// Map a point from visual page space to PDF user space
    pub fn to_user_space(&self, vx: f64, vy: f64) -> (f64, f64) {
        let [x0, y0, _, _] = self.bbox;
        let w = self.box_width();
        let h = self.box_height();

        match self.rotation {
            90 => (x0 + vy, y0 + vx),
            180 => (x0 + w - vx, y0 + vy),
            270 => (x0 + w - vy, y0 + h - vx),
            _ => (x0 + vx, y0 + h - vy),
        }
    }

    /// Transformation matrix `[a b c d e f]` that maps the unit square of an
    /// image XObject onto `rect`, upright as the page is displayed.
    pub fn image_matrix(&self, rect: &PlacementRect) -> [f64; 6] {
        // Image space origin is its bottom-left corner
        let (ox, oy) = self.to_user_space(rect.x0, rect.y1);
        let (rx, ry) = self.to_user_space(rect.x1, rect.y1);
        let (ux, uy) = self.to_user_space(rect.x0, rect.y0);

        [rx - ox, ry - oy, ux - ox, uy - oy, ox, oy]
    }
}

fn normalize_rotation(rotation: i64) -> u16 {
    match rotation.rem_euclid(360) {
        90 => 90,
        180 => 180,
        270 => 270,
        _ => 0,
    }
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

/// Look up a page attribute, walking up `Parent` links when it is inherited
pub(crate) fn inherited_attribute<'a>(
    doc: &'a Document,
    page_id: ObjectId,
    key: &[u8],
) -> Option<&'a Object> {
    let mut current = page_id;
    for _ in 0..MAX_TREE_DEPTH {
        let dict = doc.get_dictionary(current).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        current = dict.get(b"Parent").ok()?.as_reference().ok()?;
    }
    None
}

fn parse_rect(doc: &Document, obj: &Object) -> Result<[f64; 4], StampError> {
    let arr = resolve(doc, obj)
        .as_array()
        .map_err(|_| StampError::ParseError("Page box is not an array".into()))?;

    if arr.len() != 4 {
        return Err(StampError::ParseError(format!(
            "Page box has {} elements, expected 4",
            arr.len()
        )));
    }

    let mut values = [0.0f64; 4];
    for (i, item) in arr.iter().enumerate() {
        values[i] = match resolve(doc, item) {
            Object::Integer(v) => *v as f64,
            Object::Real(v) => *v as f64,
            _ => {
                return Err(StampError::ParseError(
                    "Expected number in page box".into(),
                ))
            }
        };
    }

    Ok(values)
}
