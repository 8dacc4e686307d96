//! Signature placements
//!
//! A placement map arrives from the editor as a JSON object keyed by page
//! number, each value holding the click position as fractions of the page
//! width and height (`{"2": {"x": 0.25, "y": 0.75}}`). Entries are resolved
//! one at a time so a single malformed entry never invalidates the others.

use crate::error::StampError;
use serde::Serialize;
use serde_json::{Map, Value};

/// Signature width in points when the caller does not pick one
pub const DEFAULT_SCALE: f64 = 80.0;

/// One page marked by the user
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct PlacementEntry {
    /// 1-based page number
    pub page_number: u32,
    /// Horizontal click position as a fraction of the page width
    pub x: f64,
    /// Vertical click position as a fraction of the page height, from the top
    pub y: f64,
}

/// Rectangle in visual page space: origin at the top-left corner of the
/// page as displayed, y growing downwards, units in points.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct PlacementRect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl PlacementRect {
    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }
}

/// Compute the rectangle a signature occupies on a page.
///
/// The click position is scaled to the page size and becomes the centre of
/// a box `scale_width` points wide whose height follows the image aspect
/// ratio (`height / width`). Positions outside `[0, 1]` are allowed and
/// simply land off the visible page.
pub fn placement_rect(
    page_width: f64,
    page_height: f64,
    x: f64,
    y: f64,
    scale_width: f64,
    ratio: f64,
) -> Result<PlacementRect, StampError> {
    if !scale_width.is_finite() || scale_width <= 0.0 {
        return Err(StampError::InvalidPlacement(format!(
            "Signature width must be positive, got {}",
            scale_width
        )));
    }
    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(StampError::InvalidPlacement(format!(
            "Invalid image aspect ratio {}",
            ratio
        )));
    }

    let center_x = x * page_width;
    let center_y = y * page_height;
    let width = scale_width;
    let height = scale_width * ratio;

    let rect = PlacementRect {
        x0: center_x - width / 2.0,
        y0: center_y - height / 2.0,
        x1: center_x + width / 2.0,
        y1: center_y + height / 2.0,
    };

    if [rect.x0, rect.y0, rect.x1, rect.y1]
        .iter()
        .any(|v| !v.is_finite())
    {
        return Err(StampError::InvalidPlacement(
            "Placement coordinates are not finite".into(),
        ));
    }

    Ok(rect)
}

/// A placement as received, before its page key and coordinates are checked
#[derive(Debug, Clone, PartialEq)]
pub struct RawPlacement {
    pub key: String,
    pub value: Value,
}

impl RawPlacement {
    /// Validate the page key and coordinates of this entry
    pub fn resolve(&self) -> Result<PlacementEntry, StampError> {
        let page_number: u32 = self.key.trim().parse().map_err(|_| {
            StampError::InvalidPlacement(format!("Invalid page number: {:?}", self.key))
        })?;

        let coords = self.value.as_object().ok_or_else(|| {
            StampError::InvalidPlacement(format!("Page {}: expected an object with x and y", page_number))
        })?;

        let x = coordinate(coords, "x", page_number)?;
        let y = coordinate(coords, "y", page_number)?;

        Ok(PlacementEntry { page_number, x, y })
    }
}

/// Accepts JSON numbers and numeric strings
fn coordinate(coords: &Map<String, Value>, axis: &str, page: u32) -> Result<f64, StampError> {
    let value = coords.get(axis).ok_or_else(|| {
        StampError::InvalidPlacement(format!("Page {}: missing {} coordinate", page, axis))
    })?;

    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(StampError::InvalidPlacement(format!(
            "Page {}: invalid {} coordinate {}",
            page, axis, value
        ))),
    }
}

/// Every placement requested for one signing operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlacementMap {
    entries: Vec<RawPlacement>,
}

impl PlacementMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the editor's JSON object.
    ///
    /// Only the overall shape is checked here. A duplicated key keeps the
    /// last value.
    pub fn from_json(input: &str) -> Result<Self, StampError> {
        let value: Value = serde_json::from_str(input).map_err(|e| {
            StampError::InvalidPlacement(format!("Placement map is not valid JSON: {}", e))
        })?;

        match value {
            Value::Object(map) => Ok(Self {
                entries: map
                    .into_iter()
                    .map(|(key, value)| RawPlacement { key, value })
                    .collect(),
            }),
            other => Err(StampError::InvalidPlacement(format!(
                "Placement map must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Build a map from already validated entries
    #[cfg(test)]
    pub(crate) fn from_entries(entries: impl IntoIterator<Item = PlacementEntry>) -> Self {
        let mut map = Self::new();
        for entry in entries {
            map.insert(entry);
        }
        map
    }

    /// Add or replace the placement for a page
    #[cfg(test)]
    pub(crate) fn insert(&mut self, entry: PlacementEntry) {
        let key = entry.page_number.to_string();
        let value = serde_json::json!({ "x": entry.x, "y": entry.y });
        if let Some(existing) = self.entries.iter_mut().find(|p| p.key == key) {
            existing.value = value;
        } else {
            self.entries.push(RawPlacement { key, value });
        }
    }

    pub fn entries(&self) -> &[RawPlacement] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
