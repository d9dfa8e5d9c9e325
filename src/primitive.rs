//! Primitive — one drawable entity on a board.
//!
//! DESIGN
//! ======
//! A `Primitive` is identity (`id`, `createdBy`) plus a `Shape`, an
//! internally tagged enum keyed on `type`. The JSON form is flat:
//! `{ "id", "type", "createdBy", ...shape fields }`.
//!
//! Partial updates are typed: each shape kind has a patch struct whose fields
//! are all optional. A field present in the change set overwrites; an absent
//! field is left untouched. Optional shape fields (`fill`, `rotation`) use a
//! double option so an explicit `null` clears them.
//!
//! Identity fields (`id`, `type`, `createdBy`) are never patched; they are
//! ignored if a change set carries them.

use serde::{Deserialize, Deserializer, Serialize};

/// Caller-supplied primitive identifier.
pub type PrimitiveId = String;

// =============================================================================
// PRIMITIVE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Primitive {
    pub id: PrimitiveId,
    pub created_by: String,
    #[serde(flatten)]
    pub shape: Shape,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Shape {
    Pen(Stroke),
    Eraser(Stroke),
    Line(Segment),
    Rect(Rect),
    Ellipse(Ellipse),
    Arrow(Segment),
    Text(Text),
    Image(Image),
}

impl Shape {
    /// Wire name of the shape kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Shape::Pen(_) => "pen",
            Shape::Eraser(_) => "eraser",
            Shape::Line(_) => "line",
            Shape::Rect(_) => "rect",
            Shape::Ellipse(_) => "ellipse",
            Shape::Arrow(_) => "arrow",
            Shape::Text(_) => "text",
            Shape::Image(_) => "image",
        }
    }
}

/// Freehand pen or eraser stroke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub points: Vec<Point>,
    pub color: String,
    pub width: f64,
}

/// Straight line or arrow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: Point,
    pub end: Point,
    pub color: String,
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub stroke: String,
    pub stroke_width: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ellipse {
    pub cx: f64,
    pub cy: f64,
    pub rx: f64,
    pub ry: f64,
    pub stroke: String,
    pub stroke_width: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Text {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub text: String,
    pub font_size: f64,
    pub font_family: String,
    pub color: String,
    pub align: TextAlign,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
}

/// Placed image. `src` is the opaque URL returned by the upload endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
}

// =============================================================================
// PATCHES
// =============================================================================

/// Deserialize a present field (including `null`) as `Some(..)`, so an absent
/// field stays `None` through `#[serde(default)]`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrokePatch {
    pub points: Option<Vec<Point>>,
    pub color: Option<String>,
    pub width: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SegmentPatch {
    pub start: Option<Point>,
    pub end: Option<Point>,
    pub color: Option<String>,
    pub width: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RectPatch {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub stroke: Option<String>,
    pub stroke_width: Option<f64>,
    #[serde(default, deserialize_with = "present")]
    pub fill: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub rotation: Option<Option<f64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct EllipsePatch {
    pub cx: Option<f64>,
    pub cy: Option<f64>,
    pub rx: Option<f64>,
    pub ry: Option<f64>,
    pub stroke: Option<String>,
    pub stroke_width: Option<f64>,
    #[serde(default, deserialize_with = "present")]
    pub fill: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub rotation: Option<Option<f64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct TextPatch {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub text: Option<String>,
    pub font_size: Option<f64>,
    pub font_family: Option<String>,
    pub color: Option<String>,
    pub align: Option<TextAlign>,
    #[serde(default, deserialize_with = "present")]
    pub rotation: Option<Option<f64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImagePatch {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub src: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub rotation: Option<Option<f64>>,
}

/// A change set typed against the kind of the primitive it targets.
#[derive(Debug, Clone)]
pub enum ShapePatch {
    Stroke(StrokePatch),
    Segment(SegmentPatch),
    Rect(RectPatch),
    Ellipse(EllipsePatch),
    Text(TextPatch),
    Image(ImagePatch),
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

impl Shape {
    /// Interpret an untyped change set against this shape's kind.
    ///
    /// # Errors
    ///
    /// Returns a serde error if the change set is not an object, is empty,
    /// tries to change `type`, or carries an unknown or wrongly typed field.
    /// `id` and `createdBy` are identity fields and are dropped.
    pub fn parse_patch(&self, mut changes: serde_json::Value) -> Result<ShapePatch, serde_json::Error> {
        use serde::de::Error as _;

        let Some(fields) = changes.as_object_mut() else {
            return Err(serde_json::Error::custom("changes must be an object"));
        };
        if fields.contains_key("type") {
            return Err(serde_json::Error::custom("primitive type cannot be changed"));
        }
        fields.remove("id");
        fields.remove("createdBy");
        if fields.is_empty() {
            return Err(serde_json::Error::custom("empty change set"));
        }

        Ok(match self {
            Shape::Pen(_) | Shape::Eraser(_) => ShapePatch::Stroke(serde_json::from_value(changes)?),
            Shape::Line(_) | Shape::Arrow(_) => ShapePatch::Segment(serde_json::from_value(changes)?),
            Shape::Rect(_) => ShapePatch::Rect(serde_json::from_value(changes)?),
            Shape::Ellipse(_) => ShapePatch::Ellipse(serde_json::from_value(changes)?),
            Shape::Text(_) => ShapePatch::Text(serde_json::from_value(changes)?),
            Shape::Image(_) => ShapePatch::Image(serde_json::from_value(changes)?),
        })
    }

    /// Shallow-merge a patch into this shape. Returns `false` if the patch
    /// kind does not match the shape kind, in which case nothing changes.
    pub fn apply(&mut self, patch: ShapePatch) -> bool {
        match (self, patch) {
            (Shape::Pen(s) | Shape::Eraser(s), ShapePatch::Stroke(p)) => {
                set(&mut s.points, p.points);
                set(&mut s.color, p.color);
                set(&mut s.width, p.width);
            }
            (Shape::Line(s) | Shape::Arrow(s), ShapePatch::Segment(p)) => {
                set(&mut s.start, p.start);
                set(&mut s.end, p.end);
                set(&mut s.color, p.color);
                set(&mut s.width, p.width);
            }
            (Shape::Rect(s), ShapePatch::Rect(p)) => {
                set(&mut s.x, p.x);
                set(&mut s.y, p.y);
                set(&mut s.width, p.width);
                set(&mut s.height, p.height);
                set(&mut s.stroke, p.stroke);
                set(&mut s.stroke_width, p.stroke_width);
                set(&mut s.fill, p.fill);
                set(&mut s.rotation, p.rotation);
            }
            (Shape::Ellipse(s), ShapePatch::Ellipse(p)) => {
                set(&mut s.cx, p.cx);
                set(&mut s.cy, p.cy);
                set(&mut s.rx, p.rx);
                set(&mut s.ry, p.ry);
                set(&mut s.stroke, p.stroke);
                set(&mut s.stroke_width, p.stroke_width);
                set(&mut s.fill, p.fill);
                set(&mut s.rotation, p.rotation);
            }
            (Shape::Text(s), ShapePatch::Text(p)) => {
                set(&mut s.x, p.x);
                set(&mut s.y, p.y);
                set(&mut s.width, p.width);
                set(&mut s.height, p.height);
                set(&mut s.text, p.text);
                set(&mut s.font_size, p.font_size);
                set(&mut s.font_family, p.font_family);
                set(&mut s.color, p.color);
                set(&mut s.align, p.align);
                set(&mut s.rotation, p.rotation);
            }
            (Shape::Image(s), ShapePatch::Image(p)) => {
                set(&mut s.x, p.x);
                set(&mut s.y, p.y);
                set(&mut s.width, p.width);
                set(&mut s.height, p.height);
                set(&mut s.src, p.src);
                set(&mut s.rotation, p.rotation);
            }
            _ => return false,
        }
        true
    }

    /// Full field set of this shape as a JSON object, without `type`.
    /// Used as the `changes` payload when undo/redo overwrites a record.
    #[must_use]
    pub fn fields(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(map) = value.as_object_mut() {
            map.remove("type");
        }
        value
    }
}

#[cfg(test)]
#[path = "primitive_test.rs"]
mod tests;
