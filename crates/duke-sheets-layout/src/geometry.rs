//! Rectangles, sizes and the overlap predicate

use std::fmt;

/// What kind of object occupies a bounding box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ObjectKind {
    /// Embedded chart
    Chart,
    /// Pivot table (footprint of its table range)
    Pivot,
    /// Any other drawing-layer shape (text boxes, pictures, slicers)
    Shape,
    /// Structured table / list object
    Table,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Chart => "chart",
            ObjectKind::Pivot => "pivot",
            ObjectKind::Shape => "shape",
            ObjectKind::Table => "table",
        };
        f.write_str(name)
    }
}

/// Top-left corner of a box
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Position {
    /// Distance from the left edge of the sheet
    pub left: f64,
    /// Distance from the top edge of the sheet
    pub top: f64,
}

impl Position {
    /// Create a new position
    pub fn new(left: f64, top: f64) -> Self {
        Self { left, top }
    }
}

/// Width and height of a box
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Size {
    /// Horizontal extent
    pub width: f64,
    /// Vertical extent
    pub height: f64,
}

impl Size {
    /// Create a new size
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Both dimensions are finite and strictly positive
    pub fn is_positive(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// The searchable area of a sheet, anchored at (0, 0)
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SheetExtents {
    /// Maximum right edge
    pub width: f64,
    /// Maximum bottom edge
    pub height: f64,
}

impl SheetExtents {
    /// Create new extents
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Whether a box of `size` at `position` lies completely inside the extents
    pub fn contains(&self, position: Position, size: Size) -> bool {
        position.left >= 0.0
            && position.top >= 0.0
            && position.left + size.width <= self.width
            && position.top + size.height <= self.height
    }
}

impl fmt::Display for SheetExtents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Footprint of a visual object on a sheet
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoundingBox {
    /// Native object name or id
    pub id: String,
    /// Object type tag
    pub kind: ObjectKind,
    /// Left edge
    pub left: f64,
    /// Top edge
    pub top: f64,
    /// Width
    pub width: f64,
    /// Height
    pub height: f64,
}

impl BoundingBox {
    /// Create a bounding box from its edges
    pub fn new(
        id: impl Into<String>,
        kind: ObjectKind,
        left: f64,
        top: f64,
        width: f64,
        height: f64,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            left,
            top,
            width,
            height,
        }
    }

    /// Create a bounding box from a position and a size
    pub fn at(id: impl Into<String>, kind: ObjectKind, position: Position, size: Size) -> Self {
        Self::new(id, kind, position.left, position.top, size.width, size.height)
    }

    /// Right edge
    #[inline]
    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    /// Bottom edge
    #[inline]
    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    /// Top-left corner
    pub fn position(&self) -> Position {
        Position::new(self.left, self.top)
    }

    /// Width and height
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Whether this box overlaps `other` (edge contact does not count)
    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        overlaps(self, other)
    }

    /// Whether a box of `size` placed at `position` would overlap this one
    pub(crate) fn overlaps_rect(&self, position: Position, size: Size) -> bool {
        intervals_overlap(position.left, position.left + size.width, self.left, self.right())
            && intervals_overlap(position.top, position.top + size.height, self.top, self.bottom())
    }
}

/// Axis-aligned overlap test.
///
/// Boxes that merely share an edge (`a.right() == b.left`) do not overlap.
pub fn overlaps(a: &BoundingBox, b: &BoundingBox) -> bool {
    intervals_overlap(a.left, a.right(), b.left, b.right())
        && intervals_overlap(a.top, a.bottom(), b.top, b.bottom())
}

#[inline]
fn intervals_overlap(a_start: f64, a_end: f64, b_start: f64, b_end: f64) -> bool {
    a_start < b_end && a_end > b_start
}
