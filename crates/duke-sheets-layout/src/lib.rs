//! # duke-sheets-layout
//!
//! Placement geometry for objects inserted onto a worksheet.
//!
//! Charts, pivot tables, shapes and tables all occupy an axis-aligned
//! rectangle on their sheet. Before a new object is inserted, the caller
//! collects the rectangles already on the sheet and asks the solver for a
//! position where the new one fits without overlapping any of them.
//!
//! This crate does no I/O and has no platform dependency; units are whatever
//! the automation backend reports (points on both Excel backends).
//!
//! ## Example
//!
//! ```rust
//! use duke_sheets_layout::{find_position, Anchor, BoundingBox, ObjectKind, SheetExtents, Size};
//!
//! let existing = vec![BoundingBox::new("Chart 1", ObjectKind::Chart, 0.0, 0.0, 300.0, 200.0)];
//! let pos = find_position(
//!     &existing,
//!     Size::new(300.0, 200.0),
//!     Anchor::RightOfLast,
//!     10.0,
//!     SheetExtents::new(620.0, 1000.0),
//! )
//! .unwrap();
//! assert_eq!((pos.left, pos.top), (310.0, 0.0));
//! ```

mod error;
mod geometry;
mod solver;


pub use error::{PlacementError, Result};
pub use geometry::{overlaps, BoundingBox, ObjectKind, Position, SheetExtents, Size};
pub use solver::{
    find_position, Anchor, PlacementSolver, DEFAULT_EXTENTS, DEFAULT_SPACING, MAX_GRID_CANDIDATES,
};
