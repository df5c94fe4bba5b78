//! Candidate scan for a free position on a sheet.
//!
//! Candidates are generated in a fixed order:
//!
//! 1. the explicit point for [`Anchor::At`];
//! 2. immediately right of the most recently placed box;
//! 3. "below": the start of a new row under the row that holds the last box
//!    (left edge of that row, bottom of that row plus spacing);
//! 4. a row-major grid scan over the sheet extents, stepping by `spacing`.
//!
//! The first candidate that fits inside the extents and overlaps nothing wins.

use crate::error::{PlacementError, Result};
use crate::geometry::{BoundingBox, ObjectKind, Position, SheetExtents, Size};

/// Default gap between neighbouring objects, in points
pub const DEFAULT_SPACING: f64 = 10.0;

/// Default searchable area: one dashboard-width column strip
pub const DEFAULT_EXTENTS: SheetExtents = SheetExtents {
    width: 620.0,
    height: 10_000.0,
};

/// Upper bound on grid candidates; finer spacings are rejected
pub const MAX_GRID_CANDIDATES: u64 = 4_000_000;

/// Where the scan starts
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Anchor {
    /// Right of the last object, then below its row, then grid
    #[default]
    RightOfLast,
    /// Directly below the last object, then right of it, then grid
    BelowLast,
    /// This exact point first, then as [`Anchor::RightOfLast`]
    At(Position),
    /// Grid scan only
    Grid,
}

/// Find a top-left position for a box of `requested` size that overlaps none
/// of `existing`.
///
/// `existing` is expected in placement order; its last element is treated as
/// the most recently placed object.
pub fn find_position(
    existing: &[BoundingBox],
    requested: Size,
    anchor: Anchor,
    spacing: f64,
    extents: SheetExtents,
) -> Result<Position> {
    validate(requested, spacing, extents)?;

    let fits = |p: Position| {
        extents.contains(p, requested) && !existing.iter().any(|b| b.overlaps_rect(p, requested))
    };

    if let Some(p) = preferred_candidates(existing, anchor, spacing)
        .into_iter()
        .find(|p| fits(*p))
    {
        return Ok(p);
    }

    let cols = steps(extents.width - requested.width, spacing);
    let rows = steps(extents.height - requested.height, spacing);
    if cols.saturating_mul(rows) > MAX_GRID_CANDIDATES {
        return Err(PlacementError::invalid(format!(
            "spacing {spacing} is too fine for extents {extents}"
        )));
    }

    for row in 0..rows {
        let top = row as f64 * spacing;
        for col in 0..cols {
            let candidate = Position::new(col as f64 * spacing, top);
            if fits(candidate) {
                return Ok(candidate);
            }
        }
    }

    Err(PlacementError::NoSpaceFound { requested, extents })
}

fn validate(requested: Size, spacing: f64, extents: SheetExtents) -> Result<()> {
    if !requested.is_positive() {
        return Err(PlacementError::invalid(format!(
            "requested size {requested} must be positive"
        )));
    }
    if !(spacing.is_finite() && spacing > 0.0) {
        return Err(PlacementError::invalid(format!(
            "spacing {spacing} must be positive"
        )));
    }
    if !Size::new(extents.width, extents.height).is_positive() {
        return Err(PlacementError::invalid(format!(
            "sheet extents {extents} must be positive"
        )));
    }
    Ok(())
}

/// Number of grid positions along one axis with `room` of free travel.
fn steps(room: f64, spacing: f64) -> u64 {
    if room < 0.0 {
        0
    } else {
        (room / spacing + 1e-9).floor() as u64 + 1
    }
}

fn preferred_candidates(existing: &[BoundingBox], anchor: Anchor, spacing: f64) -> Vec<Position> {
    let mut out = Vec::with_capacity(3);
    if let Anchor::At(p) = anchor {
        out.push(p);
    }
    let Some(last) = existing.last() else {
        return out;
    };
    match anchor {
        Anchor::RightOfLast | Anchor::At(_) => {
            out.push(right_of(last, spacing));
            out.push(below_row(existing, last, spacing));
        }
        Anchor::BelowLast => {
            out.push(Position::new(last.left, last.bottom() + spacing));
            out.push(right_of(last, spacing));
        }
        Anchor::Grid => {}
    }
    out
}

fn right_of(last: &BoundingBox, spacing: f64) -> Position {
    Position::new(last.right() + spacing, last.top)
}

/// Start of a new row beneath every box sharing a horizontal band with `last`.
fn below_row(existing: &[BoundingBox], last: &BoundingBox, spacing: f64) -> Position {
    let row = existing
        .iter()
        .filter(|b| b.top < last.bottom() && b.bottom() > last.top);
    let (left, bottom) = row.fold((last.left, last.bottom()), |(l, btm), b| {
        (l.min(b.left), btm.max(b.bottom()))
    });
    Position::new(left, bottom + spacing)
}

/// Stateful solver that remembers every box it has accepted on one sheet.
///
/// Seed it with the objects already present (from the backend's object list),
/// then call [`PlacementSolver::place`] for each new object; accepted boxes are
/// pairwise disjoint.
#[derive(Debug, Clone)]
pub struct PlacementSolver {
    placed: Vec<BoundingBox>,
    spacing: f64,
    extents: SheetExtents,
}

impl Default for PlacementSolver {
    fn default() -> Self {
        Self::new(Vec::new(), DEFAULT_SPACING, DEFAULT_EXTENTS)
    }
}

impl PlacementSolver {
    /// Create a solver seeded with existing boxes
    pub fn new(existing: Vec<BoundingBox>, spacing: f64, extents: SheetExtents) -> Self {
        Self {
            placed: existing,
            spacing,
            extents,
        }
    }

    /// Every box known to the solver, in placement order
    pub fn placed(&self) -> &[BoundingBox] {
        &self.placed
    }

    /// Find a position without recording it
    pub fn find(&self, requested: Size, anchor: Anchor) -> Result<Position> {
        find_position(&self.placed, requested, anchor, self.spacing, self.extents)
    }

    /// Fail with [`PlacementError::Occupied`] if `candidate` overlaps a known box.
    ///
    /// The position is taken as given: neither spacing nor extents apply.
    pub fn check(&self, candidate: &BoundingBox) -> Result<()> {
        match self.placed.iter().find(|existing| existing.overlaps(candidate)) {
            Some(occupant) => Err(PlacementError::Occupied {
                requested: candidate.id.clone(),
                occupant: occupant.id.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Find a position and record the accepted box
    pub fn place(
        &mut self,
        id: impl Into<String>,
        kind: ObjectKind,
        requested: Size,
        anchor: Anchor,
    ) -> Result<BoundingBox> {
        let position = self.find(requested, anchor)?;
        let accepted = BoundingBox::at(id, kind, position, requested);
        self.placed.push(accepted.clone());
        Ok(accepted)
    }
}
