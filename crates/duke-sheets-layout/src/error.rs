//! Error types for duke-sheets-layout

use thiserror::Error;

use crate::geometry::{SheetExtents, Size};

/// Result type alias using [`PlacementError`]
pub type Result<T> = std::result::Result<T, PlacementError>;

/// Errors returned by the placement solver
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlacementError {
    /// Every candidate position inside the sheet extents overlaps an existing object
    #[error("no free space for a {requested} object within sheet extents {extents}")]
    NoSpaceFound {
        /// The size that could not be placed
        requested: Size,
        /// The searched area
        extents: SheetExtents,
    },

    /// A box at a caller-chosen position would overlap an existing object
    #[error("'{requested}' would overlap '{occupant}'")]
    Occupied {
        /// Id of the box that was checked
        requested: String,
        /// Id of the first existing box it overlaps
        occupant: String,
    },

    /// The request itself is malformed (non-positive size, spacing or extents)
    #[error("invalid placement request: {0}")]
    InvalidRequest(String),
}

impl PlacementError {
    /// Create an invalid-request error with a message
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        PlacementError::InvalidRequest(msg.into())
    }
}
