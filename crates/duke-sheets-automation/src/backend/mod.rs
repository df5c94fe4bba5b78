//! The automation contract and its two implementations.
//!
//! Every backend exposes the full capability set. Capabilities a backend
//! lacks return [`EngineError::UnsupportedOperation`] rather than being left
//! out, so callers always get an answer.
//!
//! Backends normalize their native failures (HRESULTs, AppleScript error
//! numbers) into [`EngineError`] before returning.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use duke_sheets_layout::{BoundingBox, ObjectKind};
use serde::{Deserialize, Serialize};

use crate::address::CellRef;
use crate::error::{EngineError, Result};
use crate::handle::{SheetHandle, WorkbookHandle};
use crate::model::{CellValue, ChartRequest, InsertMethod, PivotSpec, RangeDescriptor};
use crate::platform::Platform;
use crate::timeout::ThreadAffinity;

pub mod mac;
pub mod windows;

pub use self::mac::{MacBackend, Osascript, ScriptError, ScriptRunner};
pub use self::windows::WindowsBackend;

/// Which backend produced a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// COM automation of `Excel.Application`
    Windows,
    /// AppleScript automation of Microsoft Excel for Mac
    Mac,
}

impl BackendKind {
    pub fn platform(self) -> Platform {
        match self {
            BackendKind::Windows => Platform::Windows,
            BackendKind::Mac => Platform::MacOs,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Windows => f.write_str("windows-com"),
            BackendKind::Mac => f.write_str("mac-applescript"),
        }
    }
}

/// One automation surface.
///
/// Implementations must be callable from any thread: the timeout guard runs
/// calls on worker threads. Backends that need per-thread setup expose it
/// through [`Backend::thread_affinity`].
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn platform(&self) -> Platform {
        self.kind().platform()
    }

    /// Create a new, empty workbook
    fn create_workbook(&self) -> Result<WorkbookHandle>;

    /// Open a workbook file
    fn open(&self, path: &Path) -> Result<WorkbookHandle>;

    /// Close a workbook, optionally saving it first
    fn close(&self, workbook: &WorkbookHandle, save: bool) -> Result<()>;

    /// Save in place, or to `path` (format from its extension)
    fn save(&self, workbook: &WorkbookHandle, path: Option<&Path>) -> Result<()>;

    fn recalculate(&self, workbook: &WorkbookHandle) -> Result<()>;

    /// Worksheet names in tab order
    fn list_sheets(&self, workbook: &WorkbookHandle) -> Result<Vec<String>>;

    fn read_range(&self, sheet: &SheetHandle, address: &str) -> Result<RangeDescriptor>;

    /// Write a rectangular block; the matrix shape must match the address
    fn write_range(&self, sheet: &SheetHandle, address: &str, values: &[Vec<CellValue>])
        -> Result<()>;

    /// Write formulas (`=SUM(A1:A3)`) into a rectangular block
    fn write_formulas(&self, sheet: &SheetHandle, address: &str, formulas: &[Vec<String>])
        -> Result<()>;

    /// Insert a chart at `bounds`; returns the footprint the host applied
    fn add_chart(
        &self,
        sheet: &SheetHandle,
        request: &ChartRequest,
        bounds: &BoundingBox,
        method: InsertMethod,
    ) -> Result<BoundingBox>;

    /// Create a pivot table with its top-left corner at `destination` on
    /// `spec.destination_sheet`; returns the table's footprint
    fn add_pivot_table(
        &self,
        workbook: &WorkbookHandle,
        spec: &PivotSpec,
        destination: &CellRef,
    ) -> Result<BoundingBox>;

    /// Footprints of every chart, pivot table, shape and table on the sheet,
    /// in creation order
    fn list_objects(&self, sheet: &SheetHandle) -> Result<Vec<BoundingBox>>;

    /// Query the host for an object by name
    fn find_object(&self, sheet: &SheetHandle, name: &str) -> Result<Option<BoundingBox>> {
        Ok(self
            .list_objects(sheet)?
            .into_iter()
            .find(|b| b.id == name))
    }

    /// Remove an object. Charts and slicers are shapes; a pivot table is
    /// removed by clearing its range, a table through its list object.
    fn delete_object(&self, sheet: &SheetHandle, name: &str, kind: ObjectKind) -> Result<()>;

    /// Bind an existing chart to a pivot table so it becomes a pivot chart
    fn link_pivot_chart(&self, sheet: &SheetHandle, chart: &str, pivot: &str) -> Result<()>;

    /// Name of the pivot table a chart is bound to, if any
    fn pivot_chart_source(&self, sheet: &SheetHandle, chart: &str) -> Result<Option<String>>;

    /// Add a slicer for `field` of pivot table `pivot`, drawn at `bounds`
    fn add_slicer(
        &self,
        sheet: &SheetHandle,
        pivot: &str,
        field: &str,
        bounds: &BoundingBox,
    ) -> Result<BoundingBox>;

    /// Drop the backend's bookkeeping for a workbook handle.
    ///
    /// This does not close the workbook in the host application.
    fn release_workbook(&self, workbook: &WorkbookHandle) -> Result<()>;

    /// One forced reclamation pass over native references
    fn reclaim(&self) -> Result<()> {
        Ok(())
    }

    /// Per-thread setup, for backends whose native layer needs it
    fn thread_affinity(&self) -> Option<Arc<dyn ThreadAffinity>> {
        None
    }

    /// Called once when the session is torn down
    fn shutdown(&self) -> Result<()>;
}

/// Reject a value matrix whose shape does not match `address`.
///
/// A single-cell address is grown to the matrix shape.
pub(crate) fn fit_matrix<T>(address: &str, matrix: &[Vec<T>]) -> Result<crate::address::RangeRef> {
    let range = crate::address::RangeRef::parse(address)?;
    let rows = matrix.len();
    let cols = matrix.first().map_or(0, Vec::len);
    if rows == 0 || cols == 0 {
        return Err(EngineError::invalid(format!("nothing to write to {address}")));
    }
    if let Some(i) = matrix.iter().position(|r| r.len() != cols) {
        return Err(EngineError::invalid(format!(
            "row {i} has {} cells, expected {cols}",
            matrix[i].len()
        )));
    }
    if range.is_single_cell() {
        return range.resized(rows, cols);
    }
    if range.rows() != rows || range.cols() != cols {
        return Err(EngineError::invalid(format!(
            "{rows}x{cols} values do not fit {address} ({}x{})",
            range.rows(),
            range.cols()
        )));
    }
    Ok(range)
}
