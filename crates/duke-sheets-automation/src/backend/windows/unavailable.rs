//! Stand-in for the COM layer on hosts without COM.
//!
//! Every entry point reports [`ComError::Unavailable`]; `ExcelApp` cannot be
//! constructed, so its methods are unreachable.

use std::convert::Infallible;

use duke_sheets_layout::{BoundingBox, ObjectKind};

use crate::address::RangeRef;
use crate::config::WindowsConfig;
use crate::model::{CellValue, ChartRequest, InsertMethod, PivotSpec, SheetRef};

use super::ComError;

fn unavailable() -> ComError {
    ComError::Unavailable(format!(
        "COM automation needs a Windows host (running on {})",
        std::env::consts::OS
    ))
}

pub(super) fn attach() -> Result<(), ComError> {
    Err(unavailable())
}

pub(super) fn detach() -> bool {
    false
}

pub(super) fn disconnect() {}

pub(super) fn reclaim() {}

pub(super) fn quit(_config: &WindowsConfig) -> Result<(), ComError> {
    Ok(())
}

pub(super) fn with_app<T>(
    _config: &WindowsConfig,
    _f: impl FnOnce(&ExcelApp) -> Result<T, ComError>,
) -> Result<T, ComError> {
    Err(unavailable())
}

pub(crate) struct ExcelApp(Infallible);

#[allow(clippy::unused_self)]
impl ExcelApp {
    pub fn create_workbook(&self) -> Result<String, ComError> {
        match self.0 {}
    }

    pub fn open_workbook(&self, _path: &str) -> Result<String, ComError> {
        match self.0 {}
    }

    pub fn close_workbook(&self, _workbook: &str, _save: bool) -> Result<(), ComError> {
        match self.0 {}
    }

    pub fn save_workbook(&self, _workbook: &str, _path: Option<&str>) -> Result<(), ComError> {
        match self.0 {}
    }

    pub fn recalculate(&self) -> Result<(), ComError> {
        match self.0 {}
    }

    pub fn sheet_names(&self, _workbook: &str) -> Result<Vec<String>, ComError> {
        match self.0 {}
    }

    pub fn read_cells(
        &self,
        _workbook: &str,
        _sheet: &SheetRef,
        _range: &RangeRef,
    ) -> Result<(Vec<Vec<CellValue>>, Vec<Vec<String>>), ComError> {
        match self.0 {}
    }

    pub fn write_cells(
        &self,
        _workbook: &str,
        _sheet: &SheetRef,
        _range: &RangeRef,
        _values: &[Vec<CellValue>],
    ) -> Result<(), ComError> {
        match self.0 {}
    }

    pub fn write_formulas(
        &self,
        _workbook: &str,
        _sheet: &SheetRef,
        _range: &RangeRef,
        _formulas: &[Vec<String>],
    ) -> Result<(), ComError> {
        match self.0 {}
    }

    pub fn add_chart(
        &self,
        _workbook: &str,
        _sheet: &SheetRef,
        _request: &ChartRequest,
        _bounds: &BoundingBox,
        _method: InsertMethod,
    ) -> Result<BoundingBox, ComError> {
        match self.0 {}
    }

    pub fn objects(&self, _workbook: &str, _sheet: &SheetRef) -> Result<Vec<BoundingBox>, ComError> {
        match self.0 {}
    }

    pub fn delete_object(
        &self,
        _workbook: &str,
        _sheet: &SheetRef,
        _name: &str,
        _kind: ObjectKind,
    ) -> Result<(), ComError> {
        match self.0 {}
    }

    pub fn add_pivot_table(
        &self,
        _workbook: &str,
        _spec: &PivotSpec,
        _destination: &str,
    ) -> Result<BoundingBox, ComError> {
        match self.0 {}
    }

    pub fn link_pivot_chart(
        &self,
        _workbook: &str,
        _sheet: &SheetRef,
        _chart: &str,
        _pivot: &str,
    ) -> Result<(), ComError> {
        match self.0 {}
    }

    pub fn pivot_chart_source(
        &self,
        _workbook: &str,
        _sheet: &SheetRef,
        _chart: &str,
    ) -> Result<Option<String>, ComError> {
        match self.0 {}
    }

    pub fn add_slicer(
        &self,
        _workbook: &str,
        _sheet: &SheetRef,
        _pivot: &str,
        _field: &str,
        _bounds: &BoundingBox,
    ) -> Result<BoundingBox, ComError> {
        match self.0 {}
    }
}
