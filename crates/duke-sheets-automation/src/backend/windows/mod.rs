//! Windows backend: `Excel.Application` over COM `IDispatch`.
//!
//! COM state lives per thread. Each thread that calls into this backend gets
//! its own single-threaded apartment and its own proxy to Excel, created on
//! first use. Proxies after the first are unmarshalled from the global
//! interface table, so every thread drives the same Excel instance. The
//! timeout guard enters and leaves that apartment on its worker threads
//! through [`Backend::thread_affinity`].
//!
//! On other hosts the COM layer is replaced by a stub and every call reports
//! [`EngineError::AutomationUnavailable`].

#[cfg(windows)]
mod dispatch;
#[cfg(windows)]
mod excel;
#[cfg(not(windows))]
#[path = "unavailable.rs"]
mod excel;

use std::path::Path;
use std::sync::Arc;

use duke_sheets_layout::{BoundingBox, ObjectKind};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::address::{CellRef, RangeRef};
use crate::backend::{fit_matrix, Backend, BackendKind};
use crate::config::WindowsConfig;
use crate::error::{EngineError, Result};
use crate::handle::{HandleId, HandleTable, SheetHandle, WorkbookHandle};
use crate::model::{CellValue, ChartRequest, InsertMethod, PivotSpec, RangeDescriptor};
use crate::operation as op;
use crate::platform::Platform;
use crate::timeout::ThreadAffinity;

use excel::ExcelApp;

/// A failed COM interaction, before it is mapped onto [`EngineError`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) enum ComError {
    /// COM, the Excel server or the connection to it is not there
    #[error("{0}")]
    Unavailable(String),

    /// `Workbooks.Item(name)` found nothing
    #[error("workbook '{0}' is not open")]
    WorkbookClosed(String),

    #[error("{member}: {message}")]
    Call { member: String, message: String },
}

/// Map a COM failure onto the engine's error kinds
fn normalize(operation: &str, workbook: Option<HandleId>, err: ComError) -> EngineError {
    match (err, workbook) {
        (ComError::Unavailable(reason), _) => EngineError::AutomationUnavailable {
            platform: Platform::Windows,
            reason,
        },
        (ComError::WorkbookClosed(_), Some(handle)) => EngineError::HandleInvalidated {
            operation: operation.to_string(),
            handle,
        },
        (err, _) => EngineError::failed(operation, err.to_string()),
    }
}

/// Enters and leaves the calling thread's COM apartment
struct ComApartment;

impl ThreadAffinity for ComApartment {
    fn attach(&self) -> Result<()> {
        excel::attach().map_err(|e| normalize("attach", None, e))
    }

    fn detach(&self) -> bool {
        excel::detach()
    }
}

pub struct WindowsBackend {
    config: WindowsConfig,
    workbooks: HandleTable<WorkbookHandle>,
    apartment: Arc<dyn ThreadAffinity>,
}

impl WindowsBackend {
    /// Nothing is contacted until the first operation
    pub fn new(config: &WindowsConfig) -> Self {
        Self {
            config: config.clone(),
            workbooks: HandleTable::new(),
            apartment: Arc::new(ComApartment),
        }
    }

    fn call<T>(
        &self,
        operation: &str,
        workbook: Option<HandleId>,
        f: impl FnOnce(&ExcelApp) -> std::result::Result<T, ComError>,
    ) -> Result<T> {
        debug!(operation, "COM call");
        excel::with_app(&self.config, f).map_err(|e| normalize(operation, workbook, e))
    }

    fn register(&self, name: String, path: Option<&Path>) -> WorkbookHandle {
        self.workbooks.insert_with(|id| {
            WorkbookHandle::new(id, name, path.map(Path::to_path_buf), BackendKind::Windows)
        })
    }
}

impl Backend for WindowsBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Windows
    }

    fn create_workbook(&self) -> Result<WorkbookHandle> {
        let name = self.call(op::CREATE_WORKBOOK, None, |app| app.create_workbook())?;
        let workbook = self.register(name, None);
        info!(workbook = %workbook, "created workbook");
        Ok(workbook)
    }

    fn open(&self, path: &Path) -> Result<WorkbookHandle> {
        let full = path.to_string_lossy();
        let name = self.call(op::OPEN, None, |app| app.open_workbook(&full))?;
        let workbook = self.register(name, Some(path));
        info!(workbook = %workbook, path = %path.display(), "opened workbook");
        Ok(workbook)
    }

    fn close(&self, workbook: &WorkbookHandle, save: bool) -> Result<()> {
        workbook.ensure_live(op::CLOSE)?;
        self.call(op::CLOSE, Some(workbook.id()), |app| {
            app.close_workbook(workbook.name(), save)
        })?;
        self.workbooks.remove(workbook.id());
        Ok(())
    }

    fn save(&self, workbook: &WorkbookHandle, path: Option<&Path>) -> Result<()> {
        workbook.ensure_live(op::SAVE)?;
        let target = path.map(|p| p.to_string_lossy().into_owned());
        self.call(op::SAVE, Some(workbook.id()), |app| {
            app.save_workbook(workbook.name(), target.as_deref())
        })?;
        workbook.mark_saved(true);
        Ok(())
    }

    fn recalculate(&self, workbook: &WorkbookHandle) -> Result<()> {
        workbook.ensure_live(op::RECALCULATE)?;
        self.call(op::RECALCULATE, Some(workbook.id()), |app| app.recalculate())
    }

    fn list_sheets(&self, workbook: &WorkbookHandle) -> Result<Vec<String>> {
        workbook.ensure_live(op::LIST_SHEETS)?;
        self.call(op::LIST_SHEETS, Some(workbook.id()), |app| {
            app.sheet_names(workbook.name())
        })
    }

    fn read_range(&self, sheet: &SheetHandle, address: &str) -> Result<RangeDescriptor> {
        let range = RangeRef::parse(address)?;
        let workbook = sheet.workbook(op::READ_RANGE)?;
        let (values, formulas) = self.call(op::READ_RANGE, Some(workbook.id()), |app| {
            app.read_cells(workbook.name(), sheet.sheet(), &range)
        })?;
        Ok(RangeDescriptor::new(range.to_a1(), values).with_formulas(formulas))
    }

    fn write_range(
        &self,
        sheet: &SheetHandle,
        address: &str,
        values: &[Vec<CellValue>],
    ) -> Result<()> {
        let range = fit_matrix(address, values)?;
        let workbook = sheet.workbook(op::WRITE_RANGE)?;
        self.call(op::WRITE_RANGE, Some(workbook.id()), |app| {
            app.write_cells(workbook.name(), sheet.sheet(), &range, values)
        })?;
        workbook.mark_saved(false);
        Ok(())
    }

    fn write_formulas(
        &self,
        sheet: &SheetHandle,
        address: &str,
        formulas: &[Vec<String>],
    ) -> Result<()> {
        let range = fit_matrix(address, formulas)?;
        let workbook = sheet.workbook(op::WRITE_FORMULAS)?;
        self.call(op::WRITE_FORMULAS, Some(workbook.id()), |app| {
            app.write_formulas(workbook.name(), sheet.sheet(), &range, formulas)
        })?;
        workbook.mark_saved(false);
        Ok(())
    }

    fn add_chart(
        &self,
        sheet: &SheetHandle,
        request: &ChartRequest,
        bounds: &BoundingBox,
        method: InsertMethod,
    ) -> Result<BoundingBox> {
        RangeRef::parse(&request.data_range)?;
        let workbook = sheet.workbook(op::ADD_CHART)?;
        let applied = self.call(op::ADD_CHART, Some(workbook.id()), |app| {
            app.add_chart(workbook.name(), sheet.sheet(), request, bounds, method)
        })?;
        workbook.mark_saved(false);
        Ok(applied)
    }

    fn add_pivot_table(
        &self,
        workbook: &WorkbookHandle,
        spec: &PivotSpec,
        destination: &CellRef,
    ) -> Result<BoundingBox> {
        workbook.ensure_live(op::ADD_PIVOT_TABLE)?;
        spec.validate()?;
        let destination = destination.to_a1();
        let applied = self.call(op::ADD_PIVOT_TABLE, Some(workbook.id()), |app| {
            app.add_pivot_table(workbook.name(), spec, &destination)
        })?;
        workbook.mark_saved(false);
        Ok(applied)
    }

    fn list_objects(&self, sheet: &SheetHandle) -> Result<Vec<BoundingBox>> {
        let workbook = sheet.workbook(op::LIST_OBJECTS)?;
        self.call(op::LIST_OBJECTS, Some(workbook.id()), |app| {
            app.objects(workbook.name(), sheet.sheet())
        })
    }

    fn delete_object(&self, sheet: &SheetHandle, name: &str, kind: ObjectKind) -> Result<()> {
        let workbook = sheet.workbook(op::DELETE_OBJECT)?;
        self.call(op::DELETE_OBJECT, Some(workbook.id()), |app| {
            app.delete_object(workbook.name(), sheet.sheet(), name, kind)
        })?;
        workbook.mark_saved(false);
        Ok(())
    }

    fn link_pivot_chart(&self, sheet: &SheetHandle, chart: &str, pivot: &str) -> Result<()> {
        let workbook = sheet.workbook(op::LINK_PIVOT_CHART)?;
        self.call(op::LINK_PIVOT_CHART, Some(workbook.id()), |app| {
            app.link_pivot_chart(workbook.name(), sheet.sheet(), chart, pivot)
        })?;
        workbook.mark_saved(false);
        Ok(())
    }

    fn pivot_chart_source(&self, sheet: &SheetHandle, chart: &str) -> Result<Option<String>> {
        let workbook = sheet.workbook(op::PIVOT_CHART_SOURCE)?;
        self.call(op::PIVOT_CHART_SOURCE, Some(workbook.id()), |app| {
            app.pivot_chart_source(workbook.name(), sheet.sheet(), chart)
        })
    }

    fn add_slicer(
        &self,
        sheet: &SheetHandle,
        pivot: &str,
        field: &str,
        bounds: &BoundingBox,
    ) -> Result<BoundingBox> {
        let workbook = sheet.workbook(op::ADD_SLICER)?;
        let applied = self.call(op::ADD_SLICER, Some(workbook.id()), |app| {
            app.add_slicer(workbook.name(), sheet.sheet(), pivot, field, bounds)
        })?;
        workbook.mark_saved(false);
        Ok(applied)
    }

    fn release_workbook(&self, workbook: &WorkbookHandle) -> Result<()> {
        self.workbooks.remove(workbook.id());
        Ok(())
    }

    fn reclaim(&self) -> Result<()> {
        excel::reclaim();
        Ok(())
    }

    fn thread_affinity(&self) -> Option<Arc<dyn ThreadAffinity>> {
        Some(self.apartment.clone())
    }

    fn shutdown(&self) -> Result<()> {
        let open = self.workbooks.drain();
        if self.config.quit_on_teardown {
            if let Err(e) = excel::quit(&self.config) {
                let err = normalize(op::SHUTDOWN, None, e);
                warn!(operation = op::SHUTDOWN, error = %err, "Excel did not quit cleanly");
            }
        }
        excel::disconnect();
        info!(operation = op::SHUTDOWN, open_workbooks = open.len(), "windows backend shut down");
        Ok(())
    }
}
