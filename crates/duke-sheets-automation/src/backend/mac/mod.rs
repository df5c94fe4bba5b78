//! macOS backend: Microsoft Excel driven through AppleScript.
//!
//! Each operation is one generated script run through a [`ScriptRunner`].
//! Results come back as AppleScript literals and are parsed by [`literal`].
//! Pivot-chart linking and slicers have no AppleScript surface and return
//! [`EngineError::UnsupportedOperation`].

mod literal;
mod runner;
mod script;

use std::path::Path;
use std::sync::Arc;

use duke_sheets_layout::{BoundingBox, ObjectKind};
use tracing::{debug, info};

use crate::address::{CellRef, RangeRef};
use crate::backend::{fit_matrix, Backend, BackendKind};
use crate::config::MacConfig;
use crate::error::{EngineError, Result};
use crate::handle::{HandleId, HandleTable, SheetHandle, WorkbookHandle};
use crate::model::{CellValue, ChartRequest, InsertMethod, PivotSpec, RangeDescriptor};
use crate::operation as op;
use crate::platform::Platform;

use literal::Literal;
pub use runner::{Osascript, ScriptError, ScriptRunner};

use script::Scripts;

/// AppleScript error numbers meaning Excel cannot be reached at all
const UNAVAILABLE_ERRORS: [i32; 5] = [
    -600,   // application isn't running
    -609,   // connection is invalid
    -10810, // launch failed
    -10814, // application not found
    -1743,  // not authorized to send Apple events
];

/// "Can't get object"
const NO_SUCH_OBJECT: i32 = -1728;

pub struct MacBackend {
    runner: Arc<dyn ScriptRunner>,
    scripts: Scripts,
    workbooks: HandleTable<WorkbookHandle>,
}

impl MacBackend {
    /// Backend that runs scripts through the configured `osascript`
    pub fn new(config: &MacConfig) -> Self {
        Self::with_runner(config, Arc::new(Osascript::new(&config.osascript)))
    }

    pub fn with_runner(config: &MacConfig, runner: Arc<dyn ScriptRunner>) -> Self {
        Self {
            runner,
            scripts: Scripts::new(&config.application),
            workbooks: HandleTable::new(),
        }
    }

    fn run(&self, operation: &str, workbook: Option<HandleId>, script: &str) -> Result<Literal> {
        debug!(operation, "running AppleScript");
        let output = self
            .runner
            .run(script)
            .map_err(|e| normalize(operation, workbook, e))?;
        literal::parse(&output).map_err(|e| {
            EngineError::failed(operation, format!("unreadable AppleScript result: {e}"))
        })
    }

    fn sheet_ref(&self, operation: &str, sheet: &SheetHandle) -> Result<(WorkbookHandle, String)> {
        let workbook = sheet.workbook(operation)?;
        let reference = script::sheet(workbook.name(), sheet.sheet());
        Ok((workbook, reference))
    }

    fn register(&self, name: String, path: Option<&Path>) -> WorkbookHandle {
        self.workbooks.insert_with(|id| {
            WorkbookHandle::new(id, name, path.map(Path::to_path_buf), BackendKind::Mac)
        })
    }
}

/// Map an AppleScript failure onto the engine's error kinds
fn normalize(operation: &str, workbook: Option<HandleId>, err: ScriptError) -> EngineError {
    match (&err, err.number(), workbook) {
        (ScriptError::Spawn { .. }, _, _) => EngineError::AutomationUnavailable {
            platform: Platform::MacOs,
            reason: err.to_string(),
        },
        (_, Some(n), _) if UNAVAILABLE_ERRORS.contains(&n) => EngineError::AutomationUnavailable {
            platform: Platform::MacOs,
            reason: err.to_string(),
        },
        (ScriptError::Execution { message, .. }, Some(NO_SUCH_OBJECT), Some(handle))
            if message.contains("workbook") =>
        {
            EngineError::HandleInvalidated {
                operation: operation.to_string(),
                handle,
            }
        }
        _ => EngineError::failed(operation, err.to_string()),
    }
}

fn bounds(operation: &str, id: &str, kind: ObjectKind, geometry: &Literal) -> Result<BoundingBox> {
    let numbers: Option<Vec<f64>> = geometry
        .as_list()
        .map(|items| items.iter().filter_map(Literal::as_f64).collect());
    match numbers.as_deref() {
        Some(&[left, top, width, height]) => {
            Ok(BoundingBox::new(id, kind, left, top, width, height))
        }
        _ => Err(EngineError::failed(
            operation,
            format!("expected {{left, top, width, height}}, got {geometry}"),
        )),
    }
}

fn object_kind(tag: &str) -> ObjectKind {
    match tag {
        "chart" => ObjectKind::Chart,
        "pivot" => ObjectKind::Pivot,
        "table" => ObjectKind::Table,
        _ => ObjectKind::Shape,
    }
}

fn text(operation: &str, value: Literal) -> Result<String> {
    match value {
        Literal::Text(s) => Ok(s),
        other => Err(EngineError::failed(
            operation,
            format!("expected a name, got {other}"),
        )),
    }
}

impl Backend for MacBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Mac
    }

    fn create_workbook(&self) -> Result<WorkbookHandle> {
        let name = text(
            op::CREATE_WORKBOOK,
            self.run(op::CREATE_WORKBOOK, None, &self.scripts.create_workbook())?,
        )?;
        let workbook = self.register(name, None);
        info!(workbook = %workbook, "created workbook");
        Ok(workbook)
    }

    fn open(&self, path: &Path) -> Result<WorkbookHandle> {
        let posix = path.to_string_lossy();
        let name = text(op::OPEN, self.run(op::OPEN, None, &self.scripts.open(&posix))?)?;
        let workbook = self.register(name, Some(path));
        info!(workbook = %workbook, path = %path.display(), "opened workbook");
        Ok(workbook)
    }

    fn close(&self, workbook: &WorkbookHandle, save: bool) -> Result<()> {
        workbook.ensure_live(op::CLOSE)?;
        self.run(
            op::CLOSE,
            Some(workbook.id()),
            &self.scripts.close(workbook.name(), save),
        )?;
        self.workbooks.remove(workbook.id());
        Ok(())
    }

    fn save(&self, workbook: &WorkbookHandle, path: Option<&Path>) -> Result<()> {
        workbook.ensure_live(op::SAVE)?;
        let posix = path.map(|p| p.to_string_lossy().into_owned());
        self.run(
            op::SAVE,
            Some(workbook.id()),
            &self.scripts.save(workbook.name(), posix.as_deref()),
        )?;
        workbook.mark_saved(true);
        Ok(())
    }

    fn recalculate(&self, workbook: &WorkbookHandle) -> Result<()> {
        workbook.ensure_live(op::RECALCULATE)?;
        self.run(op::RECALCULATE, Some(workbook.id()), &self.scripts.recalculate())?;
        Ok(())
    }

    fn list_sheets(&self, workbook: &WorkbookHandle) -> Result<Vec<String>> {
        workbook.ensure_live(op::LIST_SHEETS)?;
        let result = self.run(
            op::LIST_SHEETS,
            Some(workbook.id()),
            &self.scripts.list_sheets(workbook.name()),
        )?;
        result
            .into_rows()
            .into_iter()
            .flatten()
            .map(|name| text(op::LIST_SHEETS, name))
            .collect()
    }

    fn read_range(&self, sheet: &SheetHandle, address: &str) -> Result<RangeDescriptor> {
        let range = RangeRef::parse(address)?;
        let (workbook, sheet_ref) = self.sheet_ref(op::READ_RANGE, sheet)?;
        let result = self.run(
            op::READ_RANGE,
            Some(workbook.id()),
            &self.scripts.read_range(&sheet_ref, &range.to_a1()),
        )?;
        let (values, formulas) = match result {
            Literal::List(mut pair) if pair.len() == 2 => {
                let formulas = pair.pop().unwrap_or(Literal::Missing);
                let values = pair.pop().unwrap_or(Literal::Missing);
                (values, formulas)
            }
            other => {
                return Err(EngineError::failed(
                    op::READ_RANGE,
                    format!("expected {{values, formulas}}, got {other}"),
                ))
            }
        };
        let values = values
            .into_rows()
            .iter()
            .map(|row| row.iter().map(Literal::to_cell_value).collect())
            .collect();
        let formulas = formulas
            .into_rows()
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|f| match f {
                        Literal::Text(s) => s,
                        Literal::Missing => String::new(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .collect();
        Ok(RangeDescriptor::new(range.to_a1(), values).with_formulas(formulas))
    }

    fn write_range(
        &self,
        sheet: &SheetHandle,
        address: &str,
        values: &[Vec<CellValue>],
    ) -> Result<()> {
        let range = fit_matrix(address, values)?;
        let (workbook, sheet_ref) = self.sheet_ref(op::WRITE_RANGE, sheet)?;
        self.run(
            op::WRITE_RANGE,
            Some(workbook.id()),
            &self.scripts.write_range(&sheet_ref, &range.to_a1(), values),
        )?;
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
        let (workbook, sheet_ref) = self.sheet_ref(op::WRITE_FORMULAS, sheet)?;
        self.run(
            op::WRITE_FORMULAS,
            Some(workbook.id()),
            &self.scripts.write_formulas(&sheet_ref, &range.to_a1(), formulas),
        )?;
        workbook.mark_saved(false);
        Ok(())
    }

    fn add_chart(
        &self,
        sheet: &SheetHandle,
        request: &ChartRequest,
        bounds_hint: &BoundingBox,
        method: InsertMethod,
    ) -> Result<BoundingBox> {
        RangeRef::parse(&request.data_range)?;
        let (workbook, sheet_ref) = self.sheet_ref(op::ADD_CHART, sheet)?;
        let result = self.run(
            op::ADD_CHART,
            Some(workbook.id()),
            &self.scripts.add_chart(&sheet_ref, request, bounds_hint, method),
        )?;
        workbook.mark_saved(false);
        bounds(op::ADD_CHART, &request.name, ObjectKind::Chart, &result)
    }

    fn add_pivot_table(
        &self,
        workbook: &WorkbookHandle,
        spec: &PivotSpec,
        destination: &CellRef,
    ) -> Result<BoundingBox> {
        workbook.ensure_live(op::ADD_PIVOT_TABLE)?;
        spec.validate()?;
        let source = script::sheet(workbook.name(), &spec.source_sheet);
        let target = script::sheet(workbook.name(), &spec.destination_sheet);
        let result = self.run(
            op::ADD_PIVOT_TABLE,
            Some(workbook.id()),
            &self.scripts.add_pivot_table(
                workbook.name(),
                &source,
                &target,
                &destination.to_a1(),
                spec,
            ),
        )?;
        workbook.mark_saved(false);
        bounds(op::ADD_PIVOT_TABLE, &spec.name, ObjectKind::Pivot, &result)
    }

    fn list_objects(&self, sheet: &SheetHandle) -> Result<Vec<BoundingBox>> {
        let (workbook, sheet_ref) = self.sheet_ref(op::LIST_OBJECTS, sheet)?;
        let result = self.run(
            op::LIST_OBJECTS,
            Some(workbook.id()),
            &self.scripts.list_objects(&sheet_ref),
        )?;
        let Literal::List(entries) = result else {
            return Err(EngineError::failed(
                op::LIST_OBJECTS,
                format!("expected a list of objects, got {result}"),
            ));
        };
        entries
            .iter()
            .map(|entry| match entry.as_list() {
                Some([tag, name, geometry @ ..]) => {
                    let name = name.as_text().unwrap_or_default();
                    let kind = object_kind(tag.as_text().unwrap_or_default());
                    bounds(
                        op::LIST_OBJECTS,
                        name,
                        kind,
                        &Literal::List(geometry.to_vec()),
                    )
                }
                _ => Err(EngineError::failed(
                    op::LIST_OBJECTS,
                    format!("malformed object entry {entry}"),
                )),
            })
            .collect()
    }

    fn delete_object(&self, sheet: &SheetHandle, name: &str, kind: ObjectKind) -> Result<()> {
        let (workbook, sheet_ref) = self.sheet_ref(op::DELETE_OBJECT, sheet)?;
        self.run(
            op::DELETE_OBJECT,
            Some(workbook.id()),
            &self.scripts.delete_object(&sheet_ref, name, kind),
        )?;
        workbook.mark_saved(false);
        Ok(())
    }

    fn link_pivot_chart(&self, _sheet: &SheetHandle, _chart: &str, _pivot: &str) -> Result<()> {
        Err(EngineError::unsupported(op::LINK_PIVOT_CHART, Platform::MacOs))
    }

    fn pivot_chart_source(&self, _sheet: &SheetHandle, _chart: &str) -> Result<Option<String>> {
        Err(EngineError::unsupported(op::PIVOT_CHART_SOURCE, Platform::MacOs))
    }

    fn add_slicer(
        &self,
        _sheet: &SheetHandle,
        _pivot: &str,
        _field: &str,
        _bounds: &BoundingBox,
    ) -> Result<BoundingBox> {
        Err(EngineError::unsupported(op::ADD_SLICER, Platform::MacOs))
    }

    fn release_workbook(&self, workbook: &WorkbookHandle) -> Result<()> {
        self.workbooks.remove(workbook.id());
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        let open = self.workbooks.drain();
        info!(operation = op::SHUTDOWN, open_workbooks = open.len(), "mac backend shut down");
        Ok(())
    }
}
