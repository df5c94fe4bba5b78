//! `Excel.Application` reached over COM from the current thread's apartment.
//!
//! COM objects are apartment-bound, so every thread that touches Excel keeps
//! its own initialized apartment and its own proxy to the application. The
//! first connection is registered in the global interface table and every
//! later proxy, on any thread, is unmarshalled from there. Worker threads
//! therefore talk to the same Excel instance as the caller, even when that
//! instance never appears in the running object table.

use std::cell::RefCell;
use std::sync::{Mutex, MutexGuard};

use duke_sheets_layout::{BoundingBox, ObjectKind};
use tracing::{debug, warn};
use windows::Win32::System::{
    Com::{CoFreeUnusedLibrariesEx, CoInitializeEx, CoUninitialize, COINIT_APARTMENTTHREADED},
    Variant::VARIANT,
};

use crate::address::RangeRef;
use crate::config::WindowsConfig;
use crate::model::{
    CellError, CellValue, ChartRequest, FileFormat, InsertMethod, PivotSpec, SheetRef,
};

use super::dispatch::{
    variant_bool, variant_dispatch, variant_empty, variant_f64, variant_get_bool,
    variant_get_error, variant_get_f64, variant_get_string, variant_i32, variant_is_empty,
    variant_missing, variant_str, DispatchObject,
};
use super::ComError;

const XL_DATABASE: i32 = 1;
const XL_ROW_FIELD: i32 = 1;
const XL_COLUMN_FIELD: i32 = 2;
const XL_PAGE_FIELD: i32 = 3;
const MSO_CHART: i32 = 3;

#[derive(Default)]
struct Apartment {
    initialized: bool,
    app: Option<ExcelApp>,
}

thread_local! {
    static APARTMENT: RefCell<Apartment> = RefCell::new(Apartment::default());
}

/// Global interface table cookie of the connected `Excel.Application`
static SHARED_APP: Mutex<Option<u32>> = Mutex::new(None);

fn shared_app() -> MutexGuard<'static, Option<u32>> {
    SHARED_APP.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Revoke the shared registration; needs an entered apartment
fn forget_shared() {
    if let Some(cookie) = shared_app().take() {
        if let Err(e) = DispatchObject::revoke_shared(cookie) {
            warn!(error = %e, "could not revoke shared Excel proxy");
        }
    }
}

/// Enter a single-threaded apartment on this thread (idempotent)
pub(super) fn attach() -> Result<(), ComError> {
    APARTMENT.with(|apartment| {
        let mut apartment = apartment.borrow_mut();
        if apartment.initialized {
            return Ok(());
        }
        unsafe { CoInitializeEx(None, COINIT_APARTMENTTHREADED) }
            .ok()
            .map_err(|e| ComError::Unavailable(format!("CoInitializeEx failed: {e}")))?;
        apartment.initialized = true;
        debug!("COM apartment initialized");
        Ok(())
    })
}

/// Release this thread's Excel proxy and leave the apartment.
///
/// Returns false when the thread had not entered one.
pub(super) fn detach() -> bool {
    APARTMENT.with(|apartment| {
        let mut apartment = apartment.borrow_mut();
        apartment.app = None;
        let initialized = std::mem::take(&mut apartment.initialized);
        if initialized {
            unsafe { CoUninitialize() };
            debug!("COM apartment uninitialized");
        }
        initialized
    })
}

/// Drop the shared registration and leave this thread's apartment
pub(super) fn disconnect() {
    if shared_app().is_some() && attach().is_ok() {
        forget_shared();
    }
    detach();
}

/// Unload in-process servers nothing references any more
pub(super) fn reclaim() {
    APARTMENT.with(|apartment| {
        if apartment.borrow().initialized {
            unsafe { CoFreeUnusedLibrariesEx(0, 0) };
        }
    })
}

/// Run `f` against this thread's Excel, connecting on first use.
///
/// A proxy whose server went away is dropped so the next call reconnects.
pub(super) fn with_app<T>(
    config: &WindowsConfig,
    f: impl FnOnce(&ExcelApp) -> Result<T, ComError>,
) -> Result<T, ComError> {
    attach()?;
    APARTMENT.with(|apartment| {
        let mut apartment = apartment.borrow_mut();
        if apartment.app.is_none() {
            apartment.app = Some(ExcelApp::connect(config)?);
        }
        let app = apartment
            .app
            .as_ref()
            .ok_or_else(|| ComError::Unavailable("Excel is not connected".to_string()))?;
        let result = f(app);
        if let Err(ComError::Unavailable(reason)) = &result {
            warn!(%reason, "dropping disconnected Excel proxy");
            apartment.app = None;
            forget_shared();
        }
        result
    })
}

/// One connection to `Excel.Application`
pub(crate) struct ExcelApp {
    app: DispatchObject,
}

impl ExcelApp {
    fn connect(config: &WindowsConfig) -> Result<Self, ComError> {
        // Held across the connect so concurrent workers cannot start two servers
        let mut shared = shared_app();
        if let Some(cookie) = *shared {
            match DispatchObject::from_shared(cookie) {
                Ok(app) => return Ok(Self { app }),
                Err(e) => {
                    warn!(error = %e, "shared Excel proxy is stale, reconnecting");
                    let _ = DispatchObject::revoke_shared(cookie);
                    *shared = None;
                }
            }
        }

        let app = if config.attach_running {
            DispatchObject::active(&config.prog_id).or_else(|e| {
                debug!(error = %e, "no running Excel, starting one");
                DispatchObject::create_from_progid(&config.prog_id)
            })?
        } else {
            DispatchObject::create_from_progid(&config.prog_id)?
        };
        app.set_property("Visible", variant_bool(config.visible))?;
        app.set_property("DisplayAlerts", variant_bool(config.display_alerts))?;
        match app.share() {
            Ok(cookie) => *shared = Some(cookie),
            Err(e) => warn!(error = %e, "Excel proxy not shared; other threads will connect on their own"),
        }
        debug!(prog_id = %config.prog_id, "connected to Excel");
        Ok(Self { app })
    }

    fn workbook(&self, name: &str) -> Result<DispatchObject, ComError> {
        self.app
            .get_child("Workbooks")?
            .get_indexed("Item", &[variant_str(name)])
            .map_err(|e| match e {
                ComError::Unavailable(_) => e,
                _ => ComError::WorkbookClosed(name.to_string()),
            })
    }

    fn sheet(&self, workbook: &str, sheet: &SheetRef) -> Result<DispatchObject, ComError> {
        let sheets = self.workbook(workbook)?.get_child("Worksheets")?;
        match sheet {
            // Excel worksheets are 1-based
            SheetRef::Index(idx) => sheets.get_indexed("Item", &[variant_i32(*idx as i32 + 1)]),
            SheetRef::Name(name) => sheets.get_indexed("Item", &[variant_str(name)]),
        }
    }

    fn cell(ws: &DispatchObject, range: &RangeRef, row: usize, col: usize) -> Result<DispatchObject, ComError> {
        let cell = range.cell(row, col);
        ws.get_indexed(
            "Cells",
            &[variant_i32(cell.row as i32 + 1), variant_i32(cell.col as i32 + 1)],
        )
    }

    pub fn create_workbook(&self) -> Result<String, ComError> {
        let wb = self.app.get_child("Workbooks")?.invoke_child("Add", &[])?;
        wb.get_string("Name")
    }

    pub fn open_workbook(&self, path: &str) -> Result<String, ComError> {
        let wb = self
            .app
            .get_child("Workbooks")?
            .invoke_child("Open", &[variant_str(path)])?;
        wb.get_string("Name")
    }

    pub fn close_workbook(&self, workbook: &str, save: bool) -> Result<(), ComError> {
        self.workbook(workbook)?
            .invoke_method("Close", &[variant_bool(save)])?;
        Ok(())
    }

    pub fn save_workbook(&self, workbook: &str, path: Option<&str>) -> Result<(), ComError> {
        let wb = self.workbook(workbook)?;
        match path {
            Some(path) => {
                let format = FileFormat::from_path(path).xl_file_format();
                wb.invoke_method("SaveAs", &[variant_str(path), variant_i32(format)])?
            }
            None => wb.invoke_method("Save", &[])?,
        };
        Ok(())
    }

    pub fn recalculate(&self) -> Result<(), ComError> {
        self.app.invoke_method("Calculate", &[])?;
        Ok(())
    }

    pub fn sheet_names(&self, workbook: &str) -> Result<Vec<String>, ComError> {
        let sheets = self.workbook(workbook)?.get_child("Worksheets")?;
        let count = sheets.get_f64("Count")? as i32;
        (1..=count)
            .map(|i| sheets.get_indexed("Item", &[variant_i32(i)])?.get_string("Name"))
            .collect()
    }

    /// Values and formulas of every cell in `range`
    pub fn read_cells(
        &self,
        workbook: &str,
        sheet: &SheetRef,
        range: &RangeRef,
    ) -> Result<(Vec<Vec<CellValue>>, Vec<Vec<String>>), ComError> {
        let ws = self.sheet(workbook, sheet)?;
        let mut values = Vec::with_capacity(range.rows());
        let mut formulas = Vec::with_capacity(range.rows());
        for r in 0..range.rows() {
            let mut value_row = Vec::with_capacity(range.cols());
            let mut formula_row = Vec::with_capacity(range.cols());
            for c in 0..range.cols() {
                let cell = Self::cell(&ws, range, r, c)?;
                // Value2 returns dates and currency as plain doubles
                value_row.push(variant_to_cell_value(&cell.get_property("Value2")?));
                formula_row.push(cell.get_string("Formula")?);
            }
            values.push(value_row);
            formulas.push(formula_row);
        }
        Ok((values, formulas))
    }

    pub fn write_cells(
        &self,
        workbook: &str,
        sheet: &SheetRef,
        range: &RangeRef,
        values: &[Vec<CellValue>],
    ) -> Result<(), ComError> {
        let ws = self.sheet(workbook, sheet)?;
        for (r, row) in values.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                Self::cell(&ws, range, r, c)?.set_property("Value", cell_value_to_variant(value))?;
            }
        }
        Ok(())
    }

    pub fn write_formulas(
        &self,
        workbook: &str,
        sheet: &SheetRef,
        range: &RangeRef,
        formulas: &[Vec<String>],
    ) -> Result<(), ComError> {
        let ws = self.sheet(workbook, sheet)?;
        for (r, row) in formulas.iter().enumerate() {
            for (c, formula) in row.iter().enumerate() {
                Self::cell(&ws, range, r, c)?.set_property("Formula", variant_str(formula))?;
            }
        }
        Ok(())
    }

    pub fn add_chart(
        &self,
        workbook: &str,
        sheet: &SheetRef,
        request: &ChartRequest,
        bounds: &BoundingBox,
        method: InsertMethod,
    ) -> Result<BoundingBox, ComError> {
        let ws = self.sheet(workbook, sheet)?;
        let geometry = [
            variant_f64(bounds.left),
            variant_f64(bounds.top),
            variant_f64(bounds.width),
            variant_f64(bounds.height),
        ];
        let container = match method {
            InsertMethod::Primary => {
                let mut args = vec![variant_i32(-1), variant_i32(request.kind.xl_chart_type())];
                args.extend(geometry);
                ws.get_child("Shapes")?.invoke_child("AddChart2", &args)?
            }
            InsertMethod::Alternate => ws
                .invoke_child("ChartObjects", &[])?
                .invoke_child("Add", &geometry)?,
        };
        container.set_property("Name", variant_str(&request.name))?;
        let chart = container.get_child("Chart")?;
        if method == InsertMethod::Alternate {
            chart.set_property("ChartType", variant_i32(request.kind.xl_chart_type()))?;
        }
        let source = ws.get_indexed("Range", &[variant_str(&request.data_range)])?;
        chart.invoke_method("SetSourceData", &[variant_dispatch(&source)])?;
        if let Some(title) = &request.title {
            chart.set_property("HasTitle", variant_bool(true))?;
            chart
                .get_child("ChartTitle")?
                .set_property("Text", variant_str(title))?;
        }
        geometry_of(&container, &request.name, ObjectKind::Chart)
    }

    /// Shapes, pivot tables and list objects on a sheet
    pub fn objects(&self, workbook: &str, sheet: &SheetRef) -> Result<Vec<BoundingBox>, ComError> {
        let ws = self.sheet(workbook, sheet)?;
        let mut out = Vec::new();

        let shapes = ws.get_child("Shapes")?;
        for i in 1..=shapes.get_f64("Count")? as i32 {
            let shape = shapes.get_indexed("Item", &[variant_i32(i)])?;
            let kind = if shape.get_f64("Type")? as i32 == MSO_CHART {
                ObjectKind::Chart
            } else {
                ObjectKind::Shape
            };
            let name = shape.get_string("Name")?;
            out.push(geometry_of(&shape, &name, kind)?);
        }

        let pivots = ws.invoke_child("PivotTables", &[])?;
        for i in 1..=pivots.get_f64("Count")? as i32 {
            let pt = pivots.get_indexed("Item", &[variant_i32(i)])?;
            let name = pt.get_string("Name")?;
            out.push(geometry_of(&pt.get_child("TableRange2")?, &name, ObjectKind::Pivot)?);
        }

        let tables = ws.get_child("ListObjects")?;
        for i in 1..=tables.get_f64("Count")? as i32 {
            let lo = tables.get_indexed("Item", &[variant_i32(i)])?;
            let name = lo.get_string("Name")?;
            out.push(geometry_of(&lo.get_child("Range")?, &name, ObjectKind::Table)?);
        }
        Ok(out)
    }

    pub fn delete_object(
        &self,
        workbook: &str,
        sheet: &SheetRef,
        name: &str,
        kind: ObjectKind,
    ) -> Result<(), ComError> {
        let ws = self.sheet(workbook, sheet)?;
        match kind {
            // Clearing the whole table range removes the pivot table itself
            ObjectKind::Pivot => {
                ws.invoke_child("PivotTables", &[variant_str(name)])?
                    .get_child("TableRange2")?
                    .invoke_method("Clear", &[])?;
            }
            ObjectKind::Table => {
                ws.get_child("ListObjects")?
                    .get_indexed("Item", &[variant_str(name)])?
                    .invoke_method("Delete", &[])?;
            }
            ObjectKind::Chart | ObjectKind::Shape => {
                ws.get_child("Shapes")?
                    .get_indexed("Item", &[variant_str(name)])?
                    .invoke_method("Delete", &[])?;
            }
        }
        Ok(())
    }

    pub fn add_pivot_table(
        &self,
        workbook: &str,
        spec: &PivotSpec,
        destination: &str,
    ) -> Result<BoundingBox, ComError> {
        let wb = self.workbook(workbook)?;
        let source = self
            .sheet(workbook, &spec.source_sheet)?
            .get_indexed("Range", &[variant_str(&spec.source_range)])?;
        let destination = self
            .sheet(workbook, &spec.destination_sheet)?
            .get_indexed("Range", &[variant_str(destination)])?;

        let cache = wb
            .invoke_child("PivotCaches", &[])?
            .invoke_child("Create", &[variant_i32(XL_DATABASE), variant_dispatch(&source)])?;
        let pt = cache.invoke_child(
            "CreatePivotTable",
            &[variant_dispatch(&destination), variant_str(&spec.name)],
        )?;

        for (fields, orientation) in [
            (&spec.rows, XL_ROW_FIELD),
            (&spec.columns, XL_COLUMN_FIELD),
            (&spec.filters, XL_PAGE_FIELD),
        ] {
            for field in fields {
                pt.invoke_child("PivotFields", &[variant_str(field)])?
                    .set_property("Orientation", variant_i32(orientation))?;
            }
        }
        for value in &spec.values {
            let field = pt.invoke_child("PivotFields", &[variant_str(&value.field)])?;
            pt.invoke_method(
                "AddDataField",
                &[
                    variant_dispatch(&field),
                    variant_str(&value.display_caption()),
                    variant_i32(value.aggregation.xl_function()),
                ],
            )?;
        }
        geometry_of(&pt.get_child("TableRange2")?, &spec.name, ObjectKind::Pivot)
    }

    /// Pivot tables are addressed by name across the whole workbook
    fn pivot(&self, workbook: &str, name: &str) -> Result<DispatchObject, ComError> {
        let sheets = self.workbook(workbook)?.get_child("Worksheets")?;
        for i in 1..=sheets.get_f64("Count")? as i32 {
            let ws = sheets.get_indexed("Item", &[variant_i32(i)])?;
            match ws.invoke_child("PivotTables", &[variant_str(name)]) {
                Ok(pt) => return Ok(pt),
                Err(ComError::Unavailable(reason)) => return Err(ComError::Unavailable(reason)),
                Err(_) => continue,
            }
        }
        Err(ComError::Call {
            member: "PivotTables".to_string(),
            message: format!("no pivot table named '{name}'"),
        })
    }

    fn chart(&self, workbook: &str, sheet: &SheetRef, name: &str) -> Result<DispatchObject, ComError> {
        self.sheet(workbook, sheet)?
            .invoke_child("ChartObjects", &[variant_str(name)])?
            .get_child("Chart")
    }

    pub fn link_pivot_chart(
        &self,
        workbook: &str,
        sheet: &SheetRef,
        chart: &str,
        pivot: &str,
    ) -> Result<(), ComError> {
        let source = self.pivot(workbook, pivot)?.get_child("TableRange1")?;
        self.chart(workbook, sheet, chart)?
            .invoke_method("SetSourceData", &[variant_dispatch(&source)])?;
        Ok(())
    }

    pub fn pivot_chart_source(
        &self,
        workbook: &str,
        sheet: &SheetRef,
        chart: &str,
    ) -> Result<Option<String>, ComError> {
        let chart = self.chart(workbook, sheet, chart)?;
        // A chart without a pivot source has no PivotLayout
        match chart.get_child("PivotLayout") {
            Ok(layout) => Ok(Some(layout.get_child("PivotTable")?.get_string("Name")?)),
            Err(ComError::Unavailable(reason)) => Err(ComError::Unavailable(reason)),
            Err(_) => Ok(None),
        }
    }

    pub fn add_slicer(
        &self,
        workbook: &str,
        sheet: &SheetRef,
        pivot: &str,
        field: &str,
        bounds: &BoundingBox,
    ) -> Result<BoundingBox, ComError> {
        let wb = self.workbook(workbook)?;
        let pt = self.pivot(workbook, pivot)?;
        let ws = self.sheet(workbook, sheet)?;
        let cache = wb
            .get_child("SlicerCaches")?
            .invoke_child("Add2", &[variant_dispatch(&pt), variant_str(field)])?;
        let slicer = cache.get_child("Slicers")?.invoke_child(
            "Add",
            &[
                variant_dispatch(&ws),
                variant_missing(),
                variant_str(&bounds.id),
                variant_str(field),
                variant_f64(bounds.top),
                variant_f64(bounds.left),
                variant_f64(bounds.width),
                variant_f64(bounds.height),
            ],
        )?;
        let name = slicer.get_string("Name")?;
        geometry_of(&slicer, &name, ObjectKind::Shape)
    }

    pub fn quit(&self) -> Result<(), ComError> {
        self.app.invoke_method("Quit", &[])?;
        Ok(())
    }
}

/// Quit the connected Excel.
///
/// The calling thread may already have left its apartment (the outermost
/// scope detaches it), so the proxy is re-obtained from the shared
/// registration. Nothing happens when no thread ever connected.
pub(super) fn quit(config: &WindowsConfig) -> Result<(), ComError> {
    let connected =
        shared_app().is_some() || APARTMENT.with(|apartment| apartment.borrow().app.is_some());
    if !connected {
        return Ok(());
    }
    let result = with_app(config, ExcelApp::quit);
    forget_shared();
    APARTMENT.with(|apartment| apartment.borrow_mut().app = None);
    result
}

fn geometry_of(obj: &DispatchObject, id: &str, kind: ObjectKind) -> Result<BoundingBox, ComError> {
    Ok(BoundingBox::new(
        id,
        kind,
        obj.get_f64("Left")?,
        obj.get_f64("Top")?,
        obj.get_f64("Width")?,
        obj.get_f64("Height")?,
    ))
}

fn cell_value_to_variant(value: &CellValue) -> VARIANT {
    match value {
        CellValue::Empty => variant_empty(),
        CellValue::Bool(b) => variant_bool(*b),
        CellValue::Number(n) => variant_f64(*n),
        CellValue::Text(s) => variant_str(s),
        // Excel evaluates a typed error code into the error value
        CellValue::Error(e) => variant_str(&e.code),
    }
}

fn variant_to_cell_value(variant: &VARIANT) -> CellValue {
    if variant_is_empty(variant) {
        CellValue::Empty
    } else if let Some(b) = variant_get_bool(variant) {
        CellValue::Bool(b)
    } else if let Some(n) = variant_get_f64(variant) {
        CellValue::Number(n)
    } else if let Some(s) = variant_get_string(variant) {
        CellValue::Text(s)
    } else if let Some(scode) = variant_get_error(variant) {
        CellValue::Error(CellError::from_cverr(scode).unwrap_or_else(|| CellError::new("#VALUE!")))
    } else {
        CellValue::Empty
    }
}
