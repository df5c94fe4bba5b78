//! The caller-facing automation engine.
//!
//! An [`Engine`] owns one [`AutomationSession`] and routes every operation to
//! its backend. Operations named in the [`TimeoutPolicy`](crate::TimeoutPolicy)
//! run under the [`TimeoutGuard`]; when such an operation times out and its
//! policy allows it, the engine re-queries the workbook before giving up:
//!
//! 1. look for the object the call was creating,
//! 2. run the alternate operation if there is one,
//! 3. look again if the alternate failed.
//!
//! Only when none of that produces the object is [`EngineError::TimedOut`]
//! returned, with `rechecked: true`.
//!
//! Inserted charts and slicers are positioned by the placement solver from
//! the objects already on the sheet. A pivot table without a destination
//! cell gets one from the solver as well; one with an explicit destination
//! is refused when its estimated footprint overlaps an existing object.

use std::path::Path;
use std::sync::Arc;

use duke_sheets_layout::{BoundingBox, ObjectKind, PlacementSolver, Size};
use tracing::{debug, info, warn};

use crate::address::{CellRef, MAX_COLS, MAX_ROWS};
use crate::backend::Backend;
use crate::config::{EngineConfig, Fallback};
use crate::error::{EngineError, Result};
use crate::handle::{ObjectHandle, SheetHandle, WorkbookHandle};
use crate::lifecycle::Scope;
use crate::model::{
    CellValue, ChartKind, ChartRequest, InsertMethod, PivotSpec, PlacementPolicy,
    RangeDescriptor, SheetRef,
};
use crate::operation as op;
use crate::platform::Platform;
use crate::session::{AutomationSession, SessionState};
use crate::timeout::TimeoutGuard;

/// Excel automation through one backend
pub struct Engine {
    session: AutomationSession,
    config: EngineConfig,
    guard: TimeoutGuard,
}

impl Engine {
    /// Bind `backend` and start the session
    pub fn new(backend: Arc<dyn Backend>, config: EngineConfig) -> Result<Self> {
        let guard = TimeoutGuard::with_affinity(backend.thread_affinity());
        let session = AutomationSession::new(backend, config.lifecycle.clone());
        session.init()?;
        Ok(Self {
            session,
            config,
            guard,
        })
    }

    pub fn session(&self) -> &AutomationSession {
        &self.session
    }

    pub fn platform(&self) -> Platform {
        self.session.backend().platform()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn backend(&self) -> &Arc<dyn Backend> {
        self.session.backend()
    }

    /// Open a lifecycle scope; handles acquired through it are released on exit
    pub fn enter_scope(&self) -> Scope<'_> {
        self.session.enter_scope()
    }

    /// Shut the backend down. Later calls fail with `SessionTornDown`.
    pub fn teardown(&self) -> Result<()> {
        self.session.teardown()
    }

    // -- workbooks --

    pub fn create_workbook(&self, scope: &mut Scope<'_>) -> Result<WorkbookHandle> {
        self.session.ensure_active(op::CREATE_WORKBOOK)?;
        let workbook = self.backend().create_workbook()?;
        Ok(self.track_workbook(scope, workbook))
    }

    pub fn open(&self, scope: &mut Scope<'_>, path: impl AsRef<Path>) -> Result<WorkbookHandle> {
        self.session.ensure_active(op::OPEN)?;
        let workbook = self.backend().open(path.as_ref())?;
        Ok(self.track_workbook(scope, workbook))
    }

    fn track_workbook(&self, scope: &mut Scope<'_>, workbook: WorkbookHandle) -> WorkbookHandle {
        let backend = Arc::clone(self.backend());
        let released = workbook.clone();
        scope
            .track(workbook, move || {
                let result = backend.release_workbook(&released);
                released.invalidate();
                result
            })
            .into_inner()
    }

    /// Close the workbook in the host. Its handle and sheet handles become invalid.
    pub fn close(&self, workbook: &WorkbookHandle, save: bool) -> Result<()> {
        self.session.ensure_active(op::CLOSE)?;
        self.backend().close(workbook, save)?;
        workbook.invalidate();
        info!(workbook = %workbook, save, "closed workbook");
        Ok(())
    }

    /// Save in place, or to `path`
    pub fn save(&self, workbook: &WorkbookHandle, path: Option<&Path>) -> Result<()> {
        self.session.ensure_active(op::SAVE)?;
        self.backend().save(workbook, path)
    }

    pub fn recalculate(&self, workbook: &WorkbookHandle) -> Result<()> {
        self.session.ensure_active(op::RECALCULATE)?;
        self.backend().recalculate(workbook)
    }

    pub fn list_sheets(&self, workbook: &WorkbookHandle) -> Result<Vec<String>> {
        self.session.ensure_active(op::LIST_SHEETS)?;
        self.backend().list_sheets(workbook)
    }

    // -- cells --

    pub fn read_range(
        &self,
        workbook: &WorkbookHandle,
        sheet: impl Into<SheetRef>,
        address: &str,
    ) -> Result<RangeDescriptor> {
        let sheet = self.sheet(op::READ_RANGE, workbook, sheet)?;
        self.backend().read_range(&sheet, address)
    }

    pub fn write_range(
        &self,
        workbook: &WorkbookHandle,
        sheet: impl Into<SheetRef>,
        address: &str,
        values: &[Vec<CellValue>],
    ) -> Result<()> {
        let sheet = self.sheet(op::WRITE_RANGE, workbook, sheet)?;
        self.backend().write_range(&sheet, address, values)
    }

    pub fn write_formulas(
        &self,
        workbook: &WorkbookHandle,
        sheet: impl Into<SheetRef>,
        address: &str,
        formulas: &[Vec<String>],
    ) -> Result<()> {
        let sheet = self.sheet(op::WRITE_FORMULAS, workbook, sheet)?;
        self.backend().write_formulas(&sheet, address, formulas)
    }

    // -- objects --

    /// Footprints of everything on the sheet, in creation order
    pub fn list_objects(
        &self,
        workbook: &WorkbookHandle,
        sheet: impl Into<SheetRef>,
    ) -> Result<Vec<BoundingBox>> {
        let sheet = self.sheet(op::LIST_OBJECTS, workbook, sheet)?;
        self.backend().list_objects(&sheet)
    }

    /// Ask the host whether an object exists, e.g. after a timed-out insert
    pub fn verify_object(
        &self,
        workbook: &WorkbookHandle,
        sheet: impl Into<SheetRef>,
        name: &str,
    ) -> Result<Option<BoundingBox>> {
        let sheet = self.sheet(op::FIND_OBJECT, workbook, sheet)?;
        self.backend().find_object(&sheet, name)
    }

    /// Add a chart of `data_range`, named "Chart n", at a free position
    pub fn add_chart(
        &self,
        scope: &mut Scope<'_>,
        workbook: &WorkbookHandle,
        sheet: impl Into<SheetRef>,
        data_range: &str,
        kind: ChartKind,
        placement: &PlacementPolicy,
    ) -> Result<ObjectHandle> {
        let request = ChartRequest {
            name: String::new(),
            kind,
            data_range: data_range.to_string(),
            title: None,
        };
        self.insert_chart(scope, workbook, sheet, request, placement)
    }

    /// Add a chart described by `request`. An empty name is replaced by the
    /// next free "Chart n".
    pub fn insert_chart(
        &self,
        scope: &mut Scope<'_>,
        workbook: &WorkbookHandle,
        sheet: impl Into<SheetRef>,
        mut request: ChartRequest,
        placement: &PlacementPolicy,
    ) -> Result<ObjectHandle> {
        let sheet = self.sheet(op::ADD_CHART, workbook, sheet)?;
        let existing = self.backend().list_objects(&sheet)?;
        if request.name.is_empty() {
            request.name = next_name("Chart", &existing, ObjectKind::Chart);
        }
        let size = placement.size.unwrap_or(self.config.placement.chart_size);
        let target = self.place(op::ADD_CHART, &sheet, existing, &request.name, ObjectKind::Chart, size, placement)?;
        debug!(chart = %request.name, left = target.left, top = target.top, "placing chart");

        let call = {
            let backend = Arc::clone(self.backend());
            let (sheet, request, target) = (sheet.clone(), request.clone(), target.clone());
            move || backend.add_chart(&sheet, &request, &target, InsertMethod::Primary)
        };
        let verify = self.find_by_name(&sheet, &request.name);
        let alternate = {
            let backend = Arc::clone(self.backend());
            let (sheet, request, target) = (sheet.clone(), request.clone(), target);
            move || backend.add_chart(&sheet, &request, &target, InsertMethod::Alternate)
        };
        let applied = self.guarded_with_recovery(op::ADD_CHART, call, verify, Some(alternate))?;
        workbook.mark_saved(false);
        Ok(self.track_object(scope, &sheet, &request.name, applied))
    }

    /// Create a pivot table.
    ///
    /// The footprint of a pivot is only known once Excel has filled it, so
    /// placement works from `pivot_size` laid on the default cell grid. An
    /// explicit destination is used as given unless that footprint overlaps
    /// an existing object. Without one the solver reserves a free spot and
    /// the pivot starts at the first cell inside it.
    pub fn add_pivot_table(
        &self,
        scope: &mut Scope<'_>,
        workbook: &WorkbookHandle,
        spec: &PivotSpec,
    ) -> Result<ObjectHandle> {
        let sheet = self.sheet(op::ADD_PIVOT_TABLE, workbook, spec.destination_sheet.clone())?;
        spec.validate()?;
        let existing = self.backend().list_objects(&sheet)?;
        let destination = self.pivot_destination(&sheet, spec, existing.clone())?;
        debug!(pivot = %spec.name, destination = %destination.to_a1(), "placing pivot table");

        let call = {
            let backend = Arc::clone(self.backend());
            let (workbook, spec) = (workbook.clone(), spec.clone());
            move || backend.add_pivot_table(&workbook, &spec, &destination)
        };
        let verify = self.find_by_name(&sheet, &spec.name);
        let applied =
            self.guarded_with_recovery(op::ADD_PIVOT_TABLE, call, verify, None::<fn() -> Result<BoundingBox>>)?;
        if let Some(other) = existing.iter().find(|b| b.overlaps(&applied)) {
            warn!(pivot = %spec.name, overlaps = %other.id, "pivot table grew over an existing object");
        }
        workbook.mark_saved(false);
        Ok(self.track_object(scope, &sheet, &spec.name, applied))
    }

    /// Bind a chart to a pivot table (Windows only)
    pub fn link_pivot_chart(
        &self,
        workbook: &WorkbookHandle,
        sheet: impl Into<SheetRef>,
        chart: &str,
        pivot: &str,
    ) -> Result<()> {
        let sheet = self.sheet(op::LINK_PIVOT_CHART, workbook, sheet)?;
        let call = {
            let backend = Arc::clone(self.backend());
            let (sheet, chart, pivot) = (sheet.clone(), chart.to_string(), pivot.to_string());
            move || backend.link_pivot_chart(&sheet, &chart, &pivot)
        };
        let verify = {
            let backend = Arc::clone(self.backend());
            let (sheet, chart, pivot) = (sheet, chart.to_string(), pivot.to_string());
            move || {
                let source = backend.pivot_chart_source(&sheet, &chart)?;
                Ok(source.filter(|s| *s == pivot).map(|_| ()))
            }
        };
        self.guarded_with_recovery(op::LINK_PIVOT_CHART, call, verify, None::<fn() -> Result<()>>)?;
        workbook.mark_saved(false);
        Ok(())
    }

    /// Add a slicer for `field` of `pivot` at a free position (Windows only)
    pub fn add_slicer(
        &self,
        scope: &mut Scope<'_>,
        workbook: &WorkbookHandle,
        sheet: impl Into<SheetRef>,
        pivot: &str,
        field: &str,
        placement: &PlacementPolicy,
    ) -> Result<ObjectHandle> {
        let sheet = self.sheet(op::ADD_SLICER, workbook, sheet)?;
        if self.backend().platform() != Platform::Windows {
            return Err(EngineError::unsupported(op::ADD_SLICER, self.backend().platform()));
        }
        let existing = self.backend().list_objects(&sheet)?;
        let name = unique_name(field, &existing);
        let size = placement.size.unwrap_or(self.config.placement.slicer_size);
        let target = self.place(op::ADD_SLICER, &sheet, existing, &name, ObjectKind::Shape, size, placement)?;

        let call = {
            let backend = Arc::clone(self.backend());
            let (sheet, pivot, field) = (sheet.clone(), pivot.to_string(), field.to_string());
            move || backend.add_slicer(&sheet, &pivot, &field, &target)
        };
        let verify = self.find_by_name(&sheet, &name);
        let applied = self.guarded_with_recovery(op::ADD_SLICER, call, verify, None::<fn() -> Result<BoundingBox>>)?;
        workbook.mark_saved(false);
        let name = applied.id.clone();
        Ok(self.track_object(scope, &sheet, &name, applied))
    }

    /// Delete an inserted object from its sheet
    pub fn delete_object(&self, workbook: &WorkbookHandle, object: &ObjectHandle) -> Result<()> {
        if object.workbook != workbook.id() {
            return Err(EngineError::invalid(format!(
                "{object} does not belong to {workbook}"
            )));
        }
        let sheet = self.sheet(op::DELETE_OBJECT, workbook, object.sheet.clone())?;
        self.backend().delete_object(&sheet, &object.name, object.kind)?;
        self.session.objects().remove(object.id);
        info!(object = %object, "deleted object");
        Ok(())
    }

    // -- internals --

    fn sheet(
        &self,
        operation: &str,
        workbook: &WorkbookHandle,
        sheet: impl Into<SheetRef>,
    ) -> Result<SheetHandle> {
        self.session.ensure_active(operation)?;
        workbook.ensure_live(operation)?;
        Ok(workbook.sheet(sheet))
    }

    #[allow(clippy::too_many_arguments)]
    fn place(
        &self,
        operation: &str,
        sheet: &SheetHandle,
        existing: Vec<BoundingBox>,
        name: &str,
        kind: ObjectKind,
        size: Size,
        placement: &PlacementPolicy,
    ) -> Result<BoundingBox> {
        let settings = &self.config.placement;
        let anchor = placement.anchor.unwrap_or(settings.anchor);
        PlacementSolver::new(existing, settings.spacing, settings.extents)
            .place(name, kind, size, anchor)
            .map_err(|source| EngineError::Placement {
                operation: operation.to_string(),
                sheet: sheet.sheet().to_string(),
                source,
            })
    }

    fn pivot_destination(
        &self,
        sheet: &SheetHandle,
        spec: &PivotSpec,
        existing: Vec<BoundingBox>,
    ) -> Result<CellRef> {
        let settings = &self.config.placement;
        let cell = settings.cell_size;
        match &spec.destination {
            Some(address) => {
                let destination = CellRef::parse(address)?;
                let footprint = BoundingBox::new(
                    spec.name.as_str(),
                    ObjectKind::Pivot,
                    f64::from(destination.col) * cell.width,
                    f64::from(destination.row) * cell.height,
                    settings.pivot_size.width,
                    settings.pivot_size.height,
                );
                PlacementSolver::new(existing, settings.spacing, settings.extents)
                    .check(&footprint)
                    .map_err(|source| EngineError::Placement {
                        operation: op::ADD_PIVOT_TABLE.to_string(),
                        sheet: sheet.sheet().to_string(),
                        source,
                    })?;
                Ok(destination)
            }
            None => {
                // One extra cell absorbs the snap to the grid
                let reserved = Size::new(
                    settings.pivot_size.width + cell.width,
                    settings.pivot_size.height + cell.height,
                );
                let spot = self.place(
                    op::ADD_PIVOT_TABLE,
                    sheet,
                    existing,
                    &spec.name,
                    ObjectKind::Pivot,
                    reserved,
                    &PlacementPolicy::default(),
                )?;
                Ok(first_cell_at(spot.left, spot.top, cell))
            }
        }
    }

    fn find_by_name(
        &self,
        sheet: &SheetHandle,
        name: &str,
    ) -> impl Fn() -> Result<Option<BoundingBox>> + Clone + Send + 'static {
        let backend = Arc::clone(self.backend());
        let sheet = sheet.clone();
        let name = name.to_string();
        move || backend.find_object(&sheet, &name)
    }

    fn track_object(
        &self,
        scope: &mut Scope<'_>,
        sheet: &SheetHandle,
        name: &str,
        bounds: BoundingBox,
    ) -> ObjectHandle {
        let object = self.session.objects().insert_with(|id| ObjectHandle {
            id,
            workbook: sheet.workbook_id(),
            sheet: sheet.sheet().clone(),
            name: name.to_string(),
            kind: bounds.kind,
            bounds,
        });
        info!(object = %object, "inserted object");
        let table = Arc::clone(self.session.objects());
        let id = object.id;
        scope
            .track(object, move || {
                table.remove(id);
                Ok(())
            })
            .into_inner()
    }

    /// Run `call` under the operation's deadline, or directly when the
    /// operation has no timeout policy
    fn guarded<T, F>(&self, operation: &str, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        match self.config.timeouts.get(operation) {
            Some(policy) => self
                .guard
                .run_with_deadline(operation, policy.deadline(), call),
            None => call(),
        }
    }

    fn guarded_with_recovery<T, F, V, A>(
        &self,
        operation: &str,
        call: F,
        verify: V,
        alternate: Option<A>,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
        V: Fn() -> Result<Option<T>> + Clone + Send + 'static,
        A: FnOnce() -> Result<T> + Send + 'static,
    {
        match self.guarded(operation, call) {
            Err(e) if e.is_timeout() && self.falls_back(operation) => {
                self.recover(operation, e, verify, alternate)
            }
            other => other,
        }
    }

    fn falls_back(&self, operation: &str) -> bool {
        self.config
            .timeouts
            .get(operation)
            .is_some_and(|p| p.fallback == Fallback::FallBackToAlternateOperation)
    }

    fn recover<T, V, A>(
        &self,
        operation: &str,
        timed_out: EngineError,
        verify: V,
        alternate: Option<A>,
    ) -> Result<T>
    where
        T: Send + 'static,
        V: Fn() -> Result<Option<T>> + Clone + Send + 'static,
        A: FnOnce() -> Result<T> + Send + 'static,
    {
        let check = |stage: &str| match self.guarded(operation, verify.clone()) {
            Ok(found) => found,
            Err(e) => {
                warn!(operation, stage, error = %e, "verification failed, treating as not found");
                None
            }
        };

        if let Some(found) = check("after timeout") {
            info!(operation, "timed-out call completed after all");
            return Ok(found);
        }
        let Some(alternate) = alternate else {
            return Err(rechecked(timed_out));
        };

        info!(operation, "running alternate operation");
        match self.guarded(operation, alternate) {
            Ok(applied) => Ok(applied),
            Err(e) => {
                if let Some(found) = check("after alternate") {
                    info!(operation, "object present despite alternate failure");
                    return Ok(found);
                }
                Err(rechecked(e))
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.session.state() == SessionState::Active {
            warn!(backend = %self.session.backend_kind(), "engine dropped without teardown");
            if let Err(e) = self.session.teardown() {
                warn!(error = %e, "teardown on drop failed");
            }
        }
    }
}

/// Mark a timeout as already re-checked; other errors pass through
fn rechecked(err: EngineError) -> EngineError {
    match err {
        EngineError::TimedOut {
            operation,
            deadline,
            ..
        } => EngineError::TimedOut {
            operation,
            deadline,
            rechecked: true,
        },
        other => other,
    }
}

/// First free "{prefix} k", counting from one past the number of objects of `kind`
fn next_name(prefix: &str, existing: &[BoundingBox], kind: ObjectKind) -> String {
    let start = existing.iter().filter(|b| b.kind == kind).count() + 1;
    (start..)
        .map(|k| format!("{prefix} {k}"))
        .find(|name| !existing.iter().any(|b| b.id == *name))
        .unwrap_or_else(|| prefix.to_string())
}

/// `base`, or "{base} k" for the first free k
fn unique_name(base: &str, existing: &[BoundingBox]) -> String {
    if !existing.iter().any(|b| b.id == base) {
        return base.to_string();
    }
    (1..)
        .map(|k| format!("{base} {k}"))
        .find(|name| !existing.iter().any(|b| b.id == *name))
        .unwrap_or_else(|| base.to_string())
}

/// First cell whose top-left corner is at or after (`left`, `top`) on a uniform grid
fn first_cell_at(left: f64, top: f64, cell: Size) -> CellRef {
    const EPSILON: f64 = 1e-6;
    let col = (left / cell.width - EPSILON).ceil().max(0.0).min(f64::from(MAX_COLS - 1));
    let row = (top / cell.height - EPSILON).ceil().max(0.0).min(f64::from(MAX_ROWS - 1));
    CellRef::new(row as u32, col as u16)
}
