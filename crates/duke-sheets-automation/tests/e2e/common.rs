//! Recording fakes shared by the end-to-end tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use duke_sheets_automation::{
    Backend, BackendKind, BoundingBox, CellRef, CellValue, ChartRequest, EngineConfig,
    EngineError, HandleId, HandleTable, InsertMethod, ObjectKind, PivotSpec, RangeDescriptor,
    RangeRef, Result, ScriptError, ScriptRunner, SheetHandle, SheetRef, ThreadAffinity,
    TimeoutPolicy, WorkbookHandle,
};

/// A native call that does not return in time
#[derive(Debug, Clone, Copy)]
pub struct Stall {
    pub duration: Duration,
    /// Whether the host applies the change before the call hangs
    pub takes_effect: bool,
}

type SheetKey = (HandleId, SheetRef);

/// In-memory backend that records every call in order
#[derive(Default)]
pub struct FakeBackend {
    kind: Option<BackendKind>,
    workbooks: HandleTable<WorkbookHandle>,
    objects: Mutex<HashMap<SheetKey, Vec<BoundingBox>>>,
    cells: Mutex<HashMap<(SheetKey, CellRef), CellValue>>,
    links: Mutex<HashMap<String, String>>,
    stalls: Mutex<HashMap<String, Stall>>,
    failing_releases: Mutex<HashSet<String>>,
    panicking_releases: Mutex<HashSet<String>>,
    affinity: Option<Arc<RecordingAffinity>>,
    calls: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report as `kind` (Windows by default)
    pub fn with_kind(mut self, kind: BackendKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_affinity(mut self, affinity: Arc<RecordingAffinity>) -> Self {
        self.affinity = Some(affinity);
        self
    }

    /// Make `call` (e.g. `"add_chart:Primary"`) stall
    pub fn stall(self, call: &str, duration: Duration, takes_effect: bool) -> Self {
        self.stalls.lock().unwrap().insert(
            call.to_string(),
            Stall {
                duration,
                takes_effect,
            },
        );
        self
    }

    /// Releasing the workbook with this name fails
    pub fn fail_release(self, workbook: &str) -> Self {
        self.failing_releases
            .lock()
            .unwrap()
            .insert(workbook.to_string());
        self
    }

    pub fn panic_on_release(self, workbook: &str) -> Self {
        self.panicking_releases
            .lock()
            .unwrap()
            .insert(workbook.to_string());
        self
    }

    /// Put an object on a sheet without going through the engine
    pub fn seed(&self, workbook: &WorkbookHandle, sheet: impl Into<SheetRef>, object: BoundingBox) {
        self.objects
            .lock()
            .unwrap()
            .entry((workbook.id(), sheet.into()))
            .or_default()
            .push(object);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    /// Sleep if `call` is configured to stall; returns whether to apply the effect first
    fn stall_for(&self, call: &str) -> Option<Stall> {
        self.stalls.lock().unwrap().get(call).copied()
    }

    fn run_stalled<T>(&self, call: &str, apply: impl FnOnce() -> Result<T>) -> Result<T> {
        match self.stall_for(call) {
            Some(stall) if stall.takes_effect => {
                let result = apply();
                thread::sleep(stall.duration);
                result
            }
            Some(stall) => {
                thread::sleep(stall.duration);
                Err(EngineError::failed(call, "host never answered"))
            }
            None => apply(),
        }
    }

    fn key(&self, operation: &str, sheet: &SheetHandle) -> Result<SheetKey> {
        let workbook = sheet.workbook(operation)?;
        Ok((workbook.id(), sheet.sheet().clone()))
    }

    fn insert_object(&self, key: SheetKey, object: BoundingBox) {
        self.objects.lock().unwrap().entry(key).or_default().push(object);
    }

    fn register(&self, name: String, path: Option<&Path>) -> WorkbookHandle {
        self.workbooks.insert_with(|id| {
            WorkbookHandle::new(
                id,
                name,
                path.map(Path::to_path_buf),
                self.kind.unwrap_or(BackendKind::Windows),
            )
        })
    }
}

impl Backend for FakeBackend {
    fn kind(&self) -> BackendKind {
        self.kind.unwrap_or(BackendKind::Windows)
    }

    fn create_workbook(&self) -> Result<WorkbookHandle> {
        // Native backends set up the calling thread on first use
        if let Some(affinity) = &self.affinity {
            affinity.connect_current_thread();
        }
        let name = format!("Book{}", self.workbooks.len() + 1);
        self.record(format!("create_workbook {name}"));
        Ok(self.register(name, None))
    }

    fn open(&self, path: &Path) -> Result<WorkbookHandle> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.record(format!("open {name}"));
        Ok(self.register(name, Some(path)))
    }

    fn close(&self, workbook: &WorkbookHandle, _save: bool) -> Result<()> {
        workbook.ensure_live("close")?;
        self.record(format!("close {}", workbook.name()));
        self.workbooks.remove(workbook.id());
        Ok(())
    }

    fn save(&self, workbook: &WorkbookHandle, _path: Option<&Path>) -> Result<()> {
        workbook.ensure_live("save")?;
        self.record(format!("save {}", workbook.name()));
        workbook.mark_saved(true);
        Ok(())
    }

    fn recalculate(&self, workbook: &WorkbookHandle) -> Result<()> {
        workbook.ensure_live("recalculate")?;
        self.record("recalculate");
        Ok(())
    }

    fn list_sheets(&self, workbook: &WorkbookHandle) -> Result<Vec<String>> {
        workbook.ensure_live("list_sheets")?;
        Ok(vec!["Sheet1".to_string(), "Data".to_string()])
    }

    fn read_range(&self, sheet: &SheetHandle, address: &str) -> Result<RangeDescriptor> {
        let key = self.key("read_range", sheet)?;
        let range = RangeRef::parse(address)?;
        self.record(format!("read_range {}", range.to_a1()));
        let cells = self.cells.lock().unwrap();
        let values = (0..range.rows())
            .map(|r| {
                (0..range.cols())
                    .map(|c| {
                        cells
                            .get(&(key.clone(), range.cell(r, c)))
                            .cloned()
                            .unwrap_or(CellValue::Empty)
                    })
                    .collect()
            })
            .collect();
        Ok(RangeDescriptor::new(range.to_a1(), values))
    }

    fn write_range(
        &self,
        sheet: &SheetHandle,
        address: &str,
        values: &[Vec<CellValue>],
    ) -> Result<()> {
        let key = self.key("write_range", sheet)?;
        let range = RangeRef::parse(address)?;
        self.record(format!("write_range {}", range.to_a1()));
        let mut cells = self.cells.lock().unwrap();
        for (r, row) in values.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                cells.insert((key.clone(), range.cell(r, c)), value.clone());
            }
        }
        Ok(())
    }

    fn write_formulas(
        &self,
        sheet: &SheetHandle,
        address: &str,
        _formulas: &[Vec<String>],
    ) -> Result<()> {
        self.key("write_formulas", sheet)?;
        self.record(format!("write_formulas {address}"));
        Ok(())
    }

    fn add_chart(
        &self,
        sheet: &SheetHandle,
        request: &ChartRequest,
        bounds: &BoundingBox,
        method: InsertMethod,
    ) -> Result<BoundingBox> {
        let key = self.key("add_chart", sheet)?;
        let call = format!("add_chart:{method:?}");
        self.record(format!("{call} {}", request.name));
        self.run_stalled(&call, || {
            let applied = BoundingBox {
                id: request.name.clone(),
                ..bounds.clone()
            };
            self.insert_object(key, applied.clone());
            Ok(applied)
        })
    }

    fn add_pivot_table(
        &self,
        workbook: &WorkbookHandle,
        spec: &PivotSpec,
        destination: &CellRef,
    ) -> Result<BoundingBox> {
        workbook.ensure_live("add_pivot_table")?;
        spec.validate()?;
        self.record(format!("add_pivot_table {} at {}", spec.name, destination.to_a1()));
        // Default grid: 48pt columns, 15pt rows
        let applied = BoundingBox::new(
            spec.name.clone(),
            ObjectKind::Pivot,
            f64::from(destination.col) * 48.0,
            f64::from(destination.row) * 15.0,
            192.0,
            100.0,
        );
        let key = (workbook.id(), spec.destination_sheet.clone());
        self.run_stalled("add_pivot_table", || {
            self.insert_object(key, applied.clone());
            Ok(applied)
        })
    }

    fn list_objects(&self, sheet: &SheetHandle) -> Result<Vec<BoundingBox>> {
        let key = self.key("list_objects", sheet)?;
        self.record("list_objects");
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }

    fn delete_object(&self, sheet: &SheetHandle, name: &str, kind: ObjectKind) -> Result<()> {
        let key = self.key("delete_object", sheet)?;
        self.record(format!("delete_object {kind} {name}"));
        if let Some(objects) = self.objects.lock().unwrap().get_mut(&key) {
            objects.retain(|b| b.id != name);
        }
        Ok(())
    }

    fn link_pivot_chart(&self, sheet: &SheetHandle, chart: &str, pivot: &str) -> Result<()> {
        self.key("link_pivot_chart", sheet)?;
        self.record(format!("link_pivot_chart {chart} -> {pivot}"));
        self.run_stalled("link_pivot_chart", || {
            self.links
                .lock()
                .unwrap()
                .insert(chart.to_string(), pivot.to_string());
            Ok(())
        })
    }

    fn pivot_chart_source(&self, sheet: &SheetHandle, chart: &str) -> Result<Option<String>> {
        self.key("pivot_chart_source", sheet)?;
        self.record(format!("pivot_chart_source {chart}"));
        Ok(self.links.lock().unwrap().get(chart).cloned())
    }

    fn add_slicer(
        &self,
        sheet: &SheetHandle,
        pivot: &str,
        field: &str,
        bounds: &BoundingBox,
    ) -> Result<BoundingBox> {
        let key = self.key("add_slicer", sheet)?;
        self.record(format!("add_slicer {pivot}.{field} as {}", bounds.id));
        self.run_stalled("add_slicer", || {
            self.insert_object(key, bounds.clone());
            Ok(bounds.clone())
        })
    }

    fn release_workbook(&self, workbook: &WorkbookHandle) -> Result<()> {
        self.record(format!("release {}", workbook.name()));
        if self.panicking_releases.lock().unwrap().contains(workbook.name()) {
            panic!("release of {} blew up", workbook.name());
        }
        if self.failing_releases.lock().unwrap().contains(workbook.name()) {
            return Err(EngineError::failed("release", "host refused"));
        }
        self.workbooks.remove(workbook.id());
        Ok(())
    }

    fn reclaim(&self) -> Result<()> {
        self.record("reclaim");
        Ok(())
    }

    fn thread_affinity(&self) -> Option<Arc<dyn ThreadAffinity>> {
        self.affinity
            .clone()
            .map(|a| a as Arc<dyn ThreadAffinity>)
    }

    fn shutdown(&self) -> Result<()> {
        match &self.affinity {
            Some(affinity) if affinity.is_attached_here() => self.record("shutdown (attached)"),
            _ => self.record("shutdown"),
        }
        Ok(())
    }
}

/// Counts per-thread attach and detach calls
#[derive(Default)]
pub struct RecordingAffinity {
    pub attaches: AtomicUsize,
    pub detaches: AtomicUsize,
    pub detached_on: Mutex<Vec<thread::ThreadId>>,
    attached: Mutex<HashSet<thread::ThreadId>>,
}

impl RecordingAffinity {
    /// Set up the current thread the way a first native call does, without counting an attach
    pub fn connect_current_thread(&self) {
        self.attached.lock().unwrap().insert(thread::current().id());
    }

    pub fn is_attached_here(&self) -> bool {
        self.attached.lock().unwrap().contains(&thread::current().id())
    }

    pub fn detaches_on(&self, thread: thread::ThreadId) -> usize {
        self.detached_on
            .lock()
            .unwrap()
            .iter()
            .filter(|t| **t == thread)
            .count()
    }
}

impl ThreadAffinity for RecordingAffinity {
    fn attach(&self) -> Result<()> {
        self.attaches.fetch_add(1, Ordering::SeqCst);
        self.connect_current_thread();
        Ok(())
    }

    fn detach(&self) -> bool {
        self.detaches.fetch_add(1, Ordering::SeqCst);
        self.detached_on.lock().unwrap().push(thread::current().id());
        self.attached.lock().unwrap().remove(&thread::current().id())
    }
}

/// Replays canned `osascript` results and records the scripts it was given
#[derive(Default)]
pub struct CannedRunner {
    replies: Mutex<VecDeque<std::result::Result<String, ScriptError>>>,
    scripts: Mutex<Vec<String>>,
}

impl CannedRunner {
    pub fn reply(self, output: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Ok(output.to_string()));
        self
    }

    pub fn fail(self, number: i32, message: &str) -> Self {
        self.replies.lock().unwrap().push_back(Err(ScriptError::Execution {
            number: Some(number),
            message: message.to_string(),
        }));
        self
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }
}

impl ScriptRunner for CannedRunner {
    fn run(&self, script: &str) -> std::result::Result<String, ScriptError> {
        self.scripts.lock().unwrap().push(script.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

/// Config with no guarded operations
pub fn unguarded() -> EngineConfig {
    EngineConfig::default().with_timeouts(TimeoutPolicy::empty())
}

pub fn chart_box(id: &str, left: f64, top: f64, width: f64, height: f64) -> BoundingBox {
    BoundingBox::new(id, ObjectKind::Chart, left, top, width, height)
}
