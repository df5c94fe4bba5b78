//! Handles to native automation objects.
//!
//! A handle never owns the native object. It names it (workbooks by their
//! display name, objects by their shape name) so each call can resolve it again
//! on whatever thread performs the call. Handles are destroyed only through
//! [`Scope`](crate::lifecycle::Scope) release, never on drop.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use duke_sheets_layout::{BoundingBox, ObjectKind};
use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;
use crate::error::{EngineError, Result};
use crate::model::SheetRef;

/// Opaque handle id. Id 0 is never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
struct WorkbookState {
    id: HandleId,
    name: String,
    path: Option<PathBuf>,
    backend: BackendKind,
    saved: AtomicBool,
    live: AtomicBool,
}

/// Reference to an open workbook.
///
/// Cloning is cheap; all clones observe the same saved/live flags.
#[derive(Debug, Clone)]
pub struct WorkbookHandle(Arc<WorkbookState>);

impl WorkbookHandle {
    /// Create a handle for a workbook the backend just opened or created
    pub fn new(
        id: HandleId,
        name: impl Into<String>,
        path: Option<PathBuf>,
        backend: BackendKind,
    ) -> Self {
        let saved = path.is_some();
        Self(Arc::new(WorkbookState {
            id,
            name: name.into(),
            path,
            backend,
            saved: AtomicBool::new(saved),
            live: AtomicBool::new(true),
        }))
    }

    pub fn id(&self) -> HandleId {
        self.0.id
    }

    /// Display name, as the host application knows it
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// File the workbook was opened from, if any
    pub fn path(&self) -> Option<&Path> {
        self.0.path.as_deref()
    }

    /// Backend that produced this handle
    pub fn backend(&self) -> BackendKind {
        self.0.backend
    }

    /// Whether the workbook has no unsaved changes made through the engine
    pub fn is_saved(&self) -> bool {
        self.0.saved.load(Ordering::Acquire)
    }

    pub fn mark_saved(&self, saved: bool) {
        self.0.saved.store(saved, Ordering::Release);
    }

    /// False once the workbook was closed or its handle released
    pub fn is_live(&self) -> bool {
        self.0.live.load(Ordering::Acquire)
    }

    /// Returns true if this call flipped the handle from live to invalid
    pub(crate) fn invalidate(&self) -> bool {
        self.0.live.swap(false, Ordering::AcqRel)
    }

    /// Fail with [`EngineError::HandleInvalidated`] unless the handle is live
    pub fn ensure_live(&self, operation: &str) -> Result<()> {
        if self.is_live() {
            Ok(())
        } else {
            Err(EngineError::HandleInvalidated {
                operation: operation.to_string(),
                handle: self.id(),
            })
        }
    }

    /// Weak reference to one of this workbook's sheets
    pub fn sheet(&self, sheet: impl Into<SheetRef>) -> SheetHandle {
        SheetHandle {
            workbook: Arc::downgrade(&self.0),
            workbook_id: self.id(),
            sheet: sheet.into(),
        }
    }
}

impl PartialEq for WorkbookHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Display for WorkbookHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "workbook '{}' ({})", self.name(), self.id())
    }
}

/// Sheet within a workbook. Never keeps its workbook alive.
#[derive(Debug, Clone)]
pub struct SheetHandle {
    workbook: Weak<WorkbookState>,
    workbook_id: HandleId,
    sheet: SheetRef,
}

impl SheetHandle {
    pub fn sheet(&self) -> &SheetRef {
        &self.sheet
    }

    pub fn workbook_id(&self) -> HandleId {
        self.workbook_id
    }

    /// The parent workbook, if it is still open and tracked
    pub fn workbook(&self, operation: &str) -> Result<WorkbookHandle> {
        let invalid = || EngineError::HandleInvalidated {
            operation: operation.to_string(),
            handle: self.workbook_id,
        };
        let state = self.workbook.upgrade().ok_or_else(invalid)?;
        let workbook = WorkbookHandle(state);
        if workbook.is_live() {
            Ok(workbook)
        } else {
            Err(invalid())
        }
    }
}

impl fmt::Display for SheetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of workbook {}", self.sheet, self.workbook_id)
    }
}

/// An inserted chart, pivot table or slicer
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectHandle {
    pub id: HandleId,
    pub workbook: HandleId,
    pub sheet: SheetRef,
    /// Native object name; the key for lookups and verification
    pub name: String,
    pub kind: ObjectKind,
    /// Footprint on the sheet as the backend reported it
    pub bounds: BoundingBox,
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' ({}) on {}", self.kind, self.name, self.id, self.sheet)
    }
}

struct TableInner<T> {
    entries: HashMap<HandleId, T>,
    next_id: u64,
}

/// Id-keyed table of live handles.
///
/// Ids start at 1 and are never reused within one table.
pub struct HandleTable<T> {
    inner: Mutex<TableInner<T>>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TableInner {
                entries: HashMap::new(),
                next_id: 1, // 0 is never a valid handle
            }),
        }
    }

    // A panic while holding the lock leaves the map itself consistent.
    fn lock(&self) -> MutexGuard<'_, TableInner<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allocate an id, build the entry from it, and store it
    pub fn insert_with<F>(&self, build: F) -> T
    where
        F: FnOnce(HandleId) -> T,
        T: Clone,
    {
        let mut inner = self.lock();
        let id = HandleId(inner.next_id);
        inner.next_id += 1;
        let value = build(id);
        inner.entries.insert(id, value.clone());
        value
    }

    pub fn get(&self, id: HandleId) -> Option<T>
    where
        T: Clone,
    {
        self.lock().entries.get(&id).cloned()
    }

    pub fn remove(&self, id: HandleId) -> Option<T> {
        self.lock().entries.remove(&id)
    }

    pub fn contains(&self, id: HandleId) -> bool {
        self.lock().entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every entry, lowest id first
    pub fn drain(&self) -> Vec<T> {
        let mut entries: Vec<_> = self.lock().entries.drain().collect();
        entries.sort_by_key(|(id, _)| *id);
        entries.into_iter().map(|(_, v)| v).collect()
    }
}
