//! # duke-sheets-automation
//!
//! Drive a running Microsoft Excel from Rust: COM object automation on
//! Windows, AppleScript on macOS, one API for both.
//!
//! ## Features
//!
//! - One [`Backend`] contract with a Windows and a macOS implementation,
//!   chosen once per process by [`EngineFactory`]
//! - Lifecycle scopes that release every handle in reverse order of
//!   acquisition, even when some releases fail
//! - Deadlines on native calls that are known to hang, with post-timeout
//!   verification and an alternate insertion path for charts
//! - Automatic, non-overlapping placement of charts and slicers
//!
//! ## Example
//!
//! ```rust,no_run
//! use duke_sheets_automation::{ChartKind, EngineConfig, EngineFactory, PlacementPolicy};
//!
//! # fn main() -> duke_sheets_automation::Result<()> {
//! let engine = EngineFactory::create(EngineConfig::default())?;
//! let mut scope = engine.enter_scope();
//!
//! let workbook = engine.open(&mut scope, "report.xlsx")?;
//! let data = engine.read_range(&workbook, "Data", "A1:B5")?;
//! println!("{} rows", data.rows());
//!
//! let chart = engine.add_chart(
//!     &mut scope,
//!     &workbook,
//!     "Data",
//!     "A1:B5",
//!     ChartKind::ColumnClustered,
//!     &PlacementPolicy::sized(300.0, 200.0),
//! )?;
//! println!("{chart} at {:?}", chart.bounds.position());
//!
//! scope.exit()?;
//! engine.teardown()?;
//! # Ok(())
//! # }
//! ```
//!
//! The library logs through `tracing` and never installs a subscriber.

pub mod address;
pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod factory;
pub mod handle;
pub mod lifecycle;
pub mod model;
pub mod operation;
pub mod platform;
pub mod session;
pub mod timeout;

pub use address::{CellRef, RangeRef};
pub use backend::{Backend, BackendKind, MacBackend, ScriptError, ScriptRunner, WindowsBackend};
pub use config::{
    EngineConfig, Fallback, LifecycleConfig, MacConfig, OperationDeadline, PlacementConfig,
    TimeoutPolicy, WindowsConfig,
};
pub use engine::Engine;
pub use error::{EngineError, ErrorKind, Result};
pub use factory::EngineFactory;
pub use handle::{HandleId, HandleTable, ObjectHandle, SheetHandle, WorkbookHandle};
pub use lifecycle::{CleanupReport, CleanupWarning, ReleaseFailure, Scope, TrackedHandle};
pub use model::{
    Aggregation, CellError, CellValue, ChartKind, ChartRequest, FileFormat, InsertMethod,
    PivotSpec, PlacementPolicy, RangeDescriptor, SheetRef, ValueField,
};
pub use platform::Platform;
pub use session::{AutomationSession, SessionState};
pub use timeout::{ThreadAffinity, TimeoutGuard};

pub use duke_sheets_layout::{Anchor, BoundingBox, ObjectKind, Position, SheetExtents, Size};
