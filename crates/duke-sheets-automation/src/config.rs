//! Engine configuration.
//!
//! Everything has a default, so an empty JSON object is a valid config.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use duke_sheets_layout::{Anchor, SheetExtents, Size, DEFAULT_EXTENTS, DEFAULT_SPACING};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::operation;

/// What happens after a guarded call times out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fallback {
    /// Surface `TimedOut` to the caller
    #[default]
    Fail,
    /// Verify real state, then run the alternate operation if the result is missing
    FallBackToAlternateOperation,
}

/// Deadline and fallback for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDeadline {
    pub deadline_ms: u64,
    #[serde(default)]
    pub fallback: Fallback,
}

impl OperationDeadline {
    pub fn new(deadline_ms: u64, fallback: Fallback) -> Self {
        Self {
            deadline_ms,
            fallback,
        }
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// Operation name → deadline. Operations without an entry run unguarded on
/// the calling thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeoutPolicy {
    deadlines: HashMap<String, OperationDeadline>,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::empty()
            .with(
                operation::LINK_PIVOT_CHART,
                15_000,
                Fallback::FallBackToAlternateOperation,
            )
            .with(
                operation::ADD_CHART,
                30_000,
                Fallback::FallBackToAlternateOperation,
            )
            .with(operation::ADD_SLICER, 20_000, Fallback::Fail)
            .with(operation::ADD_PIVOT_TABLE, 60_000, Fallback::Fail)
    }
}

impl TimeoutPolicy {
    /// A policy that guards nothing
    pub fn empty() -> Self {
        Self {
            deadlines: HashMap::new(),
        }
    }

    /// Set (or replace) the entry for `operation`
    pub fn with(mut self, operation: &str, deadline_ms: u64, fallback: Fallback) -> Self {
        self.deadlines.insert(
            operation.to_string(),
            OperationDeadline::new(deadline_ms, fallback),
        );
        self
    }

    pub fn get(&self, operation: &str) -> Option<OperationDeadline> {
        self.deadlines.get(operation).copied()
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

/// Placement defaults for inserted objects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    pub spacing: f64,
    pub extents: SheetExtents,
    pub chart_size: Size,
    pub slicer_size: Size,
    /// Footprint assumed for a pivot table before Excel has laid it out
    pub pivot_size: Size,
    /// Default cell grid, used to turn cell addresses into points and back
    pub cell_size: Size,
    pub anchor: Anchor,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            spacing: DEFAULT_SPACING,
            extents: DEFAULT_EXTENTS,
            chart_size: Size::new(360.0, 216.0),
            slicer_size: Size::new(144.0, 200.0),
            pivot_size: Size::new(240.0, 150.0),
            cell_size: Size::new(48.0, 15.0),
            anchor: Anchor::RightOfLast,
        }
    }
}

/// Scope cleanup behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Return release failures from `Scope::exit` as an error
    pub strict: bool,
    /// Forced reclamation passes after the releases
    pub reclaim_passes: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            strict: false,
            reclaim_passes: 2,
        }
    }
}

/// COM settings for the Windows backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowsConfig {
    pub prog_id: String,
    /// Attach to an already running Excel before starting a new one
    pub attach_running: bool,
    pub visible: bool,
    pub display_alerts: bool,
    /// Call `Application.Quit` when the session is torn down
    pub quit_on_teardown: bool,
}

impl Default for WindowsConfig {
    fn default() -> Self {
        Self {
            prog_id: "Excel.Application".to_string(),
            attach_running: true,
            visible: false,
            display_alerts: false,
            quit_on_teardown: false,
        }
    }
}

/// AppleScript settings for the macOS backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacConfig {
    pub osascript: PathBuf,
    pub application: String,
}

impl Default for MacConfig {
    fn default() -> Self {
        Self {
            osascript: PathBuf::from("/usr/bin/osascript"),
            application: "Microsoft Excel".to_string(),
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub timeouts: TimeoutPolicy,
    pub placement: PlacementConfig,
    pub lifecycle: LifecycleConfig,
    pub windows: WindowsConfig,
    pub mac: MacConfig,
}

impl EngineConfig {
    /// Parse a JSON document; missing sections keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutPolicy) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.lifecycle.strict = strict;
        self
    }
}
