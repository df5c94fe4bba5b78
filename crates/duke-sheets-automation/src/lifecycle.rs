//! Ordered, best-effort release of automation handles.
//!
//! A [`Scope`] records every handle acquired inside it together with the
//! function that releases it. [`Scope::exit`] runs those functions in exact
//! reverse order of tracking (children before parents), then asks the backend
//! for its reclamation passes, then, if this was the outermost scope, tears
//! down the calling thread's native state.
//!
//! A failing release never stops the ones after it. Failures are collected
//! into one [`CleanupWarning`].

use std::fmt;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::operation as op;
use crate::session::AutomationSession;
use crate::timeout::panic_message;

type ReleaseFn = Box<dyn FnOnce() -> Result<()>>;

struct Tracked {
    label: String,
    release: ReleaseFn,
}

/// One release (or reclamation pass) that failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseFailure {
    pub label: String,
    pub error: String,
}

impl fmt::Display for ReleaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.error)
    }
}

/// Aggregate of every failure during one scope exit
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} cleanup step(s) failed: {}", .failures.len(), join(.failures))]
pub struct CleanupWarning {
    pub failures: Vec<ReleaseFailure>,
}

fn join(failures: &[ReleaseFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// What a scope exit did
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CleanupReport {
    /// Releases that succeeded
    pub released: usize,
    /// Reclamation passes that ran
    pub reclaim_passes: u32,
    /// Whether per-thread native teardown ran
    pub thread_teardown: bool,
    pub warning: Option<CleanupWarning>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.warning.is_none()
    }
}

/// A handle that a scope will release. Dereferences to the handle.
#[derive(Debug)]
pub struct TrackedHandle<H> {
    handle: H,
    position: usize,
}

impl<H> TrackedHandle<H> {
    /// Index in the scope's release list (0 = released last)
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn into_inner(self) -> H {
        self.handle
    }
}

impl<H> Deref for TrackedHandle<H> {
    type Target = H;

    fn deref(&self) -> &H {
        &self.handle
    }
}

/// Lifecycle scope over an [`AutomationSession`]
pub struct Scope<'s> {
    session: &'s AutomationSession,
    tracked: Vec<Tracked>,
    exited: bool,
}

impl<'s> Scope<'s> {
    pub(crate) fn new(session: &'s AutomationSession) -> Self {
        Self {
            session,
            tracked: Vec::new(),
            exited: false,
        }
    }

    /// Track `handle`; `release` runs when the scope exits
    pub fn track<H, F>(&mut self, handle: H, release: F) -> TrackedHandle<H>
    where
        H: fmt::Display,
        F: FnOnce() -> Result<()> + 'static,
    {
        let label = handle.to_string();
        self.track_named(label, handle, release)
    }

    /// Track under an explicit label (used in warnings)
    pub fn track_named<H, F>(
        &mut self,
        label: impl Into<String>,
        handle: H,
        release: F,
    ) -> TrackedHandle<H>
    where
        F: FnOnce() -> Result<()> + 'static,
    {
        let position = self.tracked.len();
        self.tracked.push(Tracked {
            label: label.into(),
            release: Box::new(release),
        });
        self.session.handle_tracked();
        TrackedHandle { handle, position }
    }

    /// Number of handles waiting to be released
    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    pub fn session(&self) -> &'s AutomationSession {
        self.session
    }

    /// Release everything and close the scope.
    ///
    /// Release failures are reported in [`CleanupReport::warning`]. In strict
    /// mode they are returned as [`EngineError::CleanupWarning`] instead.
    pub fn exit(mut self) -> Result<CleanupReport> {
        let report = self.finish();
        match report.warning {
            Some(warning) if self.session.lifecycle().strict => {
                Err(EngineError::CleanupWarning(warning))
            }
            _ => Ok(report),
        }
    }

    fn finish(&mut self) -> CleanupReport {
        self.exited = true;
        let backend = self.session.backend();
        let mut report = CleanupReport::default();
        let mut failures = Vec::new();

        while let Some(Tracked { label, release }) = self.tracked.pop() {
            match panic::catch_unwind(AssertUnwindSafe(release)) {
                Ok(Ok(())) => {
                    debug!(operation = op::RELEASE, handle = %label, "released");
                    report.released += 1;
                }
                Ok(Err(e)) => failures.push(ReleaseFailure {
                    label,
                    error: e.to_string(),
                }),
                Err(payload) => failures.push(ReleaseFailure {
                    label,
                    error: format!("{} panicked: {}", op::RELEASE, panic_message(payload.as_ref())),
                }),
            }
            self.session.handle_released();
        }

        for pass in 1..=self.session.lifecycle().reclaim_passes {
            match backend.reclaim() {
                Ok(()) => report.reclaim_passes += 1,
                Err(e) => failures.push(ReleaseFailure {
                    label: format!("{} pass {pass}", op::RECLAIM),
                    error: e.to_string(),
                }),
            }
        }
        debug!(operation = op::RECLAIM, passes = report.reclaim_passes, "reclaimed");

        if self.session.leave_scope() {
            if let Some(affinity) = backend.thread_affinity() {
                report.thread_teardown = affinity.detach();
            }
        }

        if !failures.is_empty() {
            let warning = CleanupWarning { failures };
            warn!(%warning, "scope cleanup finished with failures");
            report.warning = Some(warning);
        }
        report
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        if !self.exited {
            warn!(
                pending = self.tracked.len(),
                "scope dropped without exit(), releasing now"
            );
            self.finish();
        }
    }
}
