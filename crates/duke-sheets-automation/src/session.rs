//! Explicit automation session state.
//!
//! The session is an ordinary value: whoever builds it owns it and passes it
//! (usually inside an [`Engine`](crate::Engine)) to every call. It is torn
//! down exactly once; anything attempted afterwards fails with
//! [`EngineError::SessionTornDown`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendKind};
use crate::config::LifecycleConfig;
use crate::error::{EngineError, Result};
use crate::handle::{HandleTable, ObjectHandle};
use crate::lifecycle::Scope;
use crate::operation as op;

/// Where a session is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Active,
    TornDown,
}

/// The selected backend plus live-handle bookkeeping
pub struct AutomationSession {
    backend: Arc<dyn Backend>,
    lifecycle: LifecycleConfig,
    state: Mutex<SessionState>,
    live_handles: AtomicUsize,
    scope_depth: AtomicUsize,
    objects: Arc<HandleTable<ObjectHandle>>,
}

impl AutomationSession {
    /// Bind a backend. The session starts [`SessionState::Uninitialized`].
    pub fn new(backend: Arc<dyn Backend>, lifecycle: LifecycleConfig) -> Self {
        Self {
            backend,
            lifecycle,
            state: Mutex::new(SessionState::Uninitialized),
            live_handles: AtomicUsize::new(0),
            scope_depth: AtomicUsize::new(0),
            objects: Arc::new(HandleTable::new()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> SessionState {
        *self.lock_state()
    }

    /// Move to `Active`. A session that was torn down cannot come back.
    pub fn init(&self) -> Result<()> {
        let mut state = self.lock_state();
        match *state {
            SessionState::Uninitialized => {
                *state = SessionState::Active;
                info!(backend = %self.backend.kind(), "automation session started");
                Ok(())
            }
            SessionState::Active => Ok(()),
            SessionState::TornDown => Err(EngineError::SessionTornDown {
                operation: "init".to_string(),
            }),
        }
    }

    /// Shut the backend down and move to `TornDown`.
    ///
    /// Only the first call does anything; later calls return `Ok(())`.
    pub fn teardown(&self) -> Result<()> {
        let previous = {
            let mut state = self.lock_state();
            std::mem::replace(&mut *state, SessionState::TornDown)
        };
        match previous {
            SessionState::Active => {
                let live = self.live_handles();
                info!(
                    operation = op::SHUTDOWN,
                    backend = %self.backend.kind(),
                    live_handles = live,
                    "tearing down automation session"
                );
                self.objects.drain();
                // The outermost scope may already have left this thread's native state
                let affinity = self.backend.thread_affinity();
                if let Some(affinity) = &affinity {
                    if let Err(e) = affinity.attach() {
                        warn!(operation = op::SHUTDOWN, error = %e, "could not attach before shutdown");
                    }
                }
                let result = self.backend.shutdown();
                if let Some(affinity) = &affinity {
                    affinity.detach();
                }
                result
            }
            SessionState::Uninitialized | SessionState::TornDown => Ok(()),
        }
    }

    /// Fail unless the session is `Active`
    pub fn ensure_active(&self, operation: &str) -> Result<()> {
        match self.state() {
            SessionState::Active => Ok(()),
            SessionState::Uninitialized => Err(EngineError::SessionNotActive {
                operation: operation.to_string(),
            }),
            SessionState::TornDown => Err(EngineError::SessionTornDown {
                operation: operation.to_string(),
            }),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn lifecycle(&self) -> &LifecycleConfig {
        &self.lifecycle
    }

    /// Handles tracked by a scope and not yet released
    pub fn live_handles(&self) -> usize {
        self.live_handles.load(Ordering::Acquire)
    }

    /// Open a lifecycle scope
    pub fn enter_scope(&self) -> Scope<'_> {
        let depth = self.scope_depth.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(depth, "entered scope");
        Scope::new(self)
    }

    /// Objects inserted through this session that are still tracked
    pub fn objects(&self) -> &Arc<HandleTable<ObjectHandle>> {
        &self.objects
    }

    pub(crate) fn handle_tracked(&self) {
        self.live_handles.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn handle_released(&self) {
        let _ = self
            .live_handles
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Returns true when the scope being left was the outermost one
    pub(crate) fn leave_scope(&self) -> bool {
        let previous = self
            .scope_depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);
        previous <= 1
    }
}
