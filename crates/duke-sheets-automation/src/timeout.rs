//! Bounded waits on native calls that are known to hang.
//!
//! The guarded call runs on a fresh worker thread while the caller waits on a
//! channel with a deadline. When the deadline passes the caller gets
//! [`EngineError::TimedOut`] and the worker is abandoned: it keeps running and
//! its result is dropped. This bounds the wait, not the work. A timed-out call
//! may still take effect later, so callers must re-check state before retrying.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{EngineError, Result};

/// Per-thread setup required by a native automation subsystem.
///
/// COM needs every thread that touches Excel to enter an apartment first and
/// leave it when done; AppleScript needs nothing.
pub trait ThreadAffinity: Send + Sync {
    /// Initialize the calling thread. Calling it twice on one thread is a no-op.
    fn attach(&self) -> Result<()>;

    /// Tear down what `attach` set up on the calling thread.
    ///
    /// Returns whether anything was torn down.
    fn detach(&self) -> bool;
}

/// Runs one call at a time under a deadline
#[derive(Clone, Default)]
pub struct TimeoutGuard {
    affinity: Option<Arc<dyn ThreadAffinity>>,
}

impl TimeoutGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Workers attach before the call and detach after it
    pub fn with_affinity(affinity: Option<Arc<dyn ThreadAffinity>>) -> Self {
        Self { affinity }
    }

    /// Run `call` on a worker thread and wait at most `deadline` for it.
    ///
    /// Errors returned by `call` come back unchanged. A panic in `call` becomes
    /// [`EngineError::OperationFailed`].
    pub fn run_with_deadline<T, F>(&self, operation: &str, deadline: Duration, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel::<Result<T>>(1);
        let affinity = self.affinity.clone();
        let op = operation.to_string();

        let spawned = thread::Builder::new()
            .name(format!("automation-{operation}"))
            .spawn(move || {
                let result = run_worker(&op, affinity.as_deref(), call);
                // Nobody is listening once the caller has timed out.
                let _ = tx.send(result);
            });
        if let Err(e) = spawned {
            return Err(EngineError::failed(
                operation,
                format!("cannot start worker thread: {e}"),
            ));
        }

        let started = Instant::now();
        match rx.recv_timeout(deadline) {
            Ok(result) => {
                debug!(
                    operation,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "guarded call finished"
                );
                result
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    operation,
                    deadline_ms = deadline.as_millis() as u64,
                    "guarded call timed out, abandoning worker"
                );
                Err(EngineError::TimedOut {
                    operation: operation.to_string(),
                    deadline,
                    rechecked: false,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(EngineError::failed(
                operation,
                "worker thread exited without a result",
            )),
        }
    }
}

fn run_worker<T>(
    operation: &str,
    affinity: Option<&dyn ThreadAffinity>,
    call: impl FnOnce() -> Result<T>,
) -> Result<T> {
    if let Some(affinity) = affinity {
        affinity.attach()?;
    }
    let outcome = panic::catch_unwind(AssertUnwindSafe(call));
    if let Some(affinity) = affinity {
        affinity.detach();
    }
    outcome.unwrap_or_else(|payload| {
        Err(EngineError::failed(
            operation,
            format!("worker panicked: {}", panic_message(payload.as_ref())),
        ))
    })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
