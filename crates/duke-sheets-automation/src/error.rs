//! Error types for duke-sheets-automation
//!
//! Every backend failure is normalized into one of these variants before it
//! leaves the backend; native error codes (HRESULTs, AppleScript error numbers)
//! never reach the caller.

use std::time::Duration;

use duke_sheets_layout::PlacementError;
use thiserror::Error;

use crate::handle::HandleId;
use crate::lifecycle::CleanupWarning;
use crate::platform::Platform;

/// Result type alias using [`EngineError`]
pub type Result<T> = std::result::Result<T, EngineError>;

/// Coarse classification used by callers to pick a user-facing rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No backend exists for the host platform
    UnsupportedPlatform,
    /// The selected backend lacks this capability
    UnsupportedOperation,
    /// The host application is missing, not running, or refused automation
    AutomationUnavailable,
    /// A handle (or its parent workbook) was closed or released
    HandleInvalidated,
    /// A deadline elapsed; the operation may still complete
    TimedOut,
    /// The placement solver could not find room
    NoSpaceFound,
    /// One or more releases failed during scope exit
    CleanupWarning,
    /// The native call failed
    OperationFailed,
    /// Malformed input (bad address, ragged matrix, invalid size)
    InvalidArgument,
    /// The session is not in the `Active` state
    Session,
    /// Configuration could not be loaded
    Config,
}

/// Errors surfaced by the automation engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// The host platform has no automation surface
    #[error("no Excel automation backend is available on platform '{platform}'")]
    UnsupportedPlatform { platform: String },

    /// Capability absent on the selected backend
    #[error("{operation} is not available on {platform}")]
    UnsupportedOperation {
        operation: String,
        platform: Platform,
    },

    /// Host application not installed, not running, or automation denied
    #[error("Excel automation is unavailable on {platform}: {reason}")]
    AutomationUnavailable { platform: Platform, reason: String },

    /// The handle's workbook was closed or released
    #[error("{operation}: handle {handle} is no longer valid (its workbook was closed or released)")]
    HandleInvalidated { operation: String, handle: HandleId },

    /// The wait was bounded; the native call was abandoned, not cancelled
    #[error(
        "{operation} did not finish within {} ms; it may still complete in the background, \
         re-check the workbook before retrying{}",
        .deadline.as_millis(),
        recheck_note(.rechecked)
    )]
    TimedOut {
        operation: String,
        deadline: Duration,
        /// Whether post-timeout verification already ran without finding the result
        rechecked: bool,
    },

    /// Placement failed for an inserted object
    #[error("{operation}: cannot place object on sheet '{sheet}': {source}")]
    Placement {
        operation: String,
        sheet: String,
        #[source]
        source: PlacementError,
    },

    /// Aggregated release failures (only returned from a strict scope exit)
    #[error(transparent)]
    CleanupWarning(#[from] CleanupWarning),

    /// A native call failed for a reason without a more specific kind
    #[error("{operation} failed: {message}")]
    OperationFailed { operation: String, message: String },

    /// Caller supplied malformed input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted before the session was initialized
    #[error("{operation}: automation session is not initialized")]
    SessionNotActive { operation: String },

    /// Operation attempted after teardown
    #[error("{operation}: automation session has been torn down")]
    SessionTornDown { operation: String },

    /// Configuration file or document could not be read
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Create an operation-failed error
    pub fn failed<O: Into<String>, M: Into<String>>(operation: O, message: M) -> Self {
        EngineError::OperationFailed {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an invalid-argument error
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        EngineError::InvalidArgument(msg.into())
    }

    /// Create an unsupported-operation error
    pub fn unsupported<O: Into<String>>(operation: O, platform: Platform) -> Self {
        EngineError::UnsupportedOperation {
            operation: operation.into(),
            platform,
        }
    }

    /// Coarse kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::UnsupportedPlatform { .. } => ErrorKind::UnsupportedPlatform,
            EngineError::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            EngineError::AutomationUnavailable { .. } => ErrorKind::AutomationUnavailable,
            EngineError::HandleInvalidated { .. } => ErrorKind::HandleInvalidated,
            EngineError::TimedOut { .. } => ErrorKind::TimedOut,
            EngineError::Placement {
                source: PlacementError::NoSpaceFound { .. },
                ..
            } => ErrorKind::NoSpaceFound,
            EngineError::Placement { .. } | EngineError::InvalidArgument(_) => {
                ErrorKind::InvalidArgument
            }
            EngineError::CleanupWarning(_) => ErrorKind::CleanupWarning,
            EngineError::OperationFailed { .. } => ErrorKind::OperationFailed,
            EngineError::SessionNotActive { .. } | EngineError::SessionTornDown { .. } => {
                ErrorKind::Session
            }
            EngineError::Config(_) => ErrorKind::Config,
        }
    }

    /// A timeout: the caller should re-check state rather than retry blindly
    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::TimedOut { .. })
    }
}

fn recheck_note(rechecked: &bool) -> &'static str {
    if *rechecked {
        " (state was re-checked and the result was not there yet)"
    } else {
        ""
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}
