//! End-to-end tests for duke-sheets-automation.
//!
//! The engine is driven against a recording in-memory backend
//! ([`common::FakeBackend`]) and, for macOS, against the real AppleScript
//! backend with canned `osascript` output. No test needs Excel.

mod common;
mod engine;
mod factory;
mod lifecycle;
mod mac;
mod placement;
mod timeouts;

// Re-export common utilities for submodules
pub use common::*;
