//! Script execution seam.

use std::io;
use std::path::PathBuf;
use std::process::Command;

use thiserror::Error;
use tracing::debug;

/// Failure to run a script
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    /// The interpreter could not be started
    #[error("cannot run {program}: {message}")]
    Spawn { program: String, message: String },

    /// The script ran and raised an AppleScript error
    #[error("{message}")]
    Execution {
        /// AppleScript error number, e.g. -1728
        number: Option<i32>,
        message: String,
    },
}

impl ScriptError {
    /// Build from `osascript` stderr, e.g.
    /// `0:56: execution error: Microsoft Excel got an error: Can’t get workbook "x". (-1728)`
    pub fn from_stderr(stderr: &str) -> Self {
        let line = stderr.trim();
        let (body, number) = match line.rfind('(') {
            Some(open) if line.ends_with(')') => {
                let code = &line[open + 1..line.len() - 1];
                match code.parse::<i32>() {
                    Ok(n) => (line[..open].trim_end(), Some(n)),
                    Err(_) => (line, None),
                }
            }
            _ => (line, None),
        };
        let message = body
            .split_once("execution error: ")
            .map_or(body, |(_, rest)| rest)
            .trim()
            .to_string();
        ScriptError::Execution { number, message }
    }

    pub fn number(&self) -> Option<i32> {
        match self {
            ScriptError::Execution { number, .. } => *number,
            ScriptError::Spawn { .. } => None,
        }
    }
}

/// Runs one AppleScript program and returns its result as AppleScript source
pub trait ScriptRunner: Send + Sync {
    fn run(&self, script: &str) -> Result<String, ScriptError>;
}

/// Runs scripts with `osascript -s s -e <script>`
#[derive(Debug, Clone)]
pub struct Osascript {
    program: PathBuf,
}

impl Osascript {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl ScriptRunner for Osascript {
    fn run(&self, script: &str) -> Result<String, ScriptError> {
        debug!(bytes = script.len(), "running osascript");
        let output = Command::new(&self.program)
            .args(["-s", "s", "-e", script])
            .output()
            .map_err(|e| ScriptError::Spawn {
                program: self.program.display().to_string(),
                message: match e.kind() {
                    io::ErrorKind::NotFound => "not found".to_string(),
                    _ => e.to_string(),
                },
            })?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
        } else {
            Err(ScriptError::from_stderr(&String::from_utf8_lossy(
                &output.stderr,
            )))
        }
    }
}
