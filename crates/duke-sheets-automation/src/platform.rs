//! Host platform identification.
//!
//! The platform is read once per process and cached; backend selection never
//! changes afterwards.

use std::fmt;

use once_cell::sync::Lazy;

static CURRENT: Lazy<Platform> = Lazy::new(|| Platform::from_os(std::env::consts::OS));

/// Operating system family, as far as backend selection is concerned
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Platform {
    /// Windows: Excel is driven through COM object automation
    Windows,
    /// macOS: Excel is driven through AppleScript
    MacOs,
    /// Anything else; no backend exists
    Other(String),
}

impl Platform {
    /// Map a `std::env::consts::OS` value to a platform
    pub fn from_os(os: &str) -> Self {
        match os {
            "windows" => Platform::Windows,
            "macos" => Platform::MacOs,
            other => Platform::Other(other.to_string()),
        }
    }

    /// The platform this process runs on (detected once)
    pub fn current() -> &'static Platform {
        &CURRENT
    }

    /// Short identifier, e.g. `"windows"`
    pub fn id(&self) -> &str {
        match self {
            Platform::Windows => "windows",
            Platform::MacOs => "macos",
            Platform::Other(os) => os,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Windows => f.write_str("Windows"),
            Platform::MacOs => f.write_str("macOS"),
            Platform::Other(os) => f.write_str(os),
        }
    }
}
