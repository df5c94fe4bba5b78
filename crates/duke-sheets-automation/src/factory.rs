//! Backend selection.
//!
//! The backend is chosen once from the host platform and never switched at
//! runtime. Platforms without an Excel automation surface are rejected before
//! any operation runs.

use std::sync::Arc;

use tracing::info;

use crate::backend::{Backend, MacBackend, WindowsBackend};
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::platform::Platform;

/// Builds an [`Engine`] bound to the right backend
pub struct EngineFactory;

impl EngineFactory {
    /// Engine for the platform this process runs on
    pub fn create(config: EngineConfig) -> Result<Engine> {
        Self::create_for(Platform::current(), config)
    }

    /// Engine for an explicit platform
    pub fn create_for(platform: &Platform, config: EngineConfig) -> Result<Engine> {
        let backend = Self::backend_for(platform, &config)?;
        info!(%platform, backend = %backend.kind(), "selected automation backend");
        Engine::new(backend, config)
    }

    /// The backend `platform` maps to, without starting a session
    pub fn backend_for(platform: &Platform, config: &EngineConfig) -> Result<Arc<dyn Backend>> {
        match platform {
            Platform::Windows => Ok(Arc::new(WindowsBackend::new(&config.windows))),
            Platform::MacOs => Ok(Arc::new(MacBackend::new(&config.mac))),
            Platform::Other(os) => Err(EngineError::UnsupportedPlatform {
                platform: os.clone(),
            }),
        }
    }
}
