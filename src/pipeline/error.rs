//! Errors surfaced to whoever runs the pipeline
//!
//! Everything recoverable (bad input, a failing detector, a rejected
//! delivery, an unreadable store) is logged and absorbed inside the cycle.
//! Only conditions that make a whole cycle meaningless end up here.

use super::config::ConfigError;
use super::db::StoreError;
use super::registry::RegistryError;

#[derive(Debug)]
pub enum PipelineError {
    Config(ConfigError),
    Registry(RegistryError),
    Store(StoreError),
    /// No detectors registered, nothing could ever fire
    EmptyRegistry,
    Startup(String),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Config(e) => write!(f, "configuration error: {}", e),
            PipelineError::Registry(e) => write!(f, "registry error: {}", e),
            PipelineError::Store(e) => write!(f, "store error: {}", e),
            PipelineError::EmptyRegistry => write!(f, "detector registry is empty"),
            PipelineError::Startup(msg) => write!(f, "startup failed: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Config(e) => Some(e),
            PipelineError::Registry(e) => Some(e),
            PipelineError::Store(e) => Some(e),
            PipelineError::EmptyRegistry | PipelineError::Startup(_) => None,
        }
    }
}

impl From<ConfigError> for PipelineError {
    fn from(e: ConfigError) -> Self {
        PipelineError::Config(e)
    }
}

impl From<RegistryError> for PipelineError {
    fn from(e: RegistryError) -> Self {
        PipelineError::Registry(e)
    }
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        PipelineError::Store(e)
    }
}
