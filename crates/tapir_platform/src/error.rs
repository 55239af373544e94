//! Adapter Error Types

use thiserror::Error;

/// Errors from platform capture adapters
#[derive(Error, Debug, Clone)]
pub enum AdapterError {
    #[error("Per-process capture not supported on this OS: {0}")]
    UnsupportedOs(String),

    #[error("Process {0} not found")]
    ProcessNotFound(u32),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Process {0} has no active audio output")]
    NoAudioOutput(u32),

    #[error("Audio subsystem unavailable: {0}")]
    SubsystemUnavailable(String),

    #[error("Audio subsystem error: {0}")]
    SubsystemError(String),

    #[error("Capture already started")]
    AlreadyStarted,
}
