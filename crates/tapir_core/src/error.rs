//! Capture Engine Error Types

use thiserror::Error;

use tapir_convert::ConvertError;
use tapir_platform::AdapterError;

/// Errors surfaced by a capture session
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Conversion error: {0}")]
    Convert(#[from] ConvertError),

    #[error("Capture is not running; call start() first")]
    NotRunning,

    #[error("Capture worker failed to start: {0}")]
    WorkerStart(String),
}

/// Result alias for session operations
pub type CaptureResult<T> = Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CaptureError::NotRunning;
        assert!(err.to_string().contains("start()"));
    }

    #[test]
    fn test_from_adapter_error() {
        let err: CaptureError = AdapterError::ProcessNotFound(7).into();
        assert!(matches!(err, CaptureError::Adapter(_)));
    }

    #[test]
    fn test_from_convert_error() {
        let err: CaptureError = ConvertError::MalformedBuffer {
            len: 3,
            frame_size: 2,
        }
        .into();
        assert!(matches!(err, CaptureError::Convert(_)));
    }
}
