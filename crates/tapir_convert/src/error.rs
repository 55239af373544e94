//! Converter Error Types

use thiserror::Error;

/// Errors from the PCM normalization pipeline
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    #[error("Unsupported native format: {0}")]
    UnsupportedFormat(String),

    #[error("Malformed buffer: {len} bytes is not a multiple of the {frame_size}-byte frame")]
    MalformedBuffer { len: usize, frame_size: usize },
}
