//! Format Descriptors
//!
//! The canonical output format is fixed for the whole engine; adapters
//! report what the OS actually delivers as a [`NativeFormat`] and the
//! converter bridges the two.

use serde::{Deserialize, Serialize};

use crate::error::ConvertError;

/// Canonical output sample rate in Hz.
pub const CANONICAL_RATE: u32 = 48_000;

/// Canonical output channel count (stereo, left then right).
pub const CANONICAL_CHANNELS: u16 = 2;

/// Bytes per canonical frame: 2 channels x 4-byte float.
pub const BYTES_PER_FRAME: usize = 8;

/// Sample encoding of a native capture stream, always little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleLayout {
    /// Signed 16-bit
    I16Le,
    /// Signed 24-bit packed into 3 bytes
    I24Le,
    /// Signed 24-bit carried in the upper bits of a 32-bit word
    I24In32Le,
    /// Signed 32-bit
    I32Le,
    /// IEEE 754 binary32
    F32Le,
}

impl SampleLayout {
    /// Size of one sample on the wire, in bytes.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleLayout::I16Le => 2,
            SampleLayout::I24Le => 3,
            SampleLayout::I24In32Le | SampleLayout::I32Le | SampleLayout::F32Le => 4,
        }
    }
}

/// What the OS delivers for a capture stream, as reported by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeFormat {
    /// Sample rate in Hz
    pub rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Sample encoding
    pub layout: SampleLayout,
}

impl NativeFormat {
    /// Validate and build a descriptor.
    ///
    /// Rates must be positive and channel counts in 1..=8; anything else
    /// is a format this engine does not convert.
    pub fn new(rate: u32, channels: u16, layout: SampleLayout) -> Result<Self, ConvertError> {
        if rate == 0 {
            return Err(ConvertError::UnsupportedFormat("sample rate 0 Hz".into()));
        }
        if channels == 0 || channels > 8 {
            return Err(ConvertError::UnsupportedFormat(format!(
                "{} channels (supported: 1..=8)",
                channels
            )));
        }
        Ok(Self {
            rate,
            channels,
            layout,
        })
    }

    /// Bytes per interleaved frame in this format.
    pub fn frame_size(&self) -> usize {
        self.channels as usize * self.layout.bytes_per_sample()
    }

    /// Whether buffers in this format can pass through untouched.
    pub fn is_canonical(&self) -> bool {
        self.rate == CANONICAL_RATE
            && self.channels == CANONICAL_CHANNELS
            && self.layout == SampleLayout::F32Le
    }
}

impl std::fmt::Display for NativeFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} Hz, {} ch, {:?}", self.rate, self.channels, self.layout)
    }
}

/// The fixed output format, in the shape embedders expect to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CanonicalFormat {
    pub rate: u32,
    pub channels: u16,
    pub sample_format: &'static str,
    pub bits_per_sample: u16,
}

impl Default for CanonicalFormat {
    fn default() -> Self {
        Self {
            rate: CANONICAL_RATE,
            channels: CANONICAL_CHANNELS,
            sample_format: "f32",
            bits_per_sample: 32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sizes() {
        let fmt = NativeFormat::new(44_100, 2, SampleLayout::I16Le).unwrap();
        assert_eq!(fmt.frame_size(), 4);

        let fmt = NativeFormat::new(48_000, 1, SampleLayout::I24Le).unwrap();
        assert_eq!(fmt.frame_size(), 3);

        let fmt = NativeFormat::new(96_000, 6, SampleLayout::F32Le).unwrap();
        assert_eq!(fmt.frame_size(), 24);
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(NativeFormat::new(0, 2, SampleLayout::F32Le).is_err());
        assert!(NativeFormat::new(48_000, 0, SampleLayout::F32Le).is_err());
        assert!(NativeFormat::new(48_000, 9, SampleLayout::F32Le).is_err());
    }

    #[test]
    fn test_canonical_detection() {
        let fmt = NativeFormat::new(48_000, 2, SampleLayout::F32Le).unwrap();
        assert!(fmt.is_canonical());

        let fmt = NativeFormat::new(44_100, 2, SampleLayout::F32Le).unwrap();
        assert!(!fmt.is_canonical());

        let fmt = NativeFormat::new(48_000, 2, SampleLayout::I16Le).unwrap();
        assert!(!fmt.is_canonical());
    }

    #[test]
    fn test_canonical_format_serialization() {
        let fmt = CanonicalFormat::default();
        let json = serde_json::to_string(&fmt).unwrap();
        assert!(json.contains("48000"));
        assert!(json.contains("f32"));
    }
}
