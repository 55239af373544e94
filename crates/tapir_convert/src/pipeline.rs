//! Conversion Pipeline
//!
//! Drives decode -> channel fold -> resample for one capture stream.
//! One [`Converter`] per session; it owns the resampler state and must be
//! fed buffers in capture order.

use tracing::debug;

use crate::channels::fold_to_stereo;
use crate::decode::decode_to_f32;
use crate::error::ConvertError;
use crate::format::{NativeFormat, CANONICAL_RATE};
use crate::resampler::{ResampleQuality, SincResampler};

/// Normalizes native PCM buffers to canonical 48 kHz stereo f32.
pub struct Converter {
    native: NativeFormat,
    resampler: Option<SincResampler>,
}

impl Converter {
    /// Build a converter for one native stream format.
    pub fn new(native: NativeFormat, quality: ResampleQuality) -> Self {
        let resampler = if native.rate != CANONICAL_RATE {
            debug!(
                "Resampling {} Hz -> {} Hz ({:?}, {} taps)",
                native.rate,
                CANONICAL_RATE,
                quality,
                quality.taps()
            );
            Some(SincResampler::new(native.rate, CANONICAL_RATE, quality))
        } else {
            None
        };
        Self { native, resampler }
    }

    /// The native format this converter was built for.
    pub fn native_format(&self) -> NativeFormat {
        self.native
    }

    /// Convert one native buffer to canonical bytes.
    ///
    /// Streaming: output of call N followed by call N+1 is continuous
    /// audio. An empty input yields an empty output.
    pub fn convert(&mut self, bytes: &[u8]) -> Result<Vec<u8>, ConvertError> {
        let frame_size = self.native.frame_size();
        if bytes.len() % frame_size != 0 {
            return Err(ConvertError::MalformedBuffer {
                len: bytes.len(),
                frame_size,
            });
        }
        if bytes.is_empty() {
            return Ok(Vec::new());
        }

        // Canonical input passes through untouched
        if self.native.is_canonical() {
            return Ok(bytes.to_vec());
        }

        let samples = decode_to_f32(bytes, self.native.layout);
        let stereo = fold_to_stereo(&samples, self.native.channels);
        let stereo = match &mut self.resampler {
            Some(rs) => rs.process(&stereo),
            None => stereo,
        };

        let mut out = Vec::with_capacity(stereo.len() * 4);
        for s in stereo {
            out.extend_from_slice(&s.to_le_bytes());
        }
        Ok(out)
    }
}
