//! Sample Decoding
//!
//! Turns raw little-endian PCM bytes into interleaved f32 samples.
//! Integer formats are scaled by the format's positive maximum, so +max
//! maps to exactly +1.0; the extra negative value (e.g. -32768 for i16)
//! lands just below -1.0 and is clipped to -1.0 exactly.

use crate::format::SampleLayout;

const I16_MAX: f32 = 32_767.0;
const I24_MAX: f32 = 8_388_607.0;
const I32_MAX: f32 = 2_147_483_647.0;

/// Decode one buffer of raw PCM into f32 samples.
///
/// The caller is responsible for ensuring `bytes.len()` is a multiple of
/// the sample size (the [`Converter`](crate::Converter) validates whole
/// frames before calling this).
pub fn decode_to_f32(bytes: &[u8], layout: SampleLayout) -> Vec<f32> {
    match layout {
        SampleLayout::I16Le => bytes
            .chunks_exact(2)
            .map(|b| {
                let v = i16::from_le_bytes([b[0], b[1]]);
                (v as f32 / I16_MAX).max(-1.0)
            })
            .collect(),
        SampleLayout::I24Le => bytes
            .chunks_exact(3)
            .map(|b| {
                // Sign-extend 3 little-endian bytes through the i32 high byte
                let v = i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8;
                (v as f32 / I24_MAX).max(-1.0)
            })
            .collect(),
        SampleLayout::I24In32Le => bytes
            .chunks_exact(4)
            .map(|b| {
                let v = i32::from_le_bytes([b[0], b[1], b[2], b[3]]) >> 8;
                (v as f32 / I24_MAX).max(-1.0)
            })
            .collect(),
        SampleLayout::I32Le => bytes
            .chunks_exact(4)
            .map(|b| {
                let v = i32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                (v as f64 / I32_MAX as f64).max(-1.0) as f32
            })
            .collect(),
        SampleLayout::F32Le => bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    }
}
