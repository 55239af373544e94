//! Integer Downconversion
//!
//! The canonical pipeline emits float and never clips; clipping applies
//! only here, when a caller asks for integer output (adapters that feed
//! integer-only sinks, and the round-trip tests).

/// Clamp to the nominal range before integer scaling.
#[inline]
fn clip(sample: f32) -> f32 {
    sample.clamp(-1.0, 1.0)
}

/// Encode f32 samples as little-endian i16 bytes.
pub fn encode_i16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (clip(s) * 32_767.0).round() as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Encode f32 samples as packed little-endian 24-bit bytes.
pub fn encode_i24(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 3);
    for &s in samples {
        let v = (clip(s) * 8_388_607.0).round() as i32;
        let b = v.to_le_bytes();
        out.extend_from_slice(&b[..3]);
    }
    out
}

/// Encode f32 samples as little-endian i32 bytes.
pub fn encode_i32(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 4);
    for &s in samples {
        let v = (clip(s) as f64 * 2_147_483_647.0).round() as i32;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode_to_f32;
    use crate::format::SampleLayout;

    #[test]
    fn test_clipping_only_on_integer_output() {
        let bytes = encode_i16(&[1.5, -2.0]);
        let decoded = decode_to_f32(&bytes, SampleLayout::I16Le);
        assert_eq!(decoded[0], 1.0);
        assert_eq!(decoded[1], -1.0);
    }

    #[test]
    fn test_i16_round_trip_within_one_lsb() {
        let original: Vec<i16> = vec![0, 1, -1, 100, -100, 12_345, -12_345, 32_767, -32_768];
        let bytes: Vec<u8> = original.iter().flat_map(|v| v.to_le_bytes()).collect();

        let floats = decode_to_f32(&bytes, SampleLayout::I16Le);
        let back = encode_i16(&floats);

        for (i, chunk) in back.chunks_exact(2).enumerate() {
            let v = i16::from_le_bytes([chunk[0], chunk[1]]);
            let diff = (v as i32 - original[i] as i32).abs();
            assert!(diff <= 1, "sample {}: {} vs {}", i, v, original[i]);
        }
    }

    #[test]
    fn test_i24_round_trip_within_one_lsb() {
        let original: Vec<i32> = vec![0, 8_388_607, -8_388_608, 1_000_000, -1_000_000];
        let mut bytes = Vec::new();
        for v in &original {
            bytes.extend_from_slice(&v.to_le_bytes()[..3]);
        }

        let floats = decode_to_f32(&bytes, SampleLayout::I24Le);
        let back = encode_i24(&floats);

        for (i, chunk) in back.chunks_exact(3).enumerate() {
            let v = i32::from_le_bytes([0, chunk[0], chunk[1], chunk[2]]) >> 8;
            let diff = (v - original[i]).abs();
            assert!(diff <= 1, "sample {}: {} vs {}", i, v, original[i]);
        }
    }
}
