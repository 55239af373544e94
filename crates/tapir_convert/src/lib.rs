//! Tapir Convert - PCM Normalization Pipeline
//!
//! This crate turns whatever PCM a capture adapter hands us into the one
//! format every consumer sees:
//! - 48 000 Hz sample rate
//! - 2 channels, interleaved left/right
//! - 32-bit IEEE float, little-endian, nominally in [-1.0, +1.0]
//!
//! # Architecture
//!
//! ```text
//! native bytes ──► decode (int → f32) ──► channel fold (N → 2)
//!                                              │
//!              canonical bytes ◄── emit ◄── resample (rate → 48 kHz)
//! ```
//!
//! The [`Converter`] is stateful: the resampler carries its fractional
//! phase and a tail of input samples across calls, so feeding a stream
//! buffer-by-buffer produces the same bytes as feeding it at once.

mod channels;
mod decode;
mod encode;
mod error;
mod format;
mod pipeline;
mod resampler;

pub use channels::fold_to_stereo;
pub use decode::decode_to_f32;
pub use encode::{encode_i16, encode_i24, encode_i32};
pub use error::ConvertError;
pub use format::{
    CanonicalFormat, NativeFormat, SampleLayout, BYTES_PER_FRAME, CANONICAL_CHANNELS,
    CANONICAL_RATE,
};
pub use pipeline::Converter;
pub use resampler::{ResampleQuality, SincResampler};
