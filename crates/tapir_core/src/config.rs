//! Session Configuration

use tapir_convert::ResampleQuality;
use tapir_platform::AdapterOptions;

/// Tunables for one capture session.
#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    /// Delivery queue depth in buffers; overflow drops the oldest.
    pub queue_capacity: usize,

    /// Resampler kernel length when the native rate is not 48 kHz.
    pub quality: ResampleQuality,

    /// Platform adapter knobs.
    pub adapter: AdapterOptions,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            quality: ResampleQuality::default(),
            adapter: AdapterOptions::default(),
        }
    }
}
