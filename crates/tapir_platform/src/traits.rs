//! Capture Adapter Contract
//!
//! Every platform implements the same small surface: open against a PID,
//! start, poll for raw native-format buffers, stop, close. The capture
//! worker in `tapir_core` drives this loop; adapters never see the
//! canonical format.

use serde::{Deserialize, Serialize};

use tapir_convert::NativeFormat;

use crate::error::AdapterError;

/// Per-session adapter knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdapterOptions {
    /// Windows process loopback: capture the target's child processes too.
    pub include_process_tree: bool,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            include_process_tree: true,
        }
    }
}

/// One platform's capture path for a single target process.
///
/// Adapters are created, used and closed on the capture worker thread, so
/// the trait deliberately carries no `Send` bound: the Linux adapter owns
/// a PulseAudio mainloop that must never cross threads.
///
/// Contract:
/// - [`read`](CaptureAdapter::read) returns an empty buffer when no data
///   is pending; "no data" is never an error. A silent or exited target
///   just reads empty forever - terminating is the caller's policy.
/// - [`close`](CaptureAdapter::close) is idempotent and releases every OS
///   handle; reads after close return empty.
pub trait CaptureAdapter {
    /// The format the OS delivers, fixed at open time.
    fn native_format(&self) -> NativeFormat;

    /// Begin capturing.
    fn start(&mut self) -> Result<(), AdapterError>;

    /// Drain whatever the OS has buffered, waiting at most ~10 ms.
    fn read(&mut self) -> Result<Vec<u8>, AdapterError>;

    /// Pause capturing; the handle stays open.
    fn stop(&mut self);

    /// Release all OS resources. Idempotent.
    fn close(&mut self);
}
