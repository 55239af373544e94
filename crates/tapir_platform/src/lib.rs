//! Tapir Platform - Per-Process Capture Adapters
//!
//! This crate binds to the OS facility that can hear a single process:
//!
//! | Platform | Mechanism                                   | Requires            |
//! |----------|---------------------------------------------|---------------------|
//! | Windows  | WASAPI Process Loopback activation          | Build 20348+        |
//! | Linux    | PulseAudio sink-input monitor (PipeWire ok) | pulse server        |
//! | macOS    | CoreAudio process tap                       | macOS 14.4+         |
//!
//! Each module implements the [`CaptureAdapter`] trait; [`open_adapter`]
//! is the compile-time dispatch the capture worker calls.

mod error;
mod traits;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "windows")]
pub mod windows;

#[cfg(target_os = "macos")]
pub mod macos;

pub use error::AdapterError;
pub use traits::{AdapterOptions, CaptureAdapter};

/// Open the capture adapter for the current OS against `pid`.
///
/// Errors surface exactly as the platform reports them: a missing
/// process, a too-old OS, a denied permission, or a dead audio subsystem.
pub fn open_adapter(
    pid: u32,
    options: &AdapterOptions,
) -> Result<Box<dyn CaptureAdapter>, AdapterError> {
    #[cfg(target_os = "windows")]
    {
        Ok(Box::new(windows::ProcessLoopbackCapture::open(
            pid, options,
        )?))
    }

    #[cfg(target_os = "linux")]
    {
        let _ = options;
        Ok(Box::new(linux::PulseMonitorCapture::open(pid)?))
    }

    #[cfg(target_os = "macos")]
    {
        let _ = options;
        Ok(Box::new(macos::ProcessTapCapture::open(pid)?))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
    {
        let _ = (pid, options);
        Err(AdapterError::UnsupportedOs(
            "no capture adapter for this target".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_nonexistent_pid_does_not_panic() {
        // PID 0 never owns an audio stream; every platform must turn this
        // into a typed error rather than a crash. On machines without an
        // audio server the subsystem error is equally acceptable.
        let result = open_adapter(0, &AdapterOptions::default());
        assert!(result.is_err());
    }
}
