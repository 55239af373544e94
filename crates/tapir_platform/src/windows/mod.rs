//! Windows Adapter - WASAPI Process Loopback
//!
//! Captures only what one process (tree) renders, via the
//! `VAD\Process_Loopback` activation path available since Build 20348.
//!
//! ```text
//! open ──► COM init ──► version gate ──► PID check
//!            │
//!            ├─► default endpoint mix format  (native descriptor)
//!            └─► ActivateAudioInterfaceAsync  (process-scoped client)
//!                     │
//! read ◄── event wait (10 ms) ◄── Initialize(event-driven, autoconvert)
//! ```
//!
//! The loopback virtual device has no mix format of its own, so the
//! client is initialized with the default render endpoint's mix format
//! and `AUTOCONVERTPCM`; that format is what we report as native. A
//! default-endpoint switch mid-session is tolerated but not chased - the
//! caller restarts if it wants the new device.

pub mod activate;
pub mod com;
pub mod process;
pub mod version;

use std::ffi::c_void;

use tracing::{debug, info, warn};

use tapir_convert::{NativeFormat, SampleLayout};

use crate::error::AdapterError;
use crate::traits::{AdapterOptions, CaptureAdapter};

use windows::Win32::Foundation::{CloseHandle, FALSE, HANDLE, WAIT_OBJECT_0};
use windows::Win32::Media::Audio::{
    eConsole, eRender, IAudioCaptureClient, IAudioClient, IMMDeviceEnumerator, MMDeviceEnumerator,
    AUDCLNT_SHAREMODE_SHARED, AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM,
    AUDCLNT_STREAMFLAGS_EVENTCALLBACK, AUDCLNT_STREAMFLAGS_SRC_DEFAULT_QUALITY, WAVEFORMATEX,
    WAVEFORMATEXTENSIBLE,
};
use windows::Win32::System::Com::{CoCreateInstance, CoTaskMemFree, CLSCTX_ALL};
use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject};

const WAVE_FORMAT_PCM: u16 = 1;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 3;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// AUDCLNT_BUFFERFLAGS_SILENT
const BUFFER_FLAG_SILENT: u32 = 0x2;

/// How long one read waits for the capture event.
const READ_WAIT_MS: u32 = 10;

/// Per-process loopback capture stream.
pub struct ProcessLoopbackCapture {
    client: IAudioClient,
    capture_client: IAudioCaptureClient,
    event: HANDLE,
    native: NativeFormat,
    frame_size: usize,
    started: bool,
    closed: bool,
}

impl ProcessLoopbackCapture {
    /// Open a loopback client bound to `pid`'s process tree.
    pub fn open(pid: u32, options: &AdapterOptions) -> Result<Self, AdapterError> {
        com::ensure_com_initialized()?;

        let os = version::WindowsVersion::current()?;
        if !os.supports_process_loopback() {
            return Err(AdapterError::UnsupportedOs(format!(
                "process loopback needs Build {}+, running {}",
                version::WindowsVersion::MIN_PROCESS_LOOPBACK_BUILD,
                os
            )));
        }

        if !process::process_exists(pid) {
            return Err(AdapterError::ProcessNotFound(pid));
        }

        // The loopback virtual device rejects GetMixFormat; the engine's
        // mix format comes from the default render endpoint instead.
        // SAFETY: format_ptr is freed after Initialize consumes it.
        unsafe {
            let enumerator: IMMDeviceEnumerator =
                CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL).map_err(|e| {
                    AdapterError::SubsystemUnavailable(format!("device enumerator: {}", e))
                })?;

            let device = enumerator
                .GetDefaultAudioEndpoint(eRender, eConsole)
                .map_err(|e| {
                    AdapterError::SubsystemUnavailable(format!("no default render endpoint: {}", e))
                })?;

            let probe: IAudioClient = device.Activate(CLSCTX_ALL, None).map_err(|e| {
                AdapterError::SubsystemError(format!("endpoint activation: {}", e))
            })?;

            let format_ptr = probe
                .GetMixFormat()
                .map_err(|e| AdapterError::SubsystemError(format!("GetMixFormat: {}", e)))?;

            let native = match parse_wave_format(format_ptr) {
                Ok(f) => f,
                Err(e) => {
                    CoTaskMemFree(Some(format_ptr as *const c_void));
                    return Err(e);
                }
            };

            debug!("Render mix format: {}", native);

            let client = match activate::activate_process_loopback(
                pid,
                options.include_process_tree,
            ) {
                Ok(c) => c,
                Err(e) => {
                    CoTaskMemFree(Some(format_ptr as *const c_void));
                    return Err(e);
                }
            };

            // 200 ms buffer in 100 ns units; AUTOCONVERTPCM lets the
            // engine hand us the endpoint format regardless of what the
            // session renders in.
            let init = client.Initialize(
                AUDCLNT_SHAREMODE_SHARED,
                AUDCLNT_STREAMFLAGS_EVENTCALLBACK
                    | AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM
                    | AUDCLNT_STREAMFLAGS_SRC_DEFAULT_QUALITY,
                2_000_000,
                0,
                format_ptr,
                None,
            );

            CoTaskMemFree(Some(format_ptr as *const c_void));
            init.map_err(|e| AdapterError::SubsystemError(format!("Initialize: {}", e)))?;

            let event = CreateEventW(None, FALSE, FALSE, None)
                .map_err(|e| AdapterError::SubsystemError(format!("CreateEventW: {}", e)))?;

            if let Err(e) = client.SetEventHandle(event) {
                let _ = CloseHandle(event);
                return Err(AdapterError::SubsystemError(format!("SetEventHandle: {}", e)));
            }

            let capture_client: IAudioCaptureClient = match client.GetService() {
                Ok(c) => c,
                Err(e) => {
                    let _ = CloseHandle(event);
                    return Err(AdapterError::SubsystemError(format!(
                        "IAudioCaptureClient: {}",
                        e
                    )));
                }
            };

            info!("Process loopback open for PID {} ({})", pid, native);

            Ok(Self {
                client,
                capture_client,
                event,
                native,
                frame_size: native.frame_size(),
                started: false,
                closed: false,
            })
        }
    }
}

impl CaptureAdapter for ProcessLoopbackCapture {
    fn native_format(&self) -> NativeFormat {
        self.native
    }

    fn start(&mut self) -> Result<(), AdapterError> {
        if self.started {
            return Err(AdapterError::AlreadyStarted);
        }
        // SAFETY: client initialized in open.
        unsafe {
            self.client
                .Start()
                .map_err(|e| AdapterError::SubsystemError(format!("Start: {}", e)))?;
        }
        self.started = true;
        Ok(())
    }

    fn read(&mut self) -> Result<Vec<u8>, AdapterError> {
        if !self.started || self.closed {
            return Ok(Vec::new());
        }

        // SAFETY: buffers returned by GetBuffer are valid until the
        // matching ReleaseBuffer; we copy before releasing.
        unsafe {
            let wait = WaitForSingleObject(self.event, READ_WAIT_MS);
            if wait != WAIT_OBJECT_0 {
                return Ok(Vec::new());
            }

            let mut out = Vec::new();

            // Drain every packet queued behind this wake
            loop {
                let packet = match self.capture_client.GetNextPacketSize() {
                    Ok(n) => n,
                    Err(e) => {
                        if self.closed {
                            return Ok(Vec::new());
                        }
                        return Err(AdapterError::SubsystemError(format!(
                            "GetNextPacketSize: {}",
                            e
                        )));
                    }
                };
                if packet == 0 {
                    break;
                }

                let mut data: *mut u8 = std::ptr::null_mut();
                let mut frames: u32 = 0;
                let mut flags: u32 = 0;

                if self
                    .capture_client
                    .GetBuffer(&mut data, &mut frames, &mut flags, None, None)
                    .is_err()
                    || frames == 0
                {
                    break;
                }

                let bytes = frames as usize * self.frame_size;
                if flags & BUFFER_FLAG_SILENT != 0 {
                    out.resize(out.len() + bytes, 0);
                } else {
                    out.extend_from_slice(std::slice::from_raw_parts(data, bytes));
                }

                let _ = self.capture_client.ReleaseBuffer(frames);
            }

            Ok(out)
        }
    }

    fn stop(&mut self) {
        if self.started {
            // SAFETY: Stop on a started client.
            unsafe {
                if let Err(e) = self.client.Stop() {
                    warn!("IAudioClient::Stop: {}", e);
                }
            }
            self.started = false;
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.stop();
        // SAFETY: event handle created in open, closed exactly once.
        unsafe {
            let _ = CloseHandle(self.event);
        }
        self.closed = true;
        debug!("Process loopback closed");
    }
}

impl Drop for ProcessLoopbackCapture {
    fn drop(&mut self) {
        self.close();
    }
}

/// Decode a WAVEFORMATEX(TENSIBLE) into the engine's native descriptor.
///
/// # Safety
///
/// `ptr` must point at a WAVEFORMATEX with trailing cbSize bytes intact.
unsafe fn parse_wave_format(ptr: *const WAVEFORMATEX) -> Result<NativeFormat, AdapterError> {
    let fmt = &*ptr;
    let rate = fmt.nSamplesPerSec;
    let channels = fmt.nChannels;
    let bits = fmt.wBitsPerSample;

    let layout = match fmt.wFormatTag {
        WAVE_FORMAT_IEEE_FLOAT => SampleLayout::F32Le,
        WAVE_FORMAT_PCM => pcm_layout(bits, bits)?,
        WAVE_FORMAT_EXTENSIBLE => {
            let ext = &*(ptr as *const WAVEFORMATEXTENSIBLE);
            let valid_bits = ext.Samples.wValidBitsPerSample;
            // SubFormat GUIDs reuse the classic tag in data1
            match ext.SubFormat.data1 {
                x if x == WAVE_FORMAT_IEEE_FLOAT as u32 => SampleLayout::F32Le,
                x if x == WAVE_FORMAT_PCM as u32 => pcm_layout(bits, valid_bits)?,
                other => {
                    return Err(AdapterError::SubsystemError(format!(
                        "unknown WAVEFORMATEXTENSIBLE subformat 0x{:08x}",
                        other
                    )))
                }
            }
        }
        other => {
            return Err(AdapterError::SubsystemError(format!(
                "unknown wave format tag {}",
                other
            )))
        }
    };

    NativeFormat::new(rate, channels, layout)
        .map_err(|e| AdapterError::SubsystemError(format!("mix format: {}", e)))
}

fn pcm_layout(container_bits: u16, valid_bits: u16) -> Result<SampleLayout, AdapterError> {
    match (container_bits, valid_bits) {
        (16, _) => Ok(SampleLayout::I16Le),
        (24, _) => Ok(SampleLayout::I24Le),
        (32, 24) => Ok(SampleLayout::I24In32Le),
        (32, _) => Ok(SampleLayout::I32Le),
        _ => Err(AdapterError::SubsystemError(format!(
            "unsupported PCM width {} ({} valid)",
            container_bits, valid_bits
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_layout_mapping() {
        assert_eq!(pcm_layout(16, 16).unwrap(), SampleLayout::I16Le);
        assert_eq!(pcm_layout(24, 24).unwrap(), SampleLayout::I24Le);
        assert_eq!(pcm_layout(32, 24).unwrap(), SampleLayout::I24In32Le);
        assert_eq!(pcm_layout(32, 32).unwrap(), SampleLayout::I32Le);
        assert!(pcm_layout(8, 8).is_err());
    }

    #[test]
    fn test_open_rejects_dead_pid() {
        // Either the version gate or the PID check must fire; a crash or
        // a hang here would take down the capture worker.
        let result = ProcessLoopbackCapture::open(u32::MAX - 1, &AdapterOptions::default());
        assert!(result.is_err());
    }
}
