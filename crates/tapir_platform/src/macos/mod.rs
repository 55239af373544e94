//! macOS Adapter - CoreAudio Process Tap
//!
//! macOS 14.4 introduced `AudioHardwareCreateProcessTap`, the first
//! supported way to hear one process without a HAL plugin:
//!
//! 1. describe a tap for the target PID (unmuted - the target keeps
//!    playing to its device),
//! 2. create the tap and read its UID,
//! 3. wrap the tap in a private aggregate device,
//! 4. pull samples through an IO proc into a lock-free ring.
//!
//! The OS prompts for audio-capture permission on first tap creation;
//! a denial surfaces as `PermissionDenied`. Older systems fail the
//! version gate with `UnsupportedOs` before any FFI is reached.

mod ring;
mod tap_ffi;

use std::ffi::c_void;
use std::sync::Arc;

use tracing::{debug, info, warn};

use tapir_convert::{NativeFormat, SampleLayout};

use crate::error::AdapterError;
use crate::traits::CaptureAdapter;

use ring::SampleRing;
use tap_ffi::{
    create_aggregate_description, create_tap_description, get_tap_stream_format, get_tap_uid,
    AudioBufferList, AudioDeviceCreateIOProcID, AudioDeviceDestroyIOProcID, AudioDeviceID,
    AudioDeviceIOProcID, AudioDeviceStart, AudioDeviceStop, AudioHardwareCreateAggregateDevice,
    AudioHardwareCreateProcessTap, AudioHardwareDestroyAggregateDevice,
    AudioHardwareDestroyProcessTap, AudioHardwareTapID, AudioTimeStamp, CFRelease, CFTypeRef,
};

/// OSStatus 'who4' - not authorized.
const STATUS_NOT_AUTHORIZED: u32 = 0x7768_6F34;
/// OSStatus 'what' - unspecified, in practice permission-related.
const STATUS_UNSPECIFIED: u32 = 0x7768_6174;
/// paramErr - bad parameters, typically a process with no audio.
const STATUS_PARAM_ERR: i32 = -50;

/// Minimum macOS for the tap API.
const MIN_MACOS: (u32, u32) = (14, 4);

/// Current macOS version via `sw_vers -productVersion`.
fn macos_version() -> (u32, u32, u32) {
    let output = std::process::Command::new("sw_vers")
        .arg("-productVersion")
        .output()
        .ok();

    if let Some(output) = output {
        if output.status.success() {
            let text = String::from_utf8_lossy(&output.stdout);
            let mut parts = text.trim().split('.');
            let major = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            let minor = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            let patch = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            return (major, minor, patch);
        }
    }
    (0, 0, 0)
}

/// Whether the process tap API exists on this system.
pub fn is_process_tap_available() -> bool {
    let (major, minor, _) = macos_version();
    major > MIN_MACOS.0 || (major == MIN_MACOS.0 && minor >= MIN_MACOS.1)
}

fn process_exists(pid: u32) -> bool {
    // Signal 0 probes without delivering; EPERM still means alive
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Context handed to the IO proc; must outlive the registration.
struct IoProcContext {
    ring: Arc<SampleRing>,
}

/// Real-time callback: copy the tap's f32 buffers into the ring.
extern "C" fn tap_io_proc(
    _device: AudioDeviceID,
    _now: *const AudioTimeStamp,
    input: *const AudioBufferList,
    _input_time: *const AudioTimeStamp,
    _output: *mut AudioBufferList,
    _output_time: *const AudioTimeStamp,
    client_data: *mut c_void,
) -> i32 {
    if client_data.is_null() || input.is_null() {
        return 0;
    }

    // SAFETY: CoreAudio guarantees the list is valid for the callback.
    // AudioBufferList carries 4 bytes of alignment padding after
    // mNumberBuffers on 64-bit, so the AudioBuffer array starts at
    // offset 8 with a 16-byte stride; read fields unaligned.
    unsafe {
        let context = &*(client_data as *const IoProcContext);
        let list = &*input;

        for i in 0..list.mNumberBuffers {
            let base = (list as *const AudioBufferList as *const u8).add(8 + i as usize * 16);
            let byte_size = std::ptr::read_unaligned(base.add(4) as *const u32);
            let data = std::ptr::read_unaligned(base.add(8) as *const *mut c_void);

            if data.is_null() || byte_size == 0 {
                continue;
            }

            let samples = std::slice::from_raw_parts(
                data as *const f32,
                byte_size as usize / std::mem::size_of::<f32>(),
            );
            context.ring.write(samples);
        }
    }

    0
}

/// Process tap capture for one target PID.
pub struct ProcessTapCapture {
    tap_id: AudioHardwareTapID,
    aggregate_id: AudioDeviceID,
    io_proc: AudioDeviceIOProcID,
    /// Kept alive while the IO proc is registered
    context: Option<Box<IoProcContext>>,
    ring: Arc<SampleRing>,
    native: NativeFormat,
    pid: u32,
    started: bool,
    closed: bool,
}

impl ProcessTapCapture {
    /// Create the tap and its aggregate device for `pid`.
    pub fn open(pid: u32) -> Result<Self, AdapterError> {
        if !is_process_tap_available() {
            let (major, minor, patch) = macos_version();
            return Err(AdapterError::UnsupportedOs(format!(
                "process taps need macOS {}.{}+, running {}.{}.{}",
                MIN_MACOS.0, MIN_MACOS.1, major, minor, patch
            )));
        }

        if !process_exists(pid) {
            return Err(AdapterError::ProcessNotFound(pid));
        }

        // SAFETY: FFI calls follow the documented tap lifecycle; every
        // CF object created here is released on all paths.
        unsafe {
            let description = create_tap_description(pid);
            let mut tap_id: AudioHardwareTapID = 0;
            let status = AudioHardwareCreateProcessTap(description as CFTypeRef, &mut tap_id);
            CFRelease(description as CFTypeRef);

            if status != 0 {
                return Err(match status as u32 {
                    STATUS_NOT_AUTHORIZED | STATUS_UNSPECIFIED => AdapterError::PermissionDenied(
                        "system audio recording not authorized; grant it in Privacy & Security \
                         and restart"
                            .into(),
                    ),
                    _ if status == STATUS_PARAM_ERR => AdapterError::NoAudioOutput(pid),
                    _ => AdapterError::SubsystemError(format!(
                        "AudioHardwareCreateProcessTap: OSStatus {} (0x{:08x})",
                        status, status as u32
                    )),
                });
            }
            debug!("Created tap {} for PID {}", tap_id, pid);

            let tap_uid = match get_tap_uid(tap_id) {
                Some(uid) => uid,
                None => {
                    AudioHardwareDestroyProcessTap(tap_id);
                    return Err(AdapterError::SubsystemError(
                        "tap created but its UID is unreadable".into(),
                    ));
                }
            };

            // Format query may fail harmlessly; taps deliver f32 either way
            let native = match get_tap_stream_format(tap_id) {
                Some(f) if f.mSampleRate > 0.0 && f.mChannelsPerFrame > 0 => NativeFormat::new(
                    f.mSampleRate as u32,
                    f.mChannelsPerFrame.min(8) as u16,
                    SampleLayout::F32Le,
                ),
                _ => NativeFormat::new(48_000, 2, SampleLayout::F32Le),
            }
            .map_err(|e| AdapterError::SubsystemError(format!("tap format: {}", e)))?;

            let agg_description =
                create_aggregate_description(&tap_uid, &format!("Tapir Tap (PID {})", pid));
            if agg_description.is_null() {
                AudioHardwareDestroyProcessTap(tap_id);
                return Err(AdapterError::SubsystemError(
                    "aggregate description allocation failed".into(),
                ));
            }

            let mut aggregate_id: AudioDeviceID = 0;
            let status =
                AudioHardwareCreateAggregateDevice(agg_description as CFTypeRef, &mut aggregate_id);
            CFRelease(agg_description as CFTypeRef);

            if status != 0 {
                AudioHardwareDestroyProcessTap(tap_id);
                return Err(AdapterError::SubsystemError(format!(
                    "AudioHardwareCreateAggregateDevice: OSStatus {}",
                    status
                )));
            }

            // Two seconds of headroom between the IO proc and the reader
            let ring = Arc::new(SampleRing::new(
                native.rate as usize * native.channels as usize * 2,
            ));

            info!("Process tap open for PID {} ({})", pid, native);

            Ok(Self {
                tap_id,
                aggregate_id,
                io_proc: std::ptr::null_mut(),
                context: None,
                ring,
                native,
                pid,
                started: false,
                closed: false,
            })
        }
    }
}

impl CaptureAdapter for ProcessTapCapture {
    fn native_format(&self) -> NativeFormat {
        self.native
    }

    fn start(&mut self) -> Result<(), AdapterError> {
        if self.started {
            return Err(AdapterError::AlreadyStarted);
        }

        let context = Box::new(IoProcContext {
            ring: Arc::clone(&self.ring),
        });
        let context_ptr = Box::into_raw(context);

        // SAFETY: context_ptr stays valid until the IO proc is destroyed;
        // reclaimed below on failure and in stop() on success.
        unsafe {
            let mut proc_id: AudioDeviceIOProcID = std::ptr::null_mut();
            let status = AudioDeviceCreateIOProcID(
                self.aggregate_id,
                tap_io_proc,
                context_ptr as *mut c_void,
                &mut proc_id,
            );
            if status != 0 {
                drop(Box::from_raw(context_ptr));
                return Err(AdapterError::SubsystemError(format!(
                    "AudioDeviceCreateIOProcID: OSStatus {}",
                    status
                )));
            }

            let status = AudioDeviceStart(self.aggregate_id, proc_id);
            if status != 0 {
                AudioDeviceDestroyIOProcID(self.aggregate_id, proc_id);
                drop(Box::from_raw(context_ptr));
                return Err(AdapterError::SubsystemError(format!(
                    "AudioDeviceStart: OSStatus {}",
                    status
                )));
            }

            self.io_proc = proc_id;
            self.context = Some(Box::from_raw(context_ptr));
        }

        self.started = true;
        debug!("Tap IO proc running for PID {}", self.pid);
        Ok(())
    }

    fn read(&mut self) -> Result<Vec<u8>, AdapterError> {
        if !self.started || self.closed {
            return Ok(Vec::new());
        }

        let available = self.ring.available();
        if available == 0 {
            return Ok(Vec::new());
        }

        let mut samples = vec![0.0f32; available];
        let read = self.ring.read(&mut samples);
        samples.truncate(read);

        let mut out = Vec::with_capacity(read * 4);
        for s in samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        Ok(out)
    }

    fn stop(&mut self) {
        if self.started && !self.io_proc.is_null() {
            // SAFETY: proc registered in start on this aggregate.
            unsafe {
                let status = AudioDeviceStop(self.aggregate_id, self.io_proc);
                if status != 0 {
                    warn!("AudioDeviceStop: OSStatus {}", status);
                }
                let status = AudioDeviceDestroyIOProcID(self.aggregate_id, self.io_proc);
                if status != 0 {
                    warn!("AudioDeviceDestroyIOProcID: OSStatus {}", status);
                }
            }
            self.io_proc = std::ptr::null_mut();
            self.context = None;
            self.started = false;
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.stop();

        // Tear down in reverse creation order
        // SAFETY: ids created in open, destroyed exactly once.
        unsafe {
            if self.aggregate_id != 0 {
                let status = AudioHardwareDestroyAggregateDevice(self.aggregate_id);
                if status != 0 {
                    warn!("AudioHardwareDestroyAggregateDevice: OSStatus {}", status);
                }
                self.aggregate_id = 0;
            }
            if self.tap_id != 0 {
                let status = AudioHardwareDestroyProcessTap(self.tap_id);
                if status != 0 {
                    warn!("AudioHardwareDestroyProcessTap: OSStatus {}", status);
                }
                self.tap_id = 0;
            }
        }
        self.closed = true;
        debug!("Process tap closed for PID {}", self.pid);
    }
}

impl Drop for ProcessTapCapture {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse() {
        let (major, _, _) = macos_version();
        // On macOS this is >= 10; elsewhere sw_vers is absent and we get 0
        assert!(major == 0 || major >= 10);
    }

    #[test]
    fn test_availability_consistent_with_version() {
        let (major, minor, _) = macos_version();
        let available = is_process_tap_available();
        if major > 14 || (major == 14 && minor >= 4) {
            assert!(available);
        } else {
            assert!(!available);
        }
    }

    #[test]
    fn test_own_process_exists() {
        assert!(process_exists(std::process::id()));
    }

    #[test]
    fn test_open_on_old_macos_is_unsupported() {
        if !is_process_tap_available() {
            let err = ProcessTapCapture::open(1).unwrap_err();
            assert!(matches!(err, AdapterError::UnsupportedOs(_)));
        }
    }
}
