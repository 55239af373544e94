//! Process Loopback Activation
//!
//! `ActivateAudioInterfaceAsync` against the `VAD\Process_Loopback`
//! virtual device is the only way to get an `IAudioClient` scoped to one
//! process tree. The activation parameters travel inside a `VT_BLOB`
//! PROPVARIANT, and completion is signalled through a COM callback that
//! we bridge to a Win32 event for a synchronous wait.

use std::ffi::c_void;

use windows::core::{implement, Interface, PROPVARIANT};
use windows::Win32::Foundation::{CloseHandle, E_ACCESSDENIED, FALSE, HANDLE, TRUE};
use windows::Win32::Media::Audio::{
    ActivateAudioInterfaceAsync, IActivateAudioInterfaceAsyncOperation,
    IActivateAudioInterfaceCompletionHandler, IActivateAudioInterfaceCompletionHandler_Impl,
    IAudioClient, AUDIOCLIENT_ACTIVATION_PARAMS, AUDIOCLIENT_ACTIVATION_PARAMS_0,
    AUDIOCLIENT_ACTIVATION_TYPE_PROCESS_LOOPBACK, AUDIOCLIENT_PROCESS_LOOPBACK_PARAMS,
    PROCESS_LOOPBACK_MODE_EXCLUDE_TARGET_PROCESS_TREE,
    PROCESS_LOOPBACK_MODE_INCLUDE_TARGET_PROCESS_TREE, VIRTUAL_AUDIO_DEVICE_PROCESS_LOOPBACK,
};
use windows::Win32::System::Threading::{CreateEventW, SetEvent, WaitForSingleObject};

use crate::error::AdapterError;

/// Raw PROPVARIANT layout for VT_BLOB on x64. The `windows` crate's
/// PROPVARIANT wrapper has no blob constructor, so the activation params
/// are wrapped by hand and the pointer reinterpreted at the call site.
#[repr(C)]
struct PropVariantBlob {
    vt: u16,
    reserved1: u16,
    reserved2: u16,
    reserved3: u16,
    cb_size: u32,
    _pad: u32,
    blob_data: *const u8,
}

const VT_BLOB: u16 = 0x0041;

/// Bridges the async activation callback to a waitable event.
#[implement(IActivateAudioInterfaceCompletionHandler)]
struct ActivationHandler {
    /// HANDLE as isize so the struct stays Send-safe for COM
    event: isize,
}

impl IActivateAudioInterfaceCompletionHandler_Impl for ActivationHandler_Impl {
    fn ActivateCompleted(
        &self,
        _operation: Option<&IActivateAudioInterfaceAsyncOperation>,
    ) -> windows::core::Result<()> {
        // SAFETY: the event handle outlives the activation (closed only
        // after the wait below returns).
        unsafe {
            let _ = SetEvent(HANDLE(self.event as *mut c_void));
        }
        Ok(())
    }
}

/// Activate an audio client scoped to `pid`'s render audio.
///
/// `include_tree` selects whether child processes are captured too
/// (include mode) or everything *but* the target tree (exclude mode).
pub fn activate_process_loopback(
    pid: u32,
    include_tree: bool,
) -> Result<IAudioClient, AdapterError> {
    let mode = if include_tree {
        PROCESS_LOOPBACK_MODE_INCLUDE_TARGET_PROCESS_TREE
    } else {
        PROCESS_LOOPBACK_MODE_EXCLUDE_TARGET_PROCESS_TREE
    };

    let params = AUDIOCLIENT_ACTIVATION_PARAMS {
        ActivationType: AUDIOCLIENT_ACTIVATION_TYPE_PROCESS_LOOPBACK,
        Anonymous: AUDIOCLIENT_ACTIVATION_PARAMS_0 {
            ProcessLoopbackParams: AUDIOCLIENT_PROCESS_LOOPBACK_PARAMS {
                TargetProcessId: pid,
                ProcessLoopbackMode: mode,
            },
        },
    };

    let blob = PropVariantBlob {
        vt: VT_BLOB,
        reserved1: 0,
        reserved2: 0,
        reserved3: 0,
        cb_size: std::mem::size_of::<AUDIOCLIENT_ACTIVATION_PARAMS>() as u32,
        _pad: 0,
        blob_data: &params as *const _ as *const u8,
    };

    // SAFETY: blob and params stay on this stack frame for the whole
    // synchronous wait; the event handle is closed on every path.
    unsafe {
        let event = CreateEventW(None, TRUE, FALSE, None)
            .map_err(|e| AdapterError::SubsystemError(format!("CreateEventW: {}", e)))?;

        let handler: IActivateAudioInterfaceCompletionHandler = ActivationHandler {
            event: event.0 as isize,
        }
        .into();

        let operation = ActivateAudioInterfaceAsync(
            VIRTUAL_AUDIO_DEVICE_PROCESS_LOOPBACK,
            &IAudioClient::IID,
            Some(&blob as *const PropVariantBlob as *const PROPVARIANT),
            &handler,
        );

        let operation = match operation {
            Ok(op) => op,
            Err(e) => {
                let _ = CloseHandle(event);
                return Err(AdapterError::SubsystemError(format!(
                    "ActivateAudioInterfaceAsync: {}",
                    e
                )));
            }
        };

        let _ = WaitForSingleObject(event, 5000);
        let _ = CloseHandle(event);

        let mut hr = windows::core::HRESULT(0);
        let mut interface: Option<windows::core::IUnknown> = None;
        operation
            .GetActivateResult(&mut hr, &mut interface)
            .map_err(|e| AdapterError::SubsystemError(format!("GetActivateResult: {}", e)))?;

        if let Err(e) = hr.ok() {
            if hr == E_ACCESSDENIED {
                return Err(AdapterError::PermissionDenied(format!(
                    "loopback activation for PID {} denied: {}",
                    pid, e
                )));
            }
            return Err(AdapterError::SubsystemError(format!(
                "loopback activation for PID {} failed: {}",
                pid, e
            )));
        }

        interface
            .ok_or_else(|| {
                AdapterError::SubsystemError("activation returned no audio client".into())
            })?
            .cast::<IAudioClient>()
            .map_err(|e| AdapterError::SubsystemError(format!("IAudioClient cast: {}", e)))
    }
}
