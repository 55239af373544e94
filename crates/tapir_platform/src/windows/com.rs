//! COM Initialization
//!
//! WASAPI requires COM on every thread that touches it. The capture
//! worker is the only thread that does, so we keep one guard per thread
//! in a thread-local and uninitialize when the thread winds down.

use std::cell::RefCell;

use crate::error::AdapterError;

/// RAII guard pairing `CoInitializeEx` with `CoUninitialize`.
///
/// Not `Send`/`Sync`: COM initialization is thread-local state.
struct ComGuard {
    _not_send_sync: std::marker::PhantomData<*const ()>,
}

impl ComGuard {
    #[cfg(target_os = "windows")]
    fn new() -> Result<Self, AdapterError> {
        use windows::Win32::System::Com::{CoInitializeEx, COINIT_MULTITHREADED};

        // SAFETY: CoInitializeEx is sound to call on any thread; S_FALSE
        // (already initialized) counts as success.
        unsafe {
            let hr = CoInitializeEx(None, COINIT_MULTITHREADED);
            if hr.is_err() {
                return Err(AdapterError::SubsystemUnavailable(format!(
                    "COM initialization failed: {:?}",
                    hr
                )));
            }
        }

        tracing::trace!("COM initialized for {:?}", std::thread::current().id());

        Ok(Self {
            _not_send_sync: std::marker::PhantomData,
        })
    }

    #[cfg(not(target_os = "windows"))]
    fn new() -> Result<Self, AdapterError> {
        Err(AdapterError::UnsupportedOs("COM is Windows-only".into()))
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        #[cfg(target_os = "windows")]
        // SAFETY: balances the CoInitializeEx in new(), same thread.
        unsafe {
            windows::Win32::System::Com::CoUninitialize();
        }
    }
}

thread_local! {
    static THREAD_COM: RefCell<Option<ComGuard>> = const { RefCell::new(None) };
}

/// Initialize COM for the calling thread, once, for the thread's lifetime.
pub fn ensure_com_initialized() -> Result<(), AdapterError> {
    THREAD_COM.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_none() {
            *slot = Some(ComGuard::new()?);
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_os = "windows")]
    fn test_com_initializes_once_per_thread() {
        assert!(ensure_com_initialized().is_ok());
        // Second call is a no-op, not a double init
        assert!(ensure_com_initialized().is_ok());
    }
}
