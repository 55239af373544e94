//! Windows Version Detection
//!
//! Process loopback activation needs Windows 10 Build 20348 or later.
//! `GetVersionEx` reports manifest-compatibility versions, so we read the
//! real build from ntdll's `RtlGetVersion`.

use crate::error::AdapterError;

/// Windows version triple as reported by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowsVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
}

impl WindowsVersion {
    /// First build shipping `AUDIOCLIENT_PROCESS_LOOPBACK_PARAMS`.
    pub const MIN_PROCESS_LOOPBACK_BUILD: u32 = 20348;

    #[cfg(target_os = "windows")]
    pub fn current() -> Result<Self, AdapterError> {
        use std::mem;
        use windows::Win32::Foundation::STATUS_SUCCESS;
        use windows::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};
        use windows::Win32::System::SystemInformation::OSVERSIONINFOEXW;

        // SAFETY: ntdll is always loaded; RtlGetVersion fills the struct
        // whose size we set before the call.
        unsafe {
            let ntdll = GetModuleHandleW(windows::core::w!("ntdll.dll")).map_err(|e| {
                AdapterError::SubsystemError(format!("ntdll.dll not reachable: {}", e))
            })?;

            let proc = GetProcAddress(ntdll, windows::core::s!("RtlGetVersion")).ok_or_else(
                || AdapterError::SubsystemError("RtlGetVersion not found in ntdll".into()),
            )?;

            type RtlGetVersionFn = unsafe extern "system" fn(*mut OSVERSIONINFOEXW) -> i32;
            let rtl_get_version: RtlGetVersionFn = mem::transmute(proc);

            let mut info: OSVERSIONINFOEXW = mem::zeroed();
            info.dwOSVersionInfoSize = mem::size_of::<OSVERSIONINFOEXW>() as u32;

            let status = rtl_get_version(&mut info);
            if status != STATUS_SUCCESS.0 {
                return Err(AdapterError::SubsystemError(format!(
                    "RtlGetVersion failed: NTSTATUS 0x{:08X}",
                    status
                )));
            }

            Ok(Self {
                major: info.dwMajorVersion,
                minor: info.dwMinorVersion,
                build: info.dwBuildNumber,
            })
        }
    }

    /// Stub so the crate cross-compiles for tooling.
    #[cfg(not(target_os = "windows"))]
    pub fn current() -> Result<Self, AdapterError> {
        Err(AdapterError::UnsupportedOs(
            "Windows version detection is Windows-only".into(),
        ))
    }

    /// Whether the process loopback activation path exists on this build.
    pub fn supports_process_loopback(&self) -> bool {
        (self.major == 10 && self.build >= Self::MIN_PROCESS_LOOPBACK_BUILD) || self.major > 10
    }
}

impl std::fmt::Display for WindowsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Windows {}.{} (Build {})", self.major, self.minor, self.build)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_support_boundary() {
        let too_old = WindowsVersion { major: 10, minor: 0, build: 19045 };
        assert!(!too_old.supports_process_loopback());

        let exact = WindowsVersion { major: 10, minor: 0, build: 20348 };
        assert!(exact.supports_process_loopback());

        let win11 = WindowsVersion { major: 10, minor: 0, build: 22631 };
        assert!(win11.supports_process_loopback());
    }

    #[test]
    fn test_display() {
        let v = WindowsVersion { major: 10, minor: 0, build: 22000 };
        assert!(v.to_string().contains("22000"));
    }

    #[test]
    #[cfg(target_os = "windows")]
    fn test_current_detects_something() {
        let v = WindowsVersion::current().expect("should read version");
        assert!(v.major >= 10);
    }
}
