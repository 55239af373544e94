//! CoreAudio Process Tap FFI (macOS 14.4+)
//!
//! Raw bindings for `AudioHardwareCreateProcessTap` and the aggregate
//! device plumbing, plus the CFDictionary builders the tap and aggregate
//! descriptions are made of. Use the safe wrapper in the parent module.

#![allow(non_upper_case_globals)]
#![allow(non_snake_case)]

use std::ffi::c_void;

pub use coreaudio_sys::{
    kAudioObjectPropertyElementMain, kAudioObjectPropertyScopeGlobal, AudioDeviceID,
    AudioObjectGetPropertyData, AudioObjectGetPropertyDataSize, AudioObjectID,
    AudioObjectPropertyAddress, OSStatus,
};

pub type CFStringRef = *const c_void;
pub type CFDictionaryRef = *const c_void;
pub type CFMutableDictionaryRef = *mut c_void;
pub type CFMutableArrayRef = *mut c_void;
pub type CFNumberRef = *const c_void;
pub type CFTypeRef = *const c_void;
pub type CFIndex = isize;
pub type CFAllocatorRef = *const c_void;

pub type AudioHardwareTapID = AudioObjectID;
pub type AudioDeviceIOProcID = *mut c_void;

/// kAudioTapPropertyUID ('tuid') - the UID the aggregate's tap list wants
pub const kAudioTapPropertyUID: u32 = 0x74756964;
/// kAudioTapPropertyFormat ('tapf') - the tap's stream format
pub const kAudioTapPropertyFormat: u32 = 0x74617066;

/// Tap description dictionary keys
mod tap_keys {
    pub const PROCESSES: &str = "Processes";
    pub const MUTE: &str = "Mute";
    pub const UUID: &str = "UUID";
    pub const MIXDOWN: &str = "MixdownBehavior";
    pub const PRIVATE: &str = "Private";
}

/// Aggregate device dictionary keys
mod aggregate_keys {
    pub const UID: &str = "uid";
    pub const NAME: &str = "name";
    pub const IS_PRIVATE: &str = "private";
    pub const TAP_LIST: &str = "taps";
    pub const SUB_TAP_UID: &str = "uid";
    pub const SUB_TAP_DRIFT: &str = "drift";
}

#[link(name = "CoreFoundation", kind = "framework")]
extern "C" {
    pub static kCFAllocatorDefault: CFAllocatorRef;
    pub static kCFBooleanTrue: CFTypeRef;
    pub static kCFBooleanFalse: CFTypeRef;
    pub static kCFTypeDictionaryKeyCallBacks: c_void;
    pub static kCFTypeDictionaryValueCallBacks: c_void;
    pub static kCFTypeArrayCallBacks: c_void;

    pub fn CFDictionaryCreateMutable(
        allocator: CFAllocatorRef,
        capacity: CFIndex,
        keyCallBacks: *const c_void,
        valueCallBacks: *const c_void,
    ) -> CFMutableDictionaryRef;
    pub fn CFDictionarySetValue(dict: CFMutableDictionaryRef, key: CFTypeRef, value: CFTypeRef);
    pub fn CFArrayCreateMutable(
        allocator: CFAllocatorRef,
        capacity: CFIndex,
        callBacks: *const c_void,
    ) -> CFMutableArrayRef;
    pub fn CFArrayAppendValue(array: CFMutableArrayRef, value: CFTypeRef);
    pub fn CFNumberCreate(
        allocator: CFAllocatorRef,
        theType: CFIndex,
        valuePtr: *const c_void,
    ) -> CFNumberRef;
    pub fn CFStringCreateWithCString(
        alloc: CFAllocatorRef,
        cStr: *const i8,
        encoding: u32,
    ) -> CFStringRef;
    pub fn CFRelease(cf: CFTypeRef);
}

const kCFNumberSInt32Type: CFIndex = 3;
const kCFStringEncodingUTF8: u32 = 0x0800_0100;

// Available since macOS 14.4; the version gate in the parent module keeps
// these from being reached on older systems.
#[link(name = "CoreAudio", kind = "framework")]
extern "C" {
    pub fn AudioHardwareCreateProcessTap(
        inDescription: CFTypeRef,
        outTapID: *mut AudioHardwareTapID,
    ) -> OSStatus;
    pub fn AudioHardwareDestroyProcessTap(inTapID: AudioHardwareTapID) -> OSStatus;
    pub fn AudioHardwareCreateAggregateDevice(
        inDescription: CFDictionaryRef,
        outDeviceID: *mut AudioDeviceID,
    ) -> OSStatus;
    pub fn AudioHardwareDestroyAggregateDevice(inDeviceID: AudioDeviceID) -> OSStatus;
    pub fn AudioDeviceCreateIOProcID(
        inDevice: AudioDeviceID,
        inProc: AudioDeviceIOProc,
        inClientData: *mut c_void,
        outIOProcID: *mut AudioDeviceIOProcID,
    ) -> OSStatus;
    pub fn AudioDeviceDestroyIOProcID(
        inDevice: AudioDeviceID,
        inIOProcID: AudioDeviceIOProcID,
    ) -> OSStatus;
    pub fn AudioDeviceStart(inDevice: AudioDeviceID, inProcID: AudioDeviceIOProcID) -> OSStatus;
    pub fn AudioDeviceStop(inDevice: AudioDeviceID, inProcID: AudioDeviceIOProcID) -> OSStatus;
}

pub type AudioDeviceIOProc = extern "C" fn(
    inDevice: AudioDeviceID,
    inNow: *const AudioTimeStamp,
    inInputData: *const AudioBufferList,
    inInputTime: *const AudioTimeStamp,
    outOutputData: *mut AudioBufferList,
    inOutputTime: *const AudioTimeStamp,
    inClientData: *mut c_void,
) -> OSStatus;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AudioTimeStamp {
    pub mSampleTime: f64,
    pub mHostTime: u64,
    pub mRateScalar: f64,
    pub mWordClockTime: u64,
    pub mSMPTETime: SMPTETime,
    pub mFlags: u32,
    pub mReserved: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SMPTETime {
    pub mSubframes: i16,
    pub mSubframeDivisor: i16,
    pub mCounter: u32,
    pub mType: u32,
    pub mFlags: u32,
    pub mHours: i16,
    pub mMinutes: i16,
    pub mSeconds: i16,
    pub mFrames: i16,
}

/// Header of the variable-length AudioBufferList; the buffers follow at
/// offset 8 because of 64-bit alignment padding (see the IO proc).
#[repr(C)]
pub struct AudioBufferList {
    pub mNumberBuffers: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AudioBuffer {
    pub mNumberChannels: u32,
    pub mDataByteSize: u32,
    pub mData: *mut c_void,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioStreamBasicDescription {
    pub mSampleRate: f64,
    pub mFormatID: u32,
    pub mFormatFlags: u32,
    pub mBytesPerPacket: u32,
    pub mFramesPerPacket: u32,
    pub mBytesPerFrame: u32,
    pub mChannelsPerFrame: u32,
    pub mBitsPerChannel: u32,
    pub mReserved: u32,
}

/// # Safety
/// Caller must CFRelease the returned string.
pub unsafe fn create_cf_string(s: &str) -> CFStringRef {
    let c = std::ffi::CString::new(s).unwrap_or_default();
    CFStringCreateWithCString(kCFAllocatorDefault, c.as_ptr(), kCFStringEncodingUTF8)
}

/// # Safety
/// `cf_string` must be a live CFString; not released here.
pub unsafe fn cfstring_to_string(cf_string: CFStringRef) -> Option<String> {
    use core_foundation::base::TCFType;
    use core_foundation::string::CFString;

    if cf_string.is_null() {
        return None;
    }
    let s = CFString::wrap_under_get_rule(cf_string as *const _);
    Some(s.to_string())
}

unsafe fn set_dict_string(dict: CFMutableDictionaryRef, key: &str, value: CFTypeRef) {
    let k = create_cf_string(key);
    CFDictionarySetValue(dict, k, value);
    CFRelease(k);
}

/// Build the tap description: one PID, stereo mixdown, private, unmuted
/// (this engine listens; the target keeps playing to its device).
///
/// # Safety
/// Caller must CFRelease the returned dictionary.
pub unsafe fn create_tap_description(pid: u32) -> CFMutableDictionaryRef {
    let dict = CFDictionaryCreateMutable(
        kCFAllocatorDefault,
        0,
        &kCFTypeDictionaryKeyCallBacks,
        &kCFTypeDictionaryValueCallBacks,
    );

    let processes = CFArrayCreateMutable(kCFAllocatorDefault, 1, &kCFTypeArrayCallBacks);
    let pid_value = pid as i32;
    let pid_num = CFNumberCreate(
        kCFAllocatorDefault,
        kCFNumberSInt32Type,
        &pid_value as *const i32 as *const c_void,
    );
    CFArrayAppendValue(processes, pid_num);
    CFRelease(pid_num);
    set_dict_string(dict, tap_keys::PROCESSES, processes as CFTypeRef);
    CFRelease(processes as CFTypeRef);

    set_dict_string(dict, tap_keys::MUTE, kCFBooleanFalse);
    set_dict_string(dict, tap_keys::PRIVATE, kCFBooleanTrue);

    let uuid = uuid::Uuid::new_v4().to_string();
    let uuid_value = create_cf_string(&uuid);
    set_dict_string(dict, tap_keys::UUID, uuid_value);
    CFRelease(uuid_value);

    // 0 = stereo mixdown
    let mixdown_value = 0i32;
    let mixdown = CFNumberCreate(
        kCFAllocatorDefault,
        kCFNumberSInt32Type,
        &mixdown_value as *const i32 as *const c_void,
    );
    set_dict_string(dict, tap_keys::MIXDOWN, mixdown);
    CFRelease(mixdown);

    dict
}

/// Build the aggregate device description. The aggregate contains ONLY
/// the tap with drift compensation; no real subdevice is needed to pull
/// input from it.
///
/// # Safety
/// Caller must CFRelease the returned dictionary.
pub unsafe fn create_aggregate_description(tap_uid: &str, name: &str) -> CFMutableDictionaryRef {
    let dict = CFDictionaryCreateMutable(
        kCFAllocatorDefault,
        0,
        &kCFTypeDictionaryKeyCallBacks,
        &kCFTypeDictionaryValueCallBacks,
    );

    let agg_uid = format!("org.tapir.aggregate.{}", uuid::Uuid::new_v4());
    let uid_value = create_cf_string(&agg_uid);
    set_dict_string(dict, aggregate_keys::UID, uid_value);
    CFRelease(uid_value);

    let name_value = create_cf_string(name);
    set_dict_string(dict, aggregate_keys::NAME, name_value);
    CFRelease(name_value);

    set_dict_string(dict, aggregate_keys::IS_PRIVATE, kCFBooleanTrue);

    let taps = CFArrayCreateMutable(kCFAllocatorDefault, 1, &kCFTypeArrayCallBacks);
    let tap_dict = CFDictionaryCreateMutable(
        kCFAllocatorDefault,
        0,
        &kCFTypeDictionaryKeyCallBacks,
        &kCFTypeDictionaryValueCallBacks,
    );
    let tap_uid_value = create_cf_string(tap_uid);
    set_dict_string(tap_dict, aggregate_keys::SUB_TAP_UID, tap_uid_value);
    CFRelease(tap_uid_value);
    set_dict_string(tap_dict, aggregate_keys::SUB_TAP_DRIFT, kCFBooleanTrue);
    CFArrayAppendValue(taps, tap_dict as CFTypeRef);
    CFRelease(tap_dict as CFTypeRef);

    set_dict_string(dict, aggregate_keys::TAP_LIST, taps as CFTypeRef);
    CFRelease(taps as CFTypeRef);

    dict
}

/// Read the tap's UID; the aggregate tap list references it.
///
/// # Safety
/// `tap_id` must come from AudioHardwareCreateProcessTap.
pub unsafe fn get_tap_uid(tap_id: AudioObjectID) -> Option<String> {
    let address = AudioObjectPropertyAddress {
        mSelector: kAudioTapPropertyUID,
        mScope: kAudioObjectPropertyScopeGlobal,
        mElement: kAudioObjectPropertyElementMain,
    };

    let mut cf_string: CFStringRef = std::ptr::null();
    let mut size = std::mem::size_of::<CFStringRef>() as u32;
    let status = AudioObjectGetPropertyData(
        tap_id,
        &address,
        0,
        std::ptr::null(),
        &mut size,
        &mut cf_string as *mut CFStringRef as *mut c_void,
    );

    if status != 0 || cf_string.is_null() {
        tracing::warn!("tap {} UID read failed: OSStatus {}", tap_id, status);
        return None;
    }

    let uid = cfstring_to_string(cf_string);
    CFRelease(cf_string);
    uid
}

/// Read the tap's stream format, if the system will say.
///
/// # Safety
/// `tap_id` must come from AudioHardwareCreateProcessTap.
pub unsafe fn get_tap_stream_format(tap_id: AudioObjectID) -> Option<AudioStreamBasicDescription> {
    let address = AudioObjectPropertyAddress {
        mSelector: kAudioTapPropertyFormat,
        mScope: kAudioObjectPropertyScopeGlobal,
        mElement: kAudioObjectPropertyElementMain,
    };

    let mut format = AudioStreamBasicDescription::default();
    let mut size = std::mem::size_of::<AudioStreamBasicDescription>() as u32;
    let status = AudioObjectGetPropertyData(
        tap_id,
        &address,
        0,
        std::ptr::null(),
        &mut size,
        &mut format as *mut AudioStreamBasicDescription as *mut c_void,
    );

    if status != 0 {
        tracing::debug!("tap {} format read failed: OSStatus {}", tap_id, status);
        return None;
    }
    Some(format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cf_string_round_trip() {
        unsafe {
            let s = create_cf_string("tapir");
            assert!(!s.is_null());
            assert_eq!(cfstring_to_string(s).as_deref(), Some("tapir"));
            CFRelease(s);
        }
    }

    #[test]
    fn test_tap_description_builds() {
        unsafe {
            let desc = create_tap_description(1234);
            assert!(!desc.is_null());
            CFRelease(desc as CFTypeRef);
        }
    }
}
